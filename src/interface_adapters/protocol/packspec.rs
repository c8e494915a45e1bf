// Compact binary layout strings, one code per field.

use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldCode {
    U8,
    I8,
    U16,
    I16,
    U32,
    I32,
    U64,
    I64,
    F32,
    F64,
    Bool,
    Char,
    /// Exactly `n` raw bytes.
    FixedBytes(usize),
    /// Every byte left in the buffer. Only valid as the last code.
    Remainder,
}

impl FieldCode {
    /// Encoded width in bytes; `None` for the variable-length remainder.
    pub fn width(self) -> Option<usize> {
        match self {
            FieldCode::U8 | FieldCode::I8 | FieldCode::Bool | FieldCode::Char => Some(1),
            FieldCode::U16 | FieldCode::I16 => Some(2),
            FieldCode::U32 | FieldCode::I32 | FieldCode::F32 => Some(4),
            FieldCode::U64 | FieldCode::I64 | FieldCode::F64 => Some(8),
            FieldCode::FixedBytes(n) => Some(n),
            FieldCode::Remainder => None,
        }
    }

    fn from_symbol(symbol: char) -> Option<Self> {
        Some(match symbol {
            'B' => FieldCode::U8,
            'b' => FieldCode::I8,
            'H' => FieldCode::U16,
            'h' => FieldCode::I16,
            'I' => FieldCode::U32,
            'i' => FieldCode::I32,
            'Q' => FieldCode::U64,
            'q' => FieldCode::I64,
            'f' => FieldCode::F32,
            'd' => FieldCode::F64,
            '?' => FieldCode::Bool,
            'c' => FieldCode::Char,
            '*' => FieldCode::Remainder,
            _ => return None,
        })
    }
}

impl fmt::Display for FieldCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            FieldCode::U8 => "B",
            FieldCode::I8 => "b",
            FieldCode::U16 => "H",
            FieldCode::I16 => "h",
            FieldCode::U32 => "I",
            FieldCode::I32 => "i",
            FieldCode::U64 => "Q",
            FieldCode::I64 => "q",
            FieldCode::F32 => "f",
            FieldCode::F64 => "d",
            FieldCode::Bool => "?",
            FieldCode::Char => "c",
            FieldCode::FixedBytes(n) => return write!(f, "{n}s"),
            FieldCode::Remainder => "*",
        };
        f.write_str(symbol)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PackSpecError {
    #[error("unknown code `{0}`")]
    UnknownCode(char),
    #[error("count {0} must be followed by `s`")]
    CountWithoutString(usize),
    #[error("remainder code `*` must be the last code")]
    RemainderNotLast,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackSpec {
    codes: Vec<FieldCode>,
}

impl PackSpec {
    pub fn parse(spec: &str) -> Result<Self, PackSpecError> {
        let mut codes = Vec::new();
        let mut count: Option<usize> = None;

        for symbol in spec.chars().filter(|c| !c.is_whitespace()) {
            if let Some(digit) = symbol.to_digit(10) {
                count = Some(count.unwrap_or(0) * 10 + digit as usize);
                continue;
            }
            if symbol == 's' {
                codes.push(FieldCode::FixedBytes(count.take().unwrap_or(1)));
                continue;
            }
            if let Some(n) = count {
                return Err(PackSpecError::CountWithoutString(n));
            }
            let code = FieldCode::from_symbol(symbol).ok_or(PackSpecError::UnknownCode(symbol))?;
            codes.push(code);
        }
        if let Some(n) = count {
            return Err(PackSpecError::CountWithoutString(n));
        }

        let remainder_at = codes.iter().position(|c| *c == FieldCode::Remainder);
        if remainder_at.is_some_and(|i| i + 1 != codes.len()) {
            return Err(PackSpecError::RemainderNotLast);
        }

        Ok(Self { codes })
    }

    pub fn codes(&self) -> &[FieldCode] {
        &self.codes
    }

    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }

    /// Bytes needed by every code except a trailing remainder.
    pub fn fixed_len(&self) -> usize {
        self.codes.iter().filter_map(|c| c.width()).sum()
    }

    pub fn has_remainder(&self) -> bool {
        self.codes.last() == Some(&FieldCode::Remainder)
    }
}

impl fmt::Display for PackSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.codes.iter().try_for_each(|c| write!(f, "{c}"))
    }
}
