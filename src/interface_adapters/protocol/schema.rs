// Schema registry: the single source of truth for field order and binary layout per tag.

use super::error::ProtocolError;
use super::packspec::PackSpec;
use crate::domain::MessageTag;
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct MessageSchema {
    tag: MessageTag,
    fields: Vec<&'static str>,
    packspec: PackSpec,
}

impl MessageSchema {
    pub fn tag(&self) -> MessageTag {
        self.tag
    }

    pub fn fields(&self) -> &[&'static str] {
        &self.fields
    }

    pub fn packspec(&self) -> &PackSpec {
        &self.packspec
    }

    /// Smallest valid encoding, tag included.
    pub fn min_len(&self) -> usize {
        MessageTag::WIDTH + self.packspec.fixed_len()
    }
}

/// Registry of message schemas, built once at startup and shared by reference.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    schemas: HashMap<MessageTag, MessageSchema>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a schema. Existing tags are never overwritten.
    pub fn define(
        &mut self,
        tag: MessageTag,
        fields: &[&'static str],
        packspec: &str,
    ) -> Result<(), ProtocolError> {
        if self.schemas.contains_key(&tag) {
            return Err(ProtocolError::DuplicateTag(tag));
        }

        let packspec = PackSpec::parse(packspec).map_err(|e| ProtocolError::InvalidSchema {
            tag,
            reason: e.to_string(),
        })?;
        if packspec.len() != fields.len() {
            return Err(ProtocolError::InvalidSchema {
                tag,
                reason: format!(
                    "{} fields but {} packspec codes",
                    fields.len(),
                    packspec.len()
                ),
            });
        }

        self.schemas.insert(
            tag,
            MessageSchema {
                tag,
                fields: fields.to_vec(),
                packspec,
            },
        );
        Ok(())
    }

    pub fn schema(&self, tag: MessageTag) -> Result<&MessageSchema, ProtocolError> {
        self.schemas
            .get(&tag)
            .ok_or(ProtocolError::UnknownTag(tag))
    }

    pub fn fields_of(&self, tag: MessageTag) -> Result<&[&'static str], ProtocolError> {
        self.schema(tag).map(MessageSchema::fields)
    }

    pub fn tags(&self) -> impl Iterator<Item = MessageTag> + '_ {
        self.schemas.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }
}
