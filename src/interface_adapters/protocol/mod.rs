// Wire protocol: packspecs, schemas, the binary codec and the message catalogue.

pub mod catalog;
pub mod codec;
pub mod error;
pub mod packspec;
pub mod schema;

pub use codec::{FieldValue, MessageCodec};
pub use error::ProtocolError;
pub use schema::{MessageSchema, SchemaRegistry};
