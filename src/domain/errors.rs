// Outcomes of validating a client request on the server.

use super::messages::Message;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RequestError {
    /// Rejected but recoverable; the reply goes back to the originating client only.
    #[error("request rejected, replying with {0:?}")]
    InvalidRequest(Message),
    /// The client's predicted state has diverged; handled by starting a resync.
    #[error("client state diverged: {0}")]
    DesyncDetected(&'static str),
}
