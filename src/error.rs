//! Error taxonomy for event processing.
//!
//! NotFound / Validation / Unauthorized abort the current event without
//! closing the connection; they are echoed back to the sender as an error
//! frame. Storage and Cache cover the persistence collaborator and the
//! Redis presence store respectively.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("{0} not found")]
    NotFound(String),

    #[error("{0} already exists")]
    AlreadyExists(String),

    #[error("invalid event payload: {0}")]
    Validation(String),

    #[error("user {user_id} is not a member of chat {chat_id}")]
    Unauthorized { chat_id: i64, user_id: i64 },

    #[error("storage failure: {0}")]
    Storage(String),

    #[error("presence store failure: {0}")]
    Cache(String),
}

impl Error {
    /// Numeric code carried in the outbound error frame.
    pub fn code(&self) -> u16 {
        match self {
            Error::NotFound(_) => 404,
            Error::AlreadyExists(_) => 409,
            Error::Validation(_) => 400,
            Error::Unauthorized { .. } => 403,
            Error::Storage(_) => 500,
            Error::Cache(_) => 503,
        }
    }
}
