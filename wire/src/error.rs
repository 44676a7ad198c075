use serde_json::{Value, json};

use crate::status::Status;

/// Failure raised by a command handler. The router turns every variant into
/// an error envelope; none of them reach the transport.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("unknown command: {verb} {path}")]
    UnknownCommand { verb: String, path: String },

    #[error("invalid payload: {0}")]
    InvalidPayload(#[from] serde_json::Error),

    #[error("{0}")]
    InvalidArgument(String),

    #[error("session {0} does not exist")]
    NoSuchSession(String),

    #[error("the element with id '{0}' was not found")]
    StaleElement(String),

    #[error("{0}")]
    NoSuchElement(String),

    #[error("Unhandled Alert present")]
    AlertOpen,

    #[error("no alert open")]
    NoAlertOpen,

    #[error("{0}")]
    SessionNotCreated(String),

    #[error("{0}")]
    Unsupported(String),

    #[error("CATCH_ALL: {0}")]
    Failure(String),
}

pub type CommandResult<T = crate::Response> = Result<T, CommandError>;

impl CommandError {
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    pub fn failure(message: impl std::fmt::Display) -> Self {
        Self::Failure(message.to_string())
    }

    pub fn status(&self) -> Status {
        match self {
            CommandError::UnknownCommand { .. } | CommandError::Unsupported(_) => {
                Status::UnknownCommand
            }
            CommandError::InvalidPayload(e) if e.is_data() => Status::InvalidArgument,
            CommandError::InvalidPayload(_) => Status::UnknownError,
            CommandError::InvalidArgument(_) => Status::InvalidArgument,
            CommandError::NoSuchSession(_) => Status::NoSuchDriver,
            CommandError::StaleElement(_) => Status::StaleElementReference,
            CommandError::NoSuchElement(_) => Status::NoSuchElement,
            CommandError::AlertOpen => Status::UnexpectedAlertOpen,
            CommandError::NoAlertOpen => Status::NoAlertOpen,
            CommandError::SessionNotCreated(_) => Status::SessionNotCreated,
            CommandError::Failure(_) => Status::UnknownError,
        }
    }

    /// Name reported in the `class` field of the error value.
    pub fn kind(&self) -> &'static str {
        match self {
            CommandError::UnknownCommand { .. } => "UnknownCommand",
            CommandError::InvalidPayload(_) => "InvalidPayload",
            CommandError::InvalidArgument(_) => "InvalidArgument",
            CommandError::NoSuchSession(_) => "NoSuchSession",
            CommandError::StaleElement(_) => "StaleElementReference",
            CommandError::NoSuchElement(_) => "NoSuchElement",
            CommandError::AlertOpen => "UnexpectedAlertOpen",
            CommandError::NoAlertOpen => "NoAlertOpen",
            CommandError::SessionNotCreated(_) => "SessionNotCreated",
            CommandError::Unsupported(_) => "UnsupportedOperation",
            CommandError::Failure(_) => "HandlerFailure",
        }
    }

    pub fn to_value(&self) -> Value {
        json!({ "class": self.kind(), "message": self.to_string() })
    }
}
