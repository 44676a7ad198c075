use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CommandError;
use crate::status::Status;

/// The `{sessionId, status, value}` envelope wrapping every command result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    #[serde(rename = "sessionId", default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub status: Status,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub value: Value,
}

impl Response {
    pub fn success(session_id: Option<String>, value: impl Into<Value>) -> Self {
        Self {
            session_id,
            status: Status::Success,
            value: value.into(),
        }
    }

    pub fn error(session_id: Option<String>, err: &CommandError) -> Self {
        Self {
            session_id,
            status: err.status(),
            value: err.to_value(),
        }
    }

    pub fn unknown_command(verb: &str, path: &str) -> Self {
        Self::error(
            None,
            &CommandError::UnknownCommand {
                verb: verb.to_string(),
                path: path.to_string(),
            },
        )
    }

    pub fn to_json(&self) -> Vec<u8> {
        // Response only holds serde_json values, serialization cannot fail.
        serde_json::to_vec(self).unwrap_or_else(|_| b"{\"status\":13}".to_vec())
    }
}
