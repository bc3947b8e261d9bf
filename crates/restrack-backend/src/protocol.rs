//! # Wire Protocol
//!
//! Request: a JSON object whose `cmd` field names the command, with the
//! command's own fields alongside it.
//!
//! ```json
//! {"cmd": "AllocationFailed", "oid": "6f1c...", "reason": "Timeout(vm did not boot)"}
//! ```
//!
//! Response: an [`Envelope`], `{"result": ..., "error": ...}`, with exactly
//! one of the two non-null.

use crate::command::CommandParams;
use crate::error::BackendError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A command request as it travels over the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandMessage {
    pub cmd: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl CommandMessage {
    pub fn new(cmd: impl Into<String>, fields: Map<String, Value>) -> Self {
        Self {
            cmd: cmd.into(),
            fields,
        }
    }

    /// Builds the message for a typed command.
    pub fn from_params<P: CommandParams>(params: &P) -> Result<Self, serde_json::Error> {
        match serde_json::to_value(params)? {
            Value::Object(fields) => Ok(Self::new(P::NAME, fields)),
            other => Err(serde::ser::Error::custom(format!(
                "{} must serialize to a JSON object, got {other}",
                P::NAME
            ))),
        }
    }
}

/// The `{result, error}` response wrapper.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
}

impl Envelope {
    pub fn ok(result: Value) -> Self {
        Self {
            result: Some(result),
            error: None,
        }
    }

    pub fn err(error: impl Into<String>) -> Self {
        Self {
            result: None,
            error: Some(error.into()),
        }
    }

    /// Renders a dispatch outcome; errors travel as their `Display` text.
    pub fn from_result(result: Result<Value, BackendError>) -> Self {
        match result {
            Ok(value) => Self::ok(value),
            Err(e) => Self::err(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::AllocationFailed;
    use crate::record::Oid;
    use serde_json::json;

    #[test]
    fn test_message_flattens_fields_next_to_cmd() {
        let message = CommandMessage::from_params(&AllocationFailed {
            oid: Oid::from("abc"),
            reason: Some("boom".into()),
        })
        .unwrap();

        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(
            value,
            json!({"cmd": "AllocationFailed", "oid": "abc", "reason": "boom"})
        );

        let decoded: CommandMessage = serde_json::from_value(value).unwrap();
        assert_eq!(decoded.cmd, "AllocationFailed");
        assert!(!decoded.fields.contains_key("cmd"));
    }

    #[test]
    fn test_envelope_null_result_reads_as_none() {
        let envelope: Envelope =
            serde_json::from_str(r#"{"result": null, "error": "Record store closed"}"#).unwrap();
        assert_eq!(envelope, Envelope::err("Record store closed"));
    }

    #[test]
    fn test_envelope_from_error_keeps_message() {
        let envelope = Envelope::from_result(Err(BackendError::UnknownCommand {
            module: "memory".into(),
            cmd: "Teleport".into(),
        }));
        assert!(envelope.result.is_none());
        assert_eq!(
            envelope.error.as_deref(),
            Some("Unknown command 'Teleport' for backend module 'memory'")
        );
    }
}
