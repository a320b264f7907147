//! `<rpc-reply>` decoding.

use std::fmt;

use super::{attribute, walk, Node};
use crate::error::Result;

/// A protocol-level error carried inside a reply
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RpcError {
    /// `error-type` (transport, rpc, protocol, application)
    pub error_type: String,
    /// `error-tag`
    pub tag: String,
    /// `error-severity` (error, warning)
    pub severity: String,
    /// `error-app-tag`
    pub app_tag: Option<String>,
    /// `error-path`
    pub path: Option<String>,
    /// `error-message`
    pub message: Option<String>,
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.severity, self.error_type, self.tag)?;
        if let Some(message) = &self.message {
            write!(f, ": {}", message)?;
        }
        Ok(())
    }
}

/// Reply to an `<rpc>` request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RpcReply {
    /// `message-id` of the request this answers (empty if absent)
    pub message_id: String,
    /// Whether the reply contained `<ok/>`
    pub ok: bool,
    /// Protocol-level errors, in document order
    pub errors: Vec<RpcError>,
    /// The raw reply document
    pub raw: String,
}

impl RpcReply {
    /// Decode from raw bytes
    pub fn from_xml(data: &[u8]) -> Result<Self> {
        let mut reply = RpcReply::default();

        walk(data, "rpc-reply", |path, node| {
            match (path, node) {
                ([_], Node::Start(start)) => {
                    reply.message_id = attribute(start, "message-id")?.unwrap_or_default();
                },
                ([_, ok], Node::Start(_)) if ok == "ok" => reply.ok = true,
                ([_, err], Node::Start(_)) if err == "rpc-error" => {
                    reply.errors.push(RpcError::default());
                },
                ([_, err, field], Node::Text(text)) if err == "rpc-error" => {
                    if let Some(error) = reply.errors.last_mut() {
                        let text = text.trim().to_string();
                        match field.as_str() {
                            "error-type" => error.error_type = text,
                            "error-tag" => error.tag = text,
                            "error-severity" => error.severity = text,
                            "error-app-tag" => error.app_tag = Some(text),
                            "error-path" => error.path = Some(text),
                            "error-message" => error.message = Some(text),
                            _ => {},
                        }
                    }
                },
                _ => {},
            }
            Ok(())
        })?;

        reply.raw = String::from_utf8_lossy(data).into_owned();
        Ok(reply)
    }

    /// Whether the reply carries any `<rpc-error>`
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Errors joined into one line, for diagnostics
    pub fn error_summary(&self) -> String {
        self.errors
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ")
    }
}
