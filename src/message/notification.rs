//! `<notification>` decoding (RFC 5277).

use chrono::{DateTime, FixedOffset};

use super::{walk, Node, NOTIFICATION_STREAM_HANDLER};
use crate::error::{NetconfError, Result};

/// Server-pushed event notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// Correlation key; always [`NOTIFICATION_STREAM_HANDLER`]
    pub subscription_id: String,
    /// `eventTime`, when present
    pub event_time: Option<DateTime<FixedOffset>>,
    /// The raw notification document
    pub raw: String,
}

impl Notification {
    /// Decode from raw bytes
    pub fn from_xml(data: &[u8]) -> Result<Self> {
        let mut event_time = None;

        walk(data, "notification", |path, node| {
            if let ([_, field], Node::Text(text)) = (path, node) {
                if field == "eventTime" {
                    let parsed = DateTime::parse_from_rfc3339(text.trim()).map_err(|e| {
                        NetconfError::Decoding(format!("Invalid eventTime {:?}: {}", text, e))
                    })?;
                    event_time = Some(parsed);
                }
            }
            Ok(())
        })?;

        Ok(Self {
            subscription_id: NOTIFICATION_STREAM_HANDLER.to_string(),
            event_time,
            raw: String::from_utf8_lossy(data).into_owned(),
        })
    }
}
