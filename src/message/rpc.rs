//! `<rpc>` request builders.

use chrono::{DateTime, SecondsFormat, Utc};

use super::{escape, BASE_NAMESPACE, NOTIFICATION_NAMESPACE, XML_HEADER};
use crate::error::{NetconfError, Result};

/// A request that can be correlated to its reply.
///
/// Implement this to send operations outside the built-in [`Operation`]
/// set; the session only needs the id and the encoded document.
pub trait RpcMethod: Send + Sync {
    /// Correlation key echoed back in the reply's `message-id`
    fn message_id(&self) -> &str;

    /// Encode the full `<rpc>` document
    fn to_xml(&self) -> Result<Vec<u8>>;
}

/// Configuration datastore
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Datastore {
    /// `<running/>`
    Running,
    /// `<candidate/>`
    Candidate,
    /// `<startup/>`
    Startup,
}

impl Datastore {
    /// Element name
    pub fn name(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Candidate => "candidate",
            Self::Startup => "startup",
        }
    }
}

/// Retrieval filter
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    /// Subtree filter; content inserted verbatim
    Subtree(String),
    /// XPath filter expression
    XPath(String),
}

impl Filter {
    fn to_xml(&self) -> String {
        match self {
            Self::Subtree(content) => format!("<filter type=\"subtree\">{}</filter>", content),
            Self::XPath(select) => {
                format!("<filter type=\"xpath\" select=\"{}\"/>", escape(select))
            },
        }
    }
}

/// edit-config `default-operation`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefaultOperation {
    /// merge
    Merge,
    /// replace
    Replace,
    /// none
    None,
}

impl DefaultOperation {
    /// Wire value
    pub fn name(&self) -> &'static str {
        match self {
            Self::Merge => "merge",
            Self::Replace => "replace",
            Self::None => "none",
        }
    }
}

/// Built-in protocol operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    /// `<get>`
    Get {
        /// Optional filter
        filter: Option<Filter>,
    },
    /// `<get-config>`
    GetConfig {
        /// Datastore to read
        source: Datastore,
        /// Optional filter
        filter: Option<Filter>,
    },
    /// `<edit-config>`
    EditConfig {
        /// Datastore to modify
        target: Datastore,
        /// Optional default operation
        default_operation: Option<DefaultOperation>,
        /// `<config>` content, inserted verbatim
        config: String,
    },
    /// `<lock>`
    Lock(Datastore),
    /// `<unlock>`
    Unlock(Datastore),
    /// `<commit/>`
    Commit,
    /// `<discard-changes/>`
    DiscardChanges,
    /// `<validate>`
    Validate(Datastore),
    /// `<close-session/>`
    CloseSession,
    /// `<kill-session>`
    KillSession(u64),
    /// RFC 5277 `<create-subscription>`
    CreateSubscription {
        /// Stream name (server default when absent)
        stream: Option<String>,
        /// Replay start
        start_time: Option<DateTime<Utc>>,
        /// Replay stop; requires `start_time`
        stop_time: Option<DateTime<Utc>>,
    },
    /// Arbitrary operation body, inserted verbatim
    Raw(String),
}

impl Operation {
    /// Operation name, for logging
    pub fn name(&self) -> &'static str {
        match self {
            Self::Get { .. } => "get",
            Self::GetConfig { .. } => "get-config",
            Self::EditConfig { .. } => "edit-config",
            Self::Lock(_) => "lock",
            Self::Unlock(_) => "unlock",
            Self::Commit => "commit",
            Self::DiscardChanges => "discard-changes",
            Self::Validate(_) => "validate",
            Self::CloseSession => "close-session",
            Self::KillSession(_) => "kill-session",
            Self::CreateSubscription { .. } => "create-subscription",
            Self::Raw(_) => "rpc",
        }
    }

    fn body(&self) -> Result<String> {
        let body = match self {
            Self::Get { filter } => format!("<get>{}</get>", filter_xml(filter.as_ref())),
            Self::GetConfig { source, filter } => format!(
                "<get-config><source><{}/></source>{}</get-config>",
                source.name(),
                filter_xml(filter.as_ref())
            ),
            Self::EditConfig {
                target,
                default_operation,
                config,
            } => {
                let default_operation = default_operation
                    .map(|op| format!("<default-operation>{}</default-operation>", op.name()))
                    .unwrap_or_default();
                format!(
                    "<edit-config><target><{}/></target>{}<config>{}</config></edit-config>",
                    target.name(),
                    default_operation,
                    config
                )
            },
            Self::Lock(target) => format!("<lock><target><{}/></target></lock>", target.name()),
            Self::Unlock(target) => {
                format!("<unlock><target><{}/></target></unlock>", target.name())
            },
            Self::Commit => "<commit/>".to_string(),
            Self::DiscardChanges => "<discard-changes/>".to_string(),
            Self::Validate(source) => {
                format!("<validate><source><{}/></source></validate>", source.name())
            },
            Self::CloseSession => "<close-session/>".to_string(),
            Self::KillSession(id) => {
                format!("<kill-session><session-id>{}</session-id></kill-session>", id)
            },
            Self::CreateSubscription {
                stream,
                start_time,
                stop_time,
            } => {
                if stop_time.is_some() && start_time.is_none() {
                    return Err(NetconfError::Encoding(
                        "create-subscription stopTime requires startTime".to_string(),
                    ));
                }
                if let (Some(start), Some(stop)) = (start_time, stop_time) {
                    if stop < start {
                        return Err(NetconfError::Encoding(format!(
                            "create-subscription stopTime {} precedes startTime {}",
                            stop, start
                        )));
                    }
                }

                let mut xml = format!("<create-subscription xmlns=\"{}\">", NOTIFICATION_NAMESPACE);
                if let Some(stream) = stream {
                    xml.push_str(&format!("<stream>{}</stream>", escape(stream)));
                }
                if let Some(start) = start_time {
                    xml.push_str(&format!("<startTime>{}</startTime>", timestamp(start)));
                }
                if let Some(stop) = stop_time {
                    xml.push_str(&format!("<stopTime>{}</stopTime>", timestamp(stop)));
                }
                xml.push_str("</create-subscription>");
                xml
            },
            Self::Raw(body) => body.clone(),
        };
        Ok(body)
    }
}

fn filter_xml(filter: Option<&Filter>) -> String {
    filter.map(Filter::to_xml).unwrap_or_default()
}

fn timestamp(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// An `<rpc>` request carrying one [`Operation`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rpc {
    message_id: String,
    operation: Operation,
}

impl Rpc {
    /// Create a request with a random message ID
    pub fn new(operation: Operation) -> Self {
        Self {
            message_id: uuid::Uuid::new_v4().to_string(),
            operation,
        }
    }

    /// Override the message ID
    pub fn with_message_id(mut self, message_id: impl Into<String>) -> Self {
        self.message_id = message_id.into();
        self
    }

    /// The carried operation
    pub fn operation(&self) -> &Operation {
        &self.operation
    }

    /// `<get>`
    pub fn get(filter: Option<Filter>) -> Self {
        Self::new(Operation::Get { filter })
    }

    /// `<get-config>`
    pub fn get_config(source: Datastore, filter: Option<Filter>) -> Self {
        Self::new(Operation::GetConfig { source, filter })
    }

    /// `<edit-config>`
    pub fn edit_config(
        target: Datastore,
        default_operation: Option<DefaultOperation>,
        config: impl Into<String>,
    ) -> Self {
        Self::new(Operation::EditConfig {
            target,
            default_operation,
            config: config.into(),
        })
    }

    /// `<lock>`
    pub fn lock(target: Datastore) -> Self {
        Self::new(Operation::Lock(target))
    }

    /// `<unlock>`
    pub fn unlock(target: Datastore) -> Self {
        Self::new(Operation::Unlock(target))
    }

    /// `<commit/>`
    pub fn commit() -> Self {
        Self::new(Operation::Commit)
    }

    /// `<discard-changes/>`
    pub fn discard_changes() -> Self {
        Self::new(Operation::DiscardChanges)
    }

    /// `<validate>`
    pub fn validate(source: Datastore) -> Self {
        Self::new(Operation::Validate(source))
    }

    /// `<close-session/>`
    pub fn close_session() -> Self {
        Self::new(Operation::CloseSession)
    }

    /// `<kill-session>`
    pub fn kill_session(session_id: u64) -> Self {
        Self::new(Operation::KillSession(session_id))
    }

    /// `<create-subscription>`
    pub fn create_subscription(
        stream: Option<String>,
        start_time: Option<DateTime<Utc>>,
        stop_time: Option<DateTime<Utc>>,
    ) -> Self {
        Self::new(Operation::CreateSubscription {
            stream,
            start_time,
            stop_time,
        })
    }

    /// Arbitrary operation body
    pub fn raw(body: impl Into<String>) -> Self {
        Self::new(Operation::Raw(body.into()))
    }
}

impl RpcMethod for Rpc {
    fn message_id(&self) -> &str {
        &self.message_id
    }

    fn to_xml(&self) -> Result<Vec<u8>> {
        if self.message_id.is_empty() {
            return Err(NetconfError::Encoding(format!(
                "{} request has an empty message-id",
                self.operation.name()
            )));
        }

        let body = self.operation.body()?;
        let xml = format!(
            "{}<rpc message-id=\"{}\" xmlns=\"{}\">{}</rpc>",
            XML_HEADER,
            escape(&self.message_id),
            BASE_NAMESPACE,
            body
        );
        Ok(xml.into_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn encode(rpc: &Rpc) -> String {
        String::from_utf8(rpc.to_xml().unwrap()).unwrap()
    }

    #[test]
    fn test_rpc_envelope() {
        let xml = encode(&Rpc::commit().with_message_id("42"));
        assert!(xml.starts_with(XML_HEADER));
        assert!(xml.ends_with(
            r#"<rpc message-id="42" xmlns="urn:ietf:params:xml:ns:netconf:base:1.0"><commit/></rpc>"#
        ));
    }

    #[test]
    fn test_random_message_ids_are_unique() {
        assert_ne!(Rpc::commit().message_id(), Rpc::commit().message_id());
    }

    #[test]
    fn test_empty_message_id_is_rejected() {
        let result = Rpc::commit().with_message_id("").to_xml();
        assert!(matches!(result, Err(NetconfError::Encoding(_))));
    }

    #[test]
    fn test_message_id_is_escaped() {
        let xml = encode(&Rpc::commit().with_message_id("a\"b"));
        assert!(xml.contains(r#"message-id="a&quot;b""#));
    }

    #[test]
    fn test_get_config_with_subtree_filter() {
        let rpc = Rpc::get_config(
            Datastore::Running,
            Some(Filter::Subtree("<interfaces/>".to_string())),
        );
        let xml = encode(&rpc);
        assert!(xml.contains(
            r#"<get-config><source><running/></source><filter type="subtree"><interfaces/></filter></get-config>"#
        ));
    }

    #[test]
    fn test_get_with_xpath_filter() {
        let xml = encode(&Rpc::get(Some(Filter::XPath("/a[b<1]".to_string()))));
        assert!(xml.contains(r#"<filter type="xpath" select="/a[b&lt;1]"/>"#));
    }

    #[test]
    fn test_edit_config() {
        let rpc = Rpc::edit_config(
            Datastore::Candidate,
            Some(DefaultOperation::Merge),
            "<toaster><darknessFactor>750</darknessFactor></toaster>",
        );
        let xml = encode(&rpc);
        assert!(xml.contains("<target><candidate/></target>"));
        assert!(xml.contains("<default-operation>merge</default-operation>"));
        assert!(xml.contains("<config><toaster><darknessFactor>750</darknessFactor></toaster></config>"));
        assert_eq!(rpc.operation().name(), "edit-config");
    }

    #[test]
    fn test_lock_unlock() {
        assert!(encode(&Rpc::lock(Datastore::Candidate)).contains("<lock><target><candidate/></target></lock>"));
        assert!(encode(&Rpc::unlock(Datastore::Startup)).contains("<unlock><target><startup/></target></unlock>"));
    }

    #[test]
    fn test_kill_session() {
        assert!(encode(&Rpc::kill_session(12))
            .contains("<kill-session><session-id>12</session-id></kill-session>"));
    }

    #[test]
    fn test_create_subscription() {
        let start = Utc.with_ymd_and_hms(2021, 6, 1, 0, 0, 0).unwrap();
        let rpc = Rpc::create_subscription(Some("NETCONF".to_string()), Some(start), None);
        let xml = encode(&rpc);
        assert!(xml.contains(
            r#"<create-subscription xmlns="urn:ietf:params:xml:ns:netconf:notification:1.0"><stream>NETCONF</stream><startTime>2021-06-01T00:00:00Z</startTime></create-subscription>"#
        ));
    }

    #[test]
    fn test_create_subscription_defaults() {
        let xml = encode(&Rpc::create_subscription(None, None, None));
        assert!(xml.contains(
            r#"<create-subscription xmlns="urn:ietf:params:xml:ns:netconf:notification:1.0"></create-subscription>"#
        ));
    }

    #[test]
    fn test_stop_time_requires_start_time() {
        let stop = Utc.with_ymd_and_hms(2021, 6, 1, 0, 0, 0).unwrap();
        let result = Rpc::create_subscription(None, None, Some(stop)).to_xml();
        assert!(matches!(result, Err(NetconfError::Encoding(_))));

        let start = Utc.with_ymd_and_hms(2021, 6, 2, 0, 0, 0).unwrap();
        let result = Rpc::create_subscription(None, Some(start), Some(stop)).to_xml();
        assert!(matches!(result, Err(NetconfError::Encoding(_))));
    }

    #[test]
    fn test_raw_body() {
        let body = r#"<make-toast xmlns="http://netconfcentral.org/ns/toaster"><toasterDoneness>9</toasterDoneness></make-toast>"#;
        let xml = encode(&Rpc::raw(body).with_message_id("1"));
        assert!(xml.contains(body));
    }
}
