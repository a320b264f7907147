//! NETCONF message catalog.
//!
//! Typed request builders and reply/notification decoders operating on raw
//! bytes. The session engine only relies on a narrow contract:
//!
//! | Type           | Contract used by the session                     |
//! |----------------|--------------------------------------------------|
//! | [`RpcMethod`]  | `message_id()` and `to_xml()`                    |
//! | [`RpcReply`]   | `message_id`, `errors`, `raw`                    |
//! | [`Notification`] | `subscription_id`, `raw`                       |
//! | [`Hello`]      | `session_id`, `capabilities`                     |
//!
//! Decoding is deliberately shallow: the decoders extract the correlation
//! fields and `<rpc-error>` details, keep the raw document, and reject
//! anything that is not well-formed XML rooted at the expected element.
//! No schema validation happens here.

mod hello;
mod notification;
mod reply;
mod rpc;

use std::borrow::Cow;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

pub use hello::Hello;
pub use notification::Notification;
pub use reply::{RpcError, RpcReply};
pub use rpc::{Datastore, DefaultOperation, Filter, Operation, Rpc, RpcMethod};

use crate::error::{NetconfError, Result};

/// NETCONF base 1.0 capability (end-of-message framing)
pub const BASE_1_0: &str = "urn:ietf:params:netconf:base:1.0";

/// NETCONF base 1.1 capability (chunked framing)
pub const BASE_1_1: &str = "urn:ietf:params:netconf:base:1.1";

/// RFC 5277 notification capability
pub const NOTIFICATION_CAPABILITY: &str = "urn:ietf:params:netconf:capability:notification:1.0";

/// Capabilities a client advertises when none are configured
pub const DEFAULT_CAPABILITIES: [&str; 2] = [BASE_1_0, BASE_1_1];

/// Base protocol XML namespace
pub const BASE_NAMESPACE: &str = "urn:ietf:params:xml:ns:netconf:base:1.0";

/// RFC 5277 notification XML namespace
pub const NOTIFICATION_NAMESPACE: &str = "urn:ietf:params:xml:ns:netconf:notification:1.0";

/// Dispatcher key of the single notification consumer.
///
/// Notifications carry no per-stream identifier, so every decoded
/// [`Notification`] reports this value as its subscription id.
pub const NOTIFICATION_STREAM_HANDLER: &str = "DEFAULT_NOTIFICATION_STREAM";

/// Payload substring identifying an `<rpc-reply>`
pub const RPC_REPLY_MARKER: &str = "<rpc-reply";

/// Payload substring identifying a `<notification>`
pub const NOTIFICATION_MARKER: &str = "<notification";

/// XML declaration prepended to every outbound message
pub(crate) const XML_HEADER: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n";

/// A node visited while walking a document.
pub(crate) enum Node<'e> {
    /// Element start (or empty element)
    Start(&'e BytesStart<'e>),
    /// Text content of the innermost open element
    Text(&'e str),
}

/// Walk a document rooted at `root`, reporting each element and text node
/// together with the local-name path leading to it.
pub(crate) fn walk<F>(data: &[u8], root: &str, mut visit: F) -> Result<()>
where
    F: FnMut(&[String], Node<'_>) -> Result<()>,
{
    let text = std::str::from_utf8(data)
        .map_err(|e| NetconfError::Decoding(format!("Invalid UTF-8: {e}")))?;

    let mut reader = Reader::from_str(text);
    reader.trim_text(true);

    let mut path: Vec<String> = Vec::new();
    let mut seen_root = false;

    loop {
        match reader.read_event()? {
            Event::Start(start) => {
                let name = local_name(&start);
                check_root(&mut seen_root, &path, &name, root)?;
                path.push(name);
                visit(&path, Node::Start(&start))?;
            },
            Event::Empty(start) => {
                let name = local_name(&start);
                check_root(&mut seen_root, &path, &name, root)?;
                path.push(name);
                visit(&path, Node::Start(&start))?;
                path.pop();
            },
            Event::End(_) => {
                path.pop();
            },
            Event::Text(content) => {
                if !path.is_empty() {
                    let content = content.unescape()?;
                    visit(&path, Node::Text(&content))?;
                }
            },
            Event::Eof => break,
            _ => {},
        }
    }

    if !path.is_empty() {
        return Err(NetconfError::Decoding(format!(
            "Truncated document: <{}> never closed",
            path.join("/")
        )));
    }
    if !seen_root {
        return Err(NetconfError::Decoding(format!("Missing <{root}> element")));
    }

    Ok(())
}

fn check_root(seen_root: &mut bool, path: &[String], name: &str, root: &str) -> Result<()> {
    if !path.is_empty() {
        return Ok(());
    }
    if *seen_root {
        return Err(NetconfError::Decoding(format!(
            "Unexpected second top-level element <{name}>"
        )));
    }
    if name != root {
        return Err(NetconfError::Decoding(format!(
            "Expected <{root}>, found <{name}>"
        )));
    }
    *seen_root = true;
    Ok(())
}

pub(crate) fn local_name(start: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(start.local_name().as_ref()).into_owned()
}

/// Look up an attribute by local name
pub(crate) fn attribute(start: &BytesStart<'_>, name: &str) -> Result<Option<String>> {
    for attr in start.attributes() {
        let attr = attr?;
        if attr.key.local_name().as_ref() == name.as_bytes() {
            return Ok(Some(attr.unescape_value()?.into_owned()));
        }
    }
    Ok(None)
}

pub(crate) fn escape(raw: &str) -> Cow<'_, str> {
    quick_xml::escape::escape(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paths(data: &str, root: &str) -> Result<Vec<String>> {
        let mut seen = Vec::new();
        walk(data.as_bytes(), root, |path, node| {
            if let Node::Text(text) = node {
                seen.push(format!("{}={}", path.join("/"), text));
            } else {
                seen.push(path.join("/"));
            }
            Ok(())
        })?;
        Ok(seen)
    }

    #[test]
    fn test_walk_reports_paths_and_text() {
        let seen = paths("<a><b>x</b><c/></a>", "a").unwrap();
        assert_eq!(seen, vec!["a", "a/b", "a/b=x", "a/c"]);
    }

    #[test]
    fn test_walk_strips_namespace_prefixes() {
        let seen = paths(r#"<nc:a xmlns:nc="urn:x"><nc:b/></nc:a>"#, "a").unwrap();
        assert_eq!(seen, vec!["a", "a/b"]);
    }

    #[test]
    fn test_walk_rejects_wrong_root() {
        let err = paths("<b/>", "a").unwrap_err();
        assert!(matches!(err, NetconfError::Decoding(_)));
    }

    #[test]
    fn test_walk_rejects_truncated_document() {
        let err = paths("<a><b>", "a").unwrap_err();
        assert!(matches!(err, NetconfError::Decoding(_)));
    }

    #[test]
    fn test_walk_rejects_mismatched_end() {
        assert!(paths("<a></b>", "a").is_err());
    }

    #[test]
    fn test_walk_requires_root() {
        assert!(paths("<?xml version=\"1.0\"?>", "a").is_err());
    }
}
