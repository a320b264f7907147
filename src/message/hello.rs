//! Hello message exchanged once in each direction at session start.

use super::{escape, walk, Node, BASE_NAMESPACE, XML_HEADER};
use crate::error::{NetconfError, Result};

/// Capability announcement
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Hello {
    /// Session ID assigned by the server (absent in client hellos)
    pub session_id: Option<u64>,
    /// Advertised capability URNs
    pub capabilities: Vec<String>,
}

impl Hello {
    /// Create a client hello advertising `capabilities`
    pub fn new<I, S>(capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            session_id: None,
            capabilities: capabilities.into_iter().map(Into::into).collect(),
        }
    }

    /// Attach a session ID (server side)
    pub fn with_session_id(mut self, session_id: u64) -> Self {
        self.session_id = Some(session_id);
        self
    }

    /// Whether any capability contains the substring `1.1`
    pub fn advertises_base_1_1(&self) -> bool {
        self.capabilities.iter().any(|c| c.contains("1.1"))
    }

    /// Encode as an XML document
    pub fn to_xml(&self) -> Vec<u8> {
        let mut xml = String::from(XML_HEADER);
        xml.push_str(&format!("<hello xmlns=\"{}\"><capabilities>", BASE_NAMESPACE));
        for capability in &self.capabilities {
            xml.push_str(&format!("<capability>{}</capability>", escape(capability)));
        }
        xml.push_str("</capabilities>");
        if let Some(id) = self.session_id {
            xml.push_str(&format!("<session-id>{}</session-id>", id));
        }
        xml.push_str("</hello>");
        xml.into_bytes()
    }

    /// Decode from raw bytes
    pub fn from_xml(data: &[u8]) -> Result<Self> {
        let mut hello = Hello::default();

        walk(data, "hello", |path, node| {
            let Node::Text(text) = node else {
                return Ok(());
            };
            match path {
                [_, caps, cap] if caps == "capabilities" && cap == "capability" => {
                    hello.capabilities.push(text.trim().to_string());
                },
                [_, id] if id == "session-id" => {
                    let id = text.trim().parse().map_err(|e| {
                        NetconfError::Decoding(format!("Invalid session-id {:?}: {}", text, e))
                    })?;
                    hello.session_id = Some(id);
                },
                _ => {},
            }
            Ok(())
        })?;

        Ok(hello)
    }
}
