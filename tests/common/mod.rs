//! Scripted NETCONF device for end-to-end tests.
//!
//! The device speaks the server side of the protocol over an in-memory
//! duplex stream, using the crate's own framed transport.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use netconf::message::{Hello, BASE_1_0, BASE_1_1, BASE_NAMESPACE, NOTIFICATION_NAMESPACE};
use netconf::transport::{FramingVersion, StreamTransport, Transport};
use netconf::{Config, Session};
use tokio::io::{duplex, DuplexStream, ReadHalf, WriteHalf};

/// Transport over one end of an in-memory duplex stream
pub type DuplexTransport = StreamTransport<ReadHalf<DuplexStream>, WriteHalf<DuplexStream>>;

/// Session id every scripted device hands out
pub const SESSION_ID: u64 = 42;

/// Upper bound on any single wait in these tests
pub const TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Install a test log subscriber (honours `RUST_LOG`)
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Server side of a NETCONF session
pub struct Device {
    transport: DuplexTransport,
    capabilities: Vec<String>,
}

impl Device {
    /// Wrap one end of a duplex stream
    pub fn new(stream: DuplexStream, capabilities: &[&str]) -> Self {
        Self {
            transport: StreamTransport::from_stream(stream),
            capabilities: capabilities.iter().map(|c| c.to_string()).collect(),
        }
    }

    /// Send the server hello, optionally without a session-id
    pub async fn send_hello(&self, session_id: Option<u64>) {
        let mut hello = Hello::new(self.capabilities.iter().cloned());
        hello.session_id = session_id;
        self.transport.send(&hello.to_xml()).await.unwrap();
    }

    /// Read the client hello and settle framing the way the client does
    pub async fn accept_hello(&self) -> Hello {
        let raw = self.transport.receive().await.unwrap();
        let hello = Hello::from_xml(&raw).unwrap();

        let ours = Hello::new(self.capabilities.iter().cloned());
        if ours.advertises_base_1_1() {
            self.transport.set_framing(FramingVersion::V1_1);
        }
        hello
    }

    /// Current framing on the device side
    pub fn framing(&self) -> FramingVersion {
        self.transport.framing()
    }

    /// Read the next request as text
    pub async fn receive_rpc(&self) -> String {
        let raw = tokio::time::timeout(TEST_TIMEOUT, self.transport.receive())
            .await
            .expect("no rpc received")
            .unwrap();
        String::from_utf8(raw.to_vec()).unwrap()
    }

    /// Read the next request and return its message-id
    pub async fn receive_rpc_id(&self) -> String {
        message_id(&self.receive_rpc().await)
    }

    /// Send `<rpc-reply>` for `message_id` carrying `body`
    pub async fn reply(&self, message_id: &str, body: &str) {
        let xml = format!(
            r#"<rpc-reply message-id="{}" xmlns="{}">{}</rpc-reply>"#,
            message_id, BASE_NAMESPACE, body
        );
        self.send_raw(&xml).await;
    }

    /// Send `<rpc-reply><ok/></rpc-reply>` for `message_id`
    pub async fn reply_ok(&self, message_id: &str) {
        self.reply(message_id, "<ok/>").await;
    }

    /// Send an `<rpc-error>` reply for `message_id`
    pub async fn reply_error(&self, message_id: &str, tag: &str, message: &str) {
        let body = format!(
            "<rpc-error><error-type>protocol</error-type><error-tag>{}</error-tag>\
             <error-severity>error</error-severity><error-message>{}</error-message></rpc-error>",
            tag, message
        );
        self.reply(message_id, &body).await;
    }

    /// Send a notification carrying `event`
    pub async fn notify(&self, event: &str) {
        let xml = format!(
            r#"<notification xmlns="{}"><eventTime>2024-05-01T10:00:00Z</eventTime>{}</notification>"#,
            NOTIFICATION_NAMESPACE, event
        );
        self.send_raw(&xml).await;
    }

    /// Send an arbitrary message with the current framing
    pub async fn send_raw(&self, xml: &str) {
        self.transport.send(xml.as_bytes()).await.unwrap();
    }

    /// Close the device end of the connection
    pub async fn hang_up(&self) {
        self.transport.close().await.unwrap();
    }
}

/// Extract the `message-id` attribute from a raw `<rpc>`
pub fn message_id(rpc: &str) -> String {
    let start = rpc.find("message-id=\"").expect("rpc without message-id") + "message-id=\"".len();
    let end = rpc[start..].find('"').unwrap() + start;
    rpc[start..end].to_string()
}

/// Server capabilities with both framing versions
pub fn modern_capabilities() -> Vec<&'static str> {
    vec![BASE_1_0, BASE_1_1, "urn:ietf:params:netconf:capability:notification:1.0"]
}

/// Connect a client session to a scripted device and exchange hellos
pub async fn connect(server_capabilities: &[&str]) -> (Session, Arc<Device>) {
    connect_with_config(server_capabilities, Config::default()).await
}

/// [`connect`] with an explicit client configuration
pub async fn connect_with_config(server_capabilities: &[&str], config: Config) -> (Session, Arc<Device>) {
    init_tracing();
    let (client, server) = duplex(256 * 1024);
    let device = Arc::new(Device::new(server, server_capabilities));

    device.send_hello(Some(SESSION_ID)).await;
    let session = Session::with_config(StreamTransport::from_stream(client), config)
        .await
        .unwrap();
    session.send_default_hello().await.unwrap();
    device.accept_hello().await;

    (session, device)
}
