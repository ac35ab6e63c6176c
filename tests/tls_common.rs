//! Shared helpers for the integration tests.
//!
//! This file has no `#[test]` functions; Cargo compiles it as a no-op binary.
//! Import it from other test files via `mod tls_common;`.

#![allow(unused)]

use std::sync::Arc;
use std::time::Instant;

use tlshake::{generate_self_signed_certificate, generate_self_signed_rsa_certificate};
use tlshake::{AcceptAnyCertificate, Config, ConfigBuilder, Connection, Error, Identity, Output};
use tlshake::ProtocolVersion;

/// Handshake message types (RFC 5246 / 6347 / 8446).
pub const HELLO_REQUEST: u8 = 0;
pub const CLIENT_HELLO: u8 = 1;
pub const SERVER_HELLO: u8 = 2;
pub const HELLO_VERIFY_REQUEST: u8 = 3;
pub const CERTIFICATE: u8 = 11;
pub const SERVER_KEY_EXCHANGE: u8 = 12;
pub const SERVER_HELLO_DONE: u8 = 14;

pub const CONTENT_CHANGE_CIPHER_SPEC: u8 = 20;
pub const CONTENT_ALERT: u8 = 21;
pub const CONTENT_HANDSHAKE: u8 = 22;

/// The peer string every client in these tests connects to.
pub const PEER: &str = "server:443";

pub fn ecdsa_identity(name: &str) -> Identity {
    generate_self_signed_certificate(name).expect("ecdsa certificate")
}

/// A small key keeps debug builds fast.
pub fn rsa_identity(name: &str) -> Identity {
    generate_self_signed_rsa_certificate(name, 1024).expect("rsa certificate")
}

pub fn client_builder(versions: &[ProtocolVersion]) -> ConfigBuilder {
    let datagram = versions.iter().any(|v| v.is_dtls());
    Config::builder()
        .datagram(datagram)
        .protocol_versions(versions)
        .certificate_validator(Arc::new(AcceptAnyCertificate))
}

pub fn server_builder(versions: &[ProtocolVersion], identity: Identity) -> ConfigBuilder {
    let datagram = versions.iter().any(|v| v.is_dtls());
    Config::builder()
        .datagram(datagram)
        .protocol_versions(versions)
        .identity(identity)
}

/// Everything one side produced while draining its outputs.
#[derive(Debug, Default)]
pub struct Drained {
    pub packets: Vec<Vec<u8>>,
    pub connected: bool,
    pub peer_certs: Vec<Vec<u8>>,
    pub app_data: Vec<Vec<u8>>,
    pub closed: bool,
}

/// Poll until the connection reports its next timeout.
pub fn drain(conn: &mut Connection) -> Drained {
    let mut out = Drained::default();
    loop {
        match conn.poll_output() {
            Output::Packet(p) => out.packets.push(p.to_vec()),
            Output::Connected => out.connected = true,
            Output::PeerCert(c) => out.peer_certs.push(c.to_vec()),
            Output::ApplicationData(d) => out.app_data.push(d.to_vec()),
            Output::Closed => out.closed = true,
            Output::Timeout(_) => break,
        }
    }
    out
}

/// Outputs accumulated over the lifetime of one side.
#[derive(Debug, Default)]
pub struct Events {
    pub connected: usize,
    pub peer_certs: Vec<Vec<u8>>,
    pub data: Vec<u8>,
    pub closed: bool,
    pub sent: Vec<Vec<u8>>,
}

impl Events {
    fn absorb(&mut self, drained: &Drained) {
        if drained.connected {
            self.connected += 1;
        }
        self.peer_certs.extend(drained.peer_certs.iter().cloned());
        for d in &drained.app_data {
            self.data.extend_from_slice(d);
        }
        self.closed |= drained.closed;
        self.sent.extend(drained.packets.iter().cloned());
    }

    /// Take the application data received so far.
    pub fn take_data(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.data)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Client,
    Server,
}

/// A client and a server wired back to back.
pub struct Pair {
    pub client: Connection,
    pub server: Connection,
    pub now: Instant,
    pub client_events: Events,
    pub server_events: Events,
}

impl Pair {
    pub fn new(client_config: Arc<Config>, server_config: Arc<Config>) -> Pair {
        let now = Instant::now();
        Pair {
            client: Connection::new_client(client_config, Some(PEER), now).expect("client"),
            server: Connection::new_server(server_config, now).expect("server"),
            now,
            client_events: Events::default(),
            server_events: Events::default(),
        }
    }

    /// Move packets both ways until neither side has anything to send.
    ///
    /// Stops at the first error, reporting which side raised it. The side
    /// that failed keeps its alert queued, see [`Pair::deliver`].
    pub fn run(&mut self) -> Result<(), (Side, Error)> {
        for _ in 0..100 {
            self.client
                .handle_timeout(self.now)
                .map_err(|e| (Side::Client, e))?;
            self.server
                .handle_timeout(self.now)
                .map_err(|e| (Side::Server, e))?;

            let client_out = drain(&mut self.client);
            self.client_events.absorb(&client_out);
            let server_out = drain(&mut self.server);
            self.server_events.absorb(&server_out);

            if client_out.packets.is_empty() && server_out.packets.is_empty() {
                return Ok(());
            }

            for p in &client_out.packets {
                self.server.handle_packet(p).map_err(|e| (Side::Server, e))?;
            }
            for p in &server_out.packets {
                self.client.handle_packet(p).map_err(|e| (Side::Client, e))?;
            }
        }
        panic!("connections did not settle");
    }

    /// Drain `from` once and hand its packets to the other side.
    pub fn deliver(&mut self, from: Side) -> Result<(), Error> {
        let (sender, sender_events, receiver) = match from {
            Side::Client => (&mut self.client, &mut self.client_events, &mut self.server),
            Side::Server => (&mut self.server, &mut self.server_events, &mut self.client),
        };
        let out = drain(sender);
        sender_events.absorb(&out);
        for p in &out.packets {
            receiver.handle_packet(p)?;
        }
        Ok(())
    }

    /// Drain both sides into their event logs without moving packets.
    pub fn drain_events(&mut self) {
        let client_out = drain(&mut self.client);
        self.client_events.absorb(&client_out);
        let server_out = drain(&mut self.server);
        self.server_events.absorb(&server_out);
    }

    pub fn connect(&mut self) {
        self.run().expect("handshake");
        assert!(self.client.is_connected(), "client not connected");
        assert!(self.server.is_connected(), "server not connected");
    }

    /// Send data each way and check it arrives intact.
    pub fn exchange(&mut self, client_data: &[u8], server_data: &[u8]) {
        self.client.send_application_data(client_data).expect("client send");
        self.server.send_application_data(server_data).expect("server send");
        self.run().expect("exchange");
        assert_eq!(self.server_events.take_data(), client_data);
        assert_eq!(self.client_events.take_data(), server_data);
    }
}

/// Handshake type of the first message in a plaintext packet.
pub fn first_handshake_type(packet: &[u8], dtls: bool) -> Option<u8> {
    let header = if dtls { 13 } else { 5 };
    if packet.first() != Some(&CONTENT_HANDSHAKE) {
        return None;
    }
    packet.get(header).copied()
}

/// The 32 byte random of a plaintext TLS ServerHello packet.
pub fn server_hello_random(packet: &[u8]) -> &[u8] {
    assert_eq!(first_handshake_type(packet, false), Some(SERVER_HELLO));
    // record header, handshake header, legacy_version
    &packet[5 + 4 + 2..5 + 4 + 2 + 32]
}

/// Handshake type of every plaintext handshake record in a DTLS datagram.
pub fn dtls_handshake_types(datagram: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut i = 0usize;
    while i + 13 <= datagram.len() {
        let ctype = datagram[i];
        let epoch = u16::from_be_bytes([datagram[i + 3], datagram[i + 4]]);
        let len = u16::from_be_bytes([datagram[i + 11], datagram[i + 12]]) as usize;
        if ctype == CONTENT_HANDSHAKE && epoch == 0 && i + 13 < datagram.len() {
            out.push(datagram[i + 13]);
        }
        i += 13 + len;
    }
    out
}

/// Content type of every record in a TLS packet.
pub fn tls_record_types(packet: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut i = 0usize;
    while i + 5 <= packet.len() {
        out.push(packet[i]);
        let len = u16::from_be_bytes([packet[i + 3], packet[i + 4]]) as usize;
        i += 5 + len;
    }
    out
}
