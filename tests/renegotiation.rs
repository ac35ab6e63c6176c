//! TLS 1.2 renegotiation tests.

mod tls_common;

use std::sync::Arc;

use tls_common::*;
use tlshake::{Error, ProtocolVersion};

const TLS12: &[ProtocolVersion] = &[ProtocolVersion::TLS1_2];

fn tls12_pair() -> Pair {
    let client = client_builder(TLS12).build().unwrap();
    let server = server_builder(TLS12, ecdsa_identity("server")).build().unwrap();
    Pair::new(Arc::new(client), Arc::new(server))
}

fn exporter(pair: &Pair) -> Vec<u8> {
    let c = pair.client.export_keying_material("EXPORTER-reneg", None, 32).unwrap();
    let s = pair.server.export_keying_material("EXPORTER-reneg", None, 32).unwrap();
    assert_eq!(&c[..], &s[..]);
    c.to_vec()
}

#[test]
fn renegotiation_by_client() {
    let _ = env_logger::try_init();

    let mut pair = tls12_pair();
    assert!(matches!(
        pair.client.request_renegotiation(),
        Err(Error::NotConnected)
    ));
    pair.connect();
    let before = exporter(&pair);

    pair.client.request_renegotiation().unwrap();
    assert!(pair.client.is_handshaking());
    assert!(matches!(
        pair.client.request_renegotiation(),
        Err(Error::ConfigError(_))
    ));

    pair.run().unwrap();
    assert!(!pair.client.is_handshaking());
    assert!(!pair.server.is_handshaking());
    assert!(pair.client.is_secure_renegotiation());

    // New master secret, but Connected is reported only once.
    assert_ne!(exporter(&pair), before);
    assert_eq!(pair.client_events.connected, 1);
    assert_eq!(pair.server_events.connected, 1);

    pair.exchange(b"renegotiated", b"yes");
}

#[test]
fn renegotiation_by_server() {
    let _ = env_logger::try_init();

    let mut pair = tls12_pair();
    pair.connect();
    let before = exporter(&pair);

    pair.server.request_renegotiation().unwrap();
    let out = drain(&mut pair.server);
    assert_eq!(out.packets.len(), 1);
    for p in &out.packets {
        pair.client.handle_packet(p).unwrap();
    }
    assert!(pair.client.is_handshaking());

    pair.run().unwrap();
    assert!(!pair.server.is_handshaking());
    assert_ne!(exporter(&pair), before);

    pair.exchange(b"again", b"and again");
}

#[test]
fn application_data_during_renegotiation() {
    //! The established keys keep carrying data until the new ones are installed.
    let _ = env_logger::try_init();

    let mut pair = tls12_pair();
    pair.connect();

    pair.client.request_renegotiation().unwrap();
    pair.client.send_application_data(b"interleaved").unwrap();
    pair.run().unwrap();

    assert_eq!(pair.server_events.take_data(), b"interleaved");
    assert!(!pair.server.is_handshaking());
}

#[test]
fn renegotiation_not_in_tls13() {
    let _ = env_logger::try_init();

    let client = client_builder(&[ProtocolVersion::TLS1_3]).build().unwrap();
    let server = server_builder(&[ProtocolVersion::TLS1_3], ecdsa_identity("server"))
        .build()
        .unwrap();
    let mut pair = Pair::new(Arc::new(client), Arc::new(server));
    pair.connect();

    assert!(matches!(
        pair.client.request_renegotiation(),
        Err(Error::ConfigError(_))
    ));
    assert!(matches!(
        pair.server.request_renegotiation(),
        Err(Error::ConfigError(_))
    ));

    // The refused request leaves the connection usable.
    pair.exchange(b"still", b"here");
}
