//! TLS 1.3 handshake and post-handshake tests.

mod tls_common;

use std::sync::Arc;

use tls_common::*;
use tlshake::types::HELLO_RETRY_REQUEST_RANDOM;
use tlshake::{AcceptAnyCertificate, AlertDescription, ClientAuth, Error, NamedGroup};
use tlshake::ProtocolVersion;

const TLS13: &[ProtocolVersion] = &[ProtocolVersion::TLS1_3];

fn configs() -> (Arc<tlshake::Config>, Arc<tlshake::Config>) {
    let client = client_builder(TLS13).build().unwrap();
    let server = server_builder(TLS13, ecdsa_identity("server")).build().unwrap();
    (Arc::new(client), Arc::new(server))
}

#[test]
fn tls13_handshake() {
    let _ = env_logger::try_init();

    let (client, server) = configs();
    let mut pair = Pair::new(client, server);
    pair.connect();

    assert_eq!(pair.client.protocol_version(), Some(ProtocolVersion::TLS1_3));
    assert_eq!(pair.server.protocol_version(), Some(ProtocolVersion::TLS1_3));
    assert!(pair.client.cipher_suite().unwrap().is_tls13());
    assert!(!pair.client.is_resumed());
    assert_eq!(pair.client_events.connected, 1);
    assert_eq!(pair.client.peer_certificates().len(), 1);

    // One round trip: the server's first packet carries a real ServerHello.
    let random = server_hello_random(&pair.server_events.sent[0]);
    assert_ne!(random, &HELLO_RETRY_REQUEST_RANDOM[..]);

    pair.exchange(b"hello", b"world");
}

#[test]
fn tls13_negotiated_by_default() {
    //! Default configs on both ends settle on the newest version.
    let _ = env_logger::try_init();

    let client = tlshake::Config::builder()
        .certificate_validator(Arc::new(AcceptAnyCertificate))
        .build()
        .unwrap();
    let server = tlshake::Config::builder()
        .identity(ecdsa_identity("server"))
        .build()
        .unwrap();
    let mut pair = Pair::new(Arc::new(client), Arc::new(server));
    pair.connect();
    assert_eq!(pair.client.protocol_version(), Some(ProtocolVersion::TLS1_3));
}

#[test]
fn tls13_hello_retry_request() {
    //! The client's first key share is X25519, the server only does P-256.
    let _ = env_logger::try_init();

    let client = client_builder(TLS13).build().unwrap();
    let server = server_builder(TLS13, ecdsa_identity("server"))
        .named_groups(&[NamedGroup::Secp256r1])
        .build()
        .unwrap();

    let mut pair = Pair::new(Arc::new(client), Arc::new(server));
    pair.connect();

    let retry = &pair.server_events.sent[0];
    assert_eq!(server_hello_random(retry), &HELLO_RETRY_REQUEST_RANDOM[..]);
    // The compatibility ChangeCipherSpec rides along with the retry.
    assert_eq!(
        tls_record_types(retry),
        vec![CONTENT_HANDSHAKE, CONTENT_CHANGE_CIPHER_SPEC]
    );

    let hellos = pair
        .client_events
        .sent
        .iter()
        .filter(|p| first_handshake_type(p, false) == Some(CLIENT_HELLO))
        .count();
    assert_eq!(hellos, 2);

    pair.exchange(b"retry", b"ok");
}

#[test]
fn tls13_psk_resumption() {
    //! The ticket from the first connection resumes the second.
    let _ = env_logger::try_init();

    let (client, server) = configs();

    let mut first = Pair::new(client.clone(), server.clone());
    first.connect();
    assert!(!first.client.is_resumed());
    assert!(!client.session_cache().is_empty());

    let mut second = Pair::new(client, server);
    second.connect();
    assert!(second.client.is_resumed());
    assert!(second.server.is_resumed());
    assert_eq!(second.client.protocol_version(), Some(ProtocolVersion::TLS1_3));

    // No Certificate flows in a PSK handshake.
    assert!(second.client_events.peer_certs.is_empty());

    second.exchange(b"resumed", b"indeed");
}

#[test]
fn tls13_key_update() {
    let _ = env_logger::try_init();

    let (client, server) = configs();
    let mut pair = Pair::new(client, server);
    pair.connect();

    let exporter = pair.client.export_keying_material("EXPORTER-ku", None, 16).unwrap();

    pair.client.request_key_update(true).unwrap();
    let sent_before = pair.server_events.sent.len();
    pair.run().unwrap();

    // The server answered with its own KeyUpdate.
    assert!(pair.server_events.sent.len() > sent_before);

    pair.exchange(b"after", b"update");
    pair.server.request_key_update(false).unwrap();
    pair.exchange(b"and", b"again");

    // Exporters hang off the handshake secrets, not the traffic keys.
    let after = pair.client.export_keying_material("EXPORTER-ku", None, 16).unwrap();
    assert_eq!(&exporter[..], &after[..]);
}

#[test]
fn tls13_key_limit_triggers_update() {
    let _ = env_logger::try_init();

    let client = client_builder(TLS13).key_limit(64).build().unwrap();
    let server = server_builder(TLS13, ecdsa_identity("server")).build().unwrap();

    let mut pair = Pair::new(Arc::new(client), Arc::new(server));
    pair.connect();

    pair.client.send_application_data(&[7; 100]).unwrap();
    let out = drain(&mut pair.client);
    // The data record, then the KeyUpdate.
    assert_eq!(out.packets.len(), 2);
    for p in &out.packets {
        pair.server.handle_packet(p).unwrap();
    }
    // Hands the server's KeyUpdate back to the client.
    pair.deliver(Side::Server).unwrap();
    assert_eq!(pair.server_events.take_data(), vec![7; 100]);

    pair.run().unwrap();
    pair.exchange(b"still", b"flowing");
}

#[test]
fn tls13_key_update_needs_tls13() {
    let _ = env_logger::try_init();

    let client = client_builder(&[ProtocolVersion::TLS1_2]).build().unwrap();
    let server = server_builder(&[ProtocolVersion::TLS1_2], ecdsa_identity("server"))
        .build()
        .unwrap();
    let mut pair = Pair::new(Arc::new(client), Arc::new(server));
    assert!(matches!(
        pair.client.request_key_update(false),
        Err(Error::NotConnected)
    ));
    pair.connect();
    assert!(matches!(
        pair.client.request_key_update(false),
        Err(Error::ConfigError(_))
    ));
}

#[test]
fn tls13_client_authentication() {
    let _ = env_logger::try_init();

    let client = client_builder(TLS13)
        .identity(ecdsa_identity("client"))
        .build()
        .unwrap();
    let server = server_builder(TLS13, ecdsa_identity("server"))
        .client_auth(ClientAuth::Required)
        .certificate_validator(Arc::new(AcceptAnyCertificate))
        .build()
        .unwrap();

    let mut pair = Pair::new(Arc::new(client), Arc::new(server));
    pair.connect();
    assert_eq!(pair.server.peer_certificates().len(), 1);
    pair.exchange(b"mutual", b"auth");
}

#[test]
fn tls13_required_client_certificate_missing() {
    let _ = env_logger::try_init();

    let client = client_builder(TLS13).build().unwrap();
    let server = server_builder(TLS13, ecdsa_identity("server"))
        .client_auth(ClientAuth::Required)
        .certificate_validator(Arc::new(AcceptAnyCertificate))
        .build()
        .unwrap();

    let mut pair = Pair::new(Arc::new(client), Arc::new(server));
    let (side, err) = pair.run().unwrap_err();
    assert_eq!(side, Side::Server);
    assert_eq!(err.alert_description(), AlertDescription::CertificateRequired);
}

#[test]
fn tls13_exporter_agrees() {
    let _ = env_logger::try_init();

    let (client, server) = configs();
    let mut pair = Pair::new(client, server);
    pair.connect();

    let c = pair.client.export_keying_material("EXPORTER-test", Some(b"x"), 48).unwrap();
    let s = pair.server.export_keying_material("EXPORTER-test", Some(b"x"), 48).unwrap();
    assert_eq!(c.len(), 48);
    assert_eq!(&c[..], &s[..]);
}
