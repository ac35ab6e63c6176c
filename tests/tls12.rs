//! TLS 1.2 handshake tests between two tlshake connections.

mod tls_common;

use std::sync::Arc;

use tls_common::*;
use tlshake::{AcceptAnyCertificate, AlertDescription, CipherSuite, ClientAuth, ProtocolVersion};

const TLS12: &[ProtocolVersion] = &[ProtocolVersion::TLS1_2];

#[test]
fn tls12_ecdhe_ecdsa_handshake() {
    let _ = env_logger::try_init();

    let client = Arc::new(client_builder(TLS12).build().unwrap());
    let server = Arc::new(server_builder(TLS12, ecdsa_identity("server")).build().unwrap());

    let mut pair = Pair::new(client, server);
    pair.connect();

    assert_eq!(pair.client.protocol_version(), Some(ProtocolVersion::TLS1_2));
    assert_eq!(
        pair.client.cipher_suite(),
        Some(CipherSuite::ECDHE_ECDSA_AES128_GCM_SHA256)
    );
    assert_eq!(pair.client.cipher_suite(), pair.server.cipher_suite());
    assert!(!pair.client.is_resumed());
    assert!(pair.client.is_secure_renegotiation());

    // Connected fires once per side, and the client saw the server chain.
    assert_eq!(pair.client_events.connected, 1);
    assert_eq!(pair.server_events.connected, 1);
    assert_eq!(pair.client_events.peer_certs.len(), 1);
    assert_eq!(pair.client.peer_certificates().len(), 1);
    assert!(pair.server.peer_certificates().is_empty());

    let first = &pair.client_events.sent[0];
    assert_eq!(first_handshake_type(first, false), Some(CLIENT_HELLO));

    pair.exchange(b"hello", b"world");
}

#[test]
fn tls12_rsa_suites() {
    //! Each RSA-authenticated key exchange completes and carries data.
    let _ = env_logger::try_init();

    let identity = rsa_identity("server");

    for suite in [
        CipherSuite::ECDHE_RSA_AES128_GCM_SHA256,
        CipherSuite::DHE_RSA_AES128_GCM_SHA256,
        CipherSuite::RSA_AES128_GCM_SHA256,
    ] {
        let client = client_builder(TLS12).cipher_suites(&[suite]).build().unwrap();
        let server = server_builder(TLS12, identity.clone()).build().unwrap();

        let mut pair = Pair::new(Arc::new(client), Arc::new(server));
        pair.connect();

        assert_eq!(pair.client.cipher_suite(), Some(suite), "{:?}", suite);
        assert_eq!(pair.server.cipher_suite(), Some(suite), "{:?}", suite);
        pair.exchange(b"ping", b"pong");
    }
}

#[test]
fn tls12_session_resumption() {
    //! A second connection with the same configs resumes the cached session.
    let _ = env_logger::try_init();

    let client = Arc::new(client_builder(TLS12).build().unwrap());
    let server = Arc::new(server_builder(TLS12, ecdsa_identity("server")).build().unwrap());

    let mut first = Pair::new(client.clone(), server.clone());
    first.connect();
    assert!(!first.client.is_resumed());
    let session_id = first.client.session().expect("client session").id().to_vec();
    assert!(!session_id.is_empty());

    let mut second = Pair::new(client, server);
    second.connect();
    assert!(second.client.is_resumed());
    assert!(second.server.is_resumed());
    assert_eq!(second.client.session().unwrap().id(), &session_id[..]);

    // An abbreviated handshake sends no Certificate.
    assert!(second.client_events.peer_certs.is_empty());

    second.exchange(b"again", b"welcome back");
}

#[test]
fn tls12_client_authentication() {
    let _ = env_logger::try_init();

    let client = client_builder(TLS12)
        .identity(ecdsa_identity("client"))
        .build()
        .unwrap();
    let server = server_builder(TLS12, ecdsa_identity("server"))
        .client_auth(ClientAuth::Required)
        .certificate_validator(Arc::new(AcceptAnyCertificate))
        .build()
        .unwrap();

    let mut pair = Pair::new(Arc::new(client), Arc::new(server));
    pair.connect();

    assert_eq!(pair.server.peer_certificates().len(), 1);
    assert_eq!(pair.server_events.peer_certs.len(), 1);
    pair.exchange(b"me", b"you");
}

#[test]
fn tls12_required_client_certificate_missing() {
    let _ = env_logger::try_init();

    let client = client_builder(TLS12).build().unwrap();
    let server = server_builder(TLS12, ecdsa_identity("server"))
        .client_auth(ClientAuth::Required)
        .certificate_validator(Arc::new(AcceptAnyCertificate))
        .build()
        .unwrap();

    let mut pair = Pair::new(Arc::new(client), Arc::new(server));
    let (side, err) = pair.run().unwrap_err();
    assert_eq!(side, Side::Server);
    assert_eq!(err.alert_description(), AlertDescription::HandshakeFailure);

    // The alert reaches the client.
    let err = pair.deliver(Side::Server).unwrap_err();
    assert!(matches!(
        err,
        tlshake::Error::PeerAlert {
            description: AlertDescription::HandshakeFailure
        }
    ));
    assert!(!pair.client.is_connected());
}

#[test]
fn tls12_exporter_agrees() {
    let _ = env_logger::try_init();

    let client = Arc::new(client_builder(TLS12).build().unwrap());
    let server = Arc::new(server_builder(TLS12, ecdsa_identity("server")).build().unwrap());

    let mut pair = Pair::new(client, server);
    assert!(matches!(
        pair.client.export_keying_material("EXPORTER-test", None, 32),
        Err(tlshake::Error::NotConnected)
    ));
    pair.connect();

    let c = pair.client.export_keying_material("EXPORTER-test", None, 32).unwrap();
    let s = pair.server.export_keying_material("EXPORTER-test", None, 32).unwrap();
    assert_eq!(c.len(), 32);
    assert_eq!(&c[..], &s[..]);

    let with_context = pair
        .client
        .export_keying_material("EXPORTER-test", Some(b"ctx"), 32)
        .unwrap();
    assert_ne!(&with_context[..], &c[..]);
}
