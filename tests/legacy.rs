//! SSL 3.0 to TLS 1.1 and DTLS 1.0 over the CBC suites.

mod tls_common;

use std::sync::Arc;

use tls_common::*;
use tlshake::{AcceptAnyCertificate, AlertDescription, CipherSuite, ClientAuth, ProtocolVersion};

fn connect(versions: &[ProtocolVersion]) -> Pair {
    let client = client_builder(versions).build().unwrap();
    let server = server_builder(versions, rsa_identity("server")).build().unwrap();
    let mut pair = Pair::new(Arc::new(client), Arc::new(server));
    pair.connect();
    pair
}

#[test]
fn tls10_rsa_cbc_handshake() {
    let _ = env_logger::try_init();

    let mut pair = connect(&[ProtocolVersion::TLS1_0]);

    assert_eq!(pair.client.protocol_version(), Some(ProtocolVersion::TLS1_0));
    assert_eq!(pair.client.cipher_suite(), Some(CipherSuite::RSA_AES128_CBC_SHA));
    assert_eq!(pair.client.cipher_suite(), pair.server.cipher_suite());

    pair.exchange(b"implicit", b"iv");
    // Several records in a row, each chained to the one before.
    let big = vec![0x5A; 40_000];
    pair.exchange(&big, b"ok");
}

#[test]
fn tls11_explicit_iv() {
    let _ = env_logger::try_init();

    let mut pair = connect(&[ProtocolVersion::TLS1_1]);
    assert_eq!(pair.server.protocol_version(), Some(ProtocolVersion::TLS1_1));
    pair.exchange(b"explicit", b"iv");
}

#[test]
fn ssl3_handshake() {
    let _ = env_logger::try_init();

    let mut pair = connect(&[ProtocolVersion::SSL3_0]);

    assert_eq!(pair.client.protocol_version(), Some(ProtocolVersion::SSL3_0));
    assert_eq!(pair.server.protocol_version(), Some(ProtocolVersion::SSL3_0));
    assert_eq!(pair.server.cipher_suite(), Some(CipherSuite::RSA_AES128_CBC_SHA));

    pair.exchange(b"ssl", b"three");
    let big = vec![0xA5; 20_000];
    pair.exchange(b"again", &big);
}

#[test]
fn aes256_cbc_suite() {
    let _ = env_logger::try_init();

    let versions = &[ProtocolVersion::TLS1_0];
    let client = client_builder(versions)
        .cipher_suites(&[CipherSuite::RSA_AES256_CBC_SHA])
        .build()
        .unwrap();
    let server = server_builder(versions, rsa_identity("server")).build().unwrap();
    let mut pair = Pair::new(Arc::new(client), Arc::new(server));
    pair.connect();

    assert_eq!(pair.server.cipher_suite(), Some(CipherSuite::RSA_AES256_CBC_SHA));
    pair.exchange(b"wide", b"key");
}

#[test]
fn dtls10_handshake() {
    let _ = env_logger::try_init();

    let mut pair = connect(&[ProtocolVersion::DTLS1_0]);
    assert_eq!(pair.client.protocol_version(), Some(ProtocolVersion::DTLS1_0));
    pair.exchange(b"datagram", b"cbc");
}

fn ssl3_server(auth: ClientAuth) -> Arc<tlshake::Config> {
    let versions = &[ProtocolVersion::SSL3_0];
    let server = server_builder(versions, rsa_identity("server"))
        .client_auth(auth)
        .certificate_validator(Arc::new(AcceptAnyCertificate))
        .build()
        .unwrap();
    Arc::new(server)
}

#[test]
fn ssl3_client_declines_requested_certificate() {
    let _ = env_logger::try_init();

    let client = client_builder(&[ProtocolVersion::SSL3_0]).build().unwrap();
    let mut pair = Pair::new(Arc::new(client), ssl3_server(ClientAuth::Requested));
    pair.connect();

    assert!(pair.server.peer_certificates().is_empty());

    // The final flight answers the request with a no_certificate warning.
    let declined = pair
        .client_events
        .sent
        .iter()
        .any(|p| tls_record_types(p).contains(&CONTENT_ALERT));
    assert!(declined);

    pair.exchange(b"anonymous", b"client");
}

#[test]
fn ssl3_required_certificate_missing() {
    let _ = env_logger::try_init();

    let client = client_builder(&[ProtocolVersion::SSL3_0]).build().unwrap();
    let mut pair = Pair::new(Arc::new(client), ssl3_server(ClientAuth::Required));

    let (side, err) = pair.run().unwrap_err();
    assert_eq!(side, Side::Server);
    assert_eq!(err.alert_description(), AlertDescription::HandshakeFailure);
}
