//! tlshake
//!
//! A sans-IO TLS and DTLS handshake engine. It speaks SSL 3.0 through
//! TLS 1.3 over byte streams and DTLS 1.0/1.2 over datagrams, without
//! owning a socket: the application moves bytes between the transport and
//! a [`Connection`] and reacts to what [`Connection::poll_output`] returns.
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Instant;
//!
//! use tlshake::{AcceptAnyCertificate, Config, Connection, Output};
//!
//! let config = Config::builder()
//!     .certificate_validator(Arc::new(AcceptAnyCertificate))
//!     .build()
//!     .unwrap();
//! let mut client = Connection::new_client(Arc::new(config), Some("example.com:443"), Instant::now()).unwrap();
//! client.handle_timeout(Instant::now()).unwrap();
//!
//! loop {
//!     match client.poll_output() {
//!         Output::Packet(p) => { /* write p to the transport */ }
//!         Output::Connected => {}
//!         Output::PeerCert(_) => {}
//!         Output::ApplicationData(_) => {}
//!         Output::Closed => break,
//!         Output::Timeout(_) => break,
//!     }
//! }
//! ```
//!
//! Cryptography comes from a [`CryptoProvider`]. The default one is built on
//! the RustCrypto crates.

#![forbid(unsafe_code)]
#![warn(clippy::all)]
// #![deny(missing_docs)]

#[macro_use]
extern crate log;

mod buffer;
mod codec;
mod error;

pub mod alert;
pub mod certificate;
pub mod crypto;
pub mod types;

mod config;
mod connection;
mod handshake;
mod message;
mod record;
mod rng;
mod session;

pub use alert::{Alert, AlertDescription, AlertLevel};
pub use buffer::Buf;
pub use certificate::{generate_self_signed_certificate, generate_self_signed_rsa_certificate};
pub use certificate::{AcceptAnyCertificate, CertificateError, CertificateValidator, Identity};
pub use certificate::PinnedFingerprints;
pub use codec::CodecError;
pub use config::{ClientAuth, Config, ConfigBuilder, MAX_TICKET_LIFETIME};
pub use connection::{Connection, Output};
pub use crypto::CryptoProvider;
pub use error::Error;
pub use session::{Session, SessionCache};
pub use types::{CipherSuite, NamedGroup, ProtocolVersion, PskKeyExchangeMode, SignatureScheme};
