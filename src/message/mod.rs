//! Handshake message bodies and extensions.
//!
//! Every message owns its data and has a nom `parse` plus a
//! `serialize(&self, &mut Buf)`. Parsers that depend on negotiated state
//! (DTLS framing, protocol version, key exchange) take it as an argument.

pub mod certificate;
pub mod certificate_request;
pub mod certificate_verify;
pub mod change_cipher_spec;
pub mod client_hello;
pub mod client_key_exchange;
pub mod digitally_signed;
pub mod encrypted_extensions;
pub mod extension;
pub mod extensions;
pub mod finished;
pub mod handshake;
pub mod hello_verify_request;
pub mod key_update;
pub mod new_session_ticket;
pub mod server_hello;
pub mod server_key_exchange;

pub use certificate::{Certificate, CertificateEntry};
pub use certificate_request::{CertificateRequest, CertificateRequest13};
pub use certificate_verify::CertificateVerify;
pub use client_hello::ClientHello;
pub use client_key_exchange::ClientKeyExchange;
pub use digitally_signed::DigitallySigned;
pub use encrypted_extensions::EncryptedExtensions;
pub use extension::{Extension, ExtensionType};
pub use finished::Finished;
pub use handshake::{HandshakeMessage, Header};
pub use hello_verify_request::HelloVerifyRequest;
pub use key_update::{KeyUpdate, KeyUpdateRequest};
pub use new_session_ticket::NewSessionTicket;
pub use server_hello::ServerHello;
pub use server_key_exchange::{ServerKeyExchange, ServerKeyParams};
