//! Client side of the handshake.
//!
//! ```text
//! TLS 1.2                              TLS 1.3
//!
//! ClientHello          -->             ClientHello          -->
//!                      <-- ServerHello                      <-- ServerHello
//!                      <-- Certificate                      <-- {EncryptedExtensions}
//!                      <-- ServerKeyExchange*               <-- {CertificateRequest*}
//!                      <-- CertificateRequest*              <-- {Certificate}
//!                      <-- ServerHelloDone                  <-- {CertificateVerify}
//! Certificate*                                              <-- {Finished}
//! ClientKeyExchange                    {Certificate*}
//! CertificateVerify*                   {CertificateVerify*}
//! [ChangeCipherSpec]                   {Finished}           -->
//! Finished             -->
//!                      <-- [ChangeCipherSpec]
//!                      <-- Finished
//! ```
//!
//! DTLS adds a HelloVerifyRequest round trip before ServerHello, TLS 1.3 a
//! possible HelloRetryRequest. An abbreviated TLS 1.2 handshake goes from
//! ServerHello straight to the server's ChangeCipherSpec and Finished.

use std::net::IpAddr;
use std::sync::Arc;

use zeroize::Zeroize;

use super::context::{check_verify_data, crypto_error, Action, Completion, Exporter};
use super::context::{HandshakeContext, Renegotiation};
use super::extensions::{self, Answer};
use super::kx::{self, Credentials, Possession};
use super::post::PostHandshakeContext;
use crate::alert::AlertDescription;
use crate::buffer::Buf;
use crate::codec;
use crate::crypto::cipher::RecordCipher;
use crate::crypto::ffdhe;
use crate::crypto::key_schedule::KeySchedule;
use crate::crypto::legacy::VERIFY_DATA_LEN;
use crate::message::certificate_verify::tls13_signed_content;
use crate::message::client_hello::{binder_prefix, COMPRESSION_NULL};
use crate::message::extensions::*;
use crate::message::server_key_exchange::signed_params;
use crate::message::{Certificate, CertificateRequest, CertificateRequest13, CertificateVerify};
use crate::message::{ClientHello, ClientKeyExchange, DigitallySigned, EncryptedExtensions};
use crate::message::{Extension, ExtensionType, Finished, HandshakeMessage, HelloVerifyRequest};
use crate::message::{ServerHello, ServerKeyExchange, ServerKeyParams};
use crate::session::Session;
use crate::types::{CipherSuite, HandshakeType, KeyExchangeAlgorithm, NamedGroup};
use crate::types::{ProtocolVersion, PskKeyExchangeMode, Random, SessionId, SignatureScheme};
use crate::{Config, Error};

const COMPAT_SESSION_ID_LEN: usize = 32;

/// SSL 3.0 Finished is MD5 || SHA-1.
const SSL3_VERIFY_DATA_LEN: usize = 36;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Start,
    AwaitServerHello,
    AwaitCertificate,
    AwaitServerKeyExchange,
    AwaitCertificateRequestOrDone,
    AwaitServerHelloDone,
    AwaitChangeCipherSpec,
    AwaitFinished,
    AwaitEncryptedExtensions,
    AwaitCertificateOrRequest13,
    AwaitCertificate13,
    AwaitCertificateVerify13,
    AwaitFinished13,
    Done,
}

/// A TLS 1.3 session offered for resumption.
struct PskOffer {
    session: Arc<Session>,
    schedule: KeySchedule,
}

/// TLS 1.3 secrets between ServerHello and the client Finished.
struct Tls13Secrets {
    schedule: KeySchedule,
    client_handshake: Buf,
    server_handshake: Buf,
}

impl Drop for Tls13Secrets {
    fn drop(&mut self) {
        self.client_handshake.zeroize();
        self.server_handshake.zeroize();
    }
}

pub(crate) struct ClientHandshake {
    pub(crate) ctx: HandshakeContext,
    state: State,
    peer: Option<String>,
    server_name: Option<String>,
    random: Random,
    session_id: SessionId,
    legacy_version: ProtocolVersion,
    resuming: Option<Arc<Session>>,
    psk: Option<PskOffer>,
    /// DTLS HelloVerifyRequest cookie.
    cookie: Option<Buf>,
    /// TLS 1.3 HelloRetryRequest cookie.
    retry_cookie: Option<Buf>,
    retried: bool,
    offered_suites: Vec<CipherSuite>,
    offered_extensions: Vec<ExtensionType>,
    key_share_group: Option<NamedGroup>,
    server_session_id: SessionId,
    server_credentials: Option<Credentials>,
    certificate_request: Option<CertificateRequest>,
    certificate_request13: Option<CertificateRequest13>,
    tls13: Option<Tls13Secrets>,
}

impl ClientHandshake {
    /// `peer` is the `host:port` the connection goes to. It selects the
    /// session to resume and the server_name to send.
    pub fn new(
        config: Arc<Config>,
        peer: Option<String>,
        now: std::time::Instant,
        previous: Option<Renegotiation>,
    ) -> Result<Self, Error> {
        let random = Random::new(config.crypto_provider().secure_random)
            .map_err(crypto_error("client random"))?;
        let server_name = peer.as_deref().and_then(host_name);
        let legacy_version = config.max_version().legacy_version();
        let ctx = HandshakeContext::new(config, now, previous);

        Ok(ClientHandshake {
            ctx,
            state: State::Start,
            peer,
            server_name,
            random,
            session_id: SessionId::empty(),
            legacy_version,
            resuming: None,
            psk: None,
            cookie: None,
            retry_cookie: None,
            retried: false,
            offered_suites: Vec::new(),
            offered_extensions: Vec::new(),
            key_share_group: None,
            server_session_id: SessionId::empty(),
            server_credentials: None,
            certificate_request: None,
            certificate_request13: None,
            tls13: None,
        })
    }

    pub fn is_done(&self) -> bool {
        self.state == State::Done
    }

    /// Send the first ClientHello.
    pub fn start(&mut self) -> Result<(), Error> {
        if self.state != State::Start {
            return Ok(());
        }
        let config = self.ctx.config.clone();
        self.ctx.client_random = Some(self.random);
        self.offered_suites = config.cipher_suites().to_vec();

        if !self.ctx.is_renegotiation() {
            self.pick_session();
        }

        if self.offers_tls13() {
            let group = config
                .named_groups()
                .first()
                .copied()
                .ok_or_else(|| Error::internal_error("no named groups"))?;
            self.generate_key_share(group)?;

            if self.session_id.is_empty() && !self.ctx.dtls {
                let mut id = [0u8; COMPAT_SESSION_ID_LEN];
                self.ctx.rng.fill(&mut id);
                self.session_id = SessionId::try_new(&id)
                    .ok_or_else(|| Error::internal_error("session id length"))?;
            }
        }

        self.send_client_hello()?;
        self.transition(State::AwaitServerHello);
        Ok(())
    }

    /// Renegotiation stays within TLS 1.2 and below.
    fn offers_tls13(&self) -> bool {
        self.ctx.config.max_version().is_tls13() && !self.ctx.is_renegotiation()
    }

    fn transition(&mut self, next: State) {
        if self.state != next {
            trace!("{:?} -> {:?}", self.state, next);
            self.state = next;
        }
    }

    /// Choose a cached session to resume with this peer.
    fn pick_session(&mut self) {
        let config = self.ctx.config.clone();
        let Some(peer) = self.peer.as_deref() else {
            return;
        };
        let Some(session) = config.session_cache().get_by_peer(peer, self.ctx.now) else {
            return;
        };
        if !config.is_version_enabled(session.version())
            || !self.offered_suites.contains(&session.cipher_suite())
        {
            return;
        }

        if session.version().is_tls13() {
            if !config
                .psk_key_exchange_modes()
                .contains(&PskKeyExchangeMode::PskDheKe)
            {
                return;
            }
            let Some(hash) = session.cipher_suite().hash_algorithm() else {
                return;
            };
            match KeySchedule::new(config.crypto_provider(), hash, Some(session.secret())) {
                Ok(schedule) => {
                    debug!("Offering session ticket for {}", peer);
                    self.psk = Some(PskOffer { session, schedule });
                }
                Err(e) => warn!("Not resuming: {}", e),
            }
        } else if let Some(id) = SessionId::try_new(session.id()) {
            debug!("Offering session id for {}", peer);
            self.session_id = id;
            self.resuming = Some(session);
        }
    }

    fn generate_key_share(&mut self, group: NamedGroup) -> Result<(), Error> {
        let possession = Possession::generate(self.ctx.provider(), group)?;
        self.ctx.possessions.clear();
        self.ctx.possessions.push(possession);
        self.key_share_group = Some(group);
        Ok(())
    }

    fn hello_extensions(&self) -> Result<Vec<Extension>, Error> {
        let config = &self.ctx.config;
        let max = config.max_version();
        let versions = config.protocol_versions();
        let offers_tls13 = self.offers_tls13();
        let offers_legacy = versions.iter().any(|v| !v.is_tls13());
        let mut exts = Vec::new();

        if max == ProtocolVersion::SSL3_0 {
            return Ok(exts);
        }

        if let Some(name) = &self.server_name {
            exts.push(ServerNameExtension::new(name.clone()).to_extension()?);
        }
        if offers_tls13 {
            let versions = SupportedVersionsClientHello {
                versions: versions.to_vec(),
            };
            exts.push(versions.to_extension()?);
        }
        exts.push(SupportedGroupsExtension::new(config.named_groups()).to_extension()?);

        let offers_ecdhe = self
            .offered_suites
            .iter()
            .any(|s| s.params().is_some_and(|p| p.key_exchange.is_ecdhe()));
        if offers_ecdhe {
            exts.push(EcPointFormatsExtension::default().to_extension()?);
        }
        if !ProtocolVersion::TLS1_2.newer_than(max) {
            exts.push(SignatureAlgorithmsExtension::new(config.signature_schemes()).to_extension()?);
        }
        if offers_legacy && config.extended_master_secret() {
            exts.push(Extension::empty(ExtensionType::ExtendedMasterSecret));
        }
        if let Some(previous) = &self.ctx.previous {
            exts.push(RenegotiationInfoExtension::new(&previous.client_verify_data).to_extension()?);
        }

        if offers_tls13 {
            if let Some(group) = self.key_share_group {
                let public = self
                    .ctx
                    .possessions
                    .iter()
                    .find(|p| p.group() == Some(group))
                    .and_then(|p| p.public())
                    .ok_or_else(|| Error::internal_error("key share missing"))?;
                let shares = KeyShareClientHello {
                    entries: vec![KeyShareEntry::new(group, public)],
                };
                exts.push(shares.to_extension()?);
            }
            let modes = PskKeyExchangeModesExtension {
                modes: config.psk_key_exchange_modes().to_vec(),
            };
            exts.push(modes.to_extension()?);
            if let Some(cookie) = &self.retry_cookie {
                exts.push(CookieExtension { cookie: cookie.clone() }.to_extension()?);
            }
        }
        Ok(exts)
    }

    fn send_client_hello(&mut self) -> Result<(), Error> {
        let mut suites = self.offered_suites.clone();
        let scsv = !self.ctx.is_renegotiation()
            && self.ctx.config.protocol_versions().iter().any(|v| !v.is_tls13());
        if scsv {
            suites.push(CipherSuite::EMPTY_RENEGOTIATION_INFO_SCSV);
        }

        let extensions = self.hello_extensions()?;
        self.offered_extensions = extensions.iter().map(|e| e.extension_type).collect();
        if scsv {
            self.offered_extensions.push(ExtensionType::RenegotiationInfo);
        }

        let mut hello = ClientHello {
            legacy_version: self.legacy_version,
            random: self.random,
            session_id: self.session_id.clone(),
            cookie: self
                .ctx
                .dtls
                .then(|| self.cookie.clone().unwrap_or_default()),
            cipher_suites: suites,
            compression_methods: vec![COMPRESSION_NULL],
            extensions,
        };

        if self.psk.is_some() {
            self.add_psk_offer(&mut hello)?;
        }

        let mut body = Buf::new();
        hello.serialize(&mut body)?;
        debug!(
            "ClientHello {} with {} suites",
            self.legacy_version,
            hello.cipher_suites.len()
        );
        self.ctx.send_handshake(HandshakeType::ClientHello, body)
    }

    /// Append pre_shared_key with its binder, computed over the hello
    /// truncated before the binders.
    fn add_psk_offer(&mut self, hello: &mut ClientHello) -> Result<(), Error> {
        let Some(psk) = &self.psk else {
            return Ok(());
        };
        let kdf = psk.schedule.kdf();
        let hash = kdf.hash();
        let identity = PskIdentity {
            identity: Buf::from_slice(psk.session.id()),
            obfuscated_ticket_age: psk.session.obfuscated_age(self.ctx.now),
        };
        let mut offer = OfferedPsks {
            identities: vec![identity],
            binders: vec![Buf::from(vec![0; hash.output_len()])],
        };
        hello.extensions.push(offer.to_extension()?);
        self.offered_extensions.push(ExtensionType::PreSharedKey);

        let mut body = Buf::new();
        hello.serialize(&mut body)?;
        let encoded = HandshakeMessage::new(HandshakeType::ClientHello, body).encode(self.ctx.dtls)?;
        let prefix = binder_prefix(&encoded, &offer)
            .ok_or_else(|| Error::internal_error("binder prefix"))?;
        let transcript_hash = self.ctx.transcript.digest_with(hash, prefix)?;

        let binder_key = psk
            .schedule
            .binder_key(true)
            .map_err(crypto_error("binder key"))?;
        let binder = kdf
            .verify_data(&binder_key, &transcript_hash)
            .map_err(crypto_error("binder"))?;

        offer.binders = vec![binder];
        hello.extensions.pop();
        hello.extensions.push(offer.to_extension()?);
        Ok(())
    }

    pub fn handle(&mut self, message: &HandshakeMessage) -> Result<(), Error> {
        let next = match (self.state, message.msg_type) {
            (State::AwaitServerHello, HandshakeType::HelloVerifyRequest) if self.ctx.dtls => {
                self.handle_hello_verify_request(&message.body)?
            }
            (State::AwaitServerHello, HandshakeType::ServerHello) => {
                self.handle_server_hello(&message.body)?
            }
            (State::AwaitCertificate, HandshakeType::Certificate) => {
                self.handle_certificate(&message.body)?
            }
            (State::AwaitServerKeyExchange, HandshakeType::ServerKeyExchange) => {
                self.handle_server_key_exchange(&message.body)?
            }
            (State::AwaitCertificateRequestOrDone, HandshakeType::CertificateRequest) => {
                self.handle_certificate_request(&message.body)?
            }
            (
                State::AwaitCertificateRequestOrDone | State::AwaitServerHelloDone,
                HandshakeType::ServerHelloDone,
            ) => {
                message.expect_empty()?;
                self.send_final_flight()?
            }
            (State::AwaitFinished, HandshakeType::Finished) => {
                self.handle_finished(&message.body)?
            }
            (State::AwaitEncryptedExtensions, HandshakeType::EncryptedExtensions) => {
                self.handle_encrypted_extensions(&message.body)?
            }
            (State::AwaitCertificateOrRequest13, HandshakeType::CertificateRequest) => {
                self.handle_certificate_request13(&message.body)?
            }
            (
                State::AwaitCertificateOrRequest13 | State::AwaitCertificate13,
                HandshakeType::Certificate,
            ) => self.handle_certificate13(&message.body)?,
            (State::AwaitCertificateVerify13, HandshakeType::CertificateVerify) => {
                self.handle_certificate_verify13(&message.body)?
            }
            (State::AwaitFinished13, HandshakeType::Finished) => {
                self.handle_finished13(&message.body)?
            }
            (state, msg_type) => {
                return Err(Error::unexpected_message(format!(
                    "{:?} in client state {:?}",
                    msg_type, state
                )))
            }
        };
        self.transition(next);
        Ok(())
    }

    pub fn handle_change_cipher_spec(&mut self) -> Result<(), Error> {
        if self.state != State::AwaitChangeCipherSpec {
            return Err(Error::unexpected_message(format!(
                "ChangeCipherSpec in client state {:?}",
                self.state
            )));
        }
        self.ctx.change_read_cipher()?;
        self.transition(State::AwaitFinished);
        Ok(())
    }

    fn handle_hello_verify_request(&mut self, body: &[u8]) -> Result<State, Error> {
        let hvr = codec::parse_all(body, HelloVerifyRequest::parse)?;
        debug!("HelloVerifyRequest with {} byte cookie", hvr.cookie.len());

        // ClientHello1 and HelloVerifyRequest stay out of the transcript.
        self.ctx.transcript.reset();
        self.cookie = Some(hvr.cookie);
        self.send_client_hello()?;
        Ok(State::AwaitServerHello)
    }

    fn handle_server_hello(&mut self, body: &[u8]) -> Result<State, Error> {
        let hello = codec::parse_all(body, ServerHello::parse)?;
        if hello.is_hello_retry_request() {
            return self.handle_hello_retry_request(hello);
        }
        let config = self.ctx.config.clone();
        let answer = Answer::from_extensions(
            extensions::SERVER_HELLO,
            &hello.extensions,
            &self.offered_extensions,
        )?;

        let version = match answer.supported_version {
            Some(v) => {
                if !v.is_tls13() || !config.is_version_enabled(v) {
                    return Err(Error::illegal_parameter(format!(
                        "server selected {} through supported_versions",
                        v
                    )));
                }
                v
            }
            None => {
                let v = hello.legacy_version;
                if v.is_tls13() || !config.is_version_enabled(v) {
                    return Err(Error::fatal(
                        AlertDescription::ProtocolVersion,
                        format!("server selected {}", v),
                    ));
                }
                v
            }
        };

        if hello.random.is_version_downgrade(config.max_version(), version) {
            return Err(Error::illegal_parameter("downgrade sentinel in ServerHello.random"));
        }

        let suite = hello.cipher_suite;
        let suite_ok = self.offered_suites.contains(&suite) && suite.supports_version(version);
        if !suite_ok || (self.retried && self.ctx.suite != Some(suite)) {
            return Err(Error::illegal_parameter(format!("server selected {:?}", suite)));
        }
        if hello.compression_method != COMPRESSION_NULL {
            return Err(Error::illegal_parameter("server selected compression"));
        }
        let params = suite
            .params()
            .ok_or_else(|| Error::illegal_parameter("suite without parameters"))?;
        kx::check_supported(params.key_exchange, version)?;

        debug!("Negotiated {} with {:?}", version, suite);
        self.ctx.version = Some(version);
        self.ctx.suite = Some(suite);
        self.ctx.server_random = Some(hello.random);

        if version.is_tls13() {
            self.handle_server_hello13(hello, answer)
        } else {
            self.handle_server_hello12(hello, answer)
        }
    }

    fn handle_hello_retry_request(&mut self, hello: ServerHello) -> Result<State, Error> {
        if self.retried {
            return Err(Error::unexpected_message("second HelloRetryRequest"));
        }
        self.retried = true;

        // A retry cookie needs no offer.
        let mut solicited = self.offered_extensions.clone();
        solicited.push(ExtensionType::Cookie);
        let answer = Answer::from_extensions(
            extensions::HELLO_RETRY_REQUEST,
            &hello.extensions,
            &solicited,
        )?;
        if answer.supported_version != Some(ProtocolVersion::TLS1_3) {
            return Err(Error::illegal_parameter("HelloRetryRequest must select TLS 1.3"));
        }
        let suite = hello.cipher_suite;
        if !suite.is_tls13() || !self.offered_suites.contains(&suite) {
            return Err(Error::illegal_parameter(format!(
                "HelloRetryRequest selected {:?}",
                suite
            )));
        }
        if hello.session_id != self.session_id {
            return Err(Error::illegal_parameter("HelloRetryRequest session id mismatch"));
        }

        match answer.retry_group {
            Some(group) => {
                let supported = self.ctx.config.named_groups().contains(&group);
                if !supported || Some(group) == self.key_share_group {
                    return Err(Error::illegal_parameter(format!(
                        "HelloRetryRequest asked for {:?}",
                        group
                    )));
                }
                self.generate_key_share(group)?;
            }
            None if answer.cookie.is_none() => {
                return Err(Error::illegal_parameter("HelloRetryRequest changes nothing"));
            }
            None => {}
        }
        debug!("HelloRetryRequest for {:?} ({:?})", suite, answer.retry_group);

        let hash = suite
            .hash_algorithm()
            .ok_or_else(|| Error::internal_error("suite without hash"))?;
        if let Some(psk) = &self.psk {
            if psk.schedule.kdf().hash() != hash {
                debug!("Dropping PSK offer with a different hash");
                self.psk = None;
            }
        }

        // Tentative until the ServerHello, but enough for the compatibility
        // ChangeCipherSpec that follows a retry.
        self.ctx.version = Some(ProtocolVersion::TLS1_3);
        self.ctx.suite = Some(suite);
        self.ctx.transcript.replace_with_message_hash(hash)?;
        self.ctx.transcript.utilize();
        self.retry_cookie = answer.cookie;
        self.send_client_hello()?;
        Ok(State::AwaitServerHello)
    }

    fn handle_server_hello12(&mut self, hello: ServerHello, answer: Answer) -> Result<State, Error> {
        if answer.key_share.is_some() || answer.selected_psk.is_some() {
            return Err(Error::illegal_parameter("TLS 1.3 extension in TLS 1.2 ServerHello"));
        }
        self.check_renegotiation_info(answer.renegotiation_info.as_deref())?;
        self.ctx.extended_master_secret = answer.extended_master_secret;

        if let Some(formats) = &answer.ec_point_formats {
            if !formats.contains(&ec_point_formats::UNCOMPRESSED) {
                return Err(Error::illegal_parameter("server lacks uncompressed points"));
            }
        }

        let resumed = match self.resuming.take() {
            Some(session) if !hello.session_id.is_empty() && hello.session_id == self.session_id => {
                Some(session)
            }
            _ => None,
        };
        self.server_session_id = hello.session_id;

        let Some(session) = resumed else {
            return Ok(State::AwaitCertificate);
        };

        if Some(session.version()) != self.ctx.version
            || Some(session.cipher_suite()) != self.ctx.suite
        {
            return Err(Error::illegal_parameter("resumed session parameters changed"));
        }
        if session.extended_master_secret() != self.ctx.extended_master_secret {
            return Err(Error::handshake_failure(
                "extended_master_secret differs from the resumed session",
            ));
        }
        debug!("Resuming session");

        self.ctx.resumed = true;
        self.ctx.master_secret = Some(Buf::from_slice(session.secret()));
        self.ctx.peer_chain = session.peer_chain().to_vec();
        self.resuming = Some(session);
        self.ctx.transcript.utilize();
        self.ctx.derive_legacy_ciphers(true)?;
        Ok(State::AwaitChangeCipherSpec)
    }

    /// RFC 5746 checks of the server's renegotiation_info.
    fn check_renegotiation_info(&mut self, info: Option<&[u8]>) -> Result<(), Error> {
        let config = &self.ctx.config;
        let secure = match &self.ctx.previous {
            None => match info {
                Some(info) if !info.is_empty() => {
                    return Err(Error::handshake_failure("non-empty initial renegotiation_info"))
                }
                Some(_) => true,
                None if !config.allow_legacy_hello_messages() => {
                    return Err(Error::handshake_failure("server lacks secure renegotiation"))
                }
                None => false,
            },
            Some(previous) if previous.secure => {
                let expected = self.ctx.renegotiation_binding(true);
                match info {
                    Some(info) if info == &expected[..] => true,
                    _ => return Err(Error::handshake_failure("renegotiation_info mismatch")),
                }
            }
            Some(_) => {
                if info.is_some() {
                    return Err(Error::handshake_failure(
                        "renegotiation_info on an insecure connection",
                    ));
                }
                false
            }
        };
        self.ctx.secure_renegotiation = secure;
        Ok(())
    }

    fn handle_server_hello13(&mut self, hello: ServerHello, answer: Answer) -> Result<State, Error> {
        if hello.session_id != self.session_id {
            return Err(Error::illegal_parameter("ServerHello session id mismatch"));
        }
        if answer.extended_master_secret
            || answer.renegotiation_info.is_some()
            || answer.ec_point_formats.is_some()
        {
            return Err(Error::illegal_parameter("TLS 1.2 extension in TLS 1.3 ServerHello"));
        }
        let share = answer
            .key_share
            .ok_or_else(|| Error::fatal(AlertDescription::MissingExtension, "no key_share"))?;
        if Some(share.group) != self.key_share_group {
            return Err(Error::illegal_parameter(format!(
                "key share for {:?} not offered",
                share.group
            )));
        }

        let params = self.ctx.params()?;
        let psk = self.psk.take();
        let schedule = match (answer.selected_psk, psk) {
            (Some(0), Some(psk)) => {
                if psk.session.cipher_suite().hash_algorithm() != Some(params.hash) {
                    return Err(Error::illegal_parameter("PSK hash differs from suite hash"));
                }
                debug!("Server accepted PSK");
                self.ctx.resumed = true;
                self.ctx.peer_chain = psk.session.peer_chain().to_vec();
                self.resuming = Some(psk.session.clone());
                psk.schedule
            }
            (Some(i), _) => {
                return Err(Error::illegal_parameter(format!("server selected PSK {}", i)));
            }
            (None, _) => KeySchedule::new(self.ctx.provider(), params.hash, None)
                .map_err(crypto_error("key schedule"))?,
        };
        self.finish_server_hello13(schedule, share)
    }

    fn finish_server_hello13(
        &mut self,
        mut schedule: KeySchedule,
        share: KeyShareEntry,
    ) -> Result<State, Error> {
        let params = self.ctx.params()?;
        let possession = kx::take_possession(&mut self.ctx.possessions, share.group)
            .ok_or_else(|| Error::internal_error("key share possession missing"))?;
        let credentials = Credentials::key_share(share.group, &share.key_exchange)?;
        let mut shared = kx::shared_secret(possession, &credentials, ProtocolVersion::TLS1_3)?;
        let res = schedule.input_shared_secret(&shared);
        shared.zeroize();
        res.map_err(crypto_error("handshake secret"))?;

        self.ctx.transcript.utilize();
        let transcript_hash = self.ctx.transcript.hash(params.hash)?;
        let (client_handshake, server_handshake) = schedule
            .handshake_traffic_secrets(&transcript_hash)
            .map_err(crypto_error("handshake traffic secrets"))?;

        let read = RecordCipher::tls13(
            self.ctx.provider(),
            schedule.kdf(),
            params.bulk,
            server_handshake.clone(),
            None,
        )?;
        self.ctx.install_read(read);

        // Everything the client sends from here on, alerts included, is
        // protected under its handshake key.
        if !self.session_id.is_empty() && !self.ctx.dtls {
            self.ctx.send_change_cipher_spec();
        }
        let write = RecordCipher::tls13(
            self.ctx.provider(),
            schedule.kdf(),
            params.bulk,
            client_handshake.clone(),
            None,
        )?;
        self.ctx.install_write(write);

        self.tls13 = Some(Tls13Secrets {
            schedule,
            client_handshake,
            server_handshake,
        });
        Ok(State::AwaitEncryptedExtensions)
    }

    fn handle_certificate(&mut self, body: &[u8]) -> Result<State, Error> {
        let certificate = codec::parse_all(body, |i| Certificate::parse(i, false))?;
        let params = self.ctx.params()?;
        self.ctx
            .accept_peer_chain(certificate.chain(), params.key_exchange.server_key())?;

        if params.key_exchange.has_server_key_exchange() {
            Ok(State::AwaitServerKeyExchange)
        } else {
            Ok(State::AwaitCertificateRequestOrDone)
        }
    }

    fn handle_server_key_exchange(&mut self, body: &[u8]) -> Result<State, Error> {
        if !self.ctx.with_schemes()? {
            return Err(Error::handshake_failure(
                "signed key exchange before TLS 1.2 is not supported",
            ));
        }
        let params = self.ctx.params()?;
        let ske = codec::parse_all(body, |i| {
            ServerKeyExchange::parse(i, params.key_exchange, true)
        })?;

        let scheme = ske
            .signed
            .scheme
            .ok_or_else(|| Error::illegal_parameter("ServerKeyExchange without scheme"))?;
        if !self.ctx.config.signature_schemes().contains(&scheme)
            || scheme.algorithm() != params.key_exchange.server_key()
        {
            return Err(Error::illegal_parameter(format!(
                "ServerKeyExchange signed with {:?}",
                scheme
            )));
        }
        let (client_random, server_random) = self.ctx.randoms()?;
        let signed = signed_params(&client_random.bytes, &server_random.bytes, &ske.params)?;
        self.ctx
            .verify_peer_signature(scheme, &signed, &ske.signed.signature)?;

        let credentials = match &ske.params {
            ServerKeyParams::Ecdh { group, public } => {
                if !group.is_ec() || !self.ctx.config.named_groups().contains(group) {
                    return Err(Error::illegal_parameter(format!("server chose {:?}", group)));
                }
                Credentials::key_share(*group, public)?
            }
            ServerKeyParams::Dh { p, g, public } => {
                let group = ffdhe::group_for_params(p, g)
                    .filter(|group| self.ctx.config.named_groups().contains(group))
                    .ok_or_else(|| Error::illegal_parameter("unsupported DH parameters"))?;
                Credentials::key_share(group, public)?
            }
        };
        debug!("Server key exchange over {:?}", credentials.group());
        self.server_credentials = Some(credentials);
        Ok(State::AwaitCertificateRequestOrDone)
    }

    fn handle_certificate_request(&mut self, body: &[u8]) -> Result<State, Error> {
        let with_schemes = self.ctx.with_schemes()?;
        let request = codec::parse_all(body, |i| CertificateRequest::parse(i, with_schemes))?;
        debug!("Server requests a client certificate");
        self.certificate_request = Some(request);
        Ok(State::AwaitServerHelloDone)
    }

    /// Scheme for our CertificateVerify, `None` to answer without a certificate.
    fn client_auth_scheme(&self, request: &CertificateRequest) -> Option<SignatureScheme> {
        if !self.ctx.with_schemes().ok()? {
            return None;
        }
        self.ctx.config.identity()?;
        self.ctx.select_scheme(&request.schemes, false)
    }

    /// Certificate*, ClientKeyExchange, CertificateVerify*, ChangeCipherSpec, Finished.
    fn send_final_flight(&mut self) -> Result<State, Error> {
        let version = self.ctx.version()?;
        let params = self.ctx.params()?;
        let config = self.ctx.config.clone();

        let mut verify_scheme = None;
        if let Some(request) = self.certificate_request.take() {
            verify_scheme = self.client_auth_scheme(&request);
            match (verify_scheme, config.identity()) {
                (Some(_), Some(identity)) => {
                    self.send_certificate(&identity.chain, None)?;
                }
                _ if version == ProtocolVersion::SSL3_0 => {
                    self.ctx.transcript.utilize();
                    self.ctx.send_warning(AlertDescription::NoCertificate);
                }
                _ => self.send_certificate(&[], None)?,
            }
        }

        let pre_master_secret = self.send_client_key_exchange(params.key_exchange)?;
        self.ctx.derive_master_secret(pre_master_secret)?;

        if let Some(scheme) = verify_scheme {
            let signature = self.ctx.sign(scheme, self.ctx.transcript.raw())?;
            let verify = CertificateVerify::new(DigitallySigned::new(Some(scheme), signature));
            let mut body = Buf::new();
            verify.serialize(&mut body)?;
            self.ctx
                .send_handshake(HandshakeType::CertificateVerify, body)?;
        }

        self.ctx.derive_legacy_ciphers(true)?;
        self.ctx.change_write_cipher()?;
        self.send_finished()?;
        Ok(State::AwaitChangeCipherSpec)
    }

    fn send_certificate(&mut self, chain: &[Vec<u8>], context: Option<Buf>) -> Result<(), Error> {
        let mut body = Buf::new();
        Certificate::new(chain, context).serialize(&mut body)?;
        self.ctx.send_handshake(HandshakeType::Certificate, body)
    }

    fn send_client_key_exchange(&mut self, kx: KeyExchangeAlgorithm) -> Result<Buf, Error> {
        let version = self.ctx.version()?;
        let (message, pre_master_secret) = match kx {
            KeyExchangeAlgorithm::Rsa => {
                let provider = self.ctx.provider();
                let spki = self
                    .ctx
                    .peer_spki
                    .as_ref()
                    .ok_or_else(|| Error::internal_error("no server key"))?;
                let pms = kx::new_premaster(provider.secure_random, self.legacy_version)?;
                let encrypted = kx::encrypt_premaster(provider, spki, &pms)?;
                let message = ClientKeyExchange::Rsa {
                    encrypted_pre_master_secret: encrypted,
                };
                (message, pms)
            }
            KeyExchangeAlgorithm::DheRsa
            | KeyExchangeAlgorithm::EcdheEcdsa
            | KeyExchangeAlgorithm::EcdheRsa => {
                let credentials = self
                    .server_credentials
                    .take()
                    .ok_or_else(|| Error::unexpected_message("no ServerKeyExchange"))?;
                let group = credentials
                    .group()
                    .ok_or_else(|| Error::internal_error("credentials without group"))?;
                let possession = Possession::generate(self.ctx.provider(), group)?;
                let public = Buf::from_slice(
                    possession
                        .public()
                        .ok_or_else(|| Error::internal_error("no public value"))?,
                );
                let pms = kx::shared_secret(possession, &credentials, version)?;
                let message = if kx == KeyExchangeAlgorithm::DheRsa {
                    ClientKeyExchange::Dh { public }
                } else {
                    ClientKeyExchange::Ecdh { public }
                };
                (message, pms)
            }
            KeyExchangeAlgorithm::Tls13 => {
                return Err(Error::internal_error("TLS 1.3 suite in TLS 1.2 flow"))
            }
        };

        let mut body = Buf::new();
        message.serialize(version, &mut body)?;
        self.ctx
            .send_handshake(HandshakeType::ClientKeyExchange, body)?;
        Ok(pre_master_secret)
    }

    fn send_finished(&mut self) -> Result<(), Error> {
        let verify_data = self.ctx.legacy_verify_data(true)?;
        let mut body = Buf::new();
        Finished::new(&verify_data).serialize(&mut body);
        self.ctx.client_verify_data = verify_data;
        self.ctx.send_handshake(HandshakeType::Finished, body)
    }

    fn handle_finished(&mut self, body: &[u8]) -> Result<State, Error> {
        let version = self.ctx.version()?;
        let len = if version == ProtocolVersion::SSL3_0 {
            SSL3_VERIFY_DATA_LEN
        } else {
            VERIFY_DATA_LEN
        };
        let finished = codec::parse_all(body, |i| Finished::parse(i, len))?;
        let expected = self.ctx.legacy_verify_data(false)?;
        check_verify_data(&expected, &finished.verify_data)?;
        self.ctx.server_verify_data = finished.verify_data;
        self.ctx.transcript.utilize();

        if self.ctx.resumed {
            self.ctx.change_write_cipher()?;
            self.send_finished()?;
        }

        let session = if self.ctx.resumed {
            self.resuming.take()
        } else {
            self.store_session()?
        };
        let completion = Completion {
            version,
            suite: self.ctx.suite()?,
            resumed: self.ctx.resumed,
            renegotiation: self.ctx.renegotiation(),
            exporter: self.ctx.legacy_exporter()?,
            peer_chain: std::mem::take(&mut self.ctx.peer_chain),
            session,
            post: None,
        };
        self.complete(completion);
        Ok(State::Done)
    }

    fn store_session(&mut self) -> Result<Option<Arc<Session>>, Error> {
        if self.server_session_id.is_empty() {
            return Ok(None);
        }
        let cache = self.ctx.config.session_cache().clone();
        let master_secret = self
            .ctx
            .master_secret
            .clone()
            .ok_or_else(|| Error::internal_error("master secret missing"))?;
        let session = Session::new(
            Buf::from_slice(self.server_session_id.as_slice()),
            self.ctx.version()?,
            self.ctx.suite()?,
            master_secret,
            self.ctx.extended_master_secret,
            self.ctx.peer_chain.clone(),
            self.ctx.now,
            cache.timeout(),
            0,
        );
        Ok(Some(cache.insert(session, self.peer.as_deref())))
    }

    fn complete(&mut self, completion: Completion) {
        debug!(
            "Handshake complete: {} {:?}{}",
            completion.version,
            completion.suite,
            if completion.resumed { " (resumed)" } else { "" }
        );
        self.ctx.transcript.finish();
        self.ctx
            .actions
            .push(Action::Complete(Box::new(completion)));
    }

    fn handle_encrypted_extensions(&mut self, body: &[u8]) -> Result<State, Error> {
        let ee = codec::parse_all(body, EncryptedExtensions::parse)?;
        extensions::check_encrypted_extensions(&ee.extensions)?;
        let answer = Answer::from_extensions(
            extensions::ENCRYPTED_EXTENSIONS,
            &ee.extensions,
            &self.offered_extensions,
        )?;
        if answer.server_name_ack {
            trace!("Server acknowledged server_name");
        }
        if self.ctx.resumed {
            Ok(State::AwaitFinished13)
        } else {
            Ok(State::AwaitCertificateOrRequest13)
        }
    }

    fn handle_certificate_request13(&mut self, body: &[u8]) -> Result<State, Error> {
        let request = codec::parse_all(body, CertificateRequest13::parse)?;
        if request.get::<SignatureAlgorithmsExtension>()?.is_none() {
            return Err(Error::fatal(
                AlertDescription::MissingExtension,
                "CertificateRequest without signature_algorithms",
            ));
        }
        debug!("Server requests a client certificate");
        self.certificate_request13 = Some(request);
        Ok(State::AwaitCertificate13)
    }

    fn handle_certificate13(&mut self, body: &[u8]) -> Result<State, Error> {
        let certificate = codec::parse_all(body, |i| Certificate::parse(i, true))?;
        if certificate.context.as_ref().is_some_and(|c| !c.is_empty()) {
            return Err(Error::illegal_parameter("server certificate with request context"));
        }
        if certificate.is_empty() {
            return Err(Error::decode_error("empty server certificate"));
        }
        self.ctx.accept_peer_chain(certificate.chain(), None)?;
        Ok(State::AwaitCertificateVerify13)
    }

    fn handle_certificate_verify13(&mut self, body: &[u8]) -> Result<State, Error> {
        let verify = codec::parse_all(body, |i| CertificateVerify::parse(i, true))?;
        let scheme = verify
            .signed
            .scheme
            .filter(|s| s.usable_in_tls13() && self.ctx.config.signature_schemes().contains(s))
            .ok_or_else(|| Error::illegal_parameter("CertificateVerify scheme"))?;

        let params = self.ctx.params()?;
        let transcript_hash = self.ctx.transcript.hash(params.hash)?;
        let content = tls13_signed_content(true, &transcript_hash);
        self.ctx
            .verify_peer_signature(scheme, &content, &verify.signed.signature)?;
        Ok(State::AwaitFinished13)
    }

    fn handle_finished13(&mut self, body: &[u8]) -> Result<State, Error> {
        let params = self.ctx.params()?;
        let mut secrets = self
            .tls13
            .take()
            .ok_or_else(|| Error::internal_error("TLS 1.3 secrets missing"))?;
        let kdf = secrets.schedule.kdf();
        let config = self.ctx.config.clone();
        let provider = config.crypto_provider();

        let finished = codec::parse_all(body, |i| Finished::parse(i, params.hash.output_len()))?;
        let transcript_hash = self.ctx.transcript.hash(params.hash)?;
        let expected = kdf
            .verify_data(&secrets.server_handshake, &transcript_hash)
            .map_err(crypto_error("server finished"))?;
        check_verify_data(&expected, &finished.verify_data)?;
        self.ctx.transcript.utilize();

        // Application secrets are bound to the transcript through server Finished.
        let transcript_hash = self.ctx.transcript.hash(params.hash)?;
        secrets
            .schedule
            .input_empty()
            .map_err(crypto_error("master secret"))?;
        let (client_app, server_app) = secrets
            .schedule
            .application_traffic_secrets(&transcript_hash)
            .map_err(crypto_error("application traffic secrets"))?;
        let exporter_master_secret = secrets
            .schedule
            .exporter_master_secret(&transcript_hash)
            .map_err(crypto_error("exporter master secret"))?;

        if let Some(request) = self.certificate_request13.take() {
            self.send_client_certificate13(request)?;
        }

        let transcript_hash = self.ctx.transcript.hash(params.hash)?;
        let verify_data = kdf
            .verify_data(&secrets.client_handshake, &transcript_hash)
            .map_err(crypto_error("client finished"))?;
        let mut body = Buf::new();
        Finished::new(&verify_data).serialize(&mut body);
        self.ctx.send_handshake(HandshakeType::Finished, body)?;

        let key_limit = Some(config.key_limit());
        let write = RecordCipher::tls13(provider, kdf, params.bulk, client_app, key_limit)?;
        let read = RecordCipher::tls13(provider, kdf, params.bulk, server_app, None)?;
        self.ctx.install_write(write);
        self.ctx.install_read(read);

        let transcript_hash = self.ctx.transcript.hash(params.hash)?;
        let resumption_master_secret = secrets
            .schedule
            .resumption_master_secret(&transcript_hash)
            .map_err(crypto_error("resumption master secret"))?;

        let suite = self.ctx.suite()?;
        let peer_chain = std::mem::take(&mut self.ctx.peer_chain);
        let post = PostHandshakeContext::new(
            config.clone(),
            true,
            suite,
            kdf,
            resumption_master_secret,
            self.peer.clone(),
            peer_chain.clone(),
        );
        let completion = Completion {
            version: ProtocolVersion::TLS1_3,
            suite,
            resumed: self.ctx.resumed,
            renegotiation: Renegotiation::default(),
            exporter: Exporter::Tls13 {
                kdf,
                exporter_master_secret,
            },
            peer_chain,
            session: self.resuming.take(),
            post: Some(post),
        };
        self.complete(completion);
        Ok(State::Done)
    }

    fn send_client_certificate13(&mut self, request: CertificateRequest13) -> Result<(), Error> {
        let schemes = request
            .get::<SignatureAlgorithmsExtension>()?
            .map(|s| s.schemes)
            .unwrap_or_default();
        let config = self.ctx.config.clone();
        let scheme = self.ctx.select_scheme(&schemes, true);

        let (Some(scheme), Some(identity)) = (scheme, config.identity()) else {
            debug!("No client certificate for the server's request");
            return self.send_certificate(&[], Some(request.context));
        };
        self.send_certificate(&identity.chain, Some(request.context))?;

        let params = self.ctx.params()?;
        let transcript_hash = self.ctx.transcript.hash(params.hash)?;
        let content = tls13_signed_content(false, &transcript_hash);
        let signature = self.ctx.sign(scheme, &content)?;
        let mut body = Buf::new();
        CertificateVerify::new(DigitallySigned::new(Some(scheme), signature)).serialize(&mut body)?;
        self.ctx.send_handshake(HandshakeType::CertificateVerify, body)
    }
}

/// DNS name of a `host:port` peer, `None` for IP literals.
fn host_name(peer: &str) -> Option<String> {
    let host = match peer.rsplit_once(':') {
        Some((host, port)) if port.parse::<u16>().is_ok() => host,
        _ => peer,
    };
    let host = host.trim_start_matches('[').trim_end_matches(']');
    if host.is_empty() || host.parse::<IpAddr>().is_ok() {
        None
    } else {
        Some(host.to_string())
    }
}
