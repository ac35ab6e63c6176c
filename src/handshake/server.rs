//! Server side of the handshake.
//!
//! The server answers one ClientHello with a whole flight: ServerHello up to
//! ServerHelloDone in TLS 1.2, ServerHello up to Finished in TLS 1.3. DTLS
//! servers first answer with a stateless HelloVerifyRequest until the client
//! echoes a valid cookie.

use std::sync::Arc;
use std::time::Duration;

use zeroize::Zeroize;

use super::context::{check_verify_data, crypto_error, Action, Completion, Exporter};
use super::context::{HandshakeContext, Renegotiation};
use super::extensions::Offer;
use super::kx::{self, Credentials, Possession};
use super::post::PostHandshakeContext;
use crate::alert::AlertDescription;
use crate::buffer::Buf;
use crate::codec;
use crate::config::ClientAuth;
use crate::crypto::cipher::RecordCipher;
use crate::crypto::ffdhe;
use crate::crypto::key_schedule::KeySchedule;
use crate::crypto::legacy::VERIFY_DATA_LEN;
use crate::message::certificate_request::{ECDSA_SIGN, RSA_SIGN};
use crate::message::certificate_verify::tls13_signed_content;
use crate::message::client_hello::{binder_prefix, COMPRESSION_NULL};
use crate::message::extensions::*;
use crate::message::server_key_exchange::signed_params;
use crate::message::{Certificate, CertificateRequest, CertificateRequest13, CertificateVerify};
use crate::message::{ClientHello, ClientKeyExchange, DigitallySigned, EncryptedExtensions};
use crate::message::{Extension, ExtensionType, Finished, HandshakeMessage, HelloVerifyRequest};
use crate::message::{ServerHello, ServerKeyExchange, ServerKeyParams};
use crate::session::Session;
use crate::types::{CipherSuite, GroupKind, HandshakeType, KeyExchangeAlgorithm, NamedGroup};
use crate::types::{ProtocolVersion, PskKeyExchangeMode, Random, SessionId, SignatureScheme};
use crate::{Config, Error};

const SESSION_ID_LEN: usize = 32;

const SSL3_VERIFY_DATA_LEN: usize = 36;

/// Schemes assumed when a TLS 1.2 client sends no signature_algorithms
/// (RFC 5246 Section 7.4.1.4.1).
const DEFAULT_SCHEMES: &[SignatureScheme] =
    &[SignatureScheme::RSA_PKCS1_SHA1, SignatureScheme::ECDSA_SHA1];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    AwaitClientHello,
    AwaitCertificate,
    AwaitClientKeyExchange,
    AwaitCertificateVerify,
    AwaitChangeCipherSpec,
    AwaitFinished,
    AwaitCertificate13,
    AwaitCertificateVerify13,
    AwaitFinished13,
    Done,
}

/// The suite chosen for a TLS 1.2 (or older) handshake and what it needs.
struct Selection {
    suite: CipherSuite,
    group: Option<NamedGroup>,
    scheme: Option<SignatureScheme>,
}

/// TLS 1.3 secrets kept between the server flight and the client Finished.
struct Tls13Secrets {
    schedule: KeySchedule,
    client_handshake: Buf,
    client_application: Buf,
    exporter_master_secret: Buf,
}

impl Drop for Tls13Secrets {
    fn drop(&mut self) {
        self.client_handshake.zeroize();
        self.client_application.zeroize();
        self.exporter_master_secret.zeroize();
    }
}

pub(crate) struct ServerHandshake {
    pub(crate) ctx: HandshakeContext,
    state: State,
    /// Suite and group asked for by our HelloRetryRequest.
    retry: Option<(CipherSuite, NamedGroup)>,
    compat_ccs_sent: bool,
    /// ClientHello.legacy_version, bound into the RSA pre-master secret.
    client_version: ProtocolVersion,
    session_id: SessionId,
    resuming: Option<Arc<Session>>,
    client_auth_requested: bool,
    tls13: Option<Tls13Secrets>,
}

impl ServerHandshake {
    pub fn new(
        config: Arc<Config>,
        now: std::time::Instant,
        previous: Option<Renegotiation>,
    ) -> Self {
        ServerHandshake {
            ctx: HandshakeContext::new(config, now, previous),
            state: State::AwaitClientHello,
            retry: None,
            compat_ccs_sent: false,
            client_version: ProtocolVersion::TLS1_2,
            session_id: SessionId::empty(),
            resuming: None,
            client_auth_requested: false,
            tls13: None,
        }
    }

    pub fn is_done(&self) -> bool {
        self.state == State::Done
    }

    /// A HelloRequest went out and the client has not answered yet.
    pub fn awaiting_renegotiation_hello(&self) -> bool {
        self.state == State::AwaitClientHello && self.ctx.is_renegotiation()
    }

    /// Ask the client to renegotiate.
    pub fn send_hello_request(&mut self) -> Result<(), Error> {
        self.ctx.send_untracked(HandshakeType::HelloRequest, Buf::new())
    }

    fn transition(&mut self, next: State) {
        if self.state != next {
            trace!("{:?} -> {:?}", self.state, next);
            self.state = next;
        }
    }

    pub fn handle(&mut self, message: &HandshakeMessage) -> Result<(), Error> {
        let next = match (self.state, message.msg_type) {
            (State::AwaitClientHello, HandshakeType::ClientHello) => {
                self.handle_client_hello(message)?
            }
            (State::AwaitCertificate, HandshakeType::Certificate) => {
                self.handle_certificate(&message.body)?
            }
            (State::AwaitClientKeyExchange, HandshakeType::ClientKeyExchange) => {
                self.handle_client_key_exchange(&message.body)?
            }
            (State::AwaitCertificateVerify, HandshakeType::CertificateVerify) => {
                self.handle_certificate_verify(&message.body)?
            }
            (State::AwaitFinished, HandshakeType::Finished) => {
                self.handle_finished(&message.body)?
            }
            (State::AwaitCertificate13, HandshakeType::Certificate) => {
                self.handle_certificate13(&message.body)?
            }
            (State::AwaitCertificateVerify13, HandshakeType::CertificateVerify) => {
                self.handle_certificate_verify13(&message.body)?
            }
            (State::AwaitFinished13, HandshakeType::Finished) => {
                self.handle_finished13(&message.body)?
            }
            (state, msg_type) => {
                return Err(Error::unexpected_message(format!(
                    "{:?} in server state {:?}",
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
                "ChangeCipherSpec in server state {:?}",
                self.state
            )));
        }
        self.ctx.change_read_cipher()?;
        self.transition(State::AwaitFinished);
        Ok(())
    }

    /// A warning alert arrived mid-handshake.
    ///
    /// The only one tolerated is an SSL 3.0 client declining a requested
    /// (not required) certificate with no_certificate.
    pub fn handle_warning(&mut self, description: AlertDescription) -> Result<(), Error> {
        let tolerated = description == AlertDescription::NoCertificate
            && self.state == State::AwaitCertificate
            && self.ctx.version == Some(ProtocolVersion::SSL3_0)
            && self.ctx.config.client_auth() == ClientAuth::Requested;
        if !tolerated {
            return Err(Error::handshake_failure(format!(
                "{} warning during the handshake",
                description.name()
            )));
        }
        debug!("Client declined to authenticate (no_certificate)");
        self.transition(State::AwaitClientKeyExchange);
        Ok(())
    }

    fn handle_client_hello(&mut self, message: &HandshakeMessage) -> Result<State, Error> {
        let dtls = self.ctx.dtls;
        let hello = codec::parse_all(&message.body, |i| ClientHello::parse(i, dtls))?;
        if dtls {
            self.ctx.set_send_seq(message.message_seq);
            if !self.check_dtls_cookie(&hello)? {
                return Ok(State::AwaitClientHello);
            }
        }

        let offer = Offer::from_extensions(&hello.extensions)?;
        let version = self.select_version(&hello, &offer)?;

        let config = self.ctx.config.clone();
        if hello.offers_suite(CipherSuite::FALLBACK_SCSV) && config.max_version().newer_than(version) {
            return Err(Error::fatal(
                AlertDescription::InappropriateFallback,
                format!("fallback to {} with {} enabled", version, config.max_version()),
            ));
        }

        let null_only = hello.compression_methods == [COMPRESSION_NULL];
        if !hello.compression_methods.contains(&COMPRESSION_NULL)
            || (version.is_tls13() && !null_only)
        {
            return Err(Error::illegal_parameter("null compression not offered"));
        }

        self.ctx.client_random = Some(hello.random);
        self.client_version = hello.legacy_version;
        debug!("ClientHello selects {}", version);

        if version.is_tls13() {
            self.handle_client_hello13(message, &hello, &offer)
        } else {
            self.check_renegotiation_info(&hello, &offer)?;
            self.handle_client_hello12(&hello, &offer, version)
        }
    }

    /// DTLS: whether the hello carries a valid cookie. Otherwise answer with
    /// a HelloVerifyRequest and keep no state.
    fn check_dtls_cookie(&mut self, hello: &ClientHello) -> Result<bool, Error> {
        if !self.ctx.config.hello_cookies() {
            return Ok(true);
        }
        let cookies = self.ctx.config.cookie_manager();
        let fields = hello.cookie_input()?;
        let cookie = hello.cookie.as_deref().unwrap_or(&[]);
        if cookies.is_dtls_cookie_valid(&fields, cookie) {
            return Ok(true);
        }

        debug!("Sending HelloVerifyRequest");
        let cookie = cookies.create_dtls_cookie(self.ctx.now, &fields)?;
        let mut body = Buf::new();
        HelloVerifyRequest::new(cookie).serialize(&mut body)?;
        self.ctx.transcript.discard_pending();
        self.ctx
            .send_untracked(HandshakeType::HelloVerifyRequest, body)?;
        self.ctx.actions.push(Action::ResetMessageSeq);
        Ok(false)
    }

    fn select_version(&self, hello: &ClientHello, offer: &Offer) -> Result<ProtocolVersion, Error> {
        let config = &self.ctx.config;
        let listed = offer
            .supported_versions
            .as_ref()
            .filter(|_| !self.ctx.dtls && !self.ctx.is_renegotiation());

        let selected = match listed {
            Some(versions) => config
                .protocol_versions()
                .iter()
                .copied()
                .find(|v| versions.contains(v)),
            None => config
                .protocol_versions()
                .iter()
                .copied()
                .find(|v| !v.is_tls13() && !v.newer_than(hello.legacy_version)),
        };

        selected.ok_or_else(|| {
            Error::fatal(
                AlertDescription::ProtocolVersion,
                format!("no common version with a {} client", hello.legacy_version),
            )
        })
    }

    /// RFC 5746 checks of SCSV and renegotiation_info.
    fn check_renegotiation_info(&mut self, hello: &ClientHello, offer: &Offer) -> Result<(), Error> {
        let scsv = hello.offers_suite(CipherSuite::EMPTY_RENEGOTIATION_INFO_SCSV);
        let info = offer.renegotiation_info.as_deref();

        let secure = match &self.ctx.previous {
            None => match info {
                Some(info) if !info.is_empty() => {
                    return Err(Error::handshake_failure("non-empty initial renegotiation_info"))
                }
                Some(_) => true,
                None if scsv => true,
                None if !self.ctx.config.allow_legacy_hello_messages() => {
                    return Err(Error::handshake_failure("client lacks secure renegotiation"))
                }
                None => false,
            },
            Some(previous) if previous.secure => {
                if scsv {
                    return Err(Error::handshake_failure("SCSV in a renegotiation"));
                }
                match info {
                    Some(info) if info == &previous.client_verify_data[..] => true,
                    _ => return Err(Error::handshake_failure("renegotiation_info mismatch")),
                }
            }
            Some(_) => {
                if scsv || info.is_some() {
                    return Err(Error::handshake_failure(
                        "secure renegotiation signalled on an insecure connection",
                    ));
                }
                false
            }
        };
        self.ctx.secure_renegotiation = secure;
        Ok(())
    }

    // ========================================================================
    // TLS 1.2 and older
    // ========================================================================

    /// Pick the first suite in server preference that the client offers and
    /// that our key, groups and provider can carry out.
    fn select_suite(
        &self,
        hello: &ClientHello,
        offer: &Offer,
        version: ProtocolVersion,
    ) -> Result<Selection, Error> {
        let config = &self.ctx.config;
        let provider = config.crypto_provider();
        let key = config
            .signing_key()
            .ok_or_else(|| Error::internal_error("no server key"))?;
        let with_schemes = !ProtocolVersion::TLS1_2.newer_than(version);
        let peer_schemes = offer.signature_schemes.as_deref().unwrap_or(DEFAULT_SCHEMES);
        let client_groups = offer.supported_groups.as_deref();

        for suite in config.cipher_suites() {
            if !hello.offers_suite(*suite)
                || !suite.supports_version(version)
                || !provider.supports_suite(*suite)
            {
                continue;
            }
            let Some(params) = suite.params() else {
                continue;
            };
            if params.key_exchange.server_key() != Some(key.algorithm()) {
                continue;
            }
            if !params.key_exchange.has_server_key_exchange() {
                return Ok(Selection {
                    suite: *suite,
                    group: None,
                    scheme: None,
                });
            }

            // Signed key exchange needs signature_algorithms semantics.
            if !with_schemes {
                continue;
            }
            let Some(scheme) = self.ctx.select_scheme(peer_schemes, false) else {
                continue;
            };
            let group = if params.key_exchange.is_ecdhe() {
                config.named_groups().iter().copied().find(|g| {
                    g.is_ec()
                        && client_groups.map_or(*g == NamedGroup::Secp256r1, |c| c.contains(g))
                        && provider.find_kx_group(*g).is_some()
                })
            } else {
                let client_ffdhe: Vec<NamedGroup> = client_groups
                    .unwrap_or(&[])
                    .iter()
                    .copied()
                    .filter(|g| g.kind() == Some(GroupKind::Ffdhe))
                    .collect();
                config.named_groups().iter().copied().find(|g| {
                    g.kind() == Some(GroupKind::Ffdhe)
                        && (client_ffdhe.is_empty() || client_ffdhe.contains(g))
                        && ffdhe::prime(*g).is_some()
                        && provider.find_kx_group(*g).is_some()
                })
            };
            if let Some(group) = group {
                return Ok(Selection {
                    suite: *suite,
                    group: Some(group),
                    scheme: Some(scheme),
                });
            }
        }
        Err(Error::handshake_failure("no cipher suite in common"))
    }

    /// A cached session the client asked to resume, if it still fits.
    fn find_session(
        &self,
        hello: &ClientHello,
        version: ProtocolVersion,
        extended_master_secret: bool,
    ) -> Option<Arc<Session>> {
        if hello.session_id.is_empty() {
            return None;
        }
        let config = &self.ctx.config;
        let session = config
            .session_cache()
            .get(hello.session_id.as_slice(), self.ctx.now)?;
        let suite = session.cipher_suite();
        let usable = session.version() == version
            && hello.offers_suite(suite)
            && config.cipher_suites().contains(&suite)
            && session.extended_master_secret() == extended_master_secret;
        usable.then_some(session)
    }

    fn handle_client_hello12(
        &mut self,
        hello: &ClientHello,
        offer: &Offer,
        version: ProtocolVersion,
    ) -> Result<State, Error> {
        let config = self.ctx.config.clone();
        if version != ProtocolVersion::TLS1_2
            && version != ProtocolVersion::DTLS1_2
            && config.client_auth() == ClientAuth::Required
        {
            return Err(Error::handshake_failure(format!(
                "client authentication is not supported in {}",
                version
            )));
        }

        self.ctx.version = Some(version);
        self.ctx.extended_master_secret =
            offer.extended_master_secret && config.extended_master_secret();
        let server_random = Random::server(config.crypto_provider().secure_random, config.max_version(), version)
            .map_err(crypto_error("server random"))?;
        self.ctx.server_random = Some(server_random);

        let resumed = self.find_session(hello, version, self.ctx.extended_master_secret);
        let selection = match &resumed {
            Some(session) => Selection {
                suite: session.cipher_suite(),
                group: None,
                scheme: None,
            },
            None => self.select_suite(hello, offer, version)?,
        };
        self.ctx.suite = Some(selection.suite);
        debug!(
            "Negotiated {} with {:?}{}",
            version,
            selection.suite,
            if resumed.is_some() { " (resuming)" } else { "" }
        );

        self.session_id = match &resumed {
            Some(_) => hello.session_id.clone(),
            None => {
                let mut id = [0u8; SESSION_ID_LEN];
                self.ctx.rng.fill(&mut id);
                SessionId::try_new(&id).ok_or_else(|| Error::internal_error("session id length"))?
            }
        };

        let params = self.ctx.params()?;
        let mut extensions = Vec::new();
        if self.ctx.secure_renegotiation {
            let binding = self.ctx.renegotiation_binding(true);
            extensions.push(RenegotiationInfoExtension::new(&binding).to_extension()?);
        }
        if self.ctx.extended_master_secret {
            extensions.push(Extension::empty(ExtensionType::ExtendedMasterSecret));
        }
        if params.key_exchange.is_ecdhe() && offer.ec_point_formats.is_some() {
            extensions.push(EcPointFormatsExtension::default().to_extension()?);
        }

        let server_hello = ServerHello {
            legacy_version: version,
            random: server_random,
            session_id: self.session_id.clone(),
            cipher_suite: selection.suite,
            compression_method: COMPRESSION_NULL,
            extensions,
        };
        let mut body = Buf::new();
        server_hello.serialize(&mut body)?;
        self.ctx.send_handshake(HandshakeType::ServerHello, body)?;

        if let Some(session) = resumed {
            self.ctx.resumed = true;
            self.ctx.master_secret = Some(Buf::from_slice(session.secret()));
            self.ctx.peer_chain = session.peer_chain().to_vec();
            self.resuming = Some(session);
            self.ctx.derive_legacy_ciphers(false)?;
            self.ctx.change_write_cipher()?;
            self.send_finished()?;
            return Ok(State::AwaitChangeCipherSpec);
        }

        let identity = config
            .identity()
            .ok_or_else(|| Error::internal_error("no server identity"))?;
        let mut body = Buf::new();
        Certificate::new(&identity.chain, None).serialize(&mut body)?;
        self.ctx.send_handshake(HandshakeType::Certificate, body)?;

        if let (Some(group), Some(scheme)) = (selection.group, selection.scheme) {
            self.send_server_key_exchange(params.key_exchange, group, scheme)?;
        }

        let with_schemes = self.ctx.with_schemes()?;
        if config.client_auth() != ClientAuth::None {
            let request = CertificateRequest {
                certificate_types: vec![RSA_SIGN, ECDSA_SIGN],
                schemes: config.signature_schemes().to_vec(),
                authorities: Vec::new(),
            };
            let mut body = Buf::new();
            request.serialize(with_schemes, &mut body)?;
            self.ctx
                .send_handshake(HandshakeType::CertificateRequest, body)?;
            self.client_auth_requested = true;
        }

        self.ctx
            .send_handshake(HandshakeType::ServerHelloDone, Buf::new())?;

        if self.client_auth_requested {
            Ok(State::AwaitCertificate)
        } else {
            Ok(State::AwaitClientKeyExchange)
        }
    }

    fn send_server_key_exchange(
        &mut self,
        kx: KeyExchangeAlgorithm,
        group: NamedGroup,
        scheme: SignatureScheme,
    ) -> Result<(), Error> {
        let possession = Possession::generate(self.ctx.provider(), group)?;
        let public = Buf::from_slice(
            possession
                .public()
                .ok_or_else(|| Error::internal_error("no public value"))?,
        );
        self.ctx.possessions.push(possession);

        let params = if kx == KeyExchangeAlgorithm::DheRsa {
            let p = ffdhe::prime(group)
                .ok_or_else(|| Error::internal_error("no prime for group"))?
                .to_bytes_be();
            ServerKeyParams::Dh {
                p: Buf::from(p),
                g: Buf::from_slice(&[ffdhe::GENERATOR]),
                public,
            }
        } else {
            ServerKeyParams::Ecdh { group, public }
        };

        let (client_random, server_random) = self.ctx.randoms()?;
        let signed = signed_params(&client_random.bytes, &server_random.bytes, &params)?;
        let signature = self.ctx.sign(scheme, &signed)?;
        let ske = ServerKeyExchange {
            params,
            signed: DigitallySigned::new(Some(scheme), signature),
        };
        let mut body = Buf::new();
        ske.serialize(&mut body)?;
        debug!("ServerKeyExchange over {:?} signed with {:?}", group, scheme);
        self.ctx
            .send_handshake(HandshakeType::ServerKeyExchange, body)
    }

    fn handle_certificate(&mut self, body: &[u8]) -> Result<State, Error> {
        let certificate = codec::parse_all(body, |i| Certificate::parse(i, false))?;
        if certificate.is_empty() {
            if self.ctx.config.client_auth() == ClientAuth::Required {
                return Err(Error::handshake_failure("client sent no certificate"));
            }
            debug!("Client sent an empty certificate");
            return Ok(State::AwaitClientKeyExchange);
        }
        if !self.ctx.with_schemes()? {
            return Err(Error::handshake_failure(format!(
                "client authentication is not supported in {}",
                self.ctx.version()?
            )));
        }
        self.ctx.accept_peer_chain(certificate.chain(), None)?;
        Ok(State::AwaitClientKeyExchange)
    }

    fn handle_client_key_exchange(&mut self, body: &[u8]) -> Result<State, Error> {
        let version = self.ctx.version()?;
        let params = self.ctx.params()?;
        let message = codec::parse_all(body, |i| {
            ClientKeyExchange::parse(i, params.key_exchange, version)
        })?;

        let pre_master_secret = match message {
            ClientKeyExchange::Rsa {
                encrypted_pre_master_secret,
            } => {
                let key = self
                    .ctx
                    .config
                    .signing_key()
                    .ok_or_else(|| Error::internal_error("no server key"))?;
                kx::decrypt_premaster(
                    key.as_ref(),
                    self.ctx.provider().secure_random,
                    &encrypted_pre_master_secret,
                    self.client_version,
                )?
            }
            ClientKeyExchange::Dh { public } | ClientKeyExchange::Ecdh { public } => {
                let possession = self
                    .ctx
                    .possessions
                    .pop()
                    .ok_or_else(|| Error::internal_error("no key exchange possession"))?;
                let group = possession
                    .group()
                    .ok_or_else(|| Error::internal_error("possession without group"))?;
                let credentials = Credentials::key_share(group, &public)?;
                kx::shared_secret(possession, &credentials, version)?
            }
        };

        // The extended master secret covers ClientKeyExchange.
        self.ctx.transcript.utilize();
        self.ctx.derive_master_secret(pre_master_secret)?;
        self.ctx.derive_legacy_ciphers(false)?;

        if self.ctx.peer_chain.is_empty() {
            Ok(State::AwaitChangeCipherSpec)
        } else {
            Ok(State::AwaitCertificateVerify)
        }
    }

    fn handle_certificate_verify(&mut self, body: &[u8]) -> Result<State, Error> {
        let verify = codec::parse_all(body, |i| CertificateVerify::parse(i, true))?;
        let scheme = verify
            .signed
            .scheme
            .filter(|s| self.ctx.config.signature_schemes().contains(s))
            .ok_or_else(|| Error::illegal_parameter("CertificateVerify scheme"))?;
        self.ctx.verify_peer_signature(
            scheme,
            self.ctx.transcript.raw(),
            &verify.signed.signature,
        )?;
        debug!("Client certificate verified ({:?})", scheme);
        Ok(State::AwaitChangeCipherSpec)
    }

    fn send_finished(&mut self) -> Result<(), Error> {
        let verify_data = self.ctx.legacy_verify_data(false)?;
        let mut body = Buf::new();
        Finished::new(&verify_data).serialize(&mut body);
        self.ctx.server_verify_data = verify_data;
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
        let expected = self.ctx.legacy_verify_data(true)?;
        check_verify_data(&expected, &finished.verify_data)?;
        self.ctx.client_verify_data = finished.verify_data;
        self.ctx.transcript.utilize();

        let session = if self.ctx.resumed {
            self.resuming.take()
        } else {
            self.ctx.change_write_cipher()?;
            self.send_finished()?;
            Some(self.store_session()?)
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

    fn store_session(&mut self) -> Result<Arc<Session>, Error> {
        let cache = self.ctx.config.session_cache().clone();
        let master_secret = self
            .ctx
            .master_secret
            .clone()
            .ok_or_else(|| Error::internal_error("master secret missing"))?;
        let session = Session::new(
            Buf::from_slice(self.session_id.as_slice()),
            self.ctx.version()?,
            self.ctx.suite()?,
            master_secret,
            self.ctx.extended_master_secret,
            self.ctx.peer_chain.clone(),
            self.ctx.now,
            cache.timeout(),
            0,
        );
        Ok(cache.insert(session, None))
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

    // ========================================================================
    // TLS 1.3
    // ========================================================================

    fn handle_client_hello13(
        &mut self,
        message: &HandshakeMessage,
        hello: &ClientHello,
        offer: &Offer,
    ) -> Result<State, Error> {
        let config = self.ctx.config.clone();
        let provider = config.crypto_provider();

        let suite = config
            .cipher_suites()
            .iter()
            .copied()
            .find(|s| s.is_tls13() && hello.offers_suite(*s) && provider.supports_suite(*s))
            .ok_or_else(|| Error::handshake_failure("no TLS 1.3 cipher suite in common"))?;
        let hash = suite
            .hash_algorithm()
            .ok_or_else(|| Error::internal_error("suite without hash"))?;

        let client_groups = offer.supported_groups.as_deref().ok_or_else(|| {
            Error::fatal(AlertDescription::MissingExtension, "no supported_groups")
        })?;
        let groups: Vec<NamedGroup> = config
            .named_groups()
            .iter()
            .copied()
            .filter(|g| client_groups.contains(g) && provider.find_kx_group(*g).is_some())
            .collect();
        let share = groups.iter().find_map(|g| offer.key_share(*g)).cloned();

        if let Some((retry_suite, retry_group)) = self.retry {
            if suite != retry_suite {
                return Err(Error::illegal_parameter("cipher suite changed after retry"));
            }
            if share.as_ref().map(|s| s.group) != Some(retry_group) {
                return Err(Error::illegal_parameter("no key share for the retry group"));
            }
            self.check_retry_cookie(offer, suite)?;
        }

        let Some(share) = share else {
            let group = groups
                .first()
                .copied()
                .ok_or_else(|| Error::handshake_failure("no named group in common"))?;
            return self.send_hello_retry_request(hello, suite, group);
        };

        // The server needs its own CertificateVerify unless a PSK is accepted.
        let psk = self.accept_psk(message, offer, suite)?;
        let scheme = match psk {
            Some(_) => None,
            None => {
                let peer_schemes = offer.signature_schemes.as_deref().unwrap_or(&[]);
                let scheme = self.ctx.select_scheme(peer_schemes, true).ok_or_else(|| {
                    Error::handshake_failure("no signature scheme in common")
                })?;
                Some(scheme)
            }
        };

        self.ctx.version = Some(ProtocolVersion::TLS1_3);
        self.ctx.suite = Some(suite);
        debug!("Negotiated TLS 1.3 with {:?} over {:?}", suite, share.group);

        let possession = Possession::generate(provider, share.group)?;
        let public = Buf::from_slice(
            possession
                .public()
                .ok_or_else(|| Error::internal_error("no public value"))?,
        );
        let credentials = Credentials::key_share(share.group, &share.key_exchange)?;
        let mut shared = kx::shared_secret(possession, &credentials, ProtocolVersion::TLS1_3)?;

        let mut schedule = KeySchedule::new(
            provider,
            hash,
            psk.as_ref().map(|(_, session)| session.secret()),
        )
        .map_err(crypto_error("key schedule"))?;
        let res = schedule.input_shared_secret(&shared);
        shared.zeroize();
        res.map_err(crypto_error("handshake secret"))?;

        let server_random = Random::new(provider.secure_random).map_err(crypto_error("server random"))?;
        self.ctx.server_random = Some(server_random);

        let mut extensions = vec![
            SupportedVersionsServerHello {
                selected_version: ProtocolVersion::TLS1_3,
            }
            .to_extension()?,
            KeyShareServerHello {
                entry: KeyShareEntry::new(share.group, &public),
            }
            .to_extension()?,
        ];
        if let Some((index, _)) = &psk {
            extensions.push(SelectedPsk(*index).to_extension()?);
        }
        let server_hello = ServerHello {
            legacy_version: ProtocolVersion::TLS1_2,
            random: server_random,
            session_id: hello.session_id.clone(),
            cipher_suite: suite,
            compression_method: COMPRESSION_NULL,
            extensions,
        };
        let mut body = Buf::new();
        server_hello.serialize(&mut body)?;
        self.ctx.send_handshake(HandshakeType::ServerHello, body)?;
        self.send_compat_ccs(hello);

        let transcript_hash = self.ctx.transcript.hash(hash)?;
        let (client_handshake, server_handshake) = schedule
            .handshake_traffic_secrets(&transcript_hash)
            .map_err(crypto_error("handshake traffic secrets"))?;
        let params = self.ctx.params()?;
        let kdf = schedule.kdf();
        let write = RecordCipher::tls13(provider, kdf, params.bulk, server_handshake.clone(), None)?;
        let read = RecordCipher::tls13(provider, kdf, params.bulk, client_handshake.clone(), None)?;
        self.ctx.install_write(write);
        self.ctx.install_read(read);

        let mut extensions = Vec::new();
        if offer.server_name.is_some() {
            extensions.push(Extension::empty(ExtensionType::ServerName));
        }
        let mut body = Buf::new();
        EncryptedExtensions { extensions }.serialize(&mut body)?;
        self.ctx
            .send_handshake(HandshakeType::EncryptedExtensions, body)?;

        match psk {
            Some((_, session)) => {
                self.ctx.resumed = true;
                self.ctx.peer_chain = session.peer_chain().to_vec();
                self.resuming = Some(session);
            }
            None => {
                if config.client_auth() != ClientAuth::None {
                    let request = CertificateRequest13 {
                        context: Buf::new(),
                        extensions: vec![
                            SignatureAlgorithmsExtension::new(config.signature_schemes())
                                .to_extension()?,
                        ],
                    };
                    let mut body = Buf::new();
                    request.serialize(&mut body)?;
                    self.ctx
                        .send_handshake(HandshakeType::CertificateRequest, body)?;
                    self.client_auth_requested = true;
                }
                let identity = config
                    .identity()
                    .ok_or_else(|| Error::internal_error("no server identity"))?;
                let mut body = Buf::new();
                Certificate::new(&identity.chain, Some(Buf::new())).serialize(&mut body)?;
                self.ctx.send_handshake(HandshakeType::Certificate, body)?;

                if let Some(scheme) = scheme {
                    let transcript_hash = self.ctx.transcript.hash(hash)?;
                    let content = tls13_signed_content(true, &transcript_hash);
                    let signature = self.ctx.sign(scheme, &content)?;
                    let mut body = Buf::new();
                    CertificateVerify::new(DigitallySigned::new(Some(scheme), signature))
                        .serialize(&mut body)?;
                    self.ctx
                        .send_handshake(HandshakeType::CertificateVerify, body)?;
                }
            }
        }

        let transcript_hash = self.ctx.transcript.hash(hash)?;
        let verify_data = kdf
            .verify_data(&server_handshake, &transcript_hash)
            .map_err(crypto_error("server finished"))?;
        let mut body = Buf::new();
        Finished::new(&verify_data).serialize(&mut body);
        self.ctx.send_handshake(HandshakeType::Finished, body)?;

        let transcript_hash = self.ctx.transcript.hash(hash)?;
        schedule
            .input_empty()
            .map_err(crypto_error("master secret"))?;
        let (client_application, server_application) = schedule
            .application_traffic_secrets(&transcript_hash)
            .map_err(crypto_error("application traffic secrets"))?;
        let exporter_master_secret = schedule
            .exporter_master_secret(&transcript_hash)
            .map_err(crypto_error("exporter master secret"))?;
        let write = RecordCipher::tls13(
            provider,
            kdf,
            params.bulk,
            server_application,
            Some(config.key_limit()),
        )?;
        self.ctx.install_write(write);

        self.tls13 = Some(Tls13Secrets {
            schedule,
            client_handshake,
            client_application,
            exporter_master_secret,
        });

        if self.client_auth_requested {
            Ok(State::AwaitCertificate13)
        } else {
            Ok(State::AwaitFinished13)
        }
    }

    /// Middlebox compatibility: a ChangeCipherSpec after our first flight
    /// message when the client sent a legacy session id.
    fn send_compat_ccs(&mut self, hello: &ClientHello) {
        if !self.compat_ccs_sent && !hello.session_id.is_empty() && !self.ctx.dtls {
            self.ctx.send_change_cipher_spec();
            self.compat_ccs_sent = true;
        }
    }

    fn send_hello_retry_request(
        &mut self,
        hello: &ClientHello,
        suite: CipherSuite,
        group: NamedGroup,
    ) -> Result<State, Error> {
        if self.retry.is_some() {
            return Err(Error::illegal_parameter("no usable key share after retry"));
        }
        let hash = suite
            .hash_algorithm()
            .ok_or_else(|| Error::internal_error("suite without hash"))?;
        debug!("HelloRetryRequest for {:?}", group);

        self.ctx.transcript.utilize();
        let client_hello_hash = self.ctx.transcript.hash(hash)?;
        self.ctx.transcript.replace_with_message_hash(hash)?;

        let mut extensions = vec![
            SupportedVersionsServerHello {
                selected_version: ProtocolVersion::TLS1_3,
            }
            .to_extension()?,
            KeyShareHelloRetryRequest {
                selected_group: group,
            }
            .to_extension()?,
        ];
        if self.ctx.config.hello_cookies() {
            let cookie = self
                .ctx
                .config
                .cookie_manager()
                .create_hrr_cookie(self.ctx.now, suite, &client_hello_hash)?;
            extensions.push(CookieExtension { cookie }.to_extension()?);
        }

        let retry = ServerHello {
            legacy_version: ProtocolVersion::TLS1_2,
            random: Random::hello_retry_request(),
            session_id: hello.session_id.clone(),
            cipher_suite: suite,
            compression_method: COMPRESSION_NULL,
            extensions,
        };
        let mut body = Buf::new();
        retry.serialize(&mut body)?;
        self.ctx.send_handshake(HandshakeType::ServerHello, body)?;
        self.send_compat_ccs(hello);

        self.retry = Some((suite, group));
        Ok(State::AwaitClientHello)
    }

    fn check_retry_cookie(&self, offer: &Offer, suite: CipherSuite) -> Result<(), Error> {
        if !self.ctx.config.hello_cookies() {
            return Ok(());
        }
        let cookie = offer
            .cookie
            .as_deref()
            .ok_or_else(|| Error::fatal(AlertDescription::MissingExtension, "cookie not echoed"))?;
        match self.ctx.config.cookie_manager().open_hrr_cookie(cookie) {
            Some((cookie_suite, _)) if cookie_suite == suite => Ok(()),
            _ => Err(Error::illegal_parameter("invalid HelloRetryRequest cookie")),
        }
    }

    /// Find an offered PSK to resume with and check its binder.
    fn accept_psk(
        &self,
        message: &HandshakeMessage,
        offer: &Offer,
        suite: CipherSuite,
    ) -> Result<Option<(u16, Arc<Session>)>, Error> {
        let config = &self.ctx.config;
        let Some(psks) = &offer.psks else {
            return Ok(None);
        };
        let dhe_ke = PskKeyExchangeMode::PskDheKe;
        if !offer.offers_psk_mode(dhe_ke) || !config.psk_key_exchange_modes().contains(&dhe_ke) {
            return Ok(None);
        }
        if psks.identities.len() != psks.binders.len() {
            return Err(Error::illegal_parameter("PSK identities and binders differ in count"));
        }
        let hash = suite.hash_algorithm();

        let found = psks.identities.iter().enumerate().find_map(|(i, identity)| {
            let session = config.session_cache().get(&identity.identity, self.ctx.now)?;
            let fits = session.version() == ProtocolVersion::TLS1_3
                && session.cipher_suite().hash_algorithm() == hash;
            fits.then_some((i, session))
        });
        let Some((index, session)) = found else {
            return Ok(None);
        };

        let hash = hash.ok_or_else(|| Error::internal_error("suite without hash"))?;
        let schedule = KeySchedule::new(config.crypto_provider(), hash, Some(session.secret()))
            .map_err(crypto_error("key schedule"))?;
        let encoded = message.encode(false)?;
        let prefix = binder_prefix(&encoded, psks)
            .ok_or_else(|| Error::decode_error("pre_shared_key binders"))?;
        let transcript_hash = self.ctx.transcript.digest_with(hash, prefix)?;
        let binder_key = schedule
            .binder_key(true)
            .map_err(crypto_error("binder key"))?;
        let expected = schedule
            .kdf()
            .verify_data(&binder_key, &transcript_hash)
            .map_err(crypto_error("binder"))?;
        check_verify_data(&expected, &psks.binders[index])?;

        debug!("Accepted PSK {}", index);
        Ok(Some((index as u16, session)))
    }

    fn handle_certificate13(&mut self, body: &[u8]) -> Result<State, Error> {
        let certificate = codec::parse_all(body, |i| Certificate::parse(i, true))?;
        if certificate.context.as_ref().is_some_and(|c| !c.is_empty()) {
            return Err(Error::illegal_parameter("certificate request context mismatch"));
        }
        if certificate.is_empty() {
            if self.ctx.config.client_auth() == ClientAuth::Required {
                return Err(Error::fatal(
                    AlertDescription::CertificateRequired,
                    "client sent no certificate",
                ));
            }
            debug!("Client sent an empty certificate");
            return Ok(State::AwaitFinished13);
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
        let content = tls13_signed_content(false, &transcript_hash);
        self.ctx
            .verify_peer_signature(scheme, &content, &verify.signed.signature)?;
        debug!("Client certificate verified ({:?})", scheme);
        Ok(State::AwaitFinished13)
    }

    fn handle_finished13(&mut self, body: &[u8]) -> Result<State, Error> {
        let params = self.ctx.params()?;
        let secrets = self
            .tls13
            .take()
            .ok_or_else(|| Error::internal_error("TLS 1.3 secrets missing"))?;
        let kdf = secrets.schedule.kdf();
        let config = self.ctx.config.clone();

        let finished = codec::parse_all(body, |i| Finished::parse(i, params.hash.output_len()))?;
        let transcript_hash = self.ctx.transcript.hash(params.hash)?;
        let expected = kdf
            .verify_data(&secrets.client_handshake, &transcript_hash)
            .map_err(crypto_error("client finished"))?;
        check_verify_data(&expected, &finished.verify_data)?;
        self.ctx.transcript.utilize();

        let read = RecordCipher::tls13(
            config.crypto_provider(),
            kdf,
            params.bulk,
            secrets.client_application.clone(),
            None,
        )?;
        self.ctx.install_read(read);

        let transcript_hash = self.ctx.transcript.hash(params.hash)?;
        let resumption_master_secret = secrets
            .schedule
            .resumption_master_secret(&transcript_hash)
            .map_err(crypto_error("resumption master secret"))?;
        let exporter_master_secret = secrets.exporter_master_secret.clone();

        let suite = self.ctx.suite()?;
        let peer_chain = std::mem::take(&mut self.ctx.peer_chain);
        let mut post = PostHandshakeContext::new(
            config.clone(),
            false,
            suite,
            kdf,
            resumption_master_secret,
            None,
            peer_chain.clone(),
        );
        if config.ticket_lifetime() > Duration::ZERO {
            let actions = post.new_session_ticket(self.ctx.now)?;
            self.ctx.actions.extend(actions);
        }

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
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::certificate::{generate_self_signed_certificate, AcceptAnyCertificate};
    use crate::types::ContentType;
    use std::time::Instant;

    fn server(versions: &[ProtocolVersion], datagram: bool, auth: ClientAuth) -> ServerHandshake {
        let identity = generate_self_signed_certificate("server").unwrap();
        let mut builder = Config::builder()
            .datagram(datagram)
            .protocol_versions(versions)
            .identity(identity)
            .client_auth(auth);
        if auth != ClientAuth::None {
            builder = builder.certificate_validator(Arc::new(AcceptAnyCertificate));
        }
        let config = builder.build().unwrap();
        ServerHandshake::new(Arc::new(config), Instant::now(), None)
    }

    fn client_hello(
        version: ProtocolVersion,
        suites: &[CipherSuite],
        compression_methods: &[u8],
        dtls: bool,
    ) -> HandshakeMessage {
        let hello = ClientHello {
            legacy_version: version,
            random: Random { bytes: [1; 32] },
            session_id: SessionId::empty(),
            cookie: dtls.then(Buf::new),
            cipher_suites: suites.to_vec(),
            compression_methods: compression_methods.to_vec(),
            extensions: Vec::new(),
        };
        let mut body = Buf::new();
        hello.serialize(&mut body).unwrap();
        HandshakeMessage::new(HandshakeType::ClientHello, body)
    }

    fn alert_of(result: Result<(), Error>) -> AlertDescription {
        result.unwrap_err().alert_description()
    }

    #[test]
    fn fallback_scsv_with_higher_version_enabled() {
        let mut server = server(
            &[ProtocolVersion::TLS1_3, ProtocolVersion::TLS1_2],
            false,
            ClientAuth::None,
        );
        let hello = client_hello(
            ProtocolVersion::TLS1_2,
            &[CipherSuite::ECDHE_ECDSA_AES128_GCM_SHA256, CipherSuite::FALLBACK_SCSV],
            &[0],
            false,
        );
        assert_eq!(
            alert_of(server.handle(&hello)),
            AlertDescription::InappropriateFallback
        );
    }

    #[test]
    fn client_below_every_enabled_version() {
        let mut server = server(&[ProtocolVersion::TLS1_2], false, ClientAuth::None);
        let hello = client_hello(
            ProtocolVersion::TLS1_0,
            &[CipherSuite::ECDHE_ECDSA_AES128_GCM_SHA256],
            &[0],
            false,
        );
        assert_eq!(alert_of(server.handle(&hello)), AlertDescription::ProtocolVersion);
    }

    #[test]
    fn null_compression_required() {
        let mut server = server(&[ProtocolVersion::TLS1_2], false, ClientAuth::None);
        let hello = client_hello(
            ProtocolVersion::TLS1_2,
            &[CipherSuite::ECDHE_ECDSA_AES128_GCM_SHA256],
            &[1],
            false,
        );
        assert_eq!(alert_of(server.handle(&hello)), AlertDescription::IllegalParameter);
    }

    #[test]
    fn dtls_hello_without_cookie_is_verified_first() {
        let mut server = server(&[ProtocolVersion::DTLS1_2], true, ClientAuth::None);
        let hello = client_hello(
            ProtocolVersion::DTLS1_2,
            &[CipherSuite::ECDHE_ECDSA_AES128_GCM_SHA256],
            &[0],
            true,
        );
        server.handle(&hello).unwrap();

        let actions = server.ctx.take_actions();
        assert_eq!(actions.len(), 2);
        let Action::Send(ContentType::Handshake, bytes) = &actions[0] else {
            panic!("expected HelloVerifyRequest, got {:?}", actions[0]);
        };
        let message = codec::parse_all(bytes, |i| HandshakeMessage::parse(i, true)).unwrap();
        assert_eq!(message.msg_type, HandshakeType::HelloVerifyRequest);
        assert!(matches!(actions[1], Action::ResetMessageSeq));
        assert!(server.ctx.transcript.raw().is_empty());
        assert!(!server.is_done());
    }

    #[test]
    fn no_certificate_warning_only_when_requested_in_ssl3() {
        let mut requested = server(&[ProtocolVersion::TLS1_2], false, ClientAuth::Requested);
        requested.state = State::AwaitCertificate;
        requested.ctx.version = Some(ProtocolVersion::SSL3_0);
        requested
            .handle_warning(AlertDescription::NoCertificate)
            .unwrap();
        assert_eq!(requested.state, State::AwaitClientKeyExchange);

        let mut required = server(&[ProtocolVersion::TLS1_2], false, ClientAuth::Required);
        required.state = State::AwaitCertificate;
        required.ctx.version = Some(ProtocolVersion::SSL3_0);
        assert_eq!(
            alert_of(required.handle_warning(AlertDescription::NoCertificate)),
            AlertDescription::HandshakeFailure
        );

        let mut tls12 = server(&[ProtocolVersion::TLS1_2], false, ClientAuth::Requested);
        tls12.state = State::AwaitCertificate;
        tls12.ctx.version = Some(ProtocolVersion::TLS1_2);
        assert_eq!(
            alert_of(tls12.handle_warning(AlertDescription::NoCertificate)),
            AlertDescription::HandshakeFailure
        );
    }
}
