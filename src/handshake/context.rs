//! State shared by the client and server handshakes.
//!
//! A message handler never touches the connection directly. Everything it
//! wants done (records to send, keys to install, the final outcome) is
//! queued as an [`Action`]. The dispatcher hands the queue to the connection
//! only when the handler returned `Ok`, so a message is applied entirely or
//! not at all.

use std::sync::Arc;
use std::time::Instant;

use subtle::ConstantTimeEq;
use zeroize::Zeroize;

use super::kx::Possession;
use super::post::PostHandshakeContext;
use super::transcript::TranscriptHash;
use crate::alert::{Alert, AlertDescription};
use crate::buffer::Buf;
use crate::certificate::spki_from_der;
use crate::crypto::cipher::RecordCipher;
use crate::crypto::key_schedule::Tls13Kdf;
use crate::crypto::legacy::{ssl3_finished, LegacyKdf};
use crate::crypto::CryptoProvider;
use crate::message::change_cipher_spec;
use crate::message::HandshakeMessage;
use crate::rng::SeededRng;
use crate::session::Session;
use crate::types::{
    CipherSuite, ContentType, HandshakeType, ProtocolVersion, Random, SignatureAlgorithm,
    SignatureScheme, SuiteParams,
};
use crate::{Config, Error};

/// Something the connection must do on behalf of the handshake.
pub(crate) enum Action {
    /// Send `payload` as records of `content_type` under the current write key.
    Send(ContentType, Buf),
    InstallRead(RecordCipher),
    InstallWrite(RecordCipher),
    /// Send an alert that does not end the handshake.
    Alert(Alert),
    /// The peer's leaf certificate, surfaced as an output.
    PeerCert(Buf),
    /// Accept any DTLS message_seq for the next handshake message.
    ResetMessageSeq,
    Complete(Box<Completion>),
}

impl std::fmt::Debug for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Action::Send(t, b) => write!(f, "Send({:?}, {})", t, b.len()),
            Action::InstallRead(c) => write!(f, "InstallRead({:?})", c),
            Action::InstallWrite(c) => write!(f, "InstallWrite({:?})", c),
            Action::Alert(a) => write!(f, "Alert({:?})", a),
            Action::PeerCert(b) => write!(f, "PeerCert({})", b.len()),
            Action::ResetMessageSeq => write!(f, "ResetMessageSeq"),
            Action::Complete(c) => write!(f, "Complete({:?}, {:?})", c.version, c.suite),
        }
    }
}

/// Verify data of the last completed handshake, for RFC 5746.
#[derive(Debug, Clone, Default)]
pub(crate) struct Renegotiation {
    pub client_verify_data: Buf,
    pub server_verify_data: Buf,
    /// Both sides signalled secure renegotiation.
    pub secure: bool,
}

/// Everything a completed handshake leaves behind.
pub(crate) struct Completion {
    pub version: ProtocolVersion,
    pub suite: CipherSuite,
    pub resumed: bool,
    pub renegotiation: Renegotiation,
    pub exporter: Exporter,
    pub peer_chain: Vec<Vec<u8>>,
    pub session: Option<Arc<Session>>,
    /// TLS 1.3 only.
    pub post: Option<PostHandshakeContext>,
}

/// Keying material exporter of an established connection.
pub(crate) enum Exporter {
    Legacy {
        master_secret: Buf,
        client_random: Random,
        server_random: Random,
        version: ProtocolVersion,
        params: SuiteParams,
    },
    Tls13 {
        kdf: Tls13Kdf,
        exporter_master_secret: Buf,
    },
}

impl Exporter {
    pub fn export(
        &self,
        provider: &CryptoProvider,
        label: &str,
        context: Option<&[u8]>,
        len: usize,
    ) -> Result<Buf, Error> {
        let out = match self {
            Exporter::Legacy {
                master_secret,
                client_random,
                server_random,
                version,
                params,
            } => LegacyKdf::new(provider, *version, params).export(
                master_secret,
                label,
                &client_random.bytes,
                &server_random.bytes,
                context,
                len,
            ),
            Exporter::Tls13 {
                kdf,
                exporter_master_secret,
            } => kdf.export(
                provider.hash_provider,
                exporter_master_secret,
                label.as_bytes(),
                context.unwrap_or(&[]),
                len,
            ),
        };
        out.map_err(|e| Error::CryptoError(format!("exporter: {}", e)))
    }
}

impl Drop for Exporter {
    fn drop(&mut self) {
        match self {
            Exporter::Legacy { master_secret, .. } => master_secret.zeroize(),
            Exporter::Tls13 {
                exporter_master_secret,
                ..
            } => exporter_master_secret.zeroize(),
        }
    }
}

pub(crate) fn crypto_error(what: &str) -> impl FnOnce(String) -> Error + '_ {
    move |e| Error::CryptoError(format!("{}: {}", what, e))
}

pub(crate) struct HandshakeContext {
    pub config: Arc<Config>,
    pub dtls: bool,
    pub now: Instant,
    pub rng: SeededRng,
    pub transcript: TranscriptHash,
    pub actions: Vec<Action>,
    /// Next DTLS message_seq to send.
    send_seq: u16,

    pub version: Option<ProtocolVersion>,
    pub suite: Option<CipherSuite>,
    pub client_random: Option<Random>,
    pub server_random: Option<Random>,
    pub possessions: Vec<Possession>,

    /// Set when this handshake renegotiates an established connection.
    pub previous: Option<Renegotiation>,
    pub secure_renegotiation: bool,
    pub extended_master_secret: bool,
    pub resumed: bool,

    pub peer_chain: Vec<Vec<u8>>,
    pub peer_spki: Option<Vec<u8>>,

    pub master_secret: Option<Buf>,
    /// TLS 1.2 read cipher, installed when ChangeCipherSpec arrives.
    pub pending_read: Option<RecordCipher>,
    pub pending_write: Option<RecordCipher>,
    pub client_verify_data: Buf,
    pub server_verify_data: Buf,
}

impl HandshakeContext {
    pub fn new(config: Arc<Config>, now: Instant, previous: Option<Renegotiation>) -> Self {
        let transcript = TranscriptHash::new(config.crypto_provider().hash_provider);
        HandshakeContext {
            dtls: config.datagram(),
            rng: SeededRng::new(config.rng_seed()),
            config,
            now,
            transcript,
            actions: Vec::new(),
            send_seq: 0,
            version: None,
            suite: None,
            client_random: None,
            server_random: None,
            possessions: Vec::new(),
            previous,
            secure_renegotiation: false,
            extended_master_secret: false,
            resumed: false,
            peer_chain: Vec::new(),
            peer_spki: None,
            master_secret: None,
            pending_read: None,
            pending_write: None,
            client_verify_data: Buf::new(),
            server_verify_data: Buf::new(),
        }
    }

    pub fn provider(&self) -> &CryptoProvider {
        self.config.crypto_provider()
    }

    pub fn take_actions(&mut self) -> Vec<Action> {
        std::mem::take(&mut self.actions)
    }

    pub fn set_send_seq(&mut self, seq: u16) {
        self.send_seq = seq;
    }

    fn encode(&mut self, msg_type: HandshakeType, body: Buf) -> Result<Buf, Error> {
        let mut message = HandshakeMessage::new(msg_type, body);
        if self.dtls {
            message.message_seq = self.send_seq;
            self.send_seq = self.send_seq.wrapping_add(1);
        }
        Ok(message.encode(self.dtls)?)
    }

    /// Queue a handshake message and add it to the transcript.
    pub fn send_handshake(&mut self, msg_type: HandshakeType, body: Buf) -> Result<(), Error> {
        let encoded = self.encode(msg_type, body)?;
        self.transcript.update(&encoded);
        trace!("Send {:?}", msg_type);
        self.actions.push(Action::Send(ContentType::Handshake, encoded));
        Ok(())
    }

    /// Queue a handshake message that stays out of the transcript
    /// (HelloRequest, HelloVerifyRequest).
    pub fn send_untracked(&mut self, msg_type: HandshakeType, body: Buf) -> Result<(), Error> {
        let encoded = self.encode(msg_type, body)?;
        trace!("Send {:?} (untracked)", msg_type);
        self.actions.push(Action::Send(ContentType::Handshake, encoded));
        Ok(())
    }

    pub fn send_change_cipher_spec(&mut self) {
        let mut body = Buf::new();
        change_cipher_spec::serialize(&mut body);
        self.actions
            .push(Action::Send(ContentType::ChangeCipherSpec, body));
    }

    pub fn send_warning(&mut self, description: AlertDescription) {
        self.actions.push(Action::Alert(Alert::warning(description)));
    }

    pub fn install_read(&mut self, cipher: RecordCipher) {
        self.actions.push(Action::InstallRead(cipher));
    }

    pub fn install_write(&mut self, cipher: RecordCipher) {
        self.actions.push(Action::InstallWrite(cipher));
    }

    pub fn version(&self) -> Result<ProtocolVersion, Error> {
        self.version
            .ok_or_else(|| Error::internal_error("protocol version not negotiated"))
    }

    pub fn suite(&self) -> Result<CipherSuite, Error> {
        self.suite
            .ok_or_else(|| Error::internal_error("cipher suite not negotiated"))
    }

    pub fn params(&self) -> Result<SuiteParams, Error> {
        self.suite()?
            .params()
            .ok_or_else(|| Error::internal_error("cipher suite without parameters"))
    }

    pub fn randoms(&self) -> Result<(Random, Random), Error> {
        match (self.client_random, self.server_random) {
            (Some(c), Some(s)) => Ok((c, s)),
            _ => Err(Error::internal_error("hello randoms missing")),
        }
    }

    /// Signature schemes are carried from TLS 1.2 on.
    pub fn with_schemes(&self) -> Result<bool, Error> {
        Ok(!ProtocolVersion::TLS1_2.newer_than(self.version()?))
    }

    /// Validate and record a peer chain.
    ///
    /// The leaf's key must be of algorithm `expected` when given.
    pub fn accept_peer_chain(
        &mut self,
        chain: Vec<Vec<u8>>,
        expected: Option<SignatureAlgorithm>,
    ) -> Result<(), Error> {
        let Some(leaf) = chain.first() else {
            return Err(Error::fatal(
                AlertDescription::BadCertificate,
                "empty certificate chain",
            ));
        };
        let validator = self
            .config
            .certificate_validator()
            .ok_or_else(|| Error::internal_error("no certificate validator"))?;
        validator
            .validate(&chain)
            .map_err(|e| Error::fatal(AlertDescription::BadCertificate, e.to_string()))?;

        let spki = spki_from_der(leaf)
            .map_err(|e| Error::fatal(AlertDescription::BadCertificate, e.to_string()))?;
        let algorithm = self
            .provider()
            .signature_verification
            .key_algorithm(&spki)
            .map_err(|e| Error::fatal(AlertDescription::UnsupportedCertificate, e))?;
        if let Some(expected) = expected {
            if algorithm != expected {
                return Err(Error::fatal(
                    AlertDescription::UnsupportedCertificate,
                    format!("{:?} certificate, needed {:?}", algorithm, expected),
                ));
            }
        }

        debug!("Peer certificate accepted ({:?} key)", algorithm);
        self.actions.push(Action::PeerCert(Buf::from_slice(leaf)));
        self.peer_spki = Some(spki);
        self.peer_chain = chain;
        Ok(())
    }

    /// Check a peer signature against the recorded peer key.
    pub fn verify_peer_signature(
        &self,
        scheme: SignatureScheme,
        data: &[u8],
        signature: &[u8],
    ) -> Result<(), Error> {
        let spki = self
            .peer_spki
            .as_ref()
            .ok_or_else(|| Error::unexpected_message("signature without peer certificate"))?;
        self.provider()
            .signature_verification
            .verify_signature(spki, data, signature, scheme)
            .map_err(|e| {
                Error::fatal(
                    AlertDescription::DecryptError,
                    format!("{:?} signature: {}", scheme, e),
                )
            })
    }

    /// First scheme of our key that the peer accepts and the config allows.
    pub fn select_scheme(&self, peer: &[SignatureScheme], tls13: bool) -> Option<SignatureScheme> {
        let key = self.config.signing_key()?;
        key.schemes().iter().copied().find(|s| {
            peer.contains(s)
                && self.config.signature_schemes().contains(s)
                && (!tls13 || s.usable_in_tls13())
        })
    }

    pub fn sign(&self, scheme: SignatureScheme, data: &[u8]) -> Result<Buf, Error> {
        let key = self
            .config
            .signing_key()
            .ok_or_else(|| Error::internal_error("no signing key"))?;
        let mut out = Buf::new();
        key.sign(scheme, data, &mut out)
            .map_err(crypto_error("signature"))?;
        Ok(out)
    }

    /// Derive and keep the TLS 1.2 master secret.
    ///
    /// Under extended master secret the transcript must already include
    /// ClientKeyExchange.
    pub fn derive_master_secret(&mut self, mut pre_master_secret: Buf) -> Result<(), Error> {
        let version = self.version()?;
        let params = self.params()?;
        let (client_random, server_random) = self.randoms()?;
        let kdf = LegacyKdf::new(self.provider(), version, &params);

        let master_secret = if self.extended_master_secret {
            let session_hash = self.transcript.digest(version, params.hash)?;
            kdf.extended_master_secret(&pre_master_secret, &session_hash)
        } else {
            kdf.master_secret(&pre_master_secret, &client_random.bytes, &server_random.bytes)
        };
        pre_master_secret.zeroize();
        self.master_secret = Some(master_secret.map_err(crypto_error("master secret"))?);
        Ok(())
    }

    /// Expand the master secret into pending read and write ciphers.
    pub fn derive_legacy_ciphers(&mut self, is_client: bool) -> Result<(), Error> {
        let version = self.version()?;
        let params = self.params()?;
        let (client_random, server_random) = self.randoms()?;
        let master_secret = self
            .master_secret
            .as_ref()
            .ok_or_else(|| Error::internal_error("master secret missing"))?;

        let block = LegacyKdf::new(self.provider(), version, &params)
            .key_block(
                master_secret,
                &client_random.bytes,
                &server_random.bytes,
                &params,
                version,
            )
            .map_err(crypto_error("key block"))?;

        let provider = self.provider();
        let client = RecordCipher::legacy(
            provider,
            version,
            &params,
            &block.client_write_mac_key,
            &block.client_write_key,
            &block.client_write_iv,
        )?;
        let server = RecordCipher::legacy(
            provider,
            version,
            &params,
            &block.server_write_mac_key,
            &block.server_write_key,
            &block.server_write_iv,
        )?;

        if is_client {
            self.pending_write = Some(client);
            self.pending_read = Some(server);
        } else {
            self.pending_write = Some(server);
            self.pending_read = Some(client);
        }
        Ok(())
    }

    /// Send ChangeCipherSpec and switch to the pending write cipher.
    pub fn change_write_cipher(&mut self) -> Result<(), Error> {
        let cipher = self
            .pending_write
            .take()
            .ok_or_else(|| Error::internal_error("no pending write cipher"))?;
        self.send_change_cipher_spec();
        self.install_write(cipher);
        Ok(())
    }

    /// ChangeCipherSpec from the peer: switch to the pending read cipher.
    pub fn change_read_cipher(&mut self) -> Result<(), Error> {
        let cipher = self
            .pending_read
            .take()
            .ok_or_else(|| Error::unexpected_message("ChangeCipherSpec before key exchange"))?;
        self.install_read(cipher);
        Ok(())
    }

    /// Finished verify_data of `is_client` over the transcript so far.
    pub fn legacy_verify_data(&self, is_client: bool) -> Result<Buf, Error> {
        let version = self.version()?;
        let params = self.params()?;
        let master_secret = self
            .master_secret
            .as_ref()
            .ok_or_else(|| Error::internal_error("master secret missing"))?;

        let out = if version == ProtocolVersion::SSL3_0 {
            ssl3_finished(self.provider(), master_secret, is_client, self.transcript.raw())
        } else {
            let hash = self.transcript.digest(version, params.hash)?;
            LegacyKdf::new(self.provider(), version, &params).verify_data(
                master_secret,
                is_client,
                &hash,
            )
        };
        out.map_err(crypto_error("finished"))
    }

    pub fn legacy_exporter(&self) -> Result<Exporter, Error> {
        let (client_random, server_random) = self.randoms()?;
        let master_secret = self
            .master_secret
            .clone()
            .ok_or_else(|| Error::internal_error("master secret missing"))?;
        Ok(Exporter::Legacy {
            master_secret,
            client_random,
            server_random,
            version: self.version()?,
            params: self.params()?,
        })
    }

    pub fn renegotiation(&self) -> Renegotiation {
        Renegotiation {
            client_verify_data: self.client_verify_data.clone(),
            server_verify_data: self.server_verify_data.clone(),
            secure: self.secure_renegotiation,
        }
    }

    /// renegotiation_info content we expect (server) or send (client).
    pub fn renegotiation_binding(&self, include_server: bool) -> Buf {
        let mut out = Buf::new();
        if let Some(previous) = &self.previous {
            out.extend_from_slice(&previous.client_verify_data);
            if include_server {
                out.extend_from_slice(&previous.server_verify_data);
            }
        }
        out
    }

    pub fn is_renegotiation(&self) -> bool {
        self.previous.is_some()
    }
}

impl Drop for HandshakeContext {
    fn drop(&mut self) {
        if let Some(ms) = self.master_secret.as_mut() {
            ms.zeroize();
        }
    }
}

/// Compare Finished verify_data in constant time.
pub(crate) fn check_verify_data(expected: &[u8], received: &[u8]) -> Result<(), Error> {
    if expected.len() == received.len() && bool::from(expected.ct_eq(received)) {
        Ok(())
    } else {
        Err(Error::fatal(
            AlertDescription::DecryptError,
            "Finished verify_data mismatch",
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::certificate::{generate_self_signed_certificate, AcceptAnyCertificate};

    fn context() -> HandshakeContext {
        let config = Config::builder()
            .certificate_validator(Arc::new(AcceptAnyCertificate))
            .build()
            .unwrap();
        HandshakeContext::new(Arc::new(config), Instant::now(), None)
    }

    #[test]
    fn tracked_messages_enter_transcript() {
        let mut ctx = context();
        ctx.send_handshake(HandshakeType::ServerHelloDone, Buf::new())
            .unwrap();
        ctx.send_untracked(HandshakeType::HelloRequest, Buf::new())
            .unwrap();
        assert_eq!(ctx.transcript.raw(), &[14, 0, 0, 0]);
        assert_eq!(ctx.take_actions().len(), 2);
        assert!(ctx.actions.is_empty());
    }

    #[test]
    fn peer_chain_surfaces_leaf() {
        let mut ctx = context();
        let identity = generate_self_signed_certificate("peer").unwrap();
        ctx.accept_peer_chain(identity.chain.clone(), Some(SignatureAlgorithm::Ecdsa))
            .unwrap();
        assert!(ctx.peer_spki.is_some());
        assert!(matches!(ctx.actions[0], Action::PeerCert(_)));

        let err = ctx
            .accept_peer_chain(identity.chain.clone(), Some(SignatureAlgorithm::Rsa))
            .unwrap_err();
        assert_eq!(err.alert_description(), AlertDescription::UnsupportedCertificate);

        let err = ctx.accept_peer_chain(vec![], None).unwrap_err();
        assert_eq!(err.alert_description(), AlertDescription::BadCertificate);
    }

    #[test]
    fn verify_data_compare() {
        assert!(check_verify_data(&[1, 2, 3], &[1, 2, 3]).is_ok());
        let err = check_verify_data(&[1, 2, 3], &[1, 2, 4]).unwrap_err();
        assert_eq!(err.alert_description(), AlertDescription::DecryptError);
        assert!(check_verify_data(&[1, 2, 3], &[1, 2]).is_err());
    }

    #[test]
    fn change_cipher_without_keys() {
        let mut ctx = context();
        let err = ctx.change_read_cipher().unwrap_err();
        assert_eq!(err.alert_description(), AlertDescription::UnexpectedMessage);
    }
}
