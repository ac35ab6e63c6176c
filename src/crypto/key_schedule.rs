//! TLS 1.3 Key Schedule (RFC 8446 Section 7.1)
//!
//! ```text
//!              0
//!              |
//!              v
//!    PSK ->  HKDF-Extract = Early Secret
//!              |
//!              +-----> Derive-Secret(., "ext binder" | "res binder", "")
//!              |                     = binder_key
//!              v
//!        Derive-Secret(., "derived", "")
//!              |
//!              v
//!    (EC)DHE -> HKDF-Extract = Handshake Secret
//!              |
//!              +-----> Derive-Secret(., "c hs traffic",
//!              |                     ClientHello...ServerHello)
//!              |                     = client_handshake_traffic_secret
//!              |
//!              +-----> Derive-Secret(., "s hs traffic",
//!              |                     ClientHello...ServerHello)
//!              |                     = server_handshake_traffic_secret
//!              v
//!        Derive-Secret(., "derived", "")
//!              |
//!              v
//!    0 -> HKDF-Extract = Master Secret
//!              |
//!              +-----> Derive-Secret(., "c ap traffic",
//!              |                     ClientHello...server Finished)
//!              |                     = client_application_traffic_secret_0
//!              |
//!              +-----> Derive-Secret(., "s ap traffic",
//!              |                     ClientHello...server Finished)
//!              |                     = server_application_traffic_secret_0
//!              |
//!              +-----> Derive-Secret(., "exp master",
//!              |                     ClientHello...server Finished)
//!              |                     = exporter_master_secret
//!              |
//!              +-----> Derive-Secret(., "res master",
//!                                    ClientHello...client Finished)
//!                                    = resumption_master_secret
//! ```
//!
//! Each derivation takes the transcript hash it is bound to as an argument.
//! Which snapshot that is (up to ServerHello, up to server Finished, up to
//! client Finished) is the caller's responsibility; the stage tracking here
//! only prevents deriving a secret from the wrong point in the chain.
//!
//! Early data is not supported, so neither "c e traffic" nor
//! "e exp master" is derived.

use zeroize::Zeroize;

use crate::buffer::Buf;
use crate::crypto::hkdf;
use crate::crypto::provider::{CryptoProvider, HashProvider, HmacProvider};
use crate::types::HashAlgorithm;

/// HKDF operations bound to one hash, usable without a full key schedule.
///
/// Post-handshake code (KeyUpdate, tickets) only needs this.
#[derive(Debug, Clone, Copy)]
pub struct Tls13Kdf {
    hmac: &'static dyn HmacProvider,
    hash: HashAlgorithm,
}

impl Tls13Kdf {
    pub fn new(provider: &CryptoProvider, hash: HashAlgorithm) -> Self {
        Tls13Kdf {
            hmac: provider.hmac_provider,
            hash,
        }
    }

    pub fn hash(&self) -> HashAlgorithm {
        self.hash
    }

    fn expand_label(
        &self,
        secret: &[u8],
        label: &[u8],
        context: &[u8],
        len: usize,
    ) -> Result<Buf, String> {
        let mut out = Buf::new();
        hkdf::expand_label(self.hmac, self.hash, secret, label, context, len, &mut out)?;
        Ok(out)
    }

    fn derive_secret(&self, secret: &[u8], label: &[u8], transcript_hash: &[u8]) -> Result<Buf, String> {
        self.expand_label(secret, label, transcript_hash, self.hash.output_len())
    }

    fn extract(&self, salt: &[u8], ikm: &[u8]) -> Result<Buf, String> {
        let mut out = Buf::new();
        hkdf::extract(self.hmac, self.hash, salt, ikm, &mut out)?;
        Ok(out)
    }

    /// Traffic key and IV for a traffic secret.
    ///
    /// ```text
    /// [sender]_write_key = HKDF-Expand-Label(Secret, "key", "", key_length)
    /// [sender]_write_iv  = HKDF-Expand-Label(Secret, "iv", "", iv_length)
    /// ```
    pub fn traffic_keys(
        &self,
        traffic_secret: &[u8],
        key_len: usize,
        iv_len: usize,
    ) -> Result<(Buf, Buf), String> {
        let key = self.expand_label(traffic_secret, b"key", &[], key_len)?;
        let iv = self.expand_label(traffic_secret, b"iv", &[], iv_len)?;
        Ok((key, iv))
    }

    /// application_traffic_secret_N+1 =
    ///     HKDF-Expand-Label(application_traffic_secret_N, "traffic upd", "", Hash.length)
    pub fn next_traffic_secret(&self, current: &[u8]) -> Result<Buf, String> {
        self.expand_label(current, b"traffic upd", &[], self.hash.output_len())
    }

    /// Finished verify_data (also used for PSK binders).
    ///
    /// ```text
    /// finished_key = HKDF-Expand-Label(BaseKey, "finished", "", Hash.length)
    /// verify_data  = HMAC(finished_key, transcript_hash)
    /// ```
    pub fn verify_data(&self, base_key: &[u8], transcript_hash: &[u8]) -> Result<Buf, String> {
        let mut finished_key = self.expand_label(base_key, b"finished", &[], self.hash.output_len())?;
        let mut out = Buf::new();
        let res = self
            .hmac
            .hmac(self.hash, &finished_key, &[transcript_hash], &mut out);
        finished_key.zeroize();
        res?;
        Ok(out)
    }

    /// PSK for a ticket: HKDF-Expand-Label(resumption_master_secret,
    /// "resumption", ticket_nonce, Hash.length)
    pub fn resumption_psk(&self, resumption_master_secret: &[u8], nonce: &[u8]) -> Result<Buf, String> {
        self.expand_label(
            resumption_master_secret,
            b"resumption",
            nonce,
            self.hash.output_len(),
        )
    }

    /// TLS 1.3 Exporter (RFC 8446 Section 7.5)
    ///
    /// ```text
    /// TLS-Exporter(label, context_value, key_length) =
    ///     HKDF-Expand-Label(Derive-Secret(Secret, label, ""),
    ///                       "exporter", Hash(context_value), key_length)
    /// ```
    pub fn export(
        &self,
        hashes: &dyn HashProvider,
        exporter_master_secret: &[u8],
        label: &[u8],
        context: &[u8],
        len: usize,
    ) -> Result<Buf, String> {
        let mut empty_hash = Buf::new();
        hashes.digest(self.hash, &[], &mut empty_hash)?;
        let derived = self.derive_secret(exporter_master_secret, label, &empty_hash)?;

        let mut context_hash = Buf::new();
        hashes.digest(self.hash, context, &mut context_hash)?;

        self.expand_label(&derived, b"exporter", &context_hash, len)
    }
}

/// Position in the secret chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Early,
    Handshake,
    Master,
}

/// TLS 1.3 key schedule.
///
/// Holds only the current chain secret. Derived traffic secrets are returned
/// to the caller.
pub struct KeySchedule {
    kdf: Tls13Kdf,
    empty_hash: Buf,
    stage: Stage,
    secret: Buf,
}

impl std::fmt::Debug for KeySchedule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeySchedule")
            .field("hash", &self.kdf.hash)
            .field("stage", &self.stage)
            .finish_non_exhaustive()
    }
}

impl KeySchedule {
    /// Start the schedule. Early Secret = HKDF-Extract(0, PSK or 0).
    pub fn new(
        provider: &CryptoProvider,
        hash: HashAlgorithm,
        psk: Option<&[u8]>,
    ) -> Result<Self, String> {
        let kdf = Tls13Kdf::new(provider, hash);
        let zeros = vec![0u8; hash.output_len()];
        let secret = kdf.extract(&[], psk.unwrap_or(&zeros[..]))?;

        let mut empty_hash = Buf::new();
        provider.hash_provider.digest(hash, &[], &mut empty_hash)?;

        Ok(KeySchedule {
            kdf,
            empty_hash,
            stage: Stage::Early,
            secret,
        })
    }

    pub fn kdf(&self) -> Tls13Kdf {
        self.kdf
    }

    fn expect_stage(&self, stage: Stage) -> Result<(), String> {
        if self.stage != stage {
            return Err(format!(
                "key schedule at {:?}, needed {:?}",
                self.stage, stage
            ));
        }
        Ok(())
    }

    /// binder_key = Derive-Secret(Early Secret, "res binder" | "ext binder", "")
    pub fn binder_key(&self, resumption: bool) -> Result<Buf, String> {
        self.expect_stage(Stage::Early)?;
        let label: &[u8] = if resumption {
            b"res binder"
        } else {
            b"ext binder"
        };
        self.kdf.derive_secret(&self.secret, label, &self.empty_hash)
    }

    /// Advance by salting with "derived" and extracting against `ikm`.
    fn advance(&mut self, ikm: &[u8], next: Stage) -> Result<(), String> {
        let derived = self
            .kdf
            .derive_secret(&self.secret, b"derived", &self.empty_hash)?;
        let mut secret = self.kdf.extract(&derived, ikm)?;
        std::mem::swap(&mut self.secret, &mut secret);
        secret.zeroize();
        self.stage = next;
        Ok(())
    }

    /// Handshake Secret = HKDF-Extract(Derive-Secret(Early Secret, "derived", ""), (EC)DHE)
    pub fn input_shared_secret(&mut self, shared_secret: &[u8]) -> Result<(), String> {
        self.expect_stage(Stage::Early)?;
        self.advance(shared_secret, Stage::Handshake)
    }

    /// Returns (client_handshake_traffic_secret, server_handshake_traffic_secret).
    pub fn handshake_traffic_secrets(&self, transcript_hash: &[u8]) -> Result<(Buf, Buf), String> {
        self.expect_stage(Stage::Handshake)?;
        let client = self
            .kdf
            .derive_secret(&self.secret, b"c hs traffic", transcript_hash)?;
        let server = self
            .kdf
            .derive_secret(&self.secret, b"s hs traffic", transcript_hash)?;
        Ok((client, server))
    }

    /// Master Secret = HKDF-Extract(Derive-Secret(Handshake Secret, "derived", ""), 0)
    pub fn input_empty(&mut self) -> Result<(), String> {
        self.expect_stage(Stage::Handshake)?;
        let zeros = vec![0u8; self.kdf.hash.output_len()];
        self.advance(&zeros, Stage::Master)
    }

    /// Returns (client_application_traffic_secret_0, server_application_traffic_secret_0).
    pub fn application_traffic_secrets(
        &self,
        transcript_hash: &[u8],
    ) -> Result<(Buf, Buf), String> {
        self.expect_stage(Stage::Master)?;
        let client = self
            .kdf
            .derive_secret(&self.secret, b"c ap traffic", transcript_hash)?;
        let server = self
            .kdf
            .derive_secret(&self.secret, b"s ap traffic", transcript_hash)?;
        Ok((client, server))
    }

    pub fn exporter_master_secret(&self, transcript_hash: &[u8]) -> Result<Buf, String> {
        self.expect_stage(Stage::Master)?;
        self.kdf
            .derive_secret(&self.secret, b"exp master", transcript_hash)
    }

    /// Bound to the transcript through the client Finished.
    pub fn resumption_master_secret(&self, transcript_hash: &[u8]) -> Result<Buf, String> {
        self.expect_stage(Stage::Master)?;
        self.kdf
            .derive_secret(&self.secret, b"res master", transcript_hash)
    }
}

impl Drop for KeySchedule {
    fn drop(&mut self) {
        self.secret.zeroize();
    }
}
