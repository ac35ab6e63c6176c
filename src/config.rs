use std::sync::Arc;
use std::time::Duration;

use crate::certificate::{CertificateValidator, Identity};
use crate::crypto::cookie::HelloCookieManager;
use crate::crypto::{rust_crypto, CryptoProvider, SigningKey};
use crate::session::SessionCache;
use crate::types::{CipherSuite, NamedGroup, ProtocolVersion, PskKeyExchangeMode};
use crate::types::SignatureScheme;
use crate::Error;

/// Longest ticket lifetime allowed (RFC 8446 Section 4.6.1).
pub const MAX_TICKET_LIFETIME: Duration = Duration::from_secs(7 * 24 * 3600);

/// Whether a server asks the client for a certificate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClientAuth {
    /// No CertificateRequest is sent.
    #[default]
    None,
    /// A CertificateRequest is sent, an empty answer is accepted.
    Requested,
    /// A CertificateRequest is sent, an empty answer fails the handshake.
    Required,
}

/// TLS/DTLS configuration
///
/// Shared by every connection made from it, typically as `Arc<Config>`.
#[derive(Clone)]
pub struct Config {
    datagram: bool,
    protocol_versions: Vec<ProtocolVersion>,
    cipher_suites: Vec<CipherSuite>,
    named_groups: Vec<NamedGroup>,
    signature_schemes: Vec<SignatureScheme>,
    identity: Option<Identity>,
    signing_key: Option<Arc<dyn SigningKey>>,
    certificate_validator: Option<Arc<dyn CertificateValidator>>,
    client_auth: ClientAuth,
    extended_master_secret: bool,
    allow_unsafe_renegotiation: bool,
    allow_legacy_hello_messages: bool,
    hello_cookies: bool,
    cookie_manager: Arc<HelloCookieManager>,
    psk_key_exchange_modes: Vec<PskKeyExchangeMode>,
    session_cache: Arc<SessionCache>,
    ticket_lifetime: Duration,
    key_limit: u64,
    max_handshake_message_size: usize,
    handshake_timeout: Duration,
    crypto_provider: CryptoProvider,
    rng_seed: Option<u64>,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("datagram", &self.datagram)
            .field("protocol_versions", &self.protocol_versions)
            .field("cipher_suites", &self.cipher_suites)
            .field("named_groups", &self.named_groups)
            .field("client_auth", &self.client_auth)
            .finish_non_exhaustive()
    }
}

impl Config {
    /// Create a new configuration builder.
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder {
            datagram: false,
            protocol_versions: None,
            cipher_suites: None,
            named_groups: vec![
                NamedGroup::X25519,
                NamedGroup::Secp256r1,
                NamedGroup::Secp384r1,
                NamedGroup::Ffdhe2048,
            ],
            signature_schemes: vec![
                SignatureScheme::ECDSA_SECP256R1_SHA256,
                SignatureScheme::ECDSA_SECP384R1_SHA384,
                SignatureScheme::RSA_PSS_RSAE_SHA256,
                SignatureScheme::RSA_PKCS1_SHA256,
                SignatureScheme::RSA_PKCS1_SHA384,
            ],
            identity: None,
            certificate_validator: None,
            client_auth: ClientAuth::None,
            extended_master_secret: true,
            allow_unsafe_renegotiation: false,
            allow_legacy_hello_messages: true,
            hello_cookies: true,
            psk_key_exchange_modes: vec![PskKeyExchangeMode::PskDheKe],
            session_cache: None,
            ticket_lifetime: Duration::from_secs(24 * 3600),
            key_limit: 1 << 37,
            max_handshake_message_size: 32_768,
            handshake_timeout: Duration::from_secs(40),
            crypto_provider: None,
            rng_seed: None,
        }
    }

    /// DTLS over datagrams instead of TLS over a byte stream.
    #[inline(always)]
    pub fn datagram(&self) -> bool {
        self.datagram
    }

    /// Enabled protocol versions, newest first.
    #[inline(always)]
    pub fn protocol_versions(&self) -> &[ProtocolVersion] {
        &self.protocol_versions
    }

    /// Newest enabled version.
    pub fn max_version(&self) -> ProtocolVersion {
        self.protocol_versions[0]
    }

    pub fn is_version_enabled(&self, version: ProtocolVersion) -> bool {
        self.protocol_versions.contains(&version)
    }

    /// Cipher suites in preference order, restricted to what the provider implements.
    #[inline(always)]
    pub fn cipher_suites(&self) -> &[CipherSuite] {
        &self.cipher_suites
    }

    /// Key exchange groups in preference order, restricted to what the provider implements.
    #[inline(always)]
    pub fn named_groups(&self) -> &[NamedGroup] {
        &self.named_groups
    }

    /// Signature schemes accepted from the peer and offered to it.
    #[inline(always)]
    pub fn signature_schemes(&self) -> &[SignatureScheme] {
        &self.signature_schemes
    }

    /// Local certificate chain and private key.
    #[inline(always)]
    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    /// The identity's private key, loaded through the crypto provider.
    #[inline(always)]
    pub(crate) fn signing_key(&self) -> Option<&Arc<dyn SigningKey>> {
        self.signing_key.as_ref()
    }

    /// Validator for the peer's certificate chain.
    #[inline(always)]
    pub fn certificate_validator(&self) -> Option<&Arc<dyn CertificateValidator>> {
        self.certificate_validator.as_ref()
    }

    /// For a server, whether to ask for a client certificate.
    #[inline(always)]
    pub fn client_auth(&self) -> ClientAuth {
        self.client_auth
    }

    /// Whether to negotiate the Extended Master Secret extension (RFC 7627).
    #[inline(always)]
    pub fn extended_master_secret(&self) -> bool {
        self.extended_master_secret
    }

    /// Whether to renegotiate with peers that lack RFC 5746 support.
    #[inline(always)]
    pub fn allow_unsafe_renegotiation(&self) -> bool {
        self.allow_unsafe_renegotiation
    }

    /// Whether a server accepts an initial ClientHello without any
    /// renegotiation indication.
    #[inline(always)]
    pub fn allow_legacy_hello_messages(&self) -> bool {
        self.allow_legacy_hello_messages
    }

    /// Whether a server sends DTLS HelloVerifyRequest and TLS 1.3 HRR cookies.
    #[inline(always)]
    pub fn hello_cookies(&self) -> bool {
        self.hello_cookies
    }

    /// Cookie secrets shared by every server connection made from this
    /// configuration.
    pub(crate) fn cookie_manager(&self) -> &HelloCookieManager {
        &self.cookie_manager
    }

    /// PSK key exchange modes offered (client) or accepted (server).
    #[inline(always)]
    pub fn psk_key_exchange_modes(&self) -> &[PskKeyExchangeMode] {
        &self.psk_key_exchange_modes
    }

    #[inline(always)]
    pub fn session_cache(&self) -> &Arc<SessionCache> {
        &self.session_cache
    }

    /// Lifetime announced in TLS 1.3 NewSessionTicket.
    #[inline(always)]
    pub fn ticket_lifetime(&self) -> Duration {
        self.ticket_lifetime
    }

    /// Bytes protected by one TLS 1.3 write key before a KeyUpdate is sent.
    #[inline(always)]
    pub fn key_limit(&self) -> u64 {
        self.key_limit
    }

    /// Largest handshake message accepted from the peer.
    #[inline(always)]
    pub fn max_handshake_message_size(&self) -> usize {
        self.max_handshake_message_size
    }

    /// Timeout for the entire handshake.
    #[inline(always)]
    pub fn handshake_timeout(&self) -> Duration {
        self.handshake_timeout
    }

    /// Cryptographic provider.
    ///
    /// Provides all cryptographic operations (ciphers, key exchange, signing, etc.).
    #[inline(always)]
    pub fn crypto_provider(&self) -> &CryptoProvider {
        &self.crypto_provider
    }

    /// Seed for non-secret randomness (session ids, ticket age offsets).
    #[inline(always)]
    pub fn rng_seed(&self) -> Option<u64> {
        self.rng_seed
    }
}

/// Builder for TLS/DTLS configuration.
pub struct ConfigBuilder {
    datagram: bool,
    protocol_versions: Option<Vec<ProtocolVersion>>,
    cipher_suites: Option<Vec<CipherSuite>>,
    named_groups: Vec<NamedGroup>,
    signature_schemes: Vec<SignatureScheme>,
    identity: Option<Identity>,
    certificate_validator: Option<Arc<dyn CertificateValidator>>,
    client_auth: ClientAuth,
    extended_master_secret: bool,
    allow_unsafe_renegotiation: bool,
    allow_legacy_hello_messages: bool,
    hello_cookies: bool,
    psk_key_exchange_modes: Vec<PskKeyExchangeMode>,
    session_cache: Option<Arc<SessionCache>>,
    ticket_lifetime: Duration,
    key_limit: u64,
    max_handshake_message_size: usize,
    handshake_timeout: Duration,
    crypto_provider: Option<CryptoProvider>,
    rng_seed: Option<u64>,
}

impl ConfigBuilder {
    /// Run DTLS over datagrams instead of TLS over a stream.
    ///
    /// Defaults to false.
    pub fn datagram(mut self, datagram: bool) -> Self {
        self.datagram = datagram;
        self
    }

    /// Set the enabled protocol versions.
    ///
    /// Defaults to TLS 1.3 and TLS 1.2, or DTLS 1.2 for datagrams.
    pub fn protocol_versions(mut self, versions: &[ProtocolVersion]) -> Self {
        self.protocol_versions = Some(versions.to_vec());
        self
    }

    /// Set the cipher suites in preference order.
    ///
    /// Defaults to every suite the crypto provider implements.
    pub fn cipher_suites(mut self, suites: &[CipherSuite]) -> Self {
        self.cipher_suites = Some(suites.to_vec());
        self
    }

    /// Set the key exchange groups in preference order.
    ///
    /// Defaults to x25519, secp256r1, secp384r1 and ffdhe2048.
    pub fn named_groups(mut self, groups: &[NamedGroup]) -> Self {
        self.named_groups = groups.to_vec();
        self
    }

    /// Set the signature schemes.
    ///
    /// Defaults to ECDSA P-256/P-384, RSA-PSS SHA-256 and RSA PKCS#1 SHA-256/SHA-384.
    pub fn signature_schemes(mut self, schemes: &[SignatureScheme]) -> Self {
        self.signature_schemes = schemes.to_vec();
        self
    }

    /// Set the local certificate chain and private key. Required for servers.
    pub fn identity(mut self, identity: Identity) -> Self {
        self.identity = Some(identity);
        self
    }

    /// Set the validator for peer certificate chains. Required for clients,
    /// and for servers that ask for client certificates.
    pub fn certificate_validator(mut self, validator: Arc<dyn CertificateValidator>) -> Self {
        self.certificate_validator = Some(validator);
        self
    }

    /// Set whether a server asks for a client certificate.
    ///
    /// Defaults to [`ClientAuth::None`].
    pub fn client_auth(mut self, client_auth: ClientAuth) -> Self {
        self.client_auth = client_auth;
        self
    }

    /// Set whether to enable Extended Master Secret extension (rfc7627)
    ///
    /// Defaults to true.
    pub fn extended_master_secret(mut self, enabled: bool) -> Self {
        self.extended_master_secret = enabled;
        self
    }

    /// Set whether to renegotiate with peers lacking RFC 5746 support.
    ///
    /// Defaults to false.
    pub fn allow_unsafe_renegotiation(mut self, allow: bool) -> Self {
        self.allow_unsafe_renegotiation = allow;
        self
    }

    /// Set whether a server accepts hellos without renegotiation indication.
    ///
    /// Defaults to true.
    pub fn allow_legacy_hello_messages(mut self, allow: bool) -> Self {
        self.allow_legacy_hello_messages = allow;
        self
    }

    /// Set whether a server uses HelloVerifyRequest (DTLS) and HRR cookies.
    ///
    /// Defaults to true.
    pub fn hello_cookies(mut self, enabled: bool) -> Self {
        self.hello_cookies = enabled;
        self
    }

    /// Set the PSK key exchange modes.
    ///
    /// Defaults to `psk_dhe_ke`.
    pub fn psk_key_exchange_modes(mut self, modes: &[PskKeyExchangeMode]) -> Self {
        self.psk_key_exchange_modes = modes.to_vec();
        self
    }

    /// Share a session cache between configurations.
    ///
    /// Defaults to a new cache with a 24 hour timeout and 20 000 entries.
    pub fn session_cache(mut self, cache: Arc<SessionCache>) -> Self {
        self.session_cache = Some(cache);
        self
    }

    /// Set the lifetime of issued TLS 1.3 tickets.
    ///
    /// Defaults to 24 hours. Capped at 7 days.
    pub fn ticket_lifetime(mut self, lifetime: Duration) -> Self {
        self.ticket_lifetime = lifetime;
        self
    }

    /// Set how many bytes one TLS 1.3 write key protects before a KeyUpdate.
    ///
    /// Defaults to 2^37.
    pub fn key_limit(mut self, limit: u64) -> Self {
        self.key_limit = limit;
        self
    }

    /// Set the largest handshake message accepted.
    ///
    /// Defaults to 32768.
    pub fn max_handshake_message_size(mut self, size: usize) -> Self {
        self.max_handshake_message_size = size;
        self
    }

    /// Set the timeout for the entire handshake.
    ///
    /// Defaults to 40 seconds.
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Set a custom crypto provider.
    ///
    /// Defaults to [`rust_crypto::default_provider`].
    pub fn crypto_provider(mut self, provider: CryptoProvider) -> Self {
        self.crypto_provider = Some(provider);
        self
    }

    /// Seed the non-secret randomness, for reproducible tests.
    pub fn rng_seed(mut self, seed: u64) -> Self {
        self.rng_seed = Some(seed);
        self
    }

    /// Build the configuration.
    ///
    /// Validates the crypto provider, the versions against the transport and
    /// the identity's private key. Returns `Error::ConfigError` on failure.
    pub fn build(self) -> Result<Config, Error> {
        let crypto_provider = self
            .crypto_provider
            .unwrap_or_else(rust_crypto::default_provider);

        crypto_provider.validate().map_err(Error::ConfigError)?;

        let mut protocol_versions = self.protocol_versions.unwrap_or_else(|| {
            if self.datagram {
                vec![ProtocolVersion::DTLS1_2]
            } else {
                vec![ProtocolVersion::TLS1_3, ProtocolVersion::TLS1_2]
            }
        });
        protocol_versions.sort_by_key(|v| std::cmp::Reverse(v.rank()));
        protocol_versions.dedup();
        if protocol_versions.is_empty() {
            return Err(Error::ConfigError("no protocol versions enabled".into()));
        }
        for v in &protocol_versions {
            if !v.is_known() || v.is_dtls() != self.datagram {
                return Err(Error::ConfigError(format!(
                    "{} cannot be used over {}",
                    v,
                    if self.datagram { "datagrams" } else { "a stream" }
                )));
            }
        }

        let cipher_suites: Vec<CipherSuite> = self
            .cipher_suites
            .unwrap_or_else(|| CipherSuite::all().to_vec())
            .into_iter()
            .filter(|s| !s.is_signaling() && crypto_provider.supports_suite(*s))
            .filter(|s| {
                protocol_versions
                    .iter()
                    .any(|v| s.supports_version(v.tls_equivalent()))
            })
            .collect();
        if cipher_suites.is_empty() {
            return Err(Error::ConfigError(
                "no cipher suite usable with the enabled versions and provider".into(),
            ));
        }

        let named_groups: Vec<NamedGroup> = self
            .named_groups
            .into_iter()
            .filter(|g| crypto_provider.find_kx_group(*g).is_some())
            .collect();
        if named_groups.is_empty() {
            return Err(Error::ConfigError("no key exchange group available".into()));
        }

        let signing_key = match &self.identity {
            Some(identity) => {
                if identity.chain.is_empty() {
                    return Err(Error::ConfigError("identity without certificates".into()));
                }
                let key = crypto_provider
                    .key_provider
                    .load_private_key(&identity.private_key)
                    .map_err(|e| Error::ConfigError(format!("private key: {}", e)))?;
                Some(Arc::from(key))
            }
            None => None,
        };

        if self.client_auth != ClientAuth::None && self.certificate_validator.is_none() {
            return Err(Error::ConfigError(
                "client authentication needs a certificate validator".into(),
            ));
        }

        Ok(Config {
            datagram: self.datagram,
            protocol_versions,
            cipher_suites,
            named_groups,
            signature_schemes: self.signature_schemes,
            identity: self.identity,
            signing_key,
            certificate_validator: self.certificate_validator,
            client_auth: self.client_auth,
            extended_master_secret: self.extended_master_secret,
            allow_unsafe_renegotiation: self.allow_unsafe_renegotiation,
            allow_legacy_hello_messages: self.allow_legacy_hello_messages,
            hello_cookies: self.hello_cookies,
            cookie_manager: Arc::new(HelloCookieManager::new(&crypto_provider)),
            psk_key_exchange_modes: self.psk_key_exchange_modes,
            session_cache: self.session_cache.unwrap_or_default(),
            ticket_lifetime: self.ticket_lifetime.min(MAX_TICKET_LIFETIME),
            key_limit: self.key_limit,
            max_handshake_message_size: self.max_handshake_message_size,
            handshake_timeout: self.handshake_timeout,
            crypto_provider,
            rng_seed: self.rng_seed,
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Config::builder()
            .build()
            .expect("Default config should always validate")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::certificate::{generate_self_signed_certificate, AcceptAnyCertificate};

    #[test]
    fn defaults() {
        let config = Config::default();
        assert!(!config.datagram());
        assert_eq!(
            config.protocol_versions(),
            &[ProtocolVersion::TLS1_3, ProtocolVersion::TLS1_2]
        );
        assert_eq!(config.cipher_suites()[0], CipherSuite::TLS13_AES_128_GCM_SHA256);
        // CBC suites stay behind every AEAD suite.
        let first_cbc = config
            .cipher_suites()
            .iter()
            .position(|s| *s == CipherSuite::ECDHE_ECDSA_AES128_CBC_SHA)
            .unwrap();
        assert!(config.cipher_suites()[..first_cbc]
            .iter()
            .all(|s| s.params().is_some_and(|p| p.bulk.is_aead())));
        assert!(config.extended_master_secret());
        assert_eq!(config.client_auth(), ClientAuth::None);
    }

    #[test]
    fn datagram_versions() {
        let config = Config::builder().datagram(true).build().unwrap();
        assert_eq!(config.protocol_versions(), &[ProtocolVersion::DTLS1_2]);
        assert!(!config.cipher_suites().iter().any(|s| s.is_tls13()));

        let err = Config::builder()
            .datagram(true)
            .protocol_versions(&[ProtocolVersion::TLS1_2])
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::ConfigError(_)));
    }

    #[test]
    fn legacy_versions_get_cbc_suites() {
        let config = Config::builder()
            .protocol_versions(&[ProtocolVersion::TLS1_0, ProtocolVersion::SSL3_0])
            .build()
            .unwrap();
        assert_eq!(config.max_version(), ProtocolVersion::TLS1_0);
        assert!(config
            .cipher_suites()
            .contains(&CipherSuite::RSA_AES128_CBC_SHA));
        assert!(config
            .cipher_suites()
            .iter()
            .all(|s| s.params().is_some_and(|p| !p.bulk.is_aead())));
    }

    #[test]
    fn cookie_secret_shared_by_clones() {
        let config = Config::default();
        let copy = config.clone();
        let now = std::time::Instant::now();
        let cookie = config
            .cookie_manager()
            .create_dtls_cookie(now, b"hello fields")
            .unwrap();
        assert!(copy
            .cookie_manager()
            .is_dtls_cookie_valid(b"hello fields", &cookie));
    }

    #[test]
    fn versions_sorted_newest_first() {
        let config = Config::builder()
            .protocol_versions(&[ProtocolVersion::TLS1_2, ProtocolVersion::TLS1_3])
            .build()
            .unwrap();
        assert_eq!(config.max_version(), ProtocolVersion::TLS1_3);
    }

    #[test]
    fn client_auth_needs_validator() {
        let err = Config::builder()
            .client_auth(ClientAuth::Required)
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::ConfigError(_)));

        Config::builder()
            .client_auth(ClientAuth::Requested)
            .certificate_validator(Arc::new(AcceptAnyCertificate))
            .build()
            .unwrap();
    }

    #[test]
    fn identity_key_is_loaded() {
        let identity = generate_self_signed_certificate("server").unwrap();
        let config = Config::builder().identity(identity).build().unwrap();
        assert!(config.signing_key().is_some());

        let bad = Identity::new(vec![vec![1, 2, 3]], vec![4, 5, 6]);
        assert!(Config::builder().identity(bad).build().is_err());
    }

    #[test]
    fn ticket_lifetime_capped() {
        let config = Config::builder()
            .ticket_lifetime(Duration::from_secs(30 * 24 * 3600))
            .build()
            .unwrap();
        assert_eq!(config.ticket_lifetime(), MAX_TICKET_LIFETIME);
    }
}
