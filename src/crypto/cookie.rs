//! Stateless hello cookies.
//!
//! A server uses a cookie to defer allocating state for a client until the
//! client has shown it can receive at the address it claims (DTLS
//! HelloVerifyRequest), or to carry its own state through a TLS 1.3
//! HelloRetryRequest.
//!
//! Both cookie kinds are MACed with a secret that rotates lazily, see
//! [`EphemeralKeyManager`]. One manager lives in each `Config`, so a cookie
//! issued by one server connection validates on any other built from the
//! same configuration. Cookies minted under the previous
//! secret still validate after one rotation.
//!
//! ```text
//! DTLS cookie:  generation(1) || HMAC-SHA256(secret, hello fields)[..31]
//! HRR cookie:   generation(1) || suite(2) || hash_len(1) || CH1 hash
//!               || HMAC-SHA256(secret, everything before)
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use subtle::ConstantTimeEq;
use zeroize::Zeroize;

use crate::buffer::Buf;
use crate::crypto::ephemeral::EphemeralKeyManager;
use crate::crypto::provider::{CryptoProvider, HmacProvider, SecureRandom};
use crate::error::Error;
use crate::types::{CipherSuite, HashAlgorithm};

/// Cookies minted under one secret before it is replaced.
const SECRET_MAX_USES: u64 = 0x00FF_FFFF;

/// Lifetime of one cookie secret.
const SECRET_LIFETIME: Duration = Duration::from_secs(3600);

const MAC_LEN: usize = 32;

/// Length of a DTLS cookie, one generation byte plus truncated MAC.
pub const DTLS_COOKIE_LEN: usize = 32;

struct CookieSecret([u8; 32]);

impl Drop for CookieSecret {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

/// Issues and checks hello cookies for a server.
pub struct HelloCookieManager {
    secrets: EphemeralKeyManager<CookieSecret>,
    hmac: &'static dyn HmacProvider,
    rng: &'static dyn SecureRandom,
}

impl std::fmt::Debug for HelloCookieManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HelloCookieManager")
            .field("secrets", &self.secrets)
            .finish_non_exhaustive()
    }
}

impl HelloCookieManager {
    pub fn new(provider: &CryptoProvider) -> Self {
        Self::with_rotation(provider, SECRET_MAX_USES, SECRET_LIFETIME)
    }

    pub fn with_rotation(provider: &CryptoProvider, max_uses: u64, lifetime: Duration) -> Self {
        HelloCookieManager {
            secrets: EphemeralKeyManager::new(max_uses, lifetime),
            hmac: provider.hmac_provider,
            rng: provider.secure_random,
        }
    }

    fn current_secret(&self, now: Instant) -> Result<(u64, Arc<CookieSecret>), Error> {
        let rng = self.rng;
        self.secrets
            .get(now, || {
                let mut secret = [0u8; 32];
                rng.fill(&mut secret)
                    .map_err(|e| Error::CryptoError(format!("cookie secret: {}", e)))?;
                Ok(CookieSecret(secret))
            })
    }

    /// Find a retained secret by the low byte of its generation.
    fn secret_for(&self, tag: u8) -> Option<Arc<CookieSecret>> {
        self.secrets
            .generations()
            .into_iter()
            .find(|g| *g as u8 == tag)
            .and_then(|g| self.secrets.by_generation(g))
    }

    fn mac(&self, secret: &CookieSecret, parts: &[&[u8]]) -> Result<Buf, Error> {
        let mut out = Buf::new();
        self.hmac
            .hmac(HashAlgorithm::SHA256, &secret.0, parts, &mut out)
            .map_err(|e| Error::CryptoError(format!("cookie mac: {}", e)))?;
        Ok(out)
    }

    /// Cookie for a DTLS HelloVerifyRequest.
    ///
    /// `hello_fields` are the ClientHello fields the cookie binds to, see
    /// `ClientHello::cookie_input`.
    pub fn create_dtls_cookie(&self, now: Instant, hello_fields: &[u8]) -> Result<Buf, Error> {
        let (generation, secret) = self.current_secret(now)?;
        let tag = generation as u8;
        let mac = self.mac(&secret, &[&[tag][..], hello_fields])?;

        let mut cookie = Buf::with_capacity(DTLS_COOKIE_LEN);
        cookie.push(tag);
        cookie.extend_from_slice(&mac[..DTLS_COOKIE_LEN - 1]);
        Ok(cookie)
    }

    pub fn is_dtls_cookie_valid(&self, hello_fields: &[u8], cookie: &[u8]) -> bool {
        if cookie.len() != DTLS_COOKIE_LEN {
            return false;
        }
        let tag = cookie[0];
        let Some(secret) = self.secret_for(tag) else {
            return false;
        };
        let Ok(mac) = self.mac(&secret, &[&[tag][..], hello_fields]) else {
            return false;
        };
        bool::from(mac[..DTLS_COOKIE_LEN - 1].ct_eq(&cookie[1..]))
    }

    /// Cookie for a TLS 1.3 HelloRetryRequest, carrying the selected suite
    /// and the hash of the first ClientHello.
    pub fn create_hrr_cookie(
        &self,
        now: Instant,
        suite: CipherSuite,
        client_hello_hash: &[u8],
    ) -> Result<Buf, Error> {
        if client_hello_hash.len() > u8::MAX as usize {
            return Err(Error::internal_error("ClientHello hash too long for cookie"));
        }
        let (generation, secret) = self.current_secret(now)?;

        let mut cookie = Buf::with_capacity(4 + client_hello_hash.len() + MAC_LEN);
        cookie.push(generation as u8);
        cookie.extend_from_slice(&suite.as_u16().to_be_bytes());
        cookie.push(client_hello_hash.len() as u8);
        cookie.extend_from_slice(client_hello_hash);
        let mac = self.mac(&secret, &[&cookie[..]])?;
        cookie.extend_from_slice(&mac);
        Ok(cookie)
    }

    /// Check a HelloRetryRequest cookie and recover what it carries.
    pub fn open_hrr_cookie(&self, cookie: &[u8]) -> Option<(CipherSuite, Buf)> {
        if cookie.len() < 4 + MAC_LEN {
            return None;
        }
        let hash_len = cookie[3] as usize;
        if cookie.len() != 4 + hash_len + MAC_LEN {
            return None;
        }
        let (body, tag) = cookie.split_at(4 + hash_len);
        let secret = self.secret_for(body[0])?;
        let mac = self.mac(&secret, &[body]).ok()?;
        if !bool::from(mac.ct_eq(tag)) {
            return None;
        }
        let suite = CipherSuite::from_u16(u16::from_be_bytes([body[1], body[2]]));
        Some((suite, Buf::from_slice(&body[4..])))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::rust_crypto::default_provider;

    #[test]
    fn dtls_cookie_validates_for_same_hello() {
        let mgr = HelloCookieManager::new(&default_provider());
        let now = Instant::now();
        let cookie = mgr.create_dtls_cookie(now, b"hello fields").unwrap();
        assert_eq!(cookie.len(), DTLS_COOKIE_LEN);
        assert!(mgr.is_dtls_cookie_valid(b"hello fields", &cookie));
        assert!(!mgr.is_dtls_cookie_valid(b"other fields", &cookie));
    }

    #[test]
    fn tampered_cookie_rejected() {
        let mgr = HelloCookieManager::new(&default_provider());
        let cookie = mgr.create_dtls_cookie(Instant::now(), b"hello").unwrap();
        for i in 0..cookie.len() {
            let mut bad = cookie.clone();
            bad[i] ^= 0x01;
            assert!(!mgr.is_dtls_cookie_valid(b"hello", &bad), "byte {}", i);
        }
        assert!(!mgr.is_dtls_cookie_valid(b"hello", &cookie[..31]));
    }

    #[test]
    fn survives_one_rotation() {
        let mgr = HelloCookieManager::with_rotation(&default_provider(), 1, SECRET_LIFETIME);
        let now = Instant::now();
        let first = mgr.create_dtls_cookie(now, b"a").unwrap();
        let _second = mgr.create_dtls_cookie(now, b"a").unwrap();
        assert!(mgr.is_dtls_cookie_valid(b"a", &first));
        let _third = mgr.create_dtls_cookie(now, b"a").unwrap();
        assert!(!mgr.is_dtls_cookie_valid(b"a", &first));
    }

    #[test]
    fn hrr_cookie_carries_state() {
        let mgr = HelloCookieManager::new(&default_provider());
        let hash = [0xab; 32];
        let cookie = mgr
            .create_hrr_cookie(Instant::now(), CipherSuite::TLS13_AES_128_GCM_SHA256, &hash)
            .unwrap();
        let (suite, ch1) = mgr.open_hrr_cookie(&cookie).unwrap();
        assert_eq!(suite, CipherSuite::TLS13_AES_128_GCM_SHA256);
        assert_eq!(&ch1[..], &hash[..]);

        let mut bad = cookie.clone();
        bad[5] ^= 0xff;
        assert!(mgr.open_hrr_cookie(&bad).is_none());
    }
}
