//! Key derivation for SSL 3.0 through TLS 1.2.
//!
//! One master secret per session, derived from the pre-master secret and the
//! hello randoms (or the session hash under extended master secret), then
//! expanded into a key block sized by the cipher suite.

use crate::buffer::Buf;
use crate::crypto::prf::Prf;
use crate::crypto::provider::CryptoProvider;
use crate::types::{ProtocolVersion, SuiteParams};

pub const MASTER_SECRET_LEN: usize = 48;

/// Length of TLS Finished verify_data.
pub const VERIFY_DATA_LEN: usize = 12;

/// SSL 3.0 Finished sender constants.
const SSL3_SENDER_CLIENT: &[u8] = &[0x43, 0x4C, 0x4E, 0x54];
const SSL3_SENDER_SERVER: &[u8] = &[0x53, 0x52, 0x56, 0x52];

/// Everything the legacy derivations need besides their inputs.
#[derive(Debug, Clone, Copy)]
pub struct LegacyKdf<'a> {
    provider: &'a CryptoProvider,
    prf: Prf,
}

impl<'a> LegacyKdf<'a> {
    pub fn new(provider: &'a CryptoProvider, version: ProtocolVersion, params: &SuiteParams) -> Self {
        LegacyKdf {
            provider,
            prf: Prf::for_version(version, params.hash),
        }
    }

    pub fn prf(&self) -> Prf {
        self.prf
    }

    fn derive(
        &self,
        secret: &[u8],
        label: &str,
        seed: &[&[u8]],
        len: usize,
    ) -> Result<Buf, String> {
        let mut full_seed = Buf::new();
        for part in seed {
            full_seed.extend_from_slice(part);
        }
        let mut out = Buf::new();
        self.prf.derive(
            self.provider.hmac_provider,
            self.provider.hash_provider,
            secret,
            label,
            &full_seed,
            len,
            &mut out,
        )?;
        Ok(out)
    }

    /// master_secret = PRF(pre_master_secret, "master secret",
    ///                     ClientHello.random + ServerHello.random)
    pub fn master_secret(
        &self,
        pre_master_secret: &[u8],
        client_random: &[u8],
        server_random: &[u8],
    ) -> Result<Buf, String> {
        self.derive(
            pre_master_secret,
            "master secret",
            &[client_random, server_random],
            MASTER_SECRET_LEN,
        )
    }

    /// Extended Master Secret (RFC 7627).
    ///
    /// master_secret = PRF(pre_master_secret, "extended master secret", session_hash)
    pub fn extended_master_secret(
        &self,
        pre_master_secret: &[u8],
        session_hash: &[u8],
    ) -> Result<Buf, String> {
        if self.prf == Prf::Ssl3 {
            return Err("extended master secret is not defined for SSL 3.0".to_string());
        }
        self.derive(
            pre_master_secret,
            "extended master secret",
            &[session_hash],
            MASTER_SECRET_LEN,
        )
    }

    /// Expand the master secret into the connection's key block.
    pub fn key_block(
        &self,
        master_secret: &[u8],
        client_random: &[u8],
        server_random: &[u8],
        params: &SuiteParams,
        version: ProtocolVersion,
    ) -> Result<KeyBlock, String> {
        let mac_len = params.mac.mac_len();
        let key_len = params.bulk.key_len();
        let iv_len = params.bulk.fixed_iv_len(version);
        let total = 2 * (mac_len + key_len + iv_len);

        // The seed is server_random + client_random, the reverse of the master secret.
        let block = self.derive(
            master_secret,
            "key expansion",
            &[server_random, client_random],
            total,
        )?;

        let mut pos = 0;
        let mut take = |n: usize| {
            let out = Buf::from_slice(&block[pos..pos + n]);
            pos += n;
            out
        };

        Ok(KeyBlock {
            client_write_mac_key: take(mac_len),
            server_write_mac_key: take(mac_len),
            client_write_key: take(key_len),
            server_write_key: take(key_len),
            client_write_iv: take(iv_len),
            server_write_iv: take(iv_len),
        })
    }

    /// TLS Finished verify_data.
    ///
    /// `handshake_hash` is the transcript digest for the version: MD5 || SHA-1
    /// before TLS 1.2, the suite hash from TLS 1.2.
    pub fn verify_data(
        &self,
        master_secret: &[u8],
        is_client: bool,
        handshake_hash: &[u8],
    ) -> Result<Buf, String> {
        let label = if is_client {
            "client finished"
        } else {
            "server finished"
        };
        self.derive(master_secret, label, &[handshake_hash], VERIFY_DATA_LEN)
    }

    /// Keying material exporter (RFC 5705).
    pub fn export(
        &self,
        master_secret: &[u8],
        label: &str,
        client_random: &[u8],
        server_random: &[u8],
        context: Option<&[u8]>,
        len: usize,
    ) -> Result<Buf, String> {
        let mut ctx = Buf::new();
        if let Some(context) = context {
            if context.len() > 0xFFFF {
                return Err("exporter context too long".to_string());
            }
            ctx.extend_from_slice(&(context.len() as u16).to_be_bytes());
            ctx.extend_from_slice(context);
        }
        self.derive(master_secret, label, &[client_random, server_random, &ctx], len)
    }
}

/// SSL 3.0 Finished over the raw handshake messages.
///
/// ```text
/// md5_hash = MD5(master_secret + pad2 + MD5(handshake_messages + Sender + master_secret + pad1));
/// sha_hash = SHA(master_secret + pad2 + SHA(handshake_messages + Sender + master_secret + pad1));
/// ```
pub fn ssl3_finished(
    provider: &CryptoProvider,
    master_secret: &[u8],
    is_client: bool,
    handshake_messages: &[u8],
) -> Result<Buf, String> {
    use crate::types::HashAlgorithm::{MD5, SHA1};

    let sender = if is_client {
        SSL3_SENDER_CLIENT
    } else {
        SSL3_SENDER_SERVER
    };

    let mut out = Buf::new();
    for (hash, pad_len) in [(MD5, 48), (SHA1, 40)] {
        let mut inner = provider.hash_provider.create_hash(hash)?;
        inner.update(handshake_messages);
        inner.update(sender);
        inner.update(master_secret);
        inner.update(&[0x36; 48][..pad_len]);
        let mut inner_hash = Buf::new();
        inner.clone_and_finalize(&mut inner_hash);

        let mut outer = provider.hash_provider.create_hash(hash)?;
        outer.update(master_secret);
        outer.update(&[0x5c; 48][..pad_len]);
        outer.update(&inner_hash);
        let mut outer_hash = Buf::new();
        outer.clone_and_finalize(&mut outer_hash);

        out.extend_from_slice(&outer_hash);
    }
    Ok(out)
}

/// Keys expanded from the master secret, in key block order.
#[derive(Debug)]
pub struct KeyBlock {
    pub client_write_mac_key: Buf,
    pub server_write_mac_key: Buf,
    pub client_write_key: Buf,
    pub server_write_key: Buf,
    pub client_write_iv: Buf,
    pub server_write_iv: Buf,
}

impl Drop for KeyBlock {
    fn drop(&mut self) {
        use zeroize::Zeroize;
        self.client_write_mac_key.zeroize();
        self.server_write_mac_key.zeroize();
        self.client_write_key.zeroize();
        self.server_write_key.zeroize();
        self.client_write_iv.zeroize();
        self.server_write_iv.zeroize();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::rust_crypto::default_provider;
    use crate::types::CipherSuite;

    fn params(suite: CipherSuite) -> SuiteParams {
        suite.params().unwrap()
    }

    #[test]
    fn gcm_key_block_layout() {
        let provider = default_provider();
        let p = params(CipherSuite::ECDHE_ECDSA_AES128_GCM_SHA256);
        let kdf = LegacyKdf::new(&provider, ProtocolVersion::TLS1_2, &p);

        let ms = kdf.master_secret(&[1; 48], &[2; 32], &[3; 32]).unwrap();
        assert_eq!(ms.len(), MASTER_SECRET_LEN);

        let kb = kdf
            .key_block(&ms, &[2; 32], &[3; 32], &p, ProtocolVersion::TLS1_2)
            .unwrap();
        assert!(kb.client_write_mac_key.is_empty());
        assert_eq!(kb.client_write_key.len(), 16);
        assert_eq!(kb.server_write_key.len(), 16);
        assert_eq!(kb.client_write_iv.len(), 4);
        assert_ne!(kb.client_write_key, kb.server_write_key);
    }

    #[test]
    fn cbc_key_block_sizes_follow_version() {
        let provider = default_provider();
        let p = params(CipherSuite::RSA_AES256_CBC_SHA);

        let kdf = LegacyKdf::new(&provider, ProtocolVersion::TLS1_0, &p);
        let kb = kdf
            .key_block(&[5; 48], &[2; 32], &[3; 32], &p, ProtocolVersion::TLS1_0)
            .unwrap();
        assert_eq!(kb.client_write_mac_key.len(), 20);
        assert_eq!(kb.client_write_key.len(), 32);
        assert_eq!(kb.client_write_iv.len(), 16);

        // Explicit per-record IVs from TLS 1.1 on.
        let kdf = LegacyKdf::new(&provider, ProtocolVersion::TLS1_1, &p);
        let kb = kdf
            .key_block(&[5; 48], &[2; 32], &[3; 32], &p, ProtocolVersion::TLS1_1)
            .unwrap();
        assert!(kb.client_write_iv.is_empty());
    }

    #[test]
    fn extended_master_secret_differs_from_classic() {
        let provider = default_provider();
        let p = params(CipherSuite::ECDHE_RSA_AES128_GCM_SHA256);
        let kdf = LegacyKdf::new(&provider, ProtocolVersion::TLS1_2, &p);

        let classic = kdf.master_secret(&[1; 48], &[2; 32], &[3; 32]).unwrap();
        let ems = kdf.extended_master_secret(&[1; 48], &[4; 32]).unwrap();
        assert_eq!(ems.len(), MASTER_SECRET_LEN);
        assert_ne!(classic, ems);

        let ssl3 = LegacyKdf::new(&provider, ProtocolVersion::SSL3_0, &p);
        assert!(ssl3.extended_master_secret(&[1; 48], &[4; 32]).is_err());
    }

    #[test]
    fn finished_is_role_specific() {
        let provider = default_provider();
        let p = params(CipherSuite::ECDHE_RSA_AES128_GCM_SHA256);
        let kdf = LegacyKdf::new(&provider, ProtocolVersion::TLS1_2, &p);

        let client = kdf.verify_data(&[9; 48], true, &[1; 32]).unwrap();
        let server = kdf.verify_data(&[9; 48], false, &[1; 32]).unwrap();
        assert_eq!(client.len(), VERIFY_DATA_LEN);
        assert_ne!(client, server);

        let ssl3 = ssl3_finished(&provider, &[9; 48], true, b"messages").unwrap();
        assert_eq!(ssl3.len(), 36);
    }

    #[test]
    fn exporter_binds_context() {
        let provider = default_provider();
        let p = params(CipherSuite::ECDHE_RSA_AES128_GCM_SHA256);
        let kdf = LegacyKdf::new(&provider, ProtocolVersion::TLS1_2, &p);

        let a = kdf.export(&[9; 48], "EXPORTER-test", &[1; 32], &[2; 32], None, 32).unwrap();
        let b = kdf
            .export(&[9; 48], "EXPORTER-test", &[1; 32], &[2; 32], Some(&[]), 32)
            .unwrap();
        assert_ne!(a, b);
    }
}
