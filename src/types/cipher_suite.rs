use nom::number::complete::be_u16;
use nom::IResult;

use super::{HashAlgorithm, ProtocolVersion, SignatureAlgorithm};
use crate::buffer::Buf;

/// Cipher suites known to the engine.
///
/// Whether a suite can actually be negotiated depends on the crypto provider
/// having an implementation of its bulk cipher.
#[allow(non_camel_case_types)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CipherSuite {
    TLS13_AES_128_GCM_SHA256,
    TLS13_AES_256_GCM_SHA384,
    TLS13_CHACHA20_POLY1305_SHA256,
    ECDHE_ECDSA_AES128_GCM_SHA256,
    ECDHE_ECDSA_AES256_GCM_SHA384,
    ECDHE_RSA_AES128_GCM_SHA256,
    ECDHE_RSA_AES256_GCM_SHA384,
    DHE_RSA_AES128_GCM_SHA256,
    DHE_RSA_AES256_GCM_SHA384,
    RSA_AES128_GCM_SHA256,
    RSA_AES256_GCM_SHA384,
    ECDHE_ECDSA_AES128_CBC_SHA,
    RSA_AES128_CBC_SHA256,
    RSA_AES128_CBC_SHA,
    RSA_AES256_CBC_SHA,
    /// Secure renegotiation signal (RFC 5746).
    EMPTY_RENEGOTIATION_INFO_SCSV,
    /// Downgrade signal (RFC 7507).
    FALLBACK_SCSV,
    Unknown(u16),
}

/// How the pre-master secret of a suite is established and authenticated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyExchangeAlgorithm {
    Rsa,
    DheRsa,
    EcdheEcdsa,
    EcdheRsa,
    /// TLS 1.3 suites leave key exchange to key_share.
    Tls13,
}

impl KeyExchangeAlgorithm {
    /// Key type the server certificate must carry.
    pub fn server_key(&self) -> Option<SignatureAlgorithm> {
        match self {
            KeyExchangeAlgorithm::Rsa
            | KeyExchangeAlgorithm::DheRsa
            | KeyExchangeAlgorithm::EcdheRsa => Some(SignatureAlgorithm::Rsa),
            KeyExchangeAlgorithm::EcdheEcdsa => Some(SignatureAlgorithm::Ecdsa),
            KeyExchangeAlgorithm::Tls13 => None,
        }
    }

    /// Whether the server sends a signed ServerKeyExchange.
    pub fn has_server_key_exchange(&self) -> bool {
        matches!(
            self,
            KeyExchangeAlgorithm::DheRsa
                | KeyExchangeAlgorithm::EcdheEcdsa
                | KeyExchangeAlgorithm::EcdheRsa
        )
    }

    pub fn is_ecdhe(&self) -> bool {
        matches!(
            self,
            KeyExchangeAlgorithm::EcdheEcdsa | KeyExchangeAlgorithm::EcdheRsa
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BulkCipher {
    Aes128Gcm,
    Aes256Gcm,
    ChaCha20Poly1305,
    Aes128Cbc,
    Aes256Cbc,
}

impl BulkCipher {
    pub fn key_len(&self) -> usize {
        match self {
            BulkCipher::Aes128Gcm | BulkCipher::Aes128Cbc => 16,
            BulkCipher::Aes256Gcm | BulkCipher::Aes256Cbc | BulkCipher::ChaCha20Poly1305 => 32,
        }
    }

    pub fn is_aead(&self) -> bool {
        !matches!(self, BulkCipher::Aes128Cbc | BulkCipher::Aes256Cbc)
    }

    pub fn tag_len(&self) -> usize {
        if self.is_aead() {
            16
        } else {
            0
        }
    }

    /// IV bytes taken from the key block (TLS 1.2 and earlier) or expanded
    /// with the "iv" label (TLS 1.3).
    pub fn fixed_iv_len(&self, version: ProtocolVersion) -> usize {
        let version = version.tls_equivalent();
        match self {
            BulkCipher::ChaCha20Poly1305 => 12,
            BulkCipher::Aes128Gcm | BulkCipher::Aes256Gcm => {
                if version.is_tls13() {
                    12
                } else {
                    4
                }
            }
            // Implicit CBC IVs only exist before TLS 1.1.
            BulkCipher::Aes128Cbc | BulkCipher::Aes256Cbc => {
                if version.newer_than(ProtocolVersion::TLS1_0) {
                    0
                } else {
                    16
                }
            }
        }
    }

    /// Per-record explicit IV/nonce length.
    pub fn record_iv_len(&self, version: ProtocolVersion) -> usize {
        let version = version.tls_equivalent();
        match self {
            BulkCipher::Aes128Gcm | BulkCipher::Aes256Gcm if !version.is_tls13() => 8,
            BulkCipher::Aes128Cbc | BulkCipher::Aes256Cbc
                if version.newer_than(ProtocolVersion::TLS1_0) =>
            {
                16
            }
            _ => 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MacAlgorithm {
    Aead,
    HmacSha1,
    HmacSha256,
}

impl MacAlgorithm {
    pub fn mac_len(&self) -> usize {
        match self {
            MacAlgorithm::Aead => 0,
            MacAlgorithm::HmacSha1 => 20,
            MacAlgorithm::HmacSha256 => 32,
        }
    }

    /// Hash under the record MAC, `None` for AEAD suites.
    pub fn hash(&self) -> Option<HashAlgorithm> {
        match self {
            MacAlgorithm::Aead => None,
            MacAlgorithm::HmacSha1 => Some(HashAlgorithm::SHA1),
            MacAlgorithm::HmacSha256 => Some(HashAlgorithm::SHA256),
        }
    }
}

/// Parameters of a (non-signaling) cipher suite.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SuiteParams {
    pub key_exchange: KeyExchangeAlgorithm,
    pub bulk: BulkCipher,
    pub mac: MacAlgorithm,
    /// Hash for the TLS 1.2 PRF, HKDF and the transcript.
    pub hash: HashAlgorithm,
    pub min_version: ProtocolVersion,
    pub max_version: ProtocolVersion,
}

impl CipherSuite {
    pub fn from_u16(value: u16) -> Self {
        match value {
            0x1301 => CipherSuite::TLS13_AES_128_GCM_SHA256,
            0x1302 => CipherSuite::TLS13_AES_256_GCM_SHA384,
            0x1303 => CipherSuite::TLS13_CHACHA20_POLY1305_SHA256,
            0xC02B => CipherSuite::ECDHE_ECDSA_AES128_GCM_SHA256,
            0xC02C => CipherSuite::ECDHE_ECDSA_AES256_GCM_SHA384,
            0xC02F => CipherSuite::ECDHE_RSA_AES128_GCM_SHA256,
            0xC030 => CipherSuite::ECDHE_RSA_AES256_GCM_SHA384,
            0x009E => CipherSuite::DHE_RSA_AES128_GCM_SHA256,
            0x009F => CipherSuite::DHE_RSA_AES256_GCM_SHA384,
            0x009C => CipherSuite::RSA_AES128_GCM_SHA256,
            0x009D => CipherSuite::RSA_AES256_GCM_SHA384,
            0xC009 => CipherSuite::ECDHE_ECDSA_AES128_CBC_SHA,
            0x003C => CipherSuite::RSA_AES128_CBC_SHA256,
            0x002F => CipherSuite::RSA_AES128_CBC_SHA,
            0x0035 => CipherSuite::RSA_AES256_CBC_SHA,
            0x00FF => CipherSuite::EMPTY_RENEGOTIATION_INFO_SCSV,
            0x5600 => CipherSuite::FALLBACK_SCSV,
            _ => CipherSuite::Unknown(value),
        }
    }

    pub fn as_u16(&self) -> u16 {
        match self {
            CipherSuite::TLS13_AES_128_GCM_SHA256 => 0x1301,
            CipherSuite::TLS13_AES_256_GCM_SHA384 => 0x1302,
            CipherSuite::TLS13_CHACHA20_POLY1305_SHA256 => 0x1303,
            CipherSuite::ECDHE_ECDSA_AES128_GCM_SHA256 => 0xC02B,
            CipherSuite::ECDHE_ECDSA_AES256_GCM_SHA384 => 0xC02C,
            CipherSuite::ECDHE_RSA_AES128_GCM_SHA256 => 0xC02F,
            CipherSuite::ECDHE_RSA_AES256_GCM_SHA384 => 0xC030,
            CipherSuite::DHE_RSA_AES128_GCM_SHA256 => 0x009E,
            CipherSuite::DHE_RSA_AES256_GCM_SHA384 => 0x009F,
            CipherSuite::RSA_AES128_GCM_SHA256 => 0x009C,
            CipherSuite::RSA_AES256_GCM_SHA384 => 0x009D,
            CipherSuite::ECDHE_ECDSA_AES128_CBC_SHA => 0xC009,
            CipherSuite::RSA_AES128_CBC_SHA256 => 0x003C,
            CipherSuite::RSA_AES128_CBC_SHA => 0x002F,
            CipherSuite::RSA_AES256_CBC_SHA => 0x0035,
            CipherSuite::EMPTY_RENEGOTIATION_INFO_SCSV => 0x00FF,
            CipherSuite::FALLBACK_SCSV => 0x5600,
            CipherSuite::Unknown(value) => *value,
        }
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], CipherSuite> {
        let (input, v) = be_u16(input)?;
        Ok((input, Self::from_u16(v)))
    }

    pub fn serialize(&self, output: &mut Buf) {
        output.extend_from_slice(&self.as_u16().to_be_bytes());
    }

    pub fn params(&self) -> Option<SuiteParams> {
        use BulkCipher::*;
        use CipherSuite::*;
        use HashAlgorithm::*;
        use KeyExchangeAlgorithm::*;
        use ProtocolVersion::{SSL3_0, TLS1_0, TLS1_2, TLS1_3};

        let (key_exchange, bulk, mac, hash, min_version, max_version) = match self {
            TLS13_AES_128_GCM_SHA256 => (Tls13, Aes128Gcm, MacAlgorithm::Aead, SHA256, TLS1_3, TLS1_3),
            TLS13_AES_256_GCM_SHA384 => (Tls13, Aes256Gcm, MacAlgorithm::Aead, SHA384, TLS1_3, TLS1_3),
            TLS13_CHACHA20_POLY1305_SHA256 => {
                (Tls13, ChaCha20Poly1305, MacAlgorithm::Aead, SHA256, TLS1_3, TLS1_3)
            }
            ECDHE_ECDSA_AES128_GCM_SHA256 => {
                (EcdheEcdsa, Aes128Gcm, MacAlgorithm::Aead, SHA256, TLS1_2, TLS1_2)
            }
            ECDHE_ECDSA_AES256_GCM_SHA384 => {
                (EcdheEcdsa, Aes256Gcm, MacAlgorithm::Aead, SHA384, TLS1_2, TLS1_2)
            }
            ECDHE_RSA_AES128_GCM_SHA256 => (EcdheRsa, Aes128Gcm, MacAlgorithm::Aead, SHA256, TLS1_2, TLS1_2),
            ECDHE_RSA_AES256_GCM_SHA384 => (EcdheRsa, Aes256Gcm, MacAlgorithm::Aead, SHA384, TLS1_2, TLS1_2),
            DHE_RSA_AES128_GCM_SHA256 => (DheRsa, Aes128Gcm, MacAlgorithm::Aead, SHA256, TLS1_2, TLS1_2),
            DHE_RSA_AES256_GCM_SHA384 => (DheRsa, Aes256Gcm, MacAlgorithm::Aead, SHA384, TLS1_2, TLS1_2),
            RSA_AES128_GCM_SHA256 => (Rsa, Aes128Gcm, MacAlgorithm::Aead, SHA256, TLS1_2, TLS1_2),
            RSA_AES256_GCM_SHA384 => (Rsa, Aes256Gcm, MacAlgorithm::Aead, SHA384, TLS1_2, TLS1_2),
            ECDHE_ECDSA_AES128_CBC_SHA => {
                (EcdheEcdsa, Aes128Cbc, MacAlgorithm::HmacSha1, SHA256, TLS1_0, TLS1_2)
            }
            RSA_AES128_CBC_SHA256 => (Rsa, Aes128Cbc, MacAlgorithm::HmacSha256, SHA256, TLS1_2, TLS1_2),
            RSA_AES128_CBC_SHA => (Rsa, Aes128Cbc, MacAlgorithm::HmacSha1, SHA256, SSL3_0, TLS1_2),
            RSA_AES256_CBC_SHA => (Rsa, Aes256Cbc, MacAlgorithm::HmacSha1, SHA256, SSL3_0, TLS1_2),
            EMPTY_RENEGOTIATION_INFO_SCSV | FALLBACK_SCSV | Unknown(_) => return None,
        };

        Some(SuiteParams {
            key_exchange,
            bulk,
            mac,
            hash,
            min_version,
            max_version,
        })
    }

    /// Signaling values that are not real suites.
    pub fn is_signaling(&self) -> bool {
        matches!(
            self,
            CipherSuite::EMPTY_RENEGOTIATION_INFO_SCSV | CipherSuite::FALLBACK_SCSV
        )
    }

    pub fn is_tls13(&self) -> bool {
        self.params()
            .map(|p| p.key_exchange == KeyExchangeAlgorithm::Tls13)
            .unwrap_or(false)
    }

    /// Whether the suite may be negotiated under `version`.
    pub fn supports_version(&self, version: ProtocolVersion) -> bool {
        let Some(p) = self.params() else {
            return false;
        };
        let v = version.tls_equivalent();
        !v.newer_than(p.max_version) && !p.min_version.newer_than(v) && v.is_known()
    }

    pub fn hash_algorithm(&self) -> Option<HashAlgorithm> {
        self.params().map(|p| p.hash)
    }

    /// Every non-signaling suite, in default preference order.
    pub fn all() -> &'static [CipherSuite] {
        &[
            CipherSuite::TLS13_AES_128_GCM_SHA256,
            CipherSuite::TLS13_AES_256_GCM_SHA384,
            CipherSuite::TLS13_CHACHA20_POLY1305_SHA256,
            CipherSuite::ECDHE_ECDSA_AES128_GCM_SHA256,
            CipherSuite::ECDHE_ECDSA_AES256_GCM_SHA384,
            CipherSuite::ECDHE_RSA_AES128_GCM_SHA256,
            CipherSuite::ECDHE_RSA_AES256_GCM_SHA384,
            CipherSuite::DHE_RSA_AES128_GCM_SHA256,
            CipherSuite::DHE_RSA_AES256_GCM_SHA384,
            CipherSuite::RSA_AES128_GCM_SHA256,
            CipherSuite::RSA_AES256_GCM_SHA384,
            CipherSuite::ECDHE_ECDSA_AES128_CBC_SHA,
            CipherSuite::RSA_AES128_CBC_SHA256,
            CipherSuite::RSA_AES128_CBC_SHA,
            CipherSuite::RSA_AES256_CBC_SHA,
        ]
    }
}
