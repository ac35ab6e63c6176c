use nom::number::complete::be_u16;
use nom::IResult;

use crate::buffer::Buf;

/// Hash algorithms used by PRFs, HKDF and transcript hashes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HashAlgorithm {
    MD5,
    SHA1,
    SHA256,
    SHA384,
    SHA512,
}

impl HashAlgorithm {
    pub fn output_len(&self) -> usize {
        match self {
            HashAlgorithm::MD5 => 16,
            HashAlgorithm::SHA1 => 20,
            HashAlgorithm::SHA256 => 32,
            HashAlgorithm::SHA384 => 48,
            HashAlgorithm::SHA512 => 64,
        }
    }
}

/// Key type of a signature or certificate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignatureAlgorithm {
    Rsa,
    Ecdsa,
}

/// TLS SignatureScheme (TLS 1.3) / SignatureAndHashAlgorithm (TLS 1.2).
///
/// Both encode as two bytes, so one type covers the two.
#[allow(non_camel_case_types)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignatureScheme {
    RSA_PKCS1_SHA1,
    ECDSA_SHA1,
    RSA_PKCS1_SHA256,
    RSA_PKCS1_SHA384,
    ECDSA_SECP256R1_SHA256,
    ECDSA_SECP384R1_SHA384,
    RSA_PSS_RSAE_SHA256,
    ED25519,
    Unknown(u16),
}

impl SignatureScheme {
    pub fn from_u16(value: u16) -> Self {
        match value {
            0x0201 => SignatureScheme::RSA_PKCS1_SHA1,
            0x0203 => SignatureScheme::ECDSA_SHA1,
            0x0401 => SignatureScheme::RSA_PKCS1_SHA256,
            0x0501 => SignatureScheme::RSA_PKCS1_SHA384,
            0x0403 => SignatureScheme::ECDSA_SECP256R1_SHA256,
            0x0503 => SignatureScheme::ECDSA_SECP384R1_SHA384,
            0x0804 => SignatureScheme::RSA_PSS_RSAE_SHA256,
            0x0807 => SignatureScheme::ED25519,
            _ => SignatureScheme::Unknown(value),
        }
    }

    pub fn as_u16(&self) -> u16 {
        match self {
            SignatureScheme::RSA_PKCS1_SHA1 => 0x0201,
            SignatureScheme::ECDSA_SHA1 => 0x0203,
            SignatureScheme::RSA_PKCS1_SHA256 => 0x0401,
            SignatureScheme::RSA_PKCS1_SHA384 => 0x0501,
            SignatureScheme::ECDSA_SECP256R1_SHA256 => 0x0403,
            SignatureScheme::ECDSA_SECP384R1_SHA384 => 0x0503,
            SignatureScheme::RSA_PSS_RSAE_SHA256 => 0x0804,
            SignatureScheme::ED25519 => 0x0807,
            SignatureScheme::Unknown(value) => *value,
        }
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], SignatureScheme> {
        let (input, v) = be_u16(input)?;
        Ok((input, Self::from_u16(v)))
    }

    pub fn serialize(&self, output: &mut Buf) {
        output.extend_from_slice(&self.as_u16().to_be_bytes());
    }

    pub fn algorithm(&self) -> Option<SignatureAlgorithm> {
        match self {
            SignatureScheme::RSA_PKCS1_SHA1
            | SignatureScheme::RSA_PKCS1_SHA256
            | SignatureScheme::RSA_PKCS1_SHA384
            | SignatureScheme::RSA_PSS_RSAE_SHA256 => Some(SignatureAlgorithm::Rsa),
            SignatureScheme::ECDSA_SHA1
            | SignatureScheme::ECDSA_SECP256R1_SHA256
            | SignatureScheme::ECDSA_SECP384R1_SHA384 => Some(SignatureAlgorithm::Ecdsa),
            _ => None,
        }
    }

    pub fn hash(&self) -> Option<HashAlgorithm> {
        match self {
            SignatureScheme::RSA_PKCS1_SHA1 | SignatureScheme::ECDSA_SHA1 => {
                Some(HashAlgorithm::SHA1)
            }
            SignatureScheme::RSA_PKCS1_SHA256
            | SignatureScheme::ECDSA_SECP256R1_SHA256
            | SignatureScheme::RSA_PSS_RSAE_SHA256 => Some(HashAlgorithm::SHA256),
            SignatureScheme::RSA_PKCS1_SHA384 | SignatureScheme::ECDSA_SECP384R1_SHA384 => {
                Some(HashAlgorithm::SHA384)
            }
            _ => None,
        }
    }

    /// TLS 1.3 forbids PKCS#1 v1.5 and SHA-1 in handshake signatures.
    pub fn usable_in_tls13(&self) -> bool {
        matches!(
            self,
            SignatureScheme::ECDSA_SECP256R1_SHA256
                | SignatureScheme::ECDSA_SECP384R1_SHA384
                | SignatureScheme::RSA_PSS_RSAE_SHA256
                | SignatureScheme::ED25519
        )
    }
}
