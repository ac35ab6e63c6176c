//! Record ciphers using RustCrypto: AES-GCM and AES-CBC.

use aes::{Aes128, Aes256};
use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::{AeadInPlace, KeyInit};
use aes_gcm::{Aes128Gcm, Aes256Gcm, Key};
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, BlockSizeUser, InnerIvInit};

use super::super::{CbcCipher, Cipher, SupportedCipher};
use crate::buffer::Buf;
use crate::types::BulkCipher;

/// AES-GCM cipher implementation using RustCrypto.
enum AesGcm {
    Aes128(Box<Aes128Gcm>),
    Aes256(Box<Aes256Gcm>),
}

impl std::fmt::Debug for AesGcm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AesGcm::Aes128(_) => f.debug_tuple("AesGcm::Aes128").finish(),
            AesGcm::Aes256(_) => f.debug_tuple("AesGcm::Aes256").finish(),
        }
    }
}

impl AesGcm {
    fn new(key: &[u8]) -> Result<Self, String> {
        match key.len() {
            16 => {
                let key = Key::<Aes128Gcm>::from_slice(key);
                Ok(AesGcm::Aes128(Box::new(Aes128Gcm::new(key))))
            }
            32 => {
                let key = Key::<Aes256Gcm>::from_slice(key);
                Ok(AesGcm::Aes256(Box::new(Aes256Gcm::new(key))))
            }
            _ => Err(format!("Invalid key size for AES-GCM: {}", key.len())),
        }
    }
}

fn check_nonce(nonce: &[u8]) -> Result<(), String> {
    if nonce.len() != 12 {
        return Err(format!(
            "Invalid nonce length: expected 12, got {}",
            nonce.len()
        ));
    }
    Ok(())
}

impl Cipher for AesGcm {
    fn encrypt(&mut self, data: &mut Buf, aad: &[u8], nonce: &[u8]) -> Result<(), String> {
        check_nonce(nonce)?;
        let nonce = GenericArray::from_slice(nonce);
        match self {
            AesGcm::Aes128(cipher) => cipher.encrypt_in_place(nonce, aad, data),
            AesGcm::Aes256(cipher) => cipher.encrypt_in_place(nonce, aad, data),
        }
        .map_err(|_| "AES-GCM encryption failed".to_string())
    }

    fn decrypt(&mut self, data: &mut Buf, aad: &[u8], nonce: &[u8]) -> Result<(), String> {
        if data.len() < 16 {
            return Err(format!("Ciphertext too short: {}", data.len()));
        }
        check_nonce(nonce)?;
        let nonce = GenericArray::from_slice(nonce);
        // decrypt_in_place strips the tag
        match self {
            AesGcm::Aes128(cipher) => cipher.decrypt_in_place(nonce, aad, data),
            AesGcm::Aes256(cipher) => cipher.decrypt_in_place(nonce, aad, data),
        }
        .map_err(|_| "AES-GCM decryption failed".to_string())
    }
}

#[derive(Debug)]
struct Aes128GcmCipher;

impl SupportedCipher for Aes128GcmCipher {
    fn bulk(&self) -> BulkCipher {
        BulkCipher::Aes128Gcm
    }

    fn create_cipher(&self, key: &[u8]) -> Result<Box<dyn Cipher>, String> {
        if key.len() != 16 {
            return Err(format!("AES-128-GCM needs a 16 byte key, got {}", key.len()));
        }
        Ok(Box::new(AesGcm::new(key)?))
    }
}

#[derive(Debug)]
struct Aes256GcmCipher;

impl SupportedCipher for Aes256GcmCipher {
    fn bulk(&self) -> BulkCipher {
        BulkCipher::Aes256Gcm
    }

    fn create_cipher(&self, key: &[u8]) -> Result<Box<dyn Cipher>, String> {
        if key.len() != 32 {
            return Err(format!("AES-256-GCM needs a 32 byte key, got {}", key.len()));
        }
        Ok(Box::new(AesGcm::new(key)?))
    }
}

const AES_BLOCK_LEN: usize = 16;

/// AES in CBC mode. The key is expanded once, each call chains from its own IV.
enum AesCbc {
    Aes128(Box<Aes128>),
    Aes256(Box<Aes256>),
}

impl std::fmt::Debug for AesCbc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AesCbc::Aes128(_) => f.debug_tuple("AesCbc::Aes128").finish(),
            AesCbc::Aes256(_) => f.debug_tuple("AesCbc::Aes256").finish(),
        }
    }
}

impl AesCbc {
    fn new(key: &[u8]) -> Result<Self, String> {
        let invalid = |_| format!("Invalid key size for AES-CBC: {}", key.len());
        match key.len() {
            16 => Ok(AesCbc::Aes128(Box::new(
                Aes128::new_from_slice(key).map_err(invalid)?,
            ))),
            32 => Ok(AesCbc::Aes256(Box::new(
                Aes256::new_from_slice(key).map_err(invalid)?,
            ))),
            _ => Err(format!("Invalid key size for AES-CBC: {}", key.len())),
        }
    }
}

fn check_blocks(iv: &[u8], data: &[u8]) -> Result<(), String> {
    if iv.len() != AES_BLOCK_LEN {
        return Err(format!("Invalid IV length: {}", iv.len()));
    }
    if data.len() % AES_BLOCK_LEN != 0 {
        return Err(format!("Data is not block aligned: {}", data.len()));
    }
    Ok(())
}

fn encrypt_blocks<M: BlockEncryptMut>(mut mode: M, data: &mut [u8]) {
    for block in data.chunks_exact_mut(<M as BlockSizeUser>::block_size()) {
        mode.encrypt_block_mut(GenericArray::from_mut_slice(block));
    }
}

fn decrypt_blocks<M: BlockDecryptMut>(mut mode: M, data: &mut [u8]) {
    for block in data.chunks_exact_mut(<M as BlockSizeUser>::block_size()) {
        mode.decrypt_block_mut(GenericArray::from_mut_slice(block));
    }
}

fn bad_iv<E>(_: E) -> String {
    "Invalid IV for AES-CBC".to_string()
}

impl CbcCipher for AesCbc {
    fn block_len(&self) -> usize {
        AES_BLOCK_LEN
    }

    fn encrypt(&mut self, iv: &[u8], data: &mut [u8]) -> Result<(), String> {
        check_blocks(iv, data)?;
        match self {
            AesCbc::Aes128(key) => encrypt_blocks(
                cbc::Encryptor::<Aes128>::inner_iv_slice_init((**key).clone(), iv).map_err(bad_iv)?,
                data,
            ),
            AesCbc::Aes256(key) => encrypt_blocks(
                cbc::Encryptor::<Aes256>::inner_iv_slice_init((**key).clone(), iv).map_err(bad_iv)?,
                data,
            ),
        }
        Ok(())
    }

    fn decrypt(&mut self, iv: &[u8], data: &mut [u8]) -> Result<(), String> {
        check_blocks(iv, data)?;
        match self {
            AesCbc::Aes128(key) => decrypt_blocks(
                cbc::Decryptor::<Aes128>::inner_iv_slice_init((**key).clone(), iv).map_err(bad_iv)?,
                data,
            ),
            AesCbc::Aes256(key) => decrypt_blocks(
                cbc::Decryptor::<Aes256>::inner_iv_slice_init((**key).clone(), iv).map_err(bad_iv)?,
                data,
            ),
        }
        Ok(())
    }
}

/// AES-CBC for one key size.
#[derive(Debug)]
struct AesCbcCipher {
    bulk: BulkCipher,
}

impl SupportedCipher for AesCbcCipher {
    fn bulk(&self) -> BulkCipher {
        self.bulk
    }

    fn create_cipher(&self, _key: &[u8]) -> Result<Box<dyn Cipher>, String> {
        Err(format!("{:?} is not an AEAD", self.bulk))
    }

    fn create_cbc_cipher(&self, key: &[u8]) -> Result<Box<dyn CbcCipher>, String> {
        if key.len() != self.bulk.key_len() {
            return Err(format!(
                "{:?} needs a {} byte key, got {}",
                self.bulk,
                self.bulk.key_len(),
                key.len()
            ));
        }
        Ok(Box::new(AesCbc::new(key)?))
    }
}

static AES_128_GCM: Aes128GcmCipher = Aes128GcmCipher;
static AES_256_GCM: Aes256GcmCipher = Aes256GcmCipher;
static AES_128_CBC: AesCbcCipher = AesCbcCipher {
    bulk: BulkCipher::Aes128Cbc,
};
static AES_256_CBC: AesCbcCipher = AesCbcCipher {
    bulk: BulkCipher::Aes256Cbc,
};

/// All record ciphers implemented by this provider.
pub(super) static ALL_CIPHERS: &[&dyn SupportedCipher] =
    &[&AES_128_GCM, &AES_256_GCM, &AES_128_CBC, &AES_256_CBC];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seal_open() {
        let mut c = AES_128_GCM.create_cipher(&[7u8; 16]).unwrap();
        let nonce = [1u8; 12];
        let mut data = Buf::from_slice(b"hello");
        c.encrypt(&mut data, b"aad", &nonce).unwrap();
        assert_eq!(data.len(), 5 + 16);

        let mut tampered = data.clone();
        tampered[0] ^= 1;
        assert!(c.decrypt(&mut tampered, b"aad", &nonce).is_err());

        c.decrypt(&mut data, b"aad", &nonce).unwrap();
        assert_eq!(&data[..], b"hello");
    }

    #[test]
    fn rejects_wrong_key_size() {
        assert!(AES_256_GCM.create_cipher(&[0u8; 16]).is_err());
        assert!(AES_256_CBC.create_cbc_cipher(&[0u8; 16]).is_err());
        assert!(AES_128_CBC.create_cipher(&[0u8; 16]).is_err());
    }

    #[test]
    fn cbc_sp800_38a_f2_1() {
        // NIST SP 800-38A F.2.1, first two blocks.
        let key = [
            0x2b, 0x7e, 0x15, 0x16, 0x28, 0xae, 0xd2, 0xa6, 0xab, 0xf7, 0x15, 0x88, 0x09, 0xcf,
            0x4f, 0x3c,
        ];
        let iv: Vec<u8> = (0u8..16).collect();
        let plaintext = [
            0x6b, 0xc1, 0xbe, 0xe2, 0x2e, 0x40, 0x9f, 0x96, 0xe9, 0x3d, 0x7e, 0x11, 0x73, 0x93,
            0x17, 0x2a, 0xae, 0x2d, 0x8a, 0x57, 0x1e, 0x03, 0xac, 0x9c, 0x9e, 0xb7, 0x6f, 0xac,
            0x45, 0xaf, 0x8e, 0x51,
        ];
        let expected = [
            0x76, 0x49, 0xab, 0xac, 0x81, 0x19, 0xb2, 0x46, 0xce, 0xe9, 0x8e, 0x9b, 0x12, 0xe9,
            0x19, 0x7d, 0x50, 0x86, 0xcb, 0x9b, 0x50, 0x72, 0x19, 0xee, 0x95, 0xdb, 0x11, 0x3a,
            0x91, 0x76, 0x78, 0xb2,
        ];

        let mut c = AES_128_CBC.create_cbc_cipher(&key).unwrap();
        let mut data = plaintext;
        c.encrypt(&iv, &mut data).unwrap();
        assert_eq!(data, expected);

        // The same instance chains from whatever IV it is given.
        c.decrypt(&iv, &mut data).unwrap();
        assert_eq!(data, plaintext);
        assert!(c.encrypt(&iv, &mut data[..15]).is_err());
    }
}
