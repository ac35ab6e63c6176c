//! Record protection.
//!
//! A [`RecordCipher`] protects one direction of a connection under one set of
//! keys. It is created by the handshake and installed into [`CipherSlots`]
//! when the handshake commits, replacing the previous cipher of that
//! direction in one step.

use std::sync::{Mutex, MutexGuard};

use subtle::{Choice, ConstantTimeEq};
use zeroize::Zeroize;

use crate::alert::AlertDescription;
use crate::buffer::Buf;
use crate::crypto::key_schedule::Tls13Kdf;
use crate::crypto::provider::{CbcCipher, Cipher, CryptoProvider, HashProvider, HmacProvider};
use crate::crypto::provider::SecureRandom;
use crate::error::Error;
use crate::types::{BulkCipher, ContentType, HashAlgorithm, ProtocolVersion, SuiteParams};

/// Largest plaintext fragment (2^14).
pub const MAX_FRAGMENT_LEN: usize = 16384;

/// Explicit nonce carried by TLS 1.2 AEAD records.
const EXPLICIT_NONCE_LEN: usize = 8;

/// Implicit part of the TLS 1.2 AEAD nonce.
const FIXED_IV_LEN: usize = 4;

/// TLS 1.3 per-record nonce length.
const TLS13_IV_LEN: usize = 12;

const SSL3_PAD1: u8 = 0x36;
const SSL3_PAD2: u8 = 0x5c;

/// Record MAC of the CBC suites: HMAC, or the keyed hash of SSL 3.0.
struct RecordMac {
    hash: HashAlgorithm,
    key: Buf,
    mac_len: usize,
    ssl3: bool,
    hmac: &'static dyn HmacProvider,
    hashes: &'static dyn HashProvider,
}

impl RecordMac {
    /// MAC over seq_num, type, version (absent in SSL 3.0), length and content.
    fn compute(
        &self,
        seq: u64,
        content_type: ContentType,
        version: ProtocolVersion,
        data: &[u8],
    ) -> Result<Buf, Error> {
        let mut header = Buf::with_capacity(13);
        header.extend_from_slice(&seq.to_be_bytes());
        header.push(content_type.as_u8());
        if !self.ssl3 {
            header.extend_from_slice(&version.as_u16().to_be_bytes());
        }
        header.extend_from_slice(&(data.len() as u16).to_be_bytes());

        let mut out = Buf::new();
        let result = if self.ssl3 {
            self.ssl3_mac(&header, data, &mut out)
        } else {
            self.hmac.hmac(self.hash, &self.key, &[&header[..], data], &mut out)
        };
        result.map_err(|e| Error::CryptoError(format!("record mac: {}", e)))?;
        Ok(out)
    }

    /// hash(MAC_write_secret + pad_2 + hash(MAC_write_secret + pad_1 + header + content))
    fn ssl3_mac(&self, header: &[u8], data: &[u8], out: &mut Buf) -> Result<(), String> {
        let pad_len = if self.hash == HashAlgorithm::MD5 { 48 } else { 40 };

        let mut inner = self.hashes.create_hash(self.hash)?;
        inner.update(&self.key);
        inner.update(&[SSL3_PAD1; 48][..pad_len]);
        inner.update(header);
        inner.update(data);
        let mut inner_hash = Buf::new();
        inner.clone_and_finalize(&mut inner_hash);

        let mut outer = self.hashes.create_hash(self.hash)?;
        outer.update(&self.key);
        outer.update(&[SSL3_PAD2; 48][..pad_len]);
        outer.update(&inner_hash);
        outer.clone_and_finalize(out);
        Ok(())
    }
}

impl Drop for RecordMac {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}

enum Protection {
    Null,
    /// TLS 1.2 / DTLS 1.2 AEAD (RFC 5288): 4-byte salt from the key block,
    /// 8-byte explicit nonce per record.
    Tls12 {
        cipher: Box<dyn Cipher>,
        fixed_iv: [u8; FIXED_IV_LEN],
    },
    /// SSL 3.0 to TLS 1.2 block cipher (RFC 5246 Section 6.2.3.2): MAC,
    /// pad, then encrypt. SSL 3.0 and TLS 1.0 chain the IV across records.
    Cbc {
        cipher: Box<dyn CbcCipher>,
        mac: RecordMac,
        /// Last ciphertext block, `None` when every record carries its IV.
        chain: Option<Buf>,
        rng: &'static dyn SecureRandom,
    },
    /// TLS 1.3: per-record nonce is iv XOR seq, the inner plaintext carries
    /// the real content type.
    Tls13 {
        cipher: Box<dyn Cipher>,
        iv: [u8; TLS13_IV_LEN],
        kdf: Tls13Kdf,
        bulk: BulkCipher,
        secret: Buf,
    },
}

/// Protection state for one direction.
pub struct RecordCipher {
    protection: Protection,
    /// DTLS epoch this cipher belongs to.
    epoch: u16,
    /// Next record sequence number.
    seq: u64,
    /// Bytes that may still be protected before the key must be updated.
    bytes_left: Option<u64>,
    /// Allowance each new generation of this key starts with.
    key_limit: Option<u64>,
}

impl std::fmt::Debug for RecordCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self.protection {
            Protection::Null => "Null",
            Protection::Tls12 { .. } => "Tls12",
            Protection::Cbc { .. } => "Cbc",
            Protection::Tls13 { .. } => "Tls13",
        };
        f.debug_struct("RecordCipher")
            .field("kind", &kind)
            .field("epoch", &self.epoch)
            .field("seq", &self.seq)
            .finish()
    }
}

fn bad_record_mac(reason: &str) -> Error {
    Error::fatal(AlertDescription::BadRecordMac, reason)
}

impl RecordCipher {
    /// Plaintext records, used before the first ChangeCipherSpec.
    pub fn null() -> Self {
        RecordCipher {
            protection: Protection::Null,
            epoch: 0,
            seq: 0,
            bytes_left: None,
            key_limit: None,
        }
    }

    /// SSL 3.0 to TLS 1.2 protection from key block material.
    ///
    /// AEAD suites take `key` and the 4-byte salt in `iv`. CBC suites take
    /// `mac_key` and `key`, and before TLS 1.1 the first chaining value in
    /// `iv`.
    pub fn legacy(
        provider: &CryptoProvider,
        version: ProtocolVersion,
        params: &SuiteParams,
        mac_key: &[u8],
        key: &[u8],
        iv: &[u8],
    ) -> Result<Self, Error> {
        let bulk = params.bulk;
        let supported = provider
            .find_cipher(bulk)
            .ok_or_else(|| Error::CryptoError(format!("provider lacks {:?}", bulk)))?;

        let protection = if bulk.is_aead() {
            let cipher = supported
                .create_cipher(key)
                .map_err(|e| Error::CryptoError(format!("cipher init: {}", e)))?;
            let fixed_iv: [u8; FIXED_IV_LEN] = iv
                .try_into()
                .map_err(|_| Error::CryptoError("bad fixed IV length".into()))?;
            Protection::Tls12 { cipher, fixed_iv }
        } else {
            let hash = params
                .mac
                .hash()
                .ok_or_else(|| Error::CryptoError(format!("{:?} without a MAC", bulk)))?;
            let cipher = supported
                .create_cbc_cipher(key)
                .map_err(|e| Error::CryptoError(format!("cipher init: {}", e)))?;
            let chain = if bulk.record_iv_len(version) == 0 {
                if iv.len() != cipher.block_len() {
                    return Err(Error::CryptoError("bad CBC IV length".into()));
                }
                Some(Buf::from_slice(iv))
            } else {
                None
            };
            Protection::Cbc {
                cipher,
                mac: RecordMac {
                    hash,
                    key: Buf::from_slice(mac_key),
                    mac_len: params.mac.mac_len(),
                    ssl3: version == ProtocolVersion::SSL3_0,
                    hmac: provider.hmac_provider,
                    hashes: provider.hash_provider,
                },
                chain,
                rng: provider.secure_random,
            }
        };

        Ok(RecordCipher {
            protection,
            epoch: 0,
            seq: 0,
            bytes_left: None,
            key_limit: None,
        })
    }

    /// TLS 1.3 protection from a traffic secret.
    ///
    /// `key_limit` bounds the bytes protected under this key; see
    /// [`RecordCipher::at_key_limit`].
    pub fn tls13(
        provider: &CryptoProvider,
        kdf: Tls13Kdf,
        bulk: BulkCipher,
        secret: Buf,
        key_limit: Option<u64>,
    ) -> Result<Self, Error> {
        let supported = provider
            .find_cipher(bulk)
            .ok_or_else(|| Error::CryptoError(format!("provider lacks {:?}", bulk)))?;
        let (mut key, iv) = kdf
            .traffic_keys(&secret, bulk.key_len(), TLS13_IV_LEN)
            .map_err(|e| Error::CryptoError(format!("traffic keys: {}", e)))?;
        let cipher = supported.create_cipher(&key);
        key.zeroize();
        let cipher = cipher.map_err(|e| Error::CryptoError(format!("cipher init: {}", e)))?;

        let mut nonce = [0u8; TLS13_IV_LEN];
        nonce.copy_from_slice(&iv);

        Ok(RecordCipher {
            protection: Protection::Tls13 {
                cipher,
                iv: nonce,
                kdf,
                bulk,
                secret,
            },
            epoch: 0,
            seq: 0,
            bytes_left: key_limit,
            key_limit,
        })
    }

    /// The cipher for the next generation of this traffic secret (KeyUpdate).
    pub fn next_generation(&self, provider: &CryptoProvider) -> Result<Self, Error> {
        let Protection::Tls13 {
            kdf, bulk, secret, ..
        } = &self.protection
        else {
            return Err(Error::unexpected_message(
                "key update without TLS 1.3 traffic keys",
            ));
        };
        let next = kdf
            .next_traffic_secret(secret)
            .map_err(|e| Error::CryptoError(format!("traffic update: {}", e)))?;
        RecordCipher::tls13(provider, *kdf, *bulk, next, self.key_limit)
    }

    pub fn is_null(&self) -> bool {
        matches!(self.protection, Protection::Null)
    }

    pub fn is_tls13(&self) -> bool {
        matches!(self.protection, Protection::Tls13 { .. })
    }

    pub fn epoch(&self) -> u16 {
        self.epoch
    }

    pub fn set_epoch(&mut self, epoch: u16) {
        self.epoch = epoch;
    }

    /// The traffic secret this cipher was expanded from (TLS 1.3 only).
    pub fn base_secret(&self) -> Option<&[u8]> {
        match &self.protection {
            Protection::Tls13 { secret, .. } => Some(&secret[..]),
            _ => None,
        }
    }

    /// Take the next sequence number, failing before it wraps.
    pub fn take_seq(&mut self, max: u64) -> Result<u64, Error> {
        if self.seq >= max {
            return Err(Error::fatal(
                AlertDescription::InternalError,
                "record sequence number exhausted",
            ));
        }
        let seq = self.seq;
        self.seq += 1;
        Ok(seq)
    }

    /// Whether the write key has protected as many bytes as allowed.
    pub fn at_key_limit(&self) -> bool {
        self.bytes_left == Some(0)
    }

    /// Bytes added by [`RecordCipher::seal`] to a fragment.
    pub fn overhead(&self) -> usize {
        match &self.protection {
            Protection::Null => 0,
            Protection::Tls12 { .. } => EXPLICIT_NONCE_LEN + 16,
            // Explicit IV, MAC and at most one block of padding.
            Protection::Cbc {
                cipher, mac, chain, ..
            } => {
                let iv = if chain.is_some() { 0 } else { cipher.block_len() };
                iv + mac.mac_len + cipher.block_len()
            }
            Protection::Tls13 { bulk, .. } => 1 + bulk.tag_len(),
        }
    }

    /// Protect `fragment` in place.
    ///
    /// `seq` is the value that goes into the nonce and AAD: the record
    /// sequence number for TLS, epoch and 48-bit sequence number for DTLS.
    /// Returns the content type to put on the wire.
    pub fn seal(
        &mut self,
        content_type: ContentType,
        version: ProtocolVersion,
        seq: u64,
        fragment: &mut Buf,
    ) -> Result<ContentType, Error> {
        if let Some(left) = &mut self.bytes_left {
            *left = left.saturating_sub(fragment.len() as u64);
        }

        match &mut self.protection {
            Protection::Null => Ok(content_type),

            Protection::Tls12 { cipher, fixed_iv } => {
                let explicit = seq.to_be_bytes();
                let mut nonce = [0u8; 12];
                nonce[..FIXED_IV_LEN].copy_from_slice(&fixed_iv[..]);
                nonce[FIXED_IV_LEN..].copy_from_slice(&explicit);

                let aad = tls12_aad(seq, content_type, version, fragment.len());
                cipher
                    .encrypt(fragment, &aad, &nonce)
                    .map_err(|e| Error::CryptoError(format!("seal: {}", e)))?;

                let mut out = Buf::with_capacity(EXPLICIT_NONCE_LEN + fragment.len());
                out.extend_from_slice(&explicit);
                out.extend_from_slice(fragment);
                *fragment = out;
                Ok(content_type)
            }

            Protection::Cbc {
                cipher,
                mac,
                chain,
                rng,
            } => {
                let tag = mac.compute(seq, content_type, version, fragment)?;
                let block_len = cipher.block_len();

                let mut data = Buf::with_capacity(fragment.len() + tag.len() + block_len);
                data.extend_from_slice(fragment);
                data.extend_from_slice(&tag);
                // padding_length + 1 bytes, all of value padding_length.
                let pad = (block_len - (data.len() + 1) % block_len) % block_len;
                data.resize(data.len() + pad + 1, pad as u8);

                let iv = match chain {
                    Some(previous) => previous.clone(),
                    None => {
                        let mut iv = Buf::new();
                        iv.resize(block_len, 0);
                        rng.fill(&mut iv)
                            .map_err(|e| Error::CryptoError(format!("record IV: {}", e)))?;
                        iv
                    }
                };
                cipher
                    .encrypt(&iv, &mut data)
                    .map_err(|e| Error::CryptoError(format!("seal: {}", e)))?;

                match chain {
                    Some(previous) => {
                        *previous = Buf::from_slice(&data[data.len() - block_len..]);
                        *fragment = data;
                    }
                    None => {
                        let mut out = Buf::with_capacity(iv.len() + data.len());
                        out.extend_from_slice(&iv);
                        out.extend_from_slice(&data);
                        *fragment = out;
                    }
                }
                Ok(content_type)
            }

            Protection::Tls13 {
                cipher, iv, bulk, ..
            } => {
                fragment.push(content_type.as_u8());
                let outer = ContentType::ApplicationData;
                let aad = tls13_aad(outer, version, fragment.len() + bulk.tag_len());
                let nonce = xor_nonce(iv, seq);
                cipher
                    .encrypt(fragment, &aad, &nonce)
                    .map_err(|e| Error::CryptoError(format!("seal: {}", e)))?;
                Ok(outer)
            }
        }
    }

    /// Remove protection from `fragment` in place.
    ///
    /// Returns the real content type of the record.
    pub fn open(
        &mut self,
        content_type: ContentType,
        version: ProtocolVersion,
        seq: u64,
        fragment: &mut Buf,
    ) -> Result<ContentType, Error> {
        match &mut self.protection {
            Protection::Null => {
                if fragment.len() > MAX_FRAGMENT_LEN {
                    return Err(Error::fatal(
                        AlertDescription::RecordOverflow,
                        "plaintext record too long",
                    ));
                }
                Ok(content_type)
            }

            Protection::Tls12 { cipher, fixed_iv } => {
                if fragment.len() < EXPLICIT_NONCE_LEN + 16 {
                    return Err(bad_record_mac("record shorter than AEAD overhead"));
                }
                let mut nonce = [0u8; 12];
                nonce[..FIXED_IV_LEN].copy_from_slice(&fixed_iv[..]);
                nonce[FIXED_IV_LEN..].copy_from_slice(&fragment[..EXPLICIT_NONCE_LEN]);

                let plaintext_len = fragment.len() - EXPLICIT_NONCE_LEN - 16;
                let aad = tls12_aad(seq, content_type, version, plaintext_len);

                let mut body = Buf::from_slice(&fragment[EXPLICIT_NONCE_LEN..]);
                cipher
                    .decrypt(&mut body, &aad, &nonce)
                    .map_err(|_| bad_record_mac("record authentication failed"))?;
                if body.len() > MAX_FRAGMENT_LEN {
                    return Err(Error::fatal(
                        AlertDescription::RecordOverflow,
                        "decrypted record too long",
                    ));
                }
                *fragment = body;
                Ok(content_type)
            }

            Protection::Cbc {
                cipher, mac, chain, ..
            } => {
                let block_len = cipher.block_len();
                let iv_len = if chain.is_some() { 0 } else { block_len };
                let min_len = iv_len + (mac.mac_len + 1).div_ceil(block_len) * block_len;
                if fragment.len() < min_len || (fragment.len() - iv_len) % block_len != 0 {
                    return Err(bad_record_mac("malformed CBC record"));
                }

                let (explicit_iv, ciphertext) = fragment.split_at(iv_len);
                let iv = match chain {
                    Some(previous) => previous.clone(),
                    None => Buf::from_slice(explicit_iv),
                };
                let next_chain = Buf::from_slice(&ciphertext[ciphertext.len() - block_len..]);
                let mut body = Buf::from_slice(ciphertext);
                cipher
                    .decrypt(&iv, &mut body)
                    .map_err(|_| bad_record_mac("record decryption failed"))?;

                // Lengths are public. Padding and MAC are checked in constant
                // time and a bad padding still costs a MAC computation.
                let len = body.len();
                let pad = body[len - 1] as usize;
                let fits = pad + 1 + mac.mac_len <= len && (!mac.ssl3 || pad < block_len);
                let content_len = if fits {
                    len - pad - 1 - mac.mac_len
                } else {
                    len - mac.mac_len
                };

                let mut padding_ok = Choice::from(fits as u8);
                if fits && !mac.ssl3 {
                    for b in &body[len - pad - 1..] {
                        padding_ok &= b.ct_eq(&(pad as u8));
                    }
                }
                let expected = mac.compute(seq, content_type, version, &body[..content_len])?;
                let mac_ok = body[content_len..content_len + mac.mac_len].ct_eq(&expected[..]);
                if !bool::from(padding_ok & mac_ok) {
                    return Err(bad_record_mac("record authentication failed"));
                }
                if content_len > MAX_FRAGMENT_LEN {
                    return Err(Error::fatal(
                        AlertDescription::RecordOverflow,
                        "decrypted record too long",
                    ));
                }

                body.truncate(content_len);
                if let Some(previous) = chain {
                    *previous = next_chain;
                }
                *fragment = body;
                Ok(content_type)
            }

            Protection::Tls13 { cipher, iv, .. } => {
                if content_type != ContentType::ApplicationData {
                    return Err(Error::unexpected_message(format!(
                        "{:?} record under TLS 1.3 protection",
                        content_type
                    )));
                }
                let aad = tls13_aad(content_type, version, fragment.len());
                let nonce = xor_nonce(iv, seq);
                cipher
                    .decrypt(fragment, &aad, &nonce)
                    .map_err(|_| bad_record_mac("record authentication failed"))?;

                if fragment.len() > MAX_FRAGMENT_LEN + 1 {
                    return Err(Error::fatal(
                        AlertDescription::RecordOverflow,
                        "inner plaintext too long",
                    ));
                }

                // TLSInnerPlaintext: content, type, zero padding.
                let Some(pos) = fragment.iter().rposition(|b| *b != 0) else {
                    return Err(Error::unexpected_message("record has no content type"));
                };
                let inner = ContentType::from_u8(fragment[pos]);
                fragment.truncate(pos);
                Ok(inner)
            }
        }
    }
}

impl Drop for RecordCipher {
    fn drop(&mut self) {
        if let Protection::Tls13 { secret, iv, .. } = &mut self.protection {
            secret.zeroize();
            iv.zeroize();
        }
    }
}

/// seq_num + TLSCompressed.type + TLSCompressed.version + TLSCompressed.length
fn tls12_aad(seq: u64, content_type: ContentType, version: ProtocolVersion, len: usize) -> [u8; 13] {
    let mut aad = [0u8; 13];
    aad[..8].copy_from_slice(&seq.to_be_bytes());
    aad[8] = content_type.as_u8();
    aad[9..11].copy_from_slice(&version.as_u16().to_be_bytes());
    aad[11..].copy_from_slice(&(len as u16).to_be_bytes());
    aad
}

/// The TLS 1.3 record header is the additional data.
fn tls13_aad(content_type: ContentType, version: ProtocolVersion, len: usize) -> [u8; 5] {
    let mut aad = [0u8; 5];
    aad[0] = content_type.as_u8();
    aad[1..3].copy_from_slice(&version.as_u16().to_be_bytes());
    aad[3..].copy_from_slice(&(len as u16).to_be_bytes());
    aad
}

/// nonce = iv XOR pad_left(seq, iv_len)
fn xor_nonce(iv: &[u8; TLS13_IV_LEN], seq: u64) -> [u8; TLS13_IV_LEN] {
    let mut nonce = *iv;
    for (n, s) in nonce[4..].iter_mut().zip(seq.to_be_bytes()) {
        *n ^= s;
    }
    nonce
}

/// Read and write protection of a connection.
///
/// Each direction has its own lock, so reading and writing never contend.
/// A new cipher replaces the old one under the lock, so a record is never
/// processed with a half-installed key.
#[derive(Debug)]
pub struct CipherSlots {
    read: Mutex<RecordCipher>,
    write: Mutex<RecordCipher>,
}

impl Default for CipherSlots {
    fn default() -> Self {
        CipherSlots {
            read: Mutex::new(RecordCipher::null()),
            write: Mutex::new(RecordCipher::null()),
        }
    }
}

fn lock(slot: &Mutex<RecordCipher>) -> MutexGuard<'_, RecordCipher> {
    // A panic while holding the lock leaves a cipher that is still whole.
    slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl CipherSlots {
    pub fn read(&self) -> MutexGuard<'_, RecordCipher> {
        lock(&self.read)
    }

    pub fn write(&self) -> MutexGuard<'_, RecordCipher> {
        lock(&self.write)
    }

    /// Replace the read cipher. Returns the epoch of the new cipher.
    pub fn install_read(&self, mut cipher: RecordCipher, bump_epoch: bool) -> u16 {
        let mut slot = self.read();
        let epoch = next_epoch(&slot, bump_epoch);
        cipher.set_epoch(epoch);
        *slot = cipher;
        epoch
    }

    /// Replace the write cipher. Returns the epoch of the new cipher.
    pub fn install_write(&self, mut cipher: RecordCipher, bump_epoch: bool) -> u16 {
        let mut slot = self.write();
        let epoch = next_epoch(&slot, bump_epoch);
        cipher.set_epoch(epoch);
        *slot = cipher;
        epoch
    }

    /// Current base secret of the write direction (TLS 1.3).
    pub fn write_base_secret(&self) -> Option<Buf> {
        self.write().base_secret().map(Buf::from_slice)
    }

    /// Current base secret of the read direction (TLS 1.3).
    pub fn read_base_secret(&self) -> Option<Buf> {
        self.read().base_secret().map(Buf::from_slice)
    }
}

fn next_epoch(current: &RecordCipher, bump: bool) -> u16 {
    if bump {
        current.epoch().wrapping_add(1)
    } else {
        current.epoch()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::rust_crypto::default_provider;
    use crate::types::CipherSuite;

    fn suite(suite: CipherSuite) -> SuiteParams {
        suite.params().unwrap()
    }

    /// A writer and a reader over the same CBC keys.
    fn cbc_pair(version: ProtocolVersion) -> (RecordCipher, RecordCipher) {
        let provider = default_provider();
        let params = suite(CipherSuite::RSA_AES128_CBC_SHA);
        let iv = vec![9u8; params.bulk.fixed_iv_len(version)];
        let make = || {
            RecordCipher::legacy(&provider, version, &params, &[3; 20], &[7; 16], &iv).unwrap()
        };
        (make(), make())
    }

    fn seal(c: &mut RecordCipher, version: ProtocolVersion, seq: u64, data: &[u8]) -> Buf {
        let mut fragment = Buf::from_slice(data);
        c.seal(ContentType::ApplicationData, version, seq, &mut fragment)
            .unwrap();
        fragment
    }

    fn open(
        c: &mut RecordCipher,
        version: ProtocolVersion,
        seq: u64,
        fragment: &mut Buf,
    ) -> Result<ContentType, Error> {
        c.open(ContentType::ApplicationData, version, seq, fragment)
    }

    fn tls13_pair(limit: Option<u64>) -> (RecordCipher, RecordCipher) {
        let provider = default_provider();
        let kdf = Tls13Kdf::new(&provider, HashAlgorithm::SHA256);
        let secret = Buf::from_slice(&[0x42; 32]);
        let a = RecordCipher::tls13(&provider, kdf, BulkCipher::Aes128Gcm, secret.clone(), limit)
            .unwrap();
        let b = RecordCipher::tls13(&provider, kdf, BulkCipher::Aes128Gcm, secret, None).unwrap();
        (a, b)
    }

    #[test]
    fn tls13_hides_content_type() {
        let (mut w, mut r) = tls13_pair(None);
        let mut fragment = Buf::from_slice(b"\x14\x00\x00\x00");
        let outer = w
            .seal(ContentType::Handshake, ProtocolVersion::TLS1_2, 0, &mut fragment)
            .unwrap();
        assert_eq!(outer, ContentType::ApplicationData);
        assert_eq!(fragment.len(), 4 + 1 + 16);

        let inner = r
            .open(outer, ProtocolVersion::TLS1_2, 0, &mut fragment)
            .unwrap();
        assert_eq!(inner, ContentType::Handshake);
        assert_eq!(&fragment[..], b"\x14\x00\x00\x00");
    }

    #[test]
    fn tls13_wrong_sequence_fails() {
        let (mut w, mut r) = tls13_pair(None);
        let mut fragment = Buf::from_slice(b"hello");
        let outer = w
            .seal(ContentType::ApplicationData, ProtocolVersion::TLS1_2, 3, &mut fragment)
            .unwrap();
        let err = r
            .open(outer, ProtocolVersion::TLS1_2, 4, &mut fragment)
            .unwrap_err();
        assert_eq!(err.alert_description(), AlertDescription::BadRecordMac);
    }

    #[test]
    fn tls12_explicit_nonce() {
        let provider = default_provider();
        let key = [7u8; 16];
        let iv = [1u8; 4];
        let params = suite(CipherSuite::ECDHE_ECDSA_AES128_GCM_SHA256);
        let version = ProtocolVersion::DTLS1_2;
        let mut w = RecordCipher::legacy(&provider, version, &params, &[], &key, &iv).unwrap();
        let mut r = RecordCipher::legacy(&provider, version, &params, &[], &key, &iv).unwrap();

        let seq = (1u64 << 48) | 5;
        let mut fragment = Buf::from_slice(b"application data");
        w.seal(ContentType::ApplicationData, ProtocolVersion::DTLS1_2, seq, &mut fragment)
            .unwrap();
        assert_eq!(&fragment[..8], &seq.to_be_bytes());
        assert_eq!(fragment.len(), 8 + 16 + 16);

        // Tampered AAD (content type) fails.
        let mut tampered = fragment.clone();
        assert!(r
            .open(ContentType::Handshake, ProtocolVersion::DTLS1_2, seq, &mut tampered)
            .is_err());

        r.open(ContentType::ApplicationData, ProtocolVersion::DTLS1_2, seq, &mut fragment)
            .unwrap();
        assert_eq!(&fragment[..], b"application data");
    }

    #[test]
    fn cbc_explicit_iv_per_record() {
        let v = ProtocolVersion::TLS1_1;
        let (mut w, mut r) = cbc_pair(v);

        let first = seal(&mut w, v, 0, b"same");
        let second = seal(&mut w, v, 1, b"same");
        // IV, then "same" + 20 byte MAC + padding in two blocks.
        assert_eq!(first.len(), 16 + 32);
        assert_ne!(first[..16], second[..16]);

        let mut record = first;
        open(&mut r, v, 0, &mut record).unwrap();
        assert_eq!(&record[..], b"same");

        // Records carry their own IV, so order does not matter to the cipher.
        let mut record = second;
        open(&mut r, v, 1, &mut record).unwrap();
        assert_eq!(&record[..], b"same");
    }

    #[test]
    fn cbc_implicit_iv_chains() {
        for v in [ProtocolVersion::TLS1_0, ProtocolVersion::SSL3_0] {
            let (mut w, mut r) = cbc_pair(v);
            let first = seal(&mut w, v, 0, b"block chained");
            let second = seal(&mut w, v, 1, b"block chained");
            assert_eq!(first.len() % 16, 0);
            assert_ne!(first, second);

            let mut record = first;
            open(&mut r, v, 0, &mut record).unwrap();
            assert_eq!(&record[..], b"block chained", "{}", v);
            let mut record = second;
            open(&mut r, v, 1, &mut record).unwrap();
            assert_eq!(&record[..], b"block chained", "{}", v);
        }
    }

    #[test]
    fn cbc_rejects_tampering() {
        let v = ProtocolVersion::TLS1_2;
        let (mut w, _) = cbc_pair(v);
        let record = seal(&mut w, v, 5, b"application data");

        // Any flipped bit fails the MAC or the padding with the same alert.
        for i in [0, 16, record.len() - 17, record.len() - 1] {
            let (_, mut r) = cbc_pair(v);
            let mut bad = record.clone();
            bad[i] ^= 0x80;
            let err = open(&mut r, v, 5, &mut bad).unwrap_err();
            assert_eq!(err.alert_description(), AlertDescription::BadRecordMac, "byte {}", i);
        }

        // Wrong sequence number, truncation, misalignment.
        let (_, mut r) = cbc_pair(v);
        let mut bad = record.clone();
        assert!(open(&mut r, v, 6, &mut bad).is_err());
        let mut short = Buf::from_slice(&record[..16 + 16]);
        assert!(open(&mut r, v, 5, &mut short).is_err());
        let mut unaligned = Buf::from_slice(&record[..record.len() - 1]);
        assert!(open(&mut r, v, 5, &mut unaligned).is_err());
    }

    #[test]
    fn ssl3_mac_leaves_out_version() {
        //! The SSL 3.0 MAC covers no version, TLS binds the record version.
        let (mut w, mut r) = cbc_pair(ProtocolVersion::SSL3_0);
        let mut record = seal(&mut w, ProtocolVersion::SSL3_0, 0, b"v");
        open(&mut r, ProtocolVersion::TLS1_0, 0, &mut record).unwrap();

        let (mut w, mut r) = cbc_pair(ProtocolVersion::TLS1_0);
        let mut record = seal(&mut w, ProtocolVersion::TLS1_0, 0, b"v");
        assert!(open(&mut r, ProtocolVersion::TLS1_1, 0, &mut record).is_err());
    }

    #[test]
    fn key_limit_counts_down() {
        let (mut w, _) = tls13_pair(Some(10));
        let mut fragment = Buf::from_slice(&[1; 6]);
        w.seal(ContentType::ApplicationData, ProtocolVersion::TLS1_2, 0, &mut fragment)
            .unwrap();
        assert!(!w.at_key_limit());
        let mut fragment = Buf::from_slice(&[1; 6]);
        w.seal(ContentType::ApplicationData, ProtocolVersion::TLS1_2, 1, &mut fragment)
            .unwrap();
        assert!(w.at_key_limit());

        // The next generation starts with a fresh allowance.
        let next = w.next_generation(&default_provider()).unwrap();
        assert!(!next.at_key_limit());
        assert_ne!(next.base_secret(), w.base_secret());
    }

    #[test]
    fn slots_install_atomically() {
        let slots = CipherSlots::default();
        assert!(slots.write_base_secret().is_none());

        let (w, _) = tls13_pair(None);
        let epoch = slots.install_write(w, true);
        assert_eq!(epoch, 1);
        assert!(slots.write().is_tls13());
        assert_eq!(slots.write_base_secret().unwrap().len(), 32);
        assert!(slots.read().is_null());
    }

    #[test]
    fn sequence_exhaustion() {
        let mut c = RecordCipher::null();
        assert_eq!(c.take_seq(2).unwrap(), 0);
        assert_eq!(c.take_seq(2).unwrap(), 1);
        assert!(c.take_seq(2).is_err());
    }
}
