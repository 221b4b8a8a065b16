use std::fmt;

use aes::cipher::block_padding::NoPadding;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use aes::Aes256;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig};
use base64::{alphabet, Engine};
use serde::Serialize;
use sha1::{Digest, Sha1};
use tracing::debug;

use switchboard_core::config::WeComCredentials;

use crate::error::CryptoError;

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

/// WeCom pads to 32 bytes, not the 16-byte AES block.
const PAD_BLOCK: usize = 32;
const RANDOM_PREFIX: usize = 16;
const HEADER_LEN: usize = RANDOM_PREFIX + 4;

/// The 43-character key leaves two spare bits in its last symbol, and WeCom
/// does not zero them.
const KEY_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_allow_trailing_bits(true),
);

/// An encrypted, signed reply ready to be wrapped in the response envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EncryptedReply {
    pub encrypt: String,
    pub msg_signature: String,
    pub timestamp: String,
    pub nonce: String,
}

/// Signature, decryption and encryption for WeCom callbacks.
///
/// The AES key is the base64 decoding of `EncodingAESKey + "="` and must be
/// 32 bytes; the IV is the first 16 key bytes. Decrypted buffers have the
/// layout `[16 random][u32 BE length][message][corp id]`.
#[derive(Clone)]
pub struct WeComCrypto {
    token: String,
    key: [u8; 32],
    corp_id: String,
}

impl fmt::Debug for WeComCrypto {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeComCrypto")
            .field("corp_id", &self.corp_id)
            .finish_non_exhaustive()
    }
}

impl WeComCrypto {
    pub fn new(token: &str, encoding_aes_key: &str, corp_id: &str) -> Result<Self, CryptoError> {
        Ok(Self {
            token: token.trim().to_string(),
            key: decode_encoding_aes_key(encoding_aes_key)?,
            corp_id: corp_id.trim().to_string(),
        })
    }

    pub fn from_credentials(creds: &WeComCredentials) -> Result<Self, CryptoError> {
        Self::new(creds.token.expose(), creds.aes_key.expose(), &creds.corp_id)
    }

    pub fn corp_id(&self) -> &str {
        &self.corp_id
    }

    /// Lowercase hex SHA-1 over the sorted concatenation of the callback
    /// token, `timestamp`, `nonce` and `data`.
    pub fn signature(&self, timestamp: &str, nonce: &str, data: &str) -> String {
        let mut parts = [self.token.as_str(), timestamp, nonce, data];
        parts.sort_unstable();
        let mut hasher = Sha1::new();
        for part in parts {
            hasher.update(part.as_bytes());
        }
        hex::encode(hasher.finalize())
    }

    /// Exact, case-sensitive comparison against the expected signature.
    pub fn verify_signature(
        &self,
        msg_signature: &str,
        timestamp: &str,
        nonce: &str,
        data: &str,
    ) -> Result<(), CryptoError> {
        if self.signature(timestamp, nonce, data) == msg_signature {
            Ok(())
        } else {
            Err(CryptoError::SignatureMismatch)
        }
    }

    /// Answer the callback URL verification challenge.
    ///
    /// Returns the plaintext that must be echoed back to WeCom verbatim.
    pub fn verify_url(
        &self,
        msg_signature: &str,
        timestamp: &str,
        nonce: &str,
        echostr: &str,
    ) -> Result<String, CryptoError> {
        self.verify_signature(msg_signature, timestamp, nonce, echostr)?;
        let plaintext = self.decrypt(echostr)?;
        debug!(corp_id = %self.corp_id, "callback url verified");
        Ok(plaintext)
    }

    /// Check the signature of an inbound message and return its XML body.
    pub fn decrypt_message(
        &self,
        msg_signature: &str,
        timestamp: &str,
        nonce: &str,
        encrypted: &str,
    ) -> Result<String, CryptoError> {
        self.verify_signature(msg_signature, timestamp, nonce, encrypted)?;
        self.decrypt(encrypted)
    }

    /// base64 → AES-256-CBC → strict PKCS#7/32 → layout check → corp id check.
    pub fn decrypt(&self, encrypted: &str) -> Result<String, CryptoError> {
        let mut buf = base64::engine::general_purpose::STANDARD
            .decode(encrypted.trim())
            .map_err(|_| CryptoError::Decryption("payload is not valid base64".to_string()))?;
        if buf.is_empty() || buf.len() % 16 != 0 {
            return Err(CryptoError::Decryption(format!(
                "ciphertext length {} is not a positive multiple of the block size",
                buf.len()
            )));
        }

        let plain_len = Aes256CbcDec::new(self.key.as_slice().into(), self.key[..16].into())
            .decrypt_padded_mut::<NoPadding>(&mut buf)
            .map_err(|_| CryptoError::Decryption("cipher rejected input".to_string()))?
            .len();
        buf.truncate(plain_len);

        let plain = strip_padding(&buf)?;
        if plain.len() < HEADER_LEN {
            return Err(CryptoError::Decryption("payload is too short".to_string()));
        }

        let mut len_bytes = [0u8; 4];
        len_bytes.copy_from_slice(&plain[RANDOM_PREFIX..HEADER_LEN]);
        let msg_len = u32::from_be_bytes(len_bytes) as usize;
        let msg_end = HEADER_LEN
            .checked_add(msg_len)
            .filter(|end| *end <= plain.len())
            .ok_or_else(|| CryptoError::Decryption("length field out of range".to_string()))?;

        if &plain[msg_end..] != self.corp_id.as_bytes() {
            return Err(CryptoError::CorpIdMismatch);
        }

        String::from_utf8(plain[HEADER_LEN..msg_end].to_vec())
            .map_err(|_| CryptoError::Decryption("message is not valid UTF-8".to_string()))
    }

    /// Encrypt `plaintext` with a fresh random prefix and return base64.
    pub fn encrypt(&self, plaintext: &str) -> Result<String, CryptoError> {
        let prefix: [u8; RANDOM_PREFIX] = rand::random();
        self.encrypt_with_prefix(&prefix, plaintext)
    }

    /// Encrypt and sign a reply.
    pub fn encrypt_message(
        &self,
        plaintext: &str,
        timestamp: &str,
        nonce: &str,
    ) -> Result<EncryptedReply, CryptoError> {
        let encrypt = self.encrypt(plaintext)?;
        let msg_signature = self.signature(timestamp, nonce, &encrypt);
        Ok(EncryptedReply {
            encrypt,
            msg_signature,
            timestamp: timestamp.to_string(),
            nonce: nonce.to_string(),
        })
    }

    fn encrypt_with_prefix(
        &self,
        prefix: &[u8; RANDOM_PREFIX],
        plaintext: &str,
    ) -> Result<String, CryptoError> {
        let msg = plaintext.as_bytes();
        let msg_len = u32::try_from(msg.len())
            .map_err(|_| CryptoError::Encryption("message too large".to_string()))?;

        let mut buf = Vec::with_capacity(HEADER_LEN + msg.len() + self.corp_id.len() + PAD_BLOCK);
        buf.extend_from_slice(prefix);
        buf.extend_from_slice(&msg_len.to_be_bytes());
        buf.extend_from_slice(msg);
        buf.extend_from_slice(self.corp_id.as_bytes());
        let pad = PAD_BLOCK - buf.len() % PAD_BLOCK;
        buf.resize(buf.len() + pad, pad as u8);

        let len = buf.len();
        Aes256CbcEnc::new(self.key.as_slice().into(), self.key[..16].into())
            .encrypt_padded_mut::<NoPadding>(&mut buf, len)
            .map_err(|_| CryptoError::Encryption("buffer not block aligned".to_string()))?;

        Ok(base64::engine::general_purpose::STANDARD.encode(&buf))
    }
}

/// Strict PKCS#7 with a 32-byte block: pad value in 1..=32, every pad byte
/// equal to it.
fn strip_padding(buf: &[u8]) -> Result<&[u8], CryptoError> {
    let Some(&last) = buf.last() else {
        return Err(CryptoError::Decryption("empty plaintext".to_string()));
    };
    let pad = last as usize;
    if pad == 0 || pad > PAD_BLOCK || pad > buf.len() {
        return Err(CryptoError::Decryption(format!("invalid padding byte {pad}")));
    }
    let (body, padding) = buf.split_at(buf.len() - pad);
    if padding.iter().any(|b| *b != last) {
        return Err(CryptoError::Decryption("inconsistent padding".to_string()));
    }
    Ok(body)
}

fn decode_encoding_aes_key(raw: &str) -> Result<[u8; 32], CryptoError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(CryptoError::InvalidKey("key is empty".to_string()));
    }
    let padded = format!("{raw}=");
    let key = KEY_ENGINE
        .decode(padded)
        .map_err(|_| CryptoError::InvalidKey("key is not valid base64".to_string()))?;
    <[u8; 32]>::try_from(key.as_slice()).map_err(|_| {
        CryptoError::InvalidKey(format!("key decodes to {} bytes, expected 32", key.len()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "jWmYm7qr5nMoAUwZRjGtBxmz3KA1tkAj3ykkR6q2B2C";

    fn crypto(corp: &str) -> WeComCrypto {
        WeComCrypto::new("QDG6eK", KEY, corp).unwrap()
    }

    #[test]
    fn key_must_decode_to_32_bytes() {
        assert!(matches!(
            WeComCrypto::new("t", "c2hvcnQ", "ww1"),
            Err(CryptoError::InvalidKey(_))
        ));
        assert!(matches!(
            WeComCrypto::new("t", "", "ww1"),
            Err(CryptoError::InvalidKey(_))
        ));
    }

    #[test]
    fn padding_is_checked_strictly() {
        assert!(strip_padding(&[1, 2, 3, 2, 2]).is_ok());
        assert!(matches!(strip_padding(&[1, 2, 3, 1, 2]), Err(CryptoError::Decryption(_))));
        assert!(matches!(strip_padding(&[5, 0]), Err(CryptoError::Decryption(_))));
        let mut too_big = vec![33u8; 64];
        too_big[0] = 1;
        assert!(matches!(strip_padding(&too_big), Err(CryptoError::Decryption(_))));
    }

    #[test]
    fn fixed_prefix_encrypt_then_decrypt() {
        let c = crypto("wx5823bf96d3bd56c7");
        let enc = c.encrypt_with_prefix(&[7u8; 16], "hello 世界").unwrap();
        assert_eq!(c.decrypt(&enc).unwrap(), "hello 世界");
    }

    #[test]
    fn encrypted_payload_is_32_byte_aligned() {
        let c = crypto("wx5823bf96d3bd56c7");
        for msg in ["", "a", "exactly-thirty-two-bytes-of-text"] {
            let raw = base64::engine::general_purpose::STANDARD
                .decode(c.encrypt(msg).unwrap())
                .unwrap();
            assert_eq!(raw.len() % PAD_BLOCK, 0);
        }
    }

    #[test]
    fn debug_hides_token_and_key() {
        let dbg = format!("{:?}", crypto("wx5823bf96d3bd56c7"));
        assert!(dbg.contains("wx5823bf96d3bd56c7"));
        assert!(!dbg.contains("QDG6eK"));
    }
}
