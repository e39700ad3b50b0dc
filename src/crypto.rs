/*!
Encryption of the upstream credentials we keep at rest
*/
use ring::aead::BoundKey;

use crate::{se, Result};

/// ring wants a `NonceSequence`, but every value we seal gets
/// its own random nonce, so the sequence hands out exactly one.
struct SingleNonce(Option<ring::aead::Nonce>);

impl ring::aead::NonceSequence for SingleNonce {
    fn advance(&mut self) -> std::result::Result<ring::aead::Nonce, ring::error::Unspecified> {
        self.0.take().ok_or(ring::error::Unspecified)
    }
}

/// A hex encoded ciphertext along with the hex encoded nonce it was sealed with
#[derive(Debug, Clone, PartialEq)]
pub struct Enc {
    pub value: String,
    pub nonce: String,
}

fn rand_bytes(n: usize) -> Result<Vec<u8>> {
    use ring::rand::SecureRandom;
    let mut buf = vec![0; n];
    ring::rand::SystemRandom::new()
        .fill(&mut buf)
        .map_err(|_| "Error getting random bytes")?;
    Ok(buf)
}

fn key(alg: &'static ring::aead::Algorithm, pass: &[u8]) -> Result<ring::aead::UnboundKey> {
    Ok(ring::aead::UnboundKey::new(alg, pass)
        .map_err(|_| se!("encryption key must be {} bytes", alg.key_len()))?)
}

/// Seal `s` with AES_256_GCM under a fresh 12-byte nonce. `pass` must be 32 bytes.
pub fn encrypt_with(s: &str, pass: &[u8]) -> Result<Enc> {
    let alg = &ring::aead::AES_256_GCM;
    let nonce_bytes = rand_bytes(alg.nonce_len())?;
    let nonce = ring::aead::Nonce::try_assume_unique_for_key(&nonce_bytes)
        .map_err(|_| "Encryption nonce not unique")?;
    let mut key = ring::aead::SealingKey::new(key(alg, pass)?, SingleNonce(Some(nonce)));
    let mut in_out = s.as_bytes().to_vec();
    key.seal_in_place_append_tag(ring::aead::Aad::empty(), &mut in_out)
        .map_err(|_| "Failed encrypting bytes")?;
    Ok(Enc {
        value: hex::encode(&in_out),
        nonce: hex::encode(&nonce_bytes),
    })
}

pub fn decrypt_with(enc: &Enc, pass: &[u8]) -> Result<String> {
    let alg = &ring::aead::AES_256_GCM;
    let nonce = hex::decode(&enc.nonce).map_err(|e| se!("nonce hex decode error {}", e))?;
    let mut value = hex::decode(&enc.value).map_err(|e| se!("value hex decode error {}", e))?;
    let nonce = ring::aead::Nonce::try_assume_unique_for_key(&nonce)
        .map_err(|_| "Decryption nonce not unique")?;
    let mut key = ring::aead::OpeningKey::new(key(alg, pass)?, SingleNonce(Some(nonce)));
    let bytes = key
        .open_in_place(ring::aead::Aad::empty(), &mut value)
        .map_err(|_| "Failed decrypting bytes")?;
    Ok(String::from_utf8(bytes.to_vec()).map_err(|e| se!("decrypted value utf8 error {}", e))?)
}

/// Encrypt with the application's `ENC_KEY`
pub fn encrypt(s: &str) -> Result<Enc> {
    encrypt_with(s, crate::CONFIG.enc_key.as_bytes())
}

/// Decrypt with the application's `ENC_KEY`
pub fn decrypt(enc: &Enc) -> Result<String> {
    decrypt_with(enc, crate::CONFIG.enc_key.as_bytes())
}
