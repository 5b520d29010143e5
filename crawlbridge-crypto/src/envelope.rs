//! Password-keyed envelope encryption for RPC payloads.
//!
//! The envelope is a text block: a `----` sentinel line, the hex of
//! `nonce ‖ ciphertext ‖ tag` re-flowed with hyphens and newlines, and a
//! closing sentinel line. The plaintext is framed before encryption with
//! two copies of its little-endian length and zero-padded to an 8-byte
//! boundary; the duplicate length is decoded as a redundant integrity
//! check only.

use crate::error::{CryptoError, CryptoResult};
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use rand::RngCore;
use sha2::{Digest, Sha512};
use zeroize::Zeroizing;

/// Sentinel line wrapped around the hex body.
pub const ENVELOPE_SENTINEL: &str = "----\n";

/// AEAD nonce length in bytes.
pub const NONCE_SIZE: usize = 12;

/// AEAD authentication tag length in bytes.
pub const TAG_SIZE: usize = 16;

/// Upper bound on the decoded plaintext length.
const MAX_PLAINTEXT_LEN: usize = 1024 * 1024;

/// Folds the SHA-512 of the password down to a 32-byte cipher key.
///
/// The fold (first half XOR second half) is unconditional — it is part of
/// the wire contract, not an accident of digest width.
fn password_to_key(password: &str) -> Zeroizing<[u8; 32]> {
    let digest = Sha512::digest(password.as_bytes());
    let mut key = Zeroizing::new([0u8; 32]);
    for i in 0..32 {
        key[i] = digest[i] ^ digest[i + 32];
    }
    key
}

/// Builds the plaintext frame: `u32 len, u32 len, data, zero pad to 8`.
fn frame_plaintext(data: &[u8]) -> Vec<u8> {
    let len = data.len() as u32;
    let mut frame = Vec::with_capacity(8 + data.len() + 8);
    frame.extend_from_slice(&len.to_le_bytes());
    frame.extend_from_slice(&len.to_le_bytes());
    frame.extend_from_slice(data);
    let padding = (8 - frame.len() % 8) % 8;
    frame.extend(std::iter::repeat(0u8).take(padding));
    frame
}

/// Parses a decrypted frame back into the payload bytes.
fn unframe_plaintext(frame: &[u8]) -> CryptoResult<Vec<u8>> {
    if frame.len() < 4 {
        return Err(CryptoError::Decode(
            "decrypted data too short to read length".into(),
        ));
    }
    let declared = u32::from_le_bytes(frame[0..4].try_into().unwrap()) as usize;
    if declared > MAX_PLAINTEXT_LEN || declared > frame.len() - 4 {
        return Err(CryptoError::Decode(format!(
            "invalid payload length {declared}"
        )));
    }
    if frame.len() < 8 {
        return Err(CryptoError::Decode(
            "decrypted data too short to read payload".into(),
        ));
    }
    let stored = u32::from_le_bytes(frame[4..8].try_into().unwrap()) as usize;
    if 8 + stored > frame.len() {
        return Err(CryptoError::Decode(format!(
            "truncated payload: {stored} bytes declared, {} available",
            frame.len() - 8
        )));
    }
    let payload = &frame[8..8 + stored];
    if payload.is_empty() {
        return Ok(Vec::new());
    }
    if payload.len() != declared {
        return Err(CryptoError::Decode(format!(
            "payload length {} does not match header length {declared}",
            payload.len()
        )));
    }
    Ok(payload.to_vec())
}

/// Encrypts a string with a password and returns the sentinel-wrapped
/// envelope.
pub fn encrypt(plaintext: &str, password: &str) -> CryptoResult<String> {
    if password.is_empty() {
        return Err(CryptoError::EmptyPassword);
    }

    let key = password_to_key(password);
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key.as_slice()));

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);

    let frame = frame_plaintext(plaintext.as_bytes());
    // `encrypt` appends the 16-byte tag to the ciphertext.
    let sealed = cipher
        .encrypt(Nonce::from_slice(&nonce_bytes), frame.as_slice())
        .map_err(|e| CryptoError::Encrypt(e.to_string()))?;

    let mut combined = Vec::with_capacity(NONCE_SIZE + sealed.len());
    combined.extend_from_slice(&nonce_bytes);
    combined.extend_from_slice(&sealed);

    let hex_str = hex::encode(&combined);

    // A hyphen every 8 hex chars, except every 32nd which is a newline.
    let mut body = String::with_capacity(hex_str.len() + hex_str.len() / 8 + 2);
    for (i, c) in hex_str.chars().enumerate() {
        if i > 0 && i % 8 == 0 {
            if i % 32 == 0 {
                body.push('\n');
            } else {
                body.push('-');
            }
        }
        body.push(c);
    }

    Ok(format!(
        "{ENVELOPE_SENTINEL}{}\n{ENVELOPE_SENTINEL}",
        body.trim()
    ))
}

/// Decrypts a sentinel-wrapped envelope with a password.
///
/// Input that does not carry the sentinel prefix is returned unchanged —
/// the caller may hand us values that were never encrypted.
pub fn decrypt(envelope: &str, password: &str) -> CryptoResult<String> {
    if password.is_empty() {
        return Err(CryptoError::EmptyPassword);
    }

    // Repair literal `\n` escapes picked up in transit.
    let unescaped;
    let text = if envelope.contains("\\n") {
        unescaped = envelope.replace("\\n", "\n");
        unescaped.as_str()
    } else {
        envelope
    };

    if !text.starts_with(ENVELOPE_SENTINEL) {
        return Ok(envelope.to_string());
    }

    // Only the hex digits matter; hyphens, newlines and the sentinel are
    // presentation.
    let clean: String = text
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect();

    let combined = hex::decode(&clean)
        .map_err(|e| CryptoError::Decode(format!("malformed hex: {e}")))?;

    if combined.len() < NONCE_SIZE + TAG_SIZE {
        return Err(CryptoError::Decode(format!(
            "envelope too short: {} bytes",
            combined.len()
        )));
    }

    let key = password_to_key(password);
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key.as_slice()));

    let (nonce_bytes, sealed) = combined.split_at(NONCE_SIZE);
    // `decrypt` takes ciphertext ‖ tag and verifies the tag.
    let frame = cipher
        .decrypt(Nonce::from_slice(nonce_bytes), sealed)
        .map_err(|_| {
            CryptoError::Decode("authentication failed (wrong key or tampered data)".into())
        })?;

    let payload = unframe_plaintext(&frame)?;
    String::from_utf8(payload)
        .map_err(|e| CryptoError::Decode(format!("payload is not valid UTF-8: {e}")))
}

/// Returns true if the value carries the envelope sentinel.
pub fn is_encrypted(value: &str) -> bool {
    value.replace("\\n", "\n").trim().starts_with(ENVELOPE_SENTINEL)
}
