//! Deterministic shared-secret material and per-call session keys.
//!
//! Both ends of the wire expand the same 128-bit secret into a 1 MiB
//! pseudo-random buffer. A random integer offset — exchanged in the clear
//! as part of the request path — then selects a 128-bit session identifier
//! from the buffer, and the salted hash of that identifier becomes the
//! per-call envelope key. The generator is a 48-bit LCG kept bit-for-bit
//! compatible with the legacy byte stream; changing a single constant
//! here breaks every deployed peer.

use crate::error::{CryptoError, CryptoResult};
use sha2::{Digest, Sha512};
use uuid::Uuid;

/// Size of the expanded secret buffer.
pub const SECRET_BUFFER_SIZE: usize = 1024 * 1024;

const LCG_MULTIPLIER: u64 = 0x5DEECE66D;
const LCG_INCREMENT: u64 = 0xB;
const LCG_MASK: u64 = (1 << 48) - 1;

/// Applied to both halves of the identifier when bit 1 of the offset is set.
const XOR_MASK: u64 = 0xffcdcdcdffcdcdcd;

/// Fixed pepper mixed into every session key.
const PEPPER: &str = "0ca5784d-1925-4833-baf6-8af2dcf83467";

/// 48-bit linear-congruential generator matching `java.util.Random`.
struct LegacyRng {
    state: u64,
}

impl LegacyRng {
    fn new(seed: u64) -> Self {
        Self {
            state: (seed ^ LCG_MULTIPLIER) & LCG_MASK,
        }
    }

    fn next_u32(&mut self) -> u32 {
        self.state = self
            .state
            .wrapping_mul(LCG_MULTIPLIER)
            .wrapping_add(LCG_INCREMENT)
            & LCG_MASK;
        (self.state >> 16) as u32
    }

    /// Fills `out`, lowest byte of each draw first.
    fn fill_bytes(&mut self, out: &mut [u8]) {
        let mut i = 0;
        while i < out.len() {
            let mut word = self.next_u32();
            for _ in 0..4 {
                if i >= out.len() {
                    break;
                }
                out[i] = word as u8;
                word >>= 8;
                i += 1;
            }
        }
    }
}

/// Shared-secret context: the expanded buffer plus the secret it came from.
///
/// Built once at startup and passed to whatever needs per-call keys —
/// deliberately not a process-wide singleton.
pub struct SharedSecrets {
    secret: String,
    buffer: Vec<u8>,
}

impl SharedSecrets {
    /// Expands `secret` (a UUID string) into the shared buffer.
    pub fn new(secret: &str) -> CryptoResult<Self> {
        let parsed = Uuid::parse_str(secret.trim())
            .map_err(|e| CryptoError::InvalidSecret(format!("{secret}: {e}")))?;
        let bytes = parsed.as_bytes();
        let hi = u64::from_be_bytes(bytes[0..8].try_into().unwrap());
        let lo = u64::from_be_bytes(bytes[8..16].try_into().unwrap());

        let mut buffer = vec![0u8; SECRET_BUFFER_SIZE];
        LegacyRng::new(hi ^ lo).fill_bytes(&mut buffer);

        Ok(Self {
            secret: secret.to_string(),
            buffer,
        })
    }

    /// Derives the deterministic 128-bit session identifier for an offset.
    ///
    /// Bit 0 of the offset selects forward vs. reverse read order, bit 1
    /// selects the XOR mask, and the remaining bits (modulo the buffer
    /// length, clamped so 17 bytes remain readable) select the position.
    pub fn session_id(&self, offset: i32) -> Uuid {
        let reversed = offset & 1 != 0;
        let masked = offset & 2 != 0;

        // Shift as i64 first: `abs` of `i32::MIN >> 2` must not overflow.
        let mut pos = (((offset as i64) >> 2).unsigned_abs() as usize) % self.buffer.len();
        if pos + 16 >= self.buffer.len() {
            pos = self.buffer.len() - 17;
        }

        let (mut hi, mut lo) = if reversed {
            (
                u64::from_be_bytes(self.buffer[pos + 1..pos + 9].try_into().unwrap()),
                u64::from_be_bytes(self.buffer[pos + 9..pos + 17].try_into().unwrap()),
            )
        } else {
            (
                u64::from_be_bytes(self.buffer[pos..pos + 8].try_into().unwrap()),
                u64::from_be_bytes(self.buffer[pos + 8..pos + 16].try_into().unwrap()),
            )
        };

        if masked {
            hi ^= XOR_MASK;
            lo ^= XOR_MASK;
        }

        let mut id = [0u8; 16];
        if reversed {
            id[..8].copy_from_slice(&lo.to_be_bytes());
            id[8..].copy_from_slice(&hi.to_be_bytes());
        } else {
            id[..8].copy_from_slice(&hi.to_le_bytes());
            id[8..].copy_from_slice(&lo.to_le_bytes());
        }
        Uuid::from_bytes(id)
    }

    /// Derives the per-call envelope key for an offset: the salted hash of
    /// the session identifier under this context's secret.
    pub fn session_key_for_offset(&self, offset: i32) -> String {
        session_key(&self.secret, &self.session_id(offset).to_string())
    }
}

/// Salted SHA-512 combiner: `secret ‖ ":" ‖ value ‖ ":" ‖ pepper`,
/// lowercase hex, 128 characters.
pub fn session_key(secret: &str, value: &str) -> String {
    let salted = format!("{secret}:{value}:{PEPPER}");
    hex::encode(Sha512::digest(salted.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lcg_draws_match_the_legacy_stream() {
        // First 16 buffer bytes for the seed derived from
        // 345251e3-c7ef-4d71-8afd-84b89345f148.
        let seed = 0x345251e3c7ef4d71u64 ^ 0x8afd84b89345f148u64;
        let mut rng = LegacyRng::new(seed);
        let mut head = [0u8; 16];
        rng.fill_bytes(&mut head);
        assert_eq!(
            head,
            [
                0x8b, 0x32, 0x50, 0x08, 0x10, 0xfa, 0xd2, 0x2d, 0x7c, 0x80, 0xad, 0xd1, 0x65,
                0x50, 0x00, 0x39
            ]
        );
    }

    #[test]
    fn session_key_is_128_hex_chars() {
        let key = session_key("a", "b");
        assert_eq!(key.len(), 128);
        assert!(key.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
