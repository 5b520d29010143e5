//! Wire encryption and shared-secret derivation for crawlbridge.
//!
//! Two pieces live here:
//!
//! 1. **Envelope encryption** (`envelope`): password-keyed authenticated
//!    encryption of RPC payloads. The password is folded through SHA-512
//!    into a 32-byte ChaCha20-Poly1305 key; the plaintext is framed with a
//!    duplicated little-endian length prefix and zero-padded to an 8-byte
//!    boundary before encryption; the result travels as a hex text block
//!    wrapped in `----` sentinel lines.
//!
//! 2. **Shared secrets** (`secrets`): a deterministic 1 MiB byte buffer
//!    expanded from a 128-bit secret with a 48-bit LCG. Both ends of the
//!    wire derive the same buffer, so a random integer offset exchanged in
//!    the clear selects a per-call session identifier — and from it a
//!    per-call encryption key — without ever transmitting key material.
//!
//! All state is held in explicit context objects constructed once at
//! startup; there are no process-wide key singletons.

pub mod envelope;
mod error;
pub mod secrets;

pub use envelope::{decrypt, encrypt, is_encrypted, ENVELOPE_SENTINEL, NONCE_SIZE, TAG_SIZE};
pub use error::{CryptoError, CryptoResult};
pub use secrets::{session_key, SharedSecrets, SECRET_BUFFER_SIZE};
