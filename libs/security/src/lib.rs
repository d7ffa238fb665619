//! Envelope security for the WeCom callback transport.
//!
//! The platform wraps every callback in an envelope whose ciphertext is
//! AES-256-CBC encrypted with an IV taken from the key prefix, padded to a
//! 32 byte PKCS#7 boundary, and authenticated by an unkeyed SHA-1 digest over
//! the sorted `(token, timestamp, nonce, ciphertext)` tuple. Both conventions
//! are fixed by the upstream protocol and are reproduced bit-for-bit here.

pub mod crypto;
pub mod signature;

pub use crypto::{CryptoConfig, CryptoError, EnvelopeCrypto, PKCS7_BLOCK_SIZE, RANDOM_PREFIX_LEN};
pub use signature::{signature, verify_signature};
