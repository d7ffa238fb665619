use sha1::{Digest, Sha1};
use subtle::ConstantTimeEq;

/// Computes the envelope signature used by WeCom callbacks.
///
/// The four inputs are sorted lexicographically before hashing, so the
/// argument order does not matter.
///
/// ```
/// use security::signature;
///
/// let a = signature("token", "1700000000", "nonce", "cipher");
/// let b = signature("cipher", "nonce", "token", "1700000000");
/// assert_eq!(a, b);
/// assert_eq!(a.len(), 40);
/// ```
pub fn signature(token: &str, timestamp: &str, nonce: &str, encrypted: &str) -> String {
    let mut parts = [token, timestamp, nonce, encrypted];
    parts.sort_unstable();
    let mut hasher = Sha1::new();
    for part in parts {
        hasher.update(part.as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// Recomputes the signature and compares it against the presented one.
pub fn verify_signature(
    token: &str,
    presented: &str,
    timestamp: &str,
    nonce: &str,
    encrypted: &str,
) -> bool {
    let expected = signature(token, timestamp, nonce, encrypted);
    expected.as_bytes().ct_eq(presented.as_bytes()).into()
}
