//! MD5 digests rendered the way the wire format expects: a 64-bit fold of
//! the digest, formatted as a signed decimal.

use md5::{Digest, Md5};

/// MD5 the input, fold to 64 bits, render as signed decimal.
///
/// The fold takes the final 8 digest bytes big-endian as an `i64`, matching
/// the signed decimals downstream consumers already store.
pub fn md5_signed_decimal(bytes: &[u8]) -> String {
    let digest = Md5::digest(bytes);
    let mut tail = [0u8; 8];
    tail.copy_from_slice(&digest[8..16]);
    i64::from_be_bytes(tail).to_string()
}
