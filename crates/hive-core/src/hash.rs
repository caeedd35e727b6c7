/// Width in bytes of the digest produced by [`blake3_32`].
///
/// Every identifier width in the overlay is derived from this value, so changing the
/// hash function changes the routing digit count as well.
pub const HASH_LEN: usize = 32;

/// Computes BLAKE3 and returns the first-class 32-byte digest value.
pub fn blake3_32(input: &[u8]) -> [u8; HASH_LEN] {
    *blake3::hash(input).as_bytes()
}

/// Computes BLAKE3 over the concatenation of `parts` without allocating.
pub fn blake3_32_parts(parts: &[&[u8]]) -> [u8; HASH_LEN] {
    let mut hasher = blake3::Hasher::new();
    for part in parts {
        hasher.update(part);
    }
    *hasher.finalize().as_bytes()
}
