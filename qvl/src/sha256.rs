//! Convenience wrappers for SHA-256 hashing.

/// Output length of SHA-256 in bytes.
pub const HASH_LEN: usize = 32;

/// SHA-256 digest a single input.
pub fn digest(input: &[u8]) -> [u8; HASH_LEN] {
    digest_many(&[input])
}

/// SHA-256 digest several input slices concatenated together, without
/// allocating.
pub fn digest_many(inputs: &[&[u8]]) -> [u8; HASH_LEN] {
    let mut ctx = ring::digest::Context::new(&ring::digest::SHA256);
    for input in inputs {
        ctx.update(input);
    }
    <[u8; HASH_LEN]>::try_from(ctx.finish().as_ref()).expect("SHA-256 output is 32 bytes")
}
