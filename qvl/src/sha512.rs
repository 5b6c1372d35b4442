//! Convenience wrappers for SHA-512 hashing.

/// Output length of SHA-512 in bytes.
pub const HASH_LEN: usize = 64;

/// SHA-512 digest a single input.
pub fn digest(input: &[u8]) -> [u8; HASH_LEN] {
    digest_many(&[input])
}

/// SHA-512 digest several input slices concatenated together, without
/// allocating.
pub fn digest_many(inputs: &[&[u8]]) -> [u8; HASH_LEN] {
    let mut ctx = ring::digest::Context::new(&ring::digest::SHA512);
    for input in inputs {
        ctx.update(input);
    }
    <[u8; HASH_LEN]>::try_from(ctx.finish().as_ref()).expect("SHA-512 output is 64 bytes")
}
