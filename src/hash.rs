//
// A fixed 64-bit rolling-XOR hash over byte packs.
//
// Not cryptographic, not collision-free. Used to turn variable-length byte
// strings (e.g. path elements) into a fixed-width key for a MapStream.
//

/// Rotates `n` left by `c` bits, masking `c` modulo 64 so that `c == 0` and
/// `c == 64` are both well-defined (identity) rotations.
pub fn rotate_left_64(n: u64, c: u32) -> u64 {
    n.rotate_left(c % 64)
}

/// Rotates `n` right by `c` bits, masking `c` modulo 64.
pub fn rotate_right_64(n: u64, c: u32) -> u64 {
    n.rotate_right(c % 64)
}

/// Hashes `bytes` into a 64-bit digest.
///
/// The input is treated as a sequence of 8-byte little-endian packs,
/// followed by a tail of `bytes.len() % 8` bytes zero-extended into a final
/// pack. Each pack `p_i` at index `i` is folded into the accumulator with
/// `h ^= rotate_left_64(p_i, (2*i) % 64)`. Empty input hashes to `0`.
pub fn hash(bytes: &[u8]) -> u64 {
    let mut h: u64 = 0;
    let mut i: u32 = 0;

    for chunk in bytes.chunks(8) {
        let mut pack = [0u8; 8];
        pack[..chunk.len()].copy_from_slice(chunk);
        let p = u64::from_le_bytes(pack);

        h ^= rotate_left_64(p, (2 * i) % 64);
        i += 1;
    }

    h
}
