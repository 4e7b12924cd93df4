
pub use backend::*;
pub use pipes::*;

/// Builds a deterministic buffer the recording backend accepts as an assembly.
///
/// The buffer starts with the `MZ` signature; the remaining bytes are derived from `seed`, so
/// different seeds always produce different contents.
pub fn assembly_bytes(size: usize, seed: u8) -> Vec<u8> {
    assert!(size >= 4, "an assembly buffer needs room for its signature");

    let mut data = Vec::with_capacity(size);
    data.extend_from_slice(b"MZ");
    data.push(seed);
    let mut state = u32::from(seed).wrapping_mul(0x9E37_79B9) | 1;
    while data.len() < size {
        state ^= state << 13;
        state ^= state >> 17;
        state ^= state << 5;
        data.push(state as u8);
    }
    data
}
