// crates/cmo-runtime/src/rng.rs
// ============================================================================
// Module: Deterministic PRNG
// Description: A splitmix64-derived generator seeded once per run.
// Purpose: Back `activity.rand()` with a generator that reproduces an
//          identical sequence across RECORD and REPLAY given the same seed,
//          without pulling in a full `rand_core`/`rand_chacha` dependency.
// Dependencies: rand
// ============================================================================

//! ## Overview
//! [`SplitMix64`] is the smallest generator that gives every run a
//! reproducible, well-distributed stream of `u64`s from an 8-byte seed. The
//! seed is derived once, from the run's `traceId`, when the activity
//! boundary is constructed; nothing downstream re-seeds it mid-run.

use rand::RngCore;
use rand::SeedableRng;

/// A splitmix64 generator, seeded from a run-specific 8-byte value.
///
/// # Invariants
/// - Two instances constructed from the same seed produce an identical,
///   infinite stream of `next_u64()` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SplitMix64 {
    state: u64,
}

impl SplitMix64 {
    /// The golden-ratio increment splitmix64 advances its state by.
    const GOLDEN_GAMMA: u64 = 0x9E37_79B9_7F4A_7C15;

    /// Returns the raw internal state, letting a caller snapshot a
    /// generator mid-sequence and resume it later without re-deriving a
    /// seed.
    #[must_use]
    pub const fn raw_state(&self) -> u64 {
        self.state
    }

    /// Reconstructs a generator at a specific point in its sequence, as
    /// previously captured by [`SplitMix64::raw_state`].
    #[must_use]
    pub const fn from_raw_state(state: u64) -> Self {
        Self { state }
    }
}

impl SeedableRng for SplitMix64 {
    type Seed = [u8; 8];

    fn from_seed(seed: Self::Seed) -> Self {
        Self {
            state: u64::from_le_bytes(seed),
        }
    }
}

impl RngCore for SplitMix64 {
    fn next_u32(&mut self) -> u32 {
        let value = self.next_u64();
        u32::try_from(value >> 32).unwrap_or(u32::MAX)
    }

    fn next_u64(&mut self) -> u64 {
        self.state = self.state.wrapping_add(Self::GOLDEN_GAMMA);
        let mut z = self.state;
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        z ^ (z >> 31)
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        let mut chunks = dest.chunks_exact_mut(8);
        for chunk in &mut chunks {
            chunk.copy_from_slice(&self.next_u64().to_le_bytes());
        }
        let remainder = chunks.into_remainder();
        if !remainder.is_empty() {
            let tail = self.next_u64().to_le_bytes();
            remainder.copy_from_slice(&tail[..remainder.len()]);
        }
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand::Error> {
        self.fill_bytes(dest);
        Ok(())
    }
}

/// Draws a value in `[0, bound)` from `rng`, or an unbounded `u64` when
/// `bound` is `None` or zero.
///
/// Uses Lemire's rejection-free reduction rather than a naive modulo, so
/// the distribution is not biased toward the low end of the range.
#[must_use]
pub fn bounded_next(rng: &mut SplitMix64, bound: Option<u64>) -> u64 {
    match bound {
        Some(bound) if bound > 0 => {
            let mut result = u128::from(rng.next_u64()) * u128::from(bound);
            let mut leftover = u64::try_from(result & u128::from(u64::MAX)).unwrap_or(0);
            if leftover < bound {
                let threshold = bound.wrapping_neg() % bound;
                while leftover < threshold {
                    result = u128::from(rng.next_u64()) * u128::from(bound);
                    leftover = u64::try_from(result & u128::from(u64::MAX)).unwrap_or(0);
                }
            }
            u64::try_from(result >> 64).unwrap_or(0)
        }
        _ => rng.next_u64(),
    }
}

/// Derives an 8-byte seed from an arbitrary byte string (typically a run's
/// canonical `traceId` bytes), so every run gets its own deterministic
/// stream without the caller managing seed state directly.
#[must_use]
pub fn seed_from_bytes(bytes: &[u8]) -> [u8; 8] {
    let digest = cmo_core::core::hashing::hash_bytes(cmo_core::core::hashing::HashAlgorithm::Sha256, bytes);
    let mut seed = [0_u8; 8];
    let hex = digest.value.as_bytes();
    for (index, byte) in seed.iter_mut().enumerate() {
        let offset = index * 2;
        let hi = hex_nibble(hex[offset]);
        let lo = hex_nibble(hex[offset + 1]);
        *byte = (hi << 4) | lo;
    }
    seed
}

/// Converts one ASCII hex digit to its nibble value; [`HashDigest`] always
/// produces lowercase hex so only that range need be handled.
///
/// [`HashDigest`]: cmo_core::core::hashing::HashDigest
const fn hex_nibble(c: u8) -> u8 {
    match c {
        b'0'..=b'9' => c - b'0',
        b'a'..=b'f' => c - b'a' + 10,
        _ => 0,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, reason = "test-only assertions")]
mod tests {
    use rand::RngCore;
    use rand::SeedableRng;

    use super::SplitMix64;
    use super::bounded_next;
    use super::seed_from_bytes;

    #[test]
    fn same_seed_yields_same_stream() {
        let seed = seed_from_bytes(b"trace-42");
        let mut a = SplitMix64::from_seed(seed);
        let mut b = SplitMix64::from_seed(seed);
        for _ in 0..16 {
            assert_eq!(a.next_u64(), b.next_u64());
        }
    }

    #[test]
    fn different_seeds_diverge() {
        let mut a = SplitMix64::from_seed(seed_from_bytes(b"trace-a"));
        let mut b = SplitMix64::from_seed(seed_from_bytes(b"trace-b"));
        assert_ne!(a.next_u64(), b.next_u64());
    }

    #[test]
    fn bounded_values_stay_in_range() {
        let mut rng = SplitMix64::from_seed(seed_from_bytes(b"bounded"));
        for _ in 0..256 {
            let value = bounded_next(&mut rng, Some(10));
            assert!(value < 10);
        }
    }

    #[test]
    fn zero_bound_behaves_as_unbounded() {
        let mut rng = SplitMix64::from_seed(seed_from_bytes(b"zero"));
        let unbounded = bounded_next(&mut rng, Some(0));
        assert!(unbounded <= u64::MAX);
    }

    #[test]
    fn fill_bytes_handles_partial_chunk() {
        let mut rng = SplitMix64::from_seed(seed_from_bytes(b"fill"));
        let mut buf = [0_u8; 11];
        rng.fill_bytes(&mut buf);
        assert!(buf.iter().any(|b| *b != 0));
    }

    #[test]
    fn seed_derivation_is_deterministic() {
        assert_eq!(seed_from_bytes(b"same"), seed_from_bytes(b"same"));
    }

    #[test]
    fn raw_state_round_trips_mid_sequence() {
        let mut rng = SplitMix64::from_seed(seed_from_bytes(b"resume"));
        rng.next_u64();
        rng.next_u64();
        let snapshot = rng.raw_state();
        let expected = rng.next_u64();
        let mut resumed = SplitMix64::from_raw_state(snapshot);
        assert_eq!(resumed.next_u64(), expected);
    }
}
