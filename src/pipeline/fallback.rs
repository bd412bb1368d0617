//! Weighted-random "Surprise Me" seeds
//!
//! Used when a photo scan cannot produce a seed. A string is hashed with
//! 32-bit FNV-1a and the hash seeds a mulberry32 generator, so the same
//! entropy string always yields the same seed.

use std::time::{SystemTime, UNIX_EPOCH};

use uuid::Uuid;

/// Seed lengths and their relative weights
const LENGTH_WEIGHTS: [(usize, u32); 5] = [(2, 3), (3, 5), (4, 7), (6, 3), (8, 1)];

const FNV_OFFSET_BASIS: u32 = 2_166_136_261;
const FNV_PRIME: u32 = 16_777_619;
const MULBERRY_INCREMENT: u32 = 0x6d2b_79f5;

/// 32-bit FNV-1a over UTF-16 code units
pub fn hash_string(input: &str) -> u32 {
    input.encode_utf16().fold(FNV_OFFSET_BASIS, |hash, unit| {
        (hash ^ unit as u32).wrapping_mul(FNV_PRIME)
    })
}

/// Mulberry32 generator yielding floats in [0, 1)
#[derive(Debug, Clone)]
pub struct SeededRng {
    state: u32,
}

impl SeededRng {
    pub fn new(seed: &str) -> Self {
        Self {
            state: hash_string(seed).wrapping_add(MULBERRY_INCREMENT),
        }
    }

    pub fn next_f64(&mut self) -> f64 {
        self.state = self.state.wrapping_add(MULBERRY_INCREMENT);
        let t = self.state;
        let mut r = (t ^ (t >> 15)).wrapping_mul(1 | t);
        r ^= r.wrapping_add((r ^ (r >> 7)).wrapping_mul(61 | r));
        (r ^ (r >> 14)) as f64 / 4_294_967_296.0
    }

    /// Uniform integer in `min..=max`
    pub fn range_inclusive(&mut self, min: u32, max: u32) -> u32 {
        let span = (max - min + 1) as f64;
        (self.next_f64() * span).floor() as u32 + min
    }

    fn pick_length(&mut self) -> usize {
        let total: u32 = LENGTH_WEIGHTS.iter().map(|(_, weight)| weight).sum();
        let mut roll = self.next_f64() * total as f64;
        for (length, weight) in LENGTH_WEIGHTS {
            if roll < weight as f64 {
                return length;
            }
            roll -= weight as f64;
        }
        LENGTH_WEIGHTS[LENGTH_WEIGHTS.len() - 1].0
    }
}

/// Deterministic weighted seed for an explicit entropy string
pub fn weighted_seed_from(entropy: &str) -> String {
    let mut rng = SeededRng::new(entropy);
    let length = rng.pick_length();
    let mut seed: String = (0..length)
        .map(|_| char::from(b'0' + rng.range_inclusive(0, 9) as u8))
        .collect();
    if seed.starts_with('0') {
        seed.replace_range(0..1, "1");
    }
    seed
}

/// Weighted seed from fresh entropy
pub fn generate_weighted_seed() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    weighted_seed_from(&format!("{}-{}", millis, Uuid::new_v4()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fnv1a_known_values() {
        assert_eq!(hash_string(""), 2_166_136_261);
        assert_eq!(hash_string("a"), 0xe40c_292c);
    }

    #[test]
    fn test_rng_sequence_is_reproducible() {
        let mut rng = SeededRng::new("abc");
        let values: Vec<f64> = (0..3).map(|_| rng.next_f64()).collect();
        assert!((values[0] - 0.659_622_129_285_708_1).abs() < 1e-12);
        assert!((values[1] - 0.001_879_659_714_177_250_9).abs() < 1e-12);
        assert!((values[2] - 0.899_349_973_769_858_5).abs() < 1e-12);
    }

    #[test]
    fn test_weighted_seed_from_known_entropy() {
        assert_eq!(weighted_seed_from("photo-seed"), "373196");
        assert_eq!(weighted_seed_from("abc"), "1874");
        assert_eq!(weighted_seed_from("test"), "228");
        assert_eq!(weighted_seed_from("1700000000000-0.5"), "1426");
    }

    #[test]
    fn test_generated_seeds_are_valid() {
        for _ in 0..200 {
            let seed = generate_weighted_seed();
            assert!(matches!(seed.len(), 2 | 3 | 4 | 6 | 8), "unexpected length: {}", seed);
            assert!(seed.bytes().all(|b| b.is_ascii_digit()));
            assert!(!seed.starts_with('0'));
        }
    }
}
