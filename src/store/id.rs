//! Short Identifier Generator
//!
//! Identifiers are drawn from `A-Z0-9`. Four characters give 36^4 (about
//! 1.7M) combinations; after 100 colliding draws the generator falls back to
//! a single unchecked six-character draw (about 2.2G combinations).

use std::collections::HashSet;

use rand::Rng;

/// Identifier alphabet: uppercase letters and digits
pub const ALPHABET: &[u8; 36] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Length of regular identifiers
pub const SHORT_ID_LEN: usize = 4;

/// Length of the fallback identifier
pub const LONG_ID_LEN: usize = 6;

/// Draws attempted at the short length before falling back
pub const MAX_SHORT_ATTEMPTS: usize = 100;

/// Anything that can answer "is this identifier taken?"
pub trait KeySpace {
    fn contains_id(&self, id: &str) -> bool;
}

impl KeySpace for HashSet<String> {
    fn contains_id(&self, id: &str) -> bool {
        self.contains(id)
    }
}

impl<F> KeySpace for F
where
    F: Fn(&str) -> bool,
{
    fn contains_id(&self, id: &str) -> bool {
        self(id)
    }
}

/// Identifier generator with a bounded retry policy
#[derive(Debug, Clone)]
pub struct IdGenerator {
    short_len: usize,
    long_len: usize,
    max_attempts: usize,
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self {
            short_len: SHORT_ID_LEN,
            long_len: LONG_ID_LEN,
            max_attempts: MAX_SHORT_ATTEMPTS,
        }
    }
}

impl IdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Generate an identifier not present in `existing`, best effort
    pub fn generate<S: KeySpace + ?Sized>(&self, existing: &S) -> String {
        self.generate_with(&mut rand::rng(), existing)
    }

    /// Same as [`generate`](Self::generate) with a caller-supplied RNG
    pub fn generate_with<R, S>(&self, rng: &mut R, existing: &S) -> String
    where
        R: Rng + ?Sized,
        S: KeySpace + ?Sized,
    {
        for _ in 0..self.max_attempts {
            let candidate = random_id(rng, self.short_len);
            if !existing.contains_id(&candidate) {
                return candidate;
            }
        }
        random_id(rng, self.long_len)
    }
}

fn random_id<R: Rng + ?Sized>(rng: &mut R, len: usize) -> String {
    (0..len)
        .map(|_| ALPHABET[rng.random_range(0..ALPHABET.len())] as char)
        .collect()
}

/// True if `id` could have come from the generator
pub fn is_well_formed(id: &str) -> bool {
    (id.len() == SHORT_ID_LEN || id.len() == LONG_ID_LEN)
        && id.bytes().all(|b| ALPHABET.contains(&b))
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::cell::Cell;

    #[test]
    fn test_generates_short_id_on_empty_keyspace() {
        let id = IdGenerator::new().generate(&HashSet::new());
        assert_eq!(id.len(), SHORT_ID_LEN);
        assert!(is_well_formed(&id));
    }

    #[test]
    fn test_avoids_existing_keys() {
        let mut rng = StdRng::seed_from_u64(7);
        let generator = IdGenerator::new();
        let mut existing = HashSet::new();

        for _ in 0..1000 {
            let id = generator.generate_with(&mut rng, &existing);
            assert_eq!(id.len(), SHORT_ID_LEN);
            assert!(existing.insert(id), "generator returned a taken id");
        }
    }

    #[test]
    fn test_falls_back_to_long_id_after_bounded_attempts() {
        let lookups = Cell::new(0usize);
        let everything_taken = |_: &str| {
            lookups.set(lookups.get() + 1);
            true
        };

        let id = IdGenerator::new().generate(&everything_taken);

        assert_eq!(id.len(), LONG_ID_LEN);
        assert!(is_well_formed(&id));
        // The fallback is not checked against the key space
        assert_eq!(lookups.get(), MAX_SHORT_ATTEMPTS);
    }

    #[test]
    fn test_well_formed() {
        assert!(is_well_formed("X1Y2"));
        assert!(is_well_formed("ABC123"));
        assert!(!is_well_formed("x1y2"));
        assert!(!is_well_formed("X1Y"));
        assert!(!is_well_formed("X1Y2-"));
        assert!(!is_well_formed(""));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn prop_ids_use_alphabet_only(seed in any::<u64>()) {
            let mut rng = StdRng::seed_from_u64(seed);
            let id = IdGenerator::new().generate_with(&mut rng, &HashSet::new());
            prop_assert!(is_well_formed(&id));
        }
    }
}
