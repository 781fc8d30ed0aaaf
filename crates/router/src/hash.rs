//! Deterministic candidate selection: Rendezvous (HRW) hashing
//! as the default, Jump consistent hashing as the alternate.

use sha2::{Digest, Sha256};

/// Picks one of `candidate_count` connection pairs for a routing key.
/// Implementations must be deterministic: same key and candidate count
/// always yield the same index.
pub trait RouteHasher: Send + Sync {
    /// Choose an index in `0..candidate_count`. Panics if `candidate_count`
    /// is zero; callers must not invoke this on an empty candidate set.
    fn choose(&self, key: &str, candidate_count: usize) -> usize;
}

/// SHA-256 over `seed || bytes`, truncated to the leading 8 bytes. Using a
/// fixed cryptographic hash (rather than `DefaultHasher`) keeps routing
/// decisions stable across Rust toolchain versions.
fn hash64(seed: u64, bytes: &[u8]) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(seed.to_be_bytes());
    hasher.update(bytes);
    let digest = hasher.finalize();
    u64::from_be_bytes(digest[0..8].try_into().unwrap())
}

/// Highest Random Weight hashing: stable under candidate-set growth,
/// since only keys whose winning candidate was removed move.
#[derive(Debug, Default, Clone, Copy)]
pub struct RendezvousHasher;

impl RouteHasher for RendezvousHasher {
    fn choose(&self, key: &str, candidate_count: usize) -> usize {
        assert!(candidate_count > 0, "no candidates to route among");
        (0..candidate_count)
            .max_by_key(|&i| hash64(i as u64, key.as_bytes()))
            .unwrap_or(0)
    }
}

/// Jump Consistent Hash (Lamping & Veach, 2014): O(ln n), no per-candidate
/// storage, but candidate identity is positional rather than keyed — adding
/// or removing a candidate anywhere but the end reshuffles assignments.
#[derive(Debug, Default, Clone, Copy)]
pub struct JumpHasher;

impl RouteHasher for JumpHasher {
    fn choose(&self, key: &str, candidate_count: usize) -> usize {
        assert!(candidate_count > 0, "no candidates to route among");
        let mut khash = hash64(0, key.as_bytes());
        let mut b: i64 = -1;
        let mut j: i64 = 0;
        while j < candidate_count as i64 {
            b = j;
            khash = khash.wrapping_mul(2862933555777941757).wrapping_add(1);
            j = (((b + 1) as f64) * ((1i64 << 31) as f64 / (((khash >> 33) + 1) as f64))) as i64;
        }
        b as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn rendezvous_is_deterministic() {
        let hasher = RendezvousHasher;
        let a = hasher.choose("tenant-1|db|coll:item", 5);
        let b = hasher.choose("tenant-1|db|coll:item", 5);
        assert_eq!(a, b);
    }

    #[test]
    fn jump_is_deterministic() {
        let hasher = JumpHasher;
        let a = hasher.choose("tenant-1|db|coll:item", 5);
        let b = hasher.choose("tenant-1|db|coll:item", 5);
        assert_eq!(a, b);
    }

    #[test]
    fn single_candidate_always_picked() {
        assert_eq!(RendezvousHasher.choose("any-key", 1), 0);
        assert_eq!(JumpHasher.choose("any-key", 1), 0);
    }

    proptest! {
        #[test]
        fn rendezvous_always_in_range(key in "\\PC*", n in 1usize..32) {
            let idx = RendezvousHasher.choose(&key, n);
            prop_assert!(idx < n);
        }

        #[test]
        fn jump_always_in_range(key in "\\PC*", n in 1usize..32) {
            let idx = JumpHasher.choose(&key, n);
            prop_assert!(idx < n);
        }
    }
}
