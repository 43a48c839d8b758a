//! Rendezvous placement.
//!
//! Every key gets a deterministic host ranking: score each live host with
//! `sha256(host || key)` and sort descending, ties broken by host string.
//! A legacy 32-bit CRC ranking is composed in front for the migration
//! window: the legacy top two survive, then the remaining hosts follow the
//! current order.

use sha2::{Digest, Sha256};

/// Hosts that must never appear in a ranking regardless of peer config.
const KNOWN_DEAD_HOSTS: &[&str] = &[];

/// Number of legacy-ranked hosts preserved at the head of the composite
/// ranking during the migration window.
const LEGACY_WINDOW: usize = 2;

#[derive(Debug, Clone)]
pub struct RendezvousHasher {
    hosts: Vec<String>,
}

impl RendezvousHasher {
    pub fn new<I, S>(hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut hosts: Vec<String> = hosts
            .into_iter()
            .map(Into::into)
            .filter(|h| !KNOWN_DEAD_HOSTS.contains(&h.as_str()))
            .collect();
        hosts.sort();
        hosts.dedup();
        Self { hosts }
    }

    pub fn hosts(&self) -> &[String] {
        &self.hosts
    }

    /// Composite ranking: legacy top-2, then the current ranking with those
    /// two removed.
    pub fn rank(&self, key: &str) -> Vec<String> {
        let legacy = self.rank_legacy(key);
        let current = self.rank_current(key);

        let head: Vec<String> = legacy.into_iter().take(LEGACY_WINDOW).collect();
        let mut out = head.clone();
        out.extend(current.into_iter().filter(|h| !head.contains(h)));
        out
    }

    /// Current 256-bit ranking: descending by `sha256(host || key)`.
    pub fn rank_current(&self, key: &str) -> Vec<String> {
        let mut scored: Vec<(Vec<u8>, &String)> = self
            .hosts
            .iter()
            .map(|h| {
                let mut hasher = Sha256::new();
                hasher.update(h.as_bytes());
                hasher.update(key.as_bytes());
                (hasher.finalize().to_vec(), h)
            })
            .collect();
        scored.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(b.1)));
        scored.into_iter().map(|(_, h)| h.clone()).collect()
    }

    /// Legacy 32-bit CRC ranking used by older deployments.
    pub fn rank_legacy(&self, key: &str) -> Vec<String> {
        let mut scored: Vec<(u32, &String)> = self
            .hosts
            .iter()
            .map(|h| {
                let mut hasher = crc32fast::Hasher::new();
                hasher.update(h.as_bytes());
                hasher.update(key.as_bytes());
                (hasher.finalize(), h)
            })
            .collect();
        scored.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(b.1)));
        scored.into_iter().map(|(_, h)| h.clone()).collect()
    }

    /// Whether `host` is one of the first `replication_factor` placements
    /// for `key`. Store-all nodes own everything.
    pub fn is_placed(&self, host: &str, key: &str, replication_factor: usize, store_all: bool) -> bool {
        if store_all {
            return true;
        }
        self.rank(key)
            .iter()
            .take(replication_factor)
            .any(|h| h == host)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hosts() -> Vec<&'static str> {
        vec![
            "https://node1.example.com",
            "https://node2.example.com",
            "https://node3.example.com",
            "https://node4.example.com",
            "https://node5.example.com",
        ]
    }

    #[test]
    fn ranking_is_a_permutation() {
        let hasher = RendezvousHasher::new(hosts());
        for key in ["abc", "bafyxyz", "another-key"] {
            let ranked = hasher.rank(key);
            assert_eq!(ranked.len(), hosts().len());
            let mut sorted = ranked.clone();
            sorted.sort();
            let mut expected: Vec<String> = hosts().into_iter().map(String::from).collect();
            expected.sort();
            assert_eq!(sorted, expected, "rank must not duplicate or drop hosts");
        }
    }

    #[test]
    fn ranking_is_order_independent() {
        let forward = RendezvousHasher::new(hosts());
        let mut reversed_hosts = hosts();
        reversed_hosts.reverse();
        let reversed = RendezvousHasher::new(reversed_hosts);

        for key in ["k1", "k2", "k3", "k4"] {
            assert_eq!(forward.rank(key), reversed.rank(key));
        }
    }

    #[test]
    fn ranking_is_deterministic_per_key() {
        let hasher = RendezvousHasher::new(hosts());
        assert_eq!(hasher.rank("stable-key"), hasher.rank("stable-key"));
        // Different keys should (virtually always) produce different leaders
        // across a few samples.
        let leaders: std::collections::HashSet<String> = (0..16)
            .map(|i| hasher.rank(&format!("key-{i}"))[0].clone())
            .collect();
        assert!(leaders.len() > 1, "leader must depend on the key");
    }

    #[test]
    fn legacy_window_heads_the_composite_ranking() {
        let hasher = RendezvousHasher::new(hosts());
        let key = "window-key";
        let legacy_top2: Vec<String> = hasher.rank_legacy(key).into_iter().take(2).collect();
        let composite = hasher.rank(key);
        assert_eq!(&composite[..2], legacy_top2.as_slice());
        // the tail is the current ranking minus the legacy head
        let tail: Vec<String> = hasher
            .rank_current(key)
            .into_iter()
            .filter(|h| !legacy_top2.contains(h))
            .collect();
        assert_eq!(&composite[2..], tail.as_slice());
    }

    #[test]
    fn store_all_owns_every_key() {
        let hasher = RendezvousHasher::new(hosts());
        assert!(hasher.is_placed("https://node1.example.com", "any", 0, true));
    }

    #[test]
    fn placement_respects_replication_factor() {
        let hasher = RendezvousHasher::new(hosts());
        let key = "placement-key";
        let ranked = hasher.rank(key);
        assert!(hasher.is_placed(&ranked[0], key, 1, false));
        assert!(!hasher.is_placed(&ranked[4], key, 2, false));
        assert!(hasher.is_placed(&ranked[4], key, 5, false));
    }

    #[test]
    fn duplicate_hosts_are_collapsed() {
        let hasher = RendezvousHasher::new(["a", "a", "b"]);
        assert_eq!(hasher.hosts().len(), 2);
    }
}
