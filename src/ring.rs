//! Consistent Hash Ring
//!
//! Master node names are placed on the ring by their SHA-256 digest. A key
//! belongs to the first node whose digest is greater than or equal to the
//! key's digest, wrapping around to the lowest entry.
//!
//! ```text
//!            node-a (0x1f..)
//!          ╱              ╲
//!   node-c (0xd4..)    node-b (0x6e..)
//!          ╲              ╱
//!   key 0x70.. → node-c, key 0xe0.. → node-a (wrap)
//! ```
//!
//! The ring itself is not synchronized; `ClusterState` wraps it in a single
//! mutex.

use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// Fixed-length digest used for ring positions
pub type RingHash = [u8; 32];

/// Digest of a node name or key
#[inline]
pub fn digest(input: &str) -> RingHash {
    Sha256::digest(input.as_bytes()).into()
}

/// One position on the ring
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RingEntry {
    pub hash: RingHash,
    pub node_name: String,
}

impl RingEntry {
    /// Hex form of the first 8 digest bytes, for logs and monitoring
    pub fn short_hash(&self) -> String {
        self.hash[..8].iter().map(|b| format!("{:02x}", b)).collect()
    }
}

/// Sorted ring of master node positions
#[derive(Debug, Clone, Default)]
pub struct HashRing {
    entries: Vec<RingEntry>,
}

impl HashRing {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a ring from a set of names
    pub fn from_nodes<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut ring = Self::new();
        for name in names {
            ring.add_node(name.as_ref());
        }
        ring
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn position(&self, hash: &RingHash) -> std::result::Result<usize, usize> {
        self.entries.binary_search_by(|e| e.hash.cmp(hash))
    }

    /// Insert a node. Returns false if it was already present.
    pub fn add_node(&mut self, name: &str) -> bool {
        let hash = digest(name);
        match self.position(&hash) {
            Ok(_) => false,
            Err(idx) => {
                self.entries.insert(
                    idx,
                    RingEntry {
                        hash,
                        node_name: name.to_string(),
                    },
                );
                true
            }
        }
    }

    /// Remove a node. Returns false if it was not present.
    pub fn remove_node(&mut self, name: &str) -> bool {
        match self.position(&digest(name)) {
            Ok(idx) => {
                self.entries.remove(idx);
                true
            }
            Err(_) => false,
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.position(&digest(name)).is_ok()
    }

    /// Node responsible for `key`
    pub fn owner(&self, key: &str) -> Result<&str> {
        if self.entries.is_empty() {
            return Err(Error::NoNodesAvailable);
        }

        let hash = digest(key);
        let idx = self.entries.partition_point(|e| e.hash < hash);
        let idx = if idx == self.entries.len() { 0 } else { idx };
        Ok(&self.entries[idx].node_name)
    }

    /// Node that follows `name` in ring order
    pub fn successor(&self, name: &str) -> Result<&str> {
        let idx = self
            .position(&digest(name))
            .map_err(|_| Error::NodeNotFound(name.to_string()))?;
        let next = (idx + 1) % self.entries.len();
        Ok(&self.entries[next].node_name)
    }

    /// Node names in ring order
    pub fn node_names(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.node_name.clone()).collect()
    }

    pub fn entries(&self) -> &[RingEntry] {
        &self.entries
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_empty_ring_has_no_owner() {
        let ring = HashRing::new();
        assert_matches!(ring.owner("any"), Err(Error::NoNodesAvailable));
    }

    #[test]
    fn test_add_is_idempotent() {
        let mut ring = HashRing::new();
        assert!(ring.add_node("node-a"));
        assert!(!ring.add_node("node-a"));
        assert_eq!(ring.len(), 1);
    }

    #[test]
    fn test_entries_sorted_by_digest() {
        let ring = HashRing::from_nodes(["node-a", "node-b", "node-c", "node-d"]);
        let hashes: Vec<RingHash> = ring.entries().iter().map(|e| e.hash).collect();
        let mut sorted = hashes.clone();
        sorted.sort();
        assert_eq!(hashes, sorted);
    }

    #[test]
    fn test_remove_node() {
        let mut ring = HashRing::from_nodes(["node-a", "node-b"]);
        assert!(ring.remove_node("node-a"));
        assert!(!ring.remove_node("node-a"));
        assert!(!ring.contains("node-a"));
        assert_eq!(ring.owner("whatever").unwrap(), "node-b");
    }

    #[test]
    fn test_single_node_owns_everything() {
        let ring = HashRing::from_nodes(["solo"]);
        for i in 0..50 {
            assert_eq!(ring.owner(&format!("key-{}", i)).unwrap(), "solo");
        }
        assert_eq!(ring.successor("solo").unwrap(), "solo");
    }

    #[test]
    fn test_owner_is_first_entry_at_or_after_key() {
        let ring = HashRing::from_nodes(["node-a", "node-b", "node-c"]);
        for i in 0..200 {
            let key = format!("user:{}", i);
            let hash = digest(&key);
            let owner = ring.owner(&key).unwrap();
            let expected = ring
                .entries()
                .iter()
                .find(|e| e.hash >= hash)
                .unwrap_or(&ring.entries()[0]);
            assert_eq!(owner, expected.node_name);
        }
    }

    #[test]
    fn test_node_name_key_maps_to_itself() {
        let ring = HashRing::from_nodes(["node-a", "node-b", "node-c"]);
        assert_eq!(ring.owner("node-b").unwrap(), "node-b");
    }

    #[test]
    fn test_successor_wraps() {
        let ring = HashRing::from_nodes(["node-a", "node-b", "node-c"]);
        let names = ring.node_names();

        assert_eq!(ring.successor(&names[0]).unwrap(), names[1]);
        assert_eq!(ring.successor(&names[1]).unwrap(), names[2]);
        assert_eq!(ring.successor(&names[2]).unwrap(), names[0]);
    }

    #[test]
    fn test_successor_of_unknown_node() {
        let ring = HashRing::from_nodes(["node-a"]);
        assert_matches!(ring.successor("ghost"), Err(Error::NodeNotFound(n)) if n == "ghost");
    }

    #[test]
    fn test_join_only_steals_from_successor() {
        let before = HashRing::from_nodes(["node-a", "node-b", "node-c"]);
        let mut after = before.clone();
        after.add_node("node-d");
        let successor = after.successor("node-d").unwrap().to_string();

        for i in 0..500 {
            let key = format!("k{}", i);
            let old = before.owner(&key).unwrap();
            let new = after.owner(&key).unwrap();
            if old != new {
                assert_eq!(new, "node-d");
                assert_eq!(old, successor);
            }
        }
    }

    #[test]
    fn test_short_hash() {
        let ring = HashRing::from_nodes(["node-a"]);
        assert_eq!(ring.entries()[0].short_hash().len(), 16);
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    fn node_names() -> impl Strategy<Value = Vec<String>> {
        prop::collection::hash_set("[a-z]{1,8}", 1..12).prop_map(|s| s.into_iter().collect())
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        /// Owner lookups are a pure function of ring state.
        #[test]
        fn prop_owner_deterministic(names in node_names(), key in ".{0,32}") {
            let ring = HashRing::from_nodes(&names);
            let first = ring.owner(&key).unwrap().to_string();
            for _ in 0..3 {
                prop_assert_eq!(ring.owner(&key).unwrap(), first.as_str());
            }
        }

        /// Every key resolves to a registered node.
        #[test]
        fn prop_owner_is_registered(names in node_names(), keys in prop::collection::vec(".{0,16}", 1..20)) {
            let ring = HashRing::from_nodes(&names);
            prop_assert_eq!(ring.len(), names.len());
            for key in &keys {
                let owner = ring.owner(key).unwrap();
                prop_assert!(names.iter().any(|n| n == owner));
            }
        }

        /// Insertion order does not change the ring.
        #[test]
        fn prop_order_independent(names in node_names()) {
            let forward = HashRing::from_nodes(&names);
            let backward = HashRing::from_nodes(names.iter().rev());
            prop_assert_eq!(forward.node_names(), backward.node_names());
        }
    }
}
