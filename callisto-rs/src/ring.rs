//! Provides the consistent-hash ring which maps keys to the peers owning them.
//!
//! Every physical peer contributes a configurable number of virtual nodes (replicas) to the
//! ring, which smooths the distribution of the key space. A key is owned by the peer whose
//! virtual node is the first one at or after the key's hash position - wrapping around to the
//! start of the ring if necessary.
//!
//! The placement is **wire visible**: all nodes of a cluster must compute identical rings, so
//! both the hash function (CRC32-IEEE by default) and the naming of virtual nodes (the decimal
//! replica index concatenated with the peer id) must never change for a deployed cluster.
//!
//! # Examples
//!
//! ```
//! # use callisto::ring::HashRing;
//! let mut ring = HashRing::new(3, None);
//! ring.add(&["peer-a", "peer-b", "peer-c"]);
//!
//! // Placement is deterministic: the same key always maps to the same peer...
//! assert_eq!(ring.get("foo"), ring.get("foo"));
//! assert!(!ring.is_empty());
//! ```
use std::collections::HashMap;

/// Computes a 32 bit hash position for the given bytes.
///
/// The default is CRC32-IEEE. A custom function is mainly useful for tests which want full
/// control over the placement.
pub type HashFn = fn(&[u8]) -> u32;

/// Maps keys to peer ids via consistent hashing with virtual nodes.
pub struct HashRing {
    hash: HashFn,
    replicas: usize,
    keys: Vec<u32>,
    mapping: HashMap<u32, String>,
}

impl HashRing {
    /// Creates a new ring where each added peer contributes **replicas** virtual nodes.
    ///
    /// If no hash function is given, CRC32-IEEE is used - which is what every production
    /// cluster should stick to, as the placement must be identical on all nodes.
    pub fn new(replicas: usize, hash: Option<HashFn>) -> Self {
        HashRing {
            hash: hash.unwrap_or(crc32fast::hash),
            replicas,
            keys: Vec::new(),
            mapping: HashMap::new(),
        }
    }

    /// Determines if no peer has been added yet.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Adds the given peer ids to the ring.
    ///
    /// For each id, the virtual nodes are named by prefixing the id with the decimal replica
    /// index (`"0id"`, `"1id"`, ...) and hashed onto the ring. Adding is strictly additive -
    /// there is no removal. In the rare case that two virtual nodes collide on the same
    /// position, the later added peer wins.
    pub fn add<S: AsRef<str>>(&mut self, ids: &[S]) {
        for id in ids {
            let id = id.as_ref();
            for replica in 0..self.replicas {
                let position = (self.hash)(format!("{}{}", replica, id).as_bytes());
                self.keys.push(position);
                let _ = self.mapping.insert(position, id.to_owned());
            }
        }

        self.keys.sort_unstable();
    }

    /// Returns the id of the peer owning the given key, or **None** if the ring is empty.
    pub fn get(&self, key: &str) -> Option<&str> {
        if self.keys.is_empty() {
            return None;
        }

        let hash = (self.hash)(key.as_bytes());

        // Clockwise, the first virtual node at or after the key's position owns it - if there
        // is none, the ring wraps around to its first position.
        let index = self.keys.partition_point(|&position| position < hash);
        let position = if index == self.keys.len() {
            self.keys[0]
        } else {
            self.keys[index]
        };

        self.mapping.get(&position).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::HashRing;

    /// Interprets the hashed bytes as a decimal number, which makes placements obvious.
    fn decimal_hash(data: &[u8]) -> u32 {
        std::str::from_utf8(data)
            .ok()
            .and_then(|str| str.parse().ok())
            .unwrap_or(0)
    }

    #[test]
    fn an_empty_ring_owns_nothing() {
        let ring = HashRing::new(3, None);
        assert!(ring.is_empty());
        assert_eq!(ring.get("foo"), None);
    }

    #[test]
    fn virtual_nodes_are_seeded_with_the_decimal_replica_index() {
        let mut ring = HashRing::new(3, Some(decimal_hash));
        ring.add(&["7"]);

        // The id "7" contributes the virtual nodes "07", "17" and "27", which our decimal
        // hash places at 7, 17 and 27.
        assert_eq!(ring.get("3"), Some("7"));
        assert_eq!(ring.get("11"), Some("7"));
        assert_eq!(ring.get("25"), Some("7"));
        // Past the last position the ring wraps around...
        assert_eq!(ring.get("99"), Some("7"));
    }

    #[test]
    fn keys_are_routed_clockwise() {
        let mut ring = HashRing::new(1, Some(decimal_hash));
        ring.add(&["10", "20", "30"]);

        // Each virtual node is "0" + id, hence the positions are 10, 20 and 30.
        assert_eq!(ring.get("5"), Some("10"));
        assert_eq!(ring.get("10"), Some("10"));
        assert_eq!(ring.get("15"), Some("20"));
        assert_eq!(ring.get("27"), Some("30"));
        assert_eq!(ring.get("35"), Some("10"));
    }

    /// Collapses the whole ring onto a single position.
    fn constant_hash(_data: &[u8]) -> u32 {
        42
    }

    #[test]
    fn later_additions_win_position_collisions() {
        let mut ring = HashRing::new(1, Some(constant_hash));
        ring.add(&["first"]);
        ring.add(&["second"]);

        assert_eq!(ring.get("anything"), Some("second"));
    }

    #[test]
    fn placement_is_deterministic_across_rings() {
        let keys = ["foo", "bar", "baz", "Tom", "Jack", "Sam"];

        let mut first = HashRing::new(3, None);
        first.add(&["A", "B", "C"]);

        let mut second = HashRing::new(3, None);
        second.add(&["A"]);
        second.add(&["B", "C"]);

        for key in keys {
            let owner = first.get(key);
            assert!(matches!(owner, Some("A") | Some("B") | Some("C")));
            assert_eq!(owner, second.get(key), "placement diverged for '{}'", key);
        }
    }

    #[test]
    fn removing_a_peer_only_moves_its_own_keys() {
        let mut full = HashRing::new(50, None);
        full.add(&["A", "B", "C"]);

        let mut reduced = HashRing::new(50, None);
        reduced.add(&["A", "B"]);

        // Keys which were not owned by "C" must keep their assignment - consistent hashing
        // only redistributes the key space of the removed peer.
        for i in 0..200 {
            let key = format!("key-{}", i);
            match full.get(&key) {
                Some("C") => (),
                owner => assert_eq!(owner, reduced.get(&key), "'{}' moved needlessly", key),
            }
        }
    }
}
