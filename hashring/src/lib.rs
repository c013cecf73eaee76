//! A consistent-hash ring over a fixed node set, used by the queue tier to
//! route a topic to the shard that owns it.

use sha1::{Digest, Sha1};

/// Virtual nodes scattered per real node, trading ring-build cost for
/// smoother key distribution.
pub const VIRTUAL_NODES: u32 = 100;

/// The 32-bit hash circle entries land on.
const HASH_SPACE: u64 = 1u64 << 32;

/// A deterministic mapping from keys to shard-owning nodes.
///
/// Two rings built from the same node set (in any order) answer identically
/// for every key, since points are sorted before lookup.
pub struct ConsistentHashRing {
    sorted_points: Vec<(u32, String)>,
}

impl ConsistentHashRing {
    /// Builds a ring over `nodes`. An empty node set produces a ring that
    /// answers `None` for every lookup.
    pub fn new(nodes: &[String]) -> Self {
        let mut points: Vec<(u32, String)> = Vec::with_capacity(nodes.len() * VIRTUAL_NODES as usize);
        for node in nodes {
            for i in 0..VIRTUAL_NODES {
                let point = hash(&format!("{node}#{i}"));
                points.push((point, node.clone()));
            }
        }
        points.sort_by_key(|(point, _)| *point);
        ConsistentHashRing { sorted_points: points }
    }

    /// Returns the id of the node that owns `key`, or `None` if the ring has
    /// no nodes.
    pub fn owner(&self, key: &str) -> Option<&str> {
        if self.sorted_points.is_empty() {
            return None;
        }

        let key_hash = hash(key);
        let idx = self
            .sorted_points
            .partition_point(|(point, _)| *point < key_hash);
        let idx = if idx == self.sorted_points.len() { 0 } else { idx };

        Some(self.sorted_points[idx].1.as_str())
    }
}

fn hash(input: &str) -> u32 {
    let digest = Sha1::digest(input.as_bytes());
    // Truncate the SHA-1 digest to a 32-bit point on the hash circle.
    let mut acc: u64 = 0;
    for byte in digest.iter() {
        acc = (acc << 8 | *byte as u64) % HASH_SPACE;
    }
    acc as u32
}
