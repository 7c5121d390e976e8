//! RFC 6962 hashing primitives
//!
//! Domain-separated SHA-256: leaves are hashed with a 0x00 prefix, interior
//! nodes with a 0x01 prefix. `fold_run` derives the root of a dense tree
//! whose leaves are presented as a run of equal-span perfect-subtree roots,
//! optionally followed by one partial-subtree root; it is the only fold the
//! integrator needs, for complete tiles and for the right fringe alike.

use sha2::{Digest, Sha256};

/// Size of a node hash in bytes
pub const HASH_SIZE: usize = 32;

/// A node hash
pub type Hash = [u8; HASH_SIZE];

const LEAF_PREFIX: u8 = 0x00;
const NODE_PREFIX: u8 = 0x01;

/// Hash of a leaf entry (raw bytes, not the base64 wire form)
pub fn leaf_hash(entry: &[u8]) -> Hash {
    let mut h = Sha256::new();
    h.update([LEAF_PREFIX]);
    h.update(entry);
    h.finalize().into()
}

/// Hash of an interior node from its two children
pub fn node_hash(left: &Hash, right: &Hash) -> Hash {
    let mut h = Sha256::new();
    h.update([NODE_PREFIX]);
    h.update(left);
    h.update(right);
    h.finalize().into()
}

/// Root of the empty tree: SHA-256 of the empty string
pub fn empty_root() -> Hash {
    Sha256::digest([]).into()
}

/// Root of `roots.len() * span + partial_size` leaves.
///
/// Each element of `roots` is the root of a perfect subtree over `span`
/// leaves; `partial` optionally carries the root of a trailing subtree over
/// fewer than `span` leaves. `span` must be a power of two, so the RFC 6962
/// split (largest power of two strictly below the leaf count) always falls
/// on a subtree boundary.
pub fn fold_run(roots: &[Hash], span: u128, partial: Option<(Hash, u128)>) -> Hash {
    debug_assert!(span.is_power_of_two());
    match (roots.len(), partial) {
        (0, Some((p, _))) => p,
        (1, None) => roots[0],
        (0, None) => panic!("fold_run over zero leaves"),
        (n, partial) => {
            let partial_size = partial.map(|(_, s)| s).unwrap_or(0);
            let total = n as u128 * span + partial_size;
            let split_leaves = largest_power_of_two_below(total);
            debug_assert_eq!(split_leaves % span, 0);
            let split = (split_leaves / span) as usize;
            let left = fold_run(&roots[..split], span, None);
            let right = fold_run(&roots[split..], span, partial);
            node_hash(&left, &right)
        }
    }
}

/// Largest power of two strictly less than `n` (n must be >= 2)
fn largest_power_of_two_below(n: u128) -> u128 {
    debug_assert!(n >= 2);
    let m = n - 1;
    1u128 << (127 - m.leading_zeros())
}
