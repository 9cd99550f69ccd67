//! Merkle root accumulation over ordered, byte-encodable items

use crate::crypto::{hash, HashValue, HASH_LEN};

/// Deterministic byte encoding. Identical logical content must always yield
/// identical bytes, since hashes are computed over this encoding.
pub trait Encodable {
    fn bytes(&self) -> Vec<u8>;
}

impl Encodable for Vec<u8> {
    fn bytes(&self) -> Vec<u8> {
        self.clone()
    }
}

impl Encodable for &[u8] {
    fn bytes(&self) -> Vec<u8> {
        self.to_vec()
    }
}

/// Computes the Merkle root of `items`.
///
/// The empty sequence hashes the empty byte string and a single item is the
/// hash of its encoding. Otherwise every item is hashed into a leaf and
/// adjacent digests are paired level by level, duplicating the last digest
/// of an odd-sized level.
pub fn merkle_root<T: Encodable>(items: &[T]) -> HashValue {
    match items {
        [] => return hash(&[]),
        [single] => return hash(&single.bytes()),
        _ => {}
    }

    let mut level: Vec<HashValue> = items.iter().map(|item| hash(&item.bytes())).collect();

    while level.len() > 1 {
        if level.len() % 2 != 0 {
            let last = level[level.len() - 1];
            level.push(last);
        }

        level = level
            .chunks_exact(2)
            .map(|pair| {
                let mut buf = [0u8; HASH_LEN * 2];
                buf[..HASH_LEN].copy_from_slice(&pair[0]);
                buf[HASH_LEN..].copy_from_slice(&pair[1]);
                hash(&buf)
            })
            .collect();
    }

    level[0]
}
