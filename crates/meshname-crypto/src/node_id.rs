//! Node identifiers and the XOR metric

use std::fmt;
use std::str::FromStr;

use ed25519_dalek::VerifyingKey;

use crate::error::{CryptoError, CryptoResult};
use crate::NODE_ID_SIZE;

/// A 256-bit node identifier: the first 32 bytes of an Ed25519 public key.
///
/// Ordering between two IDs is always relative to a lookup target and uses
/// the Kademlia XOR metric: `a` is closer to `t` than `b` iff
/// `a ^ t < b ^ t` as a big-endian 256-bit integer.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId {
    bytes: [u8; NODE_ID_SIZE],
}

impl NodeId {
    /// Create a NodeId from raw bytes
    pub fn from_bytes(bytes: [u8; NODE_ID_SIZE]) -> Self {
        Self { bytes }
    }

    /// Derive a NodeId from an Ed25519 public key
    pub fn from_public_key(key: &VerifyingKey) -> Self {
        Self {
            bytes: key.to_bytes(),
        }
    }

    /// Get raw bytes
    pub fn as_bytes(&self) -> &[u8; NODE_ID_SIZE] {
        &self.bytes
    }

    /// Byte-wise XOR with another ID
    pub fn xor(&self, other: &NodeId) -> NodeId {
        let mut result = [0u8; NODE_ID_SIZE];
        for (i, r) in result.iter_mut().enumerate() {
            *r = self.bytes[i] ^ other.bytes[i];
        }
        NodeId::from_bytes(result)
    }

    /// XOR distance to a target, usable directly as a sort key
    pub fn distance(&self, target: &NodeId) -> [u8; NODE_ID_SIZE] {
        self.xor(target).bytes
    }

    /// True iff this ID is strictly closer to `target` than `other` is
    pub fn is_closer(&self, other: &NodeId, target: &NodeId) -> bool {
        self.distance(target) < other.distance(target)
    }

    /// Bucket index for `other` relative to this ID: the MSB-first 0-based
    /// position of the highest set bit of the XOR distance. `None` when the
    /// IDs are equal (self has no bucket).
    pub fn bucket_index(&self, other: &NodeId) -> Option<usize> {
        let xor = self.xor(other);
        for (i, byte) in xor.bytes.iter().enumerate() {
            if *byte != 0 {
                return Some(i * 8 + byte.leading_zeros() as usize);
            }
        }
        None
    }

    /// Convert to a lowercase hex string
    pub fn to_hex(&self) -> String {
        hex::encode(self.bytes)
    }

    /// Parse from a hex string
    pub fn from_hex(s: &str) -> CryptoResult<Self> {
        let decoded = hex::decode(s)?;
        if decoded.len() != NODE_ID_SIZE {
            return Err(CryptoError::InvalidKeyLength {
                expected: NODE_ID_SIZE,
                actual: decoded.len(),
            });
        }
        let mut bytes = [0u8; NODE_ID_SIZE];
        bytes.copy_from_slice(&decoded);
        Ok(Self { bytes })
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", &self.to_hex()[..8])
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl FromStr for NodeId {
    type Err = CryptoError;

    fn from_str(s: &str) -> CryptoResult<Self> {
        Self::from_hex(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(seed: u8) -> NodeId {
        NodeId::from_bytes([seed; NODE_ID_SIZE])
    }

    #[test]
    fn xor_with_self_is_zero() {
        let a = id(0xab);
        assert_eq!(a.xor(&a), id(0));
    }

    #[test]
    fn xor_is_commutative_and_associative() {
        let a = id(0x12);
        let b = id(0x34);
        let c = id(0x56);
        assert_eq!(a.xor(&b), b.xor(&a));
        assert_eq!(a.xor(&b.xor(&c)), a.xor(&b).xor(&c));
    }

    #[test]
    fn closer_is_a_strict_order() {
        let target = id(0);
        let near = id(0x01);
        let far = id(0xff);
        assert!(near.is_closer(&far, &target));
        assert!(!far.is_closer(&near, &target));
        assert!(!near.is_closer(&near, &target));
    }

    #[test]
    fn bucket_index_counts_leading_zero_bits() {
        let zero = id(0);

        let mut high = [0u8; NODE_ID_SIZE];
        high[0] = 0x80;
        assert_eq!(zero.bucket_index(&NodeId::from_bytes(high)), Some(0));

        let mut low_bit = [0u8; NODE_ID_SIZE];
        low_bit[0] = 0x01;
        assert_eq!(zero.bucket_index(&NodeId::from_bytes(low_bit)), Some(7));

        let mut last = [0u8; NODE_ID_SIZE];
        last[NODE_ID_SIZE - 1] = 0x01;
        assert_eq!(zero.bucket_index(&NodeId::from_bytes(last)), Some(255));

        assert_eq!(zero.bucket_index(&zero), None);
    }

    #[test]
    fn hex_round_trip() {
        let a = id(0x5a);
        let parsed = NodeId::from_hex(&a.to_hex()).unwrap();
        assert_eq!(a, parsed);

        assert!(NodeId::from_hex("zz").is_err());
        assert!(NodeId::from_hex("abcd").is_err());
    }
}
