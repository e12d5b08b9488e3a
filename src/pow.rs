//! Proof of work
//!
//! Difficulty is fixed at the chain's proof-of-work limit; retargeting is not
//! modeled.

use crate::constants::*;
use crate::error::{ConsensusError, Result};
use crate::serialization::block_hash;
use crate::types::*;

/// CheckProofOfWork: ℋ → {true, false}
///
/// Check if the block header satisfies the proof of work requirement.
/// Formula: SHA256(SHA256(header)) ≤ ExpandTarget(header.bits), with the
/// hash read as a little-endian 256-bit integer and the target capped at
/// the proof-of-work limit.
pub fn check_proof_of_work(header: &BlockHeader) -> Result<bool> {
    let target = expand_target(header.bits)?;
    if target.is_zero() {
        return Err(ConsensusError::InvalidProofOfWork("Zero target".to_string()));
    }
    if target > expand_target(POW_LIMIT_BITS)? {
        return Err(ConsensusError::InvalidProofOfWork("Target above limit".to_string()));
    }

    let hash_value = U256::from_bytes(&block_hash(header));
    Ok(hash_value <= target)
}

/// 256-bit integer for target comparisons, least significant word first
#[derive(Debug, Clone, PartialEq, Eq)]
struct U256([u64; 4]);

impl U256 {
    fn zero() -> Self {
        U256([0; 4])
    }

    fn from_u32(value: u32) -> Self {
        U256([value as u64, 0, 0, 0])
    }

    fn is_zero(&self) -> bool {
        self.0.iter().all(|&x| x == 0)
    }

    fn shl(&self, shift: u32) -> Self {
        if shift >= 256 {
            return U256::zero();
        }

        let mut result = U256::zero();
        let word_shift = (shift / 64) as usize;
        let bit_shift = shift % 64;

        for i in 0..4 {
            if i + word_shift < 4 {
                result.0[i + word_shift] |= self.0[i] << bit_shift;
                if bit_shift > 0 && i + word_shift + 1 < 4 {
                    result.0[i + word_shift + 1] |= self.0[i] >> (64 - bit_shift);
                }
            }
        }

        result
    }

    fn shr(&self, shift: u32) -> Self {
        if shift >= 256 {
            return U256::zero();
        }

        let mut result = U256::zero();
        let word_shift = (shift / 64) as usize;
        let bit_shift = shift % 64;

        for i in word_shift..4 {
            result.0[i - word_shift] |= self.0[i] >> bit_shift;
            if bit_shift > 0 && i > word_shift {
                result.0[i - word_shift - 1] |= self.0[i] << (64 - bit_shift);
            }
        }

        result
    }

    /// Interpret 32 bytes in wire (little-endian) order
    fn from_bytes(bytes: &[u8; 32]) -> Self {
        let mut words = [0u64; 4];
        for (word, chunk) in words.iter_mut().zip(bytes.chunks_exact(8)) {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(chunk);
            *word = u64::from_le_bytes(buf);
        }
        U256(words)
    }
}

impl PartialOrd for U256 {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for U256 {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.iter().rev().cmp(other.0.iter().rev())
    }
}

/// Expand target from compact representation
///
/// The format is: 0x207fffff where:
/// - 0x20 is the exponent (32)
/// - 0x7fffff is the mantissa
///
/// The actual target is: mantissa * 2^(8 * (exponent - 3)). A set sign bit
/// or a target that does not fit in 256 bits is rejected.
fn expand_target(bits: Natural) -> Result<U256> {
    let exponent = ((bits >> 24) & 0xff) as u32;
    let mantissa = (bits & 0x007fffff) as u32;

    if mantissa == 0 {
        return Ok(U256::zero());
    }
    if bits & 0x00800000 != 0 {
        return Err(ConsensusError::InvalidProofOfWork("Negative target".to_string()));
    }
    let overflow = exponent > 34
        || (mantissa > 0xff && exponent > 33)
        || (mantissa > 0xffff && exponent > 32);
    if overflow {
        return Err(ConsensusError::InvalidProofOfWork("Target too large".to_string()));
    }

    let mantissa_u256 = U256::from_u32(mantissa);
    if exponent <= 3 {
        Ok(mantissa_u256.shr(8 * (3 - exponent)))
    } else {
        Ok(mantissa_u256.shl(8 * (exponent - 3)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_header(bits: Natural, nonce: Natural) -> BlockHeader {
        BlockHeader {
            version: 1,
            prev_block_hash: [0; 32],
            merkle_root: [0; 32],
            timestamp: GENESIS_TIMESTAMP,
            bits,
            nonce,
        }
    }

    #[test]
    fn test_expand_target_regtest_limit() {
        let target = expand_target(POW_LIMIT_BITS).unwrap();
        assert_eq!(target.0[3], 0x7fffff << 40);
        assert_eq!(target.0[0], 0);
    }

    #[test]
    fn test_expand_target_zero_mantissa() {
        assert!(expand_target(0x1d000000).unwrap().is_zero());
    }

    #[test]
    fn test_expand_target_small_exponent() {
        assert_eq!(expand_target(0x0300ffff).unwrap(), U256::from_u32(0xffff));
        assert_eq!(expand_target(0x0200ffff).unwrap(), U256::from_u32(0xff));
        assert_eq!(expand_target(0x0400ffff).unwrap(), U256::from_u32(0xffff00));
    }

    #[test]
    fn test_expand_target_negative() {
        assert!(expand_target(0x1d800000 | 0x01).is_err());
    }

    #[test]
    fn test_expand_target_overflow() {
        assert!(expand_target(0x2101ffff).is_err());
        assert!(expand_target(0x2300ffff).is_err());
    }

    #[test]
    fn test_u256_ordering() {
        let small = U256([u64::MAX, 0, 0, 0]);
        let large = U256([0, 0, 0, 1]);
        assert!(small < large);
        assert_eq!(large.shr(192), U256::from_u32(1));
        assert_eq!(U256::from_u32(1).shl(192), large);
    }

    #[test]
    fn test_check_proof_of_work_regtest_some_nonce_passes() {
        let found = (0..64).any(|nonce| check_proof_of_work(&create_test_header(POW_LIMIT_BITS, nonce)).unwrap());
        assert!(found);
    }

    #[test]
    fn test_check_proof_of_work_above_limit() {
        assert!(check_proof_of_work(&create_test_header(0x2100ffff, 0)).is_err());
    }

    #[test]
    fn test_check_proof_of_work_hard_target_fails() {
        assert!(!check_proof_of_work(&create_test_header(0x03000001, 0)).unwrap());
    }

    #[test]
    fn test_check_proof_of_work_zero_target() {
        assert!(check_proof_of_work(&create_test_header(0x1d000000, 0)).is_err());
    }
}
