//! # Lamport
//! Primitives of the Lamport one-time signature scheme over SHA-256.
//!
//! A secret key is two rows of random blocks, the public key is the element-wise hash of the secret key,
//! and a signature reveals one block per message bit: row 0 for a 0-bit, row 1 for a 1-bit.
//!
//! The scheme is generic over its width `W`, the number of leading digest bits that are signed.
//! The real scheme signs all 256 bits of the digest; smaller widths give toy instances that are
//! cheap to exhaust in tests.
//!
//! # Modules
//!
//! - `codec`: fixed-size hex encoding of keys and signatures.
//! - `keys`: key rows, key generation, signing.
//! - `verify`: signature verification.
//!
//! # Bit order
//!
//! All buffers are read big-endian: bit 0 is the most significant bit of byte 0. Key rows are laid out
//! as all `W` blocks of row 0 followed by all `W` blocks of row 1.
mod codec;
mod keys;
mod verify;

use std::fmt;

use rand::RngCore;
use sha2::{Digest, Sha256};

pub use self::codec::FormatError;
pub use self::keys::{PublicKey, SecretKey, Signature};
pub use self::verify::verify;

/// Size of a block in bytes.
pub const BLOCK_SIZE: usize = 32;
/// Size of a message digest in bytes.
pub const MESSAGE_BYTES: usize = 32;
/// Width of the full scheme: every digest bit is signed.
pub const MESSAGE_BITS: usize = MESSAGE_BYTES * 8;

/// A 32 byte value, either a preimage or a public-key commitment.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Block(pub [u8; BLOCK_SIZE]);

impl Block {
    pub const ZERO: Block = Block([0; BLOCK_SIZE]);

    /// Draw a fresh block from `rng`. Entropy failures are returned, never retried.
    pub fn random<R: RngCore + ?Sized>(rng: &mut R) -> Result<Self, rand::Error> {
        let mut block = Self::ZERO;
        rng.try_fill_bytes(&mut block.0)?;
        Ok(block)
    }

    pub fn hash(&self) -> Block {
        hash_block(self)
    }

    pub fn as_bytes(&self) -> &[u8; BLOCK_SIZE] {
        &self.0
    }
}

impl fmt::Debug for Block {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Block({})", hex::encode(self.0))
    }
}

impl From<[u8; BLOCK_SIZE]> for Block {
    fn from(bytes: [u8; BLOCK_SIZE]) -> Self {
        Block(bytes)
    }
}

/// Apply SHA-256 to a single block.
pub fn hash_block(block: &Block) -> Block {
    Block(Sha256::digest(block.0).into())
}

/// Returns bit `i` of `buffer`, where bit 0 is the most significant bit of byte 0.
///
/// Panics if `i` is out of range for `buffer`.
#[inline]
pub fn bit_at(buffer: &[u8], i: usize) -> u8 {
    (buffer[i / 8] >> (7 - i % 8)) & 1
}

/// The SHA-256 digest of a message. Only the first `W` bits are signed by a scheme of width `W`.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Message([u8; MESSAGE_BYTES]);

impl Message {
    /// Hash an arbitrary input into a message digest.
    pub fn digest(input: impl AsRef<[u8]>) -> Self {
        Message(Sha256::digest(input.as_ref()).into())
    }

    /// Use `bytes` as the digest directly, e.g. to sign a chosen bit pattern.
    pub fn from_bytes(bytes: [u8; MESSAGE_BYTES]) -> Self {
        Message(bytes)
    }

    pub fn bit(&self, i: usize) -> u8 {
        bit_at(&self.0, i)
    }

    pub fn as_bytes(&self) -> &[u8; MESSAGE_BYTES] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Message({})", self.to_hex())
    }
}

/// Compile-time bounds on the scheme width.
pub(crate) struct Width<const W: usize>;

impl<const W: usize> Width<W> {
    pub(crate) const CHECK: () = assert!(
        W > 0 && W <= MESSAGE_BITS,
        "scheme width must be in 1..=256 bits"
    );
}

/// Key slot revealed for bit `i` of a message with the given bit value, in a scheme of width `W`.
///
/// Slots `0..W` address row 0, slots `W..2W` address row 1.
#[inline]
pub fn slot<const W: usize>(i: usize, bit: u8) -> usize {
    i + bit as usize * W
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bit_at_single_bit() {
        for i in 0..MESSAGE_BITS {
            let mut buffer = [0u8; MESSAGE_BYTES];
            buffer[i / 8] = 0x80 >> (i % 8);
            for j in 0..MESSAGE_BITS {
                assert_eq!(bit_at(&buffer, j), (i == j) as u8, "bit {} set, probing {}", i, j);
            }
        }
    }

    #[test]
    fn test_bit_at_byte_boundaries() {
        let buffer = [0x01, 0x80];
        assert_eq!(bit_at(&buffer, 0), 0);
        assert_eq!(bit_at(&buffer, 7), 1);
        assert_eq!(bit_at(&buffer, 8), 1);
        assert_eq!(bit_at(&buffer, 15), 0);
    }

    #[test]
    fn test_message_digest_is_sha256() {
        // echo -n "1" | sha256sum
        assert_eq!(
            Message::digest("1").to_hex(),
            "6b86b273ff34fce19d6b804eff5a3f5747ada4eaa22f1d49c01e52ddb7875b4b"
        );
        assert_eq!(Message::digest("1").bit(0), 0);
        assert_eq!(Message::digest("1").bit(1), 1);
    }

    #[test]
    fn test_hash_block() {
        // 32 zero bytes: python3 -c "import hashlib; print(hashlib.sha256(bytes(32)).hexdigest())"
        assert_eq!(
            hex::encode(Block::ZERO.hash().0),
            "66687aadf862bd776c8fc18b8e9f8e20089714856ee233b3902a591d0d5f2925"
        );
    }

    #[test]
    fn test_random_block_propagates_entropy_failure() {
        assert!(Block::random(&mut crate::util::FailingRng).is_err());
    }

    #[test]
    fn test_slot_layout() {
        assert_eq!(slot::<256>(0, 0), 0);
        assert_eq!(slot::<256>(255, 0), 255);
        assert_eq!(slot::<256>(0, 1), 256);
        assert_eq!(slot::<256>(255, 1), 511);
        assert_eq!(slot::<8>(3, 1), 11);
    }
}
