//! Fixed-size hex encoding.
//!
//! Keys are encoded as all `W` blocks of row 0 followed by all `W` blocks of row 1, signatures as their
//! `W` preimage blocks in bit order. For the full scheme that is 32768 hex characters for a key and
//! 16384 for a signature.
use thiserror::Error;

use super::{Block, PublicKey, SecretKey, Signature, Width, BLOCK_SIZE};

#[derive(Error, Debug, PartialEq)]
pub enum FormatError {
    #[error("expected {expected} hex characters, got {actual}")]
    Length { expected: usize, actual: usize },
    #[error("invalid hex: {0}")]
    Hex(#[from] hex::FromHexError),
}

fn decode_blocks(hex: &str, count: usize) -> Result<Vec<Block>, FormatError> {
    let expected = count * BLOCK_SIZE * 2;
    if hex.len() != expected {
        return Err(FormatError::Length {
            expected,
            actual: hex.len(),
        });
    }
    let bytes = hex::decode(hex)?;
    Ok(bytes
        .chunks_exact(BLOCK_SIZE)
        .map(|chunk| {
            let mut block = Block::ZERO;
            block.0.copy_from_slice(chunk);
            block
        })
        .collect())
}

fn encode_blocks<'a>(blocks: impl Iterator<Item = &'a Block>) -> String {
    blocks.map(|block| hex::encode(block.0)).collect()
}

fn decode_rows<const W: usize>(hex: &str) -> Result<[[Block; W]; 2], FormatError> {
    let () = Width::<W>::CHECK;
    let blocks = decode_blocks(hex, 2 * W)?;
    Ok(std::array::from_fn(|row| {
        std::array::from_fn(|i| blocks[row * W + i])
    }))
}

impl<const W: usize> PublicKey<W> {
    /// Number of hex characters of an encoded public key.
    pub const HEX_LEN: usize = 2 * W * BLOCK_SIZE * 2;

    pub fn from_hex(hex: &str) -> Result<Self, FormatError> {
        Ok(Self::from_rows(decode_rows::<W>(hex)?))
    }

    pub fn to_hex(&self) -> String {
        encode_blocks(self.rows().iter().flatten())
    }
}

impl<const W: usize> SecretKey<W> {
    pub const HEX_LEN: usize = 2 * W * BLOCK_SIZE * 2;

    pub fn from_hex(hex: &str) -> Result<Self, FormatError> {
        Ok(Self::from_rows(decode_rows::<W>(hex)?))
    }

    pub fn to_hex(&self) -> String {
        encode_blocks(self.rows().iter().flatten())
    }
}

impl<const W: usize> Signature<W> {
    /// Number of hex characters of an encoded signature.
    pub const HEX_LEN: usize = W * BLOCK_SIZE * 2;

    pub fn from_hex(hex: &str) -> Result<Self, FormatError> {
        let () = Width::<W>::CHECK;
        let blocks = decode_blocks(hex, W)?;
        Ok(Self::from_preimage(std::array::from_fn(|i| blocks[i])))
    }

    pub fn to_hex(&self) -> String {
        encode_blocks(self.preimage().iter())
    }
}
