use std::fmt;

use rand::RngCore;

use super::{slot, verify, Block, Message, Width, MESSAGE_BITS};

/// Two rows of `W` secret preimages. Row 0 is revealed for 0-bits, row 1 for 1-bits.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretKey<const W: usize = MESSAGE_BITS> {
    rows: [[Block; W]; 2],
}

/// The element-wise hash of a [`SecretKey`].
#[derive(Clone, PartialEq, Eq)]
pub struct PublicKey<const W: usize = MESSAGE_BITS> {
    rows: [[Block; W]; 2],
}

/// One revealed preimage per signed message bit.
#[derive(Clone, PartialEq, Eq)]
pub struct Signature<const W: usize = MESSAGE_BITS> {
    preimage: [Block; W],
}

impl<const W: usize> SecretKey<W> {
    /// Generate a fresh secret key with `2 * W` blocks drawn from `rng`.
    pub fn generate<R: RngCore + ?Sized>(rng: &mut R) -> Result<Self, rand::Error> {
        let () = Width::<W>::CHECK;
        let mut rows = [[Block::ZERO; W]; 2];
        for block in rows.iter_mut().flatten() {
            *block = Block::random(rng)?;
        }
        Ok(Self { rows })
    }

    pub fn from_rows(rows: [[Block; W]; 2]) -> Self {
        let () = Width::<W>::CHECK;
        Self { rows }
    }

    pub fn rows(&self) -> &[[Block; W]; 2] {
        &self.rows
    }

    /// The block stored in `slot` (`0..2W`).
    pub fn block(&self, slot: usize) -> &Block {
        &self.rows[slot / W][slot % W]
    }

    pub fn public_key(&self) -> PublicKey<W> {
        let mut rows = self.rows;
        for block in rows.iter_mut().flatten() {
            *block = block.hash();
        }
        PublicKey { rows }
    }

    /// Reveal, for every signed bit of `message`, the block of the row selected by that bit.
    ///
    /// Signing two different messages with the same key leaks slots of both rows. See [`crate::forge`].
    pub fn sign(&self, message: &Message) -> Signature<W> {
        Signature {
            preimage: std::array::from_fn(|i| *self.block(slot::<W>(i, message.bit(i)))),
        }
    }
}

impl<const W: usize> PublicKey<W> {
    pub fn from_rows(rows: [[Block; W]; 2]) -> Self {
        let () = Width::<W>::CHECK;
        Self { rows }
    }

    pub fn rows(&self) -> &[[Block; W]; 2] {
        &self.rows
    }

    /// The commitment stored in `slot` (`0..2W`).
    pub fn commitment(&self, slot: usize) -> &Block {
        &self.rows[slot / W][slot % W]
    }

    pub fn verify(&self, message: &Message, signature: &Signature<W>) -> bool {
        verify(message, self, signature)
    }
}

impl<const W: usize> Signature<W> {
    pub fn from_preimage(preimage: [Block; W]) -> Self {
        let () = Width::<W>::CHECK;
        Self { preimage }
    }

    pub fn preimage(&self) -> &[Block; W] {
        &self.preimage
    }

    pub fn block(&self, i: usize) -> &Block {
        &self.preimage[i]
    }
}

impl<const W: usize> fmt::Debug for SecretKey<W> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("SecretKey")
            .field("width", &W)
            .finish_non_exhaustive()
    }
}

impl<const W: usize> fmt::Debug for PublicKey<W> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("PublicKey")
            .field("width", &W)
            .field("first", &self.rows[0][0])
            .finish_non_exhaustive()
    }
}

impl<const W: usize> fmt::Debug for Signature<W> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Signature")
            .field("width", &W)
            .field("first", &self.preimage[0])
            .finish_non_exhaustive()
    }
}
