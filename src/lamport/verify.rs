use super::{slot, Message, PublicKey, Signature};

/// Check `signature` on `message` under `public_key`.
///
/// For every signed bit `i`, the hash of the revealed preimage must equal the commitment of the row
/// selected by that bit. A single mismatch rejects the whole signature.
pub fn verify<const W: usize>(
    message: &Message,
    public_key: &PublicKey<W>,
    signature: &Signature<W>,
) -> bool {
    signature
        .preimage()
        .iter()
        .enumerate()
        .all(|(i, preimage)| preimage.hash() == *public_key.commitment(slot::<W>(i, message.bit(i))))
}

#[cfg(test)]
mod tests {
    use crate::lamport::{Block, Message, SecretKey, Signature};
    use crate::util::Rng;

    #[test]
    fn test_verify_honest_signature() -> anyhow::Result<()> {
        let sk = SecretKey::<256>::generate(&mut Rng::from_seed(0x42))?;
        let pk = sk.public_key();
        for input in ["1", "2", "3", "4", "hello world"] {
            let message = Message::digest(input);
            let sig = sk.sign(&message);
            assert!(pk.verify(&message, &sig), "honest signature on {:?}", input);
        }
        Ok(())
    }

    #[test]
    fn test_verify_rejects_single_mutation() -> anyhow::Result<()> {
        let sk = SecretKey::<256>::generate(&mut Rng::from_seed(0x42))?;
        let pk = sk.public_key();
        let message = Message::digest("Test message to sign");
        let sig = sk.sign(&message);
        for i in [0, 1, 7, 8, 128, 255] {
            let mut preimage = *sig.preimage();
            preimage[i].0[0] ^= 0x01;
            let forged = Signature::from_preimage(preimage);
            assert!(!pk.verify(&message, &forged), "mutated block {} accepted", i);
        }
        Ok(())
    }

    #[test]
    fn test_verify_rejects_other_message() -> anyhow::Result<()> {
        let sk = SecretKey::<256>::generate(&mut Rng::from_seed(3))?;
        let pk = sk.public_key();
        let sig = sk.sign(&Message::digest("1"));
        assert!(!pk.verify(&Message::digest("2"), &sig));
        Ok(())
    }

    #[test]
    fn test_verify_rejects_other_row() -> anyhow::Result<()> {
        let sk = SecretKey::<8>::generate(&mut Rng::from_seed(5))?;
        let pk = sk.public_key();
        let message = Message::from_bytes([0x00; 32]);
        // reveal the 1-row for a message of all 0-bits
        let sig = Signature::from_preimage(sk.rows()[1]);
        assert!(!pk.verify(&message, &sig));
        let sig = Signature::from_preimage(sk.rows()[0]);
        assert!(pk.verify(&message, &sig));
        Ok(())
    }

    #[test]
    fn test_toy_width_ignores_unsigned_bits() -> anyhow::Result<()> {
        let sk = SecretKey::<8>::generate(&mut Rng::from_seed(9))?;
        let pk = sk.public_key();
        let mut a = [0u8; 32];
        a[0] = 0xa5;
        let mut b = a;
        b[31] = 0xff;
        let sig = sk.sign(&Message::from_bytes(a));
        assert!(pk.verify(&Message::from_bytes(b), &sig));
        assert!(!pk.verify(
            &Message::from_bytes(a),
            &Signature::from_preimage([Block::ZERO; 8])
        ));
        Ok(())
    }
}
