//! Recovery of secret-key slots from one-time signatures that were used more than once.
use itertools::Itertools;
use thiserror::Error;

use crate::lamport::{slot, Block, Message, PublicKey, Signature, Width, MESSAGE_BITS};

/// Secret-key blocks revealed by known signatures, addressed by slot (`0..W` row 0, `W..2W` row 1).
#[derive(Clone, PartialEq, Eq)]
pub struct PartialSecretKey<const W: usize = MESSAGE_BITS> {
    rows: [[Option<Block>; W]; 2],
}

impl<const W: usize> Default for PartialSecretKey<W> {
    fn default() -> Self {
        let () = Width::<W>::CHECK;
        Self {
            rows: [[None; W]; 2],
        }
    }
}

impl<const W: usize> std::fmt::Debug for PartialSecretKey<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("PartialSecretKey")
            .field("width", &W)
            .field("coverage", &self.coverage())
            .finish()
    }
}

impl<const W: usize> PartialSecretKey<W> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, slot: usize) -> Option<&Block> {
        self.rows[slot / W][slot % W].as_ref()
    }

    fn entry(&mut self, slot: usize) -> &mut Option<Block> {
        &mut self.rows[slot / W][slot % W]
    }

    /// Number of distinct slots recovered, at most `2W`.
    pub fn coverage(&self) -> usize {
        self.rows.iter().flatten().filter(|b| b.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.coverage() == 0
    }

    /// All recovered slots in ascending order.
    pub fn slots(&self) -> impl Iterator<Item = (usize, &Block)> + '_ {
        self.rows
            .iter()
            .flatten()
            .enumerate()
            .filter_map(|(slot, block)| block.as_ref().map(|b| (slot, b)))
    }

    /// Whether every slot a signature on `message` would reveal has been recovered.
    pub fn covers(&self, message: &Message) -> bool {
        (0..W).all(|i| self.get(slot::<W>(i, message.bit(i))).is_some())
    }

    /// Probability that the digest of a fresh random message is covered.
    ///
    /// Each bit position contributes the fraction of its two slots that are recovered, so the search
    /// cost grows exponentially in the number of half-covered positions.
    pub fn success_probability(&self) -> f64 {
        (0..W)
            .map(|i| {
                let leaked = (0..2u8)
                    .filter(|&bit| self.get(slot::<W>(i, bit)).is_some())
                    .count();
                leaked as f64 / 2.0
            })
            .product()
    }

    /// Drop every recovered block that does not hash to its public commitment. Returns the dropped slots.
    pub fn validate(&mut self, public_key: &PublicKey<W>) -> Vec<usize> {
        let invalid = self
            .slots()
            .filter(|(slot, block)| block.hash() != *public_key.commitment(*slot))
            .map(|(slot, _)| slot)
            .collect_vec();
        for &slot in &invalid {
            *self.entry(slot) = None;
        }
        if !invalid.is_empty() {
            warn!(
                "Dropped {} leaked slot(s) not matching the public key: {}",
                invalid.len(),
                invalid.iter().join(", ")
            );
        }
        invalid
    }
}

/// Two known signatures reveal different blocks for the same slot.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Inconsistency {
    pub slot: usize,
    /// Index of the absorbed signature that disagreed with the recorded block.
    pub signature: usize,
    pub recorded: Block,
    pub conflicting: Block,
}

#[derive(Error, Debug)]
pub enum LeakError {
    #[error("known signatures disagree on {} slot(s), first at slot {}", .0.len(), .0[0].slot)]
    Inconsistent(Vec<Inconsistency>),
}

/// Merges the slots revealed by known `(message, signature)` pairs into a [`PartialSecretKey`].
///
/// The first block seen for a slot is kept. Later, different blocks for that slot are reported as
/// [`Inconsistency`] rather than overwriting it.
pub struct LeakAggregator<const W: usize = MESSAGE_BITS> {
    key: PartialSecretKey<W>,
    inconsistencies: Vec<Inconsistency>,
    absorbed: usize,
}

impl<const W: usize> Default for LeakAggregator<W> {
    fn default() -> Self {
        Self {
            key: PartialSecretKey::new(),
            inconsistencies: vec![],
            absorbed: 0,
        }
    }
}

impl<const W: usize> LeakAggregator<W> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the slots revealed by `signature` on `message`. Returns the number of newly recovered slots.
    pub fn absorb(&mut self, message: &Message, signature: &Signature<W>) -> usize {
        let index = self.absorbed;
        self.absorbed += 1;
        let mut recovered = 0;
        for (i, block) in signature.preimage().iter().enumerate() {
            let slot = slot::<W>(i, message.bit(i));
            let entry = self.key.entry(slot);
            match *entry {
                Some(recorded) if recorded != *block => {
                    warn!(
                        "Signature {} reveals a different block for slot {} than an earlier signature",
                        index, slot
                    );
                    self.inconsistencies.push(Inconsistency {
                        slot,
                        signature: index,
                        recorded,
                        conflicting: *block,
                    });
                }
                Some(_) => {}
                None => {
                    *entry = Some(*block);
                    recovered += 1;
                }
            }
        }
        debug!(
            "Signature {} recovered {} new slot(s), coverage {}/{}",
            index,
            recovered,
            self.key.coverage(),
            2 * W
        );
        recovered
    }

    pub fn finish(self) -> Aggregation<W> {
        info!(
            "Recovered {} out of {} secret key slots from {} signature(s)",
            self.key.coverage(),
            2 * W,
            self.absorbed
        );
        Aggregation {
            key: self.key,
            inconsistencies: self.inconsistencies,
        }
    }
}

/// Result of leak aggregation: the merged key plus every inconsistency found on the way.
#[derive(Debug)]
pub struct Aggregation<const W: usize = MESSAGE_BITS> {
    pub key: PartialSecretKey<W>,
    pub inconsistencies: Vec<Inconsistency>,
}

impl<const W: usize> Aggregation<W> {
    pub fn coverage(&self) -> usize {
        self.key.coverage()
    }

    pub fn is_consistent(&self) -> bool {
        self.inconsistencies.is_empty()
    }

    /// The merged key, or an error if any two signatures disagreed.
    pub fn into_consistent(self) -> Result<PartialSecretKey<W>, LeakError> {
        if self.inconsistencies.is_empty() {
            Ok(self.key)
        } else {
            Err(LeakError::Inconsistent(self.inconsistencies))
        }
    }
}

/// Aggregate all `pairs` at once.
pub fn aggregate<'a, const W: usize>(
    pairs: impl IntoIterator<Item = (&'a Message, &'a Signature<W>)>,
) -> Aggregation<W> {
    let mut aggregator = LeakAggregator::new();
    for (message, signature) in pairs {
        aggregator.absorb(message, signature);
    }
    aggregator.finish()
}
