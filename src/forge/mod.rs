//! # Forge
//! Forgery of Lamport signatures from one-time keys that signed more than one message.
//!
//! Every signature reveals one secret block per message bit. Signatures on different messages under the
//! same key reveal blocks of both rows, and any new message whose bits only select revealed blocks can be
//! signed without the secret key.
//!
//! # Modules
//!
//! - `leak`: merges the blocks revealed by known signatures into a [`PartialSecretKey`].
//! - `forger`: searches for a message that the recovered blocks can sign.
//!
//! The search cost is exponential in the number of bit positions where only one of the two slots leaked,
//! so the coverage reported by the aggregation decides whether a forgery is practical.
mod forger;
mod leak;

use indicatif::ProgressBar;
use itertools::Itertools;
use thiserror::Error;

use crate::{
    lamport::{Message, PublicKey, Signature},
    util::CancelToken,
};

pub use self::forger::{ForgeConfig, Forger, Forgery, StreamFactory};
pub use self::leak::{aggregate, Aggregation, Inconsistency, LeakAggregator, LeakError, PartialSecretKey};

#[derive(Error, Debug)]
pub enum ForgeError {
    /// The attempt cap was reached. Expected when too few slots leaked.
    #[error("no forgery found within {attempts} attempts")]
    Exhausted { attempts: u64 },
    #[error("search cancelled after {attempts} attempts")]
    Cancelled { attempts: u64 },
    #[error("random source failed: {0}")]
    RandomSource(#[from] rand::Error),
    #[error("known signature {index} does not verify under the public key")]
    InvalidKnownSignature { index: usize },
    #[error(transparent)]
    Leak(#[from] LeakError),
    #[error("invalid forge config: {0}")]
    Config(String),
}

/// Forge a signature under `public_key` from signatures it made on `known` messages.
///
/// Every known signature is verified first, then their leaked slots are merged and searched.
pub fn forge_from_known<const W: usize>(
    public_key: &PublicKey<W>,
    known: &[(Message, Signature<W>)],
    config: ForgeConfig,
    cancel: &CancelToken,
    progress: Option<ProgressBar>,
) -> Result<Forgery<W>, ForgeError> {
    for (index, (message, signature)) in known.iter().enumerate() {
        let valid = public_key.verify(message, signature);
        info!("ok {}: {}", index + 1, valid);
        if !valid {
            return Err(ForgeError::InvalidKnownSignature { index });
        }
    }
    let leaked = aggregate(known.iter().map(|(m, s)| (m, s))).into_consistent()?;
    let messages = known.iter().map(|(m, _)| *m).collect_vec();
    let mut forger = Forger::new(public_key, &leaked, &messages, config)?;
    if let Some(progress) = progress {
        forger = forger.with_progress(progress);
    }
    forger.forge(cancel)
}
