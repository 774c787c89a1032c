use std::{
    fs::File,
    io::BufReader,
    path::Path,
    sync::atomic::{AtomicBool, AtomicU64, Ordering},
    thread,
};

use indicatif::ProgressBar;
use itertools::Itertools;
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::{
    lamport::{slot, verify, Block, Message, PublicKey, Signature, MESSAGE_BITS},
    util::{CancelToken, Rng},
};

use super::{ForgeError, PartialSecretKey};

/// Characters of the random message suffix.
const SUFFIX_ALPHABET: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz-";

/// Attempts a worker performs before reporting to the progress bar.
const PROGRESS_STEP: u64 = 1 << 12;

/// Parameters of the forgery search.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ForgeConfig {
    /// Marker every forged message starts with.
    pub prefix: String,
    /// Number of random characters appended to the prefix per attempt.
    pub suffix_len: usize,
    /// Upper bound on attempts across all workers.
    pub max_attempts: u64,
    /// Number of worker threads.
    pub threads: usize,
    /// Base seed for reproducible worker streams. Workers seed from the OS if unset.
    pub seed: Option<u64>,
    /// Discard candidates that need an unleaked slot before assembling and verifying a signature.
    pub precheck_coverage: bool,
}

impl Default for ForgeConfig {
    fn default() -> Self {
        Self {
            prefix: "forge;".to_string(),
            suffix_len: 8,
            max_attempts: 1_000_000_000,
            threads: thread::available_parallelism().map_or(1, |n| n.get()),
            seed: None,
            precheck_coverage: true,
        }
    }
}

impl ForgeConfig {
    /// Load a config from a JSON file. Missing fields take their default values.
    pub fn from_jsonfile<P: AsRef<Path>>(filepath: P) -> anyhow::Result<ForgeConfig> {
        let file = File::open(filepath)?;
        let config: ForgeConfig = serde_json::from_reader(BufReader::new(file))?;
        Ok(config)
    }

    fn check(&self) -> Result<(), ForgeError> {
        if self.prefix.is_empty() {
            return Err(ForgeError::Config("message prefix must not be empty".into()));
        }
        if self.suffix_len == 0 {
            return Err(ForgeError::Config("suffix length must be positive".into()));
        }
        if self.threads == 0 {
            return Err(ForgeError::Config("at least one worker thread is required".into()));
        }
        Ok(())
    }
}

/// A message chosen by the forger together with a signature that verifies under the attacked key.
#[derive(Clone, Debug)]
pub struct Forgery<const W: usize = MESSAGE_BITS> {
    pub message: String,
    pub digest: Message,
    pub signature: Signature<W>,
    /// Attempts made across all workers when the forgery was found.
    pub attempts: u64,
    pub worker: usize,
    /// Number of leaked slots the search worked with.
    pub coverage: usize,
}

/// Builds the random stream of worker `i`.
pub type StreamFactory<'a> =
    Box<dyn Fn(usize) -> Result<Box<dyn RngCore>, rand::Error> + Send + Sync + 'a>;

/// State shared by all workers of one search.
#[derive(Default)]
struct Search {
    attempts: AtomicU64,
    stop: AtomicBool,
}

/// Searches for a message whose signature can be assembled from leaked secret-key slots.
///
/// Every attempt appends a random suffix to the configured prefix, hashes it, and fills the signature
/// with the leaked block of each required slot, or a random guess where the slot is unknown. The first
/// candidate that verifies is returned. A guessed block verifies only with negligible probability, so
/// in practice the search succeeds exactly when a digest needs nothing but leaked slots.
pub struct Forger<'a, const W: usize = MESSAGE_BITS> {
    public_key: &'a PublicKey<W>,
    leaked: &'a PartialSecretKey<W>,
    known: Vec<Message>,
    config: ForgeConfig,
    progress: Option<ProgressBar>,
    streams: StreamFactory<'a>,
}

impl<'a, const W: usize> Forger<'a, W> {
    /// Create a forger for `public_key`. Candidates whose digest equals one of `known` are never returned.
    pub fn new(
        public_key: &'a PublicKey<W>,
        leaked: &'a PartialSecretKey<W>,
        known: &[Message],
        config: ForgeConfig,
    ) -> Result<Self, ForgeError> {
        config.check()?;
        let seed = config.seed;
        Ok(Self {
            public_key,
            leaked,
            known: known.to_vec(),
            config,
            progress: None,
            streams: Box::new(
                move |worker: usize| -> Result<Box<dyn RngCore>, rand::Error> {
                    Ok(Box::new(Rng::for_worker(seed, worker)?))
                },
            ),
        })
    }

    /// Replace the per-worker random streams, which default to [`Rng::for_worker`] with the configured seed.
    pub fn with_streams<F, R>(mut self, streams: F) -> Self
    where
        F: Fn(usize) -> Result<R, rand::Error> + Send + Sync + 'a,
        R: RngCore + 'static,
    {
        self.streams = Box::new(
            move |worker: usize| -> Result<Box<dyn RngCore>, rand::Error> {
                Ok(Box::new(streams(worker)?))
            },
        );
        self
    }

    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn config(&self) -> &ForgeConfig {
        &self.config
    }

    /// Expected success probability of a single attempt, given the leaked slots.
    pub fn success_probability(&self) -> f64 {
        self.leaked.success_probability()
    }

    /// Run the search on `config.threads` workers until a forgery verifies, the attempt cap is reached,
    /// or `cancel` fires.
    pub fn forge(&self, cancel: &CancelToken) -> Result<Forgery<W>, ForgeError> {
        let probability = self.success_probability();
        info!(
            "Forging with prefix {:?} on {} thread(s): coverage {}/{}",
            self.config.prefix,
            self.config.threads,
            self.leaked.coverage(),
            2 * W
        );
        if probability == 0.0 {
            warn!("No covered digest is possible: some bit position leaked neither slot");
        } else {
            info!(
                "Success probability {:e} per attempt (~{:.0} attempts expected)",
                probability,
                1.0 / probability
            );
        }
        let search = Search::default();
        let results = thread::scope(|s| {
            let search = &search;
            let handles = (0..self.config.threads)
                .map(|id| s.spawn(move || self.worker(id, search, cancel)))
                .collect_vec();
            handles
                .into_iter()
                .map(|handle| {
                    handle
                        .join()
                        .unwrap_or_else(|e| std::panic::resume_unwind(e))
                })
                .collect_vec()
        });
        let attempts = search
            .attempts
            .load(Ordering::Relaxed)
            .min(self.config.max_attempts);
        if let Some(progress) = &self.progress {
            progress.set_position(attempts);
        }

        let (forgeries, errors): (Vec<_>, Vec<_>) = results.into_iter().partition_result();
        if let Some(forgery) = forgeries.into_iter().flatten().min_by_key(|f| f.attempts) {
            info!(
                "Worker {} forged a signature on {:?} after {} attempts",
                forgery.worker, forgery.message, forgery.attempts
            );
            return Ok(forgery);
        }
        if let Some(error) = errors.into_iter().next() {
            return Err(error);
        }
        if attempts >= self.config.max_attempts {
            warn!("Search exhausted after {} attempts", attempts);
            Err(ForgeError::Exhausted { attempts })
        } else {
            warn!("Search cancelled after {} attempts", attempts);
            Err(ForgeError::Cancelled { attempts })
        }
    }

    fn worker(
        &self,
        id: usize,
        search: &Search,
        cancel: &CancelToken,
    ) -> Result<Option<Forgery<W>>, ForgeError> {
        let result = self.search(id, search, cancel);
        if result.is_err() {
            search.stop.store(true, Ordering::Relaxed);
        }
        result
    }

    fn search(
        &self,
        id: usize,
        search: &Search,
        cancel: &CancelToken,
    ) -> Result<Option<Forgery<W>>, ForgeError> {
        let mut rng = (self.streams)(id)?;
        debug!("Worker {} started", id);
        let mut pending = 0;
        let result = loop {
            if search.stop.load(Ordering::Relaxed) || cancel.is_cancelled() {
                break None;
            }
            let attempt = search.attempts.fetch_add(1, Ordering::Relaxed);
            if attempt >= self.config.max_attempts {
                break None;
            }
            pending += 1;
            if pending == PROGRESS_STEP {
                if let Some(progress) = &self.progress {
                    progress.inc(pending);
                }
                pending = 0;
            }

            let message = self.candidate(&mut rng)?;
            let digest = Message::digest(&message);
            if self.known.contains(&digest) {
                continue;
            }
            if self.config.precheck_coverage && !self.leaked.covers(&digest) {
                continue;
            }
            let signature = self.assemble(&digest, &mut rng)?;
            if verify(&digest, self.public_key, &signature) {
                search.stop.store(true, Ordering::Relaxed);
                break Some(Forgery {
                    message,
                    digest,
                    signature,
                    attempts: attempt + 1,
                    worker: id,
                    coverage: self.leaked.coverage(),
                });
            }
        };
        if let Some(progress) = &self.progress {
            progress.inc(pending);
        }
        debug!("Worker {} stopped", id);
        Ok(result)
    }

    /// The prefix followed by `suffix_len` random characters.
    fn candidate<R: RngCore + ?Sized>(&self, rng: &mut R) -> Result<String, rand::Error> {
        let mut suffix = vec![0u8; self.config.suffix_len];
        rng.try_fill_bytes(&mut suffix)?;
        let mut message = String::with_capacity(self.config.prefix.len() + suffix.len());
        message.push_str(&self.config.prefix);
        message.extend(
            suffix
                .iter()
                .map(|b| SUFFIX_ALPHABET[*b as usize % SUFFIX_ALPHABET.len()] as char),
        );
        Ok(message)
    }

    /// Leaked blocks where the slot is known, fresh random blocks everywhere else.
    fn assemble<R: RngCore + ?Sized>(
        &self,
        digest: &Message,
        rng: &mut R,
    ) -> Result<Signature<W>, rand::Error> {
        let mut preimage = [Block::ZERO; W];
        for (i, block) in preimage.iter_mut().enumerate() {
            *block = match self.leaked.get(slot::<W>(i, digest.bit(i))) {
                Some(leaked) => *leaked,
                None => Block::random(rng)?,
            };
        }
        Ok(Signature::from_preimage(preimage))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{
        forge::aggregate,
        lamport::SecretKey,
        util::FailingRng,
    };

    /// Toy width: eight signed bits make full coverage of a random digest likely within a few hundred attempts.
    const TOY: usize = 8;

    fn config(threads: usize, max_attempts: u64) -> ForgeConfig {
        ForgeConfig {
            prefix: "my forge; tester;".to_string(),
            suffix_len: 8,
            max_attempts,
            threads,
            seed: Some(0x5eed),
            precheck_coverage: true,
        }
    }

    fn known<const W: usize>(
        sk: &SecretKey<W>,
        inputs: &[&str],
    ) -> (Vec<Message>, PartialSecretKey<W>) {
        let messages = inputs.iter().map(Message::digest).collect_vec();
        let signatures = messages.iter().map(|m| sk.sign(m)).collect_vec();
        let key = aggregate(messages.iter().zip(signatures.iter()))
            .into_consistent()
            .expect("honest signatures are consistent");
        (messages, key)
    }

    #[test]
    fn test_forge_toy_instance() -> anyhow::Result<()> {
        let sk = SecretKey::<TOY>::generate(&mut Rng::from_seed(1))?;
        let pk = sk.public_key();
        let (messages, leaked) = known(&sk, &["1", "2", "3", "4"]);
        assert!(leaked.coverage() >= TOY);

        let forger = Forger::new(&pk, &leaked, &messages, config(1, 100_000))?;
        let forgery = forger.forge(&CancelToken::new())?;
        assert!(forgery.message.starts_with("my forge; tester;"));
        assert!(!["1", "2", "3", "4"].contains(&forgery.message.as_str()));
        assert!(!messages.contains(&forgery.digest));
        assert_eq!(forgery.digest, Message::digest(&forgery.message));
        assert!(pk.verify(&forgery.digest, &forgery.signature));
        assert_eq!(forgery.coverage, leaked.coverage());
        Ok(())
    }

    #[test]
    fn test_forge_is_reproducible_with_seed() -> anyhow::Result<()> {
        let sk = SecretKey::<TOY>::generate(&mut Rng::from_seed(2))?;
        let pk = sk.public_key();
        let (messages, leaked) = known(&sk, &["1", "2", "3", "4"]);
        let first = Forger::new(&pk, &leaked, &messages, config(1, 100_000))?
            .forge(&CancelToken::new())?;
        let second = Forger::new(&pk, &leaked, &messages, config(1, 100_000))?
            .forge(&CancelToken::new())?;
        assert_eq!(first.message, second.message);
        assert_eq!(first.attempts, second.attempts);
        Ok(())
    }

    #[test]
    fn test_forge_parallel() -> anyhow::Result<()> {
        let sk = SecretKey::<TOY>::generate(&mut Rng::from_seed(3))?;
        let pk = sk.public_key();
        let (messages, leaked) = known(&sk, &["1", "2", "3", "4"]);
        let forgery = Forger::new(&pk, &leaked, &messages, config(4, 100_000))?
            .forge(&CancelToken::new())?;
        assert!(forgery.worker < 4);
        assert!(pk.verify(&forgery.digest, &forgery.signature));
        Ok(())
    }

    #[test]
    fn test_full_coverage_forges_immediately() -> anyhow::Result<()> {
        let sk = SecretKey::<256>::generate(&mut Rng::from_seed(4))?;
        let pk = sk.public_key();
        let zeros = Message::from_bytes([0x00; 32]);
        let ones = Message::from_bytes([0xff; 32]);
        let (sig0, sig1) = (sk.sign(&zeros), sk.sign(&ones));
        let leaked = aggregate([(&zeros, &sig0), (&ones, &sig1)]).into_consistent()?;
        assert_eq!(leaked.coverage(), 512);

        for precheck_coverage in [true, false] {
            let config = ForgeConfig {
                precheck_coverage,
                ..config(1, 1)
            };
            let forgery = Forger::new(&pk, &leaked, &[zeros, ones], config)?
                .forge(&CancelToken::new())?;
            assert_eq!(forgery.attempts, 1);
            assert!(pk.verify(&forgery.digest, &forgery.signature));
        }
        Ok(())
    }

    #[test]
    fn test_zero_coverage_exhausts() -> anyhow::Result<()> {
        let sk = SecretKey::<TOY>::generate(&mut Rng::from_seed(5))?;
        let pk = sk.public_key();
        let leaked = PartialSecretKey::<TOY>::new();
        for precheck_coverage in [true, false] {
            let config = ForgeConfig {
                precheck_coverage,
                ..config(2, 1_000)
            };
            let result = Forger::new(&pk, &leaked, &[], config)?.forge(&CancelToken::new());
            assert!(
                matches!(result, Err(ForgeError::Exhausted { attempts: 1_000 })),
                "{:?}",
                result
            );
        }
        Ok(())
    }

    #[test]
    fn test_uncovered_bit_position_exhausts() -> anyhow::Result<()> {
        // a single signature leaks exactly one slot per position: success needs the same leading byte
        let sk = SecretKey::<256>::generate(&mut Rng::from_seed(6))?;
        let pk = sk.public_key();
        let (messages, leaked) = known(&sk, &["1"]);
        assert_eq!(leaked.success_probability(), 0.5f64.powi(256));
        let result =
            Forger::new(&pk, &leaked, &messages, config(1, 500))?.forge(&CancelToken::new());
        assert!(matches!(result, Err(ForgeError::Exhausted { .. })));
        Ok(())
    }

    #[test]
    fn test_cancelled_search() -> anyhow::Result<()> {
        let sk = SecretKey::<TOY>::generate(&mut Rng::from_seed(7))?;
        let pk = sk.public_key();
        let leaked = PartialSecretKey::<TOY>::new();
        let forger = Forger::new(&pk, &leaked, &[], config(2, u64::MAX))?;

        let token = CancelToken::new();
        token.cancel();
        let result = forger.forge(&token);
        assert!(matches!(result, Err(ForgeError::Cancelled { attempts: 0 })));

        let result = forger.forge(&CancelToken::with_timeout(Duration::from_millis(50)));
        assert!(matches!(result, Err(ForgeError::Cancelled { .. })));
        Ok(())
    }

    #[test]
    fn test_known_messages_are_never_returned() -> anyhow::Result<()> {
        let sk = SecretKey::<TOY>::generate(&mut Rng::from_seed(8))?;
        let pk = sk.public_key();
        // "X7" is one of the 63 candidates and the only one guaranteed to be covered
        let known_message = Message::digest("X7");
        let leaked = aggregate([(&known_message, &sk.sign(&known_message))]).key;
        assert!(leaked.covers(&known_message));
        let config = ForgeConfig {
            prefix: "X".to_string(),
            suffix_len: 1,
            ..config(1, 1_000)
        };
        let forger = Forger::new(&pk, &leaked, &[known_message], config)?;
        match forger.forge(&CancelToken::new()) {
            Ok(forgery) => {
                assert_ne!(forgery.message, "X7");
                assert_ne!(forgery.digest, known_message);
                assert!(pk.verify(&forgery.digest, &forgery.signature));
            }
            Err(e) => assert!(matches!(e, ForgeError::Exhausted { attempts: 1_000 }), "{:?}", e),
        }
        Ok(())
    }

    #[test]
    fn test_candidate_and_assemble_propagate_entropy_failure() -> anyhow::Result<()> {
        let sk = SecretKey::<TOY>::generate(&mut Rng::from_seed(10))?;
        let pk = sk.public_key();
        let leaked = PartialSecretKey::<TOY>::new();
        let forger = Forger::new(&pk, &leaked, &[], config(1, 1))?;
        assert!(forger.candidate(&mut FailingRng).is_err());
        assert!(forger
            .assemble(&Message::digest("1"), &mut FailingRng)
            .is_err());
        Ok(())
    }

    #[test]
    fn test_entropy_failure_stops_search() -> anyhow::Result<()> {
        let sk = SecretKey::<TOY>::generate(&mut Rng::from_seed(11))?;
        let pk = sk.public_key();
        let leaked = PartialSecretKey::<TOY>::new();
        // the healthy workers can never succeed and have no attempt cap, so only the stop flag ends them
        let forger = Forger::new(&pk, &leaked, &[], config(4, u64::MAX))?.with_streams(
            |worker| -> Result<Box<dyn RngCore>, rand::Error> {
                if worker == 2 {
                    Ok(Box::new(FailingRng))
                } else {
                    Ok(Box::new(Rng::for_worker(Some(11), worker)?))
                }
            },
        );
        let result = forger.forge(&CancelToken::new());
        assert!(
            matches!(result, Err(ForgeError::RandomSource(_))),
            "{:?}",
            result
        );
        Ok(())
    }

    #[test]
    fn test_stream_factory_failure_is_reported() -> anyhow::Result<()> {
        let sk = SecretKey::<TOY>::generate(&mut Rng::from_seed(12))?;
        let pk = sk.public_key();
        let leaked = PartialSecretKey::<TOY>::new();
        let forger = Forger::new(&pk, &leaked, &[], config(2, u64::MAX))?
            .with_streams(|_| -> Result<Rng, rand::Error> { Err(rand::Error::new("no entropy")) });
        assert!(matches!(
            forger.forge(&CancelToken::new()),
            Err(ForgeError::RandomSource(_))
        ));
        Ok(())
    }

    #[test]
    fn test_invalid_config() -> anyhow::Result<()> {
        let sk = SecretKey::<TOY>::generate(&mut Rng::from_seed(9))?;
        let pk = sk.public_key();
        let leaked = PartialSecretKey::<TOY>::new();
        let bad = [
            ForgeConfig {
                prefix: String::new(),
                ..config(1, 1)
            },
            ForgeConfig {
                suffix_len: 0,
                ..config(1, 1)
            },
            config(0, 1),
        ];
        for config in bad {
            assert!(matches!(
                Forger::new(&pk, &leaked, &[], config),
                Err(ForgeError::Config(_))
            ));
        }
        Ok(())
    }

    #[test]
    fn test_config_from_json() -> anyhow::Result<()> {
        let path = std::env::temp_dir().join(format!("forge-config-{}.json", std::process::id()));
        std::fs::write(&path, r#"{ "prefix": "my forge;", "threads": 3, "seed": 42 }"#)?;
        let config = ForgeConfig::from_jsonfile(&path)?;
        std::fs::remove_file(&path)?;
        assert_eq!(config.prefix, "my forge;");
        assert_eq!(config.threads, 3);
        assert_eq!(config.seed, Some(42));
        assert_eq!(config.suffix_len, ForgeConfig::default().suffix_len);
        assert!(config.precheck_coverage);
        Ok(())
    }
}
