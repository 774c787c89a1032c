use rand::{
    rngs::{OsRng, StdRng},
    Error, RngCore, SeedableRng,
};
use sha2::{Digest, Sha256};

/// A cryptographically secure random stream that remembers how it was seeded.
///
/// Seeded streams are reproducible, which keeps tests and seeded forge runs deterministic. Unseeded
/// streams draw a full seed from the operating system.
#[derive(Debug)]
pub struct Rng {
    seed: Option<u64>,
    worker: usize,
    rng: StdRng,
}

impl Rng {
    pub fn from_seed(seed: u64) -> Self {
        Self::seeded(seed, 0)
    }

    /// The stream keyed by SHA-256 over `(seed, worker)`, so no two pairs share a stream.
    fn seeded(seed: u64, worker: usize) -> Self {
        let key = Sha256::new()
            .chain_update(seed.to_le_bytes())
            .chain_update((worker as u64).to_le_bytes())
            .finalize();
        Self {
            seed: Some(seed),
            worker,
            rng: StdRng::from_seed(key.into()),
        }
    }

    /// Seed from the OS entropy source. Fails if the entropy source is unavailable.
    pub fn from_entropy_checked() -> Result<Self, Error> {
        Ok(Self {
            seed: None,
            worker: 0,
            rng: StdRng::from_rng(OsRng)?,
        })
    }

    /// An independent stream for worker `worker`. Worker 0 of a base seed is `from_seed(seed)`.
    pub fn for_worker(seed: Option<u64>, worker: usize) -> Result<Self, Error> {
        match seed {
            Some(seed) => Ok(Self::seeded(seed, worker)),
            None => Ok(Self {
                worker,
                ..Self::from_entropy_checked()?
            }),
        }
    }

    /// The base seed, shared by all workers of a seeded search.
    pub fn seed(&self) -> Option<u64> {
        self.seed
    }

    pub fn worker(&self) -> usize {
        self.worker
    }
}

impl RngCore for Rng {
    fn next_u32(&mut self) -> u32 {
        self.rng.next_u32()
    }

    fn next_u64(&mut self) -> u64 {
        self.rng.next_u64()
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        self.rng.fill_bytes(dest);
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), Error> {
        self.rng.try_fill_bytes(dest)
    }
}

/// Seeded streams restart from their seed, unseeded streams continue from the current state.
impl Clone for Rng {
    fn clone(&self) -> Self {
        match self.seed {
            Some(seed) => Self::seeded(seed, self.worker),
            None => Self {
                seed: None,
                worker: self.worker,
                rng: self.rng.clone(),
            },
        }
    }
}

/// A random source whose every fallible draw fails.
#[cfg(test)]
pub(crate) struct FailingRng;

#[cfg(test)]
impl RngCore for FailingRng {
    fn next_u32(&mut self) -> u32 {
        0
    }

    fn next_u64(&mut self) -> u64 {
        0
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        dest.fill(0);
    }

    fn try_fill_bytes(&mut self, _dest: &mut [u8]) -> Result<(), Error> {
        Err(Error::new("entropy source unavailable"))
    }
}
