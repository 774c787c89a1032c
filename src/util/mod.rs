mod cancel;
mod named_progress;
mod rng;
mod util;

pub use self::cancel::CancelToken;
pub use self::named_progress::NamedProgress;
pub use self::rng::Rng;
#[cfg(test)]
pub(crate) use self::rng::FailingRng;
pub use self::util::{init_logging_with_progress, read_hex_file};
