use std::{fs, path::Path};

use anyhow::Context;
use indicatif::MultiProgress;
use indicatif_log_bridge::LogWrapper;

/// Initialise `env_logger` (default level `info`) behind a `MultiProgress`, so log lines do not tear progress bars.
pub fn init_logging_with_progress() -> anyhow::Result<MultiProgress> {
    let logger =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).build();
    let progress = MultiProgress::new();
    LogWrapper::new(progress.clone(), logger).try_init()?;
    Ok(progress)
}

/// Read a hex blob from `path`, dropping surrounding whitespace.
pub fn read_hex_file<P: AsRef<Path>>(path: P) -> anyhow::Result<String> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    Ok(contents.trim().to_string())
}

#[cfg(test)]
mod tests {
    use crate::util::read_hex_file;

    #[test]
    fn test_read_hex_file_trims() -> anyhow::Result<()> {
        let path = std::env::temp_dir().join(format!("lamport-hex-{}", std::process::id()));
        std::fs::write(&path, "  abcd\n")?;
        assert_eq!(read_hex_file(&path)?, "abcd");
        std::fs::remove_file(&path)?;
        Ok(())
    }

    #[test]
    fn test_read_hex_file_missing() {
        let err = read_hex_file("/nonexistent/lamport.hex").unwrap_err();
        assert!(err.to_string().contains("/nonexistent/lamport.hex"));
    }
}
