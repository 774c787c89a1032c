use std::{
    fs::{self, File},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
    time::{Duration, Instant},
};

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use lamport_forge::{
    forge::{forge_from_known, ForgeConfig, Forgery},
    lamport::{Message, PublicKey, SecretKey, Signature},
    util::{init_logging_with_progress, read_hex_file, CancelToken, NamedProgress, Rng},
};
use log::{info, warn};
use serde::Serialize;

/// Lamport one-time signatures: key generation, signing, verification, and forgery from reused keys.
#[derive(Debug, Parser)]
struct CliArgs {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Generate a key pair and write both keys as hex.
    Keygen {
        /// Output file for the secret key.
        #[arg(long, default_value = "secret.hex")]
        secret: PathBuf,
        /// Output file for the public key.
        #[arg(long, default_value = "public.hex")]
        public: PathBuf,
        /// Seed for a reproducible key. Keys are drawn from the OS entropy source if omitted.
        #[arg(long)]
        seed: Option<u64>,
    },
    /// Sign the SHA-256 digest of a message.
    Sign {
        #[arg(long, default_value = "secret.hex")]
        secret: PathBuf,
        #[arg(long)]
        message: String,
        /// Output file for the signature.
        #[arg(long)]
        out: PathBuf,
    },
    /// Verify a signature on a message.
    Verify {
        #[arg(long, default_value = "public.hex")]
        public: PathBuf,
        #[arg(long)]
        message: String,
        #[arg(long)]
        signature: PathBuf,
    },
    /// Forge a signature from signatures the same key made on other messages.
    Forge(ForgeArgs),
}

#[derive(Debug, Args, Serialize)]
struct ForgeArgs {
    /// The attacked public key.
    #[arg(long, default_value = "public.hex")]
    public: PathBuf,
    /// A known signature as `<message>=<signature file>`. Repeat for every known signature.
    #[arg(long = "known", value_parser = parse_known, required = true)]
    known: Vec<(String, PathBuf)>,
    /// JSON file with a forge config. The flags below override its values.
    #[arg(long)]
    config: Option<PathBuf>,
    /// The marker every forged message starts with.
    #[arg(long)]
    prefix: Option<String>,
    /// Number of random characters appended to the prefix.
    #[arg(long)]
    suffix_len: Option<usize>,
    /// Number of worker threads. Defaults to the number of available cores.
    #[arg(long)]
    threads: Option<usize>,
    /// Upper bound on attempts across all workers.
    #[arg(long)]
    max_attempts: Option<u64>,
    /// Base seed for reproducible worker streams.
    #[arg(long)]
    seed: Option<u64>,
    /// Assemble and verify every candidate, even those needing slots that never leaked.
    #[arg(long, action)]
    no_precheck: bool,
    /// Abort the search after this many seconds.
    #[arg(long)]
    timeout: Option<u64>,
    /// Output file for the forged signature.
    #[arg(long)]
    out: Option<PathBuf>,
    /// Write a JSON report of the run to this file.
    #[arg(long)]
    report: Option<PathBuf>,
}

fn parse_known(s: &str) -> Result<(String, PathBuf), String> {
    match s.split_once('=') {
        Some((message, path)) if !path.is_empty() => Ok((message.to_string(), PathBuf::from(path))),
        _ => Err(format!("expected <message>=<signature file>, got {:?}", s)),
    }
}

impl ForgeArgs {
    fn forge_config(&self) -> anyhow::Result<ForgeConfig> {
        let mut config = match &self.config {
            Some(path) => ForgeConfig::from_jsonfile(path)
                .with_context(|| format!("failed to load config {}", path.display()))?,
            None => ForgeConfig::default(),
        };
        if let Some(prefix) = &self.prefix {
            config.prefix = prefix.clone();
        }
        if let Some(suffix_len) = self.suffix_len {
            config.suffix_len = suffix_len;
        }
        if let Some(threads) = self.threads {
            config.threads = threads;
        }
        if let Some(max_attempts) = self.max_attempts {
            config.max_attempts = max_attempts;
        }
        if self.seed.is_some() {
            config.seed = self.seed;
        }
        if self.no_precheck {
            config.precheck_coverage = false;
        }
        Ok(config)
    }
}

fn write_hex(path: &Path, hex: String) -> anyhow::Result<()> {
    fs::write(path, hex + "\n").with_context(|| format!("failed to write {}", path.display()))
}

fn keygen(secret: &Path, public: &Path, seed: Option<u64>) -> anyhow::Result<()> {
    let mut rng = match seed {
        Some(seed) => Rng::from_seed(seed),
        None => Rng::from_entropy_checked()?,
    };
    let sk = SecretKey::<256>::generate(&mut rng)?;
    write_hex(secret, sk.to_hex())?;
    write_hex(public, sk.public_key().to_hex())?;
    info!(
        "Wrote secret key to {} and public key to {}",
        secret.display(),
        public.display()
    );
    Ok(())
}

fn sign(secret: &Path, message: &str, out: &Path) -> anyhow::Result<()> {
    let sk = SecretKey::<256>::from_hex(&read_hex_file(secret)?)
        .with_context(|| format!("malformed secret key {}", secret.display()))?;
    let signature = sk.sign(&Message::digest(message));
    write_hex(out, signature.to_hex())?;
    warn!("Signed {:?}: the key must not sign another message", message);
    Ok(())
}

fn load_public_key(path: &Path) -> anyhow::Result<PublicKey> {
    PublicKey::from_hex(&read_hex_file(path)?)
        .with_context(|| format!("malformed public key {}", path.display()))
}

fn load_signature(path: &Path) -> anyhow::Result<Signature> {
    Signature::from_hex(&read_hex_file(path)?)
        .with_context(|| format!("malformed signature {}", path.display()))
}

fn verify(public: &Path, message: &str, signature: &Path) -> anyhow::Result<()> {
    let pk = load_public_key(public)?;
    let signature = load_signature(signature)?;
    let valid = pk.verify(&Message::digest(message), &signature);
    println!("ok: {}", valid);
    if !valid {
        bail!("signature on {:?} does not verify", message);
    }
    Ok(())
}

#[derive(Serialize)]
enum ForgeOutcome {
    Forged {
        message: String,
        digest: String,
        signature: String,
        attempts: u64,
        worker: usize,
        coverage: usize,
    },
    Failed(String),
}

impl From<&Forgery> for ForgeOutcome {
    fn from(forgery: &Forgery) -> Self {
        ForgeOutcome::Forged {
            message: forgery.message.clone(),
            digest: forgery.digest.to_hex(),
            signature: forgery.signature.to_hex(),
            attempts: forgery.attempts,
            worker: forgery.worker,
            coverage: forgery.coverage,
        }
    }
}

#[derive(Serialize)]
struct ForgeReport<'a> {
    date: String,
    args: &'a ForgeArgs,
    config: &'a ForgeConfig,
    duration: Duration,
    outcome: ForgeOutcome,
}

fn forge(args: ForgeArgs, progress: MultiProgress) -> anyhow::Result<()> {
    let config = args.forge_config()?;
    info!("Config: {:?}", config);
    let pk = load_public_key(&args.public)?;
    let known = args
        .known
        .iter()
        .map(|(message, path)| Ok((Message::digest(message), load_signature(path)?)))
        .collect::<anyhow::Result<Vec<_>>>()?;

    let cancel = match args.timeout {
        Some(secs) => CancelToken::with_timeout(Duration::from_secs(secs)),
        None => CancelToken::new(),
    };
    let handler_token = cancel.clone();
    ctrlc::set_handler(move || handler_token.cancel()).context("ctrlc setup failed")?;

    let bar = progress.add(ProgressBar::new_spinner());
    bar.set_style(ProgressStyle::named_spinner("forge"));
    bar.enable_steady_tick(Duration::from_millis(200));

    let start = Instant::now();
    let result = forge_from_known(&pk, &known, config.clone(), &cancel, Some(bar.clone()));
    let duration = start.elapsed();
    bar.finish();

    let outcome = match &result {
        Ok(forgery) => {
            println!("{}", forgery.message);
            if let Some(out) = &args.out {
                write_hex(out, forgery.signature.to_hex())?;
                info!("Wrote forged signature to {}", out.display());
            }
            ForgeOutcome::from(forgery)
        }
        Err(e) => ForgeOutcome::Failed(e.to_string()),
    };
    if let Some(report) = &args.report {
        let report_data = ForgeReport {
            date: chrono::Local::now().to_rfc3339(),
            args: &args,
            config: &config,
            duration,
            outcome,
        };
        let mut json_file = BufWriter::new(File::create(report)?);
        serde_json::to_writer_pretty(&mut json_file, &report_data)?;
        json_file.flush()?;
        info!("Wrote report to {}", report.display());
    }
    result?;
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let progress = init_logging_with_progress()?;
    let args = CliArgs::parse();
    match args.command {
        Command::Keygen {
            secret,
            public,
            seed,
        } => keygen(&secret, &public, seed),
        Command::Sign {
            secret,
            message,
            out,
        } => sign(&secret, &message, &out),
        Command::Verify {
            public,
            message,
            signature,
        } => verify(&public, &message, &signature),
        Command::Forge(args) => forge(args, progress),
    }
}

#[cfg(test)]
mod tests {
    use super::parse_known;

    #[test]
    fn test_parse_known() {
        assert_eq!(
            parse_known("1=sigs/1.hex"),
            Ok(("1".to_string(), "sigs/1.hex".into()))
        );
        assert!(parse_known("sigs/1.hex").is_err());
        assert!(parse_known("1=").is_err());
    }
}
