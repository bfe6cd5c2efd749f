//! Operator CLI for field encryption, password hashes and digests. Results go
//! to stdout, logs to stderr.

use std::io::{Read, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use magma_crypto::config::Settings;
use magma_crypto::crypto::integrity::{digest_canonical_json, digest_json, digest_string};
use magma_crypto::crypto::object_id::generate_object_id;
use magma_crypto::crypto::passwords::{hash_password, verify_password};
use magma_crypto::records::{ProtectedRecord, UserRecord};
use magma_crypto::telemetry::init_tracing;
use serde_json::json;

#[derive(Parser)]
#[command(name = "magma-crypto", version, about = "Blue Magma field protection toolkit")]
struct Cli {
    /// Optional JSON settings file; MAGMA_* variables override it.
    #[arg(long, env = "MAGMA_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print an Argon2id hash of the password.
    HashPassword { password: String },
    /// Print `match` or `no-match`.
    VerifyPassword { password: String, hash: String },
    /// Encrypt a value with the configured field key.
    EncryptField { plaintext: String },
    /// Decrypt an envelope with the configured field key.
    DecryptField { envelope: String },
    /// SHA-256 hex of a string.
    DigestString { input: String },
    /// SHA-256 hex of a JSON document (`-` reads stdin).
    DigestJson {
        input: String,
        /// Sort keys and strip whitespace before hashing.
        #[arg(long)]
        canonical: bool,
    },
    /// Generate random object ids.
    ObjectId {
        #[arg(long, default_value_t = 1)]
        count: usize,
    },
    /// Encrypt the sensitive fields of a user record (`-` reads stdin).
    SealRecord { input: String },
    /// Decrypt the sensitive fields of a user record (`-` reads stdin).
    OpenRecord { input: String },
}

fn read_input(input: &str) -> Result<String> {
    if input != "-" {
        return Ok(input.to_string());
    }
    let mut buffer = String::new();
    std::io::stdin()
        .read_to_string(&mut buffer)
        .context("failed to read stdin")?;
    Ok(buffer)
}

fn parse_record(input: &str) -> Result<UserRecord> {
    let raw = read_input(input)?;
    serde_json::from_str(&raw).context("invalid user record json")
}

fn run(cli: Cli, settings: &Settings, out: &mut impl Write) -> Result<()> {
    match cli.command {
        Command::HashPassword { password } => {
            writeln!(out, "{}", hash_password(&password)?)?;
        }
        Command::VerifyPassword { password, hash } => {
            let matches = verify_password(&password, &hash);
            writeln!(out, "{}", if matches { "match" } else { "no-match" })?;
        }
        Command::EncryptField { plaintext } => {
            let cipher = settings.build_cipher()?;
            writeln!(out, "{}", cipher.encrypt(&plaintext)?)?;
        }
        Command::DecryptField { envelope } => {
            let cipher = settings.build_cipher()?;
            writeln!(out, "{}", cipher.decrypt(&envelope)?)?;
        }
        Command::DigestString { input } => {
            writeln!(out, "{}", digest_string(&input))?;
        }
        Command::DigestJson { input, canonical } => {
            let raw = read_input(&input)?;
            let digest = if canonical {
                digest_canonical_json(raw.as_bytes())?
            } else {
                digest_json(raw.as_bytes())?
            };
            writeln!(out, "{digest}")?;
        }
        Command::ObjectId { count } => {
            if count == 0 {
                bail!("count must be at least 1");
            }
            for _ in 0..count {
                writeln!(out, "{}", generate_object_id())?;
            }
        }
        Command::SealRecord { input } => {
            let cipher = settings.build_cipher()?;
            let mut record = parse_record(&input)?;
            record.seal(&cipher)?;
            let output = json!({ "record": record, "email_hash": record.email_hash });
            writeln!(out, "{}", serde_json::to_string_pretty(&output)?)?;
        }
        Command::OpenRecord { input } => {
            let cipher = settings.build_cipher()?;
            let mut record = parse_record(&input)?;
            record.open(&cipher)?;
            writeln!(out, "{}", serde_json::to_string_pretty(&record)?)?;
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let settings = match Settings::load(cli.config.as_deref()) {
        Ok(settings) => settings,
        Err(err) => {
            eprintln!("config load failed: {err}");
            return ExitCode::FAILURE;
        }
    };
    if let Err(err) = init_tracing(&settings.log_level, settings.log_format) {
        eprintln!("{err:#}");
        return ExitCode::FAILURE;
    }

    match run(cli, &settings, &mut std::io::stdout().lock()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}
