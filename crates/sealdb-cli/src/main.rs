//! sealdb: database key and encryption management
//!
//! Commands:
//!   config show                  - display current configuration
//!   key show [--password]        - print the derived database key
//!   password set | check         - manage the optional key password
//!   verify status | send | check <code> | reset
//!   db encrypt | decrypt [--db <path>] [--password]

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use sealdb_core::config::expand_tilde;
use sealdb_core::SealConfig;
use sealdb_service::SealService;
use secrecy::{ExposeSecret, SecretString};
use std::path::{Path, PathBuf};
use std::sync::Arc;

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "sealdb",
    version,
    about = "SQLCipher key and encryption management",
    long_about = "sealdb: derive machine-bound database keys, verify installations, and encrypt or decrypt the database in place"
)]
struct Cli {
    /// Path to sealdb.toml configuration file
    #[arg(
        long,
        short = 'c',
        env = "SEALDB_CONFIG",
        default_value = "~/.config/sealdb/sealdb.toml"
    )]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides [log] level
    #[arg(long, env = "SEALDB_LOG")]
    log: Option<String>,

    /// Log format; overrides [log] format
    #[arg(long, env = "SEALDB_LOG_FORMAT")]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Debug, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Database key operations (requires a verified installation)
    Key {
        #[command(subcommand)]
        action: KeyAction,
    },

    /// Optional password mixed into the database key
    Password {
        #[command(subcommand)]
        action: PasswordAction,
    },

    /// Installation verification by emailed one-time code
    Verify {
        #[command(subcommand)]
        action: VerifyAction,
    },

    /// In-place database encryption (requires a verified installation)
    Db {
        #[command(subcommand)]
        action: DbAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the active configuration (merged defaults + config file)
    Show,
}

#[derive(Subcommand, Debug)]
enum KeyAction {
    /// Print the derived database key
    Show {
        /// Prompt for the password mixed into the key
        #[arg(long)]
        password: bool,
    },
}

#[derive(Subcommand, Debug)]
enum PasswordAction {
    /// Set or replace the password verification hash
    Set,
    /// Check a password against the stored hash
    Check,
}

#[derive(Subcommand, Debug)]
enum VerifyAction {
    /// Show whether this installation is verified
    Status,
    /// Issue a code and send it to [verification] recipient
    Send,
    /// Submit a received code
    Check { code: String },
    /// Return to the unverified state
    Reset,
}

#[derive(Subcommand, Debug)]
enum DbAction {
    /// Convert a plaintext database to SQLCipher
    Encrypt(DbArgs),
    /// Convert a SQLCipher database back to plaintext
    Decrypt(DbArgs),
}

#[derive(clap::Args, Debug)]
struct DbArgs {
    /// Database file (overrides [paths] database)
    #[arg(long)]
    db: Option<PathBuf>,
    /// Prompt for the password mixed into the key
    #[arg(long)]
    password: bool,
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = expand_tilde(&cli.config);
    let config = SealConfig::load(&config_path)?;

    let level = cli.log.clone().unwrap_or_else(|| config.log.level.clone());
    let format = cli.log_format.clone().unwrap_or(match config.log.format.as_str() {
        "json" => LogFormat::Json,
        _ => LogFormat::Text,
    });
    init_logging(&level, &format);

    if !config_path.exists() {
        tracing::warn!(
            "config file not found: {}  (using defaults)",
            config_path.display()
        );
    }
    tracing::debug!(
        version = env!("CARGO_PKG_VERSION"),
        config = %config_path.display(),
        "sealdb starting"
    );

    if let Commands::Config { action: ConfigAction::Show } = cli.command {
        return cmd_config_show(&config, &config_path);
    }

    let svc = {
        let config = config.clone();
        Arc::new(
            tokio::task::spawn_blocking(move || SealService::from_config(config))
                .await
                .context("service initialization panicked")??,
        )
    };

    match cli.command {
        Commands::Config { .. } => Ok(()),
        Commands::Key { action: KeyAction::Show { password } } => {
            let password = prompt_optional(password)?;
            blocking(svc, move |svc| cmd_key_show(svc, password.as_ref())).await
        }
        Commands::Password { action: PasswordAction::Set } => {
            let password = prompt_new_password()?;
            blocking(svc, move |svc| cmd_password_set(svc, &password)).await
        }
        Commands::Password { action: PasswordAction::Check } => {
            let password = prompt("Password: ")?;
            blocking(svc, move |svc| cmd_password_check(svc, &password)).await
        }
        Commands::Verify { action } => blocking(svc, move |svc| cmd_verify(svc, action)).await,
        Commands::Db { action } => {
            let (encrypt, args) = match action {
                DbAction::Encrypt(args) => (true, args),
                DbAction::Decrypt(args) => (false, args),
            };
            let password = prompt_optional(args.password)?;
            blocking(svc, move |svc| {
                cmd_db(svc, encrypt, args.db.as_deref(), password.as_ref())
            })
            .await
        }
    }
}

async fn blocking<F>(svc: Arc<SealService>, f: F) -> Result<()>
where
    F: FnOnce(&SealService) -> Result<()> + Send + 'static,
{
    tokio::task::spawn_blocking(move || f(&svc))
        .await
        .context("command task panicked")?
}

fn init_logging(level: &str, format: &LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}

// ── Prompts ───────────────────────────────────────────────────────────────────

fn prompt(label: &str) -> Result<SecretString> {
    let entered = rpassword::prompt_password(label).context("reading password")?;
    Ok(SecretString::from(entered))
}

fn prompt_optional(wanted: bool) -> Result<Option<SecretString>> {
    if wanted {
        prompt("Password: ").map(Some)
    } else {
        Ok(None)
    }
}

fn prompt_new_password() -> Result<SecretString> {
    let first = prompt("New password: ")?;
    let second = prompt("Repeat password: ")?;
    if first.expose_secret() != second.expose_secret() {
        anyhow::bail!("passwords do not match");
    }
    Ok(first)
}

fn require_verified(svc: &SealService) -> Result<()> {
    if !svc.is_verification_completed() {
        anyhow::bail!(
            "installation is not verified\n\
             Run `sealdb verify send`, then `sealdb verify check <code>`."
        );
    }
    Ok(())
}

// ── `sealdb config show` ──────────────────────────────────────────────────────

fn cmd_config_show(config: &SealConfig, config_path: &Path) -> Result<()> {
    if config_path.exists() {
        println!("# Configuration from: {}", config_path.display());
    } else {
        println!("# Configuration: defaults (no file at {})", config_path.display());
    }
    println!();
    let rendered = toml::to_string_pretty(config).context("serializing config to TOML")?;
    print!("{rendered}");
    Ok(())
}

// ── `sealdb key show` ─────────────────────────────────────────────────────────

fn cmd_key_show(svc: &SealService, password: Option<&SecretString>) -> Result<()> {
    require_verified(svc)?;
    let key = svc.get_encryption_key(password)?;
    println!("{}", key.expose_secret());
    Ok(())
}

// ── `sealdb password` ─────────────────────────────────────────────────────────

fn cmd_password_set(svc: &SealService, password: &SecretString) -> Result<()> {
    if svc.has_password() {
        println!("Replacing the existing password hash.");
        println!("Databases encrypted with the old password must be re-keyed separately.");
    }
    if !svc.set_password(password) {
        anyhow::bail!("password was not stored (see log for details)");
    }
    println!("Password set.");
    Ok(())
}

fn cmd_password_check(svc: &SealService, password: &SecretString) -> Result<()> {
    if !svc.has_password() {
        anyhow::bail!("no password has been set");
    }
    if !svc.validate_password(password) {
        anyhow::bail!("password does not match");
    }
    println!("Password matches.");
    Ok(())
}

// ── `sealdb verify` ───────────────────────────────────────────────────────────

fn cmd_verify(svc: &SealService, action: VerifyAction) -> Result<()> {
    match action {
        VerifyAction::Status => {
            let status = svc.verification_status();
            println!("device:    {}", svc.device_id());
            match status.verified_at {
                Some(at) if status.is_verified => {
                    println!("verified:  yes (since {})", at.to_rfc3339())
                }
                _ if status.is_verified => println!("verified:  yes"),
                _ => println!("verified:  no"),
            }
            println!("transform: {}", if svc.is_transform_in_progress() { "running" } else { "idle" });
            Ok(())
        }
        VerifyAction::Send => {
            svc.send_verification_code()?;
            let to = svc.config().verification.recipient.as_deref().unwrap_or("");
            println!("Verification code sent to {to}.");
            Ok(())
        }
        VerifyAction::Check { code } => {
            if !svc.verify_code(&code) {
                anyhow::bail!("verification failed: code is wrong or expired");
            }
            println!("Installation verified.");
            Ok(())
        }
        VerifyAction::Reset => {
            if !svc.reset_verification() {
                anyhow::bail!("reset failed (see log for details)");
            }
            println!("Verification reset.");
            Ok(())
        }
    }
}

// ── `sealdb db encrypt | decrypt` ─────────────────────────────────────────────

fn cmd_db(
    svc: &SealService,
    encrypt: bool,
    db_override: Option<&Path>,
    password: Option<&SecretString>,
) -> Result<()> {
    require_verified(svc)?;

    let (db, scratch) = match db_override {
        Some(db) => {
            let db = expand_tilde(db);
            let scratch = db.with_file_name("temp_transform.db");
            (db, scratch)
        }
        None => (
            svc.config().database_path(),
            svc.config().transform_temp_path(),
        ),
    };
    let key = svc.get_encryption_key(password)?;

    let outcome = if encrypt {
        svc.encrypt_database(&db, &scratch, &key)
    } else {
        svc.decrypt_database(&db, &scratch, &key)
    };
    if !outcome.ok {
        anyhow::bail!("{}: {}", db.display(), outcome.message);
    }
    println!("{}: {}", db.display(), outcome.message);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_db_encrypt() {
        let cli = Cli::try_parse_from([
            "sealdb",
            "--log-format",
            "json",
            "db",
            "encrypt",
            "--db",
            "/tmp/app.db",
            "--password",
        ])
        .unwrap();
        assert!(matches!(cli.log_format, Some(LogFormat::Json)));
        match cli.command {
            Commands::Db {
                action: DbAction::Encrypt(args),
            } => {
                assert_eq!(args.db.as_deref(), Some(Path::new("/tmp/app.db")));
                assert!(args.password);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_parse_verify_check() {
        let cli = Cli::try_parse_from(["sealdb", "verify", "check", "042137"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Verify {
                action: VerifyAction::Check { ref code }
            } if code == "042137"
        ));
    }

    #[test]
    fn test_unknown_subcommand_is_rejected() {
        assert!(Cli::try_parse_from(["sealdb", "db", "rekey"]).is_err());
    }
}
