//! `vaultkit` command line tool.
//!
//! Operates on a vault stored as JSON files in a data directory
//! (`$VAULTKIT_DIR`, defaulting to the platform data dir). The master
//! password is taken from `--password` or `$VAULTKIT_PASSWORD`.

mod commands;
mod file_store;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use eyre::WrapErr as _;
use tracing_subscriber::EnvFilter;
use vaultkit_core::ImportMode;

#[derive(Parser, Debug)]
#[command(name = "vaultkit", version, about = "Local encrypted password vault")]
struct Cli {
    /// Directory holding the vault files.
    #[arg(long, env = "VAULTKIT_DIR", value_name = "PATH", global = true)]
    data_dir: Option<PathBuf>,

    /// Master password.
    #[arg(long, env = "VAULTKIT_PASSWORD", hide_env_values = true, global = true)]
    password: Option<String>,

    /// JSON file overriding the vault configuration.
    #[arg(long, env = "VAULTKIT_CONFIG", value_name = "PATH", global = true)]
    config: Option<PathBuf>,

    /// Print machine-readable JSON instead of text.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a new, empty vault.
    Init,
    /// List the entries of the vault.
    List {
        /// Include passwords and notes in the output.
        #[arg(long)]
        show_secrets: bool,
    },
    /// Add an entry.
    Add(AddArgs),
    /// Remove an entry by id.
    Remove {
        /// Entry id.
        id: String,
    },
    /// Write an encrypted backup of the vault.
    Export {
        /// Destination file.
        #[arg(long, short, value_name = "PATH")]
        out: PathBuf,
    },
    /// Restore a backup into the vault.
    Import {
        /// Backup file.
        #[arg(long, short, value_name = "PATH")]
        file: PathBuf,
        /// `merge` keeps existing entries, `overwrite` replaces the vault.
        #[arg(long, default_value = "merge")]
        mode: ImportMode,
        /// Password the backup was exported with, if not the master password.
        #[arg(long, env = "VAULTKIT_BACKUP_PASSWORD", hide_env_values = true)]
        backup_password: Option<String>,
    },
    /// Check that the password opens a backup and show its metadata.
    VerifyBackup {
        /// Backup file.
        #[arg(long, short, value_name = "PATH")]
        file: PathBuf,
        /// Password the backup was exported with, if not the master password.
        #[arg(long, env = "VAULTKIT_BACKUP_PASSWORD", hide_env_values = true)]
        backup_password: Option<String>,
    },
    /// Print the current TOTP code of an entry.
    Totp {
        /// Entry id.
        id: String,
    },
    /// Generate a new TOTP secret.
    TotpSecret {
        /// Issuer shown by authenticator apps.
        #[arg(long, default_value = "VaultKit")]
        issuer: String,
        /// Account name; when given, an otpauth URI is printed too.
        #[arg(long)]
        account: Option<String>,
    },
    /// Generate recovery codes.
    BackupCodes {
        /// How many codes to generate.
        #[arg(long, default_value_t = 10)]
        count: usize,
    },
}

#[derive(Args, Debug)]
struct AddArgs {
    /// Display name.
    #[arg(long)]
    title: String,
    /// Account name.
    #[arg(long)]
    username: Option<String>,
    /// Password stored in the entry.
    #[arg(long)]
    secret: Option<String>,
    /// Site address.
    #[arg(long)]
    url: Option<String>,
    /// Free-form notes.
    #[arg(long)]
    notes: Option<String>,
    /// Base32 TOTP secret.
    #[arg(long)]
    totp_secret: Option<String>,
    /// Generate this many recovery codes for the entry.
    #[arg(long, default_value_t = 0)]
    backup_codes: usize,
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() -> eyre::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let data_dir = match cli.data_dir {
        Some(dir) => dir,
        None => dirs::data_dir()
            .map(|dir| dir.join("vaultkit"))
            .ok_or_else(|| eyre::eyre!("no data directory found, pass --data-dir"))?,
    };
    let config = match &cli.config {
        Some(path) => commands::load_config(path)
            .wrap_err_with(|| format!("failed to load config '{}'", path.display()))?,
        None => vaultkit_core::VaultConfig::default(),
    };
    tracing::debug!(path = %data_dir.display(), "opening vault directory");

    let ctx = commands::Context::open(&data_dir, config, cli.password, cli.json)?;
    commands::run(&ctx, cli.command)
}
