use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use eyre::{bail, WrapErr as _};
use secrecy::SecretString;
use serde_json::json;
use vaultkit_core::totp;
use vaultkit_core::{
    client_fingerprint, BackupCodec, EntryFields, ImportMode, RateLimiter, UnlockOutcome,
    VaultConfig, VaultEntry, VaultState, VaultStore,
};

use crate::file_store::JsonDir;
use crate::{AddArgs, Command};

/// Fields hidden from `list` unless secrets were requested.
const SECRET_FIELDS: &[&str] = &["password", "notes", "totpSecret", "backupCodes"];

pub fn load_config(path: &Path) -> eyre::Result<VaultConfig> {
    let bytes = fs::read(path)?;
    Ok(serde_json::from_slice(&bytes)?)
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
}

fn now_secs() -> u64 {
    now_ms() / 1_000
}

/// Everything a command needs: the opened directory, the configuration and
/// the caller's credentials.
pub struct Context {
    dir: Arc<JsonDir>,
    config: VaultConfig,
    password: Option<SecretString>,
    json: bool,
    identity: String,
}

impl Context {
    pub fn open(
        data_dir: &Path,
        config: VaultConfig,
        password: Option<String>,
        json: bool,
    ) -> eyre::Result<Self> {
        let dir = JsonDir::open(data_dir)
            .wrap_err_with(|| format!("failed to open '{}'", data_dir.display()))?;
        let user = std::env::var("USER")
            .or_else(|_| std::env::var("USERNAME"))
            .unwrap_or_else(|_| "unknown".to_string());
        let root = dir.root().display().to_string();
        let identity = client_fingerprint(&[user.as_str(), std::env::consts::OS, root.as_str()]);
        Ok(Self {
            dir: Arc::new(dir),
            config,
            password: password.map(SecretString::from),
            json,
            identity,
        })
    }

    fn password(&self) -> eyre::Result<&SecretString> {
        match &self.password {
            Some(password) => Ok(password),
            None => bail!("a master password is required (--password or VAULTKIT_PASSWORD)"),
        }
    }

    fn vault(&self) -> VaultStore {
        let limiter = RateLimiter::new(self.config.rate_limit.clone(), self.dir.clone());
        VaultStore::new(self.dir.clone(), Arc::new(limiter), self.config.clone())
    }

    fn unlock(&self, vault: &mut VaultStore) -> eyre::Result<()> {
        match vault.unlock(self.password()?, &self.identity, now_ms())? {
            UnlockOutcome::Unlocked { entries } => {
                tracing::debug!(entries, "vault unlocked");
                Ok(())
            }
            UnlockOutcome::RateLimited { wait } => {
                bail!("too many failed attempts, retry in {}s", wait.as_secs().max(1))
            }
        }
    }

    fn unlocked_vault(&self) -> eyre::Result<VaultStore> {
        let mut vault = self.vault();
        self.unlock(&mut vault)?;
        Ok(vault)
    }

    fn print(&self, value: &serde_json::Value, text: impl FnOnce() -> String) -> eyre::Result<()> {
        if self.json {
            println!("{}", serde_json::to_string_pretty(value)?);
        } else {
            println!("{}", text());
        }
        Ok(())
    }
}

pub fn run(ctx: &Context, command: Command) -> eyre::Result<()> {
    match command {
        Command::Init => init(ctx),
        Command::List { show_secrets } => list(ctx, show_secrets),
        Command::Add(args) => add(ctx, args),
        Command::Remove { id } => remove(ctx, &id),
        Command::Export { out } => export(ctx, &out),
        Command::Import {
            file,
            mode,
            backup_password,
        } => import(ctx, &file, mode, backup_password),
        Command::VerifyBackup {
            file,
            backup_password,
        } => verify_backup(ctx, &file, backup_password),
        Command::Totp { id } => totp_code(ctx, &id),
        Command::TotpSecret { issuer, account } => totp_secret(ctx, &issuer, account.as_deref()),
        Command::BackupCodes { count } => backup_codes(ctx, count),
    }
}

fn init(ctx: &Context) -> eyre::Result<()> {
    let mut vault = ctx.vault();
    vault.create(ctx.password()?, now_ms())?;
    let path = ctx.dir.root().display().to_string();
    ctx.print(&json!({ "created": path }), || format!("vault created in {path}"))
}

fn entry_view(entry: &VaultEntry, show_secrets: bool) -> eyre::Result<serde_json::Value> {
    let mut value = serde_json::to_value(entry)?;
    if !show_secrets {
        if let Some(object) = value.as_object_mut() {
            for field in SECRET_FIELDS {
                object.remove(*field);
            }
        }
    }
    Ok(value)
}

fn list(ctx: &Context, show_secrets: bool) -> eyre::Result<()> {
    let vault = ctx.unlocked_vault()?;
    let entries = vault.entries()?;
    let views = entries
        .iter()
        .map(|entry| entry_view(entry, show_secrets))
        .collect::<eyre::Result<Vec<_>>>()?;

    ctx.print(&serde_json::Value::Array(views), || {
        entries
            .iter()
            .map(|entry| {
                let mut line = format!("{}  {}", entry.id, entry.title);
                if let Some(username) = &entry.username {
                    line.push_str(&format!("  <{username}>"));
                }
                if show_secrets {
                    if let Some(password) = &entry.password {
                        line.push_str(&format!("  {password}"));
                    }
                }
                line
            })
            .collect::<Vec<_>>()
            .join("\n")
    })
}

fn add(ctx: &Context, args: AddArgs) -> eyre::Result<()> {
    let mut fields = EntryFields::new(args.title);
    if let Some(username) = args.username {
        fields = fields.with_username(username);
    }
    if let Some(secret) = args.secret {
        fields = fields.with_password(secret);
    }
    if let Some(url) = args.url {
        fields = fields.with_url(url);
    }
    if let Some(notes) = args.notes {
        fields = fields.with_notes(notes);
    }
    if let Some(totp_secret) = args.totp_secret {
        fields = fields.with_totp_secret(totp_secret);
    }
    if args.backup_codes > 0 {
        fields = fields.with_backup_codes(totp::generate_backup_codes(args.backup_codes));
    }

    let mut vault = ctx.unlocked_vault()?;
    let entry = vault.add_entry(fields, now_ms())?;
    ctx.print(&json!({ "id": entry.id }), || entry.id.clone())
}

fn remove(ctx: &Context, id: &str) -> eyre::Result<()> {
    let mut vault = ctx.unlocked_vault()?;
    vault.delete_entry(id)?;
    ctx.print(&json!({ "removed": id }), || format!("removed {id}"))
}

fn export(ctx: &Context, out: &Path) -> eyre::Result<()> {
    let vault = ctx.unlocked_vault()?;
    let blob = vault.export_backup(ctx.password()?, &ctx.identity, now_ms())?;
    fs::write(out, &blob).wrap_err_with(|| format!("failed to write '{}'", out.display()))?;
    let count = vault.entries()?.len();
    ctx.print(
        &json!({ "path": out.display().to_string(), "entries": count }),
        || format!("exported {count} entries to {}", out.display()),
    )
}

fn read_backup(path: &Path) -> eyre::Result<String> {
    fs::read_to_string(path).wrap_err_with(|| format!("failed to read '{}'", path.display()))
}

fn import(
    ctx: &Context,
    file: &Path,
    mode: ImportMode,
    backup_password: Option<String>,
) -> eyre::Result<()> {
    let blob = read_backup(file)?;
    let explicit = backup_password.map(SecretString::from);
    let backup_password = match &explicit {
        Some(password) => password,
        None => ctx.password()?,
    };

    let mut vault = ctx.vault();
    if vault.state()? != VaultState::Uninitialized {
        ctx.unlock(&mut vault)?;
    }
    let summary = vault.import_backup(&blob, backup_password, mode, now_ms())?;
    ctx.print(
        &json!({
            "mode": mode.to_string(),
            "totalEntries": summary.total_entries,
            "imported": summary.imported,
        }),
        || {
            format!(
                "{mode}: imported {} of {} entries",
                summary.imported, summary.total_entries
            )
        },
    )
}

fn verify_backup(ctx: &Context, file: &Path, backup_password: Option<String>) -> eyre::Result<()> {
    let blob = read_backup(file)?;
    let explicit = backup_password.map(SecretString::from);
    let password = match &explicit {
        Some(password) => password,
        None => ctx.password()?,
    };
    let codec = BackupCodec::new(ctx.config.backup_iterations);
    if !codec.verify_password(&blob, password)? {
        bail!("the password does not open this backup");
    }
    let info = codec.inspect(&blob, password)?;
    ctx.print(
        &json!({
            "version": info.version,
            "createdAt": info.created_at,
            "totalEntries": info.total_entries,
            "deviceFingerprint": info.device_fingerprint,
        }),
        || {
            format!(
                "backup v{} with {} entries, created at {} ms by {}",
                info.version, info.total_entries, info.created_at, info.device_fingerprint
            )
        },
    )
}

fn totp_code(ctx: &Context, id: &str) -> eyre::Result<()> {
    let vault = ctx.unlocked_vault()?;
    let token = vault.totp_token(id, now_secs())?;
    ctx.print(
        &json!({ "token": token.token, "remainingSeconds": token.remaining_seconds }),
        || format!("{} ({}s left)", token.token, token.remaining_seconds),
    )
}

fn totp_secret(ctx: &Context, issuer: &str, account: Option<&str>) -> eyre::Result<()> {
    let secret = totp::generate_secret();
    let uri = account
        .map(|account| totp::provisioning_uri(&secret, issuer, account))
        .transpose()?;
    ctx.print(&json!({ "secret": secret, "uri": uri }), || match &uri {
        Some(uri) => format!("{secret}\n{uri}"),
        None => secret.clone(),
    })
}

fn backup_codes(ctx: &Context, count: usize) -> eyre::Result<()> {
    let codes = totp::generate_backup_codes(count);
    ctx.print(&json!(codes), || codes.join("\n"))
}
