use crate::services::{
    admission::AdmissionSettings, object_store::StoreLimits, sweeper::DEFAULT_SWEEP_INTERVAL,
};
use anyhow::{Context, Result, bail};
use clap::Parser;
use std::{env, fmt, str::FromStr, time::Duration};

const ENV_PREFIX: &str = "EPHEMERAL_SHARE_";

/// One week.
const MAX_RATE_LIMIT_WINDOW_SECS: i64 = 7 * 24 * 60 * 60;

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub storage_dir: String,
    pub database_url: String,
    pub upload_password: Option<String>,
    pub max_file_size_mb: u64,
    pub max_files: u64,
    pub rate_limit_max: u32,
    pub rate_limit_window_secs: i64,
    pub rate_limit_max_tracked: usize,
    pub sweep_interval_secs: u64,
    pub public_url: Option<String>,
    pub trust_proxy_headers: bool,
}

/// Command-line + environment configuration.
///
/// Every flag falls back to `EPHEMERAL_SHARE_<NAME>` in the environment.
/// The upload password is read from `EPHEMERAL_SHARE_UPLOAD_PASSWORD` only.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Ephemeral password-protected file sharing")]
pub struct Args {
    /// Host to bind to (overrides EPHEMERAL_SHARE_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides EPHEMERAL_SHARE_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory where uploaded files are stored (overrides EPHEMERAL_SHARE_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Database URL (overrides EPHEMERAL_SHARE_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Largest accepted upload in MiB (overrides EPHEMERAL_SHARE_MAX_FILE_SIZE_MB)
    #[arg(long)]
    pub max_file_size_mb: Option<u64>,

    /// Most files stored at once (overrides EPHEMERAL_SHARE_MAX_FILES)
    #[arg(long)]
    pub max_files: Option<u64>,

    /// Failed password attempts allowed per window (overrides EPHEMERAL_SHARE_RATE_LIMIT_MAX)
    #[arg(long)]
    pub rate_limit_max: Option<u32>,

    /// Rate-limit window in seconds (overrides EPHEMERAL_SHARE_RATE_LIMIT_WINDOW_SECS)
    #[arg(long)]
    pub rate_limit_window_secs: Option<i64>,

    /// Addresses tracked by the rate limiter (overrides EPHEMERAL_SHARE_RATE_LIMIT_MAX_TRACKED)
    #[arg(long)]
    pub rate_limit_max_tracked: Option<usize>,

    /// Seconds between cleanup runs (overrides EPHEMERAL_SHARE_SWEEP_INTERVAL_SECS)
    #[arg(long)]
    pub sweep_interval_secs: Option<u64>,

    /// Base URL used in share links (overrides EPHEMERAL_SHARE_PUBLIC_URL)
    #[arg(long)]
    pub public_url: Option<String>,

    /// Honour X-Forwarded-For / X-Real-IP (overrides EPHEMERAL_SHARE_TRUST_PROXY_HEADERS)
    #[arg(long)]
    pub trust_proxy_headers: Option<bool>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        let args = Args::parse();
        let migrate = args.migrate;
        let cfg = Self::resolve(args, |name| env::var(name).ok())?;
        Ok((cfg, migrate))
    }

    /// Merge CLI args over `lookup` (an environment) over defaults.
    pub fn resolve(args: Args, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |name: &str| lookup(&format!("{ENV_PREFIX}{name}")).filter(|v| !v.is_empty());

        let cfg = Self {
            host: args
                .host
                .or_else(|| var("HOST"))
                .unwrap_or_else(|| "0.0.0.0".into()),
            port: pick(args.port, &var, "PORT", 3000)?,
            storage_dir: args
                .storage_dir
                .or_else(|| var("STORAGE_DIR"))
                .unwrap_or_else(|| "./data/uploads".into()),
            database_url: args
                .database_url
                .or_else(|| var("DATABASE_URL"))
                .unwrap_or_else(|| "sqlite://./data/meta/ephemeral_share.db".into()),
            upload_password: var("UPLOAD_PASSWORD"),
            max_file_size_mb: pick(args.max_file_size_mb, &var, "MAX_FILE_SIZE_MB", 100)?,
            max_files: pick(args.max_files, &var, "MAX_FILES", 10)?,
            rate_limit_max: pick(args.rate_limit_max, &var, "RATE_LIMIT_MAX", 5)?,
            rate_limit_window_secs: pick(
                args.rate_limit_window_secs,
                &var,
                "RATE_LIMIT_WINDOW_SECS",
                60,
            )?,
            rate_limit_max_tracked: pick(
                args.rate_limit_max_tracked,
                &var,
                "RATE_LIMIT_MAX_TRACKED",
                10_000,
            )?,
            sweep_interval_secs: pick(
                args.sweep_interval_secs,
                &var,
                "SWEEP_INTERVAL_SECS",
                DEFAULT_SWEEP_INTERVAL.as_secs(),
            )?,
            public_url: args
                .public_url
                .or_else(|| var("PUBLIC_URL"))
                .map(|url| url.trim_end_matches('/').to_string()),
            trust_proxy_headers: pick(args.trust_proxy_headers, &var, "TRUST_PROXY_HEADERS", true)?,
        };

        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<()> {
        if self.max_files == 0 {
            bail!("{ENV_PREFIX}MAX_FILES must be at least 1");
        }
        if self.rate_limit_max == 0 {
            bail!("{ENV_PREFIX}RATE_LIMIT_MAX must be at least 1");
        }
        if !(1..=MAX_RATE_LIMIT_WINDOW_SECS).contains(&self.rate_limit_window_secs) {
            bail!(
                "{ENV_PREFIX}RATE_LIMIT_WINDOW_SECS must be between 1 and {MAX_RATE_LIMIT_WINDOW_SECS}"
            );
        }
        if self.sweep_interval_secs == 0 {
            bail!("{ENV_PREFIX}SWEEP_INTERVAL_SECS must be positive");
        }
        Ok(())
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn max_file_size_bytes(&self) -> u64 {
        self.max_file_size_mb.saturating_mul(1024 * 1024)
    }

    pub fn store_limits(&self) -> StoreLimits {
        StoreLimits {
            max_file_size: self.max_file_size_bytes(),
            max_files: self.max_files,
        }
    }

    pub fn admission_settings(&self) -> AdmissionSettings {
        AdmissionSettings {
            secret: self.upload_password.clone(),
            max_failures: self.rate_limit_max,
            window_secs: self.rate_limit_window_secs,
            max_tracked: self.rate_limit_max_tracked,
        }
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("storage_dir", &self.storage_dir)
            .field("database_url", &self.database_url)
            .field(
                "upload_password",
                &self.upload_password.as_ref().map(|_| "<redacted>"),
            )
            .field("max_file_size_mb", &self.max_file_size_mb)
            .field("max_files", &self.max_files)
            .field("rate_limit_max", &self.rate_limit_max)
            .field("rate_limit_window_secs", &self.rate_limit_window_secs)
            .field("rate_limit_max_tracked", &self.rate_limit_max_tracked)
            .field("sweep_interval_secs", &self.sweep_interval_secs)
            .field("public_url", &self.public_url)
            .field("trust_proxy_headers", &self.trust_proxy_headers)
            .finish()
    }
}

/// CLI value, else parsed environment value, else `default`.
fn pick<T>(
    cli: Option<T>,
    var: &impl Fn(&str) -> Option<String>,
    name: &str,
    default: T,
) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    if let Some(value) = cli {
        return Ok(value);
    }
    match var(name) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("parsing {ENV_PREFIX}{name} value `{raw}`")),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn defaults_apply_with_empty_environment() {
        let cfg = AppConfig::resolve(Args::default(), env_of(&[])).unwrap();
        assert_eq!(cfg.addr(), "0.0.0.0:3000");
        assert_eq!(cfg.upload_password, None);
        assert_eq!(cfg.max_file_size_bytes(), 100 * 1024 * 1024);
        assert_eq!(cfg.max_files, 10);
        assert_eq!(cfg.rate_limit_max, 5);
        assert_eq!(cfg.rate_limit_window_secs, 60);
        assert_eq!(cfg.sweep_interval(), Duration::from_secs(300));
        assert!(cfg.trust_proxy_headers);
        assert_eq!(cfg.public_url, None);
    }

    #[test]
    fn environment_values_are_parsed() {
        let cfg = AppConfig::resolve(
            Args::default(),
            env_of(&[
                ("EPHEMERAL_SHARE_PORT", "8080"),
                ("EPHEMERAL_SHARE_UPLOAD_PASSWORD", "s3cret"),
                ("EPHEMERAL_SHARE_MAX_FILE_SIZE_MB", "5"),
                ("EPHEMERAL_SHARE_MAX_FILES", "1"),
                ("EPHEMERAL_SHARE_TRUST_PROXY_HEADERS", "false"),
                ("EPHEMERAL_SHARE_PUBLIC_URL", "https://share.example.com/"),
            ]),
        )
        .unwrap();
        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.upload_password.as_deref(), Some("s3cret"));
        assert_eq!(cfg.store_limits().max_file_size, 5 * 1024 * 1024);
        assert_eq!(cfg.store_limits().max_files, 1);
        assert!(!cfg.trust_proxy_headers);
        assert_eq!(cfg.public_url.as_deref(), Some("https://share.example.com"));
    }

    #[test]
    fn cli_flags_override_environment() {
        let args = Args::try_parse_from(["ephemeral-share", "--port", "9000", "--max-files", "3"])
            .unwrap();
        let cfg = AppConfig::resolve(
            args,
            env_of(&[
                ("EPHEMERAL_SHARE_PORT", "8080"),
                ("EPHEMERAL_SHARE_MAX_FILES", "7"),
            ]),
        )
        .unwrap();
        assert_eq!(cfg.port, 9000);
        assert_eq!(cfg.max_files, 3);
    }

    #[test]
    fn empty_password_counts_as_unset() {
        let cfg = AppConfig::resolve(
            Args::default(),
            env_of(&[("EPHEMERAL_SHARE_UPLOAD_PASSWORD", "")]),
        )
        .unwrap();
        assert_eq!(cfg.upload_password, None);
    }

    #[test]
    fn malformed_numbers_name_the_variable() {
        let err = AppConfig::resolve(
            Args::default(),
            env_of(&[("EPHEMERAL_SHARE_MAX_FILES", "lots")]),
        )
        .unwrap_err();
        assert!(format!("{err:#}").contains("EPHEMERAL_SHARE_MAX_FILES"));
    }

    #[test]
    fn zero_capacity_is_rejected() {
        let err = AppConfig::resolve(
            Args::default(),
            env_of(&[("EPHEMERAL_SHARE_MAX_FILES", "0")]),
        )
        .unwrap_err();
        assert!(err.to_string().contains("MAX_FILES"));
    }

    #[test]
    fn rate_limit_window_is_bounded() {
        for raw in ["0", "-5", "604801", "9223372036854775807"] {
            let err = AppConfig::resolve(
                Args::default(),
                env_of(&[("EPHEMERAL_SHARE_RATE_LIMIT_WINDOW_SECS", raw)]),
            )
            .unwrap_err();
            assert!(
                err.to_string().contains("RATE_LIMIT_WINDOW_SECS"),
                "window {raw} should be rejected"
            );
        }
        let cfg = AppConfig::resolve(
            Args::default(),
            env_of(&[("EPHEMERAL_SHARE_RATE_LIMIT_WINDOW_SECS", "604800")]),
        )
        .unwrap();
        assert_eq!(cfg.admission_settings().window_secs, 604_800);
    }

    #[test]
    fn debug_output_redacts_the_password() {
        let cfg = AppConfig::resolve(
            Args::default(),
            env_of(&[("EPHEMERAL_SHARE_UPLOAD_PASSWORD", "topsecret")]),
        )
        .unwrap();
        let rendered = format!("{cfg:?}");
        assert!(!rendered.contains("topsecret"));
        assert!(rendered.contains("<redacted>"));
    }
}
