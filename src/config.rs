use anyhow::{Context, Result};
use clap::Parser;
use std::{env, fs, path::Path, path::PathBuf, str::FromStr, time::Duration};

use crate::{
    models::credential::Credential,
    services::{
        chunked_upload::DEFAULT_CHUNKED_THRESHOLD,
        orchestrator::{RetryGate, UploadOptions},
    },
};

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub api_base_url: String,
    pub upload_base_url: String,
    pub token_url: String,
    pub base_folder_id: String,
    pub credentials_file: PathBuf,
    pub database_url: String,
    pub chunked_threshold: u64,
    pub max_attempts: u32,
    pub retry_cooldown: Duration,
    pub commit_poll_attempts: u32,
    pub concurrency: usize,
    /// Upper bound on one HTTP request, body transfer included.
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
    /// Role granted to the owner on the day folder, if sharing is enabled.
    pub share_role: Option<String>,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Upload recorded media into cloud storage")]
pub struct Args {
    /// Media files to upload, laid out as `<owner>/<year>/<month>/<day>/<file>`
    pub paths: Vec<PathBuf>,

    /// Owner login; defaults to the directory above the year
    #[arg(long)]
    pub owner: Option<String>,

    /// API base URL (overrides MEDIA_UPLOADER_API_URL)
    #[arg(long)]
    pub api_url: Option<String>,

    /// Upload host base URL (overrides MEDIA_UPLOADER_UPLOAD_URL)
    #[arg(long)]
    pub upload_url: Option<String>,

    /// OAuth2 token endpoint (overrides MEDIA_UPLOADER_TOKEN_URL)
    #[arg(long)]
    pub token_url: Option<String>,

    /// Remote folder the dated tree is created under (overrides MEDIA_UPLOADER_BASE_FOLDER)
    #[arg(long)]
    pub base_folder: Option<String>,

    /// Credential JSON file, rewritten after every token refresh (overrides MEDIA_UPLOADER_CREDENTIALS)
    #[arg(long)]
    pub credentials: Option<PathBuf>,

    /// Database URL (overrides MEDIA_UPLOADER_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Size in bytes from which chunked sessions are used (overrides MEDIA_UPLOADER_CHUNKED_THRESHOLD)
    #[arg(long)]
    pub chunked_threshold: Option<u64>,

    /// Attempts per item before it is given up (overrides MEDIA_UPLOADER_MAX_ATTEMPTS)
    #[arg(long)]
    pub max_attempts: Option<u32>,

    /// Seconds to wait before retrying a failed item (overrides MEDIA_UPLOADER_RETRY_COOLDOWN_SECS)
    #[arg(long)]
    pub retry_cooldown_secs: Option<u64>,

    /// Items uploaded at the same time (overrides MEDIA_UPLOADER_CONCURRENCY)
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Seconds before a single HTTP request is abandoned (overrides MEDIA_UPLOADER_REQUEST_TIMEOUT_SECS)
    #[arg(long)]
    pub request_timeout_secs: Option<u64>,

    /// Seconds allowed to establish a connection (overrides MEDIA_UPLOADER_CONNECT_TIMEOUT_SECS)
    #[arg(long)]
    pub connect_timeout_secs: Option<u64>,

    /// Add the owner as a collaborator on the day folder
    #[arg(long)]
    pub share_with_owner: bool,

    /// Collaboration role used with --share-with-owner
    #[arg(long, default_value = "editor")]
    pub share_role: String,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

fn env_parsed<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(value) => value
            .parse::<T>()
            .with_context(|| format!("parsing {} value `{}`", name, value)),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("reading {}", name)),
    }
}

fn env_or(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.into())
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig plus the parsed args.
    pub fn from_env_and_args() -> Result<(Self, Args)> {
        let args = Args::parse();
        let cfg = Self::merge(&args)?;
        Ok((cfg, args))
    }

    /// CLI values win over environment values, which win over defaults.
    pub fn merge(args: &Args) -> Result<Self> {
        // --- Environment fallback ---
        let env_api = env_or("MEDIA_UPLOADER_API_URL", "https://api.box.com/2.0");
        let env_upload = env_or("MEDIA_UPLOADER_UPLOAD_URL", "https://upload.box.com/api/2.0");
        let env_token = env_or("MEDIA_UPLOADER_TOKEN_URL", "https://api.box.com/oauth2/token");
        let env_folder = env_or("MEDIA_UPLOADER_BASE_FOLDER", "0");
        let env_credentials = env_or("MEDIA_UPLOADER_CREDENTIALS", "./data/credentials.json");
        let env_db = env_or(
            "MEDIA_UPLOADER_DATABASE_URL",
            "sqlite://./data/meta/uploader.db",
        );
        let env_threshold =
            env_parsed("MEDIA_UPLOADER_CHUNKED_THRESHOLD", DEFAULT_CHUNKED_THRESHOLD)?;
        let env_attempts = env_parsed("MEDIA_UPLOADER_MAX_ATTEMPTS", 3u32)?;
        let env_cooldown = env_parsed("MEDIA_UPLOADER_RETRY_COOLDOWN_SECS", 60u64)?;
        let env_polls = env_parsed("MEDIA_UPLOADER_COMMIT_POLLS", 5u32)?;
        let env_concurrency = env_parsed("MEDIA_UPLOADER_CONCURRENCY", 2usize)?;
        let env_request_timeout = env_parsed("MEDIA_UPLOADER_REQUEST_TIMEOUT_SECS", 120u64)?;
        let env_connect_timeout = env_parsed("MEDIA_UPLOADER_CONNECT_TIMEOUT_SECS", 10u64)?;

        // --- Merge ---
        let cfg = Self {
            api_base_url: args.api_url.clone().unwrap_or(env_api),
            upload_base_url: args.upload_url.clone().unwrap_or(env_upload),
            token_url: args.token_url.clone().unwrap_or(env_token),
            base_folder_id: args.base_folder.clone().unwrap_or(env_folder),
            credentials_file: args
                .credentials
                .clone()
                .unwrap_or_else(|| env_credentials.into()),
            database_url: args.database_url.clone().unwrap_or(env_db),
            chunked_threshold: args.chunked_threshold.unwrap_or(env_threshold),
            max_attempts: args.max_attempts.unwrap_or(env_attempts),
            retry_cooldown: Duration::from_secs(args.retry_cooldown_secs.unwrap_or(env_cooldown)),
            commit_poll_attempts: env_polls,
            concurrency: args.concurrency.unwrap_or(env_concurrency).max(1),
            request_timeout: Duration::from_secs(
                args.request_timeout_secs.unwrap_or(env_request_timeout),
            ),
            connect_timeout: Duration::from_secs(
                args.connect_timeout_secs.unwrap_or(env_connect_timeout),
            ),
            share_role: args.share_with_owner.then(|| args.share_role.clone()),
        };

        Ok(cfg)
    }

    /// Shared HTTP client for the token endpoint and both API hosts.
    pub fn http_client(&self) -> Result<reqwest::Client> {
        reqwest::Client::builder()
            .user_agent(concat!("media-uploader/", env!("CARGO_PKG_VERSION")))
            .timeout(self.request_timeout)
            .connect_timeout(self.connect_timeout)
            .build()
            .context("building HTTP client")
    }

    pub fn upload_options(&self) -> UploadOptions {
        UploadOptions {
            retry_gate: RetryGate {
                max_attempts: self.max_attempts,
                cooldown: self.retry_cooldown,
            },
            commit_poll_attempts: self.commit_poll_attempts,
            share_role: self.share_role.clone(),
            ..UploadOptions::new(self.base_folder_id.clone())
        }
    }
}

pub fn load_credentials(path: &Path) -> Result<Credential> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("reading credentials from {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("parsing credentials in {}", path.display()))
}

/// Write through a sibling temp file so a crash never leaves half a file.
pub fn save_credentials(path: &Path, credential: &Credential) -> Result<()> {
    let json = serde_json::to_string_pretty(credential).context("serializing credentials")?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json).with_context(|| format!("writing {}", tmp.display()))?;
    fs::rename(&tmp, path).with_context(|| format!("replacing {}", path.display()))?;
    Ok(())
}
