use anyhow::{Context, Result};
use futures::{StreamExt, stream};
use media_uploader::{
    config::{self, AppConfig},
    errors::BoxError,
    models::{
        credential::Credential,
        outcome::{FailureKind, Phase, TransferOutcome},
    },
    services::{
        api_client::ApiClient,
        auth::Authenticator,
        chunked_upload::ChunkedUploadClient,
        orchestrator::{FOLDER_DEPTH, UploadOrchestrator},
        resume_store::SqliteResumeStore,
        retry::RetryPolicy,
        telemetry::{LoggingReporter, NoopReporter, ProgressFn},
        transport::AuthenticatedTransport,
    },
};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::{
    path::{Component, Path},
    str::FromStr,
    sync::Arc,
    time::Duration,
};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + CLI ---
    let (cfg, args) = AppConfig::from_env_and_args()?;

    tracing::info!("Starting media-uploader with config: {:?}", cfg);

    // --- Initialize SQLite connection ---
    let db_url = &cfg.database_url;
    let db_path = db_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("file:");
    tracing::debug!("Interpreted SQLite path => {}", db_path);

    // Create parent directory if needed
    if let Some(parent) = Path::new(db_path).parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)?;
            tracing::info!("Created missing directory {:?}", parent);
        }
    }

    let options = SqliteConnectOptions::from_str(db_url)
        .with_context(|| format!("parsing database URL {}", db_url))?
        .create_if_missing(true);
    let db: Arc<sqlx::Pool<sqlx::Sqlite>> = Arc::new(
        SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?,
    );

    let store = SqliteResumeStore::new(db.clone());
    store.migrate().await.context("applying resume schema")?;

    // --- Handle migration mode ---
    if args.migrate {
        tracing::info!("Database migration complete.");
        return Ok(()); // exit after migration
    }

    if args.paths.is_empty() {
        anyhow::bail!("no media files given");
    }

    // --- Authentication ---
    let credential = config::load_credentials(&cfg.credentials_file)?;
    let http = cfg.http_client()?;

    let credentials_path = cfg.credentials_file.clone();
    let auth = Authenticator::new(http.clone(), cfg.token_url.clone(), credential)
        .context("configuring authenticator")?
        .with_update_callback(Box::new(
            move |credential: &Credential| -> Result<(), BoxError> {
                config::save_credentials(&credentials_path, credential)?;
                Ok(())
            },
        ));
    let transport = AuthenticatedTransport::new(http, Arc::new(auth));

    // --- Initialize core service ---
    let api = ApiClient::new(
        transport.clone(),
        cfg.api_base_url.clone(),
        cfg.upload_base_url.clone(),
    );
    let chunked = ChunkedUploadClient::new(
        transport,
        cfg.upload_base_url.clone(),
        RetryPolicy::default(),
        cfg.chunked_threshold,
    );
    let orchestrator = UploadOrchestrator::new(
        api,
        chunked,
        Arc::new(store),
        Arc::new(LoggingReporter::new(NoopReporter)),
        cfg.upload_options(),
    );

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Interrupt received, cancelling uploads");
                cancel.cancel();
            }
        });
    }

    let progress: &ProgressFn = &|done, total, phase| {
        if phase == Phase::Uploading {
            tracing::debug!(done, total, "upload progress");
        }
    };

    // --- Upload ---
    let outcomes: Vec<TransferOutcome> = stream::iter(&args.paths)
        .map(|path| {
            let orchestrator = &orchestrator;
            let cancel = &cancel;
            let owner = args.owner.clone().or_else(|| owner_from_path(path));
            async move {
                let logical_id = path.display().to_string();
                match owner {
                    Some(owner) => {
                        orchestrator
                            .upload(path, &owner, &logical_id, Some(progress), cancel)
                            .await
                    }
                    None => TransferOutcome::failed(
                        logical_id,
                        FailureKind::LocalIo,
                        "cannot determine owner; pass --owner",
                        Duration::ZERO,
                        0,
                    ),
                }
            }
        })
        .buffer_unordered(cfg.concurrency)
        .collect()
        .await;

    let failed = outcomes.iter().filter(|o| !o.success).count();
    let skipped = outcomes.iter().filter(|o| o.skipped).count();
    tracing::info!(total = outcomes.len(), skipped, failed, "Uploads finished");

    if failed > 0 {
        anyhow::bail!("{} of {} uploads failed", failed, outcomes.len());
    }
    Ok(())
}

/// The directory just above `<year>/<month>/<day>`.
fn owner_from_path(path: &Path) -> Option<String> {
    let dirs = path
        .parent()?
        .components()
        .filter_map(|c| match c {
            Component::Normal(name) => Some(name.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>();
    dirs.len()
        .checked_sub(FOLDER_DEPTH + 1)
        .map(|index| dirs[index].clone())
}
