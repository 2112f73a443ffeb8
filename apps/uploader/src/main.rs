use std::{io::Write, path::PathBuf, process::ExitCode, sync::Arc};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use client_core::{
    settings::{load_settings, RelayMode, Settings},
    CachedConfigSource, ConfigSource, ControllerEvent, PathFilePicker, RelayConfig,
    RestConfigSource, StaticConfigSource, UploadController, VideoGallery,
};
use relay::HttpRelayClient;
use shared::domain::{BucketName, NoticeLevel, UploadState};
use storage::{HttpObjectStore, ObjectStore};
use tokio::sync::broadcast;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "vidrelay", about = "Upload videos to storage and optionally relay them")]
struct Cli {
    /// Settings file; defaults to ./vidrelay.toml when present.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Upload a video file.
    Upload { path: PathBuf },
    /// List previously uploaded videos.
    List,
    /// Print the resolved settings with secrets masked.
    Config,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    let cli = Cli::parse();
    let settings = load_settings(cli.config.as_deref())?;

    match cli.command {
        Command::Upload { path } => upload(&settings, path).await,
        Command::List => list(&settings).await,
        Command::Config => {
            println!("{}", serde_json::to_string_pretty(&settings.redacted())?);
            println!("relay mode: {:?}", settings.relay_mode());
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn open_store(settings: &Settings) -> Result<Arc<HttpObjectStore>> {
    let store = HttpObjectStore::new(
        &settings.storage_url,
        settings.storage_api_key.clone(),
        BucketName(settings.storage_bucket.clone()),
    )
    .context("invalid storage settings")?;
    Ok(Arc::new(store))
}

fn relay_source(settings: &Settings) -> Result<Option<Arc<dyn ConfigSource>>> {
    let source: Arc<dyn ConfigSource> = match settings.relay_mode() {
        RelayMode::Disabled => return Ok(None),
        RelayMode::Static => Arc::new(StaticConfigSource::new(
            settings
                .static_relay_target()
                .context("static relay credentials are incomplete")?,
        )),
        RelayMode::Remote => {
            let rest = RestConfigSource::new(
                &settings.storage_url,
                settings.storage_api_key.clone(),
                &settings.relay_config_table,
            )
            .context("invalid relay configuration source")?;
            Arc::new(CachedConfigSource::new(Arc::new(rest)))
        }
    };
    Ok(Some(source))
}

async fn upload(settings: &Settings, path: PathBuf) -> Result<ExitCode> {
    let store = open_store(settings)?;
    let source = relay_source(settings)?;
    let initial = if source.is_some() {
        RelayConfig::NotLoaded
    } else {
        RelayConfig::Disabled
    };
    let controller = UploadController::new(
        store.clone(),
        Arc::new(HttpRelayClient::new()),
        initial,
    );
    if let Some(source) = source {
        controller.load_relay_config(source.as_ref()).await;
    }

    let printer = tokio::spawn(print_events(controller.subscribe_events()));
    let picker = PathFilePicker::new(Some(path));
    let outcome = match controller.choose_file(&picker).await {
        Ok(_) => controller.upload().await,
        Err(err) => Err(err),
    };
    drop(controller);
    let _ = printer.await;

    match outcome {
        Ok(receipt) => {
            info!(key = %receipt.key, relayed = receipt.relayed, "done");
            println!("{}", store.public_url(receipt.key.as_str()));
            Ok(ExitCode::SUCCESS)
        }
        Err(err) => {
            eprintln!("error: {err}");
            Ok(ExitCode::FAILURE)
        }
    }
}

async fn list(settings: &Settings) -> Result<ExitCode> {
    let gallery = VideoGallery::new(open_store(settings)?);
    let videos = gallery.videos().await.context("failed to list videos")?;
    if videos.is_empty() {
        println!("no videos uploaded yet");
    }
    for video in videos {
        let size = video
            .size_bytes
            .map(|bytes| bytes.to_string())
            .unwrap_or_else(|| "-".into());
        println!("{}\t{}\t{}", video.name, size, video.public_url);
    }
    Ok(ExitCode::SUCCESS)
}

async fn print_events(mut events: broadcast::Receiver<ControllerEvent>) {
    loop {
        match events.recv().await {
            Ok(ControllerEvent::StateChanged(UploadState::Uploading { progress })) => {
                eprint!("\ruploading... {progress:>3}%");
                let _ = std::io::stderr().flush();
            }
            Ok(ControllerEvent::StateChanged(state)) if state.is_terminal() => eprintln!(),
            Ok(ControllerEvent::Notice(notice)) => {
                let tag = match notice.level {
                    NoticeLevel::Info => "info",
                    NoticeLevel::Success => "ok",
                    NoticeLevel::Error => "error",
                };
                eprintln!("[{tag}] {}: {}", notice.title, notice.description);
            }
            Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
