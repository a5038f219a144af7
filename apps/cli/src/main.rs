mod config;
mod dir_storage;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use quire_transfer::{BlobSource, FileBlob};
use quire_upload::{SessionCallbacks, UploadConfig, UploadSession, UploadStorage};
use tracing_subscriber::EnvFilter;

use config::CliConfig;
use dir_storage::DirStorage;

#[derive(Parser)]
#[command(name = "quire")]
#[command(about = "Resumable, content-addressed file uploads", long_about = None)]
struct Cli {
    /// Config file (default: ~/.config/quire/cli.toml).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Storage directory, overriding `store_dir` from the config.
    #[arg(long)]
    store: Option<PathBuf>,

    /// Print machine-readable JSON instead of progress lines.
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Uploads a file. Ctrl-C pauses and prints the session id to resume with.
    Upload {
        file: PathBuf,
        /// Continue a session interrupted earlier.
        #[arg(long)]
        session: Option<String>,
    },
    /// Drops the stored chunks of an unfinished session.
    Cancel {
        #[arg(long)]
        session: String,
    },
    /// Prints the effective configuration.
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,quire=debug")),
        )
        .init();

    let cli = Cli::parse();
    let (config, config_path) = CliConfig::load(cli.config.as_deref())?;
    let store_dir = cli.store.clone().unwrap_or_else(|| config.store_dir.clone());

    match cli.cmd {
        Command::Upload { file, session } => {
            let storage = open_storage(&store_dir)?;
            upload(storage, config.upload, &file, session.as_deref(), cli.json).await
        }
        Command::Cancel { session } => {
            let storage = open_storage(&store_dir)?;
            storage.cancel(&session).await?;
            tracing::info!(session = %session, "session cancelled");
            Ok(())
        }
        Command::Config => {
            println!("# {}", config_path.display());
            print!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

fn open_storage(dir: &Path) -> anyhow::Result<Arc<DirStorage>> {
    let storage = DirStorage::open(dir)
        .with_context(|| format!("failed to open storage at {}", dir.display()))?;
    tracing::debug!(root = %storage.root().display(), "storage opened");
    Ok(Arc::new(storage))
}

fn progress_callbacks(json: bool) -> SessionCallbacks {
    SessionCallbacks::new()
        .on_hash_progress(move |percent| {
            if !json {
                eprint!("\rhashing   {percent:>3}%");
            }
        })
        .on_progress(move |info| {
            if json {
                if let Ok(line) = serde_json::to_string(info) {
                    println!("{line}");
                }
            } else {
                eprint!(
                    "\ruploading {:>3}%  {}/{} chunks  {}  eta {}    ",
                    info.percent,
                    info.chunks_uploaded,
                    info.total_chunks,
                    info.speed_label,
                    info.eta_label
                );
            }
        })
        .on_status(|status| tracing::debug!(?status, "status changed"))
        .on_error(move |message| {
            if !json {
                eprintln!();
            }
            eprintln!("error: {message}");
        })
}

async fn upload(
    storage: Arc<DirStorage>,
    config: UploadConfig,
    path: &Path,
    session_id: Option<&str>,
    json: bool,
) -> anyhow::Result<()> {
    let source: Arc<dyn BlobSource> = Arc::new(
        FileBlob::open(path).with_context(|| format!("failed to open {}", path.display()))?,
    );
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();

    // The CLI drives `start` itself so Ctrl-C can race it.
    let config = UploadConfig {
        auto_upload: false,
        ..config
    };
    let session = Arc::new(UploadSession::with_callbacks(
        storage,
        config,
        progress_callbacks(json),
    )?);
    match session_id {
        Some(id) => session.select_file_with_session(source, &file_name, id).await?,
        None => session.select_file(source, &file_name).await?,
    };

    let mut run = tokio::spawn({
        let session = session.clone();
        async move { session.start().await }
    });

    let outcome = tokio::select! {
        result = &mut run => result?,
        _ = tokio::signal::ctrl_c() => {
            if let Err(e) = session.pause() {
                tracing::debug!(error = %e, "nothing to pause");
            }
            run.await?
        }
    };
    if !json {
        eprintln!();
    }

    match outcome {
        Ok(Some(url)) => {
            if json {
                println!("{}", serde_json::to_string(&session.snapshot())?);
            } else {
                println!("{url}");
            }
            Ok(())
        }
        Ok(None) => {
            let session_id = session.session_id();
            if json {
                println!("{}", serde_json::to_string(&session.snapshot())?);
            } else {
                eprintln!(
                    "paused, resume with: quire upload {} --session {session_id}",
                    path.display()
                );
            }
            Ok(())
        }
        Err(e) => {
            if session.can_resume() {
                eprintln!(
                    "resume with: quire upload {} --session {}",
                    path.display(),
                    session.session_id()
                );
            }
            Err(e.into())
        }
    }
}
