mod api;
mod bell;
mod diagnostics;
mod playback;
mod runner;
mod store;
mod time_provider;

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result, bail};
use clap::{ArgAction, Parser};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::api::{ApiContext, ApiServer, ApiServerConfig, DEFAULT_API_PORT};
use crate::bell::scheduler::BellScheduler;
use crate::diagnostics::DiagnosticsInput;
use crate::playback::{
    DEFAULT_SIRENS_DIR, HostPort, PlaybackBackend, PlaybackWorker, SharedIndicator,
};
use crate::runner::TickRunner;
use crate::store::{SnapshotStore, default_data_file};
use crate::time_provider::{LocalTimeProvider, TimeProvider};

#[derive(Parser, Debug)]
#[command(
    name = "schoolbell",
    version,
    about = "Weekly school bell scheduler with a local control API"
)]
struct Cli {
    #[arg(long)]
    data_file: Option<PathBuf>,

    #[arg(long, default_value = "127.0.0.1")]
    api_bind: String,

    #[arg(long, default_value_t = DEFAULT_API_PORT)]
    api_port: u16,

    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    api_enabled: bool,

    #[arg(long, conflicts_with = "decoder")]
    player: Option<String>,

    #[arg(long = "player-arg", allow_hyphen_values = true)]
    player_args: Vec<String>,

    #[arg(long)]
    decoder: bool,

    #[arg(long, default_value = DEFAULT_SIRENS_DIR)]
    sirens_dir: PathBuf,

    #[arg(long)]
    diagnostics: bool,
}

fn main() {
    if let Err(err) = run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("schoolbell=info")),
        )
        .init();

    let backend = select_backend(&cli)?;
    let data_file = match cli.data_file.clone() {
        Some(path) => path,
        None => default_data_file()
            .context("unable to locate a home directory for the data file; pass --data-file")?,
    };
    let store = SnapshotStore::new(&data_file);
    let loaded = store.load();
    let clock = LocalTimeProvider;

    if cli.diagnostics {
        return diagnostics::run_diagnostics(&DiagnosticsInput {
            data_file: &data_file,
            loaded: &loaded,
            backend: &backend,
            sirens_dir: &cli.sirens_dir,
            clock_label: clock.label(),
            now: clock.now(),
        });
    }
    if !loaded.malformed.is_empty() {
        warn!(
            count = loaded.malformed.len(),
            "some stored bell times are malformed and will never ring"
        );
    }

    let worker = PlaybackWorker::spawn(backend.clone())?;
    let indicator = SharedIndicator::default();
    let port = HostPort::new(worker.sender(), Arc::clone(&indicator));
    let scheduler = Arc::new(Mutex::new(BellScheduler::new_with_now(
        loaded.snapshot,
        port,
        clock.now(),
    )));
    info!(
        data_file = %data_file.display(),
        backend = %backend.label(),
        "school bell running"
    );

    let api_server = if cli.api_enabled {
        let server = ApiServer::start(
            &ApiServerConfig {
                bind_addr: cli.api_bind.clone(),
                port: cli.api_port,
            },
            ApiContext {
                scheduler: Arc::clone(&scheduler),
                store: store.clone(),
                indicator: Arc::clone(&indicator),
                sirens_dir: cli.sirens_dir.clone(),
                clock: Box::new(LocalTimeProvider),
            },
        )
        .with_context(|| {
            format!(
                "failed to start local API at {}:{}",
                cli.api_bind, cli.api_port
            )
        })?;
        if let Some(addr) = server.local_addr() {
            info!(%addr, "control API listening");
        }
        Some(server)
    } else {
        None
    };

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build tick runtime")?;
    let runner = TickRunner::new(Arc::clone(&scheduler), Box::new(clock), store);
    let summary = runtime.block_on(runner.run_until(shutdown_signal()));

    drop(api_server);
    drop(worker);
    info!(
        ticks = summary.ticks,
        bells_rung = summary.bells_rung,
        saved = summary.saved,
        "school bell stopped"
    );
    Ok(())
}

fn select_backend(cli: &Cli) -> Result<PlaybackBackend> {
    if cli.decoder {
        #[cfg(feature = "audio")]
        return Ok(PlaybackBackend::Decoder);
        #[cfg(not(feature = "audio"))]
        bail!("--decoder requires schoolbell to be built with the `audio` feature");
    }
    match cli.player.as_ref() {
        Some(program) => Ok(PlaybackBackend::Command {
            program: program.clone(),
            args: cli.player_args.clone(),
        }),
        None if !cli.player_args.is_empty() => bail!("--player-arg requires --player"),
        None => Ok(PlaybackBackend::Silent),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "unable to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "unable to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!(signal = "ctrl-c", "shutdown signal received"),
        () = terminate => info!(signal = "sigterm", "shutdown signal received"),
    }
}
