use clap::Parser;
use std::sync::Arc;
use syncengine::cli::{Cli, Command};
use syncengine::core::{
    ChannelProgressSink, Clock, DriftCache, Engine, EngineParams, JsonServerStore,
    ProgressEvent, ServerStore, SyncLogger, SystemClock,
};

#[cfg(feature = "network-monitoring")]
use syncengine::core::IsahcProbeTransport;

fn default_store_path() -> std::path::PathBuf {
    let mut path = dirs::home_dir().unwrap_or_else(|| std::path::PathBuf::from("."));
    path.push(".syncengine");
    path.push("servers.json");
    path
}

#[cfg(feature = "network-monitoring")]
#[tokio::main(flavor = "current_thread")]
async fn main() -> std::process::ExitCode {
    run().await
}

#[cfg(not(feature = "network-monitoring"))]
fn main() -> std::process::ExitCode {
    eprintln!("syncengine was built without the `network-monitoring` feature; no transport is available to run a sync");
    std::process::ExitCode::FAILURE
}

#[cfg(feature = "network-monitoring")]
async fn run() -> std::process::ExitCode {
    let cli = Cli::parse();
    let store_path = cli.store.clone().unwrap_or_else(default_store_path);

    let logger = Arc::new(SyncLogger::from_env(SyncLogger::default_log_path()));

    let store: Arc<dyn ServerStore> = match JsonServerStore::new(store_path) {
        Ok(store) => Arc::new(store),
        Err(err) => {
            eprintln!("failed to open server store: {err}");
            return std::process::ExitCode::FAILURE;
        }
    };

    match cli.command {
        Command::Add { url } => match store.add(&url) {
            Ok(target) => {
                println!("{} {}", target.id, target.url);
                std::process::ExitCode::SUCCESS
            }
            Err(err) => {
                eprintln!("{err}");
                std::process::ExitCode::FAILURE
            }
        },
        Command::List => {
            for target in store.list() {
                println!("{} {}", target.id, target.url);
            }
            std::process::ExitCode::SUCCESS
        }
        Command::Remove { id } => match store.delete(&id) {
            Ok(()) => std::process::ExitCode::SUCCESS,
            Err(err) => {
                eprintln!("{err}");
                std::process::ExitCode::FAILURE
            }
        },
        Command::History { id, limit } => {
            for result in store.history(&id, None, limit) {
                println!(
                    "{} offset={:.3}ms verified={} duration={}ms",
                    result.synced_at_ms, result.total_offset_ms, result.verified, result.duration_ms
                );
            }
            std::process::ExitCode::SUCCESS
        }
        Command::Sync { id, sample_count } => run_sync(store, logger, &id, sample_count).await,
        Command::Cancel { .. } => {
            eprintln!("cancel requires an in-process engine handle; not available across separate CLI invocations");
            std::process::ExitCode::FAILURE
        }
    }
}

#[cfg(feature = "network-monitoring")]
async fn run_sync(
    store: Arc<dyn ServerStore>,
    logger: Arc<SyncLogger>,
    id: &str,
    sample_count: Option<u32>,
) -> std::process::ExitCode {
    let target = match store.get(id) {
        Some(target) => target,
        None => {
            eprintln!("no server registered with id {id}");
            return std::process::ExitCode::FAILURE;
        }
    };

    let transport = match IsahcProbeTransport::new() {
        Ok(transport) => Arc::new(transport),
        Err(err) => {
            eprintln!("failed to build HTTP transport: {err}");
            return std::process::ExitCode::FAILURE;
        }
    };
    let clock: Arc<dyn Clock> = Arc::new(SystemClock::new());
    let probe = Arc::new(syncengine::core::HttpProbe::new(transport, clock.clone()));

    let mut params = EngineParams::default().with_env_overrides();
    if let Some(n) = sample_count {
        params.phase1_sample_count = n;
    }

    let drift = Arc::new(DriftCache::new());
    let engine = Engine::new(probe, clock, params, store, drift).with_logger(logger);

    let (sink, rx) = ChannelProgressSink::channel();

    // `rx` is a blocking std::sync::mpsc receiver; drain it on its own OS
    // thread rather than a tokio task so it can block without starving the
    // runtime that's driving `start_sync`.
    let handle = std::thread::spawn(move || {
        while let Ok(event) = rx.recv() {
            match event {
                ProgressEvent::Progress { phase, percent, .. } => {
                    println!("{phase:?} {percent:.1}%");
                }
                ProgressEvent::Complete(result) => {
                    println!(
                        "synced: offset={:.3}ms verified={}",
                        result.total_offset_ms, result.verified
                    );
                }
                ProgressEvent::Error { message, .. } => {
                    eprintln!("sync failed: {message}");
                }
            }
        }
    });

    let result = engine.start_sync(&target, &sink).await;
    drop(sink);
    let _ = handle.join();

    match result {
        Ok(_) => std::process::ExitCode::SUCCESS,
        Err(_) => std::process::ExitCode::FAILURE,
    }
}
