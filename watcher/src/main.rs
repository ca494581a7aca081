mod artifacts;
mod control;
mod dispatcher;
mod keys;
mod notify;
mod pipeline;
mod supervisor;

use control::{Controller, LifecycleEvent};
use dispatcher::Dispatcher;
use donation_watch_common::config::Config;
use notify::ConfiguredNotifier;
use pipeline::DonationPipeline;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use supervisor::launcher::{check_transcoder_available, FfmpegLauncher};
use supervisor::Supervisor;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

const NOTIFY_DRAIN_SECS: u64 = 30;

#[tokio::main]
async fn main() {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    let config = match Config::load(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {e}", config_path.display());
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.parse().unwrap_or_default()),
        )
        .init();

    info!(
        stream = config.stream.target.as_deref().unwrap_or("-"),
        width = config.stream.width,
        height = config.stream.height,
        fps = config.stream.fps,
        stall_secs = config.stream.stall_timeout_secs,
        cooldown_frames = config.detector.cooldown_frames,
        donations_dir = %config.output.donations_dir.display(),
        "starting donation-watch"
    );

    // Decoding fails without the transcoder; warn early but keep going.
    check_transcoder_available(&config.stream.transcoder).await;

    let notifier = match ConfiguredNotifier::from_config(config.notify.as_ref()) {
        Ok(n) => n,
        Err(e) => {
            error!(error = %e, "failed to build notifier");
            std::process::exit(1);
        }
    };
    let (notify_tx, notify_rx) = mpsc::channel(32);
    let notifier_task = tokio::spawn(notify::run_notifier(notifier, notify_rx));

    let mut pipeline = DonationPipeline::new(config.detector.clone(), &config.output, notify_tx);
    let pipeline_control = pipeline.control();

    let mut dispatcher = Dispatcher::new();
    let detection = dispatcher.subscribe(move |frame| {
        pipeline.on_frame(frame.clone())?;
        Ok(())
    });
    let dispatcher = Arc::new(Mutex::new(dispatcher));

    let supervisor = Supervisor::new(
        config.stream.clone(),
        Arc::new(FfmpegLauncher::new(config.stream.clone())),
        Arc::clone(&dispatcher),
    );

    let mut states = supervisor.watch_state();
    tokio::spawn(async move {
        while states.changed().await.is_ok() {
            let state = *states.borrow_and_update();
            info!(?state, "pipeline state changed");
        }
    });

    let (event_tx, event_rx) = mpsc::channel(8);
    let controller = Controller::new(supervisor.clone(), pipeline_control);
    let controller_task = tokio::spawn(controller.run(event_rx));

    if let Some(target) = config.stream.target.clone() {
        if event_tx.send(LifecycleEvent::Started(target)).await.is_err() {
            error!("controller exited before the stream could start");
        }
    } else {
        info!("no stream target configured, waiting for `start <target>` on stdin");
    }

    let stdin_events = event_tx.clone();
    tokio::spawn(async move {
        let stdin = tokio::io::BufReader::new(tokio::io::stdin());
        control::read_commands(stdin, stdin_events).await;
    });

    wait_for_shutdown().await;
    info!("shutdown requested");

    drop(event_tx);
    supervisor.stop().await;
    controller_task.abort();
    if let Err(e) = controller_task.await {
        if !e.is_cancelled() {
            warn!(error = %e, "controller task failed");
        }
    }

    // the detection subscriber holds the last notification sender
    match dispatcher.lock() {
        Ok(mut dispatcher) => {
            dispatcher.unsubscribe(detection);
        }
        Err(_) => warn!("dispatcher lock poisoned, notifications may not drain"),
    }
    drop(supervisor);
    match tokio::time::timeout(Duration::from_secs(NOTIFY_DRAIN_SECS), notifier_task).await {
        Ok(Err(e)) => warn!(error = %e, "notifier task failed"),
        Err(_) => warn!("pending notifications not delivered before shutdown"),
        Ok(Ok(())) => {}
    }
    info!("donation-watch stopped");

    // the blocking stdin reader would otherwise hold the runtime open
    std::process::exit(0);
}

async fn wait_for_shutdown() {
    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            warn!(error = %e, "failed to install SIGTERM handler");
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "failed to wait for ctrl-c");
            }
            return;
        }
    };
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                error!(error = %e, "failed to wait for ctrl-c");
            }
        }
        _ = terminate.recv() => {}
    }
}
