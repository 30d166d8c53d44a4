use clap::Parser;
use log::{debug, info, warn};
use miette::{IntoDiagnostic, Result};
use std::net::SocketAddrV4;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio_graceful_shutdown::{SubsystemBuilder, SubsystemHandle, Toplevel};

use oscsync_core::{logical_time, OscDecoder, ReplayEngine};
use oscsync_server::{
    capture::{CaptureEngine, CaptureError, CaptureRequest},
    config::{self, STATUS_LOG_INTERVAL},
    eventlog::load_all,
    network::UdpSender,
    Cli, Command,
};

mod web;

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    env_logger::Builder::from_default_env()
        .filter_level(args.verbose.log_level_filter())
        .init();

    match args.command {
        Command::Inspect { log } => inspect(&log).into_diagnostic(),
        Command::Record {
            port,
            out,
            remote_control_url,
        } => {
            let mut request =
                CaptureRequest::new(out.unwrap_or_else(config::default_sessions_dir), port);
            request.remote_control_url = remote_control_url;
            run_toplevel(|s| async move {
                s.start(SubsystemBuilder::new("Capture", |subsys| {
                    record(subsys, request)
                }));
            })
            .await
        }
        Command::Play {
            log,
            target,
            offset_ms,
            start,
            interval_ms,
        } => {
            let options = PlayOptions {
                log,
                target,
                offset_ms,
                start,
                interval: Duration::from_millis(interval_ms.max(1)),
            };
            run_toplevel(|s| async move {
                s.start(SubsystemBuilder::new("Replay", |subsys| play(subsys, options)));
            })
            .await
        }
        Command::Serve { http_port } => {
            let web = web::Web::new(http_port, config::default_sessions_dir()).into_diagnostic()?;
            run_toplevel(|s| async move {
                s.start(SubsystemBuilder::new("Webserver", |subsys| web.run(subsys)));
            })
            .await
        }
    }
}

async fn run_toplevel<F, Fut>(subsystems: F) -> Result<()>
where
    F: FnOnce(SubsystemHandle) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    Toplevel::new(subsystems)
        .catch_signals()
        .handle_shutdown_requests(SHUTDOWN_TIMEOUT)
        .await
        .map_err(Into::into)
}

/// Capture until Ctrl-C, reporting progress periodically.
async fn record(subsys: SubsystemHandle, request: CaptureRequest) -> Result<(), CaptureError> {
    let engine = CaptureEngine::default();
    let session = engine.start(request).await?;
    info!("Recording to {}", session.udp_log_path.display());

    let mut interval = tokio::time::interval(STATUS_LOG_INTERVAL);
    interval.tick().await;
    loop {
        tokio::select! { biased;
            _ = subsys.on_shutdown_requested() => break,
            _ = interval.tick() => {
                let status = engine.status();
                info!("{} packets captured", status.packet_count);
                if let Some(last) = status.recent_packets.last() {
                    debug!("last: {}", last.osc.text);
                }
                if let Some(e) = status.last_error {
                    warn!("last error: {}", e);
                }
            }
        }
    }

    let status = engine.stop().await?;
    info!(
        "Session {} closed with {} packets",
        session.session_dir.display(),
        status.packet_count
    );
    Ok(())
}

struct PlayOptions {
    log: PathBuf,
    target: SocketAddrV4,
    offset_ms: f64,
    start: f64,
    interval: Duration,
}

/// Drive the replay engine from the wall clock until the log is exhausted.
async fn play(subsys: SubsystemHandle, options: PlayOptions) -> std::io::Result<()> {
    let events = load_all(&options.log)?;
    let mut engine = ReplayEngine::new(UdpSender::new()?);
    engine.load(events);
    engine.set_target(options.target);
    let index = engine.reset_to_time(logical_time(options.start, options.offset_ms));
    info!(
        "Replaying {} events to {} from index {}",
        engine.total(),
        options.target,
        index
    );

    let began = Instant::now();
    let mut interval = tokio::time::interval(options.interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    while !engine.is_finished() {
        tokio::select! { biased;
            _ = subsys.on_shutdown_requested() => break,
            _ = interval.tick() => {
                let video_time = options.start + began.elapsed().as_secs_f64();
                let status = engine.tick(logical_time(video_time, options.offset_ms));
                if status.sent > 0 {
                    debug!("t={:.3} sent {} ({}/{})", video_time, status.sent, status.sent_index, status.total);
                }
                match status.last_error {
                    Some(e) if e.is_would_block() => {
                        debug!("send buffer full, dropped {} datagram(s)", status.send_errors)
                    }
                    Some(e) => warn!("{} send(s) failed: {}", status.send_errors, e),
                    None => {}
                }
            }
        }
    }

    info!("Replay finished at index {}/{}", engine.position(), engine.total());
    subsys.request_shutdown();
    Ok(())
}

fn inspect(log: &Path) -> std::io::Result<()> {
    let events = load_all(log)?;
    let decoder = OscDecoder::default();

    for (i, event) in events.iter().enumerate() {
        let preview = decoder.decode(&event.payload);
        println!(
            "{:>6} {:>12.6} {:>6}B  {}",
            i + 1,
            event.t,
            event.payload.len(),
            preview.text
        );
    }
    Ok(())
}
