//! NextGCore MME daemon

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::mpsc;

use nextgcore_mmed::config::MmeConfig;
use nextgcore_mmed::context::MmeContext;
use nextgcore_mmed::gtp_path::{self, GtpPath, S11Receipt};
use nextgcore_mmed::mme_path::LogPathHandler;
use nextgcore_mmed::s11_build::TlvS11Builder;
use nextgcore_mmed::sm::MmeEvent;

/// Timer tick driving retransmissions and the shutdown check
const TIMER_TICK: Duration = Duration::from_millis(100);

/// NextGCore MME - Mobility Management Entity
#[derive(Parser, Debug)]
#[command(name = "nextgcore-mmed")]
#[command(author = "NextGCore")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "EPC Mobility Management Entity")]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "/etc/nextgcore/mme.yaml")]
    config: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Disable color output
    #[arg(long)]
    no_color: bool,
}

/// MME application state
pub struct MmeApp {
    running: Arc<AtomicBool>,
    config: MmeConfig,
}

impl MmeApp {
    pub fn new(config: MmeConfig) -> Self {
        Self {
            running: Arc::new(AtomicBool::new(true)),
            config,
        }
    }

    /// Open the S11 path and run the event loop until stopped.
    pub async fn run(&self) -> Result<()> {
        let (tx, mut rx) = mpsc::channel::<MmeEvent>(self.config.max.event_queue);
        let server = gtp_path::gtp_open(&self.config, tx)
            .await
            .context("GTP path initialization failed")?;
        log::debug!("GTP path initialized with {} SGW(s)", server.sgws.len());

        let mut path = GtpPath::new(
            MmeContext::new(Arc::clone(&server.sgws)),
            self.config.xact_config(),
            Box::new(server.sockets.clone()),
            Box::new(TlvS11Builder),
            Box::new(LogPathHandler),
        );

        log::info!("MME running...");
        let mut tick = tokio::time::interval(TIMER_TICK);
        while self.running.load(Ordering::SeqCst) {
            tokio::select! {
                Some(event) = rx.recv() => dispatch(&mut path, event),
                _ = tick.tick() => {
                    path.poll_timers(Instant::now());
                }
            }
        }

        gtp_path::gtp_close(server);
        log::info!("MME main loop exited");
        Ok(())
    }

    /// Signal the application to stop
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Get the running flag for signal handlers
    pub fn running_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }
}

fn dispatch(path: &mut GtpPath, event: MmeEvent) {
    log::trace!("{} from SGW [{}]", event.name(), event.sgw);
    match path.receive_s11(event) {
        Ok(S11Receipt::Response { header, data, .. }) => {
            log::debug!("Message-Type[{}] completes {:?}", header.message_type, data)
        }
        Ok(S11Receipt::Request { xact, header, mme_ue, .. }) => log::info!(
            "Message-Type[{}] from SGW for MME UE [{:?}] left unanswered [xact:{}]",
            header.message_type,
            mme_ue,
            xact
        ),
        Ok(S11Receipt::Duplicate { .. }) | Ok(S11Receipt::Discarded) => {}
        Err(e) => log::error!("S11 message dropped: {}", e),
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = match args.log_level.to_lowercase().as_str() {
        "trace" => log::LevelFilter::Trace,
        "debug" => log::LevelFilter::Debug,
        "info" => log::LevelFilter::Info,
        "warn" => log::LevelFilter::Warn,
        "error" => log::LevelFilter::Error,
        _ => log::LevelFilter::Info,
    };

    env_logger::Builder::new()
        .filter_level(log_level)
        .format_timestamp_millis()
        .write_style(if args.no_color {
            env_logger::WriteStyle::Never
        } else {
            env_logger::WriteStyle::Auto
        })
        .init();

    log::info!("NextGCore MME v{}", env!("CARGO_PKG_VERSION"));
    log::info!("Configuration: {}", args.config);

    let config = MmeConfig::load(&args.config)?;
    let app = MmeApp::new(config);

    let running = app.running_flag();
    ctrlc::set_handler(move || {
        log::info!("Received shutdown signal");
        running.store(false, Ordering::SeqCst);
    })?;

    app.run().await?;

    log::info!("NextGCore MME terminated");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mme_app_stop() {
        let app = MmeApp::new(MmeConfig::default());
        let flag = app.running_flag();
        assert!(flag.load(Ordering::SeqCst));
        app.stop();
        assert!(!flag.load(Ordering::SeqCst));
    }

    #[test]
    fn test_args_defaults() {
        let args = Args::parse_from(["nextgcore-mmed"]);
        assert_eq!(args.config, "/etc/nextgcore/mme.yaml");
        assert_eq!(args.log_level, "info");
        assert!(!args.no_color);
    }
}
