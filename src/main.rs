//! NadiIO - record an E4 wristband through its streaming server
//!
//! Usage:
//!   nadi-io --config nadi.toml
//!   nadi-io --device A02DE7 --subject P07
//!   nadi-io --list-devices
//!
//! Set RUST_LOG=debug to see every control command and response.

use clap::Parser;
use nadi_io::config::Config;
use nadi_io::error::{Error, Result};
use nadi_io::session::{Session, SessionEvent, SessionState};
use nadi_io::sink::{SinkRegistry, open_csv_sinks};
use nadi_io::transport::TcpConnector;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// How often the main loop wakes up to check for shutdown
const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// How often running totals are logged while streaming
const STATS_INTERVAL: Duration = Duration::from_secs(10);

/// Capture client for the E4 streaming server
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path (defaults apply when omitted)
    #[arg(short, long)]
    config: Option<String>,

    /// Device id to connect (overrides [device] id)
    #[arg(short, long)]
    device: Option<String>,

    /// Session folder name (overrides [output] subject_id)
    #[arg(short, long)]
    subject: Option<String>,

    /// Print the devices the server sees and exit
    #[arg(long)]
    list_devices: bool,
}

fn main() {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => match Config::load(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("{}", e);
                std::process::exit(2);
            }
        },
        None => Config::default(),
    };
    if let Some(device) = &args.device {
        config.device.id = Some(device.clone());
    }
    if let Some(subject) = &args.subject {
        config.output.subject_id = subject.clone();
    }

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(config.logging.level.as_str()),
    )
    .init();

    log::info!("NadiIO v{} starting...", env!("CARGO_PKG_VERSION"));
    let connector = Arc::new(TcpConnector::new(
        config.address(),
        config.server.connect_timeout(),
    ));
    log::info!("Server: {}", connector.address());
    let mut session = Session::new(config.protocol.clone(), connector, SinkRegistry::new());

    let result = if args.list_devices {
        list_devices(&mut session)
    } else {
        capture(&mut session, &config)
    };

    if let Err(e) = session.disconnect() {
        log::warn!("Disconnect failed: {}", e);
    }

    match result {
        Ok(()) => log::info!("NadiIO stopped"),
        Err(e) => {
            log::error!("{}", e);
            std::process::exit(1);
        }
    }
}

fn list_devices(session: &mut Session) -> Result<()> {
    session.connect_server()?;
    let devices = session.list_devices()?;
    if devices.is_empty() {
        println!("No devices available");
    }
    for device in devices {
        println!("{}", device);
    }
    Ok(())
}

fn capture(session: &mut Session, config: &Config) -> Result<()> {
    let subscriptions = config.channels.subscriptions();

    let running = Arc::new(AtomicBool::new(true));
    let r = Arc::clone(&running);
    let cancel = session.cancel_token();
    ctrlc::set_handler(move || {
        log::info!("Received shutdown signal");
        r.store(false, Ordering::Relaxed);
        cancel.cancel();
    })
    .map_err(|e| Error::Other(format!("Error setting Ctrl-C handler: {}", e)))?;

    session.connect_server()?;

    let device_id = match &config.device.id {
        Some(id) => id.clone(),
        None => session
            .list_devices()?
            .into_iter()
            .next()
            .map(|device| device.id)
            .ok_or_else(|| Error::Other("server reports no devices".into()))?,
    };

    session.connect_device(&device_id)?;
    let report = session.configure_subscriptions(subscriptions.clone())?;
    if !report.is_complete() {
        for (stream, reason) in &report.rejected {
            log::warn!("Not recording {}: {}", stream, reason);
        }
    }

    let sinks = open_csv_sinks(&config.output.directory, &config.output.subject_id, &subscriptions)?;
    session.set_sinks(sinks)?;

    if !running.load(Ordering::Relaxed) {
        return Ok(());
    }
    session.start_streaming()?;
    println!("Recording {} (Ctrl-C to stop)", device_id);

    let events = session.events();
    let mut last_stats = Instant::now();
    while running.load(Ordering::Relaxed) {
        if let Ok(SessionEvent::StateChanged { from, to, reason }) = events.recv_timeout(POLL_INTERVAL)
        {
            match reason {
                Some(reason) => println!("{} -> {} ({})", from, to, reason),
                None => println!("{} -> {}", from, to),
            }
        }

        if session.current_state() == SessionState::Faulted && session.dispatcher_finished() {
            log::error!(
                "Stream could not be recovered: {}",
                session.diagnostic().unwrap_or_default()
            );
            break;
        }

        if last_stats.elapsed() >= STATS_INTERVAL {
            let stats = session.stats();
            log::info!(
                "Samples: {}, malformed: {}, reconnects: {}",
                stats.samples_written,
                stats.malformed_lines,
                stats.reconnects
            );
            last_stats = Instant::now();
        }
    }

    session.stop_streaming()?;

    let stats = session.stats();
    println!(
        "Recorded {} samples ({} malformed lines dropped, {} reconnects)",
        stats.samples_written, stats.malformed_lines, stats.reconnects
    );
    Ok(())
}
