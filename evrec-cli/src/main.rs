//! Event Recorder CLI Application
//!
//! Records one broadcast event from a service, following it through delays,
//! pauses, relays and moves. It uses the evrec-core library and adds:
//! - Channel directory lookup (channels.conf)
//! - Optional TOML configuration
//! - A JSON-lines upstream feed reader
//! - A file sink behind the capture gate

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::Parser;
use evrec_core::config::MAX_MINUTES;
use evrec_core::{
    parse_service_id, ChannelResolver, Runner, SystemClock, Tracker, TrackerConfig,
};
use std::path::PathBuf;
use std::sync::mpsc;

mod channels;
mod config;
mod feed;
mod signals;
mod sink;

use config::AppConfig;
use feed::FeedSource;
use sink::{CaptureSource, SinkGate};

/// Event Recorder - Record a broadcast event by following its EIT
#[derive(Parser, Debug)]
#[command(name = "evrec")]
#[command(about = "Record one broadcast event, following relays and moves", long_about = None)]
#[command(version)]
struct Args {
    /// Channel name as listed in the channel directory
    #[arg(short, long, value_name = "NAME")]
    channel: Option<String>,

    /// Service id (decimal, 0x hex or 0o octal)
    #[arg(short, long, value_name = "ID", value_parser = parse_id)]
    serviceid: Option<u16>,

    /// Event id to record (default: the event on air now)
    #[arg(short, long, value_name = "ID", value_parser = parse_id)]
    eventid: Option<u16>,

    /// Minutes to wait for the event to appear (default: 60 with -e, else 5;
    /// 0 waits 30)
    #[arg(short, long, value_name = "MINUTES",
          value_parser = clap::value_parser!(u64).range(0..=MAX_MINUTES))]
    wait: Option<u64>,

    /// Maximum recording length in minutes (0: whole event)
    #[arg(short, long, value_name = "MINUTES",
          value_parser = clap::value_parser!(u64).range(0..=MAX_MINUTES))]
    length: Option<u64>,

    /// Output file for the recording
    #[arg(short, long, value_name = "FILE")]
    output: PathBuf,

    /// DVB adapter number
    #[arg(short, long, value_name = "N")]
    adapter: Option<u32>,

    /// DVB frontend number
    #[arg(short, long, value_name = "N")]
    frontend: Option<u32>,

    /// Channel directory file (channels.conf)
    #[arg(long, value_name = "FILE")]
    conf: Option<PathBuf>,

    /// Record only the selected program
    #[arg(long)]
    single_program: bool,

    /// Upstream events as JSON lines ("-" for stdin)
    #[arg(long, value_name = "FILE", default_value = "-")]
    feed: PathBuf,

    /// Path to configuration file (evrec.toml)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Verbosity level (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long)]
    quiet: bool,
}

fn parse_id(text: &str) -> std::result::Result<u16, String> {
    parse_service_id(text).ok_or_else(|| format!("{} is not a valid id (0..=0xFFFF)", text))
}

fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(args.verbose, args.quiet);

    log::info!("Event Recorder v{}", env!("CARGO_PKG_VERSION"));
    log::debug!("Using tracker library v{}", evrec_core::VERSION);

    if args.channel.is_none() && args.serviceid.is_none() {
        bail!("at least -c or -s option must be specified.");
    }

    let app_config = match &args.config {
        Some(path) => config::load_config(path)?,
        None => AppConfig::default(),
    };

    let tracker_config = tracker_config(&args, &app_config);
    tracker_config
        .validate()
        .context("Invalid tracker settings")?;

    let conf_path = channels::directory_path(
        args.conf.as_deref().or(app_config.channels.conf.as_deref()),
        std::env::var(channels::CHANNELS_CONF_ENV).ok(),
    )?;
    let directory = channels::load_directory(&conf_path)?;

    let channel = directory
        .lookup(args.channel.as_deref(), args.serviceid)
        .with_context(|| {
            format!(
                "(channel:{}, service_id:{}) is not a valid combination.",
                args.channel.as_deref().unwrap_or("-"),
                args.serviceid.map_or_else(|| "-".to_string(), |s| s.to_string())
            )
        })?;

    let source = CaptureSource {
        adapter: args.adapter.unwrap_or(app_config.capture.adapter),
        frontend: args.frontend.unwrap_or(app_config.capture.frontend),
        channel: channel.name.clone(),
        service_id: channel.service_id,
        single_program: args.single_program || app_config.capture.single_program,
    };
    log::info!("Capture source: {}", source.uri());

    let gate = SinkGate::create(&args.output, source)?;

    let tracker = Tracker::new(
        tracker_config,
        channel.service_id,
        args.eventid,
        gate,
        directory,
    );

    let (tx, rx) = mpsc::channel();
    signals::forward_shutdown(tx.clone()).context("Failed to install the signal handler")?;
    let _reader = feed::spawn(FeedSource::from_arg(&args.feed), tx);

    match args.eventid {
        Some(eid) => log::info!("Waiting for EIT of event:{}...", eid),
        None => log::info!("Waiting for EIT..."),
    }

    let started = Utc::now();
    let (reason, tracker) = Runner::new(tracker, SystemClock)
        .run(rx)
        .context("Recording failed")?;

    log::info!(
        "Finished: {} ({} bytes from {} in {} s)",
        reason,
        tracker.gate().bytes_written(),
        tracker.gate().source().uri(),
        (Utc::now() - started).num_seconds()
    );

    Ok(())
}

/// File values first, then command-line overrides
fn tracker_config(args: &Args, app_config: &AppConfig) -> TrackerConfig {
    let default_wait = if args.eventid.is_some() { 60 } else { 5 };
    let wait = args
        .wait
        .or(app_config.tracker.selection_wait_minutes)
        .unwrap_or(default_wait);

    let mut config = app_config.tracker.clone().with_selection_wait(wait);
    if let Some(length) = args.length {
        config = config.with_record_length(length);
    }
    config
}

fn init_logging(verbose: u8, quiet: bool) {
    use env_logger::Builder;
    use log::LevelFilter;
    use std::io::Write;

    let level = if quiet {
        LevelFilter::Error
    } else {
        match verbose {
            0 => LevelFilter::Info,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    };

    Builder::new()
        .filter_level(level)
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {}] {}",
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(extra: &[&str]) -> Args {
        let mut argv = vec!["evrec", "-o", "out.ts"];
        argv.extend_from_slice(extra);
        Args::parse_from(argv)
    }

    #[test]
    fn test_wait_defaults_depend_on_event_id() {
        let config = tracker_config(&args(&["-s", "1024"]), &AppConfig::default());
        assert_eq!(config.selection_wait_minutes, Some(5));

        let config = tracker_config(&args(&["-s", "1024", "-e", "0x10"]), &AppConfig::default());
        assert_eq!(config.selection_wait_minutes, Some(60));
    }

    #[test]
    fn test_command_line_overrides_file() {
        let mut file = AppConfig::default();
        file.tracker.selection_wait_minutes = Some(20);
        file.tracker.record_length_minutes = Some(90);

        let config = tracker_config(&args(&["-c", "NHK-G"]), &file);
        assert_eq!(config.selection_wait_minutes, Some(20));
        assert_eq!(config.record_length_minutes, Some(90));

        let config = tracker_config(&args(&["-c", "NHK-G", "-w", "2", "-l", "30"]), &file);
        assert_eq!(config.selection_wait_minutes, Some(2));
        assert_eq!(config.record_length_minutes, Some(30));
    }

    #[test]
    fn test_id_parsing() {
        assert_eq!(args(&["-s", "0x400"]).serviceid, Some(0x400));
        assert!(Args::try_parse_from(["evrec", "-o", "x", "-e", "70000"]).is_err());
        assert!(Args::try_parse_from(["evrec", "-o", "x", "-w", "200000000000"]).is_err());
        assert!(Args::try_parse_from(["evrec", "-o", "x", "-l", "10081"]).is_err());
        assert_eq!(args(&["-w", "0"]).wait, Some(0));
        assert_eq!(args(&[]).feed, PathBuf::from("-"));
    }

    #[test]
    fn test_zero_wait_falls_back_to_thirty_minutes() {
        let config = tracker_config(&args(&["-s", "1024", "-w", "0"]), &AppConfig::default());
        assert_eq!(config.selection_wait_minutes, Some(30));
        assert!(config.validate().is_ok());
    }
}
