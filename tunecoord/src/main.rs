//! tunecoord: interactive front end for the tuning coordinator.
//!
//! Runs the coordinator against the in-process simulated engine and reads
//! commands from stdin.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use log::{error, info, warn};
use tokio::io::{AsyncBufReadExt, BufReader};

use tunecoord::catalog::Catalog;
use tunecoord::config::{load_config, ConfigFile};
use tunecoord::directory::StaticDirectory;
use tunecoord::engine::SimulatedOptions;
use tunecoord::logging;
use tunecoord::session::{event_channel, EventReceiver};
use tunecoord::{Coordinator, LiveHandle, OnChange, RecordingHandle, SignalBus, SimulatedEngine};
use tunecoord_protocol::TrackType;

/// tunecoord - DVB tune, timeshift and recording coordinator
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short = 'f', long)]
    config: Option<PathBuf>,

    /// Path to the recording catalog database
    #[arg(short, long, default_value = "tunecoord.db")]
    catalog: PathBuf,

    /// Recorders reported by the simulated engine
    #[arg(short, long, default_value = "2")]
    recorders: u32,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Directory where log files are stored
    #[arg(long, default_value = "logs")]
    log_dir: PathBuf,

    /// Number of days to keep log files
    #[arg(long, default_value = "7")]
    log_retention_days: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Explicit path > auto-detect > default
    let config_path = args.config.clone().or_else(|| {
        let default_path = PathBuf::from("tunecoord.toml");
        default_path.exists().then_some(default_path)
    });
    let file_config = match &config_path {
        Some(path) => match load_config(path) {
            Ok(c) => {
                eprintln!("Loaded config from: {}", path.display());
                c
            }
            Err(e) => {
                eprintln!("Failed to load config file: {}", e);
                return Err(e.into());
            }
        },
        None => ConfigFile::default(),
    };

    // Command line takes precedence
    let log_dir = if args.log_dir.to_string_lossy() != "logs" {
        args.log_dir.clone()
    } else {
        PathBuf::from(file_config.logging.log_dir.as_deref().unwrap_or("logs"))
    };
    let log_retention_days = if args.log_retention_days != 7 {
        args.log_retention_days
    } else {
        file_config.logging.retention_days.unwrap_or(7)
    };
    logging::init_logging(
        &log_dir,
        log_retention_days,
        args.verbose,
        file_config.logging.level.as_deref(),
    )?;

    let catalog_path = if args.catalog.to_string_lossy() != "tunecoord.db" {
        args.catalog.clone()
    } else {
        file_config
            .catalog
            .path
            .as_deref()
            .map(PathBuf::from)
            .unwrap_or_else(|| args.catalog.clone())
    };
    info!("Opening catalog: {:?}", catalog_path);
    let catalog = match Catalog::open(&catalog_path) {
        Ok(catalog) => catalog.into_handle(),
        Err(e) => {
            error!("Failed to open catalog: {}", e);
            return Err(e.into());
        }
    };

    let signals = SignalBus::new(256);
    let engine = Arc::new(SimulatedEngine::new(
        SimulatedOptions {
            recorders: args.recorders,
            ..Default::default()
        },
        signals.clone(),
    ));
    let directory = Arc::new(StaticDirectory::new(
        file_config.channels,
        file_config.programs,
    ));
    if directory.channels().is_empty() {
        warn!("No channels configured; add [[channels]] to the config file");
    }

    let coordinator = Coordinator::new(
        engine,
        signals,
        directory,
        catalog,
        file_config.coordinator,
        file_config.compliance,
        file_config.parental,
    );
    let capacity = coordinator.discover_capacity().await;

    info!("tunecoord starting...");
    info!("  Paths: {}", capacity);
    info!(
        "  Recorder limit: {}",
        coordinator.ledger().effective_recorder_limit()
    );
    info!("  Catalog: {:?}", catalog_path);

    let rotate_dir = log_dir.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(24 * 60 * 60));
        interval.tick().await;
        loop {
            interval.tick().await;
            if let Err(e) = logging::rotate_logs(&rotate_dir, log_retention_days) {
                warn!("Log rotation failed: {}", e);
            }
        }
    });

    let mut console = Console {
        coordinator,
        live: None,
        recordings: HashMap::new(),
    };
    console.run().await;
    console.shutdown().await;
    Ok(())
}

/// Log every event a session reports.
fn spawn_event_logger(tag: String, mut rx: EventReceiver) {
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match event.compat_name() {
                Some(name) => info!("{} event {} {:?}", tag, name, event),
                None => info!("{} event {:?}", tag, event),
            }
        }
    });
}

struct Console {
    coordinator: Coordinator,
    live: Option<LiveHandle>,
    recordings: HashMap<u64, RecordingHandle>,
}

impl Console {
    async fn run(&mut self) {
        println!("Commands: tune <ref> | pause | resume | seek <ms> | speed <x> | pos");
        println!("          unblock <rating> | track audio|subtitle <n|off> | timeshift on|off");
        println!("          record <ref> | start <id> [program-ref] | stop <id> | release <id>");
        println!("          status | quit");

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(e) => {
                    error!("Failed to read stdin: {}", e);
                    break;
                }
            };
            let words: Vec<&str> = line.split_whitespace().collect();
            match words.as_slice() {
                [] => {}
                ["quit"] | ["exit"] => break,
                words => self.command(words).await,
            }
        }
    }

    async fn live(&mut self) -> LiveHandle {
        if let Some(live) = self.live.as_ref().filter(|l| !l.is_closed()) {
            return live.clone();
        }
        let (tx, rx) = event_channel();
        let live = self.coordinator.open_live_session(tx).await;
        spawn_event_logger(format!("[Live {}]", live.id()), rx);
        self.live = Some(live.clone());
        live
    }

    fn recording(&self, id: &str) -> Option<&RecordingHandle> {
        let handle = id.parse().ok().and_then(|id: u64| self.recordings.get(&id));
        if handle.is_none() {
            println!("no recording session {}", id);
        }
        handle
    }

    async fn command(&mut self, words: &[&str]) {
        match words {
            ["tune", target] => {
                let live = self.live().await;
                if !live.tune(target).await {
                    println!("tune rejected: {}", target);
                }
            }
            ["pause"] => self.live().await.timeshift_pause().await,
            ["resume"] => self.live().await.timeshift_resume().await,
            ["seek", position] => match position.parse() {
                Ok(ms) => self.live().await.timeshift_seek_to(ms).await,
                Err(_) => println!("bad position: {}", position),
            },
            ["speed", speed] => match speed.parse() {
                Ok(speed) => self.live().await.timeshift_set_speed(speed).await,
                Err(_) => println!("bad speed: {}", speed),
            },
            ["pos"] => {
                let live = self.live().await;
                let start = live.get_start_position().await;
                let current = live.get_current_position().await;
                println!("start {:?} current {:?}", start, current);
            }
            ["unblock", rating] => self.live().await.unblock(rating).await,
            ["track", kind, index] => {
                let track_type = match *kind {
                    "audio" => TrackType::Audio,
                    "subtitle" => TrackType::Subtitle,
                    other => return println!("unknown track type: {}", other),
                };
                let index = match *index {
                    "off" => None,
                    n => match n.parse() {
                        Ok(n) => Some(n),
                        Err(_) => return println!("bad track index: {}", n),
                    },
                };
                let ok = self.live().await.select_track(track_type, index).await;
                println!("track selection {}", if ok { "applied" } else { "failed" });
            }
            ["timeshift", value @ ("on" | "off")] => {
                self.live().await;
                let applied = self.coordinator.timeshift_listener().on_change(*value == "on");
                println!("timeshift preference {}", if applied { "sent" } else { "ignored" });
            }
            ["record", target] => {
                let (tx, rx) = event_channel();
                let rec = self.coordinator.open_recording_session(tx);
                spawn_event_logger(format!("[Recording {}]", rec.id()), rx);
                match rec.tune(target).await {
                    Ok(()) => {
                        println!("recording session {}", rec.id());
                        self.recordings.insert(rec.id(), rec);
                    }
                    Err(e) => {
                        println!("record rejected: {}", e);
                        rec.release().await;
                    }
                }
            }
            ["start", id, rest @ ..] => {
                if let Some(rec) = self.recording(id) {
                    if let Err(e) = rec.start_recording(rest.first().copied()).await {
                        println!("start rejected: {}", e);
                    }
                }
            }
            ["stop", id] => {
                if let Some(rec) = self.recording(id) {
                    if let Err(e) = rec.stop_recording().await {
                        println!("stop rejected: {}", e);
                    }
                }
            }
            ["release", id] => {
                if let Some(rec) = self.recording(id).cloned() {
                    rec.release().await;
                    self.recordings.remove(&rec.id());
                }
            }
            ["status"] => self.status().await,
            _ => println!("unknown command: {}", words.join(" ")),
        }
    }

    async fn status(&self) {
        println!("{:?}", self.coordinator.ledger().snapshot());
        if let Some(live) = &self.live {
            println!("live {:?}", live.status().await);
        }
        for (id, rec) in &self.recordings {
            println!("recording {} {:?}", id, rec.status().await);
        }
    }

    async fn shutdown(&mut self) {
        for (_, rec) in self.recordings.drain() {
            rec.release().await;
        }
        self.coordinator.shutdown().await;
    }
}
