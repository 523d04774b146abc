use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use clap::{Parser, ValueEnum};
use crossbeam_channel::Sender;
use log::LevelFilter;

use fiducial_slam::{run, FiducialSlam, JsonLinesSink, SightingBatch, SlamConfig, WeightingPolicy};

const INPUT_QUEUE: usize = 64;

#[derive(Parser, Debug)]
#[command(
    name = "fiducial-slam",
    about = "Build or localize against a fiducial landmark map from JSON-line sighting batches"
)]
struct Cli {
    /// JSON session config; flags below override it.
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,
    /// Map file to load at startup and save on exit.
    #[arg(long, value_name = "FILE")]
    map: Option<PathBuf>,
    /// Sighting batches, one JSON object per line; `-` reads stdin.
    #[arg(long, value_name = "FILE", default_value = "-")]
    input: String,
    /// Localize only: never change or save the map.
    #[arg(long)]
    read_only: bool,
    /// Per-fiducial diagnostics at info level.
    #[arg(long)]
    verbose: bool,
    #[arg(long, value_enum)]
    weighting: Option<WeightingArg>,
    /// Keep only the yaw of every observation.
    #[arg(long)]
    flatten: bool,
    #[arg(long, value_name = "LEVEL", default_value = "info")]
    log_level: LevelFilter,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum WeightingArg {
    Area,
    Error,
}

impl From<WeightingArg> for WeightingPolicy {
    fn from(arg: WeightingArg) -> Self {
        match arg {
            WeightingArg::Area => WeightingPolicy::Area,
            WeightingArg::Error => WeightingPolicy::Error,
        }
    }
}

impl Cli {
    fn session_config(&self) -> Result<SlamConfig, Box<dyn std::error::Error>> {
        let mut config = match &self.config {
            Some(path) => SlamConfig::load_json(path)?,
            None => SlamConfig::default(),
        };
        if let Some(map) = &self.map {
            config.map_path = Some(map.clone());
        }
        if let Some(weighting) = self.weighting {
            config.observation.weighting = weighting.into();
        }
        config.read_only |= self.read_only;
        config.verbose |= self.verbose;
        config.observation.flatten |= self.flatten;
        config.validate()?;
        Ok(config)
    }
}

fn open_input(input: &str) -> io::Result<Box<dyn BufRead + Send>> {
    if input == "-" {
        Ok(Box::new(BufReader::new(io::stdin())))
    } else {
        Ok(Box::new(BufReader::new(File::open(input)?)))
    }
}

/// Parse batches until EOF; dropping `tx` tells the run loop the input ended.
fn read_batches(reader: Box<dyn BufRead + Send>, tx: Sender<SightingBatch>) {
    for (n, line) in reader.lines().enumerate() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                log::error!("input read failed: {e}");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<SightingBatch>(&line) {
            Ok(batch) => {
                if tx.send(batch).is_err() {
                    break;
                }
            }
            Err(e) => log::warn!("line {}: skipping malformed batch: {e}", n + 1),
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    #[cfg(feature = "tracing")]
    if !fiducial_slam::core::init_tracing(false, cli.log_level) {
        eprintln!("tracing subscriber already installed");
    }
    #[cfg(not(feature = "tracing"))]
    fiducial_slam::core::init_with_level(cli.log_level)?;

    let config = cli.session_config()?;
    let engine = FiducialSlam::open(config)?;

    let running = Arc::new(AtomicBool::new(true));
    {
        let running = running.clone();
        ctrlc::set_handler(move || running.store(false, Ordering::SeqCst))?;
    }

    let reader = open_input(&cli.input)?;
    let (tx, rx) = crossbeam_channel::bounded(INPUT_QUEUE);
    thread::spawn(move || read_batches(reader, tx));

    let mut sink = JsonLinesSink::new(io::stdout());
    let report = run(engine, rx, &running, &mut sink);
    log::info!(
        "processed {} batches, {} landmarks",
        report.batches,
        report.landmarks
    );
    match report.save {
        Ok(_) | Err(fiducial_slam::EngineError::NoMapPath) => Ok(()),
        Err(e) => Err(e.into()),
    }
}
