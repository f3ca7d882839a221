use anyhow::{Context, bail};
use clap::{ArgAction, Parser, Subcommand};
use gctrace::config::Config;
use gctrace::error::PlaybackError;
use gctrace::playback::{PlaybackEngine, PlaybackObserver, PlaybackState, ThrottleStrategy};
use gctrace::source::{LogSource, SourceKind};
use gctrace::stats::{StatsMonitor, TraceStatsReport};
use gctrace::trace::{Trace, TraceSet};
use gctrace::worker::TaskQueue;
use parking_lot::Mutex;
use std::io::{self, BufRead};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

pub type Result<T> = anyhow::Result<T>;

#[derive(Parser)]
#[command(name = "gctrace")]
#[command(about = "Replay GC logs into traces and summarize them", long_about = None)]
struct Cli {
    /// TOML configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log more (-v for info, -vv for debug). RUST_LOG takes precedence.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load logs as fast as possible and print per-trace GC statistics.
    Stats {
        #[arg(required = true)]
        logs: Vec<PathBuf>,

        /// Log format (guessed from the path when omitted).
        #[arg(long, value_enum)]
        format: Option<SourceKind>,

        #[arg(long)]
        json: bool,
    },
    /// Replay one log at a controlled pace. Reads pause/resume/stop from stdin.
    Replay {
        log: PathBuf,

        #[arg(long, value_enum)]
        format: Option<SourceKind>,

        /// Real-time speed in percent (100 = as recorded).
        #[arg(long, conflicts_with = "fast")]
        speed: Option<u32>,

        /// Play in fixed-size batches instead of following timestamps.
        #[arg(long)]
        fast: bool,

        #[arg(long, requires = "fast")]
        events_per_tick: Option<usize>,

        #[arg(long, requires = "fast")]
        tick_secs: Option<f64>,

        #[arg(long)]
        json: bool,
    },
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default)).init();
}

/// Prints status lines (when asked to) and remembers why a session failed.
struct ConsoleObserver {
    label: String,
    echo_status: bool,
    failure: Mutex<Option<String>>,
}

impl ConsoleObserver {
    fn new(label: &str, echo_status: bool) -> Arc<Self> {
        Arc::new(Self {
            label: label.to_string(),
            echo_status,
            failure: Mutex::new(None),
        })
    }

    fn failure(&self) -> Option<String> {
        self.failure.lock().clone()
    }
}

impl PlaybackObserver for ConsoleObserver {
    fn state_changed(&self, state: PlaybackState) {
        log::info!("{}: {}", self.label, state);
    }

    fn status(&self, text: &str) {
        if self.echo_status {
            println!("{}: {}", self.label, text);
        } else {
            log::debug!("{}: {}", self.label, text);
        }
    }

    fn failed(&self, error: &PlaybackError) {
        *self.failure.lock() = Some(error.to_string());
    }
}

/// A trace for `path` registered in `set`, with an engine ready to feed it.
fn open_log(
    set: &TraceSet,
    path: &Path,
    format: Option<SourceKind>,
    observer: Arc<ConsoleObserver>,
    slice: Duration,
) -> Result<Arc<PlaybackEngine>> {
    let kind = format.unwrap_or_else(|| SourceKind::detect(path));
    let source = Arc::new(LogSource::new(kind, path));
    let trace: Arc<Trace> = Arc::new(
        source
            .new_trace()
            .with_context(|| format!("cannot prepare trace for {}", path.display()))?,
    );
    let engine = PlaybackEngine::new(trace.clone(), source, observer, slice);
    set.add(trace)?;
    Ok(engine)
}

fn print_reports(reports: &[TraceStatsReport], json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(reports)?);
        return Ok(());
    }
    for report in reports {
        match &report.origin {
            Some(origin) => println!("== {} ({}) ==", report.trace, origin),
            None => println!("== {} ==", report.trace),
        }
        println!(
            "{:<20} {:>7} {:>7} {:>11} {:>7} {:>9} {:>9} {:>9} {:>9}",
            "activity", "count", "%", "total (s)", "%", "min", "max", "mean", "sigma"
        );
        for a in &report.activities {
            println!(
                "{:<20} {:>7} {:>6.2}% {:>11.3} {:>6.2}% {:>9.4} {:>9.4} {:>9.4} {:>9.4}",
                a.name,
                a.count,
                a.count_percent,
                a.total_sec,
                a.total_percent,
                a.min_sec,
                a.max_sec,
                a.mean_sec,
                a.sigma_sec
            );
        }
        println!(
            "GC overhead: {:.2}% of {:.2} secs",
            report.overhead_percent, report.last_timestamp_sec
        );
        println!();
    }
    Ok(())
}

fn run_stats(config: &Config, logs: &[PathBuf], format: Option<SourceKind>, json: bool) -> Result<()> {
    let queue = Arc::new(TaskQueue::start("gctrace-stats")?);
    let set = TraceSet::new();
    let monitor = StatsMonitor::new(queue.clone(), config.stats.refresh_interval());
    monitor.attach(&set);

    let mut sessions = Vec::new();
    for path in logs {
        let observer = ConsoleObserver::new(&path.display().to_string(), false);
        let engine = open_log(&set, path, format, observer.clone(), config.playback.slice())?;
        engine.play(ThrottleStrategy::Unthrottled)?;
        sessions.push((engine, observer));
    }

    let mut failed = 0;
    for (engine, observer) in &sessions {
        engine.wait_for_stop();
        if let Some(error) = observer.failure() {
            failed += 1;
            eprintln!(
                "warning: {} loaded partially ({} events): {}",
                engine.trace().name(),
                engine.trace().all_len(),
                error
            );
        }
    }

    monitor.refresh_now();
    print_reports(&monitor.snapshot(), json)?;
    monitor.detach(&set);
    queue.shutdown();

    if failed > 0 {
        bail!("{} of {} logs could not be read completely", failed, logs.len());
    }
    Ok(())
}

fn spawn_command_reader(engine: Arc<PlaybackEngine>) -> Result<()> {
    thread::Builder::new()
        .name("gctrace-commands".to_string())
        .spawn(move || {
            for line in io::stdin().lock().lines() {
                let Ok(line) = line else {
                    break;
                };
                let command = line.trim();
                let result = match command {
                    "" => continue,
                    "pause" => engine.pause(),
                    "resume" => engine.resume(),
                    "stop" => engine.stop(),
                    "state" => {
                        println!("{}", engine.state());
                        continue;
                    }
                    other => {
                        eprintln!("unknown command {:?} (pause, resume, stop, state)", other);
                        continue;
                    }
                };
                if let Err(e) = result {
                    eprintln!("{}", e);
                }
                if command == "stop" {
                    break;
                }
            }
        })
        .context("cannot start the command reader")?;
    Ok(())
}

struct ReplayArgs {
    log: PathBuf,
    format: Option<SourceKind>,
    speed: Option<u32>,
    fast: bool,
    events_per_tick: Option<usize>,
    tick_secs: Option<f64>,
    json: bool,
}

impl ReplayArgs {
    fn strategy(&self, config: &Config) -> Result<ThrottleStrategy> {
        let playback = &config.playback;
        if self.fast {
            let tick_secs = self.tick_secs.unwrap_or(playback.tick_secs);
            let tick = Duration::try_from_secs_f64(tick_secs)
                .with_context(|| format!("bad tick length {}", tick_secs))?;
            Ok(ThrottleStrategy::Batch {
                events_per_tick: self.events_per_tick.unwrap_or(playback.events_per_tick),
                tick,
            })
        } else {
            Ok(ThrottleStrategy::RealTime {
                speed_percent: self.speed.unwrap_or(playback.speed_percent),
            })
        }
    }
}

fn run_replay(config: &Config, args: ReplayArgs) -> Result<()> {
    let strategy = args.strategy(config)?;
    let queue = Arc::new(TaskQueue::start("gctrace-stats")?);
    let set = TraceSet::new();
    let monitor = StatsMonitor::new(queue.clone(), config.stats.refresh_interval());
    monitor.attach(&set);

    let observer = ConsoleObserver::new(&args.log.display().to_string(), true);
    let engine = open_log(
        &set,
        &args.log,
        args.format,
        observer.clone(),
        config.playback.slice(),
    )?;
    engine.play(strategy)?;
    spawn_command_reader(engine.clone())?;
    engine.wait_for_stop();

    monitor.refresh_now();
    print_reports(&monitor.snapshot(), args.json)?;
    monitor.detach(&set);
    queue.shutdown();

    if let Some(error) = observer.failure() {
        bail!("replay of {} failed: {}", args.log.display(), error);
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    log::debug!("{:?}", config);

    match cli.cmd {
        Commands::Stats { logs, format, json } => run_stats(&config, &logs, format, json)?,
        Commands::Replay {
            log,
            format,
            speed,
            fast,
            events_per_tick,
            tick_secs,
            json,
        } => run_replay(
            &config,
            ReplayArgs {
                log,
                format,
                speed,
                fast,
                events_per_tick,
                tick_secs,
                json,
            },
        )?,
    }

    Ok(())
}
