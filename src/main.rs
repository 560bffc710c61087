use std::{
    io::{self, Write},
    path::PathBuf,
    rc::Rc,
    time::{Duration, SystemTime},
};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Local};
use clap::{Parser, Subcommand};
use clap_verbosity_flag::Verbosity;
use colored::Colorize;
use log::{debug, info, warn};
use prettytable::{color, format, Attr, Cell, Row, Table};

use restclock::{
    config::{self, Config},
    hooks::Hook,
    Beat, Callbacks, Clock, CountdownEngine, DurationExt, EngineState, FileStorage,
    LifecycleEvent, LogNotifier, Notifier, RecoveredTimer, RecoveryStore, Storage, SystemClock,
    SystemdNotifier, Ticker, TimerRecordStore,
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
    /// Config file to use. [default: ${XDG_CONFIG_DIR}/restclock/config.toml]
    #[arg(short, long)]
    config: Option<PathBuf>,
    #[command(flatten)]
    verbose: Verbosity,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Start a timer
    Start {
        /// Length of the timer, like 90s or 2m30s [default: from config, by category]
        #[arg(short, long, value_parser = Duration::from_human)]
        duration: Option<Duration>,
        /// What the timer is for: workout, set-rest, exercise-rest, or anything else
        #[arg(short = 't', long = "type", default_value = "set-rest")]
        category: String,
        /// Key to store the timer under [default: generated]
        #[arg(short, long)]
        key: Option<String>,
        /// Show a progress bar and don't exit until the timer is over
        #[arg(short, long, default_value_t = false)]
        wait: bool,
    },
    /// List running timers
    Status {
        /// Print each timer in a custom format
        ///
        /// Recognizes the following tokens:
        ///
        /// %k - key
        ///
        /// %t - type
        ///
        /// %r - remaining time, in mm:ss format (or hh:mm:ss if longer than an hour)
        ///
        /// %R - remaining time in seconds
        ///
        /// %E - elapsed time in seconds
        ///
        /// %s - start time in RFC 3339 format
        ///
        /// %e - end time in RFC 3339 format
        #[arg(short, long)]
        format: Option<String>,
    },
    /// Follow a running timer until it is over
    Watch {
        /// Key of the timer to follow
        key: String,
    },
    /// Stop a running timer
    Stop {
        /// Key of the timer to stop
        key: String,
    },
    /// Stop every running timer
    Clear,
    /// Delete all state and configuration files
    Purge,
}

type Store = RecoveryStore<FileStorage>;

struct Program {
    config: Config,
    clock: Rc<dyn Clock>,
    store: Rc<Store>,
}

impl Program {
    fn new(config: Config) -> Self {
        let clock: Rc<dyn Clock> = Rc::new(SystemClock);
        let store = RecoveryStore::new(FileStorage::new(&config.store_file_path), clock.clone())
            .with_max_age(config.stale_after);

        Self {
            config,
            clock,
            store: Rc::new(store),
        }
    }

    fn notifier(&self) -> Option<Rc<dyn Notifier>> {
        if self.config.warn_before.is_zero() {
            None
        } else if self.config.desktop_notifications {
            Some(Rc::new(SystemdNotifier))
        } else {
            Some(Rc::new(LogNotifier))
        }
    }

    /// An engine that draws a progress bar, and optionally asks for an alert near the end
    fn engine(&self, duration: Duration, notify: bool) -> CountdownEngine {
        let total = duration.as_secs();

        let callbacks = Callbacks::new(
            move |remaining, elapsed| print_progress_bar(total, remaining, elapsed),
            || {
                println!();
                println!("{}", "Time's up!".green().bold());
            },
        );

        let engine = CountdownEngine::new(
            self.store.clone(),
            self.clock.clone(),
            callbacks,
            self.config.engine_settings(),
        );

        match self.notifier().filter(|_| notify) {
            Some(notifier) => engine.with_notifier(notifier),
            None => engine,
        }
    }

    fn start(&self, duration: Option<Duration>, category: &str, key: Option<&str>, wait: bool) -> Result<()> {
        let duration = match duration.or_else(|| self.config.default_duration(category)) {
            Some(duration) => duration,
            None => bail!("No default duration for \"{}\" timers, pass one with --duration", category),
        };

        if let Some(key) = key {
            if self.store.read(key).is_some() {
                bail!("A timer with key {} is already running", key);
            }
        }

        if !wait {
            let key = CountdownEngine::new(
                self.store.clone(),
                self.clock.clone(),
                Callbacks::none(),
                self.config.engine_settings(),
            )
            .start(duration.as_secs(), category, key)?;

            Hook::TimerStart.run(&self.config.hooks_directory, category, &key)?;

            if let Some(notifier) = self.notifier() {
                let title = format!("{} timer", category);
                if let Err(e) = notifier.schedule(duration, &title, &format!("{} is over", category)) {
                    warn!("Unable to schedule notification: {:#}", e);
                }
            }

            println!("Started {} timer {} for {}", category.yellow(), key.cyan(), duration.to_human());
            println!();
            println!("{}", format!("(use \"restclock watch {}\" to follow it)", key).dimmed());
            return Ok(());
        }

        let mut engine = self.engine(duration, true);
        let key = engine.start(duration.as_secs(), category, key)?;
        Hook::TimerStart.run(&self.config.hooks_directory, category, &key)?;

        self.follow(&mut engine)
    }

    fn follow(&self, engine: &mut CountdownEngine) -> Result<()> {
        let mut ticker = Ticker::default();

        while engine.is_ticking() {
            let beat = ticker.wait();

            if !step(engine, &self.store, beat) {
                println!();
                println!("{}", "Timer was stopped".yellow());
                return Ok(());
            }
        }

        if engine.state() == EngineState::Completed {
            if let (Some(category), Some(key)) = (engine.category(), engine.key()) {
                Hook::TimerEnd.run(&self.config.hooks_directory, category, key)?;
            }
        }

        Ok(())
    }

    fn find(&self, key: &str) -> Result<RecoveredTimer> {
        self.store
            .scan_all()
            .into_iter()
            .find(|t| t.key == key)
            .with_context(|| format!("No running timer with key {}", key))
    }

    fn watch(&self, key: &str) -> Result<()> {
        let recovered = self.find(key)?;

        println!(
            "Following {} timer {}",
            recovered.record.category().yellow(),
            key.cyan()
        );

        // The alert was already scheduled when the timer was started
        let mut engine = self.engine(recovered.record.timer().duration(), false);
        engine.restore(&recovered)?;

        self.follow(&mut engine)
    }

    fn print_status(&self, template: Option<&str>) {
        let timers = self.store.scan_all();

        if let Some(template) = template {
            for timer in &timers {
                println!("{}", format_timer(template, timer));
            }
            return;
        }

        if timers.is_empty() {
            println!("No running timers");
            println!();
            println!("{}", "(use \"restclock start\" to start one)".dimmed());
            return;
        }

        let mut table = Table::new();

        table.set_titles(Row::new(vec![
            Cell::new("Key").with_style(Attr::Underline(true)),
            Cell::new("Type").with_style(Attr::Underline(true)),
            Cell::new("Started").with_style(Attr::Underline(true)),
            Cell::new("Duration").with_style(Attr::Underline(true)),
            Cell::new("Remaining").with_style(Attr::Underline(true)),
        ]));

        for timer in &timers {
            let started = local_or_dash(Some(timer.record.timer().starts_at()), |d| {
                d.format("%d %b %T").to_string()
            });
            let duration = timer.record.timer().duration().to_human();
            let remaining = Duration::from_secs(timer.remaining).to_kitchen();

            table.add_row(Row::new(vec![
                Cell::new(&timer.key).with_style(Attr::ForegroundColor(color::CYAN)),
                Cell::new(timer.record.category()).with_style(Attr::ForegroundColor(color::YELLOW)),
                Cell::new(&started).with_style(Attr::ForegroundColor(color::BLUE)),
                Cell::new(&duration).style_spec("r"),
                Cell::new(&remaining).style_spec("r").with_style(Attr::Bold),
            ]));
        }
        table.set_format(*format::consts::FORMAT_CLEAN);
        table.printstd();

        println!();
        println!("{}", "(use \"restclock watch <key>\" to follow a timer)".dimmed());
        println!("{}", "(use \"restclock stop <key>\" to stop a timer)".dimmed());
    }

    fn stop(&self, key: &str) -> Result<()> {
        let Some(record) = self.store.read(key) else {
            bail!("No running timer with key {}", key);
        };

        println!("Stopping {} timer {}", record.category().yellow(), key.cyan());
        self.store.remove(key);

        Hook::TimerStop.run(&self.config.hooks_directory, record.category(), key)
    }

    fn clear(&self) -> Result<()> {
        for timer in self.store.scan_all() {
            self.stop(&timer.key)?;
        }

        Ok(())
    }

    fn purge(&self) -> Result<()> {
        if self.config.store_file_path.exists() {
            println!(
                "Removing timer store at {}",
                self.config.store_file_path.display().to_string().cyan()
            );
            std::fs::remove_file(&self.config.store_file_path)?;
        }

        Ok(())
    }
}

/// Advance a followed timer by one beat
///
/// Returns false, after stopping `engine`, when its record was removed by
/// another process (`restclock stop` or `clear`).
fn step<S: Storage>(engine: &mut CountdownEngine, store: &RecoveryStore<S>, beat: Beat) -> bool {
    if let Some(key) = engine.key() {
        // Only a record known to be missing counts; an unreadable store does not.
        if let Ok(false) = store.contains(key) {
            info!("Timer {} was stopped elsewhere", key);
            engine.stop();
            return false;
        }
    }

    match beat {
        Beat::Tick => engine.tick(),
        Beat::Resumed { gap } => {
            debug!("Catching up after {}s without ticks", gap.as_secs());
            engine.handle_lifecycle(LifecycleEvent::Resumed);
        }
    }

    true
}

/// `t` in the local time zone, if it is within the range chrono supports
fn local(t: SystemTime) -> Option<DateTime<Local>> {
    let ms = t.duration_since(SystemTime::UNIX_EPOCH).ok()?.as_millis();
    let utc = DateTime::from_timestamp_millis(i64::try_from(ms).ok()?)?;

    Some(utc.with_timezone(&Local))
}

fn local_or_dash(t: Option<SystemTime>, fmt: impl Fn(DateTime<Local>) -> String) -> String {
    t.and_then(local).map(fmt).unwrap_or_else(|| "-".to_string())
}

fn format_timer(f: &str, timer: &RecoveredTimer) -> String {
    let t = timer.record.timer();

    f.replace("%k", &timer.key)
        .replace("%t", timer.record.category())
        .replace("%r", &Duration::from_secs(timer.remaining).to_kitchen())
        .replace("%R", &timer.remaining.to_string())
        .replace("%E", &timer.elapsed.to_string())
        .replace("%s", &local_or_dash(Some(t.starts_at()), |d| d.to_rfc3339()))
        .replace("%e", &local_or_dash(t.ends_at(), |d| d.to_rfc3339()))
}

fn print_progress_bar(total: u64, remaining: u64, elapsed: u64) {
    let elapsed_ratio = if total == 0 {
        1.0
    } else {
        elapsed as f32 / total as f32
    };

    let bar_width = 40.0;

    let filled_count = (bar_width * elapsed_ratio).round() as usize;
    let unfilled_count = (bar_width * (1.0 - elapsed_ratio)).round() as usize;

    let filled_bar = "█".repeat(filled_count);
    let unfilled_bar = "░".repeat(unfilled_count);

    print!(
        "\r{} {}{} {}",
        Duration::from_secs(elapsed).to_kitchen(),
        filled_bar,
        unfilled_bar,
        Duration::from_secs(remaining).to_kitchen()
    );
    let _ = io::stdout().flush();
}

fn main() -> Result<()> {
    human_panic::setup_panic!();

    let args = Args::parse();

    env_logger::Builder::new()
        .filter_level(args.verbose.log_level_filter())
        .init();

    let config_path = match args.config {
        Some(conf_path) => conf_path,
        None => config::default_config_path()?,
    };

    let config = Config::init(&config_path)?;
    let program = Program::new(config);

    match &args.command {
        Command::Start { duration, category, key, wait } => {
            program.start(*duration, category, key.as_deref(), *wait)?;
        }
        Command::Status { format } => {
            program.print_status(format.as_deref());
        }
        Command::Watch { key } => {
            program.watch(key)?;
        }
        Command::Stop { key } => {
            program.stop(key)?;
        }
        Command::Clear => {
            program.clear()?;
        }
        Command::Purge => {
            program.purge()?;

            if config_path.exists() {
                println!("Removing config file at {}", config_path.display().to_string().cyan());
                std::fs::remove_file(&config_path)?;
            }
        }
    }

    Ok(())
}
