use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context};
use clap::{Parser, Subcommand};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use ratewindow::cache::MemoryCache;
use ratewindow::clock::{Clock, ManualClock, SystemClock};
use ratewindow::config::{LogConfig, RateWindowConfig};
use ratewindow::ratelimit::{PresetCounters, RateLimiter, Scope};

/// Inspect and exercise sliding-window rate limits.
#[derive(Debug, Parser)]
#[command(name = "ratewindow", version)]
struct Cli {
    /// Configuration file (YAML, TOML or JSON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Validate the configuration and log every feature's limits
    Check,

    /// Replay a synthetic event stream against in-memory counters
    Simulate {
        /// Feature whose limits apply
        #[arg(long)]
        feature: String,

        /// Scope generating the events
        #[arg(long, default_value = "anonymous")]
        scope: String,

        /// Number of events to send
        #[arg(long, default_value_t = 100)]
        events: u32,

        /// Simulated seconds between events
        #[arg(long, default_value_t = 1.0)]
        interval_secs: f64,

        /// Simulated start time in Unix seconds (default: now)
        #[arg(long)]
        start: Option<f64>,

        /// Sleep out the wait time after a denial, like a well-behaved client
        #[arg(long)]
        back_off: bool,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => RateWindowConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => RateWindowConfig::default(),
    };
    init_tracing(&config.log);

    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    match &cli.config {
        Some(path) => info!(
            path = %path.display(),
            features = config.limits.len(),
            "Configuration loaded"
        ),
        None => info!("No configuration file given, using defaults"),
    }

    match cli.command {
        Command::Check => check(&config),
        Command::Simulate {
            feature,
            scope,
            events,
            interval_secs,
            start,
            back_off,
        } => simulate(
            &config,
            &feature,
            &Scope::from(scope),
            events,
            interval_secs,
            start,
            back_off,
        ),
    }
}

fn init_tracing(log: &LogConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    if log.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn check(config: &RateWindowConfig) -> anyhow::Result<()> {
    if config.limits.is_empty() {
        warn!("No limits configured");
    }

    for (feature, definition) in &config.limits {
        if definition.is_unlimited() {
            info!(feature = %feature, "Unlimited");
            continue;
        }
        for (window, limit) in definition.iter_rates() {
            let preset = config.presets.get(window);
            info!(
                feature = %feature,
                window = %window,
                limit,
                grains = preset.grains_per_window,
                "Limit"
            );
        }
    }

    info!("Configuration is valid");
    Ok(())
}

fn simulate(
    config: &RateWindowConfig,
    feature: &str,
    scope: &Scope,
    events: u32,
    interval_secs: f64,
    start: Option<f64>,
    back_off: bool,
) -> anyhow::Result<()> {
    if !interval_secs.is_finite() || interval_secs < 0.0 {
        bail!("--interval-secs must be a non-negative number");
    }
    let definition = *config
        .limits_for(feature)
        .ok_or_else(|| anyhow!("no limits configured for feature '{feature}'"))?;

    let clock = ManualClock::new(start.unwrap_or_else(|| SystemClock.now()));
    let shared_clock: Arc<dyn Clock> = Arc::new(clock.clone());
    let presets = PresetCounters::from_config(
        &config.presets,
        Arc::new(MemoryCache::with_clock(shared_clock.clone())),
        Arc::new(MemoryCache::with_clock(shared_clock.clone())),
    )?
    .with_clock(shared_clock);
    let limiter = RateLimiter::with_definition(feature, Arc::new(presets), definition);

    info!(feature = %feature, scope = %scope, events, interval_secs, "Starting simulation");

    let started = clock.now();
    let (mut allowed, mut denied) = (0u32, 0u32);
    for event in 0..events {
        let at = clock.now();
        if limiter.allow_usage(scope) {
            limiter.report_usage(scope, 1)?;
            allowed += 1;
            debug!(event, at, "Allowed");
        } else {
            denied += 1;
            let rates = limiter.iter_rates(scope)?;
            let blocking = rates
                .iter()
                .filter(|rate| rate.is_exceeded())
                .max_by(|a, b| a.wait_secs.total_cmp(&b.wait_secs));
            if let Some(rate) = blocking {
                info!(
                    event,
                    at,
                    window = %rate.window,
                    count = rate.count,
                    limit = rate.limit,
                    wait_secs = rate.wait_secs,
                    "Denied"
                );
                if back_off {
                    clock.advance(rate.wait_secs);
                }
            }
        }
        clock.advance(interval_secs);
    }

    for rate in limiter.iter_rates(scope)? {
        info!(
            window = %rate.window,
            count = rate.count,
            limit = rate.limit,
            "Final usage"
        );
    }
    info!(
        allowed,
        denied,
        elapsed_secs = clock.now() - started,
        "Simulation finished"
    );
    Ok(())
}
