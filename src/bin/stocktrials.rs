/*!
Train several independent forecasters on a stock's daily closes and average their metrics
*/

use anyhow::{bail, format_err};
use chrono::NaiveDate;
use clap::{App, Arg, ArgMatches};
use indicatif::{ProgressBar, ProgressStyle};
use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use stocktrials::baseline::LinearTrainer;
use stocktrials::data::{
    closes,
    fake::{HistoryGen, PriceRandomWalk, TradingDays},
    history::load_closes,
    DailyClose,
};
use stocktrials::trial::{Orchestrator, Trainer, TrainingData, WorkerOutcome};
use stocktrials::TrialConfig;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Parse an optional argument, reporting which argument was malformed
fn parse_arg<T>(matches: &ArgMatches, name: &str) -> anyhow::Result<Option<T>>
where
    T: FromStr,
    T::Err: Display,
{
    matches
        .value_of(name)
        .map(|value| {
            T::from_str(value)
                .map_err(|err| format_err!("Invalid value {:?} for --{}: {}", value, name, err))
        })
        .transpose()
}

fn init_logging(verbosity: usize) {
    let level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn build_config(matches: &ArgMatches) -> anyhow::Result<TrialConfig> {
    let defaults = TrialConfig::default();
    Ok(TrialConfig {
        window_len: parse_arg(matches, "window")?.unwrap_or(defaults.window_len),
        workers: parse_arg(matches, "workers")?.unwrap_or(defaults.workers),
        epochs: parse_arg(matches, "epochs")?.unwrap_or(defaults.epochs),
        batch_size: parse_arg(matches, "batch-size")?.unwrap_or(defaults.batch_size),
        split_fraction: parse_arg(matches, "split")?.unwrap_or(defaults.split_fraction),
        learning_rate: parse_arg(matches, "learning-rate")?.unwrap_or(defaults.learning_rate),
        patience: parse_arg(matches, "patience")?,
        seed: parse_arg(matches, "seed")?.unwrap_or(defaults.seed),
        timeout: parse_arg::<f64>(matches, "timeout")?
            .map(|secs| {
                if secs.is_finite() && secs > 0.0 {
                    Ok(Duration::from_secs_f64(secs))
                } else {
                    Err(format_err!("--timeout must be a positive number of seconds"))
                }
            })
            .transpose()?,
        output_dir: matches
            .value_of("output")
            .map(PathBuf::from)
            .unwrap_or(defaults.output_dir),
        failure_policy: parse_arg(matches, "on-failure")?.unwrap_or(defaults.failure_policy),
        length_policy: parse_arg(matches, "on-length-mismatch")?.unwrap_or(defaults.length_policy),
    })
}

fn load_history(matches: &ArgMatches, seed: u64) -> anyhow::Result<Vec<DailyClose>> {
    if let Some(path) = matches.value_of("INPUT") {
        let history = load_closes(Path::new(path), matches.value_of("date-format"))?;
        info!(path, days = history.len(), "Loaded price history");
        return Ok(history);
    }
    let days: usize = parse_arg(matches, "fake")?
        .ok_or_else(|| format_err!("Either an input file or --fake <DAYS> is required"))?;
    let start = NaiveDate::from_ymd_opt(2015, 1, 1).ok_or_else(|| format_err!("Bad start date"))?;
    let prices = PriceRandomWalk::seeded(seed, 40.0, 0.0003, 0.015)
        .map_err(|err| format_err!("Bad random walk parameters: {:?}", err))?;
    let history: Vec<_> = HistoryGen {
        days: TradingDays(start),
        prices,
    }
    .take(days)
    .collect();
    info!(days = history.len(), "Generated fake price history");
    Ok(history)
}

fn build_trainer(matches: &ArgMatches) -> anyhow::Result<Arc<dyn Trainer>> {
    match matches.value_of("model").unwrap_or("linear") {
        "linear" => Ok(Arc::new(LinearTrainer::default())),
        #[cfg(feature = "torch")]
        "lstm" => {
            use stocktrials::lstm::{LstmTrainer, StockLSTMDesc};
            use tch::Device;
            let device = match matches.value_of("device").unwrap_or("cuda") {
                "cuda" => Device::cuda_if_available(),
                "cpu" => Device::Cpu,
                device => bail!("Invalid value for device: {:?}", device),
            };
            info!(?device, "Using device");
            let defaults = StockLSTMDesc::default();
            let desc = StockLSTMDesc {
                hidden: parse_arg(matches, "hidden")?.unwrap_or(defaults.hidden),
                layers: parse_arg(matches, "layers")?.unwrap_or(defaults.layers),
            };
            Ok(Arc::new(LstmTrainer::new(desc, device)))
        }
        model => bail!("Unknown model {:?}", model),
    }
}

pub fn run(matches: &ArgMatches) -> anyhow::Result<()> {
    let config = build_config(matches)?;
    let orchestrator = Orchestrator::new(config)?;
    let config = orchestrator.config();
    let trainer = build_trainer(matches)?;

    let history = load_history(matches, config.seed)?;
    let (data, scaler) = TrainingData::prepare(&closes(&history), config);
    if data.train.is_empty() {
        bail!(
            "Not enough data: {} days leave no training windows of length {}",
            history.len(),
            config.window_len
        );
    }
    info!(
        min = scaler.min,
        max = scaler.max,
        train = data.train.len(),
        validation = data.validation.len(),
        "Prepared windows"
    );

    let progress = ProgressBar::new(config.workers as u64);
    progress.set_style(
        ProgressStyle::default_bar().template("Trials: {wide_bar} {pos}/{len}: {msg:20}"),
    );
    let report = orchestrator.run(&data, trainer, |worker, outcome| {
        match outcome {
            WorkerOutcome::Finished { epochs, .. } => {
                progress.set_message(&format!("#{}: {} epochs", worker, epochs))
            }
            WorkerOutcome::Failed(_) => progress.set_message(&format!("#{}: failed", worker)),
        }
        progress.inc(1);
    });
    progress.finish_and_clear();
    let report = report?;

    for failure in report.failures.iter() {
        warn!("{}", failure);
    }
    println!(
        "Mean of {} worker(s), written to {}",
        report.tables.len(),
        config.mean_path().display()
    );
    println!(
        "{:>5} {:>12} {:>12} {:>12} {:>12}",
        "epoch", "loss", "val_loss", "error", "val_error"
    );
    for (epoch, row) in report.mean.iter().enumerate() {
        println!(
            "{:>5} {:>12.6} {:>12.6} {:>12.6} {:>12.6}",
            epoch, row.loss, row.val_loss, row.error, row.val_error
        );
    }
    Ok(())
}

pub fn main() -> anyhow::Result<()> {
    let matches = App::new("stocktrials")
        .version("0.1")
        .author("Jad Elkhaleq Ghalayini <jad.ghalayini@mail.utoronto.ca>")
        .about("Trains independent stock price forecasters in parallel and averages their training metrics")
        .arg(
            Arg::with_name("INPUT")
                .help("Daily price history as CSV, with a date column and a close column")
                .index(1),
        )
        .arg(
            Arg::with_name("fake")
                .long("fake")
                .help("Train on this many days of generated prices instead of an input file")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("date-format")
                .long("date-format")
                .help("strftime format of the date column. Defaults to %Y-%m-%d")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("window")
                .short("L")
                .long("window")
                .help("Days of history per prediction")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("workers")
                .short("n")
                .long("workers")
                .help("Number of independent trials")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("epochs")
                .short("e")
                .long("epochs")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("batch-size")
                .short("b")
                .long("batch-size")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("split")
                .long("split")
                .help("Fraction of windows used for training")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("learning-rate")
                .long("learning-rate")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("patience")
                .long("patience")
                .help("Stop a trial after this many epochs without validation improvement")
                .takes_value(true),
        )
        .arg(Arg::with_name("seed").long("seed").takes_value(true))
        .arg(
            Arg::with_name("timeout")
                .long("timeout")
                .help("Seconds to wait for all trials before giving up on stragglers")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("output")
                .short("o")
                .long("output")
                .help("Directory for per-trial and mean metrics. Defaults to ./trials")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("on-failure")
                .long("on-failure")
                .possible_values(&["fail-fast", "survivors"])
                .takes_value(true),
        )
        .arg(
            Arg::with_name("on-length-mismatch")
                .long("on-length-mismatch")
                .possible_values(&["fail-fast", "truncate"])
                .takes_value(true),
        )
        .arg(
            Arg::with_name("model")
                .short("m")
                .long("model")
                .help("Model to train: linear, or lstm when built with the torch feature")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("device")
                .short("d")
                .long("device")
                .help("Device to use for the lstm: cuda, cpu. Defaults to cuda")
                .takes_value(true),
        )
        .arg(Arg::with_name("hidden").long("hidden").takes_value(true))
        .arg(Arg::with_name("layers").long("layers").takes_value(true))
        .arg(
            Arg::with_name("verbose")
                .short("v")
                .long("verbose")
                .help("Sets the level of verbosity")
                .multiple(true),
        )
        .get_matches();

    init_logging(matches.occurrences_of("verbose") as usize);
    run(&matches)
}
