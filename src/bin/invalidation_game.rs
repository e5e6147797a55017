use std::{
    fs::{File, OpenOptions},
    io::{self, BufWriter, Write},
    path::{Path, PathBuf},
    process,
};

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use env_logger::{Target, WriteStyle};
use invalidation_game::prelude::*;
use log::{error, info, warn, LevelFilter};
use tokio::runtime::Runtime;

/// Exit status after a keyboard interruption.
const EXIT_INTERRUPTED: i32 = 7;
const INTERRUPTED: &str = "Keyboard interruption. Simulation terminated.";

#[derive(Parser)]
#[command(name = "invalidation-game", version)]
#[command(
    about = "Simulate chain reorganization races between PoW and hybrid \
             PoW/PoS adversaries"
)]
struct Cli {
    /// Hash power of an adversary in percent, repeated once per adversary
    #[arg(short = 'w', long = "pow", value_name = "PERCENT")]
    pow: Vec<f64>,

    /// Stake of an adversary in percent, repeated once per adversary.
    /// Enables PoS validation of mined blocks
    #[arg(short = 's', long = "pos", value_name = "PERCENT")]
    pos: Vec<f64>,

    /// Number of simulations to be run
    #[arg(short = 'i', long, default_value_t = 1)]
    simulations: usize,

    /// YAML file with the hash space, ticket pool and vote history
    #[arg(short, long, default_value = "invalidation-game.yaml")]
    config: PathBuf,

    /// Don't write the default configuration when the configuration file is
    /// missing
    #[arg(long)]
    no_create_config: bool,

    /// Number of blocks the rewind adversary starts ahead with
    #[arg(long, default_value_t = 0)]
    rewind_blocks: usize,

    /// Adversary (0-based) which starts ahead
    #[arg(long, default_value_t = 0)]
    rewind_adv: usize,

    /// Seed for reproducible simulations
    #[arg(long)]
    seed: Option<u64>,

    /// Saves simulations to this JSON file
    #[arg(short, long, default_value = "invalidation-game.json")]
    output: PathBuf,

    /// Overwrite (w) or append to (a) the output file
    #[arg(long, value_enum, default_value_t = FileMode::W)]
    output_mode: FileMode,

    /// Don't save simulations to the output file
    #[arg(long)]
    no_output_json: bool,

    /// Appearance of the summary table
    #[arg(long, value_enum, default_value_t = TableFormat::Pretty)]
    format: TableFormat,

    /// Prints every simulation at the end
    #[arg(long)]
    verbose: bool,

    /// Logs this level and above to the log file
    #[arg(long, default_value = "error")]
    log_level: LevelFilter,

    /// File the log is written to
    #[arg(long, default_value = "invalidation-game.log")]
    log_file: PathBuf,

    /// Overwrite (w) or append to (a) the log file
    #[arg(long, value_enum, default_value_t = FileMode::W)]
    log_mode: FileMode,

    /// Tests basic functionality and exits
    #[arg(long)]
    runtest: bool,

    /// Runs simulations in parallel (requires the `rayon` feature)
    #[arg(long)]
    parallel: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum FileMode {
    W,
    A,
}

impl FileMode {
    fn open(self, path: &Path) -> io::Result<File> {
        let mut options = OpenOptions::new();
        match self {
            FileMode::W => options.write(true).create(true).truncate(true),
            FileMode::A => options.append(true).create(true),
        };

        options.open(path)
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum TableFormat {
    Pretty,
    Csv,
}

impl From<TableFormat> for Format {
    fn from(value: TableFormat) -> Self {
        match value {
            TableFormat::Pretty => Format::PrettyPrint,
            TableFormat::Csv => Format::CSV,
        }
    }
}

fn main() -> Result<()> {
    let mut cli = Cli::parse();

    init_logging(&cli)?;

    let params =
        ChainParams::load_or_create(&cli.config, !cli.no_create_config)
            .with_context(|| {
                format!("could not load {}", cli.config.display())
            })?;

    if cli.runtest {
        print_reference_table(0.1);
        cli.verbose = true;
        cli.pow = vec![90.0, 10.0];
        cli.pos.clear();
        cli.simulations = 1;
        cli.rewind_blocks = 0;
    }

    let mut builder = SimulationBuilder::new()
        .hash_shares(cli.pow.iter().copied())
        .params(params)
        .simulations(cli.simulations);
    if !cli.pos.is_empty() {
        builder = builder.stake_shares(cli.pos.iter().copied());
    }
    if cli.rewind_blocks > 0 {
        builder = builder.rewind(cli.rewind_blocks, cli.rewind_adv);
    }
    if let Some(seed) = cli.seed {
        builder = builder.seed(seed);
    }
    let batch = builder.build()?;

    let (cancel, _signals) = cancel_on_interrupt()?;
    let result = match run_batch(&batch, &cancel, cli.parallel) {
        Err(SimulationError::Cancelled) => interrupted(),
        result => result?,
    };

    if cli.verbose {
        println!("Simulations:");
        println!("{}", serde_json::to_string_pretty(&result.runs)?);
    }

    print_summary(&result, cli.format.into());

    if !cli.no_output_json {
        save_output(&result, &cli.output, cli.output_mode)?;
    }

    if result.cancelled {
        interrupted();
    }

    Ok(())
}

/// Logs to the log file, or to stderr if it cannot be opened.
fn init_logging(cli: &Cli) -> Result<()> {
    let mut builder = env_logger::Builder::new();
    builder
        .filter_level(cli.log_level)
        .format(|buf, record| {
            writeln!(buf, "{}:{}", record.level(), record.args())
        });

    match cli.log_mode.open(&cli.log_file) {
        Ok(file) => {
            builder
                .target(Target::Pipe(Box::new(file)))
                .write_style(WriteStyle::Never);
        }
        Err(err) => eprintln!(
            "Could not open {} for logging ({}); logging to stderr",
            cli.log_file.display(),
            err
        ),
    }

    builder.try_init()?;
    Ok(())
}

/// Cancels the returned token on the first Ctrl-C and exits on the second.
/// The runtime must be kept alive for as long as the handler is needed.
fn cancel_on_interrupt() -> Result<(CancelToken, Runtime)> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .enable_all()
        .build()?;

    let cancel = CancelToken::new();
    let token = cancel.clone();
    runtime.spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if token.is_cancelled() {
                interrupted();
            }
            eprintln!("Interrupted; stopping after the current simulation");
            warn!("keyboard interruption; cancelling simulation batch");
            token.cancel();
        }
    });

    Ok((cancel, runtime))
}

fn run_batch(
    batch: &SimulationGroup,
    cancel: &CancelToken,
    parallel: bool,
) -> Result<BatchResult, SimulationError> {
    #[cfg(feature = "rayon")]
    if parallel {
        return batch.run_all_parallel_until(cancel);
    }
    #[cfg(not(feature = "rayon"))]
    if parallel {
        warn!("built without rayon; running sequentially");
    }

    batch.run_all_until(cancel)
}

fn interrupted() -> ! {
    println!("{}", INTERRUPTED);
    error!("{}", INTERRUPTED);
    log::logger().flush();
    process::exit(EXIT_INTERRUPTED)
}

fn print_reference_table(q: f64) {
    println!("q = {}", q);
    for z in 0..=10 {
        println!("z = {} P = {}", z, catch_up(q, z));
    }
}

fn print_summary(result: &BatchResult, format: Format) {
    let summary = &result.summary;

    match summary.staking {
        true => println!("\nPoW + PoS simulation:"),
        false => println!("\nPure PoW simulation:"),
    }
    println!("Number of simulations: {}", summary.total);
    if let Some(rewind) = result.rewind {
        let unit = if rewind.blocks < 2 { "block" } else { "blocks" };
        println!(
            "Simulating that adversary {} is {} {} ahead",
            rewind.adversary, rewind.blocks, unit
        );
    }

    println!("{}", ResultsTable::new(summary, format));

    println!(
        "Total time for the batch of simulations: {:.6} seconds",
        result.timing.elapsed.as_secs_f64()
    );
    println!(
        "Average duration of simulations: {:.6} seconds",
        summary.mean_duration.as_secs_f64()
    );

    let prefix = if summary.total > 1 { "Average of " } else { "" };
    let runs = |n: usize| if n < 2 { "simulation" } else { "simulations" };
    match summary.mean_cycles_to_two_block {
        Some(mean) => println!(
            "{}2-block advantage for {} {} reached in: {} blocks",
            prefix,
            summary.two_block_reached,
            runs(summary.two_block_reached),
            mean
        ),
        None => println!("2-block advantage not reached in any simulation"),
    }
    println!(
        "{}6-block advantage for {} {} reached in: {} blocks",
        prefix,
        summary.total,
        runs(summary.total),
        summary.mean_cycles_to_six_block
    );

    for report in summary.catch_up_reports() {
        println!("{}", report);
    }

    if summary.is_draw() {
        println!("Assuming that no adversary will fork the blockchain:");
    }
    for cost in summary.attack_costs() {
        println!("{}", cost);
    }

    if result.cancelled {
        println!("Batch stopped after {} simulations", summary.total);
    }
}

fn save_output(
    result: &BatchResult,
    path: &Path,
    mode: FileMode,
) -> Result<()> {
    let file = mode
        .open(path)
        .with_context(|| format!("could not open {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, result)?;
    writeln!(writer)?;
    writer.flush()?;

    info!("saved simulation JSON object to {}", path.display());

    Ok(())
}
