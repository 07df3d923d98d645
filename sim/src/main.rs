use clap::{Args, Parser, Subcommand};
use log::{error, info};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use std::error::Error;
use std::path::{Path, PathBuf};

use navfuse::fusion::VelPosFusion;
use navfuse::params::FusionParams;
use navfuse::sim::{run_replay, FusionLogRecord, TickRecord};
use navfuse::{Covariance, StateVector, STATE_POS_D};

const LONG_ABOUT: &str = "NAVFUSE-SIM: a replay and analysis tool for the \
velocity/position/height fusion core.

The tool drives the fusion core over a recorded stream of fusion ticks. Each \
CSV row carries the control flags, precomputed innovations, sensor samples, \
and offsets one tick consumes; the output CSV carries the per-tick state \
estimate, published innovations, gate test ratios, and ledger flags. Replay \
is measurement-only: no inertial prediction runs between ticks, so results \
are deterministic and directly comparable across tuning changes.

An optional fault model corrupts the barometric altitude stream with seeded \
Gaussian noise before replay, which is a quick way to probe gate and \
deadzone tuning against a degraded sensor.";

/// Top-level command line interface
#[derive(Parser)]
#[command(author, version, about, long_about = LONG_ABOUT)]
struct Cli {
    #[command(subcommand)]
    command: Command,
    /// Logging verbosity (off, error, warn, info, debug, trace)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,
}

/// Top-level commands
#[derive(Subcommand, Clone)]
enum Command {
    #[command(name = "replay", about = "Replay a recorded tick stream through the fusion core")]
    Replay(ReplayArgs),
    #[command(
        name = "generate-params",
        about = "Generate a template tuning parameter file with default values"
    )]
    GenerateParams(GenerateParamsArgs),
}

/// Replay arguments
#[derive(Args, Clone, Debug)]
struct ReplayArgs {
    /// Input tick record CSV
    #[arg(short, long, value_parser)]
    input: PathBuf,
    /// Output fusion log CSV
    #[arg(short, long, value_parser)]
    output: PathBuf,
    /// Tuning parameter file (json|yaml|yml|toml); defaults are used when omitted
    #[arg(long)]
    params: Option<PathBuf>,
    /// Initial down position (m, NED)
    #[arg(long, default_value_t = 0.0)]
    init_pos_d: f64,
    /// Initial covariance diagonal, applied to every state
    #[arg(long, default_value_t = 1.0)]
    init_var: f64,
    /// Standard deviation of Gaussian noise injected into the baro stream (m)
    #[arg(long, default_value_t = 0.0)]
    baro_noise_std: f64,
    /// RNG seed for the fault model
    #[arg(long, default_value_t = 42)]
    seed: u64,
}

/// Arguments for the generate-params command
#[derive(Args, Clone, Debug)]
struct GenerateParamsArgs {
    /// Output file path; the extension selects the format (.json/.yaml/.yml/.toml)
    #[arg(short, long, value_parser)]
    output: PathBuf,
}

/// Initialize stderr logging at the requested level.
///
/// Replay runs are short-lived, so timestamps carry time of day only and
/// there is no log-file plumbing; redirect stderr if a file is wanted.
fn init_logger(log_level: &str) -> Result<(), Box<dyn Error>> {
    use std::io::Write;

    let level = match log_level.parse::<log::LevelFilter>() {
        Ok(level) => level,
        Err(_) => {
            eprintln!("unknown log level '{}', using 'info'", log_level);
            log::LevelFilter::Info
        }
    };

    env_logger::Builder::new()
        .filter_level(level)
        .format(|buf, record| {
            writeln!(
                buf,
                "{} {:<5} {}",
                chrono::Local::now().format("%H:%M:%S%.3f"),
                record.level(),
                record.args()
            )
        })
        .try_init()?;
    Ok(())
}

/// Create the output file's parent directory if it does not exist yet.
fn ensure_parent_dir(output: &Path) -> Result<(), Box<dyn Error>> {
    if let Some(parent) = output.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

/// Corrupt the barometric altitude stream with seeded Gaussian noise.
fn inject_baro_noise(
    records: &mut [TickRecord],
    noise_std: f64,
    seed: u64,
) -> Result<(), Box<dyn Error>> {
    let mut rng = StdRng::seed_from_u64(seed);
    let normal = Normal::new(0.0, noise_std)?;
    for record in records.iter_mut() {
        record.baro_hgt_m += normal.sample(&mut rng);
    }
    Ok(())
}

fn run_replay_command(args: &ReplayArgs) -> Result<(), Box<dyn Error>> {
    if !args.input.is_file() {
        return Err(format!("input '{}' is not a readable file", args.input.display()).into());
    }
    ensure_parent_dir(&args.output)?;

    let mut records = TickRecord::from_csv(&args.input)?;
    info!("Read {} tick records from {}", records.len(), args.input.display());

    let params = if let Some(ref params_path) = args.params {
        match FusionParams::from_file(params_path) {
            Ok(p) => p,
            Err(e) => {
                error!("Failed to read params {}: {}", params_path.display(), e);
                return Err(Box::new(e));
            }
        }
    } else {
        FusionParams::default()
    };
    info!("Using fusion parameters: {:?}", params);

    if args.baro_noise_std > 0.0 {
        inject_baro_noise(&mut records, args.baro_noise_std, args.seed)?;
        info!(
            "Injected baro noise with std {} m (seed {})",
            args.baro_noise_std, args.seed
        );
    }

    let mut fusion = VelPosFusion::new();
    let mut x = StateVector::zeros();
    x[STATE_POS_D] = args.init_pos_d;
    let mut p = Covariance::from_diagonal_element(args.init_var);

    let log = run_replay(&mut fusion, &mut x, &mut p, &params, &records);

    let rejected_height = log.iter().filter(|r| r.reject_pos_d).count();
    let rejected_vel = log.iter().filter(|r| r.reject_vel_ned).count();
    info!(
        "Replayed {} ticks: {} with height rejections, {} with velocity rejections, final pos_d {:.3} m",
        log.len(),
        rejected_height,
        rejected_vel,
        x[STATE_POS_D]
    );

    FusionLogRecord::to_csv(&log, &args.output)?;
    info!("Results written to {}", args.output.display());
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();

    init_logger(&cli.log_level)?;

    match cli.command {
        Command::Replay(args) => run_replay_command(&args)?,
        Command::GenerateParams(args) => {
            ensure_parent_dir(&args.output)?;
            let params = FusionParams::default();
            match params.to_file(&args.output) {
                Ok(_) => {
                    info!("Generated parameter file: {}", args.output.display());
                    println!("Generated parameter file: {}", args.output.display());
                }
                Err(e) => {
                    error!("Failed to write parameter file: {}", e);
                    return Err(Box::new(e));
                }
            }
        }
    }
    Ok(())
}
