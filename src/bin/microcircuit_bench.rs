use clap::Parser;
use microcircuit_bench::driver;
use microcircuit_bench::harness::BenchmarkConfig;
use microcircuit_bench::params::ParamSet;
use microcircuit_bench::reference::ReferenceNetwork;
use microcircuit_bench::BenchError;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "microcircuit-bench")]
#[command(about = "Timed create/connect/simulate benchmark driver (text or JSON output)")]
struct Args {
    /// Where to write the JSON report. Must not exist yet.
    /// If omitted, a human-readable summary is printed instead.
    #[arg(short = 'o', value_name = "PATH")]
    output: Option<PathBuf>,

    /// Nested loop algorithm id:
    /// 0=BlockStep 1=CumulSum 2=Simple 3=ParallelInner 4=ParallelOuter
    /// 5=Frame1D 6=Frame2D 7=Smart1D 8=Smart2D.
    #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
    algo: i64,

    /// Master seed for the simulation. Defaults to 12345 when writing a
    /// JSON report; otherwise the parameter files decide.
    #[arg(long)]
    seed: Option<u64>,

    /// JSON file with simulation parameters.
    #[arg(long, value_name = "FILE")]
    sim_params: Option<PathBuf>,

    /// JSON file with network parameters.
    #[arg(long, value_name = "FILE")]
    net_params: Option<PathBuf>,

    /// JSON file with stimulus parameters.
    #[arg(long, value_name = "FILE")]
    stim_params: Option<PathBuf>,

    /// Override the presimulation duration (ms).
    #[arg(long, value_name = "MS")]
    t_presim: Option<f64>,

    /// Override the main simulation duration (ms).
    #[arg(long, value_name = "MS")]
    t_sim: Option<f64>,
}

fn main() -> Result<(), BenchError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("warn,microcircuit_bench=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    // Both checks run before any parameter file is read or network built.
    let cfg = BenchmarkConfig::from_args(args.output, Some(args.algo), args.seed)?;
    cfg.preflight()?;

    let params = ParamSet::load(
        args.sim_params.as_deref(),
        args.net_params.as_deref(),
        args.stim_params.as_deref(),
    )?
    .with_durations(args.t_presim, args.t_sim)?;

    let outcome = driver::run::<ReferenceNetwork>(&cfg, params)?;
    info!(
        total_ms = outcome.durations.total_ns as f64 / 1e6,
        "benchmark finished"
    );
    Ok(())
}
