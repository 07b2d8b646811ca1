//! Timed lifecycle driver.
//!
//! A run is a fixed sequence of blocking calls on a [`Network`]:
//! initialize, create, connect, presimulate, simulate. A monotonic
//! checkpoint is taken around each, and the resulting durations are
//! reported either as a text summary or as a JSON record written to a file
//! that must not already exist.

use std::error::Error;
use std::fs::OpenOptions;
use std::io::{self, Write};

use tracing::{debug, info};

use crate::harness::{
    ns_to_ms, BenchmarkConfig, Checkpoint, PhaseDurations, PhaseTimer, PhaseTimings,
};
use crate::params::{NetParams, ParamSet, SimParams, StimParams};
use crate::schema::{format_summary, ReportRecord};
use crate::{BenchError, NestedLoopAlgo};

/// A network simulation the driver can sequence and time.
pub trait Network: Sized {
    type Error: Error + Send + Sync + 'static;

    fn initialize(
        sim: &SimParams,
        net: &NetParams,
        stim: &StimParams,
    ) -> Result<Self, Self::Error>;

    /// Select the nested-loop algorithm variant. Networks without variants
    /// accept any selection.
    fn set_algo(&mut self, algo: NestedLoopAlgo) -> Result<(), Self::Error> {
        let _ = algo;
        Ok(())
    }

    fn create(&mut self) -> Result<(), Self::Error>;

    fn connect(&mut self) -> Result<(), Self::Error>;

    /// Advance network time by `duration_ms`.
    fn simulate(&mut self, duration_ms: f64) -> Result<(), Self::Error>;
}

/// Result of a completed run.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub timings: PhaseTimings,
    pub durations: PhaseDurations,
    /// Present in JSON report mode only.
    pub record: Option<ReportRecord>,
}

/// Execute all phases in order and return the network with its checkpoints.
///
/// Collaborator errors are passed through unmodified; no phase is retried.
pub fn run_phases<N: Network>(
    algo: Option<NestedLoopAlgo>,
    params: &ParamSet,
) -> Result<(N, PhaseTimings), BenchError> {
    let ParamSet { sim, net, stim } = params;
    let mut timer = PhaseTimer::start();

    let mut network = N::initialize(sim, net, stim).map_err(BenchError::network)?;
    if let Some(algo) = algo {
        network.set_algo(algo).map_err(BenchError::network)?;
    }
    mark(&mut timer, Checkpoint::NetworkInitialized);

    network.create().map_err(BenchError::network)?;
    mark(&mut timer, Checkpoint::Created);

    network.connect().map_err(BenchError::network)?;
    mark(&mut timer, Checkpoint::Connected);

    network.simulate(sim.t_presim).map_err(BenchError::network)?;
    mark(&mut timer, Checkpoint::Presimulated);

    network.simulate(sim.t_sim).map_err(BenchError::network)?;
    mark(&mut timer, Checkpoint::Simulated);

    Ok((network, timer.finish()))
}

fn mark(timer: &mut PhaseTimer, checkpoint: Checkpoint) {
    let elapsed_ns = timer.mark(checkpoint);
    info!(
        checkpoint = checkpoint.as_str(),
        elapsed_ms = ns_to_ms(elapsed_ns),
        "phase complete"
    );
}

/// Run the benchmark and write the report to standard output.
pub fn run<N: Network>(cfg: &BenchmarkConfig, params: ParamSet) -> Result<RunOutcome, BenchError> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    run_with_output::<N, _>(cfg, params, &mut out)
}

/// Run the benchmark, echoing the report to `out`.
///
/// The output path is checked before the network is constructed, so a
/// rejected run has no side effects.
pub fn run_with_output<N, W>(
    cfg: &BenchmarkConfig,
    mut params: ParamSet,
    out: &mut W,
) -> Result<RunOutcome, BenchError>
where
    N: Network,
    W: Write,
{
    cfg.preflight()?;

    if let Some(seed) = cfg.seed() {
        if seed != params.sim.master_seed {
            info!(
                from = params.sim.master_seed,
                to = seed,
                "overriding master seed"
            );
        }
        params.sim.master_seed = seed;
    }
    debug!(?params, algo = ?cfg.algo(), "starting run");

    let (_net, timings) = run_phases::<N>(cfg.algo(), &params)?;
    let durations = timings.durations();

    let record = match cfg.output() {
        Some(path) => {
            let record = ReportRecord::new(cfg.algo().unwrap_or_default(), &durations);
            let json = record.to_json_pretty()?;

            let mut file = OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(path)
                .map_err(|e| match e.kind() {
                    io::ErrorKind::AlreadyExists => {
                        BenchError::PreconditionFailed(format!("path exists: {}", path.display()))
                    }
                    _ => BenchError::Io(e),
                })?;
            file.write_all(json.as_bytes())?;
            info!(path = %path.display(), "report written");

            writeln!(out, "{json}")?;
            Some(record)
        }
        None => {
            write!(out, "{}", format_summary(&durations))?;
            None
        }
    };
    out.flush()?;

    Ok(RunOutcome {
        timings,
        durations,
        record,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::fmt;
    use tempfile::tempdir;

    thread_local! {
        static CALLS: RefCell<Vec<String>> = const { RefCell::new(Vec::new()) };
    }

    fn record_call(call: impl Into<String>) {
        CALLS.with(|c| c.borrow_mut().push(call.into()));
    }

    fn take_calls() -> Vec<String> {
        CALLS.with(|c| std::mem::take(&mut *c.borrow_mut()))
    }

    #[derive(Debug, PartialEq)]
    struct StubError(&'static str);

    impl fmt::Display for StubError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "stub failed in {}", self.0)
        }
    }

    impl Error for StubError {}

    /// Records every call; fails in `connect` when the seed is 666.
    struct Stub {
        fail_connect: bool,
    }

    impl Network for Stub {
        type Error = StubError;

        fn initialize(sim: &SimParams, _: &NetParams, _: &StimParams) -> Result<Self, StubError> {
            record_call(format!("initialize seed={}", sim.master_seed));
            Ok(Stub {
                fail_connect: sim.master_seed == 666,
            })
        }

        fn set_algo(&mut self, algo: NestedLoopAlgo) -> Result<(), StubError> {
            record_call(format!("set_algo {}", algo.name()));
            Ok(())
        }

        fn create(&mut self) -> Result<(), StubError> {
            record_call("create");
            Ok(())
        }

        fn connect(&mut self) -> Result<(), StubError> {
            record_call("connect");
            if self.fail_connect {
                return Err(StubError("connect"));
            }
            Ok(())
        }

        fn simulate(&mut self, duration_ms: f64) -> Result<(), StubError> {
            record_call(format!("simulate {duration_ms}"));
            Ok(())
        }
    }

    fn short_params() -> ParamSet {
        ParamSet::default()
            .with_durations(Some(5.0), Some(10.0))
            .unwrap()
    }

    #[test]
    fn test_phases_run_in_order() {
        take_calls();
        let cfg = BenchmarkConfig::new(None, Some(NestedLoopAlgo::Smart1D), Some(42));
        let mut out = Vec::new();
        run_with_output::<Stub, _>(&cfg, short_params(), &mut out).unwrap();

        assert_eq!(
            take_calls(),
            [
                "initialize seed=42",
                "set_algo Smart1D",
                "create",
                "connect",
                "simulate 5",
                "simulate 10"
            ]
        );
    }

    #[test]
    fn test_params_seed_kept_without_override() {
        take_calls();
        let mut params = short_params();
        params.sim.master_seed = 2024;

        let mut out = Vec::new();
        run_with_output::<Stub, _>(&BenchmarkConfig::default(), params, &mut out).unwrap();
        assert_eq!(take_calls()[0], "initialize seed=2024");
    }

    #[test]
    fn test_set_algo_skipped_when_not_requested() {
        take_calls();
        let (_net, _timings) = run_phases::<Stub>(None, &short_params()).unwrap();
        assert!(take_calls().iter().all(|c| !c.starts_with("set_algo")));
    }

    #[test]
    fn test_total_equals_phase_sum() {
        let cfg = BenchmarkConfig::default();
        let mut out = Vec::new();
        let outcome = run_with_output::<Stub, _>(&cfg, short_params(), &mut out).unwrap();

        let d = outcome.durations;
        assert_eq!(d.total_ns, d.phase_sum_ns());
        assert!(outcome.record.is_none());

        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("\nTimes:\n  Total time:"));
        assert!(text.contains("Time to pre simulate:"));
    }

    #[test]
    fn test_existing_output_fails_before_initialize() {
        take_calls();
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.json");
        std::fs::write(&path, "previous results").unwrap();

        let cfg = BenchmarkConfig::new(Some(path.clone()), Some(NestedLoopAlgo::Simple), Some(1));
        let mut out = Vec::new();
        let err = run_with_output::<Stub, _>(&cfg, short_params(), &mut out).unwrap_err();

        assert!(matches!(err, BenchError::PreconditionFailed(_)));
        assert!(take_calls().is_empty());
        assert!(out.is_empty());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "previous results");
    }

    #[test]
    fn test_invalid_algo_rejected_before_filesystem() {
        take_calls();
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.json");

        let err = BenchmarkConfig::from_args(Some(path.clone()), Some(9), Some(1)).unwrap_err();
        assert!(matches!(err, BenchError::InvalidArgument(_)));
        assert!(take_calls().is_empty());
        assert!(!path.exists());
    }

    #[test]
    fn test_collaborator_error_propagates_unmodified() {
        take_calls();
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.json");

        let cfg = BenchmarkConfig::new(Some(path.clone()), None, Some(666));
        let mut out = Vec::new();
        let err = run_with_output::<Stub, _>(&cfg, short_params(), &mut out).unwrap_err();

        assert_eq!(err.to_string(), "stub failed in connect");
        match err {
            BenchError::Network(inner) => {
                let stub = inner.downcast_ref::<StubError>();
                assert_eq!(stub, Some(&StubError("connect")));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(!path.exists());
        assert!(out.is_empty());
        assert_eq!(take_calls().last().map(String::as_str), Some("connect"));
    }

    #[test]
    fn test_json_mode_writes_file_and_echoes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("report.json");

        let cfg = BenchmarkConfig::new(Some(path.clone()), None, Some(3));
        let mut out = Vec::new();
        let outcome = run_with_output::<Stub, _>(&cfg, short_params(), &mut out).unwrap();

        let written = std::fs::read_to_string(&path).unwrap();
        let echoed = String::from_utf8(out).unwrap();
        assert_eq!(echoed, format!("{written}\n"));

        let record: ReportRecord = serde_json::from_str(&written).unwrap();
        assert_eq!(record.nested_loop_algo, NestedLoopAlgo::BlockStep);
        assert_eq!(Some(record), outcome.record);
    }
}
