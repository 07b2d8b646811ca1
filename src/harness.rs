use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::{BenchError, NestedLoopAlgo};

/// Run configuration, built once at process entry and read-only afterwards.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BenchmarkConfig {
    output: Option<PathBuf>,
    algo: Option<NestedLoopAlgo>,
    seed: Option<u64>,
}

impl BenchmarkConfig {
    pub const DEFAULT_SEED: u64 = 12345;

    pub fn new(
        output: Option<PathBuf>,
        algo: Option<NestedLoopAlgo>,
        seed: Option<u64>,
    ) -> Self {
        Self { output, algo, seed }
    }

    /// Build from raw command-line values, rejecting algorithm ids outside
    /// the known range.
    ///
    /// A JSON report always records a seeded run: without an explicit seed,
    /// report mode falls back to [`Self::DEFAULT_SEED`]. The text summary
    /// keeps whatever seed the simulation parameters carry.
    pub fn from_args(
        output: Option<PathBuf>,
        algo_id: Option<i64>,
        seed: Option<u64>,
    ) -> Result<Self, BenchError> {
        let algo = algo_id.map(NestedLoopAlgo::from_id).transpose()?;
        let seed = seed.or(output.as_ref().map(|_| Self::DEFAULT_SEED));
        Ok(Self::new(output, algo, seed))
    }

    /// JSON report destination. `None` selects the human-readable summary.
    pub fn output(&self) -> Option<&Path> {
        self.output.as_deref()
    }

    pub fn algo(&self) -> Option<NestedLoopAlgo> {
        self.algo
    }

    /// Seed that replaces `SimParams::master_seed`, if any.
    pub fn seed(&self) -> Option<u64> {
        self.seed
    }

    /// Checks that must pass before any network is constructed.
    pub fn preflight(&self) -> Result<(), BenchError> {
        if let Some(path) = self.output() {
            if path.exists() {
                return Err(BenchError::PreconditionFailed(format!(
                    "path exists: {}",
                    path.display()
                )));
            }
        }
        Ok(())
    }
}

impl Default for BenchmarkConfig {
    fn default() -> Self {
        Self::new(None, None, None)
    }
}

/// Named points in the run lifecycle, in the order they are reached.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Checkpoint {
    Start,
    NetworkInitialized,
    Created,
    Connected,
    Presimulated,
    Simulated,
}

impl Checkpoint {
    pub const ALL: [Checkpoint; 6] = [
        Checkpoint::Start,
        Checkpoint::NetworkInitialized,
        Checkpoint::Created,
        Checkpoint::Connected,
        Checkpoint::Presimulated,
        Checkpoint::Simulated,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Checkpoint::Start => "start",
            Checkpoint::NetworkInitialized => "network_initialized",
            Checkpoint::Created => "created",
            Checkpoint::Connected => "connected",
            Checkpoint::Presimulated => "presimulated",
            Checkpoint::Simulated => "simulated",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

/// Records checkpoints against a monotonic clock.
///
/// Checkpoints must be marked in lifecycle order; `Start` is implicit.
#[derive(Debug)]
pub struct PhaseTimer {
    origin: Instant,
    offsets_ns: [u64; 6],
    next: usize,
}

impl PhaseTimer {
    pub fn start() -> Self {
        Self {
            origin: Instant::now(),
            offsets_ns: [0; 6],
            next: 1,
        }
    }

    /// Record `checkpoint` now and return nanoseconds since the previous one.
    pub fn mark(&mut self, checkpoint: Checkpoint) -> u64 {
        let idx = checkpoint.index();
        assert_eq!(
            idx,
            self.next,
            "checkpoint {} marked out of order",
            checkpoint.as_str()
        );

        let elapsed = self.origin.elapsed().as_nanos();
        let elapsed = u64::try_from(elapsed).unwrap_or(u64::MAX);
        // Instant is monotonic, but keep the invariant explicit.
        let now = elapsed.max(self.offsets_ns[idx - 1]);
        self.offsets_ns[idx] = now;
        self.next += 1;
        now - self.offsets_ns[idx - 1]
    }

    pub fn finish(self) -> PhaseTimings {
        assert_eq!(
            self.next,
            Checkpoint::ALL.len(),
            "not all checkpoints were marked"
        );
        PhaseTimings {
            offsets_ns: self.offsets_ns,
        }
    }
}

/// Checkpoint timestamps in nanoseconds relative to `Start`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PhaseTimings {
    offsets_ns: [u64; 6],
}

impl PhaseTimings {
    /// Build from explicit offsets, indexed like [`Checkpoint::ALL`].
    pub fn from_offsets(offsets_ns: [u64; 6]) -> Result<Self, BenchError> {
        if offsets_ns[0] != 0 {
            return Err(BenchError::InvalidArgument(
                "start checkpoint must be at offset 0".to_string(),
            ));
        }
        if let Some(pair) = offsets_ns.windows(2).find(|w| w[1] < w[0]) {
            return Err(BenchError::InvalidArgument(format!(
                "checkpoint timestamps decrease: {} -> {}",
                pair[0], pair[1]
            )));
        }
        Ok(Self { offsets_ns })
    }

    pub fn at(&self, checkpoint: Checkpoint) -> u64 {
        self.offsets_ns[checkpoint.index()]
    }

    pub fn durations(&self) -> PhaseDurations {
        let o = &self.offsets_ns;
        PhaseDurations {
            network_ns: o[1] - o[0],
            create_ns: o[2] - o[1],
            connect_ns: o[3] - o[2],
            presimulate_ns: o[4] - o[3],
            simulate_ns: o[5] - o[4],
            total_ns: o[5] - o[0],
        }
    }
}

/// Per-phase durations derived from [`PhaseTimings`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PhaseDurations {
    pub network_ns: u64,
    pub create_ns: u64,
    pub connect_ns: u64,
    pub presimulate_ns: u64,
    pub simulate_ns: u64,
    pub total_ns: u64,
}

impl PhaseDurations {
    pub fn phase_sum_ns(&self) -> u64 {
        self.network_ns + self.create_ns + self.connect_ns + self.presimulate_ns + self.simulate_ns
    }
}

pub(crate) fn ns_to_ms(ns: u64) -> f64 {
    ns as f64 / 1_000_000.0
}
