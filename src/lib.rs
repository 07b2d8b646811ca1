use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub mod driver;
pub mod error;
pub mod harness;
pub mod params;
pub mod reference;
pub mod schema;

pub use error::BenchError;

/// Nested-loop algorithm variant handed to the simulator.
///
/// The numeric id is what the command line accepts; the name is what the
/// JSON report records.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NestedLoopAlgo {
    #[default]
    BlockStep,
    CumulSum,
    Simple,
    ParallelInner,
    ParallelOuter,
    Frame1D,
    Frame2D,
    Smart1D,
    Smart2D,
}

impl NestedLoopAlgo {
    /// All variants, indexed by id.
    pub const ALL: [NestedLoopAlgo; 9] = [
        NestedLoopAlgo::BlockStep,
        NestedLoopAlgo::CumulSum,
        NestedLoopAlgo::Simple,
        NestedLoopAlgo::ParallelInner,
        NestedLoopAlgo::ParallelOuter,
        NestedLoopAlgo::Frame1D,
        NestedLoopAlgo::Frame2D,
        NestedLoopAlgo::Smart1D,
        NestedLoopAlgo::Smart2D,
    ];

    pub fn from_id(id: i64) -> Result<Self, BenchError> {
        usize::try_from(id)
            .ok()
            .and_then(|idx| Self::ALL.get(idx).copied())
            .ok_or_else(|| {
                BenchError::InvalidArgument(format!(
                    "nested loop algorithm id {id} is outside [0, {})",
                    Self::ALL.len()
                ))
            })
    }

    pub fn id(self) -> u32 {
        self as u32
    }

    pub fn name(self) -> &'static str {
        match self {
            NestedLoopAlgo::BlockStep => "BlockStep",
            NestedLoopAlgo::CumulSum => "CumulSum",
            NestedLoopAlgo::Simple => "Simple",
            NestedLoopAlgo::ParallelInner => "ParallelInner",
            NestedLoopAlgo::ParallelOuter => "ParallelOuter",
            NestedLoopAlgo::Frame1D => "Frame1D",
            NestedLoopAlgo::Frame2D => "Frame2D",
            NestedLoopAlgo::Smart1D => "Smart1D",
            NestedLoopAlgo::Smart2D => "Smart2D",
        }
    }
}

impl fmt::Display for NestedLoopAlgo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for NestedLoopAlgo {
    type Err = BenchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|algo| algo.name() == s)
            .ok_or_else(|| {
                BenchError::InvalidArgument(format!("unknown nested loop algorithm: {s}"))
            })
    }
}
