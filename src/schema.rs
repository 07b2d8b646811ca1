use std::fmt::Write as _;

use serde::{Deserialize, Serialize};
use serde_json::ser::PrettyFormatter;

use crate::harness::{ns_to_ms, PhaseDurations};
use crate::NestedLoopAlgo;

/// Phase durations in nanoseconds, keyed as they appear in the report file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Timers {
    pub time_network: u64,
    pub time_create: u64,
    pub time_connect: u64,
    pub time_presimulate: u64,
    pub time_simulate: u64,
    pub time_total: u64,
}

impl From<&PhaseDurations> for Timers {
    fn from(d: &PhaseDurations) -> Self {
        Self {
            time_network: d.network_ns,
            time_create: d.create_ns,
            time_connect: d.connect_ns,
            time_presimulate: d.presimulate_ns,
            time_simulate: d.simulate_ns,
            time_total: d.total_ns,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportRecord {
    pub nested_loop_algo: NestedLoopAlgo,
    pub timers: Timers,
}

impl ReportRecord {
    pub fn new(algo: NestedLoopAlgo, durations: &PhaseDurations) -> Self {
        Self {
            nested_loop_algo: algo,
            timers: durations.into(),
        }
    }

    /// Pretty JSON with 4-space indentation.
    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        let mut buf = Vec::new();
        let mut ser =
            serde_json::Serializer::with_formatter(&mut buf, PrettyFormatter::with_indent(b"    "));
        self.serialize(&mut ser)?;
        // serde_json only ever emits UTF-8.
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }
}

/// Fixed-format human-readable summary, milliseconds with three decimals.
pub fn format_summary(d: &PhaseDurations) -> String {
    let mut s = String::from("\nTimes:\n");
    let rows = [
        ("  Total time:          ", d.total_ns),
        ("  Time to initialize:  ", d.network_ns),
        ("  Time to create:      ", d.create_ns),
        ("  Time to connect:     ", d.connect_ns),
        ("  Time to pre simulate: ", d.presimulate_ns),
        ("  Time to simulate:    ", d.simulate_ns),
    ];
    for (label, ns) in rows {
        let _ = writeln!(s, "{label}{:.3} ms", ns_to_ms(ns));
    }
    s
}
