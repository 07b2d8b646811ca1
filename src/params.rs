//! Simulation, network and stimulus parameters handed to the network
//! collaborator.
//!
//! Each parameter object can be loaded from a JSON file. Omitted fields keep
//! their defaults, unknown fields are rejected so typos do not silently fall
//! back to a default.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::BenchError;

/// Simulation control parameters. Times are in milliseconds.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SimParams {
    /// Integration step.
    pub sim_resolution: f64,
    /// Warm-up duration, run and timed before the main simulation.
    pub t_presim: f64,
    /// Main simulation duration.
    pub t_sim: f64,
    pub master_seed: u64,
}

impl Default for SimParams {
    fn default() -> Self {
        Self {
            sim_resolution: 0.1,
            t_presim: 500.0,
            t_sim: 1000.0,
            master_seed: 55,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Population {
    pub name: String,
    /// Neuron count at full scale, before `n_scaling` is applied.
    pub full_size: u64,
    pub excitatory: bool,
}

impl Population {
    fn new(name: &str, full_size: u64, excitatory: bool) -> Self {
        Self {
            name: name.to_string(),
            full_size,
            excitatory,
        }
    }
}

/// Leaky integrate-and-fire parameters shared by all populations.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NeuronParams {
    /// Membrane time constant (ms).
    pub tau_m: f64,
    /// Spike threshold (mV, relative to rest).
    pub v_th: f64,
    pub v_reset: f64,
    /// Absolute refractory period (ms).
    pub t_ref: f64,
}

impl Default for NeuronParams {
    fn default() -> Self {
        Self {
            tau_m: 10.0,
            v_th: 15.0,
            v_reset: 0.0,
            t_ref: 2.0,
        }
    }
}

/// Network topology parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NetParams {
    pub populations: Vec<Population>,
    /// Fraction of `full_size` instantiated per population.
    pub n_scaling: f64,
    /// Recurrent inputs drawn per neuron.
    pub indegree: usize,
    /// Excitatory synaptic weight (mV).
    pub weight: f64,
    /// Inhibitory weight relative to `weight`.
    pub g: f64,
    /// Drive every neuron with independent Poisson background input.
    pub poisson_input: bool,
    /// Rate of each background source (Hz).
    pub bg_rate: f64,
    /// Number of background sources per neuron.
    pub k_ext: f64,
    pub neuron: NeuronParams,
}

impl Default for NetParams {
    fn default() -> Self {
        Self {
            populations: vec![
                Population::new("L23E", 20683, true),
                Population::new("L23I", 5834, false),
                Population::new("L4E", 21915, true),
                Population::new("L4I", 5479, false),
                Population::new("L5E", 4850, true),
                Population::new("L5I", 1065, false),
                Population::new("L6E", 14395, true),
                Population::new("L6I", 2948, false),
            ],
            n_scaling: 0.1,
            indegree: 100,
            weight: 0.15,
            g: 4.0,
            poisson_input: true,
            bg_rate: 8.0,
            k_ext: 2000.0,
            neuron: NeuronParams::default(),
        }
    }
}

impl NetParams {
    /// Instantiated size of each population, never below one neuron.
    pub fn scaled_sizes(&self) -> Vec<usize> {
        self.populations
            .iter()
            .map(|p| ((p.full_size as f64 * self.n_scaling).round() as usize).max(1))
            .collect()
    }
}

/// External stimulus parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StimParams {
    pub dc_input: bool,
    /// Onset of the DC drive in network time (ms).
    pub dc_start: f64,
    pub dc_dur: f64,
    /// Drive strength (mV/ms).
    pub dc_amplitude: f64,
}

impl Default for StimParams {
    fn default() -> Self {
        Self {
            dc_input: false,
            dc_start: 650.0,
            dc_dur: 100.0,
            dc_amplitude: 0.3,
        }
    }
}

/// The three configuration objects a network is constructed from.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ParamSet {
    pub sim: SimParams,
    pub net: NetParams,
    pub stim: StimParams,
}

impl ParamSet {
    /// Load each parameter object from its file, or use defaults when the
    /// path is `None`.
    pub fn load(
        sim: Option<&Path>,
        net: Option<&Path>,
        stim: Option<&Path>,
    ) -> Result<Self, BenchError> {
        Ok(Self {
            sim: load_or_default(sim)?,
            net: load_or_default(net)?,
            stim: load_or_default(stim)?,
        })
    }

    /// Override the presimulation and simulation durations.
    pub fn with_durations(
        mut self,
        t_presim: Option<f64>,
        t_sim: Option<f64>,
    ) -> Result<Self, BenchError> {
        for (name, value) in [("t_presim", t_presim), ("t_sim", t_sim)] {
            if let Some(v) = value {
                if !v.is_finite() || v < 0.0 {
                    return Err(BenchError::InvalidArgument(format!(
                        "{name} must be a finite, non-negative duration (got {v})"
                    )));
                }
            }
        }
        if let Some(v) = t_presim {
            self.sim.t_presim = v;
        }
        if let Some(v) = t_sim {
            self.sim.t_sim = v;
        }
        Ok(self)
    }
}

fn load_or_default<T>(path: Option<&Path>) -> Result<T, BenchError>
where
    T: DeserializeOwned + Default,
{
    let Some(path) = path else {
        return Ok(T::default());
    };
    let reader = BufReader::new(File::open(path)?);
    serde_json::from_reader(reader).map_err(|source| BenchError::ParamFile {
        path: path.to_path_buf(),
        source,
    })
}
