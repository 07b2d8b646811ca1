//! Built-in point-neuron network used when no external engine is linked.
//!
//! Leaky integrate-and-fire neurons with fixed-indegree random connectivity,
//! background Poisson or DC drive, and recurrent spikes delivered with a
//! one-step delay. Everything is derived from `master_seed`, so two runs with
//! the same parameters produce the same spikes.
//!
//! The nested-loop algorithm selection is recorded but does not change how
//! this network iterates.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Poisson};
use rayon::prelude::*;
use thiserror::Error;
use tracing::{debug, info};

use crate::driver::Network;
use crate::params::{NetParams, NeuronParams, SimParams, StimParams};
use crate::NestedLoopAlgo;

#[derive(Debug, Error, PartialEq)]
pub enum ReferenceError {
    #[error("invalid network parameters: {0}")]
    InvalidParams(String),
    #[error("network nodes were already created")]
    AlreadyCreated,
    #[error("network nodes have not been created")]
    NotCreated,
    #[error("network is already connected")]
    AlreadyConnected,
    #[error("network has not been connected")]
    NotConnected,
    #[error("invalid simulation duration: {0} ms")]
    InvalidDuration(f64),
}

/// Mutable per-neuron state, allocated by `create`.
#[derive(Debug, Clone)]
struct NeuronState {
    v: Vec<f64>,
    refractory_steps: Vec<u32>,
    /// Recurrent input arriving on the next step.
    pending: Vec<f64>,
}

/// Outgoing edges in compressed sparse row layout.
#[derive(Debug, Clone)]
struct Connectivity {
    offsets: Vec<usize>,
    targets: Vec<u32>,
}

impl Connectivity {
    fn targets_of(&self, source: usize) -> &[u32] {
        &self.targets[self.offsets[source]..self.offsets[source + 1]]
    }
}

#[derive(Debug)]
pub struct ReferenceNetwork {
    sim: SimParams,
    net: NetParams,
    stim: StimParams,
    algo: NestedLoopAlgo,
    sizes: Vec<usize>,
    /// Synaptic weight of every outgoing edge of a neuron.
    source_weight: Vec<f64>,
    rng: ChaCha8Rng,
    state: Option<NeuronState>,
    connectivity: Option<Connectivity>,
    time_ms: f64,
    spike_count: u64,
}

fn per_target_seed(master_seed: u64, target: usize) -> u64 {
    master_seed
        .wrapping_add(target as u64)
        .wrapping_mul(0x517cc1b727220a95)
}

/// Largest per-step background mean whose counts stay exact in `f64` (2^53).
const MAX_BACKGROUND_MEAN: f64 = 9_007_199_254_740_992.0;

/// Expected number of background input events per neuron and time step.
fn background_mean(sim: &SimParams, net: &NetParams) -> f64 {
    net.bg_rate * net.k_ext * sim.sim_resolution / 1000.0
}

fn validate(sim: &SimParams, net: &NetParams, stim: &StimParams) -> Result<(), ReferenceError> {
    let invalid = |msg: String| Err(ReferenceError::InvalidParams(msg));

    let dt = sim.sim_resolution;
    if !(dt.is_finite() && dt > 0.0) {
        return invalid(format!("sim_resolution must be positive (got {dt})"));
    }
    for (name, t) in [("t_presim", sim.t_presim), ("t_sim", sim.t_sim)] {
        if !t.is_finite() || t < 0.0 {
            return invalid(format!("{name} must be finite and non-negative (got {t})"));
        }
    }
    if net.populations.is_empty() {
        return invalid("at least one population is required".to_string());
    }
    if !(net.n_scaling.is_finite() && net.n_scaling > 0.0) {
        return invalid(format!("n_scaling must be positive (got {})", net.n_scaling));
    }
    let total = net
        .scaled_sizes()
        .into_iter()
        .try_fold(0usize, usize::checked_add)
        .filter(|&n| n <= u32::MAX as usize);
    if total.is_none() {
        return invalid("scaled network exceeds u32::MAX neurons".to_string());
    }
    let NeuronParams {
        tau_m,
        v_th,
        v_reset,
        t_ref,
    } = net.neuron;
    if !(tau_m.is_finite() && tau_m > 0.0) {
        return invalid(format!("tau_m must be positive (got {tau_m})"));
    }
    if !(t_ref.is_finite() && t_ref >= 0.0) {
        return invalid(format!("t_ref must be non-negative (got {t_ref})"));
    }
    if v_reset.is_nan() || v_th.is_nan() || v_reset >= v_th {
        return invalid(format!("v_reset ({v_reset}) must lie below v_th ({v_th})"));
    }
    if !(v_th - v_reset).is_finite() {
        return invalid(format!("v_th - v_reset overflows (v_reset {v_reset}, v_th {v_th})"));
    }
    if net.poisson_input {
        if !(net.bg_rate >= 0.0 && net.k_ext >= 0.0) {
            return invalid("bg_rate and k_ext must be non-negative".to_string());
        }
        let mean = background_mean(sim, net);
        if !mean.is_finite() || mean > MAX_BACKGROUND_MEAN {
            return invalid(format!("background input mean per step too large (got {mean})"));
        }
    }
    if stim.dc_input && !(stim.dc_amplitude.is_finite() && stim.dc_dur >= 0.0) {
        return invalid(
            "dc stimulus needs a finite amplitude and non-negative duration".to_string(),
        );
    }
    Ok(())
}

impl ReferenceNetwork {
    pub fn num_neurons(&self) -> usize {
        self.sizes.iter().sum()
    }

    /// Instantiated size of each population.
    pub fn population_sizes(&self) -> &[usize] {
        &self.sizes
    }

    pub fn num_connections(&self) -> usize {
        self.connectivity.as_ref().map_or(0, |c| c.targets.len())
    }

    pub fn algo(&self) -> NestedLoopAlgo {
        self.algo
    }

    pub fn spike_count(&self) -> u64 {
        self.spike_count
    }

    /// Network time advanced so far, in milliseconds.
    pub fn time_ms(&self) -> f64 {
        self.time_ms
    }

    /// Mean firing rate over all simulated time, in Hz.
    pub fn mean_rate_hz(&self) -> f64 {
        let n = self.num_neurons();
        if n == 0 || self.time_ms <= 0.0 {
            return 0.0;
        }
        self.spike_count as f64 / (n as f64 * self.time_ms / 1000.0)
    }

    /// Membrane potentials, once created.
    pub fn potentials(&self) -> Option<&[f64]> {
        self.state.as_ref().map(|s| s.v.as_slice())
    }

    fn external_drive(&self) -> Result<Option<Poisson<f64>>, ReferenceError> {
        if !self.net.poisson_input {
            return Ok(None);
        }
        let lambda = background_mean(&self.sim, &self.net);
        if !lambda.is_finite() || lambda > MAX_BACKGROUND_MEAN {
            return Err(ReferenceError::InvalidParams(format!(
                "background input mean per step too large (got {lambda})"
            )));
        }
        if lambda <= 0.0 {
            return Ok(None);
        }
        Poisson::new(lambda)
            .map(Some)
            .map_err(|e| ReferenceError::InvalidParams(e.to_string()))
    }
}

impl Network for ReferenceNetwork {
    type Error = ReferenceError;

    fn initialize(
        sim: &SimParams,
        net: &NetParams,
        stim: &StimParams,
    ) -> Result<Self, Self::Error> {
        validate(sim, net, stim)?;

        let sizes = net.scaled_sizes();
        let inhibitory_weight = -net.g * net.weight;
        let source_weight = net
            .populations
            .iter()
            .zip(&sizes)
            .flat_map(|(pop, &n)| {
                let w = if pop.excitatory {
                    net.weight
                } else {
                    inhibitory_weight
                };
                std::iter::repeat(w).take(n)
            })
            .collect();

        debug!(populations = ?sizes, "reference network initialized");

        Ok(Self {
            sim: sim.clone(),
            net: net.clone(),
            stim: stim.clone(),
            algo: NestedLoopAlgo::default(),
            sizes,
            source_weight,
            rng: ChaCha8Rng::seed_from_u64(sim.master_seed),
            state: None,
            connectivity: None,
            time_ms: 0.0,
            spike_count: 0,
        })
    }

    fn set_algo(&mut self, algo: NestedLoopAlgo) -> Result<(), Self::Error> {
        debug!(
            algo = algo.name(),
            id = algo.id(),
            "nested loop algorithm selected"
        );
        self.algo = algo;
        Ok(())
    }

    fn create(&mut self) -> Result<(), Self::Error> {
        if self.state.is_some() {
            return Err(ReferenceError::AlreadyCreated);
        }
        let n = self.num_neurons();
        let NeuronParams { v_th, v_reset, .. } = self.net.neuron;
        let v = (0..n).map(|_| self.rng.gen_range(v_reset..v_th)).collect();

        self.state = Some(NeuronState {
            v,
            refractory_steps: vec![0; n],
            pending: vec![0.0; n],
        });
        info!(neurons = n, "nodes created");
        Ok(())
    }

    fn connect(&mut self) -> Result<(), Self::Error> {
        if self.state.is_none() {
            return Err(ReferenceError::NotCreated);
        }
        if self.connectivity.is_some() {
            return Err(ReferenceError::AlreadyConnected);
        }

        let n = self.num_neurons();
        let k = self.net.indegree;
        let seed = self.sim.master_seed;

        let incoming: Vec<Vec<u32>> = (0..n)
            .into_par_iter()
            .map(|target| {
                let mut rng = ChaCha8Rng::seed_from_u64(per_target_seed(seed, target));
                (0..k).map(|_| rng.gen_range(0..n) as u32).collect()
            })
            .collect();

        // Transpose incoming lists into outgoing CSR.
        let mut offsets = vec![0usize; n + 1];
        for sources in &incoming {
            for &s in sources {
                offsets[s as usize + 1] += 1;
            }
        }
        for i in 0..n {
            offsets[i + 1] += offsets[i];
        }
        let mut cursor = offsets[..n].to_vec();
        let mut targets = vec![0u32; offsets[n]];
        for (target, sources) in incoming.iter().enumerate() {
            for &s in sources {
                let slot = &mut cursor[s as usize];
                targets[*slot] = target as u32;
                *slot += 1;
            }
        }

        info!(connections = targets.len(), "network connected");
        self.connectivity = Some(Connectivity { offsets, targets });
        Ok(())
    }

    fn simulate(&mut self, duration_ms: f64) -> Result<(), Self::Error> {
        if !duration_ms.is_finite() || duration_ms < 0.0 {
            return Err(ReferenceError::InvalidDuration(duration_ms));
        }
        let poisson = self.external_drive()?;

        let dt = self.sim.sim_resolution;
        let steps = (duration_ms / dt).round() as u64;
        let NeuronParams {
            tau_m,
            v_th,
            v_reset,
            t_ref,
        } = self.net.neuron;
        let decay = (-dt / tau_m).exp();
        let ref_steps = (t_ref / dt).round() as u32;
        let w_ext = self.net.weight;
        let dc_window = self
            .stim
            .dc_input
            .then(|| (self.stim.dc_start, self.stim.dc_start + self.stim.dc_dur));
        let dc_step = self.stim.dc_amplitude * dt;

        let conn = self
            .connectivity
            .as_ref()
            .ok_or(ReferenceError::NotConnected)?;
        let state = self.state.as_mut().ok_or(ReferenceError::NotCreated)?;
        let rng = &mut self.rng;
        let source_weight = &self.source_weight;

        let mut spikes: Vec<usize> = Vec::new();
        let mut window_spikes = 0u64;
        let mut t = self.time_ms;

        for _ in 0..steps {
            let dc = match dc_window {
                Some((start, end)) if t >= start && t < end => dc_step,
                _ => 0.0,
            };

            for i in 0..state.v.len() {
                let mut input = std::mem::take(&mut state.pending[i]) + dc;
                if let Some(p) = &poisson {
                    input += w_ext * p.sample(&mut *rng);
                }

                if state.refractory_steps[i] > 0 {
                    state.refractory_steps[i] -= 1;
                    state.v[i] = v_reset;
                    continue;
                }

                let v = state.v[i] * decay + input;
                if v >= v_th {
                    state.v[i] = v_reset;
                    state.refractory_steps[i] = ref_steps;
                    spikes.push(i);
                } else {
                    state.v[i] = v;
                }
            }

            for &src in &spikes {
                let w = source_weight[src];
                for &target in conn.targets_of(src) {
                    state.pending[target as usize] += w;
                }
            }
            window_spikes += spikes.len() as u64;
            spikes.clear();
            t += dt;
        }

        self.time_ms += steps as f64 * dt;
        self.spike_count += window_spikes;
        info!(
            duration_ms,
            steps,
            spikes = window_spikes,
            mean_rate_hz = self.mean_rate_hz(),
            "simulation window complete"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::ParamSet;
    use tempfile::tempdir;

    fn small_params(seed: u64) -> ParamSet {
        let mut params = ParamSet::default();
        params.sim.master_seed = seed;
        params.net.n_scaling = 0.005;
        params.net.indegree = 20;
        params
    }

    fn init(params: &ParamSet) -> Result<ReferenceNetwork, ReferenceError> {
        ReferenceNetwork::initialize(&params.sim, &params.net, &params.stim)
    }

    fn build(params: &ParamSet) -> ReferenceNetwork {
        let mut net = init(params).unwrap();
        net.create().unwrap();
        net.connect().unwrap();
        net
    }

    /// Load network parameters from a JSON file the way the binary does.
    fn load_net(json: &str) -> ParamSet {
        let dir = tempdir().unwrap();
        let path = dir.path().join("net.json");
        std::fs::write(&path, json).unwrap();
        ParamSet::load(None, Some(&path), None).unwrap()
    }

    fn assert_invalid(result: Result<ReferenceNetwork, ReferenceError>) {
        match result {
            Err(ReferenceError::InvalidParams(_)) => {}
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("parameters were accepted"),
        }
    }

    #[test]
    fn test_sizes_and_connections() {
        let params = small_params(1);
        let net = build(&params);
        let expected: usize = params.net.scaled_sizes().iter().sum();
        assert_eq!(net.num_neurons(), expected);
        assert_eq!(net.num_connections(), expected * 20);
        assert_eq!(net.population_sizes().len(), 8);
    }

    #[test]
    fn test_same_seed_same_activity() {
        let params = small_params(7);
        let mut a = build(&params);
        let mut b = build(&params);
        a.simulate(50.0).unwrap();
        b.simulate(50.0).unwrap();

        assert_eq!(a.spike_count(), b.spike_count());
        assert_eq!(a.potentials(), b.potentials());
        assert_eq!(
            a.connectivity.as_ref().unwrap().targets,
            b.connectivity.as_ref().unwrap().targets
        );
    }

    #[test]
    fn test_different_seed_different_connectivity() {
        let a = build(&small_params(1));
        let b = build(&small_params(2));
        assert_ne!(
            a.connectivity.as_ref().unwrap().targets,
            b.connectivity.as_ref().unwrap().targets
        );
    }

    #[test]
    fn test_background_drive_produces_spikes() {
        let mut net = build(&small_params(3));
        net.simulate(100.0).unwrap();
        assert!(net.spike_count() > 0);
        assert!(net.mean_rate_hz() > 0.0);
        assert!((net.time_ms() - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_silent_without_input() {
        let mut params = small_params(3);
        params.net.poisson_input = false;
        let mut net = build(&params);
        // Start every neuron at rest so nothing can reach threshold.
        net.state.as_mut().unwrap().v.fill(0.0);
        net.simulate(20.0).unwrap();
        assert_eq!(net.spike_count(), 0);
    }

    #[test]
    fn test_dc_stimulus_drives_activity() {
        let mut params = small_params(4);
        params.net.poisson_input = false;
        params.stim.dc_input = true;
        params.stim.dc_start = 0.0;
        params.stim.dc_dur = 50.0;
        params.stim.dc_amplitude = 5.0;
        let mut net = build(&params);
        net.simulate(50.0).unwrap();
        assert!(net.spike_count() > 0);
    }

    #[test]
    fn test_phase_order_enforced() {
        let mut net = init(&small_params(5)).unwrap();
        assert_eq!(net.connect(), Err(ReferenceError::NotCreated));
        net.create().unwrap();
        assert_eq!(net.create(), Err(ReferenceError::AlreadyCreated));
        assert_eq!(net.simulate(1.0), Err(ReferenceError::NotConnected));
        net.connect().unwrap();
        assert_eq!(net.connect(), Err(ReferenceError::AlreadyConnected));
        net.simulate(0.0).unwrap();
        assert_eq!(net.time_ms(), 0.0);
    }

    #[test]
    fn test_invalid_duration() {
        let mut net = build(&small_params(6));
        let err = net.simulate(-1.0).unwrap_err();
        assert_eq!(err, ReferenceError::InvalidDuration(-1.0));
        assert!(matches!(
            net.simulate(f64::INFINITY),
            Err(ReferenceError::InvalidDuration(_))
        ));
    }

    #[test]
    fn test_invalid_params_rejected() {
        let mut params = small_params(1);
        params.sim.sim_resolution = 0.0;
        assert_invalid(init(&params));

        let mut params = small_params(1);
        params.net.populations.clear();
        assert_invalid(init(&params));

        let mut params = small_params(1);
        params.net.neuron.v_reset = 20.0;
        assert_invalid(init(&params));
    }

    #[test]
    fn test_overflowing_voltage_span_rejected() {
        let json = r#"{"n_scaling": 0.001, "neuron": {"v_reset": -1e308, "v_th": 1e308}}"#;
        let params = load_net(json);
        assert!(params.net.neuron.v_reset < params.net.neuron.v_th);
        assert_invalid(init(&params));
    }

    #[test]
    fn test_unbounded_background_rate_rejected() {
        let params = load_net(r#"{"n_scaling": 0.001, "bg_rate": 1e300, "k_ext": 1e300}"#);
        assert_invalid(init(&params));

        // The same rates are fine when background input is off.
        let mut params = params;
        params.net.poisson_input = false;
        init(&params).unwrap();
    }

    #[test]
    fn test_background_rate_checked_again_at_simulate() {
        let mut net = build(&small_params(8));
        net.net.bg_rate = f64::INFINITY;
        assert!(matches!(
            net.simulate(1.0),
            Err(ReferenceError::InvalidParams(_))
        ));
        assert_eq!(net.time_ms(), 0.0);
    }

    #[test]
    fn test_neuron_count_must_fit_u32() {
        let mut params = small_params(1);
        params.net.n_scaling = 1e6;
        assert_invalid(init(&params));
    }

    #[test]
    fn test_algo_recorded() {
        let mut net = init(&small_params(1)).unwrap();
        assert_eq!(net.algo(), NestedLoopAlgo::BlockStep);
        net.set_algo(NestedLoopAlgo::Frame1D).unwrap();
        assert_eq!(net.algo(), NestedLoopAlgo::Frame1D);
    }
}
