use crate::initialization::{ControlParameters, Simulation};
use crate::output::StandardOutput;
use itertools::Itertools;
use log::{info, warn};
use std::fmt::Debug;

fn print_option<T: Debug>(label: &str, value: T) {
    warn!("{:>50} {:>20}", label, format!("{:?}", value));
}

pub fn print_header() {
    warn!("{:^80}", "");
    warn!("{: ^80}", "-----------------");
    warn!("{: ^80}", "RUSTY-TSH");
    warn!("{: ^80}", "-----------------");
    warn!("{: ^80}", "trajectory surface hopping dynamics");
    warn!("{:^80}", "");
}

/// Table of the resolved options of the run.
pub fn print_settings(prms: &ControlParameters, ntraj: usize, nstep: usize) {
    warn!("{:^80}", "");
    warn!("{: ^80}", "Dynamics Settings");
    warn!("{:-^80}", "");
    warn!("{:>50} {:>20}", "number of trajectories:", ntraj);
    warn!("{:>50} {:>20}", "number of nuclear steps:", nstep);
    warn!("{:>50} {:>20.4}", "nuclear time step (a.u.):", prms.dt);
    warn!("{:>50} {:>20}", "electronic substeps:", prms.num_el);
    print_option("representation:", prms.rep_tdse);
    print_option("electronic integrator:", prms.integrator);
    print_option("ensemble:", prms.ensemble);
    print_option("forces:", prms.force_method);
    print_option("hopping:", prms.tsh_method);
    print_option("hop acceptance:", prms.hop_acceptance);
    print_option("momentum rescaling:", prms.momentum_rescaling);
    print_option("decoherence:", prms.decoherence_algo);
    print_option("decoherence times:", prms.decoherence_times);
    print_option("state tracking:", prms.state_tracking);
    warn!("{:-^80}", "");
}

/// One line per step with the ensemble averages.
pub fn print_step_summary(standard: &StandardOutput) {
    let populations: Vec<f64> = standard.average_populations();
    let ntraj: f64 = standard.trajectories.len().max(1) as f64;
    let total_energy: f64 = standard
        .trajectories
        .iter()
        .map(|t| t.total_energy)
        .sum::<f64>()
        / ntraj;
    let populations: String = populations
        .iter()
        .map(|p| format!("{:8.5}", p))
        .join(" ");
    info!(
        "{:>8} {:>12.4} fs {:>16.8} Eh  hops {:>4}  frustrated {:>4}  populations {}",
        standard.step,
        standard.time,
        total_energy,
        standard.hops,
        standard.frustrated_hops,
        populations
    );
}

pub fn print_footer(simulation: &Simulation, hops: usize, frustrated: usize) {
    warn!("{:-^80}", "");
    warn!("{:>50} {:>20}", "steps:", simulation.step);
    warn!("{:>50} {:>20}", "accepted hops:", hops);
    warn!("{:>50} {:>20}", "frustrated hops:", frustrated);
    print_option("final active states:", &simulation.state.act_states);
    warn!("{:-^80}", "");
}
