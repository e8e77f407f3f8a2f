use crate::constants;
use crate::dynamics::StepReport;
use crate::initialization::{Representation, Simulation};
use crate::interface::HamiltonianProvider;
use anyhow::{Context, Result};
use ndarray::prelude::*;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;

/// Snapshot of one trajectory after a nuclear step.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct TrajectoryOutput {
    pub trajectory: usize,
    pub coordinates: Vec<f64>,
    pub momenta: Vec<f64>,
    pub active_state: usize,
    pub populations: Vec<f64>,
    pub kinetic_energy: f64,
    pub potential_energy: f64,
    pub total_energy: f64,
}

/// Snapshot of the whole ensemble after a nuclear step.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct StandardOutput {
    pub step: usize,
    /// time in fs
    pub time: f64,
    pub hops: usize,
    pub frustrated_hops: usize,
    pub trajectories: Vec<TrajectoryOutput>,
}

impl StandardOutput {
    pub fn new(
        simulation: &Simulation,
        ham: &dyn HamiltonianProvider,
        report: &StepReport,
    ) -> StandardOutput {
        let state = &simulation.state;
        let reduced: bool = simulation.config.reduced_ensemble;
        let populations: Array2<f64> = state.populations(Representation::Adiabatic);
        let trajectories: Vec<TrajectoryOutput> = (0..state.ntraj)
            .map(|traj| {
                let active: usize = state.act_states[traj];
                let idx: usize = if reduced { 0 } else { traj };
                let kinetic_energy: f64 = state.kinetic_energy(traj);
                let potential_energy: f64 = ham.ham_adi(idx)[[active, active]].re;
                TrajectoryOutput {
                    trajectory: traj,
                    coordinates: state.q.column(traj).to_vec(),
                    momenta: state.p.column(traj).to_vec(),
                    active_state: active,
                    populations: populations.column(traj).to_vec(),
                    kinetic_energy,
                    potential_energy,
                    total_energy: kinetic_energy + potential_energy,
                }
            })
            .collect();

        StandardOutput {
            step: simulation.step,
            time: simulation.actual_time * constants::AU_TO_FS,
            hops: report.number_of_hops(),
            frustrated_hops: report.number_of_frustrated_hops(),
            trajectories,
        }
    }

    /// Mean population of every adiabatic state over the ensemble.
    pub fn average_populations(&self) -> Vec<f64> {
        let ntraj: usize = self.trajectories.len();
        let nstates: usize = self.trajectories.first().map_or(0, |t| t.populations.len());
        (0..nstates)
            .map(|state| {
                self.trajectories.iter().map(|t| t.populations[state]).sum::<f64>() / ntraj as f64
            })
            .collect()
    }

    /// Fraction of the trajectories whose active state is `state`.
    pub fn active_fraction(&self, state: usize) -> f64 {
        let count: usize = self
            .trajectories
            .iter()
            .filter(|t| t.active_state == state)
            .count();
        count as f64 / self.trajectories.len().max(1) as f64
    }
}

fn append_to_file(file_path: &Path, content: &str) -> Result<()> {
    if file_path.exists() {
        let file = OpenOptions::new()
            .append(true)
            .open(file_path)
            .with_context(|| format!("Unable to open {}", file_path.display()))?;
        let mut stream = BufWriter::new(file);
        stream.write_fmt(format_args!("{}", content))?;
        stream.flush()?;
    } else {
        fs::write(file_path, content)
            .with_context(|| format!("Unable to write to {}", file_path.display()))?;
    }
    Ok(())
}

/// Append the snapshot as a TOML block to `file_path`.
pub fn write_full(standard: &StandardOutput, file_path: &Path) -> Result<()> {
    let mut block: String = String::from("#############################\n");
    block.push_str(&toml::to_string(standard).context("Unable to serialize the step output")?);
    append_to_file(file_path, &block)
}

/// Append one line with the time and the ensemble averaged populations and active fractions.
pub fn write_populations(standard: &StandardOutput, file_path: &Path) -> Result<()> {
    let populations: Vec<f64> = standard.average_populations();
    let mut line: String = format!("{:12.4}", standard.time);
    for population in populations.iter() {
        line.push_str(&format!("\t{:.8}", population));
    }
    for state in 0..populations.len() {
        line.push_str(&format!("\t{:.8}", standard.active_fraction(state)));
    }
    line.push('\n');
    append_to_file(file_path, &line)
}
