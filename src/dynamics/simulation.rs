use crate::dynamics::decoherence::*;
use crate::dynamics::dynamic_routines::*;
use crate::dynamics::hopping_routines::*;
use crate::dynamics::schroedinger_integration::propagate_electronic;
use crate::dynamics::state_tracking::{cache_basis_transforms, track_states};
use crate::error::DynamicsError;
use crate::initialization::parameters::*;
use crate::initialization::simulation::resolve_thermostat_dofs;
use crate::initialization::Simulation;
use crate::interface::HamiltonianProvider;
use log::{debug, trace};
use ndarray::prelude::*;
use ndarray_linalg::c64;

/// Diagnostics of one step.
#[derive(Clone, Debug)]
pub struct StepReport {
    /// Hop decision of every trajectory.
    pub hops: Vec<HopDecision>,
    /// Hop proposal probabilities of every trajectory.
    pub probabilities: Vec<Array1<f64>>,
}

impl StepReport {
    pub fn number_of_hops(&self) -> usize {
        self.hops
            .iter()
            .filter(|hop| hop.outcome == HopOutcome::Accepted)
            .count()
    }

    pub fn number_of_frustrated_hops(&self) -> usize {
        self.hops
            .iter()
            .filter(|hop| hop.outcome == HopOutcome::Frustrated)
            .count()
    }
}

impl Simulation {
    fn number_of_handles(&self, prms: &ControlParameters) -> usize {
        if prms.reduced_ensemble {
            1
        } else {
            self.state.ntraj
        }
    }

    fn check_provider(&self, ham: &dyn HamiltonianProvider, nham: usize) -> Result<(), DynamicsError> {
        if ham.ndia() != self.state.ndia || ham.nadi() != self.state.nadi {
            return Err(DynamicsError::mismatch(format!(
                "the provider has {} diabatic and {} adiabatic states, the ensemble {} and {}",
                ham.ndia(),
                ham.nadi(),
                self.state.ndia,
                self.state.nadi
            )));
        }
        if ham.ntraj() < nham {
            return Err(DynamicsError::mismatch(format!(
                "the provider serves {} trajectories, {} are required",
                ham.ntraj(),
                nham
            )));
        }
        Ok(())
    }

    /// Compute all electronic quantities at the initial geometries and derive the amplitudes
    /// of the representation that is not propagated.
    pub fn initialize(&mut self, ham: &mut dyn HamiltonianProvider) -> Result<(), DynamicsError> {
        let prms: ControlParameters = self.parameters()?;
        let nham: usize = self.number_of_handles(&prms);
        self.check_provider(ham, nham)?;
        ham.update_geometry(self.state.q.view())?;
        ham.update_momenta(self.state.p.view(), self.state.inv_m.view())?;
        self.state
            .update_amplitudes(prms.rep_tdse, ham, prms.reduced_ensemble);
        self.prev_ham_dia = (0..nham).map(|idx| ham.ham_dia(idx).to_owned()).collect();
        Ok(())
    }

    /// Integrate the electronic amplitudes over half a nuclear step in `num_el` substeps.
    fn propagate_electrons_half_step(
        &mut self,
        ham: &dyn HamiltonianProvider,
        prms: &ControlParameters,
    ) -> Result<(), DynamicsError> {
        let nham: usize = self.number_of_handles(prms);
        let hvibs: Vec<Array2<c64>> = (0..nham)
            .map(|idx| match prms.rep_tdse {
                Representation::Diabatic => ham.hvib_dia(idx).to_owned(),
                Representation::Adiabatic => ham.hvib_adi(idx).to_owned(),
            })
            .collect();
        let dt_el: f64 = 0.5 * prms.dt / prms.num_el as f64;
        let ampl: &mut Array2<c64> = self.state.amplitudes_mut(prms.rep_tdse);
        for _ in 0..prms.num_el {
            propagate_electronic(dt_el, ampl, &hvibs, prms.integrator, prms.reduced_ensemble)?;
        }
        Ok(())
    }

    fn nuclear_forces(&self, ham: &dyn HamiltonianProvider, prms: &ControlParameters) -> Array2<f64> {
        let mut forces: Array2<f64> = effective_forces(
            ham,
            &self.state,
            prms.force_method,
            prms.rep_tdse,
            prms.reduced_ensemble,
        );
        if prms.entanglement == Entanglement::Ethd3 {
            forces += &ethd3_forces(self.state.q.view(), self.state.inv_m.view(), prms.ethd3_alpha);
        }
        forces
    }

    fn kick(&mut self, ham: &dyn HamiltonianProvider, prms: &ControlParameters) {
        let forces: Array2<f64> = self.nuclear_forces(ham, prms);
        half_kick(&mut self.state.p, forces.view(), prms.dt);
        apply_constraints(&mut self.state.p, &prms.constrained_dofs);
    }

    /// Scale the thermostatted momenta of every trajectory over half a step.
    fn thermostat_scaling(&mut self, prms: &ControlParameters, dofs: &[usize]) {
        for (traj, thermostat) in self.thermostats.iter().enumerate() {
            let factor: f64 = thermostat.vel_scale(0.5 * prms.dt);
            scale_momenta(&mut self.state.p, traj, dofs, factor);
        }
    }

    fn check_thermostats(&self, dofs: &[usize]) -> Result<(), DynamicsError> {
        if self.thermostats.len() != self.state.ntraj {
            return Err(DynamicsError::mismatch(format!(
                "{} thermostats for {} trajectories",
                self.thermostats.len(),
                self.state.ntraj
            )));
        }
        if let Some(thermostat) = self.thermostats.iter().find(|th| th.ndof() != dofs.len()) {
            return Err(DynamicsError::mismatch(format!(
                "the thermostat couples {} degrees of freedom, but {} are thermostatted",
                thermostat.ndof(),
                dofs.len()
            )));
        }
        Ok(())
    }

    /// Recompute the amplitudes that are not propagated after the adiabatic ones were changed.
    fn sync_diabatic_amplitudes(&mut self, ham: &dyn HamiltonianProvider, prms: &ControlParameters) {
        self.state
            .update_amplitudes(Representation::Adiabatic, ham, prms.reduced_ensemble);
    }

    /// Decoherence corrections that act before the hop decision.
    fn decoherence_before_hopping(
        &mut self,
        ham: &dyn HamiltonianProvider,
        prms: &ControlParameters,
    ) -> Result<(), DynamicsError> {
        match prms.decoherence_algo {
            DecoherenceMethod::Sdm => {
                let rates: Vec<Array2<f64>> = decoherence_rates(prms, ham, &self.state)?;
                sdm(
                    &mut self.state.ampl_adi,
                    prms.dt,
                    &self.state.act_states,
                    &rates,
                    prms.sdm_norm_tolerance,
                );
            }
            DecoherenceMethod::Bcsh => {
                let events: Vec<Vec<bool>> = wp_reversal_events(prms, ham, &self.state);
                self.state.reversal_events = events.iter().map(|flags| flags.contains(&true)).collect();
                bcsh(&mut self.state.ampl_adi, &events, &self.state.act_states);
            }
            DecoherenceMethod::Mfsd => {
                let rates: Vec<Array2<f64>> = decoherence_rates(prms, ham, &self.state)?;
                mfsd(prms, ham, &mut self.state, &rates, &mut self.rng);
            }
            _ => return Ok(()),
        }
        renormalize(&mut self.state.ampl_adi);
        self.sync_diabatic_amplitudes(ham, prms);
        Ok(())
    }

    /// Hop decision of every trajectory followed by the corrections that depend on it.
    fn surface_hopping(
        &mut self,
        ham: &dyn HamiltonianProvider,
        prms: &ControlParameters,
        populations_start: ArrayView2<f64>,
    ) -> StepReport {
        let ntraj: usize = self.state.ntraj;
        if prms.tsh_method == HoppingMethod::Off {
            return StepReport {
                hops: self.state.act_states.iter().map(|&a| HopDecision::no_hop(a)).collect(),
                probabilities: vec![Array1::zeros(self.state.nadi); ntraj],
            };
        }

        let probabilities: Vec<Array1<f64>> = (0..ntraj)
            .map(|traj| {
                hop_proposal_probabilities(
                    prms,
                    ham,
                    &self.state,
                    traj,
                    populations_start.column(traj),
                    &self.prev_ham_dia,
                )
            })
            .collect();
        let old_states: Vec<usize> = self.state.act_states.clone();
        let proposed: Vec<usize> = propose_hops(&probabilities, &old_states, &mut self.rng);
        let accepted: Vec<usize> = accept_hops(prms, ham, &self.state, &proposed, &mut self.rng);
        let hops: Vec<HopDecision> = handle_hops_nuclear(prms, ham, &mut self.state, &proposed, &accepted);

        match prms.decoherence_algo {
            DecoherenceMethod::Instantaneous => instantaneous_decoherence(
                &mut self.state.ampl_adi,
                &self.state.act_states,
                &proposed,
                &old_states,
                prms.instantaneous_variant,
                prms.collapse_option,
            ),
            DecoherenceMethod::Afssh => afssh(prms, ham, &mut self.state, &mut self.rng),
            _ => return StepReport { hops, probabilities },
        }
        renormalize(&mut self.state.ampl_adi);
        self.sync_diabatic_amplitudes(ham, prms);
        StepReport { hops, probabilities }
    }

    /// Propagate the whole ensemble by one nuclear time step.
    ///
    /// The step is a velocity Verlet integration of the nuclei that is symmetrically
    /// surrounded by two half steps of the electronic amplitudes. Afterwards the decoherence
    /// corrections are applied and the hop decision is made.
    pub fn compute_dynamics(
        &mut self,
        ham: &mut dyn HamiltonianProvider,
    ) -> Result<StepReport, DynamicsError> {
        let prms: ControlParameters = self.parameters()?;
        let nham: usize = self.number_of_handles(&prms);
        let is_nvt: bool = prms.ensemble == EnsembleType::Nvt;
        let thermostat_dofs: Vec<usize> = resolve_thermostat_dofs(&prms, self.state.ndof);
        if is_nvt {
            self.check_thermostats(&thermostat_dofs)?;
        }
        self.check_provider(ham, nham)?;

        // diabatic Hamiltonians and populations at the start of the step
        self.prev_ham_dia = (0..nham).map(|idx| ham.ham_dia(idx).to_owned()).collect();
        let mut ampl_start: Array2<c64> = self.state.ampl_adi.clone();
        let uprev: Option<Vec<Array2<c64>>> = cache_basis_transforms(ham, &prms, self.state.ntraj);

        // first electronic half step
        ham.update_momenta(self.state.p.view(), self.state.inv_m.view())?;
        self.propagate_electrons_half_step(ham, &prms)?;

        // nuclear half kick and drift
        if is_nvt {
            self.thermostat_scaling(&prms, &thermostat_dofs);
        }
        self.kick(ham, &prms);
        let gamma: Option<Array2<f64>> = match prms.entanglement {
            Entanglement::Ethd3 => Some(ethd3_friction(self.state.p.view(), prms.ethd3_beta)),
            Entanglement::None => None,
        };
        drift(
            &mut self.state.q,
            self.state.p.view(),
            self.state.inv_m.view(),
            prms.dt,
            gamma.as_ref().map(|g| g.view()),
        );
        ham.update_geometry(self.state.q.view())?;

        // follow the adiabatic states to the new geometry
        let step_projectors: Vec<Array2<c64>> =
            track_states(&mut self.state, ham, uprev.as_deref(), &prms)?;
        if !step_projectors.is_empty() {
            for (traj, mut column) in ampl_start.axis_iter_mut(Axis(1)).enumerate() {
                let t_mat: &Array2<c64> = &step_projectors[ham_index(traj, prms.reduced_ensemble)];
                let tracked: Array1<c64> = t_mat.dot(&column);
                column.assign(&tracked);
            }
        }

        // second nuclear half kick
        ham.update_momenta(self.state.p.view(), self.state.inv_m.view())?;
        if is_nvt {
            for (traj, thermostat) in self.thermostats.iter_mut().enumerate() {
                let ekin: f64 = self.state.kinetic_energy_of(traj, &thermostat_dofs);
                thermostat.propagate(prms.dt, ekin, 0.0, 0.0);
            }
        }
        self.kick(ham, &prms);
        if is_nvt {
            self.thermostat_scaling(&prms, &thermostat_dofs);
        }

        // second electronic half step
        ham.update_momenta(self.state.p.view(), self.state.inv_m.view())?;
        self.propagate_electrons_half_step(ham, &prms)?;
        self.state
            .update_amplitudes(prms.rep_tdse, ham, prms.reduced_ensemble);

        self.decoherence_before_hopping(ham, &prms)?;

        let populations_start: Array2<f64> = ampl_start.mapv(|c| c.norm_sqr());
        let report: StepReport = self.surface_hopping(ham, &prms, populations_start.view());

        self.actual_time += prms.dt;
        self.step += 1;
        debug!(
            "step {}: {} hops, {} frustrated",
            self.step,
            report.number_of_hops(),
            report.number_of_frustrated_hops()
        );
        trace!("active states: {:?}", self.state.act_states);
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::initialization::ensemble::EnsembleState;
    use crate::initialization::DynamicConfiguration;
    use crate::interface::model::{ModelHamiltonian, ModelKind};
    use approx::assert_abs_diff_eq;

    fn crossing(v: f64) -> ModelKind {
        ModelKind::Crossing {
            x0: 1.0,
            k: 0.1,
            d: -0.1,
            v,
        }
    }

    fn ensemble(ntraj: usize, x: f64, p: f64) -> EnsembleState {
        let mut state: EnsembleState = EnsembleState::new(1, 2, 2, ntraj);
        state.q.fill(x);
        state.p.fill(p);
        state.inv_m = array![0.01];
        state
    }

    fn norms(ampl: &Array2<c64>) -> Vec<f64> {
        ampl.axis_iter(Axis(1))
            .map(|c| c.iter().map(|x| x.norm_sqr()).sum::<f64>())
            .collect()
    }

    fn run(
        config: DynamicConfiguration,
        state: EnsembleState,
        kind: ModelKind,
        nsteps: usize,
    ) -> (Simulation, Vec<StepReport>) {
        let ntraj: usize = state.ntraj;
        let mut ham: ModelHamiltonian = ModelHamiltonian::new(kind, 1, ntraj);
        let mut simulation: Simulation = Simulation::new(config, state).unwrap();
        simulation.initialize(&mut ham).unwrap();
        let reports: Vec<StepReport> = (0..nsteps)
            .map(|_| simulation.compute_dynamics(&mut ham).unwrap())
            .collect();
        (simulation, reports)
    }

    #[test]
    fn uncoupled_states_keep_the_active_state() {
        let mut config: DynamicConfiguration = DynamicConfiguration::default();
        config.hopping.tsh_method = -1;
        let mut state: EnsembleState = ensemble(1, -1.0, 2.0);
        state.set_initial_state(1);
        let (simulation, reports) = run(config, state, crossing(0.0), 100);
        assert!(reports
            .iter()
            .all(|report| report.hops[0].outcome == HopOutcome::NoHop));
        assert_eq!(simulation.state.act_states, vec![1]);
        assert_abs_diff_eq!(norms(&simulation.state.ampl_adi)[0], 1.0, epsilon = 1e-6);
        assert_abs_diff_eq!(norms(&simulation.state.ampl_dia)[0], 1.0, epsilon = 1e-6);
        assert_eq!(simulation.step, 100);
    }

    #[test]
    fn hop_to_the_ground_state_conserves_energy() {
        let config: DynamicConfiguration = DynamicConfiguration::default();
        let mut state: EnsembleState = ensemble(2, 0.0, 5.0);
        state.set_initial_state(1);
        let c_0: f64 = 0.99_f64.sqrt();
        state.ampl_adi = array![
            [c64::new(c_0, 0.0), c64::new(c_0, 0.0)],
            [c64::new(0.0, 0.1), c64::new(0.0, -0.1)]
        ];
        let (_simulation, reports) = run(config, state, crossing(0.05), 200);
        let hops: Vec<&HopDecision> = reports
            .iter()
            .flat_map(|report| report.hops.iter())
            .filter(|hop| {
                hop.outcome == HopOutcome::Accepted && hop.initial_state == 1 && hop.final_state == 0
            })
            .collect();
        assert!(!hops.is_empty());
        for hop in hops {
            assert_abs_diff_eq!(hop.energy_before, hop.energy_after, epsilon = 1e-8);
        }
        for report in reports.iter() {
            for g in report.probabilities.iter() {
                assert!(g.iter().all(|&x| (0.0..=1.0).contains(&x)));
                assert!(g.sum() <= 1.0 + 1e-12);
            }
        }
    }

    #[test]
    fn fixed_seed_reproduces_the_run() {
        let mut config: DynamicConfiguration = DynamicConfiguration::default();
        config.seed = 1234;
        config.decoherence.decoherence_algo = 4;
        config.decoherence.decoherence_times_type = 1;
        let make = || {
            let mut state: EnsembleState = ensemble(4, -0.2, 6.0);
            state.ampl_adi.row_mut(0).fill(c64::new(0.8, 0.0));
            state.ampl_adi.row_mut(1).fill(c64::new(0.0, 0.6));
            state
        };
        let (first, _) = run(config.clone(), make(), crossing(0.05), 60);
        let (second, _) = run(config, make(), crossing(0.05), 60);
        assert_eq!(first.state.q, second.state.q);
        assert_eq!(first.state.p, second.state.p);
        assert_eq!(first.state.act_states, second.state.act_states);
        assert_eq!(first.state.ampl_adi, second.state.ampl_adi);
    }

    #[test]
    fn every_decoherence_variant_keeps_the_norm() {
        for algo in [-1, 0, 1, 2, 3, 4] {
            let mut config: DynamicConfiguration = DynamicConfiguration::default();
            config.decoherence.decoherence_algo = algo;
            config.decoherence.decoherence_times_type = 1;
            config.hopping.momentum_rescaling_algo = 101;
            config.hopping.do_reverse = 1;
            let mut state: EnsembleState = ensemble(3, -0.5, 4.0);
            state.ampl_adi.row_mut(0).fill(c64::new(0.6, 0.0));
            state.ampl_adi.row_mut(1).fill(c64::new(0.8, 0.0));
            let (simulation, _) = run(config, state, crossing(0.05), 40);
            for norm in norms(&simulation.state.ampl_adi) {
                assert_abs_diff_eq!(norm, 1.0, epsilon = 1e-6);
            }
        }
    }

    #[test]
    fn diabatic_propagation_with_state_tracking() {
        let mut config: DynamicConfiguration = DynamicConfiguration::default();
        config.rep_tdse = 0;
        config.state_tracking.state_tracking_algo = 2;
        config.state_tracking.do_phase_correction = true;
        config.hopping.tsh_method = 2;
        let state: EnsembleState = ensemble(2, -1.0, 8.0);
        let (simulation, reports) = run(config, state, crossing(0.05), 80);
        assert_eq!(reports.len(), 80);
        for norm in norms(&simulation.state.ampl_dia) {
            assert_abs_diff_eq!(norm, 1.0, epsilon = 1e-6);
        }
        assert!(simulation.state.act_states.iter().all(|&a| a < 2));
    }

    #[test]
    fn adiabatic_tracking_on_the_periodic_model() {
        let mut config: DynamicConfiguration = DynamicConfiguration::default();
        config.state_tracking.state_tracking_algo = 1;
        config.state_tracking.do_phase_correction = true;
        config.electronic.integrator = String::from("rk4");
        config.num_electronic_substeps = 4;
        let kind: ModelKind = ModelKind::Periodic {
            k: 0.02,
            omega: 0.25,
            v: 0.005,
        };
        let (simulation, _) = run(config, ensemble(2, 0.0, 10.0), kind, 100);
        for norm in norms(&simulation.state.ampl_adi) {
            assert_abs_diff_eq!(norm, 1.0, epsilon = 1e-6);
        }
        // every projector stays unitary
        for projector in simulation.state.projectors.iter() {
            let product: Array2<c64> = projector.t().mapv(|x| x.conj()).dot(projector);
            assert_abs_diff_eq!((product[[0, 0]] - c64::new(1.0, 0.0)).norm(), 0.0, epsilon = 1e-10);
        }
    }

    #[test]
    fn thermostat_with_wrong_dof_count_is_fatal() {
        let mut config: DynamicConfiguration = DynamicConfiguration::default();
        config.nuclear.ensemble = 1;
        config.thermostat.degrees_of_freedom = Some(3);
        let mut ham: ModelHamiltonian = ModelHamiltonian::new(crossing(0.05), 1, 1);
        let mut simulation: Simulation = Simulation::new(config, ensemble(1, 0.0, 1.0)).unwrap();
        simulation.initialize(&mut ham).unwrap();
        assert!(matches!(
            simulation.compute_dynamics(&mut ham),
            Err(DynamicsError::ConfigurationMismatch(_))
        ));
    }

    #[test]
    fn nvt_ensemble_with_entangled_trajectories() {
        let mut config: DynamicConfiguration = DynamicConfiguration::default();
        config.nuclear.ensemble = 1;
        config.nuclear.entanglement_opt = 22;
        config.nuclear.ethd3_alpha = 0.01;
        config.nuclear.ethd3_beta = 0.01;
        config.thermostat.thermostat_type = String::from("berendsen");
        let mut state: EnsembleState = ensemble(3, 0.0, 1.0);
        state.q = array![[-0.5, 0.0, 0.5]];
        let (simulation, _) = run(config, state, crossing(0.05), 20);
        assert!(simulation.state.q.iter().all(|x| x.is_finite()));
        assert!(simulation.state.p.iter().all(|x| x.is_finite()));
    }

    #[test]
    fn constrained_dof_stays_fixed() {
        let mut config: DynamicConfiguration = DynamicConfiguration::default();
        config.nuclear.constrained_dofs = vec![0];
        let (simulation, _) = run(config, ensemble(1, 0.3, 5.0), crossing(0.05), 10);
        assert_abs_diff_eq!(simulation.state.q[[0, 0]], 0.3, epsilon = 1e-12);
    }

    #[test]
    fn reduced_ensemble_follows_the_first_trajectory() {
        let mut config: DynamicConfiguration = DynamicConfiguration::default();
        config.hopping.tsh_method = -1;
        let reference_config: DynamicConfiguration = config.clone();
        config.reduced_ensemble = true;
        let mut state: EnsembleState = ensemble(3, -0.5, 4.0);
        state.q = array![[-0.5, 0.0, 0.7]];
        state.ampl_adi.row_mut(0).fill(c64::new(0.6, 0.0));
        state.ampl_adi.row_mut(1).fill(c64::new(0.0, 0.8));
        let single: EnsembleState = {
            let mut single: EnsembleState = ensemble(1, -0.5, 4.0);
            single.ampl_adi = state.ampl_adi.slice(s![.., 0..1]).to_owned();
            single
        };

        // a single provider handle serves the whole ensemble
        let mut ham: ModelHamiltonian = ModelHamiltonian::new(crossing(0.05), 1, 1);
        let mut simulation: Simulation = Simulation::new(config, state).unwrap();
        simulation.initialize(&mut ham).unwrap();
        for _ in 0..30 {
            simulation.compute_dynamics(&mut ham).unwrap();
        }
        let (reference, _) = run(reference_config, single, crossing(0.05), 30);

        let reduced: &EnsembleState = &simulation.state;
        for traj in 0..3 {
            assert_abs_diff_eq!(reduced.p[[0, traj]], reference.state.p[[0, 0]], epsilon = 1e-12);
            let difference: Array1<c64> =
                &reduced.ampl_adi.column(traj) - &reference.state.ampl_adi.column(0);
            assert!(difference.iter().all(|d| d.norm() < 1e-12));
        }
        // every trajectory moves with the same velocity from its own start
        assert_abs_diff_eq!(reduced.q[[0, 0]], reference.state.q[[0, 0]], epsilon = 1e-12);
        assert_abs_diff_eq!(reduced.q[[0, 2]] - reduced.q[[0, 0]], 1.2, epsilon = 1e-12);
    }

    #[test]
    fn norm_is_left_alone_without_decoherence() {
        let mut config: DynamicConfiguration = DynamicConfiguration::default();
        config.hopping.tsh_method = -1;
        let mut state: EnsembleState = ensemble(1, -0.5, 4.0);
        state.ampl_adi = array![[c64::new(0.6, 0.0)], [c64::new(0.0, 0.6)]];
        let (simulation, _) = run(config, state, crossing(0.05), 40);
        assert_abs_diff_eq!(norms(&simulation.state.ampl_adi)[0], 0.72, epsilon = 1e-10);
    }
}
