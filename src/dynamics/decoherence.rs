use crate::dynamics::dynamic_routines::{adiabatic_forces, ham_index};
use crate::error::DynamicsError;
use crate::initialization::ensemble::EnsembleState;
use crate::initialization::parameters::*;
use crate::interface::HamiltonianProvider;
use log::debug;
use ndarray::prelude::*;
use ndarray_linalg::c64;
use rand::distributions::Standard;
use rand::Rng;
use rayon::prelude::*;

const NORM_DRIFT_THRESHOLD: f64 = 1.0e-10;

fn energies(ham: &dyn HamiltonianProvider, idx: usize) -> Array1<f64> {
    ham.ham_adi(idx).diag().mapv(|e| e.re)
}

/// Energy-based decoherence rates, |E_i - E_j| / (C + eps / Ekin).
pub fn edc_rates(energies: ArrayView1<f64>, ekin: f64, c_param: f64, eps_param: f64) -> Array2<f64> {
    let n: usize = energies.len();
    if ekin <= 0.0 {
        return Array2::zeros((n, n));
    }
    let denominator: f64 = c_param + eps_param / ekin;
    Array2::from_shape_fn((n, n), |(i, j)| (energies[i] - energies[j]).abs() / denominator)
}

/// Schwartz rates with the width of every state measured against the mean-field force,
/// Gamma_ij = (g_i + g_j) / 2 with g_i^2 = sum_dof inv_alpha (F_i - F_mf)^2 / 4.
pub fn schwartz_mean_field_rates(
    forces: ArrayView2<f64>,
    populations: ArrayView1<f64>,
    inv_alpha: ArrayView1<f64>,
) -> Array2<f64> {
    let n: usize = forces.nrows();
    let mean_field: Array1<f64> = populations.dot(&forces);
    let widths: Array1<f64> = Array1::from_shape_fn(n, |i| {
        forces
            .row(i)
            .iter()
            .zip(mean_field.iter())
            .zip(inv_alpha.iter())
            .map(|((f, f_mf), ia)| ia * (f - f_mf).powi(2) / 4.0)
            .sum::<f64>()
            .sqrt()
    });
    Array2::from_shape_fn((n, n), |(i, j)| {
        if i == j {
            0.0
        } else {
            0.5 * (widths[i] + widths[j])
        }
    })
}

/// Schwartz rates from the pairwise force differences,
/// Gamma_ij^2 = sum_dof inv_alpha (F_i - F_j)^2 / 4.
pub fn schwartz_pairwise_rates(forces: ArrayView2<f64>, inv_alpha: ArrayView1<f64>) -> Array2<f64> {
    let n: usize = forces.nrows();
    Array2::from_shape_fn((n, n), |(i, j)| {
        forces
            .row(i)
            .iter()
            .zip(forces.row(j).iter())
            .zip(inv_alpha.iter())
            .map(|((fi, fj), ia)| ia * (fi - fj).powi(2) / 4.0)
            .sum::<f64>()
            .sqrt()
    })
}

/// Scale the rates by the ratio of the instantaneous to the average energy gap.
pub fn dephasing_informed_correction(
    rates: &mut Array2<f64>,
    energies: ArrayView1<f64>,
    ave_gaps: ArrayView2<f64>,
) {
    for ((i, j), rate) in rates.indexed_iter_mut() {
        if ave_gaps[[i, j]] > 0.0 {
            *rate *= (energies[i] - energies[j]).abs() / ave_gaps[[i, j]];
        }
    }
}

fn require<'a, T>(value: &'a Option<T>, name: &str) -> Result<&'a T, DynamicsError> {
    value
        .as_ref()
        .ok_or_else(|| DynamicsError::mismatch(format!("{} is required but was not given", name)))
}

/// Decoherence rate matrix of every trajectory, nadi x nadi each.
pub fn decoherence_rates(
    prms: &ControlParameters,
    ham: &dyn HamiltonianProvider,
    state: &EnsembleState,
) -> Result<Vec<Array2<f64>>, DynamicsError> {
    let nadi: usize = state.nadi;
    let mut all_rates: Vec<Array2<f64>> = Vec::with_capacity(state.ntraj);
    for traj in 0..state.ntraj {
        let idx: usize = ham_index(traj, prms.reduced_ensemble);
        let mut rates: Array2<f64> = match prms.decoherence_times {
            DecoherenceTimes::Off => Array2::zeros((nadi, nadi)),
            DecoherenceTimes::Flat => {
                let rates: &Array2<f64> = require(&prms.decoherence_rates, "decoherence_rates")?;
                if rates.dim() != (nadi, nadi) {
                    return Err(DynamicsError::mismatch(format!(
                        "decoherence_rates has shape {:?} for {} adiabatic states",
                        rates.dim(),
                        nadi
                    )));
                }
                rates.clone()
            }
            DecoherenceTimes::EnergyGap => edc_rates(
                energies(ham, idx).view(),
                state.kinetic_energy(traj),
                prms.decoherence_c_param,
                prms.decoherence_eps_param,
            ),
            DecoherenceTimes::SchwartzMeanField | DecoherenceTimes::SchwartzPairwise => {
                let inv_alpha: &Array1<f64> =
                    require(&prms.schwartz_inv_alpha, "schwartz_inv_alpha")?;
                if inv_alpha.len() != state.ndof {
                    return Err(DynamicsError::mismatch(format!(
                        "schwartz_inv_alpha has {} entries for {} dofs",
                        inv_alpha.len(),
                        state.ndof
                    )));
                }
                let forces: Array2<f64> = adiabatic_forces(ham, idx, state.ndof);
                if prms.decoherence_times == DecoherenceTimes::SchwartzMeanField {
                    let populations: Array1<f64> =
                        state.ampl_adi.column(traj).mapv(|c| c.norm_sqr());
                    schwartz_mean_field_rates(forces.view(), populations.view(), inv_alpha.view())
                } else {
                    schwartz_pairwise_rates(forces.view(), inv_alpha.view())
                }
            }
        };
        if prms.dephasing_informed {
            let ave_gaps: &Array2<f64> = require(&prms.ave_gaps, "ave_gaps")?;
            dephasing_informed_correction(&mut rates, energies(ham, idx).view(), ave_gaps.view());
        }
        all_rates.push(rates);
    }
    Ok(all_rates)
}

/// Normalize every column that drifted away from unit norm.
pub fn renormalize(ampl: &mut Array2<c64>) {
    let drifts: Vec<Option<DynamicsError>> = ampl
        .axis_iter_mut(Axis(1))
        .into_par_iter()
        .enumerate()
        .map(|(traj, mut column)| {
            let norm: f64 = column.iter().map(|c| c.norm_sqr()).sum::<f64>().sqrt();
            if (norm - 1.0).abs() > NORM_DRIFT_THRESHOLD && norm > 0.0 {
                column.mapv_inplace(|c| c / norm);
                Some(DynamicsError::NormalizationDrift { traj, norm })
            } else {
                None
            }
        })
        .collect();
    for drift in drifts.into_iter().flatten() {
        debug!("{}", drift);
    }
}

/// Simple decay of mixing: every non-active amplitude decays with its rate towards the active
/// state, the active amplitude absorbs the lost population.
pub fn sdm(
    ampl: &mut Array2<c64>,
    dt: f64,
    act_states: &[usize],
    rates: &[Array2<f64>],
    tolerance: f64,
) {
    for (traj, mut c) in ampl.axis_iter_mut(Axis(1)).enumerate() {
        let active: usize = act_states[traj];
        let mut kept: f64 = 0.0;
        for (i, ci) in c.iter_mut().enumerate() {
            if i != active {
                *ci *= (-rates[traj][[i, active]] * dt).exp();
                kept += ci.norm_sqr();
            }
        }
        let pop_active: f64 = c[active].norm_sqr();
        if pop_active <= tolerance || pop_active == 0.0 {
            let norm: f64 = c.iter().map(|x| x.norm_sqr()).sum::<f64>().sqrt();
            if norm > 0.0 {
                c.mapv_inplace(|x| x / norm);
            }
        } else {
            c[active] *= ((1.0 - kept).max(0.0) / pop_active).sqrt();
        }
    }
}

fn collapse(mut c: ArrayViewMut1<c64>, target: usize, option: CollapseOption) {
    let amplitude: c64 = match option {
        CollapseOption::KeepPhase if c[target].norm() > 0.0 => c[target] / c[target].norm(),
        _ => c64::new(1.0, 0.0),
    };
    c.fill(c64::new(0.0, 0.0));
    c[target] = amplitude;
}

/// Collapse the wavefunction after the hop decision. `act_states` are the states after the
/// decision, `old_states` the ones before it.
pub fn instantaneous_decoherence(
    ampl: &mut Array2<c64>,
    act_states: &[usize],
    proposed: &[usize],
    old_states: &[usize],
    variant: InstantaneousVariant,
    option: CollapseOption,
) {
    for (traj, c) in ampl.axis_iter_mut(Axis(1)).enumerate() {
        let attempted: bool = proposed[traj] != old_states[traj];
        let accepted: bool = act_states[traj] != old_states[traj];
        let target: Option<usize> = match variant {
            InstantaneousVariant::SuccessfulHops if accepted => Some(act_states[traj]),
            InstantaneousVariant::AttemptedHops if attempted => Some(act_states[traj]),
            InstantaneousVariant::FrustratedHops if attempted && !accepted => Some(old_states[traj]),
            _ => None,
        };
        if let Some(target) = target {
            collapse(c, target, option);
        }
    }
}

/// States of every trajectory whose wavepacket would be reflected: either the state is not
/// reachable with the available kinetic energy or its force turns the momentum around within
/// one step.
pub fn wp_reversal_events(
    prms: &ControlParameters,
    ham: &dyn HamiltonianProvider,
    state: &EnsembleState,
) -> Vec<Vec<bool>> {
    (0..state.ntraj)
        .map(|traj| {
            let idx: usize = ham_index(traj, prms.reduced_ensemble);
            let active: usize = state.act_states[traj];
            let e: Array1<f64> = energies(ham, idx);
            let forces: Array2<f64> = adiabatic_forces(ham, idx, state.ndof);
            let ekin: f64 = state.kinetic_energy(traj);
            let p: ArrayView1<f64> = state.p.column(traj);
            (0..state.nadi)
                .map(|i| {
                    if i == active {
                        return false;
                    }
                    let projected: f64 = p
                        .iter()
                        .zip(forces.row(i).iter())
                        .map(|(pk, fk)| pk * (pk + fk * prms.dt))
                        .sum();
                    ekin + e[active] - e[i] < 0.0 || projected < 0.0
                })
                .collect()
        })
        .collect()
}

/// Branching-corrected surface hopping: remove the reflected states and renormalize. If no
/// population is left, the wavefunction collapses onto the active state.
pub fn bcsh(ampl: &mut Array2<c64>, events: &[Vec<bool>], act_states: &[usize]) {
    for ((mut c, flags), &active) in ampl
        .axis_iter_mut(Axis(1))
        .zip(events.iter())
        .zip(act_states.iter())
    {
        for (ci, &flag) in c.iter_mut().zip(flags.iter()) {
            if flag {
                *ci = c64::new(0.0, 0.0);
            }
        }
        let norm: f64 = c.iter().map(|x| x.norm_sqr()).sum::<f64>().sqrt();
        if norm > 0.0 {
            c.mapv_inplace(|x| x / norm);
        } else {
            collapse(c, active, CollapseOption::ResetPhase);
        }
    }
}

fn mean_field_energy(c: ArrayView1<c64>, energies: ArrayView1<f64>) -> f64 {
    c.iter().zip(energies.iter()).map(|(x, e)| x.norm_sqr() * e).sum()
}

/// Mean-field stochastic decoherence. Non-active states decohere stochastically with their
/// rates; a decoherence event either collapses the wavefunction onto the state (which then
/// becomes active) or removes the state. The change of the mean-field energy is compensated by
/// scaling the momenta.
pub fn mfsd<R: Rng>(
    prms: &ControlParameters,
    ham: &dyn HamiltonianProvider,
    state: &mut EnsembleState,
    rates: &[Array2<f64>],
    rng: &mut R,
) {
    for traj in 0..state.ntraj {
        let idx: usize = ham_index(traj, prms.reduced_ensemble);
        let e: Array1<f64> = energies(ham, idx);
        let energy_before: f64 = mean_field_energy(state.ampl_adi.column(traj), e.view());
        let mut changed: bool = false;

        for i in 0..state.nadi {
            let active: usize = state.act_states[traj];
            if i == active {
                continue;
            }
            let ksi: f64 = rng.sample(Standard);
            if ksi >= 1.0 - (-rates[traj][[i, active]] * prms.dt).exp() {
                continue;
            }
            let ksi2: f64 = rng.sample(Standard);
            let mut c: ArrayViewMut1<c64> = state.ampl_adi.column_mut(traj);
            if ksi2 < c[i].norm_sqr() {
                collapse(c, i, CollapseOption::KeepPhase);
                state.act_states[traj] = i;
            } else {
                c[i] = c64::new(0.0, 0.0);
                let norm: f64 = c.iter().map(|x| x.norm_sqr()).sum::<f64>().sqrt();
                if norm > 0.0 {
                    c.mapv_inplace(|x| x / norm);
                }
            }
            changed = true;
        }

        if changed {
            let energy_after: f64 = mean_field_energy(state.ampl_adi.column(traj), e.view());
            let ekin: f64 = state.kinetic_energy(traj);
            let target: f64 = ekin + energy_before - energy_after;
            if ekin > 0.0 && target >= 0.0 {
                let factor: f64 = (target / ekin).sqrt();
                state.p.column_mut(traj).mapv_inplace(|x| x * factor);
            }
        }
    }
}

fn moment_derivatives(
    h: &Array2<c64>,
    rho: &Array2<c64>,
    df: &Array2<c64>,
    inv_m: f64,
    dr: &Array2<c64>,
    dp: &Array2<c64>,
) -> (Array2<c64>, Array2<c64>) {
    let minus_i: c64 = c64::new(0.0, -1.0);
    let commutator = |x: &Array2<c64>| (h.dot(x) - x.dot(h)) * minus_i;
    let ddr: Array2<c64> = commutator(dr) + dp * inv_m;
    let ddp: Array2<c64> = commutator(dp) + (df.dot(rho) + rho.dot(df)) * 0.5;
    (ddr, ddp)
}

/// Advance the moments of one (trajectory, dof) pair by `dt` with a fourth-order Runge-Kutta
/// step and remove the active diagonal afterwards.
fn integrate_moments(
    h: &Array2<c64>,
    rho: &Array2<c64>,
    df: &Array2<c64>,
    inv_m: f64,
    active: usize,
    dt: f64,
    dr: &mut Array2<c64>,
    dp: &mut Array2<c64>,
) {
    let (k1r, k1p) = moment_derivatives(h, rho, df, inv_m, dr, dp);
    let (k2r, k2p) = moment_derivatives(
        h,
        rho,
        df,
        inv_m,
        &(&*dr + &(&k1r * (0.5 * dt))),
        &(&*dp + &(&k1p * (0.5 * dt))),
    );
    let (k3r, k3p) = moment_derivatives(
        h,
        rho,
        df,
        inv_m,
        &(&*dr + &(&k2r * (0.5 * dt))),
        &(&*dp + &(&k2p * (0.5 * dt))),
    );
    let (k4r, k4p) = moment_derivatives(
        h,
        rho,
        df,
        inv_m,
        &(&*dr + &(&k3r * dt)),
        &(&*dp + &(&k3p * dt)),
    );
    dr.scaled_add(c64::new(dt / 6.0, 0.0), &(k1r + &k2r * 2.0 + &k3r * 2.0 + k4r));
    dp.scaled_add(c64::new(dt / 6.0, 0.0), &(k1p + &k2p * 2.0 + &k3p * 2.0 + k4p));

    let (dr_aa, dp_aa): (c64, c64) = (dr[[active, active]], dp[[active, active]]);
    for k in 0..dr.nrows() {
        dr[[k, k]] -= dr_aa;
        dp[[k, k]] -= dp_aa;
    }
}

/// Augmented FSSH: propagate the position and momentum moments and use them for stochastic
/// resets of the moments and collapses onto the active state.
pub fn afssh<R: Rng>(
    prms: &ControlParameters,
    ham: &dyn HamiltonianProvider,
    state: &mut EnsembleState,
    rng: &mut R,
) {
    let dt_sub: f64 = prms.dt / prms.num_el as f64;
    for traj in 0..state.ntraj {
        let idx: usize = ham_index(traj, prms.reduced_ensemble);
        let active: usize = state.act_states[traj];
        let h: Array2<c64> = ham.hvib_adi(idx).to_owned();
        let rho: Array2<c64> = state.density_matrix(traj, Representation::Adiabatic);
        // full force matrices F = -dH/dR per dof
        let force_matrices: Vec<Array2<c64>> = (0..state.ndof)
            .map(|dof| ham.d1ham_adi(idx, dof).mapv(|x| -x))
            .collect();

        for (dof, force) in force_matrices.iter().enumerate() {
            let f_aa: c64 = force[[active, active]];
            let df: Array2<c64> = Array2::from_diag(&force.diag().mapv(|f| f - f_aa));
            let inv_m: f64 = state.inv_m[dof];
            let (dr, dp) = state.moments.pair_mut(traj, dof);
            for _ in 0..prms.num_el {
                integrate_moments(&h, &rho, &df, inv_m, active, dt_sub, dr, dp);
            }
        }

        for i in (0..state.nadi).filter(|&i| i != active) {
            let mut reset_sum: f64 = 0.0;
            let mut coupling_sum: f64 = 0.0;
            // only the real parts of the forces and of the position moments enter the rates
            for (dof, force) in force_matrices.iter().enumerate() {
                let dr_ii: f64 = state.moments.dr(traj, dof)[[i, i]].re;
                reset_sum += (force[[i, i]].re - force[[active, active]].re) * dr_ii;
                coupling_sum += force[[active, i]].re * dr_ii;
            }
            let gamma_reset: f64 = -0.5 * reset_sum * prms.dt;
            let gamma_collapse: f64 = gamma_reset - 2.0 * coupling_sum.abs() * prms.dt;

            let ksi: f64 = rng.sample(Standard);
            if ksi < gamma_reset {
                state.moments.reset_state(traj, i);
            }
            let ksi2: f64 = rng.sample(Standard);
            if ksi2 < gamma_collapse {
                debug!("trajectory {}: A-FSSH collapse onto state {}", traj, active);
                collapse(state.ampl_adi.column_mut(traj), active, prms.collapse_option);
                state.moments.reset_trajectory(traj);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::initialization::DynamicConfiguration;
    use crate::interface::model::{ModelHamiltonian, ModelKind};
    use approx::assert_abs_diff_eq;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn norm(c: ArrayView1<c64>) -> f64 {
        c.iter().map(|x| x.norm_sqr()).sum::<f64>().sqrt()
    }

    fn mixed(ntraj: usize) -> Array2<c64> {
        let mut ampl: Array2<c64> = Array2::zeros((2, ntraj));
        ampl.row_mut(0).fill(c64::new(0.6, 0.0));
        ampl.row_mut(1).fill(c64::new(0.0, 0.8));
        ampl
    }

    fn setup(x: f64, p: f64) -> (ModelHamiltonian, EnsembleState) {
        let kind = ModelKind::Crossing {
            x0: 1.0,
            k: 0.1,
            d: -0.1,
            v: 0.05,
        };
        let mut ham: ModelHamiltonian = ModelHamiltonian::new(kind, 1, 2);
        let mut state: EnsembleState = EnsembleState::new(1, 2, 2, 2);
        state.q = array![[x, -x]];
        state.p = array![[p, p]];
        state.inv_m = array![0.01];
        state.ampl_adi = mixed(2);
        ham.update_geometry(state.q.view()).unwrap();
        ham.update_momenta(state.p.view(), state.inv_m.view()).unwrap();
        (ham, state)
    }

    fn parameters(edit: impl FnOnce(&mut DynamicConfiguration)) -> ControlParameters {
        let mut config: DynamicConfiguration = DynamicConfiguration::default();
        edit(&mut config);
        ControlParameters::try_from(&config).unwrap()
    }

    #[test]
    fn sdm_decays_coherences_and_keeps_the_norm() {
        let mut ampl: Array2<c64> = mixed(1);
        let rates: Vec<Array2<f64>> = vec![array![[0.0, 0.1], [0.1, 0.0]]];
        sdm(&mut ampl, 1.0, &[0], &rates, 0.0);
        assert_abs_diff_eq!(ampl[[1, 0]].norm(), 0.8 * (-0.1_f64).exp(), epsilon = 1e-12);
        assert_abs_diff_eq!(norm(ampl.column(0)), 1.0, epsilon = 1e-12);
        // the phase of the active amplitude is untouched
        assert_abs_diff_eq!(ampl[[0, 0]].im, 0.0, epsilon = 1e-14);
    }

    #[test]
    fn sdm_renormalizes_a_depleted_active_state() {
        let mut ampl: Array2<c64> = array![[c64::new(1.0e-3, 0.0)], [c64::new(1.0, 0.0)]];
        let rates: Vec<Array2<f64>> = vec![Array2::zeros((2, 2))];
        sdm(&mut ampl, 1.0, &[0], &rates, 1.0e-4);
        assert_abs_diff_eq!(norm(ampl.column(0)), 1.0, epsilon = 1e-12);
        assert!(ampl[[1, 0]].norm() > 0.99);
    }

    #[test]
    fn instantaneous_decoherence_variants() {
        // trajectory 0 hops 0 -> 1, trajectory 1 is frustrated on 0 -> 1
        let cases = [
            (InstantaneousVariant::SuccessfulHops, [1.0, 0.6]),
            (InstantaneousVariant::AttemptedHops, [1.0, 1.0]),
            (InstantaneousVariant::FrustratedHops, [0.8, 1.0]),
        ];
        for (variant, expected) in cases {
            let mut ampl: Array2<c64> = mixed(2);
            instantaneous_decoherence(
                &mut ampl,
                &[1, 0],
                &[1, 1],
                &[0, 0],
                variant,
                CollapseOption::KeepPhase,
            );
            let on_target: Vec<f64> = vec![ampl[[1, 0]].norm(), ampl[[0, 1]].norm()];
            assert_abs_diff_eq!(on_target[0], expected[0], epsilon = 1e-12);
            assert_abs_diff_eq!(on_target[1], expected[1], epsilon = 1e-12);
            for traj in 0..2 {
                assert_abs_diff_eq!(norm(ampl.column(traj)), 1.0, epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn collapse_option_controls_the_phase() {
        let mut keep: Array2<c64> = mixed(1);
        instantaneous_decoherence(
            &mut keep,
            &[1],
            &[1],
            &[0],
            InstantaneousVariant::SuccessfulHops,
            CollapseOption::KeepPhase,
        );
        assert_abs_diff_eq!((keep[[1, 0]] - c64::new(0.0, 1.0)).norm(), 0.0, epsilon = 1e-12);
        let mut reset: Array2<c64> = mixed(1);
        instantaneous_decoherence(
            &mut reset,
            &[1],
            &[1],
            &[0],
            InstantaneousVariant::SuccessfulHops,
            CollapseOption::ResetPhase,
        );
        assert_abs_diff_eq!((reset[[1, 0]] - c64::new(1.0, 0.0)).norm(), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn edc_rates_vanish_without_kinetic_energy() {
        let e: Array1<f64> = array![0.0, 0.2];
        assert_eq!(edc_rates(e.view(), 0.0, 1.0, 0.1), Array2::<f64>::zeros((2, 2)));
        let rates: Array2<f64> = edc_rates(e.view(), 0.1, 1.0, 0.1);
        assert_abs_diff_eq!(rates[[0, 1]], 0.1, epsilon = 1e-12);
        assert_abs_diff_eq!(rates[[1, 1]], 0.0, epsilon = 1e-12);
    }

    #[test]
    fn schwartz_rates_follow_the_force_differences() {
        let forces: Array2<f64> = array![[1.0, 0.0], [-1.0, 0.0]];
        let inv_alpha: Array1<f64> = array![4.0, 4.0];
        let pairwise: Array2<f64> = schwartz_pairwise_rates(forces.view(), inv_alpha.view());
        assert_abs_diff_eq!(pairwise[[0, 1]], 2.0, epsilon = 1e-12);
        assert_abs_diff_eq!(pairwise[[1, 0]], 2.0, epsilon = 1e-12);
        // the mean field of an equal mixture sits in the middle
        let mean_field: Array2<f64> =
            schwartz_mean_field_rates(forces.view(), array![0.5, 0.5].view(), inv_alpha.view());
        assert_abs_diff_eq!(mean_field[[0, 1]], 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(mean_field[[0, 0]], 0.0, epsilon = 1e-12);
    }

    #[test]
    fn dephasing_correction_scales_by_the_gap_ratio() {
        let mut rates: Array2<f64> = array![[0.0, 1.0], [1.0, 0.0]];
        let ave_gaps: Array2<f64> = array![[0.0, 0.1], [0.1, 0.0]];
        dephasing_informed_correction(&mut rates, array![0.0, 0.05].view(), ave_gaps.view());
        assert_abs_diff_eq!(rates[[0, 1]], 0.5, epsilon = 1e-12);
    }

    #[test]
    fn missing_rate_matrix_is_a_mismatch() {
        let (ham, state) = setup(0.2, 5.0);
        let prms: ControlParameters = parameters(|c| c.decoherence.decoherence_times_type = 0);
        assert!(matches!(
            decoherence_rates(&prms, &ham, &state),
            Err(DynamicsError::ConfigurationMismatch(_))
        ));
    }

    #[test]
    fn bcsh_removes_unreachable_states() {
        // with almost no kinetic energy the upper state cannot be reached
        let (ham, mut state) = setup(0.0, 0.01);
        let prms: ControlParameters = parameters(|c| c.decoherence.decoherence_algo = 3);
        let events: Vec<Vec<bool>> = wp_reversal_events(&prms, &ham, &state);
        assert_eq!(events[0], vec![false, true]);
        bcsh(&mut state.ampl_adi, &events, &state.act_states);
        assert_abs_diff_eq!(state.ampl_adi[[0, 0]].norm(), 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(state.ampl_adi[[1, 0]].norm(), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn bcsh_collapses_an_emptied_column_onto_the_active_state() {
        // the active state carries no population, e.g. after a Landau-Zener hop
        let mut ampl: Array2<c64> = array![
            [c64::new(0.0, 0.0), c64::new(0.6, 0.0)],
            [c64::new(0.0, 1.0), c64::new(0.0, 0.8)]
        ];
        bcsh(&mut ampl, &[vec![false, true], vec![true, false]], &[0, 1]);
        assert_eq!(ampl[[0, 0]], c64::new(1.0, 0.0));
        assert_eq!(ampl[[1, 0]], c64::new(0.0, 0.0));
        assert_abs_diff_eq!((ampl[[1, 1]] - c64::new(0.0, 1.0)).norm(), 0.0, epsilon = 1e-12);
        for traj in 0..2 {
            assert_abs_diff_eq!(norm(ampl.column(traj)), 1.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn mfsd_keeps_the_amplitudes_normalized() {
        let (ham, mut state) = setup(0.2, 5.0);
        let prms: ControlParameters = parameters(|c| c.decoherence.decoherence_algo = 4);
        let rates: Vec<Array2<f64>> = vec![Array2::from_elem((2, 2), 1.0e6); 2];
        let mut rng: StdRng = StdRng::seed_from_u64(11);
        mfsd(&prms, &ham, &mut state, &rates, &mut rng);
        for traj in 0..2 {
            let c: ArrayView1<c64> = state.ampl_adi.column(traj);
            assert_abs_diff_eq!(norm(c), 1.0, epsilon = 1e-12);
            // a certain event leaves a single populated state, which is the active one
            let active: usize = state.act_states[traj];
            assert_abs_diff_eq!(c[active].norm(), 1.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn afssh_is_deterministic_and_normalized() {
        let prms: ControlParameters = parameters(|c| {
            c.decoherence.decoherence_algo = 2;
            c.num_electronic_substeps = 2;
        });
        let run = |seed: u64| {
            let (ham, mut state) = setup(0.2, 5.0);
            let mut rng: StdRng = StdRng::seed_from_u64(seed);
            for _ in 0..50 {
                afssh(&prms, &ham, &mut state, &mut rng);
            }
            state
        };
        let first: EnsembleState = run(5);
        let second: EnsembleState = run(5);
        assert_eq!(first.ampl_adi, second.ampl_adi);
        assert_eq!(first.moments.dr, second.moments.dr);
        for traj in 0..2 {
            assert_abs_diff_eq!(norm(first.ampl_adi.column(traj)), 1.0, epsilon = 1e-12);
            // the active diagonal of the moments is always removed
            assert_abs_diff_eq!(first.moments.dr(traj, 0)[[0, 0]].norm(), 0.0, epsilon = 1e-14);
        }
    }

    /// Put a large position moment on the excited state with the sign that makes the reset
    /// rate of every trajectory positive.
    fn load_position_moment(ham: &ModelHamiltonian, state: &mut EnsembleState, magnitude: f64) {
        for traj in 0..state.ntraj {
            let d1: ArrayView2<c64> = ham.d1ham_adi(traj, 0);
            let delta_f: f64 = d1[[0, 0]].re - d1[[1, 1]].re;
            let (dr, _dp) = state.moments.pair_mut(traj, 0);
            dr[[1, 1]] = c64::new(-delta_f.signum() * magnitude, 0.0);
        }
    }

    #[test]
    fn afssh_collapse_uses_the_configured_option() {
        // far from the crossing the force difference dominates the coupling force
        for (option, expected) in [(0, c64::new(0.0, 1.0)), (1, c64::new(1.0, 0.0))] {
            let prms: ControlParameters = parameters(|c| {
                c.decoherence.decoherence_algo = 2;
                c.decoherence.collapse_option = option;
            });
            let (ham, mut state) = setup(3.0, 5.0);
            state.ampl_adi.row_mut(0).fill(c64::new(0.0, 0.6));
            load_position_moment(&ham, &mut state, 1.0e4);
            // the imaginary part of the moments does not enter the rates
            for traj in 0..2 {
                state.moments.pair_mut(traj, 0).0[[1, 1]].im = 1.0e5;
            }
            let mut rng: StdRng = StdRng::seed_from_u64(3);
            afssh(&prms, &ham, &mut state, &mut rng);
            for traj in 0..2 {
                let c: ArrayView1<c64> = state.ampl_adi.column(traj);
                assert_abs_diff_eq!((c[0] - expected).norm(), 0.0, epsilon = 1e-12);
                assert_eq!(c[1], c64::new(0.0, 0.0));
                assert!(state.moments.dr(traj, 0).iter().all(|x| x.norm() == 0.0));
                assert!(state.moments.dp(traj, 0).iter().all(|x| x.norm() == 0.0));
            }
        }
    }

    #[test]
    fn afssh_reset_without_collapse() {
        // close to the crossing the coupling force suppresses the collapse
        let prms: ControlParameters = parameters(|c| c.decoherence.decoherence_algo = 2);
        let (ham, mut state) = setup(0.2, 5.0);
        load_position_moment(&ham, &mut state, 1.0e4);
        let mut rng: StdRng = StdRng::seed_from_u64(3);
        afssh(&prms, &ham, &mut state, &mut rng);
        assert_eq!(state.ampl_adi, mixed(2));
        for traj in 0..2 {
            let dr: &Array2<c64> = state.moments.dr(traj, 0);
            assert!(dr.row(1).iter().chain(dr.column(1).iter()).all(|x| x.norm() == 0.0));
        }

        // a negative reset rate leaves the moments alone
        let (ham, mut state) = setup(0.2, 5.0);
        load_position_moment(&ham, &mut state, -1.0e4);
        afssh(&prms, &ham, &mut state, &mut rng);
        assert_eq!(state.ampl_adi, mixed(2));
        for traj in 0..2 {
            assert!(state.moments.dr(traj, 0)[[1, 1]].norm() > 1.0e3);
        }
    }

    #[test]
    fn renormalize_fixes_drifted_columns() {
        let mut ampl: Array2<c64> = Array2::from_elem((2, 3), c64::new(0.5, 0.5));
        renormalize(&mut ampl);
        for traj in 0..3 {
            assert_abs_diff_eq!(norm(ampl.column(traj)), 1.0, epsilon = 1e-12);
        }
    }
}
