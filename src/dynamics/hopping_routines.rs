use crate::constants;
use crate::dynamics::dynamic_routines::{ham_index, state_force};
use crate::initialization::ensemble::EnsembleState;
use crate::initialization::parameters::*;
use crate::interface::HamiltonianProvider;
use log::{debug, trace};
use ndarray::prelude::*;
use ndarray_linalg::c64;
use rand::distributions::Standard;
use rand::Rng;
use std::f64::consts::PI;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HopOutcome {
    NoHop,
    Accepted,
    Frustrated,
}

/// Record of the hop decision of one trajectory in one step.
#[derive(Clone, Debug, PartialEq)]
pub struct HopDecision {
    pub initial_state: usize,
    pub proposed_state: usize,
    pub final_state: usize,
    pub outcome: HopOutcome,
    /// Kinetic plus potential energy before the momentum adjustment.
    pub energy_before: f64,
    pub energy_after: f64,
}

impl HopDecision {
    pub fn no_hop(state: usize) -> Self {
        HopDecision {
            initial_state: state,
            proposed_state: state,
            final_state: state,
            outcome: HopOutcome::NoHop,
            energy_before: 0.0,
            energy_after: 0.0,
        }
    }
}

/// Clamp every probability into [0,1] and shrink the vector if the total exceeds one.
fn sanitize_probabilities(g: &mut Array1<f64>) {
    g.mapv_inplace(|x| if x.is_finite() { x.max(0.0).min(1.0) } else { 0.0 });
    let total: f64 = g.sum();
    if total > 1.0 {
        *g /= total;
    }
}

fn fssh_probabilities(hvib: ArrayView2<c64>, c: ArrayView1<c64>, active: usize, dt: f64) -> Array1<f64> {
    let nstates: usize = c.len();
    let rho_aa: f64 = c[active].norm_sqr();
    let mut g: Array1<f64> = Array1::zeros(nstates);
    if rho_aa <= 0.0 {
        return g;
    }
    for j in (0..nstates).filter(|&j| j != active) {
        // population flux a -> j, 2 Im(H_ja rho_aj)
        let rho_aj: c64 = c[active] * c[j].conj();
        g[j] = dt * 2.0 * (hvib[[j, active]] * rho_aj).im / rho_aa;
    }
    g
}

fn gfsh_probabilities(populations_old: ArrayView1<f64>, c: ArrayView1<c64>, active: usize) -> Array1<f64> {
    let nstates: usize = c.len();
    let mut g: Array1<f64> = Array1::zeros(nstates);
    let changes: Array1<f64> =
        Array1::from_shape_fn(nstates, |k| c[k].norm_sqr() - populations_old[k]);

    if changes[active] < 0.0 && populations_old[active] > 0.0 {
        let gain: f64 = changes.iter().filter(|&&x| x > 0.0).sum();
        for k in (0..nstates).filter(|&k| changes[k] > 0.0) {
            g[k] = -1.0 * (changes[active] / populations_old[active]) * changes[k] / gain;
        }
    }
    g
}

fn mssh_probabilities(c: ArrayView1<c64>) -> Array1<f64> {
    c.mapv(|x| x.norm_sqr())
}

fn landau_zener_probabilities(
    ham_dia: ArrayView2<c64>,
    prev_ham_dia: ArrayView2<c64>,
    active: usize,
    dt: f64,
) -> Array1<f64> {
    let nstates: usize = ham_dia.nrows();
    let mut g: Array1<f64> = Array1::zeros(nstates);
    for j in (0..nstates).filter(|&j| j != active) {
        let gap: f64 = ham_dia[[active, active]].re - ham_dia[[j, j]].re;
        let prev_gap: f64 = prev_ham_dia[[active, active]].re - prev_ham_dia[[j, j]].re;
        if gap * prev_gap < 0.0 {
            let velocity: f64 = ((gap - prev_gap) / dt).abs();
            g[j] = (-2.0 * PI * ham_dia[[active, j]].norm_sqr() / velocity).exp();
        }
    }
    g
}

/// Probabilities of leaving the active state of trajectory `traj` for every other adiabatic
/// state. The entry of the active state is zero.
///
/// `populations_old` holds the adiabatic populations at the beginning of the step (in the
/// numbering of the current step) and is only used by GFSH; `prev_ham_dia` holds the diabatic
/// Hamiltonians of the previous step and is only used by the Landau-Zener scheme.
pub fn hop_proposal_probabilities(
    prms: &ControlParameters,
    ham: &dyn HamiltonianProvider,
    state: &EnsembleState,
    traj: usize,
    populations_old: ArrayView1<f64>,
    prev_ham_dia: &[Array2<c64>],
) -> Array1<f64> {
    let idx: usize = ham_index(traj, prms.reduced_ensemble);
    let active: usize = state.act_states[traj];
    let c: ArrayView1<c64> = state.ampl_adi.column(traj);

    let mut g: Array1<f64> = match prms.tsh_method {
        HoppingMethod::Off => Array1::zeros(state.nadi),
        HoppingMethod::Fssh => fssh_probabilities(ham.hvib_adi(idx), c, active, prms.dt),
        HoppingMethod::Gfssh => gfsh_probabilities(populations_old, c, active),
        HoppingMethod::Mssh => mssh_probabilities(c),
        HoppingMethod::LandauZener => match prev_ham_dia.get(idx) {
            Some(prev) => landau_zener_probabilities(ham.ham_dia(idx), prev.view(), active, prms.dt),
            None => Array1::zeros(state.nadi),
        },
    };
    g[active] = 0.0;
    sanitize_probabilities(&mut g);
    g
}

/// Draw one random number per trajectory and select the state whose cumulative probability
/// bracket contains it. Trajectories whose number falls beyond all brackets stay put.
pub fn propose_hops<R: Rng>(g: &[Array1<f64>], act_states: &[usize], rng: &mut R) -> Vec<usize> {
    g.iter()
        .zip(act_states.iter())
        .map(|(g_traj, &active)| {
            let ksi: f64 = rng.sample(Standard);
            let mut sum: f64 = 0.0;
            for (state, prob) in g_traj.iter().enumerate() {
                if state == active {
                    continue;
                }
                sum += prob;
                if ksi < sum {
                    return state;
                }
            }
            active
        })
        .collect()
}

fn adiabatic_energy(ham: &dyn HamiltonianProvider, idx: usize, state: usize) -> f64 {
    ham.ham_adi(idx)[[state, state]].re
}

fn coupling_direction(ham: &dyn HamiltonianProvider, idx: usize, from: usize, to: usize, ndof: usize) -> Array1<f64> {
    Array1::from_shape_fn(ndof, |dof| ham.dc1_adi(idx, dof)[[from, to]].re)
}

fn force_difference(ham: &dyn HamiltonianProvider, idx: usize, from: usize, to: usize, ndof: usize) -> Array1<f64> {
    state_force(ham, idx, to, ndof) - state_force(ham, idx, from, ndof)
}

/// Coefficients a = 1/2 sum_i d_i^2 / m_i and b = sum_i p_i d_i / m_i of the kinetic energy
/// along `direction`.
fn rescaling_coefficients(p: ArrayView1<f64>, inv_m: ArrayView1<f64>, direction: ArrayView1<f64>) -> (f64, f64) {
    let mut a: f64 = 0.0;
    let mut b: f64 = 0.0;
    for ((d, pi), im) in direction.iter().zip(p.iter()).zip(inv_m.iter()) {
        a += 0.5 * d * d * im;
        b += pi * d * im;
    }
    (a, b)
}

/// Remove the energy `delta_e` from the nuclei by moving the momenta along `direction`. Solves
/// a g^2 - b g - dE = 0 for the root of smaller magnitude and sets p <- p - g d.
/// Returns false without touching p if no real root exists.
pub fn rescale_along(
    mut p: ArrayViewMut1<f64>,
    inv_m: ArrayView1<f64>,
    direction: ArrayView1<f64>,
    delta_e: f64,
) -> bool {
    let (a, b): (f64, f64) = rescaling_coefficients(p.view(), inv_m, direction);
    let val: f64 = b.powi(2) + 4.0 * a * delta_e;
    if a < 1.0e-14 || val < 0.0 {
        return false;
    }
    let gamma: f64 = if b < 0.0 {
        (b + val.sqrt()) / (2.0 * a)
    } else {
        (b - val.sqrt()) / (2.0 * a)
    };
    p.scaled_add(-gamma, &direction);
    true
}

/// Reflect the momentum component along `direction`, keeping the kinetic energy.
pub fn reverse_along(mut p: ArrayViewMut1<f64>, inv_m: ArrayView1<f64>, direction: ArrayView1<f64>) {
    let (a, b): (f64, f64) = rescaling_coefficients(p.view(), inv_m, direction);
    if a > 1.0e-14 {
        p.scaled_add(-b / a, &direction);
    }
}

/// Decide which proposed hops are energetically possible. Frustrated trajectories keep their
/// active state.
pub fn accept_hops<R: Rng>(
    prms: &ControlParameters,
    ham: &dyn HamiltonianProvider,
    state: &EnsembleState,
    proposed: &[usize],
    rng: &mut R,
) -> Vec<usize> {
    let mut accepted: Vec<usize> = state.act_states.clone();
    for traj in 0..state.ntraj {
        let old: usize = state.act_states[traj];
        let new: usize = proposed[traj];
        if new == old {
            continue;
        }
        let idx: usize = ham_index(traj, prms.reduced_ensemble);
        let delta_e: f64 = adiabatic_energy(ham, idx, old) - adiabatic_energy(ham, idx, new);
        let p: ArrayView1<f64> = state.p.column(traj);

        let along = |direction: Array1<f64>| -> bool {
            let (a, b): (f64, f64) = rescaling_coefficients(p, state.inv_m.view(), direction.view());
            b.powi(2) + 4.0 * a * delta_e >= 0.0
        };
        let is_allowed: bool = match prms.hop_acceptance {
            HopAcceptance::Always => true,
            HopAcceptance::Isotropic => state.kinetic_energy(traj) + delta_e >= 0.0,
            HopAcceptance::AlongCoupling => along(coupling_direction(ham, idx, old, new, state.ndof)),
            HopAcceptance::AlongForceDifference => {
                along(force_difference(ham, idx, old, new, state.ndof))
            }
            HopAcceptance::Boltzmann => {
                if delta_e >= 0.0 {
                    true
                } else {
                    let ksi: f64 = rng.sample(Standard);
                    let kt: f64 = constants::K_BOLTZMANN * prms.temperature;
                    kt > 0.0 && ksi < (delta_e / kt).exp()
                }
            }
        };
        if is_allowed {
            accepted[traj] = new;
        } else {
            trace!("trajectory {}: hop {} -> {} rejected", traj, old, new);
        }
    }
    accepted
}

/// Adjust the nuclear momenta after the hop decision. Accepted hops rescale p so that the total
/// energy is conserved and turn into frustrated hops if that is impossible. Frustrated hops
/// optionally reverse the momentum. The active states are updated in place.
pub fn handle_hops_nuclear(
    prms: &ControlParameters,
    ham: &dyn HamiltonianProvider,
    state: &mut EnsembleState,
    proposed: &[usize],
    accepted: &[usize],
) -> Vec<HopDecision> {
    let mut decisions: Vec<HopDecision> = Vec::with_capacity(state.ntraj);
    for traj in 0..state.ntraj {
        let old: usize = state.act_states[traj];
        let idx: usize = ham_index(traj, prms.reduced_ensemble);
        if proposed[traj] == old {
            decisions.push(HopDecision::no_hop(old));
            continue;
        }
        let energy_before: f64 = state.kinetic_energy(traj) + adiabatic_energy(ham, idx, old);
        let mut final_state: usize = accepted[traj];

        if final_state != old {
            let delta_e: f64 = adiabatic_energy(ham, idx, old) - adiabatic_energy(ham, idx, final_state);
            let direction: Option<Array1<f64>> = match prms.momentum_rescaling {
                MomentumRescaling::None => None,
                MomentumRescaling::Isotropic => Some(state.p.column(traj).to_owned()),
                MomentumRescaling::AlongCoupling => {
                    Some(coupling_direction(ham, idx, old, final_state, state.ndof))
                }
                MomentumRescaling::AlongForceDifference => {
                    Some(force_difference(ham, idx, old, final_state, state.ndof))
                }
            };
            if let Some(direction) = direction {
                let inv_m: ArrayView1<f64> = state.inv_m.view();
                if !rescale_along(state.p.column_mut(traj), inv_m, direction.view(), delta_e) {
                    final_state = old;
                }
            }
        }

        let outcome: HopOutcome = if final_state == old {
            let target: usize = proposed[traj];
            let direction: Option<Array1<f64>> = match prms.do_reverse {
                FrustratedReversal::Keep => None,
                FrustratedReversal::AlongDirection => match prms.momentum_rescaling {
                    MomentumRescaling::None => None,
                    MomentumRescaling::Isotropic => Some(state.p.column(traj).to_owned()),
                    MomentumRescaling::AlongCoupling => {
                        Some(coupling_direction(ham, idx, old, target, state.ndof))
                    }
                    MomentumRescaling::AlongForceDifference => {
                        Some(force_difference(ham, idx, old, target, state.ndof))
                    }
                },
                FrustratedReversal::AlongCoupling => {
                    Some(coupling_direction(ham, idx, old, target, state.ndof))
                }
            };
            if let Some(direction) = direction {
                let inv_m: ArrayView1<f64> = state.inv_m.view();
                reverse_along(state.p.column_mut(traj), inv_m, direction.view());
            }
            debug!("trajectory {}: frustrated hop {} -> {}", traj, old, target);
            HopOutcome::Frustrated
        } else {
            state.moments.reset_trajectory(traj);
            debug!("trajectory {}: hop {} -> {}", traj, old, final_state);
            HopOutcome::Accepted
        };

        state.act_states[traj] = final_state;
        let energy_after: f64 = state.kinetic_energy(traj) + adiabatic_energy(ham, idx, final_state);
        decisions.push(HopDecision {
            initial_state: old,
            proposed_state: proposed[traj],
            final_state,
            outcome,
            energy_before,
            energy_after,
        });
    }
    decisions
}
