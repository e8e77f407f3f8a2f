use crate::initialization::ensemble::EnsembleState;
use crate::initialization::parameters::{ForceMethod, Representation};
use crate::interface::HamiltonianProvider;
use ndarray::prelude::*;
use ndarray_linalg::c64;

/// Index of the handle that serves trajectory `traj`.
#[inline]
pub fn ham_index(traj: usize, reduced: bool) -> usize {
    if reduced {
        0
    } else {
        traj
    }
}

/// Force of the adiabatic state `state` of trajectory `traj`, -dE/dR per dof.
pub fn state_force(
    ham: &dyn HamiltonianProvider,
    traj: usize,
    state: usize,
    ndof: usize,
) -> Array1<f64> {
    Array1::from_shape_fn(ndof, |dof| -ham.d1ham_adi(traj, dof)[[state, state]].re)
}

/// Diagonal forces of all adiabatic states, shape nadi x ndof.
pub fn adiabatic_forces(ham: &dyn HamiltonianProvider, traj: usize, ndof: usize) -> Array2<f64> {
    let nadi: usize = ham.nadi();
    let mut forces: Array2<f64> = Array2::zeros((nadi, ndof));
    for dof in 0..ndof {
        let d1ham: ArrayView2<c64> = ham.d1ham_adi(traj, dof);
        for state in 0..nadi {
            forces[[state, dof]] = -d1ham[[state, state]].re;
        }
    }
    forces
}

/// Hellmann-Feynman force of the wavepacket, -Re(c^H dH c).
fn mean_field_force(
    ham: &dyn HamiltonianProvider,
    traj: usize,
    coefficients: ArrayView1<c64>,
    ndof: usize,
    rep: Representation,
) -> Array1<f64> {
    let c_h: Array1<c64> = coefficients.mapv(|c| c.conj());
    Array1::from_shape_fn(ndof, |dof| {
        let d1ham: ArrayView2<c64> = match rep {
            Representation::Diabatic => ham.d1ham_dia(traj, dof),
            Representation::Adiabatic => ham.d1ham_adi(traj, dof),
        };
        -c_h.dot(&d1ham.dot(&coefficients)).re
    })
}

/// Forces acting on the nuclei of every trajectory, shape ndof x ntraj.
pub fn effective_forces(
    ham: &dyn HamiltonianProvider,
    state: &EnsembleState,
    method: ForceMethod,
    rep: Representation,
    reduced: bool,
) -> Array2<f64> {
    let mut forces: Array2<f64> = Array2::zeros((state.ndof, state.ntraj));
    if method == ForceMethod::None {
        return forces;
    }
    for traj in 0..state.ntraj {
        let idx: usize = ham_index(traj, reduced);
        let force: Array1<f64> = match method {
            ForceMethod::StateSpecific => {
                state_force(ham, idx, state.act_states[traj], state.ndof)
            }
            _ => mean_field_force(
                ham,
                idx,
                state.amplitudes(rep).column(traj),
                state.ndof,
                rep,
            ),
        };
        forces.column_mut(traj).assign(&force);
    }
    forces
}

/// Quantum-like force of the entangled-trajectory Hamiltonian (ETHD3), computed from the
/// spread of the ensemble along every dof.
pub fn ethd3_forces(q: ArrayView2<f64>, inv_m: ArrayView1<f64>, alpha: f64) -> Array2<f64> {
    let ntraj: f64 = q.ncols() as f64;
    let mut forces: Array2<f64> = Array2::zeros(q.raw_dim());
    for (dof, (q_dof, mut f_dof)) in q
        .axis_iter(Axis(0))
        .zip(forces.axis_iter_mut(Axis(0)))
        .enumerate()
    {
        let mean: f64 = q_dof.sum() / ntraj;
        let variance: f64 = q_dof.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / ntraj;
        if variance > 1.0e-12 {
            let prefactor: f64 = alpha * inv_m[dof] / (4.0 * variance * variance);
            f_dof.assign(&q_dof.mapv(|x| prefactor * (x - mean)));
        }
    }
    forces
}

/// Friction displacement of ETHD3, beta (p - <p>) per dof.
pub fn ethd3_friction(p: ArrayView2<f64>, beta: f64) -> Array2<f64> {
    let mean: Array1<f64> = p.mean_axis(Axis(1)).unwrap_or_else(|| Array1::zeros(p.nrows()));
    let mut gamma: Array2<f64> = p.to_owned();
    for (mut row, m) in gamma.axis_iter_mut(Axis(0)).zip(mean.iter()) {
        row.mapv_inplace(|x| beta * (x - m));
    }
    gamma
}

/// p += F dt/2
pub fn half_kick(p: &mut Array2<f64>, forces: ArrayView2<f64>, dt: f64) {
    p.scaled_add(0.5 * dt, &forces);
}

pub fn apply_constraints(p: &mut Array2<f64>, constrained_dofs: &[usize]) {
    for &dof in constrained_dofs {
        p.row_mut(dof).fill(0.0);
    }
}

/// q += M^-1 (p + gamma) dt
pub fn drift(
    q: &mut Array2<f64>,
    p: ArrayView2<f64>,
    inv_m: ArrayView1<f64>,
    dt: f64,
    gamma: Option<ArrayView2<f64>>,
) {
    for (dof, mut q_dof) in q.axis_iter_mut(Axis(0)).enumerate() {
        let factor: f64 = inv_m[dof] * dt;
        q_dof.scaled_add(factor, &p.row(dof));
        if let Some(gamma) = gamma {
            q_dof.scaled_add(factor, &gamma.row(dof));
        }
    }
}

/// Multiply the thermostatted momenta of one trajectory by `factor`.
pub fn scale_momenta(p: &mut Array2<f64>, traj: usize, dofs: &[usize], factor: f64) {
    for &dof in dofs {
        p[[dof, traj]] *= factor;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interface::model::{ModelHamiltonian, ModelKind};
    use approx::assert_abs_diff_eq;

    fn model(ntraj: usize) -> ModelHamiltonian {
        ModelHamiltonian::new(
            ModelKind::Crossing {
                x0: 1.0,
                k: 0.1,
                d: -0.1,
                v: 0.05,
            },
            1,
            ntraj,
        )
    }

    #[test]
    fn state_specific_force_follows_the_active_surface() {
        let mut ham: ModelHamiltonian = model(2);
        let mut state: EnsembleState = EnsembleState::new(1, 2, 2, 2);
        state.q = array![[0.4, 0.4]];
        state.act_states = vec![0, 1];
        ham.update_geometry(state.q.view()).unwrap();
        let f: Array2<f64> = effective_forces(
            &ham,
            &state,
            ForceMethod::StateSpecific,
            Representation::Adiabatic,
            false,
        );
        assert_abs_diff_eq!(f[[0, 0]], -ham.d1ham_adi(0, 0)[[0, 0]].re, epsilon = 1e-14);
        assert_abs_diff_eq!(f[[0, 1]], -ham.d1ham_adi(1, 0)[[1, 1]].re, epsilon = 1e-14);
        assert!((f[[0, 0]] - f[[0, 1]]).abs() > 1e-6);
    }

    #[test]
    fn mean_field_force_is_representation_independent() {
        let mut ham: ModelHamiltonian = model(1);
        let mut state: EnsembleState = EnsembleState::new(1, 2, 2, 1);
        state.q = array![[0.2]];
        ham.update_geometry(state.q.view()).unwrap();
        let s: f64 = 0.5_f64.sqrt();
        state.ampl_adi = array![[c64::new(s, 0.0)], [c64::new(0.0, s)]];
        state.update_amplitudes(Representation::Adiabatic, &ham, false);
        let f_adi: Array2<f64> = effective_forces(
            &ham,
            &state,
            ForceMethod::Ehrenfest,
            Representation::Adiabatic,
            false,
        );
        let f_dia: Array2<f64> = effective_forces(
            &ham,
            &state,
            ForceMethod::Ehrenfest,
            Representation::Diabatic,
            false,
        );
        assert_abs_diff_eq!(f_adi[[0, 0]], f_dia[[0, 0]], epsilon = 1e-12);
    }

    #[test]
    fn ethd3_force_pushes_trajectories_apart() {
        let q: Array2<f64> = array![[-1.0, 0.0, 1.0]];
        let f: Array2<f64> = ethd3_forces(q.view(), array![0.5].view(), 1.0);
        assert!(f[[0, 0]] < 0.0 && f[[0, 2]] > 0.0);
        assert_abs_diff_eq!(f[[0, 1]], 0.0, epsilon = 1e-14);
        // a collapsed ensemble feels no force
        let f_zero: Array2<f64> = ethd3_forces(array![[2.0, 2.0]].view(), array![1.0].view(), 1.0);
        assert_abs_diff_eq!(f_zero.sum(), 0.0, epsilon = 1e-14);
    }

    #[test]
    fn constrained_dofs_do_not_move() {
        let mut q: Array2<f64> = array![[0.0, 1.0], [2.0, 3.0]];
        let mut p: Array2<f64> = array![[1.0, 1.0], [1.0, 1.0]];
        let forces: Array2<f64> = Array2::ones((2, 2));
        half_kick(&mut p, forces.view(), 2.0);
        apply_constraints(&mut p, &[1]);
        drift(&mut q, p.view(), array![0.5, 0.5].view(), 1.0, None);
        assert_eq!(q.row(1).to_vec(), vec![2.0, 3.0]);
        assert_abs_diff_eq!(q[[0, 0]], 1.0, epsilon = 1e-14);
    }

    #[test]
    fn friction_vanishes_for_the_mean_momentum() {
        let gamma: Array2<f64> = ethd3_friction(array![[1.0, 3.0]].view(), 0.5);
        assert_abs_diff_eq!(gamma[[0, 0]], -0.5, epsilon = 1e-14);
        assert_abs_diff_eq!(gamma.sum(), 0.0, epsilon = 1e-14);
    }
}
