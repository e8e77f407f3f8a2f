use crate::error::DynamicsError;
use crate::initialization::parameters::ElectronicIntegrator;
use ndarray::prelude::*;
use ndarray_linalg::{c64, Eigh, UPLO};
use rayon::prelude::*;

/// Propagator exp(-i H dt) of a Hermitian Hamiltonian from its eigendecomposition,
/// U = V exp(-i E dt) V^H.
pub fn matrix_exponential_propagator(
    hvib: ArrayView2<c64>,
    dt: f64,
) -> Result<Array2<c64>, DynamicsError> {
    let (eig, eig_vec): (Array1<f64>, Array2<c64>) = hvib.eigh(UPLO::Lower)?;
    let diag: Array1<c64> = eig.mapv(|val| (-c64::new(0.0, 1.0) * val * dt).exp());
    let eig_vec_h: Array2<c64> = eig_vec.t().mapv(|val| val.conj());
    let u_mat: Array2<c64> = eig_vec.dot(&Array::from_diag(&diag).dot(&eig_vec_h));
    Ok(u_mat)
}

fn derivative(hvib: ArrayView2<c64>, coefficients: ArrayView1<c64>) -> Array1<c64> {
    hvib.dot(&coefficients).mapv(|val| -c64::new(0.0, 1.0) * val)
}

/// One classical fourth-order Runge-Kutta step of i dc/dt = H c.
pub fn runge_kutta_step(
    hvib: ArrayView2<c64>,
    coefficients: ArrayView1<c64>,
    dt: f64,
) -> Array1<c64> {
    let k_1: Array1<c64> = derivative(hvib, coefficients);
    let k_2: Array1<c64> = derivative(hvib, (&coefficients + &(&k_1 * (0.5 * dt))).view());
    let k_3: Array1<c64> = derivative(hvib, (&coefficients + &(&k_2 * (0.5 * dt))).view());
    let k_4: Array1<c64> = derivative(hvib, (&coefficients + &(&k_3 * dt)).view());

    &coefficients + &((k_1 + &k_2 * 2.0 + &k_3 * 2.0 + k_4) * (dt / 6.0))
}

/// Advance the amplitudes of all trajectories by `dt` with the vibronic Hamiltonians held
/// constant. `hvibs[i]` belongs to trajectory i; with `reduced` the single matrix
/// `hvibs[0]` drives the whole ensemble. The amplitudes are not renormalized.
pub fn propagate_electronic(
    dt: f64,
    ampl: &mut Array2<c64>,
    hvibs: &[Array2<c64>],
    integrator: ElectronicIntegrator,
    reduced: bool,
) -> Result<(), DynamicsError> {
    let ntraj: usize = ampl.ncols();
    let nham: usize = if reduced { 1 } else { ntraj };
    if hvibs.len() < nham {
        return Err(DynamicsError::mismatch(format!(
            "{} vibronic Hamiltonians for {} trajectories",
            hvibs.len(),
            nham
        )));
    }

    match integrator {
        ElectronicIntegrator::MatrixExponential => {
            let propagators: Vec<Array2<c64>> = hvibs[..nham]
                .par_iter()
                .map(|hvib| matrix_exponential_propagator(hvib.view(), dt))
                .collect::<Result<Vec<Array2<c64>>, DynamicsError>>()?;
            ampl.axis_iter_mut(Axis(1))
                .into_par_iter()
                .enumerate()
                .for_each(|(traj, mut column)| {
                    let u_mat: &Array2<c64> = &propagators[if reduced { 0 } else { traj }];
                    let new_column: Array1<c64> = u_mat.dot(&column);
                    column.assign(&new_column);
                });
        }
        ElectronicIntegrator::RungeKutta => {
            ampl.axis_iter_mut(Axis(1))
                .into_par_iter()
                .enumerate()
                .for_each(|(traj, mut column)| {
                    let hvib: &Array2<c64> = &hvibs[if reduced { 0 } else { traj }];
                    let new_column: Array1<c64> = runge_kutta_step(hvib.view(), column.view(), dt);
                    column.assign(&new_column);
                });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn two_level(e: f64, coupling: f64) -> Array2<c64> {
        array![
            [c64::new(-e, 0.0), c64::new(coupling, 0.0)],
            [c64::new(coupling, 0.0), c64::new(e, 0.0)]
        ]
    }

    fn norms(ampl: &Array2<c64>) -> Vec<f64> {
        ampl.axis_iter(Axis(1))
            .map(|c| c.iter().map(|x| x.norm_sqr()).sum())
            .collect()
    }

    #[test]
    fn uncoupled_states_only_acquire_phases() {
        let mut ampl: Array2<c64> = array![[c64::new(0.6, 0.0)], [c64::new(0.8, 0.0)]];
        let hvib: Array2<c64> = two_level(0.1, 0.0);
        propagate_electronic(
            2.0,
            &mut ampl,
            &[hvib],
            ElectronicIntegrator::MatrixExponential,
            false,
        )
        .unwrap();
        assert_abs_diff_eq!(ampl[[0, 0]].norm(), 0.6, epsilon = 1e-12);
        assert_abs_diff_eq!(ampl[[1, 0]].norm(), 0.8, epsilon = 1e-12);
        // c_0(t) = 0.6 exp(+i 0.1 t)
        assert_abs_diff_eq!(ampl[[0, 0]].arg(), 0.2, epsilon = 1e-12);
    }

    #[test]
    fn rabi_oscillation_of_degenerate_states() {
        // with E = 0 the population oscillates as cos^2(V t)
        let coupling: f64 = 0.05;
        let mut ampl: Array2<c64> = array![[c64::new(1.0, 0.0)], [c64::new(0.0, 0.0)]];
        let t: f64 = 10.0;
        propagate_electronic(
            t,
            &mut ampl,
            &[two_level(0.0, coupling)],
            ElectronicIntegrator::MatrixExponential,
            false,
        )
        .unwrap();
        assert_abs_diff_eq!(ampl[[0, 0]].norm_sqr(), (coupling * t).cos().powi(2), epsilon = 1e-12);
        assert_abs_diff_eq!(norms(&ampl)[0], 1.0, epsilon = 1e-12);
    }

    #[test]
    fn runge_kutta_agrees_with_exponential() {
        let hvib: Array2<c64> = array![
            [c64::new(-0.02, 0.0), c64::new(0.0, -0.01)],
            [c64::new(0.0, 0.01), c64::new(0.03, 0.0)]
        ];
        let start: Array2<c64> = array![
            [c64::new(0.8, 0.0), c64::new(0.0, 1.0)],
            [c64::new(0.0, 0.6), c64::new(0.0, 0.0)]
        ];
        let mut exact: Array2<c64> = start.clone();
        let mut rk: Array2<c64> = start;
        let hvibs: Vec<Array2<c64>> = vec![hvib.clone(), hvib];
        for _ in 0..20 {
            propagate_electronic(0.5, &mut exact, &hvibs, ElectronicIntegrator::MatrixExponential, false)
                .unwrap();
            propagate_electronic(0.5, &mut rk, &hvibs, ElectronicIntegrator::RungeKutta, false)
                .unwrap();
        }
        for (a, b) in exact.iter().zip(rk.iter()) {
            assert_abs_diff_eq!((a - b).norm(), 0.0, epsilon = 1e-8);
        }
    }

    #[test]
    fn reduced_mode_broadcasts_the_first_hamiltonian() {
        let mut ampl: Array2<c64> = Array2::zeros((2, 3));
        ampl.row_mut(0).fill(c64::new(1.0, 0.0));
        propagate_electronic(
            3.0,
            &mut ampl,
            &[two_level(0.0, 0.1)],
            ElectronicIntegrator::MatrixExponential,
            true,
        )
        .unwrap();
        for traj in 1..3 {
            assert_abs_diff_eq!((ampl[[1, traj]] - ampl[[1, 0]]).norm(), 0.0, epsilon = 1e-14);
        }
        assert!(ampl[[1, 0]].norm() > 0.1);
    }

    #[test]
    fn missing_hamiltonians_are_a_mismatch() {
        let mut ampl: Array2<c64> = Array2::zeros((2, 2));
        let result = propagate_electronic(
            1.0,
            &mut ampl,
            &[two_level(0.0, 0.1)],
            ElectronicIntegrator::RungeKutta,
            false,
        );
        assert!(matches!(result, Err(DynamicsError::ConfigurationMismatch(_))));
    }
}
