use crate::error::DynamicsError;
use crate::initialization::ModelConfiguration;
use crate::interface::HamiltonianProvider;
use ndarray::prelude::*;
use ndarray_linalg::{c64, Eigh, UPLO};

/// Analytic two-state diabatic models. Both act on the first degree of freedom; every other
/// dof is free.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ModelKind {
    /// H = [[k x^2, V], [V, k (x - x0)^2 + D]]
    Crossing { x0: f64, k: f64, d: f64, v: f64 },
    /// H = [[k cos(w x), V], [V, k sin(w x)]]
    Periodic { k: f64, omega: f64, v: f64 },
}

impl ModelKind {
    pub fn from_config(config: &ModelConfiguration) -> Result<Self, DynamicsError> {
        match config.model {
            1 => Ok(ModelKind::Crossing {
                x0: config.x0,
                k: config.k,
                d: config.d,
                v: config.v,
            }),
            4 => Ok(ModelKind::Periodic {
                k: config.k,
                omega: config.omega,
                v: config.v,
            }),
            id => Err(DynamicsError::undefined("model", id as i32)),
        }
    }

    /// Diabatic Hamiltonian with its first and second derivative at x.
    fn evaluate(&self, x: f64) -> ([[f64; 2]; 2], [f64; 2], [f64; 2]) {
        match *self {
            ModelKind::Crossing { x0, k, d, v } => (
                [[k * x * x, v], [v, k * (x - x0).powi(2) + d]],
                [2.0 * k * x, 2.0 * k * (x - x0)],
                [2.0 * k, 2.0 * k],
            ),
            ModelKind::Periodic { k, omega, v } => {
                let (s, c): (f64, f64) = (omega * x).sin_cos();
                (
                    [[k * c, v], [v, k * s]],
                    [-omega * k * s, omega * k * c],
                    [-omega * omega * k * c, -omega * omega * k * s],
                )
            }
        }
    }
}

/// Electronic quantities of one trajectory.
#[derive(Clone, Debug)]
struct TrajectoryData {
    ham_dia: Array2<c64>,
    ham_adi: Array2<c64>,
    hvib_dia: Array2<c64>,
    hvib_adi: Array2<c64>,
    basis: Array2<c64>,
    initialized: bool,
    time_overlap: Array2<c64>,
    d1ham_dia: Vec<Array2<c64>>,
    d1ham_adi: Vec<Array2<c64>>,
    d2ham_dia: Vec<Array2<c64>>,
    dc1_adi: Vec<Array2<c64>>,
}

impl TrajectoryData {
    fn new(ndof: usize) -> Self {
        let zeros: Array2<c64> = Array2::zeros((2, 2));
        TrajectoryData {
            ham_dia: zeros.clone(),
            ham_adi: zeros.clone(),
            hvib_dia: zeros.clone(),
            hvib_adi: zeros.clone(),
            basis: Array2::eye(2),
            initialized: false,
            time_overlap: Array2::eye(2),
            d1ham_dia: vec![zeros.clone(); ndof],
            d1ham_adi: vec![zeros.clone(); ndof],
            d2ham_dia: vec![zeros.clone(); ndof * ndof],
            dc1_adi: vec![zeros; ndof],
        }
    }
}

/// Handle collection for an ensemble running on an analytic model. The adiabatic states are
/// obtained by diagonalization at every geometry, so their order and sign are whatever the
/// eigensolver returns.
pub struct ModelHamiltonian {
    pub kind: ModelKind,
    pub ndof: usize,
    data: Vec<TrajectoryData>,
}

fn complex(x: f64) -> c64 {
    c64::new(x, 0.0)
}

fn adjoint(a: ArrayView2<c64>) -> Array2<c64> {
    a.t().mapv(|x| x.conj())
}

impl ModelHamiltonian {
    pub fn new(kind: ModelKind, ndof: usize, ntraj: usize) -> Self {
        ModelHamiltonian {
            kind,
            ndof,
            data: vec![TrajectoryData::new(ndof); ntraj],
        }
    }

    pub fn energies(&self, traj: usize) -> Array1<f64> {
        self.data[traj].ham_adi.diag().mapv(|e| e.re)
    }

    fn compute_trajectory(&mut self, traj: usize, x: f64) -> Result<(), DynamicsError> {
        let ndof: usize = self.ndof;
        let (h, d1, d2) = self.kind.evaluate(x);
        let ham_dia: Array2<c64> = Array2::from_shape_fn((2, 2), |(i, j)| complex(h[i][j]));
        let (energies, basis): (Array1<f64>, Array2<c64>) = ham_dia.eigh(UPLO::Lower)?;
        let basis_h: Array2<c64> = adjoint(basis.view());

        let data: &mut TrajectoryData = &mut self.data[traj];
        let prev_basis: Array2<c64> = std::mem::replace(&mut data.basis, basis);
        data.time_overlap = if data.initialized {
            adjoint(prev_basis.view()).dot(&data.basis)
        } else {
            Array2::eye(2)
        };
        data.initialized = true;

        for dof in 0..ndof {
            let mut d1ham: Array2<c64> = Array2::zeros((2, 2));
            let mut d2ham: Array2<c64> = Array2::zeros((2, 2));
            if dof == 0 {
                d1ham[[0, 0]] = complex(d1[0]);
                d1ham[[1, 1]] = complex(d1[1]);
                d2ham[[0, 0]] = complex(d2[0]);
                d2ham[[1, 1]] = complex(d2[1]);
            }
            let d1ham_adi: Array2<c64> = basis_h.dot(&d1ham.dot(&data.basis));

            // Hellmann-Feynman: <i|dH|j> = (E_j - E_i) <i|d/dR j>
            let mut dc1: Array2<c64> = Array2::zeros((2, 2));
            for i in 0..2 {
                for j in 0..2 {
                    let gap: f64 = energies[j] - energies[i];
                    if i != j && gap.abs() > 1.0e-12 {
                        dc1[[i, j]] = d1ham_adi[[i, j]] / gap;
                    }
                }
            }
            data.d1ham_dia[dof] = d1ham;
            data.d1ham_adi[dof] = d1ham_adi;
            data.dc1_adi[dof] = dc1;
            data.d2ham_dia[dof * ndof + dof] = d2ham;
        }
        data.ham_adi = Array2::from_diag(&energies.mapv(complex));
        data.ham_dia = ham_dia;
        Ok(())
    }
}

impl HamiltonianProvider for ModelHamiltonian {
    fn ndia(&self) -> usize {
        2
    }

    fn nadi(&self) -> usize {
        2
    }

    fn ntraj(&self) -> usize {
        self.data.len()
    }

    fn update_geometry(&mut self, q: ArrayView2<f64>) -> Result<(), DynamicsError> {
        for traj in 0..self.data.len() {
            self.compute_trajectory(traj, q[[0, traj]])?;
        }
        Ok(())
    }

    fn update_momenta(
        &mut self,
        p: ArrayView2<f64>,
        inv_m: ArrayView1<f64>,
    ) -> Result<(), DynamicsError> {
        for (traj, data) in self.data.iter_mut().enumerate() {
            // Hvib = E - i sum_dof d_dof v_dof
            let mut hvib: Array2<c64> = data.ham_adi.clone();
            for (dof, dc1) in data.dc1_adi.iter().enumerate() {
                let velocity: f64 = p[[dof, traj]] * inv_m[dof];
                hvib.scaled_add(c64::new(0.0, -velocity), dc1);
            }
            data.hvib_adi = hvib;
            data.hvib_dia = data.ham_dia.clone();
        }
        Ok(())
    }

    fn basis_transform(&self, traj: usize) -> ArrayView2<c64> {
        self.data[traj].basis.view()
    }

    fn time_overlap_adi(&self, traj: usize) -> ArrayView2<c64> {
        self.data[traj].time_overlap.view()
    }

    fn set_time_overlap_adi(&mut self, traj: usize, st: Array2<c64>) {
        self.data[traj].time_overlap = st;
    }

    fn hvib_adi(&self, traj: usize) -> ArrayView2<c64> {
        self.data[traj].hvib_adi.view()
    }

    fn hvib_dia(&self, traj: usize) -> ArrayView2<c64> {
        self.data[traj].hvib_dia.view()
    }

    fn ham_adi(&self, traj: usize) -> ArrayView2<c64> {
        self.data[traj].ham_adi.view()
    }

    fn ham_dia(&self, traj: usize) -> ArrayView2<c64> {
        self.data[traj].ham_dia.view()
    }

    fn d1ham_adi(&self, traj: usize, dof: usize) -> ArrayView2<c64> {
        self.data[traj].d1ham_adi[dof].view()
    }

    fn d1ham_dia(&self, traj: usize, dof: usize) -> ArrayView2<c64> {
        self.data[traj].d1ham_dia[dof].view()
    }

    fn d2ham_dia(&self, traj: usize, dof1: usize, dof2: usize) -> ArrayView2<c64> {
        self.data[traj].d2ham_dia[dof1 * self.ndof + dof2].view()
    }

    fn dc1_adi(&self, traj: usize, dof: usize) -> ArrayView2<c64> {
        self.data[traj].dc1_adi[dof].view()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn crossing() -> ModelKind {
        ModelKind::Crossing {
            x0: 1.0,
            k: 0.1,
            d: -0.1,
            v: 0.05,
        }
    }

    #[test]
    fn adiabatic_energies_bracket_the_diabats() {
        let mut ham: ModelHamiltonian = ModelHamiltonian::new(crossing(), 1, 1);
        ham.update_geometry(array![[0.0]].view()).unwrap();
        let e: Array1<f64> = ham.energies(0);
        // at x = 0 both diabats are zero, the coupling splits them by 2V
        assert_abs_diff_eq!(e[0], -0.05, epsilon = 1e-12);
        assert_abs_diff_eq!(e[1], 0.05, epsilon = 1e-12);
    }

    #[test]
    fn basis_diagonalizes_the_diabatic_hamiltonian() {
        let mut ham: ModelHamiltonian = ModelHamiltonian::new(crossing(), 2, 1);
        ham.update_geometry(array![[0.3], [1.0]].view()).unwrap();
        let u: ArrayView2<c64> = ham.basis_transform(0);
        let h_adi: Array2<c64> = adjoint(u).dot(&ham.ham_dia(0).dot(&u));
        assert_abs_diff_eq!(h_adi[[0, 1]].norm(), 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(h_adi[[0, 0]].re, ham.ham_adi(0)[[0, 0]].re, epsilon = 1e-12);
        // the second dof does not enter the model
        assert_abs_diff_eq!(ham.d1ham_dia(0, 1)[[1, 1]].norm(), 0.0, epsilon = 1e-14);
        assert_abs_diff_eq!(ham.d2ham_dia(0, 0, 0)[[0, 0]].re, 0.2, epsilon = 1e-14);
    }

    #[test]
    fn adiabatic_gradient_matches_finite_difference() {
        let mut ham: ModelHamiltonian = ModelHamiltonian::new(crossing(), 1, 1);
        let x: f64 = 0.2;
        let h: f64 = 1.0e-5;
        ham.update_geometry(array![[x + h]].view()).unwrap();
        let e_plus: Array1<f64> = ham.energies(0);
        ham.update_geometry(array![[x - h]].view()).unwrap();
        let e_minus: Array1<f64> = ham.energies(0);
        ham.update_geometry(array![[x]].view()).unwrap();
        let grad0: f64 = ham.d1ham_adi(0, 0)[[0, 0]].re;
        assert_abs_diff_eq!(grad0, (e_plus[0] - e_minus[0]) / (2.0 * h), epsilon = 1e-7);
        let dc: ArrayView2<c64> = ham.dc1_adi(0, 0);
        // antisymmetric
        assert_abs_diff_eq!((dc[[0, 1]] + dc[[1, 0]].conj()).norm(), 0.0, epsilon = 1e-10);
    }

    #[test]
    fn vibronic_hamiltonian_is_hermitian() {
        let mut ham: ModelHamiltonian = ModelHamiltonian::new(crossing(), 1, 2);
        ham.update_geometry(array![[0.1, -0.4]].view()).unwrap();
        ham.update_momenta(array![[5.0, -3.0]].view(), array![0.01].view())
            .unwrap();
        for traj in 0..2 {
            let hvib: ArrayView2<c64> = ham.hvib_adi(traj);
            assert_abs_diff_eq!((hvib[[0, 1]] - hvib[[1, 0]].conj()).norm(), 0.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn time_overlap_of_identical_geometries_is_unitary_diagonal() {
        let mut ham: ModelHamiltonian = ModelHamiltonian::new(crossing(), 1, 1);
        ham.update_geometry(array![[0.5]].view()).unwrap();
        ham.update_geometry(array![[0.5]].view()).unwrap();
        let st: ArrayView2<c64> = ham.time_overlap_adi(0);
        assert_abs_diff_eq!(st[[0, 0]].norm(), 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(st[[1, 1]].norm(), 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(st[[0, 1]].norm(), 0.0, epsilon = 1e-12);
    }
}
