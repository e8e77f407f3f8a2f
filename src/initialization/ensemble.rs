use crate::initialization::parameters::Representation;
use crate::interface::HamiltonianProvider;
use ndarray::prelude::*;
use ndarray_linalg::c64;

/// Dense storage of the A-FSSH moments. Every (trajectory, dof) pair owns one position
/// deviation and one momentum deviation matrix of size nadi x nadi.
#[derive(Clone, Debug)]
pub struct AuxiliaryMoments {
    pub ntraj: usize,
    pub ndof: usize,
    pub dr: Vec<Array2<c64>>,
    pub dp: Vec<Array2<c64>>,
}

impl AuxiliaryMoments {
    pub fn new(ntraj: usize, ndof: usize, nstates: usize) -> Self {
        let n: usize = ntraj * ndof;
        AuxiliaryMoments {
            ntraj,
            ndof,
            dr: vec![Array2::zeros((nstates, nstates)); n],
            dp: vec![Array2::zeros((nstates, nstates)); n],
        }
    }

    #[inline]
    pub fn index(&self, traj: usize, dof: usize) -> usize {
        traj * self.ndof + dof
    }

    pub fn dr(&self, traj: usize, dof: usize) -> &Array2<c64> {
        &self.dr[self.index(traj, dof)]
    }

    pub fn dp(&self, traj: usize, dof: usize) -> &Array2<c64> {
        &self.dp[self.index(traj, dof)]
    }

    /// Mutable access to both moments of one (trajectory, dof) pair.
    pub fn pair_mut(&mut self, traj: usize, dof: usize) -> (&mut Array2<c64>, &mut Array2<c64>) {
        let idx: usize = self.index(traj, dof);
        (&mut self.dr[idx], &mut self.dp[idx])
    }

    /// Zero row and column `state` of every moment of `traj`.
    pub fn reset_state(&mut self, traj: usize, state: usize) {
        for dof in 0..self.ndof {
            let (dr, dp) = self.pair_mut(traj, dof);
            for mat in [dr, dp] {
                mat.row_mut(state).fill(c64::new(0.0, 0.0));
                mat.column_mut(state).fill(c64::new(0.0, 0.0));
            }
        }
    }

    pub fn reset_trajectory(&mut self, traj: usize) {
        for dof in 0..self.ndof {
            let (dr, dp) = self.pair_mut(traj, dof);
            dr.fill(c64::new(0.0, 0.0));
            dp.fill(c64::new(0.0, 0.0));
        }
    }
}

/// All dynamical variables of the ensemble. Columns index trajectories.
#[derive(Clone, Debug)]
pub struct EnsembleState {
    pub ndof: usize,
    pub ndia: usize,
    pub nadi: usize,
    pub ntraj: usize,
    pub q: Array2<f64>,
    pub p: Array2<f64>,
    pub inv_m: Array1<f64>,
    pub ampl_dia: Array2<c64>,
    pub ampl_adi: Array2<c64>,
    pub act_states: Vec<usize>,
    pub projectors: Vec<Array2<c64>>,
    pub moments: AuxiliaryMoments,
    pub reversal_events: Vec<bool>,
}

impl EnsembleState {
    pub fn new(ndof: usize, ndia: usize, nadi: usize, ntraj: usize) -> Self {
        let mut ampl_dia: Array2<c64> = Array2::zeros((ndia, ntraj));
        let mut ampl_adi: Array2<c64> = Array2::zeros((nadi, ntraj));
        ampl_dia.row_mut(0).fill(c64::new(1.0, 0.0));
        ampl_adi.row_mut(0).fill(c64::new(1.0, 0.0));

        EnsembleState {
            ndof,
            ndia,
            nadi,
            ntraj,
            q: Array2::zeros((ndof, ntraj)),
            p: Array2::zeros((ndof, ntraj)),
            inv_m: Array1::ones(ndof),
            ampl_dia,
            ampl_adi,
            act_states: vec![0; ntraj],
            projectors: vec![Array2::eye(nadi); ntraj],
            moments: AuxiliaryMoments::new(ntraj, ndof, nadi),
            reversal_events: vec![false; ntraj],
        }
    }

    /// Put every trajectory into the adiabatic state `state` with unit amplitude.
    pub fn set_initial_state(&mut self, state: usize) {
        self.ampl_adi.fill(c64::new(0.0, 0.0));
        self.ampl_adi.row_mut(state).fill(c64::new(1.0, 0.0));
        self.act_states.iter_mut().for_each(|a| *a = state);
    }

    pub fn amplitudes(&self, rep: Representation) -> &Array2<c64> {
        match rep {
            Representation::Diabatic => &self.ampl_dia,
            Representation::Adiabatic => &self.ampl_adi,
        }
    }

    pub fn amplitudes_mut(&mut self, rep: Representation) -> &mut Array2<c64> {
        match rep {
            Representation::Diabatic => &mut self.ampl_dia,
            Representation::Adiabatic => &mut self.ampl_adi,
        }
    }

    pub fn kinetic_energy(&self, traj: usize) -> f64 {
        self.p
            .column(traj)
            .iter()
            .zip(self.inv_m.iter())
            .map(|(p, im)| 0.5 * p * p * im)
            .sum()
    }

    /// Kinetic energy restricted to the degrees of freedom in `dofs`.
    pub fn kinetic_energy_of(&self, traj: usize, dofs: &[usize]) -> f64 {
        dofs.iter()
            .map(|&dof| 0.5 * self.p[[dof, traj]].powi(2) * self.inv_m[dof])
            .sum()
    }

    /// Reduced density matrix c c^H of one trajectory.
    pub fn density_matrix(&self, traj: usize, rep: Representation) -> Array2<c64> {
        let c: ArrayView1<c64> = self.amplitudes(rep).column(traj);
        let n: usize = c.len();
        Array2::from_shape_fn((n, n), |(i, j)| c[i] * c[j].conj())
    }

    pub fn populations(&self, rep: Representation) -> Array2<f64> {
        self.amplitudes(rep).mapv(|c| c.norm_sqr())
    }

    /// Derive the amplitudes of the representation that is not propagated from the one
    /// that is, using the basis transform U with c_dia = U c_adi.
    pub fn update_amplitudes(
        &mut self,
        rep: Representation,
        ham: &dyn HamiltonianProvider,
        reduced: bool,
    ) {
        for traj in 0..self.ntraj {
            let u: ArrayView2<c64> = ham.basis_transform(if reduced { 0 } else { traj });
            match rep {
                Representation::Diabatic => {
                    let c_adi: Array1<c64> =
                        u.t().mapv(|x| x.conj()).dot(&self.ampl_dia.column(traj));
                    self.ampl_adi.column_mut(traj).assign(&c_adi);
                }
                Representation::Adiabatic => {
                    let c_dia: Array1<c64> = u.dot(&self.ampl_adi.column(traj));
                    self.ampl_dia.column_mut(traj).assign(&c_dia);
                }
            }
        }
    }

    /// Check that all arrays agree with (ndof, ndia, nadi, ntraj).
    pub fn check_dimensions(&self) -> Result<(), String> {
        let expect = |name: &str, got: (usize, usize), want: (usize, usize)| {
            if got != want {
                Err(format!("{} has shape {:?}, expected {:?}", name, got, want))
            } else {
                Ok(())
            }
        };
        expect("q", self.q.dim(), (self.ndof, self.ntraj))?;
        expect("p", self.p.dim(), (self.ndof, self.ntraj))?;
        expect("ampl_dia", self.ampl_dia.dim(), (self.ndia, self.ntraj))?;
        expect("ampl_adi", self.ampl_adi.dim(), (self.nadi, self.ntraj))?;
        if self.inv_m.len() != self.ndof {
            return Err(format!(
                "inv_m has length {}, expected {}",
                self.inv_m.len(),
                self.ndof
            ));
        }
        if self.act_states.len() != self.ntraj || self.projectors.len() != self.ntraj {
            return Err(String::from("one active state and projector per trajectory required"));
        }
        if let Some(state) = self.act_states.iter().find(|&&a| a >= self.nadi) {
            return Err(format!("active state {} out of range", state));
        }
        Ok(())
    }
}
