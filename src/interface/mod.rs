use crate::error::DynamicsError;
use ndarray::prelude::*;
use ndarray_linalg::c64;

pub mod model;

/// Collection of electronic-structure handles, one per trajectory.
///
/// The dynamics never owns the handles. It commands a refresh with one batched call per
/// geometry or momentum update and afterwards queries the quantities of single trajectories.
/// Matrices are indexed by electronic state; `dof` selects the nuclear degree of freedom of
/// a derivative. The diabatic basis is assumed to be orthonormal, so that the basis
/// transform U (ndia x nadi) maps adiabatic to diabatic amplitudes, c_dia = U c_adi.
pub trait HamiltonianProvider {
    fn ndia(&self) -> usize;
    fn nadi(&self) -> usize;
    fn ntraj(&self) -> usize;

    /// Recompute all geometry-dependent quantities. `q` has shape ndof x ntraj.
    fn update_geometry(&mut self, q: ArrayView2<f64>) -> Result<(), DynamicsError>;
    /// Recompute the momentum-dependent couplings and the vibronic Hamiltonians.
    fn update_momenta(&mut self, p: ArrayView2<f64>, inv_m: ArrayView1<f64>)
        -> Result<(), DynamicsError>;

    fn basis_transform(&self, traj: usize) -> ArrayView2<c64>;
    /// Overlap of the adiabatic states of the previous and the current geometry,
    /// St_ij = <psi_i(t)|psi_j(t+dt)>.
    fn time_overlap_adi(&self, traj: usize) -> ArrayView2<c64>;
    fn set_time_overlap_adi(&mut self, traj: usize, st: Array2<c64>);

    fn hvib_adi(&self, traj: usize) -> ArrayView2<c64>;
    fn hvib_dia(&self, traj: usize) -> ArrayView2<c64>;
    fn ham_adi(&self, traj: usize) -> ArrayView2<c64>;
    fn ham_dia(&self, traj: usize) -> ArrayView2<c64>;

    fn d1ham_adi(&self, traj: usize, dof: usize) -> ArrayView2<c64>;
    fn d1ham_dia(&self, traj: usize, dof: usize) -> ArrayView2<c64>;
    fn d2ham_dia(&self, traj: usize, dof1: usize, dof2: usize) -> ArrayView2<c64>;
    /// Derivative couplings <psi_i|d/dR psi_j> of the adiabatic states.
    fn dc1_adi(&self, traj: usize, dof: usize) -> ArrayView2<c64>;
}
