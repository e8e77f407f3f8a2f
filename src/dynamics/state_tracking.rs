use crate::dynamics::dynamic_routines::ham_index;
use crate::error::DynamicsError;
use crate::initialization::ensemble::EnsembleState;
use crate::initialization::parameters::{
    ControlParameters, Representation, StateTracking, TimeOverlapSource,
};
use crate::interface::HamiltonianProvider;
use log::{debug, warn};
use ndarray::prelude::*;
use ndarray_linalg::c64;

const DEGENERACY_THRESHOLD: f64 = 1.0e-8;

fn is_degenerate(st: ArrayView2<c64>) -> bool {
    if st.iter().any(|s| !s.re.is_finite() || !s.im.is_finite()) {
        return true;
    }
    let row_max = |row: ArrayView1<c64>| row.iter().fold(0.0_f64, |m, s| m.max(s.norm()));
    st.axis_iter(Axis(0)).any(|row| row_max(row) < DEGENERACY_THRESHOLD)
        || st.axis_iter(Axis(1)).any(|col| row_max(col) < DEGENERACY_THRESHOLD)
}

/// Repeatedly assign the largest remaining overlap. The scan runs row-major and keeps the first
/// of equal elements.
fn maximal_overlap(st: ArrayView2<c64>) -> Vec<usize> {
    let n: usize = st.nrows();
    let mut perm: Vec<usize> = vec![0; n];
    let mut row_used: Vec<bool> = vec![false; n];
    let mut col_used: Vec<bool> = vec![false; n];
    for _ in 0..n {
        let mut best: Option<(usize, usize, f64)> = None;
        for i in (0..n).filter(|&i| !row_used[i]) {
            for j in (0..n).filter(|&j| !col_used[j]) {
                let value: f64 = st[[i, j]].norm();
                if best.map_or(true, |(_, _, b)| value > b) {
                    best = Some((i, j, value));
                }
            }
        }
        if let Some((i, j, _)) = best {
            perm[i] = j;
            row_used[i] = true;
            col_used[j] = true;
        }
    }
    perm
}

/// Minimum-cost assignment of a square cost matrix (Kuhn-Munkres with potentials).
/// Returns for every row the assigned column.
fn hungarian(cost: ArrayView2<f64>) -> Vec<usize> {
    let n: usize = cost.nrows();
    // 1-based, index 0 is the virtual row/column
    let mut u: Vec<f64> = vec![0.0; n + 1];
    let mut v: Vec<f64> = vec![0.0; n + 1];
    let mut row_of: Vec<usize> = vec![0; n + 1];
    let mut way: Vec<usize> = vec![0; n + 1];

    for i in 1..=n {
        row_of[0] = i;
        let mut j0: usize = 0;
        let mut minv: Vec<f64> = vec![f64::INFINITY; n + 1];
        let mut used: Vec<bool> = vec![false; n + 1];
        loop {
            used[j0] = true;
            let i0: usize = row_of[j0];
            let mut delta: f64 = f64::INFINITY;
            let mut j1: usize = 0;
            for j in 1..=n {
                if !used[j] {
                    let current: f64 = cost[[i0 - 1, j - 1]] - u[i0] - v[j];
                    if current < minv[j] {
                        minv[j] = current;
                        way[j] = j0;
                    }
                    if minv[j] < delta {
                        delta = minv[j];
                        j1 = j;
                    }
                }
            }
            for j in 0..=n {
                if used[j] {
                    u[row_of[j]] += delta;
                    v[j] -= delta;
                } else {
                    minv[j] -= delta;
                }
            }
            j0 = j1;
            if row_of[j0] == 0 {
                break;
            }
        }
        loop {
            let j1: usize = way[j0];
            row_of[j0] = row_of[j1];
            j0 = j1;
            if j0 == 0 {
                break;
            }
        }
    }

    let mut perm: Vec<usize> = vec![0; n];
    for j in 1..=n {
        perm[row_of[j] - 1] = j - 1;
    }
    perm
}

/// Bijection `perm` between the states of two consecutive steps: old state i continues as the
/// new state perm[i].
pub fn compute_permutations(
    st: ArrayView2<c64>,
    algo: StateTracking,
    traj: usize,
) -> Result<Vec<usize>, DynamicsError> {
    let n: usize = st.nrows();
    if algo == StateTracking::None {
        return Ok((0..n).collect());
    }
    if is_degenerate(st) {
        return Err(DynamicsError::NumericalDegeneracy { traj });
    }
    let perm: Vec<usize> = match algo {
        StateTracking::MaximalOverlap => maximal_overlap(st),
        _ => hungarian(st.mapv(|s| -s.norm_sqr()).view()),
    };
    Ok(perm)
}

/// Projector T with T[perm(i), i] = conj(phase_i). The phase is S_{i,perm(i)}/|S_{i,perm(i)}|
/// with phase correction and 1 otherwise.
pub fn compute_projectors(
    st: ArrayView2<c64>,
    perm: &[usize],
    do_phase_correction: bool,
) -> Array2<c64> {
    let n: usize = st.nrows();
    let mut projector: Array2<c64> = Array2::zeros((n, n));
    for (i, &j) in perm.iter().enumerate() {
        let overlap: c64 = st[[i, j]];
        let phase: c64 = if do_phase_correction && overlap.norm() > 0.0 {
            overlap / overlap.norm()
        } else {
            c64::new(1.0, 0.0)
        };
        projector[[j, i]] = phase.conj();
    }
    projector
}

/// Basis transforms cached before the geometry update, needed when the time overlap is
/// computed from consecutive bases.
pub fn cache_basis_transforms(
    ham: &dyn HamiltonianProvider,
    prms: &ControlParameters,
    ntraj: usize,
) -> Option<Vec<Array2<c64>>> {
    if prms.needs_time_overlap() && prms.time_overlap == TimeOverlapSource::Compute {
        let nham: usize = if prms.reduced_ensemble { 1 } else { ntraj };
        Some((0..nham).map(|idx| ham.basis_transform(idx).to_owned()).collect())
    } else {
        None
    }
}

/// Follow the adiabatic states across the last geometry update. The amplitudes of the
/// adiabatic representation and the projectors are transformed with T and the active states
/// are renumbered. Returns the projectors of this step, one per handle, or nothing if
/// neither tracking nor phase correction is requested.
pub fn track_states(
    state: &mut EnsembleState,
    ham: &mut dyn HamiltonianProvider,
    uprev: Option<&[Array2<c64>]>,
    prms: &ControlParameters,
) -> Result<Vec<Array2<c64>>, DynamicsError> {
    if !prms.needs_time_overlap() {
        return Ok(Vec::new());
    }
    let nham: usize = if prms.reduced_ensemble { 1 } else { state.ntraj };
    let mut permutations: Vec<Vec<usize>> = Vec::with_capacity(nham);
    let mut projectors: Vec<Array2<c64>> = Vec::with_capacity(nham);

    for idx in 0..nham {
        let st: Array2<c64> = match (prms.time_overlap, uprev) {
            (TimeOverlapSource::Compute, Some(uprev)) => {
                let u_prev_h: Array2<c64> = uprev[idx].t().mapv(|x| x.conj());
                let st: Array2<c64> = u_prev_h.dot(&ham.basis_transform(idx));
                ham.set_time_overlap_adi(idx, st.clone());
                st
            }
            (TimeOverlapSource::Compute, None) => {
                return Err(DynamicsError::mismatch(
                    "time overlap must be computed but no previous basis was cached",
                ))
            }
            (TimeOverlapSource::Read, _) => ham.time_overlap_adi(idx).to_owned(),
        };
        let perm: Vec<usize> = match compute_permutations(st.view(), prms.state_tracking, idx) {
            Ok(perm) => perm,
            Err(err @ DynamicsError::NumericalDegeneracy { .. }) => {
                warn!("{}", err);
                (0..st.nrows()).collect()
            }
            Err(err) => return Err(err),
        };
        projectors.push(compute_projectors(st.view(), &perm, prms.do_phase_correction));
        permutations.push(perm);
    }

    for traj in 0..state.ntraj {
        let idx: usize = ham_index(traj, prms.reduced_ensemble);
        let t_mat: &Array2<c64> = &projectors[idx];
        if prms.rep_tdse == Representation::Adiabatic {
            let c_new: Array1<c64> = t_mat.dot(&state.ampl_adi.column(traj));
            state.ampl_adi.column_mut(traj).assign(&c_new);
        }
        state.projectors[traj] = t_mat.dot(&state.projectors[traj]);
        let old: usize = state.act_states[traj];
        state.act_states[traj] = permutations[idx][old];
        if old != state.act_states[traj] {
            debug!("trajectory {}: state {} continues as {}", traj, old, state.act_states[traj]);
        }
    }
    Ok(projectors)
}
