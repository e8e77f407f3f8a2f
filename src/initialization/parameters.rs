use crate::constants;
use crate::error::DynamicsError;
use crate::initialization::DynamicConfiguration;
use ndarray::prelude::*;

/// Representation in which the amplitudes are propagated.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Representation {
    Diabatic,
    Adiabatic,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EnsembleType {
    Nve,
    Nvt,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ForceMethod {
    None,
    StateSpecific,
    Ehrenfest,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Entanglement {
    None,
    Ethd3,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ElectronicIntegrator {
    MatrixExponential,
    RungeKutta,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HoppingMethod {
    Off,
    Fssh,
    Gfssh,
    Mssh,
    LandauZener,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HopAcceptance {
    Always,
    Isotropic,
    AlongCoupling,
    AlongForceDifference,
    Boltzmann,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MomentumRescaling {
    None,
    Isotropic,
    AlongCoupling,
    AlongForceDifference,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrustratedReversal {
    Keep,
    AlongDirection,
    AlongCoupling,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DecoherenceMethod {
    None,
    Sdm,
    Instantaneous,
    Afssh,
    Bcsh,
    Mfsd,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DecoherenceTimes {
    Off,
    Flat,
    EnergyGap,
    SchwartzMeanField,
    SchwartzPairwise,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InstantaneousVariant {
    SuccessfulHops,
    AttemptedHops,
    FrustratedHops,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CollapseOption {
    KeepPhase,
    ResetPhase,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StateTracking {
    None,
    MaximalOverlap,
    Hungarian,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimeOverlapSource {
    Compute,
    Read,
}

// Each selector keeps exactly the ids that the configuration file accepts.
macro_rules! impl_algorithm_id {
    ($kind:literal, $enum:ident { $($id:literal => $variant:ident),+ $(,)? }) => {
        impl TryFrom<i32> for $enum {
            type Error = DynamicsError;

            fn try_from(id: i32) -> Result<Self, Self::Error> {
                match id {
                    $($id => Ok($enum::$variant),)+
                    _ => Err(DynamicsError::undefined($kind, id)),
                }
            }
        }
    };
}

impl_algorithm_id!("representation", Representation { 0 => Diabatic, 1 => Adiabatic });
impl_algorithm_id!("ensemble", EnsembleType { 0 => Nve, 1 => Nvt });
impl_algorithm_id!("force", ForceMethod { 0 => None, 1 => StateSpecific, 2 => Ehrenfest });
impl_algorithm_id!("entanglement", Entanglement { 0 => None, 22 => Ethd3 });
impl_algorithm_id!("hopping", HoppingMethod {
    -1 => Off,
    0 => Fssh,
    1 => Gfssh,
    2 => Mssh,
    4 => LandauZener,
});
impl_algorithm_id!("hop acceptance", HopAcceptance {
    0 => Always,
    10 => Isotropic,
    11 => AlongCoupling,
    12 => AlongForceDifference,
    31 => Boltzmann,
});
impl_algorithm_id!("momentum rescaling", MomentumRescaling {
    0 => None,
    100 => Isotropic,
    101 => AlongCoupling,
    102 => AlongForceDifference,
});
impl_algorithm_id!("momentum reversal", FrustratedReversal {
    0 => Keep,
    1 => AlongDirection,
    2 => AlongCoupling,
});
impl_algorithm_id!("decoherence", DecoherenceMethod {
    -1 => None,
    0 => Sdm,
    1 => Instantaneous,
    2 => Afssh,
    3 => Bcsh,
    4 => Mfsd,
});
impl_algorithm_id!("decoherence times", DecoherenceTimes {
    -1 => Off,
    0 => Flat,
    1 => EnergyGap,
    2 => SchwartzMeanField,
    3 => SchwartzPairwise,
});
impl_algorithm_id!("instantaneous decoherence", InstantaneousVariant {
    0 => SuccessfulHops,
    1 => AttemptedHops,
    2 => FrustratedHops,
});
impl_algorithm_id!("collapse", CollapseOption { 0 => KeepPhase, 1 => ResetPhase });
impl_algorithm_id!("state tracking", StateTracking {
    0 => None,
    1 => MaximalOverlap,
    2 => Hungarian,
});
impl_algorithm_id!("time overlap", TimeOverlapSource { 0 => Compute, 1 => Read });

impl TryFrom<&str> for ElectronicIntegrator {
    type Error = DynamicsError;

    fn try_from(name: &str) -> Result<Self, Self::Error> {
        match name.to_lowercase().as_str() {
            "exp" | "expm" | "matrix_exponential" => Ok(ElectronicIntegrator::MatrixExponential),
            "rk4" | "runge_kutta" => Ok(ElectronicIntegrator::RungeKutta),
            _ => Err(DynamicsError::mismatch(format!(
                "unknown electronic integrator '{}'",
                name
            ))),
        }
    }
}

/// Options of one step with every algorithm id resolved into its variant. Time quantities are
/// in atomic units.
#[derive(Clone, Debug)]
pub struct ControlParameters {
    pub dt: f64,
    pub num_el: usize,
    pub rep_tdse: Representation,
    pub reduced_ensemble: bool,
    pub temperature: f64,
    pub integrator: ElectronicIntegrator,
    pub ensemble: EnsembleType,
    pub force_method: ForceMethod,
    pub thermostat_dofs: Vec<usize>,
    pub constrained_dofs: Vec<usize>,
    pub entanglement: Entanglement,
    pub ethd3_alpha: f64,
    pub ethd3_beta: f64,
    pub tsh_method: HoppingMethod,
    pub hop_acceptance: HopAcceptance,
    pub momentum_rescaling: MomentumRescaling,
    pub do_reverse: FrustratedReversal,
    pub decoherence_algo: DecoherenceMethod,
    pub decoherence_times: DecoherenceTimes,
    pub decoherence_rates: Option<Array2<f64>>,
    pub decoherence_c_param: f64,
    pub decoherence_eps_param: f64,
    pub schwartz_inv_alpha: Option<Array1<f64>>,
    pub dephasing_informed: bool,
    pub ave_gaps: Option<Array2<f64>>,
    pub sdm_norm_tolerance: f64,
    pub instantaneous_variant: InstantaneousVariant,
    pub collapse_option: CollapseOption,
    pub state_tracking: StateTracking,
    pub do_phase_correction: bool,
    pub time_overlap: TimeOverlapSource,
}

impl ControlParameters {
    /// State tracking and phase correction both need the overlap of consecutive bases.
    pub fn needs_time_overlap(&self) -> bool {
        self.state_tracking != StateTracking::None || self.do_phase_correction
    }
}

fn nested_to_matrix(name: &str, rows: &[Vec<f64>]) -> Result<Option<Array2<f64>>, DynamicsError> {
    if rows.is_empty() {
        return Ok(None);
    }
    let n: usize = rows.len();
    let mut matrix: Array2<f64> = Array2::zeros((n, n));
    for (i, row) in rows.iter().enumerate() {
        if row.len() != n {
            return Err(DynamicsError::mismatch(format!(
                "{} must be a square matrix, row {} has {} entries instead of {}",
                name,
                i,
                row.len(),
                n
            )));
        }
        for (j, value) in row.iter().enumerate() {
            matrix[[i, j]] = *value;
        }
    }
    Ok(Some(matrix))
}

impl TryFrom<&DynamicConfiguration> for ControlParameters {
    type Error = DynamicsError;

    fn try_from(config: &DynamicConfiguration) -> Result<Self, Self::Error> {
        if config.num_electronic_substeps == 0 {
            return Err(DynamicsError::mismatch(
                "num_electronic_substeps must be at least 1",
            ));
        }
        let decoherence = &config.decoherence;
        let schwartz_inv_alpha: Option<Array1<f64>> = if decoherence.schwartz_inv_alpha.is_empty()
        {
            None
        } else {
            Some(Array1::from(decoherence.schwartz_inv_alpha.clone()))
        };

        Ok(ControlParameters {
            dt: config.stepsize * constants::FS_TO_AU,
            num_el: config.num_electronic_substeps,
            rep_tdse: Representation::try_from(config.rep_tdse)?,
            reduced_ensemble: config.reduced_ensemble,
            temperature: config.temperature,
            integrator: ElectronicIntegrator::try_from(config.electronic.integrator.as_str())?,
            ensemble: EnsembleType::try_from(config.nuclear.ensemble)?,
            force_method: ForceMethod::try_from(config.nuclear.force_method)?,
            thermostat_dofs: config.nuclear.thermostat_dofs.clone(),
            constrained_dofs: config.nuclear.constrained_dofs.clone(),
            entanglement: Entanglement::try_from(config.nuclear.entanglement_opt)?,
            ethd3_alpha: config.nuclear.ethd3_alpha,
            ethd3_beta: config.nuclear.ethd3_beta,
            tsh_method: HoppingMethod::try_from(config.hopping.tsh_method)?,
            hop_acceptance: HopAcceptance::try_from(config.hopping.hop_acceptance_algo)?,
            momentum_rescaling: MomentumRescaling::try_from(
                config.hopping.momentum_rescaling_algo,
            )?,
            do_reverse: FrustratedReversal::try_from(config.hopping.do_reverse)?,
            decoherence_algo: DecoherenceMethod::try_from(decoherence.decoherence_algo)?,
            decoherence_times: DecoherenceTimes::try_from(decoherence.decoherence_times_type)?,
            decoherence_rates: nested_to_matrix(
                "decoherence_rates",
                &decoherence.decoherence_rates,
            )?,
            decoherence_c_param: decoherence.decoherence_c_param,
            decoherence_eps_param: decoherence.decoherence_eps_param,
            schwartz_inv_alpha,
            dephasing_informed: decoherence.dephasing_informed,
            ave_gaps: nested_to_matrix("ave_gaps", &decoherence.ave_gaps)?,
            sdm_norm_tolerance: decoherence.sdm_norm_tolerance,
            instantaneous_variant: InstantaneousVariant::try_from(
                decoherence.instantaneous_decoherence_variant,
            )?,
            collapse_option: CollapseOption::try_from(decoherence.collapse_option)?,
            state_tracking: StateTracking::try_from(config.state_tracking.state_tracking_algo)?,
            do_phase_correction: config.state_tracking.do_phase_correction,
            time_overlap: TimeOverlapSource::try_from(config.state_tracking.time_overlap_method)?,
        })
    }
}
