use crate::defaults::*;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

fn default_nstep() -> usize {
    NSTEP
}
fn default_stepsize() -> f64 {
    STEPSIZE
}
fn default_num_electronic_substeps() -> usize {
    NUM_ELECTRONIC_SUBSTEPS
}
fn default_seed() -> u64 {
    SEED
}
fn default_rep_tdse() -> i32 {
    REP_TDSE
}
fn default_reduced_ensemble() -> bool {
    REDUCED_ENSEMBLE
}
fn default_temperature() -> f64 {
    TEMPERATURE
}
fn default_electronic_integrator() -> String {
    String::from(ELECTRONIC_INTEGRATOR)
}
fn default_ensemble() -> i32 {
    ENSEMBLE
}
fn default_force_method() -> i32 {
    FORCE_METHOD
}
fn default_entanglement_opt() -> i32 {
    ENTANGLEMENT_OPT
}
fn default_ethd3_alpha() -> f64 {
    ETHD3_ALPHA
}
fn default_ethd3_beta() -> f64 {
    ETHD3_BETA
}
fn default_thermostat_type() -> String {
    String::from(THERMOSTAT_TYPE)
}
fn default_time_coupling() -> f64 {
    TIME_COUPLING
}
fn default_nh_steps() -> usize {
    NH_STEPS
}
fn default_nh_chain_length() -> usize {
    NH_CHAIN_LENGTH
}
fn default_nh_order() -> usize {
    NH_ORDER
}
fn default_tsh_method() -> i32 {
    TSH_METHOD
}
fn default_hop_acceptance_algo() -> i32 {
    HOP_ACCEPTANCE_ALGO
}
fn default_momentum_rescaling_algo() -> i32 {
    MOMENTUM_RESCALING_ALGO
}
fn default_do_reverse() -> i32 {
    DO_REVERSE
}
fn default_decoherence_algo() -> i32 {
    DECOHERENCE_ALGO
}
fn default_decoherence_times_type() -> i32 {
    DECOHERENCE_TIMES_TYPE
}
fn default_decoherence_c_param() -> f64 {
    DECOHERENCE_C_PARAM
}
fn default_decoherence_eps_param() -> f64 {
    DECOHERENCE_EPS_PARAM
}
fn default_sdm_norm_tolerance() -> f64 {
    SDM_NORM_TOLERANCE
}
fn default_dephasing_informed() -> bool {
    DEPHASING_INFORMED
}
fn default_instantaneous_decoherence_variant() -> i32 {
    INSTANTANEOUS_DECOHERENCE_VARIANT
}
fn default_collapse_option() -> i32 {
    COLLAPSE_OPTION
}
fn default_state_tracking_algo() -> i32 {
    STATE_TRACKING_ALGO
}
fn default_do_phase_correction() -> bool {
    DO_PHASE_CORRECTION
}
fn default_time_overlap_method() -> i32 {
    TIME_OVERLAP_METHOD
}
fn default_model_id() -> usize {
    MODEL_ID
}
fn default_model_x0() -> f64 {
    MODEL_X0
}
fn default_model_k() -> f64 {
    MODEL_K
}
fn default_model_d() -> f64 {
    MODEL_D
}
fn default_model_v() -> f64 {
    MODEL_V
}
fn default_model_omega() -> f64 {
    MODEL_OMEGA
}
fn default_model_mass() -> f64 {
    MODEL_MASS
}
fn default_ntraj() -> usize {
    NTRAJ
}
fn default_initial_state() -> usize {
    INITIAL_STATE
}
fn default_initial_position() -> f64 {
    INITIAL_POSITION
}
fn default_initial_momentum() -> f64 {
    INITIAL_MOMENTUM
}
fn default_use_boltzmann_momenta() -> bool {
    false
}
fn default_empty_list() -> Vec<usize> {
    Vec::new()
}
fn default_empty_matrix() -> Vec<Vec<f64>> {
    Vec::new()
}
fn default_empty_vector() -> Vec<f64> {
    Vec::new()
}

fn default_electronic_config() -> ElectronicConfiguration {
    let electronic_config: ElectronicConfiguration = toml::from_str("").unwrap();
    electronic_config
}
fn default_nuclear_config() -> NuclearConfiguration {
    let nuclear_config: NuclearConfiguration = toml::from_str("").unwrap();
    nuclear_config
}
fn default_thermostat_config() -> ThermostatConfiguration {
    let thermostat_config: ThermostatConfiguration = toml::from_str("").unwrap();
    thermostat_config
}
fn default_hopping_config() -> HoppingConfiguration {
    let hopping_config: HoppingConfiguration = toml::from_str("").unwrap();
    hopping_config
}
fn default_decoherence_config() -> DecoherenceConfiguration {
    let decoherence_config: DecoherenceConfiguration = toml::from_str("").unwrap();
    decoherence_config
}
fn default_state_tracking_config() -> StateTrackingConfiguration {
    let state_tracking_config: StateTrackingConfiguration = toml::from_str("").unwrap();
    state_tracking_config
}
fn default_model_config() -> ModelConfiguration {
    let model_config: ModelConfiguration = toml::from_str("").unwrap();
    model_config
}

/// Struct that loads the configuration of the dynamics from the file "tsh.toml".
/// The integer ids of the algorithms are kept as they are written by the user and resolved
/// into [ControlParameters](crate::initialization::ControlParameters) once per step.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct DynamicConfiguration {
    #[serde(default = "default_nstep")]
    pub nstep: usize,
    #[serde(default = "default_stepsize")]
    pub stepsize: f64,
    #[serde(default = "default_num_electronic_substeps")]
    pub num_electronic_substeps: usize,
    #[serde(default = "default_seed")]
    pub seed: u64,
    #[serde(default = "default_rep_tdse")]
    pub rep_tdse: i32,
    #[serde(default = "default_reduced_ensemble")]
    pub reduced_ensemble: bool,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_electronic_config")]
    pub electronic: ElectronicConfiguration,
    #[serde(default = "default_nuclear_config")]
    pub nuclear: NuclearConfiguration,
    #[serde(default = "default_thermostat_config")]
    pub thermostat: ThermostatConfiguration,
    #[serde(default = "default_hopping_config")]
    pub hopping: HoppingConfiguration,
    #[serde(default = "default_decoherence_config")]
    pub decoherence: DecoherenceConfiguration,
    #[serde(default = "default_state_tracking_config")]
    pub state_tracking: StateTrackingConfiguration,
    #[serde(default = "default_model_config")]
    pub model: ModelConfiguration,
}

impl DynamicConfiguration {
    /// Read the configuration file from the working directory. If it does not exist, the
    /// default settings are written to it so that the user can see all the used options.
    pub fn new() -> Result<Self> {
        let config_file_path: &Path = Path::new(CONFIG_FILE_NAME);
        let config: Self = if config_file_path.exists() {
            Self::from_file(config_file_path)?
        } else {
            Self::from_str("")?
        };
        if !config_file_path.exists() {
            let config_string: String =
                toml::to_string(&config).context("Unable to serialize the configuration")?;
            fs::write(config_file_path, config_string)
                .with_context(|| format!("Unable to write {}", CONFIG_FILE_NAME))?;
        }
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let config_string: String = fs::read_to_string(path)
            .with_context(|| format!("Unable to read config file {}", path.display()))?;
        Self::from_str(&config_string)
            .with_context(|| format!("Invalid configuration in {}", path.display()))
    }

    pub fn from_str(config_string: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(config_string).context("Unable to parse the configuration")?;
        Ok(config)
    }
}

impl Default for DynamicConfiguration {
    fn default() -> Self {
        toml::from_str("").unwrap()
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ElectronicConfiguration {
    #[serde(default = "default_electronic_integrator")]
    pub integrator: String,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct NuclearConfiguration {
    #[serde(default = "default_ensemble")]
    pub ensemble: i32,
    #[serde(default = "default_force_method")]
    pub force_method: i32,
    #[serde(default = "default_empty_list")]
    pub thermostat_dofs: Vec<usize>,
    #[serde(default = "default_empty_list")]
    pub constrained_dofs: Vec<usize>,
    #[serde(default = "default_entanglement_opt")]
    pub entanglement_opt: i32,
    #[serde(default = "default_ethd3_alpha")]
    pub ethd3_alpha: f64,
    #[serde(default = "default_ethd3_beta")]
    pub ethd3_beta: f64,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ThermostatConfiguration {
    #[serde(default = "default_thermostat_type")]
    pub thermostat_type: String,
    #[serde(default = "default_time_coupling")]
    pub time_coupling: f64,
    #[serde(default = "default_nh_steps")]
    pub nh_steps: usize,
    #[serde(default = "default_nh_chain_length")]
    pub nh_chain_length: usize,
    #[serde(default = "default_nh_order")]
    pub nh_order: usize,
    // number of thermostatted degrees of freedom, defaults to the length of the dof list
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub degrees_of_freedom: Option<usize>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct HoppingConfiguration {
    #[serde(default = "default_tsh_method")]
    pub tsh_method: i32,
    #[serde(default = "default_hop_acceptance_algo")]
    pub hop_acceptance_algo: i32,
    #[serde(default = "default_momentum_rescaling_algo")]
    pub momentum_rescaling_algo: i32,
    #[serde(default = "default_do_reverse")]
    pub do_reverse: i32,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct DecoherenceConfiguration {
    #[serde(default = "default_decoherence_algo")]
    pub decoherence_algo: i32,
    #[serde(default = "default_decoherence_times_type")]
    pub decoherence_times_type: i32,
    #[serde(default = "default_empty_matrix")]
    pub decoherence_rates: Vec<Vec<f64>>,
    #[serde(default = "default_decoherence_c_param")]
    pub decoherence_c_param: f64,
    #[serde(default = "default_decoherence_eps_param")]
    pub decoherence_eps_param: f64,
    #[serde(default = "default_empty_vector")]
    pub schwartz_inv_alpha: Vec<f64>,
    #[serde(default = "default_dephasing_informed")]
    pub dephasing_informed: bool,
    #[serde(default = "default_empty_matrix")]
    pub ave_gaps: Vec<Vec<f64>>,
    #[serde(default = "default_sdm_norm_tolerance")]
    pub sdm_norm_tolerance: f64,
    #[serde(default = "default_instantaneous_decoherence_variant")]
    pub instantaneous_decoherence_variant: i32,
    #[serde(default = "default_collapse_option")]
    pub collapse_option: i32,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct StateTrackingConfiguration {
    #[serde(default = "default_state_tracking_algo")]
    pub state_tracking_algo: i32,
    #[serde(default = "default_do_phase_correction")]
    pub do_phase_correction: bool,
    #[serde(default = "default_time_overlap_method")]
    pub time_overlap_method: i32,
}

/// Parameters of the analytic two-state model that drives the command line program.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ModelConfiguration {
    #[serde(default = "default_model_id")]
    pub model: usize,
    #[serde(default = "default_model_x0")]
    pub x0: f64,
    #[serde(default = "default_model_k")]
    pub k: f64,
    #[serde(default = "default_model_d")]
    pub d: f64,
    #[serde(default = "default_model_v")]
    pub v: f64,
    #[serde(default = "default_model_omega")]
    pub omega: f64,
    #[serde(default = "default_model_mass")]
    pub mass: f64,
    #[serde(default = "default_ntraj")]
    pub ntraj: usize,
    #[serde(default = "default_initial_state")]
    pub initial_state: usize,
    #[serde(default = "default_initial_position")]
    pub initial_position: f64,
    #[serde(default = "default_initial_momentum")]
    pub initial_momentum: f64,
    #[serde(default = "default_use_boltzmann_momenta")]
    pub use_boltzmann_momenta: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_gives_defaults() {
        let config: DynamicConfiguration = DynamicConfiguration::from_str("").unwrap();
        assert_eq!(config.nstep, NSTEP);
        assert_eq!(config.rep_tdse, REP_TDSE);
        assert_eq!(config.hopping.tsh_method, TSH_METHOD);
        assert_eq!(config.decoherence.decoherence_algo, DECOHERENCE_ALGO);
        assert!(config.nuclear.thermostat_dofs.is_empty());
        assert!(config.thermostat.degrees_of_freedom.is_none());
    }

    #[test]
    fn sections_override_and_unknown_keys_are_ignored() {
        let input: &str = r#"
            stepsize = 0.5
            not_an_option = "ignored"

            [hopping]
            tsh_method = 2
            do_reverse = 1

            [nuclear]
            ensemble = 1
            thermostat_dofs = [0, 2]
        "#;
        let config: DynamicConfiguration = DynamicConfiguration::from_str(input).unwrap();
        assert_eq!(config.stepsize, 0.5);
        assert_eq!(config.hopping.tsh_method, 2);
        assert_eq!(config.hopping.do_reverse, 1);
        assert_eq!(config.hopping.hop_acceptance_algo, HOP_ACCEPTANCE_ALGO);
        assert_eq!(config.nuclear.ensemble, 1);
        assert_eq!(config.nuclear.thermostat_dofs, vec![0, 2]);
    }

    #[test]
    fn malformed_input_is_an_error() {
        assert!(DynamicConfiguration::from_str("stepsize = \"fast\"").is_err());
    }
}
