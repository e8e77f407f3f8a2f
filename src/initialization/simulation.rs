use crate::dynamics::thermostat::{build_thermostat, Thermostat};
use crate::error::DynamicsError;
use crate::initialization::ensemble::EnsembleState;
use crate::initialization::parameters::ControlParameters;
use crate::initialization::DynamicConfiguration;
use ndarray::prelude::*;
use ndarray_linalg::c64;
use rand::rngs::StdRng;
use rand::SeedableRng;

/// Struct that holds the [DynamicConfiguration], the [EnsembleState] and everything else that
/// lives from one step to the next: one thermostat per trajectory, the random number generator
/// and the diabatic Hamiltonians of the previous step.
pub struct Simulation {
    pub config: DynamicConfiguration,
    pub state: EnsembleState,
    pub thermostats: Vec<Box<dyn Thermostat>>,
    pub rng: StdRng,
    pub actual_time: f64,
    pub step: usize,
    pub prev_ham_dia: Vec<Array2<c64>>,
}

impl Simulation {
    /// Check the configuration against the ensemble and create the thermostats from the
    /// `[thermostat]` section.
    pub fn new(config: DynamicConfiguration, state: EnsembleState) -> Result<Simulation, DynamicsError> {
        let prms: ControlParameters = ControlParameters::try_from(&config)?;
        state.check_dimensions().map_err(DynamicsError::mismatch)?;
        if let Some(dof) = prms
            .thermostat_dofs
            .iter()
            .chain(prms.constrained_dofs.iter())
            .find(|&&dof| dof >= state.ndof)
        {
            return Err(DynamicsError::mismatch(format!(
                "degree of freedom {} does not exist, the system has {}",
                dof, state.ndof
            )));
        }

        let ndof_thermostat: usize = resolve_thermostat_dofs(&prms, state.ndof).len();
        let thermostats: Vec<Box<dyn Thermostat>> = (0..state.ntraj)
            .map(|_| build_thermostat(&config.thermostat, ndof_thermostat, config.temperature))
            .collect::<Result<Vec<Box<dyn Thermostat>>, DynamicsError>>()?;

        Ok(Simulation {
            rng: StdRng::seed_from_u64(config.seed),
            config,
            state,
            thermostats,
            actual_time: 0.0,
            step: 0,
            prev_ham_dia: Vec::new(),
        })
    }

    pub fn parameters(&self) -> Result<ControlParameters, DynamicsError> {
        ControlParameters::try_from(&self.config)
    }
}

/// Thermostatted degrees of freedom; an empty list couples all of them.
pub fn resolve_thermostat_dofs(prms: &ControlParameters, ndof: usize) -> Vec<usize> {
    if prms.thermostat_dofs.is_empty() {
        (0..ndof).collect()
    } else {
        prms.thermostat_dofs.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_thermostat_per_trajectory() {
        let simulation: Simulation =
            Simulation::new(DynamicConfiguration::default(), EnsembleState::new(3, 2, 2, 4)).unwrap();
        assert_eq!(simulation.thermostats.len(), 4);
        assert_eq!(simulation.thermostats[0].ndof(), 3);
    }

    #[test]
    fn unknown_dof_is_rejected() {
        let mut config: DynamicConfiguration = DynamicConfiguration::default();
        config.nuclear.constrained_dofs = vec![5];
        assert!(matches!(
            Simulation::new(config, EnsembleState::new(2, 2, 2, 1)),
            Err(DynamicsError::ConfigurationMismatch(_))
        ));
    }

    #[test]
    fn inconsistent_state_is_rejected() {
        let mut state: EnsembleState = EnsembleState::new(1, 2, 2, 2);
        state.act_states = vec![0, 2];
        assert!(Simulation::new(DynamicConfiguration::default(), state).is_err());
    }
}
