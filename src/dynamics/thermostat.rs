use ndarray::prelude::*;

use crate::constants;
use crate::error::DynamicsError;
use crate::initialization::ThermostatConfiguration;

pub trait Thermostat {
    /// Number of thermostatted degrees of freedom.
    fn ndof(&self) -> usize;
    /// Factor by which the thermostatted momenta are scaled over a time `dt`.
    fn vel_scale(&self, dt: f64) -> f64;
    /// Advance the internal variables by `dt`. `ekin` is the kinetic energy of the
    /// thermostatted dofs, `ekin_ref` and `ekin_curr` are the reference and current energy
    /// of additionally coupled variables (zero without a barostat).
    fn propagate(&mut self, dt: f64, ekin: f64, ekin_ref: f64, ekin_curr: f64);
    fn get_temperature(&self, kinetic_energy: f64) -> f64;
}

fn temperature_of(kinetic_energy: f64, ndof: usize) -> f64 {
    if ndof == 0 {
        0.0
    } else {
        2.0 * kinetic_energy / (ndof as f64 * constants::K_BOLTZMANN)
    }
}

pub struct NullThermostat {
    pub ndof: usize,
}

impl NullThermostat {
    pub fn new(ndof: usize) -> Self {
        NullThermostat { ndof }
    }
}

impl Thermostat for NullThermostat {
    fn ndof(&self) -> usize {
        self.ndof
    }

    fn vel_scale(&self, _dt: f64) -> f64 {
        1.0
    }

    fn propagate(&mut self, _dt: f64, _ekin: f64, _ekin_ref: f64, _ekin_curr: f64) {}

    fn get_temperature(&self, kinetic_energy: f64) -> f64 {
        temperature_of(kinetic_energy, self.ndof)
    }
}

pub struct BerendsenThermostat {
    pub tau: f64,
    pub ndof: usize,
    pub target_temperature: f64,
    pub current_temperature: Option<f64>,
}

impl BerendsenThermostat {
    pub fn new(tau: f64, ndof: usize, temperature: f64) -> Self {
        BerendsenThermostat {
            tau,
            ndof,
            target_temperature: temperature,
            current_temperature: None,
        }
    }
}

impl Thermostat for BerendsenThermostat {
    fn ndof(&self) -> usize {
        self.ndof
    }

    fn vel_scale(&self, dt: f64) -> f64 {
        match self.current_temperature {
            Some(current) if current > 0.0 => {
                let arg: f64 =
                    1.0 + (dt / self.tau) * (self.target_temperature / current - 1.0);
                arg.max(0.0).sqrt()
            }
            _ => 1.0,
        }
    }

    fn propagate(&mut self, _dt: f64, ekin: f64, _ekin_ref: f64, _ekin_curr: f64) {
        self.current_temperature = Some(self.get_temperature(ekin));
    }

    fn get_temperature(&self, kinetic_energy: f64) -> f64 {
        temperature_of(kinetic_energy, self.ndof)
    }
}

/// Nose-Hoover chain integrated with a Suzuki-Yoshida factorization,
/// Martyna, Tuckerman, Tobias, Klein, Mol. Phys. 87, 1117 (1996).
pub struct NoseHooverThermostat {
    pub tau: f64,
    pub temperature: f64,
    pub ndof: usize,
    pub chain_positions: Array1<f64>,
    pub chain_velocities: Array1<f64>,
    pub chain_accelerations: Array1<f64>,
    pub chain_masses: Array1<f64>,
    pub weight_coefficients: Array1<f64>,
    pub integrator_steps: usize,
}

impl NoseHooverThermostat {
    pub fn new(
        tau: f64,
        ndof: usize,
        chain_length: usize,
        integrator_steps: usize,
        order: usize,
        temperature: f64,
    ) -> Result<Self, DynamicsError> {
        let weight_coefficients: Array1<f64> = match order {
            3 => {
                let mut arr: Array1<f64> = Array1::zeros(3);
                arr[0] = 1.0 / (2.0 - 2.0_f64.powf(1.0 / 3.0));
                arr[1] = 1.0 - 2.0 * arr[0];
                arr[2] = arr[0];
                arr
            }
            5 => {
                let val: f64 = 1.0 / (4.0 - 4.0_f64.powf(1.0 / 3.0));
                array![val, val, 1.0 - 4.0 * val, val, val]
            }
            _ => {
                return Err(DynamicsError::mismatch(format!(
                    "only 3rd and 5th order Suzuki-Yoshida schemes are available, got {}",
                    order
                )))
            }
        };
        if chain_length == 0 || integrator_steps == 0 {
            return Err(DynamicsError::mismatch(
                "the Nose-Hoover chain needs at least one particle and one integration step",
            ));
        }

        // Q_0 = N_f k_B T tau^2, Q_k = k_B T tau^2
        let kt: f64 = constants::K_BOLTZMANN * temperature;
        let mut chain_masses: Array1<f64> = Array1::from_elem(chain_length, kt * tau.powi(2));
        chain_masses[0] *= ndof.max(1) as f64;

        Ok(NoseHooverThermostat {
            tau,
            temperature,
            ndof,
            chain_positions: Array1::zeros(chain_length),
            chain_velocities: Array1::zeros(chain_length),
            chain_accelerations: Array1::zeros(chain_length),
            chain_masses,
            weight_coefficients,
            integrator_steps,
        })
    }

    fn update_velocity(&mut self, k: usize, wdti4: f64, wdti8: f64) {
        let len: usize = self.chain_velocities.len();
        if k + 1 < len {
            let val: f64 = (-wdti8 * self.chain_velocities[k + 1]).exp();
            self.chain_velocities[k] = self.chain_velocities[k] * val.powi(2)
                + wdti4 * self.chain_accelerations[k] * val;
        } else {
            self.chain_velocities[k] += self.chain_accelerations[k] * wdti4;
        }
    }
}

impl Thermostat for NoseHooverThermostat {
    fn ndof(&self) -> usize {
        self.ndof
    }

    fn vel_scale(&self, dt: f64) -> f64 {
        (-self.chain_velocities[0] * dt).exp()
    }

    fn propagate(&mut self, dt: f64, ekin: f64, ekin_ref: f64, ekin_curr: f64) {
        // factors k_bT and N_f k_b T
        let kt: f64 = constants::K_BOLTZMANN * self.temperature;
        let nkt: f64 = self.ndof as f64 * kt;
        let len: usize = self.chain_velocities.len();
        let ekin_2: f64 = 2.0 * ekin;
        let extra: f64 = ekin_curr - ekin_ref;

        let mut scaling: f64 = 1.0;
        self.chain_accelerations[0] = (ekin_2 + extra - nkt) / self.chain_masses[0];
        for k in 1..len {
            self.chain_accelerations[k] = (self.chain_masses[k - 1]
                * self.chain_velocities[k - 1].powi(2)
                - kt)
                / self.chain_masses[k];
        }

        let weights: Array1<f64> = self.weight_coefficients.clone();
        for _i in 0..self.integrator_steps {
            for w in weights.iter() {
                let wdti: f64 = w * dt / self.integrator_steps as f64;
                let wdti2: f64 = wdti / 2.0;
                let wdti4: f64 = wdti / 4.0;
                let wdti8: f64 = wdti / 8.0;

                // update chain velocities from the end of the chain
                for k in (0..len).rev() {
                    self.update_velocity(k, wdti4, wdti8);
                }

                scaling *= (-wdti2 * self.chain_velocities[0]).exp();
                // update forces
                self.chain_accelerations[0] =
                    (scaling.powi(2) * ekin_2 + extra - nkt) / self.chain_masses[0];
                // update chain positions
                self.chain_positions.scaled_add(wdti2, &self.chain_velocities);

                // update thermostat velocities from the start of the chain
                for k in 0..len {
                    self.update_velocity(k, wdti4, wdti8);
                    if k + 1 < len {
                        self.chain_accelerations[k + 1] = (self.chain_masses[k]
                            * self.chain_velocities[k].powi(2)
                            - kt)
                            / self.chain_masses[k + 1];
                    }
                }
            }
        }
    }

    fn get_temperature(&self, kinetic_energy: f64) -> f64 {
        temperature_of(kinetic_energy, self.ndof)
    }
}

/// Build the thermostat of one trajectory from its configuration section. `tau` is in
/// atomic units of time.
pub fn build_thermostat(
    config: &ThermostatConfiguration,
    default_ndof: usize,
    temperature: f64,
) -> Result<Box<dyn Thermostat>, DynamicsError> {
    let ndof: usize = config.degrees_of_freedom.unwrap_or(default_ndof);
    let tau: f64 = config.time_coupling * constants::FS_TO_AU;
    let thermostat: Box<dyn Thermostat> = match config.thermostat_type.to_lowercase().as_str() {
        "nosehoover" | "nose-hoover" | "nhc" => Box::new(NoseHooverThermostat::new(
            tau,
            ndof,
            config.nh_chain_length,
            config.nh_steps,
            config.nh_order,
            temperature,
        )?),
        "berendsen" => Box::new(BerendsenThermostat::new(tau, ndof, temperature)),
        "none" => Box::new(NullThermostat::new(ndof)),
        other => {
            return Err(DynamicsError::mismatch(format!(
                "unknown thermostat type '{}'",
                other
            )))
        }
    };
    Ok(thermostat)
}
