use crate::constants;
use ndarray::prelude::*;
use rand::Rng;
use rand_distr::{Distribution, Normal};

/// Initialize the momenta from a Boltzmann distribution.
pub struct BoltzmannMomenta {
    dist: Normal<f64>,
}

impl BoltzmannMomenta {
    pub fn new(temperature: f64) -> BoltzmannMomenta {
        // the width is never negative, so the distribution is always valid
        let dist = Normal::new(0.0, f64::sqrt(constants::K_BOLTZMANN * temperature.max(0.0)))
            .expect("Error regarding the distribution!");
        BoltzmannMomenta { dist }
    }
}

/// Momenta of shape ndof x ntraj. Each dof is drawn with the width sqrt(m k_B T).
pub fn initialize_momenta<R: Rng>(
    inv_m: ArrayView1<f64>,
    ntraj: usize,
    temperature: f64,
    rng: &mut R,
) -> Array2<f64> {
    let boltzmann: BoltzmannMomenta = BoltzmannMomenta::new(temperature);
    let mut momenta: Array2<f64> = Array2::zeros((inv_m.len(), ntraj));

    for traj in 0..ntraj {
        for (dof, im) in inv_m.iter().enumerate() {
            momenta[[dof, traj]] = f64::sqrt(1.0 / im) * boltzmann.dist.sample(rng);
        }
    }
    momenta
}

/// Gaussian sampling of a phase-space variable around `mean` with width `sigma` per dof.
pub fn sample_gaussian<R: Rng>(
    mean: ArrayView1<f64>,
    sigma: ArrayView1<f64>,
    ntraj: usize,
    rng: &mut R,
) -> Array2<f64> {
    let mut values: Array2<f64> = Array2::zeros((mean.len(), ntraj));
    for traj in 0..ntraj {
        for dof in 0..mean.len() {
            let normal: f64 = rng.sample(rand_distr::StandardNormal);
            values[[dof, traj]] = mean[dof] + sigma[dof] * normal;
        }
    }
    values
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn momenta_follow_the_equipartition_theorem() {
        let mut rng: StdRng = StdRng::seed_from_u64(7);
        let inv_m: Array1<f64> = array![1.0 / 2000.0];
        let temperature: f64 = 300.0;
        let p: Array2<f64> = initialize_momenta(inv_m.view(), 20000, temperature, &mut rng);
        let mean_ekin: f64 = p.mapv(|x| 0.5 * x * x * inv_m[0]).mean().unwrap();
        let expected: f64 = 0.5 * constants::K_BOLTZMANN * temperature;
        assert!((mean_ekin - expected).abs() / expected < 0.05);
    }

    #[test]
    fn zero_width_reproduces_the_mean() {
        let mut rng: StdRng = StdRng::seed_from_u64(1);
        let q: Array2<f64> =
            sample_gaussian(array![1.5, -2.0].view(), array![0.0, 0.0].view(), 3, &mut rng);
        assert_eq!(q.column(2).to_vec(), vec![1.5, -2.0]);
    }
}
