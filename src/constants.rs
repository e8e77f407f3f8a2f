// conversion from femtoseconds to atomic units of time
pub const FS_TO_AU: f64 = 41.341374575751;
pub const AU_TO_FS: f64 = 1.0 / FS_TO_AU;
// Boltzmann constant in Hartree / Kelvin
pub const K_BOLTZMANN: f64 = 3.166811563e-6;
pub const HARTREE_TO_EV: f64 = 27.211386245988;
// proton mass in units of the electron mass
pub const AMU_TO_AU: f64 = 1822.888486209;
