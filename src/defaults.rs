// config file
pub const CONFIG_FILE_NAME: &str = "tsh.toml";
// number of nuclear steps
pub const NSTEP: usize = 1000;
// nuclear stepsize in fs
pub const STEPSIZE: f64 = 0.1;
// number of electronic substeps per half nuclear step
pub const NUM_ELECTRONIC_SUBSTEPS: usize = 1;
// seed of the random number generator shared by all stochastic decisions
pub const SEED: u64 = 0;
// 0: diabatic, 1: adiabatic representation of the amplitudes
pub const REP_TDSE: i32 = 1;
// share the Hamiltonian of trajectory 0 with the whole ensemble
pub const REDUCED_ENSEMBLE: bool = false;
// temperature (K)
pub const TEMPERATURE: f64 = 300.0;

// ELECTRONIC PROPAGATION
// "exp" for the matrix exponential, "rk4" for Runge-Kutta
pub const ELECTRONIC_INTEGRATOR: &str = "exp";

// NUCLEAR PROPAGATION
// 0: NVE, 1: NVT
pub const ENSEMBLE: i32 = 0;
// 0: no forces, 1: state-specific, 2: Ehrenfest
pub const FORCE_METHOD: i32 = 1;
// 0: none, 22: ETHD3 entangled trajectories
pub const ENTANGLEMENT_OPT: i32 = 0;
pub const ETHD3_ALPHA: f64 = 0.0;
pub const ETHD3_BETA: f64 = 0.0;

// THERMOSTAT
pub const THERMOSTAT_TYPE: &str = "NoseHoover";
// coupling time of the thermostat in fs
pub const TIME_COUPLING: f64 = 50.0;
pub const NH_STEPS: usize = 1;
pub const NH_CHAIN_LENGTH: usize = 3;
// order of the Suzuki-Yoshida factorization, 3 or 5
pub const NH_ORDER: usize = 3;

// HOPPING
// -1: off, 0: FSSH, 1: GFSH, 2: MSSH, 4: Landau-Zener at diabatic crossings
pub const TSH_METHOD: i32 = 0;
// 0: accept all, 10: isotropic, 11: along NAC, 12: along force difference, 31: Boltzmann
pub const HOP_ACCEPTANCE_ALGO: i32 = 10;
// 0: none, 100: isotropic, 101: along NAC, 102: along force difference
pub const MOMENTUM_RESCALING_ALGO: i32 = 100;
// 0: keep momenta, 1: reverse along the rescaling direction, 2: reverse along the NAC
pub const DO_REVERSE: i32 = 0;

// DECOHERENCE
// -1: none, 0: SDM, 1: ID, 2: A-FSSH, 3: BCSH, 4: MFSD
pub const DECOHERENCE_ALGO: i32 = -1;
// -1: off, 0: flat rates, 1: EDC, 2: Schwartz mean-field, 3: Schwartz pairwise
pub const DECOHERENCE_TIMES_TYPE: i32 = -1;
// constant in hartree
// use the recommended value for C in eqn. (17) of JCP 126, 134114 (2007)
pub const DECOHERENCE_C_PARAM: f64 = 1.0;
pub const DECOHERENCE_EPS_PARAM: f64 = 0.1;
pub const SDM_NORM_TOLERANCE: f64 = 0.0;
pub const DEPHASING_INFORMED: bool = false;
// 0: ID-S, 1: ID-A, 2: ID on frustrated hops only
pub const INSTANTANEOUS_DECOHERENCE_VARIANT: i32 = 0;
// 0: keep the phase of the target amplitude, 1: reset it to one
pub const COLLAPSE_OPTION: i32 = 0;

// STATE TRACKING
// 0: none, 1: maximal overlap, 2: Hungarian assignment
pub const STATE_TRACKING_ALGO: i32 = 0;
pub const DO_PHASE_CORRECTION: bool = false;
// 0: compute from the cached basis, 1: read from the provider
pub const TIME_OVERLAP_METHOD: i32 = 0;

// ANALYTIC MODEL
pub const MODEL_ID: usize = 1;
pub const MODEL_X0: f64 = 1.0;
pub const MODEL_K: f64 = 0.1;
pub const MODEL_D: f64 = -0.1;
pub const MODEL_V: f64 = 0.05;
pub const MODEL_OMEGA: f64 = 0.25;
pub const MODEL_MASS: f64 = 100.0;
pub const NTRAJ: usize = 10;
pub const INITIAL_STATE: usize = 0;
pub const INITIAL_POSITION: f64 = -1.0;
pub const INITIAL_MOMENTUM: f64 = 5.0;
