pub use decoherence::*;
pub use dynamic_routines::*;
pub use hopping_routines::*;
pub use schroedinger_integration::*;
pub use simulation::*;
pub use state_tracking::*;
pub use thermostat::*;

pub mod decoherence;
pub mod dynamic_routines;
pub mod hopping_routines;
pub mod schroedinger_integration;
pub mod simulation;
pub mod state_tracking;
pub mod thermostat;
