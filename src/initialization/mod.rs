pub use ensemble::*;
pub use io::*;
pub use parameters::*;
pub use simulation::*;

pub mod ensemble;
pub mod io;
pub mod parameters;
pub mod simulation;
pub mod velocities;
