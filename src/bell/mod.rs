pub mod model;
pub mod rung;
pub mod scheduler;
