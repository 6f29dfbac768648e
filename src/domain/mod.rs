// Domain layer: board model and ports to the hardware and process collaborators.

pub mod model;
pub mod ports;
