// Domain layer: models and ports. The engine only talks to the outside world through ports.

pub mod model;
pub mod ports;
