// Domain layer: sponsorship and backlog models, sort strategies and ports (interfaces).

pub mod model;
pub mod ports;
pub mod sort;
