pub mod agent;
pub mod plan;

pub use agent::*;
pub use plan::*;
