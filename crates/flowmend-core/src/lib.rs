mod config;
mod graph;
mod repair;
mod repair_loop;
mod validation;

pub use config::*;
pub use graph::*;
pub use repair::*;
pub use repair_loop::*;
pub use validation::*;
