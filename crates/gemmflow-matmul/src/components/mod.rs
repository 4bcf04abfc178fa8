mod args;
mod config;
mod data_type;
mod descriptor;
mod error;
mod params;
mod problem;

pub use args::*;
pub use config::*;
pub use data_type::*;
pub use descriptor::*;
pub use error::*;
pub use params::*;
pub use problem::*;
