#![allow(dead_code)]

mod data;
mod executor;

pub use data::*;
pub use executor::*;
