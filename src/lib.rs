pub mod classfile;
pub mod cli;
pub mod config;
pub mod db;
pub mod error;
pub mod mapping;
pub mod model;
pub mod remap;
pub mod workspace;

pub use error::{Error, Result};
