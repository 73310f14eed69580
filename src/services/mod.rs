pub mod ai;
pub mod config;
pub(crate) mod paths;
pub mod settings;
