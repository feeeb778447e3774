//! Installer and process supervisor for a local Ollama runtime

pub mod config;
pub mod control;
pub mod error;
pub mod install;
pub mod models;

pub use error::InstallerError;
