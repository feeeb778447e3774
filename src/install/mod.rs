//! Ollama installation
//!
//! - `supervisor` - idempotency check, artifact staging, installer run
//! - `download` - artifact fetch with retry and progress
//! - `tail` - live view of the installer log
//! - `environment` - machine-scope `OLLAMA_MODELS` and PATH
//! - `runners` - the flows behind each CLI command

pub mod context;
pub mod detection;
pub mod download;
pub mod environment;
pub mod privilege;
pub mod progress;
pub mod runners;
pub mod supervisor;
pub mod tail;
pub mod wizard;

pub use context::{RunContext, RunLog};
pub use detection::{Discovery, ExecutableLocator, InstallationState, SystemLocator};
pub use download::{ArtifactFetcher, Downloader, Platform};
pub use environment::{EnvOutcome, EnvironmentConfigurator, MachineEnvironment, SystemEnvironment};
pub use supervisor::{InstallOutcome, Supervisor};
pub use wizard::InstallationResult;
