//! Configuration types for datastager components.
//!
//! Each settings struct groups the knobs of one component; the INI file
//! layer in [`file`] persists them under `~/.datastager/config.ini`.

mod defaults;
mod file;
mod settings;

pub use defaults::*;
pub use file::{config_directory, config_file_path, ConfigFileError};
pub use settings::{
    CacheSettings, ConfigFile, OrchestratorSettings, PipelineSettings, SchedulerSettings,
};
