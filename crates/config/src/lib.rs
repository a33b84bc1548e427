//! Configuration loading, validation and env substitution.
//!
//! Config files: `courier.toml`, `courier.yaml`, `courier.yml` or `courier.json`,
//! searched in `./` then `~/.config/courier/`.
//!
//! Supports `${ENV_VAR}` and `${ENV_VAR:-default}` substitution in the raw file.

pub mod env_subst;
pub mod loader;
pub mod schema;
pub mod validate;

pub use {
    loader::{
        apply_env_overrides, config_dir, data_dir, discover_and_load, find_config_file,
        load_config, set_config_dir, set_data_dir,
    },
    schema::{CourierConfig, MediaConfig, ServerConfig, TranscodeConfig, WhatsAppConfig},
    validate::{Diagnostic, Severity, ValidationResult, validate},
};
