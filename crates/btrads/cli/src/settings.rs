//! Layered engine configuration: built-in defaults, an optional file, then
//! `BTRADS_*` environment variables (`__` separates nested keys, for
//! example `BTRADS_EXTRACTION__MAX_ATTEMPTS=5`).

use crate::error::CliResult;
use btrads_engine::EngineConfig;
use std::path::Path;

/// Environment prefix for configuration overrides
pub const ENV_PREFIX: &str = "BTRADS";

pub fn load_config(path: Option<&Path>) -> CliResult<EngineConfig> {
    let mut builder = config::Config::builder();
    if let Some(path) = path {
        if !path.exists() {
            return Err(crate::CliError::NotFound(format!(
                "config file {}",
                path.display()
            )));
        }
        builder = builder.add_source(config::File::from(path));
    }
    let engine: EngineConfig = builder
        .add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
        .build()?
        .try_deserialize()?;

    tracing::debug!(?engine, "Configuration loaded");
    Ok(engine)
}
