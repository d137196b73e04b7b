pub mod config_cmd;
pub mod ports;
pub mod replay;

use std::path::PathBuf;

use oolive_config::Config;

use crate::cli::GlobalOpts;
use crate::error::CliError;

/// The config file in effect: `--config` / `OOLIVE_CONFIG`, else the
/// platform default.
pub fn config_path(global: &GlobalOpts) -> PathBuf {
    global
        .config
        .clone()
        .unwrap_or_else(oolive_config::config_path)
}

/// Load the config file in effect, layered with `OOLIVE_*` variables.
pub fn load(global: &GlobalOpts) -> Result<Config, CliError> {
    let path = config_path(global);
    oolive_config::load_config_from(&path).map_err(|source| CliError::Config {
        path: path.display().to_string(),
        source,
    })
}
