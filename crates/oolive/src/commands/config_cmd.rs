//! `oolive config` subcommands.

use crate::cli::{ConfigCommand, GlobalOpts};
use crate::error::CliError;

pub fn handle(cmd: &ConfigCommand, global: &GlobalOpts) -> Result<(), CliError> {
    match cmd {
        ConfigCommand::Path => {
            println!("{}", super::config_path(global).display());
            Ok(())
        }
        ConfigCommand::Show => {
            let path = super::config_path(global);
            let config = super::load(global)?;
            let rendered = config
                .to_toml_redacted()
                .map_err(|source| CliError::Config {
                    path: path.display().to_string(),
                    source,
                })?;
            if !path.exists() {
                eprintln!("# {} not found, showing defaults", path.display());
            }
            print!("{rendered}");
            Ok(())
        }
    }
}
