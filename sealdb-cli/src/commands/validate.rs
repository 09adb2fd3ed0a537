//! Command to validate a sealdb configuration file.

use std::path::PathBuf;

use clap::Args;

use crate::config::FileConfig;
use crate::error::CliError;
use crate::utils::GlobalOptions;

/// Validate a sealdb configuration file.
#[derive(Args)]
pub struct ValidateCommand {
    /// Configuration file to validate
    #[arg(value_name = "CONFIG_PATH")]
    pub config_path: PathBuf,
}

impl ValidateCommand {
    pub fn execute(self, global: &GlobalOptions) -> Result<(), CliError> {
        if !self.config_path.exists() {
            return Err(CliError::InvalidArguments(format!(
                "File not found: {}",
                self.config_path.display()
            )));
        }

        let contents = std::fs::read_to_string(&self.config_path)?;
        let config = match FileConfig::from_yaml(&contents) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("Parse error: {e}");
                return Err(CliError::SemanticFailure(
                    "Configuration file is invalid".to_string(),
                ));
            }
        };

        let problems = config.problems();
        if problems.is_empty() {
            if !global.quiet {
                println!("Configuration is valid");
            }
            return Ok(());
        }

        for problem in &problems {
            eprintln!("Validation error: {problem}");
        }
        Err(CliError::SemanticFailure(
            "Configuration validation failed".to_string(),
        ))
    }
}
