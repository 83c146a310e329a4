use crate::config::{Config, CONFIG_FILE_NAME};
use crate::errors::{HarnessError, Result};
use std::env;

/// Print the effective configuration, including environment overrides
pub fn show() -> Result<()> {
    let cwd = env::current_dir()?;
    let config = Config::load_from_current_dir()?;

    match Config::find_root(&cwd) {
        Some(root) => println!("# loaded from {}", root.join(CONFIG_FILE_NAME).display()),
        None => println!("# no {} found, using defaults", CONFIG_FILE_NAME),
    }

    let yaml = serde_yml::to_string(&config)
        .map_err(|e| HarnessError::ConfigError(format!("Failed to serialize config: {}", e)))?;
    print!("{}", yaml);

    Ok(())
}
