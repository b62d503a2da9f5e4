pub mod settings;

use log::info;

pub use settings::AppSettings;

/// Initialize application configuration
pub fn init_config() -> Result<settings::AppSettings, crate::error::AppError> {
    info!("Initializing gateway configuration from environment");
    let config = settings::AppSettings::from_env()?;
    info!(
        "Configuration loaded for {} ({})",
        config.app.name, config.app.environment
    );
    Ok(config)
}
