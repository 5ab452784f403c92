//! `chorus config`: Configuration inspection.

use chorus_config::AppConfig;

pub fn show() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let mut toml_str = toml::to_string_pretty(&config)?;

    // Keys never leave the process in plain text
    for backend in config.backends.values() {
        if let Some(key) = backend.api_key.as_deref().filter(|k| !k.is_empty()) {
            toml_str = toml_str.replace(key, "[REDACTED]");
        }
    }
    println!("{toml_str}");
    Ok(())
}

pub fn path() -> Result<(), Box<dyn std::error::Error>> {
    let config_path = AppConfig::config_dir().join("config.toml");
    println!("{}", config_path.display());
    Ok(())
}

pub fn default() -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", AppConfig::default_toml());
    Ok(())
}
