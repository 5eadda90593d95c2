//! `storefront config`: show or edit the client config file.

use std::path::Path;

use anyhow::Result;

use crate::config::ClientConfig;

pub fn set(
    url: Option<&str>,
    anon_key: Option<&str>,
    data_dir: Option<&str>,
    locale: Option<&str>,
    config_path: &Path,
) -> Result<()> {
    let mut config = ClientConfig::load(config_path)?;
    if let Some(url) = url {
        config.backend_url = url.trim_end_matches('/').to_string();
    }
    if let Some(key) = anon_key {
        config.anon_key = key.to_string();
    }
    if let Some(dir) = data_dir {
        config.data_dir = Some(dir.to_string());
    }
    if let Some(locale) = locale {
        config.session.locale = locale.to_string();
    }
    config.save(config_path)?;
    println!("Config saved to {}.", config_path.display());
    Ok(())
}

pub fn show(config_path: &Path) -> Result<()> {
    let config = ClientConfig::load(config_path)?.with_env();
    let mut shown = config.clone();
    if !shown.anon_key.is_empty() {
        shown.anon_key = "********".to_string();
    }
    print!("{}", toml::to_string_pretty(&shown)?);
    println!("# data dir: {}", config.data_dir().display());
    Ok(())
}
