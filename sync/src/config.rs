//! On-disk configuration: device identity and credentials, plus the
//! environment knobs for endpoints and the mirror location.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use uuid::Uuid;

const DEFAULT_AUTH_BASE: &str = "https://webapp.cloud.remarkable.com";
const DEFAULT_SYNC_BASE: &str = "https://eu.tectonic.remarkable.com";

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    pub device_id: String,
    pub device_token: String,
}

impl Config {
    /// Fresh identity with no credentials yet; `register` fills the token in.
    pub fn new() -> Self {
        Config {
            device_id: Uuid::new_v4().to_string(),
            device_token: String::new(),
        }
    }

    pub fn load() -> Result<Option<Config>> {
        let path = config_path()?;
        if !path.exists() {
            return Ok(None);
        }
        let raw = fs::read(&path)?;
        Ok(Some(serde_json::from_slice(&raw)?))
    }

    pub fn persist(&self) -> Result<()> {
        let path = config_path()?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, serde_json::to_vec_pretty(self)?)?;
        Ok(())
    }
}

fn state_dir() -> Result<PathBuf> {
    let base = dirs::config_dir().ok_or_else(|| anyhow!("no config directory"))?;
    Ok(base.join("slate"))
}

pub fn config_path() -> Result<PathBuf> {
    Ok(state_dir()?.join("sync.json"))
}

pub fn cache_path() -> Result<PathBuf> {
    Ok(state_dir()?.join("cache.json"))
}

pub fn auth_base() -> String {
    std::env::var("SLATE_AUTH_API").unwrap_or_else(|_| DEFAULT_AUTH_BASE.to_string())
}

pub fn sync_base() -> String {
    std::env::var("SLATE_SYNC_API").unwrap_or_else(|_| DEFAULT_SYNC_BASE.to_string())
}

pub fn output_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var("SLATE_OUTPUT_DIR") {
        return Ok(PathBuf::from(dir));
    }
    let home = dirs::home_dir().ok_or_else(|| anyhow!("no home directory"))?;
    Ok(home.join("Slate"))
}
