//! API key lookup.
//!
//! The key comes from the `GROQ_API_KEY` environment variable (which `.env`
//! may populate) or, failing that, from a TOML secrets file:
//!
//! ```toml
//! GROQ_API_KEY = "gsk_..."
//!
//! # or
//! [GROQ]
//! API_KEY = "gsk_..."
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use eyre::{Result, eyre};
use tracing::debug;

pub const API_KEY_ENV: &str = "GROQ_API_KEY";
const SECRETS_DIR: &str = "groq-chat";
const SECRETS_FILE: &str = "secrets.toml";

/// `<config_dir>/groq-chat/secrets.toml`, if the platform has a config directory.
pub fn default_secrets_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(SECRETS_DIR).join(SECRETS_FILE))
}

/// Resolves the API key from the environment first, then the secrets file.
pub fn resolve_api_key(secrets_path: Option<&Path>) -> Result<String> {
    let from_env = std::env::var(API_KEY_ENV).ok();
    resolve_from(from_env, secrets_path)
}

fn resolve_from(env_value: Option<String>, secrets_path: Option<&Path>) -> Result<String> {
    if let Some(key) = non_empty(env_value) {
        debug!("Using API key from {}", API_KEY_ENV);
        return Ok(key);
    }

    if let Some(path) = secrets_path {
        if path.exists() {
            if let Some(key) = read_secrets_file(path)? {
                debug!("Using API key from {}", path.display());
                return Ok(key);
            }
        } else {
            debug!("Secrets file {} does not exist", path.display());
        }
    }

    let hint = match secrets_path {
        Some(path) => format!(" or add it to {}", path.display()),
        None => String::new(),
    };
    Err(eyre!("API key not found. Set {}{}.", API_KEY_ENV, hint))
}

fn read_secrets_file(path: &Path) -> Result<Option<String>> {
    let content = fs::read_to_string(path)
        .map_err(|e| eyre!("Failed to read secrets file {}: {}", path.display(), e))?;
    let table: toml::Table = content
        .parse()
        .map_err(|e| eyre!("Invalid secrets file {}: {}", path.display(), e))?;

    let flat = table.get(API_KEY_ENV).and_then(|v| v.as_str());
    let nested = table
        .get("GROQ")
        .and_then(|v| v.get("API_KEY"))
        .and_then(|v| v.as_str());

    Ok(non_empty(flat.or(nested).map(str::to_string)))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn secrets_file(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn environment_wins_over_file() {
        let file = secrets_file("GROQ_API_KEY = \"from-file\"\n");
        let key = resolve_from(Some("from-env".to_string()), Some(file.path())).unwrap();
        assert_eq!(key, "from-env");
    }

    #[test]
    fn reads_flat_key() {
        let file = secrets_file("GROQ_API_KEY = \"gsk_flat\"\n");
        assert_eq!(resolve_from(None, Some(file.path())).unwrap(), "gsk_flat");
    }

    #[test]
    fn reads_nested_table_key() {
        let file = secrets_file("[GROQ]\nAPI_KEY = \"gsk_nested\"\n");
        assert_eq!(resolve_from(None, Some(file.path())).unwrap(), "gsk_nested");
    }

    #[test]
    fn blank_values_count_as_missing() {
        let file = secrets_file("GROQ_API_KEY = \"  \"\n");
        let err = resolve_from(Some(String::new()), Some(file.path())).unwrap_err();
        assert!(err.to_string().contains("API key not found"));
    }

    #[test]
    fn missing_file_reports_where_to_put_the_key() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secrets.toml");
        let err = resolve_from(None, Some(&path)).unwrap_err().to_string();
        assert!(err.contains("GROQ_API_KEY"));
        assert!(err.contains("secrets.toml"));
    }

    #[test]
    fn malformed_file_is_an_error() {
        let file = secrets_file("GROQ_API_KEY = \n");
        let err = resolve_from(None, Some(file.path())).unwrap_err();
        assert!(err.to_string().contains("Invalid secrets file"));
    }
}
