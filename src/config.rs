//! Optional config file loading. Search order: ./substack2kindle.toml, then
//! $XDG_CONFIG_HOME/substack2kindle/config.toml (or ~/.config/substack2kindle/config.toml).
//!
//! Email credentials come from the environment (a `.env` file is loaded at startup).

use crate::delivery::{EmailConfig, DEFAULT_SMTP_PORT};
use serde::Deserialize;
use std::path::PathBuf;

pub const ENV_EMAIL_FROM: &str = "EMAIL_FROM";
pub const ENV_EMAIL_TO: &str = "EMAIL_TO";
pub const ENV_EMAIL_PASSWORD: &str = "EMAIL_PASSWORD";
pub const ENV_SMTP_HOST: &str = "SMTP_HOST";
pub const ENV_SMTP_PORT: &str = "SMTP_PORT";

/// Config file contents. All fields optional; only present keys override defaults.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct Config {
    /// Output format: epub, azw3, or mobi.
    pub format: Option<String>,
    /// HTTP User-Agent header.
    pub user_agent: Option<String>,
    /// Request timeout in seconds.
    pub timeout_secs: Option<u64>,
    /// External converter program name or path (default: ebook-convert).
    pub converter: Option<String>,
    /// Never use the external converter.
    pub skip_converter: Option<bool>,
    /// How to handle an article with no body: warn (default), placeholder, or fail.
    pub empty_body: Option<String>,
    pub smtp_host: Option<String>,
    pub smtp_port: Option<u16>,
    pub email_from: Option<String>,
    pub email_to: Option<String>,
}

/// Search order: (1) ./substack2kindle.toml, (2) $XDG_CONFIG_HOME/substack2kindle/config.toml.
/// Missing file returns Ok(None). Invalid TOML or I/O error reading a present file returns Err.
pub fn load_config() -> Result<Option<Config>, String> {
    let cwd = std::env::current_dir()
        .map_err(|e| format!("Cannot determine current directory: {}", e))?;
    let mut paths = vec![cwd.join("substack2kindle.toml")];
    if let Some(d) = dirs::config_dir() {
        paths.push(d.join("substack2kindle").join("config.toml"));
    }
    load_first(&paths)
}

fn load_first(paths: &[PathBuf]) -> Result<Option<Config>, String> {
    for path in paths {
        if path.exists() {
            let s = std::fs::read_to_string(path)
                .map_err(|e| format!("Cannot read config {}: {}", path.display(), e))?;
            let config: Config = toml::from_str(&s)
                .map_err(|e| format!("Invalid config {}: {}", path.display(), e))?;
            tracing::debug!(path = %path.display(), "Loaded config file");
            return Ok(Some(config));
        }
    }
    Ok(None)
}

impl EmailConfig {
    /// Environment first, then config file, then defaults. The password is environment-only.
    ///
    /// `env` looks up one variable; pass `|k| std::env::var(k).ok()` in production.
    pub fn resolve(
        env: impl Fn(&str) -> Option<String>,
        file: Option<&Config>,
    ) -> Result<Self, String> {
        let env = |key: &str| env(key).filter(|v| !v.trim().is_empty());
        let from = env(ENV_EMAIL_FROM)
            .or_else(|| file.and_then(|c| c.email_from.clone()))
            .unwrap_or_default();
        let to = env(ENV_EMAIL_TO)
            .or_else(|| file.and_then(|c| c.email_to.clone()))
            .unwrap_or_default();
        let password = env(ENV_EMAIL_PASSWORD).unwrap_or_default();
        let smtp_host = env(ENV_SMTP_HOST)
            .or_else(|| file.and_then(|c| c.smtp_host.clone()))
            .unwrap_or_default();
        let smtp_port = match env(ENV_SMTP_PORT) {
            Some(p) => p
                .trim()
                .parse::<u16>()
                .map_err(|_| format!("Invalid {}: '{}' is not a port number", ENV_SMTP_PORT, p))?,
            None => file.and_then(|c| c.smtp_port).unwrap_or(DEFAULT_SMTP_PORT),
        };
        Ok(Self {
            from,
            to,
            password,
            smtp_host,
            smtp_port,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn parse_empty_config() {
        let c: Config = toml::from_str("").unwrap();
        assert!(c.format.is_none());
        assert!(c.user_agent.is_none());
        assert!(c.timeout_secs.is_none());
        assert!(c.converter.is_none());
        assert!(c.skip_converter.is_none());
        assert!(c.empty_body.is_none());
        assert!(c.smtp_host.is_none());
        assert!(c.smtp_port.is_none());
        assert!(c.email_from.is_none());
        assert!(c.email_to.is_none());
    }

    #[test]
    fn parse_full_config() {
        let s = r#"
            format = "azw3"
            user_agent = "Custom/1.0"
            timeout_secs = 60
            converter = "/opt/calibre/ebook-convert"
            skip_converter = true
            empty_body = "placeholder"
            smtp_host = "smtp.example.com"
            smtp_port = 465
            email_from = "me@example.com"
            email_to = "me@kindle.com"
        "#;
        let c: Config = toml::from_str(s).unwrap();
        assert_eq!(c.format.as_deref(), Some("azw3"));
        assert_eq!(c.user_agent.as_deref(), Some("Custom/1.0"));
        assert_eq!(c.timeout_secs, Some(60));
        assert_eq!(c.converter.as_deref(), Some("/opt/calibre/ebook-convert"));
        assert_eq!(c.skip_converter, Some(true));
        assert_eq!(c.empty_body.as_deref(), Some("placeholder"));
        assert_eq!(c.smtp_host.as_deref(), Some("smtp.example.com"));
        assert_eq!(c.smtp_port, Some(465));
        assert_eq!(c.email_from.as_deref(), Some("me@example.com"));
        assert_eq!(c.email_to.as_deref(), Some("me@kindle.com"));
    }

    #[test]
    fn parse_partial_config() {
        let c: Config = toml::from_str("timeout_secs = 5").unwrap();
        assert_eq!(c.timeout_secs, Some(5));
        assert!(c.format.is_none());
    }

    #[test]
    fn invalid_toml_errors() {
        assert!(toml::from_str::<Config>("format = [").is_err());
        assert!(toml::from_str::<Config>("smtp_port = 70000").is_err());
    }

    #[test]
    fn load_first_skips_missing_and_reports_invalid() -> std::io::Result<()> {
        let dir = tempfile::tempdir()?;
        let missing = dir.path().join("nope.toml");
        assert!(load_first(&[missing.clone()]).unwrap().is_none());

        let good = dir.path().join("good.toml");
        std::fs::write(&good, "format = \"mobi\"")?;
        let c = load_first(&[missing.clone(), good]).unwrap().unwrap();
        assert_eq!(c.format.as_deref(), Some("mobi"));

        let bad = dir.path().join("bad.toml");
        std::fs::write(&bad, "format = ")?;
        let err = load_first(&[bad]).unwrap_err();
        assert!(err.contains("Invalid config"));
        Ok(())
    }

    #[test]
    fn email_env_overrides_file() {
        let file: Config = toml::from_str(
            r#"
            email_from = "file@example.com"
            email_to = "file@kindle.com"
            smtp_host = "smtp.file.com"
            smtp_port = 465
        "#,
        )
        .unwrap();
        let env = env_of(&[
            (ENV_EMAIL_FROM, "env@example.com"),
            (ENV_EMAIL_PASSWORD, "secret"),
            (ENV_SMTP_PORT, "2525"),
        ]);
        let cfg = EmailConfig::resolve(env, Some(&file)).unwrap();
        assert_eq!(cfg.from, "env@example.com");
        assert_eq!(cfg.to, "file@kindle.com");
        assert_eq!(cfg.password, "secret");
        assert_eq!(cfg.smtp_host, "smtp.file.com");
        assert_eq!(cfg.smtp_port, 2525);
    }

    #[test]
    fn email_defaults_when_nothing_set() {
        let cfg = EmailConfig::resolve(env_of(&[]), None).unwrap();
        assert_eq!(cfg.from, "");
        assert_eq!(cfg.to, "");
        assert_eq!(cfg.password, "");
        assert_eq!(cfg.smtp_host, "");
        assert_eq!(cfg.smtp_port, DEFAULT_SMTP_PORT);
    }

    #[test]
    fn email_rejects_bad_port() {
        let err = EmailConfig::resolve(env_of(&[(ENV_SMTP_PORT, "smtp")]), None).unwrap_err();
        assert!(err.contains("SMTP_PORT"));
    }
}
