use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub database_url: String,
    pub server_host: String,
    pub server_port: u16,
    pub workers: usize,
    pub static_dir: Option<String>,
    pub default_page_size: i64,
    pub max_page_size: i64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: "sqlite://projecthub.db".to_string(),
            server_host: "127.0.0.1".to_string(),
            server_port: 8080,
            workers: 2,
            static_dir: None,
            default_page_size: 50,
            max_page_size: 200,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup. Values that fail to
    /// parse keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Config::default();

        if let Some(url) = lookup("DATABASE_URL") {
            config.database_url = url;
        }

        if let Some(host) = lookup("SERVER_HOST") {
            config.server_host = host;
        }

        if let Some(port) = lookup("SERVER_PORT") {
            if let Ok(port_val) = port.parse() {
                config.server_port = port_val;
            }
        }

        if let Some(workers) = lookup("SERVER_WORKERS") {
            if let Ok(workers_val) = workers.parse::<usize>() {
                if workers_val > 0 {
                    config.workers = workers_val;
                }
            }
        }

        if let Some(dir) = lookup("STATIC_DIR") {
            if !dir.trim().is_empty() {
                config.static_dir = Some(dir);
            }
        }

        if let Some(size) = lookup("DEFAULT_PAGE_SIZE") {
            if let Ok(size_val) = size.parse::<i64>() {
                if size_val > 0 {
                    config.default_page_size = size_val;
                }
            }
        }

        if let Some(size) = lookup("MAX_PAGE_SIZE") {
            if let Ok(size_val) = size.parse::<i64>() {
                if size_val > 0 {
                    config.max_page_size = size_val;
                }
            }
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_when_env_empty() {
        let config = Config::from_lookup(|_| None);
        assert_eq!(config.database_url, "sqlite://projecthub.db");
        assert_eq!(config.server_port, 8080);
        assert!(config.static_dir.is_none());
    }

    #[test]
    fn test_overrides_and_bad_numbers() {
        let env: HashMap<&str, &str> = [
            ("DATABASE_URL", "sqlite::memory:"),
            ("SERVER_PORT", "not-a-port"),
            ("SERVER_WORKERS", "4"),
            ("MAX_PAGE_SIZE", "-3"),
            ("STATIC_DIR", "../frontend"),
        ]
        .into_iter()
        .collect();

        let config = Config::from_lookup(|key| env.get(key).map(|v| v.to_string()));
        assert_eq!(config.database_url, "sqlite::memory:");
        assert_eq!(config.server_port, 8080);
        assert_eq!(config.workers, 4);
        assert_eq!(config.max_page_size, 200);
        assert_eq!(config.static_dir.as_deref(), Some("../frontend"));
    }
}
