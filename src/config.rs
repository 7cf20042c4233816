//! Environment-based configuration.
//!
//! Values come exclusively from the process environment. The reader
//! collects every problem instead of failing on the first one, so a
//! misconfigured deployment reports all mistakes at once.

use std::env;
use std::time::Duration;

use thiserror::Error;
use tracing::Level;

/// Logging output configuration.
#[derive(Debug, Clone)]
pub struct LoggerConfig {
    pub level: Level,
    /// Human-readable output instead of JSON lines.
    pub plaintext: bool,
}

/// Listener configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub addr: String,
}

/// Manager and store limits.
#[derive(Debug, Clone, Copy)]
pub struct ManagerConfig {
    pub max_total: i64,
    pub max_active: usize,
    pub max_files: i64,
    pub task_ttl: Duration,
    pub process_delay: Duration,
}

/// Loader policy.
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    pub allow_mime: Vec<String>,
}

/// Full service configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub logger: LoggerConfig,
    pub server: ServerConfig,
    pub manager: ManagerConfig,
    pub loader: LoaderConfig,
}

/// Configuration loading failure; carries every collected problem.
#[derive(Debug, Error)]
#[error("invalid configuration: {0}")]
pub struct ConfigError(String);

/// Loads the configuration from the environment.
///
/// # Errors
///
/// Lists every missing required variable and unparseable value.
pub fn load() -> Result<Config, ConfigError> {
    let mut reader = EnvReader::default();

    let config = Config {
        logger: LoggerConfig {
            level: reader.level("LOG_LEVEL", Level::INFO),
            plaintext: reader.bool("LOG_PLAINTEXT", false),
        },
        server: ServerConfig {
            addr: normalize_addr(reader.string("SERVER_ADDR", ":8080")),
        },
        manager: ManagerConfig {
            max_total: reader.int("MANAGER_MAX_TOTAL", 1000),
            max_active: reader.count("MANAGER_MAX_ACTIVE", 3),
            max_files: reader.int("MANAGER_MAX_FILES", 3),
            task_ttl: reader.duration("MANAGER_TASK_TTL", Duration::from_secs(600)),
            process_delay: reader.duration("MANAGER_PROCESS_DELAY", Duration::ZERO),
        },
        loader: LoaderConfig {
            allow_mime: reader.required_list("LOADER_ALLOW_MIME"),
        },
    };

    reader.finish()?;
    Ok(config)
}

/// Accepts the `:8080` shorthand for an all-interfaces bind.
fn normalize_addr(addr: String) -> String {
    if addr.starts_with(':') {
        return format!("0.0.0.0{addr}");
    }
    addr
}

/// Error-collecting environment reader.
#[derive(Debug, Default)]
struct EnvReader {
    problems: Vec<String>,
}

impl EnvReader {
    fn finish(self) -> Result<(), ConfigError> {
        if self.problems.is_empty() {
            return Ok(());
        }
        Err(ConfigError(self.problems.join("; ")))
    }

    fn raw(key: &str) -> Option<String> {
        env::var(key).ok()
    }

    fn string(&mut self, key: &str, default: &str) -> String {
        Self::raw(key).unwrap_or_else(|| default.to_string())
    }

    /// Whitespace-separated list; the variable must be present and
    /// non-empty.
    fn required_list(&mut self, key: &str) -> Vec<String> {
        let Some(value) = Self::raw(key) else {
            self.problems.push(format!("{key} env is required"));
            return Vec::new();
        };
        let items: Vec<String> = value.split_whitespace().map(String::from).collect();
        if items.is_empty() {
            self.problems.push(format!("{key} env is required"));
        }
        items
    }

    fn int(&mut self, key: &str, default: i64) -> i64 {
        let Some(value) = Self::raw(key) else {
            return default;
        };
        match value.trim().parse() {
            Ok(parsed) => parsed,
            Err(parse_error) => {
                self.problems.push(format!("{key}={value}: {parse_error}"));
                0
            }
        }
    }

    fn count(&mut self, key: &str, default: usize) -> usize {
        let Some(value) = Self::raw(key) else {
            return default;
        };
        match value.trim().parse() {
            Ok(parsed) => parsed,
            Err(parse_error) => {
                self.problems.push(format!("{key}={value}: {parse_error}"));
                0
            }
        }
    }

    fn bool(&mut self, key: &str, default: bool) -> bool {
        let Some(value) = Self::raw(key) else {
            return default;
        };
        match value.to_lowercase().as_str() {
            "true" | "yes" | "on" | "1" => true,
            "false" | "no" | "off" | "0" => false,
            _ => {
                self.problems.push(format!(
                    "{key}={value}: want true/false, yes/no, on/off or 1/0"
                ));
                false
            }
        }
    }

    fn duration(&mut self, key: &str, default: Duration) -> Duration {
        let Some(value) = Self::raw(key) else {
            return default;
        };
        match humantime::parse_duration(value.trim()) {
            Ok(parsed) => parsed,
            Err(parse_error) => {
                self.problems.push(format!("{key}={value}: {parse_error}"));
                Duration::ZERO
            }
        }
    }

    fn level(&mut self, key: &str, default: Level) -> Level {
        let Some(value) = Self::raw(key) else {
            return default;
        };
        match value.trim().parse() {
            Ok(parsed) => parsed,
            Err(parse_error) => {
                self.problems.push(format!("{key}={value}: {parse_error}"));
                default
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    /// Environment mutation is process-global; every test in this module
    /// serializes on this lock and restores what it touched.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    const ALL_KEYS: &[&str] = &[
        "LOG_LEVEL",
        "LOG_PLAINTEXT",
        "SERVER_ADDR",
        "MANAGER_MAX_TOTAL",
        "MANAGER_MAX_ACTIVE",
        "MANAGER_MAX_FILES",
        "MANAGER_TASK_TTL",
        "MANAGER_PROCESS_DELAY",
        "LOADER_ALLOW_MIME",
    ];

    struct EnvGuard {
        saved: Vec<(&'static str, Option<String>)>,
    }

    impl EnvGuard {
        fn clear_all() -> Self {
            let saved = ALL_KEYS
                .iter()
                .map(|&key| (key, env::var(key).ok()))
                .collect();
            for key in ALL_KEYS {
                // SAFETY: mutation is serialized behind ENV_LOCK.
                unsafe { env::remove_var(key) };
            }
            Self { saved }
        }

        fn set(&self, key: &str, value: &str) {
            // SAFETY: mutation is serialized behind ENV_LOCK.
            unsafe { env::set_var(key, value) };
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (key, value) in &self.saved {
                // SAFETY: mutation is serialized behind ENV_LOCK.
                unsafe {
                    match value {
                        Some(value) => env::set_var(key, value),
                        None => env::remove_var(key),
                    }
                }
            }
        }
    }

    #[test]
    fn test_load_defaults_with_required_allow_list() {
        let _lock = ENV_LOCK.lock().unwrap();
        let guard = EnvGuard::clear_all();
        guard.set("LOADER_ALLOW_MIME", "application/pdf image/jpeg");

        let config = load().unwrap();
        assert_eq!(config.logger.level, Level::INFO);
        assert!(!config.logger.plaintext);
        assert_eq!(config.server.addr, "0.0.0.0:8080");
        assert_eq!(config.manager.max_total, 1000);
        assert_eq!(config.manager.max_active, 3);
        assert_eq!(config.manager.max_files, 3);
        assert_eq!(config.manager.task_ttl, Duration::from_secs(600));
        assert_eq!(config.manager.process_delay, Duration::ZERO);
        assert_eq!(
            config.loader.allow_mime,
            vec!["application/pdf".to_string(), "image/jpeg".to_string()]
        );
    }

    #[test]
    fn test_load_reads_overrides() {
        let _lock = ENV_LOCK.lock().unwrap();
        let guard = EnvGuard::clear_all();
        guard.set("LOG_LEVEL", "debug");
        guard.set("LOG_PLAINTEXT", "yes");
        guard.set("SERVER_ADDR", "127.0.0.1:9090");
        guard.set("MANAGER_MAX_TOTAL", "-1");
        guard.set("MANAGER_MAX_ACTIVE", "5");
        guard.set("MANAGER_MAX_FILES", "10");
        guard.set("MANAGER_TASK_TTL", "1m 30s");
        guard.set("MANAGER_PROCESS_DELAY", "100ms");
        guard.set("LOADER_ALLOW_MIME", "image/png");

        let config = load().unwrap();
        assert_eq!(config.logger.level, Level::DEBUG);
        assert!(config.logger.plaintext);
        assert_eq!(config.server.addr, "127.0.0.1:9090");
        assert_eq!(config.manager.max_total, -1);
        assert_eq!(config.manager.max_active, 5);
        assert_eq!(config.manager.max_files, 10);
        assert_eq!(config.manager.task_ttl, Duration::from_secs(90));
        assert_eq!(config.manager.process_delay, Duration::from_millis(100));
    }

    #[test]
    fn test_load_requires_allow_list() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _guard = EnvGuard::clear_all();

        let error = load().expect_err("allow list is mandatory");
        assert!(error.to_string().contains("LOADER_ALLOW_MIME"));
    }

    #[test]
    fn test_load_collects_every_problem() {
        let _lock = ENV_LOCK.lock().unwrap();
        let guard = EnvGuard::clear_all();
        guard.set("MANAGER_MAX_TOTAL", "many");
        guard.set("MANAGER_TASK_TTL", "soonish");
        guard.set("LOG_PLAINTEXT", "maybe");

        let error = load().expect_err("invalid values must fail");
        let message = error.to_string();
        assert!(message.contains("MANAGER_MAX_TOTAL"), "{message}");
        assert!(message.contains("MANAGER_TASK_TTL"), "{message}");
        assert!(message.contains("LOG_PLAINTEXT"), "{message}");
        assert!(message.contains("LOADER_ALLOW_MIME"), "{message}");
    }

    #[test]
    fn test_normalize_addr_expands_port_shorthand() {
        assert_eq!(normalize_addr(":8080".into()), "0.0.0.0:8080");
        assert_eq!(normalize_addr("127.0.0.1:80".into()), "127.0.0.1:80");
    }
}
