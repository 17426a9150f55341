use std::path::PathBuf;
use std::time::Duration;

use crate::auth::MIN_BCRYPT_COST;
use crate::session::MAX_SESSION_TTL;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StoreBackend {
    Memory { data_dir: Option<PathBuf> },
    Postgres { database_url: String },
}

/// Process configuration derived from env.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub bind: String,
    pub port: u16,
    pub store: StoreBackend,
    pub session_ttl: Duration,
    pub session_cleanup_every: Duration,
    pub bcrypt_cost: u32,
    pub cookie_secure: bool,
    pub frontend_url: String,
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{name} has an invalid value '{value}'")]
    Invalid { name: &'static str, value: String },
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("BCRYPT_COST must be between 10 and 31")]
    WeakBcryptCost,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`AppConfig::from_env`] with an injectable variable source.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        fn parsed<T: std::str::FromStr>(
            get: &impl Fn(&str) -> Option<String>,
            name: &'static str,
            default: T,
        ) -> Result<T, ConfigError> {
            match get(name) {
                None => Ok(default),
                Some(v) => v.trim().parse().map_err(|_| ConfigError::Invalid { name, value: v }),
            }
        }
        fn flag(get: &impl Fn(&str) -> Option<String>, name: &'static str) -> bool {
            get(name).map(|v| v == "1" || v.eq_ignore_ascii_case("true")).unwrap_or(false)
        }

        let store = match get("PACEPAL_STORE").as_deref().unwrap_or("memory") {
            "memory" => StoreBackend::Memory { data_dir: get("PACEPAL_DATA_DIR").map(PathBuf::from) },
            "postgres" => StoreBackend::Postgres {
                database_url: get("DATABASE_URL").ok_or(ConfigError::Missing("DATABASE_URL"))?,
            },
            other => return Err(ConfigError::Invalid { name: "PACEPAL_STORE", value: other.to_string() }),
        };

        let bcrypt_cost: u32 = parsed(&get, "BCRYPT_COST", MIN_BCRYPT_COST)?;
        if !(MIN_BCRYPT_COST..=31).contains(&bcrypt_cost) {
            return Err(ConfigError::WeakBcryptCost);
        }

        let ttl_secs: u64 = parsed(&get, "SESSION_TTL_SECS", 24 * 60 * 60)?;
        let cleanup_secs: u64 = parsed(&get, "SESSION_CLEANUP_SECS", 24 * 60 * 60)?;
        let max_secs = MAX_SESSION_TTL.as_secs();
        if ttl_secs == 0 || ttl_secs > max_secs {
            return Err(ConfigError::Invalid { name: "SESSION_TTL_SECS", value: ttl_secs.to_string() });
        }
        if cleanup_secs == 0 || cleanup_secs > max_secs {
            return Err(ConfigError::Invalid { name: "SESSION_CLEANUP_SECS", value: cleanup_secs.to_string() });
        }

        Ok(Self {
            bind: get("PACEPAL_BIND").unwrap_or_else(|| "0.0.0.0".into()),
            port: parsed(&get, "PACEPAL_PORT", 8080)?,
            store,
            session_ttl: Duration::from_secs(ttl_secs),
            session_cleanup_every: Duration::from_secs(cleanup_secs),
            bcrypt_cost,
            cookie_secure: flag(&get, "COOKIE_SECURE"),
            frontend_url: get("FRONTEND_URL").unwrap_or_else(|| "http://localhost:5173".into()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn cfg(vars: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let map: HashMap<String, String> =
            vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        AppConfig::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn defaults() {
        let c = cfg(&[]).unwrap();
        assert_eq!(c.port, 8080);
        assert_eq!(c.store, StoreBackend::Memory { data_dir: None });
        assert_eq!(c.session_ttl, Duration::from_secs(86_400));
        assert_eq!(c.bcrypt_cost, 10);
        assert!(!c.cookie_secure);
    }

    #[test]
    fn postgres_requires_url() {
        assert_eq!(cfg(&[("PACEPAL_STORE", "postgres")]).unwrap_err(), ConfigError::Missing("DATABASE_URL"));
        let c = cfg(&[("PACEPAL_STORE", "postgres"), ("DATABASE_URL", "postgres://x")]).unwrap();
        assert_eq!(c.store, StoreBackend::Postgres { database_url: "postgres://x".into() });
    }

    #[test]
    fn rejects_weak_cost_and_bad_numbers() {
        assert_eq!(cfg(&[("BCRYPT_COST", "4")]).unwrap_err(), ConfigError::WeakBcryptCost);
        assert!(matches!(cfg(&[("PACEPAL_PORT", "http")]), Err(ConfigError::Invalid { name: "PACEPAL_PORT", .. })));
        assert!(cfg(&[("PACEPAL_STORE", "redis")]).is_err());
        assert!(cfg(&[("SESSION_TTL_SECS", "0")]).is_err());
    }

    #[test]
    fn session_ttl_is_capped_at_one_year() {
        assert!(cfg(&[("SESSION_TTL_SECS", "31536000")]).is_ok());
        assert_eq!(
            cfg(&[("SESSION_TTL_SECS", "18446744073709551615")]).unwrap_err(),
            ConfigError::Invalid { name: "SESSION_TTL_SECS", value: "18446744073709551615".into() }
        );
        assert!(cfg(&[("SESSION_CLEANUP_SECS", "31536001")]).is_err());
    }

    #[test]
    fn flags() {
        assert!(cfg(&[("COOKIE_SECURE", "true")]).unwrap().cookie_secure);
        assert!(cfg(&[("COOKIE_SECURE", "1")]).unwrap().cookie_secure);
    }
}
