use std::net::SocketAddr;

use thiserror::Error;

const DEFAULT_DATABASE: &str = "OpenSplit";
const DEFAULT_BIND: &str = "0.0.0.0:8080";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("you need to add {0} to the env")]
    Missing(&'static str),
    #[error("{key} has an invalid value: {value}")]
    Invalid { key: &'static str, value: String },
}

#[derive(Clone, Debug, PartialEq)]
pub struct Config {
    pub mongodb_uri: String,
    pub database: String,
    pub bind: SocketAddr,
    /// Allowed CORS origins. `*` allows any origin.
    pub cors_origins: Vec<String>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key lookup, so tests don't touch the process env.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mongodb_uri = lookup("MONGODB_URI")
            .filter(|uri| !uri.trim().is_empty())
            .ok_or(ConfigError::Missing("MONGODB_URI"))?;
        let database = lookup("OPENSPLIT_DATABASE").unwrap_or_else(|| DEFAULT_DATABASE.into());
        let bind_value = lookup("OPENSPLIT_BIND").unwrap_or_else(|| DEFAULT_BIND.into());
        let bind = bind_value.parse().map_err(|_| ConfigError::Invalid {
            key: "OPENSPLIT_BIND",
            value: bind_value.clone(),
        })?;
        let cors_origins = lookup("OPENSPLIT_CORS_ORIGINS")
            .unwrap_or_else(|| "*".into())
            .split(',')
            .map(|origin| origin.trim().to_string())
            .filter(|origin| !origin.is_empty())
            .collect();

        Ok(Config {
            mongodb_uri,
            database,
            bind,
            cors_origins,
        })
    }

    pub fn allows_any_origin(&self) -> bool {
        self.cors_origins.is_empty() || self.cors_origins.iter().any(|o| o == "*")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| vars.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_only_uri_is_set() {
        let config =
            Config::from_lookup(lookup_from(&[("MONGODB_URI", "mongodb://db:27017")])).unwrap();

        assert_eq!(config.database, "OpenSplit");
        assert_eq!(config.bind, "0.0.0.0:8080".parse::<SocketAddr>().unwrap());
        assert!(config.allows_any_origin());
    }

    #[test]
    fn uri_is_required() {
        let result = Config::from_lookup(lookup_from(&[]));
        assert!(matches!(result, Err(ConfigError::Missing("MONGODB_URI"))));
    }

    #[test]
    fn invalid_bind_is_reported() {
        let result = Config::from_lookup(lookup_from(&[
            ("MONGODB_URI", "mongodb://db:27017"),
            ("OPENSPLIT_BIND", "not-an-address"),
        ]));

        match result {
            Err(ConfigError::Invalid { key, value }) => {
                assert_eq!(key, "OPENSPLIT_BIND");
                assert_eq!(value, "not-an-address");
            }
            other => panic!("expected invalid bind, got {other:?}"),
        }
    }

    #[test]
    fn cors_origins_are_split_and_trimmed() {
        let config = Config::from_lookup(lookup_from(&[
            ("MONGODB_URI", "mongodb://db:27017"),
            ("OPENSPLIT_CORS_ORIGINS", "https://a.example, https://b.example,"),
        ]))
        .unwrap();

        assert_eq!(
            config.cors_origins,
            vec!["https://a.example", "https://b.example"]
        );
        assert!(!config.allows_any_origin());
    }
}
