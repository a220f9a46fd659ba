/**
 * CONFIGURATION - Chargement et validation au démarrage
 *
 * Sources, par priorité croissante :
 * 1. fichier YAML optionnel (chemin dans `BRIDGE_CONFIG`)
 * 2. variables d'environnement (`.env` chargé par dotenvy dans main)
 *
 * Une configuration invalide est fatale : le service ne démarre pas.
 */

use crate::broker::mqtt::MqttSettings;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_MQTT_PORT: u16 = 1883;
const DEFAULT_HTTP_PORT: u16 = 4444;
const DEFAULT_COLLECTION: &str = "readings";
const DEFAULT_TEST_GENERATOR_DIR: &str = "test-generator/public";
const DEFAULT_SIMULATION_PERIOD_MS: u64 = 5_000;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} is required")]
    Missing(&'static str),
    #[error("{key} is invalid: {reason}")]
    Invalid { key: &'static str, reason: String },
    #[error("cannot read config file {path}: {source}")]
    File {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("config file {path} is not valid YAML: {source}")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub topic: String,
    pub tls: bool,
    pub ca_cert_path: Option<PathBuf>,
}

impl BrokerConfig {
    pub fn settings(&self) -> MqttSettings {
        MqttSettings {
            host: self.host.clone(),
            port: self.port,
            username: self.username.clone(),
            password: self.password.clone(),
            tls: self.tls,
            ca_cert_path: self.ca_cert_path.clone(),
            client_id_prefix: "telemetry-bridge".into(),
            keep_alive: Duration::from_secs(15),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BridgeConfig {
    pub broker: BrokerConfig,
    pub mongodb_uri: String,
    pub collection: String,
    pub http_port: u16,
    pub stations_upstream: Option<String>,
    pub test_generator_dir: PathBuf,
    pub simulation_period: Duration,
}

/// Valeurs brutes du fichier YAML, mêmes noms que les variables d'environnement
#[derive(Debug, Default, Deserialize)]
#[serde(transparent)]
struct FileValues(HashMap<String, serde_yaml::Value>);

impl FileValues {
    fn get(&self, key: &str) -> Option<String> {
        match self.0.get(key)? {
            serde_yaml::Value::String(s) => Some(s.clone()),
            serde_yaml::Value::Number(n) => Some(n.to_string()),
            serde_yaml::Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }
}

impl BridgeConfig {
    /// Charge depuis l'environnement du processus (et le fichier `BRIDGE_CONFIG`)
    pub fn from_env() -> Result<Self, ConfigError> {
        let file = match std::env::var("BRIDGE_CONFIG") {
            Ok(path) => load_file(Path::new(&path))?,
            Err(_) => FileValues::default(),
        };
        Self::from_lookup(|key| std::env::var(key).ok().or_else(|| file.get(key)))
    }

    /// Construit la configuration à partir d'une source clé → valeur
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let required = |key: &'static str| get(key).ok_or(ConfigError::Missing(key));

        let (host, scheme_tls) = split_scheme(&required("MQTT_BROKER_URL")?);
        let tls = match get("MQTT_TLS") {
            Some(v) => parse_bool("MQTT_TLS", &v)?,
            None => scheme_tls.unwrap_or(true),
        };

        let broker = BrokerConfig {
            host,
            port: parse_or("MQTT_PORT", get("MQTT_PORT"), DEFAULT_MQTT_PORT)?,
            username: required("MQTT_USERNAME")?,
            password: required("MQTT_PASSWORD")?,
            topic: required("MQTT_TOPIC")?,
            tls,
            ca_cert_path: get("CA_CERT_PATH").map(PathBuf::from),
        };

        let mongodb_uri = get("MONGODB_URI")
            .or_else(|| get("MONGO_URI"))
            .ok_or(ConfigError::Missing("MONGODB_URI"))?;

        let period_ms: u64 = parse_or("SIMULATION_PERIOD_MS", get("SIMULATION_PERIOD_MS"), DEFAULT_SIMULATION_PERIOD_MS)?;
        if period_ms == 0 {
            return Err(ConfigError::Invalid {
                key: "SIMULATION_PERIOD_MS",
                reason: "must be greater than zero".into(),
            });
        }

        let http_port = parse_or("PORT", get("PORT"), DEFAULT_HTTP_PORT)?;
        if http_port == 0 {
            return Err(ConfigError::Invalid {
                key: "PORT",
                reason: "must be a positive port number".into(),
            });
        }

        Ok(Self {
            broker,
            mongodb_uri,
            collection: get("MONGODB_COLLECTION").unwrap_or_else(|| DEFAULT_COLLECTION.into()),
            http_port,
            stations_upstream: get("GAIA_SERVER_URL").map(|url| url.trim_end_matches('/').to_string()),
            test_generator_dir: get("TEST_GENERATOR_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_TEST_GENERATOR_DIR)),
            simulation_period: Duration::from_millis(period_ms),
        })
    }
}

fn load_file(path: &Path) -> Result<FileValues, ConfigError> {
    let txt = std::fs::read_to_string(path).map_err(|source| ConfigError::File {
        path: path.to_path_buf(),
        source,
    })?;
    if txt.trim().is_empty() {
        return Ok(FileValues::default());
    }
    serde_yaml::from_str(&txt).map_err(|source| ConfigError::Yaml {
        path: path.to_path_buf(),
        source,
    })
}

/// "mqtts://host" → (host, Some(true)) ; "host" → (host, None)
fn split_scheme(url: &str) -> (String, Option<bool>) {
    if let Some(host) = url.strip_prefix("mqtts://") {
        (host.trim_end_matches('/').to_string(), Some(true))
    } else if let Some(host) = url.strip_prefix("mqtt://") {
        (host.trim_end_matches('/').to_string(), Some(false))
    } else {
        (url.to_string(), None)
    }
}

fn parse_or<T>(key: &'static str, value: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match value {
        Some(v) => v.parse().map_err(|e: T::Err| ConfigError::Invalid {
            key,
            reason: e.to_string(),
        }),
        None => Ok(default),
    }
}

fn parse_bool(key: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ConfigError::Invalid {
            key,
            reason: format!("expected a boolean, got '{other}'"),
        }),
    }
}
