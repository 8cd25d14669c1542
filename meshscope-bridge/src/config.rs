/**
 * CONFIG - Configuration immuable du bridge d'analyse
 *
 * RÔLE : Charge `meshscope.yaml` (chemin via MESHSCOPE_CONFIG) et fournit
 * des valeurs par défaut si le fichier est absent ou invalide.
 *
 * UTILITÉ : La config est une valeur passée explicitement à chaque appel
 * protocole, jamais un état global du process.
 */

use meshscope_core::{DistanceModel, Location, LocationResolver};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tokio::fs;
use tracing::warn;

pub const CONFIG_ENV: &str = "MESHSCOPE_CONFIG";

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct MeshConfig {
    pub mqtt: MqttConf,
    pub base_topic: String,
    pub timeouts: TimeoutConf,
    pub location: LocationConf,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct MqttConf {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub keep_alive_secs: u64,
    pub username: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct TimeoutConf {
    /// Simple bridge queries (health check, info)
    pub request_secs: u64,
    /// Full network map; the bridge scans every router so this is slow
    pub topology_secs: u64,
    /// Window for collecting streamed device state
    pub collect_window_secs: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct LocationConf {
    /// Lowest to highest
    pub floors: Vec<String>,
    /// Used when the coordinator carries no location metadata
    pub coordinator: Option<Location>,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            mqtt: MqttConf::default(),
            base_topic: "zigbee2mqtt".into(),
            timeouts: TimeoutConf::default(),
            location: LocationConf::default(),
        }
    }
}

impl Default for MqttConf {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 1883,
            client_id: "meshscope".into(),
            keep_alive_secs: 15,
            username: None,
            password: None,
        }
    }
}

impl Default for TimeoutConf {
    fn default() -> Self {
        Self {
            request_secs: 10,
            topology_secs: 300,
            collect_window_secs: 10,
        }
    }
}

impl Default for LocationConf {
    fn default() -> Self {
        Self {
            floors: vec!["basement".into(), "ground".into(), "upper".into()],
            coordinator: None,
        }
    }
}

impl TimeoutConf {
    pub fn request(&self) -> Duration {
        Duration::from_secs(self.request_secs)
    }

    pub fn topology(&self) -> Duration {
        Duration::from_secs(self.topology_secs)
    }

    pub fn collect_window(&self) -> Duration {
        Duration::from_secs(self.collect_window_secs)
    }
}

impl MeshConfig {
    /// Full topic under the bridge base topic, e.g. `zigbee2mqtt/bridge/devices`
    pub fn topic(&self, suffix: &str) -> String {
        format!("{}/{}", self.base_topic.trim_end_matches('/'), suffix.trim_start_matches('/'))
    }

    /// Strips the base topic, `None` if the topic lives elsewhere
    pub fn relative_topic<'a>(&self, topic: &'a str) -> Option<&'a str> {
        topic
            .strip_prefix(self.base_topic.trim_end_matches('/'))
            .and_then(|rest| rest.strip_prefix('/'))
    }

    pub fn distance_model(&self) -> DistanceModel {
        DistanceModel::new(&self.location.floors)
    }

    pub fn location_resolver(&self) -> LocationResolver {
        LocationResolver::new().with_coordinator_default(self.location.coordinator.clone())
    }
}

/// Loads the file named by `MESHSCOPE_CONFIG` (default `meshscope.yaml`)
pub async fn load_config() -> MeshConfig {
    let path = std::env::var(CONFIG_ENV).unwrap_or_else(|_| "meshscope.yaml".into());
    load_config_from(path).await
}

pub async fn load_config_from<P: AsRef<Path>>(path: P) -> MeshConfig {
    let path = path.as_ref();
    if !path.exists() {
        warn!(path = %path.display(), "no config file, using defaults");
        return MeshConfig::default();
    }
    let txt = match fs::read_to_string(path).await {
        Ok(txt) => txt,
        Err(e) => {
            warn!(path = %path.display(), "config unreadable ({e}), using defaults");
            return MeshConfig::default();
        }
    };
    if txt.trim().is_empty() {
        return MeshConfig::default();
    }
    serde_yaml::from_str(&txt).unwrap_or_else(|e| {
        warn!(path = %path.display(), "invalid config ({e}), using defaults");
        MeshConfig::default()
    })
}
