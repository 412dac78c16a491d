use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::model::Quantity;

/// Loads a config of type `T`, merging (in increasing priority) its
/// `Default`, an optional TOML file, and environment variables prefixed
/// `CNET_AGENT__` with `__` as the nesting separator. Mirrors the
/// teacher's figment-based `ConfigLoader` (`cloud-common::config`,
/// `cli::golem-cli::config`) without depending on that crate's internal
/// `golem_common::config::ConfigLoader`, which is not part of the
/// retrieved pack.
pub struct ConfigLoader<T> {
    config_file: Option<PathBuf>,
    _marker: std::marker::PhantomData<T>,
}

impl<T> ConfigLoader<T>
where
    T: Default + Serialize + for<'de> Deserialize<'de>,
{
    pub fn new(config_file: Option<impl AsRef<Path>>) -> Self {
        Self {
            config_file: config_file.map(|p| p.as_ref().to_path_buf()),
            _marker: std::marker::PhantomData,
        }
    }

    pub fn load(&self) -> figment::Result<T> {
        let mut figment = Figment::new().merge(Serialized::defaults(T::default()));
        if let Some(path) = &self.config_file {
            if path.exists() {
                figment = figment.merge(Toml::file(path));
            }
        }
        figment
            .merge(Env::prefixed("CNET_AGENT__").split("__"))
            .extract()
    }

    /// If `--dump-config` was requested, prints the effective config as
    /// TOML to stdout and returns `None`; otherwise loads and returns
    /// `Some(config)`.
    pub fn load_or_dump_config(&self, dump: bool) -> figment::Result<Option<T>> {
        let config = self.load()?;
        if dump {
            println!("{}", toml::to_string_pretty(&config).unwrap_or_default());
            Ok(None)
        } else {
            Ok(Some(config))
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentSection {
    pub node_id: String,
    pub node_name: String,
    pub address: String,
    pub port: u16,
    pub region: String,
    pub datacenter: String,
    #[serde(with = "humantime_serde")]
    pub heartbeat: Duration,
    /// Address of the parent node to register with on startup, if any
    /// (spec §9 supplement: overlay bootstrap).
    pub parent_address: Option<String>,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            node_id: "node-local".to_string(),
            node_name: "cnet-agent".to_string(),
            address: "127.0.0.1".to_string(),
            port: 7700,
            region: "default".to_string(),
            datacenter: "default".to_string(),
            heartbeat: Duration::from_secs(30),
            parent_address: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourcesSection {
    pub total: Quantity,
}

impl Default for ResourcesSection {
    fn default() -> Self {
        Self {
            // 4 cores, no GPU, 8 GiB memory, 50 GiB storage.
            total: Quantity::new(4000, 0, 8 * 1024 * 1024 * 1024, 50 * 1024 * 1024 * 1024),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerStrategyKind {
    Default,
    BestFit,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerSection {
    pub strategy: SchedulerStrategyKind,
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            strategy: SchedulerStrategyKind::Default,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageKind {
    Sqlite,
    Filesystem,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SqliteSection {
    pub db_path: String,
    pub data_path: String,
}

impl Default for SqliteSection {
    fn default() -> Self {
        Self {
            db_path: "cnet-agent.db".to_string(),
            data_path: "data".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSection {
    #[serde(rename = "type")]
    pub kind: StorageKind,
    pub sqlite: SqliteSection,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            kind: StorageKind::Filesystem,
            sqlite: SqliteSection::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SidecarBinariesSection {
    pub yolo: String,
    pub opencv: String,
    pub data_gateway: String,
    pub container_runtime: String,
}

impl Default for SidecarBinariesSection {
    fn default() -> Self {
        Self {
            yolo: "bin/cnet-inference-yolo".to_string(),
            opencv: "bin/cnet-inference-opencv".to_string(),
            data_gateway: "bin/cnet-gateway-data".to_string(),
            container_runtime: "docker".to_string(),
        }
    }
}

/// Configuration for the outbound delegation/overlay HTTP client,
/// grounded on the teacher's `HttpClientConfig`
/// (`cli::golem-cli::config`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpClientSection {
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
}

impl Default for HttpClientSection {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrySection {
    #[serde(with = "humantime_serde")]
    pub staleness_sweep_period: Duration,
    pub staleness_multiplier: u32,
}

impl Default for RegistrySection {
    fn default() -> Self {
        Self {
            staleness_sweep_period: Duration::from_secs(30),
            staleness_multiplier: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceExecutorSection {
    #[serde(with = "humantime_serde")]
    pub health_probe_period: Duration,
    #[serde(with = "humantime_serde")]
    pub ready_deadline: Duration,
    pub max_restarts: u32,
}

impl Default for ServiceExecutorSection {
    fn default() -> Self {
        Self {
            health_probe_period: Duration::from_secs(30),
            ready_deadline: Duration::from_secs(30),
            max_restarts: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataSection {
    pub data_root: String,
}

impl Default for DataSection {
    fn default() -> Self {
        Self {
            // spec §4.5: logs default under `<tempdir>/cnet/logs/<id>.log`.
            data_root: std::env::temp_dir().join("cnet").to_string_lossy().into_owned(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TracingSection {
    pub default_filter: String,
    pub json: bool,
}

impl Default for TracingSection {
    fn default() -> Self {
        Self {
            default_filter: "info".to_string(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AgentConfig {
    pub agent: AgentSection,
    pub resources: ResourcesSection,
    pub scheduler: SchedulerSection,
    pub storage: StorageSection,
    pub bin: SidecarBinariesSection,
    pub http_client: HttpClientSection,
    pub registry: RegistrySection,
    pub service_executor: ServiceExecutorSection,
    pub data: DataSection,
    pub tracing: TracingSection,
}
