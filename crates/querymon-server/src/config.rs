use querymon_common::settings::AlertSettings;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// HTTP endpoint of the external PQL executor.
    #[serde(default = "default_pql_endpoint")]
    pub pql_endpoint: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub sweeper: SweeperConfig,
    /// Initial values for the dynamic alerting settings.
    #[serde(default)]
    pub alerting: AlertSettings,
    #[serde(default)]
    pub destinations: Vec<DestinationConfig>,
}

#[derive(Debug, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_scheduler_tick_secs")]
    pub tick_secs: u64,
    #[serde(default = "default_scheduler_max_concurrent")]
    pub max_concurrent: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_secs: default_scheduler_tick_secs(),
            max_concurrent: default_scheduler_max_concurrent(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SweeperConfig {
    /// Fixed delay between sweeps on the leader.
    #[serde(default = "default_sweep_delay_secs")]
    pub sweep_delay_secs: u64,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            sweep_delay_secs: default_sweep_delay_secs(),
        }
    }
}

/// A named webhook endpoint trigger actions can target.
#[derive(Debug, Deserialize)]
pub struct DestinationConfig {
    pub id: String,
    pub url: String,
}

fn default_pql_endpoint() -> String {
    "http://127.0.0.1:9200/_plugins/_pql".to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_scheduler_tick_secs() -> u64 {
    10
}

fn default_scheduler_max_concurrent() -> usize {
    8
}

fn default_sweep_delay_secs() -> u64 {
    60
}

impl ServerConfig {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            pql_endpoint: default_pql_endpoint(),
            request_timeout_secs: default_request_timeout_secs(),
            scheduler: SchedulerConfig::default(),
            sweeper: SweeperConfig::default(),
            alerting: AlertSettings::default(),
            destinations: Vec::new(),
        }
    }
}
