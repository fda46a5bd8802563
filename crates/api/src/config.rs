//! Process configuration, read once from the environment at start-up.

use std::net::SocketAddr;
use std::str::FromStr;

use anyhow::{Context, bail};
use tracing::warn;

const DEV_KEY_SECRET: &str = "genflow-dev-secret";

/// Which loops this process runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    /// HTTP API and in-process workers.
    #[default]
    All,
    Api,
    Worker,
}

impl Mode {
    pub fn serves_http(&self) -> bool {
        matches!(self, Mode::All | Mode::Api)
    }

    pub fn runs_workers(&self) -> bool {
        matches!(self, Mode::All | Mode::Worker)
    }
}

impl FromStr for Mode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "all" => Ok(Mode::All),
            "api" => Ok(Mode::Api),
            "worker" => Ok(Mode::Worker),
            other => bail!("unknown GENFLOW_MODE '{other}' (expected all, api or worker)"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub key_secret: String,
    pub default_provider: String,
    pub worker_concurrency: usize,
    pub mode: Mode,
    pub hub_buffer: usize,
    pub async_best_effort: bool,
    pub queue_max_deliveries: Option<u32>,
    pub bootstrap_tenant: Option<String>,
    /// Set when Redis transports should be used.
    pub redis_url: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            key_secret: DEV_KEY_SECRET.to_string(),
            default_provider: "stub".to_string(),
            worker_concurrency: 4,
            mode: Mode::All,
            hub_buffer: 64,
            async_best_effort: true,
            queue_max_deliveries: None,
            bootstrap_tenant: None,
            redis_url: None,
        }
    }
}

fn var(name: &str) -> Option<String> {
    std::env::var(name).ok().map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn parsed<T>(name: &str) -> anyhow::Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    var(name)
        .map(|raw| raw.parse::<T>().with_context(|| format!("invalid {name}: '{raw}'")))
        .transpose()
}

fn flag(name: &str) -> anyhow::Result<Option<bool>> {
    var(name)
        .map(|raw| match raw.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => bail!("invalid {name}: '{raw}' (expected true or false)"),
        })
        .transpose()
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::default();

        let key_secret = var("GENFLOW_KEY_SECRET").unwrap_or_else(|| {
            warn!("GENFLOW_KEY_SECRET not set; using insecure dev default");
            defaults.key_secret.clone()
        });

        let use_redis = flag("GENFLOW_USE_REDIS")?.unwrap_or(false);
        let redis_url = match (use_redis, var("REDIS_URL")) {
            (true, Some(url)) => Some(url),
            (true, None) => bail!("GENFLOW_USE_REDIS is set but REDIS_URL is missing"),
            (false, _) => None,
        };

        Ok(Self {
            bind_addr: parsed("GENFLOW_BIND_ADDR")?.unwrap_or(defaults.bind_addr),
            key_secret,
            default_provider: var("GENFLOW_DEFAULT_PROVIDER").unwrap_or(defaults.default_provider),
            worker_concurrency: parsed::<usize>("GENFLOW_WORKER_CONCURRENCY")?
                .unwrap_or(defaults.worker_concurrency)
                .max(1),
            mode: var("GENFLOW_MODE")
                .map(|raw| raw.parse::<Mode>())
                .transpose()?
                .unwrap_or_default(),
            hub_buffer: parsed::<usize>("GENFLOW_HUB_BUFFER")?
                .unwrap_or(defaults.hub_buffer)
                .max(1),
            async_best_effort: flag("GENFLOW_ASYNC_BEST_EFFORT")?
                .unwrap_or(defaults.async_best_effort),
            queue_max_deliveries: parsed::<u32>("GENFLOW_QUEUE_MAX_DELIVERIES")?.filter(|m| *m > 0),
            bootstrap_tenant: var("GENFLOW_BOOTSTRAP_TENANT"),
            redis_url,
        })
    }
}
