use crate::points::{flexim_points, parse_device_address, PointList};
use crate::scheduler::SchedulerConfig;
use anyhow::{Context, Result};
use dotenvy::dotenv;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_SETUP_CONFIG_PATH: &str = "/etc/bacnet-forwarder/config.json";
const DEFAULT_BACNET_BIND: &str = "0.0.0.0:47808";
const DEFAULT_TAG: &str = "flexim";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    Timestream,
    Stdout,
}

impl SinkKind {
    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "timestream" => Some(SinkKind::Timestream),
            "stdout" => Some(SinkKind::Stdout),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
struct SetupConfigOverrides {
    #[serde(default)]
    points_file: Option<String>,
    #[serde(default)]
    device_address: Option<String>,
    #[serde(default)]
    tag: Option<String>,
    #[serde(default)]
    sink: Option<SinkKind>,
    #[serde(default)]
    timestream_database: Option<String>,
    #[serde(default)]
    timestream_table: Option<String>,
    #[serde(default)]
    aws_region: Option<String>,
    #[serde(default)]
    apdu_timeout_ms: Option<u64>,
    #[serde(default)]
    apdu_retries: Option<u8>,
    #[serde(default)]
    cycles_per_write: Option<usize>,
    #[serde(default)]
    startup_delay_seconds: Option<u64>,
}

fn setup_config_path(vars: &impl Fn(&str) -> Option<String>) -> PathBuf {
    vars("POLLER_CONFIG_PATH")
        .map(|path| path.trim().to_string())
        .filter(|path| !path.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_SETUP_CONFIG_PATH))
}

fn load_setup_config_overrides(path: &Path) -> Option<SetupConfigOverrides> {
    if !path.exists() {
        return None;
    }
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) => {
            tracing::warn!(
                path = %path.display(),
                error = %err,
                "failed to read setup config; using env defaults"
            );
            return None;
        }
    };
    match serde_json::from_str(&contents) {
        Ok(value) => Some(value),
        Err(err) => {
            tracing::warn!(
                path = %path.display(),
                error = %err,
                "failed to parse setup config; using env defaults"
            );
            None
        }
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

fn apply_setup_overrides(
    config: &mut Config,
    overrides: &SetupConfigOverrides,
    vars: &impl Fn(&str) -> Option<String>,
) -> Result<()> {
    let env_allows = |key: &str| non_empty(vars(key).as_deref()).is_none();

    if env_allows("POLLER_POINTS_FILE") {
        if let Some(path) = non_empty(overrides.points_file.as_deref()) {
            config.points_file = Some(PathBuf::from(path));
        }
    }
    if env_allows("POLLER_DEVICE_ADDRESS") {
        if let Some(address) = non_empty(overrides.device_address.as_deref()) {
            config.device_address = Some(
                parse_device_address(&address).context("invalid device_address in setup config")?,
            );
        }
    }
    if env_allows("POLLER_TAG") {
        if let Some(tag) = non_empty(overrides.tag.as_deref()) {
            config.tag = tag;
        }
    }
    if env_allows("POLLER_SINK") {
        if let Some(sink) = overrides.sink {
            config.sink = sink;
        }
    }
    if env_allows("POLLER_TIMESTREAM_DATABASE") {
        if let Some(database) = non_empty(overrides.timestream_database.as_deref()) {
            config.timestream_database = Some(database);
        }
    }
    if env_allows("POLLER_TIMESTREAM_TABLE") {
        if let Some(table) = non_empty(overrides.timestream_table.as_deref()) {
            config.timestream_table = Some(table);
        }
    }
    if env_allows("POLLER_AWS_REGION") {
        if let Some(region) = non_empty(overrides.aws_region.as_deref()) {
            config.aws_region = Some(region);
        }
    }
    if env_allows("POLLER_APDU_TIMEOUT_MS") {
        if let Some(value) = overrides.apdu_timeout_ms.filter(|v| *v != 0) {
            config.apdu_timeout_ms = value;
        }
    }
    if env_allows("POLLER_APDU_RETRIES") {
        if let Some(value) = overrides.apdu_retries {
            config.apdu_retries = value;
        }
    }
    if env_allows("POLLER_CYCLES_PER_WRITE") {
        if let Some(value) = overrides.cycles_per_write.filter(|v| *v != 0) {
            config.cycles_per_write = value;
        }
    }
    if env_allows("POLLER_STARTUP_DELAY_SECONDS") {
        if let Some(value) = overrides.startup_delay_seconds {
            config.startup_delay_seconds = value;
        }
    }
    Ok(())
}

#[derive(Clone, Debug)]
pub struct Config {
    pub points_file: Option<PathBuf>,
    pub device_address: Option<SocketAddr>,
    pub tag: String,
    pub bacnet_bind: SocketAddr,
    pub apdu_timeout_ms: u64,
    pub apdu_retries: u8,
    /// Explicit per-request deadline; derived from the APDU settings when unset.
    pub request_timeout_ms: Option<u64>,
    pub sink: SinkKind,
    pub timestream_database: Option<String>,
    pub timestream_table: Option<String>,
    pub aws_region: Option<String>,
    pub cycles_per_write: usize,
    pub startup_delay_seconds: u64,
    pub otlp_endpoint: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();
        Self::from_vars(|key| std::env::var(key).ok())
    }

    fn from_vars(vars: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let setup_overrides = load_setup_config_overrides(&setup_config_path(&vars));
        let var = |key: &str| non_empty(vars(key).as_deref());

        let points_file = var("POLLER_POINTS_FILE").map(PathBuf::from);
        let device_address = var("POLLER_DEVICE_ADDRESS")
            .map(|raw| parse_device_address(&raw))
            .transpose()
            .context("invalid POLLER_DEVICE_ADDRESS")?;
        let tag = var("POLLER_TAG").unwrap_or_else(|| DEFAULT_TAG.to_string());
        let bacnet_bind = var("POLLER_BACNET_BIND")
            .unwrap_or_else(|| DEFAULT_BACNET_BIND.to_string())
            .parse::<SocketAddr>()
            .context("invalid POLLER_BACNET_BIND")?;
        let apdu_timeout_ms = var("POLLER_APDU_TIMEOUT_MS")
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|v| *v != 0)
            .unwrap_or(3000);
        let apdu_retries = var("POLLER_APDU_RETRIES")
            .and_then(|v| v.parse::<u8>().ok())
            .unwrap_or(2);
        let request_timeout_ms = var("POLLER_REQUEST_TIMEOUT_MS")
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|v| *v != 0);
        let sink = match var("POLLER_SINK") {
            Some(raw) => SinkKind::parse(&raw)
                .with_context(|| format!("POLLER_SINK must be timestream or stdout, got {raw}"))?,
            None => SinkKind::Timestream,
        };
        let timestream_database = var("POLLER_TIMESTREAM_DATABASE");
        let timestream_table = var("POLLER_TIMESTREAM_TABLE");
        let aws_region = var("POLLER_AWS_REGION");
        let cycles_per_write = var("POLLER_CYCLES_PER_WRITE")
            .and_then(|v| v.parse::<usize>().ok())
            .filter(|v| *v != 0)
            .unwrap_or(1);
        let startup_delay_seconds = var("POLLER_STARTUP_DELAY_SECONDS")
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(60);
        let otlp_endpoint = var("OTEL_EXPORTER_OTLP_ENDPOINT");

        let mut config = Self {
            points_file,
            device_address,
            tag,
            bacnet_bind,
            apdu_timeout_ms,
            apdu_retries,
            request_timeout_ms,
            sink,
            timestream_database,
            timestream_table,
            aws_region,
            cycles_per_write,
            startup_delay_seconds,
            otlp_endpoint,
        };

        if let Some(overrides) = setup_overrides.as_ref() {
            apply_setup_overrides(&mut config, overrides, &vars)?;
        }

        Ok(config)
    }

    pub fn apdu_timeout(&self) -> Duration {
        Duration::from_millis(self.apdu_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        let derived = self
            .apdu_timeout_ms
            .saturating_mul(u64::from(self.apdu_retries) + 1)
            .saturating_add(1000);
        Duration::from_millis(self.request_timeout_ms.unwrap_or(derived))
    }

    pub fn startup_delay(&self) -> Duration {
        Duration::from_secs(self.startup_delay_seconds)
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            request_timeout: self.request_timeout(),
            cycles_per_write: self.cycles_per_write,
        }
    }

    /// The configured point file, or the built-in Flexim table for the configured device.
    pub fn point_list(&self) -> Result<PointList> {
        if let Some(path) = &self.points_file {
            return PointList::from_file(path)
                .with_context(|| format!("failed to load point list from {}", path.display()));
        }
        let device = self
            .device_address
            .context("POLLER_POINTS_FILE or POLLER_DEVICE_ADDRESS is required")?;
        Ok(flexim_points(device, &self.tag))
    }

    pub fn timestream_target(&self) -> Result<(&str, &str)> {
        let database = self
            .timestream_database
            .as_deref()
            .context("POLLER_TIMESTREAM_DATABASE is required for the timestream sink")?;
        let table = self
            .timestream_table
            .as_deref()
            .context("POLLER_TIMESTREAM_TABLE is required for the timestream sink")?;
        Ok((database, table))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn load(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_vars(move |key| vars.get(key).cloned())
    }

    fn setup_file(json: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(json.as_bytes()).unwrap();
        file
    }

    #[test]
    fn defaults_without_environment() {
        let config = load(&[("POLLER_CONFIG_PATH", "/nonexistent/config.json")]).unwrap();
        assert_eq!(config.tag, "flexim");
        assert_eq!(config.bacnet_bind, "0.0.0.0:47808".parse().unwrap());
        assert_eq!(config.sink, SinkKind::Timestream);
        assert_eq!(config.cycles_per_write, 1);
        assert_eq!(config.startup_delay(), Duration::from_secs(60));
        assert_eq!(config.apdu_timeout(), Duration::from_secs(3));
        assert_eq!(config.request_timeout(), Duration::from_millis(10_000));
        assert!(config.point_list().is_err());
        assert!(config.timestream_target().is_err());
    }

    #[test]
    fn explicit_request_timeout_wins() {
        let config = load(&[
            ("POLLER_CONFIG_PATH", "/nonexistent/config.json"),
            ("POLLER_APDU_TIMEOUT_MS", "500"),
            ("POLLER_APDU_RETRIES", "0"),
        ])
        .unwrap();
        assert_eq!(config.request_timeout(), Duration::from_millis(1500));

        let config = load(&[
            ("POLLER_CONFIG_PATH", "/nonexistent/config.json"),
            ("POLLER_REQUEST_TIMEOUT_MS", "2500"),
        ])
        .unwrap();
        assert_eq!(config.request_timeout(), Duration::from_millis(2500));
    }

    #[test]
    fn device_address_selects_builtin_table() {
        let config = load(&[
            ("POLLER_CONFIG_PATH", "/nonexistent/config.json"),
            ("POLLER_DEVICE_ADDRESS", "10.10.2.30"),
            ("POLLER_TAG", "457999"),
        ])
        .unwrap();
        let points = config.point_list().unwrap();
        assert_eq!(points.len(), 16);
        assert!(points.iter().all(|point| point.tag == "457999"));
        assert_eq!(points[0].device, "10.10.2.30:47808".parse().unwrap());
    }

    #[test]
    fn rejects_unknown_sink() {
        let err = load(&[
            ("POLLER_CONFIG_PATH", "/nonexistent/config.json"),
            ("POLLER_SINK", "kafka"),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("POLLER_SINK"));
    }

    #[test]
    fn setup_file_fills_unset_keys_only() {
        let file = setup_file(
            r#"{
                "device_address": "10.10.2.31",
                "tag": "from-file",
                "sink": "stdout",
                "timestream_database": "plant",
                "timestream_table": "flow",
                "cycles_per_write": 2
            }"#,
        );
        let path = file.path().to_str().unwrap().to_string();
        let config = load(&[
            ("POLLER_CONFIG_PATH", path.as_str()),
            ("POLLER_TAG", "from-env"),
            ("POLLER_CYCLES_PER_WRITE", "1"),
        ])
        .unwrap();

        assert_eq!(config.tag, "from-env");
        assert_eq!(config.cycles_per_write, 1);
        assert_eq!(config.sink, SinkKind::Stdout);
        assert_eq!(
            config.device_address,
            Some("10.10.2.31:47808".parse().unwrap())
        );
        assert_eq!(config.timestream_target().unwrap(), ("plant", "flow"));
    }

    #[test]
    fn unreadable_setup_file_is_ignored() {
        let file = setup_file("{ not json");
        let path = file.path().to_str().unwrap().to_string();
        let config = load(&[("POLLER_CONFIG_PATH", path.as_str())]).unwrap();
        assert_eq!(config.tag, "flexim");
    }

    #[test]
    fn points_file_takes_precedence() {
        let file = setup_file(
            r#"{"tag": "T1", "points": [
                {"device": "10.10.2.30", "object": "analogInput:105", "property": "presentValue"}
            ]}"#,
        );
        let path = file.path().to_str().unwrap().to_string();
        let config = load(&[
            ("POLLER_CONFIG_PATH", "/nonexistent/config.json"),
            ("POLLER_POINTS_FILE", path.as_str()),
            ("POLLER_DEVICE_ADDRESS", "10.10.2.31"),
        ])
        .unwrap();
        let points = config.point_list().unwrap();
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].tag, "T1");
    }
}
