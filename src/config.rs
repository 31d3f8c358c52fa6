//! Configuration loading and validation.
//!
//! The TOML file is deserialized into a raw [`ConfigSpec`] layer where every
//! defaultable field carries a serde default, then converted into the
//! validated runtime types [`Config`] and [`ServiceSpec`]. Prefixes are kept
//! as strings in the raw layer and parsed here so validation errors can name
//! the offending service.
//!
//! ```toml
//! config_file = "/etc/bird/birdwatcher.conf"
//! reload_command = "/usr/sbin/birdc configure"
//!
//! [prometheus]
//! enabled = true
//!
//! [services."webservice"]
//! command = "/usr/bin/curl -fsS http://localhost:8080/health"
//! interval = 2
//! rise = 3
//! fail = 2
//! prefixes = ["192.168.0.0/24", "2001:db8::/64"]
//! ```

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use ipnet::IpNet;
use serde::Deserialize;

use crate::error::ConfigError;

struct Defaults;

impl Defaults {
    fn config_file() -> String {
        "/etc/bird/birdwatcher.conf".to_string()
    }

    fn reload_command() -> String {
        "/usr/sbin/birdc configure".to_string()
    }

    fn prometheus_port() -> u16 {
        9091
    }

    fn prometheus_path() -> String {
        "/metrics".to_string()
    }

    fn function_name() -> String {
        "match_route".to_string()
    }

    fn interval() -> u64 {
        1
    }

    fn timeout() -> u64 {
        10
    }

    fn rise() -> u32 {
        1
    }

    fn fail() -> u32 {
        1
    }
}

/// TOML representation of the configuration file.
#[derive(Debug, Deserialize)]
struct ConfigSpec {
    #[serde(default = "Defaults::config_file")]
    config_file: String,

    #[serde(default = "Defaults::reload_command")]
    reload_command: String,

    #[serde(default)]
    prometheus: PrometheusSpec,

    #[serde(default)]
    services: HashMap<String, ServiceSpecFile>,
}

/// TOML representation of the prometheus section.
#[derive(Debug, Deserialize)]
struct PrometheusSpec {
    #[serde(default)]
    enabled: bool,

    #[serde(default = "Defaults::prometheus_port")]
    port: u16,

    #[serde(default = "Defaults::prometheus_path")]
    path: String,
}

impl Default for PrometheusSpec {
    fn default() -> Self {
        Self {
            enabled: false,
            port: Defaults::prometheus_port(),
            path: Defaults::prometheus_path(),
        }
    }
}

/// TOML representation of a single service entry.
#[derive(Debug, Deserialize)]
struct ServiceSpecFile {
    command: Option<String>,

    #[serde(default = "Defaults::function_name")]
    function_name: String,

    /// Seconds between checks.
    #[serde(default = "Defaults::interval")]
    interval: u64,

    /// Seconds before a running check is killed and counted as failed.
    #[serde(default = "Defaults::timeout")]
    timeout: u64,

    #[serde(default = "Defaults::rise")]
    rise: u32,

    #[serde(default = "Defaults::fail")]
    fail: u32,

    #[serde(default)]
    prefixes: Vec<String>,
}

/// Validated runtime configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Path of the generated BIRD configuration fragment.
    pub config_file: PathBuf,
    /// Command invoked after the fragment changed, split on spaces.
    pub reload_command: String,
    pub prometheus: PrometheusConfig,
    /// Services sorted by name.
    pub services: Vec<Arc<ServiceSpec>>,
}

#[derive(Debug, Clone)]
pub struct PrometheusConfig {
    pub enabled: bool,
    pub port: u16,
    pub path: String,
}

/// Immutable definition of one health-checked service.
#[derive(Debug)]
pub struct ServiceSpec {
    pub name: String,
    /// BIRD filter function its prefixes are advertised through.
    pub function_name: String,
    /// Check command, split on ASCII space into argv. No shell expansion.
    pub command: String,
    pub interval: Duration,
    pub timeout: Duration,
    /// Consecutive successes before the service is considered up.
    pub rise: u32,
    /// Consecutive failures before the service is considered down.
    pub fail: u32,
    /// Canonicalized networks, in configuration order.
    pub prefixes: Vec<IpNet>,
}

/// Reads and validates the configuration file at `path`.
pub fn load(path: &Path) -> Result<Config, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound {
            path: path.display().to_string(),
        });
    }

    let contents = std::fs::read_to_string(path)?;
    from_str(&contents)
}

/// Parses and validates configuration from a TOML string.
pub fn from_str(contents: &str) -> Result<Config, ConfigError> {
    let spec: ConfigSpec = toml::from_str(contents)?;

    if spec.services.is_empty() {
        return Err(ConfigError::NoServices);
    }

    let mut seen_prefixes = HashSet::new();
    let mut services = Vec::with_capacity(spec.services.len());

    for (name, service) in spec.services {
        services.push(Arc::new(validate_service(
            name,
            service,
            &mut seen_prefixes,
        )?));
    }

    // the TOML table has no inherent order; sort so status reporting and
    // startup logs are stable across runs
    services.sort_by(|a, b| a.name.cmp(&b.name));

    Ok(Config {
        config_file: PathBuf::from(spec.config_file),
        reload_command: spec.reload_command,
        prometheus: PrometheusConfig {
            enabled: spec.prometheus.enabled,
            port: spec.prometheus.port,
            path: spec.prometheus.path,
        },
        services,
    })
}

fn validate_service(
    name: String,
    service: ServiceSpecFile,
    seen_prefixes: &mut HashSet<String>,
) -> Result<ServiceSpec, ConfigError> {
    let command = match service.command {
        Some(command) if !command.is_empty() => command,
        _ => return Err(ConfigError::MissingCommand { service: name }),
    };

    if service.prefixes.is_empty() {
        return Err(ConfigError::NoPrefixes { service: name });
    }

    let mut prefixes = Vec::with_capacity(service.prefixes.len());
    for prefix in &service.prefixes {
        // truncate to the network address so structural equality matches
        // canonical string equality
        let net = prefix
            .parse::<IpNet>()
            .map_err(|source| ConfigError::InvalidPrefix {
                service: name.clone(),
                prefix: prefix.clone(),
                source,
            })?
            .trunc();

        // prefixes must be unique across the union of all services
        if !seen_prefixes.insert(net.to_string()) {
            return Err(ConfigError::DuplicatePrefix {
                prefix: net.to_string(),
            });
        }

        prefixes.push(net);
    }

    // zero values fall back to the defaults, same as absent fields
    let interval = if service.interval == 0 {
        Defaults::interval()
    } else {
        service.interval
    };
    let timeout = if service.timeout == 0 {
        Defaults::timeout()
    } else {
        service.timeout
    };
    let rise = service.rise.max(1);
    let fail = service.fail.max(1);

    Ok(ServiceSpec {
        name,
        function_name: service.function_name,
        command,
        interval: Duration::from_secs(interval),
        timeout: Duration::from_secs(timeout),
        rise,
        fail,
        prefixes,
    })
}
