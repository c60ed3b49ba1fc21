use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use clap::Subcommand;
use serde::Deserialize;
use serde::Serialize;
use utils::version;

/// Directory where the kubelet expects device plugin sockets.
pub const DEVICE_PLUGIN_DIR: &str = "/var/lib/kubelet/device-plugins";
/// Device plugin API version announced at registration.
pub const API_VERSION: &str = "v1beta1";

/// Static description of the plugin: what it advertises and where it listens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PluginConfig {
    /// Extended resource name (e.g. "sequix.cn/example")
    pub resource_name: String,
    /// Number of devices advertised
    pub device_count: usize,
    /// Device path visible inside the container
    pub device_path: String,
    /// Host device mapped to `device_path`
    pub host_path: String,
    /// Cgroup permissions granted on the device
    pub permissions: String,
    /// Directory holding the plugin socket
    pub socket_dir: PathBuf,
    /// File name of the plugin socket, announced as the endpoint
    pub socket_file_name: String,
    /// Kubelet registration socket
    pub kubelet_socket: PathBuf,
    /// Upper bound for connecting to the kubelet and registering
    pub register_timeout_secs: u64,
    /// Upper bound for the server to drain in-flight calls on stop
    pub drain_timeout_secs: u64,
    /// Announce that PreStartContainer must be called
    pub pre_start_required: bool,
    /// Announce that GetPreferredAllocation is implemented
    pub get_preferred_allocation_available: bool,
}

impl Default for PluginConfig {
    fn default() -> Self {
        Self {
            resource_name: "sequix.cn/example".to_string(),
            device_count: 5,
            device_path: "/dev/mydev".to_string(),
            host_path: "/dev/null".to_string(),
            permissions: "rw".to_string(),
            socket_dir: PathBuf::from(DEVICE_PLUGIN_DIR),
            socket_file_name: "sequix-dp.sock".to_string(),
            kubelet_socket: Path::new(DEVICE_PLUGIN_DIR).join("kubelet.sock"),
            register_timeout_secs: 5,
            drain_timeout_secs: 5,
            pre_start_required: false,
            get_preferred_allocation_available: false,
        }
    }
}

impl PluginConfig {
    /// load plugin config from a YAML file, missing keys keep their defaults
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        tracing::info!("Loading device plugin configuration from {:?}", path);

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("read config file {}", path.display()))?;
        let config: PluginConfig = serde_yaml::from_str(&content)
            .with_context(|| format!("parse config file {}", path.display()))?;
        Ok(config)
    }

    /// Full path of the plugin socket.
    pub fn socket_path(&self) -> PathBuf {
        self.socket_dir.join(&self.socket_file_name)
    }

    /// Endpoint name announced to the kubelet, the socket's base name.
    pub fn endpoint(&self) -> String {
        self.socket_path()
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    pub fn register_timeout(&self) -> Duration {
        Duration::from_secs(self.register_timeout_secs)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }
}

#[derive(Parser)]
#[command(about, long_about, version = &**version::VERSION)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the device plugin until terminated
    Run(RunArgs),
    /// Print the effective configuration as YAML and exit
    #[command(name = "print-config")]
    PrintConfig(RunArgs),
}

#[derive(Parser, Debug, Default)]
pub struct RunArgs {
    #[arg(
        long,
        env = "DEVICE_PLUGIN_CONFIG",
        value_hint = clap::ValueHint::FilePath,
        help = "YAML file with the plugin configuration, flags override its values"
    )]
    pub config: Option<PathBuf>,

    #[arg(
        long,
        env = "DEVICE_PLUGIN_LOG_FILE",
        value_hint = clap::ValueHint::FilePath,
        help = "Also write logs to this file, rotated daily"
    )]
    pub log_file: Option<PathBuf>,

    #[arg(
        long,
        env = "DEVICE_PLUGIN_RESOURCE_NAME",
        help = "Extended resource name, e.g. sequix.cn/example"
    )]
    pub resource_name: Option<String>,

    #[arg(long, help = "Number of devices to advertise")]
    pub device_count: Option<usize>,

    #[arg(long, help = "Device path inside the container, e.g. /dev/mydev")]
    pub device_path: Option<String>,

    #[arg(long, help = "Host device mapped into the container, e.g. /dev/null")]
    pub host_path: Option<String>,

    #[arg(
        long,
        env = "DEVICE_PLUGIN_SOCKET_DIR",
        value_hint = clap::ValueHint::DirPath,
        help = "Directory for the plugin socket"
    )]
    pub socket_dir: Option<PathBuf>,

    #[arg(long, help = "File name of the plugin socket")]
    pub socket_file_name: Option<String>,

    #[arg(
        long,
        env = "KUBELET_SOCKET_PATH",
        value_hint = clap::ValueHint::FilePath,
        help = "kubelet registration socket path"
    )]
    pub kubelet_socket: Option<PathBuf>,

    #[arg(long, help = "Seconds to wait for kubelet registration")]
    pub register_timeout_secs: Option<u64>,

    #[arg(
        long,
        help = "Announce that PreStartContainer must be called",
        action = clap::ArgAction::Set
    )]
    pub pre_start_required: Option<bool>,

    #[arg(
        long,
        help = "Announce that GetPreferredAllocation is available",
        action = clap::ArgAction::Set
    )]
    pub get_preferred_allocation_available: Option<bool>,
}

impl RunArgs {
    /// Build the effective config: file (or defaults) first, then flags.
    pub fn to_config(&self) -> anyhow::Result<PluginConfig> {
        let mut config = match &self.config {
            Some(path) => PluginConfig::load(path)?,
            None => PluginConfig::default(),
        };

        if let Some(resource_name) = &self.resource_name {
            config.resource_name = resource_name.clone();
        }
        if let Some(device_count) = self.device_count {
            config.device_count = device_count;
        }
        if let Some(device_path) = &self.device_path {
            config.device_path = device_path.clone();
        }
        if let Some(host_path) = &self.host_path {
            config.host_path = host_path.clone();
        }
        if let Some(socket_dir) = &self.socket_dir {
            config.socket_dir = socket_dir.clone();
        }
        if let Some(socket_file_name) = &self.socket_file_name {
            config.socket_file_name = socket_file_name.clone();
        }
        if let Some(kubelet_socket) = &self.kubelet_socket {
            config.kubelet_socket = kubelet_socket.clone();
        }
        if let Some(secs) = self.register_timeout_secs {
            config.register_timeout_secs = secs;
        }
        if let Some(pre_start_required) = self.pre_start_required {
            config.pre_start_required = pre_start_required;
        }
        if let Some(available) = self.get_preferred_allocation_available {
            config.get_preferred_allocation_available = available;
        }

        Ok(config)
    }
}
