//! Kubelet device plugin advertising a fixed pool of devices.
//!
//! The plugin binds a gRPC server on a Unix domain socket under the kubelet's
//! device plugin directory, registers that socket with the kubelet, then
//! serves the device list stream and allocation calls until it is stopped.
//!
//! The main components are:
//! - [`DevicePlugin`]: owns the socket, the gRPC server and the shutdown signal
//! - [`DeviceRegistry`]: the static set of advertised devices
//! - [`Supervisor`]: drives the plugin through reset and termination signals

#![allow(clippy::doc_markdown)]
pub mod api {
    #![allow(clippy::doc_overindented_list_items)]
    tonic::include_proto!("v1beta1");
}

pub mod config;
pub mod error;
pub mod plugin;
pub mod registry;
pub mod supervisor;

pub use config::PluginConfig;
pub use error::PluginError;
pub use error::PluginResult;
pub use plugin::DevicePlugin;
pub use registry::DeviceRegistry;
pub use supervisor::Exit;
pub use supervisor::LifecycleSignal;
pub use supervisor::Supervisor;
