//! Error types for the device plugin lifecycle.

use core::error::Error;

use derive_more::Display;
use error_stack::Report;

/// Result type for plugin operations.
pub type PluginResult<T> = Result<T, Report<PluginError>>;

/// Errors that can occur while starting, registering or stopping the plugin.
#[derive(Debug, Display, Clone, PartialEq, Eq)]
pub enum PluginError {
    /// A stale socket file exists and could not be removed
    #[display("Failed to remove stale socket: {path}")]
    SocketCleanup { path: String },

    /// Binding the plugin socket failed
    #[display("Failed to bind plugin socket: {path}")]
    Bind { path: String },

    /// `start` was called on an instance that is already serving
    #[display("Device plugin is already started")]
    AlreadyStarted,

    /// `start` was called on an instance that has been stopped
    #[display("Device plugin has been stopped and cannot be restarted")]
    Stopped,

    /// An operation needs the server running but the plugin is not serving
    #[display("Device plugin is not serving")]
    NotServing,

    /// Dialing the kubelet socket failed
    #[display("Failed to connect to kubelet socket: {path}")]
    Connect { path: String },

    /// The kubelet socket did not accept a connection in time
    #[display("Timed out after {timeout_ms}ms connecting to kubelet socket: {path}")]
    ConnectTimeout { path: String, timeout_ms: u128 },

    /// The kubelet rejected or failed the registration call
    #[display("Kubelet rejected device plugin registration: {message}")]
    Register { message: String },

    /// The gRPC server task ended with an error
    #[display("Device plugin server failed")]
    Serve,

    /// Installing process signal handlers failed
    #[display("Failed to install signal handler for {signal}")]
    Signal { signal: String },
}

impl Error for PluginError {}
