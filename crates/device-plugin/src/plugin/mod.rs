//! Device plugin lifecycle.
//!
//! A [`DevicePlugin`] moves through `Unstarted -> Started -> Registered ->
//! Running -> Stopped`. [`DevicePlugin::start`] binds the socket and serves the gRPC API
//! in the background, [`DevicePlugin::register`] announces the socket to the
//! kubelet and [`DevicePlugin::stop`] tears everything down again. An instance
//! is single use: once stopped, build a new one.

use std::path::PathBuf;
use std::sync::Arc;

use error_stack::Report;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::error;
use tracing::info;
use tracing::warn;

use crate::api::device_plugin_server::DevicePluginServer;
use crate::config::PluginConfig;
use crate::error::PluginError;
use crate::error::PluginResult;
use crate::registry::DeviceRegistry;

pub mod endpoint;
mod registration;
mod service;

pub use service::DevicePluginService;

type ServerTask = JoinHandle<Result<(), tonic::transport::Error>>;

/// Externally visible lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Constructed, socket not bound yet
    Unstarted,
    /// Socket bound and serving, not registered with the kubelet
    Started,
    /// Serving and accepted by the kubelet
    Registered,
    /// Fully brought up by [`DevicePlugin::run`]
    Running,
    /// Torn down, the instance cannot be started again
    Stopped,
}

#[derive(Debug)]
enum State {
    Unstarted,
    /// `phase` is one of `Started`, `Registered` or `Running`
    Serving { server: ServerTask, phase: Phase },
    Stopped,
}

/// Device plugin instance owning the socket, the gRPC server and the
/// shutdown signal shared with open ListAndWatch streams.
#[derive(Debug)]
pub struct DevicePlugin {
    config: PluginConfig,
    registry: Arc<DeviceRegistry>,
    shutdown: CancellationToken,
    state: State,
}

impl DevicePlugin {
    /// create a new device plugin instance with a fresh device set
    pub fn new(config: PluginConfig) -> Self {
        let registry = Arc::new(DeviceRegistry::new(config.device_count));
        Self {
            config,
            registry,
            shutdown: CancellationToken::new(),
            state: State::Unstarted,
        }
    }

    pub fn socket_path(&self) -> PathBuf {
        self.config.socket_path()
    }

    pub fn phase(&self) -> Phase {
        match self.state {
            State::Unstarted => Phase::Unstarted,
            State::Serving { phase, .. } => phase,
            State::Stopped => Phase::Stopped,
        }
    }

    /// `true` while the socket is bound and the server is running
    pub fn is_serving(&self) -> bool {
        matches!(self.state, State::Serving { .. })
    }

    /// Token fired once when this instance stops.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// start device plugin server
    ///
    /// Returns once the socket is bound; the server keeps running in a
    /// background task. Starting an instance that is serving or has been
    /// stopped is rejected and leaves it untouched.
    pub async fn start(&mut self) -> PluginResult<()> {
        match self.state {
            State::Unstarted => {}
            State::Serving { .. } => return Err(Report::new(PluginError::AlreadyStarted)),
            State::Stopped => return Err(Report::new(PluginError::Stopped)),
        }

        let socket_path = self.socket_path();
        info!("start device plugin server: {}", socket_path.display());

        let listener = endpoint::bind(&socket_path)?;

        let service = DevicePluginService::new(
            &self.config,
            self.registry.clone(),
            self.shutdown.clone(),
        );
        let device_plugin_server = DevicePluginServer::new(service);

        info!("gRPC server is bound to: {}", socket_path.display());

        let token = self.shutdown.clone();
        let server = tokio::spawn(async move {
            tonic::transport::Server::builder()
                .add_service(device_plugin_server)
                .serve_with_incoming_shutdown(
                    tokio_stream::wrappers::UnixListenerStream::new(listener),
                    async move {
                        token.cancelled().await;
                        info!("shutting down gRPC server");
                    },
                )
                .await
        });

        self.state = State::Serving {
            server,
            phase: Phase::Started,
        };
        Ok(())
    }

    /// stop device plugin server
    ///
    /// Fires the shutdown signal, waits for the server to drain (bounded by
    /// the configured drain timeout) and removes the socket file. Stopping an
    /// instance that is not serving does nothing.
    pub async fn stop(&mut self) -> PluginResult<()> {
        let mut server = match std::mem::replace(&mut self.state, State::Stopped) {
            State::Serving { server, .. } => server,
            previous => {
                self.state = previous;
                return Ok(());
            }
        };

        info!("stopping device plugin");
        self.shutdown.cancel();

        let drain_timeout = self.config.drain_timeout();
        let served = match tokio::time::timeout(drain_timeout, &mut server).await {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(e))) => {
                error!("device plugin server failed: {}", e);
                Err(Report::new(e).change_context(PluginError::Serve))
            }
            Ok(Err(e)) => {
                error!("device plugin server task panicked or was cancelled: {}", e);
                Err(Report::new(PluginError::Serve).attach_printable(e.to_string()))
            }
            // Connections already accepted run in their own tasks and are not
            // cut by the abort; the service refuses calls once `shutdown` fired.
            Err(_) => {
                warn!(
                    "device plugin server did not drain within {:?}, aborting",
                    drain_timeout
                );
                server.abort();
                Ok(())
            }
        };

        let removed = endpoint::remove_socket(&self.socket_path());
        info!("device plugin stopped");

        served.and(removed)
    }

    /// register device plugin with kubelet
    ///
    /// Only valid while serving: the kubelet dials back as soon as it accepts
    /// the registration.
    pub async fn register(&mut self) -> PluginResult<()> {
        if !self.is_serving() {
            return Err(Report::new(PluginError::NotServing));
        }

        registration::register_with_kubelet(&self.config).await?;

        self.advance(Phase::Registered);
        Ok(())
    }

    /// start the server then register it, stopping again if registration fails
    pub async fn run(&mut self) -> PluginResult<()> {
        info!("device plugin: run");

        if let Err(e) = self.start().await {
            error!("failed to start device plugin: {:?}", e);
            return Err(e);
        }

        info!("device plugin socket path: {}", self.socket_path().display());

        if let Err(e) = self.register().await {
            error!("failed to register device plugin: {:?}", e);
            if let Err(stop_err) = self.stop().await {
                warn!(
                    "failed to stop device plugin after registration failure: {:?}",
                    stop_err
                );
            }
            return Err(e);
        }

        self.advance(Phase::Running);
        info!("device plugin is running");
        Ok(())
    }

    fn advance(&mut self, next: Phase) {
        if let State::Serving { phase, .. } = &mut self.state {
            *phase = next;
        }
    }
}

impl Drop for DevicePlugin {
    fn drop(&mut self) {
        if let State::Serving { server, .. } = &self.state {
            warn!("device plugin dropped while serving, shutting down in background");
            self.shutdown.cancel();
            server.abort();
            if let Err(e) = endpoint::remove_socket(&self.socket_path()) {
                warn!("failed to remove socket on drop: {:?}", e);
            }
        }
    }
}
