//! Test doubles standing in for the kubelet.

#![allow(dead_code)]

use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use device_plugin::api::device_plugin_client::DevicePluginClient;
use device_plugin::api::registration_server::Registration;
use device_plugin::api::registration_server::RegistrationServer;
use device_plugin::api::Empty;
use device_plugin::api::RegisterRequest;
use device_plugin::plugin::endpoint;
use device_plugin::PluginConfig;
use tokio::net::UnixListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tonic::transport::Channel;
use tonic::Request;
use tonic::Response;
use tonic::Status;

pub const WAIT: Duration = Duration::from_secs(5);

struct RegistrationService {
    requests: mpsc::UnboundedSender<RegisterRequest>,
    reject: bool,
}

#[tonic::async_trait]
impl Registration for RegistrationService {
    async fn register(
        &self,
        request: Request<RegisterRequest>,
    ) -> Result<Response<Empty>, Status> {
        let request = request.into_inner();
        let _ = self.requests.send(request.clone());
        if self.reject {
            return Err(Status::invalid_argument(format!(
                "resource {} is not allowed",
                request.resource_name
            )));
        }
        Ok(Response::new(Empty {}))
    }
}

/// Registration endpoint recording every request it receives.
pub struct FakeKubelet {
    requests: mpsc::UnboundedReceiver<RegisterRequest>,
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

impl FakeKubelet {
    pub fn start(socket: &Path) -> Self {
        Self::spawn(socket, false)
    }

    pub fn rejecting(socket: &Path) -> Self {
        Self::spawn(socket, true)
    }

    fn spawn(socket: &Path, reject: bool) -> Self {
        let listener = UnixListener::bind(socket).expect("bind fake kubelet socket");
        let (tx, requests) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();

        let token = shutdown.clone();
        let service = RegistrationServer::new(RegistrationService {
            requests: tx,
            reject,
        });
        let task = tokio::spawn(async move {
            tonic::transport::Server::builder()
                .add_service(service)
                .serve_with_incoming_shutdown(
                    tokio_stream::wrappers::UnixListenerStream::new(listener),
                    token.cancelled_owned(),
                )
                .await
                .expect("fake kubelet serves");
        });

        Self {
            requests,
            shutdown,
            task,
        }
    }

    /// Next registration request, failing the test if none arrives in time.
    pub async fn next_registration(&mut self) -> RegisterRequest {
        tokio::time::timeout(WAIT, self.requests.recv())
            .await
            .expect("registration arrives in time")
            .expect("fake kubelet still running")
    }

    pub async fn stop(self) {
        self.shutdown.cancel();
        let _ = self.task.await;
    }
}

/// Plugin config rooted in a temporary device plugin directory.
pub fn plugin_config(dir: &Path) -> PluginConfig {
    PluginConfig {
        socket_dir: dir.to_path_buf(),
        kubelet_socket: kubelet_socket(dir),
        register_timeout_secs: 1,
        drain_timeout_secs: 2,
        ..Default::default()
    }
}

pub fn kubelet_socket(dir: &Path) -> PathBuf {
    dir.join("kubelet.sock")
}

/// gRPC client dialing the plugin socket, as the kubelet does after registration.
pub async fn plugin_client(socket: &Path) -> DevicePluginClient<Channel> {
    let channel = endpoint::connect(socket, WAIT)
        .await
        .expect("connect to plugin socket");
    DevicePluginClient::new(channel)
}
