use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;

use futures::Stream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tonic::Request;
use tonic::Response;
use tonic::Result as TonicResult;
use tonic::Status;
use tracing::debug;
use tracing::error;
use tracing::info;

use crate::api::device_plugin_server::DevicePlugin;
use crate::api::AllocateRequest;
use crate::api::AllocateResponse;
use crate::api::ContainerAllocateResponse;
use crate::api::DevicePluginOptions;
use crate::api::DeviceSpec;
use crate::api::Empty;
use crate::api::ListAndWatchResponse;
use crate::api::PreStartContainerRequest;
use crate::api::PreStartContainerResponse;
use crate::api::PreferredAllocationRequest;
use crate::api::PreferredAllocationResponse;
use crate::config::PluginConfig;
use crate::registry::DeviceRegistry;

/// DevicePlugin service implementation
/// answers the kubelet's calls against the static device registry
#[derive(Debug, Clone)]
pub struct DevicePluginService {
    registry: Arc<DeviceRegistry>,
    /// device granted to every container, whatever ids were requested
    grant: DeviceSpec,
    options: DevicePluginOptions,
    /// fires once when the owning plugin stops
    shutdown: CancellationToken,
}

impl DevicePluginService {
    pub fn new(
        config: &PluginConfig,
        registry: Arc<DeviceRegistry>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            registry,
            grant: DeviceSpec {
                container_path: config.device_path.clone(),
                host_path: config.host_path.clone(),
                permissions: config.permissions.clone(),
            },
            options: DevicePluginOptions {
                pre_start_required: config.pre_start_required,
                get_preferred_allocation_available: config.get_preferred_allocation_available,
            },
            shutdown,
        }
    }

    /// Connections accepted before a stop may outlive the server task, so a
    /// stopped instance refuses calls rather than answering for stale devices.
    fn ensure_serving(&self) -> Result<(), Status> {
        if self.shutdown.is_cancelled() {
            return Err(Status::unavailable("device plugin is shutting down"));
        }
        Ok(())
    }

    /// one response per container request, in request order
    fn allocate_containers(&self, request: &AllocateRequest) -> AllocateResponse {
        let container_responses = request
            .container_requests
            .iter()
            .map(|container_req| {
                info!(
                    "allocating devices to container, device IDs: {:?}",
                    container_req.devices_ids
                );
                ContainerAllocateResponse {
                    envs: HashMap::new(),
                    mounts: Vec::new(),
                    devices: vec![self.grant.clone()],
                    annotations: HashMap::new(),
                    cdi_devices: Vec::new(),
                }
            })
            .collect();

        AllocateResponse {
            container_responses,
        }
    }
}

#[tonic::async_trait]
impl DevicePlugin for DevicePluginService {
    /// get device plugin options
    async fn get_device_plugin_options(
        &self,
        _request: Request<Empty>,
    ) -> TonicResult<Response<DevicePluginOptions>> {
        debug!("getting device plugin options");
        self.ensure_serving()?;

        Ok(Response::new(self.options))
    }

    type ListAndWatchStream =
        Pin<Box<dyn Stream<Item = Result<ListAndWatchResponse, Status>> + Send>>;

    /// send the device list once, then hold the stream open until shutdown
    async fn list_and_watch(
        &self,
        _request: Request<Empty>,
    ) -> TonicResult<Response<Self::ListAndWatchStream>> {
        info!("starting to watch device list");
        self.ensure_serving()?;

        let (tx, rx) = mpsc::unbounded_channel();
        let shutdown = self.shutdown.clone();
        let snapshot = self.registry.snapshot();

        tokio::spawn(async move {
            if let Err(e) = tx.send(Ok(snapshot)) {
                error!("failed to send device list to kubelet: {}", e);
                return;
            }

            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("device watch stopped by shutdown");
                }
                _ = tx.closed() => {
                    info!("kubelet closed the device watch stream");
                }
            }
        });

        let stream = tokio_stream::wrappers::UnboundedReceiverStream::new(rx);
        Ok(Response::new(Box::pin(stream)))
    }

    /// get preferred device allocation
    async fn get_preferred_allocation(
        &self,
        request: Request<PreferredAllocationRequest>,
    ) -> TonicResult<Response<PreferredAllocationResponse>> {
        let req = request.into_inner();
        debug!("getting preferred device allocation: {:?}", req);
        self.ensure_serving()?;

        Ok(Response::new(PreferredAllocationResponse {
            container_responses: vec![],
        }))
    }

    /// allocate devices to container
    async fn allocate(
        &self,
        request: Request<AllocateRequest>,
    ) -> TonicResult<Response<AllocateResponse>> {
        let req = request.into_inner();
        info!(
            "allocating devices for {} containers",
            req.container_requests.len()
        );
        self.ensure_serving()?;

        Ok(Response::new(self.allocate_containers(&req)))
    }

    /// pre-start container
    async fn pre_start_container(
        &self,
        request: Request<PreStartContainerRequest>,
    ) -> TonicResult<Response<PreStartContainerResponse>> {
        let req = request.into_inner();
        debug!("pre-start container: {:?}", req.devices_ids);
        self.ensure_serving()?;

        Ok(Response::new(PreStartContainerResponse {}))
    }
}
