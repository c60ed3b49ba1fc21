use error_stack::Report;
use tonic::Request;
use tracing::info;

use super::endpoint;
use crate::api::registration_client::RegistrationClient;
use crate::api::DevicePluginOptions;
use crate::api::RegisterRequest;
use crate::config::PluginConfig;
use crate::config::API_VERSION;
use crate::error::PluginError;
use crate::error::PluginResult;

/// Registration request announcing this plugin's socket and resource.
pub(crate) fn register_request(config: &PluginConfig) -> RegisterRequest {
    RegisterRequest {
        version: API_VERSION.to_string(),
        endpoint: config.endpoint(),
        resource_name: config.resource_name.clone(),
        options: Some(DevicePluginOptions {
            pre_start_required: config.pre_start_required,
            get_preferred_allocation_available: config.get_preferred_allocation_available,
        }),
    }
}

/// register device plugin with kubelet
///
/// Single attempt: the connection is dropped once the call returns, whatever
/// its outcome.
pub(crate) async fn register_with_kubelet(config: &PluginConfig) -> PluginResult<()> {
    let kubelet_socket = &config.kubelet_socket;
    info!(
        "registering device plugin with kubelet: {}",
        kubelet_socket.display()
    );

    let channel = endpoint::connect(kubelet_socket, config.register_timeout()).await?;
    let mut client = RegistrationClient::new(channel);

    let request = Request::new(register_request(config));
    let timeout = config.register_timeout();

    match tokio::time::timeout(timeout, client.register(request)).await {
        Ok(Ok(_)) => {
            info!("successfully registered device plugin with kubelet");
            Ok(())
        }
        Ok(Err(status)) => Err(Report::new(PluginError::Register {
            message: status.message().to_string(),
        })
        .attach_printable(format!("grpc status code: {:?}", status.code()))),
        Err(_) => Err(Report::new(PluginError::Register {
            message: format!("no answer within {timeout:?}"),
        })),
    }
}
