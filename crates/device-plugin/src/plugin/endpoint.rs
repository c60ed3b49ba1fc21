//! Unix domain socket helpers for both sides of the plugin: the listening
//! socket the kubelet dials back on, and client channels to a socket.

use std::io::ErrorKind;
use std::path::Path;
use std::time::Duration;

use error_stack::Report;
use error_stack::ResultExt;
use hyper_util::rt::TokioIo;
use tokio::net::UnixListener;
use tokio::net::UnixStream;
use tonic::transport::Channel;
use tonic::transport::Endpoint;
use tonic::transport::Uri;
use tower::service_fn;

use crate::error::PluginError;
use crate::error::PluginResult;

/// remove the socket file at `path`, a missing file is not an error
pub(crate) fn remove_socket(path: &Path) -> PluginResult<()> {
    match std::fs::remove_file(path) {
        Ok(()) => {
            tracing::debug!("removed socket file {}", path.display());
            Ok(())
        }
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Report::new(e).change_context(PluginError::SocketCleanup {
            path: path.display().to_string(),
        })),
    }
}

/// bind a listener at `path`, reclaiming a stale socket left by a previous run
pub(crate) fn bind(path: &Path) -> PluginResult<UnixListener> {
    remove_socket(path)?;
    UnixListener::bind(path).change_context(PluginError::Bind {
        path: path.display().to_string(),
    })
}

/// create Unix Domain Socket client connection, bounded by `timeout`
pub async fn connect(path: &Path, timeout: Duration) -> PluginResult<Channel> {
    let socket_path = path.to_path_buf();

    // The HTTP URL is a placeholder since we're using Unix socket connector
    let endpoint = Endpoint::from_static("http://tonic").connect_timeout(timeout);
    let connecting = endpoint.connect_with_connector(service_fn(move |_: Uri| {
            let socket_path = socket_path.clone();
            async move {
                match UnixStream::connect(socket_path).await {
                    Ok(stream) => Ok(TokioIo::new(stream)),
                    Err(e) => Err(Box::new(e) as Box<dyn std::error::Error + Send + Sync>),
                }
            }
        }));

    match tokio::time::timeout(timeout, connecting).await {
        Ok(channel) => channel.change_context(PluginError::Connect {
            path: path.display().to_string(),
        }),
        Err(_) => Err(Report::new(PluginError::ConnectTimeout {
            path: path.display().to_string(),
            timeout_ms: timeout.as_millis(),
        })),
    }
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn remove_missing_socket_is_ok() {
        let dir = TempDir::new().expect("temp dir");
        remove_socket(&dir.path().join("absent.sock")).expect("missing file tolerated");
    }

    #[test]
    fn remove_socket_fails_on_directory() {
        let dir = TempDir::new().expect("temp dir");
        let nested = dir.path().join("not-a-socket");
        std::fs::create_dir(&nested).expect("create dir");

        let err = remove_socket(&nested).expect_err("directory cannot be unlinked");
        assert_eq!(
            err.current_context(),
            &PluginError::SocketCleanup {
                path: nested.display().to_string()
            }
        );
    }

    #[tokio::test]
    async fn bind_reclaims_stale_socket() {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("plugin.sock");
        std::fs::write(&path, b"stale").expect("write stale file");

        let _listener = bind(&path).expect("bind over stale file");
        assert!(path.exists());
    }

    #[tokio::test]
    async fn bind_fails_in_missing_directory() {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("missing").join("plugin.sock");

        let err = bind(&path).expect_err("parent directory does not exist");
        assert!(matches!(err.current_context(), PluginError::Bind { .. }));
    }

    #[tokio::test]
    async fn connect_to_missing_socket_fails_fast() {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("kubelet.sock");

        let started = std::time::Instant::now();
        let err = connect(&path, Duration::from_secs(5))
            .await
            .expect_err("nothing listens");

        assert!(matches!(
            err.current_context(),
            PluginError::Connect { .. } | PluginError::ConnectTimeout { .. }
        ));
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
