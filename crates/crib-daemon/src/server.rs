//! Daemon server: Unix socket listener, PID file, graceful shutdown.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::Router;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper_util::rt::TokioIo;
use tokio::net::UnixListener;
use tower::Service;
use tower_http::trace::TraceLayer;

use crib_common::constants::{CONTAINER_DIR, DATA_DIR, NETWORK_DIR, PID_FILE, ROOTFS_DIR, SOCKET_PATH};
use crib_common::error::{CribError, Result};
use crib_net::manager::NetworkManager;
use crib_net::store::NetworkStore;
use crib_runtime::Orchestrator;

use crate::api;

/// Prepares the system directories and the network stack, returning the
/// orchestrator the server will serve.
///
/// # Errors
///
/// Returns an error when a state directory cannot be created or network
/// initialization fails.
pub fn bootstrap() -> Result<Arc<Orchestrator>> {
    for dir in [DATA_DIR, CONTAINER_DIR, ROOTFS_DIR, NETWORK_DIR] {
        std::fs::create_dir_all(dir).map_err(|e| CribError::io(dir, e))?;
    }
    let network = NetworkManager::new(NetworkStore::system())?;
    Ok(Arc::new(Orchestrator::new(network)))
}

/// The control-plane server.
#[derive(Debug)]
pub struct Server {
    socket_path: PathBuf,
    pid_file: PathBuf,
    orchestrator: Arc<Orchestrator>,
}

impl Server {
    /// Server on the fixed system socket and PID file.
    #[must_use]
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self::at(SOCKET_PATH, PID_FILE, orchestrator)
    }

    /// Server on explicit paths (tests, alternate roots).
    #[must_use]
    pub fn at(
        socket_path: impl Into<PathBuf>,
        pid_file: impl Into<PathBuf>,
        orchestrator: Arc<Orchestrator>,
    ) -> Self {
        Self {
            socket_path: socket_path.into(),
            pid_file: pid_file.into(),
            orchestrator,
        }
    }

    /// The socket path this server binds.
    #[must_use]
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Binds the socket and serves requests until a shutdown signal.
    ///
    /// A stale socket file from a previous run is removed before
    /// binding. The socket and PID file are removed on the way out.
    ///
    /// # Errors
    ///
    /// Returns an error when binding fails or the accept loop breaks.
    pub async fn run(&self) -> Result<()> {
        let _ = std::fs::remove_file(&self.socket_path);
        if let Some(parent) = self.socket_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| CribError::io(parent, e))?;
        }

        let listener =
            UnixListener::bind(&self.socket_path).map_err(|e| CribError::io(&self.socket_path, e))?;
        self.restrict_socket_mode();
        self.write_pid_file()?;
        tracing::info!(socket = %self.socket_path.display(), "daemon listening");

        let app =
            api::create_router(Arc::clone(&self.orchestrator)).layer(TraceLayer::new_for_http());

        let result = tokio::select! {
            r = Self::accept_loop(listener, app) => r,
            () = shutdown_signal() => {
                tracing::info!("shutdown signal received");
                Ok(())
            }
        };
        self.cleanup();
        result
    }

    async fn accept_loop(listener: UnixListener, app: Router) -> Result<()> {
        loop {
            let (stream, _) = listener
                .accept()
                .await
                .map_err(|e| CribError::io(SOCKET_PATH, e))?;

            let tower_service = app.clone();
            let _ = tokio::spawn(async move {
                let hyper_service =
                    hyper::service::service_fn(move |request: hyper::Request<Incoming>| {
                        tower_service.clone().call(request)
                    });
                if let Err(err) = http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), hyper_service)
                    .await
                {
                    tracing::debug!(error = %err, "connection closed with error");
                }
            });
        }
    }

    /// Group read/write only; the socket grants container control.
    fn restrict_socket_mode(&self) {
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Err(e) = std::fs::set_permissions(
                &self.socket_path,
                std::fs::Permissions::from_mode(0o660),
            ) {
                tracing::warn!(error = %e, "could not restrict socket permissions");
            }
        }
    }

    fn write_pid_file(&self) -> Result<()> {
        std::fs::write(&self.pid_file, std::process::id().to_string())
            .map_err(|e| CribError::io(&self.pid_file, e))
    }

    fn cleanup(&self) {
        for path in [&self.socket_path, &self.pid_file] {
            if let Err(e) = std::fs::remove_file(path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(path = %path.display(), error = %e, "cleanup failed");
                }
            }
        }
    }
}

/// Resolves when SIGINT or SIGTERM arrives.
async fn shutdown_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let mut term = signal(SignalKind::terminate()).ok();
    let terminate = async {
        match term.as_mut() {
            Some(sig) => {
                let _ = sig.recv().await;
            }
            None => std::future::pending::<()>().await,
        }
    };

    tokio::select! {
        r = tokio::signal::ctrl_c() => {
            if let Err(e) = r {
                tracing::warn!(error = %e, "ctrl-c handler failed");
            }
        }
        () = terminate => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use crib_core::cgroup::CgroupLimiter;
    use crib_net::bridge::BridgeManager;
    use crib_net::ipam::IpAllocator;
    use crib_net::nat::NatManager;
    use crib_net::store::IpamState;
    use crib_net::veth::VethManager;

    fn test_server(dir: &std::path::Path) -> Server {
        let store = NetworkStore::at(dir);
        let ipam = IpAllocator::from_ipam(
            &IpamState {
                subnet: "172.17.0.0/16".into(),
                gateway: "172.17.0.1".into(),
                next_ip: "172.17.0.2".into(),
                allocated_ips: BTreeMap::new(),
            },
            store.clone(),
        )
        .unwrap();
        let network = NetworkManager::from_parts(
            ipam,
            BridgeManager::new(),
            VethManager::new(),
            NatManager::new("crib0", "172.17.0.0/16"),
            store,
        );
        let orchestrator = Arc::new(Orchestrator::with_cgroup(
            network,
            CgroupLimiter::at(dir.join("cgroup")),
        ));
        Server::at(
            dir.join("crib.sock"),
            dir.join("crib.pid"),
            orchestrator,
        )
    }

    #[test]
    fn pid_file_records_this_process() {
        let dir = tempfile::tempdir().unwrap();
        let server = test_server(dir.path());
        server.write_pid_file().unwrap();
        let pid: u32 = std::fs::read_to_string(dir.path().join("crib.pid"))
            .unwrap()
            .parse()
            .unwrap();
        assert_eq!(pid, std::process::id());
    }

    #[test]
    fn cleanup_removes_socket_and_pid_file() {
        let dir = tempfile::tempdir().unwrap();
        let server = test_server(dir.path());
        std::fs::write(dir.path().join("crib.sock"), "").unwrap();
        std::fs::write(dir.path().join("crib.pid"), "1").unwrap();
        server.cleanup();
        assert!(!dir.path().join("crib.sock").exists());
        assert!(!dir.path().join("crib.pid").exists());
    }

    #[tokio::test]
    async fn binding_creates_the_socket() {
        let dir = tempfile::tempdir().unwrap();
        let server = test_server(dir.path());
        let listener = UnixListener::bind(server.socket_path()).unwrap();
        assert!(server.socket_path().exists());
        drop(listener);
    }
}
