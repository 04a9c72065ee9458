//! Single-origin HTTP listener for the renderer: static export files plus a
//! transparent proxy to the backend for API and upload paths.

use std::{io::ErrorKind, net::SocketAddr, path::Path, sync::Arc, time::Duration};

use axum::{
    body::{Body, Bytes},
    extract::{Request, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Router,
};
use futures_util::stream;
use tokio::{
    fs::File, io::AsyncReadExt, net::TcpListener, sync::oneshot, task::JoinHandle,
};

use crate::{
    backend_proxy,
    gateway_routes::{RouteTable, RouteTarget},
    port_reconciler, static_files, BootError, GATEWAY_BIND_ATTEMPTS, GATEWAY_BIND_RETRY_DELAY,
    LOOPBACK_HOST,
};

const SHUTDOWN_WAIT_LIMIT: Duration = Duration::from_secs(5);
const STATIC_CHUNK_BYTES: usize = 64 * 1024;

#[derive(Clone)]
struct GatewayState {
    routes: Arc<RouteTable>,
    client: reqwest::Client,
    log: fn(&str),
}

pub struct LocalGateway {
    routes: RouteTable,
    bind_attempts: u32,
    retry_delay: Duration,
    log: fn(&str),
}

impl LocalGateway {
    pub fn new(routes: RouteTable, log: fn(&str)) -> Self {
        Self {
            routes,
            bind_attempts: GATEWAY_BIND_ATTEMPTS,
            retry_delay: GATEWAY_BIND_RETRY_DELAY,
            log,
        }
    }

    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    /// Binds `127.0.0.1:port` and starts serving. An occupied port is
    /// reclaimed and retried; once the attempts are exhausted the error asks
    /// the user to restart the computer.
    pub async fn listen(self, port: u16) -> Result<GatewayHandle, BootError> {
        let log = self.log;
        let listener = self.bind_with_retries(port).await?;
        let local_addr = listener
            .local_addr()
            .map_err(|error| BootError::Gateway(format!("failed to read local address: {error}")))?;

        let state = GatewayState {
            routes: Arc::new(self.routes),
            client: backend_proxy::build_proxy_client().map_err(BootError::Gateway)?,
            log,
        };
        let router = Router::new().fallback(handle_request).with_state(state);

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let served = axum::serve(listener, router)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.await;
                })
                .await;
            if let Err(error) = served {
                log(&format!("gateway server stopped with error: {error}"));
            }
        });
        log(&format!("gateway listening on http://{local_addr}"));

        Ok(GatewayHandle {
            local_addr,
            shutdown_tx: Some(shutdown_tx),
            task: Some(task),
        })
    }

    async fn bind_with_retries(&self, port: u16) -> Result<TcpListener, BootError> {
        let log = self.log;
        for attempt in 1..=self.bind_attempts {
            match TcpListener::bind((LOOPBACK_HOST, port)).await {
                Ok(listener) => return Ok(listener),
                Err(error) if error.kind() == ErrorKind::AddrInUse => {
                    log(&format!(
                        "gateway port {port} busy, reclaiming (attempt {attempt}/{})",
                        self.bind_attempts
                    ));
                    if attempt < self.bind_attempts {
                        port_reconciler::reconcile(port, log).await;
                        tokio::time::sleep(self.retry_delay).await;
                    }
                }
                Err(error) => {
                    return Err(BootError::Gateway(format!(
                        "failed to bind {LOOPBACK_HOST}:{port}: {error}"
                    )));
                }
            }
        }
        Err(BootError::PortUnavailable {
            port,
            attempts: self.bind_attempts,
        })
    }
}

/// Running gateway. `shutdown` is idempotent.
pub struct GatewayHandle {
    local_addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl GatewayHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    pub async fn shutdown(&mut self) {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = tokio::time::timeout(SHUTDOWN_WAIT_LIMIT, task).await;
        }
    }
}

async fn handle_request(State(state): State<GatewayState>, request: Request) -> Response {
    let path = request.uri().path().to_string();
    match state.routes.classify(&path) {
        Some(RouteTarget::Upstream(base_url)) => {
            backend_proxy::proxy_request(&state.client, base_url, request, state.log).await
        }
        Some(RouteTarget::Filesystem(root)) => serve_static(root, &path).await,
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// Streams `file` in fixed-size chunks so large assets never sit in memory.
fn file_body(file: File) -> Body {
    let chunks = stream::try_unfold(file, |mut file| async move {
        let mut buffer = vec![0_u8; STATIC_CHUNK_BYTES];
        let read = file.read(&mut buffer).await?;
        if read == 0 {
            return Ok::<_, std::io::Error>(None);
        }
        buffer.truncate(read);
        Ok(Some((Bytes::from(buffer), file)))
    });
    Body::from_stream(chunks)
}

async fn serve_static(root: &Path, path: &str) -> Response {
    let Some(file_path) = static_files::resolve_static_file(root, path) else {
        return (StatusCode::NOT_FOUND, "Not Found").into_response();
    };
    let opened = match File::open(&file_path).await {
        Ok(file) => file.metadata().await.map(|metadata| (file, metadata.len())),
        Err(error) => Err(error),
    };
    match opened {
        Ok((file, length)) => (
            [
                (
                    header::CONTENT_TYPE,
                    static_files::content_type_for(&file_path).to_string(),
                ),
                (header::CONTENT_LENGTH, length.to_string()),
            ],
            file_body(file),
        )
            .into_response(),
        Err(_) => (StatusCode::INTERNAL_SERVER_ERROR, "Internal Error").into_response(),
    }
}
