use std::{
    net::SocketAddr,
    sync::{Arc, Mutex, PoisonError},
};

use homecall_common::error::{HomecallError, Result};
use homecall_metrics::Collector;
use tokio::{net::TcpListener, sync::OnceCell, sync::watch, task::JoinHandle};
use tracing::{error, info};

use crate::router::{ApiState, metrics_router};

struct RunningServer {
    local_addr: SocketAddr,
    shutdown: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

/// Scrape endpoint serving `/metrics`. The listener is bound at most once
/// per exporter no matter how many callers ask for it.
pub struct PullExporter {
    addr: SocketAddr,
    collector: Collector,
    server: OnceCell<RunningServer>,
}

impl PullExporter {
    pub fn new(addr: SocketAddr, collector: Collector) -> Self {
        Self {
            addr,
            collector,
            server: OnceCell::new(),
        }
    }

    /// Binds and starts serving on first call; later calls return the
    /// address already bound. A bind failure is returned and leaves the
    /// exporter unstarted. Once shut down, the exporter stays down.
    pub async fn ensure_started(&self) -> Result<SocketAddr> {
        let server = self.server.get_or_try_init(|| self.bind()).await?;
        if *server.shutdown.borrow() {
            return Err(HomecallError::Stopped("metrics server"));
        }
        Ok(server.local_addr)
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.server.get().map(|server| server.local_addr)
    }

    /// Stops the server and waits for in-flight scrapes to finish.
    pub async fn shutdown(&self) {
        let Some(server) = self.server.get() else {
            return;
        };

        server.shutdown.send_replace(true);
        let task = server
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            if let Err(err) = task.await {
                error!(error = %err, "metrics server task failed");
            }
            info!(addr = %server.local_addr, "metrics server stopped");
        }
    }

    async fn bind(&self) -> Result<RunningServer> {
        let listener = TcpListener::bind(self.addr).await.map_err(|source| {
            error!(addr = %self.addr, error = %source, "failed to bind metrics listener");
            HomecallError::Bind {
                addr: self.addr,
                source,
            }
        })?;
        let local_addr = listener.local_addr()?;

        let (shutdown, mut stop) = watch::channel(false);
        let app = metrics_router(Arc::new(ApiState::new(self.collector.clone())));
        let task = tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = stop.changed().await;
                })
                .await;
            if let Err(err) = result {
                error!(error = %err, "metrics server exited with error");
            }
        });

        info!(addr = %local_addr, "prometheus metrics available at /metrics");
        Ok(RunningServer {
            local_addr,
            shutdown,
            task: Mutex::new(Some(task)),
        })
    }
}
