//! Shared utilities for integration testing.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use versioned_rpc::config::ServiceConfig;
use versioned_rpc::http::HttpServer;
use versioned_rpc::lifecycle::Shutdown;
use versioned_rpc::rpc::middleware::{self, Next};
use versioned_rpc::Service;

/// A server bound to an ephemeral port.
pub struct TestServer {
    pub addr: SocketAddr,
    pub shutdown: Shutdown,
    pub handle: JoinHandle<std::io::Result<()>>,
}

#[allow(dead_code)]
impl TestServer {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Trigger shutdown and wait for the server task to finish.
    pub async fn stop(self) -> std::io::Result<()> {
        self.shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(5), self.handle)
            .await
            .expect("server did not stop in time")
            .expect("server task panicked")
    }
}

/// A service whose auth middleware lets every call through.
#[allow(dead_code)]
pub fn open_service() -> Service {
    let mut service = Service::new();
    service.set_auth(middleware::from_fn(|call, next: Next| next.run(call)));
    service
}

/// Serve `service` on `127.0.0.1:0` with `config`.
pub async fn start_server(config: ServiceConfig, service: Service) -> TestServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let shutdown = Shutdown::new();
    let server = HttpServer::new(config, service.into_dispatcher());
    let handle = tokio::spawn(server.run(listener, shutdown.subscribe()));

    TestServer {
        addr,
        shutdown,
        handle,
    }
}
