// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Library interface to the conductor, the service that registers hosts and
//! drives the installation of clusters made of them

pub mod app;
mod config;
mod context;
pub mod external_api;

pub use app::Conductor;
pub use config::AgentConfig;
pub use config::BackgroundTaskConfig;
pub use config::BlobStoreConfig;
pub use config::Config;
pub use config::DatabaseConfig;
pub use config::LoadError;
pub use context::ServerContext;

use slog::info;
use slog::o;
use slog::Logger;
use std::net::SocketAddr;
use std::sync::Arc;

/// Run the OpenAPI generator for the API, which emits the OpenAPI spec to
/// stdout.
pub fn run_openapi() -> Result<(), String> {
    external_api::http_entrypoints::api()
        .openapi("Conductor API", "0.0.1")
        .description(
            "API for registering hosts and installing clusters made of them",
        )
        .write(&mut std::io::stdout())
        .map_err(|e| e.to_string())
}

/// A running conductor: its shared state plus the HTTP server in front of it
pub struct Server {
    /// shared state used by API request handlers
    pub apictx: Arc<ServerContext>,
    /// dropshot server for the API
    http_server: dropshot::HttpServer<Arc<ServerContext>>,
}

impl Server {
    /// Start a conductor server.
    pub async fn start(
        config: &Config,
        log: &Logger,
    ) -> Result<Server, String> {
        let log = log.new(o!("name" => "conductor"));
        info!(log, "setting up conductor server");

        let apictx = ServerContext::new(&log, config);
        let http_server = dropshot::HttpServerStarter::new(
            &config.dropshot,
            external_api::http_entrypoints::api(),
            Arc::clone(&apictx),
            &log.new(o!("component" => "dropshot")),
        )
        .map_err(|error| format!("initializing http server: {}", error))?
        .start();

        info!(log, "conductor server started";
            "local_addr" => %http_server.local_addr(),
        );
        Ok(Server { apictx, http_server })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.http_server.local_addr()
    }

    /// Wait for the server to shut down
    ///
    /// Note that this doesn't initiate a graceful shutdown, so if you call this
    /// immediately after calling `start()`, the program will block indefinitely
    /// or until something else initiates a graceful shutdown.
    pub async fn wait_for_finish(self) -> Result<(), String> {
        self.http_server.await
    }

    /// Stop serving the API, waiting for in-flight requests to finish
    pub async fn close(self) -> Result<(), String> {
        self.http_server.close().await
    }
}

/// Run an instance of the conductor until its HTTP server shuts down
pub async fn run_server(config: &Config) -> Result<(), String> {
    let log = config
        .log
        .to_logger("conductor")
        .map_err(|message| format!("initializing logger: {}", message))?;
    let server = Server::start(config, &log).await?;
    server.wait_for_finish().await
}
