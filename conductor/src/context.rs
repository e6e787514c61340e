// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Shared state used by API request handlers

use crate::app::Conductor;
use crate::config::Config;
use slog::info;
use slog::o;
use slog::Logger;
use std::sync::Arc;

/// Shared state available to all API request handlers
pub struct ServerContext {
    /// reference to the underlying conductor
    pub conductor: Arc<Conductor>,
    /// debug log
    pub log: Logger,
}

impl ServerContext {
    /// Create a new context with the given log.  This creates the underlying
    /// conductor as well, which starts its background tasks.
    pub fn new(log: &Logger, config: &Config) -> Arc<ServerContext> {
        let log = log.new(o!("component" => "ServerContext"));
        info!(log, "setting up server context";
            "agent_image" => &config.agent.image,
            "service_base_url" => &config.agent.service_base_url,
        );
        let conductor = Conductor::new(&log, config);
        Arc::new(ServerContext { conductor, log })
    }
}
