// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Background task that refreshes host and cluster statuses

use super::BackgroundTask;
use crate::app::engine::StateEngine;
use crate::app::refresh;
use conductor_db_queries::context::OpContext;
use conductor_db_queries::db::DataStore;
use conductor_db_queries::db::Locking;
use foundry_common::api::external::Error;
use foundry_common::typed_uuid::ClusterUuid;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::json;
use slog::debug;
use slog::info;
use slog::warn;
use std::sync::Arc;

/// Background task that re-evaluates every cluster and its hosts
///
/// Statuses otherwise only change when an agent or an operator does
/// something.  This task is what notices the passage of time, e.g. a host
/// that stopped polling.
pub struct HostMonitor {
    datastore: Arc<DataStore>,
    engine: Arc<dyn StateEngine>,
    disable: bool,
}

impl HostMonitor {
    pub fn new(
        datastore: Arc<DataStore>,
        engine: Arc<dyn StateEngine>,
        disable: bool,
    ) -> HostMonitor {
        HostMonitor { datastore, engine, disable }
    }

    async fn refresh_one(
        &self,
        opctx: &OpContext,
        cluster_id: ClusterUuid,
    ) -> Result<refresh::RefreshSummary, Error> {
        let mut tx = self.datastore.begin(opctx, Locking::ForUpdate);
        let summary =
            refresh::refresh_cluster(&mut tx, &*self.engine, cluster_id)
                .await?;
        tx.commit()?;
        Ok(summary)
    }

    async fn activate(&mut self, opctx: &OpContext) -> serde_json::Value {
        if self.disable {
            debug!(opctx.log, "host monitor disabled by configuration");
            return json!({ "error": "host monitor disabled" });
        }

        let clusters = match self.datastore.cluster_list(opctx).await {
            Ok(clusters) => clusters,
            Err(error) => {
                warn!(opctx.log, "host monitor: failed to list clusters";
                    "error" => %error);
                return json!({ "error": error.to_string() });
            }
        };

        let mut hosts_updated = 0;
        let mut clusters_updated = 0;
        let mut errors = Vec::new();
        for cluster in &clusters {
            match self.refresh_one(opctx, cluster.id).await {
                Ok(summary) => {
                    hosts_updated += summary.hosts_updated;
                    if summary.cluster_updated {
                        clusters_updated += 1;
                    }
                }
                Err(error) => {
                    warn!(opctx.log, "host monitor: failed to refresh cluster";
                        "cluster_id" => %cluster.id,
                        "error" => %error,
                    );
                    errors.push(format!("cluster {}: {}", cluster.id, error));
                }
            }
        }

        if hosts_updated > 0 || clusters_updated > 0 {
            info!(opctx.log, "host monitor updated statuses";
                "hosts_updated" => hosts_updated,
                "clusters_updated" => clusters_updated,
            );
        }
        json!({
            "clusters": clusters.len(),
            "hosts_updated": hosts_updated,
            "clusters_updated": clusters_updated,
            "errors": errors,
        })
    }
}

impl BackgroundTask for HostMonitor {
    fn activate<'a>(
        &'a mut self,
        opctx: &'a OpContext,
    ) -> BoxFuture<'a, serde_json::Value> {
        self.activate(opctx).boxed()
    }
}
