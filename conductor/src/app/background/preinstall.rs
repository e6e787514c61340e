// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Background task that prepares queued cluster installations
//!
//! `InstallCluster` only moves the cluster to `preparing-for-installation`
//! and queues a [`PreInstallJob`].  This task picks the job up, renders the
//! install configuration, learns the platform cluster id from the rendered
//! `bootstrap.ign`, and then moves the cluster and its hosts to `installing`.
//! A failing job moves them to `error` instead; the only record of the
//! failure is in those statuses, the cluster's events and this task's status.

use super::BackgroundTask;
use crate::app::blob::BlobStore;
use crate::app::engine::ClusterTransition;
use crate::app::engine::HostTransition;
use crate::app::engine::StateEngine;
use crate::app::ignition::bootstrap_ignition_blob;
use crate::app::ignition::extract_cluster_id;
use crate::app::ignition::IgnitionBuilder;
use crate::app::refresh::update_cluster_status;
use crate::app::refresh::update_host_status;
use crate::app::subscription::SubscriptionClient;
use anyhow::Context;
use conductor_db_queries::context::OpContext;
use conductor_db_queries::db::DataStore;
use conductor_db_queries::db::Locking;
use conductor_types::external_api::shared::HostStatus;
use foundry_common::api::external::Error;
use foundry_common::api::external::InternalContext;
use foundry_common::typed_uuid::ClusterUuid;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::json;
use slog::error;
use slog::info;
use slog::warn;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use uuid::Uuid;

/// A cluster whose installation was requested and still has to be prepared
pub struct PreInstallJob {
    pub cluster_id: ClusterUuid,
    /// context of the request that queued the job, without its deadline
    pub opctx: OpContext,
}

/// Jobs waiting for the pre-install runner
#[derive(Clone, Default)]
pub struct PreInstallQueue {
    jobs: Arc<Mutex<VecDeque<PreInstallJob>>>,
}

impl PreInstallQueue {
    pub fn new() -> PreInstallQueue {
        PreInstallQueue::default()
    }

    fn jobs(&self) -> std::sync::MutexGuard<'_, VecDeque<PreInstallJob>> {
        self.jobs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn push(&self, job: PreInstallJob) {
        self.jobs().push_back(job);
    }

    fn pop(&self) -> Option<PreInstallJob> {
        self.jobs().pop_front()
    }

    pub fn len(&self) -> usize {
        self.jobs().len()
    }
}

/// Background task that runs queued [`PreInstallJob`]s
pub struct PreInstallRunner {
    queue: PreInstallQueue,
    datastore: Arc<DataStore>,
    engine: Arc<dyn StateEngine>,
    ignition: Arc<dyn IgnitionBuilder>,
    blob_store: Arc<dyn BlobStore>,
    subscription: Option<Arc<dyn SubscriptionClient>>,
}

impl PreInstallRunner {
    pub fn new(
        queue: PreInstallQueue,
        datastore: Arc<DataStore>,
        engine: Arc<dyn StateEngine>,
        ignition: Arc<dyn IgnitionBuilder>,
        blob_store: Arc<dyn BlobStore>,
        subscription: Option<Arc<dyn SubscriptionClient>>,
    ) -> PreInstallRunner {
        PreInstallRunner {
            queue,
            datastore,
            engine,
            ignition,
            blob_store,
            subscription,
        }
    }

    /// Renders the install configuration and records the platform cluster id
    async fn prepare(&self, job: &PreInstallJob) -> anyhow::Result<Uuid> {
        let opctx = &job.opctx;
        let cluster =
            self.datastore.cluster_fetch(opctx, job.cluster_id).await?;
        let hosts = self.datastore.host_list(opctx, job.cluster_id).await?;

        self.ignition
            .generate_install_config(&cluster, &hosts)
            .await
            .context("generating install config")?;

        let bootstrap = self
            .blob_store
            .download(&bootstrap_ignition_blob(&cluster))
            .await
            .context("downloading bootstrap.ign")?;
        let platform_cluster_id = extract_cluster_id(&bootstrap)?;

        let cluster = {
            let mut tx = self.datastore.begin(opctx, Locking::ForUpdate);
            let mut cluster = tx.cluster_fetch(job.cluster_id).await?;
            cluster.platform_cluster_id = Some(platform_cluster_id);
            let cluster = tx.cluster_update(cluster).await?;
            tx.commit()?;
            cluster
        };

        if let Some(subscription) = &self.subscription {
            subscription
                .update_subscription_cluster_id(&cluster, platform_cluster_id)
                .await
                .context("updating subscription")?;
        }
        Ok(platform_cluster_id)
    }

    /// Moves the cluster, and every host that was preparing along with it, to
    /// the outcome of its preparation
    async fn finish(
        &self,
        job: &PreInstallJob,
        failure: Option<&str>,
    ) -> Result<(), Error> {
        let mut tx = self.datastore.begin(&job.opctx, Locking::ForUpdate);
        let cluster = tx.cluster_fetch(job.cluster_id).await?;
        let (cluster_transition, host_transition) = match failure {
            None => (
                ClusterTransition::PreInstallSucceeded,
                HostTransition::Install,
            ),
            Some(reason) => (
                ClusterTransition::PreInstallFailed(reason.to_string()),
                HostTransition::Fail(reason.to_string()),
            ),
        };

        let update =
            self.engine.cluster_transition(&cluster, &cluster_transition)?;
        update_cluster_status(&mut tx, cluster, update).await?;
        for host in tx.cluster_hosts(job.cluster_id).await? {
            if host.status != HostStatus::PreparingForInstallation {
                continue;
            }
            let update = self.engine.host_transition(&host, &host_transition)?;
            update_host_status(&mut tx, host, update).await?;
        }
        tx.commit().with_internal_context(|| {
            format!("finishing preparation of cluster {}", job.cluster_id)
        })
    }

    async fn run_job(&self, job: &PreInstallJob) -> Result<Uuid, String> {
        let log = &job.opctx.log;
        match self.prepare(job).await {
            Ok(platform_cluster_id) => {
                if let Err(error) = self.finish(job, None).await {
                    error!(log, "failed to start installation";
                        "cluster_id" => %job.cluster_id,
                        "error" => %error,
                    );
                    return Err(error.to_string());
                }
                info!(log, "cluster installation started";
                    "cluster_id" => %job.cluster_id,
                    "platform_cluster_id" => %platform_cluster_id,
                );
                Ok(platform_cluster_id)
            }
            Err(error) => {
                let reason = format!("{:#}", error);
                warn!(log, "failed to prepare installation";
                    "cluster_id" => %job.cluster_id,
                    "error" => &reason,
                );
                if let Err(error) = self.finish(job, Some(&reason)).await {
                    error!(log, "failed to record installation failure";
                        "cluster_id" => %job.cluster_id,
                        "error" => %error,
                    );
                }
                Err(reason)
            }
        }
    }

    async fn activate(&mut self, opctx: &OpContext) -> serde_json::Value {
        let mut started = Vec::new();
        let mut failed = Vec::new();
        while let Some(job) = self.queue.pop() {
            match self.run_job(&job).await {
                Ok(platform_cluster_id) => started.push(json!({
                    "cluster_id": job.cluster_id,
                    "platform_cluster_id": platform_cluster_id,
                })),
                Err(error) => failed.push(json!({
                    "cluster_id": job.cluster_id,
                    "error": error,
                })),
            }
        }

        if !started.is_empty() || !failed.is_empty() {
            info!(opctx.log, "pre-install runner finished jobs";
                "started" => started.len(),
                "failed" => failed.len(),
            );
        }
        json!({ "started": started, "failed": failed })
    }
}

impl BackgroundTask for PreInstallRunner {
    fn activate<'a>(
        &'a mut self,
        opctx: &'a OpContext,
    ) -> BoxFuture<'a, serde_json::Value> {
        self.activate(opctx).boxed()
    }
}
