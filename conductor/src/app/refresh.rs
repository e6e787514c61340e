// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Staging status changes and refreshing a cluster inside a transaction
//!
//! Every status change goes through [`update_host_status()`] or
//! [`update_cluster_status()`], which stage the new row together with an audit
//! event so that the two commit (or roll back) together.

use super::connectivity;
use super::engine::StateEngine;
use super::engine::StatusUpdate;
use conductor_db_model::Cluster;
use conductor_db_model::Event;
use conductor_db_model::Host;
use conductor_db_queries::db::Transaction;
use conductor_types::external_api::shared::ClusterStatus;
use conductor_types::external_api::shared::EventSeverity;
use conductor_types::external_api::shared::HostStatus;
use foundry_common::api::external::Error;
use foundry_common::api::external::UpdateResult;
use foundry_common::typed_uuid::ClusterUuid;
use serde::Serialize;
use slog::debug;

fn host_status_severity(status: HostStatus) -> EventSeverity {
    match status {
        HostStatus::Error => EventSeverity::Error,
        HostStatus::Disconnected
        | HostStatus::Insufficient
        | HostStatus::Cancelled => EventSeverity::Warning,
        _ => EventSeverity::Info,
    }
}

fn cluster_status_severity(status: ClusterStatus) -> EventSeverity {
    match status {
        ClusterStatus::Error => EventSeverity::Error,
        ClusterStatus::Cancelled | ClusterStatus::Insufficient => {
            EventSeverity::Warning
        }
        _ => EventSeverity::Info,
    }
}

/// Stages `update` on `host` and an event describing it
///
/// Nothing is staged when neither the status nor its explanation change.  An
/// explanation-only change is stored without an event.
pub(crate) async fn update_host_status(
    tx: &mut Transaction<'_>,
    mut host: Host,
    update: StatusUpdate<HostStatus>,
) -> UpdateResult<Host> {
    if host.status == update.status && host.status_info == update.status_info {
        return Ok(host);
    }

    let previous = host.status;
    host.status = update.status;
    host.status_info = update.status_info;
    let host = tx.host_update(host).await?;

    if previous != host.status {
        debug!(tx.opctx().log, "host status changed";
            "cluster_id" => %host.cluster_id,
            "host_id" => %host.id,
            "from" => %previous,
            "to" => %host.status,
        );
        let request_id = tx.opctx().request_id().map(String::from);
        tx.event_insert(Event::new(
            host.cluster_id,
            Some(host.id),
            host_status_severity(host.status),
            format!(
                "Host {}: updated status from \"{}\" to \"{}\" ({})",
                host.display_name(),
                previous,
                host.status,
                host.status_info
            ),
            request_id,
        ));
    }
    Ok(host)
}

/// Cluster counterpart of [`update_host_status()`]
pub(crate) async fn update_cluster_status(
    tx: &mut Transaction<'_>,
    mut cluster: Cluster,
    update: StatusUpdate<ClusterStatus>,
) -> UpdateResult<Cluster> {
    if cluster.status == update.status
        && cluster.status_info == update.status_info
    {
        return Ok(cluster);
    }

    let previous = cluster.status;
    cluster.status = update.status;
    cluster.status_info = update.status_info;
    let cluster = tx.cluster_update(cluster).await?;

    if previous != cluster.status {
        debug!(tx.opctx().log, "cluster status changed";
            "cluster_id" => %cluster.id,
            "from" => %previous,
            "to" => %cluster.status,
        );
        let request_id = tx.opctx().request_id().map(String::from);
        tx.event_insert(Event::new(
            cluster.id,
            None,
            cluster_status_severity(cluster.status),
            format!(
                "Updated status of cluster {} to {} ({})",
                cluster.name, cluster.status, cluster.status_info
            ),
            request_id,
        ));
    }
    Ok(cluster)
}

/// What a call to [`refresh_cluster()`] changed
#[derive(Debug, Default, Serialize)]
pub(crate) struct RefreshSummary {
    pub hosts_updated: usize,
    pub cluster_updated: bool,
}

/// Recomputes the majority groups, every host status and then the cluster
/// status of `cluster_id`
///
/// Host statuses depend on the majority groups and the cluster status depends
/// on the host statuses, so the order matters.  Callers should hold the
/// transaction with [`Locking::ForUpdate`] so the refresh works from a stable
/// view.
///
/// [`Locking::ForUpdate`]: conductor_db_queries::db::Locking::ForUpdate
pub(crate) async fn refresh_cluster(
    tx: &mut Transaction<'_>,
    engine: &dyn StateEngine,
    cluster_id: ClusterUuid,
) -> Result<RefreshSummary, Error> {
    let mut summary = RefreshSummary::default();
    let mut cluster = tx.cluster_fetch(cluster_id).await?;
    let hosts = tx.cluster_hosts(cluster_id).await?;

    let enabled: Vec<Host> =
        hosts.iter().filter(|h| !h.is_disabled()).cloned().collect();
    let groups = connectivity::majority_groups(&enabled);
    if groups != cluster.connectivity_majority_groups {
        cluster.connectivity_majority_groups = groups;
        cluster = tx.cluster_update(cluster).await?;
    }

    for host in &hosts {
        if let Some(update) = engine.refresh_host(&cluster, host, &hosts) {
            update_host_status(tx, host.clone(), update).await?;
            summary.hosts_updated += 1;
        }
    }

    let hosts = tx.cluster_hosts(cluster_id).await?;
    if let Some(update) = engine.refresh_cluster(&cluster, &hosts) {
        update_cluster_status(tx, cluster, update).await?;
        summary.cluster_updated = true;
    }

    Ok(summary)
}
