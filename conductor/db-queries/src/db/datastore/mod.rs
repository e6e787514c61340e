// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Primary control plane interface for the conductor's state
//!
//! The [`DataStore`] keeps every cluster, host and event in memory.  All reads
//! and writes go through it, either directly (plain reads, single-row
//! updates) or through a [`Transaction`] when an operation must read several
//! rows and write them back atomically.
//!
//! Consistency works like a relational database used with `SELECT ... FOR
//! UPDATE`: each row has its own lock, a transaction opened with
//! [`Locking::ForUpdate`] takes the lock of every row it reads, and every
//! write takes the lock of the row it writes.  Writes are staged in the
//! transaction and applied together on commit.  Dropping a transaction
//! without committing discards them.
//!
//! Transactions that lock both a cluster and its hosts must lock the cluster
//! first.  Host rows are always locked in `(cluster_id, host_id)` order.

use super::Locking;
use super::Transaction;
use crate::context::OpContext;
use conductor_db_model::Cluster;
use conductor_db_model::Event;
use conductor_db_model::Host;
use foundry_common::typed_uuid::ClusterUuid;
use foundry_common::typed_uuid::HostUuid;
use slog::o;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::time::Duration;

mod cluster;
mod event;
mod host;

/// Default for how long a transaction waits for a row lock before giving up
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(10);

/// Identifies a lockable row
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub(crate) enum RowKey {
    Cluster(ClusterUuid),
    Host(ClusterUuid, HostUuid),
}

impl fmt::Display for RowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowKey::Cluster(id) => write!(f, "cluster {}", id),
            RowKey::Host(cluster_id, id) => {
                write!(f, "host {} in cluster {}", id, cluster_id)
            }
        }
    }
}

#[derive(Default)]
pub(crate) struct Tables {
    pub(crate) clusters: BTreeMap<ClusterUuid, Cluster>,
    pub(crate) hosts: BTreeMap<(ClusterUuid, HostUuid), Host>,
    pub(crate) events: Vec<Event>,
}

pub struct DataStore {
    tables: Mutex<Tables>,
    row_locks: Mutex<BTreeMap<RowKey, Arc<tokio::sync::Mutex<()>>>>,
    lock_timeout: Duration,
}

impl DataStore {
    pub fn new(log: &slog::Logger, lock_timeout: Duration) -> DataStore {
        let log = log.new(o!("component" => "DataStore"));
        slog::info!(log, "created in-memory datastore";
            "lock_timeout" => ?lock_timeout);
        DataStore {
            tables: Mutex::new(Tables::default()),
            row_locks: Mutex::new(BTreeMap::new()),
            lock_timeout,
        }
    }

    /// Opens a transaction
    ///
    /// See the module-level documentation for what `locking` means.
    pub fn begin<'a>(
        &'a self,
        opctx: &'a OpContext,
        locking: Locking,
    ) -> Transaction<'a> {
        Transaction::new(self, opctx, locking)
    }

    pub(crate) fn lock_timeout(&self) -> Duration {
        self.lock_timeout
    }

    /// Returns the table contents
    ///
    /// Never hold the returned guard across an `await`.
    pub(crate) fn tables(&self) -> MutexGuard<'_, Tables> {
        // Commit only swaps in whole rows, so a poisoned table is still
        // consistent.
        self.tables.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn row_lock(
        &self,
        key: RowKey,
    ) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self
            .row_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(locks.entry(key).or_default())
    }
}

#[cfg(test)]
pub(crate) mod test_utils {
    use super::DataStore;
    use crate::context::OpContext;
    use conductor_db_model::Cluster;
    use conductor_db_model::Host;
    use conductor_types::external_api::params;
    use conductor_types::external_api::shared::ClusterKind;
    use conductor_types::external_api::shared::HostKind;
    use conductor_types::external_api::shared::HostStatus;
    use foundry_common::typed_uuid::HostUuid;
    use std::time::Duration;

    pub fn datastore_test(log: &slog::Logger) -> (OpContext, DataStore) {
        let opctx = OpContext::for_tests(log.new(slog::o!()));
        let datastore = DataStore::new(log, Duration::from_millis(200));
        (opctx, datastore)
    }

    pub fn cluster_params(name: &str) -> params::ClusterCreate {
        params::ClusterCreate {
            name: name.to_string(),
            base_dns_domain: String::from("example.com"),
            openshift_version: String::from("4.6"),
            kind: ClusterKind::Cluster,
            high_availability_mode: Default::default(),
            cluster_network_cidr: None,
            service_network_cidr: None,
            machine_network_cidr: Some(String::from("10.0.0.0/24")),
            api_vip: None,
            ingress_vip: None,
            vip_dhcp_allocation: false,
        }
    }

    pub async fn create_cluster(
        opctx: &OpContext,
        datastore: &DataStore,
        name: &str,
    ) -> Cluster {
        datastore
            .cluster_create(opctx, Cluster::from_create(&cluster_params(name)))
            .await
            .unwrap()
    }

    pub async fn create_host(
        opctx: &OpContext,
        datastore: &DataStore,
        cluster: &Cluster,
        status: HostStatus,
    ) -> Host {
        let mut host = Host::new(
            HostUuid::new_v4(),
            cluster.id,
            HostKind::Host,
            String::from("v1.0.0"),
        );
        host.status = status;
        datastore.host_create(opctx, host).await.unwrap()
    }
}
