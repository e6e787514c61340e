// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Multi-row transactions against the [`DataStore`]

use super::datastore::RowKey;
use super::DataStore;
use crate::context::OpContext;
use chrono::Utc;
use conductor_db_model::Cluster;
use conductor_db_model::Event;
use conductor_db_model::Host;
use foundry_common::api::external::CreateResult;
use foundry_common::api::external::DeleteResult;
use foundry_common::api::external::Error;
use foundry_common::api::external::ListResultVec;
use foundry_common::api::external::LookupResult;
use foundry_common::api::external::ResourceType;
use foundry_common::api::external::UpdateResult;
use foundry_common::typed_uuid::ClusterUuid;
use foundry_common::typed_uuid::HostUuid;
use slog::debug;
use slog::warn;
use std::collections::BTreeMap;
use tokio::sync::OwnedMutexGuard;

/// Whether reads in a transaction lock the rows they return
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Locking {
    /// reads see the latest committed state and take no locks
    None,
    /// every row read is locked until the transaction ends
    ForUpdate,
}

/// A set of reads and staged writes that commit together
///
/// Obtained from [`DataStore::begin()`].  Dropping the transaction without
/// calling [`Transaction::commit()`] rolls it back.  Row locks are released
/// when the transaction ends either way.
pub struct Transaction<'a> {
    datastore: &'a DataStore,
    opctx: &'a OpContext,
    locking: Locking,
    guards: BTreeMap<RowKey, OwnedMutexGuard<()>>,
    clusters: BTreeMap<ClusterUuid, Cluster>,
    hosts: BTreeMap<(ClusterUuid, HostUuid), Host>,
    events: Vec<Event>,
}

impl<'a> Transaction<'a> {
    pub(crate) fn new(
        datastore: &'a DataStore,
        opctx: &'a OpContext,
        locking: Locking,
    ) -> Transaction<'a> {
        Transaction {
            datastore,
            opctx,
            locking,
            guards: BTreeMap::new(),
            clusters: BTreeMap::new(),
            hosts: BTreeMap::new(),
            events: Vec::new(),
        }
    }

    pub fn locking(&self) -> Locking {
        self.locking
    }

    pub fn opctx(&self) -> &OpContext {
        self.opctx
    }

    async fn lock_row(&mut self, key: RowKey) -> Result<(), Error> {
        if self.guards.contains_key(&key) {
            return Ok(());
        }

        let timeout = match self.opctx.remaining() {
            Some(remaining) => remaining.min(self.datastore.lock_timeout()),
            None => self.datastore.lock_timeout(),
        };
        let row_lock = self.datastore.row_lock(key);
        match tokio::time::timeout(timeout, row_lock.lock_owned()).await {
            Ok(guard) => {
                debug!(self.opctx.log, "locked row"; "row" => %key);
                self.guards.insert(key, guard);
                Ok(())
            }
            Err(_) => {
                warn!(
                    self.opctx.log,
                    "gave up waiting for row lock";
                    "row" => %key,
                    "waited" => ?timeout,
                );
                Err(Error::unavail(&format!(
                    "timed out waiting for lock on {}",
                    key
                )))
            }
        }
    }

    async fn lock_for_read(&mut self, key: RowKey) -> Result<(), Error> {
        match self.locking {
            Locking::None => Ok(()),
            Locking::ForUpdate => self.lock_row(key).await,
        }
    }

    /// Fetches a cluster, seeing this transaction's own staged writes
    pub async fn cluster_fetch(
        &mut self,
        cluster_id: ClusterUuid,
    ) -> LookupResult<Cluster> {
        self.lock_for_read(RowKey::Cluster(cluster_id)).await?;
        if let Some(cluster) = self.clusters.get(&cluster_id) {
            return Ok(cluster.clone());
        }
        self.datastore.tables().clusters.get(&cluster_id).cloned().ok_or_else(
            || {
                Error::not_found_by_id(
                    ResourceType::Cluster,
                    cluster_id.as_untyped_uuid(),
                )
            },
        )
    }

    /// Fetches a host that has not been deregistered
    pub async fn host_fetch(
        &mut self,
        cluster_id: ClusterUuid,
        host_id: HostUuid,
    ) -> LookupResult<Host> {
        self.lock_for_read(RowKey::Host(cluster_id, host_id)).await?;
        self.host_lookup(cluster_id, host_id)
            .filter(|host| host.time_deleted.is_none())
            .ok_or_else(|| {
                Error::not_found_by_id(
                    ResourceType::Host,
                    host_id.as_untyped_uuid(),
                )
            })
    }

    /// Returns the host row, including deregistered rows
    fn host_lookup(
        &self,
        cluster_id: ClusterUuid,
        host_id: HostUuid,
    ) -> Option<Host> {
        self.hosts.get(&(cluster_id, host_id)).cloned().or_else(|| {
            self.datastore.tables().hosts.get(&(cluster_id, host_id)).cloned()
        })
    }

    fn cluster_host_ids(&self, cluster_id: ClusterUuid) -> Vec<HostUuid> {
        let mut ids: Vec<HostUuid> = self
            .datastore
            .tables()
            .hosts
            .range((cluster_id, min_host_id())..)
            .take_while(|((cid, _), _)| *cid == cluster_id)
            .map(|((_, id), _)| *id)
            .collect();
        ids.extend(
            self.hosts
                .keys()
                .filter(|(cid, _)| *cid == cluster_id)
                .map(|k| k.1),
        );
        ids.sort();
        ids.dedup();
        ids
    }

    /// Lists the cluster's registered hosts, ordered by host id
    ///
    /// Under [`Locking::ForUpdate`], every returned host is locked.  Hosts
    /// that register while the locks are being taken are locked too, so the
    /// returned set cannot grow until the transaction ends.
    pub async fn cluster_hosts(
        &mut self,
        cluster_id: ClusterUuid,
    ) -> ListResultVec<Host> {
        let mut ids = self.cluster_host_ids(cluster_id);
        if self.locking == Locking::ForUpdate {
            loop {
                for id in &ids {
                    self.lock_row(RowKey::Host(cluster_id, *id)).await?;
                }
                let current = self.cluster_host_ids(cluster_id);
                if current == ids {
                    break;
                }
                ids = current;
            }
        }

        Ok(ids
            .into_iter()
            .filter_map(|id| self.host_lookup(cluster_id, id))
            .filter(|host| host.time_deleted.is_none())
            .collect())
    }

    pub async fn cluster_insert(
        &mut self,
        cluster: Cluster,
    ) -> CreateResult<Cluster> {
        self.lock_row(RowKey::Cluster(cluster.id)).await?;
        let exists = self.clusters.contains_key(&cluster.id)
            || self.datastore.tables().clusters.contains_key(&cluster.id);
        if exists {
            return Err(Error::ObjectAlreadyExists {
                type_name: ResourceType::Cluster,
                object_name: cluster.id.to_string(),
            });
        }
        self.clusters.insert(cluster.id, cluster.clone());
        Ok(cluster)
    }

    /// Stages a new version of an existing cluster
    pub async fn cluster_update(
        &mut self,
        cluster: Cluster,
    ) -> UpdateResult<Cluster> {
        self.lock_row(RowKey::Cluster(cluster.id)).await?;
        let exists = self.clusters.contains_key(&cluster.id)
            || self.datastore.tables().clusters.contains_key(&cluster.id);
        if !exists {
            return Err(Error::not_found_by_id(
                ResourceType::Cluster,
                cluster.id.as_untyped_uuid(),
            ));
        }
        self.clusters.insert(cluster.id, cluster.clone());
        Ok(cluster)
    }

    /// Stages a new host
    ///
    /// A deregistered host with the same id is replaced.
    pub async fn host_insert(&mut self, host: Host) -> CreateResult<Host> {
        self.lock_row(RowKey::Host(host.cluster_id, host.id)).await?;
        let existing = self.host_lookup(host.cluster_id, host.id);
        if existing.is_some_and(|h| h.time_deleted.is_none()) {
            return Err(Error::ObjectAlreadyExists {
                type_name: ResourceType::Host,
                object_name: host.id.to_string(),
            });
        }
        self.hosts.insert((host.cluster_id, host.id), host.clone());
        Ok(host)
    }

    /// Stages a new version of a registered host
    pub async fn host_update(&mut self, host: Host) -> UpdateResult<Host> {
        self.lock_row(RowKey::Host(host.cluster_id, host.id)).await?;
        let existing = self.host_lookup(host.cluster_id, host.id);
        if !existing.is_some_and(|h| h.time_deleted.is_none()) {
            return Err(Error::not_found_by_id(
                ResourceType::Host,
                host.id.as_untyped_uuid(),
            ));
        }
        self.hosts.insert((host.cluster_id, host.id), host.clone());
        Ok(host)
    }

    /// Stages the deregistration of a host
    pub async fn host_delete(
        &mut self,
        cluster_id: ClusterUuid,
        host_id: HostUuid,
    ) -> DeleteResult {
        self.lock_row(RowKey::Host(cluster_id, host_id)).await?;
        let mut host = self.host_fetch(cluster_id, host_id).await?;
        host.time_deleted = Some(Utc::now());
        self.hosts.insert((cluster_id, host_id), host);
        Ok(())
    }

    /// Stages an audit event, recorded only if the transaction commits
    pub fn event_insert(&mut self, event: Event) {
        self.events.push(event);
    }

    /// Applies every staged write and releases the transaction's locks
    pub fn commit(self) -> Result<(), Error> {
        self.opctx.check_deadline()?;

        let now = Utc::now();
        let nclusters = self.clusters.len();
        let nhosts = self.hosts.len();
        let nevents = self.events.len();
        {
            let mut tables = self.datastore.tables();
            for (id, mut cluster) in self.clusters {
                cluster.time_modified = now;
                tables.clusters.insert(id, cluster);
            }
            for (key, mut host) in self.hosts {
                host.time_modified = now;
                tables.hosts.insert(key, host);
            }
            tables.events.extend(self.events);
        }

        debug!(
            self.opctx.log,
            "committed transaction";
            "clusters" => nclusters,
            "hosts" => nhosts,
            "events" => nevents,
            "locks" => self.guards.len(),
        );
        Ok(())
    }
}

fn min_host_id() -> HostUuid {
    HostUuid::from_untyped(uuid::Uuid::nil())
}

#[cfg(test)]
mod test {
    use super::Locking;
    use crate::db::datastore::test_utils::create_cluster;
    use crate::db::datastore::test_utils::create_host;
    use crate::db::datastore::test_utils::datastore_test;
    use assert_matches::assert_matches;
    use conductor_types::external_api::shared::ClusterStatus;
    use conductor_types::external_api::shared::HostStatus;
    use foundry_common::api::external::Error;
    use foundry_test_utils::dev;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_rollback_on_drop() {
        let logctx = dev::test_setup_log("test_rollback_on_drop");
        let (opctx, datastore) = datastore_test(&logctx.log);
        let cluster = create_cluster(&opctx, &datastore, "c1").await;

        {
            let mut tx = datastore.begin(&opctx, Locking::ForUpdate);
            let mut c = tx.cluster_fetch(cluster.id).await.unwrap();
            c.status = ClusterStatus::Installing;
            tx.cluster_update(c).await.unwrap();
            let c = tx.cluster_fetch(cluster.id).await.unwrap();
            assert_eq!(c.status, ClusterStatus::Installing);
        }

        let c = datastore.cluster_fetch(&opctx, cluster.id).await.unwrap();
        assert_eq!(c.status, ClusterStatus::Insufficient);
        logctx.cleanup_successful();
    }

    #[tokio::test]
    async fn test_for_update_serializes_writers() {
        let logctx = dev::test_setup_log("test_for_update_serializes_writers");
        let (opctx, datastore) = datastore_test(&logctx.log);
        let datastore = Arc::new(datastore);
        let cluster = create_cluster(&opctx, &datastore, "c1").await;
        let host =
            create_host(&opctx, &datastore, &cluster, HostStatus::Known).await;

        let mut tx = datastore.begin(&opctx, Locking::ForUpdate);
        let hosts = tx.cluster_hosts(cluster.id).await.unwrap();
        assert_eq!(hosts.len(), 1);

        // A second locking reader times out while the first holds the row.
        let mut tx2 = datastore.begin(&opctx, Locking::ForUpdate);
        let error = tx2.host_fetch(cluster.id, host.id).await.unwrap_err();
        assert_matches!(error, Error::ServiceUnavailable { .. });
        drop(tx2);

        // A plain reader does not wait.
        let mut tx3 = datastore.begin(&opctx, Locking::None);
        let h = tx3.host_fetch(cluster.id, host.id).await.unwrap();
        assert_eq!(h.status, HostStatus::Known);
        drop(tx3);

        // Once the first transaction commits, a waiting writer proceeds and
        // sees the committed state.
        let waiter = {
            let datastore = Arc::clone(&datastore);
            let log = logctx.log.clone();
            let (cluster_id, host_id) = (cluster.id, host.id);
            tokio::spawn(async move {
                let opctx = crate::context::OpContext::for_tests(log);
                let mut tx = datastore.begin(&opctx, Locking::ForUpdate);
                let h = tx.host_fetch(cluster_id, host_id).await.unwrap();
                h.status
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        let mut h = hosts.into_iter().next().unwrap();
        h.status = HostStatus::PreparingForInstallation;
        tx.host_update(h).await.unwrap();
        tx.commit().unwrap();

        assert_eq!(
            waiter.await.unwrap(),
            HostStatus::PreparingForInstallation
        );
        logctx.cleanup_successful();
    }

    #[tokio::test]
    async fn test_cluster_hosts_stay_in_cluster() {
        let logctx = dev::test_setup_log("test_cluster_hosts_stay_in_cluster");
        let (opctx, datastore) = datastore_test(&logctx.log);
        let c1 = create_cluster(&opctx, &datastore, "c1").await;
        let c2 = create_cluster(&opctx, &datastore, "c2").await;
        let mut in_c1 = Vec::new();
        for _ in 0..3 {
            let host =
                create_host(&opctx, &datastore, &c1, HostStatus::Known).await;
            in_c1.push(host.id);
        }
        let in_c2 =
            create_host(&opctx, &datastore, &c2, HostStatus::Known).await;
        in_c1.sort();

        let mut tx = datastore.begin(&opctx, Locking::ForUpdate);
        let hosts = tx.cluster_hosts(c1.id).await.unwrap();
        let ids: Vec<_> = hosts.iter().map(|h| h.id).collect();
        assert_eq!(ids, in_c1);
        let hosts = tx.cluster_hosts(c2.id).await.unwrap();
        assert_eq!(hosts.len(), 1);
        assert_eq!(hosts[0].id, in_c2.id);
        logctx.cleanup_successful();
    }

    #[tokio::test]
    async fn test_host_insert_conflicts() {
        let logctx = dev::test_setup_log("test_host_insert_conflicts");
        let (opctx, datastore) = datastore_test(&logctx.log);
        let cluster = create_cluster(&opctx, &datastore, "c1").await;
        let host =
            create_host(&opctx, &datastore, &cluster, HostStatus::Known).await;

        let mut tx = datastore.begin(&opctx, Locking::None);
        let error = tx.host_insert(host.clone()).await.unwrap_err();
        assert_matches!(error, Error::ObjectAlreadyExists { .. });
        drop(tx);

        // After deregistration the same id may register again.
        datastore.host_delete(&opctx, cluster.id, host.id).await.unwrap();
        let mut tx = datastore.begin(&opctx, Locking::None);
        assert!(tx.cluster_hosts(cluster.id).await.unwrap().is_empty());
        tx.host_insert(host.clone()).await.unwrap();
        tx.commit().unwrap();
        assert_eq!(
            datastore.host_list(&opctx, cluster.id).await.unwrap().len(),
            1
        );
        logctx.cleanup_successful();
    }
}
