// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! [`DataStore`] methods on [`Host`]s.

use super::DataStore;
use crate::context::OpContext;
use crate::db::Locking;
use chrono::Utc;
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
use slog::info;

impl DataStore {
    pub async fn host_create(
        &self,
        opctx: &OpContext,
        host: Host,
    ) -> CreateResult<Host> {
        let mut tx = self.begin(opctx, Locking::None);
        let host = tx.host_insert(host).await?;
        tx.commit()?;
        Ok(host)
    }

    /// Fetches a registered host without taking any lock
    pub async fn host_fetch(
        &self,
        _opctx: &OpContext,
        cluster_id: ClusterUuid,
        host_id: HostUuid,
    ) -> LookupResult<Host> {
        self.tables()
            .hosts
            .get(&(cluster_id, host_id))
            .filter(|host| host.time_deleted.is_none())
            .cloned()
            .ok_or_else(|| {
                Error::not_found_by_id(
                    ResourceType::Host,
                    host_id.as_untyped_uuid(),
                )
            })
    }

    /// Lists the registered hosts of a cluster, ordered by host id
    pub async fn host_list(
        &self,
        opctx: &OpContext,
        cluster_id: ClusterUuid,
    ) -> ListResultVec<Host> {
        let mut tx = self.begin(opctx, Locking::None);
        tx.cluster_hosts(cluster_id).await
    }

    /// Lists every registered host of every cluster
    pub async fn host_list_all(
        &self,
        _opctx: &OpContext,
    ) -> ListResultVec<Host> {
        Ok(self
            .tables()
            .hosts
            .values()
            .filter(|host| host.time_deleted.is_none())
            .cloned()
            .collect())
    }

    /// Records that the host's agent just contacted us
    pub async fn host_checked_in(
        &self,
        opctx: &OpContext,
        cluster_id: ClusterUuid,
        host_id: HostUuid,
    ) -> UpdateResult<Host> {
        let mut tx = self.begin(opctx, Locking::ForUpdate);
        let mut host = tx.host_fetch(cluster_id, host_id).await?;
        host.checked_in_at = Utc::now();
        let host = tx.host_update(host).await?;
        tx.commit()?;
        Ok(host)
    }

    /// Deregisters a host
    ///
    /// The row is kept with `time_deleted` set, so that the host's events
    /// still resolve, but the host is no longer visible to any lookup.
    pub async fn host_delete(
        &self,
        opctx: &OpContext,
        cluster_id: ClusterUuid,
        host_id: HostUuid,
    ) -> DeleteResult {
        let mut tx = self.begin(opctx, Locking::ForUpdate);
        tx.host_delete(cluster_id, host_id).await?;
        tx.commit()?;
        info!(opctx.log, "deregistered host";
            "cluster_id" => %cluster_id,
            "host_id" => %host_id,
        );
        Ok(())
    }
}
