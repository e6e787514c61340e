// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! [`DataStore`] methods on [`Cluster`]s.

use super::DataStore;
use crate::context::OpContext;
use crate::db::Locking;
use conductor_db_model::Cluster;
use foundry_common::api::external::CreateResult;
use foundry_common::api::external::Error;
use foundry_common::api::external::ListResultVec;
use foundry_common::api::external::LookupResult;
use foundry_common::api::external::ResourceType;
use foundry_common::typed_uuid::ClusterUuid;
use slog::info;

impl DataStore {
    pub async fn cluster_create(
        &self,
        opctx: &OpContext,
        cluster: Cluster,
    ) -> CreateResult<Cluster> {
        let mut tx = self.begin(opctx, Locking::None);
        let cluster = tx.cluster_insert(cluster).await?;
        tx.commit()?;
        info!(opctx.log, "created cluster";
            "cluster_id" => %cluster.id,
            "name" => &cluster.name,
        );
        Ok(cluster)
    }

    pub async fn cluster_fetch(
        &self,
        _opctx: &OpContext,
        cluster_id: ClusterUuid,
    ) -> LookupResult<Cluster> {
        self.tables().clusters.get(&cluster_id).cloned().ok_or_else(|| {
            Error::not_found_by_id(
                ResourceType::Cluster,
                cluster_id.as_untyped_uuid(),
            )
        })
    }

    /// Lists all clusters in creation order
    pub async fn cluster_list(
        &self,
        _opctx: &OpContext,
    ) -> ListResultVec<Cluster> {
        let mut clusters: Vec<Cluster> =
            self.tables().clusters.values().cloned().collect();
        clusters.sort_by_key(|c| (c.time_created, c.id));
        Ok(clusters)
    }
}
