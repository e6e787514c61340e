// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Optional client of an external subscription service
//!
//! When configured, the platform cluster id learned during pre-install is
//! reported to the subscription service.  No client ships with the
//! conductor; deployments that need one provide it through
//! [`super::Collaborators`].

use async_trait::async_trait;
use conductor_db_model::Cluster;
use uuid::Uuid;

#[async_trait]
pub trait SubscriptionClient: Send + Sync {
    /// Associates the cluster's subscription with the id the installed
    /// platform will report
    async fn update_subscription_cluster_id(
        &self,
        cluster: &Cluster,
        platform_cluster_id: Uuid,
    ) -> anyhow::Result<()>;
}
