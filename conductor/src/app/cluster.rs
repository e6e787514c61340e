// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Clusters and their events

use super::refresh::refresh_cluster;
use super::Conductor;
use conductor_db_model::Cluster;
use conductor_db_model::Event;
use conductor_db_queries::context::OpContext;
use conductor_db_queries::db::Locking;
use conductor_types::external_api::params;
use conductor_types::external_api::shared::ClusterStatus;
use conductor_types::external_api::shared::EventSeverity;
use foundry_common::address::parse_ipv4_network;
use foundry_common::address::verify_ipv4_in_network;
use foundry_common::api::external::CreateResult;
use foundry_common::api::external::Error;
use foundry_common::api::external::ListResultVec;
use foundry_common::api::external::LookupResult;
use foundry_common::api::external::UpdateResult;
use foundry_common::typed_uuid::ClusterUuid;
use slog::info;

/// Checks the network configuration of a cluster as a whole
fn validate_network(cluster: &Cluster) -> Result<(), Error> {
    for (label, cidr) in [
        ("cluster_network_cidr", &cluster.cluster_network_cidr),
        ("service_network_cidr", &cluster.service_network_cidr),
        ("machine_network_cidr", &cluster.machine_network_cidr),
    ] {
        if let Some(cidr) = cidr {
            parse_ipv4_network(label, cidr)?;
        }
    }

    if let (Some(api_vip), Some(ingress_vip)) =
        (&cluster.api_vip, &cluster.ingress_vip)
    {
        if api_vip == ingress_vip {
            return Err(Error::conflict(&format!(
                "api-vip and ingress-vip cannot both be {}",
                api_vip
            )));
        }
    }
    if let Some(cidr) = &cluster.machine_network_cidr {
        if let Some(vip) = &cluster.api_vip {
            verify_ipv4_in_network("api-vip", vip, cidr)?;
        }
        if let Some(vip) = &cluster.ingress_vip {
            verify_ipv4_in_network("ingress-vip", vip, cidr)?;
        }
    }
    Ok(())
}

impl Conductor {
    pub(crate) async fn cluster_create(
        &self,
        opctx: &OpContext,
        params: &params::ClusterCreate,
    ) -> CreateResult<Cluster> {
        if params.name.is_empty() {
            return Err(Error::invalid_request(
                "cluster name must not be empty",
            ));
        }
        if params.vip_dhcp_allocation
            && (params.api_vip.is_some() || params.ingress_vip.is_some())
        {
            return Err(Error::invalid_request(
                "VIPs cannot be set when they are allocated by DHCP",
            ));
        }
        let cluster = Cluster::from_create(params);
        validate_network(&cluster)?;

        let mut tx = self.datastore.begin(opctx, Locking::None);
        let cluster = tx.cluster_insert(cluster).await?;
        tx.event_insert(Event::new(
            cluster.id,
            None,
            EventSeverity::Info,
            format!("Registered cluster {}", cluster.name),
            opctx.request_id().map(String::from),
        ));
        tx.commit()?;
        info!(opctx.log, "created cluster";
            "cluster_id" => %cluster.id,
            "name" => &cluster.name,
            "kind" => %cluster.kind,
        );
        Ok(cluster)
    }

    pub(crate) async fn cluster_fetch(
        &self,
        opctx: &OpContext,
        cluster_id: ClusterUuid,
    ) -> LookupResult<Cluster> {
        self.datastore.cluster_fetch(opctx, cluster_id).await
    }

    pub(crate) async fn cluster_list(
        &self,
        opctx: &OpContext,
    ) -> ListResultVec<Cluster> {
        self.datastore.cluster_list(opctx).await
    }

    /// Updates a cluster that is not installing and refreshes its status
    ///
    /// VIPs allocated by DHCP belong to the DHCP VIP validator: asking for
    /// specific VIPs while allocation is enabled is a conflict.  Enabling
    /// allocation drops the current VIPs and leases.
    pub(crate) async fn cluster_update(
        &self,
        opctx: &OpContext,
        cluster_id: ClusterUuid,
        params: &params::ClusterUpdate,
    ) -> UpdateResult<Cluster> {
        let mut tx = self.datastore.begin(opctx, Locking::ForUpdate);
        let mut cluster = tx.cluster_fetch(cluster_id).await?;
        if !matches!(
            cluster.status,
            ClusterStatus::Insufficient
                | ClusterStatus::Ready
                | ClusterStatus::PendingForInput
                | ClusterStatus::AddingHosts
        ) {
            return Err(Error::conflict(&format!(
                "cluster {} cannot be updated while it is {}",
                cluster.name, cluster.status
            )));
        }

        let dhcp =
            params.vip_dhcp_allocation.unwrap_or(cluster.vip_dhcp_allocation);
        if dhcp && (params.api_vip.is_some() || params.ingress_vip.is_some()) {
            return Err(Error::conflict(
                "VIPs cannot be set while they are allocated by DHCP",
            ));
        }
        if dhcp != cluster.vip_dhcp_allocation {
            if dhcp {
                cluster.api_vip = None;
                cluster.ingress_vip = None;
            }
            cluster.api_vip_lease = None;
            cluster.ingress_vip_lease = None;
            cluster.vip_dhcp_allocation = dhcp;
        }
        if let Some(name) = &params.name {
            if name.is_empty() {
                return Err(Error::invalid_request(
                    "cluster name must not be empty",
                ));
            }
            cluster.name = name.clone();
        }
        if let Some(cidr) = &params.machine_network_cidr {
            cluster.machine_network_cidr = Some(cidr.clone());
        }
        if let Some(vip) = &params.api_vip {
            cluster.api_vip = Some(vip.clone());
        }
        if let Some(vip) = &params.ingress_vip {
            cluster.ingress_vip = Some(vip.clone());
        }
        validate_network(&cluster)?;

        tx.cluster_update(cluster).await?;
        refresh_cluster(&mut tx, self.engine.as_ref(), cluster_id).await?;
        let cluster = tx.cluster_fetch(cluster_id).await?;
        tx.commit()?;
        self.activate_host_monitor();
        Ok(cluster)
    }

    /// Lists a cluster's events, oldest first
    pub(crate) async fn events_list(
        &self,
        opctx: &OpContext,
        cluster_id: ClusterUuid,
    ) -> ListResultVec<Event> {
        self.datastore.cluster_fetch(opctx, cluster_id).await?;
        self.datastore.event_list(opctx, cluster_id, None).await
    }
}

#[cfg(test)]
mod test {
    use crate::app::test_helpers::cluster_params;
    use crate::app::test_helpers::conductor_test;
    use crate::app::test_helpers::create_cluster;
    use crate::app::test_helpers::ready_cluster;
    use assert_matches::assert_matches;
    use conductor_types::external_api::params;
    use conductor_types::external_api::shared::ClusterStatus;
    use conductor_types::external_api::shared::HighAvailabilityMode;
    use conductor_types::external_api::shared::HostRole;
    use conductor_types::external_api::shared::HostStatus;
    use foundry_common::api::external::Error;
    use foundry_common::typed_uuid::ClusterUuid;
    use foundry_test_utils::dev;

    #[tokio::test]
    async fn test_cluster_create() {
        let logctx = dev::test_setup_log("test_cluster_create");
        let (opctx, conductor) = conductor_test(&logctx.log);

        let mut params = cluster_params("c1", HighAvailabilityMode::Full);
        params.ingress_vip = params.api_vip.clone();
        let error =
            conductor.cluster_create(&opctx, &params).await.unwrap_err();
        assert_matches!(error, Error::Conflict { .. });

        let mut params = cluster_params("c1", HighAvailabilityMode::Full);
        params.machine_network_cidr = Some(String::from("192.168.1.0/33"));
        let error =
            conductor.cluster_create(&opctx, &params).await.unwrap_err();
        assert_matches!(error, Error::InvalidValue { ref label, .. } => {
            assert_eq!(label, "machine_network_cidr");
        });

        let mut params = cluster_params("c1", HighAvailabilityMode::Full);
        params.vip_dhcp_allocation = true;
        let error =
            conductor.cluster_create(&opctx, &params).await.unwrap_err();
        assert_matches!(error, Error::InvalidRequest { .. });

        let cluster = create_cluster(
            &opctx,
            &conductor,
            &cluster_params("c1", HighAvailabilityMode::Full),
        )
        .await;
        assert_eq!(cluster.status, ClusterStatus::Insufficient);
        let clusters = conductor.cluster_list(&opctx).await.unwrap();
        assert_eq!(clusters.len(), 1);
        let events = conductor.events_list(&opctx, cluster.id).await.unwrap();
        assert_eq!(events[0].message, "Registered cluster c1");

        let error = conductor
            .events_list(&opctx, ClusterUuid::new_v4())
            .await
            .unwrap_err();
        assert_matches!(error, Error::ObjectNotFound { .. });

        logctx.cleanup_successful();
    }

    #[tokio::test]
    async fn test_cluster_update() {
        let logctx = dev::test_setup_log("test_cluster_update");
        let (opctx, conductor) = conductor_test(&logctx.log);
        let cluster = create_cluster(
            &opctx,
            &conductor,
            &cluster_params("c1", HighAvailabilityMode::Full),
        )
        .await;

        let cluster = conductor
            .cluster_update(
                &opctx,
                cluster.id,
                &params::ClusterUpdate {
                    vip_dhcp_allocation: Some(true),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(cluster.vip_dhcp_allocation);
        assert_eq!(cluster.api_vip, None);
        assert_eq!(cluster.ingress_vip, None);

        let error = conductor
            .cluster_update(
                &opctx,
                cluster.id,
                &params::ClusterUpdate {
                    api_vip: Some(String::from("192.168.126.100")),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert_matches!(error, Error::Conflict { .. });

        let cluster = conductor
            .cluster_update(
                &opctx,
                cluster.id,
                &params::ClusterUpdate {
                    vip_dhcp_allocation: Some(false),
                    api_vip: Some(String::from("192.168.126.100")),
                    ingress_vip: Some(String::from("192.168.126.101")),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(cluster.api_vip.as_deref(), Some("192.168.126.100"));

        let error = conductor
            .cluster_update(
                &opctx,
                cluster.id,
                &params::ClusterUpdate {
                    ingress_vip: Some(String::from("10.0.0.1")),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert_matches!(error, Error::Conflict { ref message } => {
            assert!(
                message.contains("does not belong to machine-network-cidr")
            );
        });

        logctx.cleanup_successful();
    }

    #[tokio::test]
    async fn test_cluster_refresh() {
        let logctx = dev::test_setup_log("test_cluster_refresh");
        let (opctx, conductor) = conductor_test(&logctx.log);
        let (cluster, hosts) = ready_cluster(&opctx, &conductor, "c1").await;
        assert_eq!(cluster.status, ClusterStatus::Ready);
        assert_eq!(hosts.len(), 3);
        assert!(hosts.iter().all(|h| h.status == HostStatus::Known));
        assert!(hosts.iter().all(|h| h.role == HostRole::AutoAssign));
        assert_eq!(cluster.connectivity_majority_groups[0].len(), 3);

        // nothing changed since
        let summary =
            conductor.cluster_refresh(&opctx, cluster.id).await.unwrap();
        assert_eq!(summary.hosts_updated, 0);
        assert!(!summary.cluster_updated);

        logctx.cleanup_successful();
    }
}
