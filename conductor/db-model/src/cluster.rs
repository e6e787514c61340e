// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use chrono::DateTime;
use chrono::Utc;
use conductor_types::external_api::params;
use conductor_types::external_api::shared::ClusterKind;
use conductor_types::external_api::shared::ClusterStatus;
use conductor_types::external_api::shared::HighAvailabilityMode;
use conductor_types::external_api::views;
use foundry_common::typed_uuid::ClusterUuid;
use foundry_common::typed_uuid::HostUuid;
use serde::Deserialize;
use serde::Serialize;
use uuid::Uuid;

/// Database representation of a cluster
///
/// Hosts are not embedded; they are keyed by `cluster_id` in their own table.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Cluster {
    pub id: ClusterUuid,
    pub name: String,
    pub kind: ClusterKind,
    pub status: ClusterStatus,
    pub status_info: String,
    pub high_availability_mode: HighAvailabilityMode,
    pub base_dns_domain: String,
    pub openshift_version: String,

    pub cluster_network_cidr: Option<String>,
    pub service_network_cidr: Option<String>,
    pub machine_network_cidr: Option<String>,
    pub api_vip: Option<String>,
    pub ingress_vip: Option<String>,
    pub api_vip_lease: Option<String>,
    pub ingress_vip_lease: Option<String>,
    pub vip_dhcp_allocation: bool,

    /// hosts grouped by mutual reachability, most populous group first
    pub connectivity_majority_groups: Vec<Vec<HostUuid>>,
    pub platform_cluster_id: Option<Uuid>,
    pub install_started_at: Option<DateTime<Utc>>,

    pub time_created: DateTime<Utc>,
    pub time_modified: DateTime<Utc>,
}

impl Cluster {
    pub fn from_create(params: &params::ClusterCreate) -> Cluster {
        let now = Utc::now();
        let status = match params.kind {
            ClusterKind::Cluster => ClusterStatus::Insufficient,
            ClusterKind::AddHostsCluster => ClusterStatus::AddingHosts,
        };
        Cluster {
            id: ClusterUuid::new_v4(),
            name: params.name.clone(),
            kind: params.kind,
            status,
            status_info: String::from("cluster created"),
            high_availability_mode: params.high_availability_mode,
            base_dns_domain: params.base_dns_domain.clone(),
            openshift_version: params.openshift_version.clone(),
            cluster_network_cidr: params.cluster_network_cidr.clone(),
            service_network_cidr: params.service_network_cidr.clone(),
            machine_network_cidr: params.machine_network_cidr.clone(),
            api_vip: params.api_vip.clone(),
            ingress_vip: params.ingress_vip.clone(),
            api_vip_lease: None,
            ingress_vip_lease: None,
            vip_dhcp_allocation: params.vip_dhcp_allocation,
            connectivity_majority_groups: Vec::new(),
            platform_cluster_id: None,
            install_started_at: None,
            time_created: now,
            time_modified: now,
        }
    }

    pub fn is_single_node(&self) -> bool {
        self.high_availability_mode == HighAvailabilityMode::None
    }

    pub fn is_day2(&self) -> bool {
        self.kind == ClusterKind::AddHostsCluster
    }
}

impl From<Cluster> for views::Cluster {
    fn from(cluster: Cluster) -> Self {
        views::Cluster {
            id: cluster.id,
            name: cluster.name,
            kind: cluster.kind,
            status: cluster.status,
            status_info: cluster.status_info,
            high_availability_mode: cluster.high_availability_mode,
            base_dns_domain: cluster.base_dns_domain,
            openshift_version: cluster.openshift_version,
            cluster_network_cidr: cluster.cluster_network_cidr,
            service_network_cidr: cluster.service_network_cidr,
            machine_network_cidr: cluster.machine_network_cidr,
            api_vip: cluster.api_vip,
            ingress_vip: cluster.ingress_vip,
            vip_dhcp_allocation: cluster.vip_dhcp_allocation,
            platform_cluster_id: cluster.platform_cluster_id,
            install_started_at: cluster.install_started_at,
            time_created: cluster.time_created,
            time_modified: cluster.time_modified,
        }
    }
}
