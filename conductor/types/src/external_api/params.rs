// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Params define the request bodies and path/query parameters of API
//! endpoints.

use crate::external_api::shared::ClusterKind;
use crate::external_api::shared::HighAvailabilityMode;
use foundry_common::typed_uuid::ClusterUuid;
use foundry_common::typed_uuid::HostUuid;
use schemars::JsonSchema;
use serde::Deserialize;
use serde::Serialize;
use std::num::NonZeroU32;

#[derive(Deserialize, JsonSchema)]
pub struct ClusterPath {
    pub cluster_id: ClusterUuid,
}

#[derive(Deserialize, JsonSchema)]
pub struct HostPath {
    pub cluster_id: ClusterUuid,
    pub host_id: HostUuid,
}

/// Create-time parameters for a cluster
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
pub struct ClusterCreate {
    pub name: String,
    pub base_dns_domain: String,
    pub openshift_version: String,
    #[serde(default = "default_cluster_kind")]
    pub kind: ClusterKind,
    #[serde(default)]
    pub high_availability_mode: HighAvailabilityMode,
    pub cluster_network_cidr: Option<String>,
    pub service_network_cidr: Option<String>,
    pub machine_network_cidr: Option<String>,
    pub api_vip: Option<String>,
    pub ingress_vip: Option<String>,
    #[serde(default)]
    pub vip_dhcp_allocation: bool,
}

fn default_cluster_kind() -> ClusterKind {
    ClusterKind::Cluster
}

/// Updateable properties of a cluster
///
/// Absent fields are left unchanged.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
pub struct ClusterUpdate {
    pub name: Option<String>,
    pub machine_network_cidr: Option<String>,
    pub api_vip: Option<String>,
    pub ingress_vip: Option<String>,
    pub vip_dhcp_allocation: Option<bool>,
}

/// Body sent by an agent when it first contacts the service
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
pub struct HostCreate {
    pub host_id: HostUuid,
    /// image (or bare tag) of the agent that is registering
    pub discovery_agent_version: String,
}

#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
pub struct FreeAddressesQuery {
    /// subnet CIDR to report on
    pub network: String,
    /// only return addresses whose textual form starts with this prefix
    pub prefix: Option<String>,
    /// return at most this many addresses
    pub limit: Option<NonZeroU32>,
}
