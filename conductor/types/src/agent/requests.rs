// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Request payloads carried in the `args` of a step
//!
//! Each instruction carries exactly one argument: the JSON encoding of the
//! request for its step type.

use crate::external_api::shared::HighAvailabilityMode;
use crate::external_api::shared::HostRole;
use foundry_common::typed_uuid::ClusterUuid;
use foundry_common::typed_uuid::HostUuid;
use schemars::JsonSchema;
use serde::Deserialize;
use serde::Serialize;

#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
pub struct InventoryRequest {
    pub cluster_id: ClusterUuid,
    pub host_id: HostUuid,
}

/// Peers the host should check, with the interfaces they reported
#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
pub struct ConnectivityCheckRequest {
    pub hosts: Vec<ConnectivityCheckHost>,
}

#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
pub struct ConnectivityCheckHost {
    pub host_id: HostUuid,
    pub nics: Vec<ConnectivityCheckNic>,
}

#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
pub struct ConnectivityCheckNic {
    pub name: String,
    pub mac: String,
    pub ip_addresses: Vec<String>,
}

#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
pub struct ApiVipConnectivityRequest {
    /// URL of the worker ignition served by the existing cluster
    pub url: String,
}

#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
pub struct FreeNetworkAddressesRequest {
    /// subnets (CIDR) to scan for free addresses
    pub networks: Vec<String>,
}

#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
pub struct DhcpAllocationRequest {
    /// interface on the machine network that should request the leases
    pub interface: String,
    pub api_vip_mac: String,
    pub ingress_vip_mac: String,
    /// leases obtained earlier, so that the same addresses are renewed
    pub api_vip_lease: Option<String>,
    pub ingress_vip_lease: Option<String>,
}

#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
pub struct NtpSynchronizerRequest {
    /// comma-separated NTP sources to add to the host's chrony configuration
    pub ntp_source: String,
}

#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
pub struct ContainerImageAvailabilityRequest {
    pub images: Vec<String>,
    /// seconds allowed for pulling each image
    pub timeout: u64,
}

#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
pub struct DiskSpeedCheckRequest {
    pub path: String,
    /// seconds allowed for the measurement
    pub timeout: u64,
}

#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
pub struct DomainResolutionRequest {
    pub domains: Vec<DomainResolutionRequestDomain>,
}

#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
pub struct DomainResolutionRequestDomain {
    pub domain_name: String,
}

#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
pub struct InstallRequest {
    pub cluster_id: ClusterUuid,
    pub host_id: HostUuid,
    /// `bootstrap` for the bootstrap master, the host's role otherwise
    pub role: String,
    pub high_availability_mode: HighAvailabilityMode,
    pub installer_image: String,
    pub controller_image: String,
    pub boot_device: String,
    pub installer_args: Vec<String>,
    /// absent for hosts joining an existing cluster
    pub openshift_version: Option<String>,
}

impl InstallRequest {
    pub fn role_name(role: HostRole, bootstrap: bool) -> String {
        if bootstrap {
            String::from("bootstrap")
        } else {
            role.to_string()
        }
    }
}

#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
pub struct LogsGatherRequest {
    pub cluster_id: ClusterUuid,
    pub host_id: HostUuid,
    pub bootstrap: bool,
    /// also collect the installer's own logs
    pub installer_gather: bool,
}
