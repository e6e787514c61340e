// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Payload schemas carried in the `output` of a step reply
//!
//! Agents are untrusted.  Every payload is decoded into one of these types and
//! encoded again before it is stored, so only the fields declared here ever
//! reach the database.  Missing fields take their defaults, the same leniency
//! the agent expects from the service.

use schemars::JsonSchema;
use serde::Deserialize;
use serde::Serialize;

/// Hardware inventory of a host
#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(default)]
pub struct Inventory {
    pub hostname: String,
    pub bmc_address: String,
    pub cpu: Cpu,
    pub memory: Memory,
    pub disks: Vec<Disk>,
    pub interfaces: Vec<Interface>,
    pub system_vendor: SystemVendor,
    pub timestamp: i64,
}

#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(default)]
pub struct Cpu {
    pub count: i64,
    pub architecture: String,
    pub model_name: String,
    pub frequency: f64,
    pub flags: Vec<String>,
}

#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(default)]
pub struct Memory {
    pub physical_bytes: i64,
    pub usable_bytes: i64,
}

#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(default)]
pub struct Disk {
    pub id: String,
    pub name: String,
    pub drive_type: String,
    pub size_bytes: i64,
    pub by_path: String,
    pub by_id: String,
    pub serial: String,
    pub model: String,
    pub vendor: String,
    pub bootable: bool,
    pub is_installation_media: bool,
    pub installation_eligibility: DiskEligibility,
}

#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(default)]
pub struct DiskEligibility {
    pub eligible: bool,
    pub not_eligible_reasons: Vec<String>,
}

#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(default)]
pub struct Interface {
    pub name: String,
    pub mac_address: String,
    pub ipv4_addresses: Vec<String>,
    pub ipv6_addresses: Vec<String>,
    pub speed_mbps: i64,
    pub mtu: i64,
    pub has_carrier: bool,
}

#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(default)]
pub struct SystemVendor {
    pub manufacturer: String,
    pub product_name: String,
    pub serial_number: String,
    #[serde(rename = "virtual")]
    pub is_virtual: bool,
}

/// Reachability of every other host in the cluster, as seen from one host
#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(default)]
pub struct ConnectivityReport {
    pub remote_hosts: Vec<ConnectivityRemoteHost>,
}

#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(default)]
pub struct ConnectivityRemoteHost {
    pub host_id: String,
    pub l2_connectivity: Vec<L2Connectivity>,
    pub l3_connectivity: Vec<L3Connectivity>,
}

#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(default)]
pub struct L2Connectivity {
    pub outgoing_ip_address: String,
    pub outgoing_nic: String,
    pub remote_ip_address: String,
    pub remote_mac: String,
    pub successful: bool,
}

#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(default)]
pub struct L3Connectivity {
    pub outgoing_nic: String,
    pub remote_ip_address: String,
    pub successful: bool,
    pub average_rtt_ms: f64,
    pub packet_loss_percentage: f64,
}

/// Whether a day-2 host can reach the existing cluster's API VIP
#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(default)]
pub struct ApiVipConnectivityResponse {
    pub is_success: bool,
    pub url: String,
}

/// Free addresses observed by one host on one of its subnets
#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(default)]
pub struct FreeNetworkAddresses {
    /// subnet CIDR that was scanned
    pub network: String,
    pub free_addresses: Vec<String>,
}

/// One entry per scanned subnet
pub type FreeNetworksAddresses = Vec<FreeNetworkAddresses>;

/// VIPs the agent obtained from the DHCP server, with the lease text to renew
/// them
#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(default)]
pub struct DhcpAllocationResponse {
    pub api_vip_address: String,
    pub ingress_vip_address: String,
    pub api_vip_lease: String,
    pub ingress_vip_lease: String,
}

#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(default)]
pub struct NtpSynchronizationResponse {
    pub ntp_sources: Vec<NtpSource>,
}

#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(default)]
pub struct NtpSource {
    pub source_name: String,
    pub source_state: String,
}

#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(default)]
pub struct ContainerImageAvailabilityResponse {
    pub images: Vec<ContainerImageAvailability>,
}

#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(default)]
pub struct ContainerImageAvailability {
    pub name: String,
    pub result: ContainerImageAvailabilityResult,
    pub size_bytes: f64,
    pub time: f64,
    pub download_rate: f64,
}

#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    Deserialize,
    Eq,
    JsonSchema,
    PartialEq,
    Serialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ContainerImageAvailabilityResult {
    Success,
    #[default]
    Failure,
}

#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(default)]
pub struct DiskSpeedCheckResponse {
    /// 99th percentile of fdatasync duration, in milliseconds
    pub io_sync_duration: i64,
    /// device path of the measured disk
    pub path: String,
}

#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(default)]
pub struct DomainResolutionResponse {
    pub resolutions: Vec<DomainResolution>,
}

#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(default)]
pub struct DomainResolution {
    pub domain_name: String,
    pub ipv4_addresses: Vec<String>,
    pub ipv6_addresses: Vec<String>,
}

/// Disk facts the service accumulates per device path
#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
pub struct DiskInfo {
    pub disk_speed: DiskSpeed,
}

#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
pub struct DiskSpeed {
    pub tested: bool,
    pub exit_code: i64,
    /// absent when the check failed before producing a measurement
    pub speed_ms: Option<i64>,
}
