// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Builds the instruction for each step type from the current records
//!
//! A builder returns `Ok(None)` when the step has nothing to do for this host
//! right now, which is not an error.

use crate::config::AgentConfig;
use conductor_db_model::Cluster;
use conductor_db_model::Host;
use conductor_types::agent::replies::Disk;
use conductor_types::agent::replies::Inventory;
use conductor_types::agent::requests::ApiVipConnectivityRequest;
use conductor_types::agent::requests::ConnectivityCheckHost;
use conductor_types::agent::requests::ConnectivityCheckNic;
use conductor_types::agent::requests::ConnectivityCheckRequest;
use conductor_types::agent::requests::ContainerImageAvailabilityRequest;
use conductor_types::agent::requests::DhcpAllocationRequest;
use conductor_types::agent::requests::DiskSpeedCheckRequest;
use conductor_types::agent::requests::DomainResolutionRequest;
use conductor_types::agent::requests::DomainResolutionRequestDomain;
use conductor_types::agent::requests::FreeNetworkAddressesRequest;
use conductor_types::agent::requests::InstallRequest;
use conductor_types::agent::requests::InventoryRequest;
use conductor_types::agent::requests::LogsGatherRequest;
use conductor_types::agent::requests::NtpSynchronizerRequest;
use conductor_types::agent::steps::Step;
use conductor_types::agent::steps::StepType;
use foundry_common::address::ipv4_in_network;
use foundry_common::address::parse_ipv4_network;
use foundry_common::api::external::Error;
use ipnetwork::Ipv4Network;
use serde::Serialize;
use std::collections::BTreeSet;
use uuid::Uuid;

/// Seconds the agent may spend pulling each image
const IMAGE_PULL_TIMEOUT_SECS: u64 = 960;

/// Port on which an existing cluster serves node ignition
const MACHINE_CONFIG_SERVER_PORT: u16 = 22624;

/// Prefix of the locally-administered MACs requested for the virtual IPs
const VIP_MAC_PREFIX: &str = "00:1a:4a";

/// Everything a builder may consult
pub(super) struct StepContext<'a> {
    pub agent: &'a AgentConfig,
    pub cluster: &'a Cluster,
    pub host: &'a Host,
    /// every registered host of the cluster, including `host`
    pub hosts: &'a [Host],
}

impl StepContext<'_> {
    pub fn build(&self, step_type: StepType) -> Result<Option<Step>, Error> {
        match step_type {
            StepType::Inventory => self.inventory().map(Some),
            StepType::ConnectivityCheck => self.connectivity_check(),
            StepType::ApiVipConnectivityCheck => {
                self.api_vip_connectivity_check().map(Some)
            }
            StepType::FreeNetworkAddresses => self.free_network_addresses(),
            StepType::DhcpLeaseAllocate => self.dhcp_lease_allocate(),
            StepType::NtpSynchronizer => self.ntp_synchronizer(),
            StepType::ContainerImageAvailability => {
                self.container_image_availability().map(Some)
            }
            StepType::InstallationDiskSpeedCheck => {
                self.disk_speed_check().map(Some)
            }
            StepType::DomainResolution => self.domain_resolution().map(Some),
            StepType::Install => self.install().map(Some),
            StepType::LogsGather => self.logs_gather().map(Some),
            StepType::ResetInstallation | StepType::StopInstallation => {
                Ok(Some(Step {
                    step_id: step_id(step_type),
                    step_type,
                    command: String::new(),
                    args: vec![String::from("{}")],
                }))
            }
        }
    }

    fn inventory(&self) -> Result<Step, Error> {
        step(
            StepType::Inventory,
            &InventoryRequest {
                cluster_id: self.cluster.id,
                host_id: self.host.id,
            },
        )
    }

    fn connectivity_check(&self) -> Result<Option<Step>, Error> {
        let hosts: Vec<ConnectivityCheckHost> = self
            .hosts
            .iter()
            .filter(|h| h.id != self.host.id && !h.is_disabled())
            .filter_map(|h| {
                let inventory = parse_inventory(h)?;
                Some(ConnectivityCheckHost {
                    host_id: h.id,
                    nics: inventory
                        .interfaces
                        .iter()
                        .map(|nic| ConnectivityCheckNic {
                            name: nic.name.clone(),
                            mac: nic.mac_address.clone(),
                            ip_addresses: nic
                                .ipv4_addresses
                                .iter()
                                .chain(nic.ipv6_addresses.iter())
                                .cloned()
                                .collect(),
                        })
                        .collect(),
                })
            })
            .collect();
        if hosts.is_empty() {
            return Ok(None);
        }
        step(StepType::ConnectivityCheck, &ConnectivityCheckRequest { hosts })
            .map(Some)
    }

    fn api_vip_connectivity_check(&self) -> Result<Step, Error> {
        let address = match &self.cluster.api_vip {
            Some(vip) => vip.clone(),
            None => self.api_domain("api"),
        };
        step(
            StepType::ApiVipConnectivityCheck,
            &ApiVipConnectivityRequest {
                url: format!(
                    "http://{}:{}/config/worker",
                    address, MACHINE_CONFIG_SERVER_PORT
                ),
            },
        )
    }

    fn free_network_addresses(&self) -> Result<Option<Step>, Error> {
        let Some(inventory) = parse_inventory(self.host) else {
            return Ok(None);
        };
        let networks: BTreeSet<String> = inventory
            .interfaces
            .iter()
            .flat_map(|nic| nic.ipv4_addresses.iter())
            .filter_map(|cidr| cidr.parse::<Ipv4Network>().ok())
            .filter_map(|a| Ipv4Network::new(a.network(), a.prefix()).ok())
            .map(|net| net.to_string())
            .collect();
        if networks.is_empty() {
            return Ok(None);
        }
        step(
            StepType::FreeNetworkAddresses,
            &FreeNetworkAddressesRequest {
                networks: networks.into_iter().collect(),
            },
        )
        .map(Some)
    }

    fn dhcp_lease_allocate(&self) -> Result<Option<Step>, Error> {
        let cluster = self.cluster;
        if !cluster.vip_dhcp_allocation {
            return Ok(None);
        }
        let Some(cidr) = &cluster.machine_network_cidr else {
            return Ok(None);
        };
        let Some(inventory) = parse_inventory(self.host) else {
            return Ok(None);
        };
        let network = parse_ipv4_network("machine_network_cidr", cidr)?;
        let interface = inventory
            .interfaces
            .iter()
            .find(|nic| {
                nic.ipv4_addresses.iter().any(|addr| {
                    addr.parse::<Ipv4Network>()
                        .is_ok_and(|a| ipv4_in_network(a.ip(), &network))
                })
            })
            .ok_or_else(|| {
                Error::internal_error(&format!(
                    "host {} has no interface on machine network {}",
                    self.host.id, cidr
                ))
            })?;

        let bytes = cluster.id.as_untyped_uuid().as_bytes();
        step(
            StepType::DhcpLeaseAllocate,
            &DhcpAllocationRequest {
                interface: interface.name.clone(),
                api_vip_mac: vip_mac(&bytes[0..3]),
                ingress_vip_mac: vip_mac(&bytes[3..6]),
                api_vip_lease: cluster.api_vip_lease.clone(),
                ingress_vip_lease: cluster.ingress_vip_lease.clone(),
            },
        )
        .map(Some)
    }

    fn ntp_synchronizer(&self) -> Result<Option<Step>, Error> {
        if self.agent.ntp_sources.is_empty() {
            return Ok(None);
        }
        step(
            StepType::NtpSynchronizer,
            &NtpSynchronizerRequest {
                ntp_source: self.agent.ntp_sources.join(","),
            },
        )
        .map(Some)
    }

    fn container_image_availability(&self) -> Result<Step, Error> {
        step(
            StepType::ContainerImageAvailability,
            &ContainerImageAvailabilityRequest {
                images: vec![
                    self.agent.installer_image.clone(),
                    self.agent.controller_image.clone(),
                ],
                timeout: IMAGE_PULL_TIMEOUT_SECS,
            },
        )
    }

    fn disk_speed_check(&self) -> Result<Step, Error> {
        step(
            StepType::InstallationDiskSpeedCheck,
            &DiskSpeedCheckRequest {
                path: self.boot_device()?,
                timeout: self.agent.disk_check_timeout_secs,
            },
        )
    }

    fn domain_resolution(&self) -> Result<Step, Error> {
        step(
            StepType::DomainResolution,
            &DomainResolutionRequest {
                domains: ["api", "api-int"]
                    .iter()
                    .map(|prefix| DomainResolutionRequestDomain {
                        domain_name: self.api_domain(prefix),
                    })
                    .collect(),
            },
        )
    }

    fn install(&self) -> Result<Step, Error> {
        let host = self.host;
        let installer_args = match &host.installer_args {
            None => Vec::new(),
            Some(args) => {
                serde_json::from_str::<Vec<String>>(args).map_err(|e| {
                    Error::internal_error(&format!(
                        "host {} has malformed installer args: {}",
                        host.id, e
                    ))
                })?
            }
        };
        step(
            StepType::Install,
            &InstallRequest {
                cluster_id: self.cluster.id,
                host_id: host.id,
                role: InstallRequest::role_name(host.role, host.bootstrap),
                high_availability_mode: self.cluster.high_availability_mode,
                installer_image: self.agent.installer_image.clone(),
                controller_image: self.agent.controller_image.clone(),
                boot_device: self.boot_device()?,
                installer_args,
                openshift_version: if host.is_day2() {
                    None
                } else {
                    Some(self.cluster.openshift_version.clone())
                },
            },
        )
    }

    fn logs_gather(&self) -> Result<Step, Error> {
        step(
            StepType::LogsGather,
            &LogsGatherRequest {
                cluster_id: self.cluster.id,
                host_id: self.host.id,
                bootstrap: self.host.bootstrap,
                installer_gather: true,
            },
        )
    }

    fn api_domain(&self, prefix: &str) -> String {
        format!(
            "{}.{}.{}",
            prefix, self.cluster.name, self.cluster.base_dns_domain
        )
    }

    /// Returns the device the host will be installed on: its first disk
    /// eligible for installation
    fn boot_device(&self) -> Result<String, Error> {
        parse_inventory(self.host)
            .and_then(|inventory| {
                inventory
                    .disks
                    .iter()
                    .find(|d| d.installation_eligibility.eligible)
                    .map(device_path)
            })
            .ok_or_else(|| {
                Error::internal_error(&format!(
                    "host {} has no disk eligible for installation",
                    self.host.id
                ))
            })
    }
}

fn parse_inventory(host: &Host) -> Option<Inventory> {
    host.inventory.as_deref().and_then(|i| serde_json::from_str(i).ok())
}

fn device_path(disk: &Disk) -> String {
    if disk.by_path.is_empty() {
        format!("/dev/{}", disk.name)
    } else {
        disk.by_path.clone()
    }
}

fn vip_mac(bytes: &[u8]) -> String {
    let mut mac = String::from(VIP_MAC_PREFIX);
    for b in bytes {
        mac.push_str(&format!(":{:02x}", b));
    }
    mac
}

/// Returns a fresh step id: the step type and 8 hex digits
fn step_id(step_type: StepType) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}-{}", step_type, &suffix[..8])
}

fn step<T: Serialize>(step_type: StepType, request: &T) -> Result<Step, Error> {
    Ok(Step {
        step_id: step_id(step_type),
        step_type,
        command: String::new(),
        args: vec![serde_json::to_string(request)?],
    })
}
