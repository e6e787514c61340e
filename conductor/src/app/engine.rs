// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Host and cluster state engine
//!
//! The engine decides *what* a host or cluster status should become; it never
//! touches the datastore.  Callers hold the relevant rows (usually under
//! [`Locking::ForUpdate`](conductor_db_queries::db::Locking)), ask the engine
//! for a decision, and stage the result in their transaction through the
//! helpers in [`super::refresh`].  Keeping decisions pure means the same rules
//! apply whether a status change comes from an API call, a step reply or the
//! host monitor.

use chrono::Utc;
use conductor_db_model::Cluster;
use conductor_db_model::Host;
use conductor_types::agent::replies::Inventory;
use conductor_types::external_api::shared::ClusterKind;
use conductor_types::external_api::shared::ClusterStatus;
use conductor_types::external_api::shared::HostRole;
use conductor_types::external_api::shared::HostStatus;
use foundry_common::address::ipv4_in_network;
use foundry_common::address::parse_ipv4_network;
use foundry_common::api::external::Error;
use foundry_common::typed_uuid::HostUuid;
use ipnetwork::Ipv4Network;
use std::time::Duration;

/// Stage name agents report while the host reboots into the installed system
pub const HOST_STAGE_REBOOTING: &str = "Rebooting";

const GIB: i64 = 1 << 30;

/// A decided status, with the human-readable explanation stored next to it
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StatusUpdate<S> {
    pub status: S,
    pub status_info: String,
}

impl<S> StatusUpdate<S> {
    pub fn new(status: S, status_info: impl Into<String>) -> Self {
        StatusUpdate { status, status_info: status_info.into() }
    }
}

/// Operator- or protocol-driven changes to a cluster's lifecycle
#[derive(Clone, Debug)]
pub enum ClusterTransition {
    PrepareForInstallation,
    PreInstallSucceeded,
    PreInstallFailed(String),
    Cancel,
    Reset,
}

/// Operator- or protocol-driven changes to a host's lifecycle
#[derive(Clone, Debug)]
pub enum HostTransition {
    Enable,
    Disable,
    PrepareForInstallation,
    Install,
    /// the installation (or its preparation) failed for the given reason
    Fail(String),
    Cancel,
    Reset,
}

/// Decisions the orchestration layer delegates
///
/// Every method is a pure function of the records passed in.  Methods that
/// can refuse return [`Error::Conflict`] (or [`Error::Forbidden`], where the
/// caller must not retry) with a message suitable for an audit event.
pub trait StateEngine: Send + Sync {
    /// Decides whether a host that has never registered may join `cluster`
    fn accept_registration(&self, cluster: &Cluster) -> Result<(), Error>;

    /// Decides the status of a host that registers again
    fn reregister(
        &self,
        host: &Host,
    ) -> Result<StatusUpdate<HostStatus>, Error>;

    /// Picks a concrete role for a host still in `auto-assign`
    ///
    /// `hosts` are the cluster's hosts with any roles assigned so far in the
    /// same pass.  Returns `None` when the host keeps its role.
    fn auto_assign_role(
        &self,
        cluster: &Cluster,
        host: &Host,
        hosts: &[Host],
    ) -> Option<HostRole>;

    /// Recomputes a host's status from its reported facts
    fn refresh_host(
        &self,
        cluster: &Cluster,
        host: &Host,
        hosts: &[Host],
    ) -> Option<StatusUpdate<HostStatus>>;

    /// Recomputes a cluster's status from its configuration and its hosts
    fn refresh_cluster(
        &self,
        cluster: &Cluster,
        hosts: &[Host],
    ) -> Option<StatusUpdate<ClusterStatus>>;

    /// Returns the reason the cluster cannot be installed yet, if any
    fn is_ready_for_installation(
        &self,
        cluster: &Cluster,
        hosts: &[Host],
    ) -> Result<(), String>;

    /// Picks the bootstrap host among `hosts`
    fn select_bootstrap(&self, hosts: &[Host]) -> Option<HostUuid>;

    fn cluster_transition(
        &self,
        cluster: &Cluster,
        transition: &ClusterTransition,
    ) -> Result<StatusUpdate<ClusterStatus>, Error>;

    fn host_transition(
        &self,
        host: &Host,
        transition: &HostTransition,
    ) -> Result<StatusUpdate<HostStatus>, Error>;
}

/// Minimal hardware requirements of a role
struct Requirements {
    cpu_cores: i64,
    memory_bytes: i64,
}

const MASTER_REQUIREMENTS: Requirements =
    Requirements { cpu_cores: 4, memory_bytes: 16 * GIB };
const WORKER_REQUIREMENTS: Requirements =
    Requirements { cpu_cores: 2, memory_bytes: 8 * GIB };
const SINGLE_NODE_REQUIREMENTS: Requirements =
    Requirements { cpu_cores: 8, memory_bytes: 32 * GIB };

/// Number of masters in a highly-available control plane
const HA_MASTER_COUNT: usize = 3;

/// Rule-based engine shipped with the conductor
pub struct DefaultStateEngine {
    disconnect_timeout: Duration,
}

impl DefaultStateEngine {
    pub fn new(disconnect_timeout: Duration) -> DefaultStateEngine {
        DefaultStateEngine { disconnect_timeout }
    }

    fn is_disconnected(&self, host: &Host) -> bool {
        let elapsed = Utc::now().signed_duration_since(host.checked_in_at);
        elapsed.to_std().map_or(false, |e| e > self.disconnect_timeout)
    }

    /// Returns every validation the host currently fails
    fn host_failures(
        &self,
        cluster: &Cluster,
        host: &Host,
        inventory: &Inventory,
        hosts: &[Host],
    ) -> Vec<String> {
        let mut failures = Vec::new();

        let requirements = if cluster.is_single_node() {
            &SINGLE_NODE_REQUIREMENTS
        } else if host.role == HostRole::Master {
            &MASTER_REQUIREMENTS
        } else {
            &WORKER_REQUIREMENTS
        };
        if inventory.cpu.count < requirements.cpu_cores {
            failures.push(format!(
                "Insufficient CPU cores, expected {} got {}",
                requirements.cpu_cores, inventory.cpu.count
            ));
        }
        if inventory.memory.physical_bytes < requirements.memory_bytes {
            failures.push(format!(
                "Insufficient RAM, expected {} GiB got {} GiB",
                requirements.memory_bytes / GIB,
                inventory.memory.physical_bytes / GIB
            ));
        }
        if !inventory.disks.iter().any(|d| d.installation_eligibility.eligible)
        {
            failures.push(String::from(
                "No eligible disks were found, please check specific disks \
                 to see why they are not eligible",
            ));
        }
        let hostname = inventory.hostname.as_str();
        if hostname.is_empty() || hostname == "localhost" {
            failures.push(format!("Hostname {:?} is forbidden", hostname));
        }

        if let Some(cidr) = &cluster.machine_network_cidr {
            match parse_ipv4_network("machine_network_cidr", cidr) {
                Ok(network) if !has_address_in(inventory, &network) => {
                    failures.push(format!(
                        "Host does not belong to machine network CIDR {}",
                        cidr
                    ));
                }
                Ok(_) => (),
                Err(_) => failures.push(format!(
                    "Machine network CIDR {} is not valid",
                    cidr
                )),
            }
        }

        let peers = hosts.iter().filter(|h| !h.is_disabled()).count();
        if !cluster.is_day2() && peers > 1 {
            let in_majority = cluster
                .connectivity_majority_groups
                .first()
                .is_some_and(|group| {
                    group.len() > 1 && group.contains(&host.id)
                });
            if !in_majority {
                failures.push(String::from(
                    "No connectivity to the majority of hosts in the cluster",
                ));
            }
        }

        failures
    }
}

fn has_address_in(inventory: &Inventory, network: &Ipv4Network) -> bool {
    inventory
        .interfaces
        .iter()
        .flat_map(|i| i.ipv4_addresses.iter())
        .filter_map(|a| a.parse::<Ipv4Network>().ok())
        .any(|a| ipv4_in_network(a.ip(), network))
}

fn is_discovery_status(status: HostStatus) -> bool {
    matches!(
        status,
        HostStatus::Discovering
            | HostStatus::Known
            | HostStatus::Insufficient
            | HostStatus::Disconnected
            | HostStatus::PendingForInput
    )
}

fn host_conflict(host: &Host, action: &str) -> Error {
    Error::conflict(&format!(
        "Host {} is in {} state, cannot {}",
        host.display_name(),
        host.status,
        action
    ))
}

fn cluster_conflict(
    cluster: &Cluster,
    action: &str,
    allowed: &[ClusterStatus],
) -> Error {
    let allowed: Vec<String> = allowed.iter().map(|s| s.to_string()).collect();
    Error::conflict(&format!(
        "Cluster {} is in {} state, {} can be done only in one of [{}]",
        cluster.id,
        cluster.status,
        action,
        allowed.join(", ")
    ))
}

const STATUS_INFO_DISCOVERING: &str =
    "Waiting for host to send hardware details";

impl StateEngine for DefaultStateEngine {
    fn accept_registration(&self, cluster: &Cluster) -> Result<(), Error> {
        const ALLOWED: [ClusterStatus; 4] = [
            ClusterStatus::Insufficient,
            ClusterStatus::Ready,
            ClusterStatus::PendingForInput,
            ClusterStatus::AddingHosts,
        ];
        if ALLOWED.contains(&cluster.status) {
            return Ok(());
        }
        if cluster.status == ClusterStatus::Installed {
            return Err(Error::forbidden(
                "Cannot add hosts to an existing cluster using the original \
                 Discovery ISO.",
            ));
        }
        let allowed: Vec<String> =
            ALLOWED.iter().map(|s| s.to_string()).collect();
        Err(Error::conflict(&format!(
            "Host can register only in one of the following states: [{}]",
            allowed.join(", ")
        )))
    }

    fn reregister(
        &self,
        host: &Host,
    ) -> Result<StatusUpdate<HostStatus>, Error> {
        match host.status {
            HostStatus::Installing | HostStatus::InstallingInProgress => {
                if host.progress.current_stage == HOST_STAGE_REBOOTING {
                    Err(Error::forbidden(
                        "Host is required to be booted from disk",
                    ))
                } else {
                    Ok(StatusUpdate::new(
                        HostStatus::Error,
                        "The host unexpectedly restarted during the \
                         installation",
                    ))
                }
            }
            HostStatus::Installed | HostStatus::AddedToExistingCluster => {
                Err(Error::forbidden("Host is required to be booted from disk"))
            }
            HostStatus::Disabled => Ok(StatusUpdate::new(
                HostStatus::Disabled,
                host.status_info.clone(),
            )),
            _ => Ok(StatusUpdate::new(
                HostStatus::Discovering,
                STATUS_INFO_DISCOVERING,
            )),
        }
    }

    fn auto_assign_role(
        &self,
        cluster: &Cluster,
        host: &Host,
        hosts: &[Host],
    ) -> Option<HostRole> {
        if host.role != HostRole::AutoAssign || host.is_disabled() {
            return None;
        }
        if cluster.is_single_node() {
            return Some(HostRole::Master);
        }
        if cluster.is_day2() {
            return Some(HostRole::Worker);
        }
        let masters = hosts
            .iter()
            .filter(|h| !h.is_disabled() && h.role == HostRole::Master)
            .count();
        if masters < HA_MASTER_COUNT {
            Some(HostRole::Master)
        } else {
            Some(HostRole::Worker)
        }
    }

    fn refresh_host(
        &self,
        cluster: &Cluster,
        host: &Host,
        hosts: &[Host],
    ) -> Option<StatusUpdate<HostStatus>> {
        if !is_discovery_status(host.status) {
            return None;
        }

        let update = if self.is_disconnected(host) {
            StatusUpdate::new(
                HostStatus::Disconnected,
                "Host has stopped communicating with the installation service",
            )
        } else {
            let inventory = host
                .inventory
                .as_deref()
                .and_then(|i| serde_json::from_str::<Inventory>(i).ok());
            match inventory {
                None => StatusUpdate::new(
                    HostStatus::Discovering,
                    STATUS_INFO_DISCOVERING,
                ),
                Some(_) if !cluster.is_day2()
                    && cluster.machine_network_cidr.is_none() =>
                {
                    StatusUpdate::new(
                        HostStatus::PendingForInput,
                        "Waiting for user input: machine network CIDR is \
                         not set",
                    )
                }
                Some(inventory) => {
                    let failures =
                        self.host_failures(cluster, host, &inventory, hosts);
                    if failures.is_empty() {
                        StatusUpdate::new(
                            HostStatus::Known,
                            "Host is ready to be installed",
                        )
                    } else {
                        StatusUpdate::new(
                            HostStatus::Insufficient,
                            format!(
                                "Host cannot be installed due to following \
                                 failing validation(s): {}",
                                failures.join(" ; ")
                            ),
                        )
                    }
                }
            }
        };

        if update.status == host.status
            && update.status_info == host.status_info
        {
            None
        } else {
            Some(update)
        }
    }

    fn refresh_cluster(
        &self,
        cluster: &Cluster,
        hosts: &[Host],
    ) -> Option<StatusUpdate<ClusterStatus>> {
        if cluster.kind == ClusterKind::AddHostsCluster
            || !matches!(
                cluster.status,
                ClusterStatus::Insufficient
                    | ClusterStatus::Ready
                    | ClusterStatus::PendingForInput
            )
        {
            return None;
        }

        let mut missing = Vec::new();
        if cluster.machine_network_cidr.is_none() {
            missing.push("machine network CIDR");
        }
        if !cluster.vip_dhcp_allocation {
            if cluster.api_vip.is_none() {
                missing.push("API VIP");
            }
            if cluster.ingress_vip.is_none() {
                missing.push("Ingress VIP");
            }
        }

        let enabled: Vec<&Host> =
            hosts.iter().filter(|h| !h.is_disabled()).collect();
        let expected =
            if cluster.is_single_node() { 1 } else { HA_MASTER_COUNT };

        let update = if !missing.is_empty() {
            StatusUpdate::new(
                ClusterStatus::PendingForInput,
                format!("User input required: {} not set", missing.join(", ")),
            )
        } else if cluster.vip_dhcp_allocation
            && (cluster.api_vip.is_none() || cluster.ingress_vip.is_none())
        {
            StatusUpdate::new(
                ClusterStatus::Insufficient,
                "Waiting for the virtual IPs to be allocated by DHCP",
            )
        } else if cluster.is_single_node() && enabled.len() != 1 {
            StatusUpdate::new(
                ClusterStatus::Insufficient,
                format!(
                    "Single-node clusters must have exactly one host, found {}",
                    enabled.len()
                ),
            )
        } else if enabled.len() < expected {
            StatusUpdate::new(
                ClusterStatus::Insufficient,
                format!(
                    "Cluster requires at least {} hosts, found {}",
                    expected,
                    enabled.len()
                ),
            )
        } else if let Some(h) =
            enabled.iter().find(|h| h.status != HostStatus::Known)
        {
            StatusUpdate::new(
                ClusterStatus::Insufficient,
                format!(
                    "Cluster is not ready yet: host {} is {}",
                    h.display_name(),
                    h.status
                ),
            )
        } else {
            StatusUpdate::new(
                ClusterStatus::Ready,
                "Cluster ready to be installed",
            )
        };

        if update.status == cluster.status
            && update.status_info == cluster.status_info
        {
            None
        } else {
            Some(update)
        }
    }

    fn is_ready_for_installation(
        &self,
        cluster: &Cluster,
        hosts: &[Host],
    ) -> Result<(), String> {
        if cluster.status != ClusterStatus::Ready {
            return Err(format!(
                "cluster is in {} state: {}",
                cluster.status, cluster.status_info
            ));
        }
        let masters = hosts
            .iter()
            .filter(|h| !h.is_disabled() && h.role == HostRole::Master)
            .count();
        let expected =
            if cluster.is_single_node() { 1 } else { HA_MASTER_COUNT };
        if masters != expected {
            return Err(format!(
                "expected {} master(s) but found {}",
                expected, masters
            ));
        }
        Ok(())
    }

    fn select_bootstrap(&self, hosts: &[Host]) -> Option<HostUuid> {
        let mut masters: Vec<&Host> = hosts
            .iter()
            .filter(|h| !h.is_disabled() && h.role == HostRole::Master)
            .collect();
        masters.sort_by_key(|h| h.id);
        masters.last().map(|h| h.id)
    }

    fn cluster_transition(
        &self,
        cluster: &Cluster,
        transition: &ClusterTransition,
    ) -> Result<StatusUpdate<ClusterStatus>, Error> {
        match transition {
            ClusterTransition::PrepareForInstallation => {
                const ALLOWED: [ClusterStatus; 1] = [ClusterStatus::Ready];
                if !ALLOWED.contains(&cluster.status) {
                    return Err(cluster_conflict(cluster, "install", &ALLOWED));
                }
                Ok(StatusUpdate::new(
                    ClusterStatus::PreparingForInstallation,
                    "Preparing cluster for installation",
                ))
            }
            ClusterTransition::PreInstallSucceeded => {
                const ALLOWED: [ClusterStatus; 1] =
                    [ClusterStatus::PreparingForInstallation];
                if !ALLOWED.contains(&cluster.status) {
                    return Err(cluster_conflict(
                        cluster,
                        "start installation",
                        &ALLOWED,
                    ));
                }
                Ok(StatusUpdate::new(
                    ClusterStatus::Installing,
                    "Installation in progress",
                ))
            }
            ClusterTransition::PreInstallFailed(reason) => {
                const ALLOWED: [ClusterStatus; 1] =
                    [ClusterStatus::PreparingForInstallation];
                if !ALLOWED.contains(&cluster.status) {
                    return Err(cluster_conflict(
                        cluster,
                        "fail installation preparation",
                        &ALLOWED,
                    ));
                }
                Ok(StatusUpdate::new(
                    ClusterStatus::Error,
                    format!(
                        "Failed to prepare the installation due to an \
                         unexpected error: {}",
                        reason
                    ),
                ))
            }
            ClusterTransition::Cancel => {
                const ALLOWED: [ClusterStatus; 4] = [
                    ClusterStatus::PreparingForInstallation,
                    ClusterStatus::Installing,
                    ClusterStatus::Finalizing,
                    ClusterStatus::Error,
                ];
                if !ALLOWED.contains(&cluster.status) {
                    return Err(cluster_conflict(cluster, "cancel", &ALLOWED));
                }
                Ok(StatusUpdate::new(
                    ClusterStatus::Cancelled,
                    "Canceled cluster installation",
                ))
            }
            ClusterTransition::Reset => {
                const ALLOWED: [ClusterStatus; 5] = [
                    ClusterStatus::PreparingForInstallation,
                    ClusterStatus::Installing,
                    ClusterStatus::Finalizing,
                    ClusterStatus::Error,
                    ClusterStatus::Cancelled,
                ];
                if !ALLOWED.contains(&cluster.status) {
                    return Err(cluster_conflict(cluster, "reset", &ALLOWED));
                }
                Ok(StatusUpdate::new(
                    ClusterStatus::Insufficient,
                    "Reset cluster installation",
                ))
            }
        }
    }

    fn host_transition(
        &self,
        host: &Host,
        transition: &HostTransition,
    ) -> Result<StatusUpdate<HostStatus>, Error> {
        match transition {
            HostTransition::Enable => {
                if host.status != HostStatus::Disabled {
                    return Err(host_conflict(host, "enable host"));
                }
                Ok(StatusUpdate::new(
                    HostStatus::Discovering,
                    STATUS_INFO_DISCOVERING,
                ))
            }
            HostTransition::Disable => {
                if !is_discovery_status(host.status) {
                    return Err(host_conflict(host, "disable host"));
                }
                Ok(StatusUpdate::new(HostStatus::Disabled, "Host is disabled"))
            }
            HostTransition::PrepareForInstallation => {
                if host.status != HostStatus::Known {
                    return Err(host_conflict(host, "prepare for installation"));
                }
                Ok(StatusUpdate::new(
                    HostStatus::PreparingForInstallation,
                    "Host is preparing for installation",
                ))
            }
            HostTransition::Install => {
                let ready = if host.is_day2() {
                    HostStatus::Known
                } else {
                    HostStatus::PreparingForInstallation
                };
                if host.status != ready {
                    return Err(host_conflict(host, "start installation"));
                }
                Ok(StatusUpdate::new(
                    HostStatus::Installing,
                    "Installation is in progress",
                ))
            }
            HostTransition::Fail(reason) => {
                if !matches!(
                    host.status,
                    HostStatus::PreparingForInstallation
                        | HostStatus::Installing
                        | HostStatus::InstallingInProgress
                ) {
                    return Err(host_conflict(host, "fail installation"));
                }
                Ok(StatusUpdate::new(
                    HostStatus::Error,
                    format!("installation failed: {}", reason),
                ))
            }
            HostTransition::Cancel => {
                if !matches!(
                    host.status,
                    HostStatus::PreparingForInstallation
                        | HostStatus::Installing
                        | HostStatus::InstallingInProgress
                        | HostStatus::Error
                        | HostStatus::Cancelled
                ) {
                    return Err(host_conflict(host, "cancel installation"));
                }
                Ok(StatusUpdate::new(
                    HostStatus::Cancelled,
                    "Installation cancelled by user",
                ))
            }
            HostTransition::Reset => {
                if host.status == HostStatus::AddedToExistingCluster {
                    return Err(host_conflict(host, "reset installation"));
                }
                Ok(StatusUpdate::new(
                    HostStatus::Resetting,
                    "Resetting installation, reboot the host from the \
                     discovery ISO",
                ))
            }
        }
    }
}
