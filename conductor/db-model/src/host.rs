// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use chrono::DateTime;
use chrono::Utc;
use conductor_types::external_api::shared::HostKind;
use conductor_types::external_api::shared::HostProgress;
use conductor_types::external_api::shared::HostRole;
use conductor_types::external_api::shared::HostStatus;
use conductor_types::external_api::shared::MediaStatus;
use conductor_types::external_api::views;
use foundry_common::typed_uuid::ClusterUuid;
use foundry_common::typed_uuid::HostUuid;
use serde::Deserialize;
use serde::Serialize;

/// Database representation of a host
///
/// A host is identified by the `(cluster_id, id)` pair.  Facts reported by the
/// agent are stored as the sanitized JSON documents produced by the step
/// reply handlers; nothing else in the control plane parses them back except
/// the code that aggregates across hosts.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Host {
    pub id: HostUuid,
    pub cluster_id: ClusterUuid,
    pub kind: HostKind,
    pub status: HostStatus,
    pub status_info: String,
    pub role: HostRole,
    /// set on exactly one master once the cluster install starts
    pub bootstrap: bool,
    pub requested_hostname: String,
    pub discovery_agent_version: String,
    pub media_status: Option<MediaStatus>,
    pub progress: HostProgress,
    pub checked_in_at: DateTime<Utc>,

    pub inventory: Option<String>,
    pub free_addresses: Option<String>,
    pub connectivity: Option<String>,
    pub api_vip_connectivity: Option<String>,
    pub ntp_sources: Option<String>,
    pub images_status: Option<String>,
    pub disks_info: Option<String>,
    pub domain_name_resolutions: Option<String>,
    pub installer_args: Option<String>,
    pub ignition_config_overrides: Option<String>,

    pub time_created: DateTime<Utc>,
    pub time_modified: DateTime<Utc>,
    pub time_deleted: Option<DateTime<Utc>>,
}

impl Host {
    /// Builds the record for a newly-registered host
    ///
    /// The status and role are placeholders: the state engine decides the
    /// real ones as part of registration.
    pub fn new(
        id: HostUuid,
        cluster_id: ClusterUuid,
        kind: HostKind,
        discovery_agent_version: String,
    ) -> Host {
        let now = Utc::now();
        Host {
            id,
            cluster_id,
            kind,
            status: HostStatus::Discovering,
            status_info: String::new(),
            role: HostRole::AutoAssign,
            bootstrap: false,
            requested_hostname: String::new(),
            discovery_agent_version,
            media_status: None,
            progress: HostProgress::default(),
            checked_in_at: now,
            inventory: None,
            free_addresses: None,
            connectivity: None,
            api_vip_connectivity: None,
            ntp_sources: None,
            images_status: None,
            disks_info: None,
            domain_name_resolutions: None,
            installer_args: None,
            ignition_config_overrides: None,
            time_created: now,
            time_modified: now,
            time_deleted: None,
        }
    }

    pub fn is_day2(&self) -> bool {
        self.kind == HostKind::AddToExistingClusterHost
    }

    pub fn is_disabled(&self) -> bool {
        self.status == HostStatus::Disabled
    }

    /// Name used in events and log messages: the reported hostname when we
    /// have one, the host id otherwise
    pub fn display_name(&self) -> String {
        if self.requested_hostname.is_empty() {
            self.id.to_string()
        } else {
            self.requested_hostname.clone()
        }
    }
}

impl From<Host> for views::Host {
    fn from(host: Host) -> Self {
        views::Host {
            id: host.id,
            cluster_id: host.cluster_id,
            kind: host.kind,
            status: host.status,
            status_info: host.status_info,
            role: host.role,
            bootstrap: host.bootstrap,
            requested_hostname: host.requested_hostname,
            discovery_agent_version: host.discovery_agent_version,
            media_status: host.media_status,
            progress: host.progress,
            checked_in_at: host.checked_in_at,
            inventory: host.inventory,
            free_addresses: host.free_addresses,
            ntp_sources: host.ntp_sources,
            installer_args: host.installer_args,
            time_created: host.time_created,
            time_modified: host.time_modified,
        }
    }
}
