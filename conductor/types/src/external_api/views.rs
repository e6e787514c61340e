// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Views are response bodies, most of which are public lenses onto DB models.

use crate::agent::steps::NextStepRunnerCommand;
use crate::external_api::shared::ClusterKind;
use crate::external_api::shared::ClusterStatus;
use crate::external_api::shared::EventSeverity;
use crate::external_api::shared::HighAvailabilityMode;
use crate::external_api::shared::HostKind;
use crate::external_api::shared::HostProgress;
use crate::external_api::shared::HostRole;
use crate::external_api::shared::HostStatus;
use crate::external_api::shared::MediaStatus;
use chrono::DateTime;
use chrono::Utc;
use foundry_common::typed_uuid::ClusterUuid;
use foundry_common::typed_uuid::EventUuid;
use foundry_common::typed_uuid::HostUuid;
use schemars::JsonSchema;
use serde::Deserialize;
use serde::Serialize;
use uuid::Uuid;

/// An operator's view of a cluster
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
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
    pub vip_dhcp_allocation: bool,
    /// id assigned by the installed platform, known once install starts
    pub platform_cluster_id: Option<Uuid>,
    pub install_started_at: Option<DateTime<Utc>>,
    pub time_created: DateTime<Utc>,
    pub time_modified: DateTime<Utc>,
}

/// An operator's view of a host
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
pub struct Host {
    pub id: HostUuid,
    pub cluster_id: ClusterUuid,
    pub kind: HostKind,
    pub status: HostStatus,
    pub status_info: String,
    pub role: HostRole,
    pub bootstrap: bool,
    pub requested_hostname: String,
    pub discovery_agent_version: String,
    pub media_status: Option<MediaStatus>,
    pub progress: HostProgress,
    pub checked_in_at: DateTime<Utc>,
    /// sanitized inventory reported by the agent
    pub inventory: Option<String>,
    /// sanitized free-address report, one entry per scanned subnet
    pub free_addresses: Option<String>,
    pub ntp_sources: Option<String>,
    pub installer_args: Option<String>,
    pub time_created: DateTime<Utc>,
    pub time_modified: DateTime<Utc>,
}

/// Returned to an agent on successful registration
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
pub struct HostRegistrationResponse {
    #[serde(flatten)]
    pub host: Host,
    pub next_step_runner_command: NextStepRunnerCommand,
}

/// An entry in a cluster's audit history
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
pub struct Event {
    pub id: EventUuid,
    pub cluster_id: ClusterUuid,
    pub host_id: Option<HostUuid>,
    pub severity: EventSeverity,
    pub message: String,
    pub event_time: DateTime<Utc>,
    /// id of the API request that caused the event, if any
    pub request_id: Option<String>,
}
