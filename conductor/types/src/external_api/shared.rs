// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Enumerations shared by the API views, the database model and the state
//! engine
//!
//! Every enum here serializes in kebab-case, and `Display`/`FromStr` (via
//! `strum`) use the same spelling, so the value in a log line is the value on
//! the wire.

use schemars::JsonSchema;
use serde::Deserialize;
use serde::Serialize;
use strum::Display;
use strum::EnumIter;
use strum::EnumString;

/// Lifecycle status of a host
#[derive(
    Clone,
    Copy,
    Debug,
    Deserialize,
    Display,
    EnumIter,
    EnumString,
    Eq,
    Hash,
    JsonSchema,
    Ord,
    PartialEq,
    PartialOrd,
    Serialize,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum HostStatus {
    Discovering,
    Known,
    Insufficient,
    Disconnected,
    PendingForInput,
    Disabled,
    PreparingForInstallation,
    Installing,
    InstallingInProgress,
    Installed,
    Error,
    Resetting,
    Cancelled,
    AddedToExistingCluster,
}

impl HostStatus {
    /// Returns whether a host in this status can be trusted to report the
    /// current set of free addresses on its subnets
    ///
    /// Disconnected hosts report stale data and installing hosts have stopped
    /// probing, so only these two statuses qualify.
    pub fn reports_free_addresses(&self) -> bool {
        matches!(self, HostStatus::Known | HostStatus::Insufficient)
    }

    /// Returns whether the host has started installing (or finished)
    pub fn is_installing(&self) -> bool {
        matches!(
            self,
            HostStatus::PreparingForInstallation
                | HostStatus::Installing
                | HostStatus::InstallingInProgress
                | HostStatus::Installed
        )
    }
}

/// Role of a host in the cluster it belongs to
#[derive(
    Clone,
    Copy,
    Debug,
    Deserialize,
    Display,
    EnumIter,
    EnumString,
    Eq,
    Hash,
    JsonSchema,
    PartialEq,
    Serialize,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum HostRole {
    /// the state engine picks a concrete role before installation
    AutoAssign,
    Master,
    Worker,
}

/// Distinguishes hosts that form a new cluster from hosts added to an
/// existing one
#[derive(
    Clone,
    Copy,
    Debug,
    Deserialize,
    Display,
    EnumString,
    Eq,
    JsonSchema,
    PartialEq,
    Serialize,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum HostKind {
    Host,
    AddToExistingClusterHost,
}

/// Distinguishes clusters being installed from scratch from clusters that
/// already run and only accept additional hosts
#[derive(
    Clone,
    Copy,
    Debug,
    Deserialize,
    Display,
    EnumString,
    Eq,
    JsonSchema,
    PartialEq,
    Serialize,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum ClusterKind {
    Cluster,
    AddHostsCluster,
}

impl ClusterKind {
    /// Hosts registering into a cluster of this kind get this host kind
    pub fn host_kind(&self) -> HostKind {
        match self {
            ClusterKind::Cluster => HostKind::Host,
            ClusterKind::AddHostsCluster => HostKind::AddToExistingClusterHost,
        }
    }
}

/// Lifecycle status of a cluster
#[derive(
    Clone,
    Copy,
    Debug,
    Deserialize,
    Display,
    EnumIter,
    EnumString,
    Eq,
    Hash,
    JsonSchema,
    PartialEq,
    Serialize,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum ClusterStatus {
    Insufficient,
    Ready,
    PendingForInput,
    PreparingForInstallation,
    Installing,
    Finalizing,
    Installed,
    AddingHosts,
    Error,
    Cancelled,
}

/// Whether the control plane is replicated
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    Deserialize,
    Display,
    EnumString,
    Eq,
    JsonSchema,
    PartialEq,
    Serialize,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum HighAvailabilityMode {
    /// three or more masters
    #[default]
    Full,
    /// a single-node cluster
    None,
}

/// Whether the agent can still read its boot media
#[derive(
    Clone,
    Copy,
    Debug,
    Deserialize,
    Display,
    EnumString,
    Eq,
    JsonSchema,
    PartialEq,
    Serialize,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum MediaStatus {
    Connected,
    Disconnected,
}

/// Severity of an audit event
#[derive(
    Clone,
    Copy,
    Debug,
    Deserialize,
    Display,
    EnumString,
    Eq,
    JsonSchema,
    Ord,
    PartialEq,
    PartialOrd,
    Serialize,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum EventSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

/// Installation progress reported for a host
#[derive(
    Clone, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize,
)]
pub struct HostProgress {
    pub current_stage: String,
    pub progress_info: String,
}
