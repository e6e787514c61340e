// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The instruction/reply protocol spoken with agents

use schemars::JsonSchema;
use serde::Deserialize;
use serde::Serialize;
use strum::Display;
use strum::EnumIter;
use strum::EnumString;

/// Exit code the agent uses when it can no longer read its installation
/// media
pub const EXIT_CODE_MEDIA_DISCONNECTED: i64 = 256;

/// Exit code of the container runtime when a container with the requested
/// name already exists
pub const EXIT_CODE_CONTAINER_ALREADY_RUNNING: i64 = 125;

/// Error text the container runtime emits when the installer container from a
/// previous install instruction is still running
pub const INSTALLER_ALREADY_RUNNING_ERROR: &str =
    "the container name \"assisted-installer\" is already in use";

/// Kind of work an instruction asks the agent to do
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
pub enum StepType {
    Inventory,
    ConnectivityCheck,
    ApiVipConnectivityCheck,
    FreeNetworkAddresses,
    DhcpLeaseAllocate,
    NtpSynchronizer,
    ContainerImageAvailability,
    InstallationDiskSpeedCheck,
    DomainResolution,
    Install,
    ResetInstallation,
    StopInstallation,
    LogsGather,
}

impl StepType {
    /// Returns whether a successful reply with empty output must be ignored
    ///
    /// The agent refuses to start a second disk-speed check (or image pull)
    /// while one is already running, and reports that refusal as an empty
    /// success.  Handling it would record a phantom measurement.
    pub fn empty_output_is_noop(&self) -> bool {
        matches!(
            self,
            StepType::InstallationDiskSpeedCheck
                | StepType::ContainerImageAvailability
        )
    }
}

/// One unit of work for the agent
#[derive(Clone, Debug, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
pub struct Step {
    pub step_id: String,
    pub step_type: StepType,
    pub command: String,
    pub args: Vec<String>,
}

/// What the agent should do after running the current instructions
#[derive(
    Clone, Copy, Debug, Deserialize, Eq, JsonSchema, PartialEq, Serialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum PostStepAction {
    Continue,
    Exit,
}

/// Response to a poll: the instructions to run right now
#[derive(Clone, Debug, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
pub struct Steps {
    /// seconds until the agent should poll again
    pub next_instruction_seconds: i64,
    pub post_step_action: PostStepAction,
    pub instructions: Vec<Step>,
}

/// Result of running one instruction, as reported by the agent
#[derive(Clone, Debug, Deserialize, JsonSchema, Serialize)]
pub struct StepReply {
    pub step_id: String,
    /// Kept as a string so that an unknown step type is reported as a bad
    /// request by the dispatcher rather than rejected by body parsing.
    pub step_type: String,
    pub exit_code: i64,
    #[serde(default)]
    pub output: String,
    #[serde(default)]
    pub error: String,
}

/// Command the agent runs to start (or restart) its step runner
#[derive(Clone, Debug, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
pub struct NextStepRunnerCommand {
    pub command: String,
    pub args: Vec<String>,
}
