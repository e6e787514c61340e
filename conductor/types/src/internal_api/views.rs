// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Views of the conductor's own machinery, for operators and debugging

use chrono::DateTime;
use chrono::Utc;
use schemars::JsonSchema;
use serde::Serialize;
use std::time::Duration;

/// One background task, as listed by `/bgtasks`
#[derive(Clone, Debug, Serialize, JsonSchema)]
pub struct BackgroundTask {
    pub name: String,
    pub description: String,
    /// delay between the end of one periodic activation and the next
    pub period: Duration,
    /// the activation in flight, if any
    pub running: Option<Activation>,
    /// the latest activation that finished
    pub last_completed: Option<CompletedActivation>,
}

/// What woke a background task up
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ActivationReason {
    /// someone asked for it, e.g. a cluster starting its installation
    Signaled,
    /// the period elapsed
    Timeout,
}

#[derive(Clone, Debug, Serialize, JsonSchema)]
pub struct Activation {
    /// counts activations of this task since the conductor started
    pub iteration: u64,
    pub reason: ActivationReason,
    pub start_time: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, JsonSchema)]
pub struct CompletedActivation {
    #[serde(flatten)]
    pub activation: Activation,
    pub elapsed: Duration,
    /// task-specific summary, e.g. how many hosts the monitor refreshed
    pub details: serde_json::Value,
}
