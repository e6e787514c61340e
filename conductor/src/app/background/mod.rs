// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Background tasks
//!
//! The conductor runs two background tasks, both registered with the
//! [`Driver`] at startup:
//!
//! - the host monitor periodically refreshes every cluster and its hosts,
//!   which is how hosts that stopped polling become `disconnected`;
//! - the pre-install runner takes the jobs queued by cluster installs and
//!   carries out the slow part of preparing an installation.
//!
//! Both can be woken up explicitly, and both report their last result through
//! `GET /bgtasks`.

mod driver;
mod host_monitor;
mod preinstall;
mod status;

pub use driver::Driver;
pub use host_monitor::HostMonitor;
pub use preinstall::PreInstallJob;
pub use preinstall::PreInstallQueue;
pub use preinstall::PreInstallRunner;

use crate::config::BackgroundTaskConfig;
use conductor_db_queries::context::OpContext;
use futures::future::BoxFuture;

/// An operation activated both periodically and by an explicit signal
///
/// The value returned from `activate` is recorded as the task's last result
/// and shows up in the background task status.
pub trait BackgroundTask: Send + Sync {
    fn activate<'a>(
        &'a mut self,
        opctx: &'a OpContext,
    ) -> BoxFuture<'a, serde_json::Value>;
}

/// Identifies a background task registered with the [`Driver`]
#[derive(Clone, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub struct TaskName(String);

impl TaskName {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// The conductor's background tasks and the driver running them
pub struct BackgroundTasks {
    pub driver: Driver,
    pub task_host_monitor: TaskName,
    pub task_preinstall: TaskName,
}

impl BackgroundTasks {
    /// Registers every background task with a new [`Driver`]
    pub fn start(
        opctx: &OpContext,
        config: &BackgroundTaskConfig,
        host_monitor: HostMonitor,
        preinstall: PreInstallRunner,
    ) -> BackgroundTasks {
        let mut driver = Driver::new();

        let task_host_monitor = driver.register(
            String::from("host_monitor"),
            String::from(
                "refreshes the status of every cluster and its hosts, marking \
                 hosts that stopped polling as disconnected",
            ),
            config.host_monitor_period(),
            Box::new(host_monitor),
            opctx.child(Default::default()),
        );

        let task_preinstall = driver.register(
            String::from("preinstall_runner"),
            String::from(
                "renders install configuration for clusters whose installation \
                 was requested and starts installing their hosts",
            ),
            config.preinstall_period(),
            Box::new(preinstall),
            opctx.child(Default::default()),
        );

        BackgroundTasks { driver, task_host_monitor, task_preinstall }
    }

    pub fn activate(&self, task: &TaskName) {
        self.driver.activate(task);
    }
}
