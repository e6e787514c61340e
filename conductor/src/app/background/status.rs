// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! View status of background tasks (for support and debugging)

use super::driver::TaskStatus;
use crate::app::Conductor;
use conductor_db_queries::context::OpContext;
use conductor_types::internal_api::views::BackgroundTask;
use foundry_common::api::external::Error;
use foundry_common::api::external::LookupResult;
use foundry_common::api::external::LookupType;
use foundry_common::api::external::ResourceType;
use std::collections::BTreeMap;
use std::time::Duration;

impl Conductor {
    pub(crate) async fn bgtasks_list(
        &self,
        _opctx: &OpContext,
    ) -> Result<BTreeMap<String, BackgroundTask>, Error> {
        let driver = &self.background_tasks.driver;
        Ok(driver
            .tasks()
            .map(|t| {
                let name = t.as_str();
                let description = driver.task_description(t);
                let period = driver.task_period(t);
                (
                    name.to_owned(),
                    task_view(name, description, period, driver.task_status(t)),
                )
            })
            .collect())
    }

    pub(crate) async fn bgtask_status(
        &self,
        _opctx: &OpContext,
        name: &str,
    ) -> LookupResult<BackgroundTask> {
        let driver = &self.background_tasks.driver;
        let task =
            driver.tasks().find(|t| t.as_str() == name).ok_or_else(|| {
                LookupType::ByName(name.to_owned())
                    .into_not_found(ResourceType::BackgroundTask)
            })?;
        let description = driver.task_description(task);
        let status = driver.task_status(task);
        let period = driver.task_period(task);
        Ok(task_view(task.as_str(), description, period, status))
    }
}

fn task_view(
    name: &str,
    description: &str,
    period: Duration,
    status: TaskStatus,
) -> BackgroundTask {
    BackgroundTask {
        name: name.to_owned(),
        description: description.to_owned(),
        period,
        running: status.running,
        last_completed: status.last_completed,
    }
}
