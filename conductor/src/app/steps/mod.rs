// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The step protocol spoken with each host's agent
//!
//! Agents poll for instructions ([`plans`]) and post one reply per
//! instruction.  A successful reply is decoded against the schema of its step
//! type, encoded again, and handed to the [`StepReplyHandler`] registered for
//! that type.  A failed reply never fails the request: whatever can be
//! learned from it is recorded and the agent moves on.

mod commands;
mod handlers;
mod plans;

pub(crate) use handlers::handlers;

use super::engine::HostTransition;
use super::engine::StatusUpdate;
use super::refresh::update_host_status;
use super::Conductor;
use async_trait::async_trait;
use conductor_db_model::Host;
use conductor_db_queries::context::OpContext;
use conductor_db_queries::db::Locking;
use conductor_types::agent::steps::StepReply;
use conductor_types::agent::steps::StepType;
use conductor_types::agent::steps::EXIT_CODE_CONTAINER_ALREADY_RUNNING;
use conductor_types::agent::steps::EXIT_CODE_MEDIA_DISCONNECTED;
use conductor_types::agent::steps::INSTALLER_ALREADY_RUNNING_ERROR;
use conductor_types::external_api::shared::HostStatus;
use conductor_types::external_api::shared::MediaStatus;
use foundry_common::api::external::Error;
use foundry_common::typed_uuid::ClusterUuid;
use foundry_common::typed_uuid::HostUuid;
use serde::de::DeserializeOwned;
use serde::Serialize;
use slog::debug;
use slog::error;
use slog::info;
use slog::warn;
use std::str::FromStr;

/// Status message of a host whose installation media went away
pub const MEDIA_DISCONNECTED_MESSAGE: &str =
    "Failed - Cannot read from the media (ISO) - media was likely disconnected";

/// Handles the successful replies of one step type
#[async_trait]
pub(crate) trait StepReplyHandler: Send + Sync {
    /// Decodes `output` and returns the encoding of what was understood
    ///
    /// Only the returned text is ever stored or acted upon.
    fn validate(&self, output: &str) -> Result<String, Error>;

    /// Applies a payload returned by `validate` to `host`
    async fn apply(
        &self,
        conductor: &Conductor,
        opctx: &OpContext,
        host: &Host,
        sanitized: String,
    ) -> Result<(), Error>;
}

/// Decodes `output` as a `T` and encodes it again, dropping anything `T`
/// does not declare
pub(crate) fn sanitize<T>(
    step_type: StepType,
    output: &str,
) -> Result<String, Error>
where
    T: DeserializeOwned + Serialize,
{
    let decoded: T = serde_json::from_str(output).map_err(|e| {
        Error::invalid_request(&format!(
            "failed to decode {} reply: {}",
            step_type, e
        ))
    })?;
    serde_json::to_string(&decoded).map_err(|e| {
        Error::internal_error(&format!(
            "failed to encode {} reply: {}",
            step_type, e
        ))
    })
}

/// Returns the status message of a host that lost its media, keeping
/// whatever else the message already said
fn media_disconnected_info(status_info: &str) -> String {
    if status_info.contains(MEDIA_DISCONNECTED_MESSAGE) {
        status_info.to_string()
    } else if status_info.is_empty() {
        MEDIA_DISCONNECTED_MESSAGE.to_string()
    } else {
        format!("{}. {}", MEDIA_DISCONNECTED_MESSAGE, status_info)
    }
}

impl Conductor {
    pub(crate) async fn post_step_reply(
        &self,
        opctx: &OpContext,
        cluster_id: ClusterUuid,
        host_id: HostUuid,
        reply: &StepReply,
    ) -> Result<(), Error> {
        let host =
            self.datastore.host_fetch(opctx, cluster_id, host_id).await?;
        let log = opctx.log.new(slog::o!(
            "cluster_id" => cluster_id.to_string(),
            "host_id" => host_id.to_string(),
            "step_id" => reply.step_id.clone(),
            "step_type" => reply.step_type.clone(),
        ));

        let media_already_disconnected = reply.exit_code
            == EXIT_CODE_MEDIA_DISCONNECTED
            && host.media_status == Some(MediaStatus::Disconnected);
        if !media_already_disconnected {
            info!(log, "received step reply";
                "exit_code" => reply.exit_code,
                "output" => &reply.output,
                "error" => &reply.error,
            );
        }

        if reply.exit_code != 0 {
            if let Err(error) = self.step_failed(opctx, &host, reply).await {
                warn!(log, "failed to handle step failure";
                    "error" => %error);
            }
            return Ok(());
        }

        if host.media_status == Some(MediaStatus::Disconnected) {
            self.host_modify(opctx, cluster_id, host_id, |host| {
                host.media_status = Some(MediaStatus::Connected);
                Ok(())
            })
            .await?;
            info!(log, "installation media reconnected");
        }

        let step_type = StepType::from_str(&reply.step_type).map_err(|_| {
            Error::invalid_request(&format!(
                "unknown step type {:?}",
                reply.step_type
            ))
        })?;
        if step_type.empty_output_is_noop() && reply.output.is_empty() {
            debug!(log, "ignoring empty step reply");
            return Ok(());
        }

        let Some(handler) = self.step_handlers.get(&step_type) else {
            debug!(log, "no handler for step type");
            return Ok(());
        };
        let sanitized = handler.validate(&reply.output)?;
        handler.apply(self, opctx, &host, sanitized).await.map_err(|error| {
            error!(log, "failed to apply step reply"; "error" => %error);
            if error.retryable() {
                error
            } else {
                Error::internal_error(&format!(
                    "failed to apply {} reply: {}",
                    step_type, error
                ))
            }
        })
    }

    /// Records what can be learned from a failed step
    async fn step_failed(
        &self,
        opctx: &OpContext,
        host: &Host,
        reply: &StepReply,
    ) -> Result<(), Error> {
        if reply.exit_code == EXIT_CODE_MEDIA_DISCONNECTED {
            return self.media_disconnected(opctx, host).await;
        }

        let Ok(step_type) = StepType::from_str(&reply.step_type) else {
            return Ok(());
        };
        match step_type {
            StepType::Install => {
                if reply.exit_code == EXIT_CODE_CONTAINER_ALREADY_RUNNING
                    && reply.error.contains(INSTALLER_ALREADY_RUNNING_ERROR)
                {
                    warn!(opctx.log, "install step failed because the \
                        installer is already running";
                        "host_id" => %host.id,
                        "error" => &reply.error,
                    );
                    return Ok(());
                }
                self.host_installation_failed(opctx, host, &reply.error).await
            }
            StepType::ContainerImageAvailability => {
                handlers::record_images_status(self, opctx, host, &reply.output)
                    .await
            }
            StepType::InstallationDiskSpeedCheck => {
                handlers::record_disk_speed_failure(
                    self,
                    opctx,
                    host,
                    &reply.output,
                    reply.exit_code,
                )
                .await
            }
            _ => Ok(()),
        }
    }

    async fn media_disconnected(
        &self,
        opctx: &OpContext,
        host: &Host,
    ) -> Result<(), Error> {
        let mut tx = self.datastore.begin(opctx, Locking::ForUpdate);
        let mut host = tx.host_fetch(host.cluster_id, host.id).await?;
        if host.media_status != Some(MediaStatus::Disconnected) {
            host.media_status = Some(MediaStatus::Disconnected);
            host = tx.host_update(host).await?;
        }
        let info = media_disconnected_info(&host.status_info);
        update_host_status(
            &mut tx,
            host,
            StatusUpdate::new(HostStatus::Error, info),
        )
        .await?;
        tx.commit()
    }

    async fn host_installation_failed(
        &self,
        opctx: &OpContext,
        host: &Host,
        reason: &str,
    ) -> Result<(), Error> {
        let mut tx = self.datastore.begin(opctx, Locking::ForUpdate);
        let host = tx.host_fetch(host.cluster_id, host.id).await?;
        let update = self
            .engine
            .host_transition(&host, &HostTransition::Fail(reason.to_string()))?;
        update_host_status(&mut tx, host, update).await?;
        tx.commit()
    }
}
