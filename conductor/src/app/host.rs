// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Host registration and lifecycle

use super::engine::HostTransition;
use super::engine::StatusUpdate;
use super::refresh::update_host_status;
use super::Conductor;
use conductor_db_model::Event;
use conductor_db_model::Host;
use conductor_db_queries::context::OpContext;
use conductor_db_queries::db::Locking;
use conductor_types::agent::steps::NextStepRunnerCommand;
use conductor_types::external_api::params;
use conductor_types::external_api::shared::EventSeverity;
use conductor_types::external_api::shared::HostProgress;
use conductor_types::external_api::shared::HostRole;
use conductor_types::external_api::shared::HostStatus;
use foundry_common::api::external::DeleteResult;
use foundry_common::api::external::Error;
use foundry_common::api::external::ListResultVec;
use foundry_common::api::external::LookupResult;
use foundry_common::api::external::UpdateResult;
use foundry_common::typed_uuid::ClusterUuid;
use foundry_common::typed_uuid::HostUuid;
use slog::info;

/// Outcome of a successful registration
#[derive(Debug)]
pub struct HostRegistration {
    pub host: Host,
    /// what the agent should run to start polling for instructions
    pub next_step_runner_command: NextStepRunnerCommand,
}

/// Returns whether the agent that registered runs `image`
///
/// Older agents report only the image tag.
fn agent_runs_image(reported: &str, image: &str) -> bool {
    if reported.contains(':') {
        return reported == image;
    }
    match image.rsplit_once(':') {
        Some((_, tag)) => reported == tag,
        None => reported == image,
    }
}

impl Conductor {
    pub(crate) async fn host_fetch(
        &self,
        opctx: &OpContext,
        cluster_id: ClusterUuid,
        host_id: HostUuid,
    ) -> LookupResult<Host> {
        self.datastore.host_fetch(opctx, cluster_id, host_id).await
    }

    pub(crate) async fn host_list(
        &self,
        opctx: &OpContext,
        cluster_id: ClusterUuid,
    ) -> ListResultVec<Host> {
        self.datastore.cluster_fetch(opctx, cluster_id).await?;
        self.datastore.host_list(opctx, cluster_id).await
    }

    /// Applies `modify` to the current version of a host, holding its lock
    pub(crate) async fn host_modify<F>(
        &self,
        opctx: &OpContext,
        cluster_id: ClusterUuid,
        host_id: HostUuid,
        modify: F,
    ) -> UpdateResult<Host>
    where
        F: FnOnce(&mut Host) -> Result<(), Error>,
    {
        let mut tx = self.datastore.begin(opctx, Locking::ForUpdate);
        let mut host = tx.host_fetch(cluster_id, host_id).await?;
        modify(&mut host)?;
        let host = tx.host_update(host).await?;
        tx.commit()?;
        Ok(host)
    }

    /// Registers a host, or registers it again after its agent restarted
    pub(crate) async fn host_register(
        &self,
        opctx: &OpContext,
        cluster_id: ClusterUuid,
        params: &params::HostCreate,
    ) -> Result<HostRegistration, Error> {
        let host_id = params.host_id;
        let mut tx = self.datastore.begin(opctx, Locking::ForUpdate);
        let cluster = tx.cluster_fetch(cluster_id).await?;

        let host = match tx.host_fetch(cluster_id, host_id).await {
            Ok(mut host) => {
                let update = match self.engine.reregister(&host) {
                    Ok(update) => update,
                    Err(error) => {
                        drop(tx);
                        self.registration_failed(
                            opctx, cluster_id, host_id, &error,
                        )
                        .await;
                        return Err(error);
                    }
                };
                host.inventory = None;
                host.bootstrap = false;
                host.progress = HostProgress::default();
                host.discovery_agent_version =
                    params.discovery_agent_version.clone();
                let host = tx.host_update(host).await?;
                update_host_status(&mut tx, host, update).await?
            }
            Err(Error::ObjectNotFound { .. }) => {
                if let Err(error) = self.engine.accept_registration(&cluster) {
                    drop(tx);
                    self.registration_failed(opctx, cluster_id, host_id, &error)
                        .await;
                    return Err(error);
                }
                let mut host = Host::new(
                    host_id,
                    cluster_id,
                    cluster.kind.host_kind(),
                    params.discovery_agent_version.clone(),
                );
                if cluster.is_single_node() {
                    host.role = HostRole::Master;
                }
                let update = StatusUpdate::new(
                    HostStatus::Discovering,
                    "Waiting for host to send hardware details",
                );
                host.status = update.status;
                host.status_info = update.status_info;
                tx.host_insert(host).await?
            }
            Err(error) => return Err(error),
        };

        tx.event_insert(Event::new(
            cluster_id,
            Some(host_id),
            EventSeverity::Info,
            format!("Host {}: registered to cluster", host.display_name()),
            opctx.request_id().map(String::from),
        ));
        tx.commit()?;
        info!(opctx.log, "registered host";
            "cluster_id" => %cluster_id,
            "host_id" => %host_id,
            "agent_version" => &host.discovery_agent_version,
        );

        let next_step_runner_command = self.next_step_runner_command(&host);
        Ok(HostRegistration { host, next_step_runner_command })
    }

    async fn registration_failed(
        &self,
        opctx: &OpContext,
        cluster_id: ClusterUuid,
        host_id: HostUuid,
        error: &Error,
    ) {
        self.events
            .add_event(
                opctx,
                cluster_id,
                Some(host_id),
                EventSeverity::Error,
                format!("Failed to register host: {}", error.user_message()),
            )
            .await;
    }

    /// Returns the command that starts the host's step runner, naming the
    /// configured agent image so that outdated agents update themselves
    fn next_step_runner_command(&self, host: &Host) -> NextStepRunnerCommand {
        let image = &self.agent.image;
        if !agent_runs_image(&host.discovery_agent_version, image) {
            info!(self.log, "agent will be upgraded";
                "host_id" => %host.id,
                "from" => &host.discovery_agent_version,
                "to" => image,
            );
        }
        let cluster_id = host.cluster_id.to_string();
        let host_id = host.id.to_string();
        let args = [
            "run",
            "--rm",
            "--privileged",
            "--pid=host",
            "--net=host",
            "-v",
            "/dev:/dev:rw",
            "-v",
            "/opt:/opt:rw",
            "-v",
            "/var/log:/var/log:rw",
            "-v",
            "/run/systemd/journal/socket:/run/systemd/journal/socket",
            "--env",
            "PULL_SECRET_TOKEN",
            "--name",
            "next-step-runner",
            image.as_str(),
            "next_step_runner",
            "--url",
            self.agent.service_base_url.as_str(),
            "--cluster-id",
            cluster_id.as_str(),
            "--host-id",
            host_id.as_str(),
            "--agent-version",
            image.as_str(),
        ];
        NextStepRunnerCommand {
            command: String::from("podman"),
            args: args.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Deregisters a host that is not installing
    pub(crate) async fn host_deregister(
        &self,
        opctx: &OpContext,
        cluster_id: ClusterUuid,
        host_id: HostUuid,
    ) -> DeleteResult {
        let mut tx = self.datastore.begin(opctx, Locking::ForUpdate);
        let host = tx.host_fetch(cluster_id, host_id).await?;
        if host.status.is_installing() {
            let error = Error::conflict(&format!(
                "host {} cannot be deregistered while it is {}",
                host.display_name(),
                host.status
            ));
            drop(tx);
            self.events
                .add_event(
                    opctx,
                    cluster_id,
                    Some(host_id),
                    EventSeverity::Warning,
                    format!(
                        "Failed to deregister host: {}",
                        error.user_message()
                    ),
                )
                .await;
            return Err(error);
        }
        tx.host_delete(cluster_id, host_id).await?;
        tx.event_insert(Event::new(
            cluster_id,
            Some(host_id),
            EventSeverity::Info,
            format!("Host {}: deregistered from cluster", host.display_name()),
            opctx.request_id().map(String::from),
        ));
        tx.commit()?;
        self.activate_host_monitor();
        Ok(())
    }

    pub(crate) async fn host_enable(
        &self,
        opctx: &OpContext,
        cluster_id: ClusterUuid,
        host_id: HostUuid,
    ) -> UpdateResult<Host> {
        self.host_set_enabled(
            opctx,
            cluster_id,
            host_id,
            HostTransition::Enable,
        )
        .await
    }

    pub(crate) async fn host_disable(
        &self,
        opctx: &OpContext,
        cluster_id: ClusterUuid,
        host_id: HostUuid,
    ) -> UpdateResult<Host> {
        self.host_set_enabled(
            opctx,
            cluster_id,
            host_id,
            HostTransition::Disable,
        )
        .await
    }

    async fn host_set_enabled(
        &self,
        opctx: &OpContext,
        cluster_id: ClusterUuid,
        host_id: HostUuid,
        transition: HostTransition,
    ) -> UpdateResult<Host> {
        let mut tx = self.datastore.begin(opctx, Locking::ForUpdate);
        let mut host = tx.host_fetch(cluster_id, host_id).await?;
        let update = match self.engine.host_transition(&host, &transition) {
            Ok(update) => update,
            Err(error) => {
                drop(tx);
                self.events
                    .add_event(
                        opctx,
                        cluster_id,
                        Some(host_id),
                        EventSeverity::Warning,
                        format!(
                            "Host {}: {}",
                            host.display_name(),
                            error.user_message()
                        ),
                    )
                    .await;
                return Err(error);
            }
        };
        if matches!(transition, HostTransition::Enable) {
            // Whatever the host reported before it was disabled is stale.
            host.inventory = None;
            host = tx.host_update(host).await?;
        }
        let host = update_host_status(&mut tx, host, update).await?;
        tx.commit()?;
        self.activate_host_monitor();
        Ok(host)
    }
}

#[cfg(test)]
mod test {
    use super::agent_runs_image;
    use crate::app::Conductor;
    use crate::app::test_helpers::cluster_params;
    use crate::app::test_helpers::conductor_test;
    use crate::app::test_helpers::create_cluster;
    use crate::app::test_helpers::good_inventory;
    use crate::app::test_helpers::register_host;
    use crate::app::test_helpers::AGENT_IMAGE;
    use assert_matches::assert_matches;
    use conductor_db_queries::context::OpContext;
    use conductor_db_queries::db::Locking;
    use conductor_types::external_api::params;
    use conductor_types::external_api::shared::ClusterStatus;
    use conductor_types::external_api::shared::EventSeverity;
    use conductor_types::external_api::shared::HighAvailabilityMode;
    use conductor_types::external_api::shared::HostRole;
    use conductor_types::external_api::shared::HostStatus;
    use foundry_common::api::external::Error;
    use foundry_common::typed_uuid::ClusterUuid;
    use foundry_common::typed_uuid::HostUuid;
    use foundry_test_utils::dev;

    #[test]
    fn test_agent_runs_image() {
        assert!(agent_runs_image(
            "quay.io/example/agent:v1.0",
            "quay.io/example/agent:v1.0"
        ));
        assert!(agent_runs_image("v1.0", "quay.io/example/agent:v1.0"));
        assert!(!agent_runs_image("v0.9", "quay.io/example/agent:v1.0"));
        assert!(!agent_runs_image(
            "quay.io/example/agent:v0.9",
            "quay.io/example/agent:v1.0"
        ));
    }

    #[tokio::test]
    async fn test_host_register() {
        let logctx = dev::test_setup_log("test_host_register");
        let (opctx, conductor) = conductor_test(&logctx.log);

        let create = params::HostCreate {
            host_id: HostUuid::new_v4(),
            discovery_agent_version: String::from("v0.9"),
        };
        let error = conductor
            .host_register(&opctx, ClusterUuid::new_v4(), &create)
            .await
            .unwrap_err();
        assert_matches!(error, Error::ObjectNotFound { .. });

        let cluster = create_cluster(
            &opctx,
            &conductor,
            &cluster_params("c1", HighAvailabilityMode::Full),
        )
        .await;
        let registration =
            conductor.host_register(&opctx, cluster.id, &create).await.unwrap();
        let host = registration.host;
        assert_eq!(host.status, HostStatus::Discovering);
        assert_eq!(host.role, HostRole::AutoAssign);
        assert!(!host.is_day2());
        let command = registration.next_step_runner_command;
        assert_eq!(command.command, "podman");
        assert!(command.args.iter().any(|a| a == AGENT_IMAGE));
        assert!(command.args.iter().any(|a| *a == host.id.to_string()));

        // An agent restart forgets what the host reported.
        let inventory = good_inventory("master-0", "192.168.126.10");
        conductor
            .host_modify(&opctx, cluster.id, host.id, |host| {
                host.inventory = Some(serde_json::to_string(&inventory)?);
                host.status = HostStatus::Known;
                Ok(())
            })
            .await
            .unwrap();
        let host = conductor
            .host_register(&opctx, cluster.id, &create)
            .await
            .unwrap()
            .host;
        assert_eq!(host.status, HostStatus::Discovering);
        assert_eq!(host.inventory, None);
        let hosts = conductor.host_list(&opctx, cluster.id).await.unwrap();
        assert_eq!(hosts.len(), 1);

        let events = conductor.events_list(&opctx, cluster.id).await.unwrap();
        assert!(events
            .iter()
            .any(|e| e.message.ends_with("registered to cluster")));

        logctx.cleanup_successful();
    }

    #[tokio::test]
    async fn test_single_node_host_is_master() {
        let logctx = dev::test_setup_log("test_single_node_host_is_master");
        let (opctx, conductor) = conductor_test(&logctx.log);
        let cluster = create_cluster(
            &opctx,
            &conductor,
            &cluster_params("sno", HighAvailabilityMode::None),
        )
        .await;
        let host = register_host(&opctx, &conductor, &cluster, None).await;
        assert_eq!(host.role, HostRole::Master);
        logctx.cleanup_successful();
    }

    async fn set_cluster_status(
        opctx: &OpContext,
        conductor: &Conductor,
        cluster_id: ClusterUuid,
        status: ClusterStatus,
    ) {
        let mut tx = conductor.datastore().begin(opctx, Locking::ForUpdate);
        let mut cluster = tx.cluster_fetch(cluster_id).await.unwrap();
        cluster.status = status;
        tx.cluster_update(cluster).await.unwrap();
        tx.commit().unwrap();
    }

    #[tokio::test]
    async fn test_registration_refused() {
        let logctx = dev::test_setup_log("test_registration_refused");
        let (opctx, conductor) = conductor_test(&logctx.log);
        let cluster = create_cluster(
            &opctx,
            &conductor,
            &cluster_params("c1", HighAvailabilityMode::Full),
        )
        .await;

        let create = params::HostCreate {
            host_id: HostUuid::new_v4(),
            discovery_agent_version: String::from(AGENT_IMAGE),
        };

        let (cid, status) = (cluster.id, ClusterStatus::Installed);
        set_cluster_status(&opctx, &conductor, cid, status).await;
        let error = conductor
            .host_register(&opctx, cluster.id, &create)
            .await
            .unwrap_err();
        assert_matches!(error, Error::Forbidden { .. });

        let (cid, status) = (cluster.id, ClusterStatus::Installing);
        set_cluster_status(&opctx, &conductor, cid, status).await;
        let error = conductor
            .host_register(&opctx, cluster.id, &create)
            .await
            .unwrap_err();
        assert_matches!(error, Error::Conflict { .. });

        let hosts = conductor.host_list(&opctx, cluster.id).await.unwrap();
        assert!(hosts.is_empty());
        let failures: Vec<_> = conductor
            .events_list(&opctx, cluster.id)
            .await
            .unwrap()
            .into_iter()
            .filter(|e| e.message.starts_with("Failed to register host"))
            .collect();
        assert_eq!(failures.len(), 2);
        assert_eq!(failures[0].severity, EventSeverity::Error);
        assert_eq!(failures[0].host_id, Some(create.host_id));

        logctx.cleanup_successful();
    }

    #[tokio::test]
    async fn test_host_deregister_and_disable() {
        let logctx = dev::test_setup_log("test_host_deregister_and_disable");
        let (opctx, conductor) = conductor_test(&logctx.log);
        let cluster = create_cluster(
            &opctx,
            &conductor,
            &cluster_params("c1", HighAvailabilityMode::Full),
        )
        .await;
        let h1 = register_host(&opctx, &conductor, &cluster, None).await;
        let h2 = register_host(&opctx, &conductor, &cluster, None).await;

        let host =
            conductor.host_disable(&opctx, cluster.id, h1.id).await.unwrap();
        assert_eq!(host.status, HostStatus::Disabled);
        let error = conductor
            .host_disable(&opctx, cluster.id, h1.id)
            .await
            .unwrap_err();
        assert_matches!(error, Error::Conflict { .. });
        let host =
            conductor.host_enable(&opctx, cluster.id, h1.id).await.unwrap();
        assert_eq!(host.status, HostStatus::Discovering);

        conductor
            .host_modify(&opctx, cluster.id, h2.id, |host| {
                host.status = HostStatus::Installing;
                Ok(())
            })
            .await
            .unwrap();
        let error = conductor
            .host_deregister(&opctx, cluster.id, h2.id)
            .await
            .unwrap_err();
        assert_matches!(error, Error::Conflict { .. });

        conductor.host_deregister(&opctx, cluster.id, h1.id).await.unwrap();
        let error =
            conductor.host_fetch(&opctx, cluster.id, h1.id).await.unwrap_err();
        assert_matches!(error, Error::ObjectNotFound { .. });
        let hosts = conductor.host_list(&opctx, cluster.id).await.unwrap();
        assert_eq!(hosts.len(), 1);
        assert_eq!(hosts[0].id, h2.id);

        logctx.cleanup_successful();
    }
}
