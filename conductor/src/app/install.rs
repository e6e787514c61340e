// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Installing, cancelling and resetting clusters

use super::background::PreInstallJob;
use super::engine::ClusterTransition;
use super::engine::HostTransition;
use super::refresh::refresh_cluster;
use super::refresh::update_cluster_status;
use super::refresh::update_host_status;
use super::Conductor;
use chrono::Utc;
use conductor_db_model::Cluster;
use conductor_db_model::Event;
use conductor_db_model::Host;
use conductor_db_queries::context::OpContext;
use conductor_db_queries::db::Locking;
use conductor_db_queries::db::Transaction;
use conductor_types::external_api::shared::EventSeverity;
use conductor_types::external_api::shared::HostProgress;
use conductor_types::external_api::shared::HostRole;
use conductor_types::external_api::shared::HostStatus;
use foundry_common::api::external::Error;
use foundry_common::api::external::UpdateResult;
use foundry_common::bail_unless;
use foundry_common::typed_uuid::ClusterUuid;
use foundry_common::typed_uuid::HostUuid;
use slog::info;
use slog::warn;
use std::collections::BTreeMap;

/// Blob name prefix of the logs gathered from a cluster's hosts
fn logs_prefix(cluster_id: ClusterUuid) -> String {
    format!("{}/logs/", cluster_id)
}

/// Blob name prefix of everything generated for a cluster
fn cluster_files_prefix(cluster_id: ClusterUuid) -> String {
    format!("{}/", cluster_id)
}

impl Conductor {
    /// Assigns a role to every enabled host still in `auto-assign`
    ///
    /// Either every assignment is stored or none is.  Returns whether any
    /// role changed.
    async fn assign_roles(
        &self,
        opctx: &OpContext,
        cluster_id: ClusterUuid,
    ) -> Result<bool, Error> {
        let mut tx = self.datastore.begin(opctx, Locking::ForUpdate);
        let cluster = tx.cluster_fetch(cluster_id).await?;
        let mut hosts = tx.cluster_hosts(cluster_id).await?;
        let mut changed = false;
        for i in 0..hosts.len() {
            let Some(role) =
                self.engine.auto_assign_role(&cluster, &hosts[i], &hosts)
            else {
                continue;
            };
            let mut host = hosts[i].clone();
            host.role = role;
            hosts[i] = tx.host_update(host).await?;
            changed = true;
        }
        tx.commit()?;
        Ok(changed)
    }

    /// Assigns roles and refreshes the cluster ahead of an installation
    ///
    /// Every enabled host must be `known` afterwards.
    async fn install_preamble(
        &self,
        opctx: &OpContext,
        cluster_id: ClusterUuid,
    ) -> Result<(Cluster, Vec<Host>), Error> {
        if self.assign_roles(opctx, cluster_id).await? {
            info!(opctx.log, "assigned host roles";
                "cluster_id" => %cluster_id,
            );
        }

        let mut tx = self.datastore.begin(opctx, Locking::ForUpdate);
        refresh_cluster(&mut tx, self.engine.as_ref(), cluster_id).await?;
        let cluster = tx.cluster_fetch(cluster_id).await?;
        let hosts = tx.cluster_hosts(cluster_id).await?;
        tx.commit()?;

        if let Some(host) = hosts
            .iter()
            .find(|h| !h.is_disabled() && h.status != HostStatus::Known)
        {
            return Err(Error::conflict(&format!(
                "Host {} is in {} state: {}",
                host.display_name(),
                host.status,
                host.status_info
            )));
        }
        Ok((cluster, hosts))
    }

    /// Starts the installation of a cluster
    ///
    /// This returns once the cluster is `preparing-for-installation`.  The
    /// pre-install runner finishes the preparation in the background and
    /// then moves the cluster to `installing` (or `error`).
    pub(crate) async fn cluster_install(
        &self,
        opctx: &OpContext,
        cluster_id: ClusterUuid,
    ) -> UpdateResult<Cluster> {
        let (cluster, hosts) = self.install_preamble(opctx, cluster_id).await?;
        if let Err(reason) =
            self.engine.is_ready_for_installation(&cluster, &hosts)
        {
            return Err(Error::conflict(&format!(
                "Cluster is not ready for installation, {}",
                reason
            )));
        }

        let (cluster, hosts) = {
            let mut tx = self.datastore.begin(opctx, Locking::ForUpdate);
            let cluster = tx.cluster_fetch(cluster_id).await?;
            let update = self.engine.cluster_transition(
                &cluster,
                &ClusterTransition::PrepareForInstallation,
            )?;
            let mut cluster = update_cluster_status(&mut tx, cluster, update)
                .await?;
            cluster.install_started_at = Some(Utc::now());
            let cluster = tx.cluster_update(cluster).await?;

            for host in tx.cluster_hosts(cluster_id).await? {
                if host.is_disabled() {
                    continue;
                }
                let update = self.engine.host_transition(
                    &host,
                    &HostTransition::PrepareForInstallation,
                )?;
                update_host_status(&mut tx, host, update).await?;
            }
            self.elect_bootstrap(&mut tx, cluster_id).await?;
            let hosts = tx.cluster_hosts(cluster_id).await?;
            tx.commit()?;
            (cluster, hosts)
        };

        self.manifests
            .add_cluster_manifests(&cluster, &hosts)
            .await
            .map_err(|error| {
                Error::internal_error(&format!(
                    "failed to add manifests for cluster {}: {:#}",
                    cluster_id, error
                ))
            })?;
        if let Err(error) =
            self.blob_store.delete_prefix(&logs_prefix(cluster_id)).await
        {
            warn!(opctx.log, "failed to delete previous installation logs";
                "cluster_id" => %cluster_id,
                "error" => %error,
            );
        }

        let job_ctx = opctx.detached(BTreeMap::from([(
            String::from("preinstall_cluster_id"),
            cluster_id.to_string(),
        )]));
        self.preinstall_queue
            .push(PreInstallJob { cluster_id, opctx: job_ctx });
        self.activate_preinstall_runner();
        info!(opctx.log, "queued cluster installation";
            "cluster_id" => %cluster_id,
        );
        Ok(cluster)
    }

    /// Marks the bootstrap host of a cluster being installed
    ///
    /// A host already flagged keeps the role.
    async fn elect_bootstrap(
        &self,
        tx: &mut Transaction<'_>,
        cluster_id: ClusterUuid,
    ) -> Result<(), Error> {
        let hosts = tx.cluster_hosts(cluster_id).await?;
        if hosts.iter().any(|h| h.bootstrap && !h.is_disabled()) {
            return Ok(());
        }
        let bootstrap_id =
            self.engine.select_bootstrap(&hosts).ok_or_else(|| {
                Error::internal_error(&format!(
                    "cluster {} has no master to bootstrap from",
                    cluster_id
                ))
            })?;
        let mut bootstrap = tx.host_fetch(cluster_id, bootstrap_id).await?;
        bail_unless!(
            bootstrap.role == HostRole::Master,
            "bootstrap host {} is a {}",
            bootstrap.id,
            bootstrap.role
        );
        bootstrap.bootstrap = true;
        let bootstrap = tx.host_update(bootstrap).await?;
        let request_id = tx.opctx().request_id().map(String::from);
        tx.event_insert(Event::new(
            cluster_id,
            Some(bootstrap.id),
            EventSeverity::Info,
            format!("Host {}: set as bootstrap", bootstrap.display_name()),
            request_id,
        ));
        Ok(())
    }

    /// Starts installing a host that joins an installed cluster
    ///
    /// The host's Ignition file is rendered before the host moves to
    /// `installing`.
    async fn install_added_host(
        &self,
        tx: &mut Transaction<'_>,
        cluster: &Cluster,
        host: Host,
    ) -> UpdateResult<Host> {
        self.ignition
            .render_host_ignition(cluster, &host)
            .await
            .map_err(|error| {
                Error::internal_error(&format!(
                    "failed to render ignition of host {}: {:#}",
                    host.id, error
                ))
            })?;
        let update =
            self.engine.host_transition(&host, &HostTransition::Install)?;
        update_host_status(tx, host, update).await
    }

    /// Starts installing every `known` host added to an installed cluster
    ///
    /// A host that fails to start is skipped, with an event saying why.
    /// Returns the hosts that started.
    pub(crate) async fn cluster_install_hosts(
        &self,
        opctx: &OpContext,
        cluster_id: ClusterUuid,
    ) -> Result<Vec<Host>, Error> {
        let cluster = self.datastore.cluster_fetch(opctx, cluster_id).await?;
        if !cluster.is_day2() {
            return Err(Error::conflict(&format!(
                "cluster {} is not a cluster to add hosts to",
                cluster_id
            )));
        }
        if self.assign_roles(opctx, cluster_id).await? {
            let mut tx = self.datastore.begin(opctx, Locking::ForUpdate);
            refresh_cluster(&mut tx, self.engine.as_ref(), cluster_id).await?;
            tx.commit()?;
        }

        let mut tx = self.datastore.begin(opctx, Locking::ForUpdate);
        let cluster = tx.cluster_fetch(cluster_id).await?;
        let mut started = Vec::new();
        for host in tx.cluster_hosts(cluster_id).await? {
            if host.status != HostStatus::Known {
                continue;
            }
            let host_id = host.id;
            let name = host.display_name();
            match self.install_added_host(&mut tx, &cluster, host).await {
                Ok(host) => started.push(host),
                Err(error) => {
                    warn!(opctx.log, "failed to start host installation";
                        "cluster_id" => %cluster_id,
                        "host_id" => %host_id,
                        "error" => %error,
                    );
                    tx.event_insert(Event::new(
                        cluster_id,
                        Some(host_id),
                        EventSeverity::Error,
                        format!(
                            "Host {}: failed to start installation: {}",
                            name,
                            error.user_message()
                        ),
                        opctx.request_id().map(String::from),
                    ));
                }
            }
        }
        tx.commit()?;
        info!(opctx.log, "started installing added hosts";
            "cluster_id" => %cluster_id,
            "hosts" => started.len(),
        );
        Ok(started)
    }

    /// Starts installing one host added to an installed cluster
    pub(crate) async fn host_install(
        &self,
        opctx: &OpContext,
        cluster_id: ClusterUuid,
        host_id: HostUuid,
    ) -> UpdateResult<Host> {
        let mut tx = self.datastore.begin(opctx, Locking::ForUpdate);
        let cluster = tx.cluster_fetch(cluster_id).await?;
        let mut host = tx.host_fetch(cluster_id, host_id).await?;
        if !cluster.is_day2() {
            return Err(Error::conflict(&format!(
                "cluster {} is not a cluster to add hosts to",
                cluster_id
            )));
        }
        if host.status != HostStatus::Known {
            return Err(Error::conflict(&format!(
                "Host {} is in {} state, cannot start installation",
                host.display_name(),
                host.status
            )));
        }
        let hosts = tx.cluster_hosts(cluster_id).await?;
        let role = self.engine.auto_assign_role(&cluster, &host, &hosts);
        if let Some(role) = role {
            host.role = role;
            host = tx.host_update(host).await?;
        }
        let host = self.install_added_host(&mut tx, &cluster, host).await?;
        tx.commit()?;
        Ok(host)
    }

    /// Cancels the installation of a cluster and all its hosts
    ///
    /// If the cluster or any enabled host cannot be cancelled, nothing is.
    pub(crate) async fn cluster_cancel(
        &self,
        opctx: &OpContext,
        cluster_id: ClusterUuid,
    ) -> UpdateResult<Cluster> {
        self.cluster_abort(
            opctx,
            cluster_id,
            ClusterTransition::Cancel,
            HostTransition::Cancel,
        )
        .await
    }

    /// Resets a cluster to before its installation and deletes the files
    /// generated for it
    ///
    /// As with [`Conductor::cluster_cancel()`], either every status changes
    /// or none does.
    pub(crate) async fn cluster_reset(
        &self,
        opctx: &OpContext,
        cluster_id: ClusterUuid,
    ) -> UpdateResult<Cluster> {
        let cluster = self
            .cluster_abort(
                opctx,
                cluster_id,
                ClusterTransition::Reset,
                HostTransition::Reset,
            )
            .await?;
        self.blob_store
            .delete_prefix(&cluster_files_prefix(cluster_id))
            .await
            .map_err(|error| {
                Error::internal_error(&format!(
                    "failed to delete files of cluster {}: {:#}",
                    cluster_id, error
                ))
            })?;
        Ok(cluster)
    }

    async fn cluster_abort(
        &self,
        opctx: &OpContext,
        cluster_id: ClusterUuid,
        cluster_transition: ClusterTransition,
        host_transition: HostTransition,
    ) -> UpdateResult<Cluster> {
        let mut tx = self.datastore.begin(opctx, Locking::ForUpdate);
        let result = self
            .cluster_abort_staged(
                &mut tx,
                cluster_id,
                &cluster_transition,
                &host_transition,
            )
            .await;
        let cluster = match result {
            Ok(cluster) => cluster,
            Err(error) => {
                drop(tx);
                let action = match cluster_transition {
                    ClusterTransition::Reset => "reset",
                    _ => "cancel",
                };
                self.events
                    .add_event(
                        opctx,
                        cluster_id,
                        None,
                        EventSeverity::Warning,
                        format!(
                            "Failed to {} installation: {}",
                            action,
                            error.user_message()
                        ),
                    )
                    .await;
                return Err(error);
            }
        };
        tx.commit()?;
        info!(opctx.log, "stopped cluster installation";
            "cluster_id" => %cluster_id,
            "status" => %cluster.status,
        );
        Ok(cluster)
    }

    async fn cluster_abort_staged(
        &self,
        tx: &mut Transaction<'_>,
        cluster_id: ClusterUuid,
        cluster_transition: &ClusterTransition,
        host_transition: &HostTransition,
    ) -> UpdateResult<Cluster> {
        let reset = matches!(cluster_transition, ClusterTransition::Reset);
        let cluster = tx.cluster_fetch(cluster_id).await?;
        let update =
            self.engine.cluster_transition(&cluster, cluster_transition)?;
        let mut cluster = update_cluster_status(tx, cluster, update).await?;
        if reset {
            cluster.install_started_at = None;
            cluster.platform_cluster_id = None;
            cluster = tx.cluster_update(cluster).await?;
        }

        for mut host in tx.cluster_hosts(cluster_id).await? {
            if host.is_disabled() {
                continue;
            }
            let update = self.engine.host_transition(&host, host_transition)?;
            if reset {
                host.bootstrap = false;
                host.progress = HostProgress::default();
            }
            update_host_status(tx, host, update).await?;
        }
        Ok(cluster)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::app::ignition::DefaultIgnitionBuilder;
    use crate::app::ignition::IgnitionBuilder;
    use crate::app::test_helpers::cluster_params;
    use crate::app::test_helpers::conductor_test;
    use crate::app::test_helpers::create_cluster;
    use crate::app::test_helpers::good_inventory;
    use crate::app::test_helpers::ready_cluster;
    use crate::app::test_helpers::register_host;
    use crate::app::subscription::SubscriptionClient;
    use crate::app::test_helpers::test_config;
    use crate::app::Collaborators;
    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use conductor_db_queries::db::DataStore;
    use conductor_types::external_api::shared::ClusterKind;
    use conductor_types::external_api::shared::ClusterStatus;
    use conductor_types::external_api::shared::HighAvailabilityMode;
    use conductor_types::external_api::shared::HostRole;
    use foundry_test_utils::dev;
    use foundry_test_utils::dev::poll::wait_for_condition;
    use foundry_test_utils::dev::poll::CondCheckError;
    use std::collections::BTreeSet;
    use std::sync::Arc;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Ignition builder that fails on demand
    struct FlakyIgnition {
        inner: DefaultIgnitionBuilder,
        fail_install_config: bool,
        failing_hosts: Mutex<BTreeSet<HostUuid>>,
    }

    #[async_trait]
    impl IgnitionBuilder for FlakyIgnition {
        async fn generate_install_config(
            &self,
            cluster: &Cluster,
            hosts: &[Host],
        ) -> anyhow::Result<()> {
            if self.fail_install_config {
                anyhow::bail!("pull secret rejected");
            }
            self.inner.generate_install_config(cluster, hosts).await
        }

        async fn render_host_ignition(
            &self,
            cluster: &Cluster,
            host: &Host,
        ) -> anyhow::Result<()> {
            if self.failing_hosts.lock().unwrap().contains(&host.id) {
                anyhow::bail!("cluster is unreachable");
            }
            self.inner.render_host_ignition(cluster, host).await
        }
    }

    fn flaky_conductor(
        log: &slog::Logger,
        fail_install_config: bool,
    ) -> (OpContext, Arc<Conductor>, Arc<FlakyIgnition>) {
        let config = test_config();
        let datastore = Arc::new(DataStore::new(
            log,
            config.database.lock_timeout(),
        ));
        let mut collaborators = Collaborators::from_config(&config, &datastore);
        let ignition = Arc::new(FlakyIgnition {
            inner: DefaultIgnitionBuilder::new(Arc::clone(
                &collaborators.blob_store,
            )),
            fail_install_config,
            failing_hosts: Mutex::new(BTreeSet::new()),
        });
        collaborators.ignition = ignition.clone();
        let conductor = Conductor::new_with_collaborators(
            log,
            &config,
            datastore,
            collaborators,
        );
        (OpContext::for_tests(log.clone()), conductor, ignition)
    }

    /// Subscription client that remembers what it was told
    #[derive(Default)]
    struct RecordingSubscription {
        updates: Mutex<Vec<(ClusterUuid, uuid::Uuid)>>,
    }

    #[async_trait]
    impl SubscriptionClient for RecordingSubscription {
        async fn update_subscription_cluster_id(
            &self,
            cluster: &Cluster,
            platform_cluster_id: uuid::Uuid,
        ) -> anyhow::Result<()> {
            self.updates
                .lock()
                .unwrap()
                .push((cluster.id, platform_cluster_id));
            Ok(())
        }
    }

    async fn wait_for_cluster_status(
        opctx: &OpContext,
        conductor: &Conductor,
        cluster_id: ClusterUuid,
        status: ClusterStatus,
    ) -> Cluster {
        wait_for_condition(
            || async {
                let cluster =
                    conductor.cluster_fetch(opctx, cluster_id).await?;
                if cluster.status == status {
                    Ok(cluster)
                } else {
                    Err(CondCheckError::<Error>::NotYet)
                }
            },
            &Duration::from_millis(20),
            &Duration::from_secs(30),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_cluster_install() {
        let logctx = dev::test_setup_log("test_cluster_install");
        let (opctx, conductor) = conductor_test(&logctx.log);
        let (cluster, _) = ready_cluster(&opctx, &conductor, "c1").await;
        let old_logs = format!("{}host.tar", logs_prefix(cluster.id));
        conductor
            .blob_store
            .upload(&old_logs, b"logs".to_vec())
            .await
            .unwrap();

        let preparing =
            conductor.cluster_install(&opctx, cluster.id).await.unwrap();
        assert!(!conductor.blob_store.exists(&old_logs).await.unwrap());
        assert!(matches!(
            preparing.status,
            ClusterStatus::PreparingForInstallation | ClusterStatus::Installing
        ));
        assert!(preparing.install_started_at.is_some());

        let installing = wait_for_cluster_status(
            &opctx,
            &conductor,
            cluster.id,
            ClusterStatus::Installing,
        )
        .await;
        assert!(installing.platform_cluster_id.is_some());

        let hosts = conductor.host_list(&opctx, cluster.id).await.unwrap();
        assert!(hosts.iter().all(|h| h.status == HostStatus::Installing));
        assert!(hosts.iter().all(|h| h.role == HostRole::Master));
        assert_eq!(hosts.iter().filter(|h| h.bootstrap).count(), 1);
        assert!(hosts.iter().max_by_key(|h| h.id).unwrap().bootstrap);

        // Installing twice is refused.
        let error =
            conductor.cluster_install(&opctx, cluster.id).await.unwrap_err();
        assert_matches!(error, Error::Conflict { .. });

        logctx.cleanup_successful();
    }

    #[tokio::test]
    async fn test_cluster_install_not_ready() {
        let logctx = dev::test_setup_log("test_cluster_install_not_ready");
        let (opctx, conductor) = conductor_test(&logctx.log);
        let cluster = create_cluster(
            &opctx,
            &conductor,
            &cluster_params("c1", HighAvailabilityMode::Full),
        )
        .await;
        let inventory = good_inventory("master-0", "192.168.126.10");
        register_host(&opctx, &conductor, &cluster, Some(&inventory)).await;

        let error =
            conductor.cluster_install(&opctx, cluster.id).await.unwrap_err();
        assert_matches!(error, Error::Conflict { ref message } => {
            assert!(
                message.starts_with("Cluster is not ready for installation, "),
                "{}",
                message
            );
        });
        let cluster =
            conductor.cluster_fetch(&opctx, cluster.id).await.unwrap();
        assert_eq!(cluster.status, ClusterStatus::Insufficient);

        logctx.cleanup_successful();
    }

    #[tokio::test]
    async fn test_preinstall_failure() {
        let logctx = dev::test_setup_log("test_preinstall_failure");
        let (opctx, conductor, _) = flaky_conductor(&logctx.log, true);
        let (cluster, _) = ready_cluster(&opctx, &conductor, "c1").await;

        conductor.cluster_install(&opctx, cluster.id).await.unwrap();
        let failed = wait_for_cluster_status(
            &opctx,
            &conductor,
            cluster.id,
            ClusterStatus::Error,
        )
        .await;
        assert!(failed.status_info.contains("pull secret rejected"));
        let hosts = conductor.host_list(&opctx, cluster.id).await.unwrap();
        assert!(hosts.iter().all(|h| h.status == HostStatus::Error));

        logctx.cleanup_successful();
    }

    #[tokio::test]
    async fn test_preinstall_updates_subscription() {
        let logctx =
            dev::test_setup_log("test_preinstall_updates_subscription");
        let config = test_config();
        let datastore = Arc::new(DataStore::new(
            &logctx.log,
            config.database.lock_timeout(),
        ));
        let subscription = Arc::new(RecordingSubscription::default());
        let mut collaborators = Collaborators::from_config(&config, &datastore);
        collaborators.subscription = Some(subscription.clone());
        let conductor = Conductor::new_with_collaborators(
            &logctx.log,
            &config,
            datastore,
            collaborators,
        );
        let opctx = OpContext::for_tests(logctx.log.clone());
        let (cluster, _) = ready_cluster(&opctx, &conductor, "c1").await;

        conductor.cluster_install(&opctx, cluster.id).await.unwrap();
        let installing = wait_for_cluster_status(
            &opctx,
            &conductor,
            cluster.id,
            ClusterStatus::Installing,
        )
        .await;
        let platform_cluster_id = installing.platform_cluster_id.unwrap();
        assert_eq!(
            *subscription.updates.lock().unwrap(),
            [(cluster.id, platform_cluster_id)]
        );

        logctx.cleanup_successful();
    }

    #[tokio::test]
    async fn test_single_node_install() {
        let logctx = dev::test_setup_log("test_single_node_install");
        let (opctx, conductor) = conductor_test(&logctx.log);
        let cluster = create_cluster(
            &opctx,
            &conductor,
            &cluster_params("sno", HighAvailabilityMode::None),
        )
        .await;
        let inventory = good_inventory("sno", "192.168.126.10");
        let host =
            register_host(&opctx, &conductor, &cluster, Some(&inventory)).await;
        assert_eq!(host.role, HostRole::Master);

        conductor.cluster_install(&opctx, cluster.id).await.unwrap();
        let host =
            conductor.host_fetch(&opctx, cluster.id, host.id).await.unwrap();
        assert_eq!(host.role, HostRole::Master);
        assert!(host.bootstrap);

        logctx.cleanup_successful();
    }

    #[tokio::test]
    async fn test_cancel_and_reset() {
        let logctx = dev::test_setup_log("test_cancel_and_reset");
        let (opctx, conductor) = conductor_test(&logctx.log);
        let (cluster, _) = ready_cluster(&opctx, &conductor, "c1").await;

        // Nothing to cancel yet.
        let error =
            conductor.cluster_cancel(&opctx, cluster.id).await.unwrap_err();
        assert_matches!(error, Error::Conflict { .. });
        let events = conductor.events_list(&opctx, cluster.id).await.unwrap();
        assert!(events
            .iter()
            .any(|e| e.message.starts_with("Failed to cancel installation")));

        conductor.cluster_install(&opctx, cluster.id).await.unwrap();
        wait_for_cluster_status(
            &opctx,
            &conductor,
            cluster.id,
            ClusterStatus::Installing,
        )
        .await;

        // One host that cannot be cancelled keeps everything as it was.
        let hosts = conductor.host_list(&opctx, cluster.id).await.unwrap();
        conductor
            .host_modify(&opctx, cluster.id, hosts[0].id, |host| {
                host.status = HostStatus::Installed;
                Ok(())
            })
            .await
            .unwrap();
        let error =
            conductor.cluster_cancel(&opctx, cluster.id).await.unwrap_err();
        assert_matches!(error, Error::Conflict { .. });
        let unchanged =
            conductor.cluster_fetch(&opctx, cluster.id).await.unwrap();
        assert_eq!(unchanged.status, ClusterStatus::Installing);
        let hosts = conductor.host_list(&opctx, cluster.id).await.unwrap();
        assert_eq!(
            hosts.iter().filter(|h| h.status == HostStatus::Installing).count(),
            2
        );

        conductor
            .host_modify(&opctx, cluster.id, hosts[0].id, |host| {
                host.status = HostStatus::Installing;
                Ok(())
            })
            .await
            .unwrap();
        let cancelled =
            conductor.cluster_cancel(&opctx, cluster.id).await.unwrap();
        assert_eq!(cancelled.status, ClusterStatus::Cancelled);
        let hosts = conductor.host_list(&opctx, cluster.id).await.unwrap();
        assert!(hosts.iter().all(|h| h.status == HostStatus::Cancelled));

        let bootstrap = format!("{}/bootstrap.ign", cluster.id);
        assert!(conductor.blob_store.exists(&bootstrap).await.unwrap());
        let reset = conductor.cluster_reset(&opctx, cluster.id).await.unwrap();
        assert_eq!(reset.status, ClusterStatus::Insufficient);
        assert_eq!(reset.platform_cluster_id, None);
        let hosts = conductor.host_list(&opctx, cluster.id).await.unwrap();
        assert!(hosts.iter().all(|h| h.status == HostStatus::Resetting));
        assert!(hosts.iter().all(|h| !h.bootstrap));
        assert!(!conductor.blob_store.exists(&bootstrap).await.unwrap());

        logctx.cleanup_successful();
    }

    #[tokio::test]
    async fn test_install_added_hosts() {
        let logctx = dev::test_setup_log("test_install_added_hosts");
        let (opctx, conductor, ignition) = flaky_conductor(&logctx.log, false);
        let mut params = cluster_params("day2", HighAvailabilityMode::Full);
        params.kind = ClusterKind::AddHostsCluster;
        let cluster = create_cluster(&opctx, &conductor, &params).await;

        let mut hosts = Vec::new();
        for i in 0..3 {
            let inventory = good_inventory(
                &format!("worker-{}", i),
                &format!("192.168.126.{}", 20 + i),
            );
            hosts.push(
                register_host(&opctx, &conductor, &cluster, Some(&inventory))
                    .await,
            );
        }
        conductor.cluster_refresh(&opctx, cluster.id).await.unwrap();
        ignition.failing_hosts.lock().unwrap().insert(hosts[1].id);

        let started = conductor
            .cluster_install_hosts(&opctx, cluster.id)
            .await
            .unwrap();
        assert_eq!(started.len(), 2);
        assert!(started.iter().all(|h| h.role == HostRole::Worker));
        let failed = conductor
            .host_fetch(&opctx, cluster.id, hosts[1].id)
            .await
            .unwrap();
        assert_eq!(failed.status, HostStatus::Known);
        let events = conductor.events_list(&opctx, cluster.id).await.unwrap();
        assert!(events.iter().any(|e| e.host_id == Some(hosts[1].id)
            && e.message.contains("failed to start installation")));

        // Installing the remaining host on its own works once the cluster
        // can be reached.
        ignition.failing_hosts.lock().unwrap().clear();
        let host = conductor
            .host_install(&opctx, cluster.id, hosts[1].id)
            .await
            .unwrap();
        assert_eq!(host.status, HostStatus::Installing);
        let worker_ign = format!("{}/worker-{}.ign", cluster.id, host.id);
        assert!(conductor.blob_store.exists(&worker_ign).await.unwrap());

        let error = conductor
            .host_install(&opctx, cluster.id, hosts[0].id)
            .await
            .unwrap_err();
        assert_matches!(error, Error::Conflict { .. });

        logctx.cleanup_successful();
    }
}
