// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Conductor, the service that registers hosts and drives cluster
//! installations

use crate::config::AgentConfig;
use crate::config::Config;
use conductor_db_queries::context::OpContext;
use conductor_db_queries::db::DataStore;
use conductor_types::agent::steps::StepType;
use slog::o;
use std::collections::BTreeMap;
use std::sync::Arc;

// The implementation of the conductor is split across modules that each
// extend `impl Conductor` for one area of the API.
pub mod background;
pub mod blob;
mod cluster;
pub mod connectivity;
mod dhcp;
pub mod engine;
pub mod events;
mod free_addresses;
mod host;
pub mod ignition;
mod install;
pub mod lease;
pub mod manifests;
pub(crate) mod refresh;
mod steps;
pub mod subscription;

use background::BackgroundTasks;
use background::HostMonitor;
use background::PreInstallQueue;
use background::PreInstallRunner;
use blob::BlobStore;
use blob::FsBlobStore;
use blob::MemoryBlobStore;
use engine::DefaultStateEngine;
use engine::StateEngine;
use events::DataStoreEventSink;
use events::EventSink;
use ignition::DefaultIgnitionBuilder;
use ignition::IgnitionBuilder;
use manifests::ChronyManifestsGenerator;
use manifests::ManifestsGenerator;
use steps::StepReplyHandler;
use subscription::SubscriptionClient;

/// The subsystems the conductor consults but does not own
pub struct Collaborators {
    pub engine: Arc<dyn StateEngine>,
    pub events: Arc<dyn EventSink>,
    pub blob_store: Arc<dyn BlobStore>,
    pub ignition: Arc<dyn IgnitionBuilder>,
    pub manifests: Arc<dyn ManifestsGenerator>,
    pub subscription: Option<Arc<dyn SubscriptionClient>>,
}

impl Collaborators {
    /// Returns the bundled implementation of every collaborator
    ///
    /// There is no bundled subscription client.
    pub fn from_config(
        config: &Config,
        datastore: &Arc<DataStore>,
    ) -> Collaborators {
        let blob_store: Arc<dyn BlobStore> = match &config.blob_store.root {
            Some(root) => Arc::new(FsBlobStore::new(root.clone())),
            None => Arc::new(MemoryBlobStore::new()),
        };
        Collaborators {
            engine: Arc::new(DefaultStateEngine::new(
                config.background_tasks.host_disconnect_timeout(),
            )),
            events: Arc::new(DataStoreEventSink::new(Arc::clone(datastore))),
            ignition: Arc::new(DefaultIgnitionBuilder::new(Arc::clone(
                &blob_store,
            ))),
            manifests: Arc::new(ChronyManifestsGenerator::new(Arc::clone(
                &blob_store,
            ))),
            blob_store,
            subscription: None,
        }
    }
}

/// Manages the conductor's state: clusters, their hosts, and the
/// conversation with each host's agent
pub struct Conductor {
    /// general server log
    log: slog::Logger,

    /// persistent storage for clusters, hosts and events
    datastore: Arc<DataStore>,

    /// what agents are told to run
    agent: AgentConfig,

    engine: Arc<dyn StateEngine>,
    events: Arc<dyn EventSink>,
    blob_store: Arc<dyn BlobStore>,
    ignition: Arc<dyn IgnitionBuilder>,
    manifests: Arc<dyn ManifestsGenerator>,

    /// handlers for successful step replies, by step type
    step_handlers: BTreeMap<StepType, Box<dyn StepReplyHandler>>,

    /// cluster installations waiting for the pre-install runner
    preinstall_queue: PreInstallQueue,

    /// background tasks
    background_tasks: BackgroundTasks,
}

impl Conductor {
    /// Create a new Conductor instance with the bundled collaborators
    ///
    /// Background tasks start right away, so this must be called from within
    /// a tokio runtime.
    pub fn new(log: &slog::Logger, config: &Config) -> Arc<Conductor> {
        let datastore = Arc::new(DataStore::new(
            &log.new(o!("component" => "DataStore")),
            config.database.lock_timeout(),
        ));
        let collaborators = Collaborators::from_config(config, &datastore);
        Conductor::new_with_collaborators(log, config, datastore, collaborators)
    }

    pub fn new_with_collaborators(
        log: &slog::Logger,
        config: &Config,
        datastore: Arc<DataStore>,
        collaborators: Collaborators,
    ) -> Arc<Conductor> {
        let Collaborators {
            engine,
            events,
            blob_store,
            ignition,
            manifests,
            subscription,
        } = collaborators;

        let preinstall_queue = PreInstallQueue::new();
        let background_ctx = OpContext::for_background(
            log.new(o!("component" => "BackgroundTasks")),
            "background_tasks",
        );
        let background_tasks = BackgroundTasks::start(
            &background_ctx,
            &config.background_tasks,
            HostMonitor::new(
                Arc::clone(&datastore),
                Arc::clone(&engine),
                config.background_tasks.host_monitor_disable,
            ),
            PreInstallRunner::new(
                preinstall_queue.clone(),
                Arc::clone(&datastore),
                Arc::clone(&engine),
                Arc::clone(&ignition),
                Arc::clone(&blob_store),
                subscription,
            ),
        );

        Arc::new(Conductor {
            log: log.new(o!("component" => "conductor")),
            datastore,
            agent: config.agent.clone(),
            engine,
            events,
            blob_store,
            ignition,
            manifests,
            step_handlers: steps::handlers(),
            preinstall_queue,
            background_tasks,
        })
    }

    pub fn datastore(&self) -> &Arc<DataStore> {
        &self.datastore
    }

    /// Asks the host monitor to refresh statuses soon, e.g. because a host
    /// reported new facts
    pub(crate) fn activate_host_monitor(&self) {
        self.background_tasks
            .activate(&self.background_tasks.task_host_monitor);
    }

    pub(crate) fn activate_preinstall_runner(&self) {
        self.background_tasks.activate(&self.background_tasks.task_preinstall);
    }
}
