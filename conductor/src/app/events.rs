// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Audit events outside of transactions

use async_trait::async_trait;
use conductor_db_model::Event;
use conductor_db_queries::context::OpContext;
use conductor_db_queries::db::DataStore;
use conductor_types::external_api::shared::EventSeverity;
use foundry_common::typed_uuid::ClusterUuid;
use foundry_common::typed_uuid::HostUuid;
use slog::warn;
use std::sync::Arc;

/// Records audit events
///
/// Recording an event never fails the operation that emits it.  Events that
/// must appear only if a transaction commits are staged on the transaction
/// instead (see [`super::refresh`]).
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn add_event(
        &self,
        opctx: &OpContext,
        cluster_id: ClusterUuid,
        host_id: Option<HostUuid>,
        severity: EventSeverity,
        message: String,
    );
}

/// Stores events in the conductor's datastore, where `GET .../events` finds
/// them
pub struct DataStoreEventSink {
    datastore: Arc<DataStore>,
}

impl DataStoreEventSink {
    pub fn new(datastore: Arc<DataStore>) -> DataStoreEventSink {
        DataStoreEventSink { datastore }
    }
}

#[async_trait]
impl EventSink for DataStoreEventSink {
    async fn add_event(
        &self,
        opctx: &OpContext,
        cluster_id: ClusterUuid,
        host_id: Option<HostUuid>,
        severity: EventSeverity,
        message: String,
    ) {
        let event = Event::new(
            cluster_id,
            host_id,
            severity,
            message,
            opctx.request_id().map(String::from),
        );
        if let Err(error) = self.datastore.event_create(opctx, event).await {
            warn!(opctx.log, "failed to record event";
                "cluster_id" => %cluster_id,
                "error" => %error,
            );
        }
    }
}
