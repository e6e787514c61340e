// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! [`DataStore`] methods on [`Event`]s.

use super::DataStore;
use crate::context::OpContext;
use crate::db::Locking;
use conductor_db_model::Event;
use foundry_common::api::external::CreateResult;
use foundry_common::api::external::ListResultVec;
use foundry_common::typed_uuid::ClusterUuid;
use foundry_common::typed_uuid::HostUuid;

impl DataStore {
    pub async fn event_create(
        &self,
        opctx: &OpContext,
        event: Event,
    ) -> CreateResult<Event> {
        let mut tx = self.begin(opctx, Locking::None);
        tx.event_insert(event.clone());
        tx.commit()?;
        Ok(event)
    }

    /// Lists a cluster's events, oldest first
    ///
    /// With `host_id`, only the events about that host are returned.
    pub async fn event_list(
        &self,
        _opctx: &OpContext,
        cluster_id: ClusterUuid,
        host_id: Option<HostUuid>,
    ) -> ListResultVec<Event> {
        let mut events: Vec<Event> = self
            .tables()
            .events
            .iter()
            .filter(|e| e.cluster_id == cluster_id)
            .filter(|e| host_id.is_none() || e.host_id == host_id)
            .cloned()
            .collect();
        events.sort_by_key(|e| e.event_time);
        Ok(events)
    }
}

#[cfg(test)]
mod test {
    use crate::db::datastore::test_utils::create_cluster;
    use crate::db::datastore::test_utils::datastore_test;
    use crate::db::Locking;
    use conductor_db_model::Event;
    use conductor_types::external_api::shared::EventSeverity;
    use foundry_common::typed_uuid::HostUuid;
    use foundry_test_utils::dev;

    #[tokio::test]
    async fn test_events_follow_transaction_outcome() {
        let logctx =
            dev::test_setup_log("test_events_follow_transaction_outcome");
        let (opctx, datastore) = datastore_test(&logctx.log);
        let cluster = create_cluster(&opctx, &datastore, "c1").await;
        let host_id = HostUuid::new_v4();

        datastore
            .event_create(
                &opctx,
                Event::new(
                    cluster.id,
                    None,
                    EventSeverity::Info,
                    String::from("cluster created"),
                    None,
                ),
            )
            .await
            .unwrap();

        let mut tx = datastore.begin(&opctx, Locking::None);
        tx.event_insert(Event::new(
            cluster.id,
            Some(host_id),
            EventSeverity::Error,
            String::from("rolled back"),
            None,
        ));
        drop(tx);

        let mut tx = datastore.begin(&opctx, Locking::None);
        tx.event_insert(Event::new(
            cluster.id,
            Some(host_id),
            EventSeverity::Warning,
            String::from("committed"),
            None,
        ));
        tx.commit().unwrap();

        let all = datastore.event_list(&opctx, cluster.id, None).await.unwrap();
        let messages: Vec<_> = all.iter().map(|e| e.message.as_str()).collect();
        assert_eq!(messages, vec!["cluster created", "committed"]);

        let for_host = datastore
            .event_list(&opctx, cluster.id, Some(host_id))
            .await
            .unwrap();
        assert_eq!(for_host.len(), 1);
        assert_eq!(for_host[0].severity, EventSeverity::Warning);
        logctx.cleanup_successful();
    }
}
