// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use chrono::DateTime;
use chrono::Utc;
use conductor_types::external_api::shared::EventSeverity;
use conductor_types::external_api::views;
use foundry_common::typed_uuid::ClusterUuid;
use foundry_common::typed_uuid::EventUuid;
use foundry_common::typed_uuid::HostUuid;
use serde::Deserialize;
use serde::Serialize;

/// An audit event about a cluster or one of its hosts
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Event {
    pub id: EventUuid,
    pub cluster_id: ClusterUuid,
    pub host_id: Option<HostUuid>,
    pub severity: EventSeverity,
    pub message: String,
    pub event_time: DateTime<Utc>,
    pub request_id: Option<String>,
}

impl Event {
    pub fn new(
        cluster_id: ClusterUuid,
        host_id: Option<HostUuid>,
        severity: EventSeverity,
        message: String,
        request_id: Option<String>,
    ) -> Event {
        Event {
            id: EventUuid::new_v4(),
            cluster_id,
            host_id,
            severity,
            message,
            event_time: Utc::now(),
            request_id,
        }
    }
}

impl From<Event> for views::Event {
    fn from(event: Event) -> Self {
        views::Event {
            id: event.id,
            cluster_id: event.cluster_id,
            host_id: event.host_id,
            severity: event.severity,
            message: event.message,
            event_time: event.event_time,
            request_id: event.request_id,
        }
    }
}
