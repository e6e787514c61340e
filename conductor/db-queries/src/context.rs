// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Shared state used by API request handlers and background tasks

use chrono::DateTime;
use chrono::Utc;
use dropshot::RequestContext;
use foundry_common::api::external::Error;
use foundry_common::typed_uuid::ClusterUuid;
use foundry_common::typed_uuid::HostUuid;
use slog::o;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use std::time::Instant;

/// Who asked for an operation
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Caller {
    /// the agent running on a host, identified by the request path
    Agent { cluster_id: ClusterUuid, host_id: HostUuid },
    /// an operator using the external API
    Operator(String),
    /// the conductor itself, on behalf of the named background task
    Background(String),
}

impl fmt::Display for Caller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Caller::Agent { host_id, .. } => write!(f, "agent:{}", host_id),
            Caller::Operator(name) => write!(f, "operator:{}", name),
            Caller::Background(task) => write!(f, "background:{}", task),
        }
    }
}

/// Provides general facilities scoped to whatever operation the conductor is
/// currently doing
///
/// Every app-level and datastore call takes an `OpContext`.  It carries the
/// logger for the operation, the id used to correlate log lines and events
/// with the request that caused them, the identity of the caller, and an
/// optional deadline after which the operation should give up waiting (e.g.,
/// on a row lock).
pub struct OpContext {
    pub log: slog::Logger,
    caller: Caller,
    request_id: Option<String>,
    deadline: Option<Instant>,
    created_instant: Instant,
    created_walltime: DateTime<Utc>,
    metadata: BTreeMap<String, String>,
}

impl OpContext {
    /// Returns a context suitable for use in handling an HTTP request
    ///
    /// The request id assigned by Dropshot doubles as the trace id.
    pub fn for_request<T: Send + Sync + 'static>(
        rqctx: &RequestContext<T>,
        caller: Caller,
        timeout: Option<Duration>,
    ) -> OpContext {
        let request_id = rqctx.request_id.clone();
        let log = rqctx.log.new(o!("caller" => caller.to_string()));
        let mut metadata = BTreeMap::new();
        metadata.insert(String::from("request_id"), request_id.clone());
        metadata.insert(
            String::from("http_method"),
            rqctx.request.method().to_string(),
        );
        metadata.insert(String::from("path"), rqctx.request.uri().to_string());
        OpContext::new(log, caller, Some(request_id), timeout, metadata)
    }

    /// Returns a context suitable for use in background operations
    pub fn for_background(log: slog::Logger, task_name: &str) -> OpContext {
        let log = log.new(o!("background_task" => task_name.to_string()));
        let mut metadata = BTreeMap::new();
        metadata
            .insert(String::from("background_task"), task_name.to_string());
        OpContext::new(
            log,
            Caller::Background(task_name.to_string()),
            None,
            None,
            metadata,
        )
    }

    /// Returns a context suitable for automated tests
    pub fn for_tests(log: slog::Logger) -> OpContext {
        OpContext::new(
            log,
            Caller::Operator(String::from("test-suite")),
            Some(String::from("test-request")),
            None,
            BTreeMap::new(),
        )
    }

    fn new(
        log: slog::Logger,
        caller: Caller,
        request_id: Option<String>,
        timeout: Option<Duration>,
        metadata: BTreeMap<String, String>,
    ) -> OpContext {
        let created_instant = Instant::now();
        OpContext {
            log,
            caller,
            request_id,
            deadline: timeout.map(|t| created_instant + t),
            created_instant,
            created_walltime: Utc::now(),
            metadata,
        }
    }

    /// Returns a context for a suboperation of this one
    ///
    /// The child keeps the caller, trace id and deadline of its parent and
    /// adds `new_metadata` to the parent's metadata.  This is how work handed
    /// to a background runner stays attributable to the request that queued
    /// it.
    pub fn child(&self, new_metadata: BTreeMap<String, String>) -> OpContext {
        let created_instant = Instant::now();
        let created_walltime = Utc::now();
        let mut metadata = self.metadata.clone();
        let mut log = self.log.clone();
        for (k, v) in new_metadata {
            log = log.new(o!(k.clone() => v.clone()));
            metadata.insert(k, v);
        }

        OpContext {
            log,
            caller: self.caller.clone(),
            request_id: self.request_id.clone(),
            deadline: self.deadline,
            created_instant,
            created_walltime,
            metadata,
        }
    }

    /// Like [`OpContext::child()`], but without the parent's deadline
    ///
    /// Used for work that outlives the request that started it.
    pub fn detached(
        &self,
        new_metadata: BTreeMap<String, String>,
    ) -> OpContext {
        let mut child = self.child(new_metadata);
        child.deadline = None;
        child
    }

    pub fn caller(&self) -> &Caller {
        &self.caller
    }

    pub fn request_id(&self) -> Option<&str> {
        self.request_id.as_deref()
    }

    pub fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }

    pub fn created_walltime(&self) -> DateTime<Utc> {
        self.created_walltime
    }

    pub fn elapsed(&self) -> Duration {
        self.created_instant.elapsed()
    }

    /// Returns how long this operation may still wait, if it has a deadline
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline.map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Fails with [`Error::ServiceUnavailable`] once the deadline has passed
    pub fn check_deadline(&self) -> Result<(), Error> {
        match self.remaining() {
            Some(remaining) if remaining.is_zero() => Err(Error::unavail(
                &format!(
                    "operation exceeded its deadline after {:?}",
                    self.elapsed()
                ),
            )),
            _ => Ok(()),
        }
    }
}
