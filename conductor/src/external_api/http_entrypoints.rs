// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Handler functions (entrypoints) for the conductor's HTTP API
//!
//! Endpoints under `/clusters/{cluster_id}/hosts/{host_id}` that an agent
//! calls about its own host run as that agent.  Everything else runs as an
//! operator.

use crate::context::ServerContext;
use conductor_db_queries::context::Caller;
use conductor_db_queries::context::OpContext;
use conductor_types::agent::steps::StepReply;
use conductor_types::agent::steps::Steps;
use conductor_types::external_api::params;
use conductor_types::external_api::params::ClusterPath;
use conductor_types::external_api::params::HostPath;
use conductor_types::external_api::views;
use conductor_types::internal_api::views::BackgroundTask;
use dropshot::endpoint;
use dropshot::ApiDescription;
use dropshot::HttpError;
use dropshot::HttpResponseAccepted;
use dropshot::HttpResponseCreated;
use dropshot::HttpResponseDeleted;
use dropshot::HttpResponseOk;
use dropshot::HttpResponseUpdatedNoContent;
use dropshot::Path;
use dropshot::Query;
use dropshot::RequestContext;
use dropshot::TypedBody;
use foundry_common::typed_uuid::ClusterUuid;
use foundry_common::typed_uuid::HostUuid;
use schemars::JsonSchema;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::sync::Arc;

type ConductorApiDescription = ApiDescription<Arc<ServerContext>>;

/// name recorded for requests made through the operator-facing endpoints
const OPERATOR: &str = "external-api";

/// Returns a description of the conductor API
pub fn api() -> ConductorApiDescription {
    fn register_endpoints(
        api: &mut ConductorApiDescription,
    ) -> Result<(), String> {
        api.register(cluster_list)?;
        api.register(cluster_create)?;
        api.register(cluster_view)?;
        api.register(cluster_update)?;
        api.register(cluster_events)?;
        api.register(cluster_free_addresses)?;

        api.register(cluster_install)?;
        api.register(cluster_install_hosts)?;
        api.register(cluster_cancel)?;
        api.register(cluster_reset)?;

        api.register(host_list)?;
        api.register(host_register)?;
        api.register(host_view)?;
        api.register(host_deregister)?;
        api.register(host_enable)?;
        api.register(host_disable)?;
        api.register(host_install)?;

        api.register(host_instructions)?;
        api.register(host_instructions_reply)?;

        api.register(bgtask_list)?;
        api.register(bgtask_view)?;
        Ok(())
    }

    let mut api = ConductorApiDescription::new();
    if let Err(err) = register_endpoints(&mut api) {
        panic!("failed to register entrypoints: {}", err);
    }
    api
}

fn operator_opctx(rqctx: &RequestContext<Arc<ServerContext>>) -> OpContext {
    OpContext::for_request(rqctx, Caller::Operator(OPERATOR.to_string()), None)
}

fn agent_opctx(
    rqctx: &RequestContext<Arc<ServerContext>>,
    cluster_id: ClusterUuid,
    host_id: HostUuid,
) -> OpContext {
    OpContext::for_request(rqctx, Caller::Agent { cluster_id, host_id }, None)
}

// Clusters

/// List clusters
#[endpoint {
    method = GET,
    path = "/clusters",
    tags = ["clusters"],
}]
async fn cluster_list(
    rqctx: RequestContext<Arc<ServerContext>>,
) -> Result<HttpResponseOk<Vec<views::Cluster>>, HttpError> {
    let apictx = rqctx.context();
    let conductor = &apictx.conductor;
    let handler = async {
        let opctx = operator_opctx(&rqctx);
        let clusters = conductor.cluster_list(&opctx).await?;
        Ok(HttpResponseOk(clusters.into_iter().map(Into::into).collect()))
    };
    handler.await
}

/// Create a cluster
#[endpoint {
    method = POST,
    path = "/clusters",
    tags = ["clusters"],
}]
async fn cluster_create(
    rqctx: RequestContext<Arc<ServerContext>>,
    new_cluster: TypedBody<params::ClusterCreate>,
) -> Result<HttpResponseCreated<views::Cluster>, HttpError> {
    let apictx = rqctx.context();
    let conductor = &apictx.conductor;
    let new_cluster = new_cluster.into_inner();
    let handler = async {
        let opctx = operator_opctx(&rqctx);
        let cluster = conductor.cluster_create(&opctx, &new_cluster).await?;
        Ok(HttpResponseCreated(cluster.into()))
    };
    handler.await
}

/// Fetch a cluster
#[endpoint {
    method = GET,
    path = "/clusters/{cluster_id}",
    tags = ["clusters"],
}]
async fn cluster_view(
    rqctx: RequestContext<Arc<ServerContext>>,
    path_params: Path<ClusterPath>,
) -> Result<HttpResponseOk<views::Cluster>, HttpError> {
    let apictx = rqctx.context();
    let conductor = &apictx.conductor;
    let path = path_params.into_inner();
    let handler = async {
        let opctx = operator_opctx(&rqctx);
        let cluster = conductor.cluster_fetch(&opctx, path.cluster_id).await?;
        Ok(HttpResponseOk(cluster.into()))
    };
    handler.await
}

/// Update a cluster
///
/// Only clusters that are not installing can be updated.  The cluster's
/// status is recomputed afterwards.
#[endpoint {
    method = PATCH,
    path = "/clusters/{cluster_id}",
    tags = ["clusters"],
}]
async fn cluster_update(
    rqctx: RequestContext<Arc<ServerContext>>,
    path_params: Path<ClusterPath>,
    updated_cluster: TypedBody<params::ClusterUpdate>,
) -> Result<HttpResponseOk<views::Cluster>, HttpError> {
    let apictx = rqctx.context();
    let conductor = &apictx.conductor;
    let path = path_params.into_inner();
    let updated_cluster = updated_cluster.into_inner();
    let handler = async {
        let opctx = operator_opctx(&rqctx);
        let cluster = conductor
            .cluster_update(&opctx, path.cluster_id, &updated_cluster)
            .await?;
        Ok(HttpResponseOk(cluster.into()))
    };
    handler.await
}

/// List a cluster's events, oldest first
#[endpoint {
    method = GET,
    path = "/clusters/{cluster_id}/events",
    tags = ["clusters"],
}]
async fn cluster_events(
    rqctx: RequestContext<Arc<ServerContext>>,
    path_params: Path<ClusterPath>,
) -> Result<HttpResponseOk<Vec<views::Event>>, HttpError> {
    let apictx = rqctx.context();
    let conductor = &apictx.conductor;
    let path = path_params.into_inner();
    let handler = async {
        let opctx = operator_opctx(&rqctx);
        let events = conductor.events_list(&opctx, path.cluster_id).await?;
        Ok(HttpResponseOk(events.into_iter().map(Into::into).collect()))
    };
    handler.await
}

/// List addresses that every current host reports as free on a subnet
#[endpoint {
    method = GET,
    path = "/clusters/{cluster_id}/free-addresses",
    tags = ["clusters"],
}]
async fn cluster_free_addresses(
    rqctx: RequestContext<Arc<ServerContext>>,
    path_params: Path<ClusterPath>,
    query_params: Query<params::FreeAddressesQuery>,
) -> Result<HttpResponseOk<Vec<Ipv4Addr>>, HttpError> {
    let apictx = rqctx.context();
    let conductor = &apictx.conductor;
    let path = path_params.into_inner();
    let query = query_params.into_inner();
    let handler = async {
        let opctx = operator_opctx(&rqctx);
        let addresses = conductor
            .cluster_free_addresses(&opctx, path.cluster_id, &query)
            .await?;
        Ok(HttpResponseOk(addresses))
    };
    handler.await
}

/// Install a cluster
///
/// Returns once the cluster is preparing for installation.  The rest of the
/// preparation happens in the background; watch the cluster's status.
#[endpoint {
    method = POST,
    path = "/clusters/{cluster_id}/actions/install",
    tags = ["installation"],
}]
async fn cluster_install(
    rqctx: RequestContext<Arc<ServerContext>>,
    path_params: Path<ClusterPath>,
) -> Result<HttpResponseAccepted<views::Cluster>, HttpError> {
    let apictx = rqctx.context();
    let conductor = &apictx.conductor;
    let path = path_params.into_inner();
    let handler = async {
        let opctx = operator_opctx(&rqctx);
        let cluster =
            conductor.cluster_install(&opctx, path.cluster_id).await?;
        Ok(HttpResponseAccepted(cluster.into()))
    };
    handler.await
}

/// Install every known host added to an existing cluster
///
/// Returns the hosts that started installing.
#[endpoint {
    method = POST,
    path = "/clusters/{cluster_id}/actions/install-hosts",
    tags = ["installation"],
}]
async fn cluster_install_hosts(
    rqctx: RequestContext<Arc<ServerContext>>,
    path_params: Path<ClusterPath>,
) -> Result<HttpResponseAccepted<Vec<views::Host>>, HttpError> {
    let apictx = rqctx.context();
    let conductor = &apictx.conductor;
    let path = path_params.into_inner();
    let handler = async {
        let opctx = operator_opctx(&rqctx);
        let hosts =
            conductor.cluster_install_hosts(&opctx, path.cluster_id).await?;
        Ok(HttpResponseAccepted(hosts.into_iter().map(Into::into).collect()))
    };
    handler.await
}

/// Cancel a cluster's installation
#[endpoint {
    method = POST,
    path = "/clusters/{cluster_id}/actions/cancel",
    tags = ["installation"],
}]
async fn cluster_cancel(
    rqctx: RequestContext<Arc<ServerContext>>,
    path_params: Path<ClusterPath>,
) -> Result<HttpResponseAccepted<views::Cluster>, HttpError> {
    let apictx = rqctx.context();
    let conductor = &apictx.conductor;
    let path = path_params.into_inner();
    let handler = async {
        let opctx = operator_opctx(&rqctx);
        let cluster = conductor.cluster_cancel(&opctx, path.cluster_id).await?;
        Ok(HttpResponseAccepted(cluster.into()))
    };
    handler.await
}

/// Reset a cancelled or failed installation so it can be retried
#[endpoint {
    method = POST,
    path = "/clusters/{cluster_id}/actions/reset",
    tags = ["installation"],
}]
async fn cluster_reset(
    rqctx: RequestContext<Arc<ServerContext>>,
    path_params: Path<ClusterPath>,
) -> Result<HttpResponseAccepted<views::Cluster>, HttpError> {
    let apictx = rqctx.context();
    let conductor = &apictx.conductor;
    let path = path_params.into_inner();
    let handler = async {
        let opctx = operator_opctx(&rqctx);
        let cluster = conductor.cluster_reset(&opctx, path.cluster_id).await?;
        Ok(HttpResponseAccepted(cluster.into()))
    };
    handler.await
}

// Hosts

/// List a cluster's hosts
#[endpoint {
    method = GET,
    path = "/clusters/{cluster_id}/hosts",
    tags = ["hosts"],
}]
async fn host_list(
    rqctx: RequestContext<Arc<ServerContext>>,
    path_params: Path<ClusterPath>,
) -> Result<HttpResponseOk<Vec<views::Host>>, HttpError> {
    let apictx = rqctx.context();
    let conductor = &apictx.conductor;
    let path = path_params.into_inner();
    let handler = async {
        let opctx = operator_opctx(&rqctx);
        let hosts = conductor.host_list(&opctx, path.cluster_id).await?;
        Ok(HttpResponseOk(hosts.into_iter().map(Into::into).collect()))
    };
    handler.await
}

/// Register a host
///
/// Called by the agent on a host when it starts.  Registering again replaces
/// what is known about the host.
#[endpoint {
    method = POST,
    path = "/clusters/{cluster_id}/hosts",
    tags = ["agent"],
}]
async fn host_register(
    rqctx: RequestContext<Arc<ServerContext>>,
    path_params: Path<ClusterPath>,
    new_host: TypedBody<params::HostCreate>,
) -> Result<HttpResponseCreated<views::HostRegistrationResponse>, HttpError> {
    let apictx = rqctx.context();
    let conductor = &apictx.conductor;
    let path = path_params.into_inner();
    let new_host = new_host.into_inner();
    let handler = async {
        let opctx = agent_opctx(&rqctx, path.cluster_id, new_host.host_id);
        let registration =
            conductor.host_register(&opctx, path.cluster_id, &new_host).await?;
        Ok(HttpResponseCreated(views::HostRegistrationResponse {
            host: registration.host.into(),
            next_step_runner_command: registration.next_step_runner_command,
        }))
    };
    handler.await
}

/// Fetch a host
#[endpoint {
    method = GET,
    path = "/clusters/{cluster_id}/hosts/{host_id}",
    tags = ["hosts"],
}]
async fn host_view(
    rqctx: RequestContext<Arc<ServerContext>>,
    path_params: Path<HostPath>,
) -> Result<HttpResponseOk<views::Host>, HttpError> {
    let apictx = rqctx.context();
    let conductor = &apictx.conductor;
    let path = path_params.into_inner();
    let handler = async {
        let opctx = operator_opctx(&rqctx);
        let host = conductor
            .host_fetch(&opctx, path.cluster_id, path.host_id)
            .await?;
        Ok(HttpResponseOk(host.into()))
    };
    handler.await
}

/// Deregister a host
#[endpoint {
    method = DELETE,
    path = "/clusters/{cluster_id}/hosts/{host_id}",
    tags = ["hosts"],
}]
async fn host_deregister(
    rqctx: RequestContext<Arc<ServerContext>>,
    path_params: Path<HostPath>,
) -> Result<HttpResponseDeleted, HttpError> {
    let apictx = rqctx.context();
    let conductor = &apictx.conductor;
    let path = path_params.into_inner();
    let handler = async {
        let opctx = operator_opctx(&rqctx);
        conductor
            .host_deregister(&opctx, path.cluster_id, path.host_id)
            .await?;
        Ok(HttpResponseDeleted())
    };
    handler.await
}

/// Enable a host, so that it takes part in the installation
#[endpoint {
    method = POST,
    path = "/clusters/{cluster_id}/hosts/{host_id}/actions/enable",
    tags = ["hosts"],
}]
async fn host_enable(
    rqctx: RequestContext<Arc<ServerContext>>,
    path_params: Path<HostPath>,
) -> Result<HttpResponseOk<views::Host>, HttpError> {
    let apictx = rqctx.context();
    let conductor = &apictx.conductor;
    let path = path_params.into_inner();
    let handler = async {
        let opctx = operator_opctx(&rqctx);
        let host = conductor
            .host_enable(&opctx, path.cluster_id, path.host_id)
            .await?;
        Ok(HttpResponseOk(host.into()))
    };
    handler.await
}

/// Disable a host, leaving it out of the installation
#[endpoint {
    method = POST,
    path = "/clusters/{cluster_id}/hosts/{host_id}/actions/disable",
    tags = ["hosts"],
}]
async fn host_disable(
    rqctx: RequestContext<Arc<ServerContext>>,
    path_params: Path<HostPath>,
) -> Result<HttpResponseOk<views::Host>, HttpError> {
    let apictx = rqctx.context();
    let conductor = &apictx.conductor;
    let path = path_params.into_inner();
    let handler = async {
        let opctx = operator_opctx(&rqctx);
        let host = conductor
            .host_disable(&opctx, path.cluster_id, path.host_id)
            .await?;
        Ok(HttpResponseOk(host.into()))
    };
    handler.await
}

/// Install one host added to an existing cluster
#[endpoint {
    method = POST,
    path = "/clusters/{cluster_id}/hosts/{host_id}/actions/install",
    tags = ["installation"],
}]
async fn host_install(
    rqctx: RequestContext<Arc<ServerContext>>,
    path_params: Path<HostPath>,
) -> Result<HttpResponseAccepted<views::Host>, HttpError> {
    let apictx = rqctx.context();
    let conductor = &apictx.conductor;
    let path = path_params.into_inner();
    let handler = async {
        let opctx = operator_opctx(&rqctx);
        let host = conductor
            .host_install(&opctx, path.cluster_id, path.host_id)
            .await?;
        Ok(HttpResponseAccepted(host.into()))
    };
    handler.await
}

// Agent conversation

/// Fetch the steps the agent on a host should run next
///
/// Each call also records that the host checked in.
#[endpoint {
    method = GET,
    path = "/clusters/{cluster_id}/hosts/{host_id}/instructions",
    tags = ["agent"],
}]
async fn host_instructions(
    rqctx: RequestContext<Arc<ServerContext>>,
    path_params: Path<HostPath>,
) -> Result<HttpResponseOk<Steps>, HttpError> {
    let apictx = rqctx.context();
    let conductor = &apictx.conductor;
    let path = path_params.into_inner();
    let handler = async {
        let opctx = agent_opctx(&rqctx, path.cluster_id, path.host_id);
        let steps = conductor
            .get_next_steps(&opctx, path.cluster_id, path.host_id)
            .await?;
        Ok(HttpResponseOk(steps))
    };
    handler.await
}

/// Report the outcome of a step
#[endpoint {
    method = POST,
    path = "/clusters/{cluster_id}/hosts/{host_id}/instructions/reply",
    tags = ["agent"],
}]
async fn host_instructions_reply(
    rqctx: RequestContext<Arc<ServerContext>>,
    path_params: Path<HostPath>,
    reply: TypedBody<StepReply>,
) -> Result<HttpResponseUpdatedNoContent, HttpError> {
    let apictx = rqctx.context();
    let conductor = &apictx.conductor;
    let path = path_params.into_inner();
    let reply = reply.into_inner();
    let handler = async {
        let opctx = agent_opctx(&rqctx, path.cluster_id, path.host_id);
        conductor
            .post_step_reply(&opctx, path.cluster_id, path.host_id, &reply)
            .await?;
        Ok(HttpResponseUpdatedNoContent())
    };
    handler.await
}

// Background tasks

#[derive(Deserialize, JsonSchema)]
struct BackgroundTaskPathParam {
    bgtask_name: String,
}

/// List background tasks
///
/// This is a list of discrete background activities that the conductor
/// carries out.  This is exposed for support and debugging.
#[endpoint {
    method = GET,
    path = "/bgtasks",
    tags = ["system"],
}]
async fn bgtask_list(
    rqctx: RequestContext<Arc<ServerContext>>,
) -> Result<HttpResponseOk<BTreeMap<String, BackgroundTask>>, HttpError> {
    let apictx = rqctx.context();
    let conductor = &apictx.conductor;
    let handler = async {
        let opctx = operator_opctx(&rqctx);
        let tasks = conductor.bgtasks_list(&opctx).await?;
        Ok(HttpResponseOk(tasks))
    };
    handler.await
}

/// Fetch status of one background task
#[endpoint {
    method = GET,
    path = "/bgtasks/{bgtask_name}",
    tags = ["system"],
}]
async fn bgtask_view(
    rqctx: RequestContext<Arc<ServerContext>>,
    path_params: Path<BackgroundTaskPathParam>,
) -> Result<HttpResponseOk<BackgroundTask>, HttpError> {
    let apictx = rqctx.context();
    let conductor = &apictx.conductor;
    let path = path_params.into_inner();
    let handler = async {
        let opctx = operator_opctx(&rqctx);
        let task = conductor.bgtask_status(&opctx, &path.bgtask_name).await?;
        Ok(HttpResponseOk(task))
    };
    handler.await
}
