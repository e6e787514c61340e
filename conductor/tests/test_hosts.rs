// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Tests for host registration and the agent conversation through the API

use conductor_types::agent::steps::PostStepAction;
use conductor_types::agent::steps::StepReply;
use conductor_types::agent::steps::StepType;
use conductor_types::agent::steps::Steps;
use conductor_types::external_api::shared::HostStatus;
use conductor_types::external_api::views;
use dropshot::test_util::object_delete;
use dropshot::test_util::object_get;
use dropshot::test_util::read_json;
use foundry_common::typed_uuid::HostUuid;
use http::method::Method;
use http::StatusCode;

pub mod common;
use common::create_cluster;
use common::good_inventory;
use common::post_reply;
use common::register_host;
use common::reply_url;
use common::test_setup;

#[tokio::test]
async fn test_host_registration() {
    let cptestctx = test_setup("test_host_registration").await;
    let client = &cptestctx.client;
    let cluster = create_cluster(client, "c1").await;

    let registration = register_host(client, cluster.id).await;
    let host = registration.host;
    assert_eq!(host.cluster_id, cluster.id);
    assert_eq!(host.status, HostStatus::Discovering);
    assert!(!registration.next_step_runner_command.command.is_empty());

    let host_url = format!("/clusters/{}/hosts/{}", cluster.id, host.id);
    let fetched: views::Host = object_get(client, &host_url).await;
    assert_eq!(fetched.id, host.id);
    let hosts: Vec<views::Host> =
        object_get(client, &format!("/clusters/{}/hosts", cluster.id)).await;
    assert_eq!(hosts.len(), 1);

    client
        .make_request_error(
            Method::GET,
            &format!("/clusters/{}/hosts/{}", cluster.id, HostUuid::new_v4()),
            StatusCode::NOT_FOUND,
        )
        .await;

    let mut response = client
        .make_request_no_body(
            Method::POST,
            &format!("{}/actions/disable", host_url),
            StatusCode::OK,
        )
        .await
        .unwrap();
    let disabled: views::Host = read_json(&mut response).await;
    assert_eq!(disabled.status, HostStatus::Disabled);
    let mut response = client
        .make_request_no_body(
            Method::POST,
            &format!("{}/actions/enable", host_url),
            StatusCode::OK,
        )
        .await
        .unwrap();
    let enabled: views::Host = read_json(&mut response).await;
    assert_ne!(enabled.status, HostStatus::Disabled);

    object_delete(client, &host_url).await;
    client
        .make_request_error(Method::GET, &host_url, StatusCode::NOT_FOUND)
        .await;

    cptestctx.teardown().await;
}

#[tokio::test]
async fn test_host_instructions() {
    let cptestctx = test_setup("test_host_instructions").await;
    let client = &cptestctx.client;
    let cluster = create_cluster(client, "c1").await;
    let host = register_host(client, cluster.id).await.host;
    let instructions_url =
        format!("/clusters/{}/hosts/{}/instructions", cluster.id, host.id);

    // A discovering host is asked for its inventory.
    let steps: Steps = object_get(client, &instructions_url).await;
    assert_eq!(steps.post_step_action, PostStepAction::Continue);
    assert_eq!(steps.next_instruction_seconds, 60);
    let step_types: Vec<StepType> =
        steps.instructions.iter().map(|s| s.step_type).collect();
    assert_eq!(step_types, [StepType::Inventory]);

    // Replies that cannot be understood are bad requests and change nothing.
    let reply = |step_type: &str, output: &str| StepReply {
        step_id: String::from("step-1"),
        step_type: String::from(step_type),
        exit_code: 0,
        output: String::from(output),
        error: String::new(),
    };
    let error = client
        .make_request_error_body(
            Method::POST,
            &reply_url(cluster.id, host.id),
            reply("bogus-step", "{}"),
            StatusCode::BAD_REQUEST,
        )
        .await;
    assert!(error.message.contains("bogus-step"));
    client
        .make_request_error_body(
            Method::POST,
            &reply_url(cluster.id, host.id),
            reply("inventory", "not json"),
            StatusCode::BAD_REQUEST,
        )
        .await;

    // A failed step is accepted even though nothing is learned from it.
    let mut failed = reply("inventory", "");
    failed.exit_code = 1;
    failed.error = String::from("lshw: command not found");
    client
        .make_request(
            Method::POST,
            &reply_url(cluster.id, host.id),
            Some(failed),
            StatusCode::NO_CONTENT,
        )
        .await
        .unwrap();
    let fetched: views::Host = object_get(
        client,
        &format!("/clusters/{}/hosts/{}", cluster.id, host.id),
    )
    .await;
    assert_eq!(fetched.inventory, None);

    let inventory = good_inventory("master-0", "192.168.126.10");
    post_reply(client, &host, StepType::Inventory, &inventory).await;
    let fetched: views::Host = object_get(
        client,
        &format!("/clusters/{}/hosts/{}", cluster.id, host.id),
    )
    .await;
    assert_eq!(fetched.requested_hostname, "master-0");
    let stored: conductor_types::agent::replies::Inventory =
        serde_json::from_str(fetched.inventory.as_deref().unwrap()).unwrap();
    assert_eq!(stored, inventory);

    // Agents of unknown hosts are told so.
    client
        .make_request_error(
            Method::GET,
            &format!(
                "/clusters/{}/hosts/{}/instructions",
                cluster.id,
                HostUuid::new_v4()
            ),
            StatusCode::NOT_FOUND,
        )
        .await;

    cptestctx.teardown().await;
}
