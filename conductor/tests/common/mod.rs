// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Shared facilities for the conductor's integration tests

use conductor_types::agent::replies::Cpu;
use conductor_types::agent::replies::Disk;
use conductor_types::agent::replies::DiskEligibility;
use conductor_types::agent::replies::Interface;
use conductor_types::agent::replies::Inventory;
use conductor_types::agent::replies::Memory;
use conductor_types::agent::steps::StepReply;
use conductor_types::agent::steps::StepType;
use conductor_types::external_api::params;
use conductor_types::external_api::shared::ClusterKind;
use conductor_types::external_api::shared::HighAvailabilityMode;
use conductor_types::external_api::views;
use dropshot::test_util::objects_post;
use dropshot::test_util::ClientTestContext;
use dropshot::test_util::LogContext;
use dropshot::ConfigDropshot;
use dropshot::ConfigLogging;
use dropshot::ConfigLoggingLevel;
use foundry_common::typed_uuid::ClusterUuid;
use foundry_common::typed_uuid::HostUuid;
use foundry_conductor::AgentConfig;
use foundry_conductor::BackgroundTaskConfig;
use foundry_conductor::Config;
use foundry_conductor::Server;
use foundry_test_utils::dev;
use http::method::Method;
use http::StatusCode;
use serde::Serialize;
use slog::o;

pub const AGENT_IMAGE: &str = "quay.io/foundry/agent:v1.0.0";

pub struct ConductorTestContext {
    pub client: ClientTestContext,
    pub server: Server,
    pub logctx: LogContext,
}

impl ConductorTestContext {
    pub async fn teardown(self) {
        self.server.close().await.unwrap();
        self.logctx.cleanup_successful();
    }
}

/// Returns a configuration that listens on any free local port
///
/// Host and cluster statuses are only recomputed when a request asks for it
/// (e.g. updating a cluster), never behind a test's back.
pub fn test_config() -> Config {
    Config {
        dropshot: ConfigDropshot::default(),
        log: ConfigLogging::StderrTerminal { level: ConfigLoggingLevel::Info },
        agent: AgentConfig {
            image: String::from(AGENT_IMAGE),
            installer_image: String::from("quay.io/foundry/installer:v1.0.0"),
            controller_image: String::from(
                "quay.io/foundry/controller:v1.0.0",
            ),
            service_base_url: String::from("http://127.0.0.1:8090"),
            next_instruction_seconds: 60,
            disabled_steps: vec![],
            disk_check_timeout_secs: 180,
            ntp_sources: vec![],
        },
        background_tasks: BackgroundTaskConfig {
            host_monitor_disable: true,
            preinstall_period_secs: 3600,
            ..Default::default()
        },
        blob_store: Default::default(),
        database: Default::default(),
    }
}

pub async fn test_setup(test_name: &str) -> ConductorTestContext {
    let config = test_config();
    let logctx = dev::test_setup_log(test_name);
    let server = Server::start(&config, &logctx.log).await.unwrap();
    let client = ClientTestContext::new(
        server.local_addr(),
        logctx.log.new(o!("component" => "client")),
    );
    ConductorTestContext { client, server, logctx }
}

pub fn cluster_params(name: &str) -> params::ClusterCreate {
    params::ClusterCreate {
        name: String::from(name),
        base_dns_domain: String::from("example.com"),
        openshift_version: String::from("4.6"),
        kind: ClusterKind::Cluster,
        high_availability_mode: HighAvailabilityMode::Full,
        cluster_network_cidr: Some(String::from("10.128.0.0/14")),
        service_network_cidr: Some(String::from("172.30.0.0/16")),
        machine_network_cidr: Some(String::from("192.168.126.0/24")),
        api_vip: Some(String::from("192.168.126.100")),
        ingress_vip: Some(String::from("192.168.126.101")),
        vip_dhcp_allocation: false,
    }
}

pub async fn create_cluster(
    client: &ClientTestContext,
    name: &str,
) -> views::Cluster {
    objects_post(client, "/clusters", cluster_params(name)).await
}

/// Registers a new host the way its agent would
pub async fn register_host(
    client: &ClientTestContext,
    cluster_id: ClusterUuid,
) -> views::HostRegistrationResponse {
    objects_post(
        client,
        &format!("/clusters/{}/hosts", cluster_id),
        params::HostCreate {
            host_id: HostUuid::new_v4(),
            discovery_agent_version: String::from(AGENT_IMAGE),
        },
    )
    .await
}

/// Returns an inventory that satisfies the requirements of any role
pub fn good_inventory(hostname: &str, address: &str) -> Inventory {
    Inventory {
        hostname: String::from(hostname),
        cpu: Cpu { count: 16, ..Default::default() },
        memory: Memory { physical_bytes: 64 << 30, usable_bytes: 64 << 30 },
        disks: vec![Disk {
            name: String::from("sda"),
            by_path: String::from("/dev/disk/by-path/pci-0000:00:06.0"),
            size_bytes: 120 << 30,
            installation_eligibility: DiskEligibility {
                eligible: true,
                not_eligible_reasons: vec![],
            },
            ..Default::default()
        }],
        interfaces: vec![Interface {
            name: String::from("eth0"),
            mac_address: String::from("52:54:00:00:00:01"),
            ipv4_addresses: vec![format!("{}/24", address)],
            ..Default::default()
        }],
        ..Default::default()
    }
}

/// Posts a successful reply to a step of type `step_type` carrying `output`
/// encoded as JSON
pub async fn post_reply<T: Serialize>(
    client: &ClientTestContext,
    host: &views::Host,
    step_type: StepType,
    output: &T,
) {
    let reply = StepReply {
        step_id: format!("{}-test", step_type),
        step_type: step_type.to_string(),
        exit_code: 0,
        output: serde_json::to_string(output).unwrap(),
        error: String::new(),
    };
    client
        .make_request(
            Method::POST,
            &reply_url(host.cluster_id, host.id),
            Some(reply),
            StatusCode::NO_CONTENT,
        )
        .await
        .unwrap();
}

pub fn reply_url(cluster_id: ClusterUuid, host_id: HostUuid) -> String {
    format!("/clusters/{}/hosts/{}/instructions/reply", cluster_id, host_id)
}

/// Asks the conductor to recompute the statuses of a cluster and its hosts
/// by sending it an empty update
pub async fn refresh_cluster(
    client: &ClientTestContext,
    cluster_id: ClusterUuid,
) -> views::Cluster {
    let mut response = client
        .make_request(
            Method::PATCH,
            &format!("/clusters/{}", cluster_id),
            Some(params::ClusterUpdate::default()),
            StatusCode::OK,
        )
        .await
        .unwrap();
    dropshot::test_util::read_json(&mut response).await
}
