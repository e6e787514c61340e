// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Which instructions a polling agent gets, by host status

use super::commands::StepContext;
use crate::app::Conductor;
use crate::config::AgentConfig;
use conductor_db_model::Cluster;
use conductor_db_model::Host;
use conductor_db_queries::context::OpContext;
use conductor_types::agent::steps::PostStepAction;
use conductor_types::agent::steps::StepType;
use conductor_types::agent::steps::Steps;
use conductor_types::external_api::shared::HostStatus;
use foundry_common::api::external::Error;
use foundry_common::typed_uuid::ClusterUuid;
use foundry_common::typed_uuid::HostUuid;
use slog::warn;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Interval {
    Normal,
    /// the host has nothing urgent to report; poll half as often
    Backoff,
}

struct Plan {
    steps: &'static [StepType],
    interval: Interval,
    action: PostStepAction,
}

const fn plan(steps: &'static [StepType], interval: Interval) -> Plan {
    Plan { steps, interval, action: PostStepAction::Continue }
}

const EXIT: Plan = Plan {
    steps: &[],
    interval: Interval::Backoff,
    action: PostStepAction::Exit,
};

fn day1_plan(status: HostStatus) -> Plan {
    use StepType::*;
    match status {
        HostStatus::Known
        | HostStatus::Insufficient
        | HostStatus::PendingForInput => plan(
            &[
                ConnectivityCheck,
                FreeNetworkAddresses,
                DhcpLeaseAllocate,
                Inventory,
                NtpSynchronizer,
            ],
            Interval::Normal,
        ),
        HostStatus::Discovering => plan(&[Inventory], Interval::Normal),
        HostStatus::Disconnected => plan(&[Inventory], Interval::Backoff),
        HostStatus::PreparingForInstallation => plan(
            &[
                DhcpLeaseAllocate,
                InstallationDiskSpeedCheck,
                ContainerImageAvailability,
            ],
            Interval::Normal,
        ),
        HostStatus::Installing => {
            plan(&[Install, DhcpLeaseAllocate], Interval::Backoff)
        }
        HostStatus::InstallingInProgress => {
            plan(&[Inventory, DhcpLeaseAllocate], Interval::Backoff)
        }
        HostStatus::Disabled => plan(&[], Interval::Backoff),
        HostStatus::Resetting => plan(&[ResetInstallation], Interval::Backoff),
        HostStatus::Error | HostStatus::Cancelled => {
            plan(&[LogsGather, StopInstallation], Interval::Backoff)
        }
        HostStatus::Installed | HostStatus::AddedToExistingCluster => EXIT,
    }
}

fn day2_plan(status: HostStatus) -> Plan {
    use StepType::*;
    match status {
        HostStatus::Known | HostStatus::Insufficient => plan(
            &[
                ConnectivityCheck,
                ApiVipConnectivityCheck,
                Inventory,
                NtpSynchronizer,
                DomainResolution,
            ],
            Interval::Normal,
        ),
        HostStatus::Discovering => {
            plan(&[Inventory, NtpSynchronizer], Interval::Normal)
        }
        HostStatus::PendingForInput => plan(
            &[Inventory, ConnectivityCheck, ApiVipConnectivityCheck],
            Interval::Normal,
        ),
        HostStatus::Disconnected => plan(&[Inventory], Interval::Backoff),
        HostStatus::Installing => plan(&[Install], Interval::Backoff),
        HostStatus::Error | HostStatus::Cancelled => {
            plan(&[StopInstallation], Interval::Backoff)
        }
        HostStatus::Resetting => plan(&[ResetInstallation], Interval::Backoff),
        HostStatus::PreparingForInstallation
        | HostStatus::InstallingInProgress
        | HostStatus::Disabled => plan(&[], Interval::Backoff),
        HostStatus::Installed | HostStatus::AddedToExistingCluster => EXIT,
    }
}

/// Computes the instructions for `host`
///
/// A builder failure is logged and ends the instruction set early: the agent
/// still gets the instructions built so far and polls again later.
fn next_steps(
    opctx: &OpContext,
    agent: &AgentConfig,
    cluster: &Cluster,
    host: &Host,
    hosts: &[Host],
) -> Steps {
    let plan = if host.is_day2() {
        day2_plan(host.status)
    } else {
        day1_plan(host.status)
    };
    let next_instruction_seconds = match plan.interval {
        Interval::Normal => agent.next_instruction_seconds,
        Interval::Backoff => agent.next_instruction_seconds * 2,
    };

    let ctx = StepContext { agent, cluster, host, hosts };
    let mut instructions = Vec::new();
    for step_type in plan.steps {
        if agent.disabled_steps.contains(step_type) {
            continue;
        }
        match ctx.build(*step_type) {
            Ok(Some(step)) => instructions.push(step),
            Ok(None) => (),
            Err(error) => {
                warn!(opctx.log, "failed to build instruction";
                    "cluster_id" => %cluster.id,
                    "host_id" => %host.id,
                    "step_type" => %step_type,
                    "error" => %error,
                );
                break;
            }
        }
    }

    Steps {
        next_instruction_seconds,
        post_step_action: plan.action,
        instructions,
    }
}

impl Conductor {
    /// Records the agent's poll and returns its next instructions
    pub(crate) async fn get_next_steps(
        &self,
        opctx: &OpContext,
        cluster_id: ClusterUuid,
        host_id: HostUuid,
    ) -> Result<Steps, Error> {
        let host =
            self.datastore.host_checked_in(opctx, cluster_id, host_id).await?;
        let cluster = self.datastore.cluster_fetch(opctx, cluster_id).await?;
        let hosts = self.datastore.host_list(opctx, cluster_id).await?;
        Ok(next_steps(opctx, &self.agent, &cluster, &host, &hosts))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::app::test_helpers::cluster_params;
    use crate::app::test_helpers::conductor_test;
    use crate::app::test_helpers::create_cluster;
    use crate::app::test_helpers::good_inventory;
    use crate::app::test_helpers::register_host;
    use crate::app::test_helpers::test_config;
    use assert_matches::assert_matches;
    use conductor_types::external_api::shared::HighAvailabilityMode;
    use conductor_types::external_api::shared::HostKind;
    use foundry_test_utils::dev;
    use strum::IntoEnumIterator;

    fn step_types(steps: &Steps) -> Vec<StepType> {
        steps.instructions.iter().map(|s| s.step_type).collect()
    }

    #[test]
    fn test_every_status_has_a_plan() {
        for status in HostStatus::iter() {
            let day1 = day1_plan(status);
            let day2 = day2_plan(status);
            if day1.action == PostStepAction::Exit {
                assert!(day1.steps.is_empty());
                assert_eq!(day2.action, PostStepAction::Exit);
            }
        }
    }

    #[tokio::test]
    async fn test_next_steps_by_status() {
        let logctx = dev::test_setup_log("test_next_steps_by_status");
        let (opctx, conductor) = conductor_test(&logctx.log);
        let cluster = create_cluster(
            &opctx,
            &conductor,
            &cluster_params("c1", HighAvailabilityMode::Full),
        )
        .await;
        let host = register_host(&opctx, &conductor, &cluster, None).await;
        let before = host.checked_in_at;

        let steps = conductor
            .get_next_steps(&opctx, cluster.id, host.id)
            .await
            .unwrap();
        assert_eq!(step_types(&steps), [StepType::Inventory]);
        assert_eq!(steps.next_instruction_seconds, 60);
        assert_eq!(steps.post_step_action, PostStepAction::Continue);
        let host =
            conductor.host_fetch(&opctx, cluster.id, host.id).await.unwrap();
        assert!(host.checked_in_at >= before);

        let host = conductor
            .host_modify(&opctx, cluster.id, host.id, |host| {
                host.status = HostStatus::Installed;
                Ok(())
            })
            .await
            .unwrap();
        let steps = conductor
            .get_next_steps(&opctx, cluster.id, host.id)
            .await
            .unwrap();
        assert!(steps.instructions.is_empty());
        assert_eq!(steps.post_step_action, PostStepAction::Exit);
        assert_eq!(steps.next_instruction_seconds, 120);

        let error = conductor
            .get_next_steps(&opctx, cluster.id, HostUuid::new_v4())
            .await
            .unwrap_err();
        assert_matches!(error, Error::ObjectNotFound { .. });

        logctx.cleanup_successful();
    }

    #[tokio::test]
    async fn test_polling_is_idempotent() {
        let logctx = dev::test_setup_log("test_polling_is_idempotent");
        let (opctx, conductor) = conductor_test(&logctx.log);
        let cluster = create_cluster(
            &opctx,
            &conductor,
            &cluster_params("c1", HighAvailabilityMode::Full),
        )
        .await;
        let host = register_host(&opctx, &conductor, &cluster, None).await;
        let instructions = |steps: &Steps| -> Vec<(StepType, Vec<String>)> {
            steps
                .instructions
                .iter()
                .map(|s| (s.step_type, s.args.clone()))
                .collect()
        };

        let first = conductor
            .get_next_steps(&opctx, cluster.id, host.id)
            .await
            .unwrap();
        let t1 = conductor
            .host_fetch(&opctx, cluster.id, host.id)
            .await
            .unwrap()
            .checked_in_at;
        let second = conductor
            .get_next_steps(&opctx, cluster.id, host.id)
            .await
            .unwrap();
        let t2 = conductor
            .host_fetch(&opctx, cluster.id, host.id)
            .await
            .unwrap()
            .checked_in_at;

        assert_eq!(instructions(&first), instructions(&second));
        assert_eq!(
            first.next_instruction_seconds,
            second.next_instruction_seconds
        );
        assert_eq!(first.post_step_action, second.post_step_action);
        assert!(t1 < t2);

        logctx.cleanup_successful();
    }

    #[test]
    fn test_known_host_steps() {
        let logctx = dev::test_setup_log("test_known_host_steps");
        let opctx = OpContext::for_tests(logctx.log.clone());
        let mut config = test_config();
        let cluster = Cluster::from_create(&cluster_params(
            "c1",
            HighAvailabilityMode::Full,
        ));
        let mut host = Host::new(
            HostUuid::new_v4(),
            cluster.id,
            HostKind::Host,
            String::from("v1"),
        );
        host.status = HostStatus::Known;
        host.inventory = Some(
            serde_json::to_string(&good_inventory("h", "192.168.126.10"))
                .unwrap(),
        );
        let hosts = [host.clone()];

        // Alone in the cluster, with static VIPs: nothing to check or lease.
        let steps = next_steps(&opctx, &config.agent, &cluster, &host, &hosts);
        assert_eq!(
            step_types(&steps),
            [
                StepType::FreeNetworkAddresses,
                StepType::Inventory,
                StepType::NtpSynchronizer
            ]
        );

        config.agent.disabled_steps = vec![StepType::NtpSynchronizer];
        let steps = next_steps(&opctx, &config.agent, &cluster, &host, &hosts);
        assert_eq!(
            step_types(&steps),
            [StepType::FreeNetworkAddresses, StepType::Inventory]
        );

        // A builder failure keeps what was built before it.
        let mut dhcp = cluster.clone();
        dhcp.vip_dhcp_allocation = true;
        dhcp.machine_network_cidr = Some(String::from("10.0.0.0/24"));
        let steps = next_steps(&opctx, &config.agent, &dhcp, &host, &hosts);
        assert_eq!(step_types(&steps), [StepType::FreeNetworkAddresses]);

        host.kind = HostKind::AddToExistingClusterHost;
        let steps = next_steps(&opctx, &config.agent, &cluster, &host, &hosts);
        assert_eq!(
            step_types(&steps),
            [
                StepType::ApiVipConnectivityCheck,
                StepType::Inventory,
                StepType::DomainResolution
            ]
        );

        logctx.cleanup_successful();
    }
}
