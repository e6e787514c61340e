// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Handlers for successful step replies

use super::sanitize;
use super::StepReplyHandler;
use crate::app::Conductor;
use async_trait::async_trait;
use conductor_db_model::Host;
use conductor_db_queries::context::OpContext;
use conductor_types::agent::replies::ApiVipConnectivityResponse;
use conductor_types::agent::replies::ConnectivityReport;
use conductor_types::agent::replies::ContainerImageAvailability;
use conductor_types::agent::replies::ContainerImageAvailabilityResponse;
use conductor_types::agent::replies::DhcpAllocationResponse;
use conductor_types::agent::replies::DiskInfo;
use conductor_types::agent::replies::DiskSpeed;
use conductor_types::agent::replies::DiskSpeedCheckResponse;
use conductor_types::agent::replies::DomainResolutionResponse;
use conductor_types::agent::replies::FreeNetworksAddresses;
use conductor_types::agent::replies::Inventory;
use conductor_types::agent::replies::NtpSynchronizationResponse;
use conductor_types::agent::steps::StepType;
use foundry_common::api::external::Error;
use serde::de::DeserializeOwned;
use serde::Serialize;
use slog::debug;
use slog::warn;
use std::collections::BTreeMap;
use std::marker::PhantomData;

/// Returns the handler registered for each step type that has one
pub(crate) fn handlers() -> BTreeMap<StepType, Box<dyn StepReplyHandler>> {
    let mut handlers: BTreeMap<StepType, Box<dyn StepReplyHandler>> =
        BTreeMap::new();
    handlers.insert(StepType::Inventory, Box::new(InventoryHandler));
    handlers.insert(
        StepType::ConnectivityCheck,
        Box::new(StoreReport::<ConnectivityReport>::new(
            StepType::ConnectivityCheck,
            |host, report| host.connectivity = Some(report),
        )),
    );
    handlers.insert(
        StepType::ApiVipConnectivityCheck,
        Box::new(StoreReport::<ApiVipConnectivityResponse>::new(
            StepType::ApiVipConnectivityCheck,
            |host, report| host.api_vip_connectivity = Some(report),
        )),
    );
    handlers.insert(
        StepType::DomainResolution,
        Box::new(StoreReport::<DomainResolutionResponse>::new(
            StepType::DomainResolution,
            |host, report| host.domain_name_resolutions = Some(report),
        )),
    );
    handlers
        .insert(StepType::FreeNetworkAddresses, Box::new(FreeAddressesHandler));
    handlers.insert(StepType::DhcpLeaseAllocate, Box::new(DhcpHandler));
    handlers.insert(StepType::NtpSynchronizer, Box::new(NtpHandler));
    handlers.insert(
        StepType::ContainerImageAvailability,
        Box::new(ImageAvailabilityHandler),
    );
    handlers.insert(
        StepType::InstallationDiskSpeedCheck,
        Box::new(DiskSpeedHandler),
    );
    handlers
}

/// Stores the sanitized report as is in one field of the host
struct StoreReport<T> {
    step_type: StepType,
    store: fn(&mut Host, String),
    payload: PhantomData<fn() -> T>,
}

impl<T> StoreReport<T> {
    fn new(step_type: StepType, store: fn(&mut Host, String)) -> Self {
        StoreReport { step_type, store, payload: PhantomData }
    }
}

#[async_trait]
impl<T> StepReplyHandler for StoreReport<T>
where
    T: DeserializeOwned + Serialize + Send + Sync,
{
    fn validate(&self, output: &str) -> Result<String, Error> {
        sanitize::<T>(self.step_type, output)
    }

    async fn apply(
        &self,
        conductor: &Conductor,
        opctx: &OpContext,
        host: &Host,
        sanitized: String,
    ) -> Result<(), Error> {
        let store = self.store;
        conductor
            .host_modify(opctx, host.cluster_id, host.id, |host| {
                store(host, sanitized);
                Ok(())
            })
            .await?;
        Ok(())
    }
}

struct InventoryHandler;

#[async_trait]
impl StepReplyHandler for InventoryHandler {
    fn validate(&self, output: &str) -> Result<String, Error> {
        sanitize::<Inventory>(StepType::Inventory, output)
    }

    async fn apply(
        &self,
        conductor: &Conductor,
        opctx: &OpContext,
        host: &Host,
        sanitized: String,
    ) -> Result<(), Error> {
        let inventory: Inventory = serde_json::from_str(&sanitized)?;
        conductor
            .host_modify(opctx, host.cluster_id, host.id, |host| {
                if host.requested_hostname.is_empty() {
                    host.requested_hostname = inventory.hostname.clone();
                }
                host.inventory = Some(sanitized);
                Ok(())
            })
            .await?;

        // The new facts may well change the host's status.
        conductor.activate_host_monitor();
        Ok(())
    }
}

struct FreeAddressesHandler;

#[async_trait]
impl StepReplyHandler for FreeAddressesHandler {
    fn validate(&self, output: &str) -> Result<String, Error> {
        sanitize::<FreeNetworksAddresses>(
            StepType::FreeNetworkAddresses,
            output,
        )
    }

    async fn apply(
        &self,
        conductor: &Conductor,
        opctx: &OpContext,
        host: &Host,
        sanitized: String,
    ) -> Result<(), Error> {
        let report: FreeNetworksAddresses = serde_json::from_str(&sanitized)?;
        if report.is_empty() {
            return Err(Error::internal_error(&format!(
                "free addresses for host {} is empty",
                host.id
            )));
        }
        conductor
            .host_modify(opctx, host.cluster_id, host.id, |host| {
                host.free_addresses = Some(sanitized);
                Ok(())
            })
            .await?;
        Ok(())
    }
}

struct DhcpHandler;

#[async_trait]
impl StepReplyHandler for DhcpHandler {
    fn validate(&self, output: &str) -> Result<String, Error> {
        sanitize::<DhcpAllocationResponse>(StepType::DhcpLeaseAllocate, output)
    }

    async fn apply(
        &self,
        conductor: &Conductor,
        opctx: &OpContext,
        host: &Host,
        sanitized: String,
    ) -> Result<(), Error> {
        let response: DhcpAllocationResponse =
            serde_json::from_str(&sanitized)?;
        conductor.dhcp_allocation_received(opctx, host, &response).await
    }
}

struct NtpHandler;

#[async_trait]
impl StepReplyHandler for NtpHandler {
    fn validate(&self, output: &str) -> Result<String, Error> {
        sanitize::<NtpSynchronizationResponse>(
            StepType::NtpSynchronizer,
            output,
        )
    }

    async fn apply(
        &self,
        conductor: &Conductor,
        opctx: &OpContext,
        host: &Host,
        sanitized: String,
    ) -> Result<(), Error> {
        let response: NtpSynchronizationResponse =
            serde_json::from_str(&sanitized)?;
        let sources = serde_json::to_string(&response.ntp_sources)?;
        conductor
            .host_modify(opctx, host.cluster_id, host.id, |host| {
                host.ntp_sources = Some(sources);
                Ok(())
            })
            .await?;
        Ok(())
    }
}

struct ImageAvailabilityHandler;

#[async_trait]
impl StepReplyHandler for ImageAvailabilityHandler {
    fn validate(&self, output: &str) -> Result<String, Error> {
        sanitize::<ContainerImageAvailabilityResponse>(
            StepType::ContainerImageAvailability,
            output,
        )
    }

    async fn apply(
        &self,
        conductor: &Conductor,
        opctx: &OpContext,
        host: &Host,
        sanitized: String,
    ) -> Result<(), Error> {
        record_images_status(conductor, opctx, host, &sanitized).await
    }
}

/// Merges the reported image pulls into the host's image status, by image
/// name
///
/// Failed replies carry the same payload, so this is shared with failure
/// handling.
pub(super) async fn record_images_status(
    conductor: &Conductor,
    opctx: &OpContext,
    host: &Host,
    output: &str,
) -> Result<(), Error> {
    let response: ContainerImageAvailabilityResponse =
        serde_json::from_str(output).map_err(|e| {
            Error::invalid_request(&format!(
                "failed to decode image availability report: {}",
                e
            ))
        })?;
    conductor
        .host_modify(opctx, host.cluster_id, host.id, |host| {
            let mut images: BTreeMap<String, ContainerImageAvailability> = host
                .images_status
                .as_deref()
                .and_then(|s| serde_json::from_str(s).ok())
                .unwrap_or_default();
            for image in response.images {
                images.insert(image.name.clone(), image);
            }
            host.images_status = Some(serde_json::to_string(&images)?);
            Ok(())
        })
        .await?;
    Ok(())
}

struct DiskSpeedHandler;

#[async_trait]
impl StepReplyHandler for DiskSpeedHandler {
    fn validate(&self, output: &str) -> Result<String, Error> {
        sanitize::<DiskSpeedCheckResponse>(
            StepType::InstallationDiskSpeedCheck,
            output,
        )
    }

    async fn apply(
        &self,
        conductor: &Conductor,
        opctx: &OpContext,
        host: &Host,
        sanitized: String,
    ) -> Result<(), Error> {
        let response: DiskSpeedCheckResponse =
            serde_json::from_str(&sanitized)?;
        record_disk_speed(
            conductor,
            opctx,
            host,
            &response.path,
            DiskSpeed {
                tested: true,
                exit_code: 0,
                speed_ms: Some(response.io_sync_duration),
            },
        )
        .await
    }
}

/// Records a disk speed check that failed
///
/// The agent may fail before it knows which disk it was probing.  Such
/// replies (empty or unparsable output, or no path) are only logged.
pub(super) async fn record_disk_speed_failure(
    conductor: &Conductor,
    opctx: &OpContext,
    host: &Host,
    output: &str,
    exit_code: i64,
) -> Result<(), Error> {
    if output.is_empty() {
        debug!(opctx.log, "disk speed check failed without output";
            "host_id" => %host.id,
            "exit_code" => exit_code,
        );
        return Ok(());
    }
    let response = match serde_json::from_str::<DiskSpeedCheckResponse>(output)
    {
        Ok(response) if !response.path.is_empty() => response,
        Ok(_) | Err(_) => {
            warn!(opctx.log, "ignoring unusable disk speed check output";
                "host_id" => %host.id,
                "exit_code" => exit_code,
            );
            return Ok(());
        }
    };
    record_disk_speed(
        conductor,
        opctx,
        host,
        &response.path,
        DiskSpeed { tested: true, exit_code, speed_ms: None },
    )
    .await
}

async fn record_disk_speed(
    conductor: &Conductor,
    opctx: &OpContext,
    host: &Host,
    path: &str,
    speed: DiskSpeed,
) -> Result<(), Error> {
    conductor
        .host_modify(opctx, host.cluster_id, host.id, |host| {
            let mut disks: BTreeMap<String, DiskInfo> = host
                .disks_info
                .as_deref()
                .and_then(|s| serde_json::from_str(s).ok())
                .unwrap_or_default();
            disks.entry(path.to_string()).or_default().disk_speed = speed;
            host.disks_info = Some(serde_json::to_string(&disks)?);
            Ok(())
        })
        .await?;
    Ok(())
}

#[cfg(test)]
mod test {
    use super::handlers;
    use crate::app::test_helpers::cluster_params;
    use crate::app::test_helpers::conductor_test;
    use crate::app::test_helpers::create_cluster;
    use crate::app::test_helpers::register_host;
    use conductor_types::agent::replies::ContainerImageAvailability;
    use conductor_types::agent::replies::ContainerImageAvailabilityResult;
    use conductor_types::agent::replies::DiskInfo;
    use conductor_types::agent::replies::NtpSource;
    use conductor_types::agent::steps::StepReply;
    use conductor_types::agent::steps::StepType;
    use conductor_types::external_api::shared::HighAvailabilityMode;
    use foundry_test_utils::dev;
    use std::collections::BTreeMap;

    fn success(step_type: &str, output: &str) -> StepReply {
        StepReply {
            step_id: format!("{}-0000", step_type),
            step_type: step_type.to_string(),
            exit_code: 0,
            output: output.to_string(),
            error: String::new(),
        }
    }

    #[test]
    fn test_every_handler_drops_unknown_fields() {
        // (step type, reply with unknown fields, value that must survive)
        let replies = [
            (
                StepType::Inventory,
                r#"{"hostname": "h1", "injected": 1,
                    "cpu": {"count": 4, "injected": 1}}"#,
                "h1",
            ),
            (
                StepType::ConnectivityCheck,
                r#"{"remote_hosts": [{"host_id": "h2", "injected": 1,
                    "l2_connectivity": [], "l3_connectivity": []}]}"#,
                "h2",
            ),
            (
                StepType::ApiVipConnectivityCheck,
                r#"{"is_success": true, "url": "http://api.example.com",
                    "injected": 1}"#,
                "api.example.com",
            ),
            (
                StepType::FreeNetworkAddresses,
                r#"[{"network": "10.0.0.0/24",
                    "free_addresses": ["10.0.0.7"], "injected": 1}]"#,
                "10.0.0.7",
            ),
            (
                StepType::DhcpLeaseAllocate,
                r#"{"api_vip_address": "10.0.0.5",
                    "ingress_vip_address": "10.0.0.6",
                    "api_vip_lease": "lease {}", "ingress_vip_lease": "",
                    "injected": 1}"#,
                "10.0.0.6",
            ),
            (
                StepType::NtpSynchronizer,
                r#"{"ntp_sources": [{"source_name": "clock.example.com",
                    "source_state": "synced", "injected": 1}],
                    "injected": 1}"#,
                "clock.example.com",
            ),
            (
                StepType::ContainerImageAvailability,
                r#"{"images": [{"name": "quay.io/example/agent:latest",
                    "result": "success", "injected": 1}]}"#,
                "quay.io/example/agent:latest",
            ),
            (
                StepType::InstallationDiskSpeedCheck,
                r#"{"io_sync_duration": 12, "path": "/dev/sda",
                    "injected": 1}"#,
                "/dev/sda",
            ),
            (
                StepType::DomainResolution,
                r#"{"resolutions": [{"domain_name": "api.c1.example.com",
                    "ipv4_addresses": ["10.0.0.5"], "injected": 1}]}"#,
                "10.0.0.5",
            ),
        ];

        let handlers = handlers();
        assert_eq!(
            replies.iter().map(|(t, _, _)| *t).collect::<Vec<_>>(),
            handlers.keys().copied().collect::<Vec<_>>(),
        );
        for (step_type, output, kept) in replies {
            let sanitized = handlers[&step_type].validate(output).unwrap();
            assert!(
                !sanitized.contains("injected"),
                "{} kept an unknown field: {}",
                step_type,
                sanitized
            );
            assert!(sanitized.contains(kept), "{}: {}", step_type, sanitized);
        }
    }

    #[tokio::test]
    async fn test_reply_handlers() {
        let logctx = dev::test_setup_log("test_reply_handlers");
        let (opctx, conductor) = conductor_test(&logctx.log);
        let cluster = create_cluster(
            &opctx,
            &conductor,
            &cluster_params("c1", HighAvailabilityMode::Full),
        )
        .await;
        let host = register_host(&opctx, &conductor, &cluster, None).await;

        let replies = [
            success(
                "ntp-synchronizer",
                r#"{"ntp_sources": [{"source_name": "clock.example.com",
                    "source_state": "synced"}]}"#,
            ),
            success(
                "container-image-availability",
                r#"{"images": [{"name": "installer", "result": "failure"}]}"#,
            ),
            success(
                "container-image-availability",
                r#"{"images": [{"name": "installer", "result": "success"},
                    {"name": "controller", "result": "success"}]}"#,
            ),
            success(
                "installation-disk-speed-check",
                r#"{"io_sync_duration": 7, "path": "/dev/sda"}"#,
            ),
            success(
                "domain-resolution",
                r#"{"resolutions": [{"domain_name": "api.c1.example.com",
                    "ipv4_addresses": ["192.168.126.100"]}]}"#,
            ),
            success(
                "free-network-addresses",
                r#"[{"network": "192.168.126.0/24",
                    "free_addresses": ["192.168.126.20"]}]"#,
            ),
        ];
        for reply in &replies {
            conductor
                .post_step_reply(&opctx, cluster.id, host.id, reply)
                .await
                .unwrap();
        }

        let host =
            conductor.host_fetch(&opctx, cluster.id, host.id).await.unwrap();

        let sources: Vec<NtpSource> =
            serde_json::from_str(host.ntp_sources.as_deref().unwrap()).unwrap();
        assert_eq!(sources[0].source_name, "clock.example.com");

        let images: BTreeMap<String, ContainerImageAvailability> =
            serde_json::from_str(host.images_status.as_deref().unwrap())
                .unwrap();
        assert_eq!(images.len(), 2);
        assert_eq!(
            images["installer"].result,
            ContainerImageAvailabilityResult::Success
        );

        let disks: BTreeMap<String, DiskInfo> =
            serde_json::from_str(host.disks_info.as_deref().unwrap()).unwrap();
        assert_eq!(disks["/dev/sda"].disk_speed.speed_ms, Some(7));
        assert_eq!(disks["/dev/sda"].disk_speed.exit_code, 0);

        assert!(host
            .domain_name_resolutions
            .unwrap()
            .contains("api.c1.example.com"));
        assert!(host.free_addresses.unwrap().contains("192.168.126.20"));

        logctx.cleanup_successful();
    }
}
