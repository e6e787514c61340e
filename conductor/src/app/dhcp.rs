// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! VIPs allocated by DHCP on behalf of a cluster

use super::lease::format_lease;
use super::lease::verify_lease;
use super::Conductor;
use conductor_db_model::Cluster;
use conductor_db_model::Event;
use conductor_db_model::Host;
use conductor_db_queries::context::OpContext;
use conductor_db_queries::db::Locking;
use conductor_types::agent::replies::DhcpAllocationResponse;
use conductor_types::external_api::shared::ClusterStatus;
use conductor_types::external_api::shared::EventSeverity;
use foundry_common::address::verify_ipv4_in_network;
use foundry_common::api::external::Error;
use slog::debug;
use slog::info;

/// Checks that `response` may be applied to `cluster` as it is now
fn verify_allocation(
    cluster: &Cluster,
    response: &DhcpAllocationResponse,
) -> Result<(), Error> {
    if !cluster.vip_dhcp_allocation {
        return Err(Error::conflict(&format!(
            "VIP DHCP allocation is disabled for cluster {}",
            cluster.id
        )));
    }
    let Some(cidr) = &cluster.machine_network_cidr else {
        return Err(Error::conflict(&format!(
            "cluster {} has no machine-network-cidr",
            cluster.id
        )));
    };
    if response.api_vip_address == response.ingress_vip_address {
        return Err(Error::conflict(&format!(
            "api-vip and ingress-vip cannot both be {}",
            response.api_vip_address
        )));
    }
    verify_ipv4_in_network("api-vip", &response.api_vip_address, cidr)?;
    verify_ipv4_in_network("ingress-vip", &response.ingress_vip_address, cidr)
}

impl Conductor {
    /// Applies the VIPs that `host` obtained through DHCP to its cluster
    ///
    /// Nothing is stored unless the allocation passes every check.  The
    /// checks run again against the locked cluster row so that a concurrent
    /// update (e.g. turning DHCP allocation off) wins over a stale reply.
    pub(crate) async fn dhcp_allocation_received(
        &self,
        opctx: &OpContext,
        host: &Host,
        response: &DhcpAllocationResponse,
    ) -> Result<(), Error> {
        let cluster =
            self.datastore.cluster_fetch(opctx, host.cluster_id).await?;
        verify_allocation(&cluster, response)?;
        verify_lease("api_vip_lease", &response.api_vip_lease)?;
        verify_lease("ingress_vip_lease", &response.ingress_vip_lease)?;

        let api_vip_lease = format_lease(&response.api_vip_lease);
        let ingress_vip_lease = format_lease(&response.ingress_vip_lease);

        let mut tx = self.datastore.begin(opctx, Locking::ForUpdate);
        let mut cluster = tx.cluster_fetch(host.cluster_id).await?;
        verify_allocation(&cluster, response)?;

        let unchanged = cluster.api_vip.as_deref()
            == Some(response.api_vip_address.as_str())
            && cluster.ingress_vip.as_deref()
                == Some(response.ingress_vip_address.as_str())
            && cluster.api_vip_lease.as_deref() == Some(api_vip_lease.as_str())
            && cluster.ingress_vip_lease.as_deref()
                == Some(ingress_vip_lease.as_str());
        if unchanged {
            debug!(opctx.log, "DHCP allocation unchanged";
                "cluster_id" => %cluster.id,
                "host_id" => %host.id,
            );
            return Ok(());
        }

        match cluster.status {
            ClusterStatus::PendingForInput
            | ClusterStatus::Insufficient
            | ClusterStatus::Ready => (),
            ClusterStatus::PreparingForInstallation
            | ClusterStatus::Installing
            | ClusterStatus::Finalizing => {
                let vips_match = cluster.api_vip.as_deref()
                    == Some(response.api_vip_address.as_str())
                    && cluster.ingress_vip.as_deref()
                        == Some(response.ingress_vip_address.as_str());
                if vips_match {
                    // only the leases moved; keep them for the renewal
                    cluster.api_vip_lease = Some(api_vip_lease);
                    cluster.ingress_vip_lease = Some(ingress_vip_lease);
                    tx.cluster_update(cluster).await?;
                    tx.commit()?;
                    debug!(opctx.log, "stored renewed DHCP leases";
                        "host_id" => %host.id,
                    );
                    return Ok(());
                }
                return Err(Error::conflict(&format!(
                    "cannot change the VIPs of cluster {} while it is {}",
                    cluster.id, cluster.status
                )));
            }
            ClusterStatus::Installed
            | ClusterStatus::AddingHosts
            | ClusterStatus::Error
            | ClusterStatus::Cancelled => return Ok(()),
        }

        cluster.api_vip = Some(response.api_vip_address.clone());
        cluster.ingress_vip = Some(response.ingress_vip_address.clone());
        cluster.api_vip_lease = Some(api_vip_lease);
        cluster.ingress_vip_lease = Some(ingress_vip_lease);
        let cluster = tx.cluster_update(cluster).await?;
        tx.event_insert(Event::new(
            cluster.id,
            Some(host.id),
            EventSeverity::Info,
            format!(
                "Cluster {} was updated with api-vip {}, ingress-vip {}",
                cluster.name, response.api_vip_address,
                response.ingress_vip_address
            ),
            opctx.request_id().map(String::from),
        ));
        tx.commit()?;
        info!(opctx.log, "stored VIPs allocated by DHCP";
            "cluster_id" => %cluster.id,
            "host_id" => %host.id,
            "api_vip" => &response.api_vip_address,
            "ingress_vip" => &response.ingress_vip_address,
        );
        self.activate_host_monitor();
        Ok(())
    }
}
