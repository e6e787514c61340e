// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Addresses that every host of a cluster reports as free on a subnet

use super::Conductor;
use conductor_db_model::Host;
use conductor_db_queries::context::OpContext;
use conductor_types::agent::replies::FreeNetworksAddresses;
use conductor_types::external_api::params;
use foundry_common::address::parse_ipv4_network;
use foundry_common::api::external::Error;
use foundry_common::api::external::LookupType;
use foundry_common::api::external::ResourceType;
use foundry_common::typed_uuid::ClusterUuid;
use slog::debug;
use std::collections::BTreeSet;
use std::net::Ipv4Addr;

/// Intersects the free addresses that `hosts` report for `network`
///
/// Only hosts whose status says their reports are current take part.  A host
/// whose report cannot be parsed, or that did not scan `network`, does not
/// restrict the result.  Returns `None` when no host takes part at all.
///
/// The result is in numeric order.
fn intersect_free_addresses(
    log: &slog::Logger,
    hosts: &[Host],
    network: &str,
) -> Option<BTreeSet<Ipv4Addr>> {
    let mut qualifying = false;
    let mut result: Option<BTreeSet<Ipv4Addr>> = None;
    for host in hosts.iter().filter(|h| h.status.reports_free_addresses()) {
        qualifying = true;
        let Some(report) = host.free_addresses.as_deref() else {
            continue;
        };
        let report = match serde_json::from_str::<FreeNetworksAddresses>(report)
        {
            Ok(report) => report,
            Err(error) => {
                debug!(log, "skipping malformed free addresses report";
                    "host_id" => %host.id,
                    "error" => %error,
                );
                continue;
            }
        };
        let Some(entry) = report.iter().find(|e| e.network == network) else {
            continue;
        };
        let free: BTreeSet<Ipv4Addr> = entry
            .free_addresses
            .iter()
            .filter_map(|a| a.parse::<Ipv4Addr>().ok())
            .collect();
        result = Some(match result {
            None => free,
            Some(so_far) => so_far.intersection(&free).copied().collect(),
        });
    }

    if !qualifying {
        return None;
    }
    Some(result.unwrap_or_default())
}

impl Conductor {
    pub(crate) async fn cluster_free_addresses(
        &self,
        opctx: &OpContext,
        cluster_id: ClusterUuid,
        query: &params::FreeAddressesQuery,
    ) -> Result<Vec<Ipv4Addr>, Error> {
        parse_ipv4_network("network", &query.network)?;
        let hosts = self.host_list(opctx, cluster_id).await?;
        let free = intersect_free_addresses(&opctx.log, &hosts, &query.network)
            .ok_or_else(|| {
                LookupType::ByCompositeId(format!(
                    "cluster {} has no host reporting free addresses",
                    cluster_id
                ))
                .into_not_found(ResourceType::Host)
            })?;

        let prefix = query.prefix.as_deref().unwrap_or("");
        let limit = query.limit.map_or(usize::MAX, |l| l.get() as usize);
        Ok(free
            .into_iter()
            .filter(|addr| addr.to_string().starts_with(prefix))
            .take(limit)
            .collect())
    }
}
