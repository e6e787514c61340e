// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Groups a cluster's hosts by mutual network reachability

use conductor_db_model::Host;
use conductor_types::agent::replies::ConnectivityReport;
use foundry_common::typed_uuid::HostUuid;
use std::collections::BTreeMap;
use std::collections::BTreeSet;

/// Returns the set of hosts each host reports as reachable
///
/// A remote host counts as reachable if any layer-2 or layer-3 check to it
/// succeeded.  Hosts with a missing or unparsable report reach nobody.
fn reachability(hosts: &[Host]) -> BTreeMap<HostUuid, BTreeSet<HostUuid>> {
    hosts
        .iter()
        .map(|host| {
            let report = host
                .connectivity
                .as_deref()
                .and_then(|c| {
                    serde_json::from_str::<ConnectivityReport>(c).ok()
                })
                .unwrap_or_default();
            let reachable = report
                .remote_hosts
                .iter()
                .filter(|remote| {
                    remote.l2_connectivity.iter().any(|l2| l2.successful)
                        || remote.l3_connectivity.iter().any(|l3| l3.successful)
                })
                .filter_map(|remote| remote.host_id.parse::<HostUuid>().ok())
                .collect();
            (host.id, reachable)
        })
        .collect()
}

/// Computes the connectivity majority groups of `hosts`
///
/// Two hosts are connected when each reports the other as reachable.  Each
/// host seeds a group that greedily takes every other host (in id order)
/// connected to all current members.  Duplicate groups are dropped and the
/// rest are ordered largest first, ties broken by their sorted member ids, so
/// the first group is the majority.
pub fn majority_groups(hosts: &[Host]) -> Vec<Vec<HostUuid>> {
    let reachable = reachability(hosts);
    let connected = |a: &HostUuid, b: &HostUuid| {
        reachable.get(a).is_some_and(|r| r.contains(b))
            && reachable.get(b).is_some_and(|r| r.contains(a))
    };

    let mut ids: Vec<HostUuid> = hosts.iter().map(|h| h.id).collect();
    ids.sort();

    let mut groups: BTreeSet<Vec<HostUuid>> = BTreeSet::new();
    for seed in &ids {
        let mut group = vec![*seed];
        for candidate in &ids {
            if candidate != seed
                && group.iter().all(|member| connected(member, candidate))
            {
                group.push(*candidate);
            }
        }
        group.sort();
        groups.insert(group);
    }

    let mut groups: Vec<Vec<HostUuid>> = groups.into_iter().collect();
    groups.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
    groups
}
