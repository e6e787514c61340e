// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Additional manifests installed with a cluster

use super::blob::BlobStore;
use anyhow::Context;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use conductor_db_model::Cluster;
use conductor_db_model::Host;
use conductor_types::agent::replies::NtpSource;
use std::collections::BTreeSet;
use std::sync::Arc;

#[async_trait]
pub trait ManifestsGenerator: Send + Sync {
    async fn add_cluster_manifests(
        &self,
        cluster: &Cluster,
        hosts: &[Host],
    ) -> anyhow::Result<()>;
}

/// Writes a chrony configuration naming every NTP source the hosts reported
pub struct ChronyManifestsGenerator {
    blob_store: Arc<dyn BlobStore>,
}

impl ChronyManifestsGenerator {
    pub fn new(blob_store: Arc<dyn BlobStore>) -> ChronyManifestsGenerator {
        ChronyManifestsGenerator { blob_store }
    }
}

/// Collects the distinct NTP source names across `hosts`
///
/// Hosts whose stored report does not parse contribute nothing.
fn ntp_sources(hosts: &[Host]) -> BTreeSet<String> {
    hosts
        .iter()
        .filter_map(|h| h.ntp_sources.as_deref())
        .filter_map(|s| serde_json::from_str::<Vec<NtpSource>>(s).ok())
        .flatten()
        .map(|s| s.source_name)
        .filter(|name| !name.is_empty())
        .collect()
}

fn chrony_conf(sources: &BTreeSet<String>) -> String {
    let mut conf = String::new();
    for source in sources {
        conf.push_str(&format!("server {} iburst\n", source));
    }
    conf.push_str("driftfile /var/lib/chrony/drift\nmakestep 1.0 3\nrtcsync\n");
    conf
}

fn machine_config(role: &str, chrony_conf: &str) -> String {
    format!(
        "apiVersion: machineconfiguration.openshift.io/v1\n\
         kind: MachineConfig\n\
         metadata:\n  \
           labels:\n    \
             machineconfiguration.openshift.io/role: {role}\n  \
           name: 50-{role}s-chrony-configuration\n\
         spec:\n  \
           config:\n    \
             ignition:\n      \
               version: 3.1.0\n    \
             storage:\n      \
               files:\n      \
               - contents:\n          \
                   source: data:text/plain;charset=utf-8;base64,{data}\n        \
                 mode: 420\n        \
                 overwrite: true\n        \
                 path: /etc/chrony.conf\n",
        role = role,
        data = BASE64.encode(chrony_conf),
    )
}

pub fn chrony_manifest_blob(cluster: &Cluster, role: &str) -> String {
    format!("{}/manifests/50-{}s-chrony-configuration.yaml", cluster.id, role)
}

#[async_trait]
impl ManifestsGenerator for ChronyManifestsGenerator {
    async fn add_cluster_manifests(
        &self,
        cluster: &Cluster,
        hosts: &[Host],
    ) -> anyhow::Result<()> {
        let sources = ntp_sources(hosts);
        if sources.is_empty() {
            return Ok(());
        }
        let conf = chrony_conf(&sources);
        for role in ["master", "worker"] {
            let name = chrony_manifest_blob(cluster, role);
            self.blob_store
                .upload(&name, machine_config(role, &conf).into_bytes())
                .await
                .with_context(|| format!("uploading {}", name))?;
        }
        Ok(())
    }
}
