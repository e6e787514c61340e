// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Rendering of install configuration and Ignition files

use super::blob::BlobStore;
use anyhow::anyhow;
use anyhow::bail;
use anyhow::Context;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use conductor_db_model::Cluster;
use conductor_db_model::Host;
use conductor_types::external_api::shared::HostRole;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

const IGNITION_VERSION: &str = "3.1.0";

/// Path of the manifest that carries the platform cluster id in
/// `bootstrap.ign`
const CVO_OVERRIDES_PATH: &str = "/opt/openshift/manifests/cvo-overrides.yaml";

pub fn install_config_blob(cluster: &Cluster) -> String {
    format!("{}/install-config.json", cluster.id)
}

pub fn bootstrap_ignition_blob(cluster: &Cluster) -> String {
    format!("{}/bootstrap.ign", cluster.id)
}

pub fn host_ignition_blob(host: &Host) -> String {
    format!("{}/worker-{}.ign", host.cluster_id, host.id)
}

#[async_trait]
pub trait IgnitionBuilder: Send + Sync {
    /// Renders the install config and the bootstrap, master and worker
    /// Ignition files of a new cluster into the blob store
    async fn generate_install_config(
        &self,
        cluster: &Cluster,
        hosts: &[Host],
    ) -> anyhow::Result<()>;

    /// Renders the Ignition file of a host joining an installed cluster
    async fn render_host_ignition(
        &self,
        cluster: &Cluster,
        host: &Host,
    ) -> anyhow::Result<()>;
}

/// Writes minimal Ignition v3 documents pointing nodes at the cluster's
/// machine config server
pub struct DefaultIgnitionBuilder {
    blob_store: Arc<dyn BlobStore>,
}

impl DefaultIgnitionBuilder {
    pub fn new(blob_store: Arc<dyn BlobStore>) -> DefaultIgnitionBuilder {
        DefaultIgnitionBuilder { blob_store }
    }

    async fn upload_json(
        &self,
        name: &str,
        value: &serde_json::Value,
    ) -> anyhow::Result<()> {
        let data = serde_json::to_vec_pretty(value)
            .with_context(|| format!("serializing {}", name))?;
        self.blob_store
            .upload(name, data)
            .await
            .with_context(|| format!("uploading {}", name))
    }
}

fn api_domain(cluster: &Cluster, prefix: &str) -> String {
    format!("{}.{}.{}", prefix, cluster.name, cluster.base_dns_domain)
}

/// Ignition that defers to the machine config server for `role`
fn pointer_ignition(host: &str, role: &str) -> serde_json::Value {
    json!({
        "ignition": {
            "version": IGNITION_VERSION,
            "config": {
                "merge": [
                    {
                        "source":
                            format!("https://{}:22623/config/{}", host, role)
                    }
                ]
            }
        }
    })
}

fn cvo_overrides(cluster: &Cluster, platform_cluster_id: Uuid) -> String {
    format!(
        "apiVersion: config.openshift.io/v1\n\
         kind: ClusterVersion\n\
         metadata:\n  \
           name: version\n  \
           namespace: openshift-cluster-version\n\
         spec:\n  \
           channel: stable-{}\n  \
           clusterID: {}\n",
        cluster.openshift_version, platform_cluster_id
    )
}

#[async_trait]
impl IgnitionBuilder for DefaultIgnitionBuilder {
    async fn generate_install_config(
        &self,
        cluster: &Cluster,
        hosts: &[Host],
    ) -> anyhow::Result<()> {
        let enabled = hosts.iter().filter(|h| !h.is_disabled());
        let masters =
            enabled.clone().filter(|h| h.role == HostRole::Master).count();
        let workers =
            enabled.filter(|h| h.role == HostRole::Worker).count();

        let install_config = json!({
            "apiVersion": "v1",
            "baseDomain": cluster.base_dns_domain,
            "metadata": { "name": cluster.name },
            "networking": {
                "clusterNetwork": cluster.cluster_network_cidr,
                "serviceNetwork": cluster.service_network_cidr,
                "machineNetwork": cluster.machine_network_cidr,
            },
            "controlPlane": { "name": "master", "replicas": masters },
            "compute": [{ "name": "worker", "replicas": workers }],
            "platform": {
                "baremetal": {
                    "apiVIP": cluster.api_vip,
                    "ingressVIP": cluster.ingress_vip,
                }
            }
        });
        self.upload_json(&install_config_blob(cluster), &install_config)
            .await?;

        let platform_cluster_id = Uuid::new_v4();
        let source = format!(
            "data:text/plain;charset=utf-8;base64,{}",
            BASE64.encode(cvo_overrides(cluster, platform_cluster_id))
        );
        let bootstrap = json!({
            "ignition": { "version": IGNITION_VERSION },
            "storage": {
                "files": [{
                    "path": CVO_OVERRIDES_PATH,
                    "mode": 420,
                    "overwrite": true,
                    "contents": { "source": source }
                }]
            }
        });
        self.upload_json(&bootstrap_ignition_blob(cluster), &bootstrap).await?;

        let api_int = api_domain(cluster, "api-int");
        for role in ["master", "worker"] {
            self.upload_json(
                &format!("{}/{}.ign", cluster.id, role),
                &pointer_ignition(&api_int, role),
            )
            .await?;
        }
        Ok(())
    }

    async fn render_host_ignition(
        &self,
        cluster: &Cluster,
        host: &Host,
    ) -> anyhow::Result<()> {
        let api = match &cluster.api_vip {
            Some(vip) => vip.clone(),
            None => api_domain(cluster, "api"),
        };
        let mut ignition = pointer_ignition(&api, "worker");
        if let Some(overrides) = &host.ignition_config_overrides {
            let overrides: serde_json::Value = serde_json::from_str(overrides)
                .context("parsing host ignition overrides")?;
            ignition["overrides"] = overrides;
        }
        self.upload_json(&host_ignition_blob(host), &ignition).await
    }
}

#[derive(Default, Deserialize)]
#[serde(default)]
struct IgnitionDoc {
    storage: IgnitionStorage,
}

#[derive(Default, Deserialize)]
#[serde(default)]
struct IgnitionStorage {
    files: Vec<IgnitionFile>,
}

#[derive(Default, Deserialize)]
#[serde(default)]
struct IgnitionFile {
    path: String,
    contents: IgnitionContents,
}

#[derive(Default, Deserialize)]
#[serde(default)]
struct IgnitionContents {
    source: String,
}

/// Decodes the payload of a `data:` URL
fn decode_data_url(url: &str) -> anyhow::Result<Vec<u8>> {
    let rest = url
        .strip_prefix("data:")
        .ok_or_else(|| anyhow!("not a data URL"))?;
    let (params, payload) =
        rest.split_once(',').ok_or_else(|| anyhow!("data URL has no payload"))?;
    if params.split(';').any(|p| p == "base64") {
        BASE64.decode(payload).context("decoding base64 data URL")
    } else {
        Ok(payload.as_bytes().to_vec())
    }
}

/// Finds the platform cluster id inside a rendered `bootstrap.ign`
pub fn extract_cluster_id(bootstrap: &[u8]) -> anyhow::Result<Uuid> {
    let doc: IgnitionDoc =
        serde_json::from_slice(bootstrap).context("parsing bootstrap.ign")?;
    let file = doc
        .storage
        .files
        .iter()
        .find(|f| f.path == CVO_OVERRIDES_PATH)
        .ok_or_else(|| {
            anyhow!("bootstrap.ign has no {} file", CVO_OVERRIDES_PATH)
        })?;
    let contents = decode_data_url(&file.contents.source)?;
    let contents = String::from_utf8(contents)
        .context("cvo-overrides manifest is not UTF-8")?;
    for line in contents.lines() {
        if let Some(id) = line.trim().strip_prefix("clusterID:") {
            return Uuid::parse_str(id.trim())
                .with_context(|| format!("parsing clusterID {:?}", id.trim()));
        }
    }
    bail!("cvo-overrides manifest has no clusterID")
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::app::blob::MemoryBlobStore;
    use conductor_types::external_api::params;
    use conductor_types::external_api::shared::ClusterKind;

    fn cluster() -> Cluster {
        Cluster::from_create(&params::ClusterCreate {
            name: String::from("demo"),
            base_dns_domain: String::from("example.com"),
            openshift_version: String::from("4.6"),
            kind: ClusterKind::Cluster,
            high_availability_mode: Default::default(),
            cluster_network_cidr: None,
            service_network_cidr: None,
            machine_network_cidr: Some(String::from("10.0.0.0/24")),
            api_vip: Some(String::from("10.0.0.100")),
            ingress_vip: Some(String::from("10.0.0.101")),
            vip_dhcp_allocation: false,
        })
    }

    #[tokio::test]
    async fn test_cluster_id_round_trips_through_bootstrap() {
        let store = Arc::new(MemoryBlobStore::new());
        let builder = DefaultIgnitionBuilder::new(store.clone());
        let cluster = cluster();
        builder.generate_install_config(&cluster, &[]).await.unwrap();

        for name in ["install-config.json", "master.ign", "worker.ign"] {
            assert!(store
                .exists(&format!("{}/{}", cluster.id, name))
                .await
                .unwrap());
        }
        let bootstrap =
            store.download(&bootstrap_ignition_blob(&cluster)).await.unwrap();
        extract_cluster_id(&bootstrap).unwrap();
    }

    #[test]
    fn test_extract_cluster_id_errors() {
        assert!(extract_cluster_id(b"not json").is_err());
        assert!(extract_cluster_id(br#"{"storage": {"files": []}}"#).is_err());

        let id = Uuid::new_v4();
        let doc = json!({
            "storage": { "files": [{
                "path": CVO_OVERRIDES_PATH,
                "contents": { "source": format!("data:,clusterID: {}", id) }
            }]}
        });
        let bytes = serde_json::to_vec(&doc).unwrap();
        assert_eq!(extract_cluster_id(&bytes).unwrap(), id);
    }
}
