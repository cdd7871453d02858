//! The single cluster-scoped Firewall rule covering every live NodePort
//! (spec.md §4.6).

use std::sync::Arc;

use tracing::{debug, info};

use crate::cloud::types::Firewall;
use crate::cloud::CloudCompute;
use crate::error::Result;
use crate::naming::Namer;
use crate::snapshot::Snapshotter;

pub struct FirewallPool {
    client: Arc<dyn CloudCompute>,
    namer: Namer,
    source_range: String,
    snapshot: Snapshotter<Firewall>,
}

impl FirewallPool {
    pub fn new(client: Arc<dyn CloudCompute>, namer: Namer, source_range: impl Into<String>) -> Self {
        Self {
            client,
            namer,
            source_range: source_range.into(),
            snapshot: Snapshotter::in_memory(),
        }
    }

    fn name(&self) -> String {
        self.namer.fw()
    }

    pub fn get(&self) -> Option<Firewall> {
        self.snapshot.get(&self.name())
    }

    /// Ensures the rule covers exactly `ports`; deletes it once `ports` is
    /// empty since an empty allow-list is pointless to keep around.
    pub async fn sync(&self, ports: &[u16], node_tags: &[String]) -> Result<()> {
        let name = self.name();

        if ports.is_empty() {
            return self.shutdown().await;
        }

        let mut desired_ports = ports.to_vec();
        desired_ports.sort_unstable();
        desired_ports.dedup();

        match self.client.get_firewall(&name).await? {
            None => {
                let fw = Firewall {
                    name: name.clone(),
                    self_link: format!("self/firewalls/{name}"),
                    allowed_ports: desired_ports,
                    source_ranges: vec![self.source_range.clone()],
                    target_tags: node_tags.to_vec(),
                };
                info!(%name, "creating firewall rule");
                self.client.create_firewall(fw.clone()).await?;
                self.snapshot.add(name, fw);
            }
            Some(existing) if existing.allowed_ports == desired_ports && existing.target_tags == node_tags => {
                self.snapshot.add(name, existing);
            }
            Some(mut stale) => {
                debug!(%name, "firewall allowed-ports drifted, repairing");
                stale.allowed_ports = desired_ports;
                stale.target_tags = node_tags.to_vec();
                self.client.update_firewall(stale.clone()).await?;
                self.snapshot.add(name, stale);
            }
        }
        Ok(())
    }

    pub async fn shutdown(&self) -> Result<()> {
        let name = self.name();
        if self.snapshot.get(&name).is_none() && self.client.get_firewall(&name).await?.is_none() {
            return Ok(());
        }
        self.client.delete_firewall(&name).await?;
        self.snapshot.delete(&name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::FakeCloud;

    fn pool() -> (FirewallPool, Arc<FakeCloud>) {
        let cloud = Arc::new(FakeCloud::new());
        let pool = FirewallPool::new(cloud.clone(), Namer::new("u"), "130.211.0.0/22");
        (pool, cloud)
    }

    #[tokio::test]
    async fn sync_creates_rule_covering_all_ports() {
        let (pool, _cloud) = pool();
        pool.sync(&[30001, 30002], &["k8s-node".to_string()])
            .await
            .unwrap();
        let fw = pool.get().unwrap();
        assert_eq!(fw.allowed_ports, vec![30001, 30002]);
        assert_eq!(fw.source_ranges, vec!["130.211.0.0/22".to_string()]);
    }

    #[tokio::test]
    async fn sync_is_idempotent() {
        let (pool, cloud) = pool();
        pool.sync(&[30001], &[]).await.unwrap();
        pool.sync(&[30001], &[]).await.unwrap();
        assert_eq!(cloud.calls("create_firewall"), 1);
        assert_eq!(cloud.calls("update_firewall"), 0);
    }

    #[tokio::test]
    async fn sync_repairs_drifted_port_list() {
        let (pool, cloud) = pool();
        pool.sync(&[30001], &[]).await.unwrap();
        pool.sync(&[30001, 30002], &[]).await.unwrap();
        assert_eq!(cloud.calls("update_firewall"), 1);
        assert_eq!(pool.get().unwrap().allowed_ports, vec![30001, 30002]);
    }

    #[tokio::test]
    async fn sync_with_no_ports_deletes_rule() {
        let (pool, cloud) = pool();
        pool.sync(&[30001], &[]).await.unwrap();
        pool.sync(&[], &[]).await.unwrap();
        assert!(pool.get().is_none());
        assert_eq!(cloud.calls("delete_firewall"), 1);
    }

    #[tokio::test]
    async fn shutdown_tolerates_already_absent() {
        let (pool, _cloud) = pool();
        pool.shutdown().await.unwrap();
        pool.shutdown().await.unwrap();
    }
}
