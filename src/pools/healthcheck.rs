//! Per-nodePort HTTP health checks (spec.md §4.3).

use std::sync::Arc;

use tracing::debug;

use crate::cloud::types::HealthCheck;
use crate::cloud::CloudCompute;
use crate::error::Result;
use crate::naming::Namer;
use crate::snapshot::Snapshotter;

pub struct HealthCheckPool {
    client: Arc<dyn CloudCompute>,
    namer: Namer,
    snapshot: Snapshotter<HealthCheck>,
    default_path: String,
}

impl HealthCheckPool {
    pub fn new(client: Arc<dyn CloudCompute>, namer: Namer, default_path: impl Into<String>) -> Self {
        Self {
            client,
            namer,
            snapshot: Snapshotter::in_memory(),
            default_path: default_path.into(),
        }
    }

    /// Idempotent: if a check named `hc(port)` already exists it is left
    /// alone, otherwise it is created with the spec's fixed thresholds.
    pub async fn add(&self, port: u16) -> Result<()> {
        let name = self.namer.hc(port);
        if let Some(existing) = self.client.get_health_check(&name).await? {
            self.snapshot.add(name, existing);
            return Ok(());
        }

        let hc = HealthCheck {
            name: name.clone(),
            self_link: format!("self/healthChecks/{name}"),
            path: self.default_path.clone(),
            port,
            interval_sec: 1,
            timeout_sec: 1,
            healthy_threshold: 1,
            unhealthy_threshold: 10,
        };
        self.client.create_health_check(hc.clone()).await?;
        self.snapshot.add(name, hc);
        Ok(())
    }

    /// Tolerates 404: the pool's own edge-hop repair may already have
    /// removed it out-of-band.
    pub async fn delete(&self, port: u16) -> Result<()> {
        let name = self.namer.hc(port);
        debug!(%name, "deleting health check");
        self.client.delete_health_check(&name).await?;
        self.snapshot.delete(&name);
        Ok(())
    }

    pub fn get(&self, port: u16) -> Option<HealthCheck> {
        self.snapshot.get(&self.namer.hc(port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::FakeCloud;

    fn pool() -> (HealthCheckPool, Arc<FakeCloud>) {
        let cloud = Arc::new(FakeCloud::new());
        let pool = HealthCheckPool::new(cloud.clone(), Namer::new("u"), "/");
        (pool, cloud)
    }

    #[tokio::test]
    async fn add_is_idempotent() {
        let (pool, cloud) = pool();
        pool.add(30001).await.unwrap();
        pool.add(30001).await.unwrap();
        assert_eq!(cloud.calls("create_health_check"), 1);
        assert!(pool.get(30001).is_some());
    }

    #[tokio::test]
    async fn delete_tolerates_missing() {
        let (pool, _cloud) = pool();
        pool.delete(30001).await.unwrap();
    }

    #[tokio::test]
    async fn default_path_override_is_applied_at_creation() {
        let cloud = Arc::new(FakeCloud::new());
        let pool = HealthCheckPool::new(cloud, Namer::new("u"), "/healthz");
        pool.add(30001).await.unwrap();
        assert_eq!(pool.get(30001).unwrap().path, "/healthz");
    }
}
