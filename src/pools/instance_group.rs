//! The cluster's single instance group: membership tracks Ready nodes, and
//! `ports` tracks every NodePort currently referenced by any Ingress
//! (spec.md §4.5).

use std::collections::HashSet;
use std::sync::Arc;

use tracing::debug;

use crate::cloud::types::{InstanceGroup, NodeName};
use crate::cloud::CloudCompute;
use crate::error::Result;
use crate::naming::Namer;
use crate::snapshot::Snapshotter;

pub struct InstanceGroupPool {
    client: Arc<dyn CloudCompute>,
    namer: Namer,
    zone: String,
    snapshot: Snapshotter<InstanceGroup>,
}

impl InstanceGroupPool {
    pub fn new(client: Arc<dyn CloudCompute>, namer: Namer, zone: impl Into<String>) -> Self {
        Self {
            client,
            namer,
            zone: zone.into(),
            snapshot: Snapshotter::in_memory(),
        }
    }

    fn name(&self) -> String {
        self.namer.ig()
    }

    async fn ensure_exists(&self) -> Result<InstanceGroup> {
        let name = self.name();
        if let Some(existing) = self.snapshot.get(&name) {
            return Ok(existing);
        }
        if let Some(existing) = self.client.get_instance_group(&name, &self.zone).await? {
            self.snapshot.add(name, existing.clone());
            return Ok(existing);
        }
        let ig = InstanceGroup {
            name: name.clone(),
            self_link: format!("self/instanceGroups/{name}"),
            zone: self.zone.clone(),
            ports: Vec::new(),
            instances: Vec::new(),
        };
        self.client.create_instance_group(ig.clone()).await?;
        self.snapshot.add(name, ig.clone());
        Ok(ig)
    }

    pub fn get(&self) -> Option<InstanceGroup> {
        self.snapshot.get(&self.name())
    }

    pub fn self_link(&self) -> Option<String> {
        self.get().map(|ig| ig.self_link)
    }

    /// Computes the set difference against current membership; tolerates
    /// "already a member"/"not a member" as success.
    pub async fn sync(&self, node_names: &[NodeName]) -> Result<()> {
        let current = self.ensure_exists().await?;
        let name = self.name();

        let desired: HashSet<&str> = node_names.iter().map(|n| n.as_str()).collect();
        let existing: HashSet<&str> = current.instances.iter().map(|s| s.as_str()).collect();

        let to_add: Vec<String> = desired
            .difference(&existing)
            .map(|s| s.to_string())
            .collect();
        let to_remove: Vec<String> = existing
            .difference(&desired)
            .map(|s| s.to_string())
            .collect();

        if !to_add.is_empty() {
            debug!(?to_add, "adding instances to instance group");
            self.client.add_instances(&name, &self.zone, &to_add).await?;
        }
        if !to_remove.is_empty() {
            debug!(?to_remove, "removing instances from instance group");
            self.client
                .remove_instances(&name, &self.zone, &to_remove)
                .await?;
        }

        let mut updated = current;
        updated.instances = desired.into_iter().map(str::to_string).collect();
        self.snapshot.add(name, updated);
        Ok(())
    }

    pub async fn add_port(&self, port: u16) -> Result<()> {
        let mut ig = self.ensure_exists().await?;
        if ig.ports.contains(&port) {
            return Ok(());
        }
        ig.ports.push(port);
        let name = self.name();
        self.client.set_named_ports(&name, &self.zone, &ig.ports).await?;
        self.snapshot.add(name, ig);
        Ok(())
    }

    pub async fn remove_port(&self, port: u16) -> Result<()> {
        let mut ig = self.ensure_exists().await?;
        if !ig.ports.contains(&port) {
            return Ok(());
        }
        ig.ports.retain(|p| *p != port);
        let name = self.name();
        self.client.set_named_ports(&name, &self.zone, &ig.ports).await?;
        self.snapshot.add(name, ig);
        Ok(())
    }
}
