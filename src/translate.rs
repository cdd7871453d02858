//! Maps the external Ingress/Service/Node collaborator's view of the world
//! into the `(L7RuntimeInfo[], NodePort[], NodeName[])` triple the
//! `ClusterManager` checkpoints against (spec.md §6, §4.11).

use std::collections::HashMap;

use crate::cloud::types::{L7RuntimeInfo, NodeName, NodePort, TlsCert};
use crate::error::{ControllerError, Result};
use crate::naming::Namer;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendRef {
    pub service_name: String,
    pub service_port: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngressPath {
    pub path: String,
    pub backend: BackendRef,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngressRule {
    pub host: String,
    pub paths: Vec<IngressPath>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngressTls {
    pub hosts: Vec<String>,
    pub secret_name: String,
}

/// A small local stand-in for the subset of the Kubernetes `Ingress` object
/// this controller reads; the real watch machinery that produces these is
/// out of scope (spec.md §1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ingress {
    pub namespace: String,
    pub name: String,
    pub annotations: HashMap<String, String>,
    pub default_backend: Option<BackendRef>,
    pub tls: Vec<IngressTls>,
    pub rules: Vec<IngressRule>,
}

impl Ingress {
    pub fn key(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}

/// A small local stand-in for the Service/NodePort resolution the external
/// Service/Node lookup collaborator performs (spec.md §6).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Service {
    pub namespace: String,
    pub name: String,
    pub node_ports: HashMap<u16, NodePort>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub name: NodeName,
    pub zone: String,
    pub ready: bool,
}

pub struct TranslateInput<'a> {
    pub ingresses: &'a [Ingress],
    pub services: &'a [Service],
    pub nodes: &'a [Node],
    pub tls_secrets: &'a HashMap<String, TlsCert>,
    /// The `ingress.class` value this controller answers to; an Ingress
    /// whose annotation names a different class is skipped entirely.
    pub accepted_ingress_class: &'a str,
}

/// Builds the desired-state triple the reconciler hands to
/// `ClusterManager::checkpoint`. Ingresses the controller doesn't own
/// (`ingress.class` mismatch) or whose backends don't resolve to a NodePort
/// are dropped from the corresponding host rule rather than failing the
/// whole translation — that's "one path's Service hasn't synced yet", not
/// malformed input. A structurally malformed Ingress — a `tls` entry naming
/// zero hosts, which can never match any HostRule it's supposed to secure —
/// fails the whole translation with `ControllerError::Validation` instead,
/// per spec.md §7's "do not requeue; emit a diagnostic and move on".
pub fn translate(input: TranslateInput, namer: &Namer) -> Result<(Vec<L7RuntimeInfo>, Vec<NodePort>, Vec<NodeName>)> {
    let mut lb_infos = Vec::new();
    let mut node_ports = Vec::new();

    for ingress in input.ingresses {
        if !class_accepted(ingress, input.accepted_ingress_class) {
            continue;
        }

        if let Some(tls) = ingress.tls.iter().find(|t| t.hosts.is_empty()) {
            return Err(ControllerError::validation(format!(
                "ingress {}: tls secret {} names no host",
                ingress.key(),
                tls.secret_name
            )));
        }

        let allow_http = parse_bool_annotation(&ingress.annotations, "allow-http", true);
        let pre_shared_cert = ingress.annotations.get("pre-shared-cert").cloned();
        let static_ip_name = ingress.annotations.get("static-ip").cloned();

        let default_backend = ingress
            .default_backend
            .as_ref()
            .and_then(|b| resolve_backend(input.services, namer, &mut node_ports, &ingress.namespace, b));

        let mut host_rules = Vec::new();
        for rule in &ingress.rules {
            let mut paths = Vec::new();
            for path in &rule.paths {
                if let Some(service_name) =
                    resolve_backend(input.services, namer, &mut node_ports, &ingress.namespace, &path.backend)
                {
                    paths.push((path.path.clone(), service_name));
                }
            }
            if !paths.is_empty() {
                host_rules.push((rule.host.clone(), paths));
            }
        }

        let tls = ingress
            .tls
            .first()
            .and_then(|t| input.tls_secrets.get(&t.secret_name))
            .cloned();

        lb_infos.push(L7RuntimeInfo {
            ingress_key: ingress.key(),
            allow_http,
            tls,
            static_ip_name,
            pre_shared_cert,
            default_backend,
            host_rules,
        });
    }

    node_ports.sort_unstable();
    node_ports.dedup();

    let node_names = input
        .nodes
        .iter()
        .filter(|n| n.ready)
        .map(|n| n.name.clone())
        .collect();

    Ok((lb_infos, node_ports, node_names))
}

fn class_accepted(ingress: &Ingress, accepted: &str) -> bool {
    match ingress.annotations.get("ingress.class") {
        None => true,
        Some(class) => class == accepted,
    }
}

fn parse_bool_annotation(annotations: &HashMap<String, String>, key: &str, default: bool) -> bool {
    annotations
        .get(key)
        .and_then(|v| v.parse::<bool>().ok())
        .unwrap_or(default)
}

/// Matched by `(namespace, serviceName, servicePort)`, same as the real
/// Service/Node lookup collaborator (spec.md §6) — an Ingress never resolves
/// a backend against a same-named Service in a different namespace.
fn resolve_node_port(services: &[Service], namespace: &str, backend: &BackendRef) -> Option<NodePort> {
    services
        .iter()
        .find(|s| s.namespace == namespace && s.name == backend.service_name)
        .and_then(|s| s.node_ports.get(&backend.service_port))
        .copied()
}

fn resolve_backend(
    services: &[Service],
    namer: &Namer,
    node_ports: &mut Vec<NodePort>,
    namespace: &str,
    backend: &BackendRef,
) -> Option<String> {
    let port = resolve_node_port(services, namespace, backend)?;
    node_ports.push(port);
    Some(namer.be(port))
}
