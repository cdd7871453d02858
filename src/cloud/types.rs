//! Value types for the nine cloud resource kinds named in the REST surface
//! (spec.md §6), plus the ingress-side types (`BackendService`, `L7`,
//! `UrlMap`, ...) named in the data model (spec.md §3).

use serde::{Deserialize, Serialize};

use crate::naming::Scheme;

/// The nine resource kinds the cloud API exposes CRUD for. Used to key the
/// fake's per-kind maps and the cloud-listing snapshotter's `replenish`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    BackendService,
    InstanceGroup,
    HealthCheck,
    UrlMap,
    TargetHttpProxy,
    TargetHttpsProxy,
    ForwardingRule,
    StaticAddress,
    Firewall,
    SslCertificate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BalancingMode {
    Rate,
    Utilization,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Backend {
    pub group: String,
    pub balancing_mode: BalancingMode,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendService {
    pub name: String,
    pub self_link: String,
    pub port: u16,
    pub health_checks: Vec<String>,
    pub backends: Vec<Backend>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCheck {
    pub name: String,
    pub self_link: String,
    pub path: String,
    pub port: u16,
    pub interval_sec: u32,
    pub timeout_sec: u32,
    pub healthy_threshold: u32,
    pub unhealthy_threshold: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceGroup {
    pub name: String,
    pub self_link: String,
    pub zone: String,
    pub ports: Vec<u16>,
    pub instances: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathRule {
    pub paths: Vec<String>,
    pub service: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathMatcher {
    pub name: String,
    pub default_service: Option<String>,
    pub path_rules: Vec<PathRule>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostRule {
    pub hosts: Vec<String>,
    pub path_matcher: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UrlMap {
    pub name: String,
    pub self_link: String,
    pub default_service: String,
    pub host_rules: Vec<HostRule>,
    pub path_matchers: Vec<PathMatcher>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetProxy {
    pub name: String,
    pub self_link: String,
    pub url_map: String,
    /// Populated only for HTTPS proxies.
    pub ssl_certificates: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForwardingRule {
    pub name: String,
    pub self_link: String,
    pub port_range: String,
    pub target: String,
    pub ip_address: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticAddress {
    pub name: String,
    pub self_link: String,
    pub address: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SslCertificate {
    pub name: String,
    pub self_link: String,
    pub certificate: String,
    pub private_key: String,
    /// Content hash of `(certificate, private_key)`, used by the L7Pool to
    /// detect rotation without re-hashing on every edge-hop.
    pub content_hash: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Firewall {
    pub name: String,
    pub self_link: String,
    pub allowed_ports: Vec<u16>,
    pub source_ranges: Vec<String>,
    pub target_tags: Vec<String>,
}

/// TLS material requested for an Ingress, resolved from a Kubernetes Secret
/// by the (out-of-scope) TLS secret loader collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsCert {
    pub certificate: String,
    pub private_key: String,
}

/// Per-Ingress runtime info the translator hands to `L7Pool::add`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct L7RuntimeInfo {
    pub ingress_key: String,
    pub allow_http: bool,
    pub tls: Option<TlsCert>,
    /// Name of a pre-provisioned GlobalStaticAddress to reuse, if requested.
    pub static_ip_name: Option<String>,
    /// Name of a pre-shared SslCertificate to reuse instead of minting one.
    pub pre_shared_cert: Option<String>,
    pub default_backend: Option<String>,
    pub host_rules: Vec<(String, Vec<(String, String)>)>,
}

/// A fully materialized logical load balancer for one Ingress.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct L7 {
    pub key: String,
    pub runtime_info: L7RuntimeInfo,
    pub url_map_name: String,
    pub target_http_proxy_name: Option<String>,
    pub target_https_proxy_name: Option<String>,
    pub forwarding_rule_http_name: Option<String>,
    pub forwarding_rule_https_name: Option<String>,
    pub static_address_name: Option<String>,
    pub ssl_certificate_name: Option<String>,
}

impl L7 {
    pub fn new(key: String, runtime_info: L7RuntimeInfo) -> Self {
        Self {
            key,
            runtime_info,
            url_map_name: String::new(),
            target_http_proxy_name: None,
            target_https_proxy_name: None,
            forwarding_rule_http_name: None,
            forwarding_rule_https_name: None,
            static_address_name: None,
            ssl_certificate_name: None,
        }
    }
}

pub type NodePort = u16;
pub type NodeName = String;

pub const HTTP_PORT_RANGE: &str = "80";
pub const HTTPS_PORT_RANGE: &str = "443";

impl From<Scheme> for &'static str {
    fn from(value: Scheme) -> Self {
        match value {
            Scheme::Http => HTTP_PORT_RANGE,
            Scheme::Https => HTTPS_PORT_RANGE,
        }
    }
}
