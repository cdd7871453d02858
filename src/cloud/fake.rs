//! In-memory fake of the cloud REST surface, used by pool- and cluster
//! manager-level tests. Stores each resource kind as a `name -> object` map
//! with the same 404/conflict semantics the real API exposes, following the
//! Design Note "tests use an in-memory fake that stores each kind as a name
//! -> object mapping with the same 404/conflict semantics".

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::cloud::client::CloudCompute;
use crate::cloud::types::{
    BackendService, Firewall, ForwardingRule, HealthCheck, InstanceGroup, StaticAddress,
    SslCertificate, TargetProxy, UrlMap,
};
use crate::error::{CloudErrorKind, ControllerError, Result};

#[derive(Default)]
struct Store {
    backend_services: HashMap<String, BackendService>,
    health_checks: HashMap<String, HealthCheck>,
    instance_groups: HashMap<String, InstanceGroup>,
    url_maps: HashMap<String, UrlMap>,
    target_http_proxies: HashMap<String, TargetProxy>,
    target_https_proxies: HashMap<String, TargetProxy>,
    forwarding_rules: HashMap<String, ForwardingRule>,
    static_addresses: HashMap<String, StaticAddress>,
    firewalls: HashMap<String, Firewall>,
    ssl_certificates: HashMap<String, SslCertificate>,
}

/// Injectable failure used by the quota-failure scenario (spec.md §8,
/// scenario 6): the Nth call matching `operation_prefix` fails with the
/// given `CloudErrorKind` instead of succeeding.
#[derive(Clone)]
pub struct InjectedFailure {
    pub operation_prefix: String,
    pub kind: CloudErrorKind,
    pub on_call_number: usize,
}

pub struct FakeCloud {
    store: Mutex<Store>,
    call_counts: Mutex<HashMap<String, usize>>,
    failures: Mutex<Vec<InjectedFailure>>,
}

impl Default for FakeCloud {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeCloud {
    pub fn new() -> Self {
        Self {
            store: Mutex::new(Store::default()),
            call_counts: Mutex::new(HashMap::new()),
            failures: Mutex::new(Vec::new()),
        }
    }

    pub fn inject_failure(&self, failure: InjectedFailure) {
        self.failures.lock().unwrap().push(failure);
    }

    /// Total number of calls made through this fake, for idempotence
    /// assertions (spec.md §8: "no additional cloud writes on the second
    /// application").
    pub fn total_calls(&self) -> usize {
        self.call_counts.lock().unwrap().values().sum()
    }

    pub fn calls(&self, operation: &str) -> usize {
        *self.call_counts.lock().unwrap().get(operation).unwrap_or(&0)
    }

    fn record(&self, operation: &str) -> Result<()> {
        let mut counts = self.call_counts.lock().unwrap();
        let count = counts.entry(operation.to_string()).or_insert(0);
        *count += 1;
        let current = *count;
        drop(counts);

        let mut failures = self.failures.lock().unwrap();
        if let Some(pos) = failures.iter().position(|f| {
            operation.starts_with(&f.operation_prefix) && f.on_call_number == current
        }) {
            let failure = failures.remove(pos);
            return Err(ControllerError::cloud(
                failure.kind,
                operation,
                "injected failure",
            ));
        }
        Ok(())
    }

    pub fn backend_service_names(&self) -> Vec<String> {
        self.store.lock().unwrap().backend_services.keys().cloned().collect()
    }

    pub fn url_map_names(&self) -> Vec<String> {
        self.store.lock().unwrap().url_maps.keys().cloned().collect()
    }

    pub fn firewall_exists(&self) -> bool {
        !self.store.lock().unwrap().firewalls.is_empty()
    }
}

#[async_trait]
impl CloudCompute for FakeCloud {
    async fn get_backend_service(&self, name: &str) -> Result<Option<BackendService>> {
        self.record("get_backend_service")?;
        Ok(self.store.lock().unwrap().backend_services.get(name).cloned())
    }

    async fn create_backend_service(&self, backend: BackendService) -> Result<()> {
        self.record("create_backend_service")?;
        self.store
            .lock()
            .unwrap()
            .backend_services
            .insert(backend.name.clone(), backend);
        Ok(())
    }

    async fn update_backend_service(&self, backend: BackendService) -> Result<()> {
        self.record("update_backend_service")?;
        self.store
            .lock()
            .unwrap()
            .backend_services
            .insert(backend.name.clone(), backend);
        Ok(())
    }

    async fn delete_backend_service(&self, name: &str) -> Result<()> {
        self.record("delete_backend_service")?;
        self.store.lock().unwrap().backend_services.remove(name);
        Ok(())
    }

    async fn list_backend_services(&self) -> Result<Vec<BackendService>> {
        self.record("list_backend_services")?;
        Ok(self.store.lock().unwrap().backend_services.values().cloned().collect())
    }

    async fn get_health_check(&self, name: &str) -> Result<Option<HealthCheck>> {
        self.record("get_health_check")?;
        Ok(self.store.lock().unwrap().health_checks.get(name).cloned())
    }

    async fn create_health_check(&self, hc: HealthCheck) -> Result<()> {
        self.record("create_health_check")?;
        self.store.lock().unwrap().health_checks.insert(hc.name.clone(), hc);
        Ok(())
    }

    async fn update_health_check(&self, hc: HealthCheck) -> Result<()> {
        self.record("update_health_check")?;
        self.store.lock().unwrap().health_checks.insert(hc.name.clone(), hc);
        Ok(())
    }

    async fn delete_health_check(&self, name: &str) -> Result<()> {
        self.record("delete_health_check")?;
        self.store.lock().unwrap().health_checks.remove(name);
        Ok(())
    }

    async fn get_instance_group(&self, name: &str, _zone: &str) -> Result<Option<InstanceGroup>> {
        self.record("get_instance_group")?;
        Ok(self.store.lock().unwrap().instance_groups.get(name).cloned())
    }

    async fn create_instance_group(&self, ig: InstanceGroup) -> Result<()> {
        self.record("create_instance_group")?;
        self.store.lock().unwrap().instance_groups.insert(ig.name.clone(), ig);
        Ok(())
    }

    async fn delete_instance_group(&self, name: &str, _zone: &str) -> Result<()> {
        self.record("delete_instance_group")?;
        self.store.lock().unwrap().instance_groups.remove(name);
        Ok(())
    }

    async fn add_instances(&self, name: &str, _zone: &str, instances: &[String]) -> Result<()> {
        self.record("add_instances")?;
        let mut store = self.store.lock().unwrap();
        if let Some(ig) = store.instance_groups.get_mut(name) {
            for inst in instances {
                if !ig.instances.contains(inst) {
                    ig.instances.push(inst.clone());
                }
            }
        }
        Ok(())
    }

    async fn remove_instances(&self, name: &str, _zone: &str, instances: &[String]) -> Result<()> {
        self.record("remove_instances")?;
        let mut store = self.store.lock().unwrap();
        if let Some(ig) = store.instance_groups.get_mut(name) {
            ig.instances.retain(|i| !instances.contains(i));
        }
        Ok(())
    }

    async fn set_named_ports(&self, name: &str, _zone: &str, ports: &[u16]) -> Result<()> {
        self.record("set_named_ports")?;
        let mut store = self.store.lock().unwrap();
        if let Some(ig) = store.instance_groups.get_mut(name) {
            ig.ports = ports.to_vec();
        }
        Ok(())
    }

    async fn get_url_map(&self, name: &str) -> Result<Option<UrlMap>> {
        self.record("get_url_map")?;
        Ok(self.store.lock().unwrap().url_maps.get(name).cloned())
    }

    async fn create_url_map(&self, um: UrlMap) -> Result<()> {
        self.record("create_url_map")?;
        self.store.lock().unwrap().url_maps.insert(um.name.clone(), um);
        Ok(())
    }

    async fn update_url_map(&self, um: UrlMap) -> Result<()> {
        self.record("update_url_map")?;
        self.store.lock().unwrap().url_maps.insert(um.name.clone(), um);
        Ok(())
    }

    async fn delete_url_map(&self, name: &str) -> Result<()> {
        self.record("delete_url_map")?;
        self.store.lock().unwrap().url_maps.remove(name);
        Ok(())
    }

    async fn get_target_http_proxy(&self, name: &str) -> Result<Option<TargetProxy>> {
        self.record("get_target_http_proxy")?;
        Ok(self.store.lock().unwrap().target_http_proxies.get(name).cloned())
    }

    async fn create_target_http_proxy(&self, proxy: TargetProxy) -> Result<()> {
        self.record("create_target_http_proxy")?;
        self.store
            .lock()
            .unwrap()
            .target_http_proxies
            .insert(proxy.name.clone(), proxy);
        Ok(())
    }

    async fn set_http_proxy_url_map(&self, name: &str, url_map_self_link: &str) -> Result<()> {
        self.record("set_http_proxy_url_map")?;
        let mut store = self.store.lock().unwrap();
        if let Some(p) = store.target_http_proxies.get_mut(name) {
            p.url_map = url_map_self_link.to_string();
        }
        Ok(())
    }

    async fn delete_target_http_proxy(&self, name: &str) -> Result<()> {
        self.record("delete_target_http_proxy")?;
        self.store.lock().unwrap().target_http_proxies.remove(name);
        Ok(())
    }

    async fn get_target_https_proxy(&self, name: &str) -> Result<Option<TargetProxy>> {
        self.record("get_target_https_proxy")?;
        Ok(self.store.lock().unwrap().target_https_proxies.get(name).cloned())
    }

    async fn create_target_https_proxy(&self, proxy: TargetProxy) -> Result<()> {
        self.record("create_target_https_proxy")?;
        self.store
            .lock()
            .unwrap()
            .target_https_proxies
            .insert(proxy.name.clone(), proxy);
        Ok(())
    }

    async fn set_https_proxy_url_map(&self, name: &str, url_map_self_link: &str) -> Result<()> {
        self.record("set_https_proxy_url_map")?;
        let mut store = self.store.lock().unwrap();
        if let Some(p) = store.target_https_proxies.get_mut(name) {
            p.url_map = url_map_self_link.to_string();
        }
        Ok(())
    }

    async fn set_https_proxy_ssl_certificates(&self, name: &str, certs: &[String]) -> Result<()> {
        self.record("set_https_proxy_ssl_certificates")?;
        let mut store = self.store.lock().unwrap();
        if let Some(p) = store.target_https_proxies.get_mut(name) {
            p.ssl_certificates = certs.to_vec();
        }
        Ok(())
    }

    async fn delete_target_https_proxy(&self, name: &str) -> Result<()> {
        self.record("delete_target_https_proxy")?;
        self.store.lock().unwrap().target_https_proxies.remove(name);
        Ok(())
    }

    async fn get_forwarding_rule(&self, name: &str) -> Result<Option<ForwardingRule>> {
        self.record("get_forwarding_rule")?;
        Ok(self.store.lock().unwrap().forwarding_rules.get(name).cloned())
    }

    async fn create_forwarding_rule(&self, fr: ForwardingRule) -> Result<()> {
        self.record("create_forwarding_rule")?;
        self.store.lock().unwrap().forwarding_rules.insert(fr.name.clone(), fr);
        Ok(())
    }

    async fn set_forwarding_rule_target(&self, name: &str, target_self_link: &str) -> Result<()> {
        self.record("set_forwarding_rule_target")?;
        let mut store = self.store.lock().unwrap();
        if let Some(fr) = store.forwarding_rules.get_mut(name) {
            fr.target = target_self_link.to_string();
        }
        Ok(())
    }

    async fn delete_forwarding_rule(&self, name: &str) -> Result<()> {
        self.record("delete_forwarding_rule")?;
        self.store.lock().unwrap().forwarding_rules.remove(name);
        Ok(())
    }

    async fn get_static_address(&self, name: &str) -> Result<Option<StaticAddress>> {
        self.record("get_static_address")?;
        Ok(self.store.lock().unwrap().static_addresses.get(name).cloned())
    }

    async fn create_static_address(&self, addr: StaticAddress) -> Result<()> {
        self.record("create_static_address")?;
        self.store
            .lock()
            .unwrap()
            .static_addresses
            .insert(addr.name.clone(), addr);
        Ok(())
    }

    async fn delete_static_address(&self, name: &str) -> Result<()> {
        self.record("delete_static_address")?;
        self.store.lock().unwrap().static_addresses.remove(name);
        Ok(())
    }

    async fn get_firewall(&self, name: &str) -> Result<Option<Firewall>> {
        self.record("get_firewall")?;
        Ok(self.store.lock().unwrap().firewalls.get(name).cloned())
    }

    async fn create_firewall(&self, fw: Firewall) -> Result<()> {
        self.record("create_firewall")?;
        self.store.lock().unwrap().firewalls.insert(fw.name.clone(), fw);
        Ok(())
    }

    async fn update_firewall(&self, fw: Firewall) -> Result<()> {
        self.record("update_firewall")?;
        self.store.lock().unwrap().firewalls.insert(fw.name.clone(), fw);
        Ok(())
    }

    async fn delete_firewall(&self, name: &str) -> Result<()> {
        self.record("delete_firewall")?;
        self.store.lock().unwrap().firewalls.remove(name);
        Ok(())
    }

    async fn get_ssl_certificate(&self, name: &str) -> Result<Option<SslCertificate>> {
        self.record("get_ssl_certificate")?;
        Ok(self.store.lock().unwrap().ssl_certificates.get(name).cloned())
    }

    async fn create_ssl_certificate(&self, cert: SslCertificate) -> Result<()> {
        self.record("create_ssl_certificate")?;
        self.store
            .lock()
            .unwrap()
            .ssl_certificates
            .insert(cert.name.clone(), cert);
        Ok(())
    }

    async fn delete_ssl_certificate(&self, name: &str) -> Result<()> {
        self.record("delete_ssl_certificate")?;
        self.store.lock().unwrap().ssl_certificates.remove(name);
        Ok(())
    }
}
