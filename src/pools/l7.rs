//! One logical L7 load balancer per Ingress: UrlMap + TargetHttpProxy +
//! optional TargetHttpsProxy + ForwardingRule(s) + StaticIP + SslCert
//! (spec.md §4.7).

use std::sync::Arc;

use md5::{Digest, Md5};
use tracing::{debug, info, warn};

use crate::cloud::types::{
    ForwardingRule, HostRule, L7RuntimeInfo, PathMatcher, PathRule, SslCertificate, StaticAddress,
    TargetProxy, UrlMap, L7,
};
use crate::cloud::CloudCompute;
use crate::error::{CloudErrorKind, Result};
use crate::naming::{path_matcher_name, Namer, Scheme};
use crate::snapshot::Snapshotter;

pub struct L7Pool {
    client: Arc<dyn CloudCompute>,
    namer: Namer,
    default_backend_port: u16,
    snapshot: Snapshotter<L7>,
}

impl L7Pool {
    pub fn new(client: Arc<dyn CloudCompute>, namer: Namer, default_backend_port: u16) -> Self {
        Self {
            client,
            namer,
            default_backend_port,
            snapshot: Snapshotter::in_memory(),
        }
    }

    pub fn get(&self, key: &str) -> Option<L7> {
        self.snapshot.get(key)
    }

    /// Lazily creates the pool-shared default backend on first reference.
    /// Guarded by the caller holding the only writer (the reconciler's
    /// single worker), matching the "guarded by the L7Pool mutex" note in
    /// spec.md §5 — there is only ever one in-flight checkpoint.
    async fn ensure_default_backend(&self) -> Result<String> {
        let name = self.namer.default_backend();
        if let Some(existing) = self.client.get_backend_service(&name).await? {
            return Ok(existing.self_link);
        }
        let hc_name = self.namer.hc(self.default_backend_port);
        if self.client.get_health_check(&hc_name).await?.is_none() {
            let hc = crate::cloud::types::HealthCheck {
                name: hc_name.clone(),
                self_link: format!("self/healthChecks/{hc_name}"),
                path: "/".to_string(),
                port: self.default_backend_port,
                interval_sec: 1,
                timeout_sec: 1,
                healthy_threshold: 1,
                unhealthy_threshold: 10,
            };
            self.client.create_health_check(hc).await?;
        }
        let backend = crate::cloud::types::BackendService {
            name: name.clone(),
            self_link: format!("self/backendServices/{name}"),
            port: self.default_backend_port,
            health_checks: vec![hc_name],
            backends: Vec::new(),
        };
        info!(%name, "creating shared default backend");
        self.client.create_backend_service(backend.clone()).await?;
        Ok(backend.self_link)
    }

    async fn teardown_default_backend(&self) -> Result<()> {
        let name = self.namer.default_backend();
        self.client.delete_backend_service(&name).await?;
        let hc_name = self.namer.hc(self.default_backend_port);
        self.client.delete_health_check(&hc_name).await
    }

    /// Step 1: UrlMap must exist, `defaultService` must not be stale, and
    /// every host in `host_rules_input` gets its PathMatcher rebuilt
    /// wholesale. Hosts absent from the input are left untouched (an urlMap
    /// may be shared across Ingress claims).
    async fn ensure_url_map(
        &self,
        um_name: &str,
        default_service: &str,
        host_rules_input: &[(String, Vec<(String, String)>)],
    ) -> Result<UrlMap> {
        let existing = self.client.get_url_map(um_name).await?;
        let mut um = existing.clone().unwrap_or_else(|| UrlMap {
            name: um_name.to_string(),
            self_link: format!("self/urlMaps/{um_name}"),
            default_service: default_service.to_string(),
            host_rules: Vec::new(),
            path_matchers: Vec::new(),
        });
        um.default_service = default_service.to_string();

        for (host, paths) in host_rules_input {
            let pm_name = path_matcher_name(host);

            if !um.host_rules.iter().any(|hr| hr.hosts.contains(host)) {
                um.host_rules.push(HostRule {
                    hosts: vec![host.clone()],
                    path_matcher: pm_name.clone(),
                });
            }

            // Longest-prefix-wins; ties keep first occurrence since
            // `sort_by` is stable and ties compare equal.
            let mut rules: Vec<PathRule> = paths
                .iter()
                .map(|(path, service)| PathRule {
                    paths: vec![path.clone()],
                    service: service.clone(),
                })
                .collect();
            rules.sort_by(|a, b| b.paths[0].len().cmp(&a.paths[0].len()));

            match um.path_matchers.iter_mut().find(|pm| pm.name == pm_name) {
                Some(pm) => pm.path_rules = rules,
                None => um.path_matchers.push(PathMatcher {
                    name: pm_name,
                    default_service: None,
                    path_rules: rules,
                }),
            }
        }

        let commit = |um: UrlMap| {
            let client = self.client.clone();
            let existed = existing.is_some();
            async move {
                if existed {
                    client.update_url_map(um).await
                } else {
                    client.create_url_map(um).await
                }
            }
        };

        match commit(um.clone()).await {
            Ok(()) => Ok(um),
            Err(e) if e.cloud_kind() == Some(CloudErrorKind::Conflict) => {
                debug!(%um_name, "retrying url map commit after optimistic-concurrency conflict");
                commit(um.clone()).await?;
                Ok(um)
            }
            Err(e) => Err(e),
        }
    }

    /// Step 2: TargetHttpProxy must exist and point at `um_self_link`.
    async fn ensure_target_http_proxy(&self, tp_name: &str, um_self_link: &str) -> Result<String> {
        match self.client.get_target_http_proxy(tp_name).await? {
            None => {
                let proxy = TargetProxy {
                    name: tp_name.to_string(),
                    self_link: format!("self/targetHttpProxies/{tp_name}"),
                    url_map: um_self_link.to_string(),
                    ssl_certificates: Vec::new(),
                };
                self.client.create_target_http_proxy(proxy.clone()).await?;
                Ok(proxy.self_link)
            }
            Some(existing) if existing.url_map == um_self_link => Ok(existing.self_link),
            Some(existing) => {
                debug!(%tp_name, "target http proxy url-map link drifted, repairing");
                self.client.set_http_proxy_url_map(tp_name, um_self_link).await?;
                Ok(existing.self_link)
            }
        }
    }

    /// Step 3: TargetHttpsProxy must exist, point at `um_self_link`, and
    /// carry `cert_self_link`.
    async fn ensure_target_https_proxy(
        &self,
        tps_name: &str,
        um_self_link: &str,
        cert_self_link: &str,
    ) -> Result<String> {
        match self.client.get_target_https_proxy(tps_name).await? {
            None => {
                let proxy = TargetProxy {
                    name: tps_name.to_string(),
                    self_link: format!("self/targetHttpsProxies/{tps_name}"),
                    url_map: um_self_link.to_string(),
                    ssl_certificates: vec![cert_self_link.to_string()],
                };
                self.client.create_target_https_proxy(proxy.clone()).await?;
                Ok(proxy.self_link)
            }
            Some(existing) => {
                if existing.url_map != um_self_link {
                    debug!(%tps_name, "target https proxy url-map link drifted, repairing");
                    self.client.set_https_proxy_url_map(tps_name, um_self_link).await?;
                }
                if existing.ssl_certificates != [cert_self_link.to_string()] {
                    self.client
                        .set_https_proxy_ssl_certificates(tps_name, &[cert_self_link.to_string()])
                        .await?;
                }
                Ok(existing.self_link)
            }
        }
    }

    /// Cert rotation: mints a new SslCert only when the requested material's
    /// content hash differs from the currently attached one. The caller
    /// deletes the old cert after the new one is attached, never before.
    async fn ensure_ssl_certificate(
        &self,
        key: &str,
        certificate: &str,
        private_key: &str,
        current_name: &Option<String>,
    ) -> Result<String> {
        let content_hash = cert_content_hash(certificate, private_key);

        if let Some(name) = current_name {
            if let Some(existing) = self.client.get_ssl_certificate(name).await? {
                if existing.content_hash == content_hash {
                    return Ok(name.clone());
                }
            }
        }

        let new_name = self.namer.ssl_cert(key, &content_hash);
        if self.client.get_ssl_certificate(&new_name).await?.is_none() {
            let cert = SslCertificate {
                name: new_name.clone(),
                self_link: format!("self/sslCertificates/{new_name}"),
                certificate: certificate.to_string(),
                private_key: private_key.to_string(),
                content_hash,
            };
            info!(name = %new_name, "rotating ssl certificate");
            self.client.create_ssl_certificate(cert).await?;
        }
        Ok(new_name)
    }

    async fn ensure_static_ip(&self, requested: &Option<String>) -> Result<Option<String>> {
        let Some(name) = requested else {
            return Ok(None);
        };
        if let Some(existing) = self.client.get_static_address(name).await? {
            return Ok(Some(existing.address));
        }
        let mut hasher = Md5::new();
        hasher.update(name.as_bytes());
        let digest = hasher.finalize();
        let address = format!("203.0.113.{}", digest[0]);
        let addr = StaticAddress {
            name: name.clone(),
            self_link: format!("self/globalAddresses/{name}"),
            address: address.clone(),
        };
        self.client.create_static_address(addr).await?;
        Ok(Some(address))
    }

    async fn ensure_forwarding_rule(
        &self,
        fr_name: &str,
        target_self_link: &str,
        scheme: Scheme,
        ip_address: &Option<String>,
    ) -> Result<String> {
        let port_range: &str = scheme.into();
        match self.client.get_forwarding_rule(fr_name).await? {
            None => {
                let fr = ForwardingRule {
                    name: fr_name.to_string(),
                    self_link: format!("self/globalForwardingRules/{fr_name}"),
                    port_range: port_range.to_string(),
                    target: target_self_link.to_string(),
                    ip_address: ip_address.clone().unwrap_or_default(),
                };
                self.client.create_forwarding_rule(fr.clone()).await?;
                Ok(fr.self_link)
            }
            Some(existing) if existing.target == target_self_link => Ok(existing.self_link),
            Some(existing) => {
                debug!(%fr_name, "forwarding rule target drifted, repairing");
                self.client
                    .set_forwarding_rule_target(fr_name, target_self_link)
                    .await?;
                Ok(existing.self_link)
            }
        }
    }

    /// Runs the full edge-hop sequence for one Ingress's L7, creating or
    /// repairing whatever has drifted.
    pub async fn add(&self, info: L7RuntimeInfo) -> Result<L7> {
        let key = info.ingress_key.clone();
        let mut l7 = self.snapshot.get(&key).unwrap_or_else(|| L7::new(key.clone(), info.clone()));
        // Captured before the overwrite below: the deletion guards further
        // down compare against the cert this L7 had *before* this request,
        // not the incoming one, so a pre-shared cert dropped from this
        // request doesn't read as "never attached" and get deleted.
        let old_pre_shared_cert = l7.runtime_info.pre_shared_cert.clone();
        l7.runtime_info = info;

        let default_backend_link = self.ensure_default_backend().await?;

        let um_name = self.namer.um(&key);
        let default_service = l7
            .runtime_info
            .default_backend
            .clone()
            .unwrap_or_else(|| default_backend_link.clone());
        let um = self
            .ensure_url_map(&um_name, &default_service, &l7.runtime_info.host_rules)
            .await?;
        l7.url_map_name = um_name.clone();

        if l7.runtime_info.allow_http {
            let tp_name = self.namer.tp(&key, Scheme::Http);
            let tp_link = self.ensure_target_http_proxy(&tp_name, &um.self_link).await?;
            l7.target_http_proxy_name = Some(tp_name.clone());

            let static_ip = self.ensure_static_ip(&l7.runtime_info.static_ip_name).await?;
            let fr_name = self.namer.fr(&key, Scheme::Http);
            self.ensure_forwarding_rule(&fr_name, &tp_link, Scheme::Http, &static_ip)
                .await?;
            l7.forwarding_rule_http_name = Some(fr_name);
        } else if let Some(tp_name) = l7.target_http_proxy_name.take() {
            if let Some(fr_name) = l7.forwarding_rule_http_name.take() {
                self.client.delete_forwarding_rule(&fr_name).await?;
            }
            self.client.delete_target_http_proxy(&tp_name).await?;
        }

        // A pre-shared cert stands in for a k8s TLS Secret entirely — an
        // Ingress can request HTTPS via `pre-shared-cert` alone, with no
        // `tls:` stanza resolving to a secret at all.
        if l7.runtime_info.tls.is_some() || l7.runtime_info.pre_shared_cert.is_some() {
            let cert_name = if let Some(shared) = &l7.runtime_info.pre_shared_cert {
                shared.clone()
            } else {
                let tls = l7
                    .runtime_info
                    .tls
                    .clone()
                    .expect("the outer condition guarantees tls or pre_shared_cert");
                self.ensure_ssl_certificate(
                    &key,
                    &tls.certificate,
                    &tls.private_key,
                    &l7.ssl_certificate_name,
                )
                .await?
            };
            let cert_self_link = format!("self/sslCertificates/{cert_name}");

            let tps_name = self.namer.tp(&key, Scheme::Https);
            let tps_link = self
                .ensure_target_https_proxy(&tps_name, &um.self_link, &cert_self_link)
                .await?;

            let old_cert = l7.ssl_certificate_name.replace(cert_name.clone());
            if let Some(old) = old_cert {
                if old != cert_name && old_pre_shared_cert.as_deref() != Some(old.as_str()) {
                    self.client.delete_ssl_certificate(&old).await?;
                }
            }

            let static_ip = self.ensure_static_ip(&l7.runtime_info.static_ip_name).await?;
            let frs_name = self.namer.fr(&key, Scheme::Https);
            self.ensure_forwarding_rule(&frs_name, &tps_link, Scheme::Https, &static_ip)
                .await?;
            l7.target_https_proxy_name = Some(tps_name);
            l7.forwarding_rule_https_name = Some(frs_name);
        } else if let Some(tps_name) = l7.target_https_proxy_name.take() {
            if let Some(frs_name) = l7.forwarding_rule_https_name.take() {
                self.client.delete_forwarding_rule(&frs_name).await?;
            }
            self.client.delete_target_https_proxy(&tps_name).await?;
            if let Some(cert) = l7.ssl_certificate_name.take() {
                if old_pre_shared_cert.as_deref() != Some(cert.as_str()) {
                    self.client.delete_ssl_certificate(&cert).await?;
                }
            }
        }

        l7.static_address_name = l7.runtime_info.static_ip_name.clone();
        self.snapshot.add(key, l7.clone());
        Ok(l7)
    }

    /// Delete ordering: forwarding rules -> target proxies -> urlMap ->
    /// sslCert -> staticIP. 404 at any step is success. User-requested
    /// static IPs are reused infrastructure, never deleted here.
    pub async fn delete(&self, key: &str) -> Result<()> {
        let Some(l7) = self.snapshot.get(key) else {
            return Ok(());
        };

        if let Some(name) = &l7.forwarding_rule_http_name {
            self.client.delete_forwarding_rule(name).await?;
        }
        if let Some(name) = &l7.forwarding_rule_https_name {
            self.client.delete_forwarding_rule(name).await?;
        }
        if let Some(name) = &l7.target_http_proxy_name {
            self.client.delete_target_http_proxy(name).await?;
        }
        if let Some(name) = &l7.target_https_proxy_name {
            self.client.delete_target_https_proxy(name).await?;
        }
        self.client.delete_url_map(&l7.url_map_name).await?;
        if let Some(name) = &l7.ssl_certificate_name {
            if l7.runtime_info.pre_shared_cert.as_deref() != Some(name.as_str()) {
                self.client.delete_ssl_certificate(name).await?;
            }
        }

        self.snapshot.delete(key);
        Ok(())
    }

    /// Ensures every runtime info in `list` has been `add`ed; tears down the
    /// shared default backend when `list` is empty (spec.md §4.8 step 5,
    /// §5 "shared resources").
    pub async fn sync(&self, list: Vec<L7RuntimeInfo>) -> Result<()> {
        if list.is_empty() {
            return self.teardown_default_backend().await.or_else(|e| {
                if e.cloud_kind() == Some(CloudErrorKind::NotFound) {
                    Ok(())
                } else {
                    Err(e)
                }
            });
        }
        for info in list {
            self.add(info).await?;
        }
        Ok(())
    }

    /// Deletes every L7 this pool knows about whose key is absent from
    /// `live_keys`. Limited to locally known L7s: the cloud REST surface has
    /// no list verb for UrlMaps/proxies/forwarding rules (spec.md §6), so
    /// orphans created entirely out-of-band are outside what this pool can
    /// discover on its own.
    pub async fn gc(&self, live_keys: &[String]) -> Result<()> {
        let stale: Vec<String> = self
            .snapshot
            .snapshot()
            .into_keys()
            .filter(|k| !live_keys.contains(k))
            .collect();
        for key in stale {
            debug!(%key, "garbage collecting orphaned l7");
            self.delete(&key).await?;
        }
        Ok(())
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.gc(&[]).await?;
        self.sync(Vec::new()).await
    }
}

fn cert_content_hash(certificate: &str, private_key: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(certificate.as_bytes());
    hasher.update(private_key.as_bytes());
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}
