//! Stable, deterministic naming for every cloud resource this controller
//! owns, plus the reverse parser used by garbage collection to tell owned
//! resources from foreign ones.

use md5::{Digest, Md5};

/// GCE object names are capped at 62 characters.
const MAX_NAME_LEN: usize = 62;

/// Separator between a name's variable portion and its cluster UID suffix.
/// `owned_by_cluster` requires this delimiter to appear exactly once.
const UID_DELIM: &str = "--";

/// Pure mapping from (kind, args) to a byte-stable cloud resource name.
#[derive(Debug, Clone)]
pub struct Namer {
    cluster_uid: String,
}

impl Namer {
    pub fn new(cluster_uid: impl Into<String>) -> Self {
        Self {
            cluster_uid: cluster_uid.into(),
        }
    }

    pub fn cluster_uid(&self) -> &str {
        &self.cluster_uid
    }

    /// `k8s-be-<port>--<uid>`
    pub fn be(&self, port: u16) -> String {
        self.truncate(format!("k8s-be-{port}"))
    }

    /// `k8s-be-<port>--<uid>` — health checks are co-keyed with their backend.
    pub fn hc(&self, port: u16) -> String {
        self.be(port)
    }

    /// `k8s-ig--<uid>`
    pub fn ig(&self) -> String {
        self.truncate("k8s-ig".to_string())
    }

    /// `k8s-lb-<ingressKey>--<uid>`
    pub fn lb(&self, ingress_key: &str) -> String {
        self.truncate(format!("k8s-lb-{}", sanitize_key(ingress_key)))
    }

    /// `k8s-um-<ingressKey>--<uid>`
    pub fn um(&self, ingress_key: &str) -> String {
        self.truncate(format!("k8s-um-{}", sanitize_key(ingress_key)))
    }

    /// `k8s-tp-<ingressKey>--<uid>` (HTTP) or `k8s-tps-<ingressKey>--<uid>` (HTTPS)
    pub fn tp(&self, ingress_key: &str, scheme: Scheme) -> String {
        let prefix = match scheme {
            Scheme::Http => "k8s-tp",
            Scheme::Https => "k8s-tps",
        };
        self.truncate(format!("{prefix}-{}", sanitize_key(ingress_key)))
    }

    /// `k8s-fw-<ingressKey>--<uid>` (HTTP) or `k8s-fws-<ingressKey>--<uid>` (HTTPS)
    pub fn fr(&self, ingress_key: &str, scheme: Scheme) -> String {
        let prefix = match scheme {
            Scheme::Http => "k8s-fw",
            Scheme::Https => "k8s-fws",
        };
        self.truncate(format!("{prefix}-{}", sanitize_key(ingress_key)))
    }

    /// `k8s-fw-l7--<uid>` — the single cluster-scoped firewall rule.
    pub fn fw(&self) -> String {
        self.truncate("k8s-fw-l7".to_string())
    }

    /// `k8s-ssl-<ingressKey>-<hash8>--<uid>` — minted on cert rotation, not
    /// part of the persisted ABI either; the hash suffix is what makes the
    /// name change when the cert material changes (spec.md §4.7).
    pub fn ssl_cert(&self, ingress_key: &str, content_hash: &str) -> String {
        let short = &content_hash[..content_hash.len().min(8)];
        self.truncate(format!("k8s-ssl-{}-{short}", sanitize_key(ingress_key)))
    }

    /// `k8s-be-default--<uid>` — the L7Pool's shared default BackendService.
    /// Not part of the persisted ABI (spec.md §6 names nine resource shapes,
    /// none of them this one), but it needs a byte-stable name too since it
    /// survives restarts the same as everything else the namer produces.
    pub fn default_backend(&self) -> String {
        self.truncate("k8s-be-default".to_string())
    }

    /// Appends the cluster UID suffix, truncating the variable portion and
    /// appending an 8-hex-char content hash when the full name would exceed
    /// 62 characters. The hash keeps uniqueness with roughly 2^32
    /// pigeon-hole margin (spec.md's accepted probability of collision).
    fn truncate(&self, variable: String) -> String {
        let full = format!("{variable}{UID_DELIM}{}", self.cluster_uid);
        if full.len() <= MAX_NAME_LEN {
            return full;
        }

        let hash = short_hash(&variable);
        let suffix = format!("-{hash}{UID_DELIM}{}", self.cluster_uid);
        let keep = MAX_NAME_LEN.saturating_sub(suffix.len());
        let mut kept: String = variable.chars().take(keep).collect();
        kept.push_str(&suffix);
        kept
    }

    /// True iff `name` contains the cluster UID delimiter exactly once and
    /// the trailing segment equals this cluster's UID. Resources failing
    /// this check are foreign and must never be mutated or deleted.
    pub fn owned_by_cluster(&self, name: &str) -> bool {
        match split_uid(name) {
            Some((_, uid)) if name.matches(UID_DELIM).count() == 1 => uid == self.cluster_uid,
            _ => false,
        }
    }

    /// Parses a cloud resource name into a tagged variant. Resources owned
    /// by a different cluster UID (or with no recognizable shape) parse as
    /// `ParsedName::Foreign`.
    pub fn parse(&self, name: &str) -> ParsedName {
        if !self.owned_by_cluster(name) {
            return ParsedName::Foreign;
        }
        let (variable, _) = split_uid(name).expect("owned_by_cluster checked the delimiter");

        if let Some(port) = variable.strip_prefix("k8s-be-").and_then(parse_port) {
            return ParsedName::Backend { port };
        }
        if variable == "k8s-ig" {
            return ParsedName::InstanceGroup;
        }
        if variable == "k8s-fw-l7" {
            return ParsedName::Firewall;
        }
        if let Some(key) = variable.strip_prefix("k8s-um-") {
            return ParsedName::UrlMap {
                ingress_key: key.to_string(),
            };
        }
        if let Some(key) = variable.strip_prefix("k8s-tps-") {
            return ParsedName::TargetHttpsProxy {
                ingress_key: key.to_string(),
            };
        }
        if let Some(key) = variable.strip_prefix("k8s-tp-") {
            return ParsedName::TargetHttpProxy {
                ingress_key: key.to_string(),
            };
        }
        if let Some(key) = variable.strip_prefix("k8s-fws-") {
            return ParsedName::ForwardingRuleHttps {
                ingress_key: key.to_string(),
            };
        }
        if let Some(key) = variable.strip_prefix("k8s-fw-") {
            return ParsedName::ForwardingRuleHttp {
                ingress_key: key.to_string(),
            };
        }
        if let Some(key) = variable.strip_prefix("k8s-lb-") {
            return ParsedName::LoadBalancer {
                ingress_key: key.to_string(),
            };
        }

        ParsedName::Foreign
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scheme {
    Http,
    Https,
}

/// Result of parsing a cloud resource name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedName {
    Backend { port: u16 },
    InstanceGroup,
    Firewall,
    UrlMap { ingress_key: String },
    TargetHttpProxy { ingress_key: String },
    TargetHttpsProxy { ingress_key: String },
    ForwardingRuleHttp { ingress_key: String },
    ForwardingRuleHttps { ingress_key: String },
    LoadBalancer { ingress_key: String },
    Foreign,
}

/// Ingress keys (`namespace/name`) contain a slash, which is not legal in a
/// GCE resource name; the namer models the ABI's `<ingressKey>` placeholder
/// as the slash replaced with a dash, matching every other k8s-facing naming
/// scheme in this family of controllers.
fn sanitize_key(ingress_key: &str) -> String {
    ingress_key.replace('/', "-")
}

fn short_hash(input: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(input.as_bytes());
    let digest = hasher.finalize();
    digest.iter().take(4).map(|b| format!("{b:02x}")).collect()
}

/// `host-<md5(host)>`, the PathMatcher name the url-map update algorithm
/// assigns to each HostRule (spec.md §4.7).
pub fn path_matcher_name(host: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(host.as_bytes());
    let digest = hasher.finalize();
    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    format!("host-{hex}")
}

fn split_uid(name: &str) -> Option<(&str, &str)> {
    name.rsplit_once(UID_DELIM)
}

fn parse_port(rest: &str) -> Option<u16> {
    rest.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn namer() -> Namer {
        Namer::new("u")
    }

    #[test]
    fn backend_name_matches_abi() {
        assert_eq!(namer().be(30001), "k8s-be-30001--u");
    }

    #[test]
    fn firewall_name_matches_abi() {
        assert_eq!(namer().fw(), "k8s-fw-l7--u");
    }

    #[test]
    fn health_check_is_co_keyed_with_backend() {
        let n = namer();
        assert_eq!(n.hc(30001), n.be(30001));
    }

    #[test]
    fn forwarding_rule_scheme_changes_prefix() {
        let n = namer();
        assert_eq!(n.fr("foo-bar", Scheme::Http), "k8s-fw-foo-bar--u");
        assert_eq!(n.fr("foo-bar", Scheme::Https), "k8s-fws-foo-bar--u");
    }

    #[test]
    fn long_ingress_key_gets_hashed_and_truncated() {
        let n = Namer::new("u");
        let key = "a".repeat(100);
        let name = n.um(&key);
        assert!(name.len() <= 62);
        assert!(n.owned_by_cluster(&name));
        // Two different long keys sharing a common prefix must not collide.
        let other = n.um(&format!("{key}-different-tail"));
        assert_ne!(name, other);
    }

    #[test]
    fn owned_by_cluster_rejects_foreign_uid() {
        let n = namer();
        assert!(!n.owned_by_cluster("k8s-be-30001--other"));
        assert!(n.owned_by_cluster(&n.be(30001)));
    }

    #[test]
    fn owned_by_cluster_requires_exactly_one_delimiter() {
        let n = namer();
        assert!(!n.owned_by_cluster("k8s-be-30001--u--u"));
    }

    #[test]
    fn parse_roundtrips_backend() {
        let n = namer();
        let name = n.be(30001);
        assert_eq!(n.parse(&name), ParsedName::Backend { port: 30001 });
    }

    #[test]
    fn parse_roundtrips_url_map() {
        let n = namer();
        let name = n.um("foo-bar");
        assert_eq!(
            n.parse(&name),
            ParsedName::UrlMap {
                ingress_key: "foo-bar".to_string()
            }
        );
    }

    #[test]
    fn parse_marks_foreign_uid_as_foreign() {
        let n = namer();
        assert_eq!(n.parse("k8s-be-30002--otherUID"), ParsedName::Foreign);
    }

    #[test]
    fn parse_marks_unrecognized_shape_as_foreign() {
        let n = namer();
        assert_eq!(n.parse("some-manual-resource--u"), ParsedName::Foreign);
    }
}
