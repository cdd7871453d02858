use std::time::Duration;

use clap::Parser;

/// Command-line configuration for the reconciler binary.
///
/// Everything that varies the naming ABI (`cluster_uid`) or the shape of the
/// reconciled fabric (`default_backend_port`, `firewall_source_range`) is a
/// flag rather than a constant, but none of it may change after the process
/// starts — the health-check-path override in particular is read once at
/// startup and baked into the `HealthCheckPool`.
#[derive(Parser, Debug, Clone)]
#[command(about = "GCE L7 Ingress reconciliation controller")]
pub struct Cli {
    /// Short opaque token baked into every resource name this controller owns.
    #[arg(long, env = "CLUSTER_UID")]
    cluster_uid: String,

    /// Only reconcile Ingresses naming this `ingress.class`; unset means the
    /// controller also claims Ingresses with no class annotation.
    #[arg(long)]
    ingress_class: Option<String>,

    /// GCE zone the cluster's single instance group lives in.
    #[arg(long, default_value = "us-central1-a")]
    zone: String,

    /// NodePort used for the shared `glbcDefaultBackend`.
    #[arg(long, default_value_t = 30000)]
    default_backend_port: u16,

    /// Health check path for newly created HealthChecks; only read at startup.
    #[arg(long, default_value = "/")]
    default_health_check_path: String,

    /// Source CIDR allowed through the cluster firewall rule (GCE's L7
    /// health-checker range).
    #[arg(long, default_value = "130.211.0.0/22")]
    firewall_source_range: String,

    /// Base URL of the cloud REST API; overridable so tests and non-GCE
    /// deployments can point `GceHttpClient` at a mock server.
    #[arg(long, default_value = "https://compute.googleapis.com")]
    cloud_api_base_url: String,

    /// Bound on per-operation retries for transient (5xx/network) failures.
    #[arg(long, default_value_t = 3)]
    transient_retry_budget: u32,

    /// Base requeue delay for quota-classified failures; doubled on each
    /// consecutive quota failure for the same key, following the spec's
    /// "requeue with exponential backoff" rule.
    #[arg(long, default_value_t = 30)]
    quota_backoff_base_secs: u64,

    /// Requeue delay used for generic transient failures once the retry
    /// budget for a single checkpoint call is exhausted.
    #[arg(long, default_value_t = 15)]
    transient_requeue_secs: u64,
}

impl Cli {
    pub fn cluster_uid(&self) -> &str {
        &self.cluster_uid
    }

    pub fn ingress_class(&self) -> Option<&str> {
        self.ingress_class.as_deref()
    }

    pub fn zone(&self) -> &str {
        &self.zone
    }

    pub fn default_backend_port(&self) -> u16 {
        self.default_backend_port
    }

    pub fn default_health_check_path(&self) -> &str {
        &self.default_health_check_path
    }

    pub fn firewall_source_range(&self) -> &str {
        &self.firewall_source_range
    }

    pub fn cloud_api_base_url(&self) -> &str {
        &self.cloud_api_base_url
    }

    pub fn transient_retry_budget(&self) -> u32 {
        self.transient_retry_budget
    }

    pub fn quota_backoff_base(&self) -> Duration {
        Duration::from_secs(self.quota_backoff_base_secs)
    }

    pub fn transient_requeue_delay(&self) -> Duration {
        Duration::from_secs(self.transient_requeue_secs)
    }
}
