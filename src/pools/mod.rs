pub mod backend;
pub mod firewall;
pub mod healthcheck;
pub mod instance_group;
pub mod l7;

pub use backend::BackendPool;
pub use firewall::FirewallPool;
pub use healthcheck::HealthCheckPool;
pub use instance_group::InstanceGroupPool;
pub use l7::L7Pool;
