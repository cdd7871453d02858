mod cli;
mod cloud;
mod cluster_manager;
mod error;
mod naming;
mod pools;
mod reconciler;
mod snapshot;
mod translate;

use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use actix_web::{get, middleware, web, App, HttpRequest, HttpResponse, HttpServer, Responder};
use clap::Parser as _;
use tracing_subscriber::{layer::SubscriberExt as _, util::SubscriberInitExt as _};

use cli::Cli;
use cloud::types::TlsCert;
use cloud::GceHttpClient;
use cluster_manager::ClusterManager;
use naming::Namer;
use reconciler::{ClusterState, Reconciler};
use translate::{Ingress, Node, Service};

pub use crate::error::{ControllerError as Error, Result};

/// Stand-in for the Kubernetes API watch machinery (spec.md §1, out of
/// scope): reports an empty cluster until a real reflector-backed adapter
/// is wired in behind the `ClusterState` trait.
struct EmptyClusterState;

impl ClusterState for EmptyClusterState {
    fn ingresses(&self) -> Vec<Ingress> {
        Vec::new()
    }
    fn services(&self) -> Vec<Service> {
        Vec::new()
    }
    fn nodes(&self) -> Vec<Node> {
        Vec::new()
    }
    fn tls_secrets(&self) -> HashMap<String, TlsCert> {
        HashMap::new()
    }
}

#[get("/health")]
async fn health(healthy: web::Data<Arc<AtomicBool>>) -> impl Responder {
    if healthy.load(std::sync::atomic::Ordering::SeqCst) {
        HttpResponse::Ok().json("healthy")
    } else {
        HttpResponse::ServiceUnavailable().json("unhealthy")
    }
}

#[get("/")]
async fn index(_req: HttpRequest) -> impl Responder {
    HttpResponse::Ok()
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let namer = Namer::new(args.cluster_uid());
    let client: Arc<dyn cloud::CloudCompute> =
        Arc::new(GceHttpClient::new(args.cloud_api_base_url().to_string()));

    let manager = Arc::new(ClusterManager::new(
        client,
        namer.clone(),
        args.zone().to_string(),
        args.default_backend_port(),
        args.default_health_check_path().to_string(),
        args.firewall_source_range().to_string(),
    ));

    let reconciler = Arc::new(Reconciler::new(
        Arc::new(EmptyClusterState),
        manager,
        namer,
        args.ingress_class().unwrap_or("gce").to_string(),
        args.transient_retry_budget(),
        args.quota_backoff_base(),
        args.transient_requeue_delay(),
    ));

    let healthy = reconciler.healthy();
    let worker_reconciler = reconciler.clone();

    tokio::join!(run_worker(worker_reconciler), run_server(healthy)).1?;

    Ok(())
}

async fn run_worker(reconciler: Arc<Reconciler>) {
    // Level-driven: even with no watch events yet, re-checkpoint on a slow
    // tick so a controller started against an already-converged cluster
    // doesn't sit idle forever once a real `ClusterState` adapter is wired in.
    reconciler.queue().enqueue("__startup__");
    let ticking = reconciler.queue();
    let ticker = tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(30));
        loop {
            interval.tick().await;
            ticking.enqueue("__periodic__");
        }
    });

    tokio::select! {
        _ = reconciler.run() => {}
        _ = tokio::signal::ctrl_c() => {
            reconciler.shutdown();
        }
    }
    ticker.abort();
}

async fn run_server(healthy: Arc<AtomicBool>) -> Result<(), std::io::Error> {
    let server = HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(healthy.clone()))
            .wrap(middleware::Logger::default().exclude("/health"))
            .service(index)
            .service(health)
    })
    .bind("0.0.0.0:8080")?
    .workers(2)
    .shutdown_timeout(5);

    server.run().await
}
