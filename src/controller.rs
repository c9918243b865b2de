// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Watches, work queue and worker pool.
//!
//! Watch events for `Ingress`, `Gateway` and `Certificate` objects are
//! reduced to [`ResourceKey`]s and added to a [`WorkQueue`]. A certificate
//! event enqueues the resource that controls it, so edits to a managed
//! certificate are reverted and deleted certificates are recreated.
//!
//! A fixed number of workers drain the queue. Each worker reconciles one key
//! at a time and feeds the result through [`Reconciler::requeue_for`]. On
//! shutdown the queue stops accepting keys, in-flight reconciles finish and
//! the workers exit once the queue is drained.
//!
//! Workers only start after the source caches have completed their initial
//! list. An empty cache would otherwise read as "every resource was deleted".

use crate::config::ShimConfig;
use crate::crd::{Certificate, Gateway};
use crate::events::{EventSink, KubeEventSink};
use crate::metrics;
use crate::queue::WorkQueue;
use crate::reconciler::{Reconciler, Requeue};
use crate::resource::ResourceKey;
use crate::store::{CertificateStore, ClusterSources, KubeStore, SourceStore};
use anyhow::Result;
use futures::{Stream, StreamExt};
use k8s_openapi::api::networking::v1::Ingress;
use k8s_openapi::NamespaceResourceScope;
use kube::discovery::{ApiResource, Discovery};
use kube::runtime::{reflector, watcher, WatchStreamExt};
use kube::{Api, Client, Resource};
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

/// A reconciler, its work queue and a pool of workers.
pub struct Controller<S, C, E> {
    reconciler: Arc<Reconciler<S, C, E>>,
    queue: WorkQueue<ResourceKey>,
    workers: usize,
}

impl<S, C, E> Controller<S, C, E>
where
    S: SourceStore + 'static,
    C: CertificateStore + 'static,
    E: EventSink + 'static,
{
    /// # Arguments
    ///
    /// * `workers` - Number of concurrent workers; at least one runs
    pub fn new(reconciler: Reconciler<S, C, E>, queue: WorkQueue<ResourceKey>, workers: usize) -> Self {
        Self {
            reconciler: Arc::new(reconciler),
            queue,
            workers: workers.max(1),
        }
    }

    #[must_use]
    pub fn queue(&self) -> &WorkQueue<ResourceKey> {
        &self.queue
    }

    /// Run the workers until `shutdown` completes, then drain the queue.
    pub async fn run<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        info!(workers = self.workers, "Starting reconcile workers");
        let mut workers = JoinSet::new();
        for id in 0..self.workers {
            workers.spawn(worker(id, Arc::clone(&self.reconciler), self.queue.clone()));
        }

        shutdown.await;
        info!(pending = self.queue.len(), "Shutting down, draining work queue");
        self.queue.shutdown();

        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Reconcile worker failed");
            }
        }
        info!("All reconcile workers stopped");
    }
}

async fn worker<S, C, E>(id: usize, reconciler: Arc<Reconciler<S, C, E>>, queue: WorkQueue<ResourceKey>)
where
    S: SourceStore,
    C: CertificateStore,
    E: EventSink,
{
    debug!(worker = id, "Worker started");

    while let Some(key) = queue.get().await {
        metrics::set_queue_depth(queue.len());
        let kind = key.kind.as_str();
        let started = Instant::now();

        let result = reconciler.reconcile(&key).await;
        let elapsed = started.elapsed();

        match &result {
            Ok(outcome) if outcome.conflicts.is_empty() => {
                debug!(
                    worker = id,
                    resource = %key,
                    mutations = outcome.mutations,
                    state = ?outcome.state(),
                    "Reconciled"
                );
                metrics::record_reconciliation_success(kind, elapsed);
            }
            Ok(outcome) => {
                info!(
                    worker = id,
                    resource = %key,
                    mutations = outcome.mutations,
                    conflicts = outcome.conflicts.len(),
                    "Reconciled with ownership conflicts"
                );
                metrics::record_reconciliation_conflict(kind, elapsed);
            }
            Err(err) => {
                let error_kind = err.kind();
                if err.is_transient() || err.is_invalid_input() || err.is_conflict() {
                    warn!(worker = id, resource = %key, error = %err, kind = error_kind.as_str(), "Reconcile failed");
                } else {
                    error!(worker = id, resource = %key, error = %err, "Reconcile failed with a programming error");
                }
                metrics::record_reconciliation_error(kind, error_kind.as_str(), elapsed);
            }
        }

        match reconciler.requeue_for(&result) {
            Requeue::Forget | Requeue::Never => queue.forget(&key),
            Requeue::After(delay) => {
                let reason = match &result {
                    Err(err) if err.is_invalid_input() => "invalid",
                    _ => "conflict",
                };
                debug!(resource = %key, delay_secs = delay.as_secs(), reason, "Requeue after interval");
                metrics::record_requeue(kind, reason);
                queue.forget(&key);
                queue.add_after(key.clone(), delay);
            }
            Requeue::RateLimited => {
                debug!(resource = %key, requeues = queue.num_requeues(&key), "Rate-limited requeue");
                metrics::record_requeue(kind, "rate_limited");
                queue.add_rate_limited(key.clone());
            }
        }
        queue.done(&key);
    }

    debug!(worker = id, "Worker stopped");
}

/// Forward every object touched by a watch stream to the queue as a key.
async fn enqueue_touched<K, St, F>(kind: &'static str, stream: St, queue: WorkQueue<ResourceKey>, to_key: F)
where
    St: Stream<Item = Result<K, watcher::Error>>,
    F: Fn(&K) -> Option<ResourceKey>,
{
    info!(kind, "Starting watch");
    futures::pin_mut!(stream);

    while let Some(event) = stream.next().await {
        match event {
            Ok(object) => {
                if let Some(key) = to_key(&object) {
                    debug!(kind, resource = %key, "Enqueue");
                    queue.add(key);
                    metrics::set_queue_depth(queue.len());
                }
            }
            Err(e) => warn!(kind, error = %e, "Watch error, retrying with backoff"),
        }
    }
    warn!(kind, "Watch stream ended");
}

fn scoped_api<K>(client: &Client, namespace: Option<&str>) -> Api<K>
where
    K: Resource<Scope = NamespaceResourceScope, DynamicType = ()> + Clone + DeserializeOwned + Debug,
{
    match namespace {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    }
}

/// Whether the discovered resources include the `Gateway` version certshim watches.
#[must_use]
pub fn gateway_served(resources: &[ApiResource]) -> bool {
    resources.iter().any(|resource| {
        resource.group == Gateway::group(&())
            && resource.version == Gateway::version(&())
            && resource.kind == Gateway::kind(&())
    })
}

/// Ask the API server whether it serves Gateways.
///
/// A cluster without the Gateway API CRDs would leave the Gateway cache
/// unsynced forever, so the watch is only started when discovery finds them.
async fn discover_gateway_api(client: &Client) -> bool {
    let group = Gateway::group(&());
    match Discovery::new(client.clone())
        .filter(&[group.as_ref()])
        .run()
        .await
    {
        Ok(discovery) => {
            let resources: Vec<ApiResource> = discovery
                .groups()
                .flat_map(|api_group| api_group.recommended_resources())
                .map(|(resource, _caps)| resource)
                .collect();
            gateway_served(&resources)
        }
        Err(e) => {
            warn!(error = %e, group = %group, "Gateway API discovery failed");
            false
        }
    }
}

/// Run certshim against a cluster until `shutdown` completes.
///
/// # Errors
///
/// Returns an error if a source cache is dropped before it becomes ready.
pub async fn run<F>(client: Client, config: &ShimConfig, shutdown: F) -> Result<()>
where
    F: Future<Output = ()>,
{
    let namespace = config.namespace.as_deref();
    let queue: WorkQueue<ResourceKey> = WorkQueue::new(config.backoff());
    let mut watches: Vec<JoinHandle<()>> = Vec::new();

    let gateway_api = config.enable_gateway_api && discover_gateway_api(&client).await;
    if config.enable_gateway_api && !gateway_api {
        warn!("Gateway API is not served by this cluster, watching Ingresses only");
    }

    info!(
        namespace = namespace.unwrap_or("<all>"),
        gateway_api,
        "Starting certshim controller"
    );

    let (ingresses, ingress_writer) = reflector::store::<Ingress>();
    let ingress_stream = watcher(scoped_api::<Ingress>(&client, namespace), watcher::Config::default())
        .default_backoff()
        .reflect(ingress_writer)
        .touched_objects();
    watches.push(tokio::spawn(enqueue_touched(
        "Ingress",
        ingress_stream,
        queue.clone(),
        |ingress: &Ingress| Some(ResourceKey::for_ingress(ingress)),
    )));

    let gateways = if gateway_api {
        let (gateways, gateway_writer) = reflector::store::<Gateway>();
        let gateway_stream =
            watcher(scoped_api::<Gateway>(&client, namespace), watcher::Config::default())
                .default_backoff()
                .reflect(gateway_writer)
                .touched_objects();
        watches.push(tokio::spawn(enqueue_touched(
            "Gateway",
            gateway_stream,
            queue.clone(),
            |gateway: &Gateway| Some(ResourceKey::for_gateway(gateway)),
        )));
        Some(gateways)
    } else {
        None
    };

    let certificate_stream =
        watcher(scoped_api::<Certificate>(&client, namespace), watcher::Config::default())
            .default_backoff()
            .touched_objects();
    watches.push(tokio::spawn(enqueue_touched(
        "Certificate",
        certificate_stream,
        queue.clone(),
        ResourceKey::controller_of,
    )));

    tokio::pin!(shutdown);

    info!("Waiting for source caches to sync");
    let ready = async {
        ingresses.wait_until_ready().await?;
        if let Some(gateways) = &gateways {
            gateways.wait_until_ready().await?;
        }
        Ok::<(), reflector::store::WriterDropped>(())
    };
    tokio::select! {
        synced = ready => synced?,
        () = &mut shutdown => {
            info!("Shutdown requested before caches synced");
            watches.iter().for_each(JoinHandle::abort);
            return Ok(());
        }
    }
    info!("Source caches synced");

    let reconciler = Reconciler::new(
        ClusterSources::new(ingresses, gateways),
        KubeStore::new(client.clone()),
        KubeEventSink::new(client),
        config.reconciler_config(),
    );
    Controller::new(reconciler, queue, config.workers)
        .run(shutdown)
        .await;

    watches.iter().for_each(JoinHandle::abort);
    info!("certshim controller stopped");
    Ok(())
}

#[cfg(test)]
#[path = "controller_tests.rs"]
mod controller_tests;
