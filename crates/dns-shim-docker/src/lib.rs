// # Docker Workload Inventory
//
// This crate implements `WorkloadInventory` over the Docker Engine API.
//
// ## Architectural Constraints
//
// - Containers are the workloads; the container id is the workload id
// - Only running containers are ever reported
// - No reconnect loop here: a broken event stream yields an `Err` item and
//   ends, and the scheduler re-subscribes after its backoff
//
// ## Connection
//
// - `unix:///path/to/docker.sock`: Unix socket
// - `tcp://host:port` or `http://host:port`: plain HTTP
// - unset: `DOCKER_HOST` or the platform default socket

use async_trait::async_trait;
use bollard::container::{InspectContainerOptions, ListContainersOptions};
use bollard::models::{ContainerInspectResponse, ContainerSummary, EventMessage};
use bollard::system::EventsOptions;
use bollard::{API_DEFAULT_VERSION, Docker};
use dns_shim_core::traits::{
    Workload, WorkloadAction, WorkloadEvent, WorkloadEventStream, WorkloadInventory,
};
use dns_shim_core::{Error, Result};
use futures_util::future;
use futures_util::stream::StreamExt;
use std::collections::HashMap;
use std::fmt;

/// Request timeout for the Docker client (in seconds)
const DOCKER_TIMEOUT_SECS: u64 = 120;

/// Docker-backed workload inventory
#[derive(Clone)]
pub struct DockerInventory {
    docker: Docker,
}

impl fmt::Debug for DockerInventory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DockerInventory").finish_non_exhaustive()
    }
}

impl DockerInventory {
    /// Connect to the Docker daemon
    ///
    /// The connection is lazy; an unreachable daemon surfaces on the
    /// first request.
    pub fn connect(docker_url: Option<&str>) -> Result<Self> {
        let docker = match docker_url {
            None => Docker::connect_with_local_defaults(),
            Some(url) if url.starts_with("unix://") => {
                Docker::connect_with_unix(url, DOCKER_TIMEOUT_SECS, API_DEFAULT_VERSION)
            }
            Some(url) if url.starts_with("tcp://") || url.starts_with("http://") => {
                Docker::connect_with_http(url, DOCKER_TIMEOUT_SECS, API_DEFAULT_VERSION)
            }
            Some(url) => {
                return Err(Error::config(format!(
                    "Unsupported Docker URL scheme: {} (use unix://, tcp:// or http://)",
                    url
                )));
            }
        }
        .map_err(|e| Error::inventory(format!("Failed to connect to Docker: {}", e)))?;

        Ok(Self { docker })
    }

    /// Wrap an existing client
    pub fn from_client(docker: Docker) -> Self {
        Self { docker }
    }
}

#[async_trait]
impl WorkloadInventory for DockerInventory {
    async fn list_running(&self) -> Result<Vec<Workload>> {
        let opts = ListContainersOptions::<String> {
            all: false,
            ..Default::default()
        };
        let containers = self
            .docker
            .list_containers(Some(opts))
            .await
            .map_err(|e| Error::inventory(format!("Failed to list containers: {}", e)))?;

        let workloads: Vec<Workload> = containers.into_iter().filter_map(from_summary).collect();
        tracing::debug!("Running containers: {}", workloads.len());
        Ok(workloads)
    }

    async fn inspect(&self, workload_id: &str) -> Result<Option<Workload>> {
        match self
            .docker
            .inspect_container(workload_id, None::<InspectContainerOptions>)
            .await
        {
            Ok(detail) => Ok(from_inspect(workload_id, detail)),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => {
                tracing::debug!("Container {} no longer exists", workload_id);
                Ok(None)
            }
            Err(e) => Err(Error::inventory(format!(
                "Failed to inspect container {}: {}",
                workload_id, e
            ))),
        }
    }

    fn subscribe(&self, actions: &[WorkloadAction]) -> WorkloadEventStream {
        let allowed: Vec<WorkloadAction> = actions.to_vec();

        let mut filters: HashMap<String, Vec<String>> = HashMap::new();
        filters.insert("type".to_string(), vec!["container".to_string()]);
        filters.insert(
            "event".to_string(),
            allowed.iter().map(|a| a.as_str().to_string()).collect(),
        );
        let opts = EventsOptions::<String> {
            filters,
            ..Default::default()
        };

        tracing::debug!("Subscribing to Docker events: {:?}", allowed);

        let stream = self.docker.events(Some(opts)).filter_map(move |message| {
            let item = match message {
                Ok(message) => to_workload_event(message)
                    .filter(|event| allowed.contains(&event.action))
                    .map(Ok),
                Err(e) => Some(Err(Error::inventory(format!(
                    "Docker event stream failed: {}",
                    e
                )))),
            };
            future::ready(item)
        });

        Box::pin(stream)
    }
}

fn container_name(names: Option<&Vec<String>>) -> Option<String> {
    names
        .and_then(|n| n.first())
        .map(|n| n.trim_start_matches('/').to_string())
}

/// Build a workload from a list entry; entries without an id are skipped
fn from_summary(summary: ContainerSummary) -> Option<Workload> {
    let id = summary.id.filter(|id| !id.is_empty())?;
    let name = container_name(summary.names.as_ref()).unwrap_or_else(|| id.clone());
    Some(Workload::new(id, name, summary.labels.unwrap_or_default()))
}

/// Build a workload from an inspection; `None` unless it is running
fn from_inspect(requested_id: &str, detail: ContainerInspectResponse) -> Option<Workload> {
    let running = detail
        .state
        .as_ref()
        .and_then(|s| s.running)
        .unwrap_or(false);
    if !running {
        return None;
    }

    let id = detail.id.unwrap_or_else(|| requested_id.to_string());
    let name = detail
        .name
        .map(|n| n.trim_start_matches('/').to_string())
        .unwrap_or_else(|| id.clone());
    let labels = detail
        .config
        .and_then(|c| c.labels)
        .unwrap_or_default();

    Some(Workload::new(id, name, labels))
}

/// Map a Docker event; actions we do not know are dropped
fn to_workload_event(message: EventMessage) -> Option<WorkloadEvent> {
    let action: WorkloadAction = message.action?.parse().ok()?;
    let id = message.actor?.id.filter(|id| !id.is_empty())?;
    Some(WorkloadEvent::new(id, action))
}
