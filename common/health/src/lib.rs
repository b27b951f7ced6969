use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Serialize, Serializer};
use time::OffsetDateTime;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Liveness reporting for the long-running loops of the enrichment service.
///
/// The process runs an HTTP server next to one or more consumer loops, and it
/// can only be trusted to drain the queue while every loop keeps reporting.
///
/// Each loop registers itself once and then reports on every iteration:
///   - if any component reported unhealthy, the process is unhealthy
///   - if every component reported healthy within its deadline, the process is healthy
///   - if a component misses its deadline it is marked stalled and the check fails
///
/// Liveness and readiness are separate probes; use one registry per probe.
#[derive(Default, Debug, Serialize)]
pub struct HealthStatus {
    /// True when all registered components are healthy.
    pub healthy: bool,
    /// Current status of each registered component.
    pub components: HashMap<String, ComponentStatus>,
}

impl IntoResponse for HealthStatus {
    /// 200 when healthy, 500 otherwise, with the component breakdown as a JSON body.
    fn into_response(self) -> Response {
        let code = match self.healthy {
            true => StatusCode::OK,
            false => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (code, Json(self)).into_response()
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum ComponentStatus {
    /// Set on registration, before the first report.
    Starting,
    /// Reported healthy, must report again before the deadline.
    HealthyUntil(OffsetDateTime),
    /// Reported unhealthy.
    Unhealthy,
    /// The HealthyUntil deadline passed without a new report.
    Stalled,
}

impl fmt::Display for ComponentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComponentStatus::Starting => write!(f, "starting"),
            ComponentStatus::HealthyUntil(until) => write!(f, "healthy until {until}"),
            ComponentStatus::Unhealthy => write!(f, "unhealthy"),
            ComponentStatus::Stalled => write!(f, "stalled"),
        }
    }
}

impl Serialize for ComponentStatus {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

struct HealthMessage {
    component: String,
    status: ComponentStatus,
}

/// Handed to a single component so it can report its own status.
#[derive(Clone)]
pub struct HealthHandle {
    component: String,
    deadline: Duration,
    sender: mpsc::Sender<HealthMessage>,
}

impl HealthHandle {
    /// Report healthy until `now + deadline`. Must be called more often than the deadline.
    pub async fn report_healthy(&self) {
        self.report_status(ComponentStatus::HealthyUntil(
            OffsetDateTime::now_utc() + self.deadline,
        ))
        .await
    }

    /// Report an arbitrary status, returns once the message is queued.
    pub async fn report_status(&self, status: ComponentStatus) {
        let message = HealthMessage {
            component: self.component.clone(),
            status,
        };
        if let Err(err) = self.sender.send(message).await {
            warn!("failed to report health status: {}", err)
        }
    }
}

#[derive(Clone)]
pub struct HealthRegistry {
    name: String,
    components: Arc<RwLock<HashMap<String, ComponentStatus>>>,
    sender: mpsc::Sender<HealthMessage>,
}

impl HealthRegistry {
    pub fn new(name: &str) -> Self {
        let (tx, mut rx) = mpsc::channel::<HealthMessage>(16);
        let registry = Self {
            name: name.to_owned(),
            components: Default::default(),
            sender: tx,
        };

        let components = registry.components.clone();
        tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                if let Ok(mut map) = components.write() {
                    _ = map.insert(message.component, message.status);
                } else {
                    // Poisoned lock: probes will fail and the process gets restarted.
                    warn!("poisoned HealthRegistry lock")
                }
            }
        });

        registry
    }

    /// Register a component. The returned handle is moved into the component's loop.
    pub async fn register(&self, component: String, deadline: Duration) -> HealthHandle {
        let handle = HealthHandle {
            component,
            deadline,
            sender: self.sender.clone(),
        };
        handle.report_status(ComponentStatus::Starting).await;
        handle
    }

    /// Overall status computed from every registered component. Usable as an axum handler.
    pub fn get_status(&self) -> HealthStatus {
        let components = match self.components.read() {
            Ok(components) => components,
            Err(_) => {
                warn!("{} health check failed: poisoned HealthRegistry lock", self.name);
                return HealthStatus::default();
            }
        };

        let now = OffsetDateTime::now_utc();
        // Unhealthy until at least one component registers.
        let mut result = HealthStatus {
            healthy: !components.is_empty(),
            components: HashMap::with_capacity(components.len()),
        };

        for (name, status) in components.iter() {
            let status = match status {
                ComponentStatus::HealthyUntil(until) if *until > now => status.clone(),
                ComponentStatus::HealthyUntil(_) => ComponentStatus::Stalled,
                other => other.clone(),
            };
            if !matches!(status, ComponentStatus::HealthyUntil(_)) {
                result.healthy = false;
            }
            _ = result.components.insert(name.clone(), status);
        }

        match result.healthy {
            true => info!("{} health check ok", self.name),
            false => warn!("{} health check failed: {:?}", self.name, result.components),
        }
        result
    }
}
