//! Endpoint selection for the primary synthesis backend.
//!
//! Each call to [`EndpointRouter::select_endpoint`] walks the configured
//! endpoints round-robin, probing each one at most once, and hands back the
//! first that answers. When none answer it still returns the endpoint under
//! the cursor: the caller attempts synthesis anyway and relies on the
//! fallback provider if that fails too.

use crate::error::{ProbeError, RouterError};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default liveness probe timeout.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub address: String,
    pub consecutive_errors: u32,
}

impl Endpoint {
    fn new(address: String) -> Self {
        Self {
            address,
            consecutive_errors: 0,
        }
    }
}

/// Lightweight health check, distinct from a synthesis request.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn probe(&self, address: &str) -> Result<(), ProbeError>;
}

/// `GET {endpoint}/version`; healthy iff it answers 200 within the timeout.
pub struct HttpProbe {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpProbe {
    pub fn new(timeout: Duration) -> Self {
        Self::with_client(reqwest::Client::new(), timeout)
    }

    pub fn with_client(client: reqwest::Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }
}

#[async_trait]
impl HealthProbe for HttpProbe {
    async fn probe(&self, address: &str) -> Result<(), ProbeError> {
        let url = format!("{}/version", address.trim_end_matches('/'));
        let resp = self
            .client
            .get(&url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| ProbeError::Transport(e.to_string()))?;

        if resp.status() == reqwest::StatusCode::OK {
            Ok(())
        } else {
            Err(ProbeError::Status(resp.status().as_u16()))
        }
    }
}

struct RouterState {
    endpoints: Vec<Endpoint>,
    cursor: usize,
    last_healthy: Option<String>,
}

pub struct EndpointRouter {
    state: Mutex<RouterState>,
    probe: Box<dyn HealthProbe>,
}

impl EndpointRouter {
    pub fn new<P>(addresses: Vec<String>, probe: P) -> Result<Self, RouterError>
    where
        P: HealthProbe + 'static,
    {
        if addresses.is_empty() {
            return Err(RouterError::NoEndpoints);
        }

        let endpoints: Vec<Endpoint> = addresses.into_iter().map(Endpoint::new).collect();
        // The cursor is advanced before each probe, so starting on the last
        // slot makes the first call probe the first configured endpoint.
        let cursor = endpoints.len() - 1;

        Ok(Self {
            state: Mutex::new(RouterState {
                endpoints,
                cursor,
                last_healthy: None,
            }),
            probe: Box::new(probe),
        })
    }

    /// Router probing over HTTP with the given timeout.
    pub fn http(addresses: Vec<String>, probe_timeout: Duration) -> Result<Self, RouterError> {
        Self::new(addresses, HttpProbe::new(probe_timeout))
    }

    fn lock(&self) -> MutexGuard<'_, RouterState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn len(&self) -> usize {
        self.lock().endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().endpoints.is_empty()
    }

    pub fn snapshot(&self) -> Vec<Endpoint> {
        self.lock().endpoints.clone()
    }

    pub fn last_healthy(&self) -> Option<String> {
        self.lock().last_healthy.clone()
    }

    /// Pick an endpoint for the next synthesis request. Never fails.
    ///
    /// The state lock is only held between probes; other requests may move
    /// the cursor while this one is waiting on the network, so everything is
    /// re-read after each probe.
    pub async fn select_endpoint(&self) -> Endpoint {
        let total = self.len();
        let mut tried: HashSet<usize> = HashSet::with_capacity(total);

        while tried.len() < total {
            let (index, address) = {
                let mut state = self.lock();
                state.cursor = (state.cursor + 1) % state.endpoints.len();
                let index = state.cursor;
                (index, state.endpoints[index].address.clone())
            };

            if !tried.insert(index) {
                continue;
            }

            debug!(endpoint = %address, "Probing synthesis endpoint");
            match self.probe.probe(&address).await {
                Ok(()) => {
                    let mut state = self.lock();
                    state.endpoints[index].consecutive_errors = 0;
                    if state.last_healthy.as_deref() != Some(address.as_str()) {
                        info!(endpoint = %address, "Switching to synthesis endpoint");
                        state.last_healthy = Some(address);
                    }
                    return state.endpoints[index].clone();
                }
                Err(e) => {
                    let mut state = self.lock();
                    let endpoint = &mut state.endpoints[index];
                    endpoint.consecutive_errors = endpoint.consecutive_errors.saturating_add(1);
                    warn!(
                        endpoint = %address,
                        errors = endpoint.consecutive_errors,
                        "Endpoint probe failed: {}",
                        e
                    );
                }
            }
        }

        let state = self.lock();
        let fallback = state.endpoints[state.cursor].clone();
        warn!(endpoint = %fallback.address, "All endpoints failed probing, trying anyway");
        fallback
    }
}
