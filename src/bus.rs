//! Outbound domain events over NATS.

use tracing::{debug, info, warn};

use crate::domain::events::DomainEvent;

const SUBJECT_PREFIX: &str = "ecommerce";

/// Publishes committed domain events. Without a client, events are only logged.
#[derive(Clone, Default)]
pub struct EventBus {
    nats: Option<async_nats::Client>,
}

impl EventBus {
    pub fn new(nats: Option<async_nats::Client>) -> Self { Self { nats } }

    pub fn disabled() -> Self { Self::default() }

    /// Connects when a URL is given. A failed connection leaves the bus disabled.
    pub async fn connect(url: Option<&str>) -> Self {
        let Some(url) = url else { return Self::disabled() };
        match async_nats::connect(url).await {
            Ok(client) => {
                info!(url, "connected to NATS");
                Self::new(Some(client))
            }
            Err(e) => {
                warn!(url, error = %e, "NATS unavailable, events will not be published");
                Self::disabled()
            }
        }
    }

    pub fn is_enabled(&self) -> bool { self.nats.is_some() }

    pub async fn publish(&self, events: Vec<DomainEvent>) {
        for event in events {
            let subject = subject_for(&event);
            let Some(client) = &self.nats else {
                debug!(subject = %subject, "event not published (no bus)");
                continue;
            };
            let payload = match serde_json::to_vec(&event) {
                Ok(p) => p,
                Err(e) => {
                    warn!(subject = %subject, error = %e, "failed to encode event");
                    continue;
                }
            };
            if let Err(e) = client.publish(subject.clone(), payload.into()).await {
                warn!(subject = %subject, error = %e, "failed to publish event");
            }
        }
    }
}

fn subject_for(event: &DomainEvent) -> String { format!("{SUBJECT_PREFIX}.{}", event.kind()) }
