//! Connection Hub
//!
//! One task owns the registry of live dashboard connections. Connections,
//! the bus relay and the health endpoint talk to it through a cloneable
//! [`Hub`] handle; nothing else touches the registry.
//!
//! Delivery to a connection is a non-blocking enqueue onto its bounded
//! outbound queue. A connection whose queue is full is dropped on the spot
//! so one slow client cannot stall the others. Dropping a connection fires
//! its close signal; the writer closes the socket without draining the
//! backlog.
//!
//! Payloads carry their audience in `fleet_id`. Fleet-owned events (risk
//! events, alerts, driver scores, or anything naming a vehicle) whose fleet
//! is missing go to unscoped connections only.

pub mod connection;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::bus::publisher::{MESSAGE_ALERT, MESSAGE_DRIVER_SCORE, MESSAGE_RISK_EVENT};
use crate::bus::{Channel, EventBus};
use crate::error::{AppError, AppResult};

/// Outbound queue capacity per connection
pub const OUTBOUND_QUEUE: usize = 256;

const COMMAND_BUFFER: usize = 1024;

/// Wait before resubscribing after the bus subscription fails or ends
const RESUBSCRIBE_BACKOFF: Duration = Duration::from_secs(1);

pub type ConnectionId = Uuid;

/// Optional filter recorded at connect time. Unset fields mean unscoped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionScope {
    pub fleet_id: Option<String>,
    /// fleet_manager, driver, ...
    pub user_type: Option<String>,
}

impl ConnectionScope {
    fn accepts(&self, route: &Route) -> bool {
        match (&self.fleet_id, route) {
            (None, _) => true,
            (Some(_), Route::Everyone) => true,
            (Some(scope), Route::Fleet(fleet)) => scope == fleet,
            (Some(_), Route::Unscoped) => false,
        }
    }
}

/// Who a payload may be delivered to, derived from its `fleet_id`
#[derive(Debug, Clone, PartialEq, Eq)]
enum Route {
    Everyone,
    Fleet(String),
    /// Unreadable payload, or a fleet-owned event without its fleet;
    /// unscoped connections only
    Unscoped,
}

impl Route {
    fn of(payload: &str) -> Self {
        let Ok(value) = serde_json::from_str::<serde_json::Value>(payload) else {
            return Route::Unscoped;
        };
        match value.get("fleet_id") {
            None | Some(serde_json::Value::Null) if is_fleet_owned(&value) => Route::Unscoped,
            None | Some(serde_json::Value::Null) => Route::Everyone,
            Some(serde_json::Value::String(fleet)) => Route::Fleet(fleet.clone()),
            Some(serde_json::Value::Number(fleet)) => Route::Fleet(fleet.to_string()),
            Some(_) => Route::Unscoped,
        }
    }
}

fn is_fleet_owned(value: &serde_json::Value) -> bool {
    let kind = value.get("type").and_then(serde_json::Value::as_str);
    let names_vehicle = value.get("vehicle_id").is_some_and(|v| !v.is_null());

    names_vehicle || matches!(kind, Some(MESSAGE_RISK_EVENT | MESSAGE_ALERT | MESSAGE_DRIVER_SCORE))
}

/// A registered connection's end of the hub
pub struct Registration {
    pub id: ConnectionId,
    pub outbound: mpsc::Receiver<Arc<str>>,
    /// Cancelled when the hub drops the connection
    pub closed: CancellationToken,
}

enum Command {
    Register {
        scope: ConnectionScope,
        reply: oneshot::Sender<Registration>,
    },
    Unregister {
        id: ConnectionId,
    },
    Broadcast {
        payload: String,
    },
    Count {
        reply: oneshot::Sender<usize>,
    },
}

/// Handle to the hub task
#[derive(Clone)]
pub struct Hub {
    tx: mpsc::Sender<Command>,
}

impl Hub {
    /// Start the hub task. It stops when `ctx` is cancelled or every handle is
    /// dropped; either way all outbound queues are closed.
    pub fn spawn(ctx: CancellationToken) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
        let handle = tokio::spawn(run(rx, ctx));
        (Self { tx }, handle)
    }

    pub async fn register(&self, scope: ConnectionScope) -> AppResult<Registration> {
        let (reply, response) = oneshot::channel();
        self.send(Command::Register { scope, reply }).await?;
        response.await.map_err(|_| AppError::HubUnavailable)
    }

    /// Idempotent; unknown ids are ignored
    pub async fn unregister(&self, id: ConnectionId) {
        let _ = self.send(Command::Unregister { id }).await;
    }

    pub async fn broadcast(&self, payload: String) -> AppResult<()> {
        self.send(Command::Broadcast { payload }).await
    }

    pub async fn connection_count(&self) -> AppResult<usize> {
        let (reply, response) = oneshot::channel();
        self.send(Command::Count { reply }).await?;
        response.await.map_err(|_| AppError::HubUnavailable)
    }

    async fn send(&self, command: Command) -> AppResult<()> {
        self.tx.send(command).await.map_err(|_| AppError::HubUnavailable)
    }
}

struct Client {
    scope: ConnectionScope,
    tx: mpsc::Sender<Arc<str>>,
    closed: CancellationToken,
}

#[derive(Default)]
struct Registry {
    clients: HashMap<ConnectionId, Client>,
}

impl Registry {
    fn register(&mut self, scope: ConnectionScope) -> Registration {
        let id = Uuid::new_v4();
        let (tx, outbound) = mpsc::channel(OUTBOUND_QUEUE);

        tracing::info!(
            connection_id = %id,
            fleet_id = scope.fleet_id.as_deref().unwrap_or("*"),
            user_type = scope.user_type.as_deref().unwrap_or("-"),
            "Client connected"
        );

        let closed = CancellationToken::new();
        self.clients.insert(id, Client { scope, tx, closed: closed.clone() });
        tracing::debug!(connected_clients = self.clients.len(), "Registry updated");

        Registration { id, outbound, closed }
    }

    fn unregister(&mut self, id: ConnectionId) {
        // Dropping the sender closes the connection's queue
        if let Some(client) = self.clients.remove(&id) {
            client.closed.cancel();
            tracing::info!(connection_id = %id, connected_clients = self.clients.len(), "Client disconnected");
        }
    }

    fn clear(&mut self) {
        for (_, client) in self.clients.drain() {
            client.closed.cancel();
        }
    }

    fn broadcast(&mut self, payload: String) {
        let route = Route::of(&payload);
        if route == Route::Unscoped {
            tracing::warn!("Payload has no usable fleet_id, delivering to unscoped clients only");
        }

        let payload: Arc<str> = Arc::from(payload);
        let mut dead = Vec::new();

        for (id, client) in &self.clients {
            if !client.scope.accepts(&route) {
                continue;
            }
            match client.tx.try_send(payload.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::warn!(connection_id = %id, "Outbound queue full, dropping client");
                    dead.push(*id);
                }
                Err(mpsc::error::TrySendError::Closed(_)) => dead.push(*id),
            }
        }

        for id in dead {
            self.unregister(id);
        }
    }
}

async fn run(mut rx: mpsc::Receiver<Command>, ctx: CancellationToken) {
    let mut registry = Registry::default();

    loop {
        let command = tokio::select! {
            _ = ctx.cancelled() => {
                tracing::info!(connected_clients = registry.clients.len(), "Received shutdown signal, closing client connections");
                break;
            }
            command = rx.recv() => match command {
                Some(command) => command,
                None => break,
            },
        };

        match command {
            Command::Register { scope, reply } => {
                let registration = registry.register(scope);
                let id = registration.id;
                if reply.send(registration).is_err() {
                    registry.unregister(id);
                }
            }
            Command::Unregister { id } => registry.unregister(id),
            Command::Broadcast { payload } => registry.broadcast(payload),
            Command::Count { reply } => {
                let _ = reply.send(registry.clients.len());
            }
        }
    }

    registry.clear();
}

/// Forward everything published on the bus to the hub. A failed or ended
/// subscription is retried after a short backoff; envelopes published in the
/// gap are lost.
pub fn spawn_relay(bus: Arc<dyn EventBus>, hub: Hub, ctx: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let mut subscription = tokio::select! {
                _ = ctx.cancelled() => return,
                result = bus.subscribe(&Channel::ALL) => match result {
                    Ok(subscription) => subscription,
                    Err(e) => {
                        tracing::error!(error = %e, "Bus subscription failed, retrying");
                        if backoff(&ctx).await {
                            return;
                        }
                        continue;
                    }
                },
            };

            tracing::info!("Relaying bus events to connected clients");

            loop {
                let envelope = tokio::select! {
                    _ = ctx.cancelled() => return,
                    envelope = subscription.next() => envelope,
                };

                let Some(envelope) = envelope else {
                    tracing::warn!("Bus subscription ended, resubscribing");
                    break;
                };

                tracing::debug!(
                    channel = %envelope.channel,
                    lag_ms = (chrono::Utc::now() - envelope.published_at).num_milliseconds(),
                    "Relaying event"
                );
                if hub.broadcast(envelope.payload).await.is_err() {
                    tracing::info!("Hub stopped, relay exiting");
                    return;
                }
            }

            if backoff(&ctx).await {
                return;
            }
        }
    })
}

/// Returns true when cancelled during the wait
async fn backoff(ctx: &CancellationToken) -> bool {
    tokio::select! {
        _ = ctx.cancelled() => true,
        _ = tokio::time::sleep(RESUBSCRIBE_BACKOFF) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{EventPublisher, MemoryBus};
    use crate::models::{FindingStatus, RiskFinding, RiskKind, Severity};

    fn scoped(fleet: &str) -> ConnectionScope {
        ConnectionScope {
            fleet_id: Some(fleet.to_string()),
            user_type: Some("fleet_manager".to_string()),
        }
    }

    fn drain(registration: &mut Registration) -> Vec<String> {
        let mut out = Vec::new();
        while let Ok(payload) = registration.outbound.try_recv() {
            out.push(payload.to_string());
        }
        out
    }

    #[test]
    fn test_route_from_payload() {
        assert_eq!(Route::of(r#"{"type":"alert","fleet_id":"3"}"#), Route::Fleet("3".to_string()));
        assert_eq!(Route::of(r#"{"type":"alert","fleet_id":3}"#), Route::Fleet("3".to_string()));
        assert_eq!(Route::of(r#"{"type":"notice"}"#), Route::Everyone);
        assert_eq!(Route::of(r#"{"fleet_id":null}"#), Route::Everyone);
        assert_eq!(Route::of(r#"{"type":"notice","vehicle_id":null}"#), Route::Everyone);
        assert_eq!(Route::of("not json"), Route::Unscoped);
        assert_eq!(Route::of(r#"{"fleet_id":[1]}"#), Route::Unscoped);
    }

    #[tokio::test]
    async fn test_fleet_scoped_delivery() {
        let (hub, _task) = Hub::spawn(CancellationToken::new());
        let mut admin = hub.register(ConnectionScope::default()).await.unwrap();
        let mut fleet3 = hub.register(scoped("3")).await.unwrap();
        let mut fleet4 = hub.register(scoped("4")).await.unwrap();

        hub.broadcast(r#"{"type":"alert","fleet_id":"3"}"#.to_string()).await.unwrap();
        hub.broadcast(r#"{"type":"notice"}"#.to_string()).await.unwrap();
        hub.broadcast("garbage".to_string()).await.unwrap();
        assert_eq!(hub.connection_count().await.unwrap(), 3);

        assert_eq!(drain(&mut admin).len(), 3);
        assert_eq!(
            drain(&mut fleet3),
            vec![r#"{"type":"alert","fleet_id":"3"}"#, r#"{"type":"notice"}"#]
        );
        assert_eq!(drain(&mut fleet4), vec![r#"{"type":"notice"}"#]);
    }

    #[test]
    fn test_fleet_owned_events_without_fleet_are_unscoped() {
        assert_eq!(Route::of(r#"{"type":"alert"}"#), Route::Unscoped);
        assert_eq!(Route::of(r#"{"type":"risk_event","vehicle_id":"404"}"#), Route::Unscoped);
        assert_eq!(Route::of(r#"{"type":"driver_score","fleet_id":null}"#), Route::Unscoped);
        assert_eq!(Route::of(r#"{"type":"notice","vehicle_id":"12"}"#), Route::Unscoped);
    }

    #[tokio::test]
    async fn test_unattributed_risk_event_reaches_unscoped_clients_only() {
        let ctx = CancellationToken::new();
        let bus = Arc::new(MemoryBus::new(16));
        let (hub, _task) = Hub::spawn(ctx.clone());
        let mut admin = hub.register(ConnectionScope::default()).await.unwrap();
        let mut fleet3 = hub.register(scoped("3")).await.unwrap();
        let relay = spawn_relay(bus.clone(), hub.clone(), ctx.clone());

        while bus.subscriber_count() == 0 {
            tokio::task::yield_now().await;
        }

        let finding = RiskFinding {
            id: 1,
            vehicle_id: 404,
            driver_id: None,
            kind: RiskKind::Speeding,
            severity: Severity::Critical,
            risk_score: 90.0,
            timestamp: chrono::Utc::now(),
            latitude: None,
            longitude: None,
            description: "Vehicle exceeded speed limit: 130.0 mph".to_string(),
            details: serde_json::Value::Null,
            status: FindingStatus::Open,
            created_at: chrono::Utc::now(),
        };
        let publisher = EventPublisher::new(bus.clone());
        publisher.publish_risk_finding(&finding, None).await.unwrap();
        bus.publish(Channel::Alerts, r#"{"type":"alert","fleet_id":"3"}"#.to_string())
            .await
            .unwrap();

        let first = admin.outbound.recv().await.unwrap();
        assert!(first.contains(r#""vehicle_id":"404""#));
        let next = fleet3.outbound.recv().await.unwrap();
        assert!(next.contains(r#""fleet_id":"3""#));
        assert!(fleet3.outbound.try_recv().is_err());

        ctx.cancel();
        relay.await.unwrap();
    }

    #[tokio::test]
    async fn test_full_queue_disconnects_slow_client() {
        let (hub, _task) = Hub::spawn(CancellationToken::new());
        let mut slow = hub.register(ConnectionScope::default()).await.unwrap();
        let mut fast = hub.register(ConnectionScope::default()).await.unwrap();

        for i in 0..OUTBOUND_QUEUE {
            hub.broadcast(format!(r#"{{"seq":{}}}"#, i)).await.unwrap();
        }
        // Exactly full is still connected
        assert_eq!(hub.connection_count().await.unwrap(), 2);
        assert_eq!(drain(&mut fast).len(), OUTBOUND_QUEUE);

        hub.broadcast(r#"{"seq":"overflow"}"#.to_string()).await.unwrap();

        assert_eq!(hub.connection_count().await.unwrap(), 1);
        assert_eq!(drain(&mut fast), vec![r#"{"seq":"overflow"}"#]);

        // The writer is told to close now rather than after the backlog
        assert!(slow.closed.is_cancelled());
        assert!(!fast.closed.is_cancelled());
        assert_eq!(drain(&mut slow).len(), OUTBOUND_QUEUE);
        assert!(slow.outbound.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_unregister_is_idempotent() {
        let (hub, _task) = Hub::spawn(CancellationToken::new());
        let mut registration = hub.register(ConnectionScope::default()).await.unwrap();

        hub.unregister(registration.id).await;
        hub.unregister(registration.id).await;
        hub.unregister(Uuid::new_v4()).await;

        assert_eq!(hub.connection_count().await.unwrap(), 0);
        assert!(registration.closed.is_cancelled());
        assert!(registration.outbound.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_dropped_receiver_is_pruned_on_broadcast() {
        let (hub, _task) = Hub::spawn(CancellationToken::new());
        let registration = hub.register(ConnectionScope::default()).await.unwrap();
        drop(registration);

        hub.broadcast("{}".to_string()).await.unwrap();

        assert_eq!(hub.connection_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_closes_queues() {
        let ctx = CancellationToken::new();
        let (hub, task) = Hub::spawn(ctx.clone());
        let mut registration = hub.register(ConnectionScope::default()).await.unwrap();

        ctx.cancel();
        task.await.unwrap();

        assert!(registration.closed.is_cancelled());
        assert!(registration.outbound.recv().await.is_none());
        assert!(matches!(
            hub.register(ConnectionScope::default()).await,
            Err(AppError::HubUnavailable)
        ));
    }

    #[tokio::test]
    async fn test_relay_forwards_bus_events() {
        let ctx = CancellationToken::new();
        let bus = Arc::new(MemoryBus::new(16));
        let (hub, _task) = Hub::spawn(ctx.clone());
        let mut registration = hub.register(scoped("3")).await.unwrap();
        let relay = spawn_relay(bus.clone(), hub.clone(), ctx.clone());

        while bus.subscriber_count() == 0 {
            tokio::task::yield_now().await;
        }

        bus.publish(Channel::Alerts, r#"{"type":"alert","fleet_id":"3"}"#.to_string())
            .await
            .unwrap();
        bus.publish(Channel::RiskEvents, r#"{"type":"risk_event","fleet_id":"9"}"#.to_string())
            .await
            .unwrap();
        bus.publish(Channel::DriverUpdates, r#"{"type":"driver_score","fleet_id":"3"}"#.to_string())
            .await
            .unwrap();

        let first = registration.outbound.recv().await.unwrap();
        let second = registration.outbound.recv().await.unwrap();
        assert!(first.contains(r#""type":"alert""#));
        assert!(second.contains(r#""type":"driver_score""#));

        ctx.cancel();
        relay.await.unwrap();
    }
}
