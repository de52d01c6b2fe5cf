//! `Core`: the dependency-injection root. One instance is built at
//! startup and cloned (cheaply, behind `Arc`) into every connection
//! handler, background task and HTTP route.

use crate::channel::{ClientSession, GatewaySession};
use crate::config::Config;
use crate::db::Database;
use crate::directory_sync::SyncRunner;
use crate::presence::Presence;
use crate::router::Router;
use dashmap::DashMap;
use meridian_proto::event::{ClientEvent, GatewayEvent};
use meridian_proto::{ClientId, GatewayId};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

const OUTBOX_CAPACITY: usize = 64;

/// Shared state handed to every client and gateway connection. Cloning
/// is an `Arc` bump, matching how the teacher threads its own
/// connection-wide state through handler tasks.
#[derive(Clone)]
pub struct Core {
    pub config: Arc<Config>,
    pub db: Database,
    pub router: Arc<Router>,
    pub presence: Arc<Presence>,
    pub directory_sync: Arc<SyncRunner>,
    clients: Arc<DashMap<ClientId, Arc<Mutex<ClientSession>>>>,
    gateways: Arc<DashMap<GatewayId, Arc<Mutex<GatewaySession>>>>,
    client_outbox: Arc<DashMap<ClientId, mpsc::Sender<ClientEvent>>>,
    gateway_outbox: Arc<DashMap<GatewayId, mpsc::Sender<GatewayEvent>>>,
}

impl Core {
    #[must_use]
    pub fn new(config: Config, db: Database) -> Self {
        let directory_sync = Arc::new(SyncRunner::new(db.clone()));
        Self {
            config: Arc::new(config),
            db,
            router: Arc::new(Router::new()),
            presence: Arc::new(Presence::new()),
            directory_sync,
            clients: Arc::new(DashMap::new()),
            gateways: Arc::new(DashMap::new()),
            client_outbox: Arc::new(DashMap::new()),
            gateway_outbox: Arc::new(DashMap::new()),
        }
    }

    /// Registers a client session and its outbound event channel,
    /// returning both so the connection task can select on socket reads
    /// alongside server-initiated pushes (e.g. a gateway's
    /// `flow_authorized` confirmation routed back to this client).
    pub fn register_client(&self, session: ClientSession) -> (Arc<Mutex<ClientSession>>, mpsc::Receiver<ClientEvent>) {
        let client_id = session.client_id;
        let handle = Arc::new(Mutex::new(session));
        self.clients.insert(client_id, handle.clone());
        let (tx, rx) = mpsc::channel(OUTBOX_CAPACITY);
        self.client_outbox.insert(client_id, tx);
        crate::metrics::CONNECTED_CLIENTS.set(self.clients.len() as i64);
        (handle, rx)
    }

    pub fn deregister_client(&self, client_id: ClientId) {
        self.clients.remove(&client_id);
        self.client_outbox.remove(&client_id);
        crate::metrics::CONNECTED_CLIENTS.set(self.clients.len() as i64);
    }

    pub fn client(&self, client_id: ClientId) -> Option<Arc<Mutex<ClientSession>>> {
        self.clients.get(&client_id).map(|entry| entry.clone())
    }

    /// Best-effort push to a connected client; silently dropped if the
    /// client disconnected or its outbox is full.
    pub fn push_to_client(&self, client_id: ClientId, event: ClientEvent) {
        if let Some(tx) = self.client_outbox.get(&client_id) {
            let _ = tx.try_send(event);
        }
    }

    pub fn register_gateway(&self, gateway_id: GatewayId) -> (Arc<Mutex<GatewaySession>>, mpsc::Receiver<GatewayEvent>) {
        let handle = Arc::new(Mutex::new(GatewaySession::new(gateway_id)));
        self.gateways.insert(gateway_id, handle.clone());
        let (tx, rx) = mpsc::channel(OUTBOX_CAPACITY);
        self.gateway_outbox.insert(gateway_id, tx);
        crate::metrics::CONNECTED_GATEWAYS.set(self.gateways.len() as i64);
        (handle, rx)
    }

    pub fn deregister_gateway(&self, gateway_id: GatewayId) {
        self.gateways.remove(&gateway_id);
        self.gateway_outbox.remove(&gateway_id);
        crate::metrics::CONNECTED_GATEWAYS.set(self.gateways.len() as i64);
    }

    pub fn gateway(&self, gateway_id: GatewayId) -> Option<Arc<Mutex<GatewaySession>>> {
        self.gateways.get(&gateway_id).map(|entry| entry.clone())
    }

    /// Best-effort push to a connected gateway.
    pub fn push_to_gateway(&self, gateway_id: GatewayId, event: GatewayEvent) {
        if let Some(tx) = self.gateway_outbox.get(&gateway_id) {
            let _ = tx.try_send(event);
        }
    }

    /// Active gateway-side authorization count across every connected
    /// gateway, for the `ACTIVE_GATEWAY_AUTHORIZATIONS` gauge.
    pub async fn total_gateway_authorizations(&self) -> i64 {
        let handles: Vec<_> = self.gateways.iter().map(|entry| entry.value().clone()).collect();
        let mut total = 0usize;
        for handle in handles {
            total += handle.lock().await.cache.len();
        }
        total as i64
    }
}
