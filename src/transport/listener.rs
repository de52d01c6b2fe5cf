//! TCP accept loops for the client and gateway WebSocket endpoints.
//!
//! Each accepted socket is driven by a loop that selects between reading
//! client/gateway requests off the wire and draining the session's
//! outbox (server-initiated pushes routed in from elsewhere in `Core`,
//! e.g. a gateway's `flow_authorized` confirmation reaching the client
//! that requested it).

use crate::channel::{ClientSession, GatewaySession};
use crate::state::Core;
use crate::transport::session::{SessionError, WsConnection};
use meridian_crdt::ServerId;
use meridian_proto::condition::ClientContext;
use meridian_proto::event::{ClientEvent, ClientRequest, GatewayEvent, GatewayRequest};
use meridian_proto::{ClientId, GatewayId};
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Mutex;

/// First message a client must send after the WebSocket upgrade, since
/// the event catalog itself starts with the server-sent `init` and has
/// no client-side hello.
#[derive(Debug, Deserialize)]
struct ClientJoin {
    account_id: meridian_proto::AccountId,
    account_slug: String,
    client_id: ClientId,
    actor_id: meridian_proto::ActorId,
    interface: meridian_proto::event::ClientInterface,
    group_ids: Vec<meridian_proto::GroupId>,
    remote_region: Option<String>,
    provider_id: Option<meridian_proto::ProviderId>,
    client_verified: bool,
    subject_expires_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Deserialize)]
struct GatewayHello {
    gateway_id: GatewayId,
}

pub async fn run_client_listener(addr: SocketAddr, core: Core) {
    run_listener(addr, core, "client", |socket, peer, core| Box::pin(handle_client(socket, peer, core))).await;
}

pub async fn run_gateway_listener(addr: SocketAddr, core: Core) {
    run_listener(addr, core, "gateway", |socket, _peer, core| Box::pin(handle_gateway(socket, core))).await;
}

async fn run_listener<F>(addr: SocketAddr, core: Core, name: &'static str, handler: F)
where
    F: Fn(tokio::net::TcpStream, SocketAddr, Core) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>> + Copy + Send + 'static,
{
    let listener = match TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(error) => {
            tracing::error!(%error, %addr, "failed to bind {name} listener");
            return;
        }
    };
    tracing::info!(%addr, "{name} listener up");

    loop {
        let (socket, peer) = match listener.accept().await {
            Ok(pair) => pair,
            Err(error) => {
                tracing::warn!(%error, "{name} accept failed");
                continue;
            }
        };
        let core = core.clone();
        tokio::spawn(async move {
            tracing::debug!(%peer, "{name} connection accepted");
            handler(socket, peer, core).await;
        });
    }
}

async fn handle_client(socket: tokio::net::TcpStream, peer: SocketAddr, core: Core) {
    let upgraded = match tokio_tungstenite::accept_async(socket).await {
        Ok(ws) => ws,
        Err(error) => {
            tracing::warn!(%error, "client websocket handshake failed");
            return;
        }
    };
    let mut conn = WsConnection::new(upgraded);

    let join: ClientJoin = match conn.recv().await {
        Ok(join) => join,
        Err(error) => {
            tracing::warn!(%error, "client join handshake failed");
            return;
        }
    };

    let identity = crate::cache::ClientIdentity {
        account_id: join.account_id,
        actor_id: join.actor_id,
        group_ids: join.group_ids,
        client_version: None,
    };
    let ctx = ClientContext {
        remote_ip: peer.ip(),
        remote_region: join.remote_region,
        provider_id: join.provider_id,
        client_verified: join.client_verified,
        now: chrono::Utc::now(),
    };
    let subject_expiry = join.subject_expires_at;
    let node = ServerId(core.config.server.node_id);
    let relays = match core.db.relays().available_for_account(join.account_id).await {
        Ok(relays) => relays,
        Err(error) => {
            tracing::warn!(%error, "failed to load relay candidates");
            return;
        }
    };

    // Subscribed before the session is registered so the router's
    // per-account topic exists by the time any concurrent change lands.
    let mut changes = core.router.subscribe_account(join.account_id);

    let (session, init_event) = match ClientSession::join(
        &core.db,
        &core.presence,
        node,
        join.client_id,
        join.account_id,
        join.account_slug,
        identity,
        None,
        &relays,
        join.interface,
        serde_json::json!({}),
        ctx,
        subject_expiry,
    )
    .await
    {
        Ok(pair) => pair,
        Err(error) => {
            tracing::warn!(%error, "client cache hydration failed");
            return;
        }
    };

    if conn.send(&init_event).await.is_err() {
        return;
    }

    let (handle, outbox) = core.register_client(session);
    client_loop(conn, core.clone(), handle, outbox, &mut changes).await;
    core.deregister_client(join.client_id);
    core.presence.clients.disconnect(node, &join.client_id);
}

async fn client_loop(
    mut conn: WsConnection,
    core: Core,
    handle: Arc<Mutex<ClientSession>>,
    mut outbox: tokio::sync::mpsc::Receiver<ClientEvent>,
    changes: &mut tokio::sync::broadcast::Receiver<crate::router::Change>,
) {
    loop {
        tokio::select! {
            pushed = outbox.recv() => {
                match pushed {
                    Some(event) => if conn.send(&event).await.is_err() { return },
                    None => return,
                }
            }
            change = changes.recv() => {
                let change = match change {
                    Ok(change) => change,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
                };
                let events = handle.lock().await.apply_change(&core.db, &change).await;
                for event in events {
                    if conn.send(&event).await.is_err() {
                        return;
                    }
                }
            }
            incoming = conn.recv::<ClientRequest>() => {
                let request = match incoming {
                    Ok(request) => request,
                    Err(SessionError::Closed) => return,
                    Err(error) => {
                        tracing::debug!(%error, "client connection read error");
                        return;
                    }
                };

                match request {
                    ClientRequest::ConnectToResource { resource_id } => {
                        let reply = connect_to_resource(&core, &handle, resource_id).await;
                        if conn.send(&reply).await.is_err() {
                            return;
                        }
                    }
                    ClientRequest::BroadcastIceCandidates { candidates, gateway_ids } => {
                        forward_ice_candidates_to_gateways(&core, &handle, candidates, gateway_ids, false).await;
                    }
                    ClientRequest::BroadcastInvalidatedIceCandidates { candidates, gateway_ids } => {
                        forward_ice_candidates_to_gateways(&core, &handle, candidates, gateway_ids, true).await;
                    }
                }
            }
        }
    }
}

/// Relay a client's ICE candidates to each gateway it named, one
/// `ClientEvent::BroadcastIceCandidates` per recipient.
async fn forward_ice_candidates_to_gateways(core: &Core, handle: &Arc<Mutex<ClientSession>>, candidates: Vec<String>, gateway_ids: Vec<GatewayId>, invalidated: bool) {
    let client_id = handle.lock().await.client_id;
    tracing::debug!(%client_id, count = candidates.len(), ?gateway_ids, invalidated, "ice candidate fan-out");
    for gateway_id in gateway_ids {
        let event = if invalidated {
            GatewayEvent::BroadcastInvalidatedIceCandidates { client_id, candidates: candidates.clone() }
        } else {
            GatewayEvent::BroadcastIceCandidates { client_id, candidates: candidates.clone() }
        };
        core.push_to_gateway(gateway_id, event);
    }
}

async fn connect_to_resource(core: &Core, handle: &Arc<Mutex<ClientSession>>, resource_id: meridian_proto::ResourceId) -> ClientEvent {
    let session = handle.lock().await;
    let ctx = session.ctx.clone();
    let subject_expiry = session.subject_expiry;

    match session.connect_to_resource(resource_id, &ctx, subject_expiry, "r".into(), core.config.security.ref_signing_key.as_bytes()) {
        Ok((gateway_ref, signed, ice_credentials, preshared_key)) => {
            let mut authorized_gateway_id = None;
            if let Some((gateway_id, resource)) = find_connected_gateway(core, resource_id).await {
                let resource_view = meridian_proto::resource::ResourceView::from(&resource).for_client_version(session.identity.client_version);
                let subject = meridian_proto::event::SubjectView { actor_id: meridian_proto::ActorId::new(), name: session.account_slug.clone(), email: None };
                let event = GatewaySession::build_authorize_flow_event(session.client_id, resource_view, subject, preshared_key.clone(), ice_credentials.clone(), subject_expiry, signed);
                core.push_to_gateway(gateway_id, event);
                authorized_gateway_id = Some(gateway_id);
            }

            ClientEvent::FlowAuthorized {
                resource_id: gateway_ref.resource_id,
                gateway_id: authorized_gateway_id.unwrap_or_else(GatewayId::new),
                preshared_key,
                ice_credentials,
                expires_at: subject_expiry,
            }
        }
        Err(err) => err.to_client_reply(resource_id),
    }
}

async fn find_connected_gateway(core: &Core, resource_id: meridian_proto::ResourceId) -> Option<(GatewayId, meridian_proto::resource::Resource)> {
    let resource = core.db.resources().find(resource_id).await.ok().flatten()?;
    let group_id = *resource.gateway_groups.first()?;
    let candidates = core.db.gateways().in_group(group_id).await.ok()?;
    let online = core.presence.gateways.all_connected_except(&[]);
    let gateway_id = candidates.into_iter().map(|row| GatewayId(row.id)).find(|id| online.contains(id))?;
    Some((gateway_id, resource))
}

async fn handle_gateway(socket: tokio::net::TcpStream, core: Core) {
    let upgraded = match tokio_tungstenite::accept_async(socket).await {
        Ok(ws) => ws,
        Err(error) => {
            tracing::warn!(%error, "gateway websocket handshake failed");
            return;
        }
    };
    let mut conn = WsConnection::new(upgraded);

    let hello: GatewayHello = match conn.recv().await {
        Ok(hello) => hello,
        Err(error) => {
            tracing::warn!(%error, "gateway hello handshake failed");
            return;
        }
    };

    let node = ServerId(core.config.server.node_id);
    core.presence.gateways.connect(node, hello.gateway_id, String::new());

    let mut changes = match core.db.gateways().find(hello.gateway_id).await {
        Ok(Some(row)) => Some(core.router.subscribe_account(meridian_proto::AccountId(row.account_id))),
        Ok(None) => {
            tracing::warn!(gateway_id = %hello.gateway_id, "unknown gateway hello");
            None
        }
        Err(error) => {
            tracing::warn!(%error, "failed to look up gateway account");
            None
        }
    };

    let (handle, outbox) = core.register_gateway(hello.gateway_id);

    gateway_loop(conn, core.clone(), handle, outbox, hello.gateway_id, &mut changes).await;

    core.deregister_gateway(hello.gateway_id);
    core.presence.gateways.disconnect(node, &hello.gateway_id);
}

/// Awaits the next change on an optional per-gateway-account subscription,
/// never resolving when there is none (the gateway hello referenced an
/// unknown gateway) so the `select!` arm simply stays pending forever.
async fn recv_optional(changes: &mut Option<tokio::sync::broadcast::Receiver<crate::router::Change>>) -> Option<crate::router::Change> {
    match changes {
        Some(rx) => loop {
            match rx.recv().await {
                Ok(change) => return Some(change),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Closed) => return None,
            }
        },
        None => std::future::pending().await,
    }
}

async fn gateway_loop(
    mut conn: WsConnection,
    core: Core,
    handle: Arc<Mutex<GatewaySession>>,
    mut outbox: tokio::sync::mpsc::Receiver<GatewayEvent>,
    gateway_id: GatewayId,
    changes: &mut Option<tokio::sync::broadcast::Receiver<crate::router::Change>>,
) {
    loop {
        tokio::select! {
            pushed = outbox.recv() => {
                match pushed {
                    Some(event) => if conn.send(&event).await.is_err() { return },
                    None => return,
                }
            }
            change = recv_optional(changes) => {
                let Some(change) = change else { continue };
                let events = handle.lock().await.apply_change(&core.db, &change).await;
                for event in events {
                    if conn.send(&event).await.is_err() {
                        return;
                    }
                }
            }
            incoming = conn.recv::<GatewayRequest>() => {
                let request = match incoming {
                    Ok(request) => request,
                    Err(SessionError::Closed) => return,
                    Err(error) => {
                        tracing::debug!(%error, "gateway connection read error");
                        return;
                    }
                };

                match request {
                    GatewayRequest::FlowAuthorized { reference } => {
                        let mut session = handle.lock().await;
                        let outcome = session.authorize_flow(
                            &reference,
                            core.config.security.ref_signing_key.as_bytes(),
                            meridian_proto::PolicyAuthorizationId::new(),
                            chrono::Utc::now() + chrono::Duration::hours(8),
                        );
                        if let Ok(decoded) = outcome {
                            core.push_to_client(decoded.channel_id, ClientEvent::FlowAuthorized {
                                resource_id: decoded.resource_id,
                                gateway_id,
                                preshared_key: decoded.preshared_key.clone(),
                                ice_credentials: meridian_proto::event::IceCredentials { username: decoded.ice_username.clone(), password: decoded.ice_password.clone() },
                                expires_at: chrono::Utc::now() + chrono::Duration::hours(8),
                            });
                        } else {
                            tracing::warn!(%gateway_id, "gateway confirmed an invalid flow ref");
                        }
                    }
                    GatewayRequest::FlowRejected { reference } => {
                        if let Ok(decoded) = crate::channel::refs::verify(&reference, core.config.security.ref_signing_key.as_bytes()) {
                            core.push_to_client(decoded.channel_id, ClientEvent::RejectAccess { resource_id: decoded.resource_id });
                        }
                    }
                    GatewayRequest::BroadcastIceCandidates { candidates, client_ids } => {
                        for client_id in client_ids {
                            core.push_to_client(client_id, ClientEvent::BroadcastIceCandidates { gateway_id, candidates: candidates.clone() });
                        }
                    }
                    GatewayRequest::BroadcastInvalidatedIceCandidates { candidates, client_ids } => {
                        for client_id in client_ids {
                            core.push_to_client(client_id, ClientEvent::BroadcastInvalidatedIceCandidates { gateway_id, candidates: candidates.clone() });
                        }
                    }
                }
            }
        }
    }
}
