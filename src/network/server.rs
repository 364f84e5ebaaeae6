//! WebSocket Game Server
//!
//! Async WebSocket server in front of a single shared [`SyncSession`].
//! Connection tasks feed client messages into the session; a separate task
//! drives the fixed-rate tick loop.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, Mutex, RwLock};
use tokio::time::{interval, timeout};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, error, info, instrument, warn};

use crate::core::grid::Rotation;
use crate::game::resolver::MovementMode;
use crate::game::tick::SimConfig;
use crate::game::world::SimWorld;
use crate::network::protocol::{ClientMessage, ErrorCode, GameInput, ServerMessage};
use crate::network::session::{ObserverId, SessionConfig, SessionError, SyncSession};

/// Session type served over the network.
pub type SharedSession = Arc<Mutex<SyncSession<SimWorld>>>;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Connections silent for longer than this are closed.
    pub idle_timeout: Duration,
    /// Tick rate for the simulation (Hz).
    pub tick_rate: u32,
    /// Maximum joined observers.
    pub max_observers: usize,
    /// Per-connection outbound queue length.
    pub outbound_buffer: usize,
    /// Simulation settings.
    pub sim: SimConfig,
    /// Server version string.
    pub version: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            max_connections: 256,
            idle_timeout: Duration::from_secs(300),
            tick_rate: crate::TICK_RATE,
            max_observers: 64,
            outbound_buffer: 256,
            sim: SimConfig::default(),
            version: crate::VERSION.to_string(),
        }
    }
}

impl ServerConfig {
    /// Defaults overridden by `HOLDFAST_*` environment variables.
    pub fn from_env() -> Result<Self, GameServerError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, GameServerError> {
        let mut config = Self::default();

        if let Some(addr) = lookup("HOLDFAST_BIND_ADDR") {
            config.bind_addr = parse_var("HOLDFAST_BIND_ADDR", &addr)?;
        }
        if let Some(rate) = lookup("HOLDFAST_TICK_RATE") {
            config.tick_rate = parse_var("HOLDFAST_TICK_RATE", &rate)?;
            if config.tick_rate == 0 {
                return Err(GameServerError::Config("HOLDFAST_TICK_RATE must be positive".into()));
            }
        }
        if let Some(max) = lookup("HOLDFAST_MAX_OBSERVERS") {
            config.max_observers = parse_var("HOLDFAST_MAX_OBSERVERS", &max)?;
        }
        if let Some(diagonal) = lookup("HOLDFAST_DIAGONAL") {
            let diagonal: bool = parse_var("HOLDFAST_DIAGONAL", &diagonal)?;
            config.sim.default_mode = MovementMode::from_diagonal(diagonal);
        }
        if let Some(turns) = lookup("HOLDFAST_FRAME_TURNS") {
            let turns: i32 = parse_var("HOLDFAST_FRAME_TURNS", &turns)?;
            config.sim.frame_override = Some(Rotation::from_quarter_turns(turns));
        }

        Ok(config)
    }

    fn session_config(&self) -> SessionConfig {
        SessionConfig {
            max_observers: self.max_observers,
            tick_rate: self.tick_rate,
            server_version: self.version.clone(),
        }
    }
}

fn parse_var<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, GameServerError>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| GameServerError::Config(format!("{}={:?}: {}", key, value, e)))
}

/// Clients must share the server's major version.
pub fn version_compatible(client: &str, server: &str) -> bool {
    let major = |v: &str| v.split('.').next().map(str::to_string);
    major(client) == major(server)
}

/// Game server errors.
#[derive(Debug, thiserror::Error)]
pub enum GameServerError {
    /// Failed to bind to address.
    #[error("Failed to bind: {0}")]
    BindFailed(#[from] std::io::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Session error.
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    /// Bad configuration value.
    #[error("Configuration error: {0}")]
    Config(String),
}

/// The game server.
pub struct GameServer {
    /// Server configuration.
    config: ServerConfig,
    /// The shared session.
    session: SharedSession,
    /// Connected clients and their observer ids.
    connections: Arc<RwLock<BTreeMap<SocketAddr, ObserverId>>>,
    /// Shutdown signal.
    shutdown_tx: broadcast::Sender<()>,
}

impl GameServer {
    /// Create a new game server with an empty world.
    pub fn new(config: ServerConfig) -> Self {
        let world = SimWorld::with_range(config.sim.interaction_range);
        let session = SyncSession::new(world, config.session_config(), config.sim.clone());
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            config,
            session: Arc::new(Mutex::new(session)),
            connections: Arc::new(RwLock::new(BTreeMap::new())),
            shutdown_tx,
        }
    }

    /// The shared session, for populating the world and server-side actions.
    pub fn session(&self) -> SharedSession {
        self.session.clone()
    }

    /// Run the server until shutdown.
    #[instrument(skip(self), fields(addr = %self.config.bind_addr))]
    pub async fn run(&self) -> Result<(), GameServerError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        info!("Game server listening on {}", self.config.bind_addr);

        let tick_session = self.session.clone();
        let tick_rate = self.config.tick_rate;
        let tick_shutdown = self.shutdown_tx.subscribe();
        let tick_handle = tokio::spawn(async move {
            Self::run_tick_loop(tick_session, tick_rate, tick_shutdown).await;
        });

        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            if self.connections.read().await.len() >= self.config.max_connections {
                                warn!("Connection limit reached, rejecting {}", addr);
                                continue;
                            }
                            info!("New connection from {}", addr);
                            self.handle_connection(stream, addr);
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        let _ = tick_handle.await;
        Ok(())
    }

    /// Handle a new WebSocket connection.
    fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) {
        let session = self.session.clone();
        let connections = self.connections.clone();
        let config = self.config.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let ws_stream = match accept_async(stream).await {
                Ok(ws) => ws,
                Err(e) => {
                    error!("WebSocket handshake failed for {}: {}", addr, e);
                    return;
                }
            };

            let (mut ws_sender, mut ws_receiver) = ws_stream.split();
            let (msg_tx, mut msg_rx) = mpsc::channel::<ServerMessage>(config.outbound_buffer);
            let observer: ObserverId = *uuid::Uuid::new_v4().as_bytes();
            connections.write().await.insert(addr, observer);

            // Outbound pump; ends once every sender clone is gone
            let sender_task = tokio::spawn(async move {
                while let Some(msg) = msg_rx.recv().await {
                    let text = match msg.to_json() {
                        Ok(t) => t,
                        Err(e) => {
                            error!("Failed to serialize message: {}", e);
                            continue;
                        }
                    };
                    if ws_sender.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                let _ = ws_sender.close().await;
            });

            loop {
                tokio::select! {
                    next = timeout(config.idle_timeout, ws_receiver.next()) => {
                        let Ok(next) = next else {
                            info!("Client {} idle, closing", addr);
                            break;
                        };
                        let client_msg = match next {
                            Some(Ok(Message::Text(text))) => match ClientMessage::from_json(&text) {
                                Ok(m) => m,
                                Err(e) => {
                                    debug!("Invalid message from {}: {}", addr, e);
                                    let _ = msg_tx
                                        .send(ServerMessage::error(ErrorCode::InvalidMessage, "Invalid message format"))
                                        .await;
                                    continue;
                                }
                            },
                            Some(Ok(Message::Binary(data))) => match GameInput::from_bytes(&data) {
                                Ok(input) => ClientMessage::Input(input),
                                Err(e) => {
                                    debug!("Invalid binary input from {}: {}", addr, e);
                                    let _ = msg_tx
                                        .send(ServerMessage::error(ErrorCode::InvalidMessage, "Invalid binary input"))
                                        .await;
                                    continue;
                                }
                            },
                            Some(Ok(Message::Close(_))) | None => {
                                debug!("Client {} disconnected", addr);
                                break;
                            }
                            Some(Err(e)) => {
                                error!("WebSocket error for {}: {}", addr, e);
                                break;
                            }
                            Some(Ok(_)) => continue,
                        };

                        let leaving = matches!(client_msg, ClientMessage::Leave);
                        Self::handle_client_message(observer, client_msg, &session, &config, &msg_tx).await;
                        if leaving {
                            break;
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        let _ = msg_tx.send(ServerMessage::Shutdown {
                            reason: "Server shutting down".to_string(),
                        }).await;
                        break;
                    }
                }
            }

            // Cleanup: the session drops its sender clone on leave
            session.lock().await.leave(&observer);
            connections.write().await.remove(&addr);
            drop(msg_tx);
            if timeout(Duration::from_secs(1), sender_task).await.is_err() {
                debug!("Outbound pump for {} did not drain", addr);
            }

            info!("Client {} cleaned up", addr);
        });
    }

    /// Handle a client message.
    async fn handle_client_message(
        observer: ObserverId,
        msg: ClientMessage,
        session: &SharedSession,
        config: &ServerConfig,
        msg_tx: &mpsc::Sender<ServerMessage>,
    ) {
        let result = match msg {
            ClientMessage::Join(request) => {
                if !version_compatible(&request.client_version, &config.version) {
                    let message = format!(
                        "Client version {} incompatible with server {}",
                        request.client_version, config.version
                    );
                    let _ = msg_tx.send(ServerMessage::error(ErrorCode::VersionMismatch, message)).await;
                    return;
                }
                session.lock().await.join(observer, msg_tx.clone(), &request).map(|_| ())
            }
            other => session.lock().await.handle_message(&observer, other),
        };

        if let Err(e) = result {
            debug!("Rejected message from {}: {}", hex::encode(&observer[..4]), e);
            let _ = msg_tx.send(ServerMessage::error(e.code(), e.to_string())).await;
        }
    }

    /// Drive the simulation at a fixed rate.
    async fn run_tick_loop(session: SharedSession, tick_rate: u32, mut shutdown_rx: broadcast::Receiver<()>) {
        let tick_duration = Duration::from_micros(1_000_000 / tick_rate.max(1) as u64);
        let mut tick_interval = interval(tick_duration);
        tick_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = tick_interval.tick() => {
                    let result = session.lock().await.run_tick();
                    if !result.events.is_empty() {
                        debug!("Tick produced {} events", result.events.len());
                    }
                }
                _ = shutdown_rx.recv() => {
                    debug!("Tick loop stopping");
                    break;
                }
            }
        }
    }

    /// Shutdown the server.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Get active connection count.
    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Get joined observer count.
    pub async fn observer_count(&self) -> usize {
        self.session.lock().await.observer_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.tick_rate, crate::TICK_RATE);
        assert_eq!(config.max_observers, 64);
        assert_eq!(config.sim.default_mode, MovementMode::AxisLocked);
        assert_eq!(config.sim.frame_override, None);
    }

    #[test]
    fn test_config_from_lookup() {
        let config = ServerConfig::from_lookup(lookup(&[
            ("HOLDFAST_BIND_ADDR", "127.0.0.1:9000"),
            ("HOLDFAST_TICK_RATE", "30"),
            ("HOLDFAST_MAX_OBSERVERS", "8"),
            ("HOLDFAST_DIAGONAL", "true"),
            ("HOLDFAST_FRAME_TURNS", "-1"),
        ]))
        .unwrap();

        assert_eq!(config.bind_addr, "127.0.0.1:9000".parse().unwrap());
        assert_eq!(config.tick_rate, 30);
        assert_eq!(config.max_observers, 8);
        assert_eq!(config.sim.default_mode, MovementMode::Diagonal);
        assert_eq!(config.sim.frame_override, Some(Rotation::CW_90));
    }

    #[test]
    fn test_config_rejects_bad_values() {
        assert!(matches!(
            ServerConfig::from_lookup(lookup(&[("HOLDFAST_TICK_RATE", "fast")])),
            Err(GameServerError::Config(_))
        ));
        assert!(matches!(
            ServerConfig::from_lookup(lookup(&[("HOLDFAST_TICK_RATE", "0")])),
            Err(GameServerError::Config(_))
        ));
        assert!(matches!(
            ServerConfig::from_lookup(lookup(&[("HOLDFAST_DIAGONAL", "sometimes")])),
            Err(GameServerError::Config(_))
        ));
    }

    #[test]
    fn test_version_compatibility() {
        assert!(version_compatible("0.3.1", "0.1.0"));
        assert!(!version_compatible("1.0.0", "0.1.0"));
    }

    #[tokio::test]
    async fn test_server_creation() {
        let config = ServerConfig {
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            ..Default::default()
        };
        let server = GameServer::new(config);

        assert_eq!(server.connection_count().await, 0);
        assert_eq!(server.observer_count().await, 0);
    }

    #[tokio::test]
    async fn test_join_through_handler() {
        let server = GameServer::new(ServerConfig::default());
        let (id, net) = server.session().lock().await.spawn_networked().unwrap();
        server.session().lock().await.state_mut().world.add_body(id, crate::core::grid::GridVec::ZERO);

        let (tx, mut rx) = mpsc::channel(16);
        let join = ClientMessage::Join(crate::network::protocol::JoinRequest {
            entity: Some(net),
            client_version: crate::VERSION.to_string(),
        });
        GameServer::handle_client_message([1; 16], join, &server.session, &server.config, &tx).await;

        assert!(matches!(rx.try_recv(), Ok(ServerMessage::Welcome(_))));
        assert!(matches!(rx.try_recv(), Ok(ServerMessage::Snapshot(_))));
        assert_eq!(server.observer_count().await, 1);
    }

    #[tokio::test]
    async fn test_version_mismatch_rejected() {
        let server = GameServer::new(ServerConfig::default());
        let (tx, mut rx) = mpsc::channel(16);
        let join = ClientMessage::Join(crate::network::protocol::JoinRequest {
            entity: None,
            client_version: "99.0.0".to_string(),
        });
        GameServer::handle_client_message([1; 16], join, &server.session, &server.config, &tx).await;

        match rx.try_recv() {
            Ok(ServerMessage::Error(e)) => assert_eq!(e.code, ErrorCode::VersionMismatch),
            other => panic!("expected error, got {:?}", other),
        }
        assert_eq!(server.observer_count().await, 0);
    }

    #[tokio::test]
    async fn test_unjoined_message_gets_error() {
        let server = GameServer::new(ServerConfig::default());
        let (tx, mut rx) = mpsc::channel(16);
        GameServer::handle_client_message([1; 16], ClientMessage::SyncRequest, &server.session, &server.config, &tx)
            .await;

        match rx.try_recv() {
            Ok(ServerMessage::Error(e)) => assert_eq!(e.code, ErrorCode::NotJoined),
            other => panic!("expected error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_server_shutdown() {
        let config = ServerConfig {
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            ..Default::default()
        };
        let server = GameServer::new(config);
        server.shutdown();
        // Should not panic
    }
}
