//! [`BroadcastServer`] – WebSocket fan-out to the front-end roles.
//!
//! Two listeners on separate ports serve the two client roles:
//!
//! * **staff** – the operator console. Receives every game event and may
//!   send `start`, `circleClick` and `hardReset` commands, which are
//!   published on the control lane.
//! * **display** – passive screens. Receive every game event; anything they
//!   send is ignored.
//!
//! Every new connection is greeted with a `clientId` message and a replay
//! of the last known game state (round, mission, score, multiplier, time,
//! team, bonus flag) before live traffic starts, so a screen plugged in
//! mid-game converges immediately.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use futures_util::{SinkExt, StreamExt};
use strike_types::{ControlEvent, GameEvent, StrikeError};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, info, warn};

use crate::bus::EventBus;

/// Default port of the staff console WebSocket server.
pub const DEFAULT_STAFF_PORT: u16 = 8081;
/// Default port of the passive display WebSocket server.
pub const DEFAULT_DISPLAY_PORT: u16 = 8082;

// ────────────────────────────────────────────────────────────────────────────
// Client roles
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Staff,
    Display,
}

impl Role {
    fn prefix(self) -> &'static str {
        match self {
            Role::Staff => "staff",
            Role::Display => "display",
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Last-known-state snapshot
// ────────────────────────────────────────────────────────────────────────────

/// Cache of the most recent event of each state-bearing kind, replayed to
/// newly connected clients.
#[derive(Debug, Default, Clone)]
struct Snapshot {
    team: Option<GameEvent>,
    round: Option<GameEvent>,
    mission: Option<GameEvent>,
    score: Option<GameEvent>,
    multiplier: Option<GameEvent>,
    time: Option<GameEvent>,
    bonus: Option<GameEvent>,
}

impl Snapshot {
    fn absorb(&mut self, event: &GameEvent) {
        match event {
            GameEvent::TeamName { .. } => self.team = Some(event.clone()),
            GameEvent::RoundUpdate { .. } => self.round = Some(event.clone()),
            GameEvent::MissionUpdate { .. } => self.mission = Some(event.clone()),
            GameEvent::ScoreUpdate { .. } => self.score = Some(event.clone()),
            GameEvent::MultiplierUpdate { .. } => self.multiplier = Some(event.clone()),
            GameEvent::TimeUpdate { .. } => self.time = Some(event.clone()),
            GameEvent::BonusActive { .. } => self.bonus = Some(event.clone()),
            GameEvent::Reset | GameEvent::GameFinished => *self = Snapshot::default(),
            _ => {}
        }
    }

    /// Replay order mirrors the order a level start emits its snapshots.
    fn replay(&self) -> Vec<GameEvent> {
        [
            &self.team,
            &self.round,
            &self.mission,
            &self.score,
            &self.multiplier,
            &self.time,
            &self.bonus,
        ]
        .into_iter()
        .flatten()
        .cloned()
        .collect()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// BroadcastServer
// ────────────────────────────────────────────────────────────────────────────

/// The dual WebSocket fan-out server.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use strike_broadcast::{BroadcastServer, EventBus};
///
/// #[tokio::main]
/// async fn main() {
///     let bus = Arc::new(EventBus::default());
///     BroadcastServer::new(Arc::clone(&bus))
///         .run()
///         .await
///         .expect("broadcast server failed");
/// }
/// ```
pub struct BroadcastServer {
    bus: Arc<EventBus>,
    staff_port: u16,
    display_port: u16,
}

impl BroadcastServer {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self {
            bus,
            staff_port: DEFAULT_STAFF_PORT,
            display_port: DEFAULT_DISPLAY_PORT,
        }
    }

    /// Override the listening ports (builder-style).
    pub fn with_ports(mut self, staff_port: u16, display_port: u16) -> Self {
        self.staff_port = staff_port;
        self.display_port = display_port;
        self
    }

    /// Bind both listeners and serve until the process exits.
    pub async fn run(self) -> Result<(), StrikeError> {
        let snapshot = Arc::new(StdMutex::new(Snapshot::default()));

        // One task keeps the snapshot current for future connections.
        {
            let mut rx = self.bus.subscribe_game();
            let snapshot = Arc::clone(&snapshot);
            tokio::spawn(async move {
                loop {
                    match rx.recv().await {
                        Ok(event) => snapshot
                            .lock()
                            .expect("snapshot lock poisoned")
                            .absorb(&event),
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            warn!(lagged_by = n, "snapshot cache lagged");
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    }
                }
            });
        }

        let staff = self
            .listener(self.staff_port, Role::Staff, Arc::clone(&snapshot))
            .await?;
        let display = self
            .listener(self.display_port, Role::Display, snapshot)
            .await?;

        let (staff_result, display_result) = tokio::join!(staff, display);
        staff_result
            .and(display_result)
            .map_err(|e| StrikeError::Channel(format!("accept loop panicked: {e}")))
    }

    async fn listener(
        &self,
        port: u16,
        role: Role,
        snapshot: Arc<StdMutex<Snapshot>>,
    ) -> Result<tokio::task::JoinHandle<()>, StrikeError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| StrikeError::Channel(format!("bind error on {addr}: {e}")))?;
        info!(%addr, role = role.prefix(), "WebSocket server listening");

        let bus = Arc::clone(&self.bus);
        let counter = Arc::new(AtomicU64::new(1));
        Ok(tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, peer)) => {
                        let client_id = format!(
                            "{}-{}",
                            role.prefix(),
                            counter.fetch_add(1, Ordering::SeqCst)
                        );
                        let bus = Arc::clone(&bus);
                        let snapshot = Arc::clone(&snapshot);
                        tokio::spawn(async move {
                            if let Err(e) =
                                handle_client(stream, peer, role, client_id.clone(), bus, snapshot)
                                    .await
                            {
                                debug!(%client_id, error = %e, "client connection closed");
                            }
                        });
                    }
                    Err(e) => warn!(error = %e, "accept error"),
                }
            }
        }))
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Per-connection handler
// ────────────────────────────────────────────────────────────────────────────

async fn handle_client(
    stream: TcpStream,
    peer: SocketAddr,
    role: Role,
    client_id: String,
    bus: Arc<EventBus>,
    snapshot: Arc<StdMutex<Snapshot>>,
) -> Result<(), StrikeError> {
    let ws = accept_async(stream)
        .await
        .map_err(|e| StrikeError::Channel(format!("WS handshake from {peer}: {e}")))?;
    info!(%client_id, %peer, "client connected");

    let (mut tx, mut rx) = ws.split();
    let mut game_rx = bus.subscribe_game();

    // Greeting + last-known-state replay before any live traffic.
    let greeting = serde_json::json!({ "type": "clientId", "clientId": client_id });
    tx.send(Message::Text(greeting.to_string().into()))
        .await
        .map_err(|e| StrikeError::Channel(format!("greeting send: {e}")))?;

    let replay = snapshot.lock().expect("snapshot lock poisoned").replay();
    for event in replay {
        let json = serde_json::to_string(&event)
            .map_err(|e| StrikeError::Channel(format!("snapshot serialize: {e}")))?;
        if tx.send(Message::Text(json.into())).await.is_err() {
            return Ok(());
        }
    }

    loop {
        tokio::select! {
            // ── Downstream: game lane → client ─────────────────────────────
            result = game_rx.recv() => {
                match result {
                    Ok(event) => {
                        match serde_json::to_string(&event) {
                            Ok(json) => {
                                if tx.send(Message::Text(json.into())).await.is_err() {
                                    break;
                                }
                            }
                            Err(e) => warn!(%client_id, error = %e, "event serialize failed"),
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        warn!(%client_id, lagged_by = n, "client lagged, events dropped");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
            // ── Upstream: client → control lane (staff only) ───────────────
            msg = rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if role == Role::Staff {
                            handle_staff_message(text.as_str(), &bus);
                        } else {
                            debug!(%client_id, "ignoring message from display client");
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    _ => {}
                }
            }
        }
    }

    info!(%client_id, "client disconnected");
    Ok(())
}

// ────────────────────────────────────────────────────────────────────────────
// Staff command parsing
// ────────────────────────────────────────────────────────────────────────────

/// Parse a staff console message and publish the corresponding control
/// event. Unknown or malformed messages are logged and ignored.
pub(crate) fn handle_staff_message(text: &str, bus: &EventBus) {
    match serde_json::from_str::<ControlEvent>(text) {
        Ok(event @ (ControlEvent::Start { .. }
        | ControlEvent::CircleClick { .. }
        | ControlEvent::HardReset)) => {
            if let ControlEvent::Start { team_name } = &event {
                // The displays learn the team name the moment the operator
                // submits it, before the engine even reacts.
                let _ = bus.publish_game(GameEvent::TeamName {
                    name: team_name.clone(),
                });
            }
            let _ = bus.publish_control(event);
        }
        Ok(other) => {
            warn!(?other, "control event not accepted from staff console");
        }
        Err(e) => {
            warn!(error = %e, raw = text, "unparseable staff message ignored");
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn make_bus() -> Arc<EventBus> {
        Arc::new(EventBus::default())
    }

    // ── Staff message handling ────────────────────────────────────────────

    #[tokio::test]
    async fn staff_start_publishes_control_and_team_name() {
        let bus = make_bus();
        let mut control = bus.subscribe_control();
        let mut game = bus.subscribe_game();

        handle_staff_message(r#"{"type":"start","teamName":"Les Rouges"}"#, &bus);

        assert_eq!(
            control.recv().await.unwrap(),
            ControlEvent::Start {
                team_name: "Les Rouges".to_string()
            }
        );
        assert_eq!(
            game.recv().await.unwrap(),
            GameEvent::TeamName {
                name: "Les Rouges".to_string()
            }
        );
    }

    #[tokio::test]
    async fn staff_circle_click_publishes_control() {
        let bus = make_bus();
        let mut control = bus.subscribe_control();

        handle_staff_message(r#"{"type":"circleClick","circleId":7}"#, &bus);

        assert_eq!(
            control.recv().await.unwrap(),
            ControlEvent::CircleClick { circle_id: 7 }
        );
    }

    #[tokio::test]
    async fn staff_hard_reset_publishes_control() {
        let bus = make_bus();
        let mut control = bus.subscribe_control();

        handle_staff_message(r#"{"type":"hardReset"}"#, &bus);

        assert_eq!(control.recv().await.unwrap(), ControlEvent::HardReset);
    }

    #[tokio::test]
    async fn staff_cannot_inject_hardware_input_events() {
        let bus = make_bus();
        let mut control = bus.subscribe_control();

        handle_staff_message(r#"{"type":"inputEvent","code":"5","value":1}"#, &bus);

        assert!(control.try_recv().is_err());
    }

    #[tokio::test]
    async fn malformed_staff_message_is_ignored() {
        let bus = make_bus();
        let mut control = bus.subscribe_control();

        handle_staff_message("not json at all", &bus);
        handle_staff_message(r#"{"type":"unknownThing"}"#, &bus);

        assert!(control.try_recv().is_err());
    }

    // ── Snapshot replay ───────────────────────────────────────────────────

    #[test]
    fn snapshot_keeps_latest_of_each_kind() {
        let mut snapshot = Snapshot::default();
        snapshot.absorb(&GameEvent::ScoreUpdate { score: 100 });
        snapshot.absorb(&GameEvent::ScoreUpdate { score: 250 });
        snapshot.absorb(&GameEvent::MultiplierUpdate {
            multiplier: "x2".to_string(),
        });

        let replay = snapshot.replay();
        assert_eq!(replay.len(), 2);
        assert!(replay.contains(&GameEvent::ScoreUpdate { score: 250 }));
        assert!(!replay.contains(&GameEvent::ScoreUpdate { score: 100 }));
    }

    #[test]
    fn snapshot_replay_order_matches_level_start() {
        let mut snapshot = Snapshot::default();
        snapshot.absorb(&GameEvent::TimeUpdate {
            time_left: 25,
            time_string: "00:25".to_string(),
        });
        snapshot.absorb(&GameEvent::RoundUpdate {
            round: 1,
            level: 3,
            duration: 30,
            goal_score: 1400,
        });
        snapshot.absorb(&GameEvent::ScoreUpdate { score: 50 });

        let replay = snapshot.replay();
        assert!(matches!(replay[0], GameEvent::RoundUpdate { .. }));
        assert!(matches!(replay[1], GameEvent::ScoreUpdate { .. }));
        assert!(matches!(replay[2], GameEvent::TimeUpdate { .. }));
    }

    #[test]
    fn reset_clears_snapshot() {
        let mut snapshot = Snapshot::default();
        snapshot.absorb(&GameEvent::ScoreUpdate { score: 999 });
        snapshot.absorb(&GameEvent::Reset);
        assert!(snapshot.replay().is_empty());
    }

    #[test]
    fn led_control_is_not_cached() {
        let mut snapshot = Snapshot::default();
        snapshot.absorb(&GameEvent::LedControl {
            element_id: 1,
            color_code: "g".to_string(),
            color_value: "#27ae60".to_string(),
            timestamp: chrono::Utc::now(),
        });
        assert!(snapshot.replay().is_empty());
    }
}
