use super::server::GameServer;
use super::types::{GameEvent, Outbound, Seat};
use crate::domain::{Message, PlayerId};
use crate::domain::world::WorldModel;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{Notify, broadcast, mpsc};
use tracing::{debug, info, warn};

const LOG_THROTTLE: Duration = Duration::from_secs(2);

/// Per-connection queues for targeted messages, keyed by player. Each entry remembers the
/// generation of the seat it was registered for.
#[derive(Default)]
struct Outboxes {
    senders: HashMap<PlayerId, (u64, mpsc::Sender<Message>)>,
    next_generation: u64,
    last_full_log: Option<Instant>,
}

impl Outboxes {
    fn register(&mut self, player_id: PlayerId, outbox: mpsc::Sender<Message>) -> Seat {
        self.next_generation += 1;
        let seat = Seat {
            player_id,
            generation: self.next_generation,
        };
        self.senders.insert(player_id, (seat.generation, outbox));
        seat
    }

    /// True while `seat` is the connection holding its player id.
    fn holds(&self, seat: Seat) -> bool {
        self.senders
            .get(&seat.player_id)
            .is_some_and(|(generation, _)| *generation == seat.generation)
    }

    fn deliver(&mut self, player_id: PlayerId, msg: Message) {
        let Some((_, tx)) = self.senders.get(&player_id) else {
            return;
        };
        match tx.try_send(msg) {
            Ok(()) => {}
            Err(TrySendError::Full(msg)) => {
                // Resyncs are retried by the world, so dropping here only delays recovery.
                if self.last_full_log.is_none_or(|t| t.elapsed() >= LOG_THROTTLE) {
                    self.last_full_log = Some(Instant::now());
                    warn!(player_id, tag = %msg.tag(), "player outbox full; dropping message");
                }
            }
            // The entry stays until the connection's Leave arrives.
            Err(TrySendError::Closed(_)) => debug!(player_id, "player outbox closed"),
        }
    }

    /// Drops the outboxes of players the server removed on its own, which closes their
    /// connections.
    fn release_departed(&mut self, server: &GameServer) {
        self.senders.retain(|&player_id, _| {
            let present = server.world().get_player(player_id).is_some();
            if !present {
                info!(player_id, "releasing connection of removed player");
            }
            present
        });
    }
}

fn dispatch(
    outbound: Vec<Outbound>,
    commands_tx: &broadcast::Sender<Message>,
    outboxes: &mut Outboxes,
) {
    for out in outbound {
        match out {
            // No subscribers just means no connected clients.
            Outbound::Broadcast(msg) => {
                let _ = commands_tx.send(msg);
            }
            Outbound::ToPlayer(player_id, msg) => outboxes.deliver(player_id, msg),
        }
    }
}

fn handle_event(
    server: &mut GameServer,
    event: GameEvent,
    outboxes: &mut Outboxes,
) -> Vec<Outbound> {
    match event {
        GameEvent::Join {
            nick,
            outbox,
            assigned,
        } => match server.join(&nick) {
            Some((player_id, outbound)) => {
                let seat = outboxes.register(player_id, outbox);
                if assigned.send(Some(seat)).is_err() {
                    // The connection went away while waiting; undo the join.
                    outboxes.senders.remove(&player_id);
                    let mut undo = outbound;
                    undo.retain(|o| matches!(o, Outbound::Broadcast(_)));
                    undo.extend(server.leave(player_id));
                    return undo;
                }
                outbound
            }
            None => {
                warn!(%nick, "lobby full; join refused");
                let _ = assigned.send(None);
                Vec::new()
            }
        },
        GameEvent::Leave { seat } if outboxes.holds(seat) => {
            outboxes.senders.remove(&seat.player_id);
            server.leave(seat.player_id)
        }
        GameEvent::Message { seat, message } if outboxes.holds(seat) => {
            server.handle_message(seat.player_id, &message)
        }
        GameEvent::ResyncRequested { seat } if outboxes.holds(seat) => {
            server.resync_requested(seat.player_id)
        }
        GameEvent::Leave { seat }
        | GameEvent::Message { seat, .. }
        | GameEvent::ResyncRequested { seat } => {
            // The player was removed and its id may already belong to someone else.
            debug!(
                player_id = seat.player_id,
                generation = seat.generation,
                "event from a released seat ignored"
            );
            Vec::new()
        }
    }
}

pub async fn world_task(
    mut server: GameServer,
    mut input_rx: mpsc::Receiver<GameEvent>,
    commands_tx: broadcast::Sender<Message>,
    tick_interval: Duration,
    start_delay: Duration,
    shutdown: Arc<Notify>,
) {
    let mut outboxes = Outboxes::default();
    let mut elapsed = Duration::ZERO;

    // Drive the fixed-step game loop at the configured tick rate.
    let mut interval = tokio::time::interval(tick_interval);

    loop {
        tokio::select! {
            _ = shutdown.notified() => {
                // Exit cleanly when the lobby is removed.
                break;
            }
            _ = interval.tick() => {}
        }

        while let Ok(ev) = input_rx.try_recv() {
            let outbound = handle_event(&mut server, ev, &mut outboxes);
            dispatch(outbound, &commands_tx, &mut outboxes);
        }

        if !server.world().game_started() {
            elapsed += tick_interval;
            if elapsed >= start_delay {
                info!("game started");
                server.start_game();
            }
        }

        let outbound = server.tick();
        dispatch(outbound, &commands_tx, &mut outboxes);
        outboxes.release_departed(&server);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::messages::{ResyncPlayerMsg, StateKey, UpdatePlayerStateMsg};
    use crate::domain::{Player, ResyncSettings, World, WorldRules};
    use crate::use_cases::MessageRouter;
    use tokio::sync::mpsc::error::TryRecvError;
    use tokio::sync::oneshot;
    use tokio::task::JoinHandle;
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(2);

    struct Lobby {
        input_tx: mpsc::Sender<GameEvent>,
        commands_tx: broadcast::Sender<Message>,
        shutdown: Arc<Notify>,
        task: JoinHandle<()>,
    }

    impl Lobby {
        fn start(settings: ResyncSettings) -> Self {
            let server = GameServer::new(
                World::with_default_layout(WorldRules::default()),
                Arc::new(MessageRouter::standard()),
                settings,
            );
            let (input_tx, input_rx) = mpsc::channel(16);
            let (commands_tx, _) = broadcast::channel(1024);
            let shutdown = Arc::new(Notify::new());
            let task = tokio::spawn(world_task(
                server,
                input_rx,
                commands_tx.clone(),
                Duration::from_millis(5),
                Duration::ZERO,
                shutdown.clone(),
            ));
            Self {
                input_tx,
                commands_tx,
                shutdown,
                task,
            }
        }

        async fn join(&self, nick: &str) -> (Seat, mpsc::Receiver<Message>) {
            let (outbox, outbox_rx) = mpsc::channel(256);
            let (assigned, assigned_rx) = oneshot::channel();
            self.send(GameEvent::Join {
                nick: nick.to_string(),
                outbox,
                assigned,
            })
            .await;
            let seat = assigned_rx
                .await
                .expect("world task should answer")
                .expect("lobby has room");
            (seat, outbox_rx)
        }

        async fn send(&self, event: GameEvent) {
            self.input_tx
                .send(event)
                .await
                .expect("world task should be running");
        }

        async fn stop(self) {
            self.shutdown.notify_one();
            self.task.await.expect("world task should exit cleanly");
        }
    }

    async fn next_resync(outbox_rx: &mut mpsc::Receiver<Message>) -> ResyncPlayerMsg {
        let resync = async {
            loop {
                if let Message::ResyncPlayer(m) = outbox_rx.recv().await.expect("outbox open") {
                    return m;
                }
            }
        };
        timeout(WAIT, resync).await.expect("player should be resynced")
    }

    fn ack_for(resync: &ResyncPlayerMsg) -> Message {
        let mut player = Player::new(resync.update.player_id, "", b'A', 1);
        player.apply_update(&resync.update);
        player.build_resync_acknowledgement(resync.tick_id).into()
    }

    #[tokio::test]
    async fn join_assigns_a_seat_and_fills_the_outbox() {
        let lobby = Lobby::start(ResyncSettings::default());
        let mut commands_rx = lobby.commands_tx.subscribe();

        let (seat, mut outbox_rx) = lobby.join("Pilot").await;
        let resync = next_resync(&mut outbox_rx).await;
        assert_eq!(resync.update.player_id, seat.player_id);

        let broadcasts = async {
            let mut saw_add = false;
            let mut saw_tick = false;
            while !(saw_add && saw_tick) {
                match commands_rx.recv().await.expect("commands should flow") {
                    Message::AddPlayer(m) if m.player_id == seat.player_id => saw_add = true,
                    Message::Tick(_) => saw_tick = true,
                    _ => {}
                }
            }
        };
        timeout(WAIT, broadcasts)
            .await
            .expect("join and ticks should be broadcast");

        lobby.stop().await;
    }

    #[tokio::test]
    async fn expired_player_is_released_and_its_late_events_cannot_touch_the_next_holder() {
        let lobby = Lobby::start(ResyncSettings {
            retry_after_ticks: 2,
            max_pending_ticks: 40,
            ..ResyncSettings::default()
        });

        // Never acknowledges, so the world gives up on it.
        let (stale, mut stale_rx) = lobby.join("Silent").await;
        let released = async { while stale_rx.recv().await.is_some() {} };
        timeout(WAIT, released)
            .await
            .expect("expired player's outbox should be closed");

        let mut commands_rx = lobby.commands_tx.subscribe();
        let (seat, mut outbox_rx) = lobby.join("Next").await;
        assert_eq!(seat.player_id, stale.player_id);
        assert_ne!(seat.generation, stale.generation);

        let resync = next_resync(&mut outbox_rx).await;
        lobby
            .send(GameEvent::Message {
                seat,
                message: ack_for(&resync),
            })
            .await;
        let acked = async {
            loop {
                if let Message::ResyncAcknowledged(m) =
                    commands_rx.recv().await.expect("commands should flow")
                {
                    assert_eq!(m.player_id, seat.player_id);
                    return;
                }
            }
        };
        timeout(WAIT, acked).await.expect("acknowledgement rebroadcast");

        // What the old connection sends on its way out.
        let press = UpdatePlayerStateMsg {
            tick_id: resync.tick_id.wrapping_add(1),
            player_id: stale.player_id,
            key: StateKey::Left,
            value: true,
        };
        lobby
            .send(GameEvent::Message {
                seat: stale,
                message: press.into(),
            })
            .await;
        lobby.send(GameEvent::Leave { seat: stale }).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        loop {
            match commands_rx.try_recv() {
                Ok(Message::RemovePlayer(m)) => {
                    panic!("player {} removed by a stale leave", m.player_id)
                }
                Ok(Message::UpdatePlayerState(_)) => panic!("stale command applied"),
                Ok(_) => {}
                Err(_) => break,
            }
        }
        loop {
            match outbox_rx.try_recv() {
                Ok(_) => {}
                Err(err) => {
                    assert_eq!(err, TryRecvError::Empty, "current holder stays connected");
                    break;
                }
            }
        }

        lobby.stop().await;
    }
}
