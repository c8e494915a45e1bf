mod support;

use futures::SinkExt;
use std::sync::Arc;
use std::time::Duration;
use sync_server::domain::{Message, World, WorldRules};
use sync_server::interface_adapters::protocol::MessageCodec;
use sync_server::use_cases::{Agent, MessageRouter};
use tokio_tungstenite::tungstenite::{self, protocol::frame::coding::CloseCode};

#[tokio::test]
async fn first_frame_assigns_the_player() {
    let codec = MessageCodec::standard();
    let lobby_id = support::create_lobby().await;
    let mut ws = support::connect(&lobby_id, "Ace").await;

    let Message::AssignPlayer(assign) = support::next_message(&mut ws, &codec).await else {
        panic!("first frame should assign a player");
    };
    assert!(assign.player_id >= 1);

    // Ticks keep flowing to every connection.
    let mut saw_tick = false;
    for _ in 0..200 {
        if matches!(support::next_message(&mut ws, &codec).await, Message::Tick(_)) {
            saw_tick = true;
            break;
        }
    }
    assert!(saw_tick);
}

#[tokio::test]
async fn agent_acknowledges_the_join_resync() {
    let codec = MessageCodec::standard();
    let lobby_id = support::create_lobby().await;
    let mut ws = support::connect(&lobby_id, "Ace").await;
    let mut agent = Agent::new(
        World::with_default_layout(WorldRules::default()),
        Arc::new(MessageRouter::standard()),
    );

    // Feed every server message to the agent and return its replies, until the server
    // rebroadcasts our acknowledgement.
    let flow = async {
        loop {
            let msg = support::next_message(&mut ws, &codec).await;
            if let Message::ResyncAcknowledged(ack) = &msg {
                if Some(ack.player_id) == agent.player_id() {
                    agent.receive(&msg);
                    break;
                }
            }
            for reply in agent.receive(&msg) {
                support::send(&mut ws, &codec, &reply).await;
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(10), flow)
        .await
        .expect("resync should be acknowledged");

    let player = agent.player().expect("agent knows its player");
    assert!(!player.resyncing);
    assert!(player.last_acknowledged_tick.is_some());
}

#[tokio::test]
async fn malformed_frames_close_the_connection() {
    let lobby_id = support::create_lobby().await;
    let mut ws = support::connect(&lobby_id, "Ace").await;

    ws.send(tungstenite::Message::Binary(vec![0xde, 0xad].into()))
        .await
        .expect("send should succeed");

    let frame = support::wait_for_close(&mut ws).await.expect("close frame");
    assert_eq!(frame.code, CloseCode::Policy);
}

#[tokio::test]
async fn server_only_messages_close_the_connection() {
    let codec = MessageCodec::standard();
    let lobby_id = support::create_lobby().await;
    let mut ws = support::connect(&lobby_id, "Ace").await;

    let tick: Message = sync_server::domain::messages::TickMsg { tick_id: 1 }.into();
    support::send(&mut ws, &codec, &tick).await;

    let frame = support::wait_for_close(&mut ws).await.expect("close frame");
    assert_eq!(frame.code, CloseCode::Policy);
}

#[tokio::test]
async fn text_frames_are_unsupported() {
    let lobby_id = support::create_lobby().await;
    let mut ws = support::connect(&lobby_id, "Ace").await;

    ws.send(tungstenite::Message::Text("hello".into()))
        .await
        .expect("send should succeed");

    let frame = support::wait_for_close(&mut ws).await.expect("close frame");
    assert_eq!(frame.code, CloseCode::Unsupported);
}

#[tokio::test]
async fn unknown_lobby_is_not_found() {
    let url = support::ws_url("no-such-lobby", "Ace");
    match tokio_tungstenite::connect_async(url).await {
        Err(tungstenite::Error::Http(response)) => assert_eq!(response.status(), 404),
        Err(e) => panic!("unexpected error {e}"),
        Ok(_) => panic!("connection to a missing lobby should fail"),
    }
}
