use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use shore_proto::{
    CallKind, ClientMessage, Identity, IceCandidate, PeerProfile, ServerMessage,
};
use shore_relay::RelayState;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::{
    connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream,
};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn start_relay() -> SocketAddr {
    let listener = shore_relay::bind("127.0.0.1:0".parse().unwrap())
        .await
        .expect("bind relay");
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = shore_relay::serve(listener, RelayState::in_memory(), std::future::pending()).await;
    });
    addr
}

async fn connect(addr: SocketAddr, user: &str) -> Socket {
    let url = format!("ws://{addr}/ws?user_id={user}");
    let (socket, _) = connect_async(url).await.expect("connect to relay");
    socket
}

async fn send(socket: &mut Socket, message: &ClientMessage) {
    let text = shore_proto::encode_client(message).unwrap();
    socket.send(Message::Text(text.into())).await.unwrap();
}

async fn next_message(socket: &mut Socket) -> ServerMessage {
    loop {
        let frame = timeout(Duration::from_secs(3), socket.next())
            .await
            .expect("relay frame within timeout")
            .expect("socket open")
            .expect("frame ok");
        if let Message::Text(text) = frame {
            return shore_proto::decode_server(&text).expect("valid server frame");
        }
    }
}

/// Skips presence snapshots until a non-presence message shows up.
async fn next_signal(socket: &mut Socket) -> ServerMessage {
    loop {
        match next_message(socket).await {
            ServerMessage::OnlineUsers { .. } => continue,
            other => return other,
        }
    }
}

async fn wait_for_presence(socket: &mut Socket, expected: &[&str]) {
    let expected: Vec<Identity> = expected.iter().map(|id| Identity::new(*id)).collect();
    loop {
        if let ServerMessage::OnlineUsers { users } = next_message(socket).await {
            if users == expected {
                return;
            }
        }
    }
}

#[test_timeout::tokio_timeout_test(10)]
async fn presence_is_broadcast_on_connect_and_disconnect() {
    let addr = start_relay().await;
    let mut alice = connect(addr, "alice").await;
    wait_for_presence(&mut alice, &["alice"]).await;

    let bob = connect(addr, "bob").await;
    wait_for_presence(&mut alice, &["alice", "bob"]).await;

    drop(bob);
    wait_for_presence(&mut alice, &["alice"]).await;
}

#[test_timeout::tokio_timeout_test(10)]
async fn initiate_is_delivered_as_ring_with_caller_profile() {
    let addr = start_relay().await;
    let mut alice = connect(addr, "alice").await;
    let mut bob = connect(addr, "bob").await;
    wait_for_presence(&mut alice, &["alice", "bob"]).await;

    let caller = PeerProfile::new("alice").with_display_name("Alice");
    send(
        &mut alice,
        &ClientMessage::Initiate {
            to_user_id: "bob".into(),
            from_user: caller.clone(),
            call_type: CallKind::Audio,
        },
    )
    .await;
    send(
        &mut alice,
        &ClientMessage::Candidate {
            to_user_id: "bob".into(),
            candidate: IceCandidate::new("candidate:1"),
        },
    )
    .await;

    assert_eq!(
        next_signal(&mut bob).await,
        ServerMessage::Ring {
            from_user: caller,
            call_type: CallKind::Audio
        }
    );
    assert_eq!(
        next_signal(&mut bob).await,
        ServerMessage::Candidate {
            candidate: IceCandidate::new("candidate:1"),
            from_user_id: "alice".into()
        }
    );
}

#[test_timeout::tokio_timeout_test(10)]
async fn initiate_to_offline_identity_returns_unavailable() {
    let addr = start_relay().await;
    let mut alice = connect(addr, "alice").await;

    send(
        &mut alice,
        &ClientMessage::Initiate {
            to_user_id: "zed".into(),
            from_user: PeerProfile::new("alice"),
            call_type: CallKind::Video,
        },
    )
    .await;

    assert_eq!(
        next_signal(&mut alice).await,
        ServerMessage::Unavailable {
            to_user_id: "zed".into()
        }
    );
}

#[test_timeout::tokio_timeout_test(10)]
async fn ping_and_garbage_frames_get_replies() {
    let addr = start_relay().await;
    let mut alice = connect(addr, "alice").await;

    send(&mut alice, &ClientMessage::Ping).await;
    assert_eq!(next_signal(&mut alice).await, ServerMessage::Pong);

    alice
        .send(Message::Text("{not json".to_string().into()))
        .await
        .unwrap();
    match next_signal(&mut alice).await {
        ServerMessage::Error { message } => assert!(message.contains("invalid message format")),
        other => panic!("expected error frame, got {other:?}"),
    }
}

#[test_timeout::tokio_timeout_test(10)]
async fn reconnect_takes_over_routing() {
    let addr = start_relay().await;
    let mut alice = connect(addr, "alice").await;
    let old_bob = connect(addr, "bob").await;
    wait_for_presence(&mut alice, &["alice", "bob"]).await;

    let mut new_bob = connect(addr, "bob").await;
    wait_for_presence(&mut new_bob, &["alice", "bob"]).await;
    drop(old_bob);

    send(&mut alice, &ClientMessage::Busy { to_user_id: "bob".into() }).await;
    assert_eq!(
        next_signal(&mut new_bob).await,
        ServerMessage::Busy {
            from_user_id: "alice".into()
        }
    );
}

#[test_timeout::tokio_timeout_test(10)]
async fn upgrade_without_identity_is_refused() {
    let addr = start_relay().await;
    let result = connect_async(format!("ws://{addr}/ws")).await;
    assert!(result.is_err());
}

#[test_timeout::tokio_timeout_test(10)]
async fn probe_lists_online_users() {
    let addr = start_relay().await;
    let mut alice = connect(addr, "alice").await;
    wait_for_presence(&mut alice, &["alice"]).await;

    let users = shore_relay::cli::run_probe(format!("ws://{addr}"), "probe".into())
        .await
        .expect("probe");
    assert_eq!(users, vec![Identity::new("alice"), Identity::new("probe")]);
}
