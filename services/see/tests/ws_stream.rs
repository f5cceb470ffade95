//! Websocket behavior against a live server: connect replay, broadcast
//! identity, and the stream-source loopback.

use futures_util::{Stream, StreamExt};
use see::http::{build_router, AppState, WebContent};
use see::plugins::PluginRegistry;
use see::sources::stream::StreamSource;
use see::webfs::LayeredFs;
use see::Visualizer;
use see_protocol::{encode_batch, Batch};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

async fn spawn_server() -> (SocketAddr, Arc<Visualizer>, UnboundedReceiver<Batch>) {
    let (vis, client_rx) = Visualizer::new();
    let web = Arc::new(WebContent {
        fs: LayeredFs::new(None, None),
        plugins: PluginRegistry::default(),
        builtins: Vec::new(),
        title: "Visualizer".to_owned(),
    });
    let state = AppState {
        vis: Arc::clone(&vis),
        web,
        schema: None,
    };
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, build_router(state))
            .await
            .expect("serve");
    });
    (addr, vis, client_rx)
}

fn batch(v: serde_json::Value) -> Batch {
    serde_json::from_value(v).expect("test batch")
}

async fn next_text<S>(ws: &mut S) -> String
where
    S: Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    loop {
        let message = ws
            .next()
            .await
            .expect("websocket stream ended")
            .expect("websocket error");
        if let Message::Text(text) = message {
            return text.as_str().to_owned();
        }
    }
}

#[tokio::test]
async fn connect_replays_data_values_then_objects() {
    let (addr, vis, _client_rx) = spawn_server().await;
    vis.recv_from_source(batch(serde_json::json!([
        {"action": "data", "id": "t", "value": 42},
        {"action": "object", "object": {"id": "a", "x": 1}},
    ])))
    .await;

    let (mut ws, _) = connect_async(format!("ws://{addr}/ws"))
        .await
        .expect("connect");

    let first: serde_json::Value =
        serde_json::from_str(&next_text(&mut ws).await).expect("first frame json");
    assert_eq!(
        first,
        serde_json::json!([{"action": "data", "id": "t", "value": 42}])
    );

    let second: serde_json::Value =
        serde_json::from_str(&next_text(&mut ws).await).expect("second frame json");
    assert_eq!(
        second,
        serde_json::json!([{"action": "object", "object": {"id": "a", "x": 1}}])
    );
}

#[tokio::test]
async fn broadcasts_reach_the_peer_byte_for_byte() {
    let (addr, vis, _client_rx) = spawn_server().await;
    let (mut ws, _) = connect_async(format!("ws://{addr}/ws"))
        .await
        .expect("connect");
    // Drain the two (empty) replay frames so the peer is known-registered.
    assert_eq!(next_text(&mut ws).await, "[]");
    assert_eq!(next_text(&mut ws).await, "[]");

    let incoming = batch(serde_json::json!([
        {"action": "object", "object": {"id": "a", "x": 1}},
        {"action": "mystery", "payload": [1, 2, 3]},
    ]));
    let expected = encode_batch(&incoming).expect("encode");
    vis.recv_from_source(incoming).await;

    assert_eq!(next_text(&mut ws).await, expected);
}

#[tokio::test]
async fn browser_batches_are_routed_and_rebroadcast() {
    let (addr, vis, mut client_rx) = spawn_server().await;

    let (mut sender_ws, _) = connect_async(format!("ws://{addr}/ws"))
        .await
        .expect("connect sender");
    assert_eq!(next_text(&mut sender_ws).await, "[]");
    assert_eq!(next_text(&mut sender_ws).await, "[]");

    use futures_util::SinkExt;
    sender_ws
        .send(Message::Text(
            r#"[{"action":"data","id":"speed","value":7}]"#.into(),
        ))
        .await
        .expect("send frame");

    // Routed into the store…
    let forwarded = client_rx.recv().await.expect("forwarded to source");
    assert_eq!(forwarded[0].id(), Some("speed"));
    assert_eq!(
        vis.states.data_values().await.get("speed"),
        Some(&serde_json::json!(7))
    );

    // …and rebroadcast to peers (the sender included).
    let echoed: serde_json::Value =
        serde_json::from_str(&next_text(&mut sender_ws).await).expect("echo json");
    assert_eq!(
        echoed,
        serde_json::json!([{"action": "data", "id": "speed", "value": 7}])
    );
}

#[tokio::test]
async fn stream_source_loopback_reaches_websocket_peers() {
    let (addr, vis, _client_rx) = spawn_server().await;

    let (mut feeder, source_end) = tokio::io::duplex(4096);
    let source = StreamSource::new(source_end, tokio::io::sink());
    let run_vis = Arc::clone(&vis);
    let run = tokio::spawn(async move { source.run(&run_vis).await });

    let (mut ws, _) = connect_async(format!("ws://{addr}/ws"))
        .await
        .expect("connect");
    assert_eq!(next_text(&mut ws).await, "[]");
    assert_eq!(next_text(&mut ws).await, "[]");

    feeder
        .write_all(b"[{\"action\":\"object\",\"object\":{\"id\":\"a\",\"x\":1}}]\n")
        .await
        .expect("feed batch");

    let frame: serde_json::Value =
        serde_json::from_str(&next_text(&mut ws).await).expect("frame json");
    assert_eq!(
        frame,
        serde_json::json!([{"action": "object", "object": {"id": "a", "x": 1}}])
    );
    assert_eq!(
        vis.states.objects().await["a"].get("x"),
        Some(&serde_json::json!(1))
    );

    // Closing the feeder is a clean end of stream.
    drop(feeder);
    run.await.expect("join").expect("clean end of stream");
}
