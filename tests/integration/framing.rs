//! Framing: write ordering on the socket, out-of-order reassembly
//! through the full inbound path, and tolerance for garbage frames.

use tether_core::message::{Message, MessageKind, ResponseMessage, TaskingMessage};

use crate::infra::*;

#[tokio::test]
async fn messages_write_in_enqueue_order() {
    let bridge = ScriptedBridge::new();
    let (transport, _codec) = build_transport(false, bridge);
    let mut peer = FakePeer::attach(&transport).await;

    for seq in 0..3 {
        transport
            .send(&Message::Tasking(TaskingMessage {
                responses: vec![serde_json::json!({"seq": seq})],
                ..Default::default()
            }))
            .await
            .unwrap();
    }

    for seq in 0..3 {
        let msg = peer.next_message(MessageKind::Tasking).await;
        let Message::Tasking(tasking) = msg else {
            panic!("expected tasking");
        };
        assert_eq!(tasking.responses[0]["seq"], seq);
    }
}

#[tokio::test]
async fn large_message_reassembles_out_of_order() {
    let bridge = ScriptedBridge::new();
    let (transport, _codec) = build_transport(false, bridge);
    let peer = FakePeer::attach(&transport).await;

    let original = ResponseMessage {
        tasks: vec![serde_json::json!({"id": "t1", "command": "y".repeat(400)})],
        ..Default::default()
    };
    let envs = peer.envelopes(&Message::Response(original.clone()));
    assert!(envs.len() >= 3, "payload must span several fragments");

    for env in envs.iter().rev() {
        transport.on_frame(&env.to_bytes().unwrap()).await;
    }

    let got = transport
        .recv(MessageKind::Response, |m| match m {
            Message::Response(r) => r,
            other => panic!("unexpected message: {other:?}"),
        })
        .await
        .unwrap();
    assert_eq!(got, original);
}

#[tokio::test]
async fn garbage_frames_are_ignored() {
    let bridge = ScriptedBridge::new();
    let (transport, _codec) = build_transport(false, bridge);
    let peer = FakePeer::attach(&transport).await;

    transport.on_frame(b"definitely not an envelope").await;
    transport.on_frame(&[]).await;

    // The link still delivers well-formed traffic afterwards.
    peer.deliver(
        &transport,
        &Message::Response(ResponseMessage::default()),
    )
    .await;
    let kind = transport
        .recv(MessageKind::Response, |m| m.kind())
        .await
        .unwrap();
    assert_eq!(kind, MessageKind::Response);
}
