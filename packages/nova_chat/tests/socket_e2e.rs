//! End-to-end runs against an in-process WebSocket server.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

use nova_chat::session::{CreateSessionRequest, SessionBackend};
use nova_chat::{
    Applied, ChatConfig, ChatEvent, ChatSession, MemorySessionCache, Result, SessionId,
    SocketState, TimingConfig,
};

const STEP: Duration = Duration::from_secs(5);

#[derive(Default)]
struct CountingBackend {
    next: AtomicI64,
}

impl SessionBackend for CountingBackend {
    async fn create_session(&self, _request: &CreateSessionRequest) -> Result<SessionId> {
        Ok(SessionId::Text(format!(
            "s-{}",
            self.next.fetch_add(1, Ordering::SeqCst) + 1
        )))
    }
}

fn config_for(addr: std::net::SocketAddr) -> ChatConfig {
    ChatConfig {
        ws_base: format!("ws://{addr}/?userId="),
        company_id: "acme".into(),
        user_id: 55,
        timing: TimingConfig {
            reconnect_delay_ms: 100,
            ..Default::default()
        },
        ..Default::default()
    }
}

async fn wait_for(chat: &mut ChatSession<CountingBackend>, want: ChatEvent) {
    tokio::time::timeout(STEP, async {
        loop {
            if chat.next_event().await == want {
                return;
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {want:?}"));
}

#[tokio::test]
async fn streams_an_answer_and_sends_feedback() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (seen_tx, mut seen_rx) = mpsc::unbounded_channel::<Value>();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();

        // user message
        let Some(Ok(Message::Text(text))) = ws.next().await else {
            panic!("expected a user message");
        };
        let request: Value = serde_json::from_str(text.as_str()).unwrap();
        seen_tx.send(request).unwrap();

        let frames = [
            json!({"response_id": 9, "query_id": 3, "response": {"text": "Hello", "passing": true}}),
            json!({"response_id": 9, "query_id": 3, "response": {"text": "ignored", "passing": false}}),
            json!({"response_id": 9, "query_id": 3, "response": {"text": " world", "passing": true}}),
            json!({"response_id": 9, "query_id": 3, "response": {"text": "END_OF_RESPONSE_TOKEN{\"sources\": [{\"title\": \"Guide\", \"page_number\": 4}], \"promptback_question\": [\"More?\"]}", "passing": true}}),
            json!({"response_id": 9, "response": {"text": "stream-end", "passing": true}}),
        ];
        for frame in frames {
            ws.send(Message::Text(frame.to_string().into())).await.unwrap();
        }
        ws.send(Message::Binary(vec![1, 2, 3].into())).await.unwrap();

        // feedback
        while let Some(Ok(msg)) = ws.next().await {
            if let Message::Text(text) = msg {
                seen_tx.send(serde_json::from_str(text.as_str()).unwrap()).unwrap();
                break;
            }
        }
    });

    let mut chat = ChatSession::new(
        config_for(addr),
        CountingBackend::default(),
        Arc::new(MemorySessionCache::new()),
    )
    .unwrap();

    let state = chat.select_modality(Some("support".into())).await.unwrap();
    assert!(state.is_active());
    wait_for(&mut chat, ChatEvent::Socket(SocketState::Connected)).await;

    chat.send_text("Hi there").await.unwrap();
    let request = tokio::time::timeout(STEP, seen_rx.recv()).await.unwrap().unwrap();
    assert_eq!(request["message"], "Hi there");
    assert_eq!(request["sessionId"], "s-1");
    assert_eq!(request["userId"], 55);
    assert_eq!(request["flow_type"], "support");

    wait_for(&mut chat, ChatEvent::Message(Applied::StreamFinished(Some(1)))).await;

    let answer = &chat.messages()[1];
    assert_eq!(answer.text, "Hello world");
    assert_eq!(answer.response_id.as_deref(), Some("9"));
    assert_eq!(answer.query_id.as_deref(), Some("3"));
    assert_eq!(answer.sources[0].title, "Guide");
    assert_eq!(answer.sources[0].page_number, Some(4));
    assert_eq!(answer.promptback_questions, vec!["More?".to_string()]);

    assert!(chat.submit_feedback("9", true).await.unwrap());
    let feedback = tokio::time::timeout(STEP, seen_rx.recv()).await.unwrap().unwrap();
    assert_eq!(feedback["responseId"], "9");
    assert_eq!(feedback["queryId"], "3");
    assert_eq!(feedback["liked"], true);
    assert_eq!(feedback["feedback"], true);

    chat.close().await;
    assert_eq!(chat.next_event().await, ChatEvent::Closed);
}

#[tokio::test]
async fn reconnects_after_server_close() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (accepted_tx, mut accepted_rx) = mpsc::unbounded_channel::<usize>();

    tokio::spawn(async move {
        let mut n = 0;
        let mut keep = Vec::new();
        loop {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            n += 1;
            accepted_tx.send(n).unwrap();
            if n == 1 {
                ws.close(None).await.unwrap();
            } else {
                keep.push(ws);
            }
        }
    });

    let mut chat = ChatSession::new(
        config_for(addr),
        CountingBackend::default(),
        Arc::new(MemorySessionCache::new()),
    )
    .unwrap();
    chat.select_modality(None).await.unwrap();

    wait_for(&mut chat, ChatEvent::Socket(SocketState::Connected)).await;
    wait_for(&mut chat, ChatEvent::Socket(SocketState::Disconnected)).await;
    assert!(matches!(
        chat.send_text("anyone?").await,
        Err(nova_chat::ChatError::NotConnected)
    ));
    assert!(chat.messages().is_empty());

    wait_for(&mut chat, ChatEvent::Socket(SocketState::Connected)).await;
    assert_eq!(accepted_rx.recv().await, Some(1));
    assert_eq!(accepted_rx.recv().await, Some(2));

    // one drop, one reconnect
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(accepted_rx.try_recv().is_err());

    chat.send_text("back").await.unwrap();
    chat.close().await;
}
