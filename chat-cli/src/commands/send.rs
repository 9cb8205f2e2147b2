//! Send one message and wait for delivery.

use anyhow::Result;
use chat_client::{ChatApi, ChatSession, Intent, SessionEvent, Transport};
use chat_types::Message;
use std::path::Path;
use std::time::Duration;

use super::{open_session, resolve_conversation, wait_for};
use crate::config::CliConfig;

/// Run the send command.
pub async fn run(data_dir: &Path, config: &CliConfig, conversation: &str, body: &str) -> Result<()> {
    let mut chat = open_session(data_dir, config).await?;
    // Connecting, loading the list and the ack each get the full budget.
    let limit = config.request_timeout() + config.to_client_config().ack_timeout;

    let result = deliver(&mut chat, conversation, body, limit).await;
    chat.shutdown().await;

    let message = result?;
    match &message.id {
        Some(id) => println!("Delivered ({})", id),
        None => println!("Delivered"),
    }
    Ok(())
}

/// Connect, open `target` and send `body`, returning the server's copy.
pub async fn deliver<T, A>(
    chat: &mut ChatSession<T, A>,
    target: &str,
    body: &str,
    limit: Duration,
) -> Result<Message>
where
    T: Transport,
    A: ChatApi,
{
    if body.trim().is_empty() {
        anyhow::bail!("Message must not be empty");
    }

    let mut events = chat.subscribe();
    let handle = chat.handle();
    chat.start().await;

    wait_for(chat, &mut events, limit, |e| {
        matches!(e, SessionEvent::ConversationsUpdated)
    })
    .await?;
    if !chat.session().is_connected() {
        let reason = chat
            .session()
            .last_error
            .clone()
            .unwrap_or_else(|| "unknown error".to_string());
        anyhow::bail!("Not connected: {}", reason);
    }

    let conversation = resolve_conversation(&chat.conversations(), target)?;
    handle.send(Intent::SelectConversation(Some(conversation)))?;
    handle.send(Intent::SendMessage(body.to_string()))?;

    let outcome = wait_for(chat, &mut events, limit, |e| {
        matches!(
            e,
            SessionEvent::MessageDelivered { .. } | SessionEvent::MessageFailed { .. }
        )
    })
    .await?;
    match outcome {
        SessionEvent::MessageDelivered { message, .. } => Ok(message),
        _ => anyhow::bail!("Message was not delivered"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chat_client::{ClientConfig, MockApi, MockTransport};
    use chat_core::{AuthToken, Session};
    use chat_types::{Conversation, ConversationId, Frame, MessageId, User};

    fn setup(ack_timeout: Duration) -> (ChatSession<MockTransport, MockApi>, MockTransport) {
        let api = MockApi::new();
        api.set_conversations(vec![Conversation {
            id: ConversationId::new("c1"),
            name: String::new(),
            is_group: false,
            participants: vec![User::new("u1", "Alice"), User::new("u2", "Bob")],
            latest_message: None,
        }]);
        let transport = MockTransport::new();
        let chat = ChatSession::new(
            ClientConfig::default().with_ack_timeout(ack_timeout),
            Session::new(User::new("u1", "Alice"), AuthToken::new("tok")),
            transport.clone(),
            api,
        );
        (chat, transport)
    }

    #[tokio::test(start_paused = true)]
    async fn delivered_when_server_acks() {
        let (mut chat, transport) = setup(Duration::from_secs(10));

        // Play the server: answer the first message with a stored copy.
        let server = transport.clone();
        tokio::spawn(async move {
            loop {
                if let Some(Frame::Event {
                    ack: Some(ack),
                    data,
                    ..
                }) = server.sent_named("new message").pop()
                {
                    let mut stored = data;
                    stored["_id"] = serde_json::json!("m1");
                    server.push_ack(ack, stored);
                    return;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        });

        let message = deliver(&mut chat, "Bob", "hello", Duration::from_secs(5))
            .await
            .unwrap();

        assert_eq!(message.id, Some(MessageId::new("m1")));
        assert_eq!(message.body, "hello");
    }

    #[tokio::test(start_paused = true)]
    async fn fails_without_ack() {
        let (mut chat, _transport) = setup(Duration::from_secs(1));

        let result = deliver(&mut chat, "c1", "anyone?", Duration::from_secs(5)).await;

        let error = result.unwrap_err().to_string();
        assert!(error.contains("not delivered"), "{error}");
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_conversation_is_an_error() {
        let (mut chat, transport) = setup(Duration::from_secs(1));

        let result = deliver(&mut chat, "Dana", "hi", Duration::from_secs(5)).await;

        assert!(result.is_err());
        assert!(transport.sent_named("new message").is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn refused_connection_is_reported() {
        let (mut chat, transport) = setup(Duration::from_secs(1));
        for _ in 0..10 {
            transport.fail_next_connect("connection refused");
        }

        let error = deliver(&mut chat, "Bob", "hi", Duration::from_secs(5))
            .await
            .unwrap_err()
            .to_string();

        assert!(error.contains("Not connected"), "{error}");
    }
}
