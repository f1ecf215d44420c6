//! Stream accumulator.
//!
//! Rebuilds the full assistant text and the completed tool calls from a model
//! stream while forwarding text to the user paragraph by paragraph: the
//! outgoing buffer is sent each time it ends in a blank line (`"\n\n"`), and
//! whatever is left is sent when the stream ends.

use crate::error::RoundError;
use crate::provider::{ChatStream, StreamEvent};
use crate::transport::Transport;
use ember_common::{ChatId, ToolCall};
use futures_util::StreamExt;

/// Everything the model produced in one streaming pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssistantReply {
    pub text: String,
    pub tool_calls: Vec<ToolCall>,
}

#[derive(Debug, Default)]
pub struct StreamAccumulator {
    text: String,
    buffer: String,
    tool_calls: Vec<ToolCall>,
}

impl StreamAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a text delta and return the segments that are ready to send.
    ///
    /// Whitespace-only segments are dropped; chat APIs reject empty messages.
    pub fn push_delta(&mut self, delta: &str) -> Vec<String> {
        self.text.push_str(delta);

        let mut ready = Vec::new();
        for ch in delta.chars() {
            self.buffer.push(ch);
            if self.buffer.ends_with("\n\n") {
                let segment = std::mem::take(&mut self.buffer);
                if !segment.trim().is_empty() {
                    ready.push(segment);
                }
            }
        }
        ready
    }

    pub fn push_tool_call(&mut self, call: ToolCall) {
        self.tool_calls.push(call);
    }

    /// Text accumulated so far.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Finish the pass, returning the reply and any unsent remainder.
    pub fn finish(self) -> (AssistantReply, Option<String>) {
        let rest = (!self.buffer.trim().is_empty()).then_some(self.buffer);
        (
            AssistantReply {
                text: self.text,
                tool_calls: self.tool_calls,
            },
            rest,
        )
    }
}

/// Drain a model stream, delivering text to `chat_id` as it arrives.
///
/// A stream error or a failed send aborts the pass; nothing is returned for
/// the caller to append in that case.
pub async fn consume_stream(
    mut stream: ChatStream,
    transport: &dyn Transport,
    chat_id: ChatId,
) -> Result<AssistantReply, RoundError> {
    let mut acc = StreamAccumulator::new();
    let mut waiting_for_first_token = true;

    while let Some(event) = stream.next().await {
        match event.map_err(RoundError::Model)? {
            StreamEvent::ContentDelta(delta) => {
                if waiting_for_first_token {
                    waiting_for_first_token = false;
                    tracing::debug!(chat_id, "Received first token");
                }
                for segment in acc.push_delta(&delta) {
                    transport
                        .send_text(chat_id, &segment)
                        .await
                        .map_err(RoundError::Flush)?;
                }
            }
            StreamEvent::ToolCallFinished(call) => {
                tracing::debug!(chat_id, tool = %call.name(), call_id = %call.id, "Tool call received");
                acc.push_tool_call(call);
            }
        }
    }

    let (reply, rest) = acc.finish();
    if let Some(rest) = rest {
        transport
            .send_text(chat_id, &rest)
            .await
            .map_err(RoundError::Flush)?;
    }
    Ok(reply)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use futures_util::stream;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingTransport {
        sent: Mutex<Vec<String>>,
        fail_sends: bool,
    }

    #[async_trait]
    impl Transport for RecordingTransport {
        async fn send_text(&self, _chat_id: ChatId, text: &str) -> anyhow::Result<()> {
            if self.fail_sends {
                anyhow::bail!("chat not found");
            }
            self.sent.lock().unwrap().push(text.to_string());
            Ok(())
        }

        async fn send_typing(&self, _chat_id: ChatId) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn events(items: Vec<anyhow::Result<StreamEvent>>) -> ChatStream {
        Box::pin(stream::iter(items))
    }

    fn delta(s: &str) -> anyhow::Result<StreamEvent> {
        Ok(StreamEvent::ContentDelta(s.to_string()))
    }

    #[test]
    fn flushes_on_second_newline_and_keeps_rest() {
        let mut acc = StreamAccumulator::new();
        assert!(acc.push_delta("a").is_empty());
        assert!(acc.push_delta("\n").is_empty());
        assert_eq!(acc.push_delta("\n"), vec!["a\n\n"]);
        assert!(acc.push_delta("b").is_empty());

        let (reply, rest) = acc.finish();
        assert_eq!(rest.as_deref(), Some("b"));
        assert_eq!(reply.text, "a\n\nb");
    }

    #[test]
    fn flushes_inside_a_single_delta() {
        let mut acc = StreamAccumulator::new();
        assert_eq!(acc.push_delta("a\n\nb"), vec!["a\n\n"]);
        assert_eq!(acc.text(), "a\n\nb");
        assert_eq!(acc.finish().1.as_deref(), Some("b"));
    }

    #[test]
    fn single_newline_does_not_flush() {
        let mut acc = StreamAccumulator::new();
        assert!(acc.push_delta("line one\nline two\n").is_empty());
        assert_eq!(acc.finish().1.as_deref(), Some("line one\nline two\n"));
    }

    #[test]
    fn blank_segments_are_dropped() {
        let mut acc = StreamAccumulator::new();
        assert_eq!(acc.push_delta("p1\n\n\n\np2\n\n"), vec!["p1\n\n", "p2\n\n"]);
        let (reply, rest) = acc.finish();
        assert_eq!(rest, None);
        assert_eq!(reply.text, "p1\n\n\n\np2\n\n");
    }

    #[tokio::test]
    async fn consume_sends_paragraphs_then_remainder() {
        let transport = RecordingTransport::default();
        let call = ToolCall::new("c1", "create_memory", "{}");
        let stream = events(vec![
            delta("Hello"),
            delta("!\n"),
            delta("\nSecond"),
            Ok(StreamEvent::ToolCallFinished(call.clone())),
            delta(" paragraph"),
        ]);

        let reply = consume_stream(stream, &transport, 1).await.unwrap();

        assert_eq!(reply.text, "Hello!\n\nSecond paragraph");
        assert_eq!(reply.tool_calls, vec![call]);
        assert_eq!(
            *transport.sent.lock().unwrap(),
            vec!["Hello!\n\n".to_string(), "Second paragraph".to_string()]
        );
    }

    #[tokio::test]
    async fn tool_only_reply_sends_nothing() {
        let transport = RecordingTransport::default();
        let stream = events(vec![Ok(StreamEvent::ToolCallFinished(ToolCall::new(
            "c", "create_memory", "{}",
        )))]);

        let reply = consume_stream(stream, &transport, 1).await.unwrap();
        assert!(reply.text.is_empty());
        assert_eq!(reply.tool_calls.len(), 1);
        assert!(transport.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn stream_error_aborts() {
        let transport = RecordingTransport::default();
        let stream = events(vec![delta("partial"), Err(anyhow::anyhow!("reset by peer"))]);

        let err = consume_stream(stream, &transport, 1).await.unwrap_err();
        assert!(matches!(err, RoundError::Model(_)));
        assert!(transport.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn send_failure_aborts() {
        let transport = RecordingTransport {
            fail_sends: true,
            ..Default::default()
        };
        let stream = events(vec![delta("para\n\nmore")]);

        let err = consume_stream(stream, &transport, 1).await.unwrap_err();
        assert!(matches!(err, RoundError::Flush(_)));
    }
}
