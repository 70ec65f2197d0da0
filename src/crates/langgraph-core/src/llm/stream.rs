//! Streaming types returned by [`ChatModel::stream`](crate::llm::ChatModel::stream).

use futures::stream::Stream;
use std::pin::Pin;

/// One incremental piece of an assistant message as it is generated.
#[derive(Debug, Clone)]
pub struct MessageChunk {
    /// The text produced since the previous chunk.
    pub content: String,

    /// ID of the message this chunk belongs to, once known.
    pub message_id: Option<String>,

    /// Set on the chunk that completes the message.
    pub is_final: bool,
}

impl MessageChunk {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            message_id: None,
            is_final: false,
        }
    }

    pub fn with_message_id(mut self, message_id: impl Into<String>) -> Self {
        self.message_id = Some(message_id.into());
        self
    }

    pub fn final_chunk(mut self) -> Self {
        self.is_final = true;
        self
    }
}

/// A boxed stream of message chunks, as returned by a streaming chat call.
pub type MessageChunkStream = Pin<Box<dyn Stream<Item = MessageChunk> + Send>>;

/// A boxed stream of raw reasoning tokens, for thinking models that stream
/// their separated reasoning pass.
pub type TokenStream = Pin<Box<dyn Stream<Item = String> + Send>>;

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn chunk_stream_yields_in_order() {
        let stream: MessageChunkStream = Box::pin(futures::stream::iter(vec![
            MessageChunk::new("Hel"),
            MessageChunk::new("lo").final_chunk(),
        ]));

        let chunks: Vec<_> = stream.collect().await;
        assert_eq!(chunks.len(), 2);
        assert!(!chunks[0].is_final);
        assert!(chunks[1].is_final);
    }

    #[test]
    fn chunk_builder_sets_message_id() {
        let chunk = MessageChunk::new("hi").with_message_id("msg-1");
        assert_eq!(chunk.message_id.as_deref(), Some("msg-1"));
    }
}
