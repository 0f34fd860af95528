//! Chat platform seam
//!
//! The engine never talks to a chat API directly. Embedders implement
//! [`ChatTransport`] over their client library; tests use an in-memory fake.

use crate::error::TransportError;
use crate::progress::ProgressSink;
use crate::types::{Artifact, ChatId, MediaRef, MessageRef};
use async_trait::async_trait;
use std::path::Path;

/// Operations the engine needs from the chat platform
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Send a new text message, returning a handle for later edits
    async fn send_text(&self, chat: ChatId, text: &str) -> Result<MessageRef, TransportError>;

    /// Replace the text of an existing message
    async fn edit_text(&self, message: &MessageRef, text: &str) -> Result<(), TransportError>;

    /// Delete a message
    async fn delete_message(&self, message: &MessageRef) -> Result<(), TransportError>;

    /// Fetch media into `dest`, reporting bytes through `progress`
    ///
    /// Returns the number of bytes written.
    async fn download_media(
        &self,
        media: &MediaRef,
        dest: &Path,
        progress: &dyn ProgressSink,
    ) -> Result<u64, TransportError>;

    /// Send a file to `chat`, reporting bytes through `progress`
    async fn upload(
        &self,
        chat: ChatId,
        artifact: &Artifact,
        progress: &dyn ProgressSink,
    ) -> Result<MessageRef, TransportError>;
}
