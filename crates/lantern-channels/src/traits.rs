//! The [`ChannelPort`] contract.
//!
//! A channel is a bidirectional connection to a chat surface. The
//! runtime only sends through this trait; receiving is the adapter's
//! business (it feeds inbound messages to the orchestrator).

use async_trait::async_trait;

use lantern_types::response::Attachment;

use crate::error::ChannelError;

/// The trait every transport adapter implements for delivery.
///
/// `transport_chat_id` is the physical delivery address on the channel
/// (Telegram chat id, WebSocket client id, webhook callback key) — not
/// the logical conversation key.
#[async_trait]
pub trait ChannelPort: Send + Sync {
    /// Channel type identifier (e.g. `"telegram"`, `"web"`, `"webhook"`).
    fn name(&self) -> &str;

    /// Check whether a sender may interact with this channel.
    ///
    /// Returns `true` when the allow-list is empty (everyone allowed)
    /// or when `sender_id` appears in it.
    fn is_authorized(&self, sender_id: &str) -> bool;

    /// Deliver plain text.
    async fn send_message(&self, transport_chat_id: &str, text: &str) -> Result<(), ChannelError>;

    /// Deliver a voice message.
    ///
    /// Default implementation reports the capability as missing so
    /// text-only channels stay minimal; routing falls back to text.
    async fn send_voice(
        &self,
        _transport_chat_id: &str,
        _audio: &[u8],
    ) -> Result<(), ChannelError> {
        Err(ChannelError::Unsupported(format!(
            "channel '{}' does not support voice",
            self.name()
        )))
    }

    /// Deliver a file or image attachment.
    async fn send_attachment(
        &self,
        _transport_chat_id: &str,
        attachment: &Attachment,
    ) -> Result<(), ChannelError> {
        Err(ChannelError::Unsupported(format!(
            "channel '{}' does not support attachments ({})",
            self.name(),
            attachment.file_name
        )))
    }
}
