use async_trait::async_trait;

use crate::{
    domain::{ChatId, MessageRef},
    messaging::types::{DeliveryOutcome, MessagingCapabilities, ReplyMenu},
    Result,
};

/// Outbound messenger port.
///
/// `send_html`/`send_menu` serve interactive replies and surface failures as
/// errors. `deliver` serves notification fanout and classifies the failure
/// instead, so the caller can prune recipients that are gone for good.
#[async_trait]
pub trait MessagingPort: Send + Sync {
    fn capabilities(&self) -> MessagingCapabilities;

    async fn send_html(&self, chat_id: ChatId, html: &str) -> Result<MessageRef>;

    async fn send_menu(&self, chat_id: ChatId, html: &str, menu: ReplyMenu) -> Result<MessageRef>;

    async fn deliver(&self, chat_id: ChatId, html: &str) -> DeliveryOutcome;
}
