/// Outcome of a single notification delivery.
///
/// The dispatcher branches on this instead of on transport error types.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered,
    /// The recipient blocked the bot or the chat no longer exists. Never retried.
    RecipientGone(String),
    /// Rate limit, timeout, network or request error. May succeed later.
    TransientError(String),
}

impl DeliveryOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, DeliveryOutcome::Delivered)
    }
}

/// Persistent reply keyboard shown under the input field (main menu).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReplyMenu {
    pub rows: Vec<Vec<String>>,
}

impl ReplyMenu {
    pub fn new(rows: Vec<Vec<String>>) -> Self {
        Self { rows }
    }
}

/// Capabilities / feature flags of a messenger implementation.
#[derive(Clone, Copy, Debug)]
pub struct MessagingCapabilities {
    pub supports_html: bool,
    pub supports_reply_menus: bool,
    pub max_message_len: usize,
}
