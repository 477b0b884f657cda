//! Communication channels (LINE).
//!
//! Webhook event model, the reply sender trait the relay talks to, and the LINE
//! Messaging API client that implements it.

mod event;
mod line;
mod reply;
mod signature;

pub use event::{InboundEvent, MessageBody, WebhookDelivery};
pub use line::LineChannel;
pub use reply::{ChannelError, ReplyConfirmation, ReplyMessage, ReplySender, SentMessage};
pub use signature::{verify_signature, SIGNATURE_HEADER};
