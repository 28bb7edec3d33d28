pub mod conversation;
pub mod member;
pub mod message;

pub use conversation::{Conversation, ConversationSummary, NewConversation, UserProfile};
pub use member::{Member, WatermarkRow};
pub use message::{FeedMessage, Message, MessageKey, MessageView, NewMessage};
