pub mod models;

pub use models::{
    Actor, Conversation, ConversationSummary, DeleteOutcome, HomepageData, Lifecycle,
    NewConversation, OrderBy, RequestKey, SaveToggle,
};
