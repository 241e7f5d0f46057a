pub mod conversation;
pub mod message;
pub mod page;
pub mod participant;

pub use conversation::Conversation;
pub use message::{Message, RecallScope, RECALLED_BODY};
pub use page::{PageMeta, Paginated};
pub use participant::Participant;
