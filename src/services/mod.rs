pub mod conversation_service;
pub mod membership_guard;
pub mod message_service;
pub mod notifier;
