pub mod broker;
pub mod conversation;
