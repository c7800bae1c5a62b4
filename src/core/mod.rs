pub mod attachments;
pub mod chat_stream;
pub mod config;
pub mod conversation;
pub mod jobs;
pub mod message;
