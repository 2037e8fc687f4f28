pub mod chat;
pub mod config;
pub mod identity;
pub mod request;
pub mod retry;
pub mod track;
