//! HTTP endpoint handlers

pub mod chat;
pub mod gemini;
pub mod management;
pub mod messages;
pub mod models;
