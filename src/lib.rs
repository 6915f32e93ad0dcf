pub mod authors;
pub mod bridge;
pub mod chat;
pub mod config;
pub mod delivery;
pub mod error;
pub mod forum;
pub mod html;
pub mod models;
pub mod notification;
pub mod openapi;
pub mod render;
pub mod routes;
pub mod session;
pub mod store; // handle / alias / course records

// Re-export commonly used items for tests / external users
pub use bridge::{Bridge, ThreadEvent};
pub use routes::{config, AppState};
