pub mod api;
pub mod bridge;
pub mod events;
pub mod models;
