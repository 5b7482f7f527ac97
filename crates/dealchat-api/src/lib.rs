pub mod auth;
pub mod discussions;
pub mod error;
pub mod middleware;
pub mod routes;
pub mod store;

pub use auth::{AppState, AppStateInner};
pub use error::ApiError;
pub use routes::router;
pub use store::{DiscussionStore, StoreError};
