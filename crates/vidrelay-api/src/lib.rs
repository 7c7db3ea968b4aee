//! vidrelay API library
//!
//! HTTP handlers, application state and setup for the `vidrelay-api` binary.

mod api_doc;
pub mod constants;
mod handlers;
pub mod setup;

pub mod error;
pub mod state;

pub use api_doc::ApiDoc;
pub use error::{ErrorResponse, HttpAppError};
pub use state::AppState;
