//! HTTP surface: `POST /search`, `GET /drugs/{ndc}`,
//! `GET /drugs/{ndc}/alternatives`, `GET /health`. JSON in and out, CORS
//! open, structured error bodies.

pub mod endpoints;
pub mod error;
pub mod router;
pub mod server;
pub mod types;

pub use error::ApiError;
pub use router::api_router;
pub use server::ApiServer;
pub use types::ApiContext;
