//! External fetch engine abstraction and the aria2 JSON-RPC client.

pub mod aria2;
pub mod traits;

pub use aria2::Aria2Client;
pub use traits::{ActiveJob, FetchEngine, FetchRequest, JobHandle};

use thiserror::Error;

/// Errors talking to the fetch engine.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Engine transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Engine returned HTTP {status}")]
    HttpStatus { status: u16 },

    #[error("Engine RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("Malformed engine response: {0}")]
    MalformedResponse(String),
}
