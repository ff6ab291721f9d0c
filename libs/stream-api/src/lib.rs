pub mod client;
pub mod error;
pub mod store;
pub mod types;
pub mod util;

pub use client::StreamClient;
pub use error::{BackendError, ErrorKind};
pub use store::DocumentStore;
pub use types::{Document, StreamRecord, ID_FIELD};
pub use util::now_ms;
