mod config;
mod store;

pub use config::FileStoreConfig;
pub use store::FileDocumentStore;
