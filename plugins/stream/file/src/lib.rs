mod config;
mod consumer;
mod writer;

pub use config::{FileStreamConfig, TopicPaths};
pub use consumer::FileConsumer;
pub use writer::FileTopicWriter;
