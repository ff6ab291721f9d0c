use std::time::Duration;

use crate::error::BackendError;
use crate::types::StreamRecord;

/// Consumer side of an offset-addressable message stream.
///
/// All methods block. The ingestion loop owns its client exclusively and
/// drives it from a single thread.
pub trait StreamClient: Send {
    /// Start consuming `topic` from its last committed position.
    fn subscribe(&mut self, topic: &str) -> Result<(), BackendError>;

    /// Wait up to `timeout` for records. An empty vec means nothing
    /// arrived in time.
    fn poll(&mut self, timeout: Duration) -> Result<Vec<StreamRecord>, BackendError>;

    /// Synchronously commit the position of everything returned by `poll`
    /// so far.
    fn commit(&mut self) -> Result<(), BackendError>;

    /// Release the client. Further calls fail with `ErrorKind::Closed`.
    fn close(&mut self) -> Result<(), BackendError>;
}

impl<T: StreamClient + ?Sized> StreamClient for Box<T> {
    fn subscribe(&mut self, topic: &str) -> Result<(), BackendError> {
        (**self).subscribe(topic)
    }

    fn poll(&mut self, timeout: Duration) -> Result<Vec<StreamRecord>, BackendError> {
        (**self).poll(timeout)
    }

    fn commit(&mut self) -> Result<(), BackendError> {
        (**self).commit()
    }

    fn close(&mut self) -> Result<(), BackendError> {
        (**self).close()
    }
}
