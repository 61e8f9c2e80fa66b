//! Command channel facade for the state components.

use std::sync::Arc;

use crate::error::Result;
use crate::protocol::ResultRecord;

/// Narrow interface the variable store and breakpoint coordinator issue commands through.
pub trait MiChannel: Send + Sync {
    /// Send one command and return its reply, error-class replies included.
    fn send(&self, command: &str) -> Result<ResultRecord>;

    /// Send one command; an `^error` reply becomes [`crate::MiError::Command`].
    fn execute(&self, command: &str) -> Result<ResultRecord> {
        self.send(command)?.into_result()
    }
}

impl<T: MiChannel + ?Sized> MiChannel for Arc<T> {
    fn send(&self, command: &str) -> Result<ResultRecord> {
        (**self).send(command)
    }
}
