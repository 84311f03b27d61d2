//! Hook for syncing a write's serial number to an external transaction log
//! before the store considers that write durable.
//!
//! `LogDataStore` calls [`SyncProxy::sync_to`] from `flush`/`init_flush` so a
//! deployment backed by a transaction log can guarantee the log is synced at
//! least as far as the store before the store's own fsync completes. A
//! standalone store (as in this crate's tests) has no such log and uses
//! [`NoopSyncProxy`].

use crate::error::Result;

pub trait SyncProxy: Send + Sync {
    /// Block until everything up to and including `serial_num` is durable in
    /// whatever external log this proxy fronts.
    fn sync_to(&self, serial_num: u64) -> Result<()>;
}

pub struct NoopSyncProxy;

impl SyncProxy for NoopSyncProxy {
    fn sync_to(&self, _serial_num: u64) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_always_succeeds() {
        assert!(NoopSyncProxy.sync_to(12345).is_ok());
    }
}
