//! Seam to the ambient transaction coordinator

use crate::error::Result;

/// Transaction state captured on the owner thread
pub trait TransactionBridge: Send {
    /// Rejoin the captured transaction on the worker thread
    fn resume(&mut self) -> Result<()>;

    /// Finish the bridged work on the worker thread; `commit` is false when
    /// the worker aborted
    fn end(&mut self, commit: bool) -> Result<()>;

    /// Drop whatever the owner side still holds
    fn release(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Snapshots the current transaction, its resource bindings and
/// synchronisation callbacks
pub trait TransactionCoordinator: Send + Sync {
    fn capture(&self) -> Box<dyn TransactionBridge>;
}

/// Used when no transaction manager is configured
#[derive(Debug, Default, Clone, Copy)]
pub struct NoTransaction;

impl TransactionBridge for NoTransaction {
    fn resume(&mut self) -> Result<()> {
        Ok(())
    }

    fn end(&mut self, _commit: bool) -> Result<()> {
        Ok(())
    }
}

impl TransactionCoordinator for NoTransaction {
    fn capture(&self) -> Box<dyn TransactionBridge> {
        Box::new(NoTransaction)
    }
}
