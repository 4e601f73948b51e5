mod lock_manager;
mod transaction;
mod transaction_manager;

pub use lock_manager::{LockDataId, LockManager, LockMode};
pub use transaction::{Transaction, TxnId, TxnState, WriteRecord};
pub use transaction_manager::TransactionManager;
