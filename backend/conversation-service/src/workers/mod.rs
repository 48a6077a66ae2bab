pub mod receipt_cleanup;

pub use receipt_cleanup::{start_receipt_cleanup, ReceiptCleanupConfig};
