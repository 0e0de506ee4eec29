mod error;
mod memory;
mod record;
mod traits;

pub mod conformance;

pub use error::StorageError;
pub use memory::{MemoryCertificateStore, MemoryTestRecordStore, MemoryTokenStore};
pub use record::{redact_token, ApprovalTokenRecord, CertificateUpdate};
pub use traits::{CertificateStore, TestRecordStore, TokenStore};
