pub mod config;
pub mod engine;
pub mod errors;
pub mod files;
pub mod paths;
pub mod protocol;
pub mod session;
pub mod transfer;

pub use config::SessionConfig;
pub use errors::{ErrorKind, SftpError};
pub use files::{DirEntry, EntryKind, Rights};
pub use session::{RmdirOptions, Session};
pub use transfer::{TransferOptions, TransferSummary};
