//! Library crate for web-sweep: random IPv4 web server discovery.
pub mod address;
pub mod config;
pub mod error;
pub mod filter;
pub mod prober;
pub mod results;
pub mod scanner;
pub mod types;

pub use config::ScanConfig;
pub use error::ScanError;
pub use prober::{HttpProber, Prober};
pub use scanner::{ScanCoordinator, ScanEvent};
