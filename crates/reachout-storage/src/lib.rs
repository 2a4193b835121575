//! Rate-limited HTTP fetching, Google API auth and the spreadsheet-backed status log.

pub mod fetch;
pub mod google;
pub mod rate;
pub mod sheets;
pub mod status_log;

pub use fetch::{FetchError, FetchedPage, HttpClientConfig, HttpFetcher, RetryPolicy};
pub use google::{AuthError, RefreshTokenAuth, ServiceAccountAuth, TokenProvider};
pub use rate::{TokenBucket, TokenBucketConfig};
pub use sheets::{GoogleSheets, MemorySheets, RangeRef, SheetError, SheetStore};
pub use status_log::{SheetLayout, StatusLog, StatusUpdate};

pub const CRATE_NAME: &str = "reachout-storage";
