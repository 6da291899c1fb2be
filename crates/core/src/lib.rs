//! Rate Oracle Core Library
//!
//! Shared plumbing for the rate oracle service:
//! - Configuration file discovery (XDG-compliant) and TOML loading
//! - File system utilities
//! - Application-wide defaults

mod config;
pub mod fs;

pub use config::{find_config_file, load_config, ConfigSource};
pub use fs::create_dir_all;

/// Application name used for XDG paths
pub const APP_NAME: &str = "rate-oracle";

/// Default HTTP port
pub const DEFAULT_PORT: u16 = 8080;

/// Default daily refresh time, `HH:MM` in the reference offset
pub const DEFAULT_REFRESH_AT: &str = "06:30";

/// Reference UTC offset used to decide which calendar day a sample belongs to
pub const DEFAULT_UTC_OFFSET: &str = "-04:00";

/// Page the published rate is read from
pub const DEFAULT_SOURCE_URL: &str = "https://www.bcv.org.ve/";

/// `id` attribute of the element that carries the rate on the source page
pub const DEFAULT_SOURCE_ELEMENT: &str = "dolar";

/// Default upper bound for a single fetch, in seconds
pub const DEFAULT_FETCH_TIMEOUT: u64 = 10;
