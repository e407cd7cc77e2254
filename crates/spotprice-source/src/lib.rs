//! spotprice-source — where spot prices come from.
//!
//! Defines the [`PriceSource`] contract the collector drives and its EC2
//! implementation.
//!
//! # Architecture
//!
//! ```text
//! PriceSource (trait)
//!   ├── list_regions()          → regions minus excluded prefixes
//!   └── fetch_price_history()   → one page + continuation token
//!
//! Ec2Client
//!   ├── credentials — env / profile / container / instance-role chain
//!   ├── sigv4   — request signing
//!   ├── xml     — response / error document decoding
//!   └── reqwest — transport
//! ```

pub mod credentials;
pub mod ec2;
pub mod error;
pub mod sigv4;
pub mod source;
mod xml;

pub use ec2::{Ec2Client, Ec2Settings};
pub use error::{SourceError, SourceResult};
pub use credentials::{Credentials, CredentialsProvider};
pub use source::{HistoryQuery, PricePage, PriceSource, RegionFilter};
