//! safesend-core: types shared by the broker daemon and the client
//!
//! - `config`: TOML configuration schema for both binaries
//! - `error`: the error taxonomy every crate reports through
//! - `types`: object locators, access grants and broker response bodies
//! - `link`: the shareable link format (the durable user-facing contract)

pub mod config;
pub mod error;
pub mod link;
pub mod types;

pub use error::{SafesendError, SafesendResult};
pub use link::{compose_link, parse_link, LinkParts};
pub use types::{AccessGrant, GrantOp, ObjectLocator};

/// Lifetime of every access grant, in seconds. Not configurable.
pub const GRANT_TTL_SECS: u64 = 300;
