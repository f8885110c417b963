//! DataJud remote lookups: wire types, the HTTP client and endpoint routing.

pub mod api_types;
pub mod client;
pub mod routing;
pub mod types;

pub use client::{DataJudClient, RemoteLookup};
pub use routing::Router;
