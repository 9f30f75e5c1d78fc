//! Proxy Grid: a secondary API surface proxying an external data provider
//! (search, social, web content) through a TTL cache with stale-on-error
//! reads.
//!
//! The whole subsystem is disabled unless the config carries an https base
//! URL and a non-empty shared secret; [`grid_router`] then declines to
//! register routes and logs why.

mod cache;
mod catalog;
mod client;
mod handlers;

pub use cache::{CacheLookup, CachedArtifact, GridCache};
pub use catalog::GridService;
pub use client::{GridClient, GridError};
pub use handlers::{grid_router, GridFetch, GridRuntime};
