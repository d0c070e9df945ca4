//! Path utilities for the gateway routes
//!
//! Single source of truth for the prefixes the reverse proxy strips before
//! forwarding.

mod path;

pub use path::{cluster_prefix, resource_cluster_prefix, reverse_proxy_prefix, upstream_path};
