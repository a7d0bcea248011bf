//! Small cross-cutting helpers used by the proxy and pipeline layers.

pub mod path;

pub use path::join_url;
