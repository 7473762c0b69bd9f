//! JSON/HTTP transport collaborator (§11).
//!
//! Exposes workflow deployment and execution lifecycle management over
//! plain JSON, the way the real service's REST surface fronts the same
//! operations the binary RPC trait ([`crate::rpc`]) exposes.

pub mod http;

pub use http::serve;
