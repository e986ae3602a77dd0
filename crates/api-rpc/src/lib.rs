//! JSON-RPC API Layer
//!
//! Exposes the Dispatcher and maintenance operations as versioned
//! JSON-RPC 2.0 methods (`jobs.*.v1`, `schedules.*.v1`, `admin.*.v1`).

pub mod error;
pub mod handler;
pub mod server;
pub mod types;

pub use server::{RpcServer, RpcServerConfig};
