//! quay - an ingress control plane for containerized services.
//!
//! quay accepts route declarations (public hostnames and a port mapped to
//! backend `host:port` endpoints), persists them, and keeps an nginx
//! frontend's configuration directory in step with the stored set. The same
//! listener that serves the JSON control API also hijacks every other HTTP
//! connection and tunnels it byte for byte to the container engine socket.
//!
//! # Architecture
//! The crate separates **ports** (traits) from **adapters** (implementations)
//! while keeping business logic inside `core`:
//! - [`core::router`] is a segment trie dispatching `(verb, path)` pairs with
//!   wildcard captures.
//! - [`core::control::ControlPlane`] saves every mutation, then reconciles the
//!   frontend from a full store snapshot.
//! - [`ports::RouteStore`] is implemented by [`adapters::SledRouteStore`]
//!   (durable) and [`adapters::MemoryRouteStore`].
//! - [`ports::Frontend`] is implemented by [`adapters::NginxFrontend`] (writes
//!   files and signals the proxy) and [`adapters::ConfigWriter`] (files only).
//! - [`adapters::IngressListener`] classifies connections by their first
//!   request path and drives the API or the passthrough tunnel.
//!
//! # Quick Example
//! ```no_run
//! use std::sync::Arc;
//!
//! use quay::{
//!     adapters::{ApiHandler, ConfigWriter, IngressListener, Passthrough, SledRouteStore},
//!     core::ControlPlane,
//!     utils::GracefulShutdown,
//! };
//!
//! # #[tokio::main] async fn main() -> eyre::Result<()> {
//! let store = Arc::new(SledRouteStore::open("routes.db")?);
//! let frontend = Arc::new(ConfigWriter::new("/etc/nginx/conf.d"));
//! let control = Arc::new(ControlPlane::new(store, frontend));
//! control.reconcile().await?;
//!
//! let api = Arc::new(ApiHandler::new(control, "/api/"));
//! let passthrough = Passthrough::new("/var/run/docker.sock".parse().map_err(eyre::Report::msg)?);
//! let listener = IngressListener::bind("0.0.0.0:6660", api, passthrough, "/api/").await?;
//!
//! let shutdown = GracefulShutdown::new();
//! listener.run(shutdown.shutdown_token()).await?;
//! # Ok(()) }
//! ```
//!
//! # Error Handling
//! Each port has its own `thiserror` enum; application plumbing returns
//! `eyre::Result<T>` with `WrapErr` context attached.
pub mod config;
pub mod ports;
pub mod tracing_setup;
pub mod utils;

pub mod adapters;
pub mod core;

// Re-export the specific types needed by the binary crate
pub use crate::{
    adapters::{ApiHandler, IngressListener},
    core::{ControlPlane, Route},
    utils::GracefulShutdown,
};
