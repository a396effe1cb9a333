//! Tapedeck - control engine for robotic LTO tape libraries
//!
//! This library models a rack enclosure containing a media changer, tape
//! drives and numbered storage slots, and orchestrates the external CLI
//! tools (`mtx`, `ltfs`, `ltfsck`, `mkltfs`, the Windows `LtfsCmd*`
//! wrappers) that move cartridges and mount LTFS filesystems.
//!
//! # High-Level API
//!
//! The [`engine`] module provides the facade most callers want:
//!
//! ```ignore
//! use tapedeck::engine::{Engine, EngineDeps};
//!
//! let engine = Engine::new(&config, EngineDeps::default());
//! engine.verify().await;
//!
//! // Load cartridge 000063L7 into drive 1 and mount it
//! let operation = engine.load("000063L7", 1).await;
//! println!("{} -> {}", operation.trace_id, operation.status);
//! ```
//!
//! Every long-running operation is addressable by trace id and carries an
//! incremental log, so HTTP callers can poll for progress.

pub mod config;
pub mod engine;
pub mod events;
pub mod library;
pub mod lock;
pub mod logging;
pub mod ltfs;
pub mod model;
pub mod parse;
pub mod process;
pub mod repo;

/// Version of the Tapedeck library and server.
///
/// This is synchronized across all components in the workspace.
/// The version is defined in `Cargo.toml` and injected at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
