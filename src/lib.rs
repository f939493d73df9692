//! # libiot-connect - MQTT device SDK
//!
//! A non-blocking MQTT 3.1.1 session manager that connects constrained IoT
//! devices to cloud brokers over TLS. It runs on a single thread, allocates
//! nothing on the heap and works in `no_std` environments.
//!
//! ## Features
//!
//! ### Connection management
//! - Socket connect, TLS handshake and CONNECT/CONNACK driven by one event loop
//! - Keep-alive with PINGREQ/PINGRESP and a response deadline
//! - Automatic reconnection with exponential backoff and jitter
//!
//! ### Messaging
//! - Publish at QoS 0, 1 and 2 with retransmission and completion callbacks
//! - Subscriptions with `+`/`#` wildcards and per-filter callbacks
//! - Exactly-once inbound delivery for QoS 2
//!
//! ### Platform abstraction
//! - [`network::Network`]: non-blocking sockets and readiness
//! - [`network::tls::Tls`]: TLS session primitives
//! - [`storage::FileSystem`]: resource store for CA certificates
//! - [`system::Clock`] and [`system::Rng`]: time and jitter
//!
//! ### Timed tasks
//! - One-shot and repeating callbacks run by the same loop
//!
//! ## Usage
//!
//! Add this to your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! libiot-connect = "0.1.0"
//! ```
//!
//! ### Connecting and publishing
//!
//! ```rust,ignore
//! use libiot_connect::config::{ConnectionConfig, SessionConfig};
//! use libiot_connect::network::application::mqtt::{ConnectionState, Context, QoS};
//!
//! fn on_state(ctx: &mut Context<Board, ()>, state: ConnectionState, result: libiot_connect::Result<()>) {
//!     if state == ConnectionState::Opened {
//!         let _ = ctx.publish("devices/dev-1/state", b"online", QoS::AtLeastOnce, true, None);
//!     }
//! }
//!
//! let mut ctx = Context::new(bsp, SessionConfig::default(), ())?;
//! ctx.open(ConnectionConfig::new("mqtt.example.com", 8883, "dev-1")?, Some(on_state))?;
//! loop {
//!     ctx.process_tick()?;
//! }
//! ```
//!
//! ## Platform Support
//!
//! This library is designed to work on:
//! - Embedded microcontrollers (ARM Cortex-M, RISC-V, etc.)
//! - Linux-based IoT devices (Raspberry Pi, etc.)
//! - Any platform supporting Rust's `core` library
//!
//! ## Optional Features
//!
//! - `std`: Enable standard library support (default: disabled)
//! - `defmt`: Route logging through defmt instead of the `log` facade

#![cfg_attr(not(feature = "std"), no_std)]
#![deny(missing_docs)]
#![warn(missing_debug_implementations)]
#![doc(html_root_url = "https://shishir-dey.github.io/libiot/")]

#[macro_use]
mod fmt;

/// Connection parameters and session tunables.
pub mod config;

/// Base64url helpers and JWT creation for broker authentication.
pub mod crypto;

/// Crate-wide error type.
pub mod error;

/// Network abstraction layer: the socket and TLS contracts and the MQTT
/// session manager built on them.
pub mod network;

/// Board support package bundle.
pub mod platform;

/// Resource store abstraction for certificates and provisioning records.
pub mod storage;

/// Clock, entropy and the timed task scheduler.
pub mod system;

pub use error::{Error, Result};
