//! # Application Layer Network Protocols
//!
//! Application layer (OSI Layer 7) protocols built on the platform
//! [`Network`](crate::network::Network) and [`Tls`](crate::network::tls::Tls)
//! contracts.
//!
//! ## Available Protocols
//!
//! - **[`mqtt`]**: MQTT 3.1.1 session manager with QoS tracking, keep-alive
//!   and automatic reconnection
//!
//! ## Design Principles
//!
//! - **Non-blocking**: every wait is a named suspension point on socket
//!   readiness or a timer, driven by a single cooperative loop
//! - **No-std Compatible**: designed for embedded systems without heap allocation
//! - **Resource Conscious**: fixed-size buffers and tables with explicit
//!   out-of-memory reporting

/// MQTT session manager.
///
/// Connects to a broker over TLS, keeps the session alive and reconnects
/// with backoff after failures.
pub mod mqtt;
