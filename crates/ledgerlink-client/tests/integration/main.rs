//! Integration test entry point for ledgerlink-client.
//!
//! Nodes run in-process on loopback. QUIC nodes need the TLS port, so each
//! QUIC test binds its own 127.0.0.x address.
//!
//! Run with: cargo test --test integration

mod harness;
mod execution;
mod tls_pinning;
