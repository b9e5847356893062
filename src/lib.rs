//! proxtrace library: duty-cycled proximity detection between radio nodes.
//!
//! Every node periodically broadcasts a short announcement in a sparse set
//! of time slots and listens in the same slots. Peers heard above an RSSI
//! threshold for long enough are reported as `detect`; peers silent for long
//! enough afterwards are reported as `absent`. The slot schemes guarantee any
//! two nodes share at least one active slot per cycle without clock sync.
//!
//! This crate contains the scheduler, neighbor table, presence state machine
//! and companion protocol with no platform dependencies, testable on any host
//! with `cargo test`. Platform binaries (Embassy firmware in `src/main.rs`,
//! ESP-IDF firmware in `firmware-std/`) are thin consumers that provide the
//! radio, the clock and the serial sink.
//!
//! Layers, bottom up:
//! - `time`, `packet`, `defaults`, `config`: shared vocabulary.
//! - `schedule`: which slots are active, burst and radio-hold decisions.
//! - `table`, `proximity`: per-peer state and its transitions.
//! - `node`: the per-node protocol state hosts drive.
//! - `protocol`, `comm`, `board`: companion NDJSON and board constants.

#![cfg_attr(not(test), no_std)]

pub mod board;
pub mod comm;
pub mod config;
pub mod defaults;
pub mod node;
pub mod packet;
pub mod protocol;
pub mod proximity;
pub mod schedule;
pub mod table;
pub mod time;
