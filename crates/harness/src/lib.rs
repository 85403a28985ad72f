//! Test fixtures for the reconciliation engine: an end-to-end bench that
//! plays both the template owner and customizing organizations over a real
//! sqlite store, plus a fault-injecting store wrapper.

pub mod bench;
pub mod faults;

pub use bench::{RecordingNotifier, TestBench};
pub use faults::FaultyStore;
