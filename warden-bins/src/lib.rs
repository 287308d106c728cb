//! Shared code for the warden binaries

pub mod common;
