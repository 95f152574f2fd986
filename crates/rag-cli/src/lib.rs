// SPDX-License-Identifier: MIT OR Apache-2.0
//! rag-cli
//!
//! Library-level command implementations for the `rag` binary, split out
//! so they can be exercised without spawning a process.

pub mod commands;
