// Copyright (c) 2025 - Cowboy AI, Inc.
//! Property-Based Tests Module
//!
//! Properties of the pure parts of the engine: status classification, the
//! stack phase machine, template resolution and the identifiers derived for
//! bindings.

mod classification;
mod resolution;
