// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Weft server: startup wiring and operator command helpers.

pub mod output;
pub mod startup;
pub mod version;

pub use startup::{init_tracing, open_database, ServerContext};
