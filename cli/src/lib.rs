// Copyright (c) 2026 Gatehouse Contributors
// SPDX-License-Identifier: AGPL-3.0
//! Gatehouse CLI library - exposes testable components
//!
//! # Architecture
//!
//! - **Layer:** Interface / Presentation Layer
//! - **Purpose:** Maps subcommands onto core operations and renders results

pub mod commands;
pub mod gateway;
pub mod options;
pub mod output;
