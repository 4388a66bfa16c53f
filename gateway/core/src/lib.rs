// Copyright (c) 2026 Gatehouse Contributors
// SPDX-License-Identifier: AGPL-3.0
//! Gatehouse core
//!
//! Validation, execution and build orchestration over a single container
//! daemon.
//!
//! # Architecture
//!
//! - **Domain:** requests, verdicts, faults, results, configuration and the
//!   daemon client port
//! - **Application:** the validation engine, operation core and build
//!   orchestrator
//! - **Infrastructure:** the daemon executor and the bollard adapter

pub mod domain;
pub mod application;
pub mod infrastructure;

pub use domain::*;
