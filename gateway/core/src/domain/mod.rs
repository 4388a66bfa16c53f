// Copyright (c) 2026 Gatehouse Contributors
// SPDX-License-Identifier: AGPL-3.0

pub mod build;
pub mod compose;
pub mod config;
pub mod daemon;
pub mod fault;
pub mod operation;
pub mod path_sanitizer;
pub mod policy;
pub mod project;
pub mod request;
pub mod result;
