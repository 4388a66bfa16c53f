// Copyright (c) 2026 Gatehouse Contributors
// SPDX-License-Identifier: AGPL-3.0

pub mod build;
pub mod compose;
pub mod operations;
pub mod streaming;
pub mod validation;
