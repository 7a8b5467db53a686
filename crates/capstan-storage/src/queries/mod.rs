// SPDX-FileCopyrightText: 2026 Capstan Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Typed queries, one module per table group.

pub mod audit;
pub mod installations;
pub mod runs;
pub mod skills;
