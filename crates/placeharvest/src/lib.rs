// Copyright 2026 Placeharvest Contributors
// SPDX-License-Identifier: Apache-2.0

//! placeharvest: adaptive multi-strategy extraction of business listings
//! from map place pages.
//!
//! Given a stream of discovered place identifiers, the [`pipeline`]
//! deduplicates them, admits each into a bounded pool of proxy/session
//! identities, and lets the [`coordinator`] pick the cheapest strategy that
//! yields a named record: structured data from a plain fetch, selector
//! probes over the same fetch, or a full browser render.

pub mod acquisition;
pub mod config;
pub mod coordinator;
pub mod dedup;
pub mod error;
pub mod extraction;
pub mod pipeline;
pub mod pool;
pub mod record;
pub mod renderer;
pub mod stealth;
