// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Shared application services for the edge gateway (config, host settings,
//! lifecycle events). Keeps the engine and its hosts storage-agnostic.

pub mod config;
pub mod events;
pub mod settings;
