// SPDX-FileCopyrightText: 2026 Fairway Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Collaborator contracts.
//!
//! Both traits use `#[async_trait]` so they can be held as trait objects.

pub mod auth;
pub mod store;

pub use auth::{AuthProvider, StaticAuth};
pub use store::MessageStore;
