// SPDX-FileCopyrightText: 2026 Fairway Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Identity resolution.

use async_trait::async_trait;

use crate::error::FairwayError;
use crate::types::UserId;

/// Resolves the signed-in user.
#[async_trait]
pub trait AuthProvider: Send + Sync + 'static {
    /// The current user, or `None` when nobody is signed in.
    async fn current_user(&self) -> Result<Option<UserId>, FairwayError>;
}

/// Provider returning a fixed identity. Used by the binary and tests.
#[derive(Debug, Clone)]
pub struct StaticAuth(pub Option<UserId>);

impl StaticAuth {
    pub fn signed_in(user: impl Into<UserId>) -> Self {
        Self(Some(user.into()))
    }

    pub fn anonymous() -> Self {
        Self(None)
    }
}

#[async_trait]
impl AuthProvider for StaticAuth {
    async fn current_user(&self) -> Result<Option<UserId>, FairwayError> {
        Ok(self.0.clone())
    }
}
