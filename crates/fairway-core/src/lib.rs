// SPDX-FileCopyrightText: 2026 Fairway Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Core library for the Fairway conversation sync engine.
//!
//! This crate provides the error type, domain types, push-channel handle and
//! collaborator traits shared by the store backends and the sync engine.

pub mod channel;
pub mod clock;
pub mod error;
pub mod traits;
pub mod types;

// Re-export key items at crate root for ergonomic imports.
pub use channel::{ChannelFeed, ChannelScope, ChannelSignal, ConnectivityState, PushChannel};
pub use clock::{Clock, ManualClock, SystemClock, span};
pub use error::FairwayError;
pub use traits::{AuthProvider, MessageStore, StaticAuth};
pub use types::{
    BackfillReason, Conversation, ConversationId, ConversationKind, HealthStatus,
    MembershipStatus, Message, MessageEvent, MessageId, Timestamp, UnreadCounts, UserId,
    Visibility,
};

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn connectivity_states_round_trip_through_strings() {
        let states = [
            ConnectivityState::Pending,
            ConnectivityState::Active,
            ConnectivityState::Erroring,
            ConnectivityState::Closed,
        ];
        for state in states {
            let parsed = ConnectivityState::from_str(&state.to_string()).expect("should parse back");
            assert_eq!(state, parsed);
        }
    }

    #[test]
    fn collaborator_traits_are_object_safe() {
        let _store: Option<&dyn MessageStore> = None;
        let _auth: Option<&dyn AuthProvider> = None;
        let _clock: Option<&dyn Clock> = None;
    }
}
