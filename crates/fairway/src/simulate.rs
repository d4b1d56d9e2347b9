// SPDX-FileCopyrightText: 2026 Fairway Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Scripted session against the in-memory store.
//!
//! Drives one user through history load, a duplicated and reordered realtime
//! burst, an edit, a message in another conversation, a send, and a
//! background/foreground cycle. Time comes from an auto-advancing
//! [`ManualClock`], so runs are reproducible.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::DateTime;
use fairway_bus::{EngineEvent, Envelope, EventReceiver};
use fairway_config::FairwayConfig;
use fairway_core::{
    Clock, ConversationId, FairwayError, HealthStatus, ManualClock, Message, MessageEvent,
    MessageId, MessageStore, StaticAuth, Timestamp, UserId, Visibility,
};
use fairway_store::MemoryStore;
use fairway_sync::ConversationController;
use serde::Serialize;
use tracing::info;

/// Fixed start so repeated runs produce the same timestamps.
const START_SECS: i64 = 1_700_000_000;

/// What the session ended with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SimulationReport {
    pub user: String,
    pub conversation: String,
    /// Message ids of the open timeline, oldest first.
    pub timeline: Vec<String>,
    pub rendered: usize,
    pub updated: usize,
    /// Badges for conversations that were not open, keyed by conversation id.
    pub badges: BTreeMap<String, u64>,
    pub total_unread: u64,
    pub refreshed: usize,
    pub health: String,
}

impl SimulationReport {
    pub fn summary(&self) -> String {
        let badges: u64 = self.badges.values().sum();
        format!(
            "timeline={} rendered={} updated={} badges={} total_unread={} refreshed={} health={}",
            self.timeline.len(),
            self.rendered,
            self.updated,
            badges,
            self.total_unread,
            self.refreshed,
            self.health
        )
    }
}

fn at(secs: i64) -> Result<Timestamp, FairwayError> {
    DateTime::from_timestamp(START_SECS + secs, 0)
        .ok_or_else(|| FairwayError::Internal(format!("timestamp offset {secs} out of range")))
}

fn message(
    conversation: &ConversationId,
    id: &str,
    sender: &UserId,
    body: &str,
    created_at: Timestamp,
) -> Message {
    Message {
        id: MessageId::from(id),
        conversation_id: conversation.clone(),
        sender_id: sender.clone(),
        body: body.to_string(),
        created_at,
        edited_at: None,
        deleted: false,
    }
}

fn health_label(status: &HealthStatus) -> String {
    match status {
        HealthStatus::Healthy => "healthy".to_string(),
        HealthStatus::Degraded(reason) => format!("degraded ({reason})"),
        HealthStatus::Unhealthy(reason) => format!("unhealthy ({reason})"),
    }
}

/// Totals gathered while the controller was still running.
struct Outcome {
    total_unread: u64,
    refreshed: usize,
    health: String,
    timeline: Vec<String>,
    side_badge: u64,
}

/// Tallies events and forwards each envelope to the caller.
struct Recorder<'a> {
    events: EventReceiver,
    sink: &'a mut dyn FnMut(&Envelope),
    rendered: usize,
    updated: usize,
}

impl Recorder<'_> {
    async fn flush(&mut self, controller: &ConversationController) {
        controller.settle().await;
        while let Some(envelope) = self.events.try_recv() {
            match envelope.event {
                EngineEvent::MessageRendered { .. } => self.rendered += 1,
                EngineEvent::MessageUpdated { .. } => self.updated += 1,
                _ => {}
            }
            (self.sink)(&envelope);
        }
    }
}

/// Run the scripted session. `sink` sees every published event in order.
pub async fn run(
    mut config: FairwayConfig,
    sink: &mut dyn FnMut(&Envelope),
) -> Result<SimulationReport, FairwayError> {
    // Simulated cursors never touch the device cache on disk, and the
    // auto-advancing clock would keep a watchdog ticking forever.
    config.storage.cache_path = None;
    config.watchdog.enabled = false;

    let clock = Arc::new(ManualClock::new(at(0)?));
    let memory = MemoryStore::new(clock.clone());
    let alice = UserId::from("alice");
    let bob = UserId::from("bob");
    let carol = UserId::from("carol");

    let room = memory.create_direct(&alice, &bob)?.id;
    let side = memory.create_direct(&alice, &carol)?.id;
    memory.import(message(&room, "h1", &bob, "morning", at(-300)?))?;
    memory.import(message(&room, "h2", &alice, "hey bob", at(-200)?))?;
    memory.import(message(&room, "h3", &bob, "tee time at nine?", at(-100)?))?;
    memory.import(message(&side, "s1", &carol, "lunch after?", at(-250)?))?;

    let store: Arc<dyn MessageStore> = Arc::new(memory.clone());
    let controller =
        ConversationController::builder(store.clone(), Arc::new(StaticAuth::signed_in("alice")))
            .config(config)
            .clock(clock.clone())
            .build()
            .await?;
    let mut recorder = Recorder {
        events: controller.events(),
        sink,
        rendered: 0,
        updated: 0,
    };

    let session = Session {
        controller: &controller,
        memory: &memory,
        store: store.as_ref(),
        clock: clock.as_ref(),
        room: &room,
        side: &side,
    };
    let result = session.play(&mut recorder).await;
    controller.shutdown().await;
    let outcome = result?;

    let report = SimulationReport {
        user: alice.to_string(),
        conversation: room.to_string(),
        timeline: outcome.timeline,
        rendered: recorder.rendered,
        updated: recorder.updated,
        badges: BTreeMap::from([(side.to_string(), outcome.side_badge)]),
        total_unread: outcome.total_unread,
        refreshed: outcome.refreshed,
        health: outcome.health,
    };
    info!(summary = %report.summary(), "simulation finished");
    Ok(report)
}

struct Session<'a> {
    controller: &'a ConversationController,
    memory: &'a MemoryStore,
    store: &'a dyn MessageStore,
    clock: &'a ManualClock,
    room: &'a ConversationId,
    side: &'a ConversationId,
}

impl Session<'_> {
    async fn play(&self, recorder: &mut Recorder<'_>) -> Result<Outcome, FairwayError> {
        let (controller, memory, room) = (self.controller, self.memory, self.room);
        let bob = UserId::from("bob");
        let carol = UserId::from("carol");

        controller.start_global().await?;
        controller.open_conversation(room).await?;
        recorder.flush(controller).await;

        // Later message first, then a redelivery of it.
        let r5 = message(room, "r5", &bob, "I'll bring the cart", at(-40)?);
        memory.import(r5.clone())?;
        memory.import(message(room, "r4", &bob, "nine works", at(-50)?))?;
        memory.inject(MessageEvent::Insert(r5));
        memory.edit_message(&MessageId::from("h3"), "tee time at half nine?")?;
        recorder.flush(controller).await;

        self.store
            .insert(self.side, &carol, "are you around?")
            .await?;
        recorder.flush(controller).await;

        controller.send_current("on my way").await?;
        recorder.flush(controller).await;

        controller.set_visibility(Visibility::Background).await?;
        let later = self.clock.now() + chrono::Duration::seconds(1);
        memory.import(message(room, "r6", &bob, "see you there", later))?;
        recorder.flush(controller).await;
        controller.set_visibility(Visibility::Foreground).await?;
        recorder.flush(controller).await;

        let refreshed = controller.refresh().await?.messages().len();
        let total_unread = controller.total_unread().await?;
        recorder.flush(controller).await;

        Ok(Outcome {
            total_unread,
            refreshed,
            health: health_label(&controller.health()),
            timeline: controller.timeline().into_iter().map(|m| m.id.0).collect(),
            side_badge: controller.badge_count(self.side),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn session_renders_each_message_once_in_order() {
        let mut seen = Vec::new();
        let report = run(FairwayConfig::default(), &mut |e: &Envelope| seen.push(e.clone()))
            .await
            .unwrap();

        assert_eq!(&report.timeline[..5], ["h1", "h2", "h3", "r4", "r5"]);
        assert_eq!(report.timeline.last().map(String::as_str), Some("r6"));
        assert_eq!(report.timeline.len(), 7);
        assert_eq!(report.rendered, 7);
        assert_eq!(report.updated, 1);
        assert_eq!(report.health, "healthy");

        let rendered = seen
            .iter()
            .filter(|e| matches!(e.event, EngineEvent::MessageRendered { .. }))
            .count();
        assert_eq!(rendered, report.rendered);
    }

    #[tokio::test]
    async fn other_conversation_keeps_its_badge() {
        let report = run(FairwayConfig::default(), &mut |_: &Envelope| {})
            .await
            .unwrap();
        let side_badge = report
            .badges
            .values()
            .copied()
            .next()
            .unwrap_or_default();
        assert!(side_badge >= 1, "carol's message should be counted");
        assert!(report.total_unread >= 1);
    }

    #[test]
    fn summary_lists_the_counters() {
        let report = SimulationReport {
            user: "alice".into(),
            conversation: "dm-1".into(),
            timeline: vec!["h1".into()],
            rendered: 1,
            updated: 0,
            badges: BTreeMap::from([("dm-2".to_string(), 2)]),
            total_unread: 2,
            refreshed: 0,
            health: "healthy".into(),
        };
        assert_eq!(
            report.summary(),
            "timeline=1 rendered=1 updated=0 badges=2 total_unread=2 refreshed=0 health=healthy"
        );
    }
}
