//! Event types for the GeoKey mutation stream
//!
//! Provides the shared [`ChangeEvent`] payload and [`EventBus`] used to fan
//! mutations out to in-process subscribers. The audit log persists every
//! event it is handed; the bus re-broadcast exists for live consumers and
//! never blocks the mutating request.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Kind of entity a mutation acted on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntityKind {
    Project,
    Admin,
    UserGroup,
    Subset,
    Category,
    Field,
    Observation,
    Comment,
    MediaFile,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Project => "Project",
            EntityKind::Admin => "Admin",
            EntityKind::UserGroup => "UserGroup",
            EntityKind::Subset => "Subset",
            EntityKind::Category => "Category",
            EntityKind::Field => "Field",
            EntityKind::Observation => "Observation",
            EntityKind::Comment => "Comment",
            EntityKind::MediaFile => "MediaFile",
        }
    }
}

/// What happened to the entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeAction {
    Created,
    Updated,
    Deleted,
}

impl ChangeAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeAction::Created => "created",
            ChangeAction::Updated => "updated",
            ChangeAction::Deleted => "deleted",
        }
    }
}

/// Denormalised reference to an involved entity.
///
/// Audit entries must stay readable after the referenced row is gone, so the
/// display name is captured at event time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRef {
    pub id: Uuid,
    pub name: String,
}

impl EntityRef {
    pub fn new(id: Uuid, name: impl Into<String>) -> Self {
        EntityRef {
            id,
            name: name.into(),
        }
    }
}

/// The user who performed the mutation. `None` for background jobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorRef {
    pub id: Uuid,
    pub display_name: String,
}

impl ActorRef {
    pub fn new(id: Uuid, display_name: impl Into<String>) -> Self {
        ActorRef {
            id,
            display_name: display_name.into(),
        }
    }
}

/// Pointer to the pre-change snapshot for entities that keep history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoricalRef {
    pub class: String,
    pub id: Uuid,
}

impl HistoricalRef {
    pub fn observation(id: Uuid) -> Self {
        HistoricalRef {
            class: EntityKind::Observation.as_str().to_string(),
            id,
        }
    }
}

/// One mutation on an audited entity.
///
/// Every component that mutates state publishes exactly one `ChangeEvent`
/// per committed change. References that do not apply to the mutated entity
/// stay `None`; the ones that do are filled in by the caller before the
/// event is recorded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub timestamp: DateTime<Utc>,
    pub action: ChangeAction,
    /// Class of the entity the action applied to.
    pub kind: EntityKind,
    pub actor: Option<ActorRef>,

    pub project: Option<EntityRef>,
    pub usergroup: Option<EntityRef>,
    pub subset: Option<EntityRef>,
    pub category: Option<EntityRef>,
    pub field: Option<EntityRef>,
    pub observation: Option<EntityRef>,
    pub comment: Option<EntityRef>,
    pub media_file: Option<EntityRef>,

    /// Changed attribute name, for updates. Deletions record `status`.
    pub changed_field: Option<String>,
    /// New value of the changed attribute. Deletions record `deleted`.
    pub changed_value: Option<String>,
    /// Sub-action qualifier, e.g. `respond` for comment responses.
    pub subaction: Option<String>,

    pub historical: Option<HistoricalRef>,
}

impl ChangeEvent {
    /// New event with the action/kind pair set and everything else empty.
    pub fn new(action: ChangeAction, kind: EntityKind) -> Self {
        ChangeEvent {
            timestamp: Utc::now(),
            action,
            kind,
            actor: None,
            project: None,
            usergroup: None,
            subset: None,
            category: None,
            field: None,
            observation: None,
            comment: None,
            media_file: None,
            changed_field: None,
            changed_value: None,
            subaction: None,
            historical: None,
        }
    }

    /// Deletion event carrying the conventional `status = deleted` payload.
    pub fn deletion(kind: EntityKind) -> Self {
        let mut event = ChangeEvent::new(ChangeAction::Deleted, kind);
        event.changed_field = Some("status".to_string());
        event.changed_value = Some("deleted".to_string());
        event
    }
}

/// Broadcast bus for [`ChangeEvent`]s.
///
/// Thin wrapper around `tokio::sync::broadcast`. Subscribers receive all
/// events emitted after they subscribe; slow subscribers lose the oldest
/// buffered events rather than applying backpressure to writers.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ChangeEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events.
    ///
    /// Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers.
    ///
    /// Returns `Ok(subscriber_count)` if at least one subscriber exists,
    /// `Err` otherwise.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: ChangeEvent,
    ) -> Result<usize, broadcast::error::SendError<ChangeEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring whether anyone is listening.
    ///
    /// Mutation paths use this: a missing subscriber must never fail the
    /// request that produced the event.
    pub fn emit_lossy(&self, event: ChangeEvent) {
        let _ = self.tx.send(event);
    }

    /// Current number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Configured channel capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emit_lossy_without_subscribers_is_silent() {
        let bus = EventBus::new(8);
        bus.emit_lossy(ChangeEvent::new(ChangeAction::Created, EntityKind::Project));
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn subscribers_receive_emitted_events() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();

        let mut event = ChangeEvent::new(ChangeAction::Updated, EntityKind::Observation);
        event.changed_field = Some("status".to_string());
        event.changed_value = Some("active".to_string());
        let sent = bus.emit(event).expect("one subscriber");
        assert_eq!(sent, 1);

        let received = rx.recv().await.expect("event");
        assert_eq!(received.action, ChangeAction::Updated);
        assert_eq!(received.kind, EntityKind::Observation);
        assert_eq!(received.changed_value.as_deref(), Some("active"));
    }

    #[test]
    fn deletion_payload_is_conventional() {
        let event = ChangeEvent::deletion(EntityKind::Comment);
        assert_eq!(event.action, ChangeAction::Deleted);
        assert_eq!(event.changed_field.as_deref(), Some("status"));
        assert_eq!(event.changed_value.as_deref(), Some("deleted"));
    }

    #[test]
    fn refs_serialize_with_id_and_name() {
        let reference = EntityRef::new(Uuid::nil(), "Tree survey");
        let json = serde_json::to_value(&reference).expect("serialize");
        assert_eq!(json["name"], "Tree survey");
        assert_eq!(json["id"], "00000000-0000-0000-0000-000000000000");
    }
}
