//! Sync Events
//!
//! Events generated by the authoritative state machines. The session turns
//! them into targeted messages (cuff UI, forced facing) or logs them;
//! broadcast state goes through replication instead.

use serde::{Serialize, Deserialize};
use crate::core::grid::{Direction, GridVec};
use crate::game::state::{EntityId, Stance};

/// Priority for event processing order.
///
/// Lower value = processed first.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum EventPriority {
    /// Authoritative state transitions first
    StateChange = 0,
    /// Then presentation (stance, facing, UI toggles)
    Presentation = 1,
    /// Then movement
    Movement = 2,
    /// Lowest priority
    Other = 255,
}

/// Sync event data.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncEventData {
    /// Restraint flag changed
    RestraintChanged {
        entity: EntityId,
        old: bool,
        new: bool,
    },

    /// Cuff UI toggle for the restrained entity's own client
    CuffUiToggled {
        entity: EntityId,
        visible: bool,
    },

    /// Attachment target changed
    AttachmentChanged {
        entity: EntityId,
        old: Option<EntityId>,
        new: Option<EntityId>,
    },

    /// Stance changed
    StanceChanged {
        entity: EntityId,
        stance: Stance,
    },

    /// Facing pushed to the owning client, overriding its prediction
    FacingForced {
        entity: EntityId,
        facing: Direction,
    },

    /// Server swappability flag changed
    SwappableChanged {
        entity: EntityId,
        swappable: bool,
    },

    /// Entity stepped
    Moved {
        entity: EntityId,
        from: GridVec,
        to: GridVec,
    },

    /// Incapacitated entity pressed a movement key
    GhostRequested {
        entity: EntityId,
    },

    /// Entity removed from the simulation
    Despawned {
        entity: EntityId,
    },
}

impl SyncEventData {
    /// Entity the event is about.
    pub fn entity(&self) -> EntityId {
        match self {
            SyncEventData::RestraintChanged { entity, .. }
            | SyncEventData::CuffUiToggled { entity, .. }
            | SyncEventData::AttachmentChanged { entity, .. }
            | SyncEventData::StanceChanged { entity, .. }
            | SyncEventData::FacingForced { entity, .. }
            | SyncEventData::SwappableChanged { entity, .. }
            | SyncEventData::Moved { entity, .. }
            | SyncEventData::GhostRequested { entity }
            | SyncEventData::Despawned { entity } => *entity,
        }
    }
}

/// A sync event with timing and priority.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SyncEvent {
    /// Tick when event occurred
    pub tick: u32,

    /// Processing priority
    pub priority: EventPriority,

    /// Entity involved (for tie-breaking)
    pub entity: EntityId,

    /// Event data
    pub data: SyncEventData,
}

impl SyncEvent {
    /// Create a new event.
    pub fn new(tick: u32, priority: EventPriority, data: SyncEventData) -> Self {
        Self {
            tick,
            priority,
            entity: data.entity(),
            data,
        }
    }

    /// Create restraint changed event.
    pub fn restraint_changed(tick: u32, entity: EntityId, old: bool, new: bool) -> Self {
        Self::new(
            tick,
            EventPriority::StateChange,
            SyncEventData::RestraintChanged { entity, old, new },
        )
    }

    /// Create cuff UI toggle event.
    pub fn cuff_ui(tick: u32, entity: EntityId, visible: bool) -> Self {
        Self::new(
            tick,
            EventPriority::Presentation,
            SyncEventData::CuffUiToggled { entity, visible },
        )
    }

    /// Create attachment changed event.
    pub fn attachment_changed(
        tick: u32,
        entity: EntityId,
        old: Option<EntityId>,
        new: Option<EntityId>,
    ) -> Self {
        Self::new(
            tick,
            EventPriority::StateChange,
            SyncEventData::AttachmentChanged { entity, old, new },
        )
    }

    /// Create stance changed event.
    pub fn stance_changed(tick: u32, entity: EntityId, stance: Stance) -> Self {
        Self::new(
            tick,
            EventPriority::Presentation,
            SyncEventData::StanceChanged { entity, stance },
        )
    }

    /// Create forced facing event.
    pub fn facing_forced(tick: u32, entity: EntityId, facing: Direction) -> Self {
        Self::new(
            tick,
            EventPriority::Presentation,
            SyncEventData::FacingForced { entity, facing },
        )
    }

    /// Create swappable changed event.
    pub fn swappable_changed(tick: u32, entity: EntityId, swappable: bool) -> Self {
        Self::new(
            tick,
            EventPriority::StateChange,
            SyncEventData::SwappableChanged { entity, swappable },
        )
    }

    /// Create moved event.
    pub fn moved(tick: u32, entity: EntityId, from: GridVec, to: GridVec) -> Self {
        Self::new(
            tick,
            EventPriority::Movement,
            SyncEventData::Moved { entity, from, to },
        )
    }

    /// Create ghost requested event.
    pub fn ghost_requested(tick: u32, entity: EntityId) -> Self {
        Self::new(
            tick,
            EventPriority::Other,
            SyncEventData::GhostRequested { entity },
        )
    }

    /// Create despawned event.
    pub fn despawned(tick: u32, entity: EntityId) -> Self {
        Self::new(
            tick,
            EventPriority::StateChange,
            SyncEventData::Despawned { entity },
        )
    }
}

impl PartialEq for SyncEvent {
    fn eq(&self, other: &Self) -> bool {
        self.tick == other.tick
            && self.priority == other.priority
            && self.entity == other.entity
    }
}

impl Eq for SyncEvent {}

impl PartialOrd for SyncEvent {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SyncEvent {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Sort by: tick, then priority, then entity
        self.tick
            .cmp(&other.tick)
            .then(self.priority.cmp(&other.priority))
            .then(self.entity.cmp(&other.entity))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_ordering() {
        let a = EntityId(1);
        let b = EntityId(2);

        let cuffed = SyncEvent::restraint_changed(10, a, false, true);
        let moved = SyncEvent::moved(10, a, GridVec::ZERO, GridVec::UP);
        let cuffed_b = SyncEvent::restraint_changed(10, b, false, true);

        // Same tick, but state change < movement
        assert!(cuffed < moved);

        // Same tick and priority, but a < b
        assert!(cuffed < cuffed_b);
    }

    #[test]
    fn test_event_entity_extracted() {
        let event = SyncEvent::facing_forced(3, EntityId(9), Direction::Left);
        assert_eq!(event.entity, EntityId(9));
        assert_eq!(event.priority, EventPriority::Presentation);
    }
}
