//! Swap Eligibility
//!
//! Whether an entity may trade places with someone walking into it.
//!
//! The server keeps a replicated base flag derived from the owner's reported
//! intent and the pulling state. Readers on both sides then apply the same
//! refinement ([`refine`]) using state they can all see.

use std::collections::BTreeSet;
use tracing::trace;

use crate::game::collab::PullingCollaborator;
use crate::game::events::SyncEvent;
use crate::game::state::{EntityId, EntityState, Intent, SimState};

/// Base flag from intent and pulling state.
#[inline]
pub fn server_swappable(intent: Intent, pulling: bool) -> bool {
    intent == Intent::Help && !pulling
}

/// Refinement applied identically on client and server.
#[inline]
pub fn refine(base: bool, ghost: bool, passable: bool, attached: bool) -> bool {
    base && !ghost && !passable && !attached
}

/// Server-side refined view of an entity.
pub fn is_swappable(entity: &EntityState) -> bool {
    refine(entity.swappable, entity.ghost, entity.passable, entity.is_attached())
}

/// Recompute the base flag for one entity. Emits an event on change.
///
/// Returns the current base flag, or `None` for unknown entities.
pub fn recompute_swappable<W: PullingCollaborator>(state: &mut SimState<W>, id: EntityId) -> Option<bool> {
    let pulling = state.world.is_pulling(id);
    let tick = state.tick;

    let entity = state.entity_mut(id)?;
    let swappable = server_swappable(entity.reported_intent, pulling);
    if entity.swappable == swappable {
        return Some(swappable);
    }
    entity.swappable = swappable;

    trace!("{} swappable -> {}", id, swappable);
    state.push_event(SyncEvent::swappable_changed(tick, id, swappable));
    Some(swappable)
}

/// Owner reported a new intent.
pub fn on_intent_changed<W: PullingCollaborator>(
    state: &mut SimState<W>,
    id: EntityId,
    intent: Intent,
) -> Option<bool> {
    state.entity_mut(id)?.reported_intent = intent;
    recompute_swappable(state, id)
}

/// Drain the pulling-changed channel and recompute affected entities.
pub fn process_pulling_changes<W: PullingCollaborator>(state: &mut SimState<W>) {
    let mut changed = BTreeSet::new();
    while let Ok(id) = state.pulling_changes.try_recv() {
        changed.insert(id);
    }
    for id in changed {
        recompute_swappable(state, id);
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::grid::GridVec;
    use crate::game::events::SyncEventData;
    use crate::game::state::AttachmentState;
    use crate::game::world::SimWorld;

    fn setup() -> (SimState<SimWorld>, EntityId, EntityId) {
        let mut state = SimState::new(SimWorld::new());
        let a = state.spawn(None).unwrap();
        let b = state.spawn(None).unwrap();
        state.world.add_body(a, GridVec::ZERO);
        state.world.add_body(b, GridVec::RIGHT);
        (state, a, b)
    }

    #[test]
    fn test_base_flag() {
        assert!(server_swappable(Intent::Help, false));
        assert!(!server_swappable(Intent::Help, true));
        assert!(!server_swappable(Intent::Harm, false));
    }

    #[test]
    fn test_refine() {
        assert!(refine(true, false, false, false));
        assert!(!refine(true, true, false, false));
        assert!(!refine(true, false, true, false));
        assert!(!refine(true, false, false, true));
        assert!(!refine(false, false, false, false));
    }

    #[test]
    fn test_intent_change_recomputes() {
        let (mut state, a, _) = setup();
        assert_eq!(recompute_swappable(&mut state, a), Some(true));
        state.take_events();

        assert_eq!(on_intent_changed(&mut state, a, Intent::Harm), Some(false));
        let events = state.take_events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, SyncEventData::SwappableChanged { entity: a, swappable: false });

        // Same intent again: no event
        on_intent_changed(&mut state, a, Intent::Harm);
        assert!(state.take_events().is_empty());
    }

    #[test]
    fn test_pulling_change_recomputes() {
        let (mut state, a, b) = setup();
        recompute_swappable(&mut state, a);
        recompute_swappable(&mut state, b);
        state.take_events();

        state.world.start_pull(a, b);
        process_pulling_changes(&mut state);
        assert!(!state.entity(a).unwrap().swappable);
        assert!(state.entity(b).unwrap().swappable);
    }

    #[test]
    fn test_attached_entity_not_swappable() {
        let (mut state, a, b) = setup();
        recompute_swappable(&mut state, a);
        assert!(is_swappable(state.entity(a).unwrap()));

        state.entity_mut(a).unwrap().attachment = AttachmentState::AttachedTo {
            target: b,
            on_release: None,
        };
        assert!(!is_swappable(state.entity(a).unwrap()));
    }
}
