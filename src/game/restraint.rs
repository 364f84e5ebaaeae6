//! Restraint (Cuffing)
//!
//! Server-authoritative `Free` / `Restrained` transitions. The restraint item
//! lives in the target's dedicated restraint slot while cuffed.
//!
//! `cuff` and `request_uncuff` validate; `uncuff` trusts its caller. Failed
//! validation is a silent no-op: nothing is sent back to the requester.

use tracing::{debug, info};

use crate::game::collab::{InteractionCollaborator, InventoryCollaborator, Slot};
use crate::game::events::SyncEvent;
use crate::game::state::{EntityId, RestraintState, SimState};

/// Cuff `target` with the restraint item in `initiator`'s active hand.
///
/// Returns true if the target ended up restrained by this call.
pub fn cuff<W>(state: &mut SimState<W>, initiator: EntityId, target: EntityId) -> bool
where
    W: InventoryCollaborator + InteractionCollaborator,
{
    let tick = state.tick;

    let Some(entity) = state.entity(target) else {
        debug!("Cuff dropped: unknown target {}", target);
        return false;
    };
    if entity.is_restrained() {
        debug!("Cuff dropped: {} already restrained", target);
        return false;
    }
    if state.entity(initiator).is_none() || !state.world.can_reach(initiator, target) {
        debug!("Cuff dropped: {} cannot reach {}", initiator, target);
        return false;
    }

    let hand = state.world.active_hand(initiator);
    let Some(item) = state.world.item_in(initiator, hand) else {
        debug!("Cuff dropped: {} has nothing in hand", initiator);
        return false;
    };
    if !state.world.is_restraint(item) {
        debug!("Cuff dropped: {:?} is not a restraint", item);
        return false;
    }
    if !state.world.transfer(item, target, Slot::Restraint) {
        debug!("Cuff dropped: restraint slot of {} unavailable", target);
        return false;
    }

    state.world.drop_hands(target);

    if let Some(entity) = state.entity_mut(target) {
        entity.restraint = RestraintState::Restrained;
    }
    state.push_event(SyncEvent::cuff_ui(tick, target, true));
    state.push_event(SyncEvent::restraint_changed(tick, target, false, true));

    info!("{} cuffed {}", initiator, target);
    true
}

/// Uncuff `target` unconditionally. Callers handle authorization.
///
/// The restraint item is dropped loose at the target's feet. Uncuffing a
/// free entity changes nothing and fires nothing.
pub fn uncuff<W>(state: &mut SimState<W>, target: EntityId) -> bool
where
    W: InventoryCollaborator,
{
    let tick = state.tick;
    match state.entity_mut(target) {
        Some(entity) if entity.is_restrained() => {
            entity.restraint = RestraintState::Free;
        }
        _ => return false,
    }

    state.world.drop_slot(target, Slot::Restraint);
    state.push_event(SyncEvent::cuff_ui(tick, target, false));
    state.push_event(SyncEvent::restraint_changed(tick, target, true, false));

    info!("{} uncuffed", target);
    true
}

/// Validated uncuff entry point for client requests.
///
/// Dropped if the target is free, the uncuffer is absent, or the uncuffer
/// cannot reach the target. Validation runs fresh on every call.
pub fn request_uncuff<W>(
    state: &mut SimState<W>,
    uncuffer: Option<EntityId>,
    target: EntityId,
) -> bool
where
    W: InventoryCollaborator + InteractionCollaborator,
{
    let restrained = state.entity(target).map(|e| e.is_restrained()).unwrap_or(false);
    if !restrained {
        debug!("Uncuff request dropped: {} is not restrained", target);
        return false;
    }

    let Some(uncuffer) = uncuffer.filter(|id| state.entity(*id).is_some()) else {
        debug!("Uncuff request dropped: no uncuffer for {}", target);
        return false;
    };

    if !state.world.can_reach(uncuffer, target) {
        debug!("Uncuff request dropped: {} cannot reach {}", uncuffer, target);
        return false;
    }

    uncuff(state, target)
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::grid::GridVec;
    use crate::game::collab::{ItemId, MovementCollaborator};
    use crate::game::events::SyncEventData;
    use crate::game::world::{ItemLocation, SimWorld};

    struct Fixture {
        state: SimState<SimWorld>,
        officer: EntityId,
        suspect: EntityId,
        cuffs: ItemId,
    }

    fn fixture() -> Fixture {
        let mut state = SimState::new(SimWorld::new());
        let officer = state.spawn(None).unwrap();
        let suspect = state.spawn(None).unwrap();
        state.world.add_body(officer, GridVec::new(0, 0));
        state.world.add_body(suspect, GridVec::new(1, 0));

        let cuffs = state.world.spawn_item(true, GridVec::ZERO);
        let hand = state.world.active_hand(officer);
        assert!(state.world.transfer(cuffs, officer, hand));

        Fixture { state, officer, suspect, cuffs }
    }

    #[test]
    fn test_cuff_moves_item_and_empties_hands() {
        let mut f = fixture();
        let held = f.state.world.spawn_item(false, GridVec::ZERO);
        assert!(f.state.world.transfer(held, f.suspect, Slot::LeftHand));

        assert!(cuff(&mut f.state, f.officer, f.suspect));

        let suspect = f.state.entity(f.suspect).unwrap();
        assert_eq!(suspect.restraint, RestraintState::Restrained);
        assert_eq!(f.state.world.item_in(f.suspect, Slot::Restraint), Some(f.cuffs));
        assert_eq!(f.state.world.item_in(f.suspect, Slot::LeftHand), None);
        assert_eq!(f.state.world.item_in(f.officer, Slot::RightHand), None);

        let events = f.state.take_events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].data, SyncEventData::CuffUiToggled { entity: f.suspect, visible: true });
        assert_eq!(
            events[1].data,
            SyncEventData::RestraintChanged { entity: f.suspect, old: false, new: true }
        );
    }

    #[test]
    fn test_cuff_requires_reach_and_restraint_item() {
        let mut f = fixture();
        f.state.world.set_position(f.suspect, GridVec::new(5, 5));
        assert!(!cuff(&mut f.state, f.officer, f.suspect));

        let mut f = fixture();
        f.state.world.drop_slot(f.officer, Slot::RightHand);
        let wrench = f.state.world.spawn_item(false, GridVec::ZERO);
        assert!(f.state.world.transfer(wrench, f.officer, Slot::RightHand));
        assert!(!cuff(&mut f.state, f.officer, f.suspect));
        assert!(f.state.take_events().is_empty());
    }

    #[test]
    fn test_cuff_uncuff_round_trip() {
        let mut f = fixture();
        assert_eq!(f.state.world.item_in(f.suspect, Slot::Restraint), None);

        assert!(cuff(&mut f.state, f.officer, f.suspect));
        f.state.take_events();
        assert!(uncuff(&mut f.state, f.suspect));

        assert_eq!(f.state.entity(f.suspect).unwrap().restraint, RestraintState::Free);
        assert_eq!(f.state.world.item_in(f.suspect, Slot::Restraint), None);
        assert_eq!(
            f.state.world.item(f.cuffs).map(|i| i.location),
            Some(ItemLocation::Loose(GridVec::new(1, 0)))
        );

        let events = f.state.take_events();
        assert_eq!(events[0].data, SyncEventData::CuffUiToggled { entity: f.suspect, visible: false });
        assert_eq!(
            events[1].data,
            SyncEventData::RestraintChanged { entity: f.suspect, old: true, new: false }
        );
    }

    #[test]
    fn test_request_uncuff_on_free_target_is_noop() {
        let mut f = fixture();
        assert!(!request_uncuff(&mut f.state, Some(f.officer), f.suspect));
        assert!(f.state.take_events().is_empty());
        assert_eq!(f.state.entity(f.suspect).unwrap().restraint, RestraintState::Free);
    }

    #[test]
    fn test_request_uncuff_validates_uncuffer() {
        let mut f = fixture();
        assert!(cuff(&mut f.state, f.officer, f.suspect));
        f.state.take_events();

        assert!(!request_uncuff(&mut f.state, None, f.suspect));
        assert!(!request_uncuff(&mut f.state, Some(EntityId(999)), f.suspect));

        f.state.world.set_position(f.officer, GridVec::new(-4, 0));
        assert!(!request_uncuff(&mut f.state, Some(f.officer), f.suspect));
        assert!(f.state.take_events().is_empty());

        f.state.world.set_position(f.officer, GridVec::new(1, 1));
        assert!(request_uncuff(&mut f.state, Some(f.officer), f.suspect));
        assert!(!f.state.entity(f.suspect).unwrap().is_restrained());
    }

    #[test]
    fn test_uncuff_free_entity_fires_nothing() {
        let mut f = fixture();
        assert!(!uncuff(&mut f.state, f.suspect));
        assert!(f.state.take_events().is_empty());
    }
}
