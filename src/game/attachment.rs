//! Attachment (Buckling)
//!
//! Server-authoritative `Unattached` / `AttachedTo(target)` transitions.
//!
//! While attached an entity sits on the anchor's tile, cannot be pushed or
//! pulled, follows the anchor's facing and ignores movement input. Release
//! restores all of that and hands over the anchor's drift, if any.

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::game::collab::World;
use crate::game::events::SyncEvent;
use crate::game::state::{
    AttachmentState, EntityId, FacingFollow, ReleaseCallback, SimState, Stance,
};

/// Attach failures. The call changes nothing when it returns one.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AttachError {
    /// Entity or target is not registered.
    #[error("unknown entity {0}")]
    UnknownEntity(EntityId),

    /// Target cannot be referenced over the network.
    #[error("attach target {0} has no network identity")]
    NoNetworkIdentity(EntityId),

    /// Entity and target are the same.
    #[error("entity {0} cannot attach to itself")]
    SelfAttach(EntityId),

    /// Target is already (possibly indirectly) attached to the entity.
    #[error("attaching {0} to {1} would form a cycle")]
    Cycle(EntityId, EntityId),
}

fn set_stance<W>(state: &mut SimState<W>, id: EntityId, stance: Stance) {
    let tick = state.tick;
    let Some(entity) = state.entity_mut(id) else {
        return;
    };
    if entity.stance != stance {
        entity.stance = stance;
        state.push_event(SyncEvent::stance_changed(tick, id, stance));
    }
}

/// Buckle `entity` to `target`.
///
/// An entity that is already attached is released from its old anchor
/// first, running the old callback.
pub fn attach<W: World>(
    state: &mut SimState<W>,
    entity: EntityId,
    target: EntityId,
    on_release: ReleaseCallback,
) -> Result<(), AttachError> {
    if let Err(e) = validate_attach(state, entity, target) {
        warn!("Attach {} -> {} rejected: {}", entity, target, e);
        return Err(e);
    }
    let tick = state.tick;

    if state.entity(entity).map(|e| e.is_attached()).unwrap_or(false) {
        release(state, entity);
    }

    let stance = if state.world.occupant_lies_down(target) {
        Stance::LyingDown
    } else {
        Stance::Standing
    };
    set_stance(state, entity, stance);

    // Suspend pulling both ways
    state.world.release_pulled_by(entity);
    state.world.stop_pulling(entity);

    if let Some(tile) = state.world.position(target) {
        let from = state.world.position(entity);
        state.world.set_position(entity, tile);
        if let Some(from) = from.filter(|from| *from != tile) {
            state.push_event(SyncEvent::moved(tick, entity, from, tile));
        }
    }

    // Anchors without orientation leave the entity's own facing in place
    match state.world.facing(target) {
        Some(facing) => state.world.face(entity, facing),
        None => {
            if let Some(own) = state.world.facing(entity) {
                state.world.face(entity, own);
            }
        }
    }
    if let Some(facing) = state.world.facing(entity) {
        state.push_event(SyncEvent::facing_forced(tick, entity, facing));
    }

    let (subscription, changes) = state.world.subscribe_facing(target);

    if let Some(e) = state.entity_mut(entity) {
        e.pushable = false;
        e.attachment = AttachmentState::AttachedTo {
            target,
            on_release: Some(on_release),
        };
        e.facing_follow = Some(FacingFollow { target, subscription, changes });
    }
    state.push_event(SyncEvent::attachment_changed(tick, entity, None, Some(target)));

    info!("{} attached to {}", entity, target);
    Ok(())
}

fn validate_attach<W>(state: &SimState<W>, entity: EntityId, target: EntityId) -> Result<(), AttachError> {
    if entity == target {
        return Err(AttachError::SelfAttach(entity));
    }
    if state.entity(entity).is_none() {
        return Err(AttachError::UnknownEntity(entity));
    }
    let anchor = state.entity(target).ok_or(AttachError::UnknownEntity(target))?;
    if anchor.net_id.is_none() {
        return Err(AttachError::NoNetworkIdentity(target));
    }

    // Chains are acyclic, so this walk ends
    let mut next = anchor.attachment.target();
    while let Some(link) = next {
        if link == entity {
            return Err(AttachError::Cycle(entity, target));
        }
        next = state.entity(link).and_then(|e| e.attachment.target());
    }
    Ok(())
}

/// Unbuckle `entity`. No-op (returns false) when it is not attached.
pub fn release<W: World>(state: &mut SimState<W>, entity: EntityId) -> bool {
    let tick = state.tick;

    let Some(e) = state.entity_mut(entity) else {
        return false;
    };
    let (target, on_release) = match std::mem::take(&mut e.attachment) {
        AttachmentState::Unattached => return false,
        AttachmentState::AttachedTo { target, on_release } => (target, on_release),
    };
    e.pushable = true;
    let follow = e.facing_follow.take();

    if let Some(follow) = follow {
        state.world.unsubscribe_facing(follow.target, follow.subscription);
    }

    let stance = if state.world.life_state(entity).is_conscious() {
        Stance::Standing
    } else {
        Stance::LyingDown
    };
    set_stance(state, entity, stance);

    if let Some(callback) = on_release {
        callback.invoke(entity);
    }

    match state.world.drift(target) {
        Some(momentum) => state.world.apply_momentum(entity, momentum),
        None => state.world.stop(entity),
    }

    state.push_event(SyncEvent::attachment_changed(tick, entity, Some(target), None));
    info!("{} released from {}", entity, target);
    true
}

/// Validated unbuckle entry point for client requests.
///
/// Self-unbuckling is refused while cuffed. Unbuckling someone else needs
/// reach. Failed checks are dropped silently.
pub fn request_unbuckle<W: World>(
    state: &mut SimState<W>,
    requester: Option<EntityId>,
    target: EntityId,
) -> bool {
    if !state.entity(target).map(|e| e.is_attached()).unwrap_or(false) {
        debug!("Unbuckle request dropped: {} is not attached", target);
        return false;
    }

    let Some(requester) = requester.and_then(|id| state.entity(id)) else {
        debug!("Unbuckle request dropped: no requester for {}", target);
        return false;
    };
    let requester_id = requester.id;

    if requester_id == target {
        if requester.is_restrained() {
            debug!("Unbuckle request dropped: {} is restrained", target);
            return false;
        }
    } else if !state.world.can_reach(requester_id, target) {
        debug!("Unbuckle request dropped: {} cannot reach {}", requester_id, target);
        return false;
    }

    release(state, target)
}

/// Keep attached entities facing the same way as their anchors.
pub fn follow_anchor_facing<W: World>(state: &mut SimState<W>) {
    let tick = state.tick;
    let mut turns = Vec::new();

    for (id, entity) in state.entities.iter_mut() {
        let Some(follow) = entity.facing_follow.as_mut() else {
            continue;
        };
        let mut latest = None;
        while let Ok(direction) = follow.changes.try_recv() {
            latest = Some(direction);
        }
        if let Some(direction) = latest {
            turns.push((*id, direction));
        }
    }

    for (id, direction) in turns {
        state.world.face(id, direction);
        state.push_event(SyncEvent::facing_forced(tick, id, direction));
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use crate::core::grid::{Direction, GridVec};
    use crate::game::collab::{
        FacingCollaborator, Momentum, MovementCollaborator, PullingCollaborator,
    };
    use crate::game::events::SyncEventData;
    use crate::game::state::{LifeState, NetId, RestraintState};
    use crate::game::world::SimWorld;

    struct Fixture {
        state: SimState<SimWorld>,
        rider: EntityId,
        chair: EntityId,
        calls: Arc<AtomicUsize>,
    }

    fn fixture() -> Fixture {
        let mut state = SimState::new(SimWorld::new());
        let rider = state.spawn(Some(NetId::new([1; 16]))).unwrap();
        let chair = state.spawn(Some(NetId::new([2; 16]))).unwrap();
        state.world.add_body(rider, GridVec::new(0, 0));
        state.world.add_body(chair, GridVec::new(1, 0)).facing = Some(Direction::Left);
        Fixture {
            state,
            rider,
            chair,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn counting(calls: &Arc<AtomicUsize>) -> ReleaseCallback {
        let calls = Arc::clone(calls);
        ReleaseCallback::new(move |_| {
            calls.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_attach_snaps_and_faces() {
        let mut f = fixture();
        attach(&mut f.state, f.rider, f.chair, counting(&f.calls)).unwrap();

        let rider = f.state.entity(f.rider).unwrap();
        assert_eq!(rider.attachment.target(), Some(f.chair));
        assert!(!rider.pushable);
        assert_eq!(rider.stance, Stance::Standing);
        assert_eq!(f.state.world.position(f.rider), Some(GridVec::new(1, 0)));
        assert_eq!(f.state.world.facing(f.rider), Some(Direction::Left));

        let events = f.state.take_events();
        assert!(events.iter().any(|e| e.data
            == SyncEventData::FacingForced { entity: f.rider, facing: Direction::Left }));
        assert!(events.iter().any(|e| e.data
            == SyncEventData::AttachmentChanged { entity: f.rider, old: None, new: Some(f.chair) }));
        assert!(events.iter().any(|e| e.data
            == SyncEventData::Moved { entity: f.rider, from: GridVec::ZERO, to: GridVec::new(1, 0) }));
    }

    #[test]
    fn test_attach_on_same_tile_does_not_move() {
        let mut f = fixture();
        f.state.world.set_position(f.rider, GridVec::new(1, 0));
        attach(&mut f.state, f.rider, f.chair, counting(&f.calls)).unwrap();
        assert!(!f.state.take_events().iter().any(|e| matches!(e.data, SyncEventData::Moved { .. })));
    }

    #[test]
    fn test_attach_cycle_rejected() {
        let mut f = fixture();
        let cart = f.state.spawn(Some(NetId::new([3; 16]))).unwrap();
        f.state.world.add_body(cart, GridVec::new(2, 0));

        attach(&mut f.state, f.rider, f.chair, counting(&f.calls)).unwrap();
        attach(&mut f.state, f.chair, cart, counting(&f.calls)).unwrap();

        assert_eq!(
            attach(&mut f.state, f.chair, f.rider, counting(&f.calls)),
            Err(AttachError::Cycle(f.chair, f.rider))
        );
        assert_eq!(
            attach(&mut f.state, cart, f.rider, counting(&f.calls)),
            Err(AttachError::Cycle(cart, f.rider))
        );
        assert_eq!(f.state.entity(cart).unwrap().attachment.target(), None);
        assert_eq!(f.calls.load(Ordering::SeqCst), 0);

        // Nothing keeps bouncing facing around once things settle
        follow_anchor_facing(&mut f.state);
        f.state.take_events();
        for _ in 0..10 {
            follow_anchor_facing(&mut f.state);
        }
        assert!(f.state.take_events().is_empty());
    }

    #[test]
    fn test_attach_to_bed_lies_down() {
        let mut f = fixture();
        f.state.world.set_occupant_lies_down(f.chair, true);
        attach(&mut f.state, f.rider, f.chair, counting(&f.calls)).unwrap();
        assert_eq!(f.state.entity(f.rider).unwrap().stance, Stance::LyingDown);
    }

    #[test]
    fn test_attach_anchor_without_facing_keeps_own() {
        let mut f = fixture();
        f.state.world.clear_facing(f.chair);
        f.state.world.face(f.rider, Direction::Up);
        attach(&mut f.state, f.rider, f.chair, counting(&f.calls)).unwrap();
        assert_eq!(f.state.world.facing(f.rider), Some(Direction::Up));
    }

    #[test]
    fn test_attach_without_net_identity_fails_cleanly() {
        let mut f = fixture();
        let stool = f.state.spawn(None).unwrap();
        f.state.world.add_body(stool, GridVec::new(3, 3));

        let err = attach(&mut f.state, f.rider, stool, counting(&f.calls));
        assert_eq!(err, Err(AttachError::NoNetworkIdentity(stool)));

        let rider = f.state.entity(f.rider).unwrap();
        assert!(!rider.is_attached());
        assert!(rider.pushable);
        assert_eq!(f.state.world.position(f.rider), Some(GridVec::ZERO));
        assert!(f.state.take_events().is_empty());
    }

    #[test]
    fn test_attach_cancels_pulling() {
        let mut f = fixture();
        let dragger = f.state.spawn(None).unwrap();
        let crate_ = f.state.spawn(None).unwrap();
        f.state.world.add_body(dragger, GridVec::new(-1, 0));
        f.state.world.add_body(crate_, GridVec::new(0, -1));
        f.state.world.start_pull(dragger, f.rider);
        assert!(f.state.world.is_being_pulled(f.rider));

        attach(&mut f.state, f.rider, f.chair, counting(&f.calls)).unwrap();
        assert!(!f.state.world.is_being_pulled(f.rider));
        assert!(!f.state.world.is_pulling(dragger));

        release(&mut f.state, f.rider);
        f.state.world.start_pull(f.rider, crate_);
        attach(&mut f.state, f.rider, f.chair, counting(&f.calls)).unwrap();
        assert!(!f.state.world.is_pulling(f.rider));
    }

    #[test]
    fn test_attach_release_round_trip() {
        let mut f = fixture();
        attach(&mut f.state, f.rider, f.chair, counting(&f.calls)).unwrap();
        assert!(release(&mut f.state, f.rider));

        let rider = f.state.entity(f.rider).unwrap();
        assert!(!rider.is_attached());
        assert!(rider.pushable);
        assert_eq!(rider.stance, Stance::Standing);
        assert_eq!(f.calls.load(Ordering::SeqCst), 1);
        assert_eq!(f.state.world.drift(f.rider), None);

        // Second release: no-op, callback not re-run
        assert!(!release(&mut f.state, f.rider));
        assert_eq!(f.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_release_unattached_is_silent_noop() {
        let mut f = fixture();
        assert!(!release(&mut f.state, f.rider));
        assert!(f.state.take_events().is_empty());
        assert!(!release(&mut f.state, EntityId(404)));
    }

    #[test]
    fn test_release_inherits_anchor_drift() {
        let mut f = fixture();
        attach(&mut f.state, f.rider, f.chair, counting(&f.calls)).unwrap();

        let drift = Momentum { direction: Direction::Right, speed_milli: 2500 };
        f.state.world.apply_momentum(f.chair, drift);
        release(&mut f.state, f.rider);
        assert_eq!(f.state.world.drift(f.rider), Some(drift));
    }

    #[test]
    fn test_release_unconscious_falls_over() {
        let mut f = fixture();
        attach(&mut f.state, f.rider, f.chair, counting(&f.calls)).unwrap();
        f.state.world.set_life(f.rider, LifeState::BarelyConscious);
        release(&mut f.state, f.rider);
        assert_eq!(f.state.entity(f.rider).unwrap().stance, Stance::LyingDown);
    }

    #[test]
    fn test_reattach_releases_old_first() {
        let mut f = fixture();
        let bed = f.state.spawn(Some(NetId::new([3; 16]))).unwrap();
        f.state.world.add_body(bed, GridVec::new(4, 4));

        attach(&mut f.state, f.rider, f.chair, counting(&f.calls)).unwrap();
        attach(&mut f.state, f.rider, bed, counting(&f.calls)).unwrap();

        assert_eq!(f.calls.load(Ordering::SeqCst), 1);
        assert_eq!(f.state.world.facing_subscribers(f.chair), 0);
        assert_eq!(f.state.world.facing_subscribers(bed), 1);
        assert_eq!(f.state.entity(f.rider).unwrap().attachment.target(), Some(bed));
    }

    #[test]
    fn test_follows_anchor_facing() {
        let mut f = fixture();
        attach(&mut f.state, f.rider, f.chair, counting(&f.calls)).unwrap();
        f.state.take_events();

        f.state.world.face(f.chair, Direction::Up);
        f.state.world.face(f.chair, Direction::Right);
        follow_anchor_facing(&mut f.state);

        assert_eq!(f.state.world.facing(f.rider), Some(Direction::Right));
        assert_eq!(f.state.take_events().len(), 1);

        release(&mut f.state, f.rider);
        assert_eq!(f.state.world.facing_subscribers(f.chair), 0);
    }

    #[test]
    fn test_request_unbuckle_rules() {
        let mut f = fixture();
        attach(&mut f.state, f.rider, f.chair, counting(&f.calls)).unwrap();

        // Cuffed riders can't free themselves
        f.state.entity_mut(f.rider).unwrap().restraint = RestraintState::Restrained;
        assert!(!request_unbuckle(&mut f.state, Some(f.rider), f.rider));
        assert!(!request_unbuckle(&mut f.state, None, f.rider));

        // A helper out of reach can't either
        let helper = f.state.spawn(None).unwrap();
        f.state.world.add_body(helper, GridVec::new(9, 9));
        assert!(!request_unbuckle(&mut f.state, Some(helper), f.rider));
        assert_eq!(f.calls.load(Ordering::SeqCst), 0);

        f.state.world.set_position(helper, GridVec::new(2, 0));
        assert!(request_unbuckle(&mut f.state, Some(helper), f.rider));
        assert_eq!(f.calls.load(Ordering::SeqCst), 1);

        // Not attached any more
        assert!(!request_unbuckle(&mut f.state, Some(helper), f.rider));
    }
}
