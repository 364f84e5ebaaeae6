//! Replication
//!
//! Turns authoritative entity state into field deltas for connected
//! observers and full snapshots for late joiners.
//!
//! Deltas are computed by diffing against the last values sent, so a field
//! that flips and flips back within one tick produces nothing. Every change
//! is sent to every observer; there is no interest management.

use std::collections::BTreeMap;
use tracing::trace;

use crate::core::hash::{compute_snapshot_hash, StateHash};
use crate::game::collab::MovementCollaborator;
use crate::game::state::{EntityState, NetId, SimState};
use crate::network::protocol::{EntitySnapshot, FieldUpdate, FieldValue, SnapshotInfo};

/// The replicated fields of one entity.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReplicatedFields {
    /// Input switch
    pub allow_input: bool,
    /// Attachment target (None = unattached)
    pub attached_target: Option<NetId>,
    /// Cuffed
    pub restrained: bool,
    /// Server swappability flag
    pub swappable: bool,
    /// Ghost entity
    pub ghost: bool,
    /// Walk-through entity
    pub passable: bool,
}

impl ReplicatedFields {
    /// Capture from authoritative state.
    ///
    /// A target without network identity replicates as unattached.
    pub fn capture<W>(state: &SimState<W>, entity: &EntityState) -> Self {
        Self {
            allow_input: entity.allow_input,
            attached_target: entity.attachment.target().and_then(|t| state.net_id_of(t)),
            restrained: entity.is_restrained(),
            swappable: entity.swappable,
            ghost: entity.ghost,
            passable: entity.passable,
        }
    }

    /// Every field as a value.
    pub fn values(&self) -> [FieldValue; 6] {
        [
            FieldValue::AllowInput(self.allow_input),
            FieldValue::AttachedTarget(self.attached_target),
            FieldValue::Restrained(self.restrained),
            FieldValue::Swappable(self.swappable),
            FieldValue::Ghost(self.ghost),
            FieldValue::Passable(self.passable),
        ]
    }

    /// Fields that differ from `previous`.
    pub fn diff(&self, previous: &Self) -> Vec<FieldValue> {
        self.values()
            .into_iter()
            .zip(previous.values())
            .filter(|(now, before)| now != before)
            .map(|(now, _)| now)
            .collect()
    }

    /// Overwrite one field.
    pub fn apply(&mut self, value: FieldValue) {
        match value {
            FieldValue::AllowInput(v) => self.allow_input = v,
            FieldValue::AttachedTarget(v) => self.attached_target = v,
            FieldValue::Restrained(v) => self.restrained = v,
            FieldValue::Swappable(v) => self.swappable = v,
            FieldValue::Ghost(v) => self.ghost = v,
            FieldValue::Passable(v) => self.passable = v,
        }
    }
}

/// Changes since the previous collection.
#[derive(Debug, Default)]
pub struct ReplicationBatch {
    /// Field changes, ordered by entity
    pub updates: Vec<FieldUpdate>,
    /// Entities that stopped existing
    pub removed: Vec<NetId>,
}

impl ReplicationBatch {
    /// Nothing to send?
    pub fn is_empty(&self) -> bool {
        self.updates.is_empty() && self.removed.is_empty()
    }
}

/// Tracks what observers have been told.
#[derive(Debug, Default)]
pub struct Replicator {
    last_sent: BTreeMap<NetId, ReplicatedFields>,
}

impl Replicator {
    /// Create an empty replicator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Diff current state against the last values sent.
    ///
    /// Entities seen for the first time send all their fields.
    pub fn collect<W>(&mut self, state: &SimState<W>) -> ReplicationBatch {
        let mut batch = ReplicationBatch::default();
        let mut current = BTreeMap::new();

        for entity in state.entities.values() {
            let Some(net) = entity.net_id else {
                continue;
            };
            current.insert(net, ReplicatedFields::capture(state, entity));
        }

        for (net, fields) in &current {
            let changed = match self.last_sent.get(net) {
                Some(previous) => fields.diff(previous),
                None => fields.values().to_vec(),
            };
            for value in changed {
                trace!("Replicating {:?} for {}", value, net.short());
                batch.updates.push(FieldUpdate {
                    tick: state.tick,
                    entity: *net,
                    value,
                });
            }
        }

        batch.removed = self
            .last_sent
            .keys()
            .filter(|net| !current.contains_key(net))
            .copied()
            .collect();

        self.last_sent = current;
        batch
    }
}

/// Full snapshot of every replicated entity.
pub fn snapshot<W: MovementCollaborator>(state: &SimState<W>) -> SnapshotInfo {
    let mut entities: Vec<EntitySnapshot> = state
        .entities
        .values()
        .filter_map(|entity| {
            let net = entity.net_id?;
            let fields = ReplicatedFields::capture(state, entity);
            Some(EntitySnapshot {
                entity: net,
                allow_input: fields.allow_input,
                attached_target: fields.attached_target,
                restrained: fields.restrained,
                swappable: fields.swappable,
                ghost: fields.ghost,
                passable: fields.passable,
                position: state.world.position(entity.id),
            })
        })
        .collect();
    entities.sort_by_key(|e| e.entity);

    let state_hash = hash_entities(&entities);
    SnapshotInfo {
        tick: state.tick,
        entities,
        state_hash,
    }
}

/// Hash of the replicated fields of a snapshot (positions excluded).
///
/// `entities` must be sorted by network identity.
pub fn hash_entities(entities: &[EntitySnapshot]) -> StateHash {
    compute_snapshot_hash(entities.len() as u32, |hasher| {
        for e in entities {
            hasher.update_uuid(e.entity.as_bytes());
            hasher.update_bool(e.allow_input);
            hasher.update_opt_uuid(e.attached_target.as_ref().map(|n| n.as_bytes()));
            hasher.update_bool(e.restrained);
            hasher.update_bool(e.swappable);
            hasher.update_bool(e.ghost);
            hasher.update_bool(e.passable);
        }
    })
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::grid::GridVec;
    use crate::game::attachment::attach;
    use crate::game::state::{EntityId, ReleaseCallback, RestraintState};
    use crate::game::world::SimWorld;

    fn world_with_pair() -> (SimState<SimWorld>, EntityId, EntityId) {
        let mut state = SimState::new(SimWorld::new());
        let rider = state.spawn(Some(NetId::new([1; 16]))).unwrap();
        let bed = state.spawn(Some(NetId::new([2; 16]))).unwrap();
        state.world.add_body(rider, GridVec::ZERO);
        state.world.add_body(bed, GridVec::RIGHT);
        (state, rider, bed)
    }

    #[test]
    fn test_first_collect_sends_everything() {
        let (state, _, _) = world_with_pair();
        let mut replicator = Replicator::new();
        let batch = replicator.collect(&state);
        assert_eq!(batch.updates.len(), 12);

        // Nothing changed since
        assert!(replicator.collect(&state).is_empty());
    }

    #[test]
    fn test_changes_become_deltas() {
        let (mut state, rider, bed) = world_with_pair();
        let mut replicator = Replicator::new();
        replicator.collect(&state);

        attach(&mut state, rider, bed, ReleaseCallback::new(|_| {})).unwrap();
        state.entity_mut(rider).unwrap().restraint = RestraintState::Restrained;

        let batch = replicator.collect(&state);
        let values: Vec<_> = batch.updates.iter().map(|u| u.value).collect();
        assert_eq!(
            values,
            vec![
                FieldValue::AttachedTarget(Some(NetId::new([2; 16]))),
                FieldValue::Restrained(true),
            ]
        );
        assert!(batch.updates.iter().all(|u| u.entity == NetId::new([1; 16])));
    }

    #[test]
    fn test_flip_and_flip_back_sends_nothing() {
        let (mut state, rider, _) = world_with_pair();
        let mut replicator = Replicator::new();
        replicator.collect(&state);

        state.entity_mut(rider).unwrap().allow_input = false;
        state.entity_mut(rider).unwrap().allow_input = true;
        assert!(replicator.collect(&state).is_empty());
    }

    #[test]
    fn test_ghost_and_passable_are_deltas() {
        let (mut state, rider, _) = world_with_pair();
        let mut replicator = Replicator::new();
        replicator.collect(&state);

        state.entity_mut(rider).unwrap().ghost = true;
        state.entity_mut(rider).unwrap().passable = true;
        let values: Vec<_> = replicator.collect(&state).updates.iter().map(|u| u.value).collect();
        assert_eq!(values, vec![FieldValue::Ghost(true), FieldValue::Passable(true)]);
    }

    #[test]
    fn test_removed_entities_reported() {
        let (mut state, _, bed) = world_with_pair();
        let mut replicator = Replicator::new();
        replicator.collect(&state);

        state.despawn(bed);
        let batch = replicator.collect(&state);
        assert_eq!(batch.removed, vec![NetId::new([2; 16])]);
    }

    #[test]
    fn test_late_join_snapshot_has_current_state() {
        let (mut state, rider, bed) = world_with_pair();
        attach(&mut state, rider, bed, ReleaseCallback::new(|_| {})).unwrap();
        state.entity_mut(rider).unwrap().restraint = RestraintState::Restrained;

        let snap = snapshot(&state);
        let rider_snap = snap
            .entities
            .iter()
            .find(|e| e.entity == NetId::new([1; 16]))
            .unwrap();
        assert!(rider_snap.restrained);
        assert_eq!(rider_snap.attached_target, Some(NetId::new([2; 16])));
        assert_eq!(rider_snap.position, Some(GridVec::RIGHT));
        assert_eq!(snap.state_hash, hash_entities(&snap.entities));
    }

    #[test]
    fn test_server_only_entities_not_replicated() {
        let (mut state, _, _) = world_with_pair();
        state.spawn(None).unwrap();
        assert_eq!(snapshot(&state).entities.len(), 2);
    }

    #[test]
    fn test_hash_changes_with_fields() {
        let (mut state, rider, _) = world_with_pair();
        let before = snapshot(&state).state_hash;
        state.entity_mut(rider).unwrap().restraint = RestraintState::Restrained;
        assert_ne!(before, snapshot(&state).state_hash);
    }
}
