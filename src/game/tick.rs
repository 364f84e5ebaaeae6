//! Authoritative Simulation Tick
//!
//! One fixed step of the server simulation: absorb collaborator
//! notifications, fold inputs into action queues, resolve and apply
//! movement. Restraint and attachment transitions happen between ticks
//! through their own entry points and are picked up here as events.

use std::collections::BTreeMap;
use serde::{Serialize, Deserialize};
use tracing::trace;

use crate::core::grid::Rotation;
use crate::game::attachment::follow_anchor_facing;
use crate::game::collab::World;
use crate::game::events::SyncEvent;
use crate::game::input::{HeldKeys, InputSampler};
use crate::game::resolver::{resolve, MovementMode, Resolution};
use crate::game::state::{EntityId, SimState};
use crate::game::swap::process_pulling_changes;
use crate::game::world::DEFAULT_INTERACTION_RANGE;

/// Input reported by a controlling client for one entity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityInput {
    /// Client tick the keys were sampled on
    pub tick: u32,
    /// Held keys (raw; opposites are cancelled on fold)
    pub keys: HeldKeys,
    /// Movement mode preference
    pub mode: MovementMode,
}

/// Result of a tick.
#[derive(Debug, Default)]
pub struct TickResult {
    /// Events generated since the previous tick, ordered
    pub events: Vec<SyncEvent>,
    /// Resolution per entity that had queued input
    pub resolutions: BTreeMap<EntityId, Resolution>,
}

/// Configuration for the simulation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SimConfig {
    /// Mode for entities whose controller has not said otherwise
    pub default_mode: MovementMode,
    /// Reach for cuffing/uncuffing/unbuckling, in tiles
    pub interaction_range: i32,
    /// Frame rotation applied to every entity instead of its support's
    pub frame_override: Option<Rotation>,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            default_mode: MovementMode::AxisLocked,
            interaction_range: DEFAULT_INTERACTION_RANGE,
            frame_override: None,
        }
    }
}

/// Fold one input into an entity's queue.
///
/// Inputs older than the last one applied are absorbed without effect.
/// Returns true if the input was applied.
pub fn apply_input<W>(state: &mut SimState<W>, id: EntityId, input: &EntityInput) -> bool {
    let Some(entity) = state.entity_mut(id) else {
        return false;
    };
    if input.tick < entity.last_input_tick {
        trace!("Stale input for {} (tick {} < {})", id, input.tick, entity.last_input_tick);
        return false;
    }
    entity.last_input_tick = input.tick;
    entity.mode = input.mode;
    entity.queue.update(InputSampler.sample(&input.keys));
    true
}

/// Run one simulation tick.
///
/// `inputs` holds only inputs that arrived since the previous tick; queues
/// keep their contents otherwise. BTreeMap keeps processing order stable.
pub fn tick<W: World>(
    state: &mut SimState<W>,
    inputs: &BTreeMap<EntityId, EntityInput>,
    config: &SimConfig,
) -> TickResult {
    let mut result = TickResult::default();

    // 0. Advance tick counter
    state.tick += 1;
    let tick = state.tick;

    // 1. Collaborator notifications
    process_pulling_changes(state);
    follow_anchor_facing(state);

    // 2. Fold inputs
    for (id, input) in inputs {
        apply_input(state, *id, input);
    }

    // 3. Resolve and apply movement
    let active: Vec<EntityId> = state
        .entities
        .values()
        .filter(|e| !e.queue.is_empty())
        .map(|e| e.id)
        .collect();

    for id in active {
        let Some(gate) = state.input_gate(id) else {
            continue;
        };
        let Some(entity) = state.entity(id) else {
            continue;
        };
        let frame = config
            .frame_override
            .unwrap_or_else(|| state.world.frame_rotation(id));
        let resolution = resolve(&entity.queue, entity.mode, frame, &gate);

        match resolution {
            Resolution::Move(step) if !step.is_zero() => {
                let from = state.world.position(id);
                let to = state.world.apply_intent(id, step);
                if let (Some(from), Some(to)) = (from, to) {
                    if from != to {
                        state.push_event(SyncEvent::moved(tick, id, from, to));
                    }
                }
            }
            Resolution::Move(_) => {}
            Resolution::Blocked => {
                trace!("Input of {} blocked", id);
            }
            Resolution::GhostRequested => {
                // Only on fresh input, not every tick the key stays down
                if inputs.contains_key(&id) {
                    state.push_event(SyncEvent::ghost_requested(tick, id));
                }
            }
        }
        result.resolutions.insert(id, resolution);
    }

    // 4. Collect events
    let mut events = state.take_events();
    events.sort();
    result.events = events;

    result
}

// =============================================================================
// TESTS
// =============================================================================
