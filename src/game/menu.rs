//! Context Menu Entries
//!
//! Entries the restraint core contributes to an entity's right-click menu.
//! Rendering belongs to the client; this only decides what is offered.

use serde::{Serialize, Deserialize};

use crate::game::state::NetId;

/// One menu entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "entry", rename_all = "snake_case")]
pub enum MenuEntry {
    /// Take the cuffs off `target`
    Uncuff { target: NetId },
}

impl MenuEntry {
    /// Display label.
    pub fn label(&self) -> &'static str {
        match self {
            MenuEntry::Uncuff { .. } => "Uncuff",
        }
    }
}

/// Entries for `target` as seen by `viewer`.
///
/// Offers "Uncuff" when the viewer is someone else and the target is
/// restrained.
pub fn restraint_entries(viewer: Option<NetId>, target: NetId, restrained: bool) -> Vec<MenuEntry> {
    let mut entries = Vec::new();
    if restrained && viewer != Some(target) {
        entries.push(MenuEntry::Uncuff { target });
    }
    entries
}
