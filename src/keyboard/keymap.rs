//! Keymap table and the per-press action cache.

use super::actions::KeyAction;
use super::keys::{SlotId, MAX_KEYS_PER_SLOT, SLOT_COUNT};
use super::layers::{LayerId, LAYER_COUNT};

/// Three-dimensional action table: layer, slot, key
pub struct Keymap {
    pub layers: [[[KeyAction; MAX_KEYS_PER_SLOT]; SLOT_COUNT]; LAYER_COUNT],
}

impl Keymap {
    pub const EMPTY: Keymap = Keymap {
        layers: [[[KeyAction::None; MAX_KEYS_PER_SLOT]; SLOT_COUNT]; LAYER_COUNT],
    };

    pub fn action(&self, layer: LayerId, slot: SlotId, key: usize) -> KeyAction {
        self.layers[layer.index()][slot.index()][key]
    }
}

/// Snapshot of the action observed when a key went down.
///
/// Subsequent cycles of the same press always read the cached action, so
/// keymap or layer changes mid-press cannot retarget the press.
pub struct ActionCache {
    cached: [[KeyAction; MAX_KEYS_PER_SLOT]; SLOT_COUNT],
}

impl ActionCache {
    pub const fn new() -> Self {
        Self {
            cached: [[KeyAction::None; MAX_KEYS_PER_SLOT]; SLOT_COUNT],
        }
    }

    pub fn capture(&mut self, slot: SlotId, key: usize, action: KeyAction) {
        self.cached[slot.index()][key] = action;
    }

    pub fn get(&self, slot: SlotId, key: usize) -> KeyAction {
        self.cached[slot.index()][key]
    }
}

impl Default for ActionCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keyboard::actions::scancodes;

    #[test]
    fn cache_keeps_capture_until_overwritten() {
        let mut cache = ActionCache::new();
        let action = KeyAction::key(scancodes::A);
        cache.capture(SlotId::LeftHalf, 7, action);
        assert_eq!(cache.get(SlotId::LeftHalf, 7), action);
        assert_eq!(cache.get(SlotId::RightHalf, 7), KeyAction::None);
        cache.capture(SlotId::LeftHalf, 7, KeyAction::key(scancodes::TAB));
        assert_ne!(cache.get(SlotId::LeftHalf, 7), action);
    }

    #[test]
    fn empty_keymap_is_all_none() {
        let map = Keymap::EMPTY;
        assert_eq!(map.action(LayerId::Fn, SlotId::RightModule, 0), KeyAction::None);
    }
}
