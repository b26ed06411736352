//! Active layer computation from held, toggled and double-tapped switchers.
//!
//! Holds are volatile: the key applier re-registers them every cycle while
//! the switcher key stays active, and [`LayerSwitcher::update_active_layer`]
//! consumes them at the start of the next cycle. A latched toggle takes
//! priority over holds; `Hold` mode switchers cancel a latched toggle of
//! their layer on activation.

use serde::{Deserialize, Serialize};

use super::keys::{KeyRef, KeyState};

/// Keymap overlay id
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum LayerId {
    Base,
    Mod,
    Fn,
    Mouse,
}

pub const LAYER_COUNT: usize = 4;

impl LayerId {
    pub const fn index(self) -> usize {
        self as usize
    }
}

#[derive(Clone, Copy)]
struct PendingDoubleTap {
    layer: LayerId,
    key: KeyRef,
    pressed_at: u32,
}

pub struct LayerSwitcher {
    active_layer: LayerId,
    active_layer_held: bool,
    held_this_cycle: Option<LayerId>,
    toggled_layer: Option<LayerId>,
    pending_double_tap: Option<PendingDoubleTap>,
    double_tap_timeout: u16,
}

impl LayerSwitcher {
    pub const fn new(double_tap_timeout: u16) -> Self {
        Self {
            active_layer: LayerId::Base,
            active_layer_held: false,
            held_this_cycle: None,
            toggled_layer: None,
            pending_double_tap: None,
            double_tap_timeout,
        }
    }

    pub fn active_layer(&self) -> LayerId {
        self.active_layer
    }

    /// True when a hold is the reason the active layer is active
    pub fn active_layer_held(&self) -> bool {
        self.active_layer_held
    }

    /// Register a hold for this cycle; the first registration wins
    pub fn hold_layer(&mut self, layer: LayerId) {
        if self.held_this_cycle.is_none() {
            self.held_this_cycle = Some(layer);
        }
    }

    /// Latch a toggle; it persists until untoggled
    pub fn toggle_layer(&mut self, layer: LayerId) {
        self.toggled_layer = Some(layer);
    }

    /// Cancel a latched toggle of the given layer, leaving holds alone
    pub fn untoggle_layer_only(&mut self, layer: LayerId) {
        if self.toggled_layer == Some(layer) {
            self.toggled_layer = None;
        }
    }

    /// Track press edges of a `HoldAndDoubleTapToggle` switcher.
    ///
    /// A second press of the same key within the timeout latches the toggle;
    /// pressing the key again while its layer is toggled untoggles it. The
    /// hold effect of the key is applied separately through [`Self::hold_layer`].
    pub fn double_tap_toggle(&mut self, layer: LayerId, key: KeyRef, key_state: &KeyState, now: u32) {
        if !key_state.activated_now() {
            return;
        }

        if self.toggled_layer == Some(layer) {
            self.toggled_layer = None;
            self.pending_double_tap = None;
            return;
        }

        match self.pending_double_tap {
            Some(tap)
                if tap.key == key
                    && tap.layer == layer
                    && now.wrapping_sub(tap.pressed_at) <= self.double_tap_timeout as u32 =>
            {
                debug!("layer {:?} toggled by double tap", layer);
                self.toggled_layer = Some(layer);
                self.pending_double_tap = None;
            }
            _ => {
                self.pending_double_tap = Some(PendingDoubleTap {
                    layer,
                    key,
                    pressed_at: now,
                });
            }
        }
    }

    /// Any other key activating cancels a pending double tap
    pub fn double_tap_interrupt(&mut self, key: KeyRef) {
        if let Some(tap) = self.pending_double_tap {
            if tap.key != key {
                self.pending_double_tap = None;
            }
        }
    }

    /// Compute the active layer from the inputs gathered since the last call
    pub fn update_active_layer(&mut self) -> LayerId {
        let mut active = self.toggled_layer.unwrap_or(LayerId::Base);
        if active == LayerId::Base {
            active = self.held_this_cycle.unwrap_or(LayerId::Base);
        }
        self.active_layer_held = active != LayerId::Base && self.held_this_cycle == Some(active);
        self.held_this_cycle = None;
        self.active_layer = active;
        active
    }
}
