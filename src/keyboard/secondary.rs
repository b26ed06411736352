//! Hold-vs-tap disambiguation of keys with a secondary role.
//!
//! A resolution starts when such a key activates and stays undecided while
//! nothing disambiguates it; the applier keeps the postponer alive in the
//! meantime. A postponed press of another key resolves to `Secondary`, a
//! postponed release of the key itself resolves to `Primary`, and a long
//! lonely hold times out to `Secondary`. The decision is latched until the
//! key deactivates.

use heapless::Vec;

use super::keys::{KeyRef, KeyState};
use super::postponer::Postponer;

/// Most simultaneously unresolved secondary-role keys
const MAX_RESOLUTIONS: usize = 8;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SecondaryRoleState {
    Primary,
    Secondary,
    DontKnowYet,
}

#[derive(Clone, Copy)]
struct Resolution {
    key: KeyRef,
    state: SecondaryRoleState,
    activated_at: u32,
}

pub struct SecondaryRoleDriver {
    resolutions: Vec<Resolution, MAX_RESOLUTIONS>,
}

impl SecondaryRoleDriver {
    pub const fn new() -> Self {
        Self {
            resolutions: Vec::new(),
        }
    }

    /// Resolve the role of `key`, starting a new resolution on its press edge
    pub fn resolve(
        &mut self,
        key: KeyRef,
        key_state: &KeyState,
        postponer: &Postponer,
        now: u32,
        timeout: u16,
    ) -> SecondaryRoleState {
        if key_state.activated_now() && !self.resolutions.iter().any(|r| r.key == key) {
            let new = Resolution {
                key,
                state: SecondaryRoleState::DontKnowYet,
                activated_at: now,
            };
            if self.resolutions.push(new).is_err() {
                // out of slots, degrade to a plain keystroke
                return SecondaryRoleState::Primary;
            }
        }

        let resolution = match self.resolutions.iter_mut().find(|r| r.key == key) {
            Some(r) => r,
            None => return SecondaryRoleState::Primary,
        };

        if resolution.state == SecondaryRoleState::DontKnowYet {
            if postponer.pending_release_of(key) {
                resolution.state = SecondaryRoleState::Primary;
            } else if postponer.pending_press_of_other(key) {
                resolution.state = SecondaryRoleState::Secondary;
            } else if now.wrapping_sub(resolution.activated_at) >= timeout as u32 {
                resolution.state = SecondaryRoleState::Secondary;
            }
        }
        resolution.state
    }

    /// Forget the latched decision once the key has deactivated
    pub fn release(&mut self, key: KeyRef) {
        if let Some(pos) = self.resolutions.iter().position(|r| r.key == key) {
            self.resolutions.swap_remove(pos);
        }
    }
}

impl Default for SecondaryRoleDriver {
    fn default() -> Self {
        Self::new()
    }
}
