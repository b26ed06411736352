//! Per-key state tracking with time-gated debouncing.

/// Physical mounting locations with their own addressable keys
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum SlotId {
    RightHalf,
    LeftHalf,
    LeftModule,
    RightModule,
}

pub const SLOT_COUNT: usize = 4;
pub const MAX_KEYS_PER_SLOT: usize = 35;

impl SlotId {
    pub const ALL: [SlotId; SLOT_COUNT] = [
        SlotId::RightHalf,
        SlotId::LeftHalf,
        SlotId::LeftModule,
        SlotId::RightModule,
    ];

    pub const fn index(self) -> usize {
        self as usize
    }
}

/// Stable key identity.
///
/// The synthetic variant names the fake key the caret emitter drives through
/// the normal action pipeline; ownership checks (sticky modifiers, double-tap
/// tracking) compare these values, never addresses.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum KeyRef {
    Matrix { slot: SlotId, key: u8 },
    Synthetic,
}

/// State of a single key switch
#[derive(Clone, Copy, Default, Debug)]
pub struct KeyState {
    /// Matrix value sampled this cycle
    pub hardware_switch_state: bool,
    debounced_switch_state: bool,
    debouncing: bool,
    timestamp: u32,
    /// Logical pressed state exposed to the action engine. Only
    /// `Engine::commit_key_state` may change it.
    pub current: bool,
    /// Last cycle's logical state, committed at end of each cycle
    pub previous: bool,
}

impl KeyState {
    pub const fn new() -> Self {
        Self {
            hardware_switch_state: false,
            debounced_switch_state: false,
            debouncing: false,
            timestamp: 0,
            current: false,
            previous: false,
        }
    }

    pub fn active(&self) -> bool {
        self.current
    }

    pub fn non_zero(&self) -> bool {
        self.current || self.previous
    }

    pub fn activated_now(&self) -> bool {
        self.current && !self.previous
    }

    pub fn activated_earlier(&self) -> bool {
        self.current && self.previous
    }

    pub fn deactivated_now(&self) -> bool {
        !self.current && self.previous
    }

    /// Advance the debounce gate against the sampled hardware state.
    ///
    /// Returns the new logical state when a debounced edge fires; the caller
    /// routes it through the postponer before it reaches `current`.
    pub fn debounce(&mut self, now: u32, press_ms: u8, release_ms: u8) -> Option<bool> {
        let threshold = if self.previous { press_ms } else { release_ms };
        if self.debouncing && now.wrapping_sub(self.timestamp) > threshold as u32 {
            self.debouncing = false;
        }

        if !self.debouncing && self.debounced_switch_state != self.hardware_switch_state {
            self.timestamp = now;
            self.debouncing = true;
            self.debounced_switch_state = self.hardware_switch_state;
            return Some(self.debounced_switch_state);
        }
        None
    }
}

/// Key states of all slots
pub struct KeyStates {
    slots: [[KeyState; MAX_KEYS_PER_SLOT]; SLOT_COUNT],
}

impl KeyStates {
    pub const fn new() -> Self {
        Self {
            slots: [[KeyState::new(); MAX_KEYS_PER_SLOT]; SLOT_COUNT],
        }
    }

    pub fn get(&self, slot: SlotId, key: usize) -> &KeyState {
        &self.slots[slot.index()][key]
    }

    pub fn get_mut(&mut self, slot: SlotId, key: usize) -> &mut KeyState {
        &mut self.slots[slot.index()][key]
    }

    pub fn set_hardware_state(&mut self, slot: SlotId, key: usize, active: bool) {
        if key < MAX_KEYS_PER_SLOT {
            self.slots[slot.index()][key].hardware_switch_state = active;
        }
    }
}

impl Default for KeyStates {
    fn default() -> Self {
        Self::new()
    }
}
