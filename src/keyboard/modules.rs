//! Pointer-module kinematics.
//!
//! Converts analog deltas from attached modules (touchpad, trackball,
//! trackpoint, key cluster) into cursor motion, scroll ticks or discrete
//! key events, depending on the navigation mode the active layer selects.
//! Discrete modes engage an axis lock: once a tick fires on an axis,
//! subsequent motion is biased to stay on it until the module goes idle.

#[allow(unused_imports)]
use micromath::F32Ext;

use serde::{Deserialize, Serialize};

use super::actions::KeyAction;
use super::keys::KeyState;
use super::layers::{LayerId, LAYER_COUNT};

/// Attachable pointer modules
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum ModuleId {
    KeyClusterLeft,
    TrackballRight,
    TrackpointRight,
    TouchpadRight,
}

pub const MODULE_COUNT: usize = 4;

impl ModuleId {
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Modules whose sensor y axis grows toward the user
    fn y_inversion(self) -> f32 {
        match self {
            ModuleId::KeyClusterLeft | ModuleId::TouchpadRight => -1.0,
            ModuleId::TrackballRight | ModuleId::TrackpointRight => 1.0,
        }
    }
}

/// What module motion drives on a given layer
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum NavigationMode {
    Cursor,
    Scroll,
    Caret,
    Media,
    None,
}

/// Axis a discrete-tick emitter is locked onto
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CaretAxis {
    Horizontal,
    Vertical,
}

impl CaretAxis {
    const fn index(self) -> usize {
        self as usize
    }

    const fn other(self) -> CaretAxis {
        match self {
            CaretAxis::Horizontal => CaretAxis::Vertical,
            CaretAxis::Vertical => CaretAxis::Horizontal,
        }
    }
}

/// Key actions fired for motion along one axis
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct AxisActions {
    pub positive: KeyAction,
    pub negative: KeyAction,
}

/// Per-mode table of discrete actions, indexed by axis
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct CaretConfiguration {
    pub axis_actions: [AxisActions; 2],
}

/// Parsed per-module configuration record
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct ModuleConfiguration {
    pub base_speed: f32,
    pub speed: f32,
    pub acceleration: f32,
    pub caret_speed_divisor: f32,
    pub scroll_speed_divisor: f32,
    /// Off-axis attenuation while an axis lock is engaged
    pub caret_lock_skew: f32,
    /// Attenuation of both axes before the first tick engages a lock
    pub caret_lock_skew_first_tick: f32,
    pub cursor_axis_lock: bool,
    pub scroll_axis_lock: bool,
    /// Swap the two sensor axes
    pub invert_axis: bool,
    pub navigation_modes: [NavigationMode; LAYER_COUNT],
    pub caret_actions: CaretConfiguration,
    pub media_actions: CaretConfiguration,
}

impl ModuleConfiguration {
    fn caret_configuration(&self, mode: NavigationMode) -> &CaretConfiguration {
        match mode {
            NavigationMode::Media => &self.media_actions,
            _ => &self.caret_actions,
        }
    }
}

/// Lightweight handle to a discrete caret action; resolved against the
/// module configuration at each use so reconfiguration cannot dangle it.
#[derive(Clone, Copy, PartialEq, Debug)]
pub struct CaretActionRef {
    pub module: ModuleId,
    pub mode: NavigationMode,
    pub axis: CaretAxis,
    pub positive: bool,
}

impl CaretActionRef {
    pub fn resolve(&self, config: &ModuleConfiguration) -> KeyAction {
        let actions = &config.caret_configuration(self.mode).axis_actions[self.axis.index()];
        if self.positive {
            actions.positive
        } else {
            actions.negative
        }
    }
}

/// What the engine must apply after one kinematic step
#[derive(Clone, Copy, PartialEq, Debug)]
pub enum KineticOutput {
    None,
    /// Add to the mouse report x/y
    Pointer { x: i16, y: i16 },
    /// Add to the mouse report wheels
    Wheel { x: i16, y: i16 },
    /// Run the caret fake key through the action applier
    ApplyFake(CaretActionRef),
}

/// Average speed at which the driver multiplier equals 1.0, px/ms
const MID_SPEED: f32 = 3.0;

/// Axis lock releases after this much inactivity
const AXIS_LOCK_TIMEOUT_MS: u32 = 500;

const KEY_CLUSTER_CURSOR_SPEED: f32 = 5.0;
const KEY_CLUSTER_DEFAULT_SPEED: f32 = 1.0;

/// Shared kinematic state.
///
/// One module at a time owns it; ownership changes reset the remainders and
/// the axis lock but deliberately leave an in-flight caret press intact so
/// its release still fires.
pub struct ModuleKineticState {
    owner: Option<(ModuleId, NavigationMode)>,
    caret_axis: Option<CaretAxis>,
    pub caret_fake_key: KeyState,
    pub caret_action: Option<CaretActionRef>,
    x_fraction_remainder: f32,
    y_fraction_remainder: f32,
    last_update: u32,
    current_speeds: [f32; MODULE_COUNT],
    last_speed_update: u32,
}

impl ModuleKineticState {
    pub const fn new() -> Self {
        Self {
            owner: None,
            caret_axis: None,
            caret_fake_key: KeyState::new(),
            caret_action: None,
            x_fraction_remainder: 0.0,
            y_fraction_remainder: 0.0,
            last_update: 0,
            current_speeds: [0.0; MODULE_COUNT],
            last_speed_update: 0,
        }
    }

    fn fake_key_in_flight(&self) -> bool {
        self.caret_fake_key.current || self.caret_fake_key.previous
    }

    fn reset(&mut self) {
        self.owner = None;
        self.caret_axis = None;
        self.x_fraction_remainder = 0.0;
        self.y_fraction_remainder = 0.0;
        self.last_update = 0;
        // caret_fake_key and caret_action stay, so an ongoing key action
        // completes its lifecycle
    }

    /// Process one cycle of deltas from `module`; `active_layer` selects the
    /// navigation mode.
    pub fn process_module(
        &mut self,
        module: ModuleId,
        x: f32,
        y: f32,
        config: &ModuleConfiguration,
        active_layer: LayerId,
        now: u32,
    ) -> KineticOutput {
        let mode = config.navigation_modes[active_layer.index()];

        let module_is_active = x != 0.0 || y != 0.0;
        let owner_differs = self.owner != Some((module, mode));
        if module_is_active && owner_differs && !self.fake_key_in_flight() {
            self.reset();
            self.owner = Some((module, mode));
        }

        if self.owner != Some((module, mode)) {
            return KineticOutput::None;
        }

        let (x, y) = if config.invert_axis { (y, x) } else { (x, y) };

        // process even when idle, an active fake key state needs advancing
        self.process_kinetic(module, mode, x, y, config, now)
    }

    fn process_kinetic(
        &mut self,
        module: ModuleId,
        mode: NavigationMode,
        x: f32,
        y: f32,
        config: &ModuleConfiguration,
        now: u32,
    ) -> KineticOutput {
        let y_inversion = module.y_inversion();

        let speed = if module == ModuleId::KeyClusterLeft {
            if mode == NavigationMode::Cursor {
                KEY_CLUSTER_CURSOR_SPEED
            } else {
                KEY_CLUSTER_DEFAULT_SPEED
            }
        } else {
            self.compute_module_speed(module, config, x, y, now)
        };

        match mode {
            NavigationMode::Cursor => {
                if config.cursor_axis_lock {
                    self.process_axis_locking(x, y, speed, y_inversion, 1.0, config, mode, module, now)
                } else {
                    self.x_fraction_remainder += x * speed;
                    self.y_fraction_remainder += y * speed;
                    let x_int = self.x_fraction_remainder.trunc();
                    let y_int = self.y_fraction_remainder.trunc();
                    self.x_fraction_remainder -= x_int;
                    self.y_fraction_remainder -= y_int;
                    KineticOutput::Pointer {
                        x: x_int as i16,
                        y: (-y_inversion * y_int) as i16,
                    }
                }
            }
            NavigationMode::Scroll => {
                if config.scroll_axis_lock {
                    self.process_axis_locking(
                        x,
                        y,
                        speed,
                        y_inversion,
                        config.scroll_speed_divisor,
                        config,
                        mode,
                        module,
                        now,
                    )
                } else {
                    self.x_fraction_remainder += x * speed / config.scroll_speed_divisor;
                    self.y_fraction_remainder += y * speed / config.scroll_speed_divisor;
                    let x_int = self.x_fraction_remainder.trunc();
                    let y_int = self.y_fraction_remainder.trunc();
                    self.x_fraction_remainder -= x_int;
                    self.y_fraction_remainder -= y_int;
                    KineticOutput::Wheel {
                        x: x_int as i16,
                        y: (y_inversion * y_int) as i16,
                    }
                }
            }
            NavigationMode::Caret | NavigationMode::Media => self.process_axis_locking(
                x,
                y,
                speed,
                y_inversion,
                config.caret_speed_divisor,
                config,
                mode,
                module,
                now,
            ),
            NavigationMode::None => KineticOutput::None,
        }
    }

    fn compute_module_speed(
        &mut self,
        module: ModuleId,
        config: &ModuleConfiguration,
        x: f32,
        y: f32,
        now: u32,
    ) -> f32 {
        if x != 0.0 || y != 0.0 {
            let elapsed = now.wrapping_sub(self.last_speed_update);
            let distance = (x * x + y * y).sqrt();
            self.current_speeds[module.index()] = distance / (elapsed + 1) as f32;
            self.last_speed_update = now;
        }

        let normalized = self.current_speeds[module.index()] / MID_SPEED;
        config.base_speed + config.speed * normalized.powf(config.acceleration)
    }

    #[allow(clippy::too_many_arguments)]
    fn process_axis_locking(
        &mut self,
        x: f32,
        y: f32,
        speed: f32,
        y_inversion: f32,
        speed_divisor: f32,
        config: &ModuleConfiguration,
        mode: NavigationMode,
        module: ModuleId,
        now: u32,
    ) -> KineticOutput {
        if x == 0.0 && y == 0.0 && self.caret_axis.is_none() {
            return KineticOutput::None;
        }

        // unlock after inactivity so a new gesture picks its own axis
        if x != 0.0 || y != 0.0 {
            if now.wrapping_sub(self.last_update) > AXIS_LOCK_TIMEOUT_MS && self.caret_axis.is_some()
            {
                self.x_fraction_remainder = 0.0;
                self.y_fraction_remainder = 0.0;
                self.caret_axis = None;
            }
            self.last_update = now;
        }

        // the locked axis stays at full rate, the other is skewed down
        let (x_multiplier, y_multiplier) = match self.caret_axis {
            None => (
                config.caret_lock_skew_first_tick,
                config.caret_lock_skew_first_tick,
            ),
            Some(CaretAxis::Horizontal) => (1.0, config.caret_lock_skew),
            Some(CaretAxis::Vertical) => (config.caret_lock_skew, 1.0),
        };

        self.x_fraction_remainder += x * speed / speed_divisor * x_multiplier;
        self.y_fraction_remainder += y * speed / speed_divisor * y_multiplier;

        if self.fake_key_in_flight() {
            // an ongoing action runs its full press/release lifecycle
            self.advance_fake_key();
            match self.caret_action {
                Some(action) => KineticOutput::ApplyFake(action),
                None => KineticOutput::None,
            }
        } else {
            self.start_new_tick(y_inversion, mode, module)
        }
    }

    fn advance_fake_key(&mut self) {
        let fake = &mut self.caret_fake_key;
        let previous = fake.current;
        fake.current = !fake.previous;
        fake.previous = previous;
    }

    fn start_new_tick(
        &mut self,
        y_inversion: f32,
        mode: NavigationMode,
        module: ModuleId,
    ) -> KineticOutput {
        let remainders = [self.x_fraction_remainder, self.y_fraction_remainder];
        let integer_parts = [remainders[0].trunc(), remainders[1].trunc()];

        // previously locked axis first, vertical as the fallback bias
        let mut candidate = self.caret_axis.unwrap_or(CaretAxis::Vertical);
        if integer_parts[candidate.index()] == 0.0 {
            if integer_parts[candidate.other().index()] == 0.0 {
                return KineticOutput::None;
            }
            candidate = candidate.other();
        }

        self.caret_axis = Some(candidate);
        let int_part = integer_parts[candidate.index()];
        let sgn: f32 = if int_part > 0.0 { 1.0 } else { -1.0 };
        let inversion = if candidate == CaretAxis::Vertical {
            y_inversion
        } else {
            1.0
        };

        match candidate.other() {
            CaretAxis::Horizontal => self.x_fraction_remainder = 0.0,
            CaretAxis::Vertical => self.y_fraction_remainder = 0.0,
        }
        match candidate {
            CaretAxis::Horizontal => self.x_fraction_remainder -= sgn,
            CaretAxis::Vertical => self.y_fraction_remainder -= sgn,
        }

        let value = int_part * inversion;
        match mode {
            NavigationMode::Cursor => KineticOutput::Pointer {
                x: if candidate == CaretAxis::Horizontal { value as i16 } else { 0 },
                y: if candidate == CaretAxis::Vertical { (-value) as i16 } else { 0 },
            },
            NavigationMode::Scroll => KineticOutput::Wheel {
                x: if candidate == CaretAxis::Horizontal { value as i16 } else { 0 },
                y: if candidate == CaretAxis::Vertical { value as i16 } else { 0 },
            },
            NavigationMode::Caret | NavigationMode::Media => {
                let action = CaretActionRef {
                    module,
                    mode,
                    axis: candidate,
                    positive: sgn * inversion > 0.0,
                };
                self.caret_action = Some(action);
                self.caret_fake_key.current = true;
                KineticOutput::ApplyFake(action)
            }
            NavigationMode::None => KineticOutput::None,
        }
    }
}

impl Default for ModuleKineticState {
    fn default() -> Self {
        Self::new()
    }
}
