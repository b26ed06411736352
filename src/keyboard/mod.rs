//! Core input-report engine.
//!
//! [`Engine::update`] runs once per firmware tick: it debounces the sampled
//! matrix, resolves every key to its semantic action on the active layer,
//! integrates keystroke-driven mouse motion and module pointer deltas, and
//! fills the four HID reports, handing changed ones to the USB layer.

/// Semantic key actions and HID constants
pub mod actions;
/// HID report structures and send bookkeeping
pub mod hid;
/// Active layer computation
pub mod layers;
/// Pointer-module kinematics
pub mod modules;
/// Keystroke-driven mouse emulation
pub mod mouse;

mod keymap;
mod keys;
mod postponer;
mod secondary;

pub use keymap::Keymap;
pub use keys::{KeyRef, KeyState, SlotId, MAX_KEYS_PER_SLOT, SLOT_COUNT};
pub use postponer::Postponer;
pub use secondary::SecondaryRoleState;

use serde::{Deserialize, Serialize};

use crate::config;
use actions::{KeyAction, Keystroke, MouseAction, SecondaryRole, SwitchLayerMode};
use hid::{
    BasicKeyboardReport, InterfaceMask, MediaKeyboardReport, MouseReport, ReportPair,
    SystemKeyboardReport, UsbInterface, UsbReportSink,
};
use keymap::ActionCache;
use keys::KeyStates;
use layers::{LayerId, LayerSwitcher};
use modules::{
    KineticOutput, ModuleConfiguration, ModuleId, ModuleKineticState, MODULE_COUNT,
};
use mouse::{KineticTuning, MouseKineticState, MouseStates};
use secondary::SecondaryRoleDriver;

/// Engine tunables; the configuration parser overrides the defaults
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct EngineConfig {
    pub debounce_time_press: u8,
    pub debounce_time_release: u8,
    pub usb_semaphore_timeout: u32,
    pub compensate_diagonal_speed: bool,
    pub double_tap_toggle_timeout: u16,
    pub secondary_role_timeout: u16,
    pub mouse_move_tuning: KineticTuning,
    pub mouse_scroll_tuning: KineticTuning,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            debounce_time_press: config::DEBOUNCE_TIME_PRESS,
            debounce_time_release: config::DEBOUNCE_TIME_RELEASE,
            usb_semaphore_timeout: config::USB_SEMAPHORE_TIMEOUT,
            compensate_diagonal_speed: false,
            double_tap_toggle_timeout: config::DOUBLE_TAP_TOGGLE_TIMEOUT,
            secondary_role_timeout: config::SECONDARY_ROLE_TIMEOUT,
            mouse_move_tuning: config::MOUSE_MOVE_TUNING,
            mouse_scroll_tuning: config::MOUSE_SCROLL_TUNING,
        }
    }
}

/// Accumulated events from the touchpad module
#[derive(Clone, Copy, Default, Debug)]
pub struct TouchpadEvents {
    pub x: i16,
    pub y: i16,
    pub single_tap: bool,
    pub two_finger_tap: bool,
    pub tap_and_hold: bool,
}

#[derive(Clone, Copy, Default, Debug)]
pub struct PointerDelta {
    pub x: i16,
    pub y: i16,
}

/// State of one attached module slot
#[derive(Clone, Copy, Debug)]
pub struct ModuleSlotState {
    pub module_id: ModuleId,
    pub pointer_count: u8,
    pub pointer_delta: PointerDelta,
}

/// Per-cycle inputs; pointer accumulators are zeroed as they are consumed
pub struct CycleInputs<'i> {
    pub right_matrix: &'i [bool],
    pub touchpad: Option<&'i mut TouchpadEvents>,
    pub modules: &'i mut [ModuleSlotState],
}

/// Reports produced by the macro interpreter while a macro plays
#[derive(Clone, Default)]
pub struct MacroReports {
    pub basic: BasicKeyboardReport,
    pub media: MediaKeyboardReport,
    pub system: SystemKeyboardReport,
    pub mouse: MouseReport,
}

/// Boundary to the macro interpreter
pub trait MacroDriver {
    fn is_playing(&self) -> bool;
    /// Advance the playing macro by one cycle and produce its reports
    fn continue_macro(&mut self) -> MacroReports;
    fn start_macro(&mut self, macro_id: u8);
}

// Action modifiers of composed keystrokes. Activated on keydown, reset when
// another key activates. With a held layer they may outlive their key until
// the layer releases, which is what makes Alt+Tab style mappings usable.
#[derive(Default)]
struct StickyModifiers {
    mask: u8,
    key: Option<KeyRef>,
    should_stick: bool,
}

struct Reports {
    basic: ReportPair<BasicKeyboardReport>,
    media: ReportPair<MediaKeyboardReport>,
    system: ReportPair<SystemKeyboardReport>,
    mouse: ReportPair<MouseReport>,
}

/// The input-report engine; owns all keyboard-logic state
pub struct Engine<'a> {
    config: EngineConfig,
    keymaps: &'a [Keymap],
    current_keymap: usize,
    module_configs: &'a [ModuleConfiguration; MODULE_COUNT],
    key_states: KeyStates,
    action_cache: ActionCache,
    layer_switcher: LayerSwitcher,
    previous_layer: LayerId,
    postponer: Postponer,
    secondary_roles: SecondaryRoleDriver,
    mouse_states: MouseStates,
    move_state: MouseKineticState,
    scroll_state: MouseKineticState,
    module_kinetic: ModuleKineticState,
    sticky: StickyModifiers,
    reports: Reports,
    semaphore: InterfaceMask,
    last_run_time: u32,
    mouse_update_time: u32,
    update_counter: u32,
    now: u32,
}

impl<'a> Engine<'a> {
    pub fn new(
        keymaps: &'a [Keymap],
        module_configs: &'a [ModuleConfiguration; MODULE_COUNT],
        config: EngineConfig,
    ) -> Self {
        debug_assert!(!keymaps.is_empty());
        Self {
            keymaps,
            current_keymap: 0,
            module_configs,
            key_states: KeyStates::new(),
            action_cache: ActionCache::new(),
            layer_switcher: LayerSwitcher::new(config.double_tap_toggle_timeout),
            previous_layer: LayerId::Base,
            postponer: Postponer::new(),
            secondary_roles: SecondaryRoleDriver::new(),
            mouse_states: MouseStates::new(),
            move_state: MouseKineticState::new_move(config.mouse_move_tuning),
            scroll_state: MouseKineticState::new_scroll(config.mouse_scroll_tuning),
            module_kinetic: ModuleKineticState::new(),
            sticky: StickyModifiers::default(),
            reports: Reports {
                basic: ReportPair::new(),
                media: ReportPair::new(),
                system: ReportPair::new(),
                mouse: ReportPair::new(),
            },
            semaphore: InterfaceMask::default(),
            last_run_time: 0,
            mouse_update_time: 0,
            update_counter: 0,
            now: 0,
            config,
        }
    }

    /// Entry point for transport drivers delivering key states of the left
    /// half and module key slots
    pub fn set_hardware_key_state(&mut self, slot: SlotId, key: usize, active: bool) {
        self.key_states.set_hardware_state(slot, key, active);
    }

    /// USB layer acknowledgment that the interface's report went out
    pub fn report_sent(&mut self, interface: UsbInterface) {
        self.semaphore.set(interface, false);
    }

    /// Entry point for the macro interpreter to latch virtual mouse states
    pub fn toggle_mouse_state(&mut self, action: MouseAction, activate: bool) {
        if activate {
            self.mouse_states.toggle_on(action);
            mouse::activate_direction_signs(&mut self.move_state, &mut self.scroll_state, action);
        } else {
            self.mouse_states.toggle_off(action);
        }
    }

    pub fn active_layer(&self) -> LayerId {
        self.layer_switcher.active_layer()
    }

    pub fn update_counter(&self) -> u32 {
        self.update_counter
    }

    pub fn mouse_report(&self) -> &MouseReport {
        self.reports.mouse.active()
    }

    pub fn basic_keyboard_report(&self) -> &BasicKeyboardReport {
        self.reports.basic.active()
    }

    /// Run one update cycle at time `now` (monotonic ms).
    ///
    /// Skips the cycle while a previous report is still in flight, unless
    /// the in-flight marker is older than the semaphore timeout.
    pub fn update<U: UsbReportSink, M: MacroDriver>(
        &mut self,
        now: u32,
        inputs: &mut CycleInputs<'_>,
        usb: &mut U,
        macros: &mut M,
    ) {
        for (key, pressed) in inputs.right_matrix.iter().enumerate() {
            self.key_states
                .set_hardware_state(SlotId::RightHalf, key, *pressed);
        }

        self.now = now;
        if self.semaphore.any() {
            if now.wrapping_sub(self.last_run_time) < self.config.usb_semaphore_timeout {
                return;
            }
            warn!("usb report semaphore stuck, force clearing");
            self.semaphore.clear_all();
        }
        self.last_run_time = now;
        self.update_counter = self.update_counter.wrapping_add(1);

        self.reports.basic.reset_active();
        self.reports.media.reset_active();
        self.reports.system.reset_active();
        self.reports.mouse.reset_active();

        self.update_active_reports(inputs, macros);
        self.flush_reports(usb);
    }

    fn keymap(&self) -> &Keymap {
        &self.keymaps[self.current_keymap]
    }

    fn update_active_reports<M: MacroDriver>(&mut self, inputs: &mut CycleInputs<'_>, macros: &mut M) {
        if macros.is_playing() {
            let produced = macros.continue_macro();
            *self.reports.basic.active_mut() = produced.basic;
            *self.reports.media.active_mut() = produced.media;
            *self.reports.system.active_mut() = produced.system;
            *self.reports.mouse.active_mut() = produced.mouse;
            return;
        }

        // persistent toggled virtual mouse states participate in this cycle
        self.mouse_states.begin_cycle();

        let layer = self.layer_switcher.update_active_layer();
        if layer != self.previous_layer {
            debug!("active layer changed to {:?}", layer);
            self.previous_layer = layer;
            self.sticky.mask = 0;
        }

        if self.postponer.is_active() {
            let key_states = &mut self.key_states;
            self.postponer.run_postponed_events(|key, active| {
                if let KeyRef::Matrix { slot, key } = key {
                    key_states.get_mut(slot, key as usize).current = active;
                }
            });
        }

        for slot in SlotId::ALL {
            for key in 0..MAX_KEYS_PER_SLOT {
                self.process_key(slot, key, macros);
            }
        }

        self.process_mouse_actions(inputs, macros);

        self.postponer.finish_cycle();

        // a released key's action modifiers survive here as long as they
        // should stick
        self.reports.basic.active_mut().modifiers |= self.sticky.mask;
    }

    fn process_key<M: MacroDriver>(&mut self, slot: SlotId, key: usize, macros: &mut M) {
        let key_ref = KeyRef::Matrix {
            slot,
            key: key as u8,
        };
        let mut state = *self.key_states.get(slot, key);

        if let Some(active) = state.debounce(
            self.now,
            self.config.debounce_time_press,
            self.config.debounce_time_release,
        ) {
            if self.postponer.is_active() {
                self.postponer.track_key_event(key_ref, active);
            } else {
                state.current = active;
            }
        }

        if state.non_zero() {
            if state.activated_now() {
                let action = self
                    .keymap()
                    .action(self.layer_switcher.active_layer(), slot, key);
                self.action_cache.capture(slot, key, action);
                self.layer_switcher.double_tap_interrupt(key_ref);
            }

            let action = self.action_cache.get(slot, key);
            let action_base = self.keymap().action(LayerId::Base, slot, key);

            self.apply_layer_holds(&state, &action_base);
            self.apply_key_action(key_ref, &mut state, &action, &action_base, macros);

            state.previous = state.current;
        }

        *self.key_states.get_mut(slot, key) = state;
    }

    // Holds always derive from the current base layer action.
    fn apply_layer_holds(&mut self, state: &KeyState, action_base: &KeyAction) {
        if let KeyAction::SwitchLayer { layer, mode } = action_base {
            if state.active()
                && matches!(
                    mode,
                    SwitchLayerMode::Hold | SwitchLayerMode::HoldAndDoubleTapToggle
                )
            {
                self.layer_switcher.hold_layer(*layer);
            }
        }

        // While another layer is active, base-layer switcher secondary roles
        // hold their layer unconditionally; this makes them act like plain
        // layer holds until the active layer releases.
        if self.layer_switcher.active_layer() != LayerId::Base && state.active() {
            if let KeyAction::Keystroke(keystroke) = action_base {
                if let Some(SecondaryRole::Layer(layer)) = keystroke.secondary_role {
                    self.layer_switcher.hold_layer(layer);
                }
            }
        }
    }

    fn apply_key_action<M: MacroDriver>(
        &mut self,
        key_ref: KeyRef,
        state: &mut KeyState,
        action: &KeyAction,
        action_base: &KeyAction,
        macros: &mut M,
    ) {
        match action {
            KeyAction::Keystroke(keystroke) => {
                if state.non_zero() {
                    self.apply_keystroke(key_ref, state, keystroke, action_base);
                }
            }
            KeyAction::Mouse(mouse_action) => {
                if state.activated_now() {
                    self.sticky.mask = 0;
                    mouse::activate_direction_signs(
                        &mut self.move_state,
                        &mut self.scroll_state,
                        *mouse_action,
                    );
                }
                self.mouse_states.activate(*mouse_action);
            }
            KeyAction::SwitchLayer { layer, mode } => {
                if state.current != state.previous {
                    self.apply_toggle_layer_action(key_ref, state, *layer, *mode);
                }
            }
            KeyAction::SwitchKeymap(keymap) => {
                if state.activated_now() {
                    self.sticky.mask = 0;
                    self.switch_keymap(*keymap);
                }
            }
            KeyAction::PlayMacro(macro_id) => {
                if state.activated_now() {
                    self.sticky.mask = 0;
                    debug!("starting macro {}", *macro_id);
                    macros.start_macro(*macro_id);
                }
            }
            KeyAction::None => {}
        }
    }

    // Toggle effects run on the cached action; hold effects are handled by
    // apply_layer_holds.
    fn apply_toggle_layer_action(
        &mut self,
        key_ref: KeyRef,
        state: &KeyState,
        layer: LayerId,
        mode: SwitchLayerMode,
    ) {
        match mode {
            SwitchLayerMode::HoldAndDoubleTapToggle => {
                self.layer_switcher
                    .double_tap_toggle(layer, key_ref, state, self.now);
            }
            SwitchLayerMode::Toggle => {
                if state.activated_now() {
                    self.layer_switcher.toggle_layer(layer);
                }
            }
            SwitchLayerMode::Hold => {
                if state.activated_now() {
                    self.layer_switcher.untoggle_layer_only(layer);
                }
            }
        }
    }

    fn apply_keystroke(
        &mut self,
        key_ref: KeyRef,
        state: &KeyState,
        keystroke: &Keystroke,
        action_base: &KeyAction,
    ) {
        if keystroke.secondary_role.is_some() {
            match self.secondary_roles.resolve(
                key_ref,
                state,
                &self.postponer,
                self.now,
                self.config.secondary_role_timeout,
            ) {
                SecondaryRoleState::Primary => {
                    self.apply_keystroke_primary(key_ref, state, keystroke);
                }
                SecondaryRoleState::Secondary => {
                    self.apply_keystroke_secondary(keystroke, action_base);
                }
                SecondaryRoleState::DontKnowYet => {
                    // keep the postponer postponing until resolution
                    self.postponer.postpone_n_cycles(1);
                    return;
                }
            }
            if state.deactivated_now() {
                self.secondary_roles.release(key_ref);
            }
        } else {
            self.apply_keystroke_primary(key_ref, state, keystroke);
        }
    }

    fn apply_keystroke_primary(&mut self, key_ref: KeyRef, state: &KeyState, keystroke: &Keystroke) {
        if state.active() {
            let mut sticky_modifiers_changed = false;
            if keystroke.scancode != 0 {
                if state.activated_now() {
                    sticky_modifiers_changed = keystroke.modifiers != self.sticky.mask;
                    self.sticky.mask = keystroke.modifiers;
                    self.sticky.key = Some(key_ref);
                    self.sticky.should_stick =
                        self.layer_switcher.active_layer_held() && keystroke.is_sticky_shortcut();
                }
            } else {
                self.reports.basic.active_mut().modifiers |= keystroke.modifiers;
            }

            // with fresh modifiers the first report carries them alone, the
            // scancode follows from the next cycle on
            if !sticky_modifiers_changed || state.activated_earlier() {
                match keystroke.keystroke_type {
                    actions::KeystrokeType::Basic => {
                        self.reports
                            .basic
                            .active_mut()
                            .add_scancode(keystroke.scancode as u8);
                    }
                    actions::KeystrokeType::Media => {
                        self.reports.media.active_mut().add_scancode(keystroke.scancode);
                    }
                    actions::KeystrokeType::System => {
                        self.reports
                            .system
                            .active_mut()
                            .add_scancode(keystroke.scancode as u8);
                    }
                }
            }
        } else if state.deactivated_now()
            && self.sticky.key == Some(key_ref)
            && !self.sticky.should_stick
        {
            // one last report of the modifiers without the scancode
            self.reports.basic.active_mut().modifiers |= self.sticky.mask;
            self.sticky.mask = 0;
        }
    }

    fn apply_keystroke_secondary(&mut self, keystroke: &Keystroke, action_base: &KeyAction) {
        match keystroke.secondary_role {
            Some(SecondaryRole::Layer(layer)) => {
                // hold only while the cached role still matches the base
                // action; a keymap change mid-press must not leave a
                // half-lived hold
                if let KeyAction::Keystroke(base) = action_base {
                    if base.secondary_role == keystroke.secondary_role {
                        self.layer_switcher.hold_layer(layer);
                    }
                }
            }
            Some(SecondaryRole::Modifier(mask)) => {
                self.reports.basic.active_mut().modifiers |= mask;
            }
            None => {}
        }
    }

    fn switch_keymap(&mut self, keymap: u8) {
        if (keymap as usize) < self.keymaps.len() {
            info!("switching to keymap {}", keymap);
            self.current_keymap = keymap as usize;
        }
    }

    fn process_mouse_actions<M: MacroDriver>(&mut self, inputs: &mut CycleInputs<'_>, macros: &mut M) {
        let elapsed = self.now.wrapping_sub(self.mouse_update_time);
        self.mouse_update_time = self.now;

        self.move_state
            .process(&self.mouse_states, elapsed, self.config.compensate_diagonal_speed);
        let (x, y) = self.move_state.take_output();
        {
            let report = self.reports.mouse.active_mut();
            report.x = x;
            report.y = y;
        }

        self.scroll_state
            .process(&self.mouse_states, elapsed, self.config.compensate_diagonal_speed);
        let (wheel_x, wheel_y) = self.scroll_state.take_output();
        {
            let report = self.reports.mouse.active_mut();
            report.wheel_x = wheel_x;
            report.wheel_y = wheel_y;
        }

        let layer = self.layer_switcher.active_layer();
        let module_configs = self.module_configs;

        if let Some(touchpad) = inputs.touchpad.as_deref_mut() {
            let buttons = &mut self.reports.mouse.active_mut().buttons;
            if touchpad.single_tap {
                buttons.set_left(true);
                touchpad.single_tap = false;
            }
            if touchpad.two_finger_tap {
                buttons.set_right(true);
                touchpad.two_finger_tap = false;
            }
            if touchpad.tap_and_hold {
                buttons.set_left(true);
            }

            let output = self.module_kinetic.process_module(
                ModuleId::TouchpadRight,
                touchpad.x as f32,
                touchpad.y as f32,
                &module_configs[ModuleId::TouchpadRight.index()],
                layer,
                self.now,
            );
            self.apply_kinetic_output(output, macros);
            touchpad.x = 0;
            touchpad.y = 0;
        }

        for module in inputs.modules.iter_mut() {
            if module.pointer_count == 0 {
                continue;
            }
            let output = self.module_kinetic.process_module(
                module.module_id,
                module.pointer_delta.x as f32,
                module.pointer_delta.y as f32,
                &module_configs[module.module_id.index()],
                layer,
                self.now,
            );
            self.apply_kinetic_output(output, macros);
            module.pointer_delta = PointerDelta::default();
        }

        let states = &self.mouse_states;
        let buttons = &mut self.reports.mouse.active_mut().buttons;
        if states.is_active(MouseAction::LeftClick) {
            buttons.set_left(true);
        }
        if states.is_active(MouseAction::MiddleClick) {
            buttons.set_middle(true);
        }
        if states.is_active(MouseAction::RightClick) {
            buttons.set_right(true);
        }
        if states.is_active(MouseAction::Button4) {
            buttons.set_button_4(true);
        }
        if states.is_active(MouseAction::Button5) {
            buttons.set_button_5(true);
        }
        if states.is_active(MouseAction::Button6) {
            buttons.set_button_6(true);
        }
        if states.is_active(MouseAction::Button7) {
            buttons.set_button_7(true);
        }
        if states.is_active(MouseAction::Button8) {
            buttons.set_button_8(true);
        }
    }

    fn apply_kinetic_output<M: MacroDriver>(&mut self, output: KineticOutput, macros: &mut M) {
        match output {
            KineticOutput::None => {}
            KineticOutput::Pointer { x, y } => {
                let report = self.reports.mouse.active_mut();
                report.x = report.x.saturating_add(x);
                report.y = report.y.saturating_add(y);
            }
            KineticOutput::Wheel { x, y } => {
                let report = self.reports.mouse.active_mut();
                report.wheel_x = report.wheel_x.saturating_add(x);
                report.wheel_y = report.wheel_y.saturating_add(y);
            }
            KineticOutput::ApplyFake(action_ref) => {
                // the synthetic key runs through the regular applier; the
                // applier cannot tell it from a real key
                let action = action_ref.resolve(&self.module_configs[action_ref.module.index()]);
                let mut fake = self.module_kinetic.caret_fake_key;
                self.apply_key_action(KeyRef::Synthetic, &mut fake, &action, &action, macros);
                self.module_kinetic.caret_fake_key = fake;
            }
        }
    }

    fn flush_reports<U: UsbReportSink>(&mut self, usb: &mut U) {
        if self.reports.basic.changed() {
            self.semaphore.set(UsbInterface::BasicKeyboard, true);
            match usb.send_basic_keyboard(self.reports.basic.active()) {
                Ok(()) => self.reports.basic.swap(),
                Err(_) => self.semaphore.set(UsbInterface::BasicKeyboard, false),
            }
        }

        if self.reports.media.changed() {
            self.semaphore.set(UsbInterface::MediaKeyboard, true);
            match usb.send_media_keyboard(self.reports.media.active()) {
                Ok(()) => self.reports.media.swap(),
                Err(_) => self.semaphore.set(UsbInterface::MediaKeyboard, false),
            }
        }

        if self.reports.system.changed() {
            self.semaphore.set(UsbInterface::SystemKeyboard, true);
            match usb.send_system_keyboard(self.reports.system.active()) {
                Ok(()) => self.reports.system.swap(),
                Err(_) => self.semaphore.set(UsbInterface::SystemKeyboard, false),
            }
        }

        // motion is relative, so a repeated non-zero report must go out even
        // though it equals the previous one; buttons only on change
        if self.reports.mouse.changed() || self.reports.mouse.active().has_motion() {
            self.semaphore.set(UsbInterface::Mouse, true);
            match usb.send_mouse(self.reports.mouse.active()) {
                Ok(()) => self.reports.mouse.swap(),
                Err(_) => self.semaphore.set(UsbInterface::Mouse, false),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::actions::{modifiers, scancodes};
    use super::hid::UsbSendError;
    use super::layers::LAYER_COUNT;
    use super::modules::NavigationMode;

    #[derive(Default)]
    struct TestUsb {
        basic: Vec<BasicKeyboardReport>,
        media: Vec<MediaKeyboardReport>,
        system: Vec<SystemKeyboardReport>,
        mouse: Vec<MouseReport>,
        fail_sends: bool,
    }

    impl UsbReportSink for TestUsb {
        fn send_basic_keyboard(&mut self, report: &BasicKeyboardReport) -> Result<(), UsbSendError> {
            if self.fail_sends {
                return Err(UsbSendError);
            }
            self.basic.push(*report);
            Ok(())
        }

        fn send_media_keyboard(&mut self, report: &MediaKeyboardReport) -> Result<(), UsbSendError> {
            if self.fail_sends {
                return Err(UsbSendError);
            }
            self.media.push(*report);
            Ok(())
        }

        fn send_system_keyboard(
            &mut self,
            report: &SystemKeyboardReport,
        ) -> Result<(), UsbSendError> {
            if self.fail_sends {
                return Err(UsbSendError);
            }
            self.system.push(*report);
            Ok(())
        }

        fn send_mouse(&mut self, report: &MouseReport) -> Result<(), UsbSendError> {
            if self.fail_sends {
                return Err(UsbSendError);
            }
            self.mouse.push(*report);
            Ok(())
        }
    }

    #[derive(Default)]
    struct TestMacros {
        playing: bool,
        reports: MacroReports,
        started: Vec<u8>,
    }

    impl MacroDriver for TestMacros {
        fn is_playing(&self) -> bool {
            self.playing
        }

        fn continue_macro(&mut self) -> MacroReports {
            self.reports.clone()
        }

        fn start_macro(&mut self, macro_id: u8) {
            self.started.push(macro_id);
        }
    }

    static MODULES: [ModuleConfiguration; MODULE_COUNT] = crate::config::DEFAULT_MODULES;

    fn test_engine_config() -> EngineConfig {
        EngineConfig {
            // commit hardware edges on the next cycle already
            debounce_time_press: 0,
            debounce_time_release: 0,
            ..EngineConfig::default()
        }
    }

    struct Fixture<'a> {
        engine: Engine<'a>,
        usb: TestUsb,
        macros: TestMacros,
        now: u32,
    }

    impl<'a> Fixture<'a> {
        fn new(keymaps: &'a [Keymap]) -> Self {
            Self {
                engine: Engine::new(keymaps, &MODULES, test_engine_config()),
                usb: TestUsb::default(),
                macros: TestMacros::default(),
                now: 0,
            }
        }

        fn press(&mut self, slot: SlotId, key: usize) {
            self.engine.set_hardware_key_state(slot, key, true);
        }

        fn release(&mut self, slot: SlotId, key: usize) {
            self.engine.set_hardware_key_state(slot, key, false);
        }

        fn cycle(&mut self) {
            self.now += 1;
            let mut inputs = CycleInputs {
                right_matrix: &[],
                touchpad: None,
                modules: &mut [],
            };
            self.engine
                .update(self.now, &mut inputs, &mut self.usb, &mut self.macros);
            // the USB layer of the tests completes transfers instantly
            if !self.usb.fail_sends {
                for interface in [
                    UsbInterface::BasicKeyboard,
                    UsbInterface::MediaKeyboard,
                    UsbInterface::SystemKeyboard,
                    UsbInterface::Mouse,
                ] {
                    self.engine.report_sent(interface);
                }
            }
        }

        fn cycles(&mut self, n: u32) {
            for _ in 0..n {
                self.cycle();
            }
        }

        fn cycle_with_touchpad(&mut self, touchpad: &mut TouchpadEvents) {
            self.now += 1;
            let mut inputs = CycleInputs {
                right_matrix: &[],
                touchpad: Some(touchpad),
                modules: &mut [],
            };
            self.engine
                .update(self.now, &mut inputs, &mut self.usb, &mut self.macros);
            self.engine.report_sent(UsbInterface::BasicKeyboard);
            self.engine.report_sent(UsbInterface::Mouse);
        }
    }

    fn keymap_with(entries: &[(LayerId, SlotId, usize, KeyAction)]) -> Keymap {
        let mut keymap = Keymap::EMPTY;
        for (layer, slot, key, action) in entries {
            keymap.layers[layer.index()][slot.index()][*key] = *action;
        }
        keymap
    }

    #[test]
    fn idle_cycles_send_nothing() {
        let keymaps = [Keymap::EMPTY];
        let mut fixture = Fixture::new(&keymaps);
        fixture.cycles(5);
        assert_eq!(fixture.engine.update_counter(), 5);
        assert!(fixture.usb.basic.is_empty());
        assert!(fixture.usb.media.is_empty());
        assert!(fixture.usb.system.is_empty());
        assert!(fixture.usb.mouse.is_empty());
    }

    #[test]
    fn keystroke_press_and_release() {
        let keymaps = [keymap_with(&[(
            LayerId::Base,
            SlotId::RightHalf,
            0,
            KeyAction::key(scancodes::A),
        )])];
        let mut fixture = Fixture::new(&keymaps);

        fixture.press(SlotId::RightHalf, 0);
        fixture.cycles(3);
        assert_eq!(fixture.usb.basic.len(), 1);
        assert!(fixture.usb.basic[0].contains_scancode(scancodes::A as u8));

        fixture.release(SlotId::RightHalf, 0);
        fixture.cycles(3);
        assert_eq!(fixture.usb.basic.len(), 2);
        assert_eq!(fixture.usb.basic[1].scancode_count(), 0);
    }

    #[test]
    fn media_keystroke_uses_consumer_report() {
        let keymaps = [keymap_with(&[(
            LayerId::Base,
            SlotId::LeftHalf,
            4,
            KeyAction::media(scancodes::MEDIA_VOLUME_UP),
        )])];
        let mut fixture = Fixture::new(&keymaps);
        fixture.press(SlotId::LeftHalf, 4);
        fixture.cycles(2);
        assert_eq!(fixture.usb.media.len(), 1);
        assert_eq!(fixture.usb.media[0].scancodes[0], scancodes::MEDIA_VOLUME_UP);
        assert!(fixture.usb.basic.is_empty());
    }

    #[test]
    fn failed_send_retries_next_cycle() {
        let keymaps = [keymap_with(&[(
            LayerId::Base,
            SlotId::RightHalf,
            0,
            KeyAction::key(scancodes::A),
        )])];
        let mut fixture = Fixture::new(&keymaps);
        fixture.usb.fail_sends = true;
        fixture.press(SlotId::RightHalf, 0);
        fixture.cycle();
        assert!(fixture.usb.basic.is_empty());

        // failure cleared the in-flight bit, the next cycle retries
        fixture.usb.fail_sends = false;
        fixture.cycle();
        assert_eq!(fixture.usb.basic.len(), 1);
    }

    #[test]
    fn unacknowledged_send_gates_cycles_until_timeout() {
        let keymaps = [keymap_with(&[(
            LayerId::Base,
            SlotId::RightHalf,
            0,
            KeyAction::key(scancodes::A),
        )])];
        let mut engine = Engine::new(&keymaps, &MODULES, test_engine_config());
        let mut usb = TestUsb::default();
        let mut macros = TestMacros::default();
        let empty = || CycleInputs {
            right_matrix: &[],
            touchpad: None,
            modules: &mut [],
        };

        engine.set_hardware_key_state(SlotId::RightHalf, 0, true);
        engine.update(1, &mut empty(), &mut usb, &mut macros);
        assert_eq!(engine.update_counter(), 1);

        // no acknowledgment: cycles are skipped
        for now in 2..100 {
            engine.update(now, &mut empty(), &mut usb, &mut macros);
        }
        assert_eq!(engine.update_counter(), 1);

        // and force-cleared after the timeout
        engine.update(101, &mut empty(), &mut usb, &mut macros);
        assert_eq!(engine.update_counter(), 2);
    }

    #[test]
    fn sticky_alt_tab_sequence() {
        // layer hold on the left, Alt+Tab mapped on the held layer
        let keymaps = [keymap_with(&[
            (
                LayerId::Base,
                SlotId::LeftHalf,
                0,
                KeyAction::SwitchLayer {
                    layer: LayerId::Fn,
                    mode: SwitchLayerMode::Hold,
                },
            ),
            (
                LayerId::Fn,
                SlotId::RightHalf,
                1,
                KeyAction::shortcut(modifiers::LEFT_ALT, scancodes::TAB),
            ),
        ])];
        let mut fixture = Fixture::new(&keymaps);

        fixture.press(SlotId::LeftHalf, 0);
        fixture.cycles(2);
        assert_eq!(fixture.engine.active_layer(), LayerId::Fn);

        fixture.press(SlotId::RightHalf, 1);
        fixture.cycle();
        // first report carries the modifiers alone
        let first = *fixture.usb.basic.last().unwrap();
        assert_eq!(first.modifiers, modifiers::LEFT_ALT);
        assert_eq!(first.scancode_count(), 0);

        fixture.cycle();
        // from the second cycle on the scancode joins
        let second = *fixture.usb.basic.last().unwrap();
        assert_eq!(second.modifiers, modifiers::LEFT_ALT);
        assert!(second.contains_scancode(scancodes::TAB as u8));

        // releasing Tab keeps Alt stuck while the layer is held
        fixture.release(SlotId::RightHalf, 1);
        fixture.cycles(3);
        let after_release = *fixture.usb.basic.last().unwrap();
        assert_eq!(after_release.modifiers, modifiers::LEFT_ALT);
        assert_eq!(after_release.scancode_count(), 0);

        // releasing the layer clears the stuck modifiers
        fixture.release(SlotId::LeftHalf, 0);
        fixture.cycles(3);
        let last = *fixture.usb.basic.last().unwrap();
        assert_eq!(last.modifiers, 0);
    }

    #[test]
    fn plain_modifier_shortcut_does_not_stick() {
        let keymaps = [keymap_with(&[(
            LayerId::Base,
            SlotId::RightHalf,
            0,
            KeyAction::shortcut(modifiers::LEFT_CTRL, scancodes::A),
        )])];
        let mut fixture = Fixture::new(&keymaps);

        fixture.press(SlotId::RightHalf, 0);
        fixture.cycles(2);
        fixture.release(SlotId::RightHalf, 0);
        fixture.cycles(3);

        // one extra modifier-only report right after release, then nothing
        let last = *fixture.usb.basic.last().unwrap();
        assert_eq!(last.modifiers, 0);
        let n = fixture.usb.basic.len();
        let release_report = fixture.usb.basic[n - 2];
        assert_eq!(release_report.modifiers, modifiers::LEFT_CTRL);
        assert_eq!(release_report.scancode_count(), 0);
    }

    #[test]
    fn secondary_role_tap_resolves_to_primary() {
        let keymaps = [keymap_with(&[(
            LayerId::Base,
            SlotId::RightHalf,
            2,
            KeyAction::with_secondary_role(
                scancodes::A,
                SecondaryRole::Modifier(modifiers::LEFT_SHIFT),
            ),
        )])];
        let mut fixture = Fixture::new(&keymaps);

        fixture.press(SlotId::RightHalf, 2);
        fixture.cycles(3);
        // undecided: nothing reported yet
        assert!(fixture.usb.basic.is_empty());

        fixture.release(SlotId::RightHalf, 2);
        fixture.cycles(5);

        // the tap produced the primary scancode and never the modifier
        assert!(fixture
            .usb
            .basic
            .iter()
            .any(|r| r.contains_scancode(scancodes::A as u8)));
        assert!(fixture.usb.basic.iter().all(|r| r.modifiers == 0));
        // and the key is fully released afterwards
        assert_eq!(fixture.usb.basic.last().unwrap().scancode_count(), 0);
    }

    #[test]
    fn secondary_role_chord_resolves_to_secondary() {
        let keymaps = [keymap_with(&[
            (
                LayerId::Base,
                SlotId::RightHalf,
                2,
                KeyAction::with_secondary_role(
                    scancodes::A,
                    SecondaryRole::Modifier(modifiers::LEFT_SHIFT),
                ),
            ),
            (
                LayerId::Base,
                SlotId::RightHalf,
                3,
                KeyAction::key(0x05),
            ),
        ])];
        let mut fixture = Fixture::new(&keymaps);

        fixture.press(SlotId::RightHalf, 2);
        fixture.cycles(2);
        fixture.press(SlotId::RightHalf, 3);
        fixture.cycles(6);

        // modifier role won; the postponed chord key went out shifted
        assert!(fixture
            .usb
            .basic
            .iter()
            .any(|r| r.modifiers == modifiers::LEFT_SHIFT && r.contains_scancode(0x05)));
        assert!(fixture
            .usb
            .basic
            .iter()
            .all(|r| !r.contains_scancode(scancodes::A as u8)));
    }

    #[test]
    fn secondary_layer_role_holds_layer_for_chord() {
        let keymaps = [keymap_with(&[
            (
                LayerId::Base,
                SlotId::LeftHalf,
                5,
                KeyAction::with_secondary_role(
                    scancodes::A,
                    SecondaryRole::Layer(LayerId::Mod),
                ),
            ),
            (LayerId::Base, SlotId::RightHalf, 3, KeyAction::key(0x05)),
            (LayerId::Mod, SlotId::RightHalf, 3, KeyAction::key(0x06)),
        ])];
        let mut fixture = Fixture::new(&keymaps);

        fixture.press(SlotId::LeftHalf, 5);
        fixture.cycles(2);
        fixture.press(SlotId::RightHalf, 3);
        fixture.cycles(6);

        // the chord key resolved on the held layer
        assert!(fixture.usb.basic.iter().any(|r| r.contains_scancode(0x06)));
        assert!(fixture.usb.basic.iter().all(|r| !r.contains_scancode(0x05)));
    }

    #[test]
    fn mouse_key_moves_cursor() {
        let keymaps = [keymap_with(&[(
            LayerId::Base,
            SlotId::RightHalf,
            4,
            KeyAction::Mouse(MouseAction::MoveRight),
        )])];
        let mut fixture = Fixture::new(&keymaps);

        fixture.press(SlotId::RightHalf, 4);
        fixture.cycles(100);
        let total_x: i32 = fixture.usb.mouse.iter().map(|r| r.x as i32).sum();
        let total_y: i32 = fixture.usb.mouse.iter().map(|r| r.y as i32).sum();
        assert!((15..=18).contains(&total_x), "total_x = {}", total_x);
        assert_eq!(total_y, 0);
        assert!(fixture.usb.mouse.iter().all(|r| r.wheel_x == 0 && r.wheel_y == 0));
    }

    #[test]
    fn mouse_button_key_sets_button_bit() {
        let keymaps = [keymap_with(&[(
            LayerId::Base,
            SlotId::RightHalf,
            5,
            KeyAction::Mouse(MouseAction::LeftClick),
        )])];
        let mut fixture = Fixture::new(&keymaps);

        fixture.press(SlotId::RightHalf, 5);
        fixture.cycles(2);
        assert!(fixture.usb.mouse.last().unwrap().buttons.left());

        fixture.release(SlotId::RightHalf, 5);
        fixture.cycles(3);
        assert!(!fixture.usb.mouse.last().unwrap().buttons.left());
    }

    #[test]
    fn toggled_mouse_state_persists_across_cycles() {
        let keymaps = [Keymap::EMPTY];
        let mut fixture = Fixture::new(&keymaps);

        fixture.engine.toggle_mouse_state(MouseAction::LeftClick, true);
        fixture.cycles(2);
        assert!(fixture.usb.mouse.last().unwrap().buttons.left());

        fixture.engine.toggle_mouse_state(MouseAction::LeftClick, false);
        fixture.cycles(2);
        assert!(!fixture.usb.mouse.last().unwrap().buttons.left());
    }

    #[test]
    fn double_tap_toggles_layer() {
        let keymaps = [keymap_with(&[
            (
                LayerId::Base,
                SlotId::LeftHalf,
                0,
                KeyAction::SwitchLayer {
                    layer: LayerId::Mouse,
                    mode: SwitchLayerMode::HoldAndDoubleTapToggle,
                },
            ),
        ])];
        let mut fixture = Fixture::new(&keymaps);

        // tap twice quickly
        fixture.press(SlotId::LeftHalf, 0);
        fixture.cycles(2);
        fixture.release(SlotId::LeftHalf, 0);
        fixture.cycles(2);
        fixture.press(SlotId::LeftHalf, 0);
        fixture.cycles(2);
        fixture.release(SlotId::LeftHalf, 0);
        fixture.cycles(2);

        // layer stays toggled with the key up
        assert_eq!(fixture.engine.active_layer(), LayerId::Mouse);
    }

    #[test]
    fn keymap_switch_retargets_following_presses() {
        let mut second = keymap_with(&[(
            LayerId::Base,
            SlotId::RightHalf,
            7,
            KeyAction::key(0x05),
        )]);
        second.layers[LayerId::Base.index()][SlotId::RightHalf.index()][6] =
            KeyAction::SwitchKeymap(0);
        let keymaps = [
            keymap_with(&[(
                LayerId::Base,
                SlotId::RightHalf,
                6,
                KeyAction::SwitchKeymap(1),
            )]),
            second,
        ];
        let mut fixture = Fixture::new(&keymaps);

        fixture.press(SlotId::RightHalf, 6);
        fixture.cycles(2);
        fixture.release(SlotId::RightHalf, 6);
        fixture.cycles(2);

        fixture.press(SlotId::RightHalf, 7);
        fixture.cycles(2);
        assert!(fixture.usb.basic.iter().any(|r| r.contains_scancode(0x05)));
    }

    #[test]
    fn macro_reports_pass_through() {
        let keymaps = [Keymap::EMPTY];
        let mut fixture = Fixture::new(&keymaps);
        fixture.macros.playing = true;
        fixture
            .macros
            .reports
            .basic
            .add_scancode(scancodes::A as u8);
        fixture.cycle();
        assert_eq!(fixture.usb.basic.len(), 1);
        assert!(fixture.usb.basic[0].contains_scancode(scancodes::A as u8));
    }

    #[test]
    fn play_macro_action_starts_macro() {
        let keymaps = [keymap_with(&[(
            LayerId::Base,
            SlotId::RightHalf,
            8,
            KeyAction::PlayMacro(3),
        )])];
        let mut fixture = Fixture::new(&keymaps);
        fixture.press(SlotId::RightHalf, 8);
        fixture.cycles(2);
        assert_eq!(fixture.macros.started, [3]);
    }

    #[test]
    fn caret_touchpad_fires_arrow_key_lifecycle() {
        // caret mode on the base layer, unit speed, quarter divisor
        let mut modules = crate::config::DEFAULT_MODULES;
        let touchpad = &mut modules[ModuleId::TouchpadRight.index()];
        touchpad.navigation_modes = [NavigationMode::Caret; LAYER_COUNT];
        touchpad.base_speed = 1.0;
        touchpad.speed = 0.0;
        touchpad.caret_speed_divisor = 4.0;
        touchpad.caret_lock_skew_first_tick = 1.0;

        let keymaps = [Keymap::EMPTY];
        let mut engine = Engine::new(&keymaps, &modules, test_engine_config());
        let mut usb = TestUsb::default();
        let mut macros = TestMacros::default();

        fn run(
            engine: &mut Engine<'_>,
            usb: &mut TestUsb,
            macros: &mut TestMacros,
            now: u32,
            dy: i16,
        ) {
            let mut touchpad_events = TouchpadEvents {
                y: dy,
                ..TouchpadEvents::default()
            };
            let mut inputs = CycleInputs {
                right_matrix: &[],
                touchpad: Some(&mut touchpad_events),
                modules: &mut [],
            };
            engine.update(now, &mut inputs, usb, macros);
            engine.report_sent(UsbInterface::BasicKeyboard);
            engine.report_sent(UsbInterface::Mouse);
        }

        // dy 10 / divisor 4 = 2.5 accumulated, one tick fires; positive
        // sensor y is inverted on the touchpad, picking the negative action
        run(&mut engine, &mut usb, &mut macros, 1, 10);
        assert_eq!(usb.basic.len(), 1);
        assert!(usb.basic[0].contains_scancode(scancodes::DOWN_ARROW as u8));

        // fake key held, then released
        run(&mut engine, &mut usb, &mut macros, 2, 0);
        assert!(usb
            .basic
            .last()
            .unwrap()
            .contains_scancode(scancodes::DOWN_ARROW as u8));
        run(&mut engine, &mut usb, &mut macros, 3, 0);
        assert_eq!(usb.basic.last().unwrap().scancode_count(), 0);

        // remainder 1.5 is left; after the lifecycle drains the next tick
        // fires without further input
        run(&mut engine, &mut usb, &mut macros, 4, 0);
        run(&mut engine, &mut usb, &mut macros, 5, 0);
        assert!(usb
            .basic
            .last()
            .unwrap()
            .contains_scancode(scancodes::DOWN_ARROW as u8));
    }

    #[test]
    fn touchpad_taps_click_buttons() {
        let keymaps = [Keymap::EMPTY];
        let mut fixture = Fixture::new(&keymaps);

        let mut touchpad = TouchpadEvents {
            single_tap: true,
            ..TouchpadEvents::default()
        };
        fixture.cycle_with_touchpad(&mut touchpad);
        assert!(fixture.usb.mouse.last().unwrap().buttons.left());
        // consumed
        assert!(!touchpad.single_tap);

        let mut touchpad = TouchpadEvents {
            two_finger_tap: true,
            ..TouchpadEvents::default()
        };
        fixture.cycle_with_touchpad(&mut touchpad);
        assert!(fixture.usb.mouse.last().unwrap().buttons.right());
    }

    #[test]
    fn module_delta_moves_cursor_and_is_consumed() {
        let keymaps = [Keymap::EMPTY];
        let mut engine = Engine::new(&keymaps, &MODULES, test_engine_config());
        let mut usb = TestUsb::default();
        let mut macros = TestMacros::default();

        let mut slots = [ModuleSlotState {
            module_id: ModuleId::TrackballRight,
            pointer_count: 1,
            pointer_delta: PointerDelta { x: 5, y: 3 },
        }];
        let mut inputs = CycleInputs {
            right_matrix: &[],
            touchpad: None,
            modules: &mut slots,
        };
        engine.update(1, &mut inputs, &mut usb, &mut macros);

        assert_eq!(slots[0].pointer_delta.x, 0);
        assert_eq!(slots[0].pointer_delta.y, 0);
        let report = usb.mouse.last().unwrap();
        assert!(report.x > 0);
        // trackball y is not inverted; positive sensor y moves the cursor up
        assert!(report.y < 0);
    }
}
