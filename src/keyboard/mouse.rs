//! Keystroke-driven mouse emulation.
//!
//! Two independent kinetic states, one for cursor movement and one for
//! scrolling, integrate a speed curve over elapsed time and accumulate the
//! fractional part of the travelled distance between cycles. Direction signs
//! are stateful so that the last pressed of two opposing keys wins.

#[allow(unused_imports)]
use micromath::F32Ext;

use super::actions::{MouseAction, MOUSE_ACTION_COUNT};

/// Tuning of one kinetic state
#[derive(Clone, Copy, Debug, serde::Serialize, serde::Deserialize)]
pub struct KineticTuning {
    /// Scales all speed values of this state
    pub int_multiplier: f32,
    pub initial_speed: f32,
    pub acceleration: f32,
    pub decelerated_speed: f32,
    pub base_speed: f32,
    pub accelerated_speed: f32,
    /// Widens horizontal travel at the expense of vertical
    pub axis_skew: f32,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum SpeedMode {
    Normal,
    Decelerated,
    Accelerated,
}

/// Per-action activation counters.
///
/// Counters rather than booleans: a toggled virtual state and a pressed key
/// may activate the same action at once, and a count above one forces
/// accelerated mode.
pub struct MouseStates {
    active: [u8; MOUSE_ACTION_COUNT],
    toggled: [u8; MOUSE_ACTION_COUNT],
}

impl MouseStates {
    pub const fn new() -> Self {
        Self {
            active: [0; MOUSE_ACTION_COUNT],
            toggled: [0; MOUSE_ACTION_COUNT],
        }
    }

    /// Start a cycle with the persistent toggled states as baseline
    pub fn begin_cycle(&mut self) {
        self.active = self.toggled;
    }

    /// Count one activation of `action` for this cycle
    pub fn activate(&mut self, action: MouseAction) {
        let slot = &mut self.active[action.index()];
        *slot = slot.saturating_add(1);
    }

    pub fn is_active(&self, action: MouseAction) -> bool {
        self.active[action.index()] != 0
    }

    pub fn count(&self, action: MouseAction) -> u8 {
        self.active[action.index()]
    }

    pub fn toggled_count(&self, action: MouseAction) -> u8 {
        self.toggled[action.index()]
    }

    /// Latch a persistent activation; also visible in the current cycle
    pub fn toggle_on(&mut self, action: MouseAction) {
        let i = action.index();
        self.toggled[i] = self.toggled[i].saturating_add(1);
        self.active[i] = self.active[i].saturating_add(1);
    }

    /// Release one persistent activation, never below zero
    pub fn toggle_off(&mut self, action: MouseAction) {
        let i = action.index();
        self.toggled[i] = self.toggled[i].saturating_sub(1);
    }
}

impl Default for MouseStates {
    fn default() -> Self {
        Self::new()
    }
}

/// Virtual cursor or scroll motion driven by direction keys
pub struct MouseKineticState {
    is_scroll: bool,
    up_action: MouseAction,
    down_action: MouseAction,
    left_action: MouseAction,
    right_action: MouseAction,
    horizontal_sign: i8,
    vertical_sign: i8,
    current_speed: f32,
    target_speed: f32,
    x_sum: f32,
    y_sum: f32,
    x_out: i16,
    y_out: i16,
    prev_speed_mode: SpeedMode,
    was_move_action: bool,
    tuning: KineticTuning,
}

impl MouseKineticState {
    pub const fn new_move(tuning: KineticTuning) -> Self {
        Self::new(
            false,
            MouseAction::MoveUp,
            MouseAction::MoveDown,
            MouseAction::MoveLeft,
            MouseAction::MoveRight,
            tuning,
        )
    }

    /// The scroll state binds its vertical actions swapped relative to the
    /// direction names; scroll-up means positive wheel travel.
    pub const fn new_scroll(tuning: KineticTuning) -> Self {
        Self::new(
            true,
            MouseAction::ScrollDown,
            MouseAction::ScrollUp,
            MouseAction::ScrollLeft,
            MouseAction::ScrollRight,
            tuning,
        )
    }

    const fn new(
        is_scroll: bool,
        up_action: MouseAction,
        down_action: MouseAction,
        left_action: MouseAction,
        right_action: MouseAction,
        tuning: KineticTuning,
    ) -> Self {
        Self {
            is_scroll,
            up_action,
            down_action,
            left_action,
            right_action,
            horizontal_sign: 0,
            vertical_sign: 0,
            current_speed: 0.0,
            target_speed: 0.0,
            x_sum: 0.0,
            y_sum: 0.0,
            x_out: 0,
            y_out: 0,
            prev_speed_mode: SpeedMode::Normal,
            was_move_action: false,
            tuning,
        }
    }

    fn update_one_direction_sign(
        sign: &mut i8,
        expected_sign: i8,
        expected_action: MouseAction,
        other_action: MouseAction,
        states: &MouseStates,
    ) {
        if *sign == expected_sign && !states.is_active(expected_action) {
            *sign = if states.is_active(other_action) {
                -expected_sign
            } else {
                0
            };
        }
    }

    // A direction key may have just been released. If no other key keeps the
    // state active, either flip toward the still-held opposite direction or
    // zero the sign.
    fn update_direction_signs(&mut self, states: &MouseStates) {
        Self::update_one_direction_sign(
            &mut self.horizontal_sign,
            -1,
            self.left_action,
            self.right_action,
            states,
        );
        Self::update_one_direction_sign(
            &mut self.horizontal_sign,
            1,
            self.right_action,
            self.left_action,
            states,
        );
        Self::update_one_direction_sign(
            &mut self.vertical_sign,
            -1,
            self.up_action,
            self.down_action,
            states,
        );
        Self::update_one_direction_sign(
            &mut self.vertical_sign,
            1,
            self.down_action,
            self.up_action,
            states,
        );
    }

    /// Integrate one cycle of motion; `elapsed_ms` is the time since this
    /// state last ran.
    pub fn process(&mut self, states: &MouseStates, elapsed_ms: u32, compensate_diagonal: bool) {
        let t = self.tuning;
        let initial_speed = t.int_multiplier * t.initial_speed;
        let acceleration = t.int_multiplier * t.acceleration;
        let decelerated_speed = t.int_multiplier * t.decelerated_speed;
        let base_speed = t.int_multiplier * t.base_speed;
        let accelerated_speed = t.int_multiplier * t.accelerated_speed;

        if !self.was_move_action && !states.is_active(MouseAction::Decelerate) {
            self.current_speed = initial_speed;
        }

        let double_pressed = states.count(self.up_action) > 1
            || states.count(self.down_action) > 1
            || states.count(self.left_action) > 1
            || states.count(self.right_action) > 1;

        let is_move_action = states.is_active(self.up_action)
            || states.is_active(self.down_action)
            || states.is_active(self.left_action)
            || states.is_active(self.right_action);

        let mut speed_mode = SpeedMode::Normal;
        if states.is_active(MouseAction::Accelerate) || double_pressed {
            self.target_speed = accelerated_speed;
            speed_mode = SpeedMode::Accelerated;
        } else if states.is_active(MouseAction::Decelerate) {
            self.target_speed = decelerated_speed;
            speed_mode = SpeedMode::Decelerated;
        } else if is_move_action {
            self.target_speed = base_speed;
        }

        if speed_mode == SpeedMode::Accelerated
            || (self.was_move_action && is_move_action && self.prev_speed_mode != speed_mode)
        {
            self.current_speed = self.target_speed;
        }

        if is_move_action {
            let step = acceleration * elapsed_ms as f32 / 1000.0;
            if self.current_speed < self.target_speed {
                self.current_speed = (self.current_speed + step).min(self.target_speed);
            } else {
                self.current_speed = (self.current_speed - step).max(self.target_speed);
            }

            let mut distance = self.current_speed * elapsed_ms as f32 / 1000.0;

            if self.is_scroll && !self.was_move_action {
                self.x_sum = 0.0;
                self.y_sum = 0.0;
            }

            self.update_direction_signs(states);

            if self.horizontal_sign != 0 && self.vertical_sign != 0 && compensate_diagonal {
                distance /= 1.41;
            }

            self.x_sum += distance * self.horizontal_sign as f32 * t.axis_skew;
            self.y_sum += distance * self.vertical_sign as f32 / t.axis_skew;

            let horizontal_movement = self.horizontal_sign != 0;
            let x_int = self.x_sum.trunc();
            self.x_sum -= x_int;
            self.x_out = x_int as i16;

            // the first scroll tick must not wait for a full unit to accumulate
            if self.is_scroll && !self.was_move_action && self.x_out == 0 && horizontal_movement {
                self.x_out = if states.is_active(self.left_action) { -1 } else { 1 };
                self.x_sum = 0.0;
            }

            let vertical_movement = self.vertical_sign != 0;
            let y_int = self.y_sum.trunc();
            self.y_sum -= y_int;
            self.y_out = y_int as i16;

            if self.is_scroll && !self.was_move_action && self.y_out == 0 && vertical_movement {
                self.y_out = if states.is_active(self.up_action) { -1 } else { 1 };
                self.y_sum = 0.0;
            }
        } else {
            self.current_speed = 0.0;
        }

        self.prev_speed_mode = speed_mode;
        self.was_move_action = is_move_action;
    }

    /// Consume the integer output accumulated by [`Self::process`]
    pub fn take_output(&mut self) -> (i16, i16) {
        let out = (self.x_out, self.y_out);
        self.x_out = 0;
        self.y_out = 0;
        out
    }

    fn set_horizontal_sign(&mut self, sign: i8) {
        self.horizontal_sign = sign;
    }

    fn set_vertical_sign(&mut self, sign: i8) {
        self.vertical_sign = sign;
    }

    #[cfg(test)]
    fn sums(&self) -> (f32, f32) {
        (self.x_sum, self.y_sum)
    }
}

/// Set direction signs on keydown of a mouse action so that the last pressed
/// action takes precedence and the first sample after keydown is not lost.
pub fn activate_direction_signs(
    move_state: &mut MouseKineticState,
    scroll_state: &mut MouseKineticState,
    action: MouseAction,
) {
    match action {
        MouseAction::MoveUp => move_state.set_vertical_sign(-1),
        MouseAction::MoveDown => move_state.set_vertical_sign(1),
        MouseAction::MoveLeft => move_state.set_horizontal_sign(-1),
        MouseAction::MoveRight => move_state.set_horizontal_sign(1),
        MouseAction::ScrollUp => scroll_state.set_vertical_sign(1),
        MouseAction::ScrollDown => scroll_state.set_vertical_sign(-1),
        MouseAction::ScrollLeft => scroll_state.set_horizontal_sign(-1),
        MouseAction::ScrollRight => scroll_state.set_horizontal_sign(1),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config;

    fn states_with(actions: &[MouseAction]) -> MouseStates {
        let mut states = MouseStates::new();
        states.begin_cycle();
        for &action in actions {
            states.activate(action);
        }
        states
    }

    fn press(
        move_state: &mut MouseKineticState,
        scroll_state: &mut MouseKineticState,
        states: &mut MouseStates,
        action: MouseAction,
    ) {
        activate_direction_signs(move_state, scroll_state, action);
        states.activate(action);
    }

    #[test]
    fn single_direction_accumulates_expected_distance() {
        let mut move_state = MouseKineticState::new_move(config::MOUSE_MOVE_TUNING);
        let mut scroll_state = MouseKineticState::new_scroll(config::MOUSE_SCROLL_TUNING);
        let mut states = MouseStates::new();
        states.begin_cycle();
        press(&mut move_state, &mut scroll_state, &mut states, MouseAction::MoveRight);

        let mut total_x = 0i32;
        let mut total_y = 0i32;
        for _ in 0..100 {
            move_state.process(&states, 1, false);
            let (x, y) = move_state.take_output();
            total_x += x as i32;
            total_y += y as i32;
            let (xs, ys) = move_state.sums();
            assert!(xs.abs() < 1.0 && ys.abs() < 1.0);
        }
        // speed ramps from 125 px/s toward 1000 px/s at 875 px/s^2
        assert!((15..=18).contains(&total_x), "total_x = {}", total_x);
        assert_eq!(total_y, 0);
    }

    #[test]
    fn first_cycle_emits_no_motion() {
        let mut move_state = MouseKineticState::new_move(config::MOUSE_MOVE_TUNING);
        let mut scroll_state = MouseKineticState::new_scroll(config::MOUSE_SCROLL_TUNING);
        let mut states = MouseStates::new();
        states.begin_cycle();
        press(&mut move_state, &mut scroll_state, &mut states, MouseAction::MoveRight);
        move_state.process(&states, 1, false);
        assert_eq!(move_state.take_output(), (0, 0));
    }

    #[test]
    fn diagonal_compensation_shrinks_travel() {
        let run = |compensate| {
            let mut move_state = MouseKineticState::new_move(config::MOUSE_MOVE_TUNING);
            let mut scroll_state = MouseKineticState::new_scroll(config::MOUSE_SCROLL_TUNING);
            let mut states = MouseStates::new();
            states.begin_cycle();
            press(&mut move_state, &mut scroll_state, &mut states, MouseAction::MoveRight);
            press(&mut move_state, &mut scroll_state, &mut states, MouseAction::MoveDown);
            let mut total = (0i32, 0i32);
            for _ in 0..100 {
                move_state.process(&states, 1, compensate);
                let (x, y) = move_state.take_output();
                total.0 += x as i32;
                total.1 += y as i32;
            }
            total
        };

        let plain = run(false);
        let compensated = run(true);
        assert_eq!(plain.0, plain.1);
        assert_eq!(compensated.0, compensated.1);
        // within a pixel of straight travel divided by sqrt(2)
        assert!((compensated.0 - (plain.0 as f32 / 1.41) as i32).abs() <= 1);
    }

    #[test]
    fn opposing_keys_last_pressed_wins() {
        let mut move_state = MouseKineticState::new_move(config::MOUSE_MOVE_TUNING);
        let mut scroll_state = MouseKineticState::new_scroll(config::MOUSE_SCROLL_TUNING);
        let mut states = MouseStates::new();
        states.begin_cycle();
        press(&mut move_state, &mut scroll_state, &mut states, MouseAction::MoveRight);
        move_state.process(&states, 1, false);
        assert_eq!(move_state.horizontal_sign, 1);

        // opposite pressed while the first is held
        press(&mut move_state, &mut scroll_state, &mut states, MouseAction::MoveLeft);
        move_state.process(&states, 1, false);
        assert_eq!(move_state.horizontal_sign, -1);

        // releasing the newer key flips back to the still-held direction
        let states = states_with(&[MouseAction::MoveRight]);
        move_state.process(&states, 1, false);
        assert_eq!(move_state.horizontal_sign, 1);

        // releasing the horizontal key while a vertical one is held zeroes
        // the horizontal sign
        let states = states_with(&[MouseAction::MoveUp]);
        move_state.process(&states, 1, false);
        assert_eq!(move_state.horizontal_sign, 0);
    }

    #[test]
    fn first_scroll_tick_is_immediate() {
        let mut move_state = MouseKineticState::new_move(config::MOUSE_MOVE_TUNING);
        let mut scroll_state = MouseKineticState::new_scroll(config::MOUSE_SCROLL_TUNING);
        let mut states = MouseStates::new();
        states.begin_cycle();
        press(&mut move_state, &mut scroll_state, &mut states, MouseAction::ScrollUp);
        scroll_state.process(&states, 1, false);
        let (_, y) = scroll_state.take_output();
        assert_eq!(y, 1);
        // and only once
        scroll_state.process(&states, 1, false);
        let (_, y) = scroll_state.take_output();
        assert_eq!(y, 0);
    }

    #[test]
    fn double_pressed_direction_forces_accelerated_speed() {
        let tuning = config::MOUSE_MOVE_TUNING;
        let mut move_state = MouseKineticState::new_move(tuning);
        let mut states = MouseStates::new();
        states.begin_cycle();
        states.activate(MouseAction::MoveRight);
        states.activate(MouseAction::MoveRight);
        move_state.set_horizontal_sign(1);
        move_state.process(&states, 1, false);
        assert_eq!(
            move_state.current_speed,
            tuning.int_multiplier * tuning.accelerated_speed
        );
    }

    #[test]
    fn mode_change_while_moving_snaps_to_target() {
        let tuning = config::MOUSE_MOVE_TUNING;
        let mut move_state = MouseKineticState::new_move(tuning);
        let mut states = MouseStates::new();
        states.begin_cycle();
        states.activate(MouseAction::MoveRight);
        move_state.set_horizontal_sign(1);
        // reach base speed
        for _ in 0..2000 {
            move_state.process(&states, 1, false);
            move_state.take_output();
        }
        assert_eq!(move_state.current_speed, tuning.int_multiplier * tuning.base_speed);

        // switching modes mid-movement takes effect the same cycle
        states.activate(MouseAction::Decelerate);
        move_state.process(&states, 1, false);
        assert_eq!(
            move_state.current_speed,
            tuning.int_multiplier * tuning.decelerated_speed
        );
    }

    #[test]
    fn toggle_round_trip_restores_count() {
        let mut states = MouseStates::new();
        let before = states.toggled_count(MouseAction::MoveUp);
        states.toggle_on(MouseAction::MoveUp);
        states.toggle_off(MouseAction::MoveUp);
        assert_eq!(states.toggled_count(MouseAction::MoveUp), before);
        // releasing more often than toggled stays at zero
        states.toggle_off(MouseAction::MoveUp);
        assert_eq!(states.toggled_count(MouseAction::MoveUp), 0);
    }
}
