//! Default tuning of the engine.
//!
//! These mirror the factory firmware defaults; the host-side configuration
//! tool overrides them through the serde-derived records.

use crate::keyboard::actions::{scancodes, KeyAction};
use crate::keyboard::layers::LAYER_COUNT;
use crate::keyboard::modules::{
    AxisActions, CaretConfiguration, ModuleConfiguration, NavigationMode, MODULE_COUNT,
};
use crate::keyboard::mouse::KineticTuning;

pub const DEBOUNCE_TIME_PRESS: u8 = 50;
pub const DEBOUNCE_TIME_RELEASE: u8 = 50;

/// Force-clear a stuck USB in-flight semaphore after this many ms
pub const USB_SEMAPHORE_TIMEOUT: u32 = 100;

pub const DOUBLE_TAP_TOGGLE_TIMEOUT: u16 = 400;
pub const SECONDARY_ROLE_TIMEOUT: u16 = 350;

pub const MOUSE_MOVE_TUNING: KineticTuning = KineticTuning {
    int_multiplier: 25.0,
    initial_speed: 5.0,
    acceleration: 35.0,
    decelerated_speed: 10.0,
    base_speed: 40.0,
    accelerated_speed: 80.0,
    axis_skew: 1.0,
};

pub const MOUSE_SCROLL_TUNING: KineticTuning = KineticTuning {
    int_multiplier: 1.0,
    initial_speed: 20.0,
    acceleration: 20.0,
    decelerated_speed: 10.0,
    base_speed: 20.0,
    accelerated_speed: 50.0,
    axis_skew: 1.0,
};

/// Horizontal motion maps to arrow left/right, vertical to up/down
pub const CARET_ACTIONS: CaretConfiguration = CaretConfiguration {
    axis_actions: [
        AxisActions {
            positive: KeyAction::key(scancodes::RIGHT_ARROW),
            negative: KeyAction::key(scancodes::LEFT_ARROW),
        },
        AxisActions {
            positive: KeyAction::key(scancodes::UP_ARROW),
            negative: KeyAction::key(scancodes::DOWN_ARROW),
        },
    ],
};

/// Horizontal motion skips tracks, vertical controls the volume
pub const MEDIA_ACTIONS: CaretConfiguration = CaretConfiguration {
    axis_actions: [
        AxisActions {
            positive: KeyAction::media(scancodes::MEDIA_NEXT),
            negative: KeyAction::media(scancodes::MEDIA_PREVIOUS),
        },
        AxisActions {
            positive: KeyAction::media(scancodes::MEDIA_VOLUME_UP),
            negative: KeyAction::media(scancodes::MEDIA_VOLUME_DOWN),
        },
    ],
};

const fn default_module(navigation_modes: [NavigationMode; LAYER_COUNT]) -> ModuleConfiguration {
    ModuleConfiguration {
        base_speed: 0.5,
        speed: 1.0,
        acceleration: 1.0,
        caret_speed_divisor: 16.0,
        scroll_speed_divisor: 8.0,
        caret_lock_skew: 0.5,
        caret_lock_skew_first_tick: 0.5,
        cursor_axis_lock: false,
        scroll_axis_lock: false,
        invert_axis: false,
        navigation_modes,
        caret_actions: CARET_ACTIONS,
        media_actions: MEDIA_ACTIONS,
    }
}

/// Per-module factory defaults, indexed by `ModuleId`
pub const DEFAULT_MODULES: [ModuleConfiguration; MODULE_COUNT] = [
    // key cluster
    default_module([
        NavigationMode::Scroll,
        NavigationMode::Cursor,
        NavigationMode::Caret,
        NavigationMode::None,
    ]),
    // trackball
    default_module([
        NavigationMode::Cursor,
        NavigationMode::Scroll,
        NavigationMode::Caret,
        NavigationMode::None,
    ]),
    // trackpoint
    default_module([
        NavigationMode::Cursor,
        NavigationMode::Scroll,
        NavigationMode::Caret,
        NavigationMode::None,
    ]),
    // touchpad
    default_module([
        NavigationMode::Cursor,
        NavigationMode::Scroll,
        NavigationMode::Caret,
        NavigationMode::None,
    ]),
];
