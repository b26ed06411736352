//! Semantic key actions resolved from the keymap.
//!
//! A key produces a [`KeyAction`] looked up as `keymap[layer][slot][key]`.
//! Actions are plain data produced by the (out of crate) configuration
//! parser, hence the `serde` derives.

use serde::{Deserialize, Serialize};

use super::layers::LayerId;

/// HID keyboard modifier bit masks, standard boot-protocol layout.
pub mod modifiers {
    pub const LEFT_CTRL: u8 = 1 << 0;
    pub const LEFT_SHIFT: u8 = 1 << 1;
    pub const LEFT_ALT: u8 = 1 << 2;
    pub const LEFT_GUI: u8 = 1 << 3;
    pub const RIGHT_CTRL: u8 = 1 << 4;
    pub const RIGHT_SHIFT: u8 = 1 << 5;
    pub const RIGHT_ALT: u8 = 1 << 6;
    pub const RIGHT_GUI: u8 = 1 << 7;

    pub const CTRL: u8 = LEFT_CTRL | RIGHT_CTRL;
    pub const ALT: u8 = LEFT_ALT | RIGHT_ALT;
    pub const GUI: u8 = LEFT_GUI | RIGHT_GUI;
}

/// HID usage ids the engine refers to by name.
pub mod scancodes {
    pub const A: u16 = 0x04;
    pub const TAB: u16 = 0x2b;
    pub const RIGHT_ARROW: u16 = 0x4f;
    pub const LEFT_ARROW: u16 = 0x50;
    pub const DOWN_ARROW: u16 = 0x51;
    pub const UP_ARROW: u16 = 0x52;

    // consumer page
    pub const MEDIA_NEXT: u16 = 0xb5;
    pub const MEDIA_PREVIOUS: u16 = 0xb6;
    pub const MEDIA_VOLUME_UP: u16 = 0xe9;
    pub const MEDIA_VOLUME_DOWN: u16 = 0xea;
}

/// Report a keystroke goes to
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum KeystrokeType {
    Basic,
    Media,
    System,
}

/// Alternate behavior of a keystroke selected by hold-vs-tap disambiguation
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SecondaryRole {
    /// Hold activates a layer
    Layer(LayerId),
    /// Hold acts as the given HID modifier mask
    Modifier(u8),
}

impl SecondaryRole {
    pub fn layer(&self) -> Option<LayerId> {
        match self {
            SecondaryRole::Layer(layer) => Some(*layer),
            SecondaryRole::Modifier(_) => None,
        }
    }

    pub fn modifier_mask(&self) -> u8 {
        match self {
            SecondaryRole::Layer(_) => 0,
            SecondaryRole::Modifier(mask) => *mask,
        }
    }
}

/// A keystroke with optional composed modifiers and secondary role
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Keystroke {
    pub keystroke_type: KeystrokeType,
    pub scancode: u16,
    pub modifiers: u8,
    pub secondary_role: Option<SecondaryRole>,
}

impl Keystroke {
    /// Shortcuts like Alt+Tab or Ctrl+Arrow whose modifiers may outlive the
    /// key to allow repeating the shortcut while a held layer stays active.
    pub fn is_sticky_shortcut(&self) -> bool {
        if self.modifiers == 0 || self.keystroke_type != KeystrokeType::Basic {
            return false;
        }
        match self.scancode {
            scancodes::TAB
            | scancodes::LEFT_ARROW
            | scancodes::RIGHT_ARROW
            | scancodes::UP_ARROW
            | scancodes::DOWN_ARROW => {
                self.modifiers & (modifiers::ALT | modifiers::GUI | modifiers::CTRL) != 0
            }
            _ => false,
        }
    }
}

/// Layer switching flavor of a [`KeyAction::SwitchLayer`] key
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SwitchLayerMode {
    Hold,
    Toggle,
    HoldAndDoubleTapToggle,
}

/// Virtual mouse state driven by a key
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum MouseAction {
    LeftClick,
    MiddleClick,
    RightClick,
    MoveUp,
    MoveDown,
    MoveLeft,
    MoveRight,
    ScrollUp,
    ScrollDown,
    ScrollLeft,
    ScrollRight,
    Accelerate,
    Decelerate,
    Button4,
    Button5,
    Button6,
    Button7,
    Button8,
}

/// Number of distinct [`MouseAction`] values
pub const MOUSE_ACTION_COUNT: usize = 18;

impl MouseAction {
    pub const fn index(self) -> usize {
        self as usize
    }
}

/// Action a key resolves to on the active layer
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum KeyAction {
    #[default]
    None,
    Keystroke(Keystroke),
    Mouse(MouseAction),
    SwitchLayer {
        layer: LayerId,
        mode: SwitchLayerMode,
    },
    SwitchKeymap(u8),
    PlayMacro(u8),
}

impl KeyAction {
    /// Plain basic keystroke
    pub const fn key(scancode: u16) -> Self {
        Self::shortcut(0, scancode)
    }

    /// Basic keystroke composed with a modifier mask
    pub const fn shortcut(modifiers: u8, scancode: u16) -> Self {
        KeyAction::Keystroke(Keystroke {
            keystroke_type: KeystrokeType::Basic,
            scancode,
            modifiers,
            secondary_role: None,
        })
    }

    /// Consumer-page keystroke
    pub const fn media(scancode: u16) -> Self {
        KeyAction::Keystroke(Keystroke {
            keystroke_type: KeystrokeType::Media,
            scancode,
            modifiers: 0,
            secondary_role: None,
        })
    }

    /// Basic keystroke with a secondary role
    pub const fn with_secondary_role(scancode: u16, role: SecondaryRole) -> Self {
        KeyAction::Keystroke(Keystroke {
            keystroke_type: KeystrokeType::Basic,
            scancode,
            modifiers: 0,
            secondary_role: Some(role),
        })
    }
}
