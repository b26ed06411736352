//! System-control keyboard report (power, sleep, wake usages).

pub const SYSTEM_KEYBOARD_MAX_KEYS: usize = 8;

#[derive(Clone, Copy, Default, PartialEq, Eq, Debug)]
#[repr(C)]
pub struct SystemKeyboardReport {
    pub scancodes: [u8; SYSTEM_KEYBOARD_MAX_KEYS],
}

impl SystemKeyboardReport {
    pub fn add_scancode(&mut self, scancode: u8) {
        if scancode == 0 {
            return;
        }
        if let Some(slot) = self.scancodes.iter_mut().find(|s| **s == 0) {
            *slot = scancode;
        }
    }
}
