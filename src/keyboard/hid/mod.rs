//! HID report structures and send bookkeeping.
//!
//! Each interface keeps an active and an inactive report buffer; the engine
//! fills the active one every cycle, diffs it against the last sent one and
//! hands it to a [`UsbReportSink`]. In-flight sends are tracked per
//! interface in an [`InterfaceMask`] semaphore.

mod consumer;
mod keyboard;
mod mouse;
mod system;

pub use consumer::{MediaKeyboardReport, MEDIA_KEYBOARD_MAX_KEYS};
pub use keyboard::{BasicKeyboardReport, BASIC_KEYBOARD_MAX_KEYS};
pub use mouse::{MouseButtons, MouseReport};
pub use system::{SystemKeyboardReport, SYSTEM_KEYBOARD_MAX_KEYS};

use bitfield::bitfield;

/// HID interfaces the engine produces reports for
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum UsbInterface {
    BasicKeyboard,
    MediaKeyboard,
    SystemKeyboard,
    Mouse,
}

bitfield! {
    /// One in-flight bit per interface
    #[derive(Clone, Copy, Default, PartialEq, Eq)]
    pub struct InterfaceMask(u8);
    pub basic_keyboard, set_basic_keyboard: 0;
    pub media_keyboard, set_media_keyboard: 1;
    pub system_keyboard, set_system_keyboard: 2;
    pub mouse, set_mouse: 3;
}

impl InterfaceMask {
    pub fn any(&self) -> bool {
        self.0 != 0
    }

    pub fn clear_all(&mut self) {
        self.0 = 0;
    }

    pub fn set(&mut self, interface: UsbInterface, value: bool) {
        match interface {
            UsbInterface::BasicKeyboard => self.set_basic_keyboard(value),
            UsbInterface::MediaKeyboard => self.set_media_keyboard(value),
            UsbInterface::SystemKeyboard => self.set_system_keyboard(value),
            UsbInterface::Mouse => self.set_mouse(value),
        }
    }
}

/// Failed report hand-off; the interface retries next cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsbSendError;

/// Consumer of the four report types, implemented by the USB layer
pub trait UsbReportSink {
    fn send_basic_keyboard(&mut self, report: &BasicKeyboardReport) -> Result<(), UsbSendError>;
    fn send_media_keyboard(&mut self, report: &MediaKeyboardReport) -> Result<(), UsbSendError>;
    fn send_system_keyboard(&mut self, report: &SystemKeyboardReport) -> Result<(), UsbSendError>;
    fn send_mouse(&mut self, report: &MouseReport) -> Result<(), UsbSendError>;
}

/// Active / inactive report buffer pair of one interface
pub struct ReportPair<R> {
    reports: [R; 2],
    active: usize,
}

impl<R: Default + PartialEq> ReportPair<R> {
    pub fn new() -> Self {
        Self {
            reports: [R::default(), R::default()],
            active: 0,
        }
    }

    pub fn active(&self) -> &R {
        &self.reports[self.active]
    }

    pub fn active_mut(&mut self) -> &mut R {
        &mut self.reports[self.active]
    }

    /// Last successfully handed-off report
    pub fn inactive(&self) -> &R {
        &self.reports[1 - self.active]
    }

    pub fn reset_active(&mut self) {
        *self.active_mut() = R::default();
    }

    pub fn changed(&self) -> bool {
        self.reports[0] != self.reports[1]
    }

    /// Make the just-sent report the reference for the next diff
    pub fn swap(&mut self) {
        self.active = 1 - self.active;
    }
}

impl<R: Default + PartialEq> Default for ReportPair<R> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interface_mask_bits() {
        let mut mask = InterfaceMask::default();
        assert!(!mask.any());
        mask.set(UsbInterface::Mouse, true);
        assert!(mask.any() && mask.mouse());
        mask.set(UsbInterface::BasicKeyboard, true);
        assert_eq!(mask.0, 0b1001);
        mask.set(UsbInterface::Mouse, false);
        assert_eq!(mask.0, 0b0001);
        mask.clear_all();
        assert!(!mask.any());
    }

    #[test]
    fn report_pair_diff_and_swap() {
        let mut pair: ReportPair<BasicKeyboardReport> = ReportPair::new();
        assert!(!pair.changed());
        pair.active_mut().add_scancode(0x04);
        assert!(pair.changed());
        pair.swap();
        assert_eq!(pair.inactive().scancodes[0], 0x04);
        pair.reset_active();
        assert!(pair.changed());
    }
}
