#![cfg_attr(target_os = "none", no_std)]

//! Input-report engine of the Strix modular split keyboard.
//!
//! Runs once per firmware tick and translates the debounced key matrix,
//! pointer deltas from attached modules and mouse-emulation keys into four
//! host-visible HID reports: basic keyboard, media keyboard, system keyboard
//! and mouse. Transports, the USB stack, LEDs and persistence live outside
//! this crate and are reached through the traits in [`keyboard::hid`] and
//! [`keyboard`].

#[macro_use]
mod fmt;

/// Default tuning values
pub mod config;
/// Keyboard logic: key states, actions, layers and report generation
pub mod keyboard;
