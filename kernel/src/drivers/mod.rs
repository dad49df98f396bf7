//! Device drivers: PS/2 keyboard, the virtualized RTC, and the PIT hook.

pub mod keyboard;
pub mod pit;
pub mod vrtc;
