//! Typed input events and their wire formats
//!
//! All multi-byte fields are little-endian. Parsers require the exact
//! frame size for their event and reject short frames.

use log::debug;

/// Mouse button actions on the wire
pub const MOUSE_BUTTON_DOWN: u8 = 0x07;
pub const MOUSE_BUTTON_UP: u8 = 0x08;

/// Keyboard actions on the wire
pub const KEY_DOWN: u8 = 0x03;
pub const KEY_UP: u8 = 0x04;

/// Keyboard modifier bits
pub const MODIFIER_SHIFT: u8 = 0x01;
pub const MODIFIER_CTRL: u8 = 0x02;
pub const MODIFIER_ALT: u8 = 0x04;

/// Controller buttons, Xbox layout
pub mod buttons {
    pub const DPAD_UP: u32 = 0x0001;
    pub const DPAD_DOWN: u32 = 0x0002;
    pub const DPAD_LEFT: u32 = 0x0004;
    pub const DPAD_RIGHT: u32 = 0x0008;
    pub const START: u32 = 0x0010;
    pub const BACK: u32 = 0x0020;
    pub const LEFT_STICK: u32 = 0x0040;
    pub const RIGHT_STICK: u32 = 0x0080;
    pub const LEFT_BUMPER: u32 = 0x0100;
    pub const RIGHT_BUMPER: u32 = 0x0200;
    pub const GUIDE: u32 = 0x0400;
    pub const A: u32 = 0x1000;
    pub const B: u32 = 0x2000;
    pub const X: u32 = 0x4000;
    pub const Y: u32 = 0x8000;
}

/// One decoded input event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputEvent {
    MouseMove {
        dx: i16,
        dy: i16,
    },
    MouseAbsolute {
        x: i16,
        y: i16,
        width: i16,
        height: i16,
    },
    MouseButton {
        button: u8,
        action: u8,
    },
    /// Signed units of 120 per wheel notch
    MouseScroll {
        amount: i16,
    },
    Key {
        code: u16,
        action: u8,
        modifiers: u8,
    },
    Controller {
        slot: u8,
        buttons: u32,
        left_trigger: u8,
        right_trigger: u8,
        left_stick_x: i16,
        left_stick_y: i16,
        right_stick_x: i16,
        right_stick_y: i16,
    },
}

fn le_i16(data: &[u8], offset: usize) -> i16 {
    i16::from_le_bytes([data[offset], data[offset + 1]])
}

fn le_u16(data: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([data[offset], data[offset + 1]])
}

fn le_u32(data: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
    ])
}

impl InputEvent {
    /// int16 dx, int16 dy
    pub fn parse_mouse_move(data: &[u8]) -> Option<InputEvent> {
        if data.len() < 4 {
            return None;
        }
        Some(InputEvent::MouseMove {
            dx: le_i16(data, 0),
            dy: le_i16(data, 2),
        })
    }

    /// int16 x, y, width, height
    pub fn parse_mouse_absolute(data: &[u8]) -> Option<InputEvent> {
        if data.len() < 8 {
            return None;
        }
        Some(InputEvent::MouseAbsolute {
            x: le_i16(data, 0),
            y: le_i16(data, 2),
            width: le_i16(data, 4),
            height: le_i16(data, 6),
        })
    }

    /// u8 button (1-5), u8 action (0x07 down, 0x08 up)
    pub fn parse_mouse_button(data: &[u8]) -> Option<InputEvent> {
        if data.len() < 2 {
            return None;
        }
        let button = data[0];
        let action = data[1];
        if !(1..=5).contains(&button) {
            debug!("mouse button out of range: {}", button);
            return None;
        }
        if action != MOUSE_BUTTON_DOWN && action != MOUSE_BUTTON_UP {
            debug!("mouse button action invalid: {:#04x}", action);
            return None;
        }
        Some(InputEvent::MouseButton { button, action })
    }

    /// int16 amount
    pub fn parse_mouse_scroll(data: &[u8]) -> Option<InputEvent> {
        if data.len() < 2 {
            return None;
        }
        Some(InputEvent::MouseScroll {
            amount: le_i16(data, 0),
        })
    }

    /// u16 code, u8 action (0x03 down, 0x04 up), u8 modifier bitfield
    pub fn parse_key(data: &[u8]) -> Option<InputEvent> {
        if data.len() < 4 {
            return None;
        }
        let action = data[2];
        if action != KEY_DOWN && action != KEY_UP {
            debug!("key action invalid: {:#04x}", action);
            return None;
        }
        Some(InputEvent::Key {
            code: le_u16(data, 0),
            action,
            modifiers: data[3],
        })
    }

    /// u8 slot, u32 buttons, u8 lt, u8 rt, int16 lx, ly, rx, ry
    pub fn parse_controller(data: &[u8]) -> Option<InputEvent> {
        if data.len() < 15 {
            return None;
        }
        Some(InputEvent::Controller {
            slot: data[0],
            buttons: le_u32(data, 1),
            left_trigger: data[5],
            right_trigger: data[6],
            left_stick_x: le_i16(data, 7),
            left_stick_y: le_i16(data, 9),
            right_stick_x: le_i16(data, 11),
            right_stick_y: le_i16(data, 13),
        })
    }
}

/// Consumer of validated input events, standing in for the host's
/// encrypted input channel until that transport exists.
pub trait HostInputSink: Send + Sync {
    fn on_mouse_move(&self, dx: i16, dy: i16);
    fn on_mouse_absolute(&self, x: i16, y: i16, width: i16, height: i16);
    fn on_mouse_button(&self, button: u8, action: u8);
    fn on_mouse_scroll(&self, amount: i16);
    fn on_keyboard(&self, code: u16, action: u8, modifiers: u8);
    #[allow(clippy::too_many_arguments)]
    fn on_controller(
        &self,
        slot: u8,
        buttons: u32,
        left_trigger: u8,
        right_trigger: u8,
        left_stick_x: i16,
        left_stick_y: i16,
        right_stick_x: i16,
        right_stick_y: i16,
    );
}

/// Default sink: logs events at debug level.
pub struct LogSink;

impl HostInputSink for LogSink {
    fn on_mouse_move(&self, dx: i16, dy: i16) {
        debug!("mouse move: dx={}, dy={}", dx, dy);
    }

    fn on_mouse_absolute(&self, x: i16, y: i16, width: i16, height: i16) {
        debug!("mouse absolute: ({}, {}) in {}x{}", x, y, width, height);
    }

    fn on_mouse_button(&self, button: u8, action: u8) {
        debug!("mouse button: {}, action={:#04x}", button, action);
    }

    fn on_mouse_scroll(&self, amount: i16) {
        debug!("mouse scroll: {}", amount);
    }

    fn on_keyboard(&self, code: u16, action: u8, modifiers: u8) {
        debug!(
            "keyboard: code={:#06x}, action={:#04x}, modifiers={:#04x}",
            code, action, modifiers
        );
    }

    fn on_controller(
        &self,
        slot: u8,
        buttons: u32,
        left_trigger: u8,
        right_trigger: u8,
        left_stick_x: i16,
        left_stick_y: i16,
        right_stick_x: i16,
        right_stick_y: i16,
    ) {
        debug!(
            "controller {}: buttons={:#x}, LT={}, RT={}, LS=({}, {}), RS=({}, {})",
            slot,
            buttons,
            left_trigger,
            right_trigger,
            left_stick_x,
            left_stick_y,
            right_stick_x,
            right_stick_y
        );
    }
}
