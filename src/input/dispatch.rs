//! Permission-checked input routing
//!
//! Maps data-channel labels to event parsers, asks the session manager
//! whether the sending peer may produce that input class, and forwards
//! accepted events to the sink. Denied input is dropped silently; denial
//! is expected user behavior, not an incident.

use std::sync::Arc;

use log::debug;

use crate::session::SessionManager;

use super::events::{HostInputSink, InputEvent};

/// Routes raw data-channel payloads to the host input sink.
pub struct InputRouter {
    session: Arc<SessionManager>,
    sink: Arc<dyn HostInputSink>,
}

impl InputRouter {
    pub fn new(session: Arc<SessionManager>, sink: Arc<dyn HostInputSink>) -> Self {
        Self { session, sink }
    }

    /// Handle one message from `peer_id` on the channel `label`.
    pub fn dispatch(&self, peer_id: &str, label: &str, data: &[u8]) {
        match label {
            "mouse_relative" | "mouse_move" => {
                if !self.session.can_mouse(peer_id) {
                    return;
                }
                if let Some(InputEvent::MouseMove { dx, dy }) = InputEvent::parse_mouse_move(data)
                {
                    self.sink.on_mouse_move(dx, dy);
                }
            }

            "mouse_absolute" | "mouse_position" => {
                if !self.session.can_mouse(peer_id) {
                    return;
                }
                if let Some(InputEvent::MouseAbsolute {
                    x,
                    y,
                    width,
                    height,
                }) = InputEvent::parse_mouse_absolute(data)
                {
                    self.sink.on_mouse_absolute(x, y, width, height);
                }
            }

            "mouse_button" => {
                if !self.session.can_mouse(peer_id) {
                    return;
                }
                if let Some(InputEvent::MouseButton { button, action }) =
                    InputEvent::parse_mouse_button(data)
                {
                    self.sink.on_mouse_button(button, action);
                }
            }

            "mouse_scroll" => {
                if !self.session.can_mouse(peer_id) {
                    return;
                }
                if let Some(InputEvent::MouseScroll { amount }) =
                    InputEvent::parse_mouse_scroll(data)
                {
                    self.sink.on_mouse_scroll(amount);
                }
            }

            "keyboard" => {
                if !self.session.can_keyboard(peer_id) {
                    return;
                }
                if let Some(InputEvent::Key {
                    code,
                    action,
                    modifiers,
                }) = InputEvent::parse_key(data)
                {
                    self.sink.on_keyboard(code, action, modifiers);
                }
            }

            "controllers" | "controller0" | "controller1" | "controller2" | "controller3" => {
                // Spectators hold no slot and cannot send controller input
                let Some(slot) = self.session.slot_of(peer_id) else {
                    return;
                };
                if let Some(InputEvent::Controller {
                    buttons,
                    left_trigger,
                    right_trigger,
                    left_stick_x,
                    left_stick_y,
                    right_stick_x,
                    right_stick_y,
                    ..
                }) = InputEvent::parse_controller(data)
                {
                    // The on-wire controller index is replaced with the
                    // sender's slot; slots are 1-4, controllers 0-3
                    self.sink.on_controller(
                        slot - 1,
                        buttons,
                        left_trigger,
                        right_trigger,
                        left_stick_x,
                        left_stick_y,
                        right_stick_x,
                        right_stick_y,
                    );
                }
            }

            _ => {
                debug!("unknown data channel label: {}", label);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::events::{KEY_DOWN, MOUSE_BUTTON_DOWN};
    use crate::session::StreamSettings;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        events: Mutex<Vec<String>>,
    }

    impl RecordingSink {
        fn recorded(&self) -> Vec<String> {
            self.events.lock().unwrap().clone()
        }

        fn push(&self, event: String) {
            self.events.lock().unwrap().push(event);
        }
    }

    impl HostInputSink for RecordingSink {
        fn on_mouse_move(&self, dx: i16, dy: i16) {
            self.push(format!("move {} {}", dx, dy));
        }
        fn on_mouse_absolute(&self, x: i16, y: i16, _w: i16, _h: i16) {
            self.push(format!("abs {} {}", x, y));
        }
        fn on_mouse_button(&self, button: u8, action: u8) {
            self.push(format!("button {} {}", button, action));
        }
        fn on_mouse_scroll(&self, amount: i16) {
            self.push(format!("scroll {}", amount));
        }
        fn on_keyboard(&self, code: u16, action: u8, modifiers: u8) {
            self.push(format!("key {} {} {}", code, action, modifiers));
        }
        fn on_controller(
            &self,
            slot: u8,
            buttons: u32,
            _lt: u8,
            _rt: u8,
            _lx: i16,
            _ly: i16,
            _rx: i16,
            _ry: i16,
        ) {
            self.push(format!("pad {} {:#x}", slot, buttons));
        }
    }

    fn setup() -> (Arc<SessionManager>, Arc<RecordingSink>, InputRouter) {
        let session = Arc::new(SessionManager::new());
        session
            .create(
                0,
                "Desktop",
                StreamSettings {
                    bitrate: 10_000,
                    fps: 60,
                    width: 1920,
                    height: 1080,
                },
            )
            .unwrap();
        let sink = Arc::new(RecordingSink::default());
        let router = InputRouter::new(session.clone(), sink.clone());
        (session, sink, router)
    }

    #[test]
    fn host_input_is_forwarded() {
        let (session, sink, router) = setup();
        session.join("host", "Host").unwrap();

        router.dispatch("host", "mouse_relative", &[5, 0, 251, 255]);
        router.dispatch("host", "keyboard", &[0x41, 0x00, KEY_DOWN, 0x02]);

        assert_eq!(sink.recorded(), vec!["move 5 -5", "key 65 3 2"]);
    }

    #[test]
    fn spectator_input_is_dropped_silently() {
        let (session, sink, router) = setup();
        session.join("host", "Host").unwrap();
        session.join("spec", "Spec").unwrap();

        router.dispatch("spec", "mouse_relative", &[1, 0, 1, 0]);
        router.dispatch("spec", "keyboard", &[0x41, 0x00, KEY_DOWN, 0x00]);
        router.dispatch("spec", "controllers", &[0; 15]);

        assert!(sink.recorded().is_empty());
    }

    #[test]
    fn keyboard_permission_is_separate_from_mouse() {
        let (session, sink, router) = setup();
        session.join("host", "Host").unwrap();
        session.join("b", "B").unwrap();
        session.set_keyboard_permission("host", "b", true).unwrap();

        // Granted keyboard passes, mouse still drops
        router.dispatch("b", "keyboard", &[0x41, 0x00, KEY_DOWN, 0x02]);
        router.dispatch("b", "mouse_button", &[1, MOUSE_BUTTON_DOWN]);

        assert_eq!(sink.recorded(), vec!["key 65 3 2"]);
    }

    #[test]
    fn controller_index_is_overridden_with_slot() {
        let (session, sink, router) = setup();
        session.join("host", "Host").unwrap();
        session.join("b", "B").unwrap();
        session.join_as_player("b").unwrap(); // slot 2

        // Claims controller 0 on the wire; routed as slot-1 = 1
        let mut frame = vec![0u8];
        frame.extend_from_slice(&0x1000u32.to_le_bytes());
        frame.extend_from_slice(&[0, 0]);
        frame.extend_from_slice(&[0; 8]);
        router.dispatch("b", "controllers", &frame);

        assert_eq!(sink.recorded(), vec!["pad 1 0x1000"]);
    }

    #[test]
    fn short_frames_do_not_reach_the_sink() {
        let (session, sink, router) = setup();
        session.join("host", "Host").unwrap();

        router.dispatch("host", "mouse_relative", &[1, 2]);
        router.dispatch("host", "keyboard", &[1]);

        assert!(sink.recorded().is_empty());
    }

    #[test]
    fn unknown_labels_are_ignored() {
        let (session, sink, router) = setup();
        session.join("host", "Host").unwrap();
        router.dispatch("host", "clipboard", b"data");
        assert!(sink.recorded().is_empty());
    }
}
