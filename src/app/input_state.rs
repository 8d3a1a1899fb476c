use glam::Vec2;
use winit::event::MouseButton;
use winit::keyboard::Key;
use crate::app::window::HostEvent;

/// Input state folded from host events, reset at the end of every tick
#[derive(Default)]
pub struct InputState {
    pub mouse_curr_pos: Vec2,
    pub mouse_prev_pos: Vec2,
    pub mouse_wheel_delta_y: f32,
    pub mouse_left_down: bool,
    pub mouse_right_down: bool,
    pub mouse_right_just_pressed: bool,
    pub mouse_right_just_released: bool,

    pub keys_just_pressed: Vec<Key>,
    pub focused: bool,
}

impl InputState {
    pub fn process_host_event(&mut self, event: &HostEvent) {
        match event {
            HostEvent::MouseInput { button: MouseButton::Left, pressed } => {
                self.mouse_left_down = *pressed;
            }
            HostEvent::MouseInput { button: MouseButton::Right, pressed } => {
                if *pressed {
                    self.mouse_right_just_pressed = true;
                    self.mouse_right_just_released = false;
                } else {
                    self.mouse_right_just_pressed = false;
                    self.mouse_right_just_released = true;
                }
                self.mouse_right_down = *pressed;
            }
            HostEvent::CursorMoved { x, y } => {
                self.mouse_prev_pos = self.mouse_curr_pos;
                self.mouse_curr_pos = Vec2::new(*x as f32, *y as f32);
            }
            HostEvent::MouseWheel { delta_y } => {
                self.mouse_wheel_delta_y = *delta_y;
            }
            HostEvent::KeyPressed(key) => {
                self.keys_just_pressed.push(key.clone());
            }
            HostEvent::Focused(focused) => {
                self.focused = *focused;
            }
            _ => {}
        }
    }

    pub fn key_just_pressed(&self, key: &Key) -> bool {
        self.keys_just_pressed.contains(key)
    }

    /// Reset the input states for the next tick.
    pub fn reset_frame(&mut self) {
        self.mouse_wheel_delta_y = 0.0;
        self.mouse_prev_pos = self.mouse_curr_pos;
        self.mouse_right_just_pressed = false;
        self.mouse_right_just_released = false;
        self.keys_just_pressed.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use winit::keyboard::NamedKey;

    #[test]
    fn cursor_and_buttons_are_tracked() {
        let mut input = InputState::default();
        input.process_host_event(&HostEvent::CursorMoved { x: 10.0, y: 20.0 });
        input.process_host_event(&HostEvent::CursorMoved { x: 15.0, y: 25.0 });
        input.process_host_event(&HostEvent::MouseInput { button: MouseButton::Right, pressed: true });

        assert_eq!(input.mouse_prev_pos, Vec2::new(10.0, 20.0));
        assert_eq!(input.mouse_curr_pos, Vec2::new(15.0, 25.0));
        assert!(input.mouse_right_down);
        assert!(input.mouse_right_just_pressed);
    }

    #[test]
    fn reset_clears_per_tick_state_only() {
        let mut input = InputState::default();
        input.process_host_event(&HostEvent::KeyPressed(Key::Named(NamedKey::Escape)));
        input.process_host_event(&HostEvent::MouseWheel { delta_y: 1.0 });
        input.process_host_event(&HostEvent::MouseInput { button: MouseButton::Left, pressed: true });
        assert!(input.key_just_pressed(&Key::Named(NamedKey::Escape)));

        input.reset_frame();

        assert!(!input.key_just_pressed(&Key::Named(NamedKey::Escape)));
        assert_eq!(input.mouse_wheel_delta_y, 0.0);
        assert!(input.mouse_left_down);
    }
}
