use std::ops::{Index, IndexMut};

use enum_iterator::Sequence;

/// One standard NES controller: an 8-bit shift register that latches the
/// current button states on strobe and shifts one bit out per subsequent
/// read. https://wiki.nesdev.com/w/index.php/Controller_reading_code
#[derive(Debug, Clone, Copy)]
pub struct Joypad {
    strobe_mode: StrobeMode,
    selected_button: Option<Button>,
    button_statuses: ButtonStatuses,
}

impl Joypad {
    pub fn new() -> Joypad {
        Joypad {
            strobe_mode: StrobeMode::Off,
            selected_button: None,
            button_statuses: ButtonStatuses::ALL_UNPRESSED,
        }
    }

    pub fn selected_button_status(&mut self) -> ButtonStatus {
        if let Some(selected_button) = self.selected_button {
            let status = self.button_statuses[selected_button];
            if self.strobe_mode == StrobeMode::Off {
                self.selected_button = selected_button.next();
            }

            status
        } else {
            // After every button has been cycled through, always return Pressed.
            ButtonStatus::Pressed
        }
    }

    pub fn strobe_on(&mut self) {
        self.strobe_mode = StrobeMode::On;
        self.selected_button = Some(Button::A);
    }

    pub fn strobe_off(&mut self) {
        self.strobe_mode = StrobeMode::Off;
    }

    pub fn press_button(&mut self, button: Button) {
        self.button_statuses[button] = ButtonStatus::Pressed;
    }

    pub fn release_button(&mut self, button: Button) {
        self.button_statuses[button] = ButtonStatus::Unpressed;
    }
}

impl Default for Joypad {
    fn default() -> Joypad {
        Joypad::new()
    }
}

#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub enum StrobeMode {
    Off,
    On,
}

#[derive(PartialEq, Eq, Clone, Copy, Debug, Sequence)]
pub enum Button {
    A,
    B,
    Select,
    Start,
    Up,
    Down,
    Left,
    Right,
}

#[derive(Debug, Clone, Copy)]
pub struct ButtonStatuses([ButtonStatus; 8]);

impl ButtonStatuses {
    pub const ALL_UNPRESSED: ButtonStatuses = ButtonStatuses([ButtonStatus::Unpressed; 8]);
}

impl Index<Button> for ButtonStatuses {
    type Output = ButtonStatus;

    fn index(&self, button: Button) -> &ButtonStatus {
        &self.0[button as usize]
    }
}

impl IndexMut<Button> for ButtonStatuses {
    fn index_mut(&mut self, button: Button) -> &mut ButtonStatus {
        &mut self.0[button as usize]
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ButtonStatus {
    Unpressed,
    Pressed,
}

impl ButtonStatus {
    pub fn as_bit(self) -> u8 {
        match self {
            ButtonStatus::Unpressed => 0,
            ButtonStatus::Pressed => 1,
        }
    }
}
