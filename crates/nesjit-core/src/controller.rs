//! Standard controller input
//!
//! Writing 1 to the strobe latches the current buttons and rewinds the
//! shift register. While strobe is high every read returns the A button.
//! With strobe low each read shifts out the next button in the order
//! A, B, Select, Start, Up, Down, Left, Right; after eight reads the
//! register returns 1 until the next strobe.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    /// Button state, one bit per button in shift-out order
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct Buttons: u8 {
        const A = 0x01;
        const B = 0x02;
        const SELECT = 0x04;
        const START = 0x08;
        const UP = 0x10;
        const DOWN = 0x20;
        const LEFT = 0x40;
        const RIGHT = 0x80;
    }
}

/// Standard NES controller
#[derive(Debug, Clone, Default)]
pub struct Controller {
    buttons: Buttons,
    latched: Buttons,
    shift: u8,
    strobe: bool,
}

impl Controller {
    pub fn new() -> Self {
        Self::default()
    }

    /// Currently held buttons
    pub fn buttons(&self) -> Buttons {
        self.buttons
    }

    pub fn set_buttons(&mut self, buttons: Buttons) {
        self.buttons = buttons;
    }

    pub fn press(&mut self, button: Buttons) {
        self.buttons.insert(button);
    }

    pub fn release(&mut self, button: Buttons) {
        self.buttons.remove(button);
    }

    /// Bit 0 of a $4016 write
    pub fn write_strobe(&mut self, high: bool) {
        self.strobe = high;
        if high {
            self.latched = self.buttons;
            self.shift = 0;
        }
    }

    pub fn write(&mut self, value: u8) {
        self.write_strobe(value & 0x01 != 0);
    }

    /// Read one bit from the serial port
    pub fn read(&mut self) -> u8 {
        if self.strobe {
            return self.buttons.contains(Buttons::A) as u8;
        }
        if self.shift >= 8 {
            return 1;
        }
        let bit = (self.latched.bits() >> self.shift) & 0x01;
        self.shift += 1;
        bit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strobe_high_always_reports_a() {
        let mut pad = Controller::new();
        pad.set_buttons(Buttons::A | Buttons::LEFT);
        pad.write_strobe(true);
        for _ in 0..100 {
            assert_eq!(pad.read(), 1);
        }
        pad.release(Buttons::A);
        assert_eq!(pad.read(), 0);
    }

    #[test]
    fn test_shift_order() {
        let mut pad = Controller::new();
        pad.set_buttons(Buttons::B | Buttons::START | Buttons::RIGHT);
        pad.write(1);
        pad.write(0);
        let bits: Vec<u8> = (0..8).map(|_| pad.read()).collect();
        assert_eq!(bits, vec![0, 1, 0, 1, 0, 0, 0, 1]);
    }

    #[test]
    fn test_reads_after_eight_return_one() {
        let mut pad = Controller::new();
        pad.write_strobe(true);
        pad.write_strobe(false);
        for _ in 0..8 {
            assert_eq!(pad.read(), 0);
        }
        assert_eq!(pad.read(), 1);
        assert_eq!(pad.read(), 1);
    }

    #[test]
    fn test_latch_ignores_later_presses() {
        let mut pad = Controller::new();
        pad.write_strobe(true);
        pad.write_strobe(false);
        pad.press(Buttons::A);
        assert_eq!(pad.read(), 0);
    }
}
