/// Frame/scanline/cycle counter: `scanline` runs `0..=261` (261 is the
/// pre-render line), `cycle` runs `0..=340`. Odd frames drop the idle
/// `(0,0)` cycle when rendering is enabled.
#[derive(Clone, Copy, Debug)]
pub struct Clock {
    frame: u64,
    scanline: u16,
    cycle: u16,
    total_cycles: u64,
}

impl Clock {
    pub fn new() -> Clock {
        Clock { frame: 0, scanline: 0, cycle: 0, total_cycles: 0 }
    }

    pub fn frame(&self) -> u64 {
        self.frame
    }

    pub fn scanline(&self) -> u16 {
        self.scanline
    }

    pub fn cycle(&self) -> u16 {
        self.cycle
    }

    pub fn total_cycles(&self) -> u64 {
        self.total_cycles
    }

    pub fn is_pre_render(&self) -> bool {
        self.scanline == 261
    }

    pub fn is_visible(&self) -> bool {
        self.scanline < 240
    }

    /// Rebuilds a clock at an exact raster position, for save-state
    /// restore. No validation beyond field width: the saved position was
    /// produced by `tick`, so it is already a reachable state.
    pub fn restore(frame: u64, scanline: u16, cycle: u16, total_cycles: u64) -> Clock {
        Clock { frame, scanline, cycle, total_cycles }
    }

    pub fn tick(&mut self, skip_odd_frame_cycle: bool) {
        self.total_cycles += 1;
        match (self.scanline, self.cycle) {
            (261, 340) => {
                self.frame += 1;
                self.scanline = 0;
                self.cycle = if skip_odd_frame_cycle && self.frame % 2 == 1 { 1 } else { 0 };
            }
            (_, 340) => {
                self.scanline += 1;
                self.cycle = 0;
            }
            _ => self.cycle += 1,
        }
    }
}

impl Default for Clock {
    fn default() -> Clock {
        Clock::new()
    }
}
