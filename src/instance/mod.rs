pub mod breakpoint;
pub mod save_state;
pub mod worker;

pub use breakpoint::{AccessKind, BreakpointInfo, BreakpointKey, BreakpointTable};
pub use save_state::SaveStateInfo;
pub use worker::{InstanceEvent, InstanceWorker};

use log::info;

use crate::cartridge::Cartridge;
use crate::controller::{Button, Controllers};
use crate::cpu::{Cpu, StepOutcome};
use crate::expr::{EvalContext, StateKind};
use crate::io::{BinaryReader, BinaryWriter};
use crate::memory::mapper::CartridgeMapper as _;
use crate::memory::{MemoryView, SystemView};
use crate::ppu::{palette, Ppu, SCREEN_HEIGHT, SCREEN_WIDTH};
use crate::symbol::{DefineId, EnumElementId, LabelId, SymbolTables};
use crate::system::{ApuIo, System};

/// Execution state machine. `StepCycle`/`StepInstruction` are transient:
/// the worker performs the step and falls back to `Paused`. `Crashed` is
/// terminal until `reset()`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunState {
    Init,
    Paused,
    Running,
    StepCycle,
    StepInstruction,
    Crashed,
}

/// The live CPU-side bus of one running instance. Composes the storage
/// view (RAM, VRAM, palette, mapper) with the register semantics a plain
/// array can't express: PPU register reads that clear latches, the
/// `$4014` OAM DMA trigger, and the joypad strobe/shift ports. Every
/// `read`/`write` records its address so the instance can probe
/// breakpoints per bus access after the instruction retires; `peek` is
/// side-effect-free and unrecorded.
#[derive(Debug)]
pub struct InstanceBus {
    pub memory: SystemView,
    pub ppu: Ppu,
    pub apu_io: ApuIo,
    pub controllers: Controllers,
    dma_request: Option<u8>,
    accesses: Vec<(u16, AccessKind)>,
}

impl InstanceBus {
    pub fn new(memory: SystemView) -> InstanceBus {
        InstanceBus {
            memory,
            ppu: Ppu::new(),
            apu_io: ApuIo::new(),
            controllers: Controllers::new(),
            dma_request: None,
            accesses: Vec::new(),
        }
    }

    fn step_ppu(&mut self) {
        self.ppu.step(&mut self.memory);
    }
}

impl MemoryView for InstanceBus {
    fn peek(&self, address: u16) -> u8 {
        match address {
            0x0000..=0x1FFF => self.memory.ram[address as usize % 0x0800],
            0x2000..=0x3FFF => self.ppu.peek_register(((address - 0x2000) % 8) as u8, &self.memory),
            0x4000..=0x401F => self.apu_io.read(address),
            0x4020..=0xFFFF => self.memory.mapper.read_prg(address),
        }
    }

    fn read(&mut self, address: u16) -> u8 {
        self.accesses.push((address, AccessKind::Read));
        match address {
            0x0000..=0x1FFF => self.memory.ram[address as usize % 0x0800],
            0x2000..=0x3FFF => self.ppu.read_register(((address - 0x2000) % 8) as u8, &mut self.memory),
            0x4016 => self.controllers.read_player_one(),
            0x4017 => self.controllers.read_player_two(),
            0x4000..=0x401F => self.apu_io.read(address),
            0x4020..=0xFFFF => self.memory.mapper.read_prg(address),
        }
    }

    fn write(&mut self, address: u16, value: u8) {
        self.accesses.push((address, AccessKind::Write));
        match address {
            0x0000..=0x1FFF => self.memory.ram[address as usize % 0x0800] = value,
            0x2000..=0x3FFF => self.ppu.write_register(((address - 0x2000) % 8) as u8, value, &mut self.memory),
            0x4014 => self.dma_request = Some(value),
            0x4016 => self.controllers.write_strobe(value),
            0x4000..=0x401F => self.apu_io.write(address, value),
            0x4020..=0xFFFF => self.memory.mapper.write_prg(address, value),
        }
    }
}

/// OAM DMA bookkeeping: one halt cycle, then 256 read/write pairs from
/// `source` into `$2004`, all stealing the CPU's bus slots.
#[derive(Clone, Copy, Debug, Default)]
struct OamDma {
    enabled: bool,
    source: u16,
    count: u16,
    halt_done: bool,
    read_phase: bool,
    latch: u8,
}

impl OamDma {
    fn begin(page: u8) -> OamDma {
        OamDma { enabled: true, source: (page as u16) << 8, count: 0, halt_done: false, read_phase: true, latch: 0 }
    }
}

/// Evaluates breakpoint/watch conditions against the live machine: the
/// state name table (`a, x, y, s, p, pc, istep, scanline, ppucycle,
/// frame`) reads registers and the raster position; dereferences peek the
/// bus without side effects. Symbol leaves never reach this context:
/// conditions are compiled to constants before the worker sees them.
pub struct InstanceEvalContext<'a> {
    pub cpu: &'a Cpu,
    pub bus: &'a InstanceBus,
}

impl EvalContext for InstanceEvalContext<'_> {
    fn label_address(&self, _id: LabelId) -> Option<i64> {
        None
    }

    fn define_value(&self, _id: DefineId) -> Option<i64> {
        None
    }

    fn enum_element_value(&self, _id: EnumElementId) -> Option<i64> {
        None
    }

    fn state_value(&self, kind: StateKind) -> i64 {
        match kind {
            StateKind::A => self.cpu.registers.a as i64,
            StateKind::X => self.cpu.registers.x as i64,
            StateKind::Y => self.cpu.registers.y as i64,
            StateKind::S => self.cpu.registers.s as i64,
            StateKind::P => self.cpu.registers.p.into_bytes()[0] as i64,
            StateKind::Pc => self.cpu.registers.pc as i64,
            StateKind::IStep => self.cpu.istep() as i64,
            StateKind::Scanline => self.bus.ppu.scanline() as i64,
            StateKind::PpuCycle => self.bus.ppu.cycle() as i64,
            StateKind::Frame => self.bus.ppu.frame() as i64,
        }
    }

    fn read_byte(&self, address: i64) -> Option<u8> {
        u16::try_from(address).ok().map(|address| self.bus.peek(address))
    }
}

/// One running machine over a [`System`]'s cartridge: CPU, PPU, bus,
/// scheduling phase, DMA, breakpoints, and save states. The symbolic
/// database itself is never touched from here; the instance reads ROM
/// through its own mapper copy.
#[derive(Debug)]
pub struct SystemInstance {
    pub cpu: Cpu,
    pub bus: InstanceBus,
    state: RunState,
    /// Which of the three PPU-step slots in the current group the CPU
    /// step lands on. Rotates every CPU cycle and is serialized, so the
    /// CPU/PPU interleaving survives save/load.
    phase: u8,
    /// Cycles left before the current instruction's cost is fully paid
    /// and the next opcode fetch may happen.
    cpu_cycles_pending: u8,
    dma: OamDma,
    pub breakpoints: BreakpointTable,
    pub save_states: Vec<SaveStateInfo>,
    pub current_save_state: Option<usize>,
    pending_break: Option<BreakpointInfo>,
    /// Set when an execute breakpoint pauses us at an address, so
    /// resuming doesn't immediately re-fire on the same fetch.
    suppress_execute_at: Option<u16>,
}

impl SystemInstance {
    pub fn new(system: &System) -> Result<SystemInstance, String> {
        SystemInstance::from_cartridge(&system.cartridge)
    }

    pub fn from_cartridge(cartridge: &Cartridge) -> Result<SystemInstance, String> {
        let mapper = cartridge.build_mapper()?;
        let mut bus = InstanceBus::new(SystemView::new(mapper));
        let mut cpu = Cpu::new();
        cpu.reset(&mut bus);
        bus.accesses.clear();
        Ok(SystemInstance {
            cpu,
            bus,
            state: RunState::Init,
            phase: 0,
            cpu_cycles_pending: 0,
            dma: OamDma::default(),
            breakpoints: BreakpointTable::default(),
            save_states: Vec::new(),
            current_save_state: None,
            pending_break: None,
            suppress_execute_at: None,
        })
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// Crashed is terminal: the only way out is [`SystemInstance::reset`].
    pub fn request_state(&mut self, new_state: RunState) {
        if self.state == RunState::Crashed {
            return;
        }
        self.state = new_state;
    }

    pub fn reset(&mut self) {
        self.cpu.reset(&mut self.bus);
        self.bus.accesses.clear();
        self.bus.dma_request = None;
        self.dma = OamDma::default();
        self.cpu_cycles_pending = 0;
        self.pending_break = None;
        self.suppress_execute_at = None;
        self.state = RunState::Paused;
    }

    pub fn take_pending_break(&mut self) -> Option<BreakpointInfo> {
        self.pending_break.take()
    }

    pub fn set_button(&mut self, player_two: bool, button: Button, pressed: bool) {
        let joypad = if player_two { &mut self.bus.controllers.player_two } else { &mut self.bus.controllers.player_one };
        if pressed {
            joypad.press_button(button);
        } else {
            joypad.release_button(button);
        }
    }

    /// One CPU cycle and its surrounding PPU cycles. The per-phase step
    /// patterns keep the long-run ratio at exactly three PPU cycles per
    /// CPU cycle while rotating where within the group the CPU lands.
    pub fn step_cycle(&mut self) {
        match self.phase {
            0 => {
                self.ppu_step();
                self.cpu_substep();
                self.ppu_step();
                self.ppu_step();
            }
            1 => {
                self.ppu_step();
                self.cpu_substep();
                self.ppu_step();
                self.ppu_step();
                self.ppu_step();
            }
            _ => {
                self.cpu_substep();
                self.ppu_step();
                self.ppu_step();
            }
        }
        self.phase = (self.phase + 1) % 3;
    }

    /// Steps until the next instruction has fully retired (or a
    /// breakpoint/crash interrupts). DMA stalls count toward the step the
    /// way they stall real instruction flow.
    pub fn step_instruction(&mut self) {
        let before = self.cpu.istep();
        while self.cpu.istep() == before {
            self.step_cycle();
            if self.state == RunState::Crashed || self.pending_break.is_some() {
                return;
            }
        }
        while self.cpu_cycles_pending > 0 && self.state != RunState::Crashed {
            self.step_cycle();
        }
    }

    /// Runs up to `budget` cycles while in `Running`; breakpoints and
    /// crashes stop early by flipping the state.
    pub fn run_cycles(&mut self, budget: u32) {
        for _ in 0..budget {
            if self.state != RunState::Running {
                break;
            }
            self.step_cycle();
        }
    }

    fn ppu_step(&mut self) {
        self.bus.step_ppu();
        if self.bus.ppu.nmi_line_level() {
            self.cpu.raise_nmi();
        } else {
            self.cpu.lower_nmi();
        }
    }

    fn cpu_substep(&mut self) {
        // The instruction that wrote $4014 still owes its remaining
        // cycles; the halt cycle starts on the next fetch slot after it
        // retires.
        if self.cpu_cycles_pending > 0 {
            self.cpu_cycles_pending -= 1;
            return;
        }
        if let Some(page) = self.bus.dma_request.take() {
            self.dma = OamDma::begin(page);
        }
        if self.dma.enabled {
            self.dma_substep();
            return;
        }
        if self.cpu.is_crashed() {
            self.state = RunState::Crashed;
            return;
        }

        let pc = self.cpu.registers.pc;
        if self.suppress_execute_at != Some(pc) {
            if let Some(hit) = self.check_breakpoint(pc, AccessKind::Execute) {
                info!(target: "breakpoint", "execute breakpoint at ${:04X}", pc);
                self.pending_break = Some(hit);
                self.suppress_execute_at = Some(pc);
                self.state = RunState::Paused;
                return;
            }
        }
        self.suppress_execute_at = None;

        self.bus.accesses.clear();
        match self.cpu.step(&mut self.bus) {
            StepOutcome::Executed { cycles } => {
                self.cpu_cycles_pending = cycles.saturating_sub(1);
            }
            StepOutcome::Crashed => {
                info!(target: "breakpoint", "CPU fault at ${:04X}; instance crashed", pc);
                self.state = RunState::Crashed;
                return;
            }
        }

        // The first recorded access is the opcode fetch, already probed
        // as an execute access above.
        let accesses: Vec<(u16, AccessKind)> = self.bus.accesses.drain(..).skip(1).collect();
        for (address, kind) in accesses {
            if let Some(hit) = self.check_breakpoint(address, kind) {
                info!(target: "breakpoint", "{:?} breakpoint at ${:04X}", kind, address);
                self.pending_break = Some(hit);
                self.state = RunState::Paused;
                break;
            }
        }
    }

    fn dma_substep(&mut self) {
        if !self.dma.halt_done {
            self.dma.halt_done = true;
            return;
        }
        if self.dma.read_phase {
            let address = self.dma.source.wrapping_add(self.dma.count);
            self.dma.latch = self.bus.read(address);
            self.dma.read_phase = false;
            if let Some(hit) = self.check_breakpoint(address, AccessKind::Read) {
                self.pending_break = Some(hit);
                self.state = RunState::Paused;
            }
        } else {
            self.bus.ppu.write_oam_byte(self.dma.latch);
            self.dma.read_phase = true;
            self.dma.count += 1;
            if self.dma.count == 256 {
                self.dma = OamDma::default();
            }
        }
    }

    fn check_breakpoint(&self, address: u16, kind: AccessKind) -> Option<BreakpointInfo> {
        if !self.breakpoints.quick_check(address) {
            return None;
        }
        let bank = if address >= 0x8000 { self.bus.memory.mapper.prg_bank_for(address).0 } else { 0 };
        let ctx = InstanceEvalContext { cpu: &self.cpu, bus: &self.bus };
        self.breakpoints
            .candidates(address, bank)
            .find(|info| info.should_fire(kind, &ctx))
            .cloned()
    }

    /// The host-facing framebuffer: 256x256 ABGR, rows 0..240 carrying
    /// pixels with full alpha and the remainder fully transparent. The
    /// PPU's per-pixel output is a palette RAM offset; the final color
    /// lookup happens here.
    pub fn screen_abgr(&self) -> Vec<u32> {
        let mut out = vec![0u32; 256 * 256];
        let frame_buffer = self.bus.ppu.frame_buffer();
        for y in 0..SCREEN_HEIGHT {
            for x in 0..SCREEN_WIDTH {
                let offset = frame_buffer[y * SCREEN_WIDTH + x];
                let color = self.bus.memory.peek_ppu(0x3F00 + offset as u16) & 0x3F;
                let (r, g, b) = palette::rgb_for(color);
                out[y * 256 + x] = 0xFF00_0000 | ((b as u32) << 16) | ((g as u32) << 8) | r as u32;
            }
        }
        out
    }

    // ------------------------------------------------------------------
    // Save states

    /// Serializes everything the worker owns: CPU, PPU (with framebuffer
    /// and raster position), APU/IO latches, the memory view (RAM, VRAM,
    /// palette RAM, mapper registers), DMA bookkeeping, and the
    /// CPU/PPU interleaving phase.
    pub fn capture_save_state(&mut self, name: impl Into<String>, timestamp: u64) -> usize {
        let mut blob = Vec::new();
        {
            let mut writer = BinaryWriter::new(&mut blob);
            self.cpu.save(&mut writer);
            self.bus.ppu.save(&mut writer);
            self.bus.apu_io.save(&mut writer);
            self.bus.memory.save(&mut writer);
            writer.write_bool(self.dma.enabled);
            writer.write_u16(self.dma.source);
            writer.write_u16(self.dma.count);
            writer.write_bool(self.dma.halt_done);
            writer.write_bool(self.dma.read_phase);
            writer.write_u8(self.dma.latch);
            writer.write_u8(self.phase);
            writer.write_u8(self.cpu_cycles_pending);
        }
        self.save_states.push(SaveStateInfo { name: name.into(), timestamp, blob });
        let index = self.save_states.len() - 1;
        self.current_save_state = Some(index);
        index
    }

    pub fn restore_save_state(&mut self, index: usize) -> Result<(), String> {
        let state = self.save_states.get(index).ok_or("no such save state")?.clone();
        self.restore_save_state_from(&state)?;
        self.current_save_state = Some(index);
        Ok(())
    }

    /// Restores from a state this instance doesn't own, e.g. one copied
    /// from another instance over the same cartridge.
    pub fn restore_save_state_from(&mut self, state: &SaveStateInfo) -> Result<(), String> {
        let blob = state.blob.clone();
        let mut cursor = &blob[..];
        let mut reader = BinaryReader::new(&mut cursor);
        self.cpu.load(&mut reader)?;
        self.bus.ppu.load(&mut reader)?;
        self.bus.apu_io.load(&mut reader)?;
        self.bus.memory.load(&mut reader)?;
        self.dma.enabled = reader.read_bool()?;
        self.dma.source = reader.read_u16()?;
        self.dma.count = reader.read_u16()?;
        self.dma.halt_done = reader.read_bool()?;
        self.dma.read_phase = reader.read_bool()?;
        self.dma.latch = reader.read_u8()?;
        self.phase = reader.read_u8()?;
        self.cpu_cycles_pending = reader.read_u8()?;
        self.bus.dma_request = None;
        self.bus.accesses.clear();
        self.pending_break = None;
        self.suppress_execute_at = None;
        self.state = RunState::Paused;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Project persistence (breakpoints and save states only; runtime
    // machine state travels via save states)

    pub fn save(&self, writer: &mut BinaryWriter) {
        self.breakpoints.save(writer);
        writer.write_varint(self.save_states.len() as u64);
        for state in &self.save_states {
            state.save(writer);
        }
        match self.current_save_state {
            Some(index) => writer.write_signed_varint(index as i64),
            None => writer.write_signed_varint(-1),
        }
    }

    pub fn load_into(&mut self, reader: &mut BinaryReader, tables: Option<&SymbolTables>) -> Result<(), String> {
        self.breakpoints = BreakpointTable::load(reader, tables)?;
        let count = reader.read_varint()?;
        let mut save_states = Vec::with_capacity(count as usize);
        for _ in 0..count {
            save_states.push(SaveStateInfo::load(reader)?);
        }
        self.save_states = save_states;
        let current = reader.read_signed_varint()?;
        self.current_save_state = if current < 0 { None } else { Some(current as usize) };
        if let Some(index) = self.current_save_state {
            if index >= self.save_states.len() {
                return Err("current save state index is out of range".to_string());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cartridge::cartridge::test_data;
    use crate::cartridge::HeaderDb;

    /// A one-bank NROM cart: reset code at $C000, vectors pointing at it.
    fn instance_with_code(code: &[u8]) -> SystemInstance {
        let mut rom = test_data::raw_ines_rom(1, 1, 0);
        let prg = 16;
        rom[prg..prg + code.len()].copy_from_slice(code);
        rom[prg + 0x3FFC] = 0x00;
        rom[prg + 0x3FFD] = 0xC0;
        let cartridge = Cartridge::load("test".to_string(), &rom, &HeaderDb::new()).unwrap();
        let mut instance = SystemInstance::from_cartridge(&cartridge).unwrap();
        instance.reset();
        instance
    }

    #[test]
    fn three_ppu_cycles_elapse_per_cpu_cycle_on_average() {
        let mut instance = instance_with_code(&[0xEA, 0x4C, 0x00, 0xC0]); // NOP; JMP $C000
        let start = instance.bus.ppu.scanline();
        assert_eq!(start, 0);
        for _ in 0..341 {
            instance.step_cycle();
        }
        // 341 CPU cycles land 1024 PPU cycles in, one past 3 scanlines.
        assert_eq!(instance.bus.ppu.scanline(), 3);
    }

    #[test]
    fn conditional_breakpoint_fires_only_when_the_condition_holds() {
        let mut instance = instance_with_code(&[0xEA, 0x4C, 0x00, 0xC0]);
        let mut breakpoint = BreakpointInfo::new(BreakpointKey::Address(0xC000));
        breakpoint.set_condition("a == $42", None).unwrap();
        instance.breakpoints.add(breakpoint);

        instance.cpu.registers.a = 0x41;
        instance.step_instruction();
        assert!(instance.take_pending_break().is_none());

        instance.cpu.registers.a = 0x42;
        // Run until the JMP brings execution back to $C000.
        for _ in 0..2 {
            instance.step_instruction();
            if instance.take_pending_break().is_some() {
                return;
            }
        }
        panic!("breakpoint did not fire with A == $42");
    }

    #[test]
    fn execute_breakpoint_does_not_refire_on_resume() {
        let mut instance = instance_with_code(&[0xEA, 0x4C, 0x00, 0xC0]);
        instance.breakpoints.add(BreakpointInfo::new(BreakpointKey::Address(0xC000)));
        instance.step_instruction();
        assert!(instance.take_pending_break().is_some());
        assert_eq!(instance.cpu.istep(), 0);

        // Resume: the suppressed fetch executes, then the JMP loops back
        // and the breakpoint arms again.
        instance.request_state(RunState::Paused);
        instance.step_instruction();
        assert_eq!(instance.cpu.istep(), 1);
        assert!(instance.take_pending_break().is_none());
    }

    #[test]
    fn oam_dma_copies_a_page_and_stalls_the_cpu() {
        // LDA #$02; STA $4014; NOP...
        let mut instance = instance_with_code(&[0xA9, 0x02, 0x8D, 0x14, 0x40, 0xEA, 0x4C, 0x05, 0xC0]);
        for i in 0..256u16 {
            instance.bus.memory.ram[0x200 + i as usize] = i as u8;
        }
        let istep_before_dma = {
            instance.step_instruction(); // LDA
            instance.step_instruction(); // STA $4014 latches the request
            instance.cpu.istep()
        };
        // 1 halt + 512 transfer sub-steps before the CPU runs again.
        for _ in 0..513 {
            instance.step_cycle();
        }
        assert_eq!(instance.cpu.istep(), istep_before_dma);
        assert_eq!(instance.bus.ppu.frame_buffer().len(), SCREEN_WIDTH * SCREEN_HEIGHT);
        instance.step_instruction();
        assert_eq!(instance.cpu.istep(), istep_before_dma + 1);
    }

    #[test]
    fn kil_opcode_moves_the_instance_to_crashed() {
        let mut instance = instance_with_code(&[0x02]); // KIL
        instance.request_state(RunState::Running);
        instance.run_cycles(16);
        assert_eq!(instance.state(), RunState::Crashed);
        // Crashed is sticky against plain state requests.
        instance.request_state(RunState::Running);
        assert_eq!(instance.state(), RunState::Crashed);
        instance.reset();
        assert_eq!(instance.state(), RunState::Paused);
    }

    #[test]
    fn save_state_restores_mid_run_execution_exactly() {
        let code = [0xE8, 0xC8, 0x4C, 0x00, 0xC0]; // INX; INY; JMP $C000
        let mut instance = instance_with_code(&code);
        for _ in 0..100 {
            instance.step_cycle();
        }
        instance.capture_save_state("mid", 0);
        let mut reference = instance_with_code(&code);
        reference.restore_save_state_from(&instance.save_states[0]).unwrap();

        for _ in 0..500 {
            instance.step_cycle();
            reference.step_cycle();
        }
        assert_eq!(instance.cpu.registers.x, reference.cpu.registers.x);
        assert_eq!(instance.cpu.registers.y, reference.cpu.registers.y);
        assert_eq!(instance.cpu.registers.pc, reference.cpu.registers.pc);
        assert_eq!(instance.bus.ppu.scanline(), reference.bus.ppu.scanline());
        assert_eq!(instance.bus.ppu.cycle(), reference.bus.ppu.cycle());
    }

    #[test]
    fn screen_is_256_by_256_with_transparent_overscan() {
        let instance = instance_with_code(&[0xEA]);
        let screen = instance.screen_abgr();
        assert_eq!(screen.len(), 256 * 256);
        assert_eq!(screen[255 * 256] & 0xFF00_0000, 0); // below row 240
        assert_eq!(screen[0] & 0xFF00_0000, 0xFF00_0000);
    }
}
