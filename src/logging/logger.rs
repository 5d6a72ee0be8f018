use log::{Level, LevelFilter, Metadata, Record, SetLoggerError};

pub fn init(logger: Logger) -> Result<(), SetLoggerError> {
    log::set_boxed_logger(Box::new(logger))
        .map(|()| log::set_max_level(LevelFilter::Info))
}

/// Per-subsystem verbosity toggles, consulted by `target()` string.
pub struct Logger {
    pub log_cpu_instructions: bool,
    pub log_cpu_steps: bool,
    pub log_ppu_stages: bool,
    pub log_ppu_flags: bool,
    pub log_disassembly: bool,
    pub log_reference_graph: bool,
    pub log_breakpoints: bool,
}

impl Default for Logger {
    fn default() -> Self {
        Logger {
            log_cpu_instructions: false,
            log_cpu_steps: false,
            log_ppu_stages: false,
            log_ppu_flags: false,
            log_disassembly: false,
            log_reference_graph: false,
            log_breakpoints: true,
        }
    }
}

impl log::Log for Logger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        match metadata.target() {
            "" => true,
            "cpuinstructions" => self.log_cpu_instructions,
            "cpustep" => self.log_cpu_steps,
            "ppustage" => self.log_ppu_stages,
            "ppuflags" => self.log_ppu_flags,
            "disasm" => self.log_disassembly,
            "refgraph" => self.log_reference_graph,
            "breakpoint" => self.log_breakpoints,
            target => {
                let chunks: Vec<&str> = target.split("::").collect();
                match chunks[..] {
                    ["sprocket", ..] => true,
                    _ => true,
                }
            }
        }
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            if record.level() < Level::Info {
                print!("{} - ", record.level());
            }

            match record.target() {
                "ppustage" => print!("PPU STAGE "),
                "ppuflags" => print!("PPU FLAGS "),
                "disasm" => print!("DISASM "),
                _ => {}
            }

            println!("{}", record.args());
        }
    }

    fn flush(&self) {}
}
