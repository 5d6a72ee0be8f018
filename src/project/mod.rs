use std::io::{Read, Write};

use crate::cartridge::{Cartridge, HeaderDb};
use crate::config::EmulatorConfig;
use crate::instance::SystemInstance;
use crate::io::{BinaryReader, BinaryWriter};
use crate::system::System;

pub const PROJECT_MAGIC: u64 = 0x8781_A90A_FDE1_F317;
pub const PROJECT_VERSION: u32 = 0x0000_0101;
/// The first released layout: the System block followed the flags word
/// directly, with no tagged info block or project name.
const PROJECT_VERSION_INITIAL: u32 = 0x0000_0100;
const PROJECT_INFO_TAG: u64 = 1;

/// A project is one [`System`] (the symbolic program database) plus any
/// number of [`SystemInstance`]s (execution state over it). The file
/// format is a single stream: magic, version, flags, a tagged info
/// block, the recursive System block, then per-instance breakpoint and
/// save-state lists.
#[derive(Debug)]
pub struct Project {
    /// Short display name, typically derived from the ROM file name.
    pub name: String,
    pub system: System,
    pub instances: Vec<SystemInstance>,
}

impl Project {
    pub fn new(name: impl Into<String>, system: System) -> Project {
        Project { name: name.into(), system, instances: Vec::new() }
    }

    /// Builds a project from a raw iNES image. `progress` is called with
    /// `(current, total, message)` as each creation stage completes, so a
    /// host can drive a progress bar without a callback registry.
    pub fn from_rom(
        name: impl Into<String>,
        rom: &[u8],
        header_db: &HeaderDb,
        config: &EmulatorConfig,
        mut progress: impl FnMut(u32, u32, &str),
    ) -> Result<Project, String> {
        let name = name.into();
        let total = 3;
        progress(0, total, "parsing cartridge header");
        let cartridge = Cartridge::load(name.clone(), rom, header_db)?;
        progress(1, total, "building memory regions and default labels");
        let mut system = System::new(cartridge)?;
        if config.eager_disassembly {
            progress(2, total, "disassembling from the reset vector");
            let entry = system.entry_point()?;
            system.disassemble_from(entry)?;
        }
        progress(total, total, "done");
        Ok(Project::new(name, system))
    }

    pub fn create_instance(&mut self) -> Result<usize, String> {
        let instance = SystemInstance::new(&self.system)?;
        self.instances.push(instance);
        Ok(self.instances.len() - 1)
    }

    /// Serializes the whole project into `out`. The stream is built in
    /// memory first so an I/O failure midway never leaves a torn file
    /// behind a successful return.
    pub fn save(&self, out: &mut dyn Write) -> Result<(), String> {
        let mut buffer = Vec::new();
        {
            let mut writer = BinaryWriter::new(&mut buffer);
            writer.write_u64(PROJECT_MAGIC);
            writer.write_u32(PROJECT_VERSION);
            writer.write_u32(0); // flags, reserved
            writer.write_varint(PROJECT_INFO_TAG);
            writer.write_string(&self.name);
            self.system.save(&mut writer);
            writer.write_varint(self.instances.len() as u64);
            for instance in &self.instances {
                instance.save(&mut writer);
            }
        }
        out.write_all(&buffer).map_err(|e| e.to_string())
    }

    /// Loads a project stream. Everything is parsed into locals before a
    /// `Project` is assembled, so a short or corrupt file is rejected
    /// wholesale with no partially-published state.
    pub fn load(input: &mut dyn Read) -> Result<Project, String> {
        let mut reader = BinaryReader::new(input);
        let magic = reader.read_u64()?;
        if magic != PROJECT_MAGIC {
            return Err("not a project file (bad magic)".to_string());
        }
        let version = reader.read_u32()?;
        if version != PROJECT_VERSION && version != PROJECT_VERSION_INITIAL {
            return Err(format!("unsupported project version {:#010X}", version));
        }
        let _flags = reader.read_u32()?;
        // Initial-version files predate the info block; their name is
        // whatever the host derives from the file path.
        let name = if version >= PROJECT_VERSION {
            let info_tag = reader.read_varint()?;
            if info_tag != PROJECT_INFO_TAG {
                return Err(format!("unexpected project info tag {}", info_tag));
            }
            reader.read_string()?
        } else {
            String::new()
        };
        let system = System::load(&mut reader)?;
        let instance_count = reader.read_varint()?;
        let mut instances = Vec::with_capacity(instance_count as usize);
        for _ in 0..instance_count {
            let mut instance = SystemInstance::new(&system)?;
            instance.load_into(&mut reader, Some(&system.tables))?;
            instances.push(instance);
        }
        Ok(Project { name, system, instances })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::{BreakpointInfo, BreakpointKey};
    use crate::types::GlobalMemoryLocation;

    fn test_project() -> Project {
        let rom = crate::cartridge::cartridge::test_data::raw_ines_rom(1, 1, 0);
        let config = EmulatorConfig { eager_disassembly: false, ..EmulatorConfig::default() };
        Project::from_rom("test", &rom, &HeaderDb::new(), &config, |_, _, _| {}).unwrap()
    }

    #[test]
    fn from_rom_reports_progress_stages() {
        let rom = crate::cartridge::cartridge::test_data::raw_ines_rom(1, 1, 0);
        let config = EmulatorConfig { eager_disassembly: false, ..EmulatorConfig::default() };
        let mut messages = Vec::new();
        Project::from_rom("test", &rom, &HeaderDb::new(), &config, |current, total, message| {
            messages.push((current, total, message.to_string()));
        })
        .unwrap();
        assert!(messages.len() >= 2);
        assert_eq!(messages.last().unwrap().0, messages.last().unwrap().1);
    }

    #[test]
    fn save_and_load_round_trips_symbols_and_breakpoints() {
        let mut project = test_project();
        project
            .system
            .create_label(GlobalMemoryLocation::prg(0xC010, 0), "main_loop", true)
            .unwrap();
        project.system.create_define("FOO", "1 + 2").unwrap();
        let index = project.create_instance().unwrap();
        let mut breakpoint = BreakpointInfo::new(BreakpointKey::Address(0xC000));
        breakpoint
            .set_condition("x != 0", Some(&project.system.tables))
            .unwrap();
        project.instances[index].breakpoints.add(breakpoint);

        let mut buffer = Vec::new();
        project.save(&mut buffer).unwrap();
        let mut cursor = &buffer[..];
        let restored = Project::load(&mut cursor).unwrap();

        assert_eq!(restored.name, "test");
        let foo = restored.system.find_define("FOO").unwrap();
        assert_eq!(restored.system.evaluate_define(foo).unwrap(), 3);
        assert!(restored.system.tables.labels.find_by_name("main_loop").is_some());
        assert_eq!(restored.instances.len(), 1);
        let restored_breakpoints: Vec<_> = restored.instances[0].breakpoints.iter().collect();
        assert_eq!(restored_breakpoints.len(), 1);
        assert_eq!(restored_breakpoints[0].condition_text().unwrap(), "x != 0");
    }

    #[test]
    fn initial_version_files_load_without_an_info_block() {
        let project = test_project();
        let mut buffer = Vec::new();
        {
            let mut writer = BinaryWriter::new(&mut buffer);
            writer.write_u64(PROJECT_MAGIC);
            writer.write_u32(PROJECT_VERSION_INITIAL);
            writer.write_u32(0);
            project.system.save(&mut writer);
            writer.write_varint(0); // no instances
        }
        let mut cursor = &buffer[..];
        let restored = Project::load(&mut cursor).unwrap();
        assert_eq!(restored.name, "");
        assert_eq!(restored.system.num_memory_regions(), project.system.num_memory_regions());
    }

    #[test]
    fn unknown_project_versions_are_reported_not_fatal() {
        let mut buffer = Vec::new();
        test_project().save(&mut buffer).unwrap();
        buffer[8..12].copy_from_slice(&0x0000_0999u32.to_le_bytes());
        let mut cursor = &buffer[..];
        let error = Project::load(&mut cursor).unwrap_err();
        assert!(error.contains("version"));
    }

    #[test]
    fn bad_magic_is_rejected() {
        let mut buffer = Vec::new();
        test_project().save(&mut buffer).unwrap();
        buffer[0] ^= 0xFF;
        let mut cursor = &buffer[..];
        assert!(Project::load(&mut cursor).is_err());
    }

    #[test]
    fn truncated_files_are_rejected_wholesale() {
        let mut buffer = Vec::new();
        test_project().save(&mut buffer).unwrap();
        let truncated = &buffer[..buffer.len() / 2];
        let mut cursor = truncated;
        assert!(Project::load(&mut cursor).is_err());
    }

    #[test]
    fn eager_disassembly_marks_the_entry_point_as_code() {
        let mut rom = crate::cartridge::cartridge::test_data::raw_ines_rom(1, 1, 0);
        let prg = 16;
        rom[prg] = 0xA9; // LDA #$01
        rom[prg + 1] = 0x01;
        rom[prg + 2] = 0x60; // RTS
        rom[prg + 0x3FFC] = 0x00;
        rom[prg + 0x3FFD] = 0xC0;
        let project = Project::from_rom("test", &rom, &HeaderDb::new(), &EmulatorConfig::default(), |_, _, _| {}).unwrap();
        let (object, _) = project.system.get_object(GlobalMemoryLocation::prg(0xC000, 0)).unwrap();
        assert!(matches!(object.object_type, crate::memory::ObjectType::Code { .. }));
    }
}
