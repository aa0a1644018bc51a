use std::collections::HashMap;

use log::warn;

use super::ProgramSource;
use crate::error::{Result, SimError};

pub const DISK_SIZE: usize = 512;
pub const VIRTUAL_MEMORY_SIZE: usize = 64;

/// Where a program's lines live on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgramInfo {
    pub header_idx: usize,
    pub data_start_idx: usize,
    pub line_count: usize,
}

/// Secondary storage holding program source lines.
///
/// Each program takes one header cell (`name;start;length`) followed by its
/// lines. The last `virtual_memory` cells are reserved and never written.
pub struct Disk {
    program_map: HashMap<String, ProgramInfo>,
    program_order: Vec<String>,
    data: Vec<Option<String>>,
    virtual_memory: usize,
    current_data_idx: usize,
}

impl Disk {
    pub fn new(size: usize, virtual_memory: usize) -> Disk {
        Disk {
            program_map: HashMap::new(),
            program_order: Vec::new(),
            data: vec![None; size],
            virtual_memory: virtual_memory.min(size),
            current_data_idx: 0,
        }
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn virtual_memory(&self) -> usize {
        self.virtual_memory
    }

    /// Cells still available for programs.
    pub fn free_space(&self) -> usize {
        self.storage_limit() - self.current_data_idx
    }

    fn storage_limit(&self) -> usize {
        self.data.len() - self.virtual_memory
    }

    pub fn write_program<S: AsRef<str>>(&mut self, name: &str, lines: &[S]) -> Result<()> {
        if self.program_map.contains_key(name) {
            return Err(SimError::DuplicateProgram(name.to_string()));
        }

        let required = lines.len() + 1;
        if required > self.free_space() {
            return Err(SimError::NoSpace { requested: required });
        }

        let header_idx = self.current_data_idx;
        let data_start_idx = header_idx + 1;
        self.data[header_idx] = Some(format!("{};{};{}", name, data_start_idx, lines.len()));

        let cells = &mut self.data[data_start_idx..data_start_idx + lines.len()];
        for (cell, line) in cells.iter_mut().zip(lines) {
            *cell = Some(line.as_ref().to_string());
        }
        self.current_data_idx += required;

        self.program_map.insert(
            name.to_string(),
            ProgramInfo {
                header_idx,
                data_start_idx,
                line_count: lines.len(),
            },
        );
        self.program_order.push(name.to_string());
        Ok(())
    }

    /// Writes each program, skipping those that do not fit. Returns the names written.
    pub fn write_programs(&mut self, programs: Vec<(String, Vec<String>)>) -> Vec<String> {
        let mut written = Vec::new();

        for (name, lines) in programs {
            match self.write_program(&name, &lines) {
                Ok(()) => written.push(name),
                Err(err) => warn!("Skipping program {}: {}", name, err),
            }
        }

        written
    }

    pub fn get_info_for(&self, name: &str) -> Option<&ProgramInfo> {
        self.program_map.get(name)
    }

    /// Program names in the order they were written.
    pub fn program_names(&self) -> &[String] {
        &self.program_order
    }

    /// Parses a header cell back into `(name, start, length)`.
    pub fn read_header(&self, idx: usize) -> Option<(String, usize, usize)> {
        let header = self.data.get(idx)?.as_deref()?;
        let mut parts = header.rsplitn(3, ';');
        let length = parts.next()?.parse().ok()?;
        let start = parts.next()?.parse().ok()?;
        let name = parts.next()?;
        Some((name.to_string(), start, length))
    }

    pub fn clear(&mut self) {
        self.program_map.clear();
        self.program_order.clear();
        self.data.iter_mut().for_each(|cell| *cell = None);
        self.current_data_idx = 0;
    }

    /// Every occupied cell with its index.
    pub fn dump(&self) -> String {
        self.data
            .iter()
            .enumerate()
            .filter_map(|(idx, cell)| cell.as_ref().map(|value| format!("[{}] {}\n", idx, value)))
            .collect()
    }
}

impl Default for Disk {
    fn default() -> Disk {
        Disk::new(DISK_SIZE, VIRTUAL_MEMORY_SIZE)
    }
}

impl ProgramSource for Disk {
    fn read_program(&self, name: &str) -> Option<Vec<String>> {
        let info = self.program_map.get(name)?;
        let (_, start, length) = self.read_header(info.header_idx)?;

        self.data.get(start..start + length)?.iter().cloned().collect()
    }
}
