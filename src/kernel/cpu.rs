use std::fmt;

use crate::error::{Result, SimError};
use crate::isa::{Instruction, Opcode, Register};

use super::ProcessControlBlock;

/// The register file of one virtual CPU.
///
/// Execution itself lives in the engine; the CPU only holds processor state
/// and the register-level helpers the engine needs.
#[derive(Debug, Clone, Default)]
pub struct Cpu {
    program_counter: usize,
    registers: [i32; 5],
    instruction_register: Option<Instruction>,
    comparison_flag: i32,
    cycles: u64,
    instructions_executed: u64,
}

impl Cpu {
    pub fn new() -> Cpu {
        Cpu::default()
    }

    pub fn reset(&mut self) {
        *self = Cpu::default();
    }

    pub fn get_reg(&self, name: &str) -> Result<i32> {
        let register: Register = name.parse()?;
        Ok(self.read(register))
    }

    pub fn set_reg(&mut self, name: &str, value: i32) -> Result<()> {
        let register: Register = name.parse()?;
        self.write(register, value);
        Ok(())
    }

    pub fn read(&self, register: Register) -> i32 {
        self.registers[register.index()]
    }

    pub fn write(&mut self, register: Register, value: i32) {
        self.registers[register.index()] = value;
    }

    pub fn sum(&self, reg_1: &str, reg_2: &str) -> Result<i32> {
        Ok(self.get_reg(reg_1)?.wrapping_add(self.get_reg(reg_2)?))
    }

    pub fn subtract(&self, reg_1: &str, reg_2: &str) -> Result<i32> {
        Ok(self.get_reg(reg_1)?.wrapping_sub(self.get_reg(reg_2)?))
    }

    /// Sets the comparison flag to -1, 0 or 1.
    pub fn compare(&mut self, reg_1: &str, reg_2: &str) -> Result<()> {
        let value_1 = self.get_reg(reg_1)?;
        let value_2 = self.get_reg(reg_2)?;
        self.comparison_flag = match value_1.cmp(&value_2) {
            std::cmp::Ordering::Less => -1,
            std::cmp::Ordering::Equal => 0,
            std::cmp::Ordering::Greater => 1,
        };
        Ok(())
    }

    pub fn increment(&mut self, name: &str) -> Result<()> {
        let value = self.get_reg(name)?;
        self.set_reg(name, value.wrapping_add(1))
    }

    pub fn decrement(&mut self, name: &str) -> Result<()> {
        let value = self.get_reg(name)?;
        self.set_reg(name, value.wrapping_sub(1))
    }

    /// Copies registers, PC, IR and flag from the PCB.
    pub fn load_context(&mut self, pcb: &ProcessControlBlock) {
        self.program_counter = pcb.program_counter;
        self.registers.copy_from_slice(&pcb.registers);
        self.instruction_register = pcb.instruction_register.clone();
        self.comparison_flag = pcb.comparison_flag;
    }

    /// Copies registers, PC, IR and flag into the PCB.
    pub fn save_context(&self, pcb: &mut ProcessControlBlock) {
        pcb.program_counter = self.program_counter;
        pcb.registers.copy_from_slice(&self.registers);
        pcb.instruction_register = self.instruction_register.clone();
        pcb.comparison_flag = self.comparison_flag;
    }

    pub fn fetch(&mut self, instruction: Instruction) {
        self.instruction_register = Some(instruction);
        self.cycles += 1;
    }

    pub fn decode(&mut self) -> Result<Opcode> {
        let opcode = self
            .instruction_register
            .as_ref()
            .map(|instruction| instruction.opcode())
            .ok_or(SimError::EmptyInstructionRegister)?;
        self.cycles += 1;
        Ok(opcode)
    }

    pub fn add_cycles(&mut self, cycles: u32) {
        self.cycles += u64::from(cycles);
    }

    pub fn count_instruction(&mut self) {
        self.instructions_executed += 1;
    }

    pub fn program_counter(&self) -> usize {
        self.program_counter
    }

    pub fn set_program_counter(&mut self, program_counter: usize) {
        self.program_counter = program_counter;
    }

    pub fn instruction_register(&self) -> Option<&Instruction> {
        self.instruction_register.as_ref()
    }

    pub fn comparison_flag(&self) -> i32 {
        self.comparison_flag
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    pub fn instructions_executed(&self) -> u64 {
        self.instructions_executed
    }
}

impl fmt::Display for Cpu {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ir = match &self.instruction_register {
            Some(instruction) => instruction.to_string(),
            None => "-".to_string(),
        };
        write!(
            f,
            "CPU[PC={}, AC={}, AX={}, BX={}, CX={}, DX={}, Flag={}, IR={}, Cycles={}, Executed={}]",
            self.program_counter,
            self.registers[0],
            self.registers[1],
            self.registers[2],
            self.registers[3],
            self.registers[4],
            self.comparison_flag,
            ir,
            self.cycles,
            self.instructions_executed
        )
    }
}
