use std::fmt;
use std::str::FromStr;

use crate::error::SimError;

/// Operation codes understood by the virtual CPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    Load,
    Store,
    Mov,
    Add,
    Sub,
    Inc,
    Dec,
    Swap,
    Push,
    Pop,
    Jmp,
    Cmp,
    Je,
    Jne,
    Param,
    Int,
}

/// How many operands an opcode takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exact(usize),
    /// Inclusive bounds.
    Between(usize, usize),
}

impl Arity {
    pub fn accepts(&self, count: usize) -> bool {
        match *self {
            Arity::Exact(n) => count == n,
            Arity::Between(min, max) => (min..=max).contains(&count),
        }
    }
}

impl fmt::Display for Arity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arity::Exact(n) => write!(f, "{}", n),
            Arity::Between(min, max) => write!(f, "{} to {}", min, max),
        }
    }
}

impl Opcode {
    pub const ALL: [Opcode; 16] = [
        Opcode::Load,
        Opcode::Store,
        Opcode::Mov,
        Opcode::Add,
        Opcode::Sub,
        Opcode::Inc,
        Opcode::Dec,
        Opcode::Swap,
        Opcode::Push,
        Opcode::Pop,
        Opcode::Jmp,
        Opcode::Cmp,
        Opcode::Je,
        Opcode::Jne,
        Opcode::Param,
        Opcode::Int,
    ];

    pub fn mnemonic(&self) -> &'static str {
        match self {
            Opcode::Load => "LOAD",
            Opcode::Store => "STORE",
            Opcode::Mov => "MOV",
            Opcode::Add => "ADD",
            Opcode::Sub => "SUB",
            Opcode::Inc => "INC",
            Opcode::Dec => "DEC",
            Opcode::Swap => "SWAP",
            Opcode::Push => "PUSH",
            Opcode::Pop => "POP",
            Opcode::Jmp => "JMP",
            Opcode::Cmp => "CMP",
            Opcode::Je => "JE",
            Opcode::Jne => "JNE",
            Opcode::Param => "PARAM",
            Opcode::Int => "INT",
        }
    }

    pub fn arity(&self) -> Arity {
        match self {
            Opcode::Inc | Opcode::Dec => Arity::Between(0, 1),
            Opcode::Param => Arity::Between(1, 3),
            Opcode::Mov | Opcode::Swap | Opcode::Cmp => Arity::Exact(2),
            _ => Arity::Exact(1),
        }
    }

    /// Clock cycles charged per execution. `INT` depends on its code.
    pub fn weight(&self) -> Option<u32> {
        match self {
            Opcode::Mov
            | Opcode::Inc
            | Opcode::Dec
            | Opcode::Swap
            | Opcode::Push
            | Opcode::Pop => Some(1),
            Opcode::Load
            | Opcode::Store
            | Opcode::Jmp
            | Opcode::Cmp
            | Opcode::Je
            | Opcode::Jne => Some(2),
            Opcode::Add | Opcode::Sub | Opcode::Param => Some(3),
            Opcode::Int => None,
        }
    }
}

impl FromStr for Opcode {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        Opcode::ALL
            .iter()
            .copied()
            .find(|opcode| opcode.mnemonic() == upper)
            .ok_or(())
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}

/// The accumulator plus four general purpose registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Register {
    Ac,
    Ax,
    Bx,
    Cx,
    Dx,
}

impl Register {
    pub const ALL: [Register; 5] = [
        Register::Ac,
        Register::Ax,
        Register::Bx,
        Register::Cx,
        Register::Dx,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Register::Ac => "AC",
            Register::Ax => "AX",
            Register::Bx => "BX",
            Register::Cx => "CX",
            Register::Dx => "DX",
        }
    }

    /// Position in a register file laid out as `[AC, AX, BX, CX, DX]`.
    pub fn index(&self) -> usize {
        *self as usize
    }
}

impl FromStr for Register {
    type Err = SimError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        Register::ALL
            .iter()
            .copied()
            .find(|register| register.name() == upper)
            .ok_or_else(|| SimError::UnknownRegister(s.trim().to_string()))
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Interrupt codes accepted by `INT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InterruptCode {
    /// 09H: keyboard input.
    Keyboard,
    /// 10H: print DX.
    Print,
    /// 20H: terminate the program.
    Terminate,
    /// 21H: file services.
    FileServices,
}

impl InterruptCode {
    pub fn code(&self) -> &'static str {
        match self {
            InterruptCode::Keyboard => "09H",
            InterruptCode::Print => "10H",
            InterruptCode::Terminate => "20H",
            InterruptCode::FileServices => "21H",
        }
    }

    pub fn weight(&self) -> u32 {
        match self {
            InterruptCode::Keyboard => 3,
            InterruptCode::Print | InterruptCode::Terminate => 2,
            InterruptCode::FileServices => 5,
        }
    }
}

impl FromStr for InterruptCode {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "09H" | "9H" => Ok(InterruptCode::Keyboard),
            "10H" => Ok(InterruptCode::Print),
            "20H" => Ok(InterruptCode::Terminate),
            "21H" => Ok(InterruptCode::FileServices),
            _ => Err(()),
        }
    }
}

impl fmt::Display for InterruptCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    Register(Register),
    Immediate(i32),
    Interrupt(InterruptCode),
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Register(register) => write!(f, "{}", register),
            Operand::Immediate(value) => write!(f, "{}", value),
            Operand::Interrupt(code) => write!(f, "{}", code),
        }
    }
}

/// A validated instruction. Only the parser builds these from text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    opcode: Opcode,
    operands: Vec<Operand>,
}

impl Instruction {
    pub fn new(opcode: Opcode, operands: Vec<Operand>) -> Instruction {
        Instruction { opcode, operands }
    }

    pub fn opcode(&self) -> Opcode {
        self.opcode
    }

    pub fn operands(&self) -> &[Operand] {
        &self.operands
    }

    pub fn operand(&self, index: usize) -> Option<&Operand> {
        self.operands.get(index)
    }

    /// Register operand at `index`, if that operand is a register.
    pub fn register(&self, index: usize) -> Option<Register> {
        match self.operands.get(index) {
            Some(Operand::Register(register)) => Some(*register),
            _ => None,
        }
    }

    pub fn immediate(&self, index: usize) -> Option<i32> {
        match self.operands.get(index) {
            Some(Operand::Immediate(value)) => Some(*value),
            _ => None,
        }
    }

    pub fn interrupt(&self) -> Option<InterruptCode> {
        self.operands.iter().find_map(|operand| match operand {
            Operand::Interrupt(code) => Some(*code),
            _ => None,
        })
    }

    /// Cycles charged for this instruction; `INT` uses its code's weight.
    pub fn cycle_weight(&self) -> u32 {
        match self.opcode.weight() {
            Some(weight) => weight,
            None => self.interrupt().map(|code| code.weight()).unwrap_or(0),
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.opcode)?;
        for (i, operand) in self.operands.iter().enumerate() {
            if i == 0 {
                write!(f, " {}", operand)?;
            } else {
                write!(f, ", {}", operand)?;
            }
        }
        Ok(())
    }
}
