//! The instruction set and its line parser.

pub mod instruction;
pub mod parser;

pub use instruction::{Arity, Instruction, InterruptCode, Opcode, Operand, Register};
pub use parser::{parse, parse_program, ParseError};
