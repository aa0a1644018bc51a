use std::fmt;

use super::instruction::{Instruction, InterruptCode, Opcode, Operand, Register};

/// A malformed source line. `line` is 1-based when known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    pub line: Option<usize>,
    pub message: String,
}

impl ParseError {
    fn new(message: impl Into<String>) -> ParseError {
        ParseError { line: None, message: message.into() }
    }

    fn at_line(mut self, line: usize) -> ParseError {
        self.line = Some(line);
        self
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.line {
            Some(line) => write!(f, "line {}: {}", line, self.message),
            None => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for ParseError {}

/// Parses one source line.
///
/// Blank lines, labels (`LOOP:`) and comments (`; ...`) yield `Ok(None)`.
pub fn parse(line: &str) -> Result<Option<Instruction>, ParseError> {
    let line = line.trim();

    if line.is_empty() || line.ends_with(':') || line.starts_with(';') {
        return Ok(None);
    }

    let (mnemonic, rest) = match line.split_once(char::is_whitespace) {
        Some((mnemonic, rest)) => (mnemonic, rest.trim()),
        None => (line, ""),
    };

    let opcode: Opcode = mnemonic
        .parse()
        .map_err(|_| ParseError::new(format!("unknown instruction: {}", mnemonic)))?;

    let tokens: Vec<&str> = rest
        .split(',')
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .collect();

    let arity = opcode.arity();
    if !arity.accepts(tokens.len()) {
        return Err(ParseError::new(format!(
            "invalid operand count for {}: expected {}, found {}",
            opcode,
            arity,
            tokens.len()
        )));
    }

    let operands = match opcode {
        Opcode::Mov => vec![register(tokens[0])?, register_or_immediate(tokens[1])?],
        Opcode::Add | Opcode::Sub | Opcode::Load | Opcode::Store | Opcode::Push | Opcode::Pop => {
            vec![register(tokens[0])?]
        }
        Opcode::Inc | Opcode::Dec => tokens
            .iter()
            .map(|token| register(token))
            .collect::<Result<_, _>>()?,
        Opcode::Cmp | Opcode::Swap => vec![register(tokens[0])?, register(tokens[1])?],
        Opcode::Jmp | Opcode::Je | Opcode::Jne => vec![jump_offset(tokens[0])?],
        Opcode::Param => tokens.iter().map(|token| immediate(token)).collect::<Result<_, _>>()?,
        Opcode::Int => vec![interrupt(tokens[0])?],
    };

    Ok(Some(Instruction::new(opcode, operands)))
}

/// Parses every line of a program, skipping lines that carry no instruction.
pub fn parse_program<S: AsRef<str>>(lines: &[S]) -> Result<Vec<Instruction>, ParseError> {
    let mut instructions = Vec::new();

    for (i, line) in lines.iter().enumerate() {
        if let Some(instruction) = parse(line.as_ref()).map_err(|err| err.at_line(i + 1))? {
            instructions.push(instruction);
        }
    }

    Ok(instructions)
}

fn register(token: &str) -> Result<Operand, ParseError> {
    token
        .parse::<Register>()
        .map(Operand::Register)
        .map_err(|_| ParseError::new(format!("invalid register operand: {}", token)))
}

fn register_or_immediate(token: &str) -> Result<Operand, ParseError> {
    if let Ok(register) = token.parse::<Register>() {
        return Ok(Operand::Register(register));
    }
    parse_integer(token, false)
        .map(Operand::Immediate)
        .ok_or_else(|| ParseError::new(format!("invalid source operand: {}", token)))
}

fn immediate(token: &str) -> Result<Operand, ParseError> {
    parse_integer(token, false)
        .map(Operand::Immediate)
        .ok_or_else(|| ParseError::new(format!("non-numeric parameter: {}", token)))
}

fn jump_offset(token: &str) -> Result<Operand, ParseError> {
    parse_integer(token, true)
        .map(Operand::Immediate)
        .ok_or_else(|| ParseError::new(format!("invalid jump offset: {}", token)))
}

fn interrupt(token: &str) -> Result<Operand, ParseError> {
    token
        .parse::<InterruptCode>()
        .map(Operand::Interrupt)
        .map_err(|_| ParseError::new(format!("invalid interrupt code: {}", token)))
}

/// Accepts `-?\d+`, or `[+-]?\d+` when `allow_plus` is set.
fn parse_integer(token: &str, allow_plus: bool) -> Option<i32> {
    let digits = match token.as_bytes().first()? {
        b'-' => &token[1..],
        b'+' if allow_plus => &token[1..],
        _ => token,
    };

    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    token.trim_start_matches('+').parse().ok()
}
