use log::{debug, warn};

use super::cpu::Cpu;
use super::dispatcher::Dispatcher;
use super::memory::MemoryStore;
use super::process_control_block::{ProcessControlBlock, ProcessState};
use crate::error::{Result, SimError};
use crate::isa::{Instruction, InterruptCode, Opcode, Operand, Register};

/// The result of one engine step.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    /// No process is current on this CPU.
    Idle,
    Executed(usize),
    Finished(usize),
    /// The process was terminated by a runtime error.
    Faulted(usize, SimError),
}

impl StepOutcome {
    /// The slot that left the CPU for good, if any.
    pub fn terminated_slot(&self) -> Option<usize> {
        match *self {
            StepOutcome::Finished(slot) | StepOutcome::Faulted(slot, _) => Some(slot),
            _ => None,
        }
    }
}

/// Where the program counter goes after an instruction.
enum Control {
    Next,
    Jump(usize),
    Halt,
}

/// Runs the fetch-decode-execute cycle for one CPU.
#[derive(Debug, Default)]
pub struct ExecutionEngine {
    cpu: Cpu,
    output: Vec<String>,
}

impl ExecutionEngine {
    pub fn new() -> ExecutionEngine {
        ExecutionEngine::default()
    }

    pub fn cpu(&self) -> &Cpu {
        &self.cpu
    }

    /// Lines printed with `INT 10H` since the last drain.
    pub fn drain_output(&mut self) -> Vec<String> {
        std::mem::take(&mut self.output)
    }

    /// Executes one instruction of the process current on `dispatcher`'s CPU.
    ///
    /// Runtime errors never escape: they terminate the process and come back
    /// as `StepOutcome::Faulted`.
    pub fn step(&mut self, store: &mut MemoryStore, dispatcher: &Dispatcher) -> StepOutcome {
        let slot = match dispatcher.current(store) {
            Some(slot) => slot,
            None => return StepOutcome::Idle,
        };

        match self.cycle(store, dispatcher, slot) {
            Ok(true) => StepOutcome::Finished(slot),
            Ok(false) => StepOutcome::Executed(slot),
            Err(err) => {
                warn!("CPU {}: process in slot {} faulted: {}", dispatcher.cpu_id(), slot, err);
                if let Ok(pcb) = store.pcb_mut(slot) {
                    pcb.state = ProcessState::Finished;
                }
                dispatcher.stop(store);
                StepOutcome::Faulted(slot, err)
            }
        }
    }

    /// Returns whether the process finished.
    fn cycle(
        &mut self,
        store: &mut MemoryStore,
        dispatcher: &Dispatcher,
        slot: usize,
    ) -> Result<bool> {
        let mut pcb = store.pcb(slot)?.clone();

        if pcb.program_counter >= pcb.get_instruction_count() {
            pcb.state = ProcessState::Finished;
            store.update_pcb(slot, pcb)?;
            dispatcher.stop(store);
            return Ok(true);
        }

        self.cpu.load_context(&pcb);
        let (instruction, control) = match self.run_current(store, dispatcher, &mut pcb) {
            Ok(executed) => executed,
            Err(err) => {
                self.cpu.save_context(&mut pcb);
                pcb.state = ProcessState::Finished;
                store.update_pcb(slot, pcb)?;
                return Err(err);
            }
        };

        let finished = match control {
            Control::Next => {
                self.cpu.set_program_counter(pcb.program_counter + 1);
                false
            }
            Control::Jump(target) => {
                self.cpu.set_program_counter(target);
                false
            }
            Control::Halt => true,
        };

        if !finished {
            self.cpu.add_cycles(instruction.cycle_weight());
            self.cpu.count_instruction();
            pcb.cpu_time += 1;
            store.tick();
        }

        self.cpu.save_context(&mut pcb);
        if finished {
            pcb.state = ProcessState::Finished;
        }
        store.update_pcb(slot, pcb)?;

        if finished {
            dispatcher.stop(store);
        }
        Ok(finished)
    }

    /// Fetches, decodes and executes the instruction at the PCB's counter.
    fn run_current(
        &mut self,
        store: &MemoryStore,
        dispatcher: &Dispatcher,
        pcb: &mut ProcessControlBlock,
    ) -> Result<(Instruction, Control)> {
        let address = pcb.get_base_address() + pcb.program_counter;
        let instruction = store.instruction_at(address)?.clone();
        self.cpu.fetch(instruction.clone());

        let opcode = self.cpu.decode()?;
        validate(&instruction)?;
        debug!(
            "CPU {} [{}] {:>3}: {}",
            dispatcher.cpu_id(),
            pcb.get_name(),
            pcb.program_counter,
            instruction
        );

        let control = self.execute(opcode, &instruction, pcb)?;
        Ok((instruction, control))
    }

    fn execute(
        &mut self,
        opcode: Opcode,
        instruction: &Instruction,
        pcb: &mut ProcessControlBlock,
    ) -> Result<Control> {
        let cpu = &mut self.cpu;

        match opcode {
            Opcode::Load => {
                let value = cpu.read(register(instruction, 0)?);
                cpu.write(Register::Ac, value);
            }
            Opcode::Store => {
                let value = cpu.read(Register::Ac);
                cpu.write(register(instruction, 0)?, value);
            }
            Opcode::Mov => {
                let destination = register(instruction, 0)?;
                let value = match instruction.operand(1) {
                    Some(Operand::Register(source)) => cpu.read(*source),
                    Some(Operand::Immediate(value)) => *value,
                    _ => return Err(malformed(instruction)),
                };
                cpu.write(destination, value);
            }
            Opcode::Add => {
                let value = cpu.sum(Register::Ax.name(), register(instruction, 0)?.name())?;
                cpu.write(Register::Ac, value);
            }
            Opcode::Sub => {
                let value = cpu.subtract(Register::Ax.name(), register(instruction, 0)?.name())?;
                cpu.write(Register::Ac, value);
            }
            Opcode::Inc => cpu.increment(instruction.register(0).unwrap_or(Register::Ac).name())?,
            Opcode::Dec => cpu.decrement(instruction.register(0).unwrap_or(Register::Ac).name())?,
            Opcode::Swap => {
                let (a, b) = (register(instruction, 0)?, register(instruction, 1)?);
                let (value_a, value_b) = (cpu.read(a), cpu.read(b));
                cpu.write(a, value_b);
                cpu.write(b, value_a);
            }
            Opcode::Cmp => {
                let (a, b) = (register(instruction, 0)?, register(instruction, 1)?);
                cpu.compare(a.name(), b.name())?;
            }
            Opcode::Jmp | Opcode::Je | Opcode::Jne => {
                let offset = instruction.immediate(0).ok_or_else(|| malformed(instruction))?;
                let taken = match opcode {
                    Opcode::Je => cpu.comparison_flag() == 0,
                    Opcode::Jne => cpu.comparison_flag() != 0,
                    _ => true,
                };
                if taken {
                    return jump_target(pcb, offset).map(Control::Jump);
                }
            }
            Opcode::Push => pcb.push(cpu.read(register(instruction, 0)?))?,
            Opcode::Pop => {
                let value = pcb.pop()?;
                cpu.write(register(instruction, 0)?, value);
            }
            Opcode::Param => {
                for operand in instruction.operands() {
                    match operand {
                        Operand::Immediate(value) => pcb.push(*value)?,
                        _ => return Err(malformed(instruction)),
                    }
                }
            }
            Opcode::Int => match instruction.interrupt() {
                Some(InterruptCode::Terminate) => return Ok(Control::Halt),
                Some(InterruptCode::Print) => {
                    let line = format!("[{}] {}", pcb.get_name(), cpu.read(Register::Dx));
                    debug!("{}", line);
                    self.output.push(line);
                }
                Some(code) => return Err(SimError::UnsupportedInterrupt(code.to_string())),
                None => return Err(malformed(instruction)),
            },
        }

        Ok(Control::Next)
    }
}

/// Structural check of an instruction before it executes.
fn validate(instruction: &Instruction) -> Result<()> {
    if !instruction.opcode().arity().accepts(instruction.operands().len()) {
        return Err(malformed(instruction));
    }
    Ok(())
}

fn register(instruction: &Instruction, index: usize) -> Result<Register> {
    instruction.register(index).ok_or_else(|| malformed(instruction))
}

fn malformed(instruction: &Instruction) -> SimError {
    SimError::MalformedInstruction(instruction.to_string())
}

fn jump_target(pcb: &ProcessControlBlock, offset: i32) -> Result<usize> {
    let size = pcb.get_instruction_count();
    let target = pcb.program_counter as i64 + i64::from(offset);

    if target < 0 || target >= size as i64 {
        return Err(SimError::OutOfRangeJump { target, size });
    }
    Ok(target as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::isa::parse_program;
    use crate::kernel::memory::BuddyAllocator;

    fn running(lines: &[&str]) -> (MemoryStore, Dispatcher, usize) {
        let mut store = MemoryStore::new(1024, Box::new(BuddyAllocator::default()), 1).unwrap();
        let program = parse_program(lines).unwrap();
        let slot = store.create_process("test", &program).unwrap();
        let dispatcher = Dispatcher::new(0);
        dispatcher.dispatch(&mut store, slot).unwrap();
        (store, dispatcher, slot)
    }

    fn run(
        engine: &mut ExecutionEngine,
        store: &mut MemoryStore,
        dispatcher: &Dispatcher,
        steps: usize,
    ) -> StepOutcome {
        let mut outcome = StepOutcome::Idle;
        for _ in 0..steps {
            outcome = engine.step(store, dispatcher);
        }
        outcome
    }

    #[test]
    fn test_engine_end_to_end_sum() {
        let (mut store, dispatcher, slot) = running(&["MOV AX, 5", "ADD AX", "INT 20H"]);
        let mut engine = ExecutionEngine::new();

        assert_eq!(engine.step(&mut store, &dispatcher), StepOutcome::Executed(slot));
        assert_eq!(engine.step(&mut store, &dispatcher), StepOutcome::Executed(slot));
        assert_eq!(engine.step(&mut store, &dispatcher), StepOutcome::Finished(slot));

        let pcb = store.pcb(slot).unwrap();
        assert_eq!(pcb.register(Register::Ac), 10);
        assert_eq!(pcb.state, ProcessState::Finished);
        assert_eq!(dispatcher.current(&store), None);
        assert_eq!(engine.step(&mut store, &dispatcher), StepOutcome::Idle);
    }

    #[test]
    fn test_engine_terminate_is_not_charged() {
        let (mut store, dispatcher, slot) = running(&["MOV AX, 5", "ADD AX", "INT 20H"]);
        let mut engine = ExecutionEngine::new();
        run(&mut engine, &mut store, &dispatcher, 2);
        let cycles = engine.cpu().cycles();

        assert_eq!(engine.step(&mut store, &dispatcher), StepOutcome::Finished(slot));

        let pcb = store.pcb(slot).unwrap();
        assert_eq!(pcb.cpu_time, 2);
        assert_eq!(pcb.program_counter, 2);
        assert_eq!(store.clock(), 2);
        assert_eq!(engine.cpu().instructions_executed(), 2);
        // only the fetch and decode cycles
        assert_eq!(engine.cpu().cycles(), cycles + 2);
    }

    #[test]
    fn test_engine_accounting() {
        let (mut store, dispatcher, slot) = running(&["MOV AX, 5", "ADD BX", "INC"]);
        let mut engine = ExecutionEngine::new();
        run(&mut engine, &mut store, &dispatcher, 3);

        let pcb = store.pcb(slot).unwrap();
        assert_eq!(pcb.program_counter, 3);
        assert_eq!(pcb.cpu_time, 3);
        assert_eq!(store.clock(), 3);
        assert_eq!(engine.cpu().instructions_executed(), 3);
        // fetch + decode per instruction plus weights 1 + 3 + 1
        assert_eq!(engine.cpu().cycles(), 11);

        assert_eq!(engine.step(&mut store, &dispatcher), StepOutcome::Finished(slot));
    }

    #[test]
    fn test_engine_register_operations() {
        let (mut store, dispatcher, slot) = running(&[
            "MOV BX, 7",
            "LOAD BX",
            "STORE CX",
            "MOV AX, 10",
            "SUB BX",
            "SWAP AX, DX",
            "DEC DX",
            "INC",
        ]);
        let mut engine = ExecutionEngine::new();
        run(&mut engine, &mut store, &dispatcher, 8);

        let pcb = store.pcb(slot).unwrap();
        assert_eq!(pcb.register(Register::Cx), 7);
        assert_eq!(pcb.register(Register::Ac), 4);
        assert_eq!(pcb.register(Register::Ax), 0);
        assert_eq!(pcb.register(Register::Dx), 9);
    }

    #[test]
    fn test_engine_conditional_jumps() {
        let (mut store, dispatcher, slot) = running(&[
            "MOV AX, 1",
            "MOV BX, 1",
            "CMP AX, BX",
            "JE 2",
            "MOV CX, 99",
            "JNE 2",
            "INT 20H",
        ]);
        let mut engine = ExecutionEngine::new();
        let outcome = run(&mut engine, &mut store, &dispatcher, 6);

        assert_eq!(outcome, StepOutcome::Finished(slot));
        let pcb = store.pcb(slot).unwrap();
        assert_eq!(pcb.register(Register::Cx), 0);
        assert_eq!(pcb.comparison_flag, 0);
    }

    #[test]
    fn test_engine_loop_with_backward_jump() {
        let (mut store, dispatcher, slot) = running(&[
            "MOV CX, 3",
            "INC AX",
            "DEC CX",
            "CMP CX, DX",
            "JNE -3",
            "INT 20H",
        ]);
        let mut engine = ExecutionEngine::new();

        let mut outcome = StepOutcome::Idle;
        for _ in 0..20 {
            outcome = engine.step(&mut store, &dispatcher);
            if outcome != StepOutcome::Executed(slot) {
                break;
            }
        }

        assert_eq!(outcome, StepOutcome::Finished(slot));
        assert_eq!(store.pcb(slot).unwrap().register(Register::Ax), 3);
    }

    #[test]
    fn test_engine_jump_out_of_range_faults() {
        let (mut store, dispatcher, slot) = running(&["JMP 5", "INC"]);
        let mut engine = ExecutionEngine::new();

        assert_eq!(
            engine.step(&mut store, &dispatcher),
            StepOutcome::Faulted(slot, SimError::OutOfRangeJump { target: 5, size: 2 })
        );
        assert_eq!(store.pcb(slot).unwrap().state, ProcessState::Finished);
        assert_eq!(dispatcher.current(&store), None);
    }

    #[test]
    fn test_engine_stack() {
        let (mut store, dispatcher, slot) =
            running(&["PARAM 1, 2, 3", "POP AX", "MOV BX, 4", "PUSH BX", "POP CX"]);
        let mut engine = ExecutionEngine::new();
        run(&mut engine, &mut store, &dispatcher, 5);

        let pcb = store.pcb(slot).unwrap();
        assert_eq!(pcb.register(Register::Ax), 3);
        assert_eq!(pcb.register(Register::Cx), 4);
        assert_eq!(pcb.stack(), &[1, 2]);
    }

    #[test]
    fn test_engine_stack_overflow_faults() {
        let (mut store, dispatcher, slot) = running(&["PARAM 1, 2, 3", "PARAM 4, 5, 6"]);
        let mut engine = ExecutionEngine::new();

        assert_eq!(engine.step(&mut store, &dispatcher), StepOutcome::Executed(slot));
        assert_eq!(
            engine.step(&mut store, &dispatcher),
            StepOutcome::Faulted(slot, SimError::StackOverflow("test".to_string()))
        );
    }

    #[test]
    fn test_engine_fault_saves_context() {
        let (mut store, dispatcher, slot) =
            running(&["MOV AX, 7", "PARAM 1, 2, 3", "PARAM 4, 5, 6"]);
        let mut engine = ExecutionEngine::new();
        run(&mut engine, &mut store, &dispatcher, 2);

        let outcome = engine.step(&mut store, &dispatcher);
        assert_eq!(
            outcome,
            StepOutcome::Faulted(slot, SimError::StackOverflow("test".to_string()))
        );

        let failing = parse_program(&["PARAM 4, 5, 6"]).unwrap().remove(0);
        let pcb = store.pcb(slot).unwrap();
        assert_eq!(pcb.state, ProcessState::Finished);
        assert_eq!(pcb.program_counter, 2);
        assert_eq!(pcb.register(Register::Ax), 7);
        assert_eq!(pcb.stack(), &[1, 2, 3, 4, 5]);
        assert_eq!(pcb.instruction_register, Some(failing));
        assert_eq!(pcb.cpu_time, 2);
    }

    #[test]
    fn test_engine_stack_underflow_faults() {
        let (mut store, dispatcher, slot) = running(&["POP AX"]);
        let mut engine = ExecutionEngine::new();

        let outcome = engine.step(&mut store, &dispatcher);
        assert_eq!(
            outcome,
            StepOutcome::Faulted(slot, SimError::StackUnderflow("test".to_string()))
        );
        assert_eq!(outcome.terminated_slot(), Some(slot));
    }

    #[test]
    fn test_engine_print_interrupt() {
        let (mut store, dispatcher, _) = running(&["MOV DX, 42", "INT 10H"]);
        let mut engine = ExecutionEngine::new();
        run(&mut engine, &mut store, &dispatcher, 2);

        assert_eq!(engine.drain_output(), vec!["[test] 42".to_string()]);
        assert!(engine.drain_output().is_empty());
    }

    #[test]
    fn test_engine_unsupported_interrupt() {
        let (mut store, dispatcher, slot) = running(&["INT 21H"]);
        let mut engine = ExecutionEngine::new();

        assert_eq!(
            engine.step(&mut store, &dispatcher),
            StepOutcome::Faulted(slot, SimError::UnsupportedInterrupt("21H".to_string()))
        );
    }

    #[test]
    fn test_engine_resumes_from_saved_context() {
        let (mut store, dispatcher, slot) = running(&["MOV AX, 2", "INC AX", "INC AX"]);
        let mut engine = ExecutionEngine::new();
        engine.step(&mut store, &dispatcher);

        // A fresh engine picks the process up from its PCB alone.
        let mut second = ExecutionEngine::new();
        run(&mut second, &mut store, &dispatcher, 2);

        assert_eq!(store.pcb(slot).unwrap().register(Register::Ax), 4);
    }
}
