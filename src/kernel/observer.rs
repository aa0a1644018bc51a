use log::{debug, info};

use super::process_control_block::ProcessControlBlock;

/// Receives notifications from the driver. Every method defaults to a no-op.
pub trait SystemObserver: Send + Sync {
    fn process_executed(&self, _cpu: usize, _pcb: &ProcessControlBlock) {}

    fn process_finished(&self, _cpu: usize, _pcb: &ProcessControlBlock) {}

    fn process_admitted(&self, _pcb: &ProcessControlBlock) {}

    fn state_changed(&self, _active: bool, _paused: bool) {}
}

/// Forwards every notification to the log.
#[derive(Debug, Default)]
pub struct LogObserver;

impl SystemObserver for LogObserver {
    fn process_executed(&self, cpu: usize, pcb: &ProcessControlBlock) {
        debug!("CPU {} executed {}", cpu, pcb);
    }

    fn process_finished(&self, cpu: usize, pcb: &ProcessControlBlock) {
        info!("CPU {} finished {}", cpu, pcb);
    }

    fn process_admitted(&self, pcb: &ProcessControlBlock) {
        info!("Admitted {}", pcb);
    }

    fn state_changed(&self, active: bool, paused: bool) {
        info!("System active: {}, paused: {}", active, paused);
    }
}
