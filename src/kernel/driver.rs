use std::fmt::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use super::dispatcher::Dispatcher;
use super::executor::{ExecutionEngine, StepOutcome};
use super::long_term_scheduler::LongTermScheduler;
use super::memory::MemoryStore;
use super::observer::SystemObserver;
use super::process_control_block::ProcessControlBlock;
use super::short_term_scheduler::{Scheduler, Selection};
use super::statistics::ProcessStatistics;
use crate::config::SystemConfig;
use crate::error::{Result, SimError};
use crate::io::Disk;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Admission {
    lts: LongTermScheduler,
    disk: Disk,
}

/// State every CPU unit reaches. Locks are always taken admission first,
/// then store.
struct Shared {
    store: Mutex<MemoryStore>,
    admission: Mutex<Admission>,
    inboxes: Mutex<Vec<Sender<ProcessControlBlock>>>,
    statistics: Mutex<Vec<ProcessStatistics>>,
    output: Mutex<Vec<String>>,
    observers: RwLock<Vec<Arc<dyn SystemObserver>>>,
}

impl Shared {
    fn observers(&self) -> Vec<Arc<dyn SystemObserver>> {
        self.observers.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Admits pending programs and hands the new PCBs to every CPU.
    fn admit(&self) -> Vec<usize> {
        let admitted: Vec<(usize, ProcessControlBlock)> = {
            let mut admission = lock(&self.admission);
            let Admission { lts, disk } = &mut *admission;
            let mut store = lock(&self.store);

            let mut slots = Vec::new();
            loop {
                slots.extend(lts.batch_step(&*disk, &mut store));
                if !lts.has_programs() || store.active_processes() > 0 {
                    break;
                }
                // Memory is empty and the front program still does not fit.
                if let Some(name) = lts.skip() {
                    warn!("Program {} can never fit in memory, dropping it", name);
                }
            }

            slots
                .into_iter()
                .filter_map(|slot| store.pcb(slot).ok().map(|pcb| (slot, pcb.clone())))
                .collect()
        };

        let observers = self.observers();
        let inboxes = lock(&self.inboxes);
        for (_, pcb) in &admitted {
            for inbox in inboxes.iter() {
                // A closed inbox belongs to a CPU that no longer exists.
                let _ = inbox.send(pcb.clone());
            }
            for observer in &observers {
                observer.process_admitted(pcb);
            }
        }

        admitted.into_iter().map(|(slot, _)| slot).collect()
    }
}

/// One simulated CPU with its own engine, dispatcher and scheduler.
struct CpuUnit {
    id: usize,
    engine: ExecutionEngine,
    dispatcher: Dispatcher,
    scheduler: Box<dyn Scheduler>,
    inbox: Receiver<ProcessControlBlock>,
}

impl CpuUnit {
    fn tick(&mut self, shared: &Shared) -> Result<StepOutcome> {
        for pcb in self.inbox.try_iter() {
            self.scheduler.on_process_added(&pcb);
        }

        let (outcome, executed, finished) = {
            let mut store = lock(&shared.store);

            if self.scheduler.is_preemptive() || self.dispatcher.current(&store).is_none() {
                let selection = self.scheduler.select_next(&mut store, &self.dispatcher)?;
                if let Selection::Dispatch(slot) = selection {
                    self.dispatcher.dispatch(&mut store, slot)?;
                }
            }

            let outcome = self.engine.step(&mut store, &self.dispatcher);

            let executed = match outcome {
                StepOutcome::Executed(slot) => store.pcb(slot).ok().cloned(),
                _ => None,
            };

            let finished = match outcome.terminated_slot() {
                Some(slot) => {
                    let pcb = store.release_process(slot)?;
                    let fault = match &outcome {
                        StepOutcome::Faulted(_, err) => Some(err.to_string()),
                        _ => None,
                    };
                    let statistics =
                        ProcessStatistics::from_pcb(&pcb, self.id, store.clock(), fault);
                    lock(&shared.statistics).push(statistics);
                    self.scheduler.on_process_finished(&pcb);
                    Some(pcb)
                }
                None => None,
            };

            (outcome, executed, finished)
        };

        lock(&shared.output).extend(self.engine.drain_output());

        let observers = shared.observers();
        if let Some(pcb) = &executed {
            observers.iter().for_each(|observer| observer.process_executed(self.id, pcb));
        }
        if let Some(pcb) = &finished {
            info!("CPU {} finished {}", self.id, pcb);
            observers.iter().for_each(|observer| observer.process_finished(self.id, pcb));
            shared.admit();
        }

        Ok(outcome)
    }
}

/// Owns the simulated machine and drives its CPUs, either one tick at a time
/// or on free-running threads.
pub struct Driver {
    shared: Arc<Shared>,
    units: Vec<Arc<Mutex<CpuUnit>>>,
    active: Arc<AtomicBool>,
    paused: Arc<AtomicBool>,
    cycle_should_terminate: Arc<AtomicBool>,
    handles: Vec<JoinHandle<()>>,
    step_interval: Duration,
}

impl Driver {
    pub fn new(config: &SystemConfig, disk: Disk) -> Result<Driver> {
        config.validate()?;

        let store = MemoryStore::new(
            config.memory.user_size,
            config.memory.allocator.build(),
            config.cpus.len(),
        )?;
        info!("Memory allocator: {}", store.allocator().name());

        let mut inboxes = Vec::new();
        let mut units = Vec::new();
        for (id, cpu) in config.cpus.iter().enumerate() {
            let (sender, receiver) = mpsc::channel();
            let scheduler = cpu.scheduler.build();
            info!("CPU {} scheduler: {}", id, scheduler.name());

            inboxes.push(sender);
            units.push(Arc::new(Mutex::new(CpuUnit {
                id,
                engine: ExecutionEngine::new(),
                dispatcher: Dispatcher::new(id),
                scheduler,
                inbox: receiver,
            })));
        }

        let shared = Arc::new(Shared {
            store: Mutex::new(store),
            admission: Mutex::new(Admission {
                lts: LongTermScheduler::new(),
                disk,
            }),
            inboxes: Mutex::new(inboxes),
            statistics: Mutex::new(Vec::new()),
            output: Mutex::new(Vec::new()),
            observers: RwLock::new(Vec::new()),
        });

        Ok(Driver {
            shared,
            units,
            active: Arc::new(AtomicBool::new(false)),
            paused: Arc::new(AtomicBool::new(false)),
            cycle_should_terminate: Arc::new(AtomicBool::new(false)),
            handles: Vec::new(),
            step_interval: Duration::from_millis(config.step_interval_ms),
        })
    }

    pub fn add_observer(&self, observer: Arc<dyn SystemObserver>) {
        self.shared
            .observers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(observer);
    }

    pub fn cpu_count(&self) -> usize {
        self.units.len()
    }

    /// Queues programs already on disk for admission.
    pub fn load_programs<I, S>(&self, names: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        lock(&self.shared.admission).lts.enqueue_programs(names);
    }

    /// Queues every program on disk, in the order they were written.
    pub fn load_all_programs(&self) -> usize {
        let mut admission = lock(&self.shared.admission);
        let names = admission.disk.program_names().to_vec();
        let count = names.len();
        admission.lts.enqueue_programs(names);
        count
    }

    pub fn pending_programs(&self) -> Vec<String> {
        lock(&self.shared.admission).lts.pending()
    }

    /// Moves as many pending programs into memory as fit. Returns their slots.
    pub fn admit(&self) -> Vec<usize> {
        self.shared.admit()
    }

    /// Runs one tick on every CPU, in CPU order.
    pub fn step(&self) -> Result<Vec<StepOutcome>> {
        if self.is_active() {
            return Err(SimError::SystemRunning);
        }

        self.units.iter().map(|unit| lock(unit).tick(&self.shared)).collect()
    }

    /// Steps until every program has finished or `max_ticks` is reached.
    /// Returns the number of ticks run.
    pub fn run(&self, max_ticks: u64) -> Result<u64> {
        let mut ticks = 0;
        while ticks < max_ticks && !self.is_finished() {
            self.step()?;
            ticks += 1;
        }
        Ok(ticks)
    }

    /// Starts one thread per CPU, each ticking once per step interval.
    pub fn start(&mut self) -> Result<()> {
        if self.is_active() {
            return Err(SimError::SystemRunning);
        }

        self.cycle_should_terminate.store(false, Ordering::Relaxed);
        self.paused.store(false, Ordering::Relaxed);
        self.active.store(true, Ordering::Relaxed);

        for unit in &self.units {
            let unit = unit.clone();
            let shared = self.shared.clone();
            let paused = self.paused.clone();
            let cycle_should_terminate = self.cycle_should_terminate.clone();
            let interval = self.step_interval;

            self.handles.push(thread::spawn(move || {
                while !cycle_should_terminate.load(Ordering::Relaxed) {
                    if !paused.load(Ordering::Relaxed) {
                        let mut unit = lock(&unit);
                        if let Err(err) = unit.tick(&shared) {
                            warn!("CPU {} tick failed: {}", unit.id, err);
                        }
                    }
                    thread::sleep(interval);
                }
            }));
        }

        info!("Started {} CPU threads", self.units.len());
        self.notify_state();
        Ok(())
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::Relaxed);
        self.notify_state();
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::Relaxed);
        self.notify_state();
    }

    /// Signals the CPU threads to finish their current tick and joins them.
    pub fn stop(&mut self) {
        if self.handles.is_empty() {
            return;
        }

        self.cycle_should_terminate.store(true, Ordering::Relaxed);
        for handle in self.handles.drain(..) {
            if handle.join().is_err() {
                warn!("A CPU thread panicked");
            }
        }

        self.active.store(false, Ordering::Relaxed);
        self.paused.store(false, Ordering::Relaxed);
        info!("Stopped CPU threads");
        self.notify_state();
    }

    /// Blocks until every program has finished. Returns false on timeout.
    pub fn await_finished(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while !self.is_finished() {
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(self.step_interval.max(Duration::from_millis(1)));
        }
        true
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Relaxed)
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Relaxed)
    }

    /// No program is pending and no process is in memory.
    pub fn is_finished(&self) -> bool {
        let admission = lock(&self.shared.admission);
        let store = lock(&self.shared.store);
        !admission.lts.has_programs() && store.active_processes() == 0
    }

    pub fn clock(&self) -> u64 {
        lock(&self.shared.store).clock()
    }

    pub fn statistics(&self) -> Vec<ProcessStatistics> {
        lock(&self.shared.statistics).clone()
    }

    pub fn output(&self) -> Vec<String> {
        lock(&self.shared.output).clone()
    }

    /// Runs `f` against the store while holding its lock.
    pub fn with_store<R>(&self, f: impl FnOnce(&MemoryStore) -> R) -> R {
        f(&lock(&self.shared.store))
    }

    pub fn report(&self) -> String {
        let mut report = String::new();

        for unit in &self.units {
            let unit = lock(unit);
            let cpu = unit.engine.cpu();
            let _ = writeln!(
                report,
                "CPU {} [{}] cycles: {}, instructions: {}",
                unit.id,
                unit.scheduler.name(),
                cpu.cycles(),
                cpu.instructions_executed()
            );
        }

        let store = lock(&self.shared.store);
        for id in 0..self.units.len() {
            match store.running_on(id).and_then(|slot| store.pcb(slot).ok()) {
                Some(pcb) => {
                    let _ = writeln!(report, "CPU {} running {}", id, pcb);
                }
                None => {
                    let _ = writeln!(report, "CPU {} idle", id);
                }
            }
        }
        let _ = writeln!(report);
        report.push_str(&store.report());
        report
    }

    fn notify_state(&self) {
        let (active, paused) = (self.is_active(), self.is_paused());
        debug!("Driver state: active {}, paused {}", active, paused);
        for observer in self.shared.observers() {
            observer.state_changed(active, paused);
        }
    }
}

impl Drop for Driver {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;
    use crate::config::AllocatorConfig;
    use crate::isa::Register;
    use crate::kernel::process_control_block::ProcessState;
    use crate::kernel::short_term_scheduler::SchedulingAlgorithm;

    fn driver(config: &SystemConfig, programs: &[(&str, &[&str])]) -> Driver {
        let mut disk = Disk::default();
        for (name, lines) in programs {
            disk.write_program(name, lines).unwrap();
        }

        let driver = Driver::new(config, disk).unwrap();
        driver.load_all_programs();
        driver
    }

    fn small_memory() -> SystemConfig {
        let mut config = SystemConfig::default();
        config.memory.user_size = 32;
        config.memory.allocator = AllocatorConfig::FixedEqual { partition_size: 32 };
        config
    }

    #[derive(Default)]
    struct CountingObserver {
        admitted: AtomicUsize,
        executed: AtomicUsize,
        finished: AtomicUsize,
    }

    impl SystemObserver for CountingObserver {
        fn process_executed(&self, _cpu: usize, _pcb: &ProcessControlBlock) {
            self.executed.fetch_add(1, Ordering::SeqCst);
        }

        fn process_finished(&self, _cpu: usize, _pcb: &ProcessControlBlock) {
            self.finished.fetch_add(1, Ordering::SeqCst);
        }

        fn process_admitted(&self, _pcb: &ProcessControlBlock) {
            self.admitted.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_driver_end_to_end() {
        let driver = driver(
            &SystemConfig::default(),
            &[("sum", &["MOV AX, 5", "ADD AX", "INT 20H"])],
        );
        assert_eq!(driver.admit().len(), 1);

        let slot = driver.with_store(|store| store.ready_slots()[0]);
        assert_eq!(driver.step().unwrap(), vec![StepOutcome::Executed(slot)]);
        assert_eq!(
            driver.with_store(|store| store.pcb(slot).unwrap().register(Register::Ax)),
            5
        );

        assert_eq!(driver.run(10).unwrap(), 2);
        assert!(driver.is_finished());
        assert_eq!(driver.clock(), 2);

        let statistics = driver.statistics();
        assert_eq!(statistics.len(), 1);
        assert_eq!(statistics[0].name, "sum");
        assert_eq!(statistics[0].final_state, ProcessState::Finished);
        assert_eq!(statistics[0].cpu_time_used, 2);
        assert_eq!(statistics[0].fault, None);
        assert_eq!(driver.with_store(|store| store.active_processes()), 0);
    }

    #[test]
    fn test_driver_rejected_program_leaves_running_process_alone() {
        let mut disk = Disk::default();
        disk.write_program("good", &["MOV AX, 3", "INC AX", "INC AX", "INT 20H"]).unwrap();
        disk.write_program("bad", &["INC", "FOO AX"]).unwrap();

        let driver = Driver::new(&SystemConfig::default(), disk).unwrap();
        driver.load_programs(["good"]);
        let slot = driver.admit()[0];
        driver.step().unwrap();

        let before = driver.with_store(|store| store.pcb(slot).unwrap().clone());
        assert_eq!(before.program_counter, 1);

        driver.load_programs(["bad"]);
        assert!(driver.admit().is_empty());
        assert!(driver.pending_programs().is_empty());

        driver.with_store(|store| {
            assert_eq!(store.pcb(slot).unwrap(), &before);
            assert_eq!(store.running_on(0), Some(slot));
            assert_eq!(store.active_processes(), 1);
        });

        driver.step().unwrap();
        driver.step().unwrap();
        assert_eq!(
            driver.with_store(|store| store.pcb(slot).unwrap().register(Register::Ax)),
            5
        );

        driver.run(10).unwrap();
        assert!(driver.is_finished());

        let statistics = driver.statistics();
        assert_eq!(statistics.len(), 1);
        assert_eq!(statistics[0].name, "good");
        assert_eq!(statistics[0].fault, None);
    }

    #[test]
    fn test_driver_collects_output() {
        let driver = driver(
            &SystemConfig::default(),
            &[("print", &["MOV DX, 7", "INT 10H", "INT 20H"])],
        );
        driver.admit();
        driver.run(10).unwrap();

        assert_eq!(driver.output(), vec!["[print] 7".to_string()]);
    }

    #[test]
    fn test_driver_fault_releases_memory_for_pending() {
        let driver = driver(
            &small_memory(),
            &[("bad", &["POP AX", "INC"]), ("good", &["INC", "INT 20H"])],
        );

        driver.admit();
        assert_eq!(driver.pending_programs(), vec!["good".to_string()]);

        assert_eq!(driver.run(20).unwrap(), 3);

        let statistics = driver.statistics();
        assert_eq!(statistics.len(), 2);
        assert_eq!(statistics[0].name, "bad");
        assert!(statistics[0].fault.is_some());
        assert_eq!(statistics[1].name, "good");
        assert_eq!(statistics[1].fault, None);
    }

    #[test]
    fn test_driver_drops_program_that_never_fits() {
        let big = vec!["INC"; 40];
        let driver = driver(&small_memory(), &[("big", &big), ("small", &["INC"])]);

        assert_eq!(driver.admit().len(), 1);
        assert!(driver.pending_programs().is_empty());
        driver.run(5).unwrap();
        assert!(driver.is_finished());
    }

    #[test]
    fn test_driver_multiple_cpus_run_in_parallel() {
        let mut config = SystemConfig::default();
        config.set_cpu_count(2);
        config.cpus[1].scheduler = SchedulingAlgorithm::RoundRobin { quantum: 2 };

        let driver = driver(
            &config,
            &[("a", &["INC", "INC", "INC"]), ("b", &["DEC", "DEC", "DEC"])],
        );
        let slots = driver.admit();

        assert_eq!(
            driver.step().unwrap(),
            vec![StepOutcome::Executed(slots[0]), StepOutcome::Executed(slots[1])]
        );
        assert!(driver.report().contains("CPU 1 [Round Robin]"));

        driver.run(10).unwrap();
        let statistics = driver.statistics();
        assert_eq!(statistics.len(), 2);
        assert!(statistics.iter().any(|stats| stats.cpu == 1));
    }

    #[test]
    fn test_driver_notifies_observers() {
        let driver = driver(&SystemConfig::default(), &[("a", &["INC", "INC"]), ("b", &["INC"])]);
        let observer = Arc::new(CountingObserver::default());
        driver.add_observer(observer.clone());

        driver.admit();
        driver.run(10).unwrap();

        assert_eq!(observer.admitted.load(Ordering::SeqCst), 2);
        assert_eq!(observer.executed.load(Ordering::SeqCst), 3);
        assert_eq!(observer.finished.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_driver_threads_run_to_completion() {
        let mut config = SystemConfig::default();
        config.set_cpu_count(2);
        config.step_interval_ms = 1;

        let mut driver = driver(
            &config,
            &[("a", &["INC", "INC", "INT 20H"]), ("b", &["DEC", "INT 20H"])],
        );
        driver.admit();

        driver.start().unwrap();
        assert!(driver.is_active());
        assert_eq!(driver.step(), Err(SimError::SystemRunning));
        assert_eq!(driver.start(), Err(SimError::SystemRunning));

        assert!(driver.await_finished(Duration::from_secs(5)));
        driver.stop();

        assert!(!driver.is_active());
        assert_eq!(driver.statistics().len(), 2);
        assert!(driver.step().is_ok());
    }

    #[test]
    fn test_driver_pause_and_resume() {
        let mut config = SystemConfig::default();
        config.step_interval_ms = 1;

        let mut driver = driver(&config, &[("a", &["INC"])]);
        driver.start().unwrap();
        driver.pause();
        assert!(driver.is_paused());

        driver.admit();
        thread::sleep(Duration::from_millis(20));
        let clock = driver.clock();
        thread::sleep(Duration::from_millis(20));
        assert_eq!(driver.clock(), clock);

        driver.resume();
        assert!(driver.await_finished(Duration::from_secs(5)));
        driver.stop();
    }
}
