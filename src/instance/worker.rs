use super::{BreakpointInfo, RunState, SystemInstance};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, Receiver, Sender, TryRecvError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// How many cycles the worker runs between command-drain boundaries. Small
/// enough that a pause request lands within a fraction of a frame, large
/// enough that channel polling doesn't dominate.
const RUN_BATCH_CYCLES: u32 = 10_000;

/// Notifications the worker pushes to the UI. The receiver must only flag
/// state in response; database mutations wait until the instance is
/// observed paused.
#[derive(Clone, Debug)]
pub enum InstanceEvent {
    BreakpointHit(BreakpointInfo),
    Crashed,
}

type Command = Box<dyn FnOnce(&mut SystemInstance) + Send>;

/// Owns the emulation thread for one [`SystemInstance`]. The UI never
/// touches the instance directly while the thread lives: every mutation
/// travels as a closure applied at a scheduling boundary, and the
/// `running` flag lets [`InstanceWorker::pause`] busy-wait until the
/// worker has actually yielded before the caller reads dynamic state.
pub struct InstanceWorker {
    commands: Sender<Command>,
    events: Receiver<InstanceEvent>,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<SystemInstance>>,
}

impl InstanceWorker {
    pub fn spawn(instance: SystemInstance) -> InstanceWorker {
        let (commands, command_receiver) = channel::<Command>();
        let (event_sender, events) = channel();
        let running = Arc::new(AtomicBool::new(false));
        let flag = running.clone();
        let handle = std::thread::spawn(move || worker_loop(instance, command_receiver, event_sender, flag));
        InstanceWorker { commands, events, running, handle: Some(handle) }
    }

    /// Queues a mutation to run on the worker thread at the next state
    /// boundary.
    pub fn apply(&self, mutate: impl FnOnce(&mut SystemInstance) + Send + 'static) {
        let _ = self.commands.send(Box::new(mutate));
    }

    /// Runs a closure on the instance and waits for its result.
    pub fn query<R: Send + 'static>(&self, read: impl FnOnce(&mut SystemInstance) -> R + Send + 'static) -> Result<R, String> {
        let (sender, receiver) = channel();
        self.apply(move |instance| {
            let _ = sender.send(read(instance));
        });
        receiver.recv().map_err(|_| "instance worker has shut down".to_string())
    }

    pub fn resume(&self) {
        self.apply(|instance| instance.request_state(RunState::Running));
    }

    pub fn step_cycle(&self) {
        self.apply(|instance| instance.request_state(RunState::StepCycle));
    }

    pub fn step_instruction(&self) {
        self.apply(|instance| instance.request_state(RunState::StepInstruction));
    }

    /// Requests a pause and spins until the worker has cleared its
    /// running flag, after which dynamic state reads can't race a
    /// mid-flight batch.
    pub fn pause(&self) {
        self.apply(|instance| instance.request_state(RunState::Paused));
        while self.running.load(Ordering::Acquire) {
            std::hint::spin_loop();
        }
    }

    pub fn events(&self) -> &Receiver<InstanceEvent> {
        &self.events
    }

    /// Stops the thread and hands the instance back.
    pub fn shutdown(mut self) -> Option<SystemInstance> {
        let InstanceWorker { commands, handle, .. } = &mut self;
        drop(std::mem::replace(commands, channel().0));
        handle.take().and_then(|handle| handle.join().ok())
    }
}

impl Drop for InstanceWorker {
    fn drop(&mut self) {
        drop(std::mem::replace(&mut self.commands, channel().0));
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn worker_loop(
    mut instance: SystemInstance,
    commands: Receiver<Command>,
    events: Sender<InstanceEvent>,
    running: Arc<AtomicBool>,
) -> SystemInstance {
    loop {
        // Commands apply only here, between scheduling units, so a
        // mutation can never observe a half-stepped machine. A command
        // that requests a step ends the drain: the step must execute
        // before any command queued after it runs.
        loop {
            if matches!(instance.state(), RunState::StepCycle | RunState::StepInstruction) {
                break;
            }
            match commands.try_recv() {
                Ok(command) => command(&mut instance),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => return instance,
            }
        }

        match instance.state() {
            RunState::Running => {
                running.store(true, Ordering::Release);
                instance.run_cycles(RUN_BATCH_CYCLES);
                running.store(false, Ordering::Release);
                report(&mut instance, &events);
            }
            RunState::StepCycle => {
                instance.step_cycle();
                instance.request_state(RunState::Paused);
                report(&mut instance, &events);
            }
            RunState::StepInstruction => {
                instance.step_instruction();
                instance.request_state(RunState::Paused);
                report(&mut instance, &events);
            }
            RunState::Init | RunState::Paused | RunState::Crashed => {
                match commands.recv_timeout(Duration::from_millis(5)) {
                    Ok(command) => command(&mut instance),
                    Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {}
                    Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => return instance,
                }
            }
        }
    }
}

fn report(instance: &mut SystemInstance, events: &Sender<InstanceEvent>) {
    if let Some(breakpoint) = instance.take_pending_break() {
        let _ = events.send(InstanceEvent::BreakpointHit(breakpoint));
    }
    if instance.state() == RunState::Crashed {
        let _ = events.send(InstanceEvent::Crashed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cartridge::cartridge::test_data;
    use crate::cartridge::{Cartridge, HeaderDb};
    use crate::instance::BreakpointKey;

    fn spawn_looping_instance() -> InstanceWorker {
        let mut rom = test_data::raw_ines_rom(1, 1, 0);
        let prg = 16;
        rom[prg] = 0xEA; // NOP
        rom[prg + 1] = 0x4C; // JMP $C000
        rom[prg + 2] = 0x00;
        rom[prg + 3] = 0xC0;
        rom[prg + 0x3FFC] = 0x00;
        rom[prg + 0x3FFD] = 0xC0;
        let cartridge = Cartridge::load("test".to_string(), &rom, &HeaderDb::new()).unwrap();
        let mut instance = crate::instance::SystemInstance::from_cartridge(&cartridge).unwrap();
        instance.reset();
        InstanceWorker::spawn(instance)
    }

    #[test]
    fn pause_waits_for_the_worker_to_yield() {
        let worker = spawn_looping_instance();
        worker.resume();
        // Give the worker time to pick up the resume and run a batch, so
        // the pause below exercises the running-flag handoff.
        std::thread::sleep(Duration::from_millis(50));
        worker.pause();
        let state = worker.query(|instance| instance.state()).unwrap();
        assert_eq!(state, RunState::Paused);
        let instance = worker.shutdown().unwrap();
        assert!(instance.cpu.istep() > 0);
    }

    #[test]
    fn breakpoint_hits_surface_as_events() {
        let worker = spawn_looping_instance();
        worker.apply(|instance| {
            instance.breakpoints.add(BreakpointInfo::new(BreakpointKey::Address(0xC001)));
        });
        worker.resume();
        let event = worker.events().recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(matches!(event, InstanceEvent::BreakpointHit(_)));
        let state = worker.query(|instance| instance.state()).unwrap();
        assert_eq!(state, RunState::Paused);
    }

    #[test]
    fn step_instruction_advances_exactly_one_instruction() {
        let worker = spawn_looping_instance();
        let before = worker.query(|instance| instance.cpu.istep()).unwrap();
        worker.step_instruction();
        let after = worker.query(|instance| instance.cpu.istep()).unwrap();
        assert_eq!(after, before + 1);
    }
}
