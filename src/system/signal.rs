use crate::symbol::{DefineId, EnumElementId, EnumId, LabelId};
use crate::types::GlobalMemoryLocation;
use std::sync::mpsc::{channel, Receiver, Sender};

/// Database change notifications delivered to the host. Carried over
/// channels rather than registered callbacks so a subscriber can never
/// re-enter the database mid-mutation: it only ever *flags* state and
/// reacts on its own next turn.
#[derive(Clone, Debug)]
pub enum SystemSignal {
    DefineCreated(DefineId),
    EnumCreated(EnumId),
    EnumDeleted(String),
    EnumElementAdded(EnumElementId),
    EnumElementChanged(EnumElementId),
    EnumElementDeleted(String),
    /// The bool is true when the label came from the user, false when the
    /// disassembly driver or default seeding created it.
    LabelCreated(LabelId, bool),
    /// Name and position-within-name (`nth`) of the label that was removed;
    /// the id is already dead by the time this is observed.
    LabelDeleted(String, u32),
    DisassemblyStopped(GlobalMemoryLocation),
}

#[derive(Default, Debug)]
pub struct SignalBus {
    subscribers: Vec<Sender<SystemSignal>>,
}

impl SignalBus {
    pub fn subscribe(&mut self) -> Receiver<SystemSignal> {
        let (sender, receiver) = channel();
        self.subscribers.push(sender);
        receiver
    }

    /// Dropped receivers are pruned on the next emit rather than tracked
    /// with unsubscribe tokens.
    pub fn emit(&mut self, signal: SystemSignal) {
        self.subscribers.retain(|sender| sender.send(signal.clone()).is_ok());
    }
}
