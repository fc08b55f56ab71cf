//! Interrupt requests and the kernel's FIFO interrupt queue.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// A raw keyboard event as delivered by the host: a key code plus the
/// state of the shift modifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyEvent {
    pub code: u8,
    pub shifted: bool,
}

impl KeyEvent {
    pub fn new(code: u8, shifted: bool) -> Self {
        Self { code, shifted }
    }
}

/// An interrupt request: the kind selects the service routine, the payload
/// carries whatever the raiser needs to hand over. Created by drivers and
/// CPU faults, consumed exactly once by the dispatcher in FIFO order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Interrupt {
    Timer,
    Keyboard(KeyEvent),
    ProcessFault { message: String },
    ProcessTerminated,
    ContextSwitch,
    SystemCall(u8),
}

impl Interrupt {
    /// Numeric IRQ code, for logs and the display layer.
    pub fn irq(&self) -> u8 {
        match self {
            Interrupt::Timer => 0,
            Interrupt::Keyboard(_) => 1,
            Interrupt::ProcessFault { .. } => 2,
            Interrupt::ProcessTerminated => 3,
            Interrupt::ContextSwitch => 4,
            Interrupt::SystemCall(_) => 5,
        }
    }
}

/// FIFO queue of pending interrupts. Queue order is the only priority.
#[derive(Debug, Default)]
pub struct InterruptQueue {
    items: VecDeque<Interrupt>,
}

impl InterruptQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&mut self, interrupt: Interrupt) {
        self.items.push_back(interrupt);
    }

    pub fn dequeue(&mut self) -> Option<Interrupt> {
        self.items.pop_front()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn contents(&self) -> impl Iterator<Item = &Interrupt> {
        self.items.iter()
    }

    pub(crate) fn restore(&mut self, items: Vec<Interrupt>) {
        self.items = items.into();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_preserves_fifo_order() {
        let mut q = InterruptQueue::new();
        q.enqueue(Interrupt::Timer);
        q.enqueue(Interrupt::ProcessTerminated);
        q.enqueue(Interrupt::SystemCall(1));
        assert_eq!(q.len(), 3);
        assert_eq!(q.dequeue(), Some(Interrupt::Timer));
        assert_eq!(q.dequeue(), Some(Interrupt::ProcessTerminated));
        assert_eq!(q.dequeue(), Some(Interrupt::SystemCall(1)));
        assert!(q.dequeue().is_none());
    }
}
