use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

pub const DEFAULT_CONSOLE_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleKind {
    Output,
    Debug,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsoleEntry {
    pub kind: ConsoleKind,
    pub text: String,
}

/// Bounded buffer of script output shared between the interpreter callbacks and the host.
#[derive(Debug, Clone)]
pub struct ScriptConsole {
    inner: Rc<RefCell<ConsoleState>>,
}

#[derive(Debug)]
struct ConsoleState {
    entries: VecDeque<ConsoleEntry>,
    capacity: usize,
    dropped: usize,
}

impl ScriptConsole {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Rc::new(RefCell::new(ConsoleState {
                entries: VecDeque::with_capacity(capacity.min(DEFAULT_CONSOLE_CAPACITY)),
                capacity,
                dropped: 0,
            })),
        }
    }

    pub fn push(&self, kind: ConsoleKind, text: impl Into<String>) {
        let mut state = self.inner.borrow_mut();
        state.entries.push_back(ConsoleEntry { kind, text: text.into() });
        while state.entries.len() > state.capacity {
            state.entries.pop_front();
            state.dropped += 1;
        }
    }

    pub fn drain(&self) -> Vec<ConsoleEntry> {
        self.inner.borrow_mut().entries.drain(..).collect()
    }

    /// Text of every buffered entry, oldest first, leaving the buffer empty.
    pub fn take_lines(&self) -> Vec<String> {
        self.drain().into_iter().map(|entry| entry.text).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.borrow().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Entries evicted because the buffer was full.
    pub fn dropped(&self) -> usize {
        self.inner.borrow().dropped
    }
}

impl Default for ScriptConsole {
    fn default() -> Self {
        Self::new(DEFAULT_CONSOLE_CAPACITY)
    }
}
