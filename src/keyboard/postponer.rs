//! Key-event postponing while secondary-role resolution is undecided.
//!
//! While active, debounced key transitions land in a FIFO instead of the
//! logical key state. Consumers keep the postponer alive one cycle at a time
//! with [`Postponer::postpone_n_cycles`]; once the keep-alives stop, buffered
//! events replay gradually at cycle start.

use heapless::Deque;

use super::keys::KeyRef;

pub const POSTPONER_BUFFER_SIZE: usize = 32;

#[derive(Clone, Copy, Debug)]
pub struct PostponedEvent {
    pub key: KeyRef,
    pub active: bool,
}

pub struct Postponer {
    queue: Deque<PostponedEvent, POSTPONER_BUFFER_SIZE>,
    cycles_until_activation: u8,
}

impl Postponer {
    pub const fn new() -> Self {
        Self {
            queue: Deque::new(),
            cycles_until_activation: 0,
        }
    }

    pub fn is_active(&self) -> bool {
        self.cycles_until_activation > 0 || !self.queue.is_empty()
    }

    /// Keep postponing for at least `n` cycles after the current one
    pub fn postpone_n_cycles(&mut self, n: u8) {
        self.cycles_until_activation = self.cycles_until_activation.max(n.saturating_add(1));
    }

    /// Buffer a debounced transition instead of committing it
    pub fn track_key_event(&mut self, key: KeyRef, active: bool) {
        if self.queue.push_back(PostponedEvent { key, active }).is_err() {
            warn!("postponer buffer full, dropping event");
        }
    }

    /// Replay buffered events through `commit`, called once at cycle start.
    ///
    /// Events replay one per cycle to preserve per-cycle press semantics,
    /// two when the buffer runs hot.
    pub fn run_postponed_events(&mut self, mut commit: impl FnMut(KeyRef, bool)) {
        if self.cycles_until_activation > 0 {
            return;
        }
        let burst = if self.queue.len() > POSTPONER_BUFFER_SIZE / 2 { 2 } else { 1 };
        for _ in 0..burst {
            match self.queue.pop_front() {
                Some(event) => commit(event.key, event.active),
                None => break,
            }
        }
    }

    pub fn finish_cycle(&mut self) {
        self.cycles_until_activation = self.cycles_until_activation.saturating_sub(1);
    }

    /// Is a press of any key other than `key` waiting in the buffer?
    pub fn pending_press_of_other(&self, key: KeyRef) -> bool {
        self.queue.iter().any(|e| e.active && e.key != key)
    }

    /// Is a release of `key` waiting in the buffer?
    pub fn pending_release_of(&self, key: KeyRef) -> bool {
        self.queue.iter().any(|e| !e.active && e.key == key)
    }
}

impl Default for Postponer {
    fn default() -> Self {
        Self::new()
    }
}
