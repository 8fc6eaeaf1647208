//! Cooperative cancellation of running unpackers.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnpackerState {
    Alive,
    Interrupt,
    Interrupted,
}

#[derive(Debug, Default)]
struct Registry {
    next_id: u64,
    instances: HashMap<u64, UnpackerState>,
    discard_interrupt: bool,
    interrupt_desired: bool,
}

/// Tracks every running unpacker of an installer session.
#[derive(Debug, Clone, Default)]
pub struct InterruptRegistry {
    inner: Arc<Mutex<Registry>>,
}

impl InterruptRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Registry> {
        // a poisoned registry still holds consistent states
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn register(&self) -> CancellationToken {
        let mut registry = self.lock();
        let id = registry.next_id;
        registry.next_id += 1;
        registry.instances.insert(id, UnpackerState::Alive);
        CancellationToken {
            id,
            registry: self.clone(),
        }
    }

    pub fn running(&self) -> usize {
        self.lock().instances.len()
    }

    pub fn set_discard_interrupt(&self, discard: bool) {
        self.lock().discard_interrupt = discard;
    }

    pub fn is_discard_interrupt(&self) -> bool {
        self.lock().discard_interrupt
    }

    pub fn is_interrupt_desired(&self) -> bool {
        self.lock().interrupt_desired
    }

    /// Asks every live unpacker to stop and waits up to `wait` for all of them to comply.
    ///
    /// Returns `false` when interrupts are being discarded or the wait budget runs out.
    pub fn interrupt_all(&self, wait: Duration) -> bool {
        {
            let mut registry = self.lock();
            if registry.discard_interrupt {
                return false;
            }
            for state in registry.instances.values_mut() {
                if *state == UnpackerState::Alive {
                    *state = UnpackerState::Interrupt;
                }
            }
            registry.interrupt_desired = true;
        }

        let started = Instant::now();
        let mut pause = Duration::from_millis(10);
        loop {
            if self.is_interrupt_ready() {
                return true;
            }
            let elapsed = started.elapsed();
            if elapsed >= wait {
                debug!(waited_ms = elapsed.as_millis() as u64, "interrupt not honoured in time");
                return false;
            }
            thread::sleep(pause.min(wait - elapsed));
            pause = (pause * 2).min(Duration::from_millis(100));
        }
    }

    fn is_interrupt_ready(&self) -> bool {
        self.lock()
            .instances
            .values()
            .all(|state| *state == UnpackerState::Interrupted)
    }
}

/// Handed to one unpacker; dropping it unregisters the unpacker.
#[derive(Debug)]
pub struct CancellationToken {
    id: u64,
    registry: InterruptRegistry,
}

impl CancellationToken {
    pub fn state(&self) -> Option<UnpackerState> {
        self.registry.lock().instances.get(&self.id).copied()
    }

    /// Whether an interrupt was requested, without acknowledging it.
    pub fn should_interrupt(&self) -> bool {
        matches!(
            self.state(),
            Some(UnpackerState::Interrupt | UnpackerState::Interrupted)
        )
    }

    /// Acknowledges a pending interrupt. Call at safe points only.
    pub fn perform_interrupted(&self) -> bool {
        let mut registry = self.registry.lock();
        match registry.instances.get_mut(&self.id) {
            Some(state) if *state != UnpackerState::Alive => {
                *state = UnpackerState::Interrupted;
                true
            }
            _ => false,
        }
    }
}

impl Drop for CancellationToken {
    fn drop(&mut self) {
        self.registry.lock().instances.remove(&self.id);
    }
}
