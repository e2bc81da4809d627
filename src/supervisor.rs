//! Single-run guard. Holding a [`RunHandle`] is what "a run is in progress"
//! means; dropping it on any exit path releases the guard.

use nanoid::nanoid;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Clone, Debug, Default)]
pub struct Supervisor {
    active: Arc<AtomicBool>,
}

impl Supervisor {
    pub fn try_acquire(&self) -> Option<RunHandle> {
        self.active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RunHandle {
                active: self.active.clone(),
                run_id: nanoid!(),
            })
    }

    pub fn in_progress(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }
}

#[derive(Debug)]
pub struct RunHandle {
    active: Arc<AtomicBool>,
    run_id: String,
}

impl RunHandle {
    pub fn run_id(&self) -> &str {
        &self.run_id
    }
}

impl Drop for RunHandle {
    fn drop(&mut self) {
        self.active.store(false, Ordering::Release);
    }
}
