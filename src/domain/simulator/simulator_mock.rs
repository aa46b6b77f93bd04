use crate::domain::simulator::simulator::{SharedSimulator, SystemSimulator};

use std::sync::{Arc, RwLock};

/// Manually driven clock. Clones share the same time, so a test can keep one handle and
/// advance the clock the engine reads from.
#[derive(Debug, Clone)]
pub struct MockSimulator {
    pub time: Arc<RwLock<i64>>,
}

impl MockSimulator {
    pub fn new(time: i64) -> MockSimulator {
        MockSimulator { time: Arc::new(RwLock::new(time)) }
    }

    pub fn set_time(&self, time: i64) {
        *self.time.write().expect("RwLock poisoned") = time;
    }

    pub fn advance(&self, seconds: i64) {
        *self.time.write().expect("RwLock poisoned") += seconds;
    }

    pub fn shared(&self) -> SharedSimulator {
        self.clone_box()
    }
}

impl SystemSimulator for MockSimulator {
    fn get_current_time_in_s(&self) -> i64 {
        *self.time.read().expect("RwLock poisoned")
    }

    fn get_current_time_in_ms(&self) -> i64 {
        self.get_current_time_in_s() * 1000
    }

    fn clone_box(&self) -> SharedSimulator {
        SharedSimulator(Arc::new(self.clone()))
    }
}
