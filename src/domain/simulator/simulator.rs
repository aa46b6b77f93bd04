use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::api::engine_dto::SimulatorDto;

/// Source of "now" for every timeout in the engine, in seconds.
pub trait SystemSimulator: std::fmt::Debug + Send + Sync {
    fn get_current_time_in_s(&self) -> i64;
    fn get_current_time_in_ms(&self) -> i64;
    fn clone_box(&self) -> SharedSimulator;
}

#[derive(Debug)]
pub struct SharedSimulator(pub Arc<dyn SystemSimulator>);

impl Clone for SharedSimulator {
    fn clone(&self) -> Self {
        self.0.clone_box()
    }
}

impl std::ops::Deref for SharedSimulator {
    type Target = dyn SystemSimulator;
    fn deref(&self) -> &Self::Target {
        &*self.0
    }
}

#[derive(Debug)]
struct SimulatorState {
    is_simulation: bool,
    simulation_base_timestamp: i64,
    real_time_base_timestamp: i64,
}

/// Wall clock. In simulation mode time starts at `start_time` and advances in real time.
#[derive(Debug, Clone)]
pub struct Simulator {
    state: Arc<Mutex<SimulatorState>>,
}

impl Simulator {
    pub fn new(dto: SimulatorDto) -> Simulator {
        let state = SimulatorState {
            is_simulation: dto.is_simulation,
            simulation_base_timestamp: dto.start_time * 1000,
            real_time_base_timestamp: Self::get_system_time_ms(),
        };

        Simulator { state: Arc::new(Mutex::new(state)) }
    }

    pub fn real_time() -> Simulator {
        Self::new(SimulatorDto::default())
    }

    fn get_system_time_ms() -> i64 {
        SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or(Duration::ZERO).as_millis() as i64
    }
}

impl SystemSimulator for Simulator {
    fn get_current_time_in_s(&self) -> i64 {
        self.get_current_time_in_ms() / 1000
    }

    fn get_current_time_in_ms(&self) -> i64 {
        let state = self.state.lock().expect("Simulator mutex poisoned");

        if state.is_simulation {
            let current_real = Self::get_system_time_ms();
            state.simulation_base_timestamp + (current_real - state.real_time_base_timestamp)
        } else {
            Self::get_system_time_ms()
        }
    }

    fn clone_box(&self) -> SharedSimulator {
        SharedSimulator(Arc::new(self.clone()))
    }
}

impl From<SharedSimulator> for Arc<dyn SystemSimulator> {
    fn from(wrapper: SharedSimulator) -> Self {
        wrapper.0
    }
}
