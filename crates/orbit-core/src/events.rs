//! Event Bus and Wakeup Controller.
//!
//! A process-wide, in-memory publish/subscribe used to decouple mid-cycle
//! replanning from the main loop. Listeners run synchronously on the
//! publisher's thread and must be cheap.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone)]
pub enum Event {
    TaskCompleted { task_id: uuid::Uuid },
    TaskFailed { task_id: uuid::Uuid },
    PlannerWakeup { reason: String },
}

type Listener = Box<dyn Fn(&Event) + Send + Sync>;

#[derive(Default)]
pub struct EventBus {
    listeners: Mutex<Vec<Listener>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, listener: F)
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.listeners.lock().unwrap_or_else(|e| e.into_inner()).push(Box::new(listener));
    }

    pub fn publish(&self, event: Event) {
        let listeners = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
        for listener in listeners.iter() {
            listener(&event);
        }
    }
}

/// Counts completions since the last planner run; raises `planner:wakeup`
/// once a threshold is crossed, then resets. A one-shot signal is
/// consumed exactly once per cycle by the Orchestrator.
pub struct WakeupController {
    threshold: u32,
    counter: AtomicU32,
    enabled: AtomicBool,
    pending: Arc<AtomicBool>,
}

impl WakeupController {
    pub fn new(threshold: u32) -> Arc<Self> {
        Arc::new(Self {
            threshold: threshold.max(1),
            counter: AtomicU32::new(0),
            enabled: AtomicBool::new(true),
            pending: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Register this controller's `task:completed` handler on `bus`.
    pub fn attach(self: &Arc<Self>, bus: &EventBus) {
        let this = Arc::clone(self);
        bus.subscribe(move |event| {
            if matches!(event, Event::TaskCompleted { .. }) {
                this.on_task_completed();
            }
        });
    }

    fn on_task_completed(&self) {
        if !self.enabled.load(Ordering::SeqCst) {
            return;
        }
        let count = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        if count >= self.threshold {
            self.trigger("threshold_reached");
        }
    }

    pub fn trigger(&self, reason: &str) {
        self.counter.store(0, Ordering::SeqCst);
        self.pending.store(true, Ordering::SeqCst);
        tracing::info!(reason, "planner wakeup raised");
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    /// Consume the pending signal, returning whether it was set.
    pub fn take_pending(&self) -> bool {
        self.pending.swap(false, Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threshold_reached_triggers_wakeup() {
        let controller = WakeupController::new(3);
        let bus = EventBus::new();
        controller.attach(&bus);

        for _ in 0..2 {
            bus.publish(Event::TaskCompleted { task_id: uuid::Uuid::new_v4() });
        }
        assert!(!controller.take_pending());

        bus.publish(Event::TaskCompleted { task_id: uuid::Uuid::new_v4() });
        assert!(controller.take_pending());
        assert!(!controller.take_pending(), "signal is one-shot");
    }

    #[test]
    fn threshold_of_one_wakes_on_every_completion() {
        let controller = WakeupController::new(1);
        let bus = EventBus::new();
        controller.attach(&bus);

        bus.publish(Event::TaskCompleted { task_id: uuid::Uuid::new_v4() });
        assert!(controller.take_pending());
    }

    #[test]
    fn disabled_controller_ignores_completions() {
        let controller = WakeupController::new(1);
        controller.set_enabled(false);
        let bus = EventBus::new();
        controller.attach(&bus);

        bus.publish(Event::TaskCompleted { task_id: uuid::Uuid::new_v4() });
        assert!(!controller.take_pending());
    }

    #[test]
    fn manual_trigger_sets_pending() {
        let controller = WakeupController::new(5);
        controller.trigger("manual");
        assert!(controller.take_pending());
    }

    #[test]
    fn unrelated_events_do_not_increment_counter() {
        let controller = WakeupController::new(2);
        let bus = EventBus::new();
        controller.attach(&bus);
        bus.publish(Event::TaskFailed { task_id: uuid::Uuid::new_v4() });
        bus.publish(Event::TaskFailed { task_id: uuid::Uuid::new_v4() });
        assert!(!controller.take_pending());
    }
}
