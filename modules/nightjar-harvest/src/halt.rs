// Halt conditions decide when a source adapter should stop pulling more
// records. Conditions compose via Union: logical OR over stop/continue,
// first stopping member supplies the reported reason.

use chrono::NaiveDateTime;

use nightjar_common::Event;

/// Verdict for one evaluated record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signal {
    Continue,
    Stop { reason: String },
}

impl Signal {
    pub fn is_stop(&self) -> bool {
        matches!(self, Signal::Stop { .. })
    }

    fn stop(reason: impl Into<String>) -> Self {
        Signal::Stop {
            reason: reason.into(),
        }
    }
}

pub trait HaltCondition: Send {
    /// Whether the given event should be the last harvested one.
    fn should_stop(&mut self, event: &Event) -> Signal;
}

/// Stops after a fixed number of evaluated records. The counter is scoped
/// to one adapter run, never shared.
pub struct MaxCount {
    max: u64,
    evaluated: u64,
}

impl MaxCount {
    pub fn new(max: u64) -> Self {
        Self { max, evaluated: 0 }
    }
}

impl HaltCondition for MaxCount {
    fn should_stop(&mut self, _event: &Event) -> Signal {
        self.evaluated += 1;
        if self.evaluated >= self.max {
            Signal::stop(format!("reached the maximum number of events ({})", self.max))
        } else {
            Signal::Continue
        }
    }
}

/// Stops once a record starts after a fixed cutoff instant.
pub struct MaxStartTime {
    cutoff: NaiveDateTime,
}

impl MaxStartTime {
    pub fn new(cutoff: NaiveDateTime) -> Self {
        Self { cutoff }
    }
}

impl HaltCondition for MaxStartTime {
    fn should_stop(&mut self, event: &Event) -> Signal {
        if event.start_time > self.cutoff {
            Signal::stop(format!(
                "event starts at {} which is after the cutoff {}",
                event.start_time, self.cutoff
            ))
        } else {
            Signal::Continue
        }
    }
}

/// Short-circuit union: evaluates members in declaration order and returns
/// the first stop signal. Whether it stops does not depend on the order,
/// only which reason gets reported.
pub struct Union {
    members: Vec<Box<dyn HaltCondition>>,
}

impl Union {
    pub fn new(members: Vec<Box<dyn HaltCondition>>) -> Self {
        Self { members }
    }
}

impl HaltCondition for Union {
    fn should_stop(&mut self, event: &Event) -> Signal {
        for member in &mut self.members {
            let signal = member.should_stop(event);
            if signal.is_stop() {
                return signal;
            }
        }
        Signal::Continue
    }
}

/// Never stops. Used when no halt parameters are configured.
struct Never;

impl HaltCondition for Never {
    fn should_stop(&mut self, _event: &Event) -> Signal {
        Signal::Continue
    }
}

/// Config-derived recipe for a halt condition. Adapters build a fresh
/// condition from this at the start of every run so counters stay
/// run-scoped.
#[derive(Debug, Clone, Default)]
pub struct HaltSpec {
    pub max_count: Option<u64>,
    pub max_start_time: Option<NaiveDateTime>,
}

impl HaltSpec {
    pub fn build(&self) -> Box<dyn HaltCondition> {
        let mut members: Vec<Box<dyn HaltCondition>> = Vec::new();
        if let Some(max) = self.max_count {
            members.push(Box::new(MaxCount::new(max)));
        }
        if let Some(cutoff) = self.max_start_time {
            members.push(Box::new(MaxStartTime::new(cutoff)));
        }
        match members.len() {
            0 => Box::new(Never),
            1 => members.pop().expect("len checked"),
            _ => Box::new(Union::new(members)),
        }
    }
}
