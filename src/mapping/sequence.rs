//! Tick-driven macro playback
//!
//! A run executes at most one step per tick and then waits the step's delay.
//! Delays are consumed from the tick deltas, so playback is reproducible for a
//! given sequence of `dt` values.

use std::time::Duration;

use super::action::{MacroEvent, MacroStep, OutputTarget, OverlapPolicy};
use super::error::MacroBusyError;

/// Re-triggers the queue policy accepts while a run is active
pub const MAX_QUEUED_RUNS: u32 = 8;

#[derive(Debug, Clone, Default)]
pub struct MacroRun {
    running: bool,
    cursor: usize,
    wait: Duration,
    held: Vec<OutputTarget>,
    pulse: Option<OutputTarget>,
    queued: u32,
}

impl MacroRun {
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Starts the macro or applies the overlap policy if it is already running
    pub fn trigger(&mut self, overlap: OverlapPolicy) -> Result<(), MacroBusyError> {
        if !self.running {
            self.start();
            return Ok(());
        }

        match overlap {
            OverlapPolicy::Reject => Err(MacroBusyError),
            OverlapPolicy::Restart => {
                self.start();
                Ok(())
            }
            OverlapPolicy::Queue if self.queued < MAX_QUEUED_RUNS => {
                self.queued += 1;
                Ok(())
            }
            OverlapPolicy::Queue => Err(MacroBusyError),
        }
    }

    /// Stops playback; everything the macro holds is released
    pub fn cancel(&mut self) {
        *self = Self::default();
    }

    pub fn advance(&mut self, steps: &[MacroStep], dt: Duration) {
        self.pulse = None;
        if !self.running {
            return;
        }
        if steps.is_empty() {
            self.cancel();
            return;
        }
        if self.wait > dt {
            self.wait -= dt;
            return;
        }
        self.wait = Duration::ZERO;

        if self.cursor >= steps.len() {
            self.held.clear();
            if self.queued == 0 {
                self.running = false;
                self.cursor = 0;
                return;
            }
            self.queued -= 1;
            self.start();
        }

        let step = &steps[self.cursor];
        match &step.event {
            MacroEvent::Press(target) => {
                if !self.held.contains(target) {
                    self.held.push(target.clone());
                }
            }
            MacroEvent::Release(target) => self.held.retain(|held| held != target),
            MacroEvent::Tap(target) => self.pulse = Some(target.clone()),
        }
        self.cursor += 1;
        self.wait = Duration::from_millis(step.delay_ms);
    }

    /// Targets active during the current tick
    pub fn active_targets(&self) -> impl Iterator<Item = &OutputTarget> {
        self.held.iter().chain(self.pulse.iter())
    }

    fn start(&mut self) {
        let queued = self.queued;
        *self = Self {
            running: true,
            queued,
            ..Self::default()
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::keys::{Key, KeyStroke};

    fn key(k: Key) -> OutputTarget {
        OutputTarget::Key(KeyStroke::key(k))
    }

    fn steps() -> Vec<MacroStep> {
        vec![
            MacroStep {
                event: MacroEvent::Press(key(Key::LeftShift)),
                delay_ms: 20,
            },
            MacroStep {
                event: MacroEvent::Tap(key(Key::A)),
                delay_ms: 10,
            },
            MacroStep {
                event: MacroEvent::Release(key(Key::LeftShift)),
                delay_ms: 0,
            },
        ]
    }

    fn active(run: &MacroRun) -> Vec<OutputTarget> {
        run.active_targets().cloned().collect()
    }

    #[test]
    fn playback_follows_step_delays() {
        let steps = steps();
        let dt = Duration::from_millis(10);
        let mut run = MacroRun::default();

        run.trigger(OverlapPolicy::Reject).unwrap();
        run.advance(&steps, dt);
        assert_eq!(active(&run), vec![key(Key::LeftShift)]);

        run.advance(&steps, dt);
        assert_eq!(active(&run), vec![key(Key::LeftShift)]);

        run.advance(&steps, dt);
        assert_eq!(active(&run), vec![key(Key::LeftShift), key(Key::A)]);

        run.advance(&steps, dt);
        assert!(active(&run).is_empty());
        assert!(run.is_running());

        run.advance(&steps, dt);
        assert!(!run.is_running());
    }

    #[test]
    fn reject_policy_reports_busy() {
        let mut run = MacroRun::default();
        run.trigger(OverlapPolicy::Reject).unwrap();
        assert_eq!(run.trigger(OverlapPolicy::Reject), Err(MacroBusyError));
    }

    #[test]
    fn restart_policy_rewinds() {
        let steps = steps();
        let dt = Duration::from_millis(10);
        let mut run = MacroRun::default();
        run.trigger(OverlapPolicy::Restart).unwrap();
        for _ in 0..3 {
            run.advance(&steps, dt);
        }
        assert_eq!(active(&run).len(), 2);

        run.trigger(OverlapPolicy::Restart).unwrap();
        run.advance(&steps, dt);
        assert_eq!(active(&run), vec![key(Key::LeftShift)]);
    }

    #[test]
    fn queue_policy_replays_and_is_bounded() {
        let steps = vec![MacroStep {
            event: MacroEvent::Tap(key(Key::B)),
            delay_ms: 0,
        }];
        let dt = Duration::from_millis(10);
        let mut run = MacroRun::default();
        run.trigger(OverlapPolicy::Queue).unwrap();
        for _ in 0..MAX_QUEUED_RUNS {
            run.trigger(OverlapPolicy::Queue).unwrap();
        }
        assert_eq!(run.trigger(OverlapPolicy::Queue), Err(MacroBusyError));

        let mut taps = 0;
        for _ in 0..40 {
            run.advance(&steps, dt);
            taps += active(&run).len();
        }
        assert_eq!(taps as u32, MAX_QUEUED_RUNS + 1);
        assert!(!run.is_running());
    }

    #[test]
    fn cancel_releases_everything() {
        let steps = steps();
        let mut run = MacroRun::default();
        run.trigger(OverlapPolicy::Reject).unwrap();
        run.advance(&steps, Duration::from_millis(10));
        run.cancel();
        assert!(active(&run).is_empty());
        assert!(!run.is_running());
    }
}
