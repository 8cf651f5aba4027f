//! Per-binding runtime state and the single-step evaluation of an action
//!
//! A [`StageState`] belongs to one binding slot (or one chain stage within it)
//! and survives between ticks. `step` advances it by one tick and writes the
//! action's contributions for that tick.

use std::time::Duration;

use tracing::trace;

use super::action::{Action, MacroCadence, Timing, VirtualAxis};
use super::curve::shape;
use super::error::EvalFault;
use super::output::{Contribution, Contributions};
use super::sequence::MacroRun;
use super::signal::Signal;

/// Mode stack change requested by a mode-switch action
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ModeRequest {
    /// Push while the triggering input stays active
    Hold(String),
    /// Push if absent, remove if present
    Toggle(String),
}

/// Side channels available to a step besides its own contributions
pub(crate) struct StepContext<'a> {
    pub dt: Duration,
    pub out: &'a mut Contributions,
    pub requests: &'a mut Vec<ModeRequest>,
    pub resets: &'a mut Vec<(VirtualAxis, f32)>,
}

#[derive(Debug, Clone)]
pub(crate) enum KindState {
    Stateless,
    Toggle { latched: bool },
    /// `held` is `Some` from the press until the release is evaluated
    LongPress { held: Option<Duration> },
    Macro(MacroRun),
    /// Fractional pixels or scroll clicks carried to the next tick
    Remainder(f32),
    Relative { target: VirtualAxis, position: f32 },
    Cycle { next: usize },
    Chain(Vec<StageState>),
    Timed { gate: TimingGate, inner: Box<StageState> },
}

/// Hold-time bookkeeping for [`Action::Timed`]
#[derive(Debug, Clone, Default)]
pub(crate) struct TimingGate {
    /// Time since the raw input went active, while it stays active
    pressed_for: Option<Duration>,
    /// Time since the gate opened, while it is open
    open_for: Option<Duration>,
    /// The maximum interval ran out during the current press
    expired: bool,
    /// Last active input, replayed while a minimum interval stretches a release
    last_active: Option<Signal>,
}

impl TimingGate {
    /// Advances by `dt` and returns whether the wrapped action sees the input
    fn advance(&mut self, active: bool, dt: Duration, timing: &Timing) -> bool {
        if active {
            let pressed = self.pressed_for.map_or(Duration::ZERO, |held| held + dt);
            self.pressed_for = Some(pressed);
            match &mut self.open_for {
                Some(open) => *open += dt,
                None if !self.expired && pressed >= timing.delay() => {
                    self.open_for = Some(Duration::ZERO)
                }
                None => {}
            }
        } else {
            self.pressed_for = None;
            self.expired = false;
            if let Some(open) = &mut self.open_for {
                *open += dt;
                if *open >= timing.min_active() {
                    self.open_for = None;
                }
            }
        }

        if let (Some(open), Some(max)) = (self.open_for, timing.max_active()) {
            if open >= max {
                self.open_for = None;
                self.expired = active;
            }
        }
        self.open_for.is_some()
    }

    fn is_open(&self) -> bool {
        self.open_for.is_some()
    }
}

#[derive(Debug, Clone)]
pub(crate) struct StageState {
    was_active: bool,
    kind: KindState,
}

impl StageState {
    pub fn for_action(action: &Action) -> Self {
        let kind = match action {
            Action::ToggleButton { .. } => KindState::Toggle { latched: false },
            Action::LongPress { .. } => KindState::LongPress { held: None },
            Action::Macro { .. } => KindState::Macro(MacroRun::default()),
            Action::CursorAxis { .. }
            | Action::ScrollAxis { .. }
            | Action::ButtonToCursor { .. }
            | Action::ButtonToScroll { .. } => KindState::Remainder(0.0),
            Action::RelativeAxis {
                target, initial, ..
            } => KindState::Relative {
                target: *target,
                position: *initial,
            },
            Action::Cycle { .. } => KindState::Cycle { next: 0 },
            Action::Chain { stages } => {
                KindState::Chain(stages.iter().map(StageState::for_action).collect())
            }
            Action::Timed { action, .. } => KindState::Timed {
                gate: TimingGate::default(),
                inner: Box::new(StageState::for_action(action)),
            },
            _ => KindState::Stateless,
        };
        Self {
            was_active: false,
            kind,
        }
    }

    /// Aligns edge memory with `signal` without firing anything
    ///
    /// Used when the slot was not evaluated on the previous tick, so a held
    /// input does not count as a fresh press.
    pub fn seed(&mut self, action: &Action, signal: Signal) {
        self.was_active = activity(action, signal);
        match (&mut self.kind, action) {
            (KindState::LongPress { held }, _) => *held = None,
            (KindState::Chain(states), Action::Chain { stages }) => {
                let mut signal = signal;
                for (state, stage) in states.iter_mut().zip(stages) {
                    state.seed(stage, signal);
                    signal = state.settled(stage, signal);
                }
            }
            // a held input has to be released before the gate can open
            (KindState::Timed { gate, inner }, Action::Timed { action: wrapped, .. }) => {
                *gate = TimingGate {
                    expired: self.was_active,
                    ..TimingGate::default()
                };
                inner.seed(wrapped, Signal::Digital(false));
            }
            _ => {}
        }
    }

    /// Output signal of a stage that saw no edge this tick
    fn settled(&self, action: &Action, signal: Signal) -> Signal {
        match (action, &self.kind) {
            (Action::AxisToAxis { curve, .. }, _) => Signal::Analog(curve.apply(signal.value())),
            (Action::ToggleButton { .. }, KindState::Toggle { latched }) => {
                Signal::Digital(*latched)
            }
            (Action::Macro { .. }, KindState::Macro(run)) => Signal::Digital(run.is_running()),
            (Action::RelativeAxis { .. }, KindState::Relative { position, .. }) => {
                Signal::Analog(*position)
            }
            (Action::LongPress { .. } | Action::Cycle { .. }, _) => Signal::Digital(false),
            (Action::Timed { .. }, KindState::Timed { gate, .. }) => Signal::Digital(gate.is_open()),
            _ => Signal::Digital(activity(action, signal)),
        }
    }

    pub fn reset_relative(&mut self, axis: VirtualAxis, value: f32) {
        match &mut self.kind {
            KindState::Relative { target, position } if *target == axis => *position = value,
            KindState::Chain(states) => {
                for state in states {
                    state.reset_relative(axis, value);
                }
            }
            KindState::Timed { inner, .. } => inner.reset_relative(axis, value),
            _ => {}
        }
    }

    #[cfg(test)]
    pub fn is_macro_running(&self) -> bool {
        match &self.kind {
            KindState::Macro(run) => run.is_running(),
            KindState::Chain(states) => states.iter().any(StageState::is_macro_running),
            KindState::Timed { inner, .. } => inner.is_macro_running(),
            _ => false,
        }
    }

    /// Advances one tick; only writes contributions when `write` is set
    pub fn step(
        &mut self,
        action: &Action,
        signal: Signal,
        cx: &mut StepContext<'_>,
        write: bool,
    ) -> Result<Signal, EvalFault> {
        let active = activity(action, signal);
        let rising = active && !self.was_active;
        let falling = !active && self.was_active;
        self.was_active = active;

        match action {
            Action::AxisToAxis { target, curve } => {
                let value = curve.apply(signal.value());
                if !value.is_finite() {
                    return Err(EvalFault::NonFinite);
                }
                if write {
                    cx.out.push(Contribution::Axis(*target, value));
                }
                Ok(Signal::Analog(value))
            }
            Action::AxisToKey {
                key, activation, ..
            }
            | Action::ButtonToKey { key, activation } => {
                if write && activation.fires(active, rising, falling) {
                    for k in key.all_keys() {
                        cx.out.push(Contribution::Key(k));
                    }
                }
                Ok(Signal::Digital(active))
            }
            Action::AxisToButton {
                button, activation, ..
            }
            | Action::ButtonToButton { button, activation } => {
                if write && activation.fires(active, rising, falling) {
                    cx.out.push(Contribution::Button(*button));
                }
                Ok(Signal::Digital(active))
            }
            Action::ButtonToMouseButton { button, activation } => {
                if write && activation.fires(active, rising, falling) {
                    cx.out.push(Contribution::Mouse(*button));
                }
                Ok(Signal::Digital(active))
            }
            Action::ToggleButton { target } => {
                let KindState::Toggle { latched } = &mut self.kind else {
                    return Err(mismatch(action));
                };
                if rising {
                    *latched = !*latched;
                }
                if write && *latched {
                    cx.out.target(target);
                }
                Ok(Signal::Digital(*latched))
            }
            Action::LongPress {
                threshold_ms,
                short,
                long,
            } => {
                let KindState::LongPress { held } = &mut self.kind else {
                    return Err(mismatch(action));
                };
                let mut fired = false;
                if rising {
                    *held = Some(Duration::ZERO);
                } else if active {
                    if let Some(duration) = held {
                        *duration += cx.dt;
                    }
                } else if falling {
                    if let Some(duration) = held.take() {
                        let duration = duration + cx.dt;
                        let target = if duration < Duration::from_millis(*threshold_ms) {
                            short
                        } else {
                            long
                        };
                        if write {
                            cx.out.target(target);
                        }
                        fired = true;
                    }
                }
                Ok(Signal::Digital(fired))
            }
            Action::Macro {
                steps,
                overlap,
                cadence,
            } => {
                let KindState::Macro(run) = &mut self.kind else {
                    return Err(mismatch(action));
                };
                if *cadence == MacroCadence::Gated && !active && run.is_running() {
                    trace!("Gated macro released, cancelling");
                    run.cancel();
                }
                if rising {
                    if let Err(busy) = run.trigger(*overlap) {
                        trace!("{}, trigger dropped", busy);
                    }
                }
                run.advance(steps, cx.dt);
                if write {
                    for target in run.active_targets() {
                        cx.out.target(target);
                    }
                }
                Ok(Signal::Digital(run.is_running()))
            }
            Action::CursorAxis {
                axis,
                deadzone,
                exponent,
                max_speed,
                invert,
            } => {
                let KindState::Remainder(remainder) = &mut self.kind else {
                    return Err(mismatch(action));
                };
                let value = shape(signal.value(), *deadzone, *exponent, *invert);
                let moved = integrate(remainder, value * max_speed, cx.dt)?;
                if write && moved != 0 {
                    cx.out.push(Contribution::Cursor(*axis, moved));
                }
                Ok(Signal::Analog(value))
            }
            Action::ScrollAxis {
                deadzone,
                exponent,
                clicks_per_second,
                invert,
            } => {
                let KindState::Remainder(remainder) = &mut self.kind else {
                    return Err(mismatch(action));
                };
                let value = shape(signal.value(), *deadzone, *exponent, *invert);
                let clicks = integrate(remainder, value * clicks_per_second, cx.dt)?;
                if write && clicks != 0 {
                    cx.out.push(Contribution::Scroll(clicks));
                }
                Ok(Signal::Analog(value))
            }
            Action::ButtonToCursor { axis, speed } => {
                let KindState::Remainder(remainder) = &mut self.kind else {
                    return Err(mismatch(action));
                };
                let rate = if active { *speed } else { 0.0 };
                let moved = integrate(remainder, rate, cx.dt)?;
                if write && moved != 0 {
                    cx.out.push(Contribution::Cursor(*axis, moved));
                }
                Ok(Signal::Digital(active))
            }
            Action::ButtonToScroll { clicks_per_second } => {
                let KindState::Remainder(remainder) = &mut self.kind else {
                    return Err(mismatch(action));
                };
                let rate = if active { *clicks_per_second } else { 0.0 };
                let clicks = integrate(remainder, rate, cx.dt)?;
                if write && clicks != 0 {
                    cx.out.push(Contribution::Scroll(clicks));
                }
                Ok(Signal::Digital(active))
            }
            Action::ButtonToLockKey { key, on } => {
                if write && rising {
                    cx.out.push(Contribution::Lock(*key, *on));
                }
                Ok(Signal::Digital(active))
            }
            Action::RelativeAxis {
                target,
                deadzone,
                exponent,
                max_speed,
                invert,
                ..
            } => {
                let KindState::Relative {
                    target: tracked,
                    position,
                } = &mut self.kind
                else {
                    return Err(mismatch(action));
                };
                *tracked = *target;
                let value = shape(signal.value(), *deadzone, *exponent, *invert);
                let next = *position + value * max_speed * cx.dt.as_secs_f32();
                if !next.is_finite() {
                    return Err(EvalFault::NonFinite);
                }
                *position = next.clamp(-1.0, 1.0);
                if write {
                    cx.out.push(Contribution::Axis(*target, *position));
                }
                Ok(Signal::Analog(*position))
            }
            Action::AxisReset { target, value } => {
                if rising {
                    cx.resets.push((*target, *value));
                }
                Ok(Signal::Digital(active))
            }
            Action::Cycle { targets } => {
                let KindState::Cycle { next } = &mut self.kind else {
                    return Err(mismatch(action));
                };
                if rising {
                    if targets.is_empty() {
                        return Err(EvalFault::Internal("cycle has no targets".into()));
                    }
                    let index = *next % targets.len();
                    if write {
                        cx.out.target(&targets[index]);
                    }
                    *next = (index + 1) % targets.len();
                }
                Ok(Signal::Digital(rising))
            }
            Action::ModeSwitch { mode, toggle } => {
                if rising {
                    cx.requests.push(if *toggle {
                        ModeRequest::Toggle(mode.clone())
                    } else {
                        ModeRequest::Hold(mode.clone())
                    });
                }
                Ok(Signal::Digital(active))
            }
            Action::Chain { stages } => {
                let KindState::Chain(states) = &mut self.kind else {
                    return Err(mismatch(action));
                };
                if states.len() != stages.len() {
                    return Err(mismatch(action));
                }
                let last = stages.len().saturating_sub(1);
                let mut current = signal;
                for (index, (stage, state)) in stages.iter().zip(states.iter_mut()).enumerate() {
                    current = state.step(stage, current, cx, write && index == last)?;
                }
                Ok(current)
            }
            Action::Timed {
                timing,
                action: wrapped,
            } => {
                let KindState::Timed { gate, inner } = &mut self.kind else {
                    return Err(mismatch(action));
                };
                if active {
                    gate.last_active = Some(signal);
                }
                let gated = match (gate.advance(active, cx.dt, timing), active) {
                    (true, true) => signal,
                    (true, false) => gate.last_active.unwrap_or(Signal::Digital(true)),
                    (false, _) => Signal::Digital(false),
                };
                inner.step(wrapped, gated, cx, write)
            }
        }
    }
}

/// Whether `signal` counts as pressed for `action`
///
/// Axis thresholds are inclusive; a negative threshold is met at or below it.
pub(crate) fn activity(action: &Action, signal: Signal) -> bool {
    match action {
        Action::AxisToKey { threshold, .. } | Action::AxisToButton { threshold, .. } => {
            let value = signal.value();
            if *threshold >= 0.0 {
                value >= *threshold
            } else {
                value <= *threshold
            }
        }
        Action::Timed { action, .. } => activity(action, signal),
        _ => signal.is_active(),
    }
}

fn integrate(remainder: &mut f32, rate: f32, dt: Duration) -> Result<i32, EvalFault> {
    if rate == 0.0 {
        *remainder = 0.0;
        return Ok(0);
    }
    let total = *remainder + rate * dt.as_secs_f32();
    if !total.is_finite() {
        return Err(EvalFault::NonFinite);
    }
    let whole = total.trunc();
    *remainder = total - whole;
    Ok(whole as i32)
}

fn mismatch(action: &Action) -> EvalFault {
    EvalFault::StateMismatch(action.kind())
}
