//! The closed set of action kinds a binding can carry
//!
//! Actions are plain data. Everything that changes while the engine runs
//! (latches, timers, macro cursors) lives in the evaluator's slot state.
//!
//! Stored profiles tag each action with `kind`:
//!
//! ```toml
//! [modes.bindings.action]
//! kind = "button_to_key"
//! activation = "on_press"
//! key = { modifiers = ["LeftCtrl"], keys = ["C"] }
//! ```

use serde::{Deserialize, Serialize};

use std::time::Duration;

use super::curve::{deadzone_problem, exponent_problem, AxisCurve};
use super::keys::{Key, KeyStroke};

/// Number of virtual joystick buttons (BTN_TRIGGER..BTN_DEAD, BTN_TRIGGER_HAPPY1..40)
pub const MAX_VIRTUAL_BUTTONS: u8 = 53;

fn one() -> f32 {
    1.0
}

fn yes() -> bool {
    true
}

fn default_cursor_speed() -> f32 {
    1000.0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VirtualAxis {
    X,
    Y,
    Z,
    Rx,
    Ry,
    Rz,
    Throttle,
    Rudder,
}

impl VirtualAxis {
    pub const ALL: [VirtualAxis; 8] = [
        VirtualAxis::X,
        VirtualAxis::Y,
        VirtualAxis::Z,
        VirtualAxis::Rx,
        VirtualAxis::Ry,
        VirtualAxis::Rz,
        VirtualAxis::Throttle,
        VirtualAxis::Rudder,
    ];

    pub fn index(self) -> u8 {
        self as u8
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MouseButton {
    Left,
    Right,
    Middle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PointerAxis {
    X,
    Y,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockKey {
    CapsLock,
    NumLock,
    ScrollLock,
}

impl LockKey {
    /// Key that flips this lock when tapped
    pub fn key(self) -> Key {
        match self {
            LockKey::CapsLock => Key::CapsLock,
            LockKey::NumLock => Key::NumLock,
            LockKey::ScrollLock => Key::ScrollLock,
        }
    }
}

/// Hold-time filter in front of a wrapped action
///
/// Zero means "not set" for every field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Timing {
    /// The input must be held this long before the action sees it
    #[serde(default)]
    pub delay_ms: u64,
    /// Once open, the action sees the input for at least this long
    #[serde(default)]
    pub min_active_ms: u64,
    /// Once open, the action sees the input for at most this long per press
    #[serde(default)]
    pub max_active_ms: u64,
}

impl Timing {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }

    pub fn min_active(&self) -> Duration {
        Duration::from_millis(self.min_active_ms)
    }

    pub fn max_active(&self) -> Option<Duration> {
        (self.max_active_ms > 0).then(|| Duration::from_millis(self.max_active_ms))
    }

    fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.delay_ms == 0 && self.min_active_ms == 0 && self.max_active_ms == 0 {
            problems.push("timing sets no delay or interval".into());
        }
        if self.max_active_ms > 0 && self.min_active_ms > self.max_active_ms {
            problems.push(format!(
                "min_active_ms {} exceeds max_active_ms {}",
                self.min_active_ms, self.max_active_ms
            ));
        }
        problems
    }
}

/// Something a digital action switches on
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputTarget {
    Key(KeyStroke),
    Button(u8),
    Mouse(MouseButton),
}

/// When a digital action fires relative to its input
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    /// Held for as long as the input is active
    #[default]
    WhilePressed,
    /// One-tick pulse on the rising edge
    OnPress,
    /// One-tick pulse on the falling edge
    OnRelease,
}

impl Activation {
    pub fn fires(self, active: bool, rising: bool, falling: bool) -> bool {
        match self {
            Activation::WhilePressed => active,
            Activation::OnPress => rising,
            Activation::OnRelease => falling,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MacroEvent {
    Press(OutputTarget),
    Release(OutputTarget),
    /// Active for exactly one tick
    Tap(OutputTarget),
}

impl MacroEvent {
    pub fn target(&self) -> &OutputTarget {
        match self {
            MacroEvent::Press(t) | MacroEvent::Release(t) | MacroEvent::Tap(t) => t,
        }
    }
}

/// One macro step; `delay_ms` is waited after the event before the next step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MacroStep {
    pub event: MacroEvent,
    #[serde(default)]
    pub delay_ms: u64,
}

/// What a re-trigger does while the macro is still running
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverlapPolicy {
    #[default]
    Reject,
    Restart,
    Queue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MacroCadence {
    /// Runs to completion once triggered
    #[default]
    Timed,
    /// Runs only while the trigger is held, cancelled on release
    Gated,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Action {
    AxisToAxis {
        target: VirtualAxis,
        #[serde(default)]
        curve: AxisCurve,
    },
    /// Active while the axis is beyond `threshold` (below it for negative thresholds)
    AxisToKey {
        key: KeyStroke,
        threshold: f32,
        #[serde(default)]
        activation: Activation,
    },
    AxisToButton {
        button: u8,
        threshold: f32,
        #[serde(default)]
        activation: Activation,
    },
    ButtonToKey {
        key: KeyStroke,
        #[serde(default)]
        activation: Activation,
    },
    ButtonToButton {
        button: u8,
        #[serde(default)]
        activation: Activation,
    },
    ButtonToMouseButton {
        button: MouseButton,
        #[serde(default)]
        activation: Activation,
    },
    /// Rising edges flip a latch, the target is held while latched
    ToggleButton {
        target: OutputTarget,
    },
    /// Fires `short` or `long` once on release; a hold of exactly the threshold is long
    LongPress {
        threshold_ms: u64,
        short: OutputTarget,
        long: OutputTarget,
    },
    Macro {
        steps: Vec<MacroStep>,
        #[serde(default)]
        overlap: OverlapPolicy,
        #[serde(default)]
        cadence: MacroCadence,
    },
    /// Pointer velocity in pixels per second at full deflection
    CursorAxis {
        axis: PointerAxis,
        #[serde(default)]
        deadzone: f32,
        #[serde(default = "one")]
        exponent: f32,
        max_speed: f32,
        #[serde(default)]
        invert: bool,
    },
    ScrollAxis {
        #[serde(default)]
        deadzone: f32,
        #[serde(default = "one")]
        exponent: f32,
        clicks_per_second: f32,
        #[serde(default)]
        invert: bool,
    },
    /// Moves the pointer at `speed` pixels per second while held; negative
    /// speeds move left or up
    ButtonToCursor {
        axis: PointerAxis,
        #[serde(default = "default_cursor_speed")]
        speed: f32,
    },
    ButtonToScroll {
        clicks_per_second: f32,
    },
    /// Switches a lock key on (or off) on press, tapping it only if needed
    ButtonToLockKey {
        key: LockKey,
        #[serde(default = "yes")]
        on: bool,
    },
    /// Integrates the input into a virtual axis position (full travel is 2.0)
    RelativeAxis {
        target: VirtualAxis,
        #[serde(default)]
        deadzone: f32,
        #[serde(default = "one")]
        exponent: f32,
        max_speed: f32,
        #[serde(default)]
        invert: bool,
        #[serde(default)]
        initial: f32,
    },
    /// Snaps every relative axis driving `target` to `value` on press
    AxisReset {
        target: VirtualAxis,
        #[serde(default)]
        value: f32,
    },
    /// Each press fires the next target in the list
    Cycle {
        targets: Vec<OutputTarget>,
    },
    /// Pushes `mode` while held, or until the next press with `toggle`
    ModeSwitch {
        mode: String,
        #[serde(default)]
        toggle: bool,
    },
    #[serde(alias = "combo")]
    Chain {
        stages: Vec<Action>,
    },
    /// Runs `action` on the input as filtered by `timing`
    Timed {
        timing: Timing,
        action: Box<Action>,
    },
}

/// Structural identity of an action, used to decide whether slot state can
/// carry over to a new profile
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ActionKind {
    AxisToAxis,
    AxisToKey,
    AxisToButton,
    ButtonToKey,
    ButtonToButton,
    ButtonToMouseButton,
    ToggleButton,
    LongPress,
    Macro,
    CursorAxis,
    ScrollAxis,
    ButtonToCursor,
    ButtonToScroll,
    ButtonToLockKey,
    RelativeAxis,
    AxisReset,
    Cycle,
    ModeSwitch,
    Chain(Vec<ActionKind>),
    Timed(Box<ActionKind>),
}

/// Output side effects an action can have, see [`Action::visit_outputs`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputUse {
    Axis(VirtualAxis),
    Button(u8),
    Keyboard,
    MouseButton,
    Cursor,
    Scroll,
}

impl OutputTarget {
    pub fn output_use(&self) -> OutputUse {
        match self {
            OutputTarget::Key(_) => OutputUse::Keyboard,
            OutputTarget::Button(button) => OutputUse::Button(*button),
            OutputTarget::Mouse(_) => OutputUse::MouseButton,
        }
    }
}

impl Action {
    pub fn kind(&self) -> ActionKind {
        match self {
            Action::AxisToAxis { .. } => ActionKind::AxisToAxis,
            Action::AxisToKey { .. } => ActionKind::AxisToKey,
            Action::AxisToButton { .. } => ActionKind::AxisToButton,
            Action::ButtonToKey { .. } => ActionKind::ButtonToKey,
            Action::ButtonToButton { .. } => ActionKind::ButtonToButton,
            Action::ButtonToMouseButton { .. } => ActionKind::ButtonToMouseButton,
            Action::ToggleButton { .. } => ActionKind::ToggleButton,
            Action::LongPress { .. } => ActionKind::LongPress,
            Action::Macro { .. } => ActionKind::Macro,
            Action::CursorAxis { .. } => ActionKind::CursorAxis,
            Action::ScrollAxis { .. } => ActionKind::ScrollAxis,
            Action::ButtonToCursor { .. } => ActionKind::ButtonToCursor,
            Action::ButtonToScroll { .. } => ActionKind::ButtonToScroll,
            Action::ButtonToLockKey { .. } => ActionKind::ButtonToLockKey,
            Action::RelativeAxis { .. } => ActionKind::RelativeAxis,
            Action::AxisReset { .. } => ActionKind::AxisReset,
            Action::Cycle { .. } => ActionKind::Cycle,
            Action::ModeSwitch { .. } => ActionKind::ModeSwitch,
            Action::Chain { stages } => ActionKind::Chain(stages.iter().map(Action::kind).collect()),
            Action::Timed { action, .. } => ActionKind::Timed(Box::new(action.kind())),
        }
    }

    /// Calls `f` for every output this action (or any chain stage) may write
    pub fn visit_outputs(&self, f: &mut impl FnMut(OutputUse)) {
        match self {
            Action::AxisToAxis { target, .. } | Action::RelativeAxis { target, .. } => {
                f(OutputUse::Axis(*target))
            }
            Action::AxisReset { .. } | Action::ModeSwitch { .. } => {}
            Action::AxisToKey { .. }
            | Action::ButtonToKey { .. }
            | Action::ButtonToLockKey { .. } => f(OutputUse::Keyboard),
            Action::AxisToButton { button, .. } | Action::ButtonToButton { button, .. } => {
                f(OutputUse::Button(*button))
            }
            Action::ButtonToMouseButton { .. } => f(OutputUse::MouseButton),
            Action::ToggleButton { target } => f(target.output_use()),
            Action::LongPress { short, long, .. } => {
                f(short.output_use());
                f(long.output_use());
            }
            Action::Macro { steps, .. } => {
                for step in steps {
                    f(step.event.target().output_use());
                }
            }
            Action::CursorAxis { .. } | Action::ButtonToCursor { .. } => f(OutputUse::Cursor),
            Action::ScrollAxis { .. } | Action::ButtonToScroll { .. } => f(OutputUse::Scroll),
            Action::Cycle { targets } => {
                for target in targets {
                    f(target.output_use());
                }
            }
            Action::Chain { stages } => {
                for stage in stages {
                    stage.visit_outputs(f);
                }
            }
            Action::Timed { action, .. } => action.visit_outputs(f),
        }
    }

    /// Collects parameter problems; mode references are checked by the profile
    pub(crate) fn problems(&self, nested: bool) -> Vec<String> {
        let mut problems = Vec::new();
        match self {
            Action::AxisToAxis { curve, .. } => problems.extend(curve.problems()),
            Action::AxisToKey { key, threshold, .. } => {
                problems.extend(stroke_problem(key));
                problems.extend(threshold_problem(*threshold));
            }
            Action::AxisToButton {
                button, threshold, ..
            } => {
                problems.extend(button_problem(*button));
                problems.extend(threshold_problem(*threshold));
            }
            Action::ButtonToKey { key, .. } => problems.extend(stroke_problem(key)),
            Action::ButtonToButton { button, .. } => problems.extend(button_problem(*button)),
            Action::ButtonToMouseButton { .. } => {}
            Action::ToggleButton { target } => problems.extend(target_problem(target)),
            Action::LongPress {
                threshold_ms,
                short,
                long,
            } => {
                if *threshold_ms == 0 {
                    problems.push("long press threshold must be greater than 0".into());
                }
                problems.extend(target_problem(short));
                problems.extend(target_problem(long));
            }
            Action::Macro { steps, .. } => {
                if steps.is_empty() {
                    problems.push("macro has no steps".into());
                }
                for step in steps {
                    problems.extend(target_problem(step.event.target()));
                }
            }
            Action::CursorAxis {
                deadzone,
                exponent,
                max_speed,
                ..
            }
            | Action::RelativeAxis {
                deadzone,
                exponent,
                max_speed,
                ..
            } => {
                problems.extend(deadzone_problem(*deadzone));
                problems.extend(exponent_problem(*exponent));
                if !max_speed.is_finite() || *max_speed <= 0.0 {
                    problems.push(format!("max_speed {} must be greater than 0", max_speed));
                }
                if let Action::RelativeAxis { initial, .. } = self {
                    if !initial.is_finite() || !(-1.0..=1.0).contains(initial) {
                        problems.push(format!("initial {} is outside [-1, 1]", initial));
                    }
                }
            }
            Action::ScrollAxis {
                deadzone,
                exponent,
                clicks_per_second,
                ..
            } => {
                problems.extend(deadzone_problem(*deadzone));
                problems.extend(exponent_problem(*exponent));
                if !clicks_per_second.is_finite() || *clicks_per_second <= 0.0 {
                    problems.push(format!(
                        "clicks_per_second {} must be greater than 0",
                        clicks_per_second
                    ));
                }
            }
            Action::ButtonToCursor { speed, .. } => {
                if !speed.is_finite() || *speed == 0.0 {
                    problems.push(format!("cursor speed {} must be nonzero", speed));
                }
            }
            Action::ButtonToScroll { clicks_per_second } => {
                if !clicks_per_second.is_finite() || *clicks_per_second == 0.0 {
                    problems.push(format!(
                        "clicks_per_second {} must be nonzero",
                        clicks_per_second
                    ));
                }
            }
            Action::ButtonToLockKey { .. } => {}
            Action::AxisReset { value, .. } => {
                if !value.is_finite() || !(-1.0..=1.0).contains(value) {
                    problems.push(format!("reset value {} is outside [-1, 1]", value));
                }
            }
            Action::Cycle { targets } => {
                if targets.is_empty() {
                    problems.push("cycle has no targets".into());
                }
                for target in targets {
                    problems.extend(target_problem(target));
                }
            }
            Action::ModeSwitch { .. } => {
                if nested {
                    problems.push("mode switches cannot be chain stages".into());
                }
            }
            Action::Chain { stages } => {
                if stages.is_empty() {
                    problems.push("chain has no stages".into());
                }
                for (index, stage) in stages.iter().enumerate() {
                    for problem in stage.problems(true) {
                        problems.push(format!("stage {}: {}", index, problem));
                    }
                }
            }
            Action::Timed { timing, action } => {
                problems.extend(timing.problems());
                for problem in action.problems(true) {
                    problems.push(format!("timed action: {}", problem));
                }
            }
        }
        problems
    }
}

fn stroke_problem(stroke: &KeyStroke) -> Option<String> {
    stroke.is_empty().then(|| "key stroke has no keys".to_string())
}

fn button_problem(button: u8) -> Option<String> {
    (button >= MAX_VIRTUAL_BUTTONS).then(|| {
        format!(
            "virtual button {} is out of range (max {})",
            button,
            MAX_VIRTUAL_BUTTONS - 1
        )
    })
}

fn threshold_problem(threshold: f32) -> Option<String> {
    (!threshold.is_finite() || threshold == 0.0 || !(-1.0..=1.0).contains(&threshold))
        .then(|| format!("threshold {} must be nonzero and within [-1, 1]", threshold))
}

fn target_problem(target: &OutputTarget) -> Option<String> {
    match target {
        OutputTarget::Key(stroke) => stroke_problem(stroke),
        OutputTarget::Button(button) => button_problem(*button),
        OutputTarget::Mouse(_) => None,
    }
}
