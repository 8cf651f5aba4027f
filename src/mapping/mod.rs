//! Profiles and the action graph that turns controller input into synthesized output.
//!
//! A [`Profile`] holds a stack-able list of [`Mode`]s, each with bindings from an
//! input [`Component`] to an [`Action`]. The [`Evaluator`] resolves the active
//! bindings every tick, keeps per-binding state, and folds all contributions
//! into one [`OutputState`].

pub mod action;
pub mod curve;
pub mod error;
pub mod evaluator;
pub mod keys;
pub mod output;
pub mod profile;
pub mod sequence;
pub mod signal;
mod state;

// Re-exports for easier access
pub use action::{
    Action, ActionKind, Activation, LockKey, MacroCadence, MacroEvent, MacroStep, MouseButton,
    OutputTarget, OutputUse, OverlapPolicy, PointerAxis, Timing, VirtualAxis, MAX_VIRTUAL_BUTTONS,
};
pub use curve::{shape, AxisCurve};
pub use error::{EvalFault, MacroBusyError, ProfileError};
pub use evaluator::Evaluator;
pub use keys::{Key, KeyStroke};
pub use output::{CombinePolicy, Contribution, Contributions, OutputBuilder, OutputState};
pub use profile::{
    Binding, Component, DeviceSelector, Mode, Profile, MAX_INPUT_INDEX, PROFILE_FORMAT_VERSION,
};
pub use signal::Signal;
