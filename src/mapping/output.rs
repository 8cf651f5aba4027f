//! Per-tick synthesized output and how contributions are combined
//!
//! Several bindings may write the same output component in one tick. Digital
//! components are OR'ed, so one binding releasing never drops another
//! binding's hold. Analog axes are combined by [`CombinePolicy`].

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use super::action::{LockKey, MouseButton, OutputTarget, PointerAxis, VirtualAxis};
use super::keys::Key;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CombinePolicy {
    /// Add all contributions, then clamp to `[-1, 1]`
    #[default]
    SumClamp,
    /// Keep the contribution with the largest magnitude
    MaxMagnitude,
}

/// Everything the virtual devices should reflect after one tick
///
/// Axes that are absent read as `0.0`. `cursor` and `scroll` are relative
/// movements for this tick only, and so are the lock states in `locks`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct OutputState {
    pub axes: BTreeMap<VirtualAxis, f32>,
    pub buttons: BTreeSet<u8>,
    pub keys: BTreeSet<Key>,
    pub mouse_buttons: BTreeSet<MouseButton>,
    pub cursor: (i32, i32),
    pub scroll: i32,
    pub locks: BTreeMap<LockKey, bool>,
}

impl OutputState {
    /// Nothing pressed, every axis centered, no movement
    pub fn neutral() -> Self {
        Self::default()
    }

    pub fn axis(&self, axis: VirtualAxis) -> f32 {
        self.axes.get(&axis).copied().unwrap_or(0.0)
    }

    pub fn is_neutral(&self) -> bool {
        self.axes.values().all(|v| *v == 0.0)
            && self.buttons.is_empty()
            && self.keys.is_empty()
            && self.mouse_buttons.is_empty()
            && self.cursor == (0, 0)
            && self.scroll == 0
            && self.locks.is_empty()
    }
}

/// One binding's effect on the output for one tick
#[derive(Debug, Clone, PartialEq)]
pub enum Contribution {
    Axis(VirtualAxis, f32),
    Button(u8),
    Key(Key),
    Mouse(MouseButton),
    Cursor(PointerAxis, i32),
    Scroll(i32),
    /// Requested lock state; the last request of a tick wins
    Lock(LockKey, bool),
}

/// Scratch list a binding writes into before it is merged
#[derive(Debug, Default)]
pub struct Contributions(Vec<Contribution>);

impl Contributions {
    pub fn push(&mut self, contribution: Contribution) {
        self.0.push(contribution);
    }

    pub fn target(&mut self, target: &OutputTarget) {
        match target {
            OutputTarget::Key(stroke) => {
                for key in stroke.all_keys() {
                    self.0.push(Contribution::Key(key));
                }
            }
            OutputTarget::Button(button) => self.0.push(Contribution::Button(*button)),
            OutputTarget::Mouse(button) => self.0.push(Contribution::Mouse(*button)),
        }
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }
}

/// Folds contributions into an [`OutputState`]
#[derive(Debug)]
pub struct OutputBuilder {
    policy: CombinePolicy,
    state: OutputState,
}

impl OutputBuilder {
    pub fn new(policy: CombinePolicy) -> Self {
        Self {
            policy,
            state: OutputState::default(),
        }
    }

    pub fn merge(&mut self, contributions: &Contributions) {
        for contribution in &contributions.0 {
            self.add(contribution);
        }
    }

    pub fn add(&mut self, contribution: &Contribution) {
        match contribution {
            Contribution::Axis(axis, value) => {
                let entry = self.state.axes.entry(*axis).or_insert(0.0);
                match self.policy {
                    CombinePolicy::SumClamp => *entry += value,
                    CombinePolicy::MaxMagnitude => {
                        if value.abs() > entry.abs() {
                            *entry = *value;
                        }
                    }
                }
            }
            Contribution::Button(button) => {
                self.state.buttons.insert(*button);
            }
            Contribution::Key(key) => {
                self.state.keys.insert(*key);
            }
            Contribution::Mouse(button) => {
                self.state.mouse_buttons.insert(*button);
            }
            Contribution::Cursor(PointerAxis::X, dx) => {
                self.state.cursor.0 = self.state.cursor.0.saturating_add(*dx)
            }
            Contribution::Cursor(PointerAxis::Y, dy) => {
                self.state.cursor.1 = self.state.cursor.1.saturating_add(*dy)
            }
            Contribution::Scroll(clicks) => {
                self.state.scroll = self.state.scroll.saturating_add(*clicks)
            }
            Contribution::Lock(lock, on) => {
                self.state.locks.insert(*lock, *on);
            }
        }
    }

    pub fn finish(mut self) -> OutputState {
        for value in self.state.axes.values_mut() {
            *value = value.clamp(-1.0, 1.0);
        }
        self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::keys::KeyStroke;
    use approx::assert_relative_eq;

    #[test]
    fn analog_sum_is_clamped() {
        let mut builder = OutputBuilder::new(CombinePolicy::SumClamp);
        builder.add(&Contribution::Axis(VirtualAxis::X, 0.75));
        builder.add(&Contribution::Axis(VirtualAxis::X, 0.5));
        builder.add(&Contribution::Axis(VirtualAxis::Y, 0.25));
        builder.add(&Contribution::Axis(VirtualAxis::Y, -0.5));
        let state = builder.finish();
        assert_eq!(state.axis(VirtualAxis::X), 1.0);
        assert_relative_eq!(state.axis(VirtualAxis::Y), -0.25);
    }

    #[test]
    fn max_magnitude_keeps_strongest_contribution() {
        let mut builder = OutputBuilder::new(CombinePolicy::MaxMagnitude);
        builder.add(&Contribution::Axis(VirtualAxis::Z, 0.4));
        builder.add(&Contribution::Axis(VirtualAxis::Z, -0.6));
        builder.add(&Contribution::Axis(VirtualAxis::Z, 0.2));
        assert_relative_eq!(builder.finish().axis(VirtualAxis::Z), -0.6);
    }

    #[test]
    fn digital_contributions_are_ored() {
        let mut first = Contributions::default();
        first.target(&OutputTarget::Key(KeyStroke::with_modifiers(
            vec![Key::LeftShift],
            vec![Key::A],
        )));
        first.push(Contribution::Button(2));
        let mut second = Contributions::default();
        second.target(&OutputTarget::Key(KeyStroke::key(Key::A)));

        let mut builder = OutputBuilder::new(CombinePolicy::SumClamp);
        builder.merge(&first);
        builder.merge(&second);
        let state = builder.finish();
        assert_eq!(
            state.keys.iter().copied().collect::<Vec<_>>(),
            vec![Key::A, Key::LeftShift]
        );
        assert!(state.buttons.contains(&2));
        assert!(!state.is_neutral());
    }

    #[test]
    fn relative_motion_accumulates() {
        let mut builder = OutputBuilder::new(CombinePolicy::SumClamp);
        builder.add(&Contribution::Cursor(PointerAxis::X, 3));
        builder.add(&Contribution::Cursor(PointerAxis::X, -1));
        builder.add(&Contribution::Cursor(PointerAxis::Y, 5));
        builder.add(&Contribution::Scroll(-2));
        let state = builder.finish();
        assert_eq!(state.cursor, (2, 5));
        assert_eq!(state.scroll, -2);
    }
}
