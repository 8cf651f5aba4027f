//! Action graph evaluation
//!
//! The [`Evaluator`] turns the physical input snapshot of one tick into the
//! [`OutputState`] for that tick. Per-binding state (latches, timers, macro
//! cursors) is kept in slots keyed by mode, device and input component, so the
//! same binding on two identical pads never shares state.
//!
//! Resolution per device and component: the topmost mode on the mode stack that
//! binds the component wins; inside a mode a binding for the specific device
//! wins over a wildcard binding.

use std::collections::{HashMap, HashSet};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use super::action::{ActionKind, VirtualAxis};
use super::error::ProfileError;
use super::output::{CombinePolicy, Contributions, OutputBuilder, OutputState};
use super::profile::{Binding, Component, DeviceSelector, Mode, Profile};
use super::state::{ModeRequest, StageState, StepContext};
use crate::controller::{DeviceKey, InputState};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct SlotKey {
    mode: String,
    device: DeviceKey,
    selector: DeviceSelector,
    component: Component,
}

#[derive(Debug)]
struct Slot {
    kind: ActionKind,
    state: StageState,
    /// Tick this slot was last evaluated on
    last_tick: Option<u64>,
}

/// A mode above the default mode and what keeps it there
///
/// The mode stays pushed while it is latched (toggle switch or explicit push)
/// or while at least one momentary switch for it is held.
#[derive(Debug, Clone, PartialEq, Eq)]
struct PushedMode {
    id: String,
    latched: bool,
    holds: Vec<(DeviceKey, Component)>,
}

impl PushedMode {
    fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            latched: false,
            holds: Vec::new(),
        }
    }

    fn is_unused(&self) -> bool {
        !self.latched && self.holds.is_empty()
    }
}

pub struct Evaluator {
    profile: Arc<Profile>,
    policy: CombinePolicy,
    /// Modes above the default mode, bottom first
    pushed: Vec<PushedMode>,
    slots: HashMap<SlotKey, Slot>,
    tick: u64,
    stack_changed: bool,
}

impl Evaluator {
    pub fn new(profile: Arc<Profile>, policy: CombinePolicy) -> Self {
        Self {
            profile,
            policy,
            pushed: Vec::new(),
            slots: HashMap::new(),
            tick: 0,
            stack_changed: false,
        }
    }

    pub fn profile(&self) -> &Arc<Profile> {
        &self.profile
    }

    /// Active mode ids from the default mode (first) to the top of the stack
    pub fn mode_stack(&self) -> Vec<String> {
        self.profile
            .default_mode()
            .map(|mode| mode.id.clone())
            .into_iter()
            .chain(self.pushed.iter().map(|mode| mode.id.clone()))
            .collect()
    }

    /// Returns `true` once after every change of the mode stack
    pub fn take_stack_change(&mut self) -> bool {
        std::mem::take(&mut self.stack_changed)
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Pushes `id` on top of the mode stack and latches it there
    ///
    /// Pushing a mode that is already on the stack only latches it.
    pub fn push_mode(&mut self, id: &str) -> Result<(), ProfileError> {
        self.entry(id)?.latched = true;
        Ok(())
    }

    /// Pops the topmost pushed mode; the default mode is never popped
    ///
    /// The mode goes away even if momentary switches for it are still held.
    pub fn pop_mode(&mut self) -> Option<String> {
        let mode = self.pushed.pop()?;
        self.stack_changed = true;
        debug!("Mode '{}' popped", mode.id);
        Some(mode.id)
    }

    /// Evaluates one tick
    ///
    /// `dt` is the time since the previous tick. A binding whose evaluation
    /// faults contributes nothing this tick; every other binding is unaffected.
    pub fn evaluate(&mut self, inputs: &[(DeviceKey, InputState)], dt: Duration) -> OutputState {
        self.tick += 1;
        let tick = self.tick;
        let profile = Arc::clone(&self.profile);
        let stack = self.active_modes(&profile);

        let mut builder = OutputBuilder::new(self.policy);
        let mut scratch = Contributions::default();
        let mut requests: Vec<(ModeRequest, DeviceKey, Component)> = Vec::new();
        let mut resets: Vec<(VirtualAxis, f32)> = Vec::new();

        for (device, input) in inputs {
            for (mode, binding) in resolve(&stack, device) {
                let signal = binding.component.read(input);
                let key = SlotKey {
                    mode: mode.id.clone(),
                    device: *device,
                    selector: binding.device,
                    component: binding.component,
                };
                let kind = binding.action.kind();
                let slot = self.slots.entry(key).or_insert_with(|| Slot {
                    kind: kind.clone(),
                    state: StageState::for_action(&binding.action),
                    last_tick: None,
                });
                if slot.kind != kind {
                    *slot = Slot {
                        kind,
                        state: StageState::for_action(&binding.action),
                        last_tick: None,
                    };
                }
                if slot.last_tick != Some(tick - 1) {
                    slot.state.seed(&binding.action, signal);
                }
                slot.last_tick = Some(tick);

                scratch.clear();
                let mut binding_requests = Vec::new();
                let mut binding_resets = Vec::new();
                let mut cx = StepContext {
                    dt,
                    out: &mut scratch,
                    requests: &mut binding_requests,
                    resets: &mut binding_resets,
                };
                let state = &mut slot.state;
                let result = panic::catch_unwind(AssertUnwindSafe(|| {
                    state.step(&binding.action, signal, &mut cx, true)
                }));

                match result {
                    Ok(Ok(_)) => {
                        builder.merge(&scratch);
                        requests.extend(
                            binding_requests
                                .into_iter()
                                .map(|request| (request, *device, binding.component)),
                        );
                        resets.extend(binding_resets);
                    }
                    Ok(Err(fault)) => {
                        error!(
                            "Binding {:?} of {} in mode '{}' skipped: {}",
                            binding.component, device, mode.id, fault
                        );
                    }
                    Err(_) => {
                        error!(
                            "Binding {:?} of {} in mode '{}' panicked, skipped for this tick",
                            binding.component, device, mode.id
                        );
                        *slot = Slot {
                            kind: binding.action.kind(),
                            state: StageState::for_action(&binding.action),
                            last_tick: None,
                        };
                    }
                }
            }
        }

        for (axis, value) in resets {
            for slot in self.slots.values_mut() {
                slot.state.reset_relative(axis, value);
            }
        }
        self.release_holds(inputs);
        self.apply_requests(requests);

        builder.finish()
    }

    /// Replaces the active profile, keeping slot state where possible
    ///
    /// A slot survives when the new profile has a binding for the same mode,
    /// selector and component whose action has the same structure. Pushed
    /// modes that still exist stay on the stack.
    pub fn switch_profile(&mut self, profile: Arc<Profile>) {
        let retained: HashMap<(&str, DeviceSelector, Component), ActionKind> = profile
            .modes
            .iter()
            .flat_map(|mode| {
                mode.bindings.iter().map(move |binding| {
                    (
                        (mode.id.as_str(), binding.device, binding.component),
                        binding.action.kind(),
                    )
                })
            })
            .collect();

        let before = self.slots.len();
        self.slots.retain(|key, slot| {
            retained.get(&(key.mode.as_str(), key.selector, key.component)) == Some(&slot.kind)
        });
        debug!(
            "Profile switch kept {} of {} binding slots",
            self.slots.len(),
            before
        );

        let stack_before = self.pushed.len();
        self.pushed
            .retain(|mode| profile.mode(&mode.id).is_some() && !profile.is_default_mode(&mode.id));
        if self.pushed.len() != stack_before {
            self.stack_changed = true;
        }

        info!(
            "Evaluator now uses profile '{}' (revision {})",
            profile.name, profile.revision
        );
        self.profile = profile;
    }

    /// Forgets all state tied to a device that went away
    pub fn device_disconnected(&mut self, device: &DeviceKey) {
        self.slots.retain(|key, _| key.device != *device);
        for mode in &mut self.pushed {
            mode.holds.retain(|(holder, _)| holder != device);
        }
        self.drop_unused_modes();
    }

    fn active_modes<'p>(&self, profile: &'p Profile) -> Vec<&'p Mode> {
        let mut modes: Vec<&Mode> = self
            .pushed
            .iter()
            .rev()
            .filter_map(|mode| profile.mode(&mode.id))
            .collect();
        modes.extend(profile.default_mode());
        modes
    }

    /// Finds `id` on the stack or pushes it unlatched
    fn entry(&mut self, id: &str) -> Result<&mut PushedMode, ProfileError> {
        if self.profile.mode(id).is_none() || self.profile.is_default_mode(id) {
            return Err(ProfileError::UnknownMode(id.to_string()));
        }
        let position = match self.pushed.iter().position(|mode| mode.id == id) {
            Some(position) => position,
            None => {
                self.pushed.push(PushedMode::new(id));
                self.stack_changed = true;
                debug!("Mode '{}' pushed", id);
                self.pushed.len() - 1
            }
        };
        Ok(&mut self.pushed[position])
    }

    /// Drops momentary holds whose input is no longer active
    ///
    /// A device missing from `inputs` holds nothing this tick.
    fn release_holds(&mut self, inputs: &[(DeviceKey, InputState)]) {
        for mode in &mut self.pushed {
            mode.holds.retain(|(holder, component)| {
                inputs
                    .iter()
                    .find(|(device, _)| device == holder)
                    .is_some_and(|(_, input)| component.read(input).is_active())
            });
        }
        self.drop_unused_modes();
    }

    fn apply_requests(&mut self, requests: Vec<(ModeRequest, DeviceKey, Component)>) {
        for (request, device, component) in requests {
            match request {
                ModeRequest::Hold(id) => match self.entry(&id) {
                    Ok(mode) => {
                        if !mode.holds.contains(&(device, component)) {
                            mode.holds.push((device, component));
                        }
                    }
                    Err(_) => warn!("Ignoring switch to unknown mode '{}'", id),
                },
                ModeRequest::Toggle(id) => match self.entry(&id) {
                    Ok(mode) => {
                        mode.latched = !mode.latched;
                        self.drop_unused_modes();
                    }
                    Err(_) => warn!("Ignoring switch to unknown mode '{}'", id),
                },
            }
        }
    }

    fn drop_unused_modes(&mut self) {
        let before = self.pushed.len();
        self.pushed.retain(|mode| {
            if mode.is_unused() {
                debug!("Mode '{}' released", mode.id);
            }
            !mode.is_unused()
        });
        if self.pushed.len() != before {
            self.stack_changed = true;
        }
    }
}

/// Picks the binding that owns each component of `device`
fn resolve<'p>(stack: &[&'p Mode], device: &DeviceKey) -> Vec<(&'p Mode, &'p Binding)> {
    let mut claimed: HashSet<Component> = HashSet::new();
    let mut resolved = Vec::new();
    for mode in stack {
        let specific = mode
            .bindings
            .iter()
            .filter(|binding| binding.device.is_specific() && binding.device.matches(device));
        let wildcard = mode
            .bindings
            .iter()
            .filter(|binding| !binding.device.is_specific());
        for binding in specific.chain(wildcard) {
            if claimed.insert(binding.component) {
                resolved.push((*mode, binding));
            }
        }
    }
    resolved
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::action::{Action, Activation, OutputTarget};
    use crate::mapping::curve::AxisCurve;
    use crate::mapping::keys::{Key, KeyStroke};

    const TICK: Duration = Duration::from_millis(10);

    fn pad(instance: u8) -> DeviceKey {
        DeviceKey::new(0x045e, 0x028e, instance)
    }

    fn buttons(pressed: &[u8]) -> InputState {
        InputState::new(Vec::new(), pressed.iter().copied(), Vec::new())
    }

    fn key_binding(button: u8, key: Key) -> Binding {
        Binding::new(
            Component::Button(button),
            Action::ButtonToKey {
                key: KeyStroke::key(key),
                activation: Activation::WhilePressed,
            },
        )
    }

    fn toggle(button: u8, target: u8) -> Binding {
        Binding::new(
            Component::Button(button),
            Action::ToggleButton {
                target: OutputTarget::Button(target),
            },
        )
    }

    fn evaluator(modes: Vec<Mode>) -> Evaluator {
        let profile = Profile::new("Test", modes);
        profile.validate().unwrap();
        Evaluator::new(Arc::new(profile), CombinePolicy::SumClamp)
    }

    fn keys(state: &OutputState) -> Vec<Key> {
        state.keys.iter().copied().collect()
    }

    #[test]
    fn specific_device_binding_beats_wildcard() {
        let mut eval = evaluator(vec![Mode::new(
            "default",
            vec![
                key_binding(0, Key::A),
                key_binding(0, Key::B).for_device(pad(1)),
            ],
        )]);
        let out = eval.evaluate(&[(pad(0), buttons(&[0])), (pad(1), buttons(&[0]))], TICK);
        assert_eq!(keys(&out), vec![Key::A, Key::B]);
    }

    #[test]
    fn pushed_mode_overrides_and_falls_through() {
        let mut eval = evaluator(vec![
            Mode::new("default", vec![key_binding(0, Key::A), key_binding(1, Key::B)]),
            Mode::new("alt", vec![key_binding(0, Key::X)]),
        ]);
        eval.push_mode("alt").unwrap();
        let out = eval.evaluate(&[(pad(0), buttons(&[0, 1]))], TICK);
        assert_eq!(keys(&out), vec![Key::X, Key::B]);
        assert_eq!(eval.mode_stack(), vec!["default", "alt"]);
        assert!(eval.take_stack_change());
        assert!(!eval.take_stack_change());
    }

    #[test]
    fn unknown_or_default_mode_cannot_be_pushed() {
        let mut eval = evaluator(vec![Mode::new("default", Vec::new())]);
        assert!(matches!(
            eval.push_mode("nope"),
            Err(ProfileError::UnknownMode(_))
        ));
        assert!(eval.push_mode("default").is_err());
        assert_eq!(eval.pop_mode(), None);
    }

    #[test]
    fn identical_devices_keep_separate_state() {
        let mut eval = evaluator(vec![Mode::new("default", vec![toggle(0, 5)])]);
        eval.evaluate(&[(pad(0), buttons(&[])), (pad(1), buttons(&[]))], TICK);
        let out = eval.evaluate(&[(pad(0), buttons(&[0])), (pad(1), buttons(&[]))], TICK);
        assert!(out.buttons.contains(&5));
        let out = eval.evaluate(&[(pad(0), buttons(&[])), (pad(1), buttons(&[0]))], TICK);
        assert!(out.buttons.contains(&5));
        let out = eval.evaluate(&[(pad(0), buttons(&[0])), (pad(1), buttons(&[]))], TICK);
        assert!(out.buttons.contains(&5), "pad 1 still latched");
        let out = eval.evaluate(&[(pad(0), buttons(&[])), (pad(1), buttons(&[0]))], TICK);
        assert!(out.buttons.is_empty());
    }

    #[test]
    fn held_input_on_new_slot_is_not_a_press() {
        let mut eval = evaluator(vec![Mode::new("default", vec![toggle(0, 1)])]);
        let out = eval.evaluate(&[(pad(0), buttons(&[0]))], TICK);
        assert!(out.buttons.is_empty());
    }

    #[test]
    fn momentary_mode_switch_follows_the_button() {
        let mut eval = evaluator(vec![
            Mode::new(
                "default",
                vec![
                    key_binding(0, Key::A),
                    Binding::new(
                        Component::Button(4),
                        Action::ModeSwitch {
                            mode: "shift".into(),
                            toggle: false,
                        },
                    ),
                ],
            ),
            Mode::new("shift", vec![key_binding(0, Key::Z)]),
        ]);
        eval.evaluate(&[(pad(0), buttons(&[]))], TICK);
        eval.evaluate(&[(pad(0), buttons(&[4]))], TICK);
        assert_eq!(eval.mode_stack(), vec!["default", "shift"]);

        let out = eval.evaluate(&[(pad(0), buttons(&[0, 4]))], TICK);
        assert_eq!(keys(&out), vec![Key::Z]);

        eval.evaluate(&[(pad(0), buttons(&[0]))], TICK);
        assert_eq!(eval.mode_stack(), vec!["default"]);
        let out = eval.evaluate(&[(pad(0), buttons(&[0]))], TICK);
        assert_eq!(keys(&out), vec![Key::A]);
    }

    #[test]
    fn toggle_mode_switch_latches() {
        let mut eval = evaluator(vec![
            Mode::new(
                "default",
                vec![Binding::new(
                    Component::Button(7),
                    Action::ModeSwitch {
                        mode: "menu".into(),
                        toggle: true,
                    },
                )],
            ),
            Mode::new("menu", Vec::new()),
        ]);
        let presses: [&[u8]; 4] = [&[], &[7], &[], &[7]];
        for pressed in presses {
            eval.evaluate(&[(pad(0), buttons(pressed))], TICK);
        }
        assert_eq!(eval.mode_stack(), vec!["default"]);
        eval.evaluate(&[(pad(0), buttons(&[]))], TICK);
        eval.evaluate(&[(pad(0), buttons(&[7]))], TICK);
        assert_eq!(eval.mode_stack(), vec!["default", "menu"]);
    }

    fn mode_switch(button: u8, mode: &str, toggle: bool) -> Binding {
        Binding::new(
            Component::Button(button),
            Action::ModeSwitch {
                mode: mode.into(),
                toggle,
            },
        )
    }

    #[test]
    fn mode_stays_while_any_momentary_switch_holds_it() {
        let mut eval = evaluator(vec![
            Mode::new(
                "default",
                vec![
                    key_binding(0, Key::A),
                    mode_switch(4, "shift", false),
                    mode_switch(5, "shift", false),
                ],
            ),
            Mode::new("shift", vec![key_binding(0, Key::Z)]),
        ]);
        eval.evaluate(&[(pad(0), buttons(&[]))], TICK);
        eval.evaluate(&[(pad(0), buttons(&[4]))], TICK);
        eval.evaluate(&[(pad(0), buttons(&[4, 5]))], TICK);
        eval.evaluate(&[(pad(0), buttons(&[5]))], TICK);
        assert_eq!(eval.mode_stack(), vec!["default", "shift"]);

        let out = eval.evaluate(&[(pad(0), buttons(&[0, 5]))], TICK);
        assert_eq!(keys(&out), vec![Key::Z]);

        eval.evaluate(&[(pad(0), buttons(&[0]))], TICK);
        assert_eq!(eval.mode_stack(), vec!["default"]);
    }

    #[test]
    fn momentary_tap_keeps_a_toggled_mode() {
        let mut eval = evaluator(vec![
            Mode::new(
                "default",
                vec![mode_switch(7, "menu", true), mode_switch(4, "menu", false)],
            ),
            Mode::new("menu", Vec::new()),
        ]);
        let presses: [&[u8]; 5] = [&[], &[7], &[], &[4], &[]];
        for pressed in presses {
            eval.evaluate(&[(pad(0), buttons(pressed))], TICK);
        }
        assert_eq!(eval.mode_stack(), vec!["default", "menu"]);

        eval.evaluate(&[(pad(0), buttons(&[7]))], TICK);
        assert_eq!(eval.mode_stack(), vec!["default"]);
    }

    #[test]
    fn pushed_mode_outlives_a_momentary_hold() {
        let mut eval = evaluator(vec![
            Mode::new("default", vec![mode_switch(4, "shift", false)]),
            Mode::new("shift", Vec::new()),
        ]);
        eval.evaluate(&[(pad(0), buttons(&[]))], TICK);
        eval.evaluate(&[(pad(0), buttons(&[4]))], TICK);
        eval.push_mode("shift").unwrap();
        eval.evaluate(&[(pad(0), buttons(&[]))], TICK);
        assert_eq!(eval.mode_stack(), vec!["default", "shift"]);
        assert_eq!(eval.pop_mode(), Some("shift".into()));
    }

    #[test]
    fn missing_device_releases_its_holds() {
        let mut eval = evaluator(vec![
            Mode::new("default", vec![mode_switch(4, "shift", false)]),
            Mode::new("shift", Vec::new()),
        ]);
        eval.evaluate(&[(pad(0), buttons(&[]))], TICK);
        eval.evaluate(&[(pad(0), buttons(&[4]))], TICK);
        assert_eq!(eval.mode_stack().len(), 2);

        eval.evaluate(&[], TICK);
        assert_eq!(eval.mode_stack(), vec!["default"]);
    }

    #[test]
    fn hot_swap_keeps_matching_state() {
        let mut eval = evaluator(vec![Mode::new(
            "default",
            vec![toggle(0, 2), key_binding(1, Key::Q)],
        )]);
        eval.evaluate(&[(pad(0), buttons(&[]))], TICK);
        eval.evaluate(&[(pad(0), buttons(&[0]))], TICK);
        assert_eq!(eval.slot_count(), 2);

        let next = Profile::new(
            "Test",
            vec![Mode::new(
                "default",
                vec![
                    toggle(0, 2),
                    Binding::new(
                        Component::Button(1),
                        Action::ButtonToButton {
                            button: 9,
                            activation: Activation::WhilePressed,
                        },
                    ),
                ],
            )],
        );
        eval.switch_profile(Arc::new(next));
        assert_eq!(eval.slot_count(), 1);

        let out = eval.evaluate(&[(pad(0), buttons(&[0]))], TICK);
        assert!(out.buttons.contains(&2), "toggle latch survives the switch");
    }

    #[test]
    fn faulting_binding_is_isolated() {
        let profile = Profile::new(
            "Faulty",
            vec![Mode::new(
                "default",
                vec![
                    key_binding(0, Key::A),
                    Binding::new(
                        Component::Axis(0),
                        Action::AxisToAxis {
                            target: VirtualAxis::X,
                            curve: AxisCurve {
                                scale: f32::NAN,
                                ..Default::default()
                            },
                        },
                    ),
                ],
            )],
        );
        let mut eval = Evaluator::new(Arc::new(profile), CombinePolicy::SumClamp);
        let input = InputState::new(vec![0.5], [0u8], Vec::new());
        let out = eval.evaluate(&[(pad(0), input)], TICK);
        assert_eq!(keys(&out), vec![Key::A]);
        assert_eq!(out.axis(VirtualAxis::X), 0.0);
    }

    #[test]
    fn disconnect_releases_momentary_modes() {
        let mut eval = evaluator(vec![
            Mode::new(
                "default",
                vec![Binding::new(
                    Component::Button(4),
                    Action::ModeSwitch {
                        mode: "shift".into(),
                        toggle: false,
                    },
                )],
            ),
            Mode::new("shift", Vec::new()),
        ]);
        eval.evaluate(&[(pad(0), buttons(&[]))], TICK);
        eval.evaluate(&[(pad(0), buttons(&[4]))], TICK);
        assert_eq!(eval.mode_stack().len(), 2);

        eval.device_disconnected(&pad(0));
        assert_eq!(eval.mode_stack(), vec!["default"]);
        assert_eq!(eval.slot_count(), 0);
    }
}
