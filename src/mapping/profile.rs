//! Profile → Modes → Bindings
//!
//! A profile is immutable once activated and shared as `Arc<Profile>`. The
//! first mode is the default mode and always sits at the bottom of the mode
//! stack. Modes pushed on top override the bindings below them per input
//! component; components a pushed mode does not bind fall through.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::action::{Action, OutputUse};
use super::error::ProfileError;
use super::signal::Signal;
use crate::controller::{DeviceKey, HatDirection, InputState};

/// Storage schema version understood by this build
pub const PROFILE_FORMAT_VERSION: u32 = 1;

/// Upper bound for physical axis, button and hat indices
pub const MAX_INPUT_INDEX: u8 = 32;

/// Which devices a binding listens to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceSelector {
    #[default]
    Any,
    Device(DeviceKey),
}

impl DeviceSelector {
    pub fn matches(&self, key: &DeviceKey) -> bool {
        match self {
            DeviceSelector::Any => true,
            DeviceSelector::Device(selected) => selected == key,
        }
    }

    pub fn is_specific(&self) -> bool {
        matches!(self, DeviceSelector::Device(_))
    }
}

/// One input component of a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Component {
    Axis(u8),
    Button(u8),
    Hat { index: u8, direction: HatDirection },
}

impl Component {
    pub fn read(&self, input: &InputState) -> Signal {
        match self {
            Component::Axis(index) => Signal::Analog(input.axis(*index)),
            Component::Button(button) => Signal::Digital(input.is_pressed(*button)),
            Component::Hat { index, direction } => Signal::Digital(input.hat(*index, *direction)),
        }
    }

    fn index(&self) -> u8 {
        match self {
            Component::Axis(index) | Component::Button(index) => *index,
            Component::Hat { index, .. } => *index,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Binding {
    #[serde(default)]
    pub device: DeviceSelector,
    pub component: Component,
    pub action: Action,
}

impl Binding {
    pub fn new(component: Component, action: Action) -> Self {
        Self {
            device: DeviceSelector::Any,
            component,
            action,
        }
    }

    pub fn for_device(mut self, device: DeviceKey) -> Self {
        self.device = DeviceSelector::Device(device);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mode {
    pub id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default)]
    pub bindings: Vec<Binding>,
}

impl Mode {
    pub fn new(id: impl Into<String>, bindings: Vec<Binding>) -> Self {
        Self {
            id: id.into(),
            description: String::new(),
            bindings,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub format_version: u32,
    pub name: String,
    /// User-level edit counter, bumped by editors on save
    #[serde(default)]
    pub revision: u32,
    pub modes: Vec<Mode>,
}

impl Profile {
    pub fn new(name: impl Into<String>, modes: Vec<Mode>) -> Self {
        Self {
            format_version: PROFILE_FORMAT_VERSION,
            name: name.into(),
            revision: 0,
            modes,
        }
    }

    pub fn default_mode(&self) -> Option<&Mode> {
        self.modes.first()
    }

    pub fn mode(&self, id: &str) -> Option<&Mode> {
        self.modes.iter().find(|mode| mode.id == id)
    }

    pub fn is_default_mode(&self, id: &str) -> bool {
        self.default_mode().is_some_and(|mode| mode.id == id)
    }

    /// Every output any binding of any mode may write
    pub fn output_uses(&self) -> Vec<OutputUse> {
        let mut uses = Vec::new();
        for mode in &self.modes {
            for binding in &mode.bindings {
                binding.action.visit_outputs(&mut |output| uses.push(output));
            }
        }
        uses
    }

    /// Checks the structural invariants required before activation
    ///
    /// # Errors
    ///
    /// * [`ProfileError::UnsupportedVersion`] for a foreign `format_version`
    /// * [`ProfileError::Validation`] listing every problem found
    pub fn validate(&self) -> Result<(), ProfileError> {
        if self.format_version != PROFILE_FORMAT_VERSION {
            return Err(ProfileError::UnsupportedVersion {
                found: Some(self.format_version),
                expected: PROFILE_FORMAT_VERSION,
            });
        }

        let mut issues = Vec::new();
        if self.name.trim().is_empty() {
            issues.push("profile name is empty".to_string());
        }
        if self.modes.is_empty() {
            issues.push("profile has no modes".to_string());
        }

        let mut mode_ids = HashSet::new();
        for mode in &self.modes {
            if mode.id.trim().is_empty() {
                issues.push("mode id is empty".to_string());
            } else if !mode_ids.insert(mode.id.as_str()) {
                issues.push(format!("duplicate mode id '{}'", mode.id));
            }
        }

        for mode in &self.modes {
            let mut bound = HashSet::new();
            for (index, binding) in mode.bindings.iter().enumerate() {
                let at = format!("mode '{}' binding {}", mode.id, index);

                if binding.component.index() >= MAX_INPUT_INDEX {
                    issues.push(format!(
                        "{}: input index {} is out of range",
                        at,
                        binding.component.index()
                    ));
                }
                if !bound.insert((binding.device, binding.component)) {
                    issues.push(format!(
                        "{}: {:?} is already bound in this mode",
                        at, binding.component
                    ));
                }
                for problem in binding.action.problems(false) {
                    issues.push(format!("{}: {}", at, problem));
                }
                if let Action::ModeSwitch { mode: target, .. } = &binding.action {
                    if self.mode(target).is_none() {
                        issues.push(format!("{}: switches to unknown mode '{}'", at, target));
                    } else if self.is_default_mode(target) {
                        issues.push(format!("{}: cannot switch to the default mode", at));
                    }
                }
            }
        }

        if issues.is_empty() {
            debug!("Profile '{}' passed validation", self.name);
            Ok(())
        } else {
            Err(ProfileError::Validation { issues })
        }
    }
}
