use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HatDirection {
    Up,
    Down,
    Left,
    Right,
}

impl HatDirection {
    pub const ALL: [HatDirection; 4] = [
        HatDirection::Up,
        HatDirection::Down,
        HatDirection::Left,
        HatDirection::Right,
    ];

    fn bit(self) -> u8 {
        match self {
            HatDirection::Up => 0b0001,
            HatDirection::Down => 0b0010,
            HatDirection::Left => 0b0100,
            HatDirection::Right => 0b1000,
        }
    }
}

/// Pressed directions of one hat switch (diagonals press two)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HatState(u8);

impl HatState {
    pub fn from_directions(directions: impl IntoIterator<Item = HatDirection>) -> Self {
        Self(directions.into_iter().fold(0, |mask, d| mask | d.bit()))
    }

    pub fn is_pressed(&self, direction: HatDirection) -> bool {
        self.0 & direction.bit() != 0
    }

    fn with(self, direction: HatDirection) -> Self {
        Self(self.0 | direction.bit())
    }
}

/// Normalized snapshot of one device for one tick
///
/// Axes are clamped to `-1.0..=1.0` on construction and non-finite readings
/// become `0.0`. Components outside the device's range read as neutral.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct InputState {
    axes: Vec<f32>,
    buttons: BTreeSet<u8>,
    hats: Vec<HatState>,
}

impl InputState {
    pub fn new(
        axes: Vec<f32>,
        buttons: impl IntoIterator<Item = u8>,
        hats: Vec<HatState>,
    ) -> Self {
        Self {
            axes: axes.into_iter().map(normalize_axis).collect(),
            buttons: buttons.into_iter().collect(),
            hats,
        }
    }

    pub fn builder() -> InputStateBuilder {
        InputStateBuilder::default()
    }

    pub fn axis(&self, index: u8) -> f32 {
        self.axes.get(index as usize).copied().unwrap_or(0.0)
    }

    pub fn is_pressed(&self, button: u8) -> bool {
        self.buttons.contains(&button)
    }

    pub fn hat(&self, index: u8, direction: HatDirection) -> bool {
        self.hats
            .get(index as usize)
            .is_some_and(|hat| hat.is_pressed(direction))
    }

    pub fn axes(&self) -> &[f32] {
        &self.axes
    }

    pub fn hats(&self) -> &[HatState] {
        &self.hats
    }
}

fn normalize_axis(value: f32) -> f32 {
    if value.is_finite() {
        value.clamp(-1.0, 1.0)
    } else {
        0.0
    }
}

/// Incremental construction of an [`InputState`], mostly for scripted input
#[derive(Debug, Clone, Default)]
pub struct InputStateBuilder {
    axes: Vec<f32>,
    buttons: BTreeSet<u8>,
    hats: Vec<HatState>,
}

impl InputStateBuilder {
    pub fn axis(mut self, index: u8, value: f32) -> Self {
        let index = index as usize;
        if self.axes.len() <= index {
            self.axes.resize(index + 1, 0.0);
        }
        self.axes[index] = value;
        self
    }

    pub fn button(mut self, button: u8) -> Self {
        self.buttons.insert(button);
        self
    }

    pub fn hat(mut self, index: u8, direction: HatDirection) -> Self {
        let index = index as usize;
        if self.hats.len() <= index {
            self.hats.resize(index + 1, HatState::default());
        }
        self.hats[index] = self.hats[index].with(direction);
        self
    }

    pub fn build(self) -> InputState {
        InputState::new(self.axes, self.buttons, self.hats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn out_of_range_components_read_neutral() {
        let state = InputState::builder().axis(1, 0.4).button(2).build();
        assert_eq!(state.axis(0), 0.0);
        assert_eq!(state.axis(1), 0.4);
        assert_eq!(state.axis(9), 0.0);
        assert!(state.is_pressed(2));
        assert!(!state.is_pressed(3));
        assert!(!state.hat(0, HatDirection::Up));
    }

    #[test]
    fn axes_are_clamped_and_sanitized() {
        let state = InputState::new(vec![1.5, -3.0, f32::NAN], [], Vec::new());
        assert_eq!(state.axes(), &[1.0, -1.0, 0.0]);
    }

    #[test]
    fn diagonal_hat_presses_two_directions() {
        let state = InputState::builder()
            .hat(0, HatDirection::Up)
            .hat(0, HatDirection::Left)
            .build();
        assert!(state.hat(0, HatDirection::Up));
        assert!(state.hat(0, HatDirection::Left));
        assert!(!state.hat(0, HatDirection::Down));
    }
}
