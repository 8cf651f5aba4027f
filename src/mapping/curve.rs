use serde::{Deserialize, Serialize};

fn one() -> f32 {
    1.0
}

fn minus_one() -> f32 {
    -1.0
}

/// Response curve of an axis-to-axis binding
///
/// Applied in this order: deadzone, sign-preserving exponent, scale, invert,
/// clamp to `[min, max]`. Input within `±deadzone` (inclusive) yields `0.0`.
///
/// # Examples
///
/// ```rust
/// use controlmapper::mapping::AxisCurve;
///
/// let curve = AxisCurve { deadzone: 0.1, ..Default::default() };
/// assert_eq!(curve.apply(0.05), 0.0);
/// assert_eq!(curve.apply(0.5), 0.5);
/// assert_eq!(curve.apply(-1.0), -1.0);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AxisCurve {
    #[serde(default)]
    pub deadzone: f32,
    #[serde(default = "one")]
    pub exponent: f32,
    #[serde(default = "one")]
    pub scale: f32,
    #[serde(default)]
    pub invert: bool,
    #[serde(default = "minus_one")]
    pub min: f32,
    #[serde(default = "one")]
    pub max: f32,
    /// Stretch `(deadzone, 1]` onto `(0, 1]` instead of passing the magnitude through
    #[serde(default)]
    pub rescale_deadzone: bool,
}

impl Default for AxisCurve {
    fn default() -> Self {
        Self {
            deadzone: 0.0,
            exponent: 1.0,
            scale: 1.0,
            invert: false,
            min: -1.0,
            max: 1.0,
            rescale_deadzone: false,
        }
    }
}

impl AxisCurve {
    pub fn apply(&self, value: f32) -> f32 {
        let magnitude = value.abs();
        if magnitude <= self.deadzone {
            return 0.0_f32.clamp(self.min, self.max);
        }

        let magnitude = if self.rescale_deadzone {
            (magnitude - self.deadzone) / (1.0 - self.deadzone)
        } else {
            magnitude
        };

        let mut shaped = value.signum() * magnitude.powf(self.exponent) * self.scale;
        if self.invert {
            shaped = -shaped;
        }
        shaped.clamp(self.min, self.max)
    }

    pub(crate) fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        let all_finite = [self.deadzone, self.exponent, self.scale, self.min, self.max]
            .iter()
            .all(|v| v.is_finite());
        if !all_finite {
            problems.push("curve parameters must be finite".to_string());
            return problems;
        }
        problems.extend(deadzone_problem(self.deadzone));
        problems.extend(exponent_problem(self.exponent));
        if self.min >= self.max {
            problems.push(format!(
                "clamp range is empty (min {} >= max {})",
                self.min, self.max
            ));
        }
        problems
    }
}

/// Deadzone plus exponent shaping for rate-style actions (cursor, scroll,
/// relative axes). The deadzone is always rescaled so movement starts at zero.
pub fn shape(value: f32, deadzone: f32, exponent: f32, invert: bool) -> f32 {
    let magnitude = value.abs();
    if magnitude <= deadzone {
        return 0.0;
    }
    let normalized = ((magnitude - deadzone) / (1.0 - deadzone)).min(1.0);
    let shaped = value.signum() * normalized.powf(exponent);
    if invert {
        -shaped
    } else {
        shaped
    }
}

pub(crate) fn deadzone_problem(deadzone: f32) -> Option<String> {
    if !deadzone.is_finite() || !(0.0..1.0).contains(&deadzone) {
        Some(format!("deadzone {} is outside [0, 1)", deadzone))
    } else {
        None
    }
}

pub(crate) fn exponent_problem(exponent: f32) -> Option<String> {
    if !exponent.is_finite() || exponent <= 0.0 {
        Some(format!("exponent {} must be greater than 0", exponent))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn curve(deadzone: f32, exponent: f32) -> AxisCurve {
        AxisCurve {
            deadzone,
            exponent,
            ..Default::default()
        }
    }

    #[test]
    fn deadzone_boundary_is_inclusive() {
        let c = curve(0.1, 1.0);
        assert_eq!(c.apply(0.1), 0.0);
        assert_eq!(c.apply(-0.1), 0.0);
        assert!(c.apply(0.1 + f32::EPSILON * 4.0) > 0.0);
        assert!(c.apply(-0.1 - f32::EPSILON * 4.0) < 0.0);
    }

    #[test]
    fn linear_curve_passes_magnitude_through() {
        let c = curve(0.1, 1.0);
        assert_eq!(c.apply(0.05), 0.0);
        assert_eq!(c.apply(0.5), 0.5);
        assert_eq!(c.apply(-1.0), -1.0);
    }

    #[test]
    fn exponent_preserves_sign() {
        let c = curve(0.0, 2.0);
        assert_relative_eq!(c.apply(0.5), 0.25);
        assert_relative_eq!(c.apply(-0.5), -0.25);
    }

    #[test]
    fn rescaled_deadzone_starts_at_zero() {
        let c = AxisCurve {
            deadzone: 0.2,
            rescale_deadzone: true,
            ..Default::default()
        };
        assert_relative_eq!(c.apply(0.6), 0.5);
        assert_relative_eq!(c.apply(1.0), 1.0);
    }

    #[test]
    fn scale_invert_and_clamp() {
        let c = AxisCurve {
            scale: 2.0,
            invert: true,
            min: -0.5,
            max: 0.75,
            ..Default::default()
        };
        assert_relative_eq!(c.apply(0.2), -0.4);
        assert_relative_eq!(c.apply(0.9), -0.5);
        assert_relative_eq!(c.apply(-0.9), 0.75);
    }

    #[test]
    fn output_stays_in_range_and_is_monotonic() {
        let curves = [
            curve(0.0, 1.0),
            curve(0.15, 0.5),
            curve(0.3, 3.0),
            AxisCurve {
                deadzone: 0.05,
                exponent: 1.7,
                scale: 1.8,
                min: -0.6,
                max: 0.9,
                ..Default::default()
            },
            AxisCurve {
                deadzone: 0.25,
                exponent: 2.2,
                rescale_deadzone: true,
                invert: true,
                ..Default::default()
            },
        ];

        for c in &curves {
            let mut previous = 0.0_f32;
            for step in 0..=200 {
                let input = step as f32 / 200.0;
                let out = c.apply(input);
                assert!(out >= c.min && out <= c.max, "{:?} at {}", c, input);
                let magnitude = out.abs();
                if input > c.deadzone {
                    assert!(magnitude + 1e-6 >= previous, "{:?} at {}", c, input);
                }
                previous = magnitude;

                let mirrored = c.apply(-input);
                assert!(mirrored >= c.min && mirrored <= c.max);
            }
        }
    }

    #[test]
    fn invalid_parameters_are_reported() {
        assert!(curve(1.0, 1.0).problems().len() == 1);
        assert!(curve(0.1, 0.0).problems().len() == 1);
        assert!(curve(f32::NAN, 1.0).problems().len() == 1);
        let empty = AxisCurve {
            min: 0.5,
            max: 0.5,
            ..Default::default()
        };
        assert_eq!(empty.problems().len(), 1);
        assert!(curve(0.1, 2.0).problems().is_empty());
    }

    #[test]
    fn shape_rescales_outside_deadzone() {
        assert_eq!(shape(0.1, 0.1, 1.0, false), 0.0);
        assert_relative_eq!(shape(0.55, 0.1, 1.0, false), 0.5);
        assert_relative_eq!(shape(-1.0, 0.1, 1.0, true), 1.0);
    }
}
