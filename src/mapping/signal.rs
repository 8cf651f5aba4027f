/// Value of one input component, or of a chain stage's result
///
/// Digital signals read as `1.0`/`0.0` when used as analog; analog signals
/// count as active from a magnitude of `0.5` when used as digital.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Signal {
    Digital(bool),
    Analog(f32),
}

pub const ANALOG_ACTIVE_THRESHOLD: f32 = 0.5;

impl Signal {
    pub fn value(self) -> f32 {
        match self {
            Signal::Digital(true) => 1.0,
            Signal::Digital(false) => 0.0,
            Signal::Analog(v) => v,
        }
    }

    pub fn is_active(self) -> bool {
        match self {
            Signal::Digital(pressed) => pressed,
            Signal::Analog(v) => v.abs() >= ANALOG_ACTIVE_THRESHOLD,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversions_between_digital_and_analog() {
        assert_eq!(Signal::Digital(true).value(), 1.0);
        assert_eq!(Signal::Digital(false).value(), 0.0);
        assert!(Signal::Analog(-0.5).is_active());
        assert!(!Signal::Analog(0.49).is_active());
    }
}
