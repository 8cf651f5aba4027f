//! Keyboard keys that actions can synthesize
//!
//! Codes are Linux input-event codes, which the uinput and D-Bus sinks use
//! directly.

use serde::{Deserialize, Serialize};

macro_rules! keys {
    ($($name:ident = $code:literal, $evdev:literal;)*) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub enum Key {
            $($name,)*
        }

        impl Key {
            pub const ALL: &'static [Key] = &[$(Key::$name,)*];

            /// Linux input-event code
            pub fn code(self) -> u16 {
                match self {
                    $(Key::$name => $code,)*
                }
            }

            /// Kernel constant name, e.g. `KEY_A`
            pub fn evdev_name(self) -> &'static str {
                match self {
                    $(Key::$name => $evdev,)*
                }
            }
        }
    };
}

keys! {
    Esc = 1, "KEY_ESC";
    Num1 = 2, "KEY_1";
    Num2 = 3, "KEY_2";
    Num3 = 4, "KEY_3";
    Num4 = 5, "KEY_4";
    Num5 = 6, "KEY_5";
    Num6 = 7, "KEY_6";
    Num7 = 8, "KEY_7";
    Num8 = 9, "KEY_8";
    Num9 = 10, "KEY_9";
    Num0 = 11, "KEY_0";
    Minus = 12, "KEY_MINUS";
    Equal = 13, "KEY_EQUAL";
    Backspace = 14, "KEY_BACKSPACE";
    Tab = 15, "KEY_TAB";
    Q = 16, "KEY_Q";
    W = 17, "KEY_W";
    E = 18, "KEY_E";
    R = 19, "KEY_R";
    T = 20, "KEY_T";
    Y = 21, "KEY_Y";
    U = 22, "KEY_U";
    I = 23, "KEY_I";
    O = 24, "KEY_O";
    P = 25, "KEY_P";
    LeftBrace = 26, "KEY_LEFTBRACE";
    RightBrace = 27, "KEY_RIGHTBRACE";
    Enter = 28, "KEY_ENTER";
    LeftCtrl = 29, "KEY_LEFTCTRL";
    A = 30, "KEY_A";
    S = 31, "KEY_S";
    D = 32, "KEY_D";
    F = 33, "KEY_F";
    G = 34, "KEY_G";
    H = 35, "KEY_H";
    J = 36, "KEY_J";
    K = 37, "KEY_K";
    L = 38, "KEY_L";
    Semicolon = 39, "KEY_SEMICOLON";
    Apostrophe = 40, "KEY_APOSTROPHE";
    Grave = 41, "KEY_GRAVE";
    LeftShift = 42, "KEY_LEFTSHIFT";
    Backslash = 43, "KEY_BACKSLASH";
    Z = 44, "KEY_Z";
    X = 45, "KEY_X";
    C = 46, "KEY_C";
    V = 47, "KEY_V";
    B = 48, "KEY_B";
    N = 49, "KEY_N";
    M = 50, "KEY_M";
    Comma = 51, "KEY_COMMA";
    Dot = 52, "KEY_DOT";
    Slash = 53, "KEY_SLASH";
    RightShift = 54, "KEY_RIGHTSHIFT";
    KpAsterisk = 55, "KEY_KPASTERISK";
    LeftAlt = 56, "KEY_LEFTALT";
    Space = 57, "KEY_SPACE";
    CapsLock = 58, "KEY_CAPSLOCK";
    F1 = 59, "KEY_F1";
    F2 = 60, "KEY_F2";
    F3 = 61, "KEY_F3";
    F4 = 62, "KEY_F4";
    F5 = 63, "KEY_F5";
    F6 = 64, "KEY_F6";
    F7 = 65, "KEY_F7";
    F8 = 66, "KEY_F8";
    F9 = 67, "KEY_F9";
    F10 = 68, "KEY_F10";
    NumLock = 69, "KEY_NUMLOCK";
    ScrollLock = 70, "KEY_SCROLLLOCK";
    F11 = 87, "KEY_F11";
    F12 = 88, "KEY_F12";
    RightCtrl = 97, "KEY_RIGHTCTRL";
    RightAlt = 100, "KEY_RIGHTALT";
    Home = 102, "KEY_HOME";
    Up = 103, "KEY_UP";
    PageUp = 104, "KEY_PAGEUP";
    Left = 105, "KEY_LEFT";
    Right = 106, "KEY_RIGHT";
    End = 107, "KEY_END";
    Down = 108, "KEY_DOWN";
    PageDown = 109, "KEY_PAGEDOWN";
    Insert = 110, "KEY_INSERT";
    Delete = 111, "KEY_DELETE";
    Mute = 113, "KEY_MUTE";
    VolumeDown = 114, "KEY_VOLUMEDOWN";
    VolumeUp = 115, "KEY_VOLUMEUP";
    Pause = 119, "KEY_PAUSE";
    LeftMeta = 125, "KEY_LEFTMETA";
    RightMeta = 126, "KEY_RIGHTMETA";
    NextSong = 163, "KEY_NEXTSONG";
    PlayPause = 164, "KEY_PLAYPAUSE";
    PreviousSong = 165, "KEY_PREVIOUSSONG";
}

impl Key {
    pub fn is_modifier(self) -> bool {
        matches!(
            self,
            Key::LeftCtrl
                | Key::RightCtrl
                | Key::LeftShift
                | Key::RightShift
                | Key::LeftAlt
                | Key::RightAlt
                | Key::LeftMeta
                | Key::RightMeta
        )
    }
}

/// A key combination, e.g. `Ctrl+Shift+T`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct KeyStroke {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub modifiers: Vec<Key>,
    #[serde(default)]
    pub keys: Vec<Key>,
}

impl KeyStroke {
    pub fn key(key: Key) -> Self {
        Self {
            modifiers: Vec::new(),
            keys: vec![key],
        }
    }

    pub fn with_modifiers(modifiers: Vec<Key>, keys: Vec<Key>) -> Self {
        Self { modifiers, keys }
    }

    pub fn is_empty(&self) -> bool {
        self.modifiers.is_empty() && self.keys.is_empty()
    }

    /// Every key held while the stroke is active
    pub fn all_keys(&self) -> impl Iterator<Item = Key> + '_ {
        self.modifiers.iter().chain(self.keys.iter()).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_unique() {
        let mut codes: Vec<u16> = Key::ALL.iter().map(|k| k.code()).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), Key::ALL.len());
    }

    #[test]
    fn modifiers_are_recognized() {
        assert!(Key::LeftShift.is_modifier());
        assert!(Key::RightMeta.is_modifier());
        assert!(!Key::A.is_modifier());
        assert_eq!(Key::A.evdev_name(), "KEY_A");
        assert_eq!(Key::Space.code(), 57);
    }
}
