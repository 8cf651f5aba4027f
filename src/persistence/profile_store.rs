//! Versioned TOML profile documents
//!
//! ```toml
//! format_version = 1
//! name = "Racing"
//! revision = 3
//!
//! [[modes]]
//! id = "default"
//!
//! [[modes.bindings]]
//! component = { axis = 0 }
//! action = { kind = "axis_to_axis", target = "x", curve = { deadzone = 0.1 } }
//! ```
//!
//! The version is checked before the document is decoded, so a document from
//! a newer build fails with [`ProfileError::UnsupportedVersion`] instead of an
//! unrelated field error.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::mapping::{Profile, ProfileError, PROFILE_FORMAT_VERSION};

const PROFILE_EXTENSION: &str = "toml";

#[derive(Deserialize)]
struct VersionHeader {
    format_version: Option<u32>,
}

/// Decodes a profile document
pub fn parse_profile(text: &str) -> Result<Profile, ProfileError> {
    let header: VersionHeader = toml::from_str(text)?;
    if header.format_version != Some(PROFILE_FORMAT_VERSION) {
        return Err(ProfileError::UnsupportedVersion {
            found: header.format_version,
            expected: PROFILE_FORMAT_VERSION,
        });
    }
    Ok(toml::from_str(text)?)
}

pub fn serialize_profile(profile: &Profile) -> Result<String, ProfileError> {
    Ok(toml::to_string_pretty(profile)?)
}

fn io_error(path: &Path, source: std::io::Error) -> ProfileError {
    ProfileError::Io {
        path: path.to_path_buf(),
        source,
    }
}

pub async fn load_profile(path: &Path) -> Result<Profile, ProfileError> {
    let text = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| io_error(path, e))?;
    let profile = parse_profile(&text)?;
    debug!(
        "Loaded profile '{}' (revision {}) from {}",
        profile.name,
        profile.revision,
        path.display()
    );
    Ok(profile)
}

pub async fn save_profile(path: &Path, profile: &Profile) -> Result<(), ProfileError> {
    let text = serialize_profile(profile)?;
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| io_error(parent, e))?;
    }
    tokio::fs::write(path, text)
        .await
        .map_err(|e| io_error(path, e))?;
    debug!("Saved profile '{}' to {}", profile.name, path.display());
    Ok(())
}

/// Directory of profile documents, one file per profile
#[derive(Debug, Clone)]
pub struct ProfileStore {
    root: PathBuf,
}

impl ProfileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// `<config dir>/controlmapper/profiles`
    pub fn default_location() -> Result<Self, ProfileError> {
        let mut root = dirs::config_dir().ok_or(ProfileError::NoConfigDir)?;
        root.push("controlmapper");
        root.push("profiles");
        Ok(Self::new(root))
    }

    /// File a profile called `name` is stored in
    ///
    /// Characters outside `[A-Za-z0-9_-]` are replaced with `_`.
    pub fn path_for(&self, name: &str) -> PathBuf {
        let mut stem: String = name
            .trim()
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        if stem.is_empty() {
            stem.push_str("profile");
        }
        self.root.join(format!("{}.{}", stem, PROFILE_EXTENSION))
    }

    /// File stems of all stored profiles, sorted
    pub async fn list(&self) -> Result<Vec<String>, ProfileError> {
        if !tokio::fs::try_exists(&self.root)
            .await
            .map_err(|e| io_error(&self.root, e))?
        {
            debug!("Profile directory {} does not exist", self.root.display());
            return Ok(Vec::new());
        }

        let mut names = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.root)
            .await
            .map_err(|e| io_error(&self.root, e))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| io_error(&self.root, e))?
        {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(PROFILE_EXTENSION) {
                continue;
            }
            match path.file_stem().and_then(|stem| stem.to_str()) {
                Some(stem) => names.push(stem.to_string()),
                None => warn!("Skipping profile file with odd name {}", path.display()),
            }
        }
        names.sort();
        Ok(names)
    }

    pub async fn load(&self, name: &str) -> Result<Profile, ProfileError> {
        load_profile(&self.path_for(name)).await
    }

    /// Stores `profile` under its own name and returns the file written
    pub async fn save(&self, profile: &Profile) -> Result<PathBuf, ProfileError> {
        let path = self.path_for(&profile.name);
        save_profile(&path, profile).await?;
        info!("Profile '{}' stored at {}", profile.name, path.display());
        Ok(path)
    }

    /// Returns `false` if there was nothing to delete
    pub async fn delete(&self, name: &str) -> Result<bool, ProfileError> {
        let path = self.path_for(name);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                info!("Profile '{}' deleted", name);
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(io_error(&path, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::{DeviceKey, HatDirection};
    use crate::mapping::{
        Action, Activation, AxisCurve, Binding, Component, Key, KeyStroke, MacroEvent, MacroStep,
        Mode, OutputTarget, OverlapPolicy, VirtualAxis,
    };

    fn sample() -> Profile {
        let mut profile = Profile::new(
            "Flight Sim",
            vec![
                Mode::new(
                    "default",
                    vec![
                        Binding::new(
                            Component::Axis(0),
                            Action::AxisToAxis {
                                target: VirtualAxis::X,
                                curve: AxisCurve {
                                    deadzone: 0.1,
                                    exponent: 2.0,
                                    ..Default::default()
                                },
                            },
                        ),
                        Binding::new(
                            Component::Hat {
                                index: 0,
                                direction: HatDirection::Up,
                            },
                            Action::ButtonToKey {
                                key: KeyStroke::with_modifiers(vec![Key::LeftCtrl], vec![Key::C]),
                                activation: Activation::OnPress,
                            },
                        )
                        .for_device(DeviceKey::new(0x044f, 0xb10a, 0)),
                        Binding::new(
                            Component::Button(3),
                            Action::Macro {
                                steps: vec![
                                    MacroStep {
                                        event: MacroEvent::Press(OutputTarget::Button(1)),
                                        delay_ms: 40,
                                    },
                                    MacroStep {
                                        event: MacroEvent::Release(OutputTarget::Button(1)),
                                        delay_ms: 0,
                                    },
                                ],
                                overlap: OverlapPolicy::Queue,
                                cadence: Default::default(),
                            },
                        ),
                    ],
                ),
                Mode::new(
                    "landing",
                    vec![Binding::new(
                        Component::Button(0),
                        Action::Chain {
                            stages: vec![
                                Action::ToggleButton {
                                    target: OutputTarget::Button(2),
                                },
                                Action::ButtonToButton {
                                    button: 4,
                                    activation: Activation::WhilePressed,
                                },
                            ],
                        },
                    )],
                ),
            ],
        );
        profile.revision = 3;
        profile
    }

    #[test]
    fn document_round_trips() {
        let profile = sample();
        let text = serialize_profile(&profile).unwrap();
        assert_eq!(parse_profile(&text).unwrap(), profile);
    }

    #[test]
    fn missing_or_foreign_version_is_rejected() {
        let missing = "name = \"x\"\nmodes = []\n";
        assert!(matches!(
            parse_profile(missing),
            Err(ProfileError::UnsupportedVersion { found: None, .. })
        ));
        let newer = "format_version = 99\nname = \"x\"\nmodes = []\n";
        assert!(matches!(
            parse_profile(newer),
            Err(ProfileError::UnsupportedVersion { found: Some(99), .. })
        ));
    }

    #[test]
    fn hand_written_document_parses() {
        let text = r#"
format_version = 1
name = "Desk"

[[modes]]
id = "default"

[[modes.bindings]]
component = { button = 0 }
action = { kind = "combo", stages = [{ kind = "toggle_button", target = { button = 1 } }] }

[[modes.bindings]]
device = { device = { vendor = 1118, product = 654 } }
component = { axis = 2 }
action = { kind = "axis_to_key", key = { keys = ["Space"] }, threshold = -0.5 }
"#;
        let profile = parse_profile(text).unwrap();
        assert_eq!(profile.revision, 0);
        assert_eq!(profile.modes[0].bindings.len(), 2);
        assert!(profile.validate().is_ok());
    }

    #[tokio::test]
    async fn store_lists_loads_and_deletes() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProfileStore::new(dir.path().join("profiles"));
        assert!(store.list().await.unwrap().is_empty());

        let profile = sample();
        let path = store.save(&profile).await.unwrap();
        assert_eq!(path.file_name().unwrap(), "Flight_Sim.toml");
        assert_eq!(store.list().await.unwrap(), vec!["Flight_Sim".to_string()]);
        assert_eq!(store.load("Flight Sim").await.unwrap(), profile);

        assert!(store.delete("Flight Sim").await.unwrap());
        assert!(!store.delete("Flight Sim").await.unwrap());
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unreadable_file_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        match load_profile(&missing).await {
            Err(ProfileError::Io { path, .. }) => assert_eq!(path, missing),
            other => panic!("expected io error, got {:?}", other.map(|p| p.name)),
        }
    }
}
