mod common;

use approx::assert_relative_eq;
use common::{axis, backend, single_mode, test_config, Rig};
use controlmapper::controller::scripted::scripted_pad;
use controlmapper::controller::ScriptedInput;
use controlmapper::engine::{EngineError, EngineEventKind, EngineHandle};
use controlmapper::mapping::{
    Action, Activation, AxisCurve, Binding, Component, Key, KeyStroke, LockKey, MacroCadence,
    MacroEvent, MacroStep, Mode, OutputTarget, OverlapPolicy, PointerAxis, Profile, ProfileError,
    Timing, VirtualAxis,
};
use controlmapper::output::RecordingProvider;
use controlmapper::persistence::ProfileStore;

fn everything() -> Profile {
    let mut profile = Profile::new(
        "Everything",
        vec![
            Mode::new(
                "default",
                vec![
                    Binding::new(
                        Component::Axis(0),
                        Action::AxisToAxis {
                            target: VirtualAxis::Rx,
                            curve: AxisCurve {
                                deadzone: 0.05,
                                exponent: 1.5,
                                invert: true,
                                ..AxisCurve::default()
                            },
                        },
                    ),
                    Binding::new(
                        Component::Axis(2),
                        Action::CursorAxis {
                            axis: PointerAxis::X,
                            deadzone: 0.1,
                            exponent: 2.0,
                            max_speed: 900.0,
                            invert: false,
                        },
                    ),
                    Binding::new(
                        Component::Button(4),
                        Action::LongPress {
                            threshold_ms: 400,
                            short: OutputTarget::Button(5),
                            long: OutputTarget::Key(KeyStroke::key(Key::Esc)),
                        },
                    ),
                    Binding::new(
                        Component::Button(6),
                        Action::Macro {
                            steps: vec![
                                MacroStep {
                                    event: MacroEvent::Press(OutputTarget::Key(KeyStroke::key(
                                        Key::Enter,
                                    ))),
                                    delay_ms: 20,
                                },
                                MacroStep {
                                    event: MacroEvent::Release(OutputTarget::Key(
                                        KeyStroke::key(Key::Enter),
                                    )),
                                    delay_ms: 0,
                                },
                            ],
                            overlap: OverlapPolicy::Restart,
                            cadence: MacroCadence::default(),
                        },
                    ),
                    Binding::new(
                        Component::Button(7),
                        Action::ModeSwitch {
                            mode: "alt".into(),
                            toggle: true,
                        },
                    ),
                ],
            ),
            Mode::new(
                "alt",
                vec![
                    Binding::new(
                        Component::Button(0),
                        Action::Cycle {
                            targets: vec![OutputTarget::Button(0), OutputTarget::Button(1)],
                        },
                    ),
                    Binding::new(
                        Component::Button(1),
                        Action::ButtonToCursor {
                            axis: PointerAxis::Y,
                            speed: -400.0,
                        },
                    ),
                    Binding::new(
                        Component::Button(2),
                        Action::ButtonToScroll {
                            clicks_per_second: 12.0,
                        },
                    ),
                    Binding::new(
                        Component::Button(3),
                        Action::Timed {
                            timing: Timing {
                                delay_ms: 150,
                                min_active_ms: 0,
                                max_active_ms: 0,
                            },
                            action: Box::new(Action::ButtonToLockKey {
                                key: LockKey::NumLock,
                                on: false,
                            }),
                        },
                    ),
                ],
            ),
        ],
    );
    profile.revision = 7;
    profile
}

#[tokio::test]
async fn stored_profiles_load_back_unchanged() {
    let dir = tempfile::tempdir().unwrap();
    let store = ProfileStore::new(dir.path());
    let profile = everything();
    assert!(profile.validate().is_ok());

    store.save(&profile).await.unwrap();
    assert_eq!(store.load("Everything").await.unwrap(), profile);
}

#[tokio::test]
async fn engine_starts_from_a_profile_file() {
    let dir = tempfile::tempdir().unwrap();
    let store = ProfileStore::new(dir.path());
    let path = store
        .save(&single_mode(
            "from disk",
            vec![Binding::new(
                Component::Axis(0),
                Action::AxisToAxis {
                    target: VirtualAxis::Z,
                    curve: AxisCurve::default(),
                },
            )],
        ))
        .await
        .unwrap();

    let input = ScriptedInput::new();
    input.add_device(scripted_pad(0, 1, 2));
    let provider = RecordingProvider::new();
    let recorder = provider.recorder();
    let mut engine = EngineHandle::new(test_config()).unwrap();
    engine
        .start(&path, backend(&input), Box::new(provider))
        .await
        .unwrap();
    assert_eq!(engine.active_profile().unwrap().name, "from disk");

    input.set_state(common::PAD, axis(0, 0.25));
    common::wait_until(|| recorder.state().axis(VirtualAxis::Z) != 0.0).await;
    assert_relative_eq!(recorder.state().axis(VirtualAxis::Z), 0.25);

    engine.stop().await.unwrap();
}

#[tokio::test]
async fn switching_to_a_foreign_version_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("future.toml");
    tokio::fs::write(
        &path,
        "format_version = 2\nname = \"future\"\n\n[[modes]]\nid = \"default\"\n",
    )
    .await
    .unwrap();

    let mut rig = Rig::start(single_mode("current", Vec::new())).await;
    let mut events = rig.engine.subscribe();

    let result = rig.engine.switch_profile(&path).await;
    assert!(matches!(
        result,
        Err(EngineError::Profile(ProfileError::UnsupportedVersion {
            found: Some(2),
            ..
        }))
    ));
    assert_eq!(rig.engine.active_profile().unwrap().name, "current");
    rig.settle().await;
    let activated = std::iter::from_fn(|| events.try_recv().ok())
        .any(|event| matches!(event.kind, EngineEventKind::ProfileActivated { .. }));
    assert!(!activated);

    rig.engine.stop().await.unwrap();
}

#[tokio::test]
async fn switching_profiles_from_disk_reports_activation() {
    let dir = tempfile::tempdir().unwrap();
    let store = ProfileStore::new(dir.path());
    let mut next = single_mode(
        "next",
        vec![Binding::new(
            Component::Button(0),
            Action::ButtonToButton {
                button: 0,
                activation: Activation::WhilePressed,
            },
        )],
    );
    next.revision = 2;
    let path = store.save(&next).await.unwrap();

    let mut rig = Rig::start(single_mode("first", Vec::new())).await;
    let mut events = rig.engine.subscribe();
    rig.engine.switch_profile(&path).await.unwrap();

    let activated: Vec<_> = std::iter::from_fn(|| events.try_recv().ok())
        .filter_map(|event| match event.kind {
            EngineEventKind::ProfileActivated { name, revision } => Some((name, revision)),
            _ => None,
        })
        .collect();
    assert_eq!(activated, vec![("next".to_string(), 2)]);

    rig.engine.stop().await.unwrap();
}
