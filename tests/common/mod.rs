#![allow(dead_code)]

use std::time::Duration;

use controlmapper::config::EngineConfig;
use controlmapper::controller::scripted::scripted_pad;
use controlmapper::controller::{DeviceBackend, DeviceId, InputState, ScriptedInput};
use controlmapper::engine::{BackendFactory, EngineHandle};
use controlmapper::mapping::{Binding, Mode, OutputState, Profile};
use controlmapper::output::{Recorder, RecordingProvider};

pub const PAD: DeviceId = DeviceId(0);

pub fn single_mode(name: &str, bindings: Vec<Binding>) -> Profile {
    Profile::new(name, vec![Mode::new("default", bindings)])
}

pub fn test_config() -> EngineConfig {
    EngineConfig {
        tick_interval_ms: 5,
        poll_timeout_ms: 1,
        inhibit_screensaver: false,
        ..EngineConfig::default()
    }
}

/// Running engine with one scripted pad plugged in
pub struct Rig {
    pub engine: EngineHandle,
    pub input: ScriptedInput,
    pub recorder: Recorder,
}

impl Rig {
    pub async fn start(profile: Profile) -> Self {
        let input = ScriptedInput::new();
        input.add_device(scripted_pad(0, 0x045e, 0x028e));
        let provider = RecordingProvider::new();
        let recorder = provider.recorder();

        let mut engine = EngineHandle::new(test_config()).unwrap();
        engine
            .start_with_profile(profile, backend(&input), Box::new(provider))
            .await
            .unwrap();

        Self {
            engine,
            input,
            recorder,
        }
    }

    /// Sets the pad state and waits until the engine has ticked over it
    pub async fn feed(&self, state: InputState) {
        self.input.set_state(PAD, state);
        self.settle().await;
    }

    /// Waits for a few complete ticks
    pub async fn settle(&self) {
        let start = self.recorder.frames();
        wait_until(|| self.recorder.frames() >= start + 3).await;
    }

    pub fn output(&self) -> OutputState {
        self.recorder.state()
    }
}

pub fn backend(input: &ScriptedInput) -> BackendFactory {
    let input = input.clone();
    Box::new(move || Ok(Box::new(input.backend()) as Box<dyn DeviceBackend>))
}

pub fn pressed(buttons: &[u8]) -> InputState {
    buttons
        .iter()
        .fold(InputState::builder(), |builder, button| builder.button(*button))
        .build()
}

pub fn axis(index: u8, value: f32) -> InputState {
    InputState::builder().axis(index, value).build()
}

pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached within 5s"
        );
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
}
