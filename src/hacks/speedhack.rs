//! # Speedhack
//!
//! Scales the time the host's scheduler sees each frame, and optionally the audio pitch along with it. Unlike
//! toggles this doesn't patch opcodes: it hooks the scheduler update once in late init and from then on only
//! changes the values the detour reads.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::component::EmbeddedHackComponent;
use crate::hack::{FrameContext, Hack, InitContext, LateInitContext};
use crate::hook::scheduler::{SchedulerInterceptor, TimeScale};
use crate::keybind::Keybind;
use crate::opcode::CodeTarget;
use crate::settings::{self, lenient};
use crate::ui::{self, Ui};

/// Id of the hack, also its settings key
pub const SPEEDHACK_ID: &str = "speedhack";

/// Window the speedhack is embedded in
const WINDOW: &str = "Global";

/// Label of the speedhack's button and window
const TITLE: &str = "Speedhack";

/// External audio engine whose playback pitch follows the speed
pub trait AudioPitch {
    /// Plays audio at `pitch` times its normal rate
    fn set_pitch(&mut self, pitch: f32);
}

/// State shared with the scheduler detour
#[derive(Debug)]
pub struct SpeedControl {
    /// Whether time is scaled at all
    enabled: AtomicBool,
    /// `f32` bits
    speed: AtomicU32,
}

impl SpeedControl {
    /// Disabled, at normal speed
    pub fn new() -> Self {
        Self {
            enabled: AtomicBool::new(false),
            speed: AtomicU32::new(1.0f32.to_bits()),
        }
    }

    /// Publishes new values to the detour
    pub fn set(&self, enabled: bool, speed: f32) {
        self.speed.store(speed.to_bits(), Ordering::Relaxed);
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    /// Current factor
    pub fn speed(&self) -> f32 {
        f32::from_bits(self.speed.load(Ordering::Relaxed))
    }

    /// Whether time is currently scaled
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }
}

impl Default for SpeedControl {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeScale for SpeedControl {
    fn scale(&self, dt: f32) -> f32 {
        if self.is_enabled() {
            dt * self.speed()
        } else {
            dt
        }
    }
}

/// Persisted speedhack state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeedhackRecord {
    /// Whether time is scaled
    #[serde(default, deserialize_with = "lenient")]
    pub enabled: bool,
    /// Whether the audio pitch follows the speed
    #[serde(default, deserialize_with = "lenient")]
    pub audio: bool,
    /// Time factor
    #[serde(default = "default_speed", deserialize_with = "lenient_speed")]
    pub speed: f32,
    /// Key code that flips `enabled`
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub keybind: Option<u32>,
}

/// Normal speed
fn default_speed() -> f32 {
    1.0
}

/// Like [`lenient`], but a bad speed falls back to 1.0 instead of 0.0
fn lenient_speed<'de, D: serde::Deserializer<'de>>(deserializer: D) -> Result<f32, D::Error> {
    let speed: Option<f32> = lenient(deserializer)?;
    Ok(speed.unwrap_or_else(default_speed))
}

impl Default for SpeedhackRecord {
    fn default() -> Self {
        Self {
            enabled: false,
            audio: false,
            speed: default_speed(),
            keybind: None,
        }
    }
}

/// Adjustable game speed
pub struct Speedhack {
    /// Whether time is scaled
    enabled: bool,
    /// Whether the audio pitch follows the speed
    audio: bool,
    /// Time factor
    speed: f32,
    /// Key code that flips `enabled`
    keybind: Option<u32>,
    /// Where the scheduler update lives
    target: CodeTarget,
    /// Resolved during init
    address: Option<usize>,
    /// Copy of `enabled` and `speed` the detour reads
    control: Arc<SpeedControl>,
    /// Installs the scheduler hook in late init
    interceptor: Box<dyn SchedulerInterceptor>,
    /// Receives pitch changes, if the host has an audio engine
    audio_engine: Option<Box<dyn AudioPitch>>,
    /// Last pitch pushed to the audio engine
    last_pitch: Option<f32>,
}

impl Speedhack {
    /// Speedhack hooking the scheduler update at `target` through `interceptor`
    pub fn new(
        target: CodeTarget,
        interceptor: Box<dyn SchedulerInterceptor>,
        audio_engine: Option<Box<dyn AudioPitch>>,
    ) -> Self {
        Self {
            enabled: false,
            audio: false,
            speed: default_speed(),
            keybind: None,
            target,
            address: None,
            control: Arc::new(SpeedControl::new()),
            interceptor,
            audio_engine,
            last_pitch: None,
        }
    }

    /// Whether time is scaled
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Turns time scaling on or off
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
        self.sync();
    }

    /// Time factor
    pub fn speed(&self) -> f32 {
        self.speed
    }

    /// Sets the speed factor. Negative and non-finite factors are ignored.
    pub fn set_speed(&mut self, speed: f32) -> bool {
        if !speed.is_finite() || speed < 0.0 {
            warn!(speed, "ignoring invalid speed");
            return false;
        }
        self.speed = speed;
        self.sync();
        true
    }

    /// Whether the audio pitch follows the speed
    pub fn audio(&self) -> bool {
        self.audio
    }

    /// Makes the audio pitch follow the speed, or not
    pub fn set_audio(&mut self, audio: bool) {
        self.audio = audio;
    }

    /// Values the scheduler detour reads
    pub fn control(&self) -> &Arc<SpeedControl> {
        &self.control
    }

    /// Whether the scheduler is hooked
    pub fn is_hooked(&self) -> bool {
        self.interceptor.is_installed()
    }

    /// Pushes `enabled` and `speed` to the detour
    fn sync(&self) {
        self.control.set(self.enabled, self.speed);
    }

    /// Pitch the audio engine should play at
    fn pitch(&self) -> f32 {
        if self.enabled && self.audio {
            self.speed
        } else {
            1.0
        }
    }

    /// Toggle button with a popup holding the speed and audio settings
    fn draw_settings(&mut self, ui: &mut dyn Ui, search: &str) {
        if ui.toggle_button(TITLE, self.enabled, ui::matches_search(TITLE, search)) {
            self.set_enabled(!self.enabled);
        }
        if ui.begin_popup("speedhack_settings") {
            let mut speed = self.speed;
            if ui.input_float("Speed", &mut speed) {
                self.set_speed(speed);
            }
            let mut audio = self.audio;
            if ui.checkbox("Speedhack Audio", &mut audio) {
                self.set_audio(audio);
            }
            ui.end_popup();
        }
    }
}

impl Hack for Speedhack {
    fn id(&self) -> &str {
        SPEEDHACK_ID
    }

    fn init(&mut self, ctx: &mut InitContext<'_>) {
        match ctx.catalog().locate(&self.target) {
            Ok(address) => self.address = Some(address),
            Err(e) => warn!(error = %e, "scheduler update not found, speedhack disabled"),
        }
        if let Err(e) = ctx.add_component(WINDOW, EmbeddedHackComponent::new(SPEEDHACK_ID)) {
            warn!(error = %e, "unable to embed speedhack");
        }
    }

    fn late_init(&mut self, _ctx: &mut LateInitContext<'_>) {
        self.sync();
        let Some(address) = self.address else {
            return;
        };
        let scale: Arc<dyn TimeScale> = self.control.clone();
        if let Err(e) = self.interceptor.install(address, scale) {
            warn!(error = %e, "unable to hook the scheduler");
        }
    }

    fn update(&mut self, _ctx: &mut FrameContext<'_>) {
        let pitch = self.pitch();
        if self.last_pitch == Some(pitch) {
            return;
        }
        if let Some(audio) = &mut self.audio_engine {
            audio.set_pitch(pitch);
            debug!(pitch, "audio pitch changed");
        }
        self.last_pitch = Some(pitch);
    }

    fn draw(&mut self, ui: &mut dyn Ui, embedded: bool, search: &str) {
        if embedded {
            self.draw_settings(ui, search);
            return;
        }
        if ui.begin_window(TITLE) {
            self.draw_settings(ui, search);
        }
        ui.end_window();
    }

    fn load(&mut self, record: &Value) {
        let record: SpeedhackRecord =
            settings::read_record(SPEEDHACK_ID, Some(record).filter(|r| !r.is_null()));
        self.enabled = record.enabled;
        self.audio = record.audio;
        self.keybind = record.keybind;
        if !self.set_speed(record.speed) {
            self.speed = default_speed();
        }
        self.sync();
    }

    fn save(&self) -> Value {
        settings::write_record(
            SPEEDHACK_ID,
            &SpeedhackRecord {
                enabled: self.enabled,
                audio: self.audio,
                speed: self.speed,
                keybind: self.keybind,
            },
        )
    }

    fn load_keybind(&self) -> Option<Keybind> {
        self.keybind.map(|key| Keybind::new(SPEEDHACK_ID, key))
    }

    fn on_keybind(&mut self) -> bool {
        self.set_enabled(!self.enabled);
        true
    }

    fn is_cheating(&self) -> bool {
        self.enabled && self.speed != 1.0
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use serde_json::json;

    use super::*;
    use crate::config::Config;
    use crate::hook::{HookError, ProcessHookError};
    use crate::module::{Module, ModuleTable};
    use crate::patcher::image::MemoryImage;
    use crate::registry::HackRegistry;
    use crate::settings::Settings;

    const BASE: usize = 0x400000;

    /// Records installs instead of hooking anything
    #[derive(Default, Clone)]
    struct FakeInterceptor {
        installed: Rc<RefCell<Option<(usize, Arc<dyn TimeScale>)>>>,
        fail: bool,
    }

    impl SchedulerInterceptor for FakeInterceptor {
        fn install(&mut self, target: usize, scale: Arc<dyn TimeScale>) -> Result<(), ProcessHookError> {
            if self.fail {
                return Err(HookError::Decode(target as u64));
            }
            *self.installed.borrow_mut() = Some((target, scale));
            Ok(())
        }

        fn uninstall(&mut self) {
            self.installed.borrow_mut().take();
        }

        fn is_installed(&self) -> bool {
            self.installed.borrow().is_some()
        }
    }

    #[derive(Default, Clone)]
    struct FakeAudio(Rc<RefCell<Vec<f32>>>);

    impl AudioPitch for FakeAudio {
        fn set_pitch(&mut self, pitch: f32) {
            self.0.borrow_mut().push(pitch);
        }
    }

    fn speedhack() -> Speedhack {
        Speedhack::new(
            CodeTarget::at("game.exe", 0x40),
            Box::new(FakeInterceptor::default()),
            None,
        )
    }

    fn registry(interceptor: FakeInterceptor, audio: FakeAudio) -> HackRegistry {
        let mut image = MemoryImage::new();
        image.map(BASE, vec![0xcc; 0x100]);
        let modules = ModuleTable::new().with(Module::new("game.exe", BASE, 0x100));
        let mut registry = HackRegistry::new(Box::new(image), Box::new(modules), Config::default());
        registry
            .register_hack(Box::new(Speedhack::new(
                CodeTarget::at("game.exe", 0x40),
                Box::new(interceptor),
                Some(Box::new(audio)),
            )))
            .unwrap();
        registry
    }

    /// Clicks the speedhack button and records how it was highlighted
    #[derive(Default)]
    struct ClickUi {
        highlighted: Vec<bool>,
    }

    impl Ui for ClickUi {
        fn begin_window(&mut self, _title: &str) -> bool {
            true
        }
        fn end_window(&mut self) {}
        fn text(&mut self, _text: &str) {}
        fn tooltip(&mut self, _text: &str) {}
        fn button(&mut self, _label: &str) -> bool {
            false
        }
        fn checkbox(&mut self, _label: &str, _value: &mut bool) -> bool {
            false
        }
        fn input_float(&mut self, _label: &str, _value: &mut f32) -> bool {
            false
        }
        fn toggle_button(&mut self, _label: &str, _value: bool, highlighted: bool) -> bool {
            self.highlighted.push(highlighted);
            true
        }
        fn begin_popup(&mut self, _id: &str) -> bool {
            false
        }
        fn end_popup(&mut self) {}
    }

    #[test]
    /// The button follows the search filter like toggles do, and a click flips the speedhack
    fn test_draw_follows_search() {
        let mut hack = speedhack();
        let mut ui = ClickUi::default();

        hack.draw(&mut ui, true, "speed");
        assert!(hack.is_enabled());
        hack.draw(&mut ui, true, "noclip");
        assert!(!hack.is_enabled());
        hack.draw(&mut ui, false, "");
        assert!(hack.is_enabled());

        assert_eq!(ui.highlighted, [true, false, true]);
    }

    #[test]
    fn test_is_cheating() {
        let mut hack = speedhack();
        assert!(!hack.is_cheating());

        hack.set_speed(2.0);
        assert!(!hack.is_cheating());

        hack.set_enabled(true);
        hack.set_speed(1.0);
        assert!(!hack.is_cheating());

        hack.set_speed(2.0);
        assert!(hack.is_cheating());
    }

    #[test]
    fn test_rejects_invalid_speed() {
        let mut hack = speedhack();
        hack.set_speed(0.5);
        assert!(!hack.set_speed(-1.0));
        assert!(!hack.set_speed(f32::NAN));
        assert!(!hack.set_speed(f32::INFINITY));
        assert_eq!(hack.speed(), 0.5);
    }

    #[test]
    /// The detour sees the current state without the hack being involved
    fn test_time_scale() {
        let mut hack = speedhack();
        let control = hack.control().clone();
        hack.set_speed(2.0);
        assert_eq!(control.scale(0.25), 0.25);

        hack.set_enabled(true);
        assert_eq!(control.scale(0.25), 0.5);

        hack.on_keybind();
        assert!(!hack.is_enabled());
        assert_eq!(control.scale(0.25), 0.25);
    }

    #[test]
    fn test_hooked_in_late_init() {
        let interceptor = FakeInterceptor::default();
        let mut registry = registry(interceptor.clone(), FakeAudio::default());
        registry.start(&Settings::new());

        let installed = interceptor.installed.borrow();
        let (target, scale) = installed.as_ref().unwrap();
        assert_eq!(*target, BASE + 0x40);
        assert_eq!(scale.scale(1.0), 1.0);
        assert!(registry.windows().iter().any(|w| w.embeds(SPEEDHACK_ID)));
    }

    #[test]
    fn test_hook_failure_is_not_fatal() {
        let interceptor = FakeInterceptor {
            fail: true,
            ..Default::default()
        };
        let mut registry = registry(interceptor, FakeAudio::default());
        registry.start(&Settings::new());

        let hack = registry.find_hack::<Speedhack>(SPEEDHACK_ID).unwrap();
        assert!(!hack.is_hooked());
    }

    #[test]
    fn test_save_load() {
        let audio = FakeAudio::default();
        let mut registry = registry(FakeInterceptor::default(), audio.clone());
        let settings = Settings::from_value(json!({
            "Global": {
                "speedhack": { "enabled": true, "audio": true, "speed": 0.5, "keybind": 0x70 }
            }
        }))
        .unwrap();
        registry.start(&settings);

        let hack = registry.find_hack::<Speedhack>(SPEEDHACK_ID).unwrap();
        assert!(hack.is_enabled());
        assert!(hack.audio());
        assert_eq!(hack.speed(), 0.5);
        assert_eq!(hack.load_keybind(), Some(Keybind::new(SPEEDHACK_ID, 0x70)));
        assert!(hack.control().is_enabled());
        assert_eq!(registry.save(), settings);

        registry.update();
        registry.update();
        assert_eq!(*audio.0.borrow(), [0.5]);
    }

    #[test]
    /// Garbage in the record falls back to defaults field by field
    fn test_load_malformed() {
        let mut hack = speedhack();
        hack.load(&json!({ "enabled": "yes", "speed": "fast", "audio": true }));
        assert!(!hack.is_enabled());
        assert!(hack.audio());
        assert_eq!(hack.speed(), 1.0);

        hack.load(&json!({ "speed": -3.0 }));
        assert_eq!(hack.speed(), 1.0);

        hack.load(&Value::Null);
        assert_eq!(hack.save(), json!({ "enabled": false, "audio": false, "speed": 1.0 }));
    }

    #[test]
    fn test_pitch_follows_speed() {
        let audio = FakeAudio::default();
        let mut hack = Speedhack::new(
            CodeTarget::at("game.exe", 0x40),
            Box::new(FakeInterceptor::default()),
            Some(Box::new(audio.clone())),
        );
        let mut image = MemoryImage::new();
        let mut update = |hack: &mut Speedhack| hack.update(&mut FrameContext::new(&mut image));

        update(&mut hack);
        hack.set_speed(1.5);
        update(&mut hack);
        hack.set_enabled(true);
        update(&mut hack);
        hack.set_audio(true);
        update(&mut hack);
        update(&mut hack);
        hack.set_enabled(false);
        update(&mut hack);

        assert_eq!(*audio.0.borrow(), [1.0, 1.5, 1.0]);
    }
}
