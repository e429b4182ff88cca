#![cfg(target_arch = "wasm32")]
use hush_core::{Engine, Soundscape};
use std::cell::RefCell;
use std::rc::Rc;
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use web_sys as web;

mod webaudio;

pub use webaudio::WebAudio;

// How often the page drives the engine's task queue.
const PUMP_INTERVAL_MS: i32 = 50;

#[wasm_bindgen(start)]
pub fn start() -> Result<(), JsValue> {
    console_error_panic_hook::set_once();
    console_log::init_with_level(log::Level::Info).ok();
    log::info!("hush-web starting");
    Ok(())
}

/// Interval timer calling [`Engine::tick`]; cleared on drop.
struct Pump {
    handle: i32,
    _closure: Closure<dyn FnMut()>,
}

impl Pump {
    fn start(engine: Rc<RefCell<Engine<WebAudio>>>) -> anyhow::Result<Pump> {
        let window = web::window().ok_or_else(|| anyhow::anyhow!("no window"))?;
        let closure = Closure::wrap(Box::new(move || {
            // A control call may hold the engine if it re-entered JS.
            if let Ok(mut engine) = engine.try_borrow_mut() {
                engine.tick();
            }
        }) as Box<dyn FnMut()>);
        let handle = window
            .set_interval_with_callback_and_timeout_and_arguments_0(
                closure.as_ref().unchecked_ref(),
                PUMP_INTERVAL_MS,
            )
            .map_err(|e| anyhow::anyhow!(format!("{:?}", e)))?;
        Ok(Pump {
            handle,
            _closure: closure,
        })
    }
}

impl Drop for Pump {
    fn drop(&mut self) {
        if let Some(window) = web::window() {
            window.clear_interval_with_handle(self.handle);
        }
    }
}

/// Soundscape engine handle exported to the page.
///
/// Construct it once; call `play` from a click or key handler so the browser
/// lets the audio context start.
#[wasm_bindgen]
pub struct HushEngine {
    engine: Rc<RefCell<Engine<WebAudio>>>,
    _pump: Pump,
}

#[wasm_bindgen]
impl HushEngine {
    #[wasm_bindgen(constructor)]
    pub fn new() -> Result<HushEngine, JsValue> {
        let engine = Rc::new(RefCell::new(Engine::new(WebAudio::new())));
        let pump = Pump::start(Rc::clone(&engine))
            .map_err(|e| JsValue::from_str(&e.to_string()))?;
        Ok(HushEngine {
            engine,
            _pump: pump,
        })
    }

    /// Start a soundscape by name, e.g. `"rain"` or `"brown-noise"`.
    pub fn play(&self, id: &str) {
        match id.parse::<Soundscape>() {
            Ok(id) => self.engine.borrow_mut().play(id),
            Err(e) => log::warn!("[hush] {}", e),
        }
    }

    pub fn pause(&self) {
        self.engine.borrow_mut().pause();
    }

    #[wasm_bindgen(js_name = stopAll)]
    pub fn stop_all(&self, fade_out: bool, long_fade: bool) {
        self.engine.borrow_mut().stop_all(fade_out, long_fade);
    }

    #[wasm_bindgen(js_name = setVolume)]
    pub fn set_volume(&self, volume: f32) {
        self.engine.borrow_mut().set_volume(volume);
    }

    #[wasm_bindgen(js_name = toggleMute)]
    pub fn toggle_mute(&self, muted: bool) {
        self.engine.borrow_mut().toggle_mute(muted);
    }

    #[wasm_bindgen(js_name = setWarmth)]
    pub fn set_warmth(&self, warm: bool) {
        self.engine.borrow_mut().set_warmth(warm);
    }

    #[wasm_bindgen(js_name = setFadeTime)]
    pub fn set_fade_time(&self, secs: f64) {
        self.engine.borrow_mut().set_fade_time(secs);
    }

    #[wasm_bindgen(js_name = toggleHeartbeatLayer)]
    pub fn toggle_heartbeat_layer(&self, enabled: bool) {
        self.engine.borrow_mut().toggle_heartbeat_layer(enabled);
    }

    /// Call when the page becomes visible again.
    pub fn resume(&self) {
        self.engine.borrow_mut().resume();
    }

    pub fn suspend(&self) {
        self.engine.borrow_mut().suspend();
    }

    /// `"idle"`, `"playing <id>"` or `"paused <id>"`.
    pub fn state(&self) -> String {
        self.engine.borrow().state().to_string()
    }

    /// Names accepted by `play`.
    pub fn soundscapes() -> js_sys::Array {
        Soundscape::ALL
            .iter()
            .map(|id| JsValue::from_str(id.as_str()))
            .collect()
    }
}
