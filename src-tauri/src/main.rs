// Prevents additional console window on Windows in release
#![cfg_attr(not(debug_assertions), windows_subsystem = "windows")]

use dumpvault_core::overlay::{ChordKey, ControllerEvent, Effect, OverlayController};
use dumpvault_core::{Config, Engine};
use serde::Serialize;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tauri::{AppHandle, Emitter, Manager};

const OVERLAY_WINDOW: &str = "overlay";
const TICK_INTERVAL: Duration = Duration::from_millis(20);

/// Shared application state managed by Tauri and reachable from every command.
struct AppContext {
    engine: Arc<Engine>,
    controller: Arc<Mutex<OverlayController>>,
}

// ---------------------------------------------------------------------------
// Global chord hook — runs on its own OS thread (rdev requires it), posts
// discrete events into an mpsc channel the Tauri side drains. The hook
// runs on whatever thread the OS requires; it posts to the event queue and
// returns immediately, never blocking on the controller.
// ---------------------------------------------------------------------------

fn chord_key_for(name: &str) -> Option<rdev::Key> {
    use rdev::Key::*;
    Some(match name {
        "Alt" => Alt,
        "AltGr" => AltGr,
        "Control" | "ControlLeft" => ControlLeft,
        "ControlRight" => ControlRight,
        "Shift" | "ShiftLeft" => ShiftLeft,
        "ShiftRight" => ShiftRight,
        "Meta" | "MetaLeft" | "Super" => MetaLeft,
        "MetaRight" => MetaRight,
        "Space" => Space,
        "A" => KeyA,
        "B" => KeyB,
        "C" => KeyC,
        "D" => KeyD,
        "E" => KeyE,
        "F" => KeyF,
        "G" => KeyG,
        "H" => KeyH,
        "I" => KeyI,
        "J" => KeyJ,
        "K" => KeyK,
        "L" => KeyL,
        "M" => KeyM,
        "N" => KeyN,
        "O" => KeyO,
        "P" => KeyP,
        "Q" => KeyQ,
        "R" => KeyR,
        "S" => KeyS,
        "T" => KeyT,
        "U" => KeyU,
        "V" => KeyV,
        "W" => KeyW,
        "X" => KeyX,
        "Y" => KeyY,
        "Z" => KeyZ,
        _ => return None,
    })
}

/// Spawn the rdev global hook thread, translating raw key events into
/// `ControllerEvent`s for the two configured chord keys and dropping
/// everything else. Returns the receiving end the Tauri loop drains.
fn spawn_chord_hook(config: &Config) -> mpsc::Receiver<ControllerEvent> {
    let (tx, rx) = mpsc::channel();
    let modifier = chord_key_for(&config.chord.modifier).unwrap_or(rdev::Key::Alt);
    let activator = chord_key_for(&config.chord.activator).unwrap_or(rdev::Key::KeyD);

    std::thread::spawn(move || {
        let result = rdev::listen(move |event| {
            let (key, event) = match event.event_type {
                rdev::EventType::KeyPress(k) => (k, ControllerEvent::KeyDown),
                rdev::EventType::KeyRelease(k) => (k, ControllerEvent::KeyUp),
                _ => return,
            };
            let chord_key = if key == modifier {
                ChordKey::Modifier
            } else if key == activator {
                ChordKey::Activator
            } else {
                return;
            };
            let _ = tx.send(event(chord_key));
        });
        if let Err(e) = result {
            tracing_unavailable_eprintln(&format!("global hook failed: {e:?}"));
        }
    });

    rx
}

/// `dumpvault-overlay` has no server-style tracing subscriber wired up (it's
/// a GUI shell); failures on the hook thread go to stderr instead.
fn tracing_unavailable_eprintln(msg: &str) {
    eprintln!("[dumpvault-overlay] {msg}");
}

// ---------------------------------------------------------------------------
// Effect application — the only place that touches the overlay window
// ---------------------------------------------------------------------------

#[derive(Serialize, Clone)]
struct ConfirmationPayload {
    shown: bool,
}

#[derive(Serialize, Clone)]
struct ErrorPayload {
    reason: String,
}

fn apply_effect(app: &AppHandle, effect: Effect) {
    match effect {
        Effect::ShowOverlay => show_overlay(app),
        Effect::HideOverlay => hide_overlay(app),
        Effect::ShowConfirmation => {
            let _ = app.emit("overlay://confirmation", ConfirmationPayload { shown: true });
        }
        Effect::ShowError(reason) => {
            let _ = app.emit("overlay://error", ErrorPayload { reason });
        }
        Effect::StartHoldTimer | Effect::CancelHoldTimer | Effect::BeginIngest | Effect::None => {}
    }
}

fn show_overlay(app: &AppHandle) {
    if let Some(w) = app.get_webview_window(OVERLAY_WINDOW) {
        let _ = w.show();
        let _ = w.set_focus();
        return;
    }
    let _ = tauri::WebviewWindowBuilder::new(app, OVERLAY_WINDOW, tauri::WebviewUrl::App("overlay.html".into()))
        .title("dumpvault")
        .inner_size(480.0, 220.0)
        .center()
        .decorations(false)
        .always_on_top(true)
        .resizable(false)
        .skip_taskbar(true)
        .build();
}

fn hide_overlay(app: &AppHandle) {
    if let Some(w) = app.get_webview_window(OVERLAY_WINDOW) {
        let _ = w.hide();
    }
}

// ---------------------------------------------------------------------------
// Tauri commands — the UI's only way to drive the controller and the engine
// ---------------------------------------------------------------------------

fn ctx(app: &AppHandle) -> tauri::State<'_, AppContext> {
    app.state::<AppContext>()
}

fn dispatch(app: &AppHandle, event: ControllerEvent) {
    let state = ctx(app);
    let effect = state.controller.lock().unwrap().handle(event, Instant::now());
    apply_effect(app, effect);
}

#[tauri::command]
async fn text_submit(app: AppHandle, text: String) -> Result<(), String> {
    dispatch(&app, ControllerEvent::TextSubmit);
    ingest_and_resolve(&app, IngestRequest::Text(text)).await
}

#[tauri::command]
async fn paste(app: AppHandle, text: String) -> Result<(), String> {
    dispatch(&app, ControllerEvent::Paste);
    ingest_and_resolve(&app, IngestRequest::Text(text)).await
}

#[tauri::command]
async fn drop_paths(app: AppHandle, paths: Vec<String>) -> Result<(), String> {
    dispatch(&app, ControllerEvent::Drop);
    ingest_and_resolve(&app, IngestRequest::Files(paths)).await
}

#[tauri::command]
fn drag_enter(app: AppHandle) {
    dispatch(&app, ControllerEvent::DragEnter);
}

#[tauri::command]
fn drag_leave(app: AppHandle) {
    dispatch(&app, ControllerEvent::DragLeave);
}

#[tauri::command]
fn cancel(app: AppHandle) {
    dispatch(&app, ControllerEvent::Cancel);
}

enum IngestRequest {
    Text(String),
    Files(Vec<String>),
}

/// Runs the actual `Engine::ingest_*` call(s) on a blocking thread (the
/// engine's content hashing and SQLite writes are synchronous), then feeds
/// the outcome back into the controller as `Saved`/`SaveFailed`.
async fn ingest_and_resolve(app: &AppHandle, req: IngestRequest) -> Result<(), String> {
    let engine = ctx(app).engine.clone();
    let result = tauri::async_runtime::spawn_blocking(move || match req {
        IngestRequest::Text(text) => {
            if looks_like_url(&text) {
                engine.ingest_link(&text, None).map(|_| ())
            } else {
                engine.ingest_text(&text).map(|_| ())
            }
        }
        IngestRequest::Files(paths) => {
            for path in paths {
                engine.ingest_file(std::path::Path::new(&path))?;
            }
            Ok(())
        }
    })
    .await;

    match result {
        Ok(Ok(())) => {
            dispatch(app, ControllerEvent::Saved);
            Ok(())
        }
        Ok(Err(e)) => {
            dispatch(app, ControllerEvent::SaveFailed(e.reason()));
            Err(e.reason())
        }
        Err(join_err) => {
            let reason = join_err.to_string();
            dispatch(app, ControllerEvent::SaveFailed(reason.clone()));
            Err(reason)
        }
    }
}

fn looks_like_url(text: &str) -> bool {
    let t = text.trim();
    t.starts_with("http://") || t.starts_with("https://")
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

fn main() {
    let config = Config::load(None);
    let hold_threshold = Duration::from_millis(config.hold_threshold_ms);
    let confirmation = Duration::from_millis(config.confirmation_ms);
    let debounce = Duration::from_millis(config.debounce_ms);

    let engine = Engine::open(config.clone()).unwrap_or_else(|e| {
        eprintln!("[dumpvault-overlay] failed to open vault: {e}");
        std::process::exit(1);
    });

    let controller = Arc::new(Mutex::new(OverlayController::new(hold_threshold, confirmation, debounce)));
    let app_context = AppContext { engine: Arc::new(engine), controller: controller.clone() };

    let chord_events = spawn_chord_hook(&config);

    tauri::Builder::default()
        .plugin(tauri_plugin_dialog::init())
        .plugin(tauri_plugin_shell::init())
        .manage(app_context)
        .invoke_handler(tauri::generate_handler![
            text_submit,
            paste,
            drop_paths,
            drag_enter,
            drag_leave,
            cancel,
        ])
        .setup(move |app| {
            if let Some(w) = app.get_webview_window(OVERLAY_WINDOW) {
                let _ = w.hide();
            }

            // Drain the chord hook and drive the controller's tick timer on
            // a dedicated thread — the controller itself is `Send` but not
            // `Sync`-friendly to call from multiple places at once, so all
            // mutation happens through this single loop plus `dispatch`
            // (both take the same `Mutex`).
            let app_handle = app.handle().clone();
            std::thread::spawn(move || loop {
                match chord_events.recv_timeout(TICK_INTERVAL) {
                    Ok(event) => dispatch(&app_handle, event),
                    Err(mpsc::RecvTimeoutError::Timeout) => {
                        let state = ctx(&app_handle);
                        let effect = state.controller.lock().unwrap().tick(Instant::now());
                        apply_effect(&app_handle, effect);
                    }
                    Err(mpsc::RecvTimeoutError::Disconnected) => break,
                }
            });

            Ok(())
        })
        .run(tauri::generate_context!())
        .expect("error while running dumpvault-overlay");
}
