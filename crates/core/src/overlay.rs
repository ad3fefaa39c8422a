//! Overlay Controller: the capture-surface state machine. Pure and
//! platform-independent: no OS hook, no timer threads. Callers drive it with
//! discrete [`ControllerEvent`]s and a periodic [`OverlayController::tick`],
//! which makes the hold-timer and the key-up debounce window deterministically
//! testable (`Instant` is supplied by the caller rather than read from the
//! clock here).

use std::collections::HashSet;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlayState {
    Hidden,
    Pressing,
    Latched,
    Saving,
    Confirmation,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Copy)]
pub enum ChordKey {
    Modifier,
    Activator,
}

#[derive(Debug, Clone)]
pub enum ControllerEvent {
    KeyDown(ChordKey),
    KeyUp(ChordKey),
    DragEnter,
    DragLeave,
    Drop,
    TextSubmit,
    Paste,
    Cancel,
    Saved,
    SaveFailed(String),
}

/// Side effects the host (Tauri shell) must perform in response to a
/// transition. The controller never touches a window directly.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    ShowOverlay,
    HideOverlay,
    StartHoldTimer,
    CancelHoldTimer,
    BeginIngest,
    ShowConfirmation,
    ShowError(String),
    None,
}

pub struct OverlayController {
    state: OverlayState,
    came_from_hidden: bool,
    previous_was_error: bool,
    keys_down: HashSet<ChordKey>,
    pending_key_ups: Vec<(ChordKey, Instant)>,
    hold_deadline: Option<Instant>,
    confirmation_deadline: Option<Instant>,
    drag_depth: u32,
    hold_threshold: Duration,
    confirmation_duration: Duration,
    debounce_window: Duration,
}

impl OverlayController {
    pub fn new(hold_threshold: Duration, confirmation_duration: Duration, debounce_window: Duration) -> Self {
        Self {
            state: OverlayState::Hidden,
            came_from_hidden: true,
            previous_was_error: false,
            keys_down: HashSet::new(),
            pending_key_ups: Vec::new(),
            hold_deadline: None,
            confirmation_deadline: None,
            drag_depth: 0,
            hold_threshold,
            confirmation_duration,
            debounce_window,
        }
    }

    pub fn state(&self) -> OverlayState {
        self.state
    }

    pub fn drag_active(&self) -> bool {
        self.drag_depth > 0
    }

    fn chord_active(&self) -> bool {
        self.keys_down.contains(&ChordKey::Modifier) && self.keys_down.contains(&ChordKey::Activator)
    }

    /// Apply a discrete event, returning the effect the host must perform.
    pub fn handle(&mut self, event: ControllerEvent, now: Instant) -> Effect {
        match event {
            ControllerEvent::KeyDown(key) => self.on_key_down(key, now),
            ControllerEvent::KeyUp(key) => self.on_key_up(key, now),
            ControllerEvent::DragEnter => {
                self.drag_depth += 1;
                Effect::None
            }
            ControllerEvent::DragLeave => {
                self.drag_depth = self.drag_depth.saturating_sub(1);
                Effect::None
            }
            ControllerEvent::Drop => {
                self.drag_depth = self.drag_depth.saturating_sub(1);
                self.begin_saving()
            }
            ControllerEvent::TextSubmit | ControllerEvent::Paste => self.begin_saving(),
            ControllerEvent::Cancel => self.on_cancel(),
            ControllerEvent::Saved => self.on_saved(now),
            ControllerEvent::SaveFailed(reason) => self.on_save_failed(reason),
        }
    }

    /// Advance timers without a discrete event — the host calls this on a
    /// short interval (e.g. every 20ms) so the hold timer, confirmation
    /// timer, and key-up debounce window resolve even with no new input.
    pub fn tick(&mut self, now: Instant) -> Effect {
        self.flush_debounced_key_ups(now);

        if self.state == OverlayState::Pressing {
            if let Some(deadline) = self.hold_deadline {
                if now >= deadline {
                    self.hold_deadline = None;
                    self.state = OverlayState::Latched;
                    return Effect::None;
                }
            }
        }
        if self.state == OverlayState::Confirmation {
            if let Some(deadline) = self.confirmation_deadline {
                if now >= deadline {
                    self.confirmation_deadline = None;
                    self.state = OverlayState::Hidden;
                    return Effect::HideOverlay;
                }
            }
        }
        Effect::None
    }

    fn flush_debounced_key_ups(&mut self, now: Instant) {
        let mut ready = Vec::new();
        self.pending_key_ups.retain(|(key, deadline)| {
            if now >= *deadline {
                ready.push(*key);
                false
            } else {
                true
            }
        });
        for key in ready {
            self.apply_key_up(key, now);
        }
    }

    fn on_key_down(&mut self, key: ChordKey, now: Instant) -> Effect {
        // Filter OS key-repeat: a key already recorded as down is a no-op.
        if self.keys_down.contains(&key) {
            return Effect::None;
        }
        self.keys_down.insert(key);
        // A key-down within the debounce window annuls a pending key-up.
        self.pending_key_ups.retain(|(pending_key, _)| *pending_key != key);

        if self.chord_active() {
            self.on_chord_active(now)
        } else {
            Effect::None
        }
    }

    fn on_key_up(&mut self, key: ChordKey, now: Instant) -> Effect {
        if !self.keys_down.contains(&key) {
            return Effect::None;
        }
        self.pending_key_ups.push((key, now + self.debounce_window));
        Effect::None
    }

    fn apply_key_up(&mut self, key: ChordKey, now: Instant) {
        let was_active = self.chord_active();
        self.keys_down.remove(&key);
        if was_active && !self.chord_active() {
            self.on_chord_inactive(now);
        }
    }

    fn on_chord_active(&mut self, now: Instant) -> Effect {
        if matches!(self.state, OverlayState::Saving | OverlayState::Confirmation) {
            return Effect::None;
        }
        match self.state {
            OverlayState::Hidden => {
                self.came_from_hidden = true;
                if self.drag_active() {
                    self.state = OverlayState::Latched;
                    return Effect::ShowOverlay;
                }
                if self.previous_was_error {
                    self.previous_was_error = false;
                    self.state = OverlayState::Pressing;
                    self.hold_deadline = Some(now + self.hold_threshold);
                    return Effect::ShowOverlay;
                }
                self.state = OverlayState::Pressing;
                self.hold_deadline = Some(now + self.hold_threshold);
                Effect::ShowOverlay
            }
            OverlayState::Latched => {
                self.came_from_hidden = false;
                self.state = OverlayState::Pressing;
                self.hold_deadline = Some(now + self.hold_threshold);
                Effect::ShowOverlay
            }
            _ => Effect::None,
        }
    }

    fn on_chord_inactive(&mut self, _now: Instant) {
        match self.state {
            OverlayState::Pressing => {
                self.hold_deadline = None;
                if self.came_from_hidden {
                    self.state = OverlayState::Latched;
                } else if self.drag_active() {
                    // never hide while a drag is in progress (§4.5.3)
                    self.state = OverlayState::Latched;
                } else {
                    self.state = OverlayState::Hidden;
                }
            }
            OverlayState::Latched => {
                // explicit press/hold cycle required to dismiss: no-op
            }
            _ => {}
        }
    }

    fn begin_saving(&mut self) -> Effect {
        if self.state == OverlayState::Saving {
            return Effect::None;
        }
        self.state = OverlayState::Saving;
        Effect::BeginIngest
    }

    fn on_cancel(&mut self) -> Effect {
        if self.state == OverlayState::Saving {
            return Effect::None;
        }
        self.state = OverlayState::Hidden;
        Effect::HideOverlay
    }

    fn on_saved(&mut self, now: Instant) -> Effect {
        if self.state != OverlayState::Saving {
            return Effect::None;
        }
        self.state = OverlayState::Confirmation;
        self.confirmation_deadline = Some(now + self.confirmation_duration);
        Effect::ShowConfirmation
    }

    fn on_save_failed(&mut self, reason: String) -> Effect {
        if self.state != OverlayState::Saving {
            return Effect::None;
        }
        self.state = OverlayState::Error;
        self.previous_was_error = true;
        Effect::ShowError(reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller() -> OverlayController {
        OverlayController::new(Duration::from_millis(400), Duration::from_millis(1500), Duration::from_millis(50))
    }

    #[test]
    fn quick_tap_from_hidden_latches_on_release() {
        let mut c = controller();
        let t0 = Instant::now();
        assert_eq!(c.handle(ControllerEvent::KeyDown(ChordKey::Modifier), t0), Effect::None);
        let eff = c.handle(ControllerEvent::KeyDown(ChordKey::Activator), t0);
        assert_eq!(eff, Effect::ShowOverlay);
        assert_eq!(c.state(), OverlayState::Pressing);

        // release quickly, before the hold threshold
        c.handle(ControllerEvent::KeyUp(ChordKey::Activator), t0 + Duration::from_millis(10));
        c.tick(t0 + Duration::from_millis(70)); // past debounce window
        assert_eq!(c.state(), OverlayState::Latched);
    }

    #[test]
    fn sustained_hold_past_threshold_latches_via_timer() {
        let mut c = controller();
        let t0 = Instant::now();
        c.handle(ControllerEvent::KeyDown(ChordKey::Modifier), t0);
        c.handle(ControllerEvent::KeyDown(ChordKey::Activator), t0);
        assert_eq!(c.state(), OverlayState::Pressing);
        let eff = c.tick(t0 + Duration::from_millis(410));
        assert_eq!(eff, Effect::None);
        assert_eq!(c.state(), OverlayState::Latched);
    }

    #[test]
    fn releasing_after_latch_from_latched_hides() {
        let mut c = controller();
        let t0 = Instant::now();
        c.handle(ControllerEvent::KeyDown(ChordKey::Modifier), t0);
        c.handle(ControllerEvent::KeyDown(ChordKey::Activator), t0);
        c.tick(t0 + Duration::from_millis(410)); // -> latched
        assert_eq!(c.state(), OverlayState::Latched);

        // press again from latched
        c.handle(ControllerEvent::KeyUp(ChordKey::Activator), t0 + Duration::from_millis(420));
        c.tick(t0 + Duration::from_millis(480));
        c.handle(ControllerEvent::KeyUp(ChordKey::Modifier), t0 + Duration::from_millis(480));
        c.tick(t0 + Duration::from_millis(540));

        c.handle(ControllerEvent::KeyDown(ChordKey::Modifier), t0 + Duration::from_millis(600));
        c.handle(ControllerEvent::KeyDown(ChordKey::Activator), t0 + Duration::from_millis(600));
        assert_eq!(c.state(), OverlayState::Pressing);
        // quick release -> came from latched -> hidden
        c.handle(ControllerEvent::KeyUp(ChordKey::Activator), t0 + Duration::from_millis(610));
        c.tick(t0 + Duration::from_millis(670));
        assert_eq!(c.state(), OverlayState::Hidden);
    }

    #[test]
    fn key_repeat_down_events_are_ignored() {
        let mut c = controller();
        let t0 = Instant::now();
        c.handle(ControllerEvent::KeyDown(ChordKey::Modifier), t0);
        let first = c.handle(ControllerEvent::KeyDown(ChordKey::Modifier), t0 + Duration::from_millis(5));
        assert_eq!(first, Effect::None);
        assert_eq!(c.state(), OverlayState::Hidden);
    }

    #[test]
    fn key_up_debounce_annuls_quick_bounce() {
        let mut c = controller();
        let t0 = Instant::now();
        c.handle(ControllerEvent::KeyDown(ChordKey::Modifier), t0);
        c.handle(ControllerEvent::KeyDown(ChordKey::Activator), t0);
        assert_eq!(c.state(), OverlayState::Pressing);

        // bouncy key-up then key-down within the debounce window
        c.handle(ControllerEvent::KeyUp(ChordKey::Activator), t0 + Duration::from_millis(5));
        c.handle(ControllerEvent::KeyDown(ChordKey::Activator), t0 + Duration::from_millis(20));
        c.tick(t0 + Duration::from_millis(60));
        // chord should still be considered active: no transition to latched/hidden happened via key-up
        assert_eq!(c.state(), OverlayState::Pressing);
    }

    #[test]
    fn drag_keeps_overlay_visible_through_chord_release() {
        let mut c = controller();
        let t0 = Instant::now();
        c.handle(ControllerEvent::DragEnter, t0);
        c.handle(ControllerEvent::KeyDown(ChordKey::Modifier), t0);
        c.handle(ControllerEvent::KeyDown(ChordKey::Activator), t0);
        c.handle(ControllerEvent::KeyUp(ChordKey::Activator), t0 + Duration::from_millis(5));
        c.tick(t0 + Duration::from_millis(60));
        assert_eq!(c.state(), OverlayState::Latched);
        assert!(c.drag_active());
    }

    #[test]
    fn drop_triggers_ingest_then_saved_shows_confirmation_then_hides() {
        let mut c = controller();
        let t0 = Instant::now();
        c.handle(ControllerEvent::DragEnter, t0);
        let eff = c.handle(ControllerEvent::Drop, t0 + Duration::from_millis(10));
        assert_eq!(eff, Effect::BeginIngest);
        assert_eq!(c.state(), OverlayState::Saving);

        let eff = c.handle(ControllerEvent::Saved, t0 + Duration::from_millis(20));
        assert_eq!(eff, Effect::ShowConfirmation);
        assert_eq!(c.state(), OverlayState::Confirmation);

        let eff = c.tick(t0 + Duration::from_millis(20) + Duration::from_millis(1600));
        assert_eq!(eff, Effect::HideOverlay);
        assert_eq!(c.state(), OverlayState::Hidden);
    }

    #[test]
    fn save_failure_reopens_in_text_mode_on_next_chord() {
        let mut c = controller();
        let t0 = Instant::now();
        c.handle(ControllerEvent::TextSubmit, t0);
        assert_eq!(c.state(), OverlayState::Saving);
        let eff = c.handle(ControllerEvent::SaveFailed("disk full".into()), t0 + Duration::from_millis(10));
        assert_eq!(eff, Effect::ShowError("disk full".into()));
        assert_eq!(c.state(), OverlayState::Error);

        // error state ignores chord transitions directly; next chord from hidden reopens
        c.state = OverlayState::Hidden;
        let eff = c.handle(ControllerEvent::KeyDown(ChordKey::Modifier), t0 + Duration::from_millis(100));
        let eff2 = c.handle(ControllerEvent::KeyDown(ChordKey::Activator), t0 + Duration::from_millis(100));
        assert_eq!(eff, Effect::None);
        assert_eq!(eff2, Effect::ShowOverlay);
        assert_eq!(c.state(), OverlayState::Pressing);
    }

    #[test]
    fn saving_state_ignores_chord_transitions() {
        let mut c = controller();
        let t0 = Instant::now();
        c.handle(ControllerEvent::TextSubmit, t0);
        assert_eq!(c.state(), OverlayState::Saving);
        c.handle(ControllerEvent::KeyDown(ChordKey::Modifier), t0 + Duration::from_millis(5));
        c.handle(ControllerEvent::KeyDown(ChordKey::Activator), t0 + Duration::from_millis(5));
        assert_eq!(c.state(), OverlayState::Saving);
    }
}
