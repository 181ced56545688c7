use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{Duration, NaiveDateTime};
use tracing::warn;

use muse_core::types::TIME_FORMAT;

use crate::types::{parse_time, ClockError, SessionClock, TimeAction, TimeActionKind, TimeFormat};

/// Stored clock fields as read back from the session_clock table.
#[derive(Debug, Clone, Default)]
pub struct ClockSnapshot {
    pub base_virtual: Option<String>,
    pub base_real: Option<String>,
    pub actions_json: Option<String>,
}

/// Callback used to lazily hydrate a clock from storage on first reference.
pub type ClockLoader = Box<dyn Fn(&str) -> Option<ClockSnapshot> + Send + Sync>;

/// Manages virtual time for all sessions. All clock arithmetic happens under
/// one coarse lock.
pub struct TimeProvider {
    clocks: Mutex<HashMap<String, SessionClock>>,
    loader: Mutex<Option<ClockLoader>>,
}

impl Default for TimeProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeProvider {
    pub fn new() -> Self {
        Self {
            clocks: Mutex::new(HashMap::new()),
            loader: Mutex::new(None),
        }
    }

    /// Install the storage-backed loader. Called once during startup wiring.
    pub fn set_loader(&self, loader: ClockLoader) {
        *self.loader.lock().unwrap() = Some(loader);
    }

    fn real_now(&self) -> NaiveDateTime {
        chrono::Local::now().naive_local()
    }

    fn default_clock(&self, session_id: &str) -> SessionClock {
        let real_now = self.real_now();
        SessionClock {
            session_id: session_id.to_string(),
            base_virtual: real_now,
            base_real: real_now,
            actions: Vec::new(),
            updated_at: None,
            real_updated_at: None,
        }
    }

    fn hydrate(&self, session_id: &str) -> SessionClock {
        let snapshot = {
            let loader = self.loader.lock().unwrap();
            loader.as_ref().and_then(|load| load(session_id))
        };
        let mut clock = self.default_clock(session_id);
        if let Some(snapshot) = snapshot {
            if let Some(base_virtual) = snapshot.base_virtual.as_deref() {
                match parse_time(base_virtual) {
                    Ok(dt) => clock.base_virtual = dt,
                    Err(e) => warn!(session_id, error = %e, "invalid stored base_virtual"),
                }
            }
            if let Some(base_real) = snapshot.base_real.as_deref() {
                match parse_time(base_real) {
                    Ok(dt) => clock.base_real = dt,
                    Err(e) => warn!(session_id, error = %e, "invalid stored base_real"),
                }
            }
            if let Some(actions_json) = snapshot.actions_json.as_deref() {
                clock.actions = serde_json::from_str(actions_json).unwrap_or_default();
            }
        }
        clock
    }

    fn with_clock<R>(&self, session_id: &str, f: impl FnOnce(&mut SessionClock, NaiveDateTime) -> R) -> R {
        let mut clocks = self.clocks.lock().unwrap();
        if !clocks.contains_key(session_id) {
            let clock = self.hydrate(session_id);
            clocks.insert(session_id.to_string(), clock);
        }
        let real_now = self.real_now();
        let clock = clocks.get_mut(session_id).expect("clock just inserted");
        f(clock, real_now)
    }

    fn compute_virtual(clock: &SessionClock, real_now: NaiveDateTime) -> NaiveDateTime {
        let mut virtual_time = clock.base_virtual;
        let mut real_delta = (real_now - clock.base_real).num_milliseconds() as f64 / 1000.0;

        for action in &clock.actions {
            match action.kind {
                TimeActionKind::Scale => real_delta *= action.value,
                TimeActionKind::Offset => {
                    virtual_time += Duration::milliseconds((action.value * 1000.0) as i64)
                }
                TimeActionKind::Freeze => real_delta = 0.0,
            }
        }

        virtual_time + Duration::milliseconds((real_delta * 1000.0) as i64)
    }

    fn touch(clock: &mut SessionClock, real_now: NaiveDateTime) {
        let virtual_now = Self::compute_virtual(clock, real_now);
        clock.updated_at = Some(virtual_now.format(TIME_FORMAT).to_string());
        clock.real_updated_at = Some(real_now.format(TIME_FORMAT).to_string());
    }

    /// Collapse the current action chain into a new base, preserving virtual now.
    fn rebase(clock: &mut SessionClock, real_now: NaiveDateTime) {
        let current_virtual = Self::compute_virtual(clock, real_now);
        clock.base_virtual = current_virtual;
        clock.base_real = real_now;
        clock.actions.clear();
        Self::touch(clock, real_now);
    }

    /// Current virtual time for a session (or real time when no session given).
    pub fn now(&self, session_id: Option<&str>) -> NaiveDateTime {
        match session_id {
            Some(id) => self.with_clock(id, |clock, real_now| Self::compute_virtual(clock, real_now)),
            None => self.real_now(),
        }
    }

    pub fn now_str(&self, format: TimeFormat, session_id: Option<&str>) -> String {
        format.render(self.now(session_id))
    }

    /// Real wall-clock time, never virtual.
    pub fn real_now_str(&self, format: TimeFormat) -> String {
        format.render(self.real_now())
    }

    /// Set base_virtual to the target, base_real to now, and clear actions.
    pub fn seek(&self, session_id: &str, virtual_time: &str) -> Result<SessionClock, ClockError> {
        let target = parse_time(virtual_time)?;
        Ok(self.with_clock(session_id, |clock, real_now| {
            clock.base_virtual = target;
            clock.base_real = real_now;
            clock.actions.clear();
            Self::touch(clock, real_now);
            clock.clone()
        }))
    }

    /// Append an offset action shifting virtual time by `delta_seconds`.
    pub fn nudge(&self, session_id: &str, delta_seconds: f64) -> SessionClock {
        self.append_action(session_id, TimeAction::offset(delta_seconds), false)
    }

    /// Rebase, then append a scale action.
    pub fn set_speed(&self, session_id: &str, speed: f64) -> SessionClock {
        self.append_action(session_id, TimeAction::scale(speed), true)
    }

    pub fn append_action(
        &self,
        session_id: &str,
        action: TimeAction,
        rebase_before: bool,
    ) -> SessionClock {
        self.with_clock(session_id, |clock, real_now| {
            if rebase_before {
                Self::rebase(clock, real_now);
            }
            clock.actions.push(action);
            Self::touch(clock, real_now);
            clock.clone()
        })
    }

    pub fn clear_actions(&self, session_id: &str) -> SessionClock {
        self.with_clock(session_id, |clock, real_now| {
            clock.actions.clear();
            Self::touch(clock, real_now);
            clock.clone()
        })
    }

    /// Full update used by the PUT time endpoint. A provided base_virtual
    /// resets base_real to now and replaces the action chain; otherwise the
    /// existing base is optionally rebased and actions optionally replaced.
    pub fn update_session_clock(
        &self,
        session_id: &str,
        base_virtual: Option<&str>,
        actions: Option<Vec<TimeAction>>,
        rebase_current: bool,
    ) -> Result<SessionClock, ClockError> {
        let base_virtual = base_virtual.map(parse_time).transpose()?;
        Ok(self.with_clock(session_id, |clock, real_now| {
            if rebase_current && base_virtual.is_none() {
                Self::rebase(clock, real_now);
            }
            match base_virtual {
                Some(dt) => {
                    clock.base_virtual = dt;
                    clock.base_real = real_now;
                    clock.actions = actions.unwrap_or_default();
                }
                None => {
                    clock.base_real = real_now;
                    if let Some(actions) = actions {
                        clock.actions = actions;
                    }
                }
            }
            Self::touch(clock, real_now);
            clock.clone()
        }))
    }

    /// Current clock configuration (creates a default clock on first reference).
    pub fn get_session_clock(&self, session_id: &str) -> SessionClock {
        self.with_clock(session_id, |clock, _| clock.clone())
    }

    /// Drop every cached clock; used after an archive load so clocks rehydrate
    /// from the newly loaded database.
    pub fn clear_cache(&self) {
        self.clocks.lock().unwrap().clear();
    }

    /// Replace the in-memory clock with fields read from storage.
    pub fn load_session_clock(
        &self,
        session_id: &str,
        base_virtual: Option<&str>,
        base_real: Option<&str>,
        actions_json: Option<&str>,
    ) -> SessionClock {
        let mut clock = self.default_clock(session_id);
        if let Some(value) = base_virtual {
            if let Ok(dt) = parse_time(value) {
                clock.base_virtual = dt;
            }
        }
        if let Some(value) = base_real {
            if let Ok(dt) = parse_time(value) {
                clock.base_real = dt;
            }
        }
        if let Some(json) = actions_json {
            clock.actions = serde_json::from_str(json).unwrap_or_default();
        }
        let real_now = self.real_now();
        Self::touch(&mut clock, real_now);
        let mut clocks = self.clocks.lock().unwrap();
        clocks.insert(session_id.to_string(), clock.clone());
        clock
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dt(s: &str) -> NaiveDateTime {
        parse_time(s).unwrap()
    }

    #[test]
    fn unmodified_clock_tracks_real_time() {
        let provider = TimeProvider::new();
        let before = chrono::Local::now().naive_local();
        let now = provider.now(Some("s1"));
        let after = chrono::Local::now().naive_local();
        assert!(now >= before - Duration::seconds(1));
        assert!(now <= after + Duration::seconds(1));
    }

    #[test]
    fn seek_pins_virtual_now() {
        let provider = TimeProvider::new();
        let clock = provider.seek("s1", "2030-01-01 00:00:00").unwrap();
        assert_eq!(clock.base_virtual, dt("2030-01-01 00:00:00"));
        assert!(clock.actions.is_empty());
        let now = provider.now(Some("s1"));
        assert!((now - dt("2030-01-01 00:00:00")).num_seconds() < 2);
    }

    #[test]
    fn nudge_appends_single_offset_action() {
        let provider = TimeProvider::new();
        provider.seek("s1", "2030-01-01 00:00:00").unwrap();
        let clock = provider.nudge("s1", 3600.0);
        assert_eq!(clock.actions.len(), 1);
        assert_eq!(clock.actions[0].kind, TimeActionKind::Offset);
        assert_eq!(clock.base_virtual, dt("2030-01-01 00:00:00"));
        let now = provider.now(Some("s1"));
        assert!((now - dt("2030-01-01 01:00:00")).num_seconds().abs() < 2);
    }

    #[test]
    fn evaluation_applies_actions_left_to_right() {
        let clock = SessionClock {
            session_id: "s".to_string(),
            base_virtual: dt("2030-01-01 00:00:00"),
            base_real: dt("2024-01-01 00:00:00"),
            actions: vec![
                TimeAction::scale(2.0),
                TimeAction::offset(60.0),
                TimeAction::freeze(),
                TimeAction::offset(30.0),
            ],
            updated_at: None,
            real_updated_at: None,
        };
        // 100s of real delta: scaled to 200, then frozen to 0; offsets add 90s.
        let result = TimeProvider::compute_virtual(&clock, dt("2024-01-01 00:01:40"));
        assert_eq!(result, dt("2030-01-01 00:01:30"));
    }

    #[test]
    fn freeze_stops_the_clock() {
        let clock = SessionClock {
            session_id: "s".to_string(),
            base_virtual: dt("2030-01-01 00:00:00"),
            base_real: dt("2024-01-01 00:00:00"),
            actions: vec![TimeAction::freeze()],
            updated_at: None,
            real_updated_at: None,
        };
        let result = TimeProvider::compute_virtual(&clock, dt("2024-06-01 12:00:00"));
        assert_eq!(result, dt("2030-01-01 00:00:00"));
    }

    #[test]
    fn set_speed_rebases_then_scales() {
        let provider = TimeProvider::new();
        provider.seek("s1", "2030-01-01 00:00:00").unwrap();
        let clock = provider.set_speed("s1", 3.0);
        assert_eq!(clock.actions.len(), 1);
        assert_eq!(clock.actions[0].kind, TimeActionKind::Scale);
        // Rebase preserved virtual now within clock resolution.
        assert!((clock.base_virtual - dt("2030-01-01 00:00:00")).num_seconds().abs() < 2);
    }

    #[test]
    fn load_restores_action_chain() {
        let provider = TimeProvider::new();
        let actions = r#"[{"type":"offset","value":120.0,"note":null}]"#;
        let clock = provider.load_session_clock(
            "s1",
            Some("2031-05-01 08:00:00"),
            Some("2024-01-01 00:00:00"),
            Some(actions),
        );
        assert_eq!(clock.base_virtual, dt("2031-05-01 08:00:00"));
        assert_eq!(clock.actions.len(), 1);
        assert_eq!(clock.actions[0].value, 120.0);
    }

    #[test]
    fn invalid_seek_format_rejected() {
        let provider = TimeProvider::new();
        assert!(provider.seek("s1", "2030/01/01").is_err());
    }
}
