//! Menu selection and per-workflow phase, kept separately for each client.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::SessionView;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    VideoAssistant,
    ImageSuggestions,
}

impl std::fmt::Display for Feature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Feature::VideoAssistant => f.write_str("YouTube Cooking Assistant"),
            Feature::ImageSuggestions => f.write_str("Image-Based Recipe Suggestions"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Idle,
    AwaitingResponse,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    Select(Feature),
    Trigger(Feature),
    Finish(Feature),
}

#[derive(Debug, PartialEq, thiserror::Error)]
pub enum SessionError {
    #[error("Select \"{0}\" from the menu first")]
    NotSelected(Feature),
    #[error("\"{0}\" is still working on the previous request")]
    Busy(Feature),
    #[error("\"{0}\" has no request in flight")]
    NotInFlight(Feature),
}

#[derive(Debug, Default)]
pub struct Session {
    selected: Option<Feature>,
    video: Phase,
    image: Phase,
}

impl Session {
    pub fn selected(&self) -> Option<Feature> {
        self.selected
    }

    pub fn phase(&self, feature: Feature) -> Phase {
        match feature {
            Feature::VideoAssistant => self.video,
            Feature::ImageSuggestions => self.image,
        }
    }

    fn phase_mut(&mut self, feature: Feature) -> &mut Phase {
        match feature {
            Feature::VideoAssistant => &mut self.video,
            Feature::ImageSuggestions => &mut self.image,
        }
    }

    pub fn apply(&mut self, event: SessionEvent) -> Result<(), SessionError> {
        match event {
            SessionEvent::Select(feature) => {
                self.selected = Some(feature);
                Ok(())
            }
            SessionEvent::Trigger(feature) => {
                self.check_ready(feature)?;
                *self.phase_mut(feature) = Phase::AwaitingResponse;
                Ok(())
            }
            SessionEvent::Finish(feature) => {
                let phase = self.phase_mut(feature);
                if *phase != Phase::AwaitingResponse {
                    return Err(SessionError::NotInFlight(feature));
                }
                *phase = Phase::Idle;
                Ok(())
            }
        }
    }

    /// Whether a trigger for `feature` would be accepted right now.
    pub fn check_ready(&self, feature: Feature) -> Result<(), SessionError> {
        if self.selected != Some(feature) {
            return Err(SessionError::NotSelected(feature));
        }
        if self.phase(feature) == Phase::AwaitingResponse {
            return Err(SessionError::Busy(feature));
        }
        Ok(())
    }

    pub fn view(&self) -> SessionView {
        SessionView {
            selected: self.selected(),
            video_assistant: self.phase(Feature::VideoAssistant),
            image_suggestions: self.phase(Feature::ImageSuggestions),
        }
    }
}

pub const SESSION_HEADER: &str = "x-session-id";

/// Every client's [`Session`], keyed by the id the client echoes back in
/// [`SESSION_HEADER`].
// TODO: evict sessions that have been idle for longer than a configurable TTL.
#[derive(Debug, Clone, Default)]
pub struct SessionStore {
    sessions: Arc<Mutex<HashMap<Uuid, Session>>>,
}

impl SessionStore {
    fn lock(&self) -> MutexGuard<'_, HashMap<Uuid, Session>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The session for `requested`, or a fresh one when the id is missing or
    /// not a UUID.
    pub fn open(&self, requested: Option<&str>) -> SessionHandle {
        let id = requested
            .and_then(|raw| Uuid::parse_str(raw.trim()).ok())
            .unwrap_or_else(Uuid::new_v4);
        let mut sessions = self.lock();
        if !sessions.contains_key(&id) {
            sessions.insert(id, Session::default());
            tracing::debug!(session = %id, open = sessions.len(), "session started");
        }
        SessionHandle {
            store: self.clone(),
            id,
        }
    }
}

/// One client's view into the [`SessionStore`].
#[derive(Debug, Clone)]
pub struct SessionHandle {
    store: SessionStore,
    id: Uuid,
}

impl SessionHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    fn with<T>(&self, f: impl FnOnce(&mut Session) -> T) -> T {
        let mut sessions = self.store.lock();
        f(sessions.entry(self.id).or_default())
    }

    pub fn apply(&self, event: SessionEvent) -> Result<(), SessionError> {
        self.with(|session| session.apply(event))
    }

    pub fn check_ready(&self, feature: Feature) -> Result<(), SessionError> {
        self.with(|session| session.check_ready(feature))
    }

    pub fn view(&self) -> SessionView {
        self.with(|session| session.view())
    }

    /// Move `feature` to awaiting-response. The workflow goes back to idle
    /// when the returned guard is dropped, including when the request future
    /// is cancelled.
    pub fn begin(&self, feature: Feature) -> Result<InFlight, SessionError> {
        self.apply(SessionEvent::Trigger(feature))?;
        Ok(InFlight {
            session: self.clone(),
            feature,
        })
    }
}

pub struct InFlight {
    session: SessionHandle,
    feature: Feature,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        if let Err(e) = self.session.apply(SessionEvent::Finish(self.feature)) {
            tracing::debug!("finish after drop: {e}");
        }
    }
}
