use std::sync::{Arc, PoisonError, RwLock};

use serde_json::{Value, json};
use tokio::sync::Mutex;
use wire::{Capabilities, CommandError, CommandResult, CommandState, RequestContext};

use crate::screen::Screen;

pub struct DeviceSession {
    pub id: String,
    pub capabilities: Capabilities,
}

impl DeviceSession {
    pub fn summary(&self) -> Value {
        json!({ "id": self.id, "capabilities": self.capabilities.to_value() })
    }
}

/// Everything the device routes share. The device serves one session at a
/// time.
pub struct DeviceState {
    pub screen: Arc<dyn Screen>,
    session: Mutex<Option<DeviceSession>>,
    /// Id of the open session, readable without awaiting `session`.
    active: RwLock<Option<String>>,
}

impl DeviceState {
    pub fn new(screen: Arc<dyn Screen>) -> Self {
        Self {
            screen,
            session: Mutex::new(None),
            active: RwLock::new(None),
        }
    }

    fn set_active(&self, id: Option<&str>) {
        *self.active.write().unwrap_or_else(PoisonError::into_inner) = id.map(str::to_string);
    }

    fn is_active(&self, id: &str) -> bool {
        self.active
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_deref()
            == Some(id)
    }

    pub async fn open(&self, capabilities: Capabilities) -> CommandResult<String> {
        let mut guard = self.session.lock().await;
        if let Some(active) = guard.as_ref() {
            return Err(CommandError::SessionNotCreated(format!(
                "session {} is still active",
                active.id
            )));
        }
        let id = uuid::Uuid::new_v4().to_string();
        tracing::info!(session_id = %id, "session opened");
        self.set_active(Some(&id));
        *guard = Some(DeviceSession {
            id: id.clone(),
            capabilities,
        });
        Ok(id)
    }

    /// Checks `ctx` addresses the active session and returns its
    /// capabilities.
    pub async fn require(&self, ctx: &RequestContext) -> CommandResult<Capabilities> {
        let wanted = ctx.session_id().unwrap_or_default();
        match self.session.lock().await.as_ref() {
            Some(session) if session.id == wanted => Ok(session.capabilities.clone()),
            _ => Err(CommandError::NoSuchSession(wanted.to_string())),
        }
    }

    pub async fn close(&self, ctx: &RequestContext) -> CommandResult<()> {
        let wanted = ctx.session_id().unwrap_or_default();
        let mut guard = self.session.lock().await;
        match guard.take() {
            Some(session) if session.id == wanted => {
                tracing::info!(session_id = %session.id, "session closed");
                self.set_active(None);
                Ok(())
            }
            other => {
                *guard = other;
                Err(CommandError::NoSuchSession(wanted.to_string()))
            }
        }
    }

    pub async fn sessions(&self) -> Vec<Value> {
        self.session
            .lock()
            .await
            .iter()
            .map(DeviceSession::summary)
            .collect()
    }
}

impl CommandState for DeviceState {
    fn alert_open(&self, ctx: &RequestContext) -> bool {
        // Only the open session can be blocked by a dialog; other ids fall
        // through to their handler and answer no such session.
        ctx.session_id().is_some_and(|id| self.is_active(id)) && self.screen.alert_text().is_some()
    }
}
