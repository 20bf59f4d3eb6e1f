//! Registry of session controllers, one per pane key.
//!
//! The registry owns every controller. Observers such as dashboards read
//! through a separate weak lookup table, so holding a lookup result never
//! keeps a removed controller alive.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock, Weak};

use tracing::{info, warn};

use yesman_types::{ControllerError, ControllerState, ControllerStatus, PaneKey};

use crate::controller::{ControllerContext, SessionController};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

/// Owns all [`SessionController`]s.
pub struct ControllerRegistry {
    ctx: ControllerContext,
    controllers: Mutex<HashMap<PaneKey, Arc<SessionController>>>,
    lookup: RwLock<HashMap<PaneKey, Weak<SessionController>>>,
}

impl ControllerRegistry {
    pub fn new(ctx: ControllerContext) -> Self {
        Self {
            ctx,
            controllers: Mutex::new(HashMap::new()),
            lookup: RwLock::new(HashMap::new()),
        }
    }

    pub fn context(&self) -> &ControllerContext {
        &self.ctx
    }

    /// The controller for `key`, created in `Created` state if absent.
    pub fn controller(&self, key: &PaneKey) -> Result<Arc<SessionController>, ControllerError> {
        let mut controllers = lock(&self.controllers);
        if let Some(existing) = controllers.get(key) {
            return Ok(Arc::clone(existing));
        }

        let controller = Arc::new(SessionController::new(key.clone(), self.ctx.clone())?);
        controllers.insert(key.clone(), Arc::clone(&controller));
        self.lookup
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.clone(), Arc::downgrade(&controller));
        info!(pane = %key, "controller registered");
        Ok(controller)
    }

    /// Weak lookup for observers; `None` once the controller is gone.
    pub fn lookup(&self, key: &PaneKey) -> Option<Arc<SessionController>> {
        self.lookup
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .and_then(Weak::upgrade)
    }

    fn existing(&self, key: &PaneKey) -> Result<Arc<SessionController>, ControllerError> {
        lock(&self.controllers)
            .get(key)
            .cloned()
            .ok_or_else(|| ControllerError::NotFound(key.to_string()))
    }

    /// Start monitoring `key`, creating its controller if needed.
    pub fn start(&self, key: &PaneKey) -> Result<ControllerState, ControllerError> {
        self.controller(key)?.start()
    }

    pub fn stop(&self, key: &PaneKey) -> Result<ControllerState, ControllerError> {
        self.existing(key)?.stop()
    }

    /// Restart `key`, creating its controller if needed.
    pub fn restart(&self, key: &PaneKey) -> Result<ControllerState, ControllerError> {
        self.controller(key)?.restart()
    }

    pub fn status(&self, key: &PaneKey) -> Option<ControllerStatus> {
        lock(&self.controllers).get(key).map(|c| c.status())
    }

    /// Stop and forget the controller for `key`.
    pub fn remove(&self, key: &PaneKey) -> Option<Arc<SessionController>> {
        let controller = lock(&self.controllers).remove(key)?;
        self.lookup
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key);
        if let Err(e) = controller.stop() {
            warn!(pane = %key, error = %e, "failed to stop removed controller");
        }
        Some(controller)
    }

    /// Stop every controller. Controllers stay registered.
    pub fn stop_all(&self) {
        let controllers: Vec<Arc<SessionController>> =
            lock(&self.controllers).values().cloned().collect();
        for controller in controllers {
            if let Err(e) = controller.stop() {
                warn!(pane = %controller.key(), error = %e, "failed to stop controller");
            }
        }
    }

    /// Status of every controller, sorted by pane key.
    pub fn statuses(&self) -> Vec<(PaneKey, ControllerStatus)> {
        let mut statuses: Vec<(PaneKey, ControllerStatus)> = lock(&self.controllers)
            .iter()
            .map(|(key, c)| (key.clone(), c.status()))
            .collect();
        statuses.sort_by(|a, b| a.0.cmp(&b.0));
        statuses
    }

    pub fn keys(&self) -> Vec<PaneKey> {
        let mut keys: Vec<PaneKey> = lock(&self.controllers).keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        lock(&self.controllers).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
