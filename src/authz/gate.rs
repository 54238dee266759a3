use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use utoipa::ToSchema;

use super::catalog::{Action, Module, PermissionKey};
use super::session::PermissionSession;

/// Event delivered to a control when it is activated
pub trait ControlEvent {
    fn stop_propagation(&mut self);
    fn propagation_stopped(&self) -> bool;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClickEvent {
    pub source: Option<String>,
    propagation_stopped: bool,
}

impl ClickEvent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_source(source: impl Into<String>) -> Self {
        Self {
            source: Some(source.into()),
            propagation_stopped: false,
        }
    }
}

impl ControlEvent for ClickEvent {
    fn stop_propagation(&mut self) {
        self.propagation_stopped = true;
    }

    fn propagation_stopped(&self) -> bool {
        self.propagation_stopped
    }
}

/// Denial explanation shown in place of the action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct DenialDialog {
    pub title: String,
    pub message: String,
    pub module: Module,
    pub action: Action,
}

impl DenialDialog {
    pub fn new(key: PermissionKey, custom_message: Option<&str>) -> Self {
        Self {
            title: "Permission required".to_string(),
            message: custom_message
                .map(str::to_string)
                .unwrap_or_else(|| denial_message(key)),
            module: key.module,
            action: key.action,
        }
    }
}

pub fn denial_message(key: PermissionKey) -> String {
    format!(
        "You do not have permission to {} in {}.",
        key.action.label().to_lowercase(),
        key.module.label()
    )
}

/// Passed to a custom denial handler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Denial {
    pub required: PermissionKey,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Emphasis {
    Normal,
    /// Still focusable and clickable, only visually marked
    Reduced,
}

#[derive(Debug, PartialEq, Eq)]
pub enum GateOutcome<T> {
    Executed(T),
    DeniedHandled,
    DeniedDialog(DenialDialog),
}

impl<T> GateOutcome<T> {
    pub fn executed(&self) -> bool {
        matches!(self, GateOutcome::Executed(_))
    }
}

pub type DenialHandler = Arc<dyn Fn(Denial) + Send + Sync>;

/// Wraps an interactive control so its action only fires when the required
/// permission is granted by the session
#[derive(Clone)]
pub struct GatedControl {
    required: PermissionKey,
    on_denied: Option<DenialHandler>,
    message: Option<String>,
}

impl fmt::Debug for GatedControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatedControl")
            .field("required", &self.required)
            .field("on_denied", &self.on_denied.is_some())
            .field("message", &self.message)
            .finish()
    }
}

impl GatedControl {
    pub fn new(module: Module, action: Action) -> Self {
        Self {
            required: PermissionKey::new(module, action),
            on_denied: None,
            message: None,
        }
    }

    pub fn on_denied(mut self, handler: impl Fn(Denial) + Send + Sync + 'static) -> Self {
        self.on_denied = Some(Arc::new(handler));
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn required(&self) -> PermissionKey {
        self.required
    }

    pub fn emphasis(&self, session: &PermissionSession) -> Emphasis {
        if session.is_granted(self.required) {
            Emphasis::Normal
        } else {
            Emphasis::Reduced
        }
    }

    pub fn activate<E, T>(
        &self,
        session: &PermissionSession,
        event: &mut E,
        on_click: impl FnOnce(&mut E) -> T,
    ) -> GateOutcome<T>
    where
        E: ControlEvent,
    {
        if session.is_granted(self.required) {
            return GateOutcome::Executed(on_click(event));
        }

        tracing::debug!(permission = %self.required, "gated control denied");

        if let Some(handler) = &self.on_denied {
            handler(Denial {
                required: self.required,
            });
            return GateOutcome::DeniedHandled;
        }

        event.stop_propagation();
        GateOutcome::DeniedDialog(DenialDialog::new(self.required, self.message.as_deref()))
    }
}
