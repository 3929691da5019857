//! Remote command lines
//!
//! The unit, user and session names come from the install scripts; they are
//! the contract between install-time setup and runtime control.

use gs_core::config::ProvisioningConfig;
use gs_core::shell::quote;

/// Command that succeeds once the container accepts logins
pub const READY_PROBE: &str = "echo ready";

/// Service-manager actions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceAction {
    Start,
    Stop,
    Restart,
}

impl ServiceAction {
    pub fn verb(&self) -> &'static str {
        match self {
            ServiceAction::Start => "start",
            ServiceAction::Stop => "stop",
            ServiceAction::Restart => "restart",
        }
    }
}

/// Builds command lines for one deployment's naming
#[derive(Debug, Clone)]
pub struct CommandSet {
    staging_path: String,
    service_unit: String,
    service_user: String,
    terminal_session: String,
}

impl CommandSet {
    pub fn new(config: &ProvisioningConfig) -> Self {
        Self {
            staging_path: config.staging_path.clone(),
            service_unit: config.service_unit.clone(),
            service_user: config.service_user.clone(),
            terminal_session: config.terminal_session.clone(),
        }
    }

    pub fn install(&self, args: &str) -> String {
        format!("bash {} {}", quote(&self.staging_path), args)
    }

    pub fn service(&self, action: ServiceAction) -> String {
        format!("systemctl {} {}", action.verb(), quote(&self.service_unit))
    }

    pub fn is_active(&self) -> String {
        format!("systemctl is-active {}", quote(&self.service_unit))
    }

    /// Type `text` into the managed terminal session, followed by Enter
    pub fn send_keys(&self, text: &str) -> String {
        let inner = format!(
            "TMUX_TMPDIR=/tmp tmux send-keys -t {} {} Enter",
            quote(&self.terminal_session),
            quote(text)
        );
        self.as_service_user(&inner)
    }

    /// Attach an interactive shell to the managed terminal session
    pub fn attach_session(&self) -> String {
        let inner = format!(
            "TMUX_TMPDIR=/tmp tmux attach -t {}",
            quote(&self.terminal_session)
        );
        self.as_service_user(&inner)
    }

    fn as_service_user(&self, command: &str) -> String {
        format!(
            "su -s /bin/bash {} -c {}",
            quote(&self.service_user),
            quote(command)
        )
    }
}
