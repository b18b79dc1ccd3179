use crate::config::ActivationConfig;
use std::sync::atomic::{AtomicBool, Ordering};

/// Admin command recognized by the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivationCommand {
    Enable,
    Disable,
}

/// Result of applying an [`ActivationCommand`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    Activated,
    Deactivated,
    AlreadyActive,
    AlreadyInactive,
    Denied,
}

impl CommandOutcome {
    /// Status line posted back to the issuer.
    pub fn reply_text(self) -> &'static str {
        match self {
            Self::Activated => "Nickname rotation is now active.",
            Self::Deactivated => "Nickname rotation is now inactive.",
            Self::AlreadyActive => "Nickname rotation is already active.",
            Self::AlreadyInactive => "Nickname rotation is already inactive.",
            Self::Denied => "You don't have permission to use this command.",
        }
    }
}

/// INACTIVE/ACTIVE switch for the rotator.
///
/// With `required = false` the gate is permanently open and recognizes no
/// commands.
#[derive(Debug)]
pub struct ActivationGate {
    required: bool,
    active: AtomicBool,
    enable_command: String,
    disable_command: String,
}

impl ActivationGate {
    pub fn new(config: &ActivationConfig) -> Self {
        Self {
            required: config.required,
            active: AtomicBool::new(!config.required),
            enable_command: config.enable_command.trim().to_string(),
            disable_command: config.disable_command.trim().to_string(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Match message content against the configured commands.
    pub fn parse_command(&self, content: &str) -> Option<ActivationCommand> {
        if !self.required {
            return None;
        }
        let content = content.trim();
        if content == self.enable_command {
            Some(ActivationCommand::Enable)
        } else if content == self.disable_command {
            Some(ActivationCommand::Disable)
        } else {
            None
        }
    }

    /// Apply a command. Unauthorized issuers never change the state.
    pub fn apply(&self, command: ActivationCommand, authorized: bool) -> CommandOutcome {
        if !authorized {
            return CommandOutcome::Denied;
        }
        let (from, to) = match command {
            ActivationCommand::Enable => (false, true),
            ActivationCommand::Disable => (true, false),
        };
        match self
            .active
            .compare_exchange(from, to, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) if to => CommandOutcome::Activated,
            Ok(_) => CommandOutcome::Deactivated,
            Err(_) if to => CommandOutcome::AlreadyActive,
            Err(_) => CommandOutcome::AlreadyInactive,
        }
    }
}
