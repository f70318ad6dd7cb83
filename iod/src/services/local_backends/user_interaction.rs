//! `LoggingUserInteraction`: a non-interactive stand-in for the GUI collaborator, useful
//! for running the daemon standalone (headless hosts, integration tests) where no real
//! pairing-approval dialog or folder picker exists.

use async_trait::async_trait;
use jstorrentd_types::{PairingTriple, UserInteraction};

/// How [`LoggingUserInteraction`] resolves a pairing-approval request it cannot actually
/// show to a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairingApprovalPolicy {
    /// Approve every request. Intended for local development only.
    AutoApprove,
    /// Deny every request, requiring a real `UserInteraction` implementation in front of
    /// any host that cares about pairing at all.
    AlwaysDeny,
}

/// Logs pairing-approval and folder-picker requests at `info` level and resolves them
/// according to a fixed [`PairingApprovalPolicy`].
pub struct LoggingUserInteraction {
    policy: PairingApprovalPolicy,
}

impl LoggingUserInteraction {
    /// Creates a new instance with the given policy.
    pub fn new(policy: PairingApprovalPolicy) -> Self {
        Self { policy }
    }
}

#[async_trait]
impl UserInteraction for LoggingUserInteraction {
    async fn show_pairing_approval(&self, proposed: &PairingTriple, is_replace: bool) -> bool {
        let approved = self.policy == PairingApprovalPolicy::AutoApprove;
        tracing::info!(
            extension_id = %proposed.extension_id,
            install_id = %proposed.install_id,
            is_replace,
            approved,
            "pairing approval requested"
        );
        approved
    }

    async fn open_folder_picker(&self) {
        tracing::info!("folder picker requested, but no interactive picker is configured");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn auto_approve_policy_approves() {
        let ui = LoggingUserInteraction::new(PairingApprovalPolicy::AutoApprove);
        let triple = PairingTriple::new("t", "e", "i");
        assert!(ui.show_pairing_approval(&triple, false).await);
    }

    #[tokio::test]
    async fn always_deny_policy_denies() {
        let ui = LoggingUserInteraction::new(PairingApprovalPolicy::AlwaysDeny);
        let triple = PairingTriple::new("t", "e", "i");
        assert!(!ui.show_pairing_approval(&triple, true).await);
    }
}
