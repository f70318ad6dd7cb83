//! Filesystem-backed reference implementations of the three external-collaborator traits
//! (`TokenStore`, `RootStore`, `UserInteraction`), so `iod` is runnable standalone without a
//! real host application. Feature-gated behind `local-backends` so an embedding host can
//! depend on the core without pulling in a filesystem-specific implementation.

pub mod root_store;
pub mod token_store;
pub mod user_interaction;

pub use root_store::FsRootStore;
pub use token_store::FsTokenStore;
pub use user_interaction::{LoggingUserInteraction, PairingApprovalPolicy};
