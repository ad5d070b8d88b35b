use crate::models::{BundleSubmission, Leg, OrderRequest, Pubkey, TrackedEvent};

// Event types for internal messaging
#[derive(Debug, Clone)]
pub enum BotEvent {
    /// Normalized webhook notification
    Tracked(TrackedEvent),
    BundleSubmitted(BundleSubmission),
    BundleLanded {
        bundle_id: String,
        mint: Pubkey,
        order: OrderRequest,
    },
    /// Relay rejected an attempt and another attempt is on its way
    BundleRetrying {
        bundle_id: String,
        mint: Pubkey,
        leg: Leg,
        reason: String,
    },
    /// Final rejection once the attempt budget is spent
    BundleExhausted {
        bundle_id: String,
        mint: Pubkey,
        leg: Leg,
        reason: String,
    },
    /// Submission failed before any bundle id could be assigned
    SubmissionFailed {
        mint: Pubkey,
        leg: Leg,
        reason: String,
    },
}
