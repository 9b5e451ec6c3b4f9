//! Rate limiting logic and state management.

mod backend;
mod counter;
mod descriptor;
mod limiter;
mod rules;
mod store;

pub use backend::CounterBackend;
pub use counter::{spawn_sweeper, HitResult, WindowCounter};
pub use descriptor::{CounterKey, GLOBAL_KEY};
pub use limiter::{Decision, DenyReason, RateLimitEnforcer, UNKNOWN_COUNTRY};
pub use rules::{
    RateLimitConfig, RateLimitConfigPatch, Tier, UpstreamTier, UpstreamTierPatch, WindowTier,
    WindowTierPatch,
};
pub use store::ConfigStore;
