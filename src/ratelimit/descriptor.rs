//! Counter key generation and handling.

use std::fmt;

use super::rules::Tier;

/// Key used for the single process-wide counter of the global tier.
pub const GLOBAL_KEY: &str = "global";

/// A key that uniquely identifies a window counter.
///
/// Composed of the tier and the tier-specific subject (an IP address, a
/// country code, or [`GLOBAL_KEY`]).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CounterKey {
    /// The tier this counter belongs to
    pub tier: Tier,
    /// The subject being counted within the tier
    pub subject: String,
}

impl CounterKey {
    pub fn new(tier: Tier, subject: &str) -> Self {
        Self {
            tier,
            subject: subject.to_string(),
        }
    }

    pub fn global() -> Self {
        Self::new(Tier::Global, GLOBAL_KEY)
    }
}

impl fmt::Display for CounterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.tier, self.subject)
    }
}
