//! Token/cost accounting types (spec.md §3, Session token counters; §4.1
//! `usage` events; §4.7 `addUsage`/`addModelUsage`).

use serde::{Deserialize, Serialize};

/// The four token counters tracked per `usage` event, and accumulated both
/// overall and per-model on a session (spec.md §3, §8 invariant I2).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenCounters {
    /// New input tokens for this turn.
    pub input_tokens: u64,
    /// Output tokens generated this turn.
    pub output_tokens: u64,
    /// Tokens used to write the prompt cache this turn.
    #[serde(rename = "cacheCreationTokens")]
    pub cache_creation_tokens: u64,
    /// Tokens read from the prompt cache this turn.
    #[serde(rename = "cacheReadTokens")]
    pub cache_read_tokens: u64,
}

impl TokenCounters {
    /// Additively combine two counter sets (invariant I2: counters are
    /// monotonically non-decreasing, so accumulation is always addition,
    /// never replacement).
    #[must_use]
    pub fn saturating_add(&self, other: &Self) -> Self {
        Self {
            input_tokens: self.input_tokens.saturating_add(other.input_tokens),
            output_tokens: self.output_tokens.saturating_add(other.output_tokens),
            cache_creation_tokens: self
                .cache_creation_tokens
                .saturating_add(other.cache_creation_tokens),
            cache_read_tokens: self
                .cache_read_tokens
                .saturating_add(other.cache_read_tokens),
        }
    }

    /// Total tokens across all four counters.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.input_tokens
            .saturating_add(self.output_tokens)
            .saturating_add(self.cache_creation_tokens)
            .saturating_add(self.cache_read_tokens)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulation_is_additive() {
        let a = TokenCounters {
            input_tokens: 10,
            output_tokens: 5,
            cache_creation_tokens: 0,
            cache_read_tokens: 0,
        };
        let b = TokenCounters {
            input_tokens: 3,
            output_tokens: 7,
            cache_creation_tokens: 1,
            cache_read_tokens: 2,
        };
        let sum = a.saturating_add(&b);
        assert_eq!(sum.input_tokens, 13);
        assert_eq!(sum.output_tokens, 12);
        assert_eq!(sum.cache_creation_tokens, 1);
        assert_eq!(sum.cache_read_tokens, 2);
    }

    #[test]
    fn total_sums_all_counters() {
        let c = TokenCounters {
            input_tokens: 1,
            output_tokens: 2,
            cache_creation_tokens: 3,
            cache_read_tokens: 4,
        };
        assert_eq!(c.total(), 10);
    }

    #[test]
    fn saturating_add_does_not_overflow() {
        let a = TokenCounters {
            input_tokens: u64::MAX,
            ..Default::default()
        };
        let b = TokenCounters {
            input_tokens: 1,
            ..Default::default()
        };
        assert_eq!(a.saturating_add(&b).input_tokens, u64::MAX);
    }
}
