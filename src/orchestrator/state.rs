//! The adaptive engine state machine.
//!
//! ```text
//!            primary fails (count == cooldown_after)
//!   Normal ─────────────────────────────────────────▶ Cooldown { n }
//!     ▲  │                                              │
//!     │  │ primary fails (count >= permanent_after)     │ n forced pages done
//!     │  ▼                                              │
//!     │ PermanentFallback                               │
//!     └─────────────────────────────────────────────────┘
//! ```
//!
//! The failure counter counts *consecutive* primary failures and is reset
//! only by a primary success. A cooldown does not reset it, so the first
//! failure after a cooldown ends is already the third in a row and
//! disables the primary for the rest of the job.

use crate::config::EscalationPolicy;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which engine a job is currently routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum EngineMode {
    /// Primary first, secondary on failure.
    Normal,
    /// Secondary forced for the next `remaining` pages.
    Cooldown { remaining: u32 },
    /// Secondary forced for the rest of the job.
    PermanentFallback,
}

impl fmt::Display for EngineMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineMode::Normal => f.write_str("normal"),
            EngineMode::Cooldown { remaining } => write!(f, "cooldown ({remaining} pages left)"),
            EngineMode::PermanentFallback => f.write_str("permanent fallback"),
        }
    }
}

/// Input to [`EngineState::apply`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineEvent {
    /// The primary engine produced a page.
    PrimarySucceeded,
    /// The primary engine failed (error, block, timeout).
    PrimaryFailed,
    /// A page the state forced onto the secondary engine is finished.
    ForcedPageDone,
}

/// A change between mode variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModeChange {
    pub from: EngineMode,
    pub to: EngineMode,
}

/// The part of an [`EngineState`] that survives a restart.
///
/// Thresholds are not stored; a resumed job applies the current
/// [`EscalationPolicy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineSnapshot {
    pub mode: EngineMode,
    pub consecutive_primary_failures: u32,
}

/// Per-job escalation state. Owned by exactly one running job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineState {
    mode: EngineMode,
    consecutive_primary_failures: u32,
    policy: EscalationPolicy,
}

impl EngineState {
    pub fn new(policy: EscalationPolicy) -> Self {
        Self {
            mode: EngineMode::Normal,
            consecutive_primary_failures: 0,
            policy,
        }
    }

    /// Continue from a state saved by an earlier run of the same job.
    pub fn restore(policy: EscalationPolicy, snapshot: EngineSnapshot) -> Self {
        Self {
            mode: snapshot.mode,
            consecutive_primary_failures: snapshot.consecutive_primary_failures,
            policy,
        }
    }

    pub fn snapshot(&self) -> EngineSnapshot {
        EngineSnapshot {
            mode: self.mode,
            consecutive_primary_failures: self.consecutive_primary_failures,
        }
    }

    pub fn mode(&self) -> EngineMode {
        self.mode
    }

    pub fn consecutive_primary_failures(&self) -> u32 {
        self.consecutive_primary_failures
    }

    /// Whether the next page should try the primary engine first.
    pub fn uses_primary(&self) -> bool {
        self.mode == EngineMode::Normal
    }

    /// Apply one event. Returns the change when the mode variant changed.
    ///
    /// Events that make no sense in the current mode (a primary result while
    /// the primary is bypassed, a forced page while in Normal) are ignored.
    pub fn apply(&mut self, event: EngineEvent) -> Option<ModeChange> {
        let from = self.mode;
        let to = match (self.mode, event) {
            (EngineMode::Normal, EngineEvent::PrimarySucceeded) => {
                self.consecutive_primary_failures = 0;
                EngineMode::Normal
            }
            (EngineMode::Normal, EngineEvent::PrimaryFailed) => {
                self.consecutive_primary_failures += 1;
                let n = self.consecutive_primary_failures;
                if n >= self.policy.permanent_after {
                    EngineMode::PermanentFallback
                } else if n == self.policy.cooldown_after {
                    EngineMode::Cooldown {
                        remaining: self.policy.cooldown_pages,
                    }
                } else {
                    EngineMode::Normal
                }
            }
            (EngineMode::Cooldown { remaining }, EngineEvent::ForcedPageDone) => match remaining {
                0 | 1 => EngineMode::Normal,
                n => EngineMode::Cooldown { remaining: n - 1 },
            },
            (mode, _) => mode,
        };
        self.mode = to;
        let changed = std::mem::discriminant(&from) != std::mem::discriminant(&to);
        changed.then_some(ModeChange { from, to })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> EngineState {
        EngineState::new(EscalationPolicy::default())
    }

    #[test]
    fn success_resets_counter() {
        let mut s = state();
        s.apply(EngineEvent::PrimaryFailed);
        assert_eq!(s.consecutive_primary_failures(), 1);
        assert_eq!(s.apply(EngineEvent::PrimarySucceeded), None);
        assert_eq!(s.consecutive_primary_failures(), 0);
        assert!(s.uses_primary());
    }

    #[test]
    fn second_failure_opens_five_page_cooldown() {
        let mut s = state();
        assert_eq!(s.apply(EngineEvent::PrimaryFailed), None);
        let change = s.apply(EngineEvent::PrimaryFailed).unwrap();
        assert_eq!(change.from, EngineMode::Normal);
        assert_eq!(change.to, EngineMode::Cooldown { remaining: 5 });

        for left in (1..5).rev() {
            assert_eq!(s.apply(EngineEvent::ForcedPageDone), None);
            assert_eq!(s.mode(), EngineMode::Cooldown { remaining: left });
        }
        let back = s.apply(EngineEvent::ForcedPageDone).unwrap();
        assert_eq!(back.to, EngineMode::Normal);
    }

    #[test]
    fn failure_after_cooldown_is_permanent() {
        let mut s = state();
        s.apply(EngineEvent::PrimaryFailed);
        s.apply(EngineEvent::PrimaryFailed);
        for _ in 0..5 {
            s.apply(EngineEvent::ForcedPageDone);
        }
        assert_eq!(s.mode(), EngineMode::Normal);
        let change = s.apply(EngineEvent::PrimaryFailed).unwrap();
        assert_eq!(change.to, EngineMode::PermanentFallback);
    }

    #[test]
    fn permanent_fallback_never_recovers() {
        let mut s = EngineState::new(EscalationPolicy {
            cooldown_after: 2,
            cooldown_pages: 5,
            permanent_after: 3,
        });
        s.mode = EngineMode::PermanentFallback;
        for event in [
            EngineEvent::ForcedPageDone,
            EngineEvent::PrimarySucceeded,
            EngineEvent::ForcedPageDone,
        ] {
            assert_eq!(s.apply(event), None);
        }
        assert_eq!(s.mode(), EngineMode::PermanentFallback);
    }

    #[test]
    fn restored_cooldown_continues_where_it_stopped() {
        let mut s = state();
        s.apply(EngineEvent::PrimaryFailed);
        s.apply(EngineEvent::PrimaryFailed);
        s.apply(EngineEvent::ForcedPageDone);
        s.apply(EngineEvent::ForcedPageDone);

        let json = serde_json::to_string(&s.snapshot()).unwrap();
        let snapshot: EngineSnapshot = serde_json::from_str(&json).unwrap();
        let mut restored = EngineState::restore(EscalationPolicy::default(), snapshot);
        assert_eq!(restored, s);
        assert_eq!(restored.mode(), EngineMode::Cooldown { remaining: 3 });

        for _ in 0..3 {
            restored.apply(EngineEvent::ForcedPageDone);
        }
        assert_eq!(restored.mode(), EngineMode::Normal);
        assert_eq!(
            restored.apply(EngineEvent::PrimaryFailed).map(|c| c.to),
            Some(EngineMode::PermanentFallback)
        );
    }

    #[test]
    fn forced_page_in_normal_is_ignored() {
        let mut s = state();
        assert_eq!(s.apply(EngineEvent::ForcedPageDone), None);
        assert_eq!(s.mode(), EngineMode::Normal);
    }
}
