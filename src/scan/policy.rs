use chrono::NaiveDateTime;

use crate::db::ReentryPolicy;
use crate::models::{ScanEvent, ScanReason, Ticket};

/// Duplicate/re-entry verdict for a ticket that already passed every other
/// gate. `prior` is the most recent ALLOW inside the duplicate window, if any.
#[derive(Debug, PartialEq, Eq)]
pub enum EntryVerdict {
    FirstEntry,
    Reentry,
    Deny {
        reason: ScanReason,
        minutes_remaining: Option<i64>,
    },
}

pub fn evaluate_entry(
    ticket: &Ticket,
    prior: Option<&ScanEvent>,
    reentry: Option<&ReentryPolicy>,
    now: NaiveDateTime,
) -> EntryVerdict {
    // No admitted scan inside the window: plain first entry.
    if prior.is_none() {
        return EntryVerdict::FirstEntry;
    }

    let Some(policy) = reentry else {
        return EntryVerdict::Deny {
            reason: ScanReason::NoReentry,
            minutes_remaining: None,
        };
    };

    if !policy.enabled {
        return EntryVerdict::Deny {
            reason: ScanReason::ReentryDisabled,
            minutes_remaining: None,
        };
    }

    if ticket.scan_count >= policy.max_reentries {
        return EntryVerdict::Deny {
            reason: ScanReason::MaxReentriesReached,
            minutes_remaining: None,
        };
    }

    if let Some(last) = ticket.last_scanned_at {
        let elapsed_minutes = (now - last).num_minutes();
        if elapsed_minutes < policy.cooldown_minutes {
            return EntryVerdict::Deny {
                reason: ScanReason::CooldownActive,
                minutes_remaining: Some(policy.cooldown_minutes - elapsed_minutes),
            };
        }
    }

    EntryVerdict::Reentry
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AccessLevel, ScanResult, TenantId, TicketStatus};
    use chrono::{Duration, Utc};

    fn ticket(scan_count: i64, last_scanned_minutes_ago: Option<i64>) -> Ticket {
        let now = Utc::now().naive_utc();
        Ticket {
            id: "tk-1".to_string(),
            tenant_id: TenantId::new("t-1"),
            event_id: "ev-1".to_string(),
            venue_id: "v-1".to_string(),
            status: TicketStatus::Sold,
            access_level: AccessLevel::Ga,
            qr_hmac_secret: vec![0u8; 32],
            valid_from: None,
            valid_until: None,
            scan_count,
            last_scanned_at: last_scanned_minutes_ago.map(|m| now - Duration::minutes(m)),
            is_minted: false,
            mint_address: None,
            mint_tx_id: None,
        }
    }

    fn prior_allow() -> ScanEvent {
        ScanEvent {
            id: 1,
            ticket_id: "tk-1".to_string(),
            device_id: "dev-1".to_string(),
            tenant_id: TenantId::new("t-1"),
            result: ScanResult::Allow,
            reason: ScanReason::FirstEntry,
            scanned_at: Utc::now().naive_utc() - Duration::minutes(5),
        }
    }

    fn policy(enabled: bool, max_reentries: i64, cooldown_minutes: i64) -> ReentryPolicy {
        ReentryPolicy {
            enabled,
            max_reentries,
            cooldown_minutes,
        }
    }

    #[test]
    fn test_no_prior_is_first_entry() {
        let now = Utc::now().naive_utc();
        assert_eq!(evaluate_entry(&ticket(0, None), None, None, now), EntryVerdict::FirstEntry);
    }

    #[test]
    fn test_prior_without_policy_denies() {
        let now = Utc::now().naive_utc();
        let verdict = evaluate_entry(&ticket(1, Some(5)), Some(&prior_allow()), None, now);
        assert_eq!(
            verdict,
            EntryVerdict::Deny {
                reason: ScanReason::NoReentry,
                minutes_remaining: None
            }
        );
    }

    #[test]
    fn test_disabled_policy_denies() {
        let now = Utc::now().naive_utc();
        let policy = policy(false, 5, 10);
        let verdict = evaluate_entry(&ticket(1, Some(5)), Some(&prior_allow()), Some(&policy), now);
        assert_eq!(
            verdict,
            EntryVerdict::Deny {
                reason: ScanReason::ReentryDisabled,
                minutes_remaining: None
            }
        );
    }

    #[test]
    fn test_max_reentries_reached() {
        let now = Utc::now().naive_utc();
        let policy = policy(true, 5, 10);
        let verdict = evaluate_entry(&ticket(5, Some(30)), Some(&prior_allow()), Some(&policy), now);
        assert_eq!(
            verdict,
            EntryVerdict::Deny {
                reason: ScanReason::MaxReentriesReached,
                minutes_remaining: None
            }
        );
    }

    #[test]
    fn test_cooldown_reports_minutes_remaining() {
        let now = Utc::now().naive_utc();
        let policy = policy(true, 5, 10);
        // Last admitted 5 minutes ago with a 10 minute cooldown.
        let verdict = evaluate_entry(&ticket(1, Some(5)), Some(&prior_allow()), Some(&policy), now);
        match verdict {
            EntryVerdict::Deny {
                reason: ScanReason::CooldownActive,
                minutes_remaining: Some(minutes),
            } => assert!((4..=6).contains(&minutes), "minutes was {}", minutes),
            other => panic!("expected cooldown, got {:?}", other),
        }
    }

    #[test]
    fn test_reentry_after_cooldown() {
        let now = Utc::now().naive_utc();
        let policy = policy(true, 5, 10);
        let verdict = evaluate_entry(&ticket(1, Some(11)), Some(&prior_allow()), Some(&policy), now);
        assert_eq!(verdict, EntryVerdict::Reentry);
    }
}
