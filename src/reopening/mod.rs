use chrono::{DateTime, Duration, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::DeskConfig;
use crate::config::ReopeningConfig;
use crate::events::{EventSender, TicketEvent};
use crate::shared::enums::{ReopeningStatus, TicketStatus};
use crate::shared::error::{DeskError, DeskResult};
use crate::shared::schema::{ticket_reopenings, tickets};
use crate::tickets::{next_code, next_protocol, Ticket};

/// Links an original ticket to its reopened successor. Immutable after
/// insert except for `status`.
#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable)]
#[diesel(table_name = ticket_reopenings)]
pub struct ReopeningRecord {
    pub id: Uuid,
    pub original_ticket_id: Uuid,
    pub reopened_ticket_id: Uuid,
    pub initiated_by: Uuid,
    pub reason: Option<String>,
    pub days_between: i32,
    pub status: ReopeningStatus,
    pub created_at: DateTime<Utc>,
}

/// Whole days elapsed between closure and `now`.
pub fn days_between(closed_at: DateTime<Utc>, now: DateTime<Utc>) -> i32 {
    (now - closed_at).num_days().max(0) as i32
}

/// Eligibility check. The error message is the reason string callers
/// surface verbatim; it is a rejection, not an exception.
pub fn can_reopen(
    ticket: &Ticket,
    policy: &ReopeningConfig,
    now: DateTime<Utc>,
) -> DeskResult<()> {
    if !ticket.status.is_terminal() {
        return Err(DeskError::Validation(format!(
            "ticket {} is not concluded or cancelled",
            ticket.code
        )));
    }
    let closed_at = ticket.closed_at.ok_or_else(|| {
        DeskError::Validation(format!("ticket {} has no closure timestamp", ticket.code))
    })?;
    let elapsed = days_between(closed_at, now);
    if i64::from(elapsed) > policy.day_limit {
        return Err(DeskError::Validation(format!(
            "ticket {} was closed {} days ago, outside day limit of {}",
            ticket.code, elapsed, policy.day_limit
        )));
    }
    if ticket.reopen_count >= policy.max_reopenings {
        return Err(DeskError::Validation(format!(
            "ticket {} already reached the limit of {} reopenings",
            ticket.code, policy.max_reopenings
        )));
    }
    Ok(())
}

/// Tuple form of [`can_reopen`]: `(true, "")` on success, otherwise the
/// reason string.
pub fn reopen_eligibility(
    ticket: &Ticket,
    policy: &ReopeningConfig,
    now: DateTime<Utc>,
) -> (bool, String) {
    match can_reopen(ticket, policy, now) {
        Ok(()) => (true, String::new()),
        Err(e) => (false, e.to_string()),
    }
}

/// Most recently closed terminal ticket for the same contact/category
/// within the window; ties broken by closure time, then id. A "most
/// likely same underlying issue" heuristic, no fuzzy matching.
pub fn find_reopen_candidate(
    conn: &mut PgConnection,
    requester_email: &str,
    category: &str,
    policy: &ReopeningConfig,
    now: DateTime<Utc>,
) -> DeskResult<Option<Ticket>> {
    let window_start = now - Duration::days(policy.day_limit);

    let mut query = tickets::table
        .filter(tickets::status.eq_any(vec![TicketStatus::Concluded, TicketStatus::Cancelled]))
        .filter(tickets::closed_at.ge(window_start))
        .into_boxed();
    if policy.same_contact_only {
        query = query.filter(tickets::requester_email.eq(requester_email));
    }
    if policy.same_problem_only {
        query = query.filter(tickets::category.eq(category));
    }

    Ok(query
        .order((tickets::closed_at.desc(), tickets::id.desc()))
        .first(conn)
        .optional()?)
}

/// Reopen a closed ticket: create the linked successor, bump the
/// original's reopen count and insert the ReopeningRecord, atomically.
/// Eligibility is re-validated inside the transaction with the original
/// row locked, and a code/protocol uniqueness race is retried once with
/// freshly computed values.
#[allow(clippy::too_many_arguments)]
pub fn reopen(
    conn: &mut PgConnection,
    original_id: Uuid,
    initiated_by: Uuid,
    authorized: bool,
    reason: Option<String>,
    config: &DeskConfig,
    events: Option<&EventSender>,
    now: DateTime<Utc>,
) -> DeskResult<(Ticket, ReopeningRecord)> {
    if !authorized {
        return Err(DeskError::PermissionDenied(
            "only the requester or an administrator may reopen a ticket".to_string(),
        ));
    }

    let (successor, record, original_code) =
        match try_reopen(conn, original_id, initiated_by, reason.clone(), config, now) {
            Err(err) if err.is_retryable() => {
                log::warn!(
                    "Reopening of ticket {} hit a conflict, retrying once: {}",
                    original_id,
                    err
                );
                try_reopen(conn, original_id, initiated_by, reason, config, now)
            }
            other => other,
        }?;

    if let Some(events) = events {
        events.emit(TicketEvent::TicketReopened {
            original_id: record.original_ticket_id,
            original_code,
            successor_id: successor.id,
            successor_code: successor.code.clone(),
            initiated_by,
        });
    }
    Ok((successor, record))
}

fn try_reopen(
    conn: &mut PgConnection,
    original_id: Uuid,
    initiated_by: Uuid,
    reason: Option<String>,
    config: &DeskConfig,
    now: DateTime<Utc>,
) -> DeskResult<(Ticket, ReopeningRecord, String)> {
    conn.transaction(|conn| {
        let original: Ticket = tickets::table
            .filter(tickets::id.eq(original_id))
            .for_update()
            .first(conn)
            .optional()?
            .ok_or_else(|| DeskError::NotFound(format!("ticket {}", original_id)))?;

        can_reopen(&original, &config.reopening, now)?;
        let elapsed = original
            .closed_at
            .map(|closed| days_between(closed, now))
            .unwrap_or(0);

        let code = next_code(conn, &config.tickets)?;
        let protocol = next_protocol(conn, now)?;
        let priority = if config.reopening.inherit_priority {
            original.priority.clone()
        } else {
            config.tickets.default_priority.clone()
        };

        let successor = Ticket::successor_of(&original, code, protocol, priority, now);
        diesel::insert_into(tickets::table)
            .values(&successor)
            .execute(conn)?;

        diesel::update(tickets::table.filter(tickets::id.eq(original.id)))
            .set((
                tickets::reopen_count.eq(tickets::reopen_count + 1),
                tickets::updated_at.eq(now),
            ))
            .execute(conn)?;

        let record = ReopeningRecord {
            id: Uuid::new_v4(),
            original_ticket_id: original.id,
            reopened_ticket_id: successor.id,
            initiated_by,
            reason,
            days_between: elapsed,
            status: ReopeningStatus::Active,
            created_at: now,
        };
        diesel::insert_into(ticket_reopenings::table)
            .values(&record)
            .execute(conn)?;

        log::info!(
            "Ticket {} reopened as {} after {} days",
            original.code,
            successor.code,
            record.days_between
        );
        Ok((successor, record, original.code.clone()))
    })
}

/// Reopening history of a ticket, newest first.
pub fn reopenings_for(
    conn: &mut PgConnection,
    ticket_id: Uuid,
) -> DeskResult<Vec<ReopeningRecord>> {
    Ok(ticket_reopenings::table
        .filter(ticket_reopenings::original_ticket_id.eq(ticket_id))
        .order(ticket_reopenings::created_at.desc())
        .load(conn)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn concluded_ticket(closed_days_ago: i64, reopen_count: i32) -> (Ticket, DateTime<Utc>) {
        let now = Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).unwrap();
        let closed_at = now - Duration::days(closed_days_ago);
        let ticket = Ticket {
            id: Uuid::new_v4(),
            code: "EVQ-0010".to_string(),
            protocol: "20240301-1".to_string(),
            subject: "Printer jam".to_string(),
            description: None,
            requester_email: "user@example.com".to_string(),
            requester_name: None,
            category: "hardware".to_string(),
            status: TicketStatus::Concluded,
            priority: "medium".to_string(),
            opened_at: closed_at - Duration::days(1),
            closed_at: Some(closed_at),
            origin_ticket_id: None,
            reopen_count,
            current_agent_id: None,
            transfer_count: 0,
            last_transfer_at: None,
            created_at: closed_at - Duration::days(1),
            updated_at: closed_at,
        };
        (ticket, now)
    }

    #[test]
    fn concluded_within_window_is_eligible() {
        let (ticket, now) = concluded_ticket(3, 0);
        let policy = ReopeningConfig::default();
        let (ok, reason) = reopen_eligibility(&ticket, &policy, now);
        assert!(ok);
        assert!(reason.is_empty());
    }

    #[test]
    fn open_and_in_progress_are_never_eligible() {
        let policy = ReopeningConfig::default();
        for status in [TicketStatus::Open, TicketStatus::InProgress] {
            let (mut ticket, now) = concluded_ticket(1, 0);
            ticket.status = status;
            let (ok, reason) = reopen_eligibility(&ticket, &policy, now);
            assert!(!ok);
            assert!(reason.contains("not concluded or cancelled"));
        }
    }

    #[test]
    fn closed_outside_day_limit_is_rejected() {
        let (ticket, now) = concluded_ticket(10, 0);
        let policy = ReopeningConfig::default();
        let (ok, reason) = reopen_eligibility(&ticket, &policy, now);
        assert!(!ok);
        assert!(reason.contains("outside day limit"));
    }

    #[test]
    fn boundary_day_is_still_inside_the_window() {
        let (ticket, now) = concluded_ticket(7, 0);
        let policy = ReopeningConfig::default();
        assert!(can_reopen(&ticket, &policy, now).is_ok());
    }

    #[test]
    fn missing_closure_timestamp_is_rejected() {
        let (mut ticket, now) = concluded_ticket(3, 0);
        ticket.closed_at = None;
        let policy = ReopeningConfig::default();
        let (ok, reason) = reopen_eligibility(&ticket, &policy, now);
        assert!(!ok);
        assert!(reason.contains("closure timestamp"));
    }

    #[test]
    fn reopen_limit_is_enforced() {
        let (ticket, now) = concluded_ticket(3, 3);
        let policy = ReopeningConfig::default();
        let (ok, reason) = reopen_eligibility(&ticket, &policy, now);
        assert!(!ok);
        assert!(reason.contains("limit of 3 reopenings"));
    }

    #[test]
    fn cancelled_tickets_can_also_be_reopened() {
        let (mut ticket, now) = concluded_ticket(2, 0);
        ticket.status = TicketStatus::Cancelled;
        let policy = ReopeningConfig::default();
        assert!(can_reopen(&ticket, &policy, now).is_ok());
    }

    #[test]
    fn days_between_counts_whole_days() {
        let closed = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let now = Utc.with_ymd_and_hms(2024, 3, 4, 13, 30, 0).unwrap();
        assert_eq!(days_between(closed, now), 3);
        assert_eq!(days_between(now, closed), 0);
    }
}
