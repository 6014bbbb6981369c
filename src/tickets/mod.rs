use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::TicketConfig;
use crate::shared::enums::TicketStatus;
use crate::shared::error::{DeskError, DeskResult};
use crate::shared::schema::tickets;

/// A support request. `origin_ticket_id`, once set at insert time, is
/// never rewritten; terminal tickets spawn successors instead of being
/// revived.
#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable, AsChangeset)]
#[diesel(table_name = tickets)]
pub struct Ticket {
    pub id: Uuid,
    pub code: String,
    pub protocol: String,
    pub subject: String,
    pub description: Option<String>,
    pub requester_email: String,
    pub requester_name: Option<String>,
    pub category: String,
    pub status: TicketStatus,
    pub priority: String,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub origin_ticket_id: Option<Uuid>,
    pub reopen_count: i32,
    pub current_agent_id: Option<Uuid>,
    pub transfer_count: i32,
    pub last_transfer_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Ticket {
    /// Build the successor ticket a reopening creates. Subject, contact
    /// and category carry over; the lifecycle fields start fresh.
    pub fn successor_of(
        original: &Ticket,
        code: String,
        protocol: String,
        priority: String,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            code,
            protocol,
            subject: original.subject.clone(),
            description: original.description.clone(),
            requester_email: original.requester_email.clone(),
            requester_name: original.requester_name.clone(),
            category: original.category.clone(),
            status: TicketStatus::Open,
            priority,
            opened_at: now,
            closed_at: None,
            origin_ticket_id: Some(original.id),
            reopen_count: 0,
            current_agent_id: None,
            transfer_count: 0,
            last_transfer_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}

pub fn find_ticket(conn: &mut PgConnection, ticket_id: Uuid) -> DeskResult<Ticket> {
    tickets::table
        .filter(tickets::id.eq(ticket_id))
        .first(conn)
        .optional()?
        .ok_or_else(|| DeskError::NotFound(format!("ticket {}", ticket_id)))
}

/// Next human-readable code, `PREFIX-NNNN`. Reads the current maximum
/// suffix; the unique constraint on `code` catches concurrent writers,
/// and callers retry once with a recomputed value on conflict.
pub fn next_code(conn: &mut PgConnection, config: &TicketConfig) -> DeskResult<String> {
    let pattern = format!("{}-%", config.code_prefix);
    let last: Option<String> = tickets::table
        .filter(tickets::code.like(pattern))
        .select(tickets::code)
        .order(tickets::code.desc())
        .first(conn)
        .optional()?;
    Ok(next_code_after(&config.code_prefix, last.as_deref()))
}

pub fn next_code_after(prefix: &str, last_code: Option<&str>) -> String {
    let last_number = last_code
        .and_then(|code| code.rsplit('-').next())
        .and_then(|suffix| suffix.parse::<u32>().ok())
        .unwrap_or(0);
    format!("{}-{:04}", prefix, last_number + 1)
}

/// Next protocol, `YYYYMMDD-N` with a per-day counter.
pub fn next_protocol(conn: &mut PgConnection, now: DateTime<Utc>) -> DeskResult<String> {
    let day = now.format("%Y%m%d").to_string();
    let today_count: i64 = tickets::table
        .filter(tickets::protocol.like(format!("{}-%", day)))
        .count()
        .get_result(conn)?;
    Ok(protocol_for(&day, today_count))
}

pub fn protocol_for(day: &str, existing_today: i64) -> String {
    format!("{}-{}", day, existing_today + 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_ticket() -> Ticket {
        let opened = Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap();
        Ticket {
            id: Uuid::new_v4(),
            code: "EVQ-0010".to_string(),
            protocol: "20240301-1".to_string(),
            subject: "VPN drops every hour".to_string(),
            description: Some("Drops on the dot".to_string()),
            requester_email: "user@example.com".to_string(),
            requester_name: Some("User".to_string()),
            category: "network".to_string(),
            status: TicketStatus::Concluded,
            priority: "high".to_string(),
            opened_at: opened,
            closed_at: Some(opened + chrono::Duration::days(2)),
            origin_ticket_id: None,
            reopen_count: 0,
            current_agent_id: None,
            transfer_count: 0,
            last_transfer_at: None,
            created_at: opened,
            updated_at: opened,
        }
    }

    #[test]
    fn code_increments_previous_maximum() {
        assert_eq!(next_code_after("EVQ", Some("EVQ-0010")), "EVQ-0011");
        assert_eq!(next_code_after("EVQ", Some("EVQ-0999")), "EVQ-1000");
    }

    #[test]
    fn code_starts_at_one_with_no_predecessor() {
        assert_eq!(next_code_after("EVQ", None), "EVQ-0001");
        assert_eq!(next_code_after("EVQ", Some("garbage")), "EVQ-0001");
    }

    #[test]
    fn protocol_uses_per_day_counter() {
        assert_eq!(protocol_for("20240301", 0), "20240301-1");
        assert_eq!(protocol_for("20240301", 41), "20240301-42");
    }

    #[test]
    fn successor_links_to_origin_and_resets_lifecycle() {
        let original = sample_ticket();
        let now = Utc.with_ymd_and_hms(2024, 3, 5, 12, 0, 0).unwrap();
        let successor = Ticket::successor_of(
            &original,
            "EVQ-0011".to_string(),
            "20240305-1".to_string(),
            "medium".to_string(),
            now,
        );
        assert_eq!(successor.origin_ticket_id, Some(original.id));
        assert_eq!(successor.status, TicketStatus::Open);
        assert_eq!(successor.reopen_count, 0);
        assert_eq!(successor.transfer_count, 0);
        assert!(successor.closed_at.is_none());
        assert!(successor.current_agent_id.is_none());
        assert_eq!(successor.subject, original.subject);
    }
}
