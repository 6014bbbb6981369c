use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::shared::enums::TicketStatus;
use crate::shared::error::{DeskError, DeskResult};
use crate::shared::schema::{support_agents, tickets};

/// A support-staff capacity unit.
#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable, AsChangeset)]
#[diesel(table_name = support_agents)]
pub struct SupportAgent {
    pub id: Uuid,
    pub user_id: Uuid,
    pub display_name: String,
    pub email: String,
    pub active: bool,
    pub experience_level: String,
    pub specialties: Vec<String>,
    pub max_open_tickets: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub fn find_agent(conn: &mut PgConnection, agent_id: Uuid) -> DeskResult<SupportAgent> {
    support_agents::table
        .filter(support_agents::id.eq(agent_id))
        .first(conn)
        .optional()?
        .ok_or_else(|| DeskError::NotFound(format!("agent {}", agent_id)))
}

pub fn list_active_agents(conn: &mut PgConnection) -> DeskResult<Vec<SupportAgent>> {
    Ok(support_agents::table
        .filter(support_agents::active.eq(true))
        .order(support_agents::display_name.asc())
        .load(conn)?)
}

/// Tickets currently assigned to the agent with non-terminal status.
/// Derived, never stored: recomputed on every capacity check so
/// concurrent transfers see fresh numbers.
pub fn active_ticket_count(conn: &mut PgConnection, agent_id: Uuid) -> DeskResult<i64> {
    let count = tickets::table
        .filter(tickets::current_agent_id.eq(agent_id))
        .filter(tickets::status.ne(TicketStatus::Concluded))
        .filter(tickets::status.ne(TicketStatus::Cancelled))
        .count()
        .get_result(conn)?;
    Ok(count)
}

/// True iff the agent is active and below the simultaneous ticket limit.
pub fn can_receive(conn: &mut PgConnection, agent: &SupportAgent) -> DeskResult<bool> {
    if !agent.active {
        return Ok(false);
    }
    let active = active_ticket_count(conn, agent.id)?;
    Ok(has_capacity(active, agent.max_open_tickets))
}

pub fn has_capacity(active_count: i64, max_open_tickets: i32) -> bool {
    max_open_tickets > 0 && active_count < i64::from(max_open_tickets)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacity_boundary_is_exclusive() {
        assert!(has_capacity(2, 3));
        assert!(!has_capacity(3, 3));
        assert!(!has_capacity(4, 3));
    }

    #[test]
    fn zero_limit_never_receives() {
        assert!(!has_capacity(0, 0));
    }
}
