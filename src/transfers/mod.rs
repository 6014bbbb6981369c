use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::DeskConfig;
use crate::directory::{active_ticket_count, find_agent, has_capacity, SupportAgent};
use crate::events::{EventSender, TicketEvent};
use crate::shared::enums::{TicketStatus, TransferKind};
use crate::shared::error::{DeskError, DeskResult};
use crate::shared::schema::{ticket_transfers, tickets};
use crate::tickets::Ticket;

/// One row per transfer event. Append-only: rows are never edited or
/// deleted, so the table is the complete audit trail and the ticket's
/// `current_agent_id` is just a derived cache of the latest row.
#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable)]
#[diesel(table_name = ticket_transfers)]
pub struct TransferRecord {
    pub id: Uuid,
    pub ticket_id: Uuid,
    pub from_agent_id: Option<Uuid>,
    pub to_agent_id: Uuid,
    pub initiated_by: Uuid,
    pub reason: Option<String>,
    pub notes: Option<String>,
    pub status_before: TicketStatus,
    pub status_after: TicketStatus,
    pub priority_before: String,
    pub priority_after: String,
    pub kind: TransferKind,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl TransferRecord {
    /// Snapshot the ticket as it stands immediately before reassignment.
    /// No side effects on status or priority are configured, so the
    /// "after" values equal the "before" values.
    pub fn snapshot(
        ticket: &Ticket,
        to_agent_id: Uuid,
        initiated_by: Uuid,
        reason: Option<String>,
        notes: Option<String>,
        kind: TransferKind,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            ticket_id: ticket.id,
            from_agent_id: ticket.current_agent_id,
            to_agent_id,
            initiated_by,
            reason,
            notes,
            status_before: ticket.status,
            status_after: ticket.status,
            priority_before: ticket.priority.clone(),
            priority_after: ticket.priority.clone(),
            kind,
            metadata: serde_json::json!({}),
            created_at: now,
        }
    }
}

/// An active agent with its freshly recomputed workload.
#[derive(Debug, Clone, Serialize)]
pub struct AgentAvailability {
    pub agent: SupportAgent,
    pub active_tickets: i64,
    pub availability_percent: f64,
    pub can_receive: bool,
}

pub fn availability_percent(active_count: i64, max_open_tickets: i32) -> f64 {
    if max_open_tickets <= 0 {
        return 0.0;
    }
    (1.0 - active_count as f64 / f64::from(max_open_tickets)) * 100.0
}

/// Least-loaded-first recommendation: descending availability percent.
/// Not a fairness-guaranteeing scheduler; callers layer specialty
/// filtering on top if they need it.
pub fn rank_available_agents(agents: Vec<(SupportAgent, i64)>) -> Vec<AgentAvailability> {
    let mut ranked: Vec<AgentAvailability> = agents
        .into_iter()
        .map(|(agent, active_tickets)| {
            let availability = availability_percent(active_tickets, agent.max_open_tickets);
            let can_receive = agent.active && has_capacity(active_tickets, agent.max_open_tickets);
            AgentAvailability {
                agent,
                active_tickets,
                availability_percent: availability,
                can_receive,
            }
        })
        .collect();
    ranked.sort_by(|a, b| {
        b.availability_percent
            .partial_cmp(&a.availability_percent)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    ranked
}

/// Active agents ranked by availability, workloads recomputed now.
pub fn available_agents(conn: &mut PgConnection) -> DeskResult<Vec<AgentAvailability>> {
    let agents = crate::directory::list_active_agents(conn)?;
    let mut with_counts = Vec::with_capacity(agents.len());
    for agent in agents {
        let count = active_ticket_count(conn, agent.id)?;
        with_counts.push((agent, count));
    }
    Ok(rank_available_agents(with_counts))
}

/// Reassign a ticket to another agent under the capacity constraint,
/// appending the audit record. The ticket row is locked for the whole
/// check-then-reassign window so concurrent transfers on the same
/// ticket serialize; the loser re-reads current state or fails visibly.
#[allow(clippy::too_many_arguments)]
pub fn transfer(
    conn: &mut PgConnection,
    ticket_id: Uuid,
    to_agent_id: Uuid,
    initiated_by: Uuid,
    reason: Option<String>,
    notes: Option<String>,
    kind: TransferKind,
    config: &DeskConfig,
    events: Option<&EventSender>,
    now: DateTime<Utc>,
) -> DeskResult<TransferRecord> {
    if config.transfers.require_reason && reason.as_deref().map_or(true, |r| r.trim().is_empty()) {
        return Err(DeskError::Validation(
            "a transfer reason is required".to_string(),
        ));
    }

    let attempt = |conn: &mut PgConnection| {
        try_transfer(
            conn,
            ticket_id,
            to_agent_id,
            initiated_by,
            reason.clone(),
            notes.clone(),
            kind,
            now,
        )
    };
    let (record, ticket_code, agent_name) = match attempt(conn) {
        Err(err) if err.is_retryable() => {
            log::warn!(
                "Transfer of ticket {} hit a conflict, retrying once: {}",
                ticket_id,
                err
            );
            attempt(conn)
        }
        other => other,
    }?;

    if let Some(events) = events {
        events.emit(TicketEvent::TicketTransferred {
            ticket_id: record.ticket_id,
            ticket_code,
            from_agent_id: record.from_agent_id,
            to_agent_id: record.to_agent_id,
            to_agent_name: agent_name,
            initiated_by,
        });
    }
    Ok(record)
}

#[allow(clippy::too_many_arguments)]
fn try_transfer(
    conn: &mut PgConnection,
    ticket_id: Uuid,
    to_agent_id: Uuid,
    initiated_by: Uuid,
    reason: Option<String>,
    notes: Option<String>,
    kind: TransferKind,
    now: DateTime<Utc>,
) -> DeskResult<(TransferRecord, String, String)> {
    conn.transaction(|conn| {
        let ticket: Ticket = tickets::table
            .filter(tickets::id.eq(ticket_id))
            .for_update()
            .first(conn)
            .optional()?
            .ok_or_else(|| DeskError::NotFound(format!("ticket {}", ticket_id)))?;

        let agent = find_agent(conn, to_agent_id)?;
        if !agent.active {
            return Err(DeskError::NotFound(format!(
                "agent {} is inactive",
                agent.display_name
            )));
        }

        // Recomputed inside the transaction, never cached across the
        // capacity-check-then-reassign window.
        let active = active_ticket_count(conn, agent.id)?;
        if !has_capacity(active, agent.max_open_tickets) {
            return Err(DeskError::CapacityExceeded(agent.display_name.clone()));
        }

        let record = TransferRecord::snapshot(
            &ticket,
            agent.id,
            initiated_by,
            reason,
            notes,
            kind,
            now,
        );

        diesel::update(tickets::table.filter(tickets::id.eq(ticket.id)))
            .set((
                tickets::current_agent_id.eq(Some(agent.id)),
                tickets::transfer_count.eq(tickets::transfer_count + 1),
                tickets::last_transfer_at.eq(Some(now)),
                tickets::updated_at.eq(now),
            ))
            .execute(conn)?;

        diesel::insert_into(ticket_transfers::table)
            .values(&record)
            .execute(conn)?;

        log::info!(
            "Ticket {} transferred to agent {} ({} active tickets before)",
            ticket.code,
            agent.display_name,
            active
        );
        Ok((record, ticket.code.clone(), agent.display_name.clone()))
    })
}

/// Transfer history for a ticket, oldest first: the chronological
/// narrative. Read-only.
pub fn history_for(conn: &mut PgConnection, ticket_id: Uuid) -> DeskResult<Vec<TransferRecord>> {
    Ok(ticket_transfers::table
        .filter(ticket_transfers::ticket_id.eq(ticket_id))
        .order(ticket_transfers::created_at.asc())
        .load(conn)?)
}
