//! Database enum types for the ticket schema.
//!
//! Each enum maps to a SmallInt column so comparisons and indexes stay
//! cheap, with `Display`/`FromStr` for the user-facing string forms.

use diesel::deserialize::{self, FromSql};
use diesel::pg::{Pg, PgValue};
use diesel::serialize::{self, Output, ToSql};
use diesel::sql_types::SmallInt;
use diesel::{AsExpression, FromSqlRow};
use serde::{Deserialize, Serialize};
use std::io::Write;

/// Lifecycle state of a ticket. Status advances monotonically; a
/// Concluded/Cancelled ticket is terminal and can only spawn a successor
/// through reopening, never revive itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsExpression, FromSqlRow)]
#[diesel(sql_type = SmallInt)]
#[serde(rename_all = "snake_case")]
#[repr(i16)]
pub enum TicketStatus {
    Open = 0,
    InProgress = 1,
    Concluded = 2,
    Cancelled = 3,
}

impl TicketStatus {
    /// Terminal states no longer count against an agent's workload.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Concluded | Self::Cancelled)
    }
}

impl Default for TicketStatus {
    fn default() -> Self {
        Self::Open
    }
}

impl ToSql<SmallInt, Pg> for TicketStatus {
    fn to_sql<'b>(&'b self, out: &mut Output<'b, '_, Pg>) -> serialize::Result {
        let v = *self as i16;
        out.write_all(&v.to_be_bytes())?;
        Ok(serialize::IsNull::No)
    }
}

impl FromSql<SmallInt, Pg> for TicketStatus {
    fn from_sql(bytes: PgValue<'_>) -> deserialize::Result<Self> {
        let value = i16::from_sql(bytes)?;
        match value {
            0 => Ok(Self::Open),
            1 => Ok(Self::InProgress),
            2 => Ok(Self::Concluded),
            3 => Ok(Self::Cancelled),
            _ => Err(format!("Unknown TicketStatus: {}", value).into()),
        }
    }
}

impl std::fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Open => write!(f, "open"),
            Self::InProgress => write!(f, "in_progress"),
            Self::Concluded => write!(f, "concluded"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::str::FromStr for TicketStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "open" => Ok(Self::Open),
            "in_progress" | "inprogress" => Ok(Self::InProgress),
            "concluded" => Ok(Self::Concluded),
            "cancelled" | "canceled" => Ok(Self::Cancelled),
            _ => Err(format!("Unknown ticket status: {}", s)),
        }
    }
}

/// State of a reopening link. Exactly one Active row may exist per
/// (original, successor) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsExpression, FromSqlRow)]
#[diesel(sql_type = SmallInt)]
#[serde(rename_all = "snake_case")]
#[repr(i16)]
pub enum ReopeningStatus {
    Active = 0,
    Superseded = 1,
}

impl Default for ReopeningStatus {
    fn default() -> Self {
        Self::Active
    }
}

impl ToSql<SmallInt, Pg> for ReopeningStatus {
    fn to_sql<'b>(&'b self, out: &mut Output<'b, '_, Pg>) -> serialize::Result {
        let v = *self as i16;
        out.write_all(&v.to_be_bytes())?;
        Ok(serialize::IsNull::No)
    }
}

impl FromSql<SmallInt, Pg> for ReopeningStatus {
    fn from_sql(bytes: PgValue<'_>) -> deserialize::Result<Self> {
        let value = i16::from_sql(bytes)?;
        match value {
            0 => Ok(Self::Active),
            1 => Ok(Self::Superseded),
            _ => Err(format!("Unknown ReopeningStatus: {}", value).into()),
        }
    }
}

impl std::fmt::Display for ReopeningStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Superseded => write!(f, "superseded"),
        }
    }
}

/// How a transfer was initiated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsExpression, FromSqlRow)]
#[diesel(sql_type = SmallInt)]
#[serde(rename_all = "snake_case")]
#[repr(i16)]
pub enum TransferKind {
    Manual = 0,
    Automatic = 1,
    Escalation = 2,
}

impl Default for TransferKind {
    fn default() -> Self {
        Self::Manual
    }
}

impl ToSql<SmallInt, Pg> for TransferKind {
    fn to_sql<'b>(&'b self, out: &mut Output<'b, '_, Pg>) -> serialize::Result {
        let v = *self as i16;
        out.write_all(&v.to_be_bytes())?;
        Ok(serialize::IsNull::No)
    }
}

impl FromSql<SmallInt, Pg> for TransferKind {
    fn from_sql(bytes: PgValue<'_>) -> deserialize::Result<Self> {
        let value = i16::from_sql(bytes)?;
        match value {
            0 => Ok(Self::Manual),
            1 => Ok(Self::Automatic),
            2 => Ok(Self::Escalation),
            _ => Err(format!("Unknown TransferKind: {}", value).into()),
        }
    }
}

impl std::fmt::Display for TransferKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Manual => write!(f, "manual"),
            Self::Automatic => write!(f, "automatic"),
            Self::Escalation => write!(f, "escalation"),
        }
    }
}

impl std::str::FromStr for TransferKind {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "manual" => Ok(Self::Manual),
            "automatic" | "auto" => Ok(Self::Automatic),
            "escalation" => Ok(Self::Escalation),
            _ => Err(format!("Unknown transfer kind: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn ticket_status_terminal_states() {
        assert!(TicketStatus::Concluded.is_terminal());
        assert!(TicketStatus::Cancelled.is_terminal());
        assert!(!TicketStatus::Open.is_terminal());
        assert!(!TicketStatus::InProgress.is_terminal());
    }

    #[test]
    fn ticket_status_round_trips_through_strings() {
        for status in [
            TicketStatus::Open,
            TicketStatus::InProgress,
            TicketStatus::Concluded,
            TicketStatus::Cancelled,
        ] {
            assert_eq!(TicketStatus::from_str(&status.to_string()), Ok(status));
        }
    }

    #[test]
    fn transfer_kind_parses_aliases() {
        assert_eq!(TransferKind::from_str("auto"), Ok(TransferKind::Automatic));
        assert!(TransferKind::from_str("sideways").is_err());
    }
}
