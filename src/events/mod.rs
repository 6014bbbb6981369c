use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Post-commit notification events. Delivery is fire-and-forget: a send
/// failure is logged and swallowed, never rolled back into the commit
/// that produced it.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TicketEvent {
    TicketReopened {
        original_id: Uuid,
        original_code: String,
        successor_id: Uuid,
        successor_code: String,
        initiated_by: Uuid,
    },
    TicketTransferred {
        ticket_id: Uuid,
        ticket_code: String,
        from_agent_id: Option<Uuid>,
        to_agent_id: Uuid,
        to_agent_name: String,
        initiated_by: Uuid,
    },
    AttachmentUploaded {
        attachment_id: Uuid,
        ticket_id: Uuid,
        original_name: String,
        size_bytes: i64,
        uploaded_by: Option<Uuid>,
    },
}

#[derive(Debug, Clone)]
pub struct EventSender {
    tx: broadcast::Sender<TicketEvent>,
}

impl EventSender {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TicketEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: TicketEvent) {
        if let Err(err) = self.tx.send(event) {
            log::debug!("No listeners for ticket event: {}", err);
        }
    }
}

impl Default for EventSender {
    fn default() -> Self {
        Self::new(128)
    }
}
