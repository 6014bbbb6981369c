use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::config::AttachmentConfig;
use crate::events::{EventSender, TicketEvent};
use crate::shared::error::{DeskError, DeskResult};
use crate::shared::schema::ticket_attachments;

const HASH_CHUNK_SIZE: usize = 8192;

/// A file bound to a ticket. `stored_name` is globally unique;
/// `active = false` means logically deleted, with the row (and possibly
/// the file) kept for audit until the purge sweep removes the file.
#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable, AsChangeset)]
#[diesel(table_name = ticket_attachments)]
pub struct Attachment {
    pub id: Uuid,
    pub ticket_id: Uuid,
    pub original_name: String,
    pub stored_name: String,
    pub storage_path: String,
    pub size_bytes: i64,
    pub mime_type: String,
    pub extension: String,
    pub content_hash: Option<String>,
    pub uploaded_by: Option<Uuid>,
    pub uploaded_at: Option<DateTime<Utc>>,
    pub description: Option<String>,
    pub active: bool,
    pub origin: String,
    pub created_at: DateTime<Utc>,
}

impl Attachment {
    pub fn is_image(&self) -> bool {
        self.mime_type.starts_with("image/")
    }

    pub fn is_video(&self) -> bool {
        self.mime_type.starts_with("video/")
    }
}

/// Lower-cased extension of a filename, if it has one.
pub fn file_extension(filename: &str) -> Option<String> {
    let (stem, ext) = filename.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_lowercase())
}

/// Admission control: explicit allow-lists only, unknown types are
/// rejected by default.
pub fn validate(
    policy: &AttachmentConfig,
    filename: &str,
    mime_type: &str,
    size_bytes: u64,
    ticket_total_bytes: u64,
    ticket_attachment_count: i64,
) -> DeskResult<()> {
    let extension = file_extension(filename).ok_or_else(|| {
        DeskError::Validation("file must have an extension".to_string())
    })?;
    if !policy.allowed_extensions().any(|e| e == extension) {
        return Err(DeskError::Validation(format!(
            "extension '{}' is not allowed",
            extension
        )));
    }
    if !policy.allowed_mime_types.iter().any(|m| m == mime_type) {
        return Err(DeskError::Validation(format!(
            "file type '{}' is not allowed",
            mime_type
        )));
    }
    if size_bytes > policy.max_file_bytes {
        return Err(DeskError::Validation(format!(
            "file too large, maximum allowed is {}",
            format_size(policy.max_file_bytes)
        )));
    }
    if ticket_total_bytes + size_bytes >= policy.max_total_bytes {
        return Err(DeskError::Validation(format!(
            "total attachment limit exceeded, limit {} with {} already attached",
            format_size(policy.max_total_bytes),
            format_size(ticket_total_bytes)
        )));
    }
    if ticket_attachment_count >= policy.max_per_ticket {
        return Err(DeskError::Validation(format!(
            "a ticket may have at most {} attachments",
            policy.max_per_ticket
        )));
    }
    Ok(())
}

/// Timestamp prefix plus a random token plus the lower-cased original
/// extension: practically unique without a coordination round-trip.
pub fn unique_stored_name(original_filename: &str, now: DateTime<Utc>) -> String {
    let stamp = now.format("%Y%m%d_%H%M%S");
    let token = Uuid::new_v4();
    match file_extension(original_filename) {
        Some(ext) => format!("{}_{}.{}", stamp, token, ext),
        None => format!("{}_{}", stamp, token),
    }
}

/// Streaming SHA-256 of a file, hex encoded. `None` if unreadable.
pub fn hash_file(path: &Path) -> Option<String> {
    let mut file = File::open(path).ok()?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; HASH_CHUNK_SIZE];
    loop {
        let read = file.read(&mut buf).ok()?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }
    Some(hex::encode(hasher.finalize()))
}

pub fn format_size(size_bytes: u64) -> String {
    const KIB: u64 = 1024;
    const MIB: u64 = 1024 * 1024;
    const GIB: u64 = 1024 * 1024 * 1024;
    if size_bytes < KIB {
        format!("{} B", size_bytes)
    } else if size_bytes < MIB {
        format!("{:.1} KB", size_bytes as f64 / KIB as f64)
    } else if size_bytes < GIB {
        format!("{:.1} MB", size_bytes as f64 / MIB as f64)
    } else {
        format!("{:.1} GB", size_bytes as f64 / GIB as f64)
    }
}

/// Active attachments of a ticket, newest upload first.
pub fn active_attachments(conn: &mut PgConnection, ticket_id: Uuid) -> DeskResult<Vec<Attachment>> {
    Ok(ticket_attachments::table
        .filter(ticket_attachments::ticket_id.eq(ticket_id))
        .filter(ticket_attachments::active.eq(true))
        .order(ticket_attachments::uploaded_at.desc())
        .load(conn)?)
}

/// Combined size of a ticket's active attachments.
pub fn total_attached_bytes(conn: &mut PgConnection, ticket_id: Uuid) -> DeskResult<u64> {
    use bigdecimal::{BigDecimal, ToPrimitive};
    use diesel::dsl::sum;
    let total: Option<BigDecimal> = ticket_attachments::table
        .filter(ticket_attachments::ticket_id.eq(ticket_id))
        .filter(ticket_attachments::active.eq(true))
        .select(sum(ticket_attachments::size_bytes))
        .first(conn)?;
    Ok(total.and_then(|t| t.to_u64()).unwrap_or(0))
}

pub fn active_attachment_count(conn: &mut PgConnection, ticket_id: Uuid) -> DeskResult<i64> {
    Ok(ticket_attachments::table
        .filter(ticket_attachments::ticket_id.eq(ticket_id))
        .filter(ticket_attachments::active.eq(true))
        .count()
        .get_result(conn)?)
}

/// Validate, write the file under a unique stored name, fingerprint it
/// and insert the row. If the file lands on disk but the insert fails,
/// the orphan is left for the reconciliation job; there is no
/// synchronous rollback of a filesystem write inside a database
/// transaction. A stored-name uniqueness race retries once with a
/// fresh name.
#[allow(clippy::too_many_arguments)]
pub fn save(
    conn: &mut PgConnection,
    policy: &AttachmentConfig,
    bytes: &[u8],
    original_name: &str,
    mime_type: &str,
    ticket_id: Uuid,
    uploaded_by: Uuid,
    description: Option<String>,
    events: Option<&EventSender>,
    now: DateTime<Utc>,
) -> DeskResult<Attachment> {
    crate::tickets::find_ticket(conn, ticket_id)?;

    let ticket_total = total_attached_bytes(conn, ticket_id)?;
    let ticket_count = active_attachment_count(conn, ticket_id)?;
    validate(
        policy,
        original_name,
        mime_type,
        bytes.len() as u64,
        ticket_total,
        ticket_count,
    )?;

    std::fs::create_dir_all(&policy.upload_dir)?;

    let attempt = |conn: &mut PgConnection| -> DeskResult<Attachment> {
        let stored_name = unique_stored_name(original_name, now);
        let path = policy.upload_dir.join(&stored_name);
        std::fs::write(&path, bytes)?;
        let storage_path = canonical_path(&path);

        let attachment = Attachment {
            id: Uuid::new_v4(),
            ticket_id,
            original_name: original_name.to_string(),
            stored_name,
            storage_path: storage_path.to_string_lossy().into_owned(),
            size_bytes: bytes.len() as i64,
            mime_type: mime_type.to_string(),
            extension: file_extension(original_name).unwrap_or_default(),
            content_hash: hash_file(&storage_path),
            uploaded_by: Some(uploaded_by),
            uploaded_at: Some(now),
            description: description.clone(),
            active: true,
            origin: "panel".to_string(),
            created_at: now,
        };
        diesel::insert_into(ticket_attachments::table)
            .values(&attachment)
            .execute(conn)?;
        Ok(attachment)
    };

    let attachment = match attempt(conn) {
        Err(err) if err.is_retryable() => {
            log::warn!(
                "Stored name collision while attaching to ticket {}, retrying once: {}",
                ticket_id,
                err
            );
            attempt(conn)?
        }
        other => other?,
    };

    log::info!(
        "Attachment {} ({}) saved for ticket {}",
        attachment.original_name,
        format_size(attachment.size_bytes as u64),
        ticket_id
    );
    if let Some(events) = events {
        events.emit(TicketEvent::AttachmentUploaded {
            attachment_id: attachment.id,
            ticket_id,
            original_name: attachment.original_name.clone(),
            size_bytes: attachment.size_bytes,
            uploaded_by: attachment.uploaded_by,
        });
    }
    Ok(attachment)
}

/// Soft delete, permitted for the original uploader or an
/// administrator. The physical file stays on disk for the purge sweep.
pub fn remove(
    conn: &mut PgConnection,
    attachment_id: Uuid,
    requester: Uuid,
    is_admin: bool,
) -> DeskResult<()> {
    let attachment: Attachment = ticket_attachments::table
        .filter(ticket_attachments::id.eq(attachment_id))
        .first(conn)
        .optional()?
        .ok_or_else(|| DeskError::NotFound(format!("attachment {}", attachment_id)))?;

    if attachment.uploaded_by != Some(requester) && !is_admin {
        return Err(DeskError::PermissionDenied(
            "only the uploader or an administrator may remove this attachment".to_string(),
        ));
    }

    diesel::update(ticket_attachments::table.filter(ticket_attachments::id.eq(attachment_id)))
        .set(ticket_attachments::active.eq(false))
        .execute(conn)?;

    log::info!(
        "Attachment {} ({}) removed by user {}",
        attachment.original_name,
        attachment_id,
        requester
    );
    Ok(())
}

/// Absolute, normalized form of a path. Falls back to prefixing the
/// current directory when the file cannot be canonicalized.
pub fn canonical_path(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            std::env::current_dir()
                .map(|cwd| cwd.join(path))
                .unwrap_or_else(|_| path.to_path_buf())
        }
    })
}
