//! Batch reconciliation of the attachment store against the
//! filesystem, plus the purge sweep that owns the Inactive -> Purged
//! transition so physical deletes never happen on a user-facing path.

use chrono::{DateTime, Duration, Utc};
use diesel::prelude::*;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use uuid::Uuid;

use crate::attachments::{canonical_path, file_extension, hash_file, Attachment};
use crate::config::AttachmentConfig;
use crate::shared::error::DeskResult;
use crate::shared::schema::{ticket_attachments, ticket_reopenings, ticket_transfers, tickets};

/// Origin tag marking a row whose file the purge sweep has removed.
pub const ORIGIN_PURGED: &str = "purged";

const SAMPLE_SIZE: usize = 10;

/// Summary of one reconciliation run.
#[derive(Debug, Default, Clone, Serialize)]
pub struct ReconcileReport {
    pub evaluated: u32,
    pub fixed_size: u32,
    pub fixed_hash: u32,
    pub marked_inactive: u32,
    pub fixed_metadata: u32,
    pub fixed_uploader: u32,
    pub fixed_timestamp: u32,
    pub tickets_with_attachments: usize,
    /// Bounded per-ticket active-attachment counts for spot-checking.
    pub per_ticket_sample: Vec<(Uuid, i64)>,
}

impl ReconcileReport {
    pub fn total_corrections(&self) -> u32 {
        self.fixed_size
            + self.fixed_hash
            + self.marked_inactive
            + self.fixed_metadata
            + self.fixed_uploader
            + self.fixed_timestamp
    }
}

/// What a single row repair changed.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RowFixes {
    pub deactivated: bool,
    pub size_corrected: bool,
    pub hash_filled: bool,
    pub metadata_corrected: bool,
    pub uploader_assigned: bool,
    pub timestamp_stamped: bool,
}

impl RowFixes {
    pub fn any(&self) -> bool {
        *self != Self::default()
    }
}

/// Repair one attachment row against ground truth. Mutates the row in
/// place and reports what changed; safe to apply repeatedly, a second
/// pass with no intervening drift changes nothing.
pub fn reconcile_row(
    attachment: &mut Attachment,
    ticket_exists: bool,
    upload_dir: &Path,
    fallback_uploader: Option<Uuid>,
    now: DateTime<Utc>,
) -> RowFixes {
    let mut fixes = RowFixes::default();

    if !ticket_exists {
        if attachment.active {
            attachment.active = false;
            fixes.deactivated = true;
        }
        return fixes;
    }

    // Resolve a relative or blank recorded path against the upload dir.
    let recorded = Path::new(&attachment.storage_path);
    let path = if attachment.storage_path.is_empty() || !recorded.is_absolute() {
        upload_dir.join(&attachment.stored_name)
    } else {
        recorded.to_path_buf()
    };

    if !path.exists() {
        if attachment.active {
            attachment.active = false;
            fixes.deactivated = true;
        }
    } else {
        if let Ok(meta) = std::fs::metadata(&path) {
            let real_size = meta.len() as i64;
            if attachment.size_bytes != real_size {
                attachment.size_bytes = real_size;
                fixes.size_corrected = true;
            }
        }

        if attachment.content_hash.is_none() {
            if let Some(digest) = hash_file(&path) {
                attachment.content_hash = Some(digest);
                fixes.hash_filled = true;
            }
        }

        let canonical = canonical_path(&path).to_string_lossy().into_owned();
        if attachment.storage_path != canonical {
            attachment.storage_path = canonical;
            fixes.metadata_corrected = true;
        }

        if attachment.extension.is_empty() {
            if let Some(ext) = file_extension(&attachment.original_name) {
                attachment.extension = ext;
                fixes.metadata_corrected = true;
            }
        }
        if attachment.mime_type.is_empty() && !attachment.extension.is_empty() {
            let guessed = mime_guess::from_ext(&attachment.extension).first_or_octet_stream();
            attachment.mime_type = guessed.essence_str().to_string();
            fixes.metadata_corrected = true;
        }
    }

    // Best-effort identity repair only; never fabricate an uploader.
    if attachment.uploaded_by.is_none() {
        if let Some(fallback) = fallback_uploader {
            attachment.uploaded_by = Some(fallback);
            fixes.uploader_assigned = true;
        }
    }

    if attachment.uploaded_at.is_none() {
        // explicit approximation, not a true upload time
        attachment.uploaded_at = Some(now);
        fixes.timestamp_stamped = true;
    }

    fixes
}

/// Audit every attachment row and repair drift. All row mutations in a
/// run commit together; any write failure rolls the whole run back.
pub fn reconcile_attachments(
    conn: &mut PgConnection,
    policy: &AttachmentConfig,
    now: DateTime<Utc>,
) -> DeskResult<ReconcileReport> {
    conn.transaction(|conn| {
        let known_tickets: HashSet<Uuid> = tickets::table
            .select(tickets::id)
            .load::<Uuid>(conn)?
            .into_iter()
            .collect();
        let rows: Vec<Attachment> = ticket_attachments::table.load(conn)?;

        let mut report = ReconcileReport::default();
        let mut per_ticket: BTreeMap<Uuid, i64> = BTreeMap::new();

        for row in rows {
            report.evaluated += 1;
            let mut attachment = row;
            let ticket_known = known_tickets.contains(&attachment.ticket_id);
            let fixes = reconcile_row(
                &mut attachment,
                ticket_known,
                &policy.upload_dir,
                policy.fallback_uploader,
                now,
            );

            if fixes.any() {
                diesel::update(
                    ticket_attachments::table.filter(ticket_attachments::id.eq(attachment.id)),
                )
                .set(&attachment)
                .execute(conn)?;
            }

            report.marked_inactive += fixes.deactivated as u32;
            report.fixed_size += fixes.size_corrected as u32;
            report.fixed_hash += fixes.hash_filled as u32;
            report.fixed_metadata += fixes.metadata_corrected as u32;
            report.fixed_uploader += fixes.uploader_assigned as u32;
            report.fixed_timestamp += fixes.timestamp_stamped as u32;

            if attachment.active {
                *per_ticket.entry(attachment.ticket_id).or_default() += 1;
            }
        }

        report.tickets_with_attachments = per_ticket.len();
        report.per_ticket_sample = per_ticket.into_iter().take(SAMPLE_SIZE).collect();

        log::info!(
            "Attachment reconciliation: {} rows evaluated, {} corrections, {} deactivated",
            report.evaluated,
            report.total_corrections(),
            report.marked_inactive
        );
        Ok(report)
    })
}

/// Summary of one purge sweep.
#[derive(Debug, Default, Clone, Serialize)]
pub struct PurgeReport {
    pub rows_purged: u32,
    pub files_removed: u32,
    pub orphan_files_removed: u32,
}

/// Second phase of the soft-delete lifecycle: remove the files of rows
/// that have been inactive past the retention window and tag the rows
/// purged, then sweep upload-directory files no row references at all
/// (e.g. leftovers of uploads whose insert failed).
pub fn purge_inactive(
    conn: &mut PgConnection,
    policy: &AttachmentConfig,
    now: DateTime<Utc>,
) -> DeskResult<PurgeReport> {
    let mut report = PurgeReport::default();
    let cutoff = now - Duration::days(policy.purge_retain_days);

    let expired: Vec<Attachment> = ticket_attachments::table
        .filter(ticket_attachments::active.eq(false))
        .filter(ticket_attachments::origin.ne(ORIGIN_PURGED))
        .filter(ticket_attachments::created_at.lt(cutoff))
        .load(conn)?;

    for attachment in expired {
        let path = Path::new(&attachment.storage_path);
        if path.exists() {
            match std::fs::remove_file(path) {
                Ok(()) => report.files_removed += 1,
                Err(err) => {
                    log::error!("Failed to remove {}: {}", attachment.storage_path, err);
                    continue;
                }
            }
        }
        diesel::update(
            ticket_attachments::table.filter(ticket_attachments::id.eq(attachment.id)),
        )
        .set(ticket_attachments::origin.eq(ORIGIN_PURGED))
        .execute(conn)?;
        report.rows_purged += 1;
    }

    // True orphans: files on disk with no attachment row at all.
    let referenced: HashSet<String> = ticket_attachments::table
        .select(ticket_attachments::stored_name)
        .load::<String>(conn)?
        .into_iter()
        .collect();
    if policy.upload_dir.exists() {
        for entry in walkdir::WalkDir::new(&policy.upload_dir)
            .min_depth(1)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_file())
        {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !referenced.contains(&name) {
                match std::fs::remove_file(entry.path()) {
                    Ok(()) => {
                        log::info!("Orphan file removed: {}", name);
                        report.orphan_files_removed += 1;
                    }
                    Err(err) => log::error!("Failed to remove orphan {}: {}", name, err),
                }
            }
        }
    }

    Ok(report)
}

/// A ticket whose stored counter disagrees with its history table.
#[derive(Debug, Clone, Serialize)]
pub struct CounterDrift {
    pub ticket_id: Uuid,
    pub code: String,
    pub recorded: i32,
    pub actual: i64,
}

/// Standing invariant check: `reopen_count` must equal the number of
/// reopening records naming the ticket as original.
pub fn reopen_counter_drift(conn: &mut PgConnection) -> DeskResult<Vec<CounterDrift>> {
    let counts: BTreeMap<Uuid, i64> = ticket_reopenings::table
        .group_by(ticket_reopenings::original_ticket_id)
        .select((ticket_reopenings::original_ticket_id, diesel::dsl::count_star()))
        .load::<(Uuid, i64)>(conn)?
        .into_iter()
        .collect();
    counter_drift(conn, counts, |t| t.reopen_count)
}

/// Standing invariant check: `transfer_count` must equal the number of
/// transfer records for the ticket.
pub fn transfer_counter_drift(conn: &mut PgConnection) -> DeskResult<Vec<CounterDrift>> {
    let counts: BTreeMap<Uuid, i64> = ticket_transfers::table
        .group_by(ticket_transfers::ticket_id)
        .select((ticket_transfers::ticket_id, diesel::dsl::count_star()))
        .load::<(Uuid, i64)>(conn)?
        .into_iter()
        .collect();
    counter_drift(conn, counts, |t| t.transfer_count)
}

fn counter_drift(
    conn: &mut PgConnection,
    actual_counts: BTreeMap<Uuid, i64>,
    recorded: impl Fn(&TicketCounters) -> i32,
) -> DeskResult<Vec<CounterDrift>> {
    let rows: Vec<TicketCounters> = tickets::table
        .select((
            tickets::id,
            tickets::code,
            tickets::reopen_count,
            tickets::transfer_count,
        ))
        .load(conn)?;

    Ok(rows
        .into_iter()
        .filter_map(|t| {
            let actual = actual_counts.get(&t.id).copied().unwrap_or(0);
            let stored = recorded(&t);
            if i64::from(stored) != actual {
                Some(CounterDrift {
                    ticket_id: t.id,
                    code: t.code.clone(),
                    recorded: stored,
                    actual,
                })
            } else {
                None
            }
        })
        .collect())
}

#[derive(Debug, Queryable)]
struct TicketCounters {
    id: Uuid,
    code: String,
    reopen_count: i32,
    transfer_count: i32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::path::PathBuf;

    fn attachment_at(path: PathBuf, stored_name: &str) -> Attachment {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap();
        Attachment {
            id: Uuid::new_v4(),
            ticket_id: Uuid::new_v4(),
            original_name: "report.pdf".to_string(),
            stored_name: stored_name.to_string(),
            storage_path: path.to_string_lossy().into_owned(),
            size_bytes: 4,
            mime_type: "application/pdf".to_string(),
            extension: "pdf".to_string(),
            content_hash: None,
            uploaded_by: Some(Uuid::new_v4()),
            uploaded_at: Some(now),
            description: None,
            active: true,
            origin: "panel".to_string(),
            created_at: now,
        }
    }

    fn run_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 15, 8, 0, 0).unwrap()
    }

    #[test]
    fn missing_file_deactivates_the_row() {
        let dir = tempfile::tempdir().unwrap();
        let mut att = attachment_at(dir.path().join("gone.pdf"), "gone.pdf");
        let fixes = reconcile_row(&mut att, true, dir.path(), None, run_time());
        assert!(fixes.deactivated);
        assert!(!att.active);

        // second run: already inactive, nothing left to fix
        let again = reconcile_row(&mut att, true, dir.path(), None, run_time());
        assert!(!again.any());
    }

    #[test]
    fn missing_ticket_deactivates_without_touching_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kept.pdf");
        std::fs::write(&path, b"data").unwrap();
        let mut att = attachment_at(path.clone(), "kept.pdf");
        let fixes = reconcile_row(&mut att, false, dir.path(), None, run_time());
        assert!(fixes.deactivated);
        assert!(path.exists());
    }

    #[test]
    fn size_drift_is_corrected_and_hash_filled() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("drift.pdf");
        std::fs::write(&path, b"actual content").unwrap();
        let mut att = attachment_at(path, "drift.pdf");
        att.size_bytes = 1; // stale
        let fixes = reconcile_row(&mut att, true, dir.path(), None, run_time());
        assert!(fixes.size_corrected);
        assert!(fixes.hash_filled);
        assert_eq!(att.size_bytes, 14);
        assert!(att.content_hash.is_some());
    }

    #[test]
    fn relative_path_is_rewritten_canonical() {
        let dir = tempfile::tempdir().unwrap();
        let stored = "rel.pdf";
        std::fs::write(dir.path().join(stored), b"data").unwrap();
        let mut att = attachment_at(PathBuf::from(stored), stored);
        let fixes = reconcile_row(&mut att, true, dir.path(), None, run_time());
        assert!(fixes.metadata_corrected);
        assert!(Path::new(&att.storage_path).is_absolute());
    }

    #[test]
    fn blank_extension_and_mime_are_derived() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("meta.pdf");
        std::fs::write(&path, b"data").unwrap();
        let mut att = attachment_at(path, "meta.pdf");
        att.extension = String::new();
        att.mime_type = String::new();
        att.size_bytes = 4;
        att.content_hash = Some("deadbeef".to_string());
        let fixes = reconcile_row(&mut att, true, dir.path(), None, run_time());
        assert!(fixes.metadata_corrected);
        assert_eq!(att.extension, "pdf");
        assert_eq!(att.mime_type, "application/pdf");
    }

    #[test]
    fn null_uploader_and_timestamp_are_repaired() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("who.pdf");
        std::fs::write(&path, b"data").unwrap();
        let fallback = Uuid::new_v4();
        let mut att = attachment_at(path, "who.pdf");
        att.size_bytes = 4;
        att.content_hash = Some("cafe".to_string());
        att.uploaded_by = None;
        att.uploaded_at = None;
        let fixes = reconcile_row(&mut att, true, dir.path(), Some(fallback), run_time());
        assert!(fixes.uploader_assigned);
        assert!(fixes.timestamp_stamped);
        assert_eq!(att.uploaded_by, Some(fallback));
        assert_eq!(att.uploaded_at, Some(run_time()));

        // without a configured fallback the uploader stays null
        let mut att2 = attachment_at(dir.path().join("who.pdf"), "who.pdf");
        att2.size_bytes = 4;
        att2.content_hash = Some("cafe".to_string());
        att2.uploaded_by = None;
        let fixes2 = reconcile_row(&mut att2, true, dir.path(), None, run_time());
        assert!(!fixes2.uploader_assigned);
        assert_eq!(att2.uploaded_by, None);
    }

    #[test]
    fn second_run_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stable.pdf");
        std::fs::write(&path, b"stable content").unwrap();
        let mut att = attachment_at(PathBuf::from("stable.pdf"), "stable.pdf");
        att.size_bytes = 0;
        att.content_hash = None;
        att.uploaded_at = None;

        let first = reconcile_row(&mut att, true, dir.path(), None, run_time());
        assert!(first.any());

        let second = reconcile_row(&mut att, true, dir.path(), None, run_time());
        assert!(!second.any(), "second run produced fixes: {:?}", second);
    }
}
