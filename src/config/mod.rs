//! Layered configuration for the desk subsystem.
//!
//! Defaults are merged with an optional `deskserver.toml` and
//! `DESKSERVER_*` environment variables, in that order.

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

use crate::shared::error::{DeskError, DeskResult};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DeskConfig {
    pub tickets: TicketConfig,
    pub reopening: ReopeningConfig,
    pub transfers: TransferConfig,
    pub attachments: AttachmentConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TicketConfig {
    /// Prefix of human-readable ticket codes, e.g. `EVQ-0042`.
    pub code_prefix: String,
    pub default_priority: String,
}

impl Default for TicketConfig {
    fn default() -> Self {
        Self {
            code_prefix: "EVQ".to_string(),
            default_priority: "medium".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReopeningConfig {
    /// Days after closure during which a ticket may be reopened.
    pub day_limit: i64,
    /// How many times a single ticket may spawn successors.
    pub max_reopenings: i32,
    /// Candidate search only matches tickets from the same requester.
    pub same_contact_only: bool,
    /// Candidate search only matches tickets in the same category.
    pub same_problem_only: bool,
    /// Successor inherits the original priority instead of the default.
    pub inherit_priority: bool,
}

impl Default for ReopeningConfig {
    fn default() -> Self {
        Self {
            day_limit: 7,
            max_reopenings: 3,
            same_contact_only: true,
            same_problem_only: true,
            inherit_priority: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    pub require_reason: bool,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            require_reason: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AttachmentConfig {
    pub upload_dir: PathBuf,
    pub max_file_bytes: u64,
    /// Combined size cap across all active attachments of one ticket.
    pub max_total_bytes: u64,
    pub max_per_ticket: i64,
    pub image_extensions: Vec<String>,
    pub video_extensions: Vec<String>,
    pub document_extensions: Vec<String>,
    pub allowed_mime_types: Vec<String>,
    /// Identity assigned by reconciliation to rows with no uploader.
    pub fallback_uploader: Option<Uuid>,
    /// Days an inactive attachment is retained before the purge sweep
    /// removes its file.
    pub purge_retain_days: i64,
}

impl Default for AttachmentConfig {
    fn default() -> Self {
        Self {
            upload_dir: PathBuf::from("uploads/tickets"),
            max_file_bytes: 10 * 1024 * 1024,
            max_total_bytes: 50 * 1024 * 1024,
            max_per_ticket: 5,
            image_extensions: strings(&["jpg", "jpeg", "png", "gif", "webp", "bmp"]),
            video_extensions: strings(&["mp4", "avi", "mov", "wmv", "flv", "webm", "mkv"]),
            document_extensions: strings(&[
                "pdf", "doc", "docx", "xls", "xlsx", "ppt", "pptx", "txt",
            ]),
            allowed_mime_types: strings(&[
                "image/jpeg",
                "image/jpg",
                "image/png",
                "image/gif",
                "image/webp",
                "image/bmp",
                "video/mp4",
                "video/avi",
                "video/quicktime",
                "video/x-ms-wmv",
                "video/x-flv",
                "video/webm",
                "video/x-matroska",
                "application/pdf",
                "application/msword",
                "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
                "application/vnd.ms-excel",
                "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
                "application/vnd.ms-powerpoint",
                "application/vnd.openxmlformats-officedocument.presentationml.presentation",
                "text/plain",
            ]),
            fallback_uploader: None,
            purge_retain_days: 30,
        }
    }
}

impl AttachmentConfig {
    /// Union of the three extension categories, all lower-case.
    pub fn allowed_extensions(&self) -> impl Iterator<Item = &str> {
        self.image_extensions
            .iter()
            .chain(&self.video_extensions)
            .chain(&self.document_extensions)
            .map(String::as_str)
    }
}

impl DeskConfig {
    /// Defaults < `deskserver.toml` < `DESKSERVER_*` env vars.
    pub fn load() -> DeskResult<Self> {
        Self::load_from(Toml::file("deskserver.toml"))
    }

    pub fn load_from(toml: figment::providers::Data<figment::providers::Toml>) -> DeskResult<Self> {
        Figment::from(Serialized::defaults(DeskConfig::default()))
            .merge(toml)
            .merge(Env::prefixed("DESKSERVER_").split("__"))
            .extract()
            .map_err(|e| DeskError::Validation(format!("Invalid configuration: {}", e)))
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_policy() {
        let cfg = DeskConfig::default();
        assert_eq!(cfg.reopening.day_limit, 7);
        assert_eq!(cfg.reopening.max_reopenings, 3);
        assert_eq!(cfg.attachments.max_file_bytes, 10 * 1024 * 1024);
        assert_eq!(cfg.attachments.max_total_bytes, 50 * 1024 * 1024);
        assert!(cfg.transfers.require_reason);
        assert_eq!(cfg.tickets.code_prefix, "EVQ");
    }

    #[test]
    fn extension_categories_are_disjoint() {
        let cfg = AttachmentConfig::default();
        for ext in &cfg.image_extensions {
            assert!(!cfg.video_extensions.contains(ext));
            assert!(!cfg.document_extensions.contains(ext));
        }
        for ext in &cfg.video_extensions {
            assert!(!cfg.document_extensions.contains(ext));
        }
    }

    #[test]
    fn toml_overrides_defaults() {
        let toml = figment::providers::Toml::string(
            r#"
            [reopening]
            day_limit = 14
            [attachments]
            max_per_ticket = 10
            "#,
        );
        let cfg = DeskConfig::load_from(toml).unwrap();
        assert_eq!(cfg.reopening.day_limit, 14);
        assert_eq!(cfg.attachments.max_per_ticket, 10);
        // untouched sections keep their defaults
        assert_eq!(cfg.reopening.max_reopenings, 3);
    }
}
