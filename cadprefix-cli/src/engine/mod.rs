//! The prefix rename campaign: deciding what to rename, moving files, and
//! repairing every reference to them.

pub mod classifier;
pub mod coordinator;
pub mod derived;
pub mod discovery;
pub mod naming;
pub mod rename_map;
pub mod repair;
pub mod session;

#[cfg(test)]
pub(crate) mod testing;

pub use classifier::DocumentClassifier;
pub use coordinator::{analyze_rename_dry_run, rename_by_prefix};
pub use naming::{NamingDecision, PrefixRule};
pub use rename_map::{MapBuild, RenameMapBuilder};
pub use session::{DocumentGuard, Session};

use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::core::DocumentKind;

/// One planned rename
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenameEntry {
    pub old_path: PathBuf,
    pub new_path: PathBuf,
    pub kind: DocumentKind,
}

/// Old path -> new path for every document being renamed.
///
/// Injective by construction: [`RenameMap::insert`] refuses an old path that is
/// already planned and a new path that another entry already claims (compared
/// case-insensitively, as the host's filesystem does).
#[derive(Debug, Clone, Default, Serialize)]
pub struct RenameMap {
    entries: Vec<RenameEntry>,
}

impl RenameMap {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn insert(&mut self, entry: RenameEntry) -> bool {
        if self.get(&entry.old_path).is_some() || self.claims(&entry.new_path) {
            return false;
        }
        self.entries.push(entry);
        true
    }

    pub fn get(&self, old_path: &Path) -> Option<&RenameEntry> {
        let key = path_key(old_path);
        self.entries.iter().find(|e| path_key(&e.old_path) == key)
    }

    /// Whether some entry already plans to rename to `new_path`
    pub fn claims(&self, new_path: &Path) -> bool {
        let key = path_key(new_path);
        self.entries.iter().any(|e| path_key(&e.new_path) == key)
    }

    pub fn iter(&self) -> impl Iterator<Item = &RenameEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in move order: parts, then assemblies, then drawings
    pub fn in_move_order(&self) -> Vec<&RenameEntry> {
        let mut ordered: Vec<&RenameEntry> = self.entries.iter().collect();
        ordered.sort_by(|a, b| {
            a.kind
                .move_order()
                .cmp(&b.kind.move_order())
                .then_with(|| a.old_path.cmp(&b.old_path))
        });
        ordered
    }
}

/// Where a document lives once the applied renames are in place
pub fn current_location(path: &Path, applied: &[RenameEntry]) -> PathBuf {
    let key = path_key(path);
    applied
        .iter()
        .find(|e| path_key(&e.old_path) == key)
        .map(|e| e.new_path.clone())
        .unwrap_or_else(|| path.to_path_buf())
}

/// Normalized comparison key: forward slashes, lowercase
pub fn path_key(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/").to_lowercase()
}

/// Why a document was left out of the rename map
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Content-center or vendor library document
    ContentCenter,
    MissingPartNumber,
    PrefixMismatch,
    AlreadyCorrect,
    /// The computed new name is already taken on disk
    TargetExists,
    /// Not a part, assembly or drawing
    UnsupportedKind,
    /// The host could not open or read the document
    Unreadable,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::ContentCenter => "content_center",
            SkipReason::MissingPartNumber => "missing_part_number",
            SkipReason::PrefixMismatch => "prefix_mismatch",
            SkipReason::AlreadyCorrect => "already_correct",
            SkipReason::TargetExists => "target_exists",
            SkipReason::UnsupportedKind => "unsupported_kind",
            SkipReason::Unreadable => "unreadable",
        }
    }
}

/// Skip counts per reason
pub type SkipStats = BTreeMap<SkipReason, usize>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum EntryStatus {
    Renamed,
    Copied,
    SkippedTargetExists,
    SkippedSourceMissing,
    Failed(String),
}

/// What happened to one rename entry during the move phase
#[derive(Debug, Clone, Serialize)]
pub struct EntryOutcome {
    pub old_path: PathBuf,
    pub new_path: PathBuf,
    pub kind: DocumentKind,
    #[serde(flatten)]
    pub status: EntryStatus,
}

impl EntryOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self.status, EntryStatus::Renamed | EntryStatus::Copied)
    }
}

/// Aggregate outcome of a rename campaign
#[derive(Debug, Clone, Default, Serialize)]
pub struct CampaignResult {
    pub root: PathBuf,
    pub renamed_count: usize,
    pub failed_count: usize,
    pub skipped_count: usize,
    /// Originals superseded by copies, for the caller to delete
    pub files_to_delete: Vec<PathBuf>,
    pub warnings: Vec<String>,
    pub entries: Vec<EntryOutcome>,
    pub references_repaired: usize,
    pub derived_links_repaired: usize,
    pub part_numbers_updated: usize,
    /// Documents left out of the rename map, per reason
    pub files_skipped: SkipStats,
    pub success: bool,
}

impl CampaignResult {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            ..Self::default()
        }
    }

    /// Record a non-fatal problem
    pub fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        warn!("{}", message);
        self.warnings.push(message);
    }

    /// Entries whose file now lives at the new path
    pub fn applied(&self) -> impl Iterator<Item = &EntryOutcome> {
        self.entries.iter().filter(|e| e.is_applied())
    }

    pub fn format_summary(&self) -> String {
        let mut output = String::new();

        output.push_str("========================================\n");
        output.push_str("         PREFIX RENAME RESULT\n");
        output.push_str("========================================\n\n");

        if self.success {
            output.push_str("✅ Campaign completed\n\n");
        } else {
            output.push_str("❌ No document was renamed\n\n");
        }

        output.push_str(&format!(
            "📊 {} document{} renamed\n",
            self.renamed_count,
            if self.renamed_count == 1 { "" } else { "s" }
        ));
        if self.failed_count > 0 {
            output.push_str(&format!("❌ {} failed\n", self.failed_count));
        }
        if self.skipped_count > 0 {
            output.push_str(&format!("⏭️  {} skipped\n", self.skipped_count));
        }
        output.push_str(&format!(
            "🔗 {} reference{} repaired, {} derived link{} recreated\n",
            self.references_repaired,
            if self.references_repaired == 1 { "" } else { "s" },
            self.derived_links_repaired,
            if self.derived_links_repaired == 1 { "" } else { "s" }
        ));

        if !self.entries.is_empty() {
            output.push_str("\n📝 Files:\n");
            for entry in &self.entries {
                let marker = match &entry.status {
                    EntryStatus::Renamed | EntryStatus::Copied => "✓",
                    EntryStatus::Failed(_) => "✗",
                    _ => "-",
                };
                output.push_str(&format!(
                    "   {} {} -> {}\n",
                    marker,
                    relative_display(&entry.old_path, &self.root),
                    relative_display(&entry.new_path, &self.root)
                ));
            }
        }

        if !self.files_to_delete.is_empty() {
            output.push_str("\n🗑️  Superseded originals:\n");
            for path in &self.files_to_delete {
                output.push_str(&format!("   {}\n", relative_display(path, &self.root)));
            }
        }

        if !self.warnings.is_empty() {
            output.push_str("\n⚠️  Warnings:\n");
            for warning in &self.warnings {
                output.push_str(&format!("   {}\n", warning));
            }
        }

        output.push_str("\n========================================\n");
        output
    }
}

/// Read-only analysis of what a campaign would do
#[derive(Debug, Clone, Default, Serialize)]
pub struct DryRunReport {
    pub root: PathBuf,
    pub assemblies_found: usize,
    pub drawings_found: usize,
    pub files_to_rename: usize,
    pub content_center_files: usize,
    pub files_skipped: SkipStats,
    pub planned: Vec<RenameEntry>,
    pub warnings: Vec<String>,
}

impl DryRunReport {
    pub fn format_summary(&self) -> String {
        let mut output = String::new();

        output.push_str("========================================\n");
        output.push_str("       DRY-RUN PREFIX RENAME\n");
        output.push_str("========================================\n\n");

        output.push_str(&format!("📂 {} assemblies found\n", self.assemblies_found));
        if self.drawings_found > 0 {
            output.push_str(&format!("📐 {} drawings found\n", self.drawings_found));
        }
        output.push_str(&format!("📊 {} files to rename\n", self.files_to_rename));
        output.push_str(&format!(
            "📚 {} content center files\n",
            self.content_center_files
        ));

        if !self.files_skipped.is_empty() {
            output.push_str("\n⏭️  Skipped:\n");
            for (reason, count) in &self.files_skipped {
                output.push_str(&format!("   {}: {}\n", reason.as_str(), count));
            }
        }

        if !self.planned.is_empty() {
            output.push_str("\n📝 Planned renames:\n");
            for entry in &self.planned {
                output.push_str(&format!(
                    "   {} -> {}\n",
                    relative_display(&entry.old_path, &self.root),
                    relative_display(&entry.new_path, &self.root)
                ));
            }
        }

        if !self.warnings.is_empty() {
            output.push_str("\n⚠️  Warnings:\n");
            for warning in &self.warnings {
                output.push_str(&format!("   {}\n", warning));
            }
        }

        output.push_str("\n========================================\n");
        output
    }
}

/// `path` relative to `root` when it lives below it
pub fn relative_display(path: &Path, root: &Path) -> String {
    pathdiff::diff_paths(path, root)
        .filter(|rel| !rel.starts_with(".."))
        .unwrap_or_else(|| path.to_path_buf())
        .display()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(old: &str, new: &str, kind: DocumentKind) -> RenameEntry {
        RenameEntry {
            old_path: PathBuf::from(old),
            new_path: PathBuf::from(new),
            kind,
        }
    }

    #[test]
    fn test_rename_map_is_injective() {
        let mut map = RenameMap::new();
        assert!(map.insert(entry("/p/BASE_200.ipt", "/p/XYZ_200.ipt", DocumentKind::Part)));
        assert!(!map.insert(entry("/p/OTHER_200.ipt", "/p/xyz_200.IPT", DocumentKind::Part)));
        assert!(!map.insert(entry("/p/base_200.ipt", "/p/XYZ_201.ipt", DocumentKind::Part)));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_move_order() {
        let mut map = RenameMap::new();
        assert!(map.insert(entry("/p/D.idw", "/p/XYZ_D.idw", DocumentKind::Drawing)));
        assert!(map.insert(entry("/p/A.iam", "/p/XYZ_A.iam", DocumentKind::Assembly)));
        assert!(map.insert(entry("/p/P.ipt", "/p/XYZ_P.ipt", DocumentKind::Part)));

        let kinds: Vec<DocumentKind> = map.in_move_order().iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![DocumentKind::Part, DocumentKind::Assembly, DocumentKind::Drawing]
        );
    }

    #[test]
    fn test_relative_display() {
        let root = Path::new("/work/proj");
        assert_eq!(relative_display(Path::new("/work/proj/sub/a.ipt"), root), "sub/a.ipt");
        assert_eq!(relative_display(Path::new("/other/a.ipt"), root), "/other/a.ipt");
    }

    #[test]
    fn test_summary_lists_warnings() {
        let mut result = CampaignResult::new(Path::new("/work"));
        result.warn("Target already exists: XYZ_200.ipt");
        let summary = result.format_summary();
        assert!(summary.contains("No document was renamed"));
        assert!(summary.contains("Target already exists"));
    }
}
