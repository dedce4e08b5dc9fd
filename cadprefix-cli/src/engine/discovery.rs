use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::core::config::{DiscoveryConfig, RootOrder};
use crate::core::error::CampaignError;
use crate::core::DocumentKind;

/// Directories the authoring host writes backups into
const IGNORED_DIRS: &[&str] = &["oldversions", ".git", ".vault", "_v"];

/// Documents found under a campaign root
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Discovered {
    pub assemblies: Vec<PathBuf>,
    pub drawings: Vec<PathBuf>,
    /// Every part, so derived links outside the assembly graph are seen too
    pub parts: Vec<PathBuf>,
}

/// Find root assemblies and drawings.
///
/// `root` may be a directory, or a single assembly to use as the only root.
/// A root that cannot be read is fatal; unreadable entries below it are logged
/// and skipped.
pub fn discover(root: &Path, config: &DiscoveryConfig) -> Result<Discovered, CampaignError> {
    let metadata = std::fs::metadata(root).map_err(|e| CampaignError::Discovery {
        path: root.to_path_buf(),
        message: e.to_string(),
    })?;

    if metadata.is_file() {
        if DocumentKind::from_path(root) != DocumentKind::Assembly {
            return Err(CampaignError::Discovery {
                path: root.to_path_buf(),
                message: "not an assembly or directory".to_string(),
            });
        }
        return Ok(Discovered {
            assemblies: vec![root.to_path_buf()],
            ..Discovered::default()
        });
    }

    let mut assemblies = Vec::new();
    let mut drawings = Vec::new();
    let mut parts = Vec::new();

    for entry in WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_ignored_dir(e.path(), e.file_type().is_dir()))
    {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) if e.depth() == 0 => {
                return Err(CampaignError::Discovery {
                    path: root.to_path_buf(),
                    message: e.to_string(),
                })
            }
            Err(e) => {
                warn!("Skipping unreadable entry under {}: {}", root.display(), e);
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        match DocumentKind::from_path(entry.path()) {
            DocumentKind::Assembly => assemblies.push(entry.into_path()),
            DocumentKind::Drawing if config.include_drawings => drawings.push(entry.into_path()),
            DocumentKind::Part => parts.push(entry.into_path()),
            _ => {}
        }
    }

    order_roots(&mut assemblies, config.root_order);
    drawings.sort();
    parts.sort();

    debug!(
        "Discovered {} assemblies, {} drawings and {} parts under {}",
        assemblies.len(),
        drawings.len(),
        parts.len(),
        root.display()
    );
    Ok(Discovered {
        assemblies,
        drawings,
        parts,
    })
}

fn is_ignored_dir(path: &Path, is_dir: bool) -> bool {
    if !is_dir {
        return false;
    }
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    IGNORED_DIRS.contains(&name.as_str())
}

fn order_roots(paths: &mut [PathBuf], order: RootOrder) {
    match order {
        RootOrder::Alphabetical => paths.sort(),
        RootOrder::NewestFirst => {
            let modified = |p: &PathBuf| {
                std::fs::metadata(p)
                    .and_then(|m| m.modified())
                    .unwrap_or(SystemTime::UNIX_EPOCH)
            };
            paths.sort_by(|a, b| modified(b).cmp(&modified(a)).then_with(|| a.cmp(b)));
        }
    }
}
