use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Hash, Eq, PartialEq, Ord, PartialOrd)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    Part,
    Assembly,
    Drawing,
    ProjectFile,
    Other,
}

impl DocumentKind {
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_ascii_lowercase().as_str() {
            "ipt" => DocumentKind::Part,
            "iam" => DocumentKind::Assembly,
            "idw" | "dwg" => DocumentKind::Drawing,
            "ipj" => DocumentKind::ProjectFile,
            _ => DocumentKind::Other,
        }
    }

    pub fn from_path(path: &Path) -> Self {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(Self::from_extension)
            .unwrap_or(DocumentKind::Other)
    }

    /// Documents that can be renamed and whose references can be repaired
    pub fn is_model_or_drawing(&self) -> bool {
        matches!(
            self,
            DocumentKind::Part | DocumentKind::Assembly | DocumentKind::Drawing
        )
    }

    /// Base name used when stripping the old prefix leaves nothing behind
    pub fn placeholder_base(&self) -> &'static str {
        match self {
            DocumentKind::Part => "Part",
            DocumentKind::Assembly => "Assembly",
            DocumentKind::Drawing => "Drawing",
            DocumentKind::ProjectFile | DocumentKind::Other => "Document",
        }
    }

    /// Order in which renamed files are moved: leaves before their parents
    pub fn move_order(&self) -> u8 {
        match self {
            DocumentKind::Part => 0,
            DocumentKind::Assembly => 1,
            DocumentKind::Drawing => 2,
            DocumentKind::ProjectFile | DocumentKind::Other => 3,
        }
    }
}

/// Placement of an occurrence in its parent, row-major 4x4
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    pub matrix: [[f64; 4]; 4],
}

impl Transform {
    pub fn identity() -> Self {
        let mut matrix = [[0.0; 4]; 4];
        for (i, row) in matrix.iter_mut().enumerate() {
            row[i] = 1.0;
        }
        Self { matrix }
    }

    pub fn translation(x: f64, y: f64, z: f64) -> Self {
        let mut transform = Self::identity();
        transform.matrix[0][3] = x;
        transform.matrix[1][3] = y;
        transform.matrix[2][3] = z;
        transform
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self::identity()
    }
}

/// Host-assigned identifier of an occurrence or drawing view reference
#[derive(Debug, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub struct OccurrenceId(pub String);

impl std::fmt::Display for OccurrenceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A placement of one document inside a parent assembly, or a view reference of a drawing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Occurrence {
    pub id: OccurrenceId,
    pub name: String,
    pub referenced_path: PathBuf,
    pub transform: Transform,
    pub visible: bool,
    pub suppressed: bool,
}

impl Occurrence {
    /// Occurrence names carry an instance counter (`Bracket:2`); this returns `Bracket`
    pub fn name_stem(&self) -> &str {
        self.name
            .rsplit_once(':')
            .map(|(stem, _)| stem)
            .unwrap_or(&self.name)
    }
}

/// A derived-part dependency of a part on a source part
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DerivedLink {
    pub id: String,
    pub source_path: PathBuf,
    pub scale: f64,
    pub transform: Transform,
}

/// A document recorded while walking the reference graph
#[derive(Debug, Clone, Serialize)]
pub struct DocumentRecord {
    pub path: PathBuf,
    pub kind: DocumentKind,
    pub part_number: Option<String>,
    pub excluded: bool,
    pub references: Vec<PathBuf>,
    pub derived_links: Vec<DerivedLink>,
}
