//! Normalized document structure handed over by the PDF-structuring
//! collaborator.
//!
//! The tree is plain data: the chunker validates it and never mutates it.
//! All collections are in document order as produced upstream; `position`
//! orders the tables and figures that float inside a section, and slots them
//! between that section's subsections.

use serde::{Deserialize, Serialize};

/// Location of a node in the source PDF.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct Position {
    /// 1-based page number
    pub page: u32,

    /// Reading-order index within the page
    #[serde(default)]
    pub order: u32,
}

/// Root of a structured paper.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DocumentStructure {
    pub title: String,

    #[serde(default)]
    pub authors: Vec<String>,

    #[serde(default, rename = "abstract")]
    pub abstract_text: String,

    #[serde(default)]
    pub sections: Vec<SectionNode>,

    #[serde(default)]
    pub references: Vec<ReferenceNode>,
}

/// A section or nested subsection.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SectionNode {
    pub heading: String,

    /// Body text of this section, excluding its subsections
    #[serde(default)]
    pub text: String,

    #[serde(default)]
    pub position: Position,

    #[serde(default)]
    pub subsections: Vec<SectionNode>,

    #[serde(default)]
    pub tables: Vec<TableNode>,

    #[serde(default)]
    pub figures: Vec<FigureNode>,
}

impl SectionNode {
    pub fn new(heading: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            heading: heading.into(),
            text: text.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TableNode {
    /// Label as printed, e.g. "Table 2"
    #[serde(default)]
    pub label: Option<String>,

    #[serde(default)]
    pub caption: String,

    /// Cell contents serialized row by row
    #[serde(default)]
    pub content: String,

    #[serde(default)]
    pub position: Position,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FigureNode {
    #[serde(default)]
    pub label: Option<String>,

    pub caption: String,

    #[serde(default)]
    pub position: Position,
}

/// One bibliography entry.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ReferenceNode {
    pub text: String,

    #[serde(default)]
    pub position: Position,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_minimal_document() {
        let json = r#"{
            "title": "Attention Is All You Need",
            "abstract": "We propose the Transformer.",
            "sections": [{"heading": "Introduction", "text": "Recurrent models..."}]
        }"#;
        let doc: DocumentStructure = serde_json::from_str(json).unwrap();
        assert_eq!(doc.abstract_text, "We propose the Transformer.");
        assert_eq!(doc.sections.len(), 1);
        assert!(doc.sections[0].subsections.is_empty());
        assert!(doc.references.is_empty());
        assert_eq!(doc.sections[0].position, Position::default());
    }

    #[test]
    fn test_positions_order_by_page_then_reading_order() {
        let a = Position { page: 1, order: 9 };
        let b = Position { page: 2, order: 0 };
        let c = Position { page: 2, order: 3 };
        assert!(a < b && b < c);
    }
}
