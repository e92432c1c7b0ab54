//! Structure-aware chunking of research papers.
//!
//! The [`Chunker`] turns a validated [`DocumentStructure`] into the ordered
//! chunk set of one paper:
//!
//! 1. One `overview` chunk (title, authors, abstract) capped at a small budget
//! 2. `section` / `subsection` chunks for body text, split on word boundaries
//!    when a body exceeds its budget
//! 3. One dedicated chunk per table, figure and reference entry
//!
//! Chunks produced by splitting carry `preview_text` / `review_text` overlap
//! slices of their neighbours. The core `text` slices of a split body
//! concatenate back to the original body exactly.
//!
//! Chunking is all-or-nothing: the first invalid node aborts the whole paper
//! with a [`ChunkingError`] naming the node path.

pub mod document;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::models::{Chunk, ChunkType, SectionKind};

pub use document::{DocumentStructure, FigureNode, Position, ReferenceNode, SectionNode, TableNode};

/// Average characters per token used for budget estimates.
pub const CHARS_PER_TOKEN: usize = 4;

/// Errors raised while chunking a document.
#[derive(Debug, Error, PartialEq)]
pub enum ChunkingError {
    /// A node of the document tree is malformed
    #[error("Invalid document node at {path}: {reason}")]
    InvalidNode { path: String, reason: String },

    /// The paper id is unusable as a collection id
    #[error("Invalid paper id: {0}")]
    InvalidPaperId(String),
}

/// Result type for chunking operations.
pub type ChunkingResult<T> = Result<T, ChunkingError>;

/// Token budgets and overlap settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ChunkerConfig {
    /// Budget of the overview chunk; the abstract is truncated to fit
    pub overview_max_tokens: usize,

    /// Target budget of a top-level section chunk
    pub section_max_tokens: usize,

    /// Target budget of a subsection chunk
    pub subsection_max_tokens: usize,

    /// Share of a neighbouring chunk copied into preview/review text
    pub overlap_fraction: f32,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            overview_max_tokens: 300,
            section_max_tokens: 1000,
            subsection_max_tokens: 500,
            overlap_fraction: 0.15,
        }
    }
}

/// Estimate the token count of a text.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(CHARS_PER_TOKEN)
}

/// Split `text` into word pieces whose concatenation is exactly `text`.
///
/// Each piece is a run of non-whitespace followed by the whitespace after it;
/// leading whitespace is attached to the first piece.
fn split_pieces(text: &str) -> Vec<&str> {
    let mut pieces = Vec::new();
    let mut start = 0;
    let mut seen_word = false;
    let mut in_trailing_ws = false;

    for (idx, ch) in text.char_indices() {
        if ch.is_whitespace() {
            if seen_word {
                in_trailing_ws = true;
            }
        } else {
            if in_trailing_ws {
                pieces.push(&text[start..idx]);
                start = idx;
                in_trailing_ws = false;
            }
            seen_word = true;
        }
    }
    if start < text.len() {
        pieces.push(&text[start..]);
    }
    pieces
}

/// Whether a piece ends at a paragraph break or sentence end.
fn is_soft_boundary(piece: &str) -> bool {
    let word = piece.trim_end();
    let whitespace = &piece[word.len()..];
    whitespace.contains("\n\n") || (!whitespace.is_empty() && word.ends_with(&['.', '?', '!', ':'][..]))
}

/// Split `text` into consecutive slices of at most `max_tokens` each.
///
/// Cuts fall on word boundaries, preferring a paragraph or sentence boundary
/// when one exists in the second half of the slice. A single word longer than
/// the budget becomes its own oversized slice. The slices concatenate back to
/// `text`.
pub fn split_by_budget(text: &str, max_tokens: usize) -> Vec<&str> {
    let max_chars = max_tokens.max(1) * CHARS_PER_TOKEN;
    let mut slices = Vec::new();
    let mut start = 0;
    let mut pos = 0;
    let mut len_chars = 0;
    let mut soft_break: Option<(usize, usize)> = None;

    for piece in split_pieces(text) {
        let piece_chars = piece.chars().count();
        while len_chars > 0 && len_chars + piece_chars > max_chars {
            let (cut, carried) = match soft_break {
                Some((byte, chars)) if chars * 2 >= max_chars => (byte, len_chars - chars),
                _ => (pos, 0),
            };
            slices.push(&text[start..cut]);
            start = cut;
            len_chars = carried;
            soft_break = None;
        }
        pos += piece.len();
        len_chars += piece_chars;
        if is_soft_boundary(piece) {
            soft_break = Some((pos, len_chars));
        }
    }
    if start < text.len() {
        slices.push(&text[start..]);
    }
    slices
}

/// Trailing slice of roughly `chars` characters, starting at a word boundary.
fn trailing_slice(text: &str, chars: usize) -> &str {
    let total = text.chars().count();
    if chars == 0 {
        return "";
    }
    if chars >= total {
        return text.trim();
    }
    let byte_start = text
        .char_indices()
        .nth(total - chars)
        .map(|(i, _)| i)
        .unwrap_or(0);
    let tail = &text[byte_start..];
    let tail = match tail.find(char::is_whitespace) {
        Some(ws) if ws < tail.len() => &tail[ws..],
        _ => tail,
    };
    tail.trim()
}

/// Leading slice of roughly `chars` characters, ending at a word boundary.
fn leading_slice(text: &str, chars: usize) -> &str {
    if chars == 0 {
        return "";
    }
    let byte_end = match text.char_indices().nth(chars) {
        Some((i, _)) => i,
        None => return text.trim(),
    };
    let head = &text[..byte_end];
    let head = match head.rfind(char::is_whitespace) {
        Some(ws) if ws > 0 => &head[..ws],
        _ => head,
    };
    head.trim()
}

/// Truncate `text` to at most `max_chars` characters on a word boundary.
pub(crate) fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let budget = max_chars.saturating_sub(3);
    let mut out = leading_slice(text, budget).to_string();
    out.push_str("...");
    out
}

/// Builds the chunk set of one paper.
#[derive(Debug, Clone, Default)]
pub struct Chunker {
    config: ChunkerConfig,
}

/// Accumulates chunks in document order, assigning `order_index`.
struct ChunkSink<'a> {
    paper_id: &'a str,
    chunks: Vec<Chunk>,
}

impl<'a> ChunkSink<'a> {
    fn push(
        &mut self,
        section_path: String,
        chunk_type: ChunkType,
        section_kind: SectionKind,
        text: String,
        preview_text: String,
        review_text: String,
    ) {
        let order_index = self.chunks.len();
        self.chunks.push(Chunk {
            chunk_id: Chunk::make_id(self.paper_id, order_index),
            paper_id: self.paper_id.to_string(),
            section_path,
            chunk_type,
            section_kind,
            token_count: estimate_tokens(&text),
            text,
            preview_text,
            review_text,
            order_index,
        });
    }
}

enum Floating<'d> {
    Table(&'d TableNode),
    Figure(&'d FigureNode),
}

impl Floating<'_> {
    fn position(&self) -> Position {
        match self {
            Floating::Table(t) => t.position,
            Floating::Figure(f) => f.position,
        }
    }
}

impl Chunker {
    /// Create a chunker with the given budgets.
    pub fn new(config: ChunkerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ChunkerConfig {
        &self.config
    }

    /// Chunk a paper.
    ///
    /// # Arguments
    /// * `paper_id` - Identifier of the paper the chunks belong to
    /// * `document` - The normalized document tree
    ///
    /// # Returns
    /// The paper's chunks in document order with sequential `order_index`
    ///
    /// # Errors
    /// Returns `ChunkingError::InvalidNode` naming the first malformed node;
    /// no partial chunk set is ever returned
    pub fn chunk(&self, paper_id: &str, document: &DocumentStructure) -> ChunkingResult<Vec<Chunk>> {
        if paper_id.trim().is_empty() || paper_id.contains(char::is_whitespace) {
            return Err(ChunkingError::InvalidPaperId(paper_id.to_string()));
        }
        validate_document(document)?;

        let mut sink = ChunkSink {
            paper_id,
            chunks: Vec::new(),
        };

        sink.push(
            "Overview".to_string(),
            ChunkType::Overview,
            SectionKind::Abstract,
            self.overview_text(document),
            String::new(),
            String::new(),
        );

        let mut table_counter = 0;
        let mut figure_counter = 0;
        for section in &document.sections {
            let kind = SectionKind::classify(&section.heading);
            self.chunk_section(
                &mut sink,
                section,
                section.heading.trim().to_string(),
                ChunkType::Section,
                kind,
                &mut table_counter,
                &mut figure_counter,
            );
        }

        for (idx, reference) in document.references.iter().enumerate() {
            sink.push(
                format!("References > [{}]", idx + 1),
                ChunkType::Reference,
                SectionKind::Other,
                reference.text.trim().to_string(),
                String::new(),
                String::new(),
            );
        }

        debug!(paper_id, chunks = sink.chunks.len(), "Chunked document");
        Ok(sink.chunks)
    }

    fn overview_text(&self, document: &DocumentStructure) -> String {
        let mut header = format!("Title: {}", document.title.trim());
        if !document.authors.is_empty() {
            header.push_str("\nAuthors: ");
            header.push_str(&document.authors.join(", "));
        }

        let abstract_text = document.abstract_text.trim();
        if abstract_text.is_empty() {
            return header;
        }

        let max_chars = self.config.overview_max_tokens * CHARS_PER_TOKEN;
        let header_chars = header.chars().count() + 2;
        if header_chars >= max_chars {
            return truncate_chars(&header, max_chars);
        }
        format!("{}\n\n{}", header, truncate_chars(abstract_text, max_chars - header_chars))
    }

    #[allow(clippy::too_many_arguments)]
    fn chunk_section(
        &self,
        sink: &mut ChunkSink<'_>,
        section: &SectionNode,
        path: String,
        chunk_type: ChunkType,
        kind: SectionKind,
        table_counter: &mut usize,
        figure_counter: &mut usize,
    ) {
        let budget = match chunk_type {
            ChunkType::Section => self.config.section_max_tokens,
            _ => self.config.subsection_max_tokens,
        };

        if !section.text.trim().is_empty() {
            let parts = split_by_budget(&section.text, budget);
            let split = parts.len() > 1;
            for (idx, part) in parts.iter().enumerate() {
                let (preview, review) = if split {
                    let preview = idx
                        .checked_sub(1)
                        .map(|prev| self.overlap_tail(parts[prev]))
                        .unwrap_or_default();
                    let review = parts
                        .get(idx + 1)
                        .map(|next| self.overlap_head(next))
                        .unwrap_or_default();
                    (preview, review)
                } else {
                    (String::new(), String::new())
                };
                sink.push(path.clone(), chunk_type, kind, part.to_string(), preview, review);
            }
        }

        let mut floating: Vec<Floating<'_>> = section
            .tables
            .iter()
            .map(Floating::Table)
            .chain(section.figures.iter().map(Floating::Figure))
            .collect();
        floating.sort_by_key(|f| f.position());
        let mut floating = floating.into_iter().peekable();

        // Subsections keep document order; tables and figures are slotted in
        // ahead of the first subsection that does not precede them. An
        // unplaced subsection lets every float through.
        for sub in &section.subsections {
            let unplaced = sub.position == Position::default();
            while let Some(item) = floating.next_if(|f| unplaced || f.position() <= sub.position) {
                self.chunk_floating(sink, item, &path, kind, table_counter, figure_counter);
            }
            self.chunk_section(
                sink,
                sub,
                format!("{} > {}", path, sub.heading.trim()),
                ChunkType::Subsection,
                kind,
                table_counter,
                figure_counter,
            );
        }
        for item in floating {
            self.chunk_floating(sink, item, &path, kind, table_counter, figure_counter);
        }
    }

    fn chunk_floating(
        &self,
        sink: &mut ChunkSink<'_>,
        item: Floating<'_>,
        path: &str,
        kind: SectionKind,
        table_counter: &mut usize,
        figure_counter: &mut usize,
    ) {
        match item {
            Floating::Table(table) => {
                *table_counter += 1;
                let label = table
                    .label
                    .clone()
                    .filter(|l| !l.trim().is_empty())
                    .unwrap_or_else(|| format!("Table {}", table_counter));
                let mut text = label.clone();
                if !table.caption.trim().is_empty() {
                    text.push_str(": ");
                    text.push_str(table.caption.trim());
                }
                if !table.content.trim().is_empty() {
                    text.push('\n');
                    text.push_str(table.content.trim());
                }
                sink.push(
                    format!("{} > {}", path, label),
                    ChunkType::Table,
                    kind,
                    text,
                    String::new(),
                    String::new(),
                );
            }
            Floating::Figure(figure) => {
                *figure_counter += 1;
                let label = figure
                    .label
                    .clone()
                    .filter(|l| !l.trim().is_empty())
                    .unwrap_or_else(|| format!("Figure {}", figure_counter));
                sink.push(
                    format!("{} > {}", path, label),
                    ChunkType::Figure,
                    kind,
                    format!("{}: {}", label, figure.caption.trim()),
                    String::new(),
                    String::new(),
                );
            }
        }
    }

    fn overlap_chars(&self, neighbour: &str) -> usize {
        let chars = neighbour.chars().count() as f32;
        (chars * self.config.overlap_fraction.clamp(0.0, 1.0)).round() as usize
    }

    fn overlap_tail(&self, previous: &str) -> String {
        trailing_slice(previous, self.overlap_chars(previous)).to_string()
    }

    fn overlap_head(&self, next: &str) -> String {
        leading_slice(next, self.overlap_chars(next)).to_string()
    }
}

fn invalid(path: String, reason: &str) -> ChunkingError {
    ChunkingError::InvalidNode {
        path,
        reason: reason.to_string(),
    }
}

/// Validate the whole tree before any chunk is produced.
fn validate_document(document: &DocumentStructure) -> ChunkingResult<()> {
    if document.title.trim().is_empty() {
        return Err(invalid("title".to_string(), "title is empty"));
    }
    for (i, section) in document.sections.iter().enumerate() {
        validate_section(section, format!("sections[{}]", i))?;
    }
    for (i, reference) in document.references.iter().enumerate() {
        if reference.text.trim().is_empty() {
            return Err(invalid(format!("references[{}].text", i), "reference entry is empty"));
        }
    }
    Ok(())
}

fn validate_section(section: &SectionNode, path: String) -> ChunkingResult<()> {
    if section.heading.trim().is_empty() {
        return Err(invalid(format!("{}.heading", path), "section heading is empty"));
    }
    if section.heading.contains(" > ") {
        return Err(invalid(
            format!("{}.heading", path),
            "section heading contains the path separator ' > '",
        ));
    }
    for (i, table) in section.tables.iter().enumerate() {
        if table.caption.trim().is_empty() && table.content.trim().is_empty() {
            return Err(invalid(
                format!("{}.tables[{}]", path, i),
                "table has neither caption nor content",
            ));
        }
    }
    for (i, figure) in section.figures.iter().enumerate() {
        if figure.caption.trim().is_empty() {
            return Err(invalid(
                format!("{}.figures[{}].caption", path, i),
                "figure caption is empty",
            ));
        }
    }
    for (i, sub) in section.subsections.iter().enumerate() {
        validate_section(sub, format!("{}.subsections[{}]", path, i))?;
    }
    Ok(())
}
