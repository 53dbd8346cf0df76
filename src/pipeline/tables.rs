//! Table reconstruction from plain text.
//!
//! Two strategies run in order:
//!
//! 1. **Structural detection** — a [`TableDetector`] finds [`TableRegion`]s
//!    (GFM pipe tables with a separator row, or blocks of whitespace-aligned
//!    columns as pdfium emits them), and [`regions_to_tables`] turns each
//!    region into a [`Table`].
//! 2. **Separator fallback** — used when detection finds nothing or fails.
//!    [`fallback_tables`] looks for a header line containing `|`, `,` or a tab
//!    often enough, then greedily absorbs following lines that split into a
//!    similar number of cells, stopping after a run of non-matching lines.
//!
//! Titles come from the nearest short, capitalised, non-tabular line a few
//! lines above the header; otherwise a table is called `Table <n>`.

use crate::config::PipelineConfig;
use crate::error::StageError;
use crate::output::Table;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, warn};

/// How the cells of a region are delimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionLayout {
    /// `| a | b |` rows under a `|---|---|` separator.
    Pipe,
    /// Cells separated by runs of two or more spaces.
    Aligned,
}

/// Line indices of a detected table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRegion {
    pub header: usize,
    pub rows: Vec<usize>,
    pub layout: RegionLayout,
}

/// Finds table regions in a document's lines.
pub trait TableDetector: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Return the regions found in `lines`, in document order.
    fn detect_regions(
        &self,
        lines: &[&str],
        config: &PipelineConfig,
    ) -> Result<Vec<TableRegion>, StageError>;
}

/// Default detector: GFM pipe tables and whitespace-aligned column blocks.
#[derive(Debug, Default, Clone, Copy)]
pub struct AlignedColumnDetector;

/// Aligned blocks need at least this many data rows to count as a table.
const MIN_ALIGNED_ROWS: usize = 2;

impl TableDetector for AlignedColumnDetector {
    fn name(&self) -> &str {
        "aligned-columns"
    }

    fn detect_regions(
        &self,
        lines: &[&str],
        config: &PipelineConfig,
    ) -> Result<Vec<TableRegion>, StageError> {
        let mut regions = Vec::new();
        let mut i = 0;

        while i < lines.len() {
            if let Some(region) = pipe_region_at(lines, i) {
                i = region.rows.last().copied().unwrap_or(i) + 1;
                regions.push(region);
                continue;
            }

            let header_cells = split_aligned(lines[i]).len();
            if header_cells >= 2 {
                let mut rows = Vec::new();
                let mut j = i + 1;
                while j < lines.len() {
                    let cells = split_aligned(lines[j]).len();
                    if cells < 2 || cells.abs_diff(header_cells) > config.column_tolerance {
                        break;
                    }
                    rows.push(j);
                    j += 1;
                }
                if rows.len() >= MIN_ALIGNED_ROWS {
                    regions.push(TableRegion {
                        header: i,
                        rows,
                        layout: RegionLayout::Aligned,
                    });
                    i = j;
                    continue;
                }
            }
            i += 1;
        }

        Ok(regions)
    }
}

/// Run structural detection, falling back to separator scanning when it
/// yields nothing or fails.
pub fn reconstruct_tables(
    text: &str,
    detector: &dyn TableDetector,
    config: &PipelineConfig,
) -> Vec<Table> {
    let lines: Vec<&str> = text.lines().collect();

    match detector.detect_regions(&lines, config) {
        Ok(regions) if !regions.is_empty() => {
            let tables = regions_to_tables(&lines, &regions, config);
            if !tables.is_empty() {
                debug!("{} found {} tables", detector.name(), tables.len());
                return tables;
            }
        }
        Ok(_) => debug!("{} found no tables; trying separator fallback", detector.name()),
        Err(e) => warn!("{} failed ({}); trying separator fallback", detector.name(), e),
    }

    fallback_tables(text, config)
}

/// Turn detected regions into tables.
///
/// Rows that end up with no non-empty cell are dropped; a region left with
/// no rows produces no table.
pub fn regions_to_tables(
    lines: &[&str],
    regions: &[TableRegion],
    config: &PipelineConfig,
) -> Vec<Table> {
    let mut tables = Vec::with_capacity(regions.len());

    for region in regions {
        let Some(header_line) = lines.get(region.header).copied() else {
            continue;
        };
        let split = |line: &str| match region.layout {
            RegionLayout::Pipe => split_cells(line, Separator::Pipe),
            RegionLayout::Aligned => split_aligned(line),
        };

        let headers = split(header_line);
        let rows: Vec<Vec<String>> = region
            .rows
            .iter()
            .filter_map(|&idx| lines.get(idx).copied())
            .map(split)
            .filter(|cells| has_content(cells))
            .collect();

        if headers.is_empty() || rows.is_empty() {
            continue;
        }

        let title = find_title(lines, region.header, config)
            .unwrap_or_else(|| format!("Table {}", tables.len() + 1));
        tables.push(Table {
            title,
            headers,
            rows,
        });
    }

    tables
}

/// Extract GFM pipe tables only (used on OCR transcripts).
pub fn markdown_tables(text: &str, config: &PipelineConfig) -> Vec<Table> {
    let lines: Vec<&str> = text.lines().collect();
    let mut regions = Vec::new();
    let mut i = 0;
    while i < lines.len() {
        match pipe_region_at(&lines, i) {
            Some(region) => {
                i = region.rows.last().copied().unwrap_or(i) + 1;
                regions.push(region);
            }
            None => i += 1,
        }
    }
    regions_to_tables(&lines, &regions, config)
}

// ── Separator fallback ───────────────────────────────────────────────────

/// Field separators recognised by the fallback, in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Separator {
    Pipe,
    Comma,
    Tab,
}

impl Separator {
    const ALL: [Separator; 3] = [Separator::Pipe, Separator::Comma, Separator::Tab];

    pub fn as_char(self) -> char {
        match self {
            Separator::Pipe => '|',
            Separator::Comma => ',',
            Separator::Tab => '\t',
        }
    }
}

/// The separator that makes `line` a candidate header, if any.
pub fn header_separator(line: &str, config: &PipelineConfig) -> Option<Separator> {
    Separator::ALL
        .into_iter()
        .find(|sep| line.matches(sep.as_char()).count() >= config.min_separator_occurrences)
}

/// Separator-scanning fallback.
///
/// A line containing a separator at least `min_separator_occurrences` times
/// starts a table. Following lines that contain the same separator and whose
/// cell count is within `column_tolerance` of the header become rows; any
/// other line is a miss, and `max_mismatched_lines` consecutive misses end
/// the table. Markdown separator rows (`|---|`) are skipped.
pub fn fallback_tables(text: &str, config: &PipelineConfig) -> Vec<Table> {
    let lines: Vec<&str> = text.lines().collect();
    let mut tables = Vec::new();
    let mut i = 0;

    while i < lines.len() {
        let Some(sep) = header_separator(lines[i], config) else {
            i += 1;
            continue;
        };
        let headers = split_cells(lines[i], sep);
        if headers.len() < 2 {
            i += 1;
            continue;
        }

        let mut rows = Vec::new();
        let mut last_row = i;
        let mut misses = 0;
        let mut j = i + 1;

        while j < lines.len() && misses < config.max_mismatched_lines {
            let line = lines[j];
            j += 1;

            if sep == Separator::Pipe && is_separator_row(line) {
                continue;
            }
            if line.contains(sep.as_char()) {
                let cells = split_cells(line, sep);
                let within = cells.len().abs_diff(headers.len()) <= config.column_tolerance;
                if has_content(&cells) && within {
                    rows.push(cells);
                    last_row = j - 1;
                    misses = 0;
                    continue;
                }
            }
            misses += 1;
        }

        if rows.is_empty() {
            i += 1;
            continue;
        }

        let title = find_title(&lines, i, config)
            .unwrap_or_else(|| format!("Table {}", tables.len() + 1));
        debug!(
            "fallback table '{}' at line {}: {} cols, {} rows",
            title,
            i + 1,
            headers.len(),
            rows.len()
        );
        tables.push(Table {
            title,
            headers,
            rows,
        });
        i = last_row + 1;
    }

    tables
}

// ── Shared helpers ───────────────────────────────────────────────────────

/// Split a delimited line into trimmed cells. For pipes, the empty cells
/// produced by leading/trailing `|` are dropped.
pub fn split_cells(line: &str, sep: Separator) -> Vec<String> {
    let mut trimmed = line.trim();
    if sep == Separator::Pipe {
        trimmed = trimmed.strip_prefix('|').unwrap_or(trimmed);
        trimmed = trimmed.strip_suffix('|').unwrap_or(trimmed);
    }
    trimmed
        .split(sep.as_char())
        .map(|c| c.trim().to_string())
        .collect()
}

static RE_COLUMN_GAP: Lazy<Regex> =
    Lazy::new(|| Regex::new(r" {2,}").expect("column-gap regex is valid"));

/// Split a whitespace-aligned line on runs of two or more spaces.
fn split_aligned(line: &str) -> Vec<String> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.contains('|') || trimmed.contains('\t') {
        return Vec::new();
    }
    RE_COLUMN_GAP
        .split(trimmed)
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .collect()
}

fn is_pipe_row(line: &str) -> bool {
    let t = line.trim();
    t.len() > 2 && t.starts_with('|') && t.ends_with('|')
}

fn is_separator_row(line: &str) -> bool {
    let t = line.trim();
    t.contains('-')
        && t.contains('|')
        && t.chars().all(|c| matches!(c, '|' | '-' | ':' | ' '))
}

/// A GFM table whose header is at `i`, if one starts there.
fn pipe_region_at(lines: &[&str], i: usize) -> Option<TableRegion> {
    let header = lines.get(i)?;
    let sep = lines.get(i + 1)?;
    if !is_pipe_row(header) || is_separator_row(header) || !is_separator_row(sep) {
        return None;
    }

    let rows: Vec<usize> = (i + 2..lines.len())
        .take_while(|&j| is_pipe_row(lines[j]))
        .filter(|&j| !is_separator_row(lines[j]))
        .collect();
    if rows.is_empty() {
        return None;
    }

    Some(TableRegion {
        header: i,
        rows,
        layout: RegionLayout::Pipe,
    })
}

fn has_content(cells: &[String]) -> bool {
    cells.iter().any(|c| !c.is_empty())
}

/// Anything a table detector could read as a row.
fn looks_tabular(line: &str) -> bool {
    line.contains('|')
        || line.contains('\t')
        || line.matches(',').count() >= 3
        || split_aligned(line).len() >= 2
}

/// Nearest short, capitalised, non-tabular line above `header`.
fn find_title(lines: &[&str], header: usize, config: &PipelineConfig) -> Option<String> {
    let start = header.saturating_sub(config.title_lookback_lines);
    (start..header).rev().find_map(|idx| {
        let raw = lines[idx].trim();
        if raw.is_empty() || looks_tabular(raw) {
            return None;
        }
        let candidate = raw.trim_start_matches('#').trim_matches('*').trim();
        let capitalised = candidate.chars().next().is_some_and(char::is_uppercase);
        (capitalised && candidate.chars().count() < config.title_max_chars)
            .then(|| candidate.to_string())
    })
}
