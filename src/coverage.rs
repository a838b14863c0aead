//! CSS coverage capture and usage percentages

use crate::driver::PageDriver;
use crate::Result;
use log::debug;

/// A used byte span of a stylesheet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoverageRange {
    pub start: usize,
    pub end: usize,
}

/// Coverage of one stylesheet
#[derive(Debug, Clone, PartialEq)]
pub struct CoverageReport {
    pub url: String,
    /// Full stylesheet source
    pub text: String,
    /// Sorted, non-overlapping used spans within `[0, text.len())`
    pub ranges: Vec<CoverageRange>,
}

/// One rule-usage record as reported by the browser. Offsets count UTF-16
/// code units of the stylesheet text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuleUsage {
    pub start: usize,
    pub end: usize,
    pub used: bool,
}

impl CoverageReport {
    /// Build a report from raw rule usage: unused rules are dropped and the
    /// used ones merged into disjoint byte ranges clamped to the text.
    pub fn from_rule_usage(url: impl Into<String>, text: impl Into<String>, usage: &[RuleUsage]) -> Self {
        let text = text.into();
        let offsets = Utf16Offsets::new(&text);
        let mut spans: Vec<(usize, usize)> = usage
            .iter()
            .filter(|u| u.used)
            .map(|u| (offsets.byte_offset(u.start), offsets.byte_offset(u.end)))
            .filter(|(s, e)| s < e)
            .collect();
        spans.sort_unstable();

        let mut ranges: Vec<CoverageRange> = Vec::with_capacity(spans.len());
        for (start, end) in spans {
            match ranges.last_mut() {
                Some(last) if start <= last.end => last.end = last.end.max(end),
                _ => ranges.push(CoverageRange { start, end }),
            }
        }

        Self { url: url.into(), text, ranges }
    }

    /// Bytes covered by the used ranges
    pub fn used_bytes(&self) -> usize {
        self.ranges.iter().map(|r| r.end.saturating_sub(r.start)).sum()
    }

    /// Used share of the stylesheet in percent, rounded to one decimal.
    /// Lengths are measured in UTF-16 code units, like the browser's offsets.
    /// An empty stylesheet reports 0.
    pub fn usage_percent(&self) -> f64 {
        if self.text.is_empty() {
            return 0.0;
        }
        let (used, total) = if self.text.is_ascii() {
            (self.used_bytes(), self.text.len())
        } else {
            let used = self
                .ranges
                .iter()
                .filter_map(|r| self.text.get(r.start..r.end))
                .map(|span| span.encode_utf16().count())
                .sum();
            (used, self.text.encode_utf16().count())
        };
        let pct = used as f64 / total as f64 * 100.0;
        (pct * 10.0).round() / 10.0
    }
}

/// Maps UTF-16 offsets onto byte offsets at char boundaries
enum Utf16Offsets {
    Ascii(usize),
    /// `(utf16 offset, byte offset)` of every char start, then the end
    Table(Vec<(usize, usize)>),
}

impl Utf16Offsets {
    fn new(text: &str) -> Self {
        if text.is_ascii() {
            return Utf16Offsets::Ascii(text.len());
        }
        let mut table = Vec::with_capacity(text.len() + 1);
        let mut units = 0;
        for (at, c) in text.char_indices() {
            table.push((units, at));
            units += c.len_utf16();
        }
        table.push((units, text.len()));
        Utf16Offsets::Table(table)
    }

    /// Offsets past the end clamp to the text length. An offset inside a
    /// surrogate pair lands on the start of its char.
    fn byte_offset(&self, unit: usize) -> usize {
        match self {
            Utf16Offsets::Ascii(len) => unit.min(*len),
            Utf16Offsets::Table(table) => {
                let next = table.partition_point(|&(u, _)| u <= unit);
                table[next.saturating_sub(1)].1
            }
        }
    }
}

/// Brackets a navigation with CSS capture and answers usage queries
#[derive(Debug, Default)]
pub struct CoverageRecorder {
    started: bool,
    reports: Vec<CoverageReport>,
}

impl CoverageRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn start<P: PageDriver + ?Sized>(&mut self, page: &P) -> Result<()> {
        page.start_css_coverage().await?;
        self.started = true;
        Ok(())
    }

    /// Stop capture if it was started. A recorder that never started keeps
    /// an empty report list.
    pub async fn stop<P: PageDriver + ?Sized>(&mut self, page: &P) -> Result<()> {
        if !self.started {
            return Ok(());
        }
        self.reports = page.stop_css_coverage().await?;
        self.started = false;
        debug!("collected {} stylesheet coverage reports", self.reports.len());
        Ok(())
    }

    pub fn reports(&self) -> &[CoverageReport] {
        &self.reports
    }

    /// First report whose URL ends with `suffix`
    pub fn report_for(&self, suffix: &str) -> Option<&CoverageReport> {
        self.reports.iter().find(|r| r.url.ends_with(suffix))
    }

    /// Usage percentage for the asset ending with `suffix`, `None` when no
    /// stylesheet matches.
    pub fn usage_for(&self, suffix: &str) -> Option<f64> {
        self.report_for(suffix).map(CoverageReport::usage_percent)
    }
}
