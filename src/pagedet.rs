//! Statistical page-break detector: given a finished document of
//! [`RichLine`]s with no declared page boundaries, guesses a uniform
//! `linesPerPage` from the regularity of top/bottom blank-line counts and
//! repeated headers/footers, then elides the trailing blank lines of each
//! page and marks the first line of every subsequent page with
//! [`Style::PAGE_BREAK`].
//!
//! Ported from `original_source/src/pagedet.cpp` and `pagedetd.cpp`
//! (`PageDetector`/`PageDetectorData`): same candidate range `[30, 90)`,
//! the same four score components (top/bottom empty-line variance,
//! top/bottom repeated-header frequency, number-only bottom lines), and
//! the same acceptance test (`highScore > 0 && fPages > 2.0 &&
//! variance(scores) >= 50_000.0`).

use crate::printer::{rich_line_to_string, RichLine, Style};
use std::collections::BTreeMap;

const MIN_LINES_PER_PAGE: u32 = 30;
const MAX_LINES_PER_PAGE: u32 = 90;
const VARIANCE_THRESHOLD: f64 = 50_000.0;
const F_PAGES_THRESHOLD: f64 = 2.0;

fn mean(values: &[i64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<i64>() as f64 / values.len() as f64
}

fn variance(values: &[i64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let m = mean(values);
    values.iter().map(|&v| (v as f64 - m).powi(2)).sum::<f64>() / values.len() as f64
}

struct PageData<'a> {
    lines: &'a [RichLine],
    lines_per_page: u32,
    pages: u32,
    f_pages: f64,
    score: i64,
    sum_bottom_number_only: i64,
    top_empty: Vec<i64>,
    bottom_empty: Vec<i64>,
    top_first_non_empty: BTreeMap<String, i64>,
    bottom_first_non_empty: BTreeMap<String, i64>,
}

impl<'a> PageData<'a> {
    fn new(lines: &'a [RichLine], lines_per_page: u32) -> Self {
        let f_pages = lines.len() as f64 / lines_per_page as f64;
        PageData {
            lines,
            lines_per_page,
            pages: f_pages.floor() as u32,
            f_pages,
            score: 0,
            sum_bottom_number_only: 0,
            top_empty: Vec::new(),
            bottom_empty: Vec::new(),
            top_first_non_empty: BTreeMap::new(),
            bottom_first_non_empty: BTreeMap::new(),
        }
    }

    fn is_line_valid(&self, page: u32, line_offset: i64) -> bool {
        let index = page as i64 * self.lines_per_page as i64 + line_offset;
        index >= 0 && (index as usize) < self.lines.len()
    }

    fn line_string(&self, page: u32, line_offset: i64) -> String {
        if !self.is_line_valid(page, line_offset) {
            return String::new();
        }
        let index = (page as i64 * self.lines_per_page as i64 + line_offset) as usize;
        rich_line_to_string(&self.lines[index])
    }

    fn half_page_count(&self) -> i64 {
        ((self.pages as f64) / 2.0).ceil() as i64
    }

    fn top_empty_lines(&self, page: u32) -> i64 {
        let mut last_valid = 0i64;
        for offset in 0..self.lines_per_page as i64 {
            if self.is_line_valid(page, offset) {
                last_valid = offset;
                if !self.line_string(page, offset).is_empty() {
                    return offset;
                }
            } else {
                return last_valid + 1;
            }
        }
        0
    }

    fn bottom_empty_lines(&self, page: u32) -> i64 {
        for offset in (0..self.lines_per_page as i64).rev() {
            if self.is_line_valid(page, offset) {
                if !self.line_string(page, offset).is_empty() {
                    return self.lines_per_page as i64 - offset - 1;
                }
            } else {
                return 0;
            }
        }
        0
    }

    fn collect(&mut self) {
        for page in 0..self.pages {
            let top_empty = self.top_empty_lines(page);
            self.top_empty.push(top_empty);
            if self.is_line_valid(page, top_empty) {
                let line = self.line_string(page, top_empty);
                *self.top_first_non_empty.entry(line).or_insert(0) += 1;
            }

            let bottom_empty = self.bottom_empty_lines(page);
            self.bottom_empty.push(bottom_empty);
            let line_offset = -bottom_empty - 1;
            if self.is_line_valid(page + 1, line_offset) {
                let line = self.line_string(page + 1, line_offset);
                let trimmed = line.trim_matches(' ');
                let is_number_only = !trimmed.is_empty() && trimmed.chars().all(|c| c.is_ascii_digit() || c == '-' || c == ' ');
                if is_number_only {
                    self.sum_bottom_number_only += 1;
                } else {
                    *self.bottom_first_non_empty.entry(line).or_insert(0) += 1;
                }
            }
        }
    }

    fn empty_lines_score(&mut self, values: &[i64]) {
        let var = variance(values);
        let component = if var != 0.0 { (25.0 / var).min(200.0) } else { 200.0 };
        self.score += (component as i64) * values.len() as i64;
    }

    /// First map entry (in key order) reaching the half-page threshold adds
    /// to the score; matches the original's break-on-first-match over a
    /// `std::map`, which iterates sorted by key.
    fn first_non_empty_lines_score(&mut self, lines: &BTreeMap<String, i64>) {
        let half = self.half_page_count();
        for count in lines.values() {
            if *count >= half {
                self.score += 200 * count;
                break;
            }
        }
    }

    fn number_only_lines_score(&mut self) {
        let half = self.half_page_count();
        if self.sum_bottom_number_only >= half {
            self.score += 200 * self.sum_bottom_number_only;
        }
    }

    fn estimate_score(&mut self) -> i64 {
        self.empty_lines_score(&self.top_empty.clone());
        self.empty_lines_score(&self.bottom_empty.clone());
        self.first_non_empty_lines_score(&self.top_first_non_empty.clone());
        self.first_non_empty_lines_score(&self.bottom_first_non_empty.clone());
        self.number_only_lines_score();
        self.score
    }
}

/// Result of running the detector over a finished document.
pub struct PageDetector {
    lines_per_page: Option<u32>,
}

impl PageDetector {
    pub fn new(lines: &[RichLine]) -> Self {
        let mut high_score = 0i64;
        let mut high_score_lpp = 0u32;
        let mut high_score_f_pages = 0.0;
        let mut scores = Vec::new();

        for lpp in MIN_LINES_PER_PAGE..MAX_LINES_PER_PAGE {
            let mut data = PageData::new(lines, lpp);
            data.collect();
            let score = data.estimate_score();
            if score > 0 {
                scores.push(score);
            }
            if score > high_score {
                high_score = score;
                high_score_lpp = lpp;
                high_score_f_pages = data.f_pages;
            }
        }

        let accepted = high_score > 0 && high_score_f_pages > F_PAGES_THRESHOLD && variance(&scores) >= VARIANCE_THRESHOLD;
        PageDetector { lines_per_page: if accepted { Some(high_score_lpp) } else { None } }
    }

    pub fn has_lines_per_page_detected(&self) -> bool {
        self.lines_per_page.is_some()
    }

    pub fn lines_per_page(&self) -> Option<u32> {
        self.lines_per_page
    }
}

/// Applies page-break formatting to a finished document if a regular page
/// size was detected: trailing blank lines within each page are dropped and
/// [`Style::PAGE_BREAK`] is set on the first line of every page after the
/// first. Returns the document unchanged if no page size was detected.
pub fn format_document(lines: Vec<RichLine>) -> Vec<RichLine> {
    let detector = PageDetector::new(&lines);
    let Some(lpp) = detector.lines_per_page() else {
        return lines;
    };
    let lpp = lpp as usize;
    let mut out = Vec::new();
    for (page_index, chunk) in lines.chunks(lpp).enumerate() {
        let mut page: Vec<RichLine> = chunk.to_vec();
        while page.last().map_or(false, |l| rich_line_to_string(l).trim().is_empty()) {
            page.pop();
        }
        if page_index > 0 {
            if let Some(first_line) = page.first_mut() {
                if let Some(first_char) = first_line.first_mut() {
                    first_char.style.insert(Style::PAGE_BREAK);
                }
            }
        }
        out.extend(page);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::printer::RichCharacter;

    fn text_line(s: &str) -> RichLine {
        s.bytes().map(|b| RichCharacter { character: b, style: Style::empty() }).collect()
    }

    fn blank_line() -> RichLine {
        Vec::new()
    }

    fn build_document(pages: usize, lines_per_page: usize, header: &str) -> Vec<RichLine> {
        let mut doc = Vec::new();
        for page in 0..pages {
            doc.push(text_line(header));
            for _ in 1..lines_per_page - 2 {
                doc.push(text_line(&format!("row on page {page}")));
            }
            doc.push(blank_line());
            doc.push(blank_line());
        }
        doc
    }

    #[test]
    fn uniform_document_is_detected() {
        let doc = build_document(6, 40, "FLEX ASSEMBLER LISTING");
        let detector = PageDetector::new(&doc);
        assert!(detector.has_lines_per_page_detected());
        assert_eq!(detector.lines_per_page(), Some(40));
    }

    #[test]
    fn short_irregular_document_is_not_detected() {
        let doc = vec![text_line("one line"), blank_line(), text_line("another line")];
        let detector = PageDetector::new(&doc);
        assert!(!detector.has_lines_per_page_detected());
    }

    #[test]
    fn formatting_elides_trailing_blanks_and_marks_page_breaks() {
        let doc = build_document(5, 32, "PAGE HEADER");
        let formatted = format_document(doc);
        let breaks: Vec<usize> = formatted
            .iter()
            .enumerate()
            .filter(|(_, line)| line.first().map_or(false, |c| c.style.contains(Style::PAGE_BREAK)))
            .map(|(i, _)| i)
            .collect();
        assert_eq!(breaks.len(), 4);
        assert!(formatted.iter().all(|l| !rich_line_to_string(l).trim().is_empty() || l.is_empty()));
    }
}
