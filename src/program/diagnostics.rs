//! Build diagnostics: spans, line/col and caret rendering for build logs.

use std::ops::Range;

/// Byte span in the kernel source (inclusive start, exclusive end).
pub type Span = Range<usize>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub message: String,
    pub span: Span,
}

impl Diagnostic {
    pub fn new<S: Into<String>>(message: S, span: Span) -> Self {
        Self {
            message: message.into(),
            span,
        }
    }
}

/// 1-based line and column of a byte offset.
pub fn line_col(src: &str, offset: usize) -> (usize, usize) {
    let mut line = 1;
    let mut col = 1;
    for (i, ch) in src.char_indices() {
        if i >= offset {
            break;
        }
        if ch == '\n' {
            line += 1;
            col = 1;
        } else {
            col += 1;
        }
    }
    (line, col)
}

fn line_at(src: &str, offset: usize) -> (&str, usize) {
    let offset = offset.min(src.len());
    let start = src[..offset].rfind('\n').map(|i| i + 1).unwrap_or(0);
    let end = src[offset..]
        .find('\n')
        .map(|i| offset + i)
        .unwrap_or(src.len());
    (&src[start..end], start)
}

/// Render one diagnostic as `file:line:col: error: message` followed by the
/// offending line and a caret underline.
pub fn render(src: &str, file: &str, diag: &Diagnostic) -> String {
    let (line, col) = line_col(src, diag.span.start);
    let (text, line_start) = line_at(src, diag.span.start);

    let caret_start = diag.span.start.saturating_sub(line_start);
    let width = diag
        .span
        .end
        .saturating_sub(diag.span.start)
        .clamp(1, text.len().saturating_sub(caret_start).max(1));

    format!(
        "{}:{}:{}: error: {}\n{}\n{}{}",
        file,
        line,
        col,
        diag.message,
        text,
        " ".repeat(caret_start),
        "^".repeat(width)
    )
}

/// Render every diagnostic into one build log.
pub fn render_all(src: &str, file: &str, diags: &[Diagnostic]) -> String {
    diags
        .iter()
        .map(|d| render(src, file, d))
        .collect::<Vec<_>>()
        .join("\n")
}
