//! Markdown to LaTeX rendering.
//!
//! The output always carries the same fixed preamble so that it compiles
//! under a stock `pdflatex` install. Input that is already LaTeX (generators
//! sometimes answer in LaTeX regardless of what was asked) is restructured
//! onto that preamble instead of being converted.

use async_trait::async_trait;
use regex::Regex;
use std::sync::OnceLock;
use tracing::debug;

use crate::core::ContentConstraints;
use crate::errors::AdapterError;
use crate::stages::ports::{DocumentRenderer, RenderRequest, TypesetArtifact};

/// Preamble shared by every rendered document.
pub const LATEX_PREAMBLE: &str = "\\documentclass{article}
\\usepackage[margin=1in]{geometry}
\\usepackage{amsmath,amssymb,graphicx}
\\usepackage[T1]{fontenc}
\\usepackage[utf8]{inputenc}
\\usepackage{lmodern}
\\usepackage{textcomp}
\\usepackage{lastpage}
";

struct InlinePatterns {
    bold: Regex,
    emph: Regex,
    code: Regex,
    link: Regex,
    ordered: Regex,
    metadata: Regex,
}

#[allow(clippy::expect_used)]
fn patterns() -> &'static InlinePatterns {
    static PATTERNS: OnceLock<InlinePatterns> = OnceLock::new();
    PATTERNS.get_or_init(|| InlinePatterns {
        bold: Regex::new(r"\*\*(.+?)\*\*").expect("bold pattern compiles"),
        emph: Regex::new(r"\*([^*\s][^*]*?)\*").expect("emph pattern compiles"),
        code: Regex::new(r"`([^`]+)`").expect("code pattern compiles"),
        link: Regex::new(r"\[([^\]]+)\]\(([^)\s]+)\)").expect("link pattern compiles"),
        ordered: Regex::new(r"^\d+[.)]\s+").expect("ordered pattern compiles"),
        metadata: Regex::new(r"(?i)^\*\*(author|department|institution|email|date)\*\*\s*:")
            .expect("metadata pattern compiles"),
    })
}

/// Escapes LaTeX special characters.
#[must_use]
pub fn escape_latex(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\\' => out.push_str("\\textbackslash{}"),
            '&' | '%' | '$' | '#' | '_' | '{' | '}' => {
                out.push('\\');
                out.push(c);
            }
            '~' => out.push_str("\\textasciitilde{}"),
            '^' => out.push_str("\\textasciicircum{}"),
            _ => out.push(c),
        }
    }
    out
}

/// Removes Markdown code fence markers (including ```` ```latex ````).
#[must_use]
pub fn strip_code_fences(content: &str) -> String {
    content
        .lines()
        .filter(|line| !line.trim_start().starts_with("```"))
        .collect::<Vec<_>>()
        .join("\n")
}

fn inline(text: &str) -> String {
    let p = patterns();
    let escaped = escape_latex(text);
    let out = p.bold.replace_all(&escaped, "\\textbf{$1}");
    let out = p.emph.replace_all(&out, "\\emph{$1}");
    let out = p.code.replace_all(&out, "\\texttt{$1}");
    p.link.replace_all(&out, "$1 (\\texttt{$2})").into_owned()
}

fn author_block(constraints: &ContentConstraints) -> String {
    [
        &constraints.author,
        &constraints.department,
        &constraints.institution,
        &constraints.email,
    ]
    .into_iter()
    .map(|s| s.trim())
    .filter(|s| !s.is_empty())
    .map(escape_latex)
    .collect::<Vec<_>>()
    .join(" \\\\ ")
}

fn looks_like_latex(content: &str) -> bool {
    content.contains("\\documentclass") || content.contains("\\begin{document}")
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum ListKind {
    Itemize,
    Enumerate,
}

impl ListKind {
    fn env(self) -> &'static str {
        match self {
            Self::Itemize => "itemize",
            Self::Enumerate => "enumerate",
        }
    }
}

fn list_item(line: &str) -> Option<(ListKind, &str)> {
    for marker in ["- ", "* ", "+ "] {
        if let Some(rest) = line.strip_prefix(marker) {
            return Some((ListKind::Itemize, rest));
        }
    }
    patterns()
        .ordered
        .find(line)
        .map(|m| (ListKind::Enumerate, &line[m.end()..]))
}

fn heading(line: &str) -> Option<(usize, &str)> {
    let level = line.chars().take_while(|c| *c == '#').count();
    if level == 0 {
        return None;
    }
    line[level..].strip_prefix(' ').map(|rest| (level, rest.trim()))
}

/// Converts a Markdown paper into a complete LaTeX document.
///
/// The first level-one heading becomes the title (falling back to `title`),
/// `**Author**:`-style metadata lines are dropped in favour of the author
/// block built from `constraints`, and an `Abstract` heading opens an
/// `abstract` environment.
#[must_use]
pub fn markdown_to_latex(markdown: &str, title: &str, constraints: &ContentConstraints) -> String {
    let content = strip_code_fences(markdown);
    if looks_like_latex(&content) {
        return restructure_latex(&content, title, constraints);
    }

    let mut doc_title = title.trim().to_string();
    let mut seen_title = false;
    let mut body: Vec<String> = Vec::new();
    let mut list: Option<ListKind> = None;
    let mut in_abstract = false;

    for raw in content.lines() {
        let line = raw.trim();

        let item = list_item(line);
        if let Some(kind) = list {
            if item.map(|(k, _)| k) != Some(kind) {
                body.push(format!("\\end{{{}}}", kind.env()));
                list = None;
            }
        }

        if line.is_empty() {
            if body.last().is_some_and(|l| !l.is_empty()) {
                body.push(String::new());
            }
            continue;
        }
        if patterns().metadata.is_match(line) || line.chars().all(|c| c == '-') {
            continue;
        }

        if let Some((level, text)) = heading(line) {
            if level == 1 && !seen_title {
                seen_title = true;
                doc_title = text.to_string();
                continue;
            }
            if in_abstract {
                body.push("\\end{abstract}".to_string());
                in_abstract = false;
            }
            if text.eq_ignore_ascii_case("abstract") {
                body.push("\\begin{abstract}".to_string());
                in_abstract = true;
                continue;
            }
            let command = match level {
                1 | 2 => "section",
                3 => "subsection",
                _ => "subsubsection",
            };
            body.push(format!("\\{command}{{{}}}", inline(text)));
            continue;
        }

        if let Some((kind, text)) = item {
            if list.is_none() {
                body.push(format!("\\begin{{{}}}", kind.env()));
                list = Some(kind);
            }
            body.push(format!("  \\item {}", inline(text)));
            continue;
        }

        body.push(inline(line));
    }
    if let Some(kind) = list {
        body.push(format!("\\end{{{}}}", kind.env()));
    }
    if in_abstract {
        body.push("\\end{abstract}".to_string());
    }
    while body.last().is_some_and(String::is_empty) {
        body.pop();
    }

    let mut out = vec![
        LATEX_PREAMBLE.to_string(),
        format!("\\title{{{}}}", escape_latex(&doc_title)),
        format!("\\author{{{}}}", author_block(constraints)),
        format!("\\date{{{}}}", escape_latex(&constraints.display_date())),
        "\\begin{document}".to_string(),
        "\\maketitle".to_string(),
    ];
    out.extend(body);
    out.push("\\end{document}".to_string());
    out.join("\n")
}

/// Rebuilds an existing LaTeX document around [`LATEX_PREAMBLE`].
///
/// The original preamble is discarded except for its `\title`, `\author`
/// and `\date` lines; missing ones are filled from `title` and `constraints`.
#[must_use]
pub fn restructure_latex(content: &str, title: &str, constraints: &ContentConstraints) -> String {
    let content = strip_code_fences(content);
    let mut in_preamble = false;
    let mut doc_title = None;
    let mut author = None;
    let mut date = None;
    let mut body = Vec::new();

    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with("\\documentclass") {
            in_preamble = true;
            continue;
        }
        if trimmed.starts_with("\\begin{document}") {
            in_preamble = false;
            continue;
        }
        if trimmed.starts_with("\\end{document}") || trimmed.starts_with("\\maketitle") {
            continue;
        }
        if in_preamble || trimmed.starts_with("\\title{") || trimmed.starts_with("\\author{") || trimmed.starts_with("\\date{") {
            if trimmed.starts_with("\\title{") {
                doc_title = Some(trimmed.to_string());
            } else if trimmed.starts_with("\\author{") {
                author = Some(trimmed.to_string());
            } else if trimmed.starts_with("\\date{") {
                date = Some(trimmed.to_string());
            }
            continue;
        }
        if !trimmed.is_empty() {
            body.push(line.to_string());
        }
    }

    let mut out = vec![
        LATEX_PREAMBLE.to_string(),
        doc_title.unwrap_or_else(|| format!("\\title{{{}}}", escape_latex(title.trim()))),
        author.unwrap_or_else(|| format!("\\author{{{}}}", author_block(constraints))),
        date.unwrap_or_else(|| format!("\\date{{{}}}", escape_latex(&constraints.display_date()))),
        "\\begin{document}".to_string(),
        "\\maketitle".to_string(),
    ];
    out.extend(body);
    out.push("\\end{document}".to_string());
    out.join("\n")
}

/// Local [`DocumentRenderer`]: writes `<stem>.tex` next to the Markdown.
#[derive(Debug, Clone, Copy, Default)]
pub struct MarkdownLatexRenderer;

impl MarkdownLatexRenderer {
    /// Creates the renderer.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl DocumentRenderer for MarkdownLatexRenderer {
    async fn render(&self, request: &RenderRequest) -> Result<TypesetArtifact, AdapterError> {
        let source = &request.document.path;
        let markdown = tokio::fs::read_to_string(source).await?;
        if markdown.trim().is_empty() {
            return Err(AdapterError::invalid_input(format!("{} is empty", source.display())));
        }

        let latex = markdown_to_latex(&markdown, &request.title, &request.constraints);
        let path = source.with_extension("tex");
        tokio::fs::write(&path, latex).await?;
        debug!(path = %path.display(), "Rendered LaTeX");
        Ok(TypesetArtifact { path })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorCategory;
    use crate::stages::ports::DocumentArtifact;

    fn constraints() -> ContentConstraints {
        ContentConstraints {
            author: "Ada Lovelace".to_string(),
            institution: "Analytical Society".to_string(),
            date: "January 1, 2024".to_string(),
            ..ContentConstraints::default()
        }
    }

    #[test]
    fn test_escape_latex() {
        assert_eq!(escape_latex("50% of $x_1 & #2"), "50\\% of \\$x\\_1 \\& \\#2");
        assert_eq!(escape_latex("a~b^c"), "a\\textasciitilde{}b\\textasciicircum{}c");
    }

    #[test]
    fn test_strip_code_fences() {
        let cleaned = strip_code_fences("```latex\n\\section{A}\n```\n");
        assert!(!cleaned.contains("```"));
        assert!(cleaned.contains("\\section{A}"));
    }

    #[test]
    fn test_markdown_structure() {
        let md = "# Quantum Noise in Practice\n\
                  **Author**: Someone Else\n\
                  **Date**: 2020\n\n\
                  ## Abstract\n\
                  We study **noise**.\n\n\
                  ## Methods\n\
                  - first step\n\
                  - second *careful* step\n\n\
                  1. one\n\
                  2. two\n\n\
                  ### Details\n\
                  Use `qiskit` at 99% fidelity.\n";

        let out = markdown_to_latex(md, "fallback", &constraints());

        assert!(out.starts_with("\\documentclass{article}"));
        assert!(out.contains("\\title{Quantum Noise in Practice}"));
        assert!(out.contains("\\author{Ada Lovelace \\\\ Analytical Society}"));
        assert!(out.contains("\\date{January 1, 2024}"));
        assert!(!out.contains("Someone Else"));
        assert!(out.contains("\\begin{abstract}\nWe study \\textbf{noise}.\n\n\\end{abstract}"));
        assert!(out.contains("\\section{Methods}"));
        assert!(out.contains("\\begin{itemize}\n  \\item first step\n  \\item second \\emph{careful} step\n\\end{itemize}"));
        assert!(out.contains("\\begin{enumerate}\n  \\item one\n  \\item two\n\\end{enumerate}"));
        assert!(out.contains("\\subsection{Details}"));
        assert!(out.contains("Use \\texttt{qiskit} at 99\\% fidelity."));
        assert_eq!(out.matches("\\begin{document}").count(), 1);
        assert!(out.ends_with("\\end{document}"));
    }

    #[test]
    fn test_title_falls_back_to_request() {
        let out = markdown_to_latex("Just a paragraph.", "Quantum noise", &constraints());
        assert!(out.contains("\\title{Quantum noise}"));
        assert!(out.contains("\\maketitle\nJust a paragraph.\n\\end{document}"));
    }

    #[test]
    fn test_latex_input_is_restructured() {
        let src = "```latex\n\
                   \\documentclass{article}\n\
                   \\usepackage{fancy}\n\
                   \\title{Test Title}\n\
                   \\author{Author Name}\n\
                   \\date{2025-01-01}\n\
                   \\begin{document}\n\
                   \\maketitle\n\
                   \\section{Intro}\n\
                   Body text.\n\
                   \\end{document}\n\
                   ```\n";

        let out = markdown_to_latex(src, "ignored", &constraints());

        assert_eq!(out.matches("\\begin{document}").count(), 1);
        assert_eq!(out.matches("\\end{document}").count(), 1);
        assert_eq!(out.matches("\\maketitle").count(), 1);
        assert!(out.contains("\\title{Test Title}"));
        assert!(out.contains("\\author{Author Name}"));
        assert!(!out.contains("fancy"));
        assert!(out.contains("\\section{Intro}\nBody text."));
    }

    #[test]
    fn test_restructure_fills_missing_metadata() {
        let out = restructure_latex("\\begin{document}\nHello\n\\end{document}", "Quantum noise", &constraints());
        assert!(out.contains("\\title{Quantum noise}"));
        assert!(out.contains("\\date{January 1, 2024}"));
    }

    #[tokio::test]
    async fn test_renderer_writes_tex_next_to_markdown() {
        let dir = tempfile::tempdir().unwrap();
        let md = dir.path().join("paper.md");
        tokio::fs::write(&md, "# Title\n\nText.").await.unwrap();

        let request = RenderRequest {
            document: DocumentArtifact { path: md },
            title: "t".to_string(),
            constraints: constraints(),
        };
        let typeset = MarkdownLatexRenderer::new().render(&request).await.unwrap();

        assert_eq!(typeset.path, dir.path().join("paper.tex"));
        let written = tokio::fs::read_to_string(&typeset.path).await.unwrap();
        assert!(written.contains("\\title{Title}"));
    }

    #[tokio::test]
    async fn test_renderer_rejects_empty_document() {
        let dir = tempfile::tempdir().unwrap();
        let md = dir.path().join("paper.md");
        tokio::fs::write(&md, "  \n").await.unwrap();

        let request = RenderRequest {
            document: DocumentArtifact { path: md },
            title: "t".to_string(),
            constraints: constraints(),
        };
        let err = MarkdownLatexRenderer::new().render(&request).await.unwrap_err();
        assert_eq!(err.category, ErrorCategory::InvalidInput);
    }

    #[tokio::test]
    async fn test_renderer_missing_document_is_not_found() {
        let request = RenderRequest {
            document: DocumentArtifact {
                path: "/nonexistent/preprint-forge/paper.md".into(),
            },
            title: "t".to_string(),
            constraints: constraints(),
        };
        let err = MarkdownLatexRenderer::new().render(&request).await.unwrap_err();
        assert_eq!(err.category, ErrorCategory::NotFound);
    }
}
