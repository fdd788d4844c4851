//! Source-aware sliding-window chunker.
//!
//! Splits a quality-passed [`RawDocument`] into [`Chunk`]s sized for
//! retrieval. All sizes are counted in characters (Unicode scalar
//! values), never bytes, so accented and CJK text is measured the same
//! way as ASCII.
//!
//! # Algorithm
//!
//! 1. Trim the text. Empty text yields no chunks.
//! 2. For structural sources (books), cut the text into sections at
//!    heading lines: `Chapter XII`, `Part 2`, `3. The Return`, or
//!    all-caps lines such as `THE LONG WINTER`.
//! 3. Within each section, group lines into paragraphs and paragraphs
//!    into sentences. Sentences longer than `chunk_size - overlap` are
//!    hard-split at whitespace.
//! 4. Accumulate sentences until the next one would push the chunk past
//!    `chunk_size`, emit the chunk, and seed the next one with the last
//!    `overlap` characters of the emitted chunk (snapped forward to a
//!    word boundary).
//! 5. The final chunk of a section is emitted even when short.
//!
//! Every chunk is at most `chunk_size + 2` characters (the slack is a
//! paragraph separator). Overlap never crosses a section boundary.
//!
//! # Example
//!
//! ```rust
//! use oeuvre_core::chunk::{chunk_document, ChunkParams};
//! use oeuvre_core::models::{RawDocument, SourceType};
//!
//! let doc = RawDocument::new(SourceType::News, "a.html", "Short news item. Two sentences.");
//! let chunks = chunk_document(&doc, 0.8, &ChunkParams::new(1000, 200));
//! assert_eq!(chunks.len(), 1);
//! assert_eq!(chunks[0].metadata.chunk_index, 0);
//! ```

use sha2::{Digest, Sha256};

use crate::models::{Chunk, ChunkMetadata, RawDocument};

/// Characters of chunk text mixed into the chunk id.
const ID_PREFIX_CHARS: usize = 100;

/// Hex characters kept from the SHA-256 digest.
const ID_HEX_LEN: usize = 32;

/// Longest line still considered a heading.
const MAX_HEADING_CHARS: usize = 80;

const SECTION_KEYWORDS: &[&str] = &["chapter", "part", "section", "book"];
const STANDALONE_HEADINGS: &[&str] = &[
    "prologue",
    "epilogue",
    "preface",
    "foreword",
    "introduction",
    "afterword",
    "contents",
];
const NUMBER_WORDS: &[&str] = &[
    "one", "two", "three", "four", "five", "six", "seven", "eight", "nine", "ten", "eleven",
    "twelve", "thirteen", "fourteen", "fifteen", "sixteen", "seventeen", "eighteen", "nineteen",
    "twenty", "first", "second", "third", "fourth", "fifth", "last",
];

/// Chunk size and overlap for one source type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkParams {
    /// Target maximum chunk length in characters.
    pub chunk_size: usize,
    /// Characters carried from the end of one chunk into the next.
    pub overlap: usize,
    /// Split on structural headings before size-based splitting.
    pub structural: bool,
}

impl ChunkParams {
    pub fn new(chunk_size: usize, overlap: usize) -> Self {
        Self {
            chunk_size,
            overlap,
            structural: false,
        }
    }

    pub fn with_structural(mut self, structural: bool) -> Self {
        self.structural = structural;
        self
    }

    fn size(&self) -> usize {
        self.chunk_size.max(1)
    }

    /// Overlap is capped at half the chunk size so every chunk makes progress.
    fn effective_overlap(&self) -> usize {
        self.overlap.min(self.size() / 2)
    }
}

/// A run of text under one heading.
#[derive(Debug, Clone, PartialEq)]
struct Section {
    heading: Option<String>,
    text: String,
}

#[derive(Debug)]
struct Sentence {
    text: String,
    starts_paragraph: bool,
}

/// Split a document into chunks carrying its metadata.
///
/// # Arguments
///
/// * `doc` — The document to split.
/// * `quality_score` — Score assigned by the quality scorer, copied into
///   every chunk.
/// * `params` — Size, overlap and structural mode for the document's source.
///
/// # Guarantees
///
/// - Empty or whitespace-only text yields an empty vector.
/// - Chunk indices are contiguous: `0, 1, …, N-1`.
/// - Chunk ids depend only on filename, index and text, so re-chunking
///   identical input yields identical ids.
pub fn chunk_document(doc: &RawDocument, quality_score: f32, params: &ChunkParams) -> Vec<Chunk> {
    let text = doc.text.trim();
    if text.is_empty() {
        return Vec::new();
    }

    let sections = if params.structural {
        split_sections(text)
    } else {
        vec![Section {
            heading: None,
            text: text.to_string(),
        }]
    };

    let category = doc.effective_category();
    let title = doc.effective_title();
    let mut chunks = Vec::new();

    for section in sections {
        for piece in split_text(&section.text, params) {
            let index = chunks.len();
            chunks.push(Chunk {
                metadata: ChunkMetadata {
                    source: Some(doc.source_type),
                    category: category.clone(),
                    date: doc.date.clone(),
                    url: doc.url.clone(),
                    quality_score,
                    chunk_index: index,
                    chunk_id: chunk_id(&doc.filename, index, &piece),
                    author: doc.author.clone(),
                    section: section.heading.clone(),
                },
                title: Some(title.clone()),
                text: piece,
            });
        }
    }

    chunks
}

/// Size-based sliding-window split of plain text.
///
/// Returns the chunk texts only; [`chunk_document`] attaches metadata.
pub fn split_text(text: &str, params: &ChunkParams) -> Vec<String> {
    let size = params.size();
    let overlap = params.effective_overlap();
    let max_piece = (size - overlap).max(1);

    let mut out = Vec::new();
    let mut buf = String::new();
    let mut buf_len = 0usize;
    // True once `buf` holds text beyond the carried-over overlap.
    let mut fresh = false;

    for sentence in split_sentences(text) {
        for (i, piece) in hard_split(&sentence.text, max_piece).into_iter().enumerate() {
            let sep = if sentence.starts_paragraph && i == 0 {
                "\n\n"
            } else {
                " "
            };
            let piece_len = piece.chars().count();
            let sep_len = if buf.is_empty() { 0 } else { sep.chars().count() };

            if fresh && buf_len + sep_len + piece_len > size {
                let tail = overlap_tail(&buf, overlap);
                out.push(std::mem::take(&mut buf));
                buf_len = tail.chars().count();
                buf = tail;
                fresh = false;
            }

            if !buf.is_empty() {
                buf.push_str(sep);
                buf_len += sep.chars().count();
            }
            buf.push_str(&piece);
            buf_len += piece_len;
            fresh = true;
        }
    }

    if fresh {
        out.push(buf);
    }
    out
}

/// Deterministic chunk id: SHA-256 over filename, index and a text prefix.
pub fn chunk_id(filename: &str, index: usize, text: &str) -> String {
    let prefix: String = text.chars().take(ID_PREFIX_CHARS).collect();
    let mut hasher = Sha256::new();
    hasher.update(filename.as_bytes());
    hasher.update(b"\x1f");
    hasher.update(index.to_string().as_bytes());
    hasher.update(b"\x1f");
    hasher.update(prefix.as_bytes());
    let mut id = format!("{:x}", hasher.finalize());
    id.truncate(ID_HEX_LEN);
    id
}

/// Cut text into sections at heading lines.
///
/// Consecutive headings (e.g. `PART ONE` followed by `Chapter 1`) are
/// folded into one section; the last one names it. Heading lines stay in
/// the section text as their own paragraph.
fn split_sections(text: &str) -> Vec<Section> {
    let mut sections = Vec::new();
    let mut headings: Vec<&str> = Vec::new();
    let mut body: Vec<&str> = Vec::new();

    for line in text.lines() {
        let trimmed = line.trim();
        if is_heading(trimmed) {
            if body.iter().any(|l| !l.trim().is_empty()) {
                flush_section(&mut headings, &mut body, &mut sections);
            }
            headings.push(trimmed);
        } else {
            body.push(line);
        }
    }
    flush_section(&mut headings, &mut body, &mut sections);

    sections
}

fn flush_section(headings: &mut Vec<&str>, body: &mut Vec<&str>, sections: &mut Vec<Section>) {
    let body_text = body.join("\n");
    let body_text = body_text.trim();
    if headings.is_empty() && body_text.is_empty() {
        return;
    }
    let text = if headings.is_empty() {
        body_text.to_string()
    } else if body_text.is_empty() {
        headings.join("\n")
    } else {
        format!("{}\n\n{}", headings.join("\n"), body_text)
    };
    sections.push(Section {
        heading: headings.last().map(|h| h.to_string()),
        text,
    });
    headings.clear();
    body.clear();
}

fn is_heading(line: &str) -> bool {
    if line.is_empty() || line.chars().count() > MAX_HEADING_CHARS {
        return false;
    }
    let words: Vec<&str> = line.split_whitespace().collect();
    let first = words[0]
        .trim_end_matches(|c: char| c == '.' || c == ':')
        .to_lowercase();

    if SECTION_KEYWORDS.contains(&first.as_str()) {
        return is_keyword_heading(line, &words);
    }

    if STANDALONE_HEADINGS.contains(&first.as_str()) {
        return words.len() <= 4;
    }

    if is_numbered_heading(&words) {
        return true;
    }

    is_all_caps_heading(line, &words)
}

/// `Chapter 3`, `PART TWO.`, `Chapter 3: The Flood`. A title after the
/// number starts with a capital, and only a bare `keyword number` line
/// may end in punctuation.
fn is_keyword_heading(line: &str, words: &[&str]) -> bool {
    let starts_upper = |w: &str| w.chars().next().map(|c| !c.is_lowercase()).unwrap_or(false);
    words.len() <= 10
        && starts_upper(words[0])
        && words.get(1).map(|w| is_ordinal(w)).unwrap_or(true)
        && words.get(2).map(|w| starts_upper(w)).unwrap_or(true)
        && (words.len() <= 2 || !line.ends_with(['.', ',', ';']))
}

/// `12`, `XII`, `twelve`, `3.`, `IV:` and the like.
fn is_ordinal(word: &str) -> bool {
    let w = word.trim_end_matches(|c: char| c == '.' || c == ':' || c == ',');
    if w.is_empty() {
        return false;
    }
    if w.chars().all(|c| c.is_ascii_digit()) {
        return true;
    }
    if w.chars().all(|c| "IVXLCDM".contains(c)) {
        return true;
    }
    NUMBER_WORDS.contains(&w.to_lowercase().as_str())
}

/// `3. The Return`, `2.1 Early Years`; short, capitalized, no final period.
fn is_numbered_heading(words: &[&str]) -> bool {
    if words.len() < 2 || words.len() > 10 {
        return false;
    }
    let number = words[0].trim_end_matches('.');
    let numeric = !number.is_empty()
        && number.chars().all(|c| c.is_ascii_digit() || c == '.')
        && number.chars().next().map(|c| c.is_ascii_digit()).unwrap_or(false);
    let capitalized = words[1]
        .chars()
        .next()
        .map(char::is_uppercase)
        .unwrap_or(false);
    let last = words[words.len() - 1];
    numeric && capitalized && !last.ends_with(['.', ',', ';'])
}

fn is_all_caps_heading(line: &str, words: &[&str]) -> bool {
    if words.len() > 8 {
        return false;
    }
    let letters = line.chars().filter(|c| c.is_alphabetic()).count();
    letters >= 3 && !line.chars().any(char::is_lowercase)
}

/// Group lines into paragraphs (blank-line separated) and split each
/// paragraph into sentences at `.`, `!` or `?` followed by whitespace.
fn split_sentences(text: &str) -> Vec<Sentence> {
    let mut sentences = Vec::new();

    for paragraph in paragraphs(text) {
        let chars: Vec<(usize, char)> = paragraph.char_indices().collect();
        let mut start = 0usize;
        let mut first = true;
        let mut i = 0usize;

        while i < chars.len() {
            let (_, c) = chars[i];
            if matches!(c, '.' | '!' | '?' | '…') {
                // Include trailing closers such as quotes and brackets.
                let mut j = i + 1;
                while j < chars.len() && matches!(chars[j].1, '"' | '\'' | '”' | '’' | ')' | ']') {
                    j += 1;
                }
                let at_boundary = j >= chars.len() || chars[j].1.is_whitespace();
                if at_boundary {
                    let end = chars.get(j).map(|(b, _)| *b).unwrap_or(paragraph.len());
                    push_sentence(&mut sentences, &paragraph[start..end], &mut first);
                    start = end;
                    i = j;
                    continue;
                }
            }
            i += 1;
        }
        if start < paragraph.len() {
            push_sentence(&mut sentences, &paragraph[start..], &mut first);
        }
    }

    sentences
}

fn push_sentence(sentences: &mut Vec<Sentence>, text: &str, first: &mut bool) {
    let text = text.trim();
    if text.is_empty() {
        return;
    }
    sentences.push(Sentence {
        text: text.to_string(),
        starts_paragraph: *first,
    });
    *first = false;
}

/// Paragraphs with internal whitespace collapsed to single spaces.
fn paragraphs(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    for line in text.lines() {
        if line.trim().is_empty() {
            if !current.is_empty() {
                out.push(collapse_whitespace(&current.join(" ")));
                current.clear();
            }
        } else {
            current.push(line);
        }
    }
    if !current.is_empty() {
        out.push(collapse_whitespace(&current.join(" ")));
    }
    out
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Split an oversized sentence at whitespace into pieces of at most
/// `max_chars` characters. Words longer than that are cut mid-word.
fn hard_split(sentence: &str, max_chars: usize) -> Vec<String> {
    if sentence.chars().count() <= max_chars {
        return vec![sentence.to_string()];
    }

    let mut pieces = Vec::new();
    let mut current = String::new();
    let mut current_len = 0usize;

    for word in sentence.split_whitespace() {
        let word_len = word.chars().count();
        if word_len > max_chars {
            if !current.is_empty() {
                pieces.push(std::mem::take(&mut current));
                current_len = 0;
            }
            let chars: Vec<char> = word.chars().collect();
            for part in chars.chunks(max_chars) {
                pieces.push(part.iter().collect());
            }
            continue;
        }
        let added = if current.is_empty() { word_len } else { word_len + 1 };
        if current_len + added > max_chars && !current.is_empty() {
            pieces.push(std::mem::take(&mut current));
            current_len = 0;
        }
        if !current.is_empty() {
            current.push(' ');
            current_len += 1;
        }
        current.push_str(word);
        current_len += word_len;
    }
    if !current.is_empty() {
        pieces.push(current);
    }
    pieces
}

/// Last `overlap` characters of `text`, starting at a word boundary.
fn overlap_tail(text: &str, overlap: usize) -> String {
    if overlap == 0 {
        return String::new();
    }
    let total = text.chars().count();
    if total <= overlap {
        return text.trim().to_string();
    }
    let start = text
        .char_indices()
        .nth(total - overlap)
        .map(|(b, _)| b)
        .unwrap_or(0);
    let tail = &text[start..];
    let at_boundary = text[..start].ends_with(char::is_whitespace);
    let tail = if at_boundary {
        tail
    } else {
        match tail.find(char::is_whitespace) {
            Some(ws) => &tail[ws..],
            None => tail,
        }
    };
    tail.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SourceType;

    fn sentence(i: usize) -> String {
        format!(
            "Sentence number {} describes the harbour, the boats and the weather that day.",
            i
        )
    }

    fn long_text(sentences: usize) -> String {
        (0..sentences)
            .map(sentence)
            .collect::<Vec<_>>()
            .chunks(5)
            .map(|p| p.join(" "))
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    #[test]
    fn test_empty_text_yields_no_chunks() {
        let doc = RawDocument::new(SourceType::News, "a.html", "   \n\n  ");
        assert!(chunk_document(&doc, 0.5, &ChunkParams::new(1000, 200)).is_empty());
    }

    #[test]
    fn test_short_text_single_chunk() {
        let doc = RawDocument::new(SourceType::Forum, "t.html", "Hello there. Good post!");
        let chunks = chunk_document(&doc, 0.5, &ChunkParams::new(800, 150));
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "Hello there. Good post!");
        assert_eq!(chunks[0].metadata.source, Some(SourceType::Forum));
        assert_eq!(chunks[0].metadata.category, "forum");
        assert_eq!(chunks[0].title.as_deref(), Some("t"));
    }

    #[test]
    fn test_chunk_ids_are_deterministic() {
        let mut doc = RawDocument::new(SourceType::News, "n.html", long_text(60));
        doc.date = Some("1999-04-01".into());
        let a = chunk_document(&doc, 0.7, &ChunkParams::new(1000, 200));
        let b = chunk_document(&doc, 0.7, &ChunkParams::new(1000, 200));
        assert!(a.len() > 1);
        let ids_a: Vec<_> = a.iter().map(|c| c.id().to_string()).collect();
        let ids_b: Vec<_> = b.iter().map(|c| c.id().to_string()).collect();
        assert_eq!(ids_a, ids_b);
        let unique: std::collections::HashSet<_> = ids_a.iter().collect();
        assert_eq!(unique.len(), ids_a.len());
        assert!(ids_a.iter().all(|id| id.len() == 32));
    }

    #[test]
    fn test_chunk_id_depends_on_filename_and_index() {
        let a = chunk_id("a.txt", 0, "same text");
        assert_ne!(a, chunk_id("b.txt", 0, "same text"));
        assert_ne!(a, chunk_id("a.txt", 1, "same text"));
        assert_eq!(a, chunk_id("a.txt", 0, "same text"));
    }

    #[test]
    fn test_chunks_respect_size_and_overlap() {
        let size = 1000;
        let overlap = 200;
        let text = long_text(140);
        let total = text.chars().count();
        assert!(total > size);

        let chunks = split_text(&text, &ChunkParams::new(size, overlap));

        let estimate = ((total - overlap) as f64 / (size - overlap) as f64).ceil() as usize;
        assert!(
            chunks.len() >= estimate / 2 && chunks.len() <= estimate * 2,
            "got {} chunks, estimate {}",
            chunks.len(),
            estimate
        );

        for chunk in &chunks {
            assert!(chunk.chars().count() <= size + 2, "chunk too long");
        }

        // The head of each chunk is copied from the tail of the previous one.
        for pair in chunks.windows(2) {
            let prev = &pair[0];
            let next = &pair[1];
            let head: String = next.chars().take(overlap - 30).collect();
            let prev_tail: String = {
                let n = prev.chars().count();
                prev.chars().skip(n.saturating_sub(overlap)).collect()
            };
            assert!(prev_tail.contains(&head), "missing overlap between chunks");
        }
    }

    #[test]
    fn test_trailing_short_chunk_is_kept() {
        let text = long_text(30);
        let chunks = split_text(&text, &ChunkParams::new(500, 100));
        let last = chunks.last().unwrap();
        assert!(text.ends_with(last.split(' ').last().unwrap()));
        assert!(!last.is_empty());
    }

    #[test]
    fn test_zero_overlap_chunks_do_not_repeat() {
        let text = long_text(40);
        let chunks = split_text(&text, &ChunkParams::new(400, 0));
        let rebuilt: usize = chunks.iter().map(|c| c.split_whitespace().count()).sum();
        assert_eq!(rebuilt, text.split_whitespace().count());
    }

    #[test]
    fn test_oversized_sentence_is_hard_split() {
        let words: Vec<String> = (0..400).map(|i| format!("word{}", i)).collect();
        let text = words.join(" ");
        let chunks = split_text(&text, &ChunkParams::new(300, 50));
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.chars().count() <= 302);
        }
    }

    #[test]
    fn test_sizes_count_characters_not_bytes() {
        let text = "Ça été très agréable à Montréal. ".repeat(40);
        let chunks = split_text(&text, &ChunkParams::new(200, 40));
        for chunk in &chunks {
            assert!(chunk.chars().count() <= 202);
        }
        assert!(chunks.len() > 1);
    }

    #[test]
    fn test_detects_heading_forms() {
        assert!(is_heading("Chapter XII"));
        assert!(is_heading("CHAPTER 3: The Flood"));
        assert!(is_heading("Part Two"));
        assert!(is_heading("3. The Return"));
        assert!(is_heading("2.1 Early Years"));
        assert!(is_heading("THE LONG WINTER"));
        assert!(is_heading("Prologue"));
        assert!(!is_heading("Part of the problem was the weather that year."));
        assert!(!is_heading("1. We walked to the market and bought bread."));
        assert!(!is_heading("An ordinary line of prose."));
        assert!(!is_heading("I"));
    }

    #[test]
    fn test_wrapped_prose_is_not_a_keyword_heading() {
        assert!(!is_heading("Part two of the series was better than the first"));
        assert!(!is_heading("Chapter one ended badly for everyone,"));
        assert!(!is_heading("part two"));
        assert!(is_heading("CHAPTER XII."));
        assert!(is_heading("Chapter 4 - The Mill"));
    }

    #[test]
    fn test_books_split_on_chapters_first() {
        let text = format!(
            "Chapter 1\n\n{}\n\nChapter 2\n\n{}",
            "The first chapter is short. It ends quickly.",
            "The second chapter is also short. It ends too."
        );
        let doc = RawDocument::new(SourceType::Book, "novel.txt", text);
        let params = ChunkParams::new(1500, 300).with_structural(true);
        let chunks = chunk_document(&doc, 0.9, &params);
        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].text.starts_with("Chapter 1"));
        assert!(chunks[1].text.starts_with("Chapter 2"));
        assert_eq!(chunks[0].metadata.section.as_deref(), Some("Chapter 1"));
        assert_eq!(chunks[1].metadata.section.as_deref(), Some("Chapter 2"));
        assert_eq!(chunks[1].metadata.chunk_index, 1);
    }

    #[test]
    fn test_consecutive_headings_fold_into_one_section() {
        let text = "PART ONE\nChapter 1\nIt began in spring. The snow melted late.";
        let sections = split_sections(text);
        assert_eq!(sections.len(), 1);
        assert_eq!(sections[0].heading.as_deref(), Some("Chapter 1"));
        assert!(sections[0].text.contains("PART ONE"));
    }

    #[test]
    fn test_preamble_before_first_heading_is_kept() {
        let text = "A note on the text. It was edited twice.\n\nChapter 1\nThe story starts.";
        let sections = split_sections(text);
        assert_eq!(sections.len(), 2);
        assert_eq!(sections[0].heading, None);
        assert_eq!(sections[1].heading.as_deref(), Some("Chapter 1"));
    }

    #[test]
    fn test_sentence_split_keeps_closing_quotes() {
        let sentences = split_sentences("He said \"stop.\" Then he left! Why?");
        let texts: Vec<_> = sentences.iter().map(|s| s.text.as_str()).collect();
        assert_eq!(texts, vec!["He said \"stop.\"", "Then he left!", "Why?"]);
        assert!(sentences[0].starts_paragraph);
        assert!(!sentences[1].starts_paragraph);
    }

    #[test]
    fn test_chunks_inherit_document_metadata() {
        let mut doc = RawDocument::new(SourceType::News, "paper/1987-05.html", long_text(40));
        doc.url = Some("https://example.org/1987-05".into());
        doc.date = Some("1987".into());
        doc.author = Some("A. Writer".into());
        doc.category = Some("culture".into());
        let chunks = chunk_document(&doc, 0.66, &ChunkParams::new(800, 150));
        assert!(chunks.len() > 1);
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.metadata.chunk_index, i);
            assert_eq!(chunk.metadata.category, "culture");
            assert_eq!(chunk.metadata.date.as_deref(), Some("1987"));
            assert_eq!(chunk.metadata.author.as_deref(), Some("A. Writer"));
            assert_eq!(chunk.metadata.quality_score, 0.66);
            assert_eq!(chunk.title.as_deref(), Some("1987-05"));
        }
    }
}
