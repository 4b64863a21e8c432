/// A chunk of guideline text before it is assigned ids and persisted.
#[derive(Debug, Clone)]
pub struct ChunkSpan {
    pub content: String,
    pub seq: usize,
    pub section_title: Option<String>,
    pub char_start: usize,
    pub char_end: usize,
}

/// Chunker for guideline and technical-sheet documents.
///
/// Splits by Markdown section headings first, then by paragraphs for large
/// sections, with a configured overlap so dosing sentences are not
/// truncated across chunk boundaries. Plain-text documents without
/// headings become a single section.
pub struct GuidelineChunker {
    max_chunk_chars: usize,
    min_chunk_chars: usize,
    overlap_chars: usize,
}

impl GuidelineChunker {
    pub fn new(max_chunk_chars: usize, overlap_chars: usize) -> Self {
        Self {
            max_chunk_chars,
            min_chunk_chars: 20,
            overlap_chars,
        }
    }

    pub fn chunk(&self, text: &str) -> Vec<ChunkSpan> {
        let mut chunks = Vec::new();
        let mut seq = 0;

        for section in split_by_headings(text) {
            if section.content.len() <= self.max_chunk_chars {
                // Tiny sections are merged below
                chunks.push(ChunkSpan {
                    char_end: section.offset + section.content.len(),
                    content: section.content,
                    seq,
                    section_title: section.title,
                    char_start: section.offset,
                });
                seq += 1;
            } else {
                chunks.extend(split_section_by_paragraphs(
                    &section.content,
                    &section.title,
                    section.offset,
                    self.max_chunk_chars,
                    self.overlap_chars,
                    &mut seq,
                ));
            }
        }

        merge_tiny_chunks(&mut chunks, self.min_chunk_chars);
        for (i, chunk) in chunks.iter_mut().enumerate() {
            chunk.seq = i;
        }
        chunks
    }
}

impl Default for GuidelineChunker {
    fn default() -> Self {
        Self::new(1000, 100)
    }
}

struct Section {
    title: Option<String>,
    content: String,
    offset: usize,
}

fn split_by_headings(text: &str) -> Vec<Section> {
    let mut sections = Vec::new();
    let mut current_title: Option<String> = None;
    let mut current_content = String::new();
    let mut current_offset = 0;
    let mut char_pos = 0;

    for line in text.lines() {
        if line.starts_with("# ") || line.starts_with("## ") || line.starts_with("### ") {
            flush_section(&mut sections, current_title.take(), &current_content, current_offset);
            current_title = Some(line.trim_start_matches('#').trim().to_string());
            current_content = String::new();
            // Section content starts after the heading line
            current_offset = char_pos + line.len() + 1;
        } else {
            current_content.push_str(line);
            current_content.push('\n');
        }
        char_pos += line.len() + 1;
    }

    flush_section(&mut sections, current_title, &current_content, current_offset);
    sections
}

/// Trim the accumulated section and adjust its offset so that
/// `text[offset..offset + content.len()]` is exactly the chunk content.
fn flush_section(
    sections: &mut Vec<Section>,
    title: Option<String>,
    content: &str,
    offset: usize,
) {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return;
    }
    let leading = content.len() - content.trim_start().len();
    sections.push(Section {
        title,
        content: trimmed.to_string(),
        offset: offset + leading,
    });
}

fn split_section_by_paragraphs(
    content: &str,
    title: &Option<String>,
    base_offset: usize,
    max_chars: usize,
    overlap: usize,
    seq: &mut usize,
) -> Vec<ChunkSpan> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut char_offset = base_offset;

    for para in content.split("\n\n") {
        if current.len() + para.len() > max_chars && !current.is_empty() {
            push_span(&mut chunks, &current, title, char_offset, seq);

            if current.len() > overlap {
                let overlap_start = floor_char_boundary(&current, current.len() - overlap);
                current = current[overlap_start..].to_string();
                char_offset += overlap_start;
            } else {
                current.clear();
            }
        }

        if para.len() > max_chars {
            // A single oversized paragraph is split at sentence boundaries
            chunks.extend(split_long_paragraph(
                para,
                title,
                char_offset,
                max_chars,
                overlap,
                seq,
            ));
            char_offset += para.len();
            current.clear();
        } else {
            current.push_str(para);
            current.push_str("\n\n");
        }
    }

    if !current.trim().is_empty() {
        push_span(&mut chunks, current.trim(), title, char_offset, seq);
    }

    chunks
}

fn split_long_paragraph(
    para: &str,
    title: &Option<String>,
    base_offset: usize,
    max_chars: usize,
    overlap: usize,
    seq: &mut usize,
) -> Vec<ChunkSpan> {
    let mut chunks = Vec::new();
    let mut start = 0;

    while start < para.len() {
        let end = floor_char_boundary(para, (start + max_chars).min(para.len()));

        // Prefer a sentence boundary within the last 20% of the window
        let break_at = if end < para.len() {
            let search_start = floor_char_boundary(para, start + (max_chars * 4 / 5));
            para[search_start..end]
                .rfind(". ")
                .map(|pos| search_start + pos + 2)
                .unwrap_or(end)
        } else {
            end
        };

        push_span(&mut chunks, para[start..break_at].trim(), title, base_offset + start, seq);

        if break_at >= para.len() {
            break;
        }

        start = if break_at > overlap {
            floor_char_boundary(para, break_at - overlap)
        } else {
            break_at
        };
    }

    chunks
}

/// Largest char boundary at or below `i`. Cut points derived from byte
/// arithmetic must never land inside a multi-byte character.
fn floor_char_boundary(s: &str, mut i: usize) -> usize {
    if i >= s.len() {
        return s.len();
    }
    while !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

fn push_span(
    chunks: &mut Vec<ChunkSpan>,
    content: &str,
    title: &Option<String>,
    char_start: usize,
    seq: &mut usize,
) {
    chunks.push(ChunkSpan {
        content: content.to_string(),
        seq: *seq,
        section_title: title.clone(),
        char_start,
        char_end: char_start + content.len(),
    });
    *seq += 1;
}

fn merge_tiny_chunks(chunks: &mut Vec<ChunkSpan>, min_chars: usize) {
    let mut i = 0;
    while i < chunks.len() {
        if chunks[i].content.len() < min_chars && i + 1 < chunks.len() {
            let next = chunks.remove(i + 1);
            chunks[i].content.push_str("\n\n");
            chunks[i].content.push_str(&next.content);
            chunks[i].char_end = next.char_end;
        } else {
            i += 1;
        }
    }
}
