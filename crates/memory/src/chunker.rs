//! Line-aligned chunking.
//!
//! A file is cut into chunks of whole lines, each at most `max_tokens`
//! estimated tokens (a single overlong line becomes its own chunk). Byte
//! ranges are contiguous and cover the file exactly, so concatenating the
//! chunk contents reproduces the original text.

use llmcode_core::{ByteRange, FileChunk, content_hash};

/// ~4 bytes per token, rounded up. Same heuristic the prompt assembler uses.
fn line_tokens(line: &str) -> usize {
    line.len().div_ceil(4)
}

/// Split `content` into chunks for `path`. Empty files yield no chunks.
pub fn chunk_text(path: &str, content: &str, max_tokens: usize) -> Vec<FileChunk> {
    let max_tokens = max_tokens.max(1);
    let hash = content_hash(content.as_bytes());

    let mut chunks = Vec::new();
    let mut start = 0usize;
    let mut end = 0usize;
    let mut tokens = 0usize;

    for line in content.split_inclusive('\n') {
        let cost = line_tokens(line);
        if tokens + cost > max_tokens && end > start {
            chunks.push(make_chunk(path, content, &hash, start, end));
            start = end;
            tokens = 0;
        }
        end += line.len();
        tokens += cost;
    }

    if end > start {
        chunks.push(make_chunk(path, content, &hash, start, end));
    }

    chunks
}

fn make_chunk(path: &str, content: &str, hash: &str, start: usize, end: usize) -> FileChunk {
    FileChunk {
        path: path.to_string(),
        byte_range: ByteRange::new(start, end),
        content_hash: hash.to_string(),
        content: content[start..end].to_string(),
        embedding: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_has_no_chunks() {
        assert!(chunk_text("a.py", "", 500).is_empty());
    }

    #[test]
    fn small_file_is_one_chunk() {
        let chunks = chunk_text("a.py", "x = 1\ny = 2\n", 500);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].byte_range, ByteRange::new(0, 12));
    }

    #[test]
    fn chunks_cover_file_without_gaps() {
        let content: String = (0..200).map(|i| format!("line number {i} of the file\n")).collect();
        let chunks = chunk_text("big.py", &content, 50);
        assert!(chunks.len() > 1);

        let mut cursor = 0;
        for chunk in &chunks {
            assert_eq!(chunk.byte_range.start, cursor);
            cursor = chunk.byte_range.end;
            assert!(chunk.content.ends_with('\n'));
        }
        assert_eq!(cursor, content.len());

        let rebuilt: String = chunks.iter().map(|c| c.content.as_str()).collect();
        assert_eq!(rebuilt, content);
    }

    #[test]
    fn overlong_line_gets_its_own_chunk() {
        let long = "z".repeat(400);
        let content = format!("a\n{long}\nb\n");
        let chunks = chunk_text("f.txt", &content, 10);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[1].content, format!("{long}\n"));
    }

    #[test]
    fn last_line_without_newline_is_kept() {
        let chunks = chunk_text("f.txt", "a\nb", 500);
        assert_eq!(chunks[0].content, "a\nb");
    }

    #[test]
    fn all_chunks_share_file_hash() {
        let content = "a\n".repeat(100);
        let chunks = chunk_text("f.txt", &content, 5);
        let hash = content_hash(content.as_bytes());
        assert!(chunks.iter().all(|c| c.content_hash == hash));
    }
}
