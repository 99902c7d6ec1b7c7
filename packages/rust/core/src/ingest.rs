//! Corpus ingestion: load `.txt` documents, split them into overlapping
//! chunks, and replace a collection in the chunk index.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use chrono::Utc;
use copilot_shared::{Chunk, CopilotError, Result, RetrievalConfig};
use copilot_storage::{CollectionMeta, Storage};
use tracing::{debug, info, instrument};

/// Split points tried in order, coarsest first. The empty separator splits
/// between characters.
const SEPARATORS: [&str; 5] = ["\n\n", "\n", ". ", " ", ""];

/// A source document read from the data directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    /// File name, used in citation tags.
    pub source: String,
    pub content: String,
}

/// Counts reported after an ingest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestReport {
    pub documents: usize,
    pub chunks: usize,
}

/// Read every `*.txt` file in `dir`, sorted by file name.
pub fn load_documents(dir: &Path) -> Result<Vec<Document>> {
    let entries = std::fs::read_dir(dir).map_err(|e| CopilotError::io(dir, e))?;

    let mut paths: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "txt"))
        .collect();
    paths.sort();

    let mut documents = Vec::with_capacity(paths.len());
    for path in paths {
        let content = std::fs::read_to_string(&path).map_err(|e| CopilotError::io(&path, e))?;
        let source = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        debug!(%source, chars = content.chars().count(), "loaded document");
        documents.push(Document { source, content });
    }

    if documents.is_empty() {
        return Err(CopilotError::validation(format!(
            "no .txt documents found in {}",
            dir.display()
        )));
    }
    Ok(documents)
}

/// Recursive character splitter: chunks hold at most `size` characters and
/// neighbouring chunks share up to `overlap` characters.
#[derive(Debug, Clone, Copy)]
pub struct Chunker {
    size: usize,
    overlap: usize,
}

impl Chunker {
    pub fn new(size: usize, overlap: usize) -> Result<Self> {
        if size == 0 || overlap >= size {
            return Err(CopilotError::validation(format!(
                "chunk overlap ({overlap}) must be smaller than a non-zero chunk size ({size})"
            )));
        }
        Ok(Self { size, overlap })
    }

    pub fn split(&self, text: &str) -> Vec<String> {
        self.split_with(text, &SEPARATORS)
    }

    fn split_with(&self, text: &str, separators: &[&str]) -> Vec<String> {
        let position = separators
            .iter()
            .position(|s| s.is_empty() || text.contains(s))
            .unwrap_or(separators.len().saturating_sub(1));
        let separator = separators.get(position).copied().unwrap_or("");
        let finer = separators.get(position + 1..).unwrap_or(&[]);

        let mut chunks = Vec::new();
        let mut pending: Vec<&str> = Vec::new();

        for piece in pieces(text, separator) {
            if char_len(piece) < self.size {
                pending.push(piece);
                continue;
            }
            if !pending.is_empty() {
                chunks.extend(self.merge(&pending));
                pending.clear();
            }
            if finer.is_empty() {
                chunks.push(piece.to_string());
            } else {
                chunks.extend(self.split_with(piece, finer));
            }
        }
        if !pending.is_empty() {
            chunks.extend(self.merge(&pending));
        }
        chunks
    }

    /// Greedily pack small pieces into chunks, carrying a tail of up to
    /// `overlap` characters into the next chunk.
    fn merge(&self, pieces: &[&str]) -> Vec<String> {
        let mut chunks = Vec::new();
        let mut window: VecDeque<&str> = VecDeque::new();
        let mut total = 0;

        for &piece in pieces {
            let len = char_len(piece);
            if total + len > self.size && !window.is_empty() {
                push_trimmed(&mut chunks, &window);
                while total > self.overlap || (total + len > self.size && total > 0) {
                    match window.pop_front() {
                        Some(first) => total -= char_len(first),
                        None => break,
                    }
                }
            }
            window.push_back(piece);
            total += len;
        }
        push_trimmed(&mut chunks, &window);
        chunks
    }
}

/// Split `text` on `separator`, keeping the separator at the start of the
/// following piece so no text is lost.
fn pieces<'a>(text: &'a str, separator: &str) -> Vec<&'a str> {
    if separator.is_empty() {
        return text
            .char_indices()
            .map(|(i, c)| &text[i..i + c.len_utf8()])
            .collect();
    }
    let mut out = Vec::new();
    let mut last = 0;
    for (i, _) in text.match_indices(separator) {
        if i > last {
            out.push(&text[last..i]);
        }
        last = i;
    }
    if last < text.len() {
        out.push(&text[last..]);
    }
    out
}

fn push_trimmed(chunks: &mut Vec<String>, window: &VecDeque<&str>) {
    let joined: String = window.iter().copied().collect();
    let trimmed = joined.trim();
    if !trimmed.is_empty() {
        chunks.push(trimmed.to_string());
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Chunk one document, numbering chunks from 1 within the source.
pub fn chunk_document(document: &Document, chunker: &Chunker) -> Vec<Chunk> {
    chunker
        .split(&document.content)
        .into_iter()
        .enumerate()
        .map(|(i, text)| Chunk::new(document.source.clone(), i as u32 + 1, text))
        .collect()
}

/// Load, chunk, and index the configured data directory, replacing the collection.
#[instrument(skip_all, fields(data_dir = %config.data_dir, collection = %config.collection))]
pub async fn ingest(config: &RetrievalConfig, storage: &Storage) -> Result<IngestReport> {
    let documents = load_documents(Path::new(&config.data_dir))?;
    let chunker = Chunker::new(config.chunk_size, config.chunk_overlap)?;

    let chunks: Vec<Chunk> = documents
        .iter()
        .flat_map(|doc| chunk_document(doc, &chunker))
        .collect();

    let meta = CollectionMeta {
        name: config.collection.clone(),
        embedding_model: config.embedding_model.clone(),
        chunk_size: config.chunk_size,
        chunk_overlap: config.chunk_overlap,
        document_count: documents.len(),
        updated_at: Utc::now(),
    };
    let written = storage.replace_chunks(&meta, &chunks).await?;

    info!(documents = documents.len(), chunks = written, "ingest complete");
    Ok(IngestReport {
        documents: documents.len(),
        chunks: written,
    })
}
