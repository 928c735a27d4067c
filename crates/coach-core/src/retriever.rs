//! FAQ retriever: fit → save → load lifecycle and top-k lookup.
//!
//! A fitted retriever holds the corpus, its embedding matrix and a neighbor index
//! built over that matrix. The three are created together, persisted together as a
//! four-file bundle (plus the embedder's name), and are read-only afterwards.

use std::path::{Path, PathBuf};

use crate::embed::{EmbedError, Embedder};
use crate::faq::{FaqCorpus, FaqError, FaqTable, SchemaError};
use crate::index::{EmbeddingMatrix, IndexError, NeighborIndex};

pub const EMBEDDINGS_FILE: &str = "faq_embeddings.bin";
pub const INDEX_FILE: &str = "nn_index.json";
pub const CORPUS_FILE: &str = "faq_data.csv";
pub const EMBEDDER_NAME_FILE: &str = "embedder_name.txt";

/// Every file a bundle must contain, in load order.
pub const BUNDLE_FILES: [&str; 4] = [EMBEDDINGS_FILE, INDEX_FILE, CORPUS_FILE, EMBEDDER_NAME_FILE];

pub const DEFAULT_NEIGHBOR_COUNT: usize = 4;

/// One ranked match: `similarity = 1 - cosine distance`, not clamped.
#[derive(Debug, Clone, PartialEq)]
pub struct Retrieved {
    pub index: usize,
    pub similarity: f32,
    pub question: String,
    pub answer: String,
}

#[derive(Debug, Clone)]
struct Fitted {
    corpus: FaqCorpus,
    embeddings: EmbeddingMatrix,
    index: NeighborIndex,
}

/// Semantic lookup over a fixed FAQ corpus.
#[derive(Debug)]
pub struct FaqRetriever<E> {
    embedder: E,
    state: Option<Fitted>,
}

impl<E: Embedder> FaqRetriever<E> {
    /// An unfitted retriever. Call [`fit`](Self::fit) or use [`load`](Self::load).
    pub fn new(embedder: E) -> Self {
        Self { embedder, state: None }
    }

    pub fn embedder(&self) -> &E {
        &self.embedder
    }

    pub fn is_fitted(&self) -> bool {
        self.state.is_some()
    }

    pub fn corpus(&self) -> Option<&FaqCorpus> {
        self.state.as_ref().map(|s| &s.corpus)
    }

    /// Embed every question in `table` and build the index. Replaces any previous
    /// state, but only once every step has succeeded.
    pub async fn fit(
        &mut self,
        table: &FaqTable,
        question_field: &str,
        answer_field: &str,
        neighbor_count: usize,
    ) -> Result<(), RetrieverError> {
        if neighbor_count == 0 {
            return Err(RetrieverError::InvalidNeighborCount);
        }
        let corpus = FaqCorpus::from_table(table, question_field, answer_field).inspect_err(|e| {
            tracing::error!(error = %e, "FAQ schema check failed");
        })?;
        self.fit_corpus(corpus, neighbor_count).await
    }

    /// Like [`fit`](Self::fit) for a corpus that is already built.
    pub async fn fit_corpus(
        &mut self,
        corpus: FaqCorpus,
        neighbor_count: usize,
    ) -> Result<(), RetrieverError> {
        if neighbor_count == 0 {
            return Err(RetrieverError::InvalidNeighborCount);
        }
        tracing::info!(
            entries = corpus.len(),
            embedder = self.embedder.name(),
            "encoding FAQ questions"
        );
        let vectors = self.embedder.embed_batch(&corpus.questions()).await.inspect_err(|e| {
            tracing::error!(error = %e, "embedding FAQ questions failed");
        })?;
        if vectors.len() != corpus.len() {
            return Err(EmbedError::CountMismatch {
                expected: corpus.len(),
                got: vectors.len(),
            }
            .into());
        }
        let embeddings = EmbeddingMatrix::from_rows(vectors)?;
        let index = NeighborIndex::build(&embeddings, neighbor_count);
        tracing::info!(rows = index.len(), dim = index.dim(), "built neighbor index");

        self.state = Some(Fitted {
            corpus,
            embeddings,
            index,
        });
        Ok(())
    }

    /// The `k` best matches for `query`, highest similarity first. Returns
    /// `min(k, corpus size)` results.
    pub async fn retrieve(&self, query: &str, k: usize) -> Result<Vec<Retrieved>, RetrieverError> {
        let state = self.state.as_ref().ok_or_else(|| {
            tracing::error!("retrieve called before fit or load");
            RetrieverError::Unfitted
        })?;
        if k == 0 {
            return Err(RetrieverError::InvalidNeighborCount);
        }
        if state.index.is_empty() {
            return Ok(Vec::new());
        }
        let q = self.embedder.embed(query).await.inspect_err(|e| {
            tracing::error!(error = %e, "embedding query failed");
        })?;
        let neighbors = state.index.kneighbors(&q, Some(k)).inspect_err(|e| {
            tracing::error!(error = %e, "neighbor lookup failed");
        })?;

        neighbors
            .into_iter()
            .map(|(row, distance)| -> Result<Retrieved, RetrieverError> {
                let entry = state.corpus.get(row).ok_or(RetrieverError::CorruptBundle {
                    corpus: state.corpus.len(),
                    embeddings: state.embeddings.rows(),
                    index: state.index.len(),
                })?;
                Ok(Retrieved {
                    index: row,
                    similarity: 1.0 - distance,
                    question: entry.question.clone(),
                    answer: entry.answer.clone(),
                })
            })
            .collect()
    }

    /// Write the four bundle files into `dir`, creating it if needed.
    /// Files are written in place; use [`publish`](Self::publish) for a bundle
    /// that is being served.
    pub fn save(&self, dir: &Path) -> Result<(), RetrieverError> {
        let state = self.state.as_ref().ok_or(RetrieverError::Unfitted)?;
        self.write_bundle(state, dir).inspect_err(|e| {
            tracing::error!(dir = %dir.display(), error = %e, "saving bundle failed");
        })?;
        tracing::info!(
            dir = %dir.display(),
            entries = state.corpus.len(),
            "saved FAQ retriever bundle"
        );
        Ok(())
    }

    fn write_bundle(&self, state: &Fitted, dir: &Path) -> Result<(), RetrieverError> {
        std::fs::create_dir_all(dir).map_err(|e| RetrieverError::Io(dir.to_path_buf(), e))?;
        state.embeddings.save(&dir.join(EMBEDDINGS_FILE))?;
        state.index.save(&dir.join(INDEX_FILE))?;
        state.corpus.write_csv(&dir.join(CORPUS_FILE))?;
        let name_path = dir.join(EMBEDDER_NAME_FILE);
        std::fs::write(&name_path, self.embedder.name())
            .map_err(|e| RetrieverError::Io(name_path, e))
    }

    /// Write the bundle as a new version next to `dir`, then atomically repoint
    /// `dir` (a symlink) at it. A concurrent [`load`](Self::load) reads either the
    /// previous or the new complete bundle. The previous version is kept for
    /// readers still using it; older versions are pruned.
    ///
    /// A plain directory at `dir`, as written by [`save`](Self::save), is first moved
    /// aside as a version, so that one publish is not atomic. Publishes to the same
    /// `dir` must not run concurrently with each other.
    pub fn publish(&self, dir: &Path) -> Result<(), RetrieverError> {
        let state = self.state.as_ref().ok_or(RetrieverError::Unfitted)?;
        let (parent, name) = split_bundle_path(dir);
        std::fs::create_dir_all(&parent).map_err(|e| RetrieverError::Io(parent.clone(), e))?;

        let staging_prefix = format!(".{name}.staging-");
        let staging = tempfile::Builder::new()
            .prefix(&staging_prefix)
            .tempdir_in(&parent)
            .map_err(|e| RetrieverError::Io(parent.clone(), e))?;
        self.write_bundle(state, staging.path()).inspect_err(|e| {
            tracing::error!(dir = %dir.display(), error = %e, "writing staged bundle failed");
        })?;

        let staged_name = staging
            .path()
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let suffix = staged_name.trim_start_matches(staging_prefix.as_str()).to_string();
        let version = PathBuf::from(format!(".{name}.v-{suffix}"));
        std::fs::rename(staging.path(), parent.join(&version))
            .map_err(|e| RetrieverError::Io(parent.join(&version), e))?;

        let previous = point_bundle_at(dir, &parent, &name, &version, &suffix)?;
        prune_versions(&parent, &name, &version, previous.as_deref());
        tracing::info!(
            dir = %dir.display(),
            version = %version.display(),
            "published FAQ retriever bundle"
        );
        Ok(())
    }

    /// Read a bundle from `dir`. The embedder is rebuilt from its stored name by
    /// `resolve`, so the same provider must be available at reload time.
    pub fn load<F>(dir: &Path, resolve: F) -> Result<Self, RetrieverError>
    where
        F: FnOnce(&str) -> Result<E, EmbedError>,
    {
        tracing::info!(dir = %dir.display(), "loading FAQ retriever bundle");
        let (state, name) = read_bundle_pinned(dir)?;

        let embedder = resolve(&name).inspect_err(|e| {
            tracing::error!(embedder = %name, error = %e, "could not resolve embedder");
        })?;
        tracing::info!(
            embedder = %name,
            entries = state.corpus.len(),
            "loaded FAQ retriever bundle"
        );
        Ok(Self {
            embedder,
            state: Some(state),
        })
    }
}

const LOAD_ATTEMPTS: usize = 5;

/// Read the bundle `dir` currently resolves to. If a publish repoints `dir` while
/// the files are being read, start over from the new version.
fn read_bundle_pinned(dir: &Path) -> Result<(Fitted, String), RetrieverError> {
    let mut attempt = 1;
    loop {
        let resolved = std::fs::canonicalize(dir).unwrap_or_else(|_| dir.to_path_buf());
        match read_bundle(dir, &resolved) {
            Ok(bundle) => return Ok(bundle),
            Err(e) => {
                let republished = std::fs::canonicalize(dir).is_ok_and(|now| now != resolved);
                if republished && attempt < LOAD_ATTEMPTS {
                    tracing::warn!(attempt, error = %e, "bundle republished during load, retrying");
                    attempt += 1;
                    continue;
                }
                tracing::error!(dir = %dir.display(), error = %e, "loading bundle failed");
                return Err(e);
            }
        }
    }
}

/// Read every artifact from `resolved`; missing files are reported under `dir`.
fn read_bundle(dir: &Path, resolved: &Path) -> Result<(Fitted, String), RetrieverError> {
    for file in BUNDLE_FILES {
        if !resolved.join(file).is_file() {
            return Err(RetrieverError::ArtifactMissing(dir.join(file)));
        }
    }

    let embeddings = EmbeddingMatrix::load(&resolved.join(EMBEDDINGS_FILE))?;
    let index = NeighborIndex::load(&resolved.join(INDEX_FILE))?;
    let corpus = FaqCorpus::read_csv(&resolved.join(CORPUS_FILE))?;
    let name_path = resolved.join(EMBEDDER_NAME_FILE);
    let name = std::fs::read_to_string(&name_path).map_err(|e| RetrieverError::Io(name_path, e))?;

    if corpus.len() != embeddings.rows() || index.len() != embeddings.rows() {
        return Err(RetrieverError::CorruptBundle {
            corpus: corpus.len(),
            embeddings: embeddings.rows(),
            index: index.len(),
        });
    }
    Ok((
        Fitted {
            corpus,
            embeddings,
            index,
        },
        name.trim().to_string(),
    ))
}

fn split_bundle_path(dir: &Path) -> (PathBuf, String) {
    let parent = match dir.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let name = dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "bundle".to_string());
    (parent, name)
}

/// Swap the `dir` symlink over to `version` (a name inside `parent`). Returns the
/// version `dir` pointed at before, if any.
#[cfg(unix)]
fn point_bundle_at(
    dir: &Path,
    parent: &Path,
    name: &str,
    version: &Path,
    suffix: &str,
) -> Result<Option<PathBuf>, RetrieverError> {
    let mut previous = std::fs::read_link(dir).ok();
    let mut legacy = None;
    if std::fs::symlink_metadata(dir).is_ok_and(|m| m.file_type().is_dir()) {
        let aside = PathBuf::from(format!(".{name}.v-saved-{suffix}"));
        std::fs::rename(dir, parent.join(&aside))
            .map_err(|e| RetrieverError::Io(dir.to_path_buf(), e))?;
        previous = Some(aside.clone());
        legacy = Some(aside);
    }

    let link = parent.join(format!(".{name}.link-{suffix}"));
    std::os::unix::fs::symlink(version, &link).map_err(|e| RetrieverError::Io(link.clone(), e))?;
    if let Err(swap) = std::fs::rename(&link, dir) {
        tracing::error!(dir = %dir.display(), error = %swap, "failed to swap in new bundle");
        if let Err(e) = std::fs::remove_file(&link) {
            tracing::warn!(path = %link.display(), error = %e, "could not remove bundle link");
        }
        if let Some(aside) = legacy {
            if let Err(restore) = std::fs::rename(parent.join(&aside), dir) {
                tracing::error!(dir = %dir.display(), error = %restore, "restoring bundle failed");
                return Err(RetrieverError::RestoreFailed {
                    dir: dir.to_path_buf(),
                    swap,
                    restore,
                });
            }
        }
        return Err(RetrieverError::Io(dir.to_path_buf(), swap));
    }
    Ok(previous)
}

/// Without symlinks the swap is two renames, so readers may briefly find no bundle.
#[cfg(not(unix))]
fn point_bundle_at(
    dir: &Path,
    parent: &Path,
    name: &str,
    version: &Path,
    suffix: &str,
) -> Result<Option<PathBuf>, RetrieverError> {
    let aside = PathBuf::from(format!(".{name}.v-saved-{suffix}"));
    let had_previous = dir.exists();
    if had_previous {
        std::fs::rename(dir, parent.join(&aside))
            .map_err(|e| RetrieverError::Io(dir.to_path_buf(), e))?;
    }
    if let Err(swap) = std::fs::rename(parent.join(version), dir) {
        tracing::error!(dir = %dir.display(), error = %swap, "failed to swap in new bundle");
        if had_previous {
            if let Err(restore) = std::fs::rename(parent.join(&aside), dir) {
                tracing::error!(dir = %dir.display(), error = %restore, "restoring bundle failed");
                return Err(RetrieverError::RestoreFailed {
                    dir: dir.to_path_buf(),
                    swap,
                    restore,
                });
            }
        }
        return Err(RetrieverError::Io(dir.to_path_buf(), swap));
    }
    Ok(had_previous.then_some(aside))
}

/// Remove versions of `name` other than `current` and `previous`. Failures only warn;
/// the new bundle is already live.
fn prune_versions(parent: &Path, name: &str, current: &Path, previous: Option<&Path>) {
    let prefix = format!(".{name}.v-");
    let entries = match std::fs::read_dir(parent) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!(dir = %parent.display(), error = %e, "could not list bundle versions");
            return;
        }
    };
    for entry in entries.flatten() {
        let file_name = PathBuf::from(entry.file_name());
        let is_version = file_name.to_string_lossy().starts_with(&prefix);
        let keep = file_name == current || previous.is_some_and(|p| p == file_name);
        if !is_version || keep {
            continue;
        }
        if let Err(e) = std::fs::remove_dir_all(entry.path()) {
            let path = entry.path();
            tracing::warn!(path = %path.display(), error = %e, "could not prune bundle version");
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RetrieverError {
    #[error("retriever is not fitted; call fit() or load() first")]
    Unfitted,
    #[error("bundle artifact missing: {0}")]
    ArtifactMissing(PathBuf),
    #[error("bundle is corrupt: corpus has {corpus} rows, embeddings {embeddings}, index {index}")]
    CorruptBundle {
        corpus: usize,
        embeddings: usize,
        index: usize,
    },
    #[error("neighbor count must be at least 1")]
    InvalidNeighborCount,
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error("FAQ data: {0}")]
    Faq(#[from] FaqError),
    #[error("embedding: {0}")]
    Embed(#[from] EmbedError),
    #[error("index: {0}")]
    Index(#[from] IndexError),
    #[error("i/o error for {0}: {1}")]
    Io(PathBuf, #[source] std::io::Error),
    #[error("failed to swap bundle into {dir} ({swap}); restoring the previous bundle also failed")]
    RestoreFailed {
        dir: PathBuf,
        swap: std::io::Error,
        #[source]
        restore: std::io::Error,
    },
}
