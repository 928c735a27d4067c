//! Embedding matrix and cosine nearest-neighbor index over it.
//!
//! Both are built once at fit time and never mutated afterwards; a retrain
//! regenerates them wholesale.

use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Row-major `f32` matrix, one row per FAQ entry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EmbeddingMatrix {
    rows: usize,
    cols: usize,
    data: Vec<f32>,
}

impl EmbeddingMatrix {
    /// Stack vectors into a matrix. All rows must share one dimension.
    pub fn from_rows(rows: Vec<Vec<f32>>) -> Result<Self, IndexError> {
        let cols = rows.first().map_or(0, Vec::len);
        let mut data = Vec::with_capacity(rows.len() * cols);
        for (i, row) in rows.iter().enumerate() {
            if row.len() != cols {
                return Err(IndexError::RaggedRow {
                    row: i,
                    expected: cols,
                    got: row.len(),
                });
            }
            data.extend_from_slice(row);
        }
        Ok(Self {
            rows: rows.len(),
            cols,
            data,
        })
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn row(&self, i: usize) -> Option<&[f32]> {
        (i < self.rows).then(|| &self.data[i * self.cols..(i + 1) * self.cols])
    }

    pub fn iter_rows(&self) -> impl Iterator<Item = &[f32]> {
        (0..self.rows).map(move |i| &self.data[i * self.cols..(i + 1) * self.cols])
    }

    /// Flat little-endian layout: `rows: u64`, `cols: u64`, then `rows * cols` f32 values.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(16 + self.data.len() * 4);
        out.extend_from_slice(&(self.rows as u64).to_le_bytes());
        out.extend_from_slice(&(self.cols as u64).to_le_bytes());
        for v in &self.data {
            out.extend_from_slice(&v.to_le_bytes());
        }
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, IndexError> {
        let header = |at: usize| -> Result<usize, IndexError> {
            let raw: [u8; 8] = bytes
                .get(at..at + 8)
                .and_then(|b| b.try_into().ok())
                .ok_or(IndexError::Truncated)?;
            usize::try_from(u64::from_le_bytes(raw)).map_err(|_| IndexError::Truncated)
        };
        let rows = header(0)?;
        let cols = header(8)?;
        let body = &bytes[16..];
        let expected = rows
            .checked_mul(cols)
            .and_then(|n| n.checked_mul(4))
            .ok_or(IndexError::Truncated)?;
        if body.len() != expected {
            return Err(IndexError::Truncated);
        }
        let data = body
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        Ok(Self { rows, cols, data })
    }

    pub fn save(&self, path: &Path) -> Result<(), IndexError> {
        let mut f =
            std::fs::File::create(path).map_err(|e| IndexError::Io(path.to_path_buf(), e))?;
        f.write_all(&self.to_bytes())
            .map_err(|e| IndexError::Io(path.to_path_buf(), e))
    }

    pub fn load(path: &Path) -> Result<Self, IndexError> {
        let bytes = std::fs::read(path).map_err(|e| IndexError::Io(path.to_path_buf(), e))?;
        Self::from_bytes(&bytes)
    }
}

/// Brute-force nearest-neighbor index with cosine distance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NeighborIndex {
    metric: String,
    n_neighbors: usize,
    dim: usize,
    /// Unit-length copies of the indexed rows (zero rows stay zero).
    vectors: Vec<Vec<f32>>,
}

impl NeighborIndex {
    pub const METRIC: &'static str = "cosine";

    /// Index every row of `matrix`. `n_neighbors` is the default k for queries.
    pub fn build(matrix: &EmbeddingMatrix, n_neighbors: usize) -> Self {
        Self {
            metric: Self::METRIC.to_string(),
            n_neighbors,
            dim: matrix.cols(),
            vectors: matrix.iter_rows().map(normalize).collect(),
        }
    }

    /// The `k` closest rows as `(row, cosine distance)`, ascending by distance.
    /// `k` is clamped to the number of indexed rows; `None` uses the default.
    pub fn kneighbors(
        &self,
        query: &[f32],
        k: Option<usize>,
    ) -> Result<Vec<(usize, f32)>, IndexError> {
        if self.vectors.is_empty() {
            return Ok(Vec::new());
        }
        if query.len() != self.dim {
            return Err(IndexError::DimensionMismatch {
                expected: self.dim,
                got: query.len(),
            });
        }
        let k = k.unwrap_or(self.n_neighbors).min(self.vectors.len());
        let q = normalize(query);
        let mut scored: Vec<(usize, f32)> = self
            .vectors
            .iter()
            .enumerate()
            .map(|(i, v)| (i, 1.0 - dot(&q, v)))
            .collect();
        // Stable, so equal distances keep row order.
        scored.sort_by(|a, b| a.1.total_cmp(&b.1));
        scored.truncate(k);
        Ok(scored)
    }

    pub fn n_neighbors(&self) -> usize {
        self.n_neighbors
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Number of indexed rows.
    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    pub fn save(&self, path: &Path) -> Result<(), IndexError> {
        let json = serde_json::to_vec(self)?;
        std::fs::write(path, json).map_err(|e| IndexError::Io(path.to_path_buf(), e))
    }

    pub fn load(path: &Path) -> Result<Self, IndexError> {
        let bytes = std::fs::read(path).map_err(|e| IndexError::Io(path.to_path_buf(), e))?;
        let index: Self = serde_json::from_slice(&bytes)?;
        if index.metric != Self::METRIC {
            return Err(IndexError::UnsupportedMetric(index.metric));
        }
        Ok(index)
    }
}

fn normalize(v: &[f32]) -> Vec<f32> {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm <= 0.0 {
        return v.to_vec();
    }
    v.iter().map(|x| x / norm).collect()
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("row {row} has dimension {got}, expected {expected}")]
    RaggedRow { row: usize, expected: usize, got: usize },
    #[error("query has dimension {got}, index has {expected}")]
    DimensionMismatch { expected: usize, got: usize },
    #[error("embedding matrix file is truncated or malformed")]
    Truncated,
    #[error("unsupported index metric: {0}")]
    UnsupportedMetric(String),
    #[error("index serialization: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("i/o error for {0}: {1}")]
    Io(PathBuf, #[source] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matrix(rows: &[&[f32]]) -> EmbeddingMatrix {
        EmbeddingMatrix::from_rows(rows.iter().map(|r| r.to_vec()).collect()).unwrap()
    }

    #[test]
    fn kneighbors_sorted_ascending_and_clamped() {
        let m = matrix(&[&[0.0, 1.0], &[1.0, 0.0], &[1.0, 1.0]]);
        let idx = NeighborIndex::build(&m, 2);
        let res = idx.kneighbors(&[2.0, 0.1], Some(10)).unwrap();
        assert_eq!(res.len(), 3);
        assert_eq!(res[0].0, 1);
        assert_eq!(res[1].0, 2);
        assert_eq!(res[2].0, 0);
        assert!(res.windows(2).all(|w| w[0].1 <= w[1].1));
        assert!(res[0].1.abs() < 0.01);
    }

    #[test]
    fn default_k_comes_from_build() {
        let m = matrix(&[&[1.0, 0.0], &[0.0, 1.0], &[1.0, 1.0]]);
        let idx = NeighborIndex::build(&m, 2);
        assert_eq!(idx.kneighbors(&[1.0, 0.0], None).unwrap().len(), 2);
    }

    #[test]
    fn opposite_vectors_have_distance_two() {
        let m = matrix(&[&[1.0, 0.0]]);
        let idx = NeighborIndex::build(&m, 1);
        let res = idx.kneighbors(&[-3.0, 0.0], Some(1)).unwrap();
        assert!((res[0].1 - 2.0).abs() < 1e-6);
    }

    #[test]
    fn dimension_mismatch_is_an_error() {
        let m = matrix(&[&[1.0, 0.0]]);
        let idx = NeighborIndex::build(&m, 1);
        assert!(matches!(
            idx.kneighbors(&[1.0, 0.0, 0.0], Some(1)),
            Err(IndexError::DimensionMismatch { expected: 2, got: 3 })
        ));
    }

    #[test]
    fn ragged_rows_rejected() {
        let err = EmbeddingMatrix::from_rows(vec![vec![1.0, 2.0], vec![1.0]]).unwrap_err();
        assert!(matches!(err, IndexError::RaggedRow { row: 1, .. }));
    }

    #[test]
    fn matrix_bytes_reject_truncation() {
        let m = matrix(&[&[1.0, 2.0, 3.0], &[4.0, 5.0, 6.0]]);
        assert_eq!(m.row(1), Some(&[4.0, 5.0, 6.0][..]));
        assert_eq!(m.row(2), None);
        let bytes = m.to_bytes();
        assert_eq!(EmbeddingMatrix::from_bytes(&bytes).unwrap(), m);
        assert!(matches!(
            EmbeddingMatrix::from_bytes(&bytes[..bytes.len() - 1]),
            Err(IndexError::Truncated)
        ));
        assert!(matches!(EmbeddingMatrix::from_bytes(&bytes[..4]), Err(IndexError::Truncated)));
    }

    #[test]
    fn missing_matrix_file_keeps_io_cause() {
        let dir = tempfile::tempdir().unwrap();
        let err = EmbeddingMatrix::load(&dir.path().join("absent.bin")).unwrap_err();
        assert!(matches!(err, IndexError::Io(..)));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn index_file_keeps_configuration() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nn.json");
        let idx = NeighborIndex::build(&matrix(&[&[1.0, 0.0], &[0.5, 0.5]]), 4);
        idx.save(&path).unwrap();
        let back = NeighborIndex::load(&path).unwrap();
        assert_eq!(back, idx);
        assert_eq!(back.n_neighbors(), 4);
        assert_eq!(back.len(), 2);
    }
}
