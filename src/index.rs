//! Flat vector index over unit-norm embeddings.
//!
//! An ordered, append-only sequence of fixed-dimension vectors with
//! brute-force inner-product search. Vectors are unit-normalized on
//! insertion and queries are normalized before scanning, so the returned
//! score is cosine similarity (higher is better) regardless of metric.
//!
//! The dimension is fixed at first insertion; later insertions must match it
//! or are rejected. There is no deletion or reordering — row position is the
//! vector id, and the id→record mapping in [`crate::store`] relies on it.

use anyhow::{bail, Context, Result};
use std::io::{Read, Write};
use std::path::Path;

use crate::embedding::{bytes_to_vec, normalize, vec_to_bytes};

/// Magic bytes leading the persisted index file.
const INDEX_MAGIC: &[u8; 4] = b"SFVI";
/// Bumped on any incompatible change to the file layout.
const INDEX_VERSION: u32 = 1;

/// Append-only flat index of unit-norm vectors.
#[derive(Debug, Default)]
pub struct VectorIndex {
    dim: Option<usize>,
    /// Row-major vector storage; row `i` starts at `i * dim`.
    data: Vec<f32>,
}

impl VectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of vectors stored.
    pub fn len(&self) -> usize {
        match self.dim {
            Some(d) if d > 0 => self.data.len() / d,
            _ => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fixed dimension, `None` until the first insertion.
    pub fn dim(&self) -> Option<usize> {
        self.dim
    }

    /// Append a vector and return its row id.
    ///
    /// The vector is unit-normalized before storage. The first insertion
    /// fixes the index dimension; a later mismatch is a configuration error
    /// and fails fast.
    pub fn add(&mut self, vector: &[f32]) -> Result<usize> {
        if vector.is_empty() {
            bail!("cannot add an empty vector");
        }
        match self.dim {
            None => self.dim = Some(vector.len()),
            Some(d) if d != vector.len() => bail!(
                "embedding dimension mismatch: index has {}, got {}",
                d,
                vector.len()
            ),
            Some(_) => {}
        }

        let id = self.len();
        self.data.extend(normalize(vector));
        Ok(id)
    }

    /// Brute-force scan: top `k` rows by inner product with the normalized
    /// query, sorted by descending score. Returns fewer than `k` entries when
    /// the index is small, and nothing when the query dimension mismatches.
    pub fn search(&self, query: &[f32], k: usize) -> Vec<(usize, f32)> {
        let dim = match self.dim {
            Some(d) if d == query.len() => d,
            _ => return Vec::new(),
        };
        if k == 0 || self.is_empty() {
            return Vec::new();
        }

        let query = normalize(query);
        let mut scored: Vec<(usize, f32)> = self
            .data
            .chunks_exact(dim)
            .enumerate()
            .map(|(id, row)| {
                let dot: f32 = row.iter().zip(query.iter()).map(|(x, y)| x * y).sum();
                (id, dot)
            })
            .collect();

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        scored
    }

    /// Write the index to disk: magic, version, dimension, row count, then
    /// little-endian f32 rows.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut file = std::fs::File::create(path)
            .with_context(|| format!("Failed to create index file: {}", path.display()))?;

        file.write_all(INDEX_MAGIC)?;
        file.write_all(&INDEX_VERSION.to_le_bytes())?;
        file.write_all(&(self.dim.unwrap_or(0) as u32).to_le_bytes())?;
        file.write_all(&(self.len() as u64).to_le_bytes())?;
        file.write_all(&vec_to_bytes(&self.data))?;

        Ok(())
    }

    /// Load an index written by [`VectorIndex::save`].
    pub fn load(path: &Path) -> Result<Self> {
        let mut file = std::fs::File::open(path)
            .with_context(|| format!("Failed to open index file: {}", path.display()))?;

        let mut magic = [0u8; 4];
        file.read_exact(&mut magic)?;
        if &magic != INDEX_MAGIC {
            bail!("{} is not a vector index file", path.display());
        }

        let mut u32_buf = [0u8; 4];
        file.read_exact(&mut u32_buf)?;
        let version = u32::from_le_bytes(u32_buf);
        if version != INDEX_VERSION {
            bail!(
                "unsupported index file version {} (expected {})",
                version,
                INDEX_VERSION
            );
        }

        file.read_exact(&mut u32_buf)?;
        let dim = u32::from_le_bytes(u32_buf) as usize;

        let mut u64_buf = [0u8; 8];
        file.read_exact(&mut u64_buf)?;
        let count = u64::from_le_bytes(u64_buf) as usize;

        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)?;
        let data = bytes_to_vec(&bytes);

        if data.len() != dim * count {
            bail!(
                "index file {} is truncated: expected {} values, found {}",
                path.display(),
                dim * count,
                data.len()
            );
        }

        Ok(Self {
            dim: if dim > 0 { Some(dim) } else { None },
            data,
        })
    }
}
