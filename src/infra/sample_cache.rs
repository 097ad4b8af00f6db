// ============================================================
// Layer 6 — Reconstructed Sample Cache
// ============================================================
// Snapshots a reconstructed dataset next to its source stream so
// the next run can skip re-reading the activation files.
//
//   {source}_fixed_{n}_{mode}.cache   ← fixed-length datasets
//   {source}_single.cache             ← single-word datasets
//
// Each cache file is one safetensors archive holding three tensors,
// however many samples it stores:
//
//   "values"  F32 [total]   every sample flattened, back to back
//   "ranks"   I64 [count]   number of axes of each sample
//   "dims"    I64 [Σranks]  the axes themselves, sample after sample
//
// so the archive header stays a few hundred bytes even for
// millions of samples of different shapes.
//
// Presence alone gates reuse: no content hash, no timestamp check.
// Delete the file to force a rebuild. A cache that cannot be
// decoded is reported as Malformed and callers rebuild it.

use ndarray::{ArrayD, IxDyn};
use safetensors::{
    tensor::{Dtype, TensorView},
    SafeTensors,
};
use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::domain::{activation::LengthMode, error::RecordError};

const VALUES: &str = "values";
const RANKS: &str  = "ranks";
const DIMS: &str   = "dims";

pub fn fixed_cache_path(source: &Path, n: usize, mode: LengthMode) -> PathBuf {
    with_suffix(source, &format!("_fixed_{n}_{mode}.cache"))
}

pub fn single_cache_path(source: &Path) -> PathBuf {
    with_suffix(source, "_single.cache")
}

fn with_suffix(source: &Path, suffix: &str) -> PathBuf {
    let mut name = source.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

fn malformed(reason: String) -> RecordError {
    RecordError::Malformed { offset: 0, reason }
}

/// Write `tensors` to `path`, replacing any previous cache.
pub fn save_tensors(path: &Path, tensors: &[ArrayD<f32>]) -> Result<(), RecordError> {
    let total: usize = tensors.iter().map(ArrayD::len).sum();
    let mut values: Vec<f32> = Vec::with_capacity(total);
    let mut ranks:  Vec<i64> = Vec::with_capacity(tensors.len());
    let mut dims:   Vec<i64> = Vec::new();

    for t in tensors {
        // iter() walks in logical row-major order whatever the memory layout
        values.extend(t.iter().copied());
        ranks.push(t.ndim() as i64);
        dims.extend(t.shape().iter().map(|&d| d as i64));
    }

    let values_bytes: &[u8] = bytemuck::cast_slice(&values);
    let ranks_bytes:  &[u8] = bytemuck::cast_slice(&ranks);
    let dims_bytes:   &[u8] = bytemuck::cast_slice(&dims);

    let views = [
        (VALUES, flat_view(Dtype::F32, values.len(), values_bytes)?),
        (RANKS,  flat_view(Dtype::I64, ranks.len(), ranks_bytes)?),
        (DIMS,   flat_view(Dtype::I64, dims.len(), dims_bytes)?),
    ];

    let bytes = safetensors::serialize(views, &None).map_err(|e| malformed(format!("{e:?}")))?;
    fs::write(path, bytes)?;
    tracing::debug!("Wrote {} cached samples to '{}'", tensors.len(), path.display());
    Ok(())
}

fn flat_view(dtype: Dtype, len: usize, bytes: &[u8]) -> Result<TensorView<'_>, RecordError> {
    TensorView::new(dtype, vec![len], bytes).map_err(|e| malformed(format!("{e:?}")))
}

/// Read every cached tensor back in sample order.
pub fn load_tensors(path: &Path) -> Result<Vec<ArrayD<f32>>, RecordError> {
    let bytes   = fs::read(path)?;
    let archive = SafeTensors::deserialize(&bytes).map_err(|e| malformed(format!("{e:?}")))?;

    let values = read_f32(&archive, VALUES)?;
    let ranks  = read_i64(&archive, RANKS)?;
    let dims   = read_i64(&archive, DIMS)?;

    let mut tensors  = Vec::with_capacity(ranks.len());
    let mut dim_at   = 0usize;
    let mut value_at = 0usize;

    for (i, &rank) in ranks.iter().enumerate() {
        let rank = usize::try_from(rank).map_err(|_| malformed(format!("sample {i}: negative rank")))?;
        let axes = dims
            .get(dim_at..dim_at + rank)
            .ok_or_else(|| malformed(format!("sample {i}: shape runs past the dims table")))?;
        let shape = axes
            .iter()
            .map(|&d| usize::try_from(d).map_err(|_| malformed(format!("sample {i}: negative axis"))))
            .collect::<Result<Vec<_>, _>>()?;
        let len: usize = shape.iter().product();

        let chunk = values
            .get(value_at..value_at + len)
            .ok_or_else(|| malformed(format!("sample {i}: values run past the data table")))?;
        tensors.push(
            ArrayD::from_shape_vec(IxDyn(&shape), chunk.to_vec())
                .map_err(|e| malformed(format!("sample {i}: {e}")))?,
        );

        dim_at   += rank;
        value_at += len;
    }

    if dim_at != dims.len() || value_at != values.len() {
        return Err(malformed(format!(
            "{} trailing dims and {} trailing values after the last sample",
            dims.len() - dim_at,
            values.len() - value_at
        )));
    }
    Ok(tensors)
}

fn read_f32(archive: &SafeTensors<'_>, name: &str) -> Result<Vec<f32>, RecordError> {
    let view = archive.tensor(name).map_err(|e| malformed(format!("{name}: {e:?}")))?;
    if view.dtype() != Dtype::F32 {
        return Err(malformed(format!("{name}: expected F32, found {:?}", view.dtype())));
    }
    Ok(view
        .data()
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

fn read_i64(archive: &SafeTensors<'_>, name: &str) -> Result<Vec<i64>, RecordError> {
    let view = archive.tensor(name).map_err(|e| malformed(format!("{name}: {e:?}")))?;
    if view.dtype() != Dtype::I64 {
        return Err(malformed(format!("{name}: expected I64, found {:?}", view.dtype())));
    }
    Ok(view
        .data()
        .chunks_exact(8)
        .map(|c| i64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]))
        .collect())
}
