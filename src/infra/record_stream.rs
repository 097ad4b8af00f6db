// ============================================================
// Layer 6 — Activation Record Streams
// ============================================================
// Append-only files holding one tensor per record. Each record is
//
//   [ u64 little-endian byte length ][ safetensors blob ]
//
// and the blob holds exactly one tensor named "tensor" (F32 for
// activations, BOOL for masks). There is no file header and no
// record count: a stream ends when the reader reaches end-of-file
// exactly on a record boundary. Ending anywhere else is reported
// as truncation, and a blob that fails to decode is reported as
// malformed, so damaged files never look like a short stream.
//
// Writers only ever open files in append mode; the extractor is
// responsible for deleting stale files first (see purge_prefix).

use ndarray::{ArrayD, IxDyn};
use safetensors::{
    tensor::{Dtype, TensorView},
    SafeTensors,
};
use std::{
    fs::{self, File, OpenOptions},
    io::{self, BufReader, BufWriter, Read, Write},
    path::{Path, PathBuf},
};

use crate::domain::error::RecordError;

const TENSOR_NAME: &str = "tensor";
const LEN_PREFIX: usize = 8;

// ─── Writer ───────────────────────────────────────────────────────────────────
pub struct RecordWriter {
    path:    PathBuf,
    out:     BufWriter<File>,
    records: usize,
}

impl RecordWriter {
    /// Open `path` for appending, creating it if needed.
    pub fn append_to(path: impl AsRef<Path>) -> Result<Self, RecordError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self { path, out: BufWriter::new(file), records: 0 })
    }

    /// Append one float tensor as a new record.
    pub fn write_f32(&mut self, tensor: &ArrayD<f32>) -> Result<(), RecordError> {
        // iter() walks in logical row-major order whatever the memory layout
        let values: Vec<f32> = tensor.iter().copied().collect();
        let bytes: &[u8] = bytemuck::cast_slice(&values);
        self.write_blob(Dtype::F32, tensor.shape().to_vec(), bytes)
    }

    /// Append one boolean mask as a new record.
    pub fn write_mask(&mut self, mask: &ArrayD<bool>) -> Result<(), RecordError> {
        let bytes: Vec<u8> = mask.iter().map(|&valid| valid as u8).collect();
        self.write_blob(Dtype::BOOL, mask.shape().to_vec(), &bytes)
    }

    fn write_blob(&mut self, dtype: Dtype, shape: Vec<usize>, bytes: &[u8]) -> Result<(), RecordError> {
        let malformed = |reason: String| RecordError::Malformed { offset: 0, reason };

        let view = TensorView::new(dtype, shape, bytes).map_err(|e| malformed(format!("{e:?}")))?;
        let blob = safetensors::serialize([(TENSOR_NAME, view)], &None)
            .map_err(|e| malformed(format!("{e:?}")))?;

        self.out.write_all(&(blob.len() as u64).to_le_bytes())?;
        self.out.write_all(&blob)?;
        self.records += 1;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flush buffered records and return how many this writer appended.
    pub fn finish(mut self) -> Result<usize, RecordError> {
        self.out.flush()?;
        Ok(self.records)
    }
}

// ─── Reader ───────────────────────────────────────────────────────────────────
pub struct RecordReader {
    path:     PathBuf,
    input:    BufReader<File>,
    offset:   u64,
    file_len: u64,
    failed:   bool,
}

impl RecordReader {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, RecordError> {
        let path     = path.as_ref().to_path_buf();
        let file     = File::open(&path)?;
        let file_len = file.metadata()?.len();
        Ok(Self { path, input: BufReader::new(file), offset: 0, file_len, failed: false })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the next record. `Ok(None)` means a clean end of stream.
    /// Masks come back as 0.0 / 1.0 floats.
    pub fn next_record(&mut self) -> Result<Option<ArrayD<f32>>, RecordError> {
        let mut len_buf = [0u8; LEN_PREFIX];
        let got = read_fully(&mut self.input, &mut len_buf)?;
        if got == 0 {
            return Ok(None);
        }
        if got < LEN_PREFIX {
            return Err(RecordError::Truncated { offset: self.offset, expected: LEN_PREFIX, found: got });
        }

        let len       = u64::from_le_bytes(len_buf);
        let remaining = self.file_len.saturating_sub(self.offset + LEN_PREFIX as u64);
        if len > remaining {
            return Err(RecordError::Truncated {
                offset:   self.offset,
                expected: len as usize,
                found:    remaining as usize,
            });
        }

        let mut blob = vec![0u8; len as usize];
        let got = read_fully(&mut self.input, &mut blob)?;
        if got < blob.len() {
            return Err(RecordError::Truncated { offset: self.offset, expected: blob.len(), found: got });
        }

        let tensor = decode_blob(&blob)
            .map_err(|reason| RecordError::Malformed { offset: self.offset, reason })?;
        self.offset += LEN_PREFIX as u64 + len;
        Ok(Some(tensor))
    }
}

impl Iterator for RecordReader {
    type Item = Result<ArrayD<f32>, RecordError>;

    /// Yields at most one error, then ends.
    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        let item = self.next_record().transpose();
        self.failed = matches!(item, Some(Err(_)));
        item
    }
}

/// Fill `buf` as far as the stream allows; returns the bytes read.
fn read_fully(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

fn decode_blob(blob: &[u8]) -> Result<ArrayD<f32>, String> {
    let tensors = SafeTensors::deserialize(blob).map_err(|e| format!("{e:?}"))?;
    let view    = tensors.tensor(TENSOR_NAME).map_err(|e| format!("{e:?}"))?;
    view_to_array(&view)
}

/// Decode a safetensors view into a float array (BOOL/U8 become 0.0 / 1.0).
fn view_to_array(view: &TensorView<'_>) -> Result<ArrayD<f32>, String> {
    let shape = view.shape().to_vec();

    let values: Vec<f32> = match view.dtype() {
        Dtype::F32 => view
            .data()
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect(),
        Dtype::BOOL | Dtype::U8 => view
            .data()
            .iter()
            .map(|&b| if b != 0 { 1.0 } else { 0.0 })
            .collect(),
        other => return Err(format!("unsupported dtype {other:?}")),
    };

    ArrayD::from_shape_vec(IxDyn(&shape), values).map_err(|e| e.to_string())
}

// ─── Housekeeping ─────────────────────────────────────────────────────────────
/// Delete every regular file in `dir` whose name starts with `prefix`.
/// Returns how many files were removed.
pub fn purge_prefix(dir: &Path, prefix: &str) -> Result<usize, RecordError> {
    if !dir.exists() {
        return Ok(0);
    }
    let mut removed = 0;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path  = entry.path();
        let matches = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with(prefix));
        if path.is_file() && matches {
            fs::remove_file(&path)?;
            tracing::debug!("Removed stale activation file '{}'", path.display());
            removed += 1;
        }
    }
    Ok(removed)
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array3, Array4};
    use tempfile::TempDir;

    fn batch(b: usize, s: usize, d: usize, base: f32) -> ArrayD<f32> {
        Array3::from_shape_fn((b, s, d), |(i, j, k)| base + (i * 100 + j * 10 + k) as f32).into_dyn()
    }

    #[test]
    fn test_appended_batches_read_back_in_order() {
        let dir  = TempDir::new().unwrap();
        let path = dir.path().join("stream");

        let batches = vec![batch(4, 7, 3, 0.0), batch(4, 5, 3, 1000.0), batch(2, 9, 3, 2000.0)];
        let mut writer = RecordWriter::append_to(&path).unwrap();
        for b in &batches {
            writer.write_f32(b).unwrap();
        }
        assert_eq!(writer.finish().unwrap(), 3);

        let read: Vec<ArrayD<f32>> = RecordReader::open(&path)
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(read, batches);
    }

    #[test]
    fn test_separate_writers_append() {
        let dir  = TempDir::new().unwrap();
        let path = dir.path().join("stream");

        for base in [0.0, 1.0] {
            let mut writer = RecordWriter::append_to(&path).unwrap();
            writer.write_f32(&batch(1, 2, 2, base)).unwrap();
            writer.finish().unwrap();
        }
        let count = RecordReader::open(&path).unwrap().count();
        assert_eq!(count, 2);
    }

    #[test]
    fn test_mask_decodes_to_floats() {
        let dir  = TempDir::new().unwrap();
        let path = dir.path().join("masks");

        let mask = Array4::from_shape_vec((2, 1, 1, 3), vec![true, true, false, true, false, false])
            .unwrap()
            .into_dyn();
        let mut writer = RecordWriter::append_to(&path).unwrap();
        writer.write_mask(&mask).unwrap();
        writer.finish().unwrap();

        let read = RecordReader::open(&path).unwrap().next_record().unwrap().unwrap();
        assert_eq!(read.shape(), &[2, 1, 1, 3]);
        assert_eq!(read.iter().copied().collect::<Vec<_>>(), vec![1.0, 1.0, 0.0, 1.0, 0.0, 0.0]);
    }

    #[test]
    fn test_empty_file_is_empty_stream() {
        let dir  = TempDir::new().unwrap();
        let path = dir.path().join("empty");
        File::create(&path).unwrap();
        assert!(RecordReader::open(&path).unwrap().next_record().unwrap().is_none());
    }

    #[test]
    fn test_truncated_payload_is_an_error_not_eof() {
        let dir  = TempDir::new().unwrap();
        let path = dir.path().join("stream");

        let mut writer = RecordWriter::append_to(&path).unwrap();
        writer.write_f32(&batch(2, 3, 4, 0.0)).unwrap();
        writer.write_f32(&batch(2, 3, 4, 1.0)).unwrap();
        writer.finish().unwrap();

        // Chop the tail off the second record
        let bytes = fs::read(&path).unwrap();
        fs::write(&path, &bytes[..bytes.len() - 5]).unwrap();

        let mut reader = RecordReader::open(&path).unwrap();
        assert!(reader.next_record().unwrap().is_some());
        let err = reader.next_record().unwrap_err();
        assert!(matches!(err, RecordError::Truncated { .. }));
    }

    #[test]
    fn test_iterator_stops_after_first_error() {
        let dir  = TempDir::new().unwrap();
        let path = dir.path().join("stream");

        let mut writer = RecordWriter::append_to(&path).unwrap();
        writer.write_f32(&batch(1, 2, 2, 0.0)).unwrap();
        writer.finish().unwrap();
        let mut bytes = fs::read(&path).unwrap();
        bytes.extend_from_slice(&[0x01, 0x02, 0x03]);
        fs::write(&path, bytes).unwrap();

        let items: Vec<_> = RecordReader::open(&path).unwrap().take(10).collect();
        assert_eq!(items.len(), 2);
        assert!(items[0].is_ok());
        assert!(matches!(items[1], Err(RecordError::Truncated { .. })));
    }

    #[test]
    fn test_garbage_payload_is_malformed() {
        let dir  = TempDir::new().unwrap();
        let path = dir.path().join("stream");

        let mut bytes = 16u64.to_le_bytes().to_vec();
        bytes.extend_from_slice(&[0xAB; 16]);
        fs::write(&path, bytes).unwrap();

        let err = RecordReader::open(&path).unwrap().next_record().unwrap_err();
        assert!(matches!(err, RecordError::Malformed { offset: 0, .. }));
    }

    #[test]
    fn test_purge_prefix_only_touches_matching_files() {
        let dir = TempDir::new().unwrap();
        for name in ["run_a_layer0_inputs_train", "run_a_masks_val", "run_b_masks_val"] {
            fs::write(dir.path().join(name), b"x").unwrap();
        }
        let removed = purge_prefix(dir.path(), "run_a").unwrap();
        assert_eq!(removed, 2);
        assert!(dir.path().join("run_b_masks_val").exists());
    }
}
