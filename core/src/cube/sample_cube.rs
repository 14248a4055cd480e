use crate::cube::quality::QualityFlags;
use crate::prelude::{CleanError, CleanResult};
use crate::processing::abort::AbortSignal;
use ndarray::{Array2, ArrayView1, ArrayView2, Axis};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Cube extent: a time axis and a rectangular detector array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CubeDims {
    pub n_time: usize,
    pub n_rows: usize,
    pub n_cols: usize,
}

impl CubeDims {
    pub fn new(n_time: usize, n_rows: usize, n_cols: usize) -> Self {
        Self {
            n_time,
            n_rows,
            n_cols,
        }
    }

    pub fn n_detectors(&self) -> usize {
        self.n_rows * self.n_cols
    }

    pub fn len(&self) -> usize {
        self.n_time * self.n_detectors()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Detector index of a `(row, col)` position.
    pub fn detector_index(&self, row: usize, col: usize) -> usize {
        row * self.n_cols + col
    }
}

/// Detector samples plus a parallel quality bitmask.
///
/// Both buffers are stored detector-major (`[n_detectors, n_time]`) so every
/// detector's series is one contiguous row.
#[derive(Debug, Clone)]
pub struct SampleCube {
    dims: CubeDims,
    samples: Array2<f64>,
    flags: Array2<QualityFlags>,
}

/// Mutable access to one detector's series and flags.
pub struct DetectorMut<'a> {
    pub index: usize,
    pub samples: &'a mut [f64],
    pub flags: &'a mut [QualityFlags],
}

impl DetectorMut<'_> {
    pub fn is_excluded(&self) -> bool {
        self.flags
            .iter()
            .any(|f| f.contains(QualityFlags::BAD_DETECTOR))
    }

    pub fn mark_bad(&mut self) {
        for flag in self.flags.iter_mut() {
            flag.insert(QualityFlags::BAD_DETECTOR);
        }
    }

    pub fn valid_count(&self) -> usize {
        self.flags.iter().filter(|f| f.is_valid()).count()
    }
}

impl SampleCube {
    /// Builds a cube from detector-major buffers (`index = d * n_time + t`).
    pub fn new(dims: CubeDims, samples: Vec<f64>, flags: Vec<QualityFlags>) -> CleanResult<Self> {
        Self::check_lengths(dims, samples.len(), flags.len())?;
        let shape = (dims.n_detectors(), dims.n_time);
        let samples = Array2::from_shape_vec(shape, samples)
            .map_err(|err| CleanError::InvariantViolation(err.to_string()))?;
        let flags = Array2::from_shape_vec(shape, flags)
            .map_err(|err| CleanError::InvariantViolation(err.to_string()))?;
        Ok(Self {
            dims,
            samples,
            flags,
        })
    }

    /// Builds a cube from time-major buffers (`index = t * n_detectors + d`).
    pub fn from_time_major(
        dims: CubeDims,
        samples: Vec<f64>,
        flags: Vec<QualityFlags>,
    ) -> CleanResult<Self> {
        Self::check_lengths(dims, samples.len(), flags.len())?;
        let shape = (dims.n_time, dims.n_detectors());
        let samples = Array2::from_shape_vec(shape, samples)
            .map_err(|err| CleanError::InvariantViolation(err.to_string()))?
            .reversed_axes()
            .as_standard_layout()
            .into_owned();
        let flags = Array2::from_shape_vec(shape, flags)
            .map_err(|err| CleanError::InvariantViolation(err.to_string()))?
            .reversed_axes()
            .as_standard_layout()
            .into_owned();
        Ok(Self {
            dims,
            samples,
            flags,
        })
    }

    /// Detector-major samples with an all-clear bitmask.
    pub fn with_clear_flags(dims: CubeDims, samples: Vec<f64>) -> CleanResult<Self> {
        let flags = vec![QualityFlags::empty(); samples.len()];
        Self::new(dims, samples, flags)
    }

    fn check_lengths(dims: CubeDims, samples: usize, flags: usize) -> CleanResult<()> {
        if dims.is_empty() {
            return Err(CleanError::InvariantViolation(format!(
                "cube dimensions {}x{}x{} hold no samples",
                dims.n_time, dims.n_rows, dims.n_cols
            )));
        }
        if samples != dims.len() || flags != dims.len() {
            return Err(CleanError::InvariantViolation(format!(
                "expected {} samples and flags, got {} samples and {} flags",
                dims.len(),
                samples,
                flags
            )));
        }
        Ok(())
    }

    pub fn dims(&self) -> CubeDims {
        self.dims
    }

    pub fn n_time(&self) -> usize {
        self.dims.n_time
    }

    pub fn n_detectors(&self) -> usize {
        self.dims.n_detectors()
    }

    pub fn value(&self, time: usize, detector: usize) -> f64 {
        self.samples[[detector, time]]
    }

    pub fn flags_at(&self, time: usize, detector: usize) -> QualityFlags {
        self.flags[[detector, time]]
    }

    pub fn detector_samples(&self, detector: usize) -> ArrayView1<'_, f64> {
        self.samples.row(detector)
    }

    pub fn detector_flags(&self, detector: usize) -> ArrayView1<'_, QualityFlags> {
        self.flags.row(detector)
    }

    pub fn samples(&self) -> ArrayView2<'_, f64> {
        self.samples.view()
    }

    pub fn flags(&self) -> ArrayView2<'_, QualityFlags> {
        self.flags.view()
    }

    pub fn is_detector_excluded(&self, detector: usize) -> bool {
        self.flags
            .row(detector)
            .iter()
            .any(|f| f.contains(QualityFlags::BAD_DETECTOR))
    }

    pub fn excluded_detectors(&self) -> usize {
        (0..self.n_detectors())
            .filter(|&d| self.is_detector_excluded(d))
            .count()
    }

    /// Adds `flags` to one sample; existing bits are kept.
    pub fn flag_sample(&mut self, time: usize, detector: usize, flags: QualityFlags) {
        self.flags[[detector, time]].insert(flags);
    }

    pub fn into_parts(self) -> (CubeDims, Array2<f64>, Array2<QualityFlags>) {
        (self.dims, self.samples, self.flags)
    }

    /// Runs `op` on every detector in parallel and collects its results in
    /// detector order. Once `abort` is raised the remaining detectors are
    /// skipped and yield `None`.
    pub fn par_map_detectors<R, F>(&mut self, abort: &AbortSignal, op: F) -> CleanResult<Vec<Option<R>>>
    where
        R: Send,
        F: Fn(DetectorMut<'_>) -> R + Sync + Send,
    {
        self.samples
            .axis_iter_mut(Axis(0))
            .into_par_iter()
            .zip(self.flags.axis_iter_mut(Axis(0)).into_par_iter())
            .enumerate()
            .map(|(index, (mut samples, mut flags))| -> CleanResult<Option<R>> {
                if abort.is_raised() {
                    return Ok(None);
                }
                let samples = samples.as_slice_mut().ok_or_else(|| {
                    CleanError::InvariantViolation(format!("detector {} is not contiguous", index))
                })?;
                let flags = flags.as_slice_mut().ok_or_else(|| {
                    CleanError::InvariantViolation(format!("detector {} flags are not contiguous", index))
                })?;
                Ok(Some(op(DetectorMut {
                    index,
                    samples,
                    flags,
                })))
            })
            .collect()
    }
}
