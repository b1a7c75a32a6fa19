//! Segment scheduling
//!
//! The file is cut into fixed-length segments whose offsets advance by
//! `stride`. Every segment handed to the model has exactly `segment_length`
//! samples: short tail segments are padded with real context from both
//! sides where the file has it, zeros elsewhere. `center_trim` undoes the
//! padding on the model output.

use std::ops::Range;

use ndarray::{Array2, Array3, ArrayView2, ArrayView3, Axis, s};

use crate::error::{SeparationError, SeparationResult};

/// Position of one segment in the file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentWindow {
    /// Sequential index, 0-based
    pub index: usize,
    /// First sample in the file
    pub offset: usize,
    /// Observed samples, `min(segment_length, total - offset)`
    pub length: usize,
}

/// A segment ready for the model
#[derive(Debug, Clone)]
pub struct Segment {
    pub index: usize,
    pub offset: usize,
    pub length: usize,
    /// `[channels, segment_length]`
    pub padded: Array2<f32>,
}

impl Segment {
    /// Cut `window` out of `[channels, total]`, padded to `segment_length`
    pub fn extract(mix: ArrayView2<f32>, window: SegmentWindow, segment_length: usize) -> SeparationResult<Self> {
        Ok(Self {
            index: window.index,
            offset: window.offset,
            length: window.length,
            padded: pad_segment(mix, window, segment_length)?,
        })
    }

    pub fn window(&self) -> SegmentWindow {
        SegmentWindow {
            index: self.index,
            offset: self.offset,
            length: self.length,
        }
    }
}

/// Fixed-length, fixed-stride segmentation of one file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkScheduler {
    total: usize,
    segment_length: usize,
    stride: usize,
}

impl ChunkScheduler {
    pub fn new(total: usize, segment_length: usize, stride: usize) -> SeparationResult<Self> {
        if segment_length == 0 {
            return Err(SeparationError::InvalidConfig("segment length must be > 0".into()));
        }
        if stride == 0 {
            return Err(SeparationError::InvalidConfig("stride must be >= 1".into()));
        }
        Ok(Self { total, segment_length, stride })
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn segment_length(&self) -> usize {
        self.segment_length
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    /// Number of segments, `ceil(total / stride)`
    pub fn num_segments(&self) -> usize {
        self.total.div_ceil(self.stride)
    }

    /// Segment windows in offset order
    pub fn windows(&self) -> SegmentWindows {
        SegmentWindows {
            scheduler: *self,
            next_index: 0,
        }
    }
}

/// Iterator over a scheduler's windows
#[derive(Debug, Clone)]
pub struct SegmentWindows {
    scheduler: ChunkScheduler,
    next_index: usize,
}

impl Iterator for SegmentWindows {
    type Item = SegmentWindow;

    fn next(&mut self) -> Option<SegmentWindow> {
        let s = &self.scheduler;
        let offset = self.next_index.checked_mul(s.stride)?;
        if offset >= s.total {
            return None;
        }

        let window = SegmentWindow {
            index: self.next_index,
            offset,
            length: s.segment_length.min(s.total - offset),
        };
        self.next_index += 1;
        Some(window)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.scheduler.num_segments().saturating_sub(self.next_index);
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for SegmentWindows {}

/// Pad `window` of `[channels, total]` to `target` samples.
///
/// With `delta = target - length` the padded segment starts at
/// `offset - floor(delta / 2)`. Samples of that range that exist in the file
/// are copied, the rest stay zero.
pub fn pad_segment(mix: ArrayView2<f32>, window: SegmentWindow, target: usize) -> SeparationResult<Array2<f32>> {
    let (channels, total) = mix.dim();
    if window.length > target {
        return Err(SeparationError::ContractViolation(format!(
            "segment {} has {} samples, more than the padded length {}",
            window.index, window.length, target
        )));
    }
    if window.offset + window.length > total {
        return Err(SeparationError::ContractViolation(format!(
            "segment {} [{}, {}) exceeds the {} available samples",
            window.index,
            window.offset,
            window.offset + window.length,
            total
        )));
    }

    let delta = target - window.length;
    let start = window.offset as isize - (delta / 2) as isize;
    let end = start + target as isize;

    let src_start = start.max(0) as usize;
    let src_end = (end.min(total as isize)).max(0) as usize;

    let mut padded = Array2::<f32>::zeros((channels, target));
    if src_end > src_start {
        let dst_start = (src_start as isize - start) as usize;
        let count = src_end - src_start;
        padded
            .slice_mut(s![.., dst_start..dst_start + count])
            .assign(&mix.slice(s![.., src_start..src_end]));
    }

    Ok(padded)
}

/// Remove padding from `[stems, channels, padded]`, keeping the `length`
/// center samples: `floor(delta / 2)` are dropped in front and
/// `ceil(delta / 2)` at the back.
pub fn center_trim(output: ArrayView3<f32>, length: usize) -> SeparationResult<Array3<f32>> {
    let padded = output.len_of(Axis(2));
    if length > padded {
        return Err(SeparationError::ContractViolation(format!(
            "cannot trim {} samples down to {}",
            padded, length
        )));
    }

    let lead = (padded - length) / 2;
    Ok(output.slice(s![.., .., lead..lead + length]).to_owned())
}

/// Ranges of `[0, total)` that no segment of the schedule touches
pub fn coverage_gaps(total: usize, segment_length: usize, stride: usize) -> SeparationResult<Vec<Range<usize>>> {
    let scheduler = ChunkScheduler::new(total, segment_length, stride)?;

    let mut gaps = Vec::new();
    let mut covered_to = 0;
    for window in scheduler.windows() {
        if window.offset > covered_to {
            gaps.push(covered_to..window.offset);
        }
        covered_to = covered_to.max(window.offset + window.length);
    }
    if covered_to < total {
        gaps.push(covered_to..total);
    }

    Ok(gaps)
}
