//! Weighted overlap-add stitching
//!
//! One streaming accumulator per file: segment outputs are added in place,
//! weighted by the triangular cross-fade, and the summed weight is divided
//! out once at the end.

use std::sync::Arc;

use ndarray::{Array3, ArrayView3, Axis, s};

use crate::error::{SeparationError, SeparationResult};

/// Running weighted sum of segment outputs, `[stems, channels, total]`
#[derive(Debug, Clone)]
pub struct OutputAccumulator {
    data: Array3<f32>,
    weight_sum: Vec<f32>,
    segment_weight: Arc<[f32]>,
}

fn try_zeroed(len: usize, what: &'static str) -> SeparationResult<Vec<f32>> {
    let exhausted = || SeparationError::ResourceExhaustion {
        what,
        bytes: len.saturating_mul(std::mem::size_of::<f32>()),
    };

    let mut buf = Vec::new();
    buf.try_reserve_exact(len).map_err(|_| exhausted())?;
    buf.resize(len, 0.0f32);
    Ok(buf)
}

impl OutputAccumulator {
    /// Allocate a zeroed accumulator. Allocation failure is reported as
    /// `ResourceExhaustion` instead of aborting the process.
    pub fn try_new(stems: usize, channels: usize, total: usize, segment_weight: Arc<[f32]>) -> SeparationResult<Self> {
        let len = stems
            .checked_mul(channels)
            .and_then(|n| n.checked_mul(total))
            .ok_or(SeparationError::ResourceExhaustion {
                what: "output accumulator",
                bytes: usize::MAX,
            })?;

        let data = Array3::from_shape_vec((stems, channels, total), try_zeroed(len, "output accumulator")?)
            .map_err(|e| SeparationError::ContractViolation(e.to_string()))?;
        let weight_sum = try_zeroed(total, "weight accumulator")?;

        Ok(Self { data, weight_sum, segment_weight })
    }

    pub fn total(&self) -> usize {
        self.weight_sum.len()
    }

    pub fn segment_length(&self) -> usize {
        self.segment_weight.len()
    }

    /// Summed weight per sample so far
    pub fn weight_sum(&self) -> &[f32] {
        &self.weight_sum
    }

    /// Add one segment output `[stems, channels, >= n]` at `offset`, where
    /// `n = min(segment_length, total - offset)`.
    pub fn accumulate(&mut self, offset: usize, output: ArrayView3<f32>) -> SeparationResult<()> {
        let (stems, channels, total) = self.data.dim();
        if offset >= total {
            return Err(SeparationError::ContractViolation(format!(
                "segment offset {} outside output of {} samples",
                offset, total
            )));
        }

        let n = self.segment_length().min(total - offset);
        let (out_stems, out_channels, out_len) = output.dim();
        if out_stems != stems || out_channels != channels || out_len < n {
            return Err(SeparationError::ContractViolation(format!(
                "segment output [{}, {}, {}] does not fit [{}, {}, >= {}] at offset {}",
                out_stems, out_channels, out_len, stems, channels, n, offset
            )));
        }

        let weight = &self.segment_weight[..n];
        for (mut dst_stem, src_stem) in self.data.axis_iter_mut(Axis(0)).zip(output.axis_iter(Axis(0))) {
            for (mut dst, src) in dst_stem.axis_iter_mut(Axis(0)).zip(src_stem.axis_iter(Axis(0))) {
                let mut dst = dst.slice_mut(s![offset..offset + n]);
                for ((d, &x), &w) in dst.iter_mut().zip(src.iter()).zip(weight) {
                    *d += x * w;
                }
            }
        }
        for (sum, &w) in self.weight_sum[offset..offset + n].iter_mut().zip(weight) {
            *sum += w;
        }

        Ok(())
    }

    /// Fold in an accumulator that covered other segments of the same file
    pub fn merge(&mut self, other: OutputAccumulator) -> SeparationResult<()> {
        if self.data.dim() != other.data.dim() {
            return Err(SeparationError::ContractViolation(format!(
                "cannot merge accumulators of shape {:?} and {:?}",
                self.data.dim(),
                other.data.dim()
            )));
        }

        self.data += &other.data;
        for (a, b) in self.weight_sum.iter_mut().zip(&other.weight_sum) {
            *a += b;
        }
        Ok(())
    }

    /// Divide out the summed weight. Fails at the first sample no segment
    /// contributed to.
    pub fn finalize(self) -> SeparationResult<Array3<f32>> {
        let Self { mut data, weight_sum, .. } = self;

        if let Some(index) = weight_sum.iter().position(|&w| w <= 0.0) {
            return Err(SeparationError::CoverageGap { index });
        }

        for mut stem in data.axis_iter_mut(Axis(0)) {
            for mut channel in stem.axis_iter_mut(Axis(0)) {
                for (sample, &w) in channel.iter_mut().zip(&weight_sum) {
                    *sample /= w;
                }
            }
        }

        Ok(data)
    }
}
