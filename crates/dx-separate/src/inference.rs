//! ONNX inference backend
//!
//! Pure Rust execution through tract. The exported separator has two inputs
//! (`mix`, `mag`) and two outputs (`x`, `xt`), taken positionally. Input
//! facts are pinned to the adapter geometry so tract can fully optimize the
//! graph for one segment size.

use std::path::Path;

use ndarray::{ArrayD, ArrayView4, IxDyn};
use tract_onnx::prelude::*;

use crate::adapter::{InferenceBackend, ModelAdapter};
use crate::error::{SeparationError, SeparationResult};
use crate::tensor::RawModelOutput;

type TractPlan = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// Separator model loaded with tract
pub struct TractBackend {
    plan: TractPlan,
    name: String,
}

impl TractBackend {
    /// Load an ONNX model and optimize it for the adapter's segment geometry
    pub fn load<P: AsRef<Path>>(model_path: P, adapter: &ModelAdapter) -> SeparationResult<Self> {
        let path = model_path.as_ref();
        if !path.exists() {
            return Err(SeparationError::ModelNotFound {
                path: path.display().to_string(),
            });
        }

        let load_failed = |e: TractError| SeparationError::ModelLoadFailed { reason: e.to_string() };

        log::info!(
            "Loading separator model {} (mix {:?}, mag {:?})",
            path.display(),
            adapter.mix_shape(),
            adapter.mag_shape()
        );

        let plan = tract_onnx::onnx()
            .model_for_path(path)
            .map_err(load_failed)?
            .with_input_fact(0, f32::fact(adapter.mix_shape()).into())
            .map_err(load_failed)?
            .with_input_fact(1, f32::fact(adapter.mag_shape()).into())
            .map_err(load_failed)?
            .into_optimized()
            .map_err(load_failed)?
            .into_runnable()
            .map_err(load_failed)?;

        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .map(|stem| format!("tract:{}", stem))
            .unwrap_or_else(|| "tract".to_string());

        Ok(Self { plan, name })
    }

    fn to_tensor(view: ArrayView4<f32>) -> SeparationResult<Tensor> {
        let data: Vec<f32> = view.iter().copied().collect();
        Tensor::from_shape(view.shape(), &data).map_err(|e| SeparationError::InferenceFailed {
            reason: format!("input conversion: {}", e),
        })
    }

    fn to_array(value: &TValue, tensor: &str) -> SeparationResult<ArrayD<f32>> {
        let data = value.as_slice::<f32>().map_err(|e| SeparationError::InferenceFailed {
            reason: format!("output `{}` is not f32: {}", tensor, e),
        })?;
        ArrayD::from_shape_vec(IxDyn(value.shape()), data.to_vec())
            .map_err(|e| SeparationError::ContractViolation(e.to_string()))
    }
}

impl InferenceBackend for TractBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn infer(&self, mix: ArrayView4<f32>, mag: ArrayView4<f32>) -> SeparationResult<RawModelOutput> {
        let inputs: TVec<TValue> = tvec!(Self::to_tensor(mix)?.into(), Self::to_tensor(mag)?.into());

        let outputs = self
            .plan
            .run(inputs)
            .map_err(|e| SeparationError::InferenceFailed { reason: e.to_string() })?;

        if outputs.len() < 2 {
            return Err(SeparationError::OutputShape {
                tensor: "outputs",
                expected: "2 tensors (x, xt)".into(),
                got: format!("{} tensors", outputs.len()),
            });
        }

        Ok(RawModelOutput {
            x: Self::to_array(&outputs[0], "x")?,
            xt: Self::to_array(&outputs[1], "xt")?,
        })
    }

    /// Each `run` builds its own execution state
    fn supports_concurrent_sessions(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SeparationConfig;

    #[test]
    fn test_missing_model() {
        let adapter = ModelAdapter::from_config(&SeparationConfig::default());
        let result = TractBackend::load("/nonexistent/htdemucs.onnx", &adapter);
        assert!(matches!(result, Err(SeparationError::ModelNotFound { .. })));
    }

    #[test]
    fn test_invalid_model_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.onnx");
        std::fs::write(&path, b"not a protobuf").unwrap();

        let adapter = ModelAdapter::from_config(&SeparationConfig::default());
        let result = TractBackend::load(&path, &adapter);
        assert!(matches!(result, Err(SeparationError::ModelLoadFailed { .. })));
    }
}
