//! The opaque forward-pass capability and its ONNX Runtime backing.
//!
//! The engine never sees a session or a weights file, only a
//! [`Network`]: one tensor in, one tensor out, fixed integer scale.
//! Loading the PyTorch checkpoint (`params_ema`, falling back to
//! `params`) into the network structure is the model exporter's
//! concern; this module only consumes the resulting ONNX artifact.

use std::path::Path;
use std::sync::Mutex;

use half::f16;
use half::slice::HalfFloatSliceExt;
use ndarray::Array4;
use ort::{
    execution_providers::{CUDAExecutionProvider, ExecutionProvider},
    session::{builder::GraphOptimizationLevel, Session},
    value::Tensor,
};
use tracing::debug;

use crate::device::Device;
use crate::error::{Error, Result};

/// A fixed pretrained super-resolution network. One forward pass
/// multiplies the spatial dimensions by exactly [`Network::scale`].
pub trait Network: Send + Sync {
    fn scale(&self) -> usize;
    fn forward(&self, input: &Array4<f32>) -> Result<Array4<f32>>;
}

/// ONNX Runtime session wrapper: CUDA execution provider when the
/// device asks for it, CPU otherwise. Handles both FP32 and FP16
/// model variants transparently.
pub struct OrtNetwork {
    session: Mutex<Session>,
    scale: usize,
    input_name: String,
    output_name: String,
    is_fp16: bool,
}

impl OrtNetwork {
    pub fn load(model_path: &Path, scale: usize, device: Device) -> Result<Self> {
        if scale == 0 {
            return Err(Error::Configuration(
                "network scale must be at least 1".to_string(),
            ));
        }

        let mut builder =
            Session::builder()?.with_optimization_level(GraphOptimizationLevel::Level3)?;

        if let Device::Cuda(index) = device {
            let cuda = CUDAExecutionProvider::default().with_device_id(index as i32);
            if !cuda.is_available().unwrap_or(false) {
                return Err(Error::DeviceUnavailable(format!(
                    "cuda:{index}: CUDA execution provider not available"
                )));
            }
            builder = builder.with_execution_providers([cuda.build()])?;
        }

        let session = builder.commit_from_file(model_path)?;

        let input_name = session.inputs()[0].name().to_string();
        let output_name = session.outputs()[0].name().to_string();
        let is_fp16 = match session.inputs()[0].dtype() {
            ort::value::ValueType::Tensor { ty, .. } => {
                *ty == ort::tensor::TensorElementType::Float16
            }
            _ => false,
        };

        debug!(
            model = %model_path.display(),
            %input_name,
            %output_name,
            is_fp16,
            scale,
            "loaded super-resolution model"
        );

        Ok(Self {
            session: Mutex::new(session),
            scale,
            input_name,
            output_name,
            is_fp16,
        })
    }
}

impl Network for OrtNetwork {
    fn scale(&self) -> usize {
        self.scale
    }

    fn forward(&self, input: &Array4<f32>) -> Result<Array4<f32>> {
        let mut session = self.session.lock().unwrap();

        let output = if self.is_fp16 {
            run_fp16(&mut session, input, &self.input_name, &self.output_name)?
        } else {
            let tensor = Tensor::from_array(input.clone())?;
            let outputs = session.run(ort::inputs![self.input_name.as_str() => &tensor])?;
            outputs[self.output_name.as_str()]
                .try_extract_array::<f32>()?
                .to_owned()
        };

        Ok(output.into_dimensionality::<ndarray::Ix4>()?)
    }
}

/// FP32 in/out against an FP16 model: convert, run, convert back.
fn run_fp16(
    session: &mut Session,
    input: &Array4<f32>,
    input_name: &str,
    output_name: &str,
) -> Result<ndarray::ArrayD<f32>> {
    let contiguous;
    let f32_slice = match input.as_slice() {
        Some(slice) => slice,
        None => {
            contiguous = input.as_standard_layout().into_owned();
            contiguous.as_slice().unwrap()
        }
    };
    let mut fp16_data = vec![f16::ZERO; f32_slice.len()];
    fp16_data.convert_from_f32_slice(f32_slice);

    let fp16_array = ndarray::ArrayD::from_shape_vec(input.shape().to_vec(), fp16_data)?;
    let tensor = Tensor::from_array(fp16_array)?;
    let outputs = session.run(ort::inputs![input_name => &tensor])?;
    let output_view = outputs[output_name].try_extract_array::<f16>()?;

    let fp16_owned;
    let fp16_slice = match output_view.as_slice() {
        Some(slice) => slice,
        None => {
            fp16_owned = output_view.as_standard_layout().into_owned();
            fp16_owned.as_slice().unwrap()
        }
    };
    let mut f32_data = vec![0.0f32; fp16_slice.len()];
    fp16_slice.convert_to_f32_slice(&mut f32_data);

    Ok(ndarray::ArrayD::from_shape_vec(
        output_view.shape().to_vec(),
        f32_data,
    )?)
}
