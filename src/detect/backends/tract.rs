#![cfg(feature = "backend-tract")]

use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use image::{imageops, RgbImage};
use tract_onnx::prelude::*;

use crate::detect::backend::DetectorBackend;
use crate::detect::labels::load_labels;
use crate::detect::result::BoundingBox;
use crate::detect::yolo::{decode_channel_major, YoloDecodeParams};

type RunnableModel = TypedRunnableModel<TypedModel>;

/// Tract-based backend for ONNX YOLO models.
///
/// Loads a local model file and label list at setup. Frames are resized to the
/// square model input; boxes come back normalized to the input frame.
pub struct TractBackend {
    model_path: PathBuf,
    labels_path: PathBuf,
    params: YoloDecodeParams,
    model: Option<RunnableModel>,
    labels: Vec<String>,
}

impl TractBackend {
    pub fn new(model_path: impl Into<PathBuf>, labels_path: impl Into<PathBuf>, input_size: u32) -> Self {
        Self {
            model_path: model_path.into(),
            labels_path: labels_path.into(),
            params: YoloDecodeParams {
                input_size: input_size as f32,
                ..YoloDecodeParams::default()
            },
            model: None,
            labels: Vec::new(),
        }
    }

    fn input_edge(&self) -> u32 {
        self.params.input_size as u32
    }

    fn build_input(&self, image: &RgbImage) -> Tensor {
        let edge = self.input_edge();
        let resized = imageops::resize(image, edge, edge, imageops::FilterType::Triangle);
        let edge = edge as usize;
        tract_ndarray::Array4::from_shape_fn((1, 3, edge, edge), |(_, channel, y, x)| {
            resized.get_pixel(x as u32, y as u32).0[channel] as f32 / 255.0
        })
        .into_tensor()
    }

    fn decode(&self, outputs: TVec<TValue>) -> Result<Vec<BoundingBox>> {
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;
        let shape = view.shape().to_vec();
        if shape.len() != 3 || shape[0] != 1 {
            return Err(anyhow!("unexpected model output shape {:?}", shape));
        }
        let rows = 4 + self.labels.len();
        if shape[1] == rows {
            let data: Vec<f32> = view.iter().copied().collect();
            decode_channel_major(&data, shape[2], &self.labels, &self.params)
        } else if shape[2] == rows {
            // Anchor-major export: transpose to channel-major.
            let anchors = shape[1];
            let mut data = vec![0.0f32; rows * anchors];
            for ((_, anchor, row), value) in view
                .into_dimensionality::<tract_ndarray::Ix3>()?
                .indexed_iter()
            {
                data[row * anchors + anchor] = *value;
            }
            decode_channel_major(&data, anchors, &self.labels, &self.params)
        } else {
            Err(anyhow!(
                "model output shape {:?} does not match {} labels",
                shape,
                self.labels.len()
            ))
        }
    }
}

impl DetectorBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn setup(&mut self) -> Result<()> {
        let edge = self.input_edge() as usize;
        let model = tract_onnx::onnx()
            .model_for_path(&self.model_path)
            .with_context(|| {
                format!("failed to load ONNX model from {}", self.model_path.display())
            })?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(f32::datum_type(), tvec!(1, 3, edge, edge)),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;
        self.labels = load_labels(&self.labels_path)?;
        self.model = Some(model);
        log::info!(
            "tract backend ready: {} ({} labels)",
            self.model_path.display(),
            self.labels.len()
        );
        Ok(())
    }

    fn detect(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>> {
        let model = self
            .model
            .as_ref()
            .ok_or_else(|| anyhow!("tract backend used before setup()"))?;
        let input = self.build_input(image);
        let outputs = model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        self.decode(outputs)
    }
}
