#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::imageops::{self, FilterType};
use tract_onnx::prelude::*;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::Detection;
use crate::frame::Frame;

const LETTERBOX_FILL: u8 = 114;

/// Tract-based backend for YOLOv8-style ONNX exports.
///
/// The model takes a square `[1, 3, S, S]` RGB input scaled to 0..1 and emits
/// `[1, 4 + classes, anchors]` rows of `cx, cy, w, h` followed by per-class
/// scores. Frames of any size are letterboxed into the input square and the
/// decoded boxes are mapped back to frame pixels.
pub struct TractBackend {
    model: TypedRunnableModel<TypedModel>,
    input_size: u32,
    score_threshold: f32,
    iou_threshold: f32,
    max_detections: usize,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P, input_size: u32) -> Result<Self> {
        let model_path = model_path.as_ref();
        if input_size == 0 {
            return Err(anyhow!("model input size must be positive"));
        }
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(
                    f32::datum_type(),
                    tvec!(1, 3, input_size as usize, input_size as usize),
                ),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self {
            model,
            input_size,
            score_threshold: 0.25,
            iou_threshold: 0.7,
            max_detections: 300,
        })
    }

    fn build_input(&self, frame: &Frame) -> Result<(Tensor, Letterbox)> {
        let image = frame
            .as_image()
            .ok_or_else(|| anyhow!("frame buffer does not match its dimensions"))?;
        let letterbox = Letterbox::fit(frame.width, frame.height, self.input_size);

        let resized = imageops::resize(
            &image,
            letterbox.scaled_w,
            letterbox.scaled_h,
            FilterType::Triangle,
        );
        let side = self.input_size;
        let mut canvas = image::RgbImage::from_pixel(side, side, image::Rgb([LETTERBOX_FILL; 3]));
        imageops::replace(
            &mut canvas,
            &resized,
            i64::from(letterbox.pad_x),
            i64::from(letterbox.pad_y),
        );

        let side = side as usize;
        let input = tract_ndarray::Array4::from_shape_fn((1, 3, side, side), |(_, c, y, x)| {
            canvas.get_pixel(x as u32, y as u32)[c] as f32 / 255.0
        });
        Ok((input.into_tensor(), letterbox))
    }

    fn decode(
        &self,
        output: &Tensor,
        letterbox: &Letterbox,
        frame: &Frame,
    ) -> Result<Vec<Detection>> {
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?
            .into_dimensionality::<tract_ndarray::Ix3>()
            .context("model output is not rank 3")?;
        let shape = view.shape().to_vec();
        if shape[0] != 1 || shape[1] <= 4 {
            return Err(anyhow!("unexpected model output shape {:?}", shape));
        }
        let classes = shape[1] - 4;
        let anchors = shape[2];

        let mut candidates = Vec::new();
        for i in 0..anchors {
            let mut best_class = 0usize;
            let mut best_score = f32::NEG_INFINITY;
            for c in 0..classes {
                let score = view[[0, 4 + c, i]];
                if score > best_score {
                    best_score = score;
                    best_class = c;
                }
            }
            if best_score <= self.score_threshold {
                continue;
            }

            let cx = view[[0, 0, i]];
            let cy = view[[0, 1, i]];
            let w = view[[0, 2, i]];
            let h = view[[0, 3, i]];
            let (x1, y1) = letterbox.to_frame(cx - w / 2.0, cy - h / 2.0, frame);
            let (x2, y2) = letterbox.to_frame(cx + w / 2.0, cy + h / 2.0, frame);
            candidates.push(Detection {
                x1,
                y1,
                x2,
                y2,
                confidence: best_score,
                class_id: best_class as u32,
            });
        }

        Ok(non_max_suppression(
            candidates,
            self.iou_threshold,
            self.max_detections,
        ))
    }
}

impl DetectorBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn detect(&self, frame: &Frame) -> Result<Vec<Detection>> {
        let (input, letterbox) = self.build_input(frame)?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        self.decode(output, &letterbox, frame)
    }

    fn warm_up(&self) -> Result<()> {
        let side = self.input_size;
        let blank = Frame::from_rgb(vec![0u8; (side * side * 3) as usize], side, side)?;
        self.detect(&blank).map(|_| ())
    }
}

/// Placement of a frame inside the square model input.
#[derive(Clone, Copy, Debug, PartialEq)]
struct Letterbox {
    scale: f32,
    scaled_w: u32,
    scaled_h: u32,
    pad_x: u32,
    pad_y: u32,
}

impl Letterbox {
    fn fit(width: u32, height: u32, side: u32) -> Self {
        let scale = (side as f32 / width as f32).min(side as f32 / height as f32);
        let scaled_w = ((width as f32 * scale).round() as u32).clamp(1, side);
        let scaled_h = ((height as f32 * scale).round() as u32).clamp(1, side);
        Self {
            scale,
            scaled_w,
            scaled_h,
            pad_x: (side - scaled_w) / 2,
            pad_y: (side - scaled_h) / 2,
        }
    }

    fn to_frame(&self, x: f32, y: f32, frame: &Frame) -> (f32, f32) {
        let fx = (x - self.pad_x as f32) / self.scale;
        let fy = (y - self.pad_y as f32) / self.scale;
        (
            fx.clamp(0.0, frame.width as f32),
            fy.clamp(0.0, frame.height as f32),
        )
    }
}

/// Class-wise greedy NMS, highest confidence first.
fn non_max_suppression(
    mut candidates: Vec<Detection>,
    iou_threshold: f32,
    max_detections: usize,
) -> Vec<Detection> {
    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    let mut keep: Vec<Detection> = Vec::new();
    for cand in candidates {
        if keep.len() >= max_detections {
            break;
        }
        let suppressed = keep
            .iter()
            .any(|k| k.class_id == cand.class_id && k.iou(&cand) > iou_threshold);
        if !suppressed {
            keep.push(cand);
        }
    }
    keep
}
