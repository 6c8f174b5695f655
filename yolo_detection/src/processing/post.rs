use super::pre::Letterbox;
use crate::{config::OutputLayout, detection::RawDetection, model_service::ModelError};
use ndarray::{ArrayView2, ArrayViewD, Axis, Ix2};

/// Decoding and suppression the detector applies to its raw output tensor.
#[derive(Debug, Clone)]
pub struct PostProcessor {
    pub layout: OutputLayout,
    pub conf_threshold: f32,
    pub iou_threshold: f32,
    pub max_detections: usize,
}

/// Columns before the class scores in a candidate row.
fn score_offset(layout: OutputLayout) -> usize {
    match layout {
        OutputLayout::Yolov5 => 5,
        OutputLayout::Yolov8 => 4,
    }
}

/// Number of classes encoded in an output tensor of the given shape.
pub fn num_classes(layout: OutputLayout, shape: &[usize]) -> Result<usize, ModelError> {
    if shape.len() != 3 || shape[0] != 1 {
        return Err(ModelError::OutputShape(format!(
            "expected [1, _, _], got {:?}",
            shape
        )));
    }
    let width = match layout {
        OutputLayout::Yolov5 => shape[2],
        OutputLayout::Yolov8 => shape[1],
    };
    let offset = score_offset(layout);
    if width <= offset {
        return Err(ModelError::OutputShape(format!(
            "{:?} output {:?} carries no class scores",
            layout, shape
        )));
    }
    Ok(width - offset)
}

impl PostProcessor {
    #[tracing::instrument(skip_all)]
    pub fn process(
        &self,
        output: &ArrayViewD<f32>,
        letterbox: &Letterbox,
    ) -> Result<Vec<RawDetection>, ModelError> {
        let num_classes = num_classes(self.layout, output.shape())?;
        let batch = output
            .index_axis(Axis(0), 0)
            .into_dimensionality::<Ix2>()
            .map_err(|e| ModelError::OutputShape(e.to_string()))?;
        let candidates = match self.layout {
            OutputLayout::Yolov5 => batch,
            OutputLayout::Yolov8 => batch.reversed_axes(),
        };

        let boxes = self.decode(candidates, num_classes);
        tracing::debug!("{} candidates above confidence threshold", boxes.len());

        let kept = non_max_suppression(boxes, self.iou_threshold, self.max_detections);

        Ok(kept
            .into_iter()
            .map(|bbox| rescale(&bbox, letterbox))
            .collect())
    }

    /// Turns `[N, offset + nc]` candidate rows into boxes in model input space.
    fn decode(&self, candidates: ArrayView2<f32>, num_classes: usize) -> Vec<RawDetection> {
        let offset = score_offset(self.layout);
        let mut boxes = Vec::new();

        for row in candidates.axis_iter(Axis(0)) {
            let objectness = match self.layout {
                OutputLayout::Yolov5 => row[4],
                OutputLayout::Yolov8 => 1.,
            };
            if !(objectness > self.conf_threshold) {
                continue;
            }

            let (class_id, class_score) = row
                .iter()
                .skip(offset)
                .take(num_classes)
                .enumerate()
                .fold((0, f32::NEG_INFINITY), |best, (index, &score)| {
                    if score > best.1 {
                        (index, score)
                    } else {
                        best
                    }
                });

            let confidence = objectness * class_score;
            if !(confidence > self.conf_threshold) {
                continue;
            }

            let (xc, yc, w, h) = (row[0], row[1], row[2], row[3]);
            if ![xc, yc, w, h].iter().all(|v| v.is_finite()) {
                continue;
            }

            boxes.push(RawDetection {
                x_min: xc - w / 2.,
                y_min: yc - h / 2.,
                x_max: xc + w / 2.,
                y_max: yc + h / 2.,
                confidence: confidence.min(1.),
                class_id,
            });
        }

        boxes
    }
}

/// Greedy per-class suppression, highest confidence first.
pub fn non_max_suppression(
    mut boxes: Vec<RawDetection>,
    iou_threshold: f32,
    max_detections: usize,
) -> Vec<RawDetection> {
    boxes.sort_by(|box1, box2| box2.confidence.total_cmp(&box1.confidence));

    let mut result: Vec<RawDetection> = Vec::new();
    for candidate in boxes {
        if result.len() >= max_detections {
            break;
        }
        let suppressed = result
            .iter()
            .any(|kept| kept.class_id == candidate.class_id && kept.iou(&candidate) > iou_threshold);
        if !suppressed {
            result.push(candidate);
        }
    }

    result
}

fn rescale(bbox: &RawDetection, letterbox: &Letterbox) -> RawDetection {
    let (x1, y1) = letterbox.to_original(bbox.x_min, bbox.y_min);
    let (x2, y2) = letterbox.to_original(bbox.x_max, bbox.y_max);

    RawDetection {
        x_min: x1.min(x2),
        y_min: y1.min(y2),
        x_max: x1.max(x2),
        y_max: y1.max(y2),
        confidence: bbox.confidence.clamp(0., 1.),
        class_id: bbox.class_id,
    }
}
