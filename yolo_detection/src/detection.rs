use crate::labels::ClassLabels;
use serde::{Deserialize, Serialize};

/// Detector output before label resolution: `(x_min, y_min, x_max, y_max,
/// confidence, class_id)` in pixel coordinates of the input image.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawDetection {
    pub x_min: f32,
    pub y_min: f32,
    pub x_max: f32,
    pub y_max: f32,
    pub confidence: f32,
    pub class_id: usize,
}

impl RawDetection {
    pub fn area(&self) -> f32 {
        (self.x_max - self.x_min).max(0.) * (self.y_max - self.y_min).max(0.)
    }

    pub fn intersection(&self, other: &RawDetection) -> f32 {
        let w = self.x_max.min(other.x_max) - self.x_min.max(other.x_min);
        let h = self.y_max.min(other.y_max) - self.y_min.max(other.y_min);
        w.max(0.) * h.max(0.)
    }

    pub fn iou(&self, other: &RawDetection) -> f32 {
        let inter = self.intersection(other);
        let union = self.area() + other.area() - inter;
        if union <= 0. {
            return 0.;
        }
        inter / union
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub class_id: usize,
    pub class_name: String,
    pub confidence: f32,
    pub bbox: [f32; 4],
}

impl Detection {
    pub fn from_raw(raw: &RawDetection, labels: &ClassLabels) -> Self {
        let class_name = labels
            .name(raw.class_id)
            .map(str::to_string)
            .unwrap_or_else(|| format!("Unknown class {}", raw.class_id));

        Self {
            class_id: raw.class_id,
            class_name,
            confidence: raw.confidence,
            bbox: [raw.x_min, raw.y_min, raw.x_max, raw.y_max],
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DetectionResponse {
    pub detections: Vec<Detection>,
}

impl DetectionResponse {
    pub fn from_raw(raw: &[RawDetection], labels: &ClassLabels) -> Self {
        Self {
            detections: raw.iter().map(|r| Detection::from_raw(r, labels)).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(x_min: f32, y_min: f32, x_max: f32, y_max: f32) -> RawDetection {
        RawDetection {
            x_min,
            y_min,
            x_max,
            y_max,
            confidence: 0.9,
            class_id: 0,
        }
    }

    #[test]
    fn test_iou() {
        let a = raw(0., 0., 10., 10.);
        let b = raw(5., 0., 15., 10.);
        assert!((a.iou(&b) - 50. / 150.).abs() < 1e-6);
        assert_eq!(a.iou(&a), 1.);
    }

    #[test]
    fn test_disjoint_boxes_do_not_intersect() {
        let a = raw(0., 0., 10., 10.);
        let b = raw(20., 20., 30., 30.);
        assert_eq!(a.intersection(&b), 0.);
        assert_eq!(a.iou(&b), 0.);
    }

    #[test]
    fn test_from_raw_resolves_class_name() {
        let labels = ClassLabels::new(vec!["person".into(), "bicycle".into()]);
        let detection = Detection::from_raw(
            &RawDetection {
                x_min: 1.,
                y_min: 2.,
                x_max: 3.,
                y_max: 4.,
                confidence: 0.5,
                class_id: 1,
            },
            &labels,
        );

        assert_eq!(detection.class_name, "bicycle");
        assert_eq!(detection.bbox, [1., 2., 3., 4.]);
    }

    #[test]
    fn test_response_json_shape() {
        let labels = ClassLabels::new(vec!["person".into()]);
        let response = DetectionResponse::from_raw(&[raw(1., 2., 3., 4.)], &labels);

        let json = serde_json::to_value(&response).unwrap();
        let detection = &json["detections"][0];
        assert_eq!(detection["class_id"], 0);
        assert_eq!(detection["class_name"], "person");
        assert_eq!(detection["bbox"].as_array().unwrap().len(), 4);

        let empty = serde_json::to_string(&DetectionResponse::default()).unwrap();
        assert_eq!(empty, r#"{"detections":[]}"#);
    }
}
