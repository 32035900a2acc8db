//! YOLO output decoding and non-maximum suppression.

use anyhow::{anyhow, Result};

use crate::detect::result::BoundingBox;

#[derive(Clone, Copy, Debug)]
pub struct YoloDecodeParams {
    /// Square model input edge; box coordinates are emitted in this pixel space.
    pub input_size: f32,
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
}

impl Default for YoloDecodeParams {
    fn default() -> Self {
        Self {
            input_size: 640.0,
            confidence_threshold: 0.3,
            iou_threshold: 0.5,
        }
    }
}

/// Decode a channel-major `[4 + classes, anchors]` output (cx, cy, w, h, scores...).
pub fn decode_channel_major(
    data: &[f32],
    anchors: usize,
    labels: &[String],
    params: &YoloDecodeParams,
) -> Result<Vec<BoundingBox>> {
    let rows = 4 + labels.len();
    if data.len() != rows * anchors {
        return Err(anyhow!(
            "model output has {} values, expected {} x {}",
            data.len(),
            rows,
            anchors
        ));
    }
    let at = |row: usize, anchor: usize| data[row * anchors + anchor];

    let mut boxes = Vec::new();
    for anchor in 0..anchors {
        let mut best_class = 0;
        let mut best_score = f32::NEG_INFINITY;
        for class in 0..labels.len() {
            let score = at(4 + class, anchor);
            if score > best_score {
                best_score = score;
                best_class = class;
            }
        }
        if best_score < params.confidence_threshold {
            continue;
        }

        let (cx, cy, w, h) = (at(0, anchor), at(1, anchor), at(2, anchor), at(3, anchor));
        let scale = params.input_size;
        let x1 = ((cx - w / 2.0) / scale).clamp(0.0, 1.0);
        let y1 = ((cy - h / 2.0) / scale).clamp(0.0, 1.0);
        let x2 = ((cx + w / 2.0) / scale).clamp(0.0, 1.0);
        let y2 = ((cy + h / 2.0) / scale).clamp(0.0, 1.0);
        if x2 <= x1 || y2 <= y1 {
            continue;
        }
        boxes.push(BoundingBox::new(
            labels[best_class].clone(),
            best_score.clamp(0.0, 1.0),
            x1,
            y1,
            x2,
            y2,
        ));
    }

    Ok(non_max_suppression(boxes, params.iou_threshold))
}

/// Greedy per-label NMS. Output is ordered by descending confidence.
pub fn non_max_suppression(mut boxes: Vec<BoundingBox>, iou_threshold: f32) -> Vec<BoundingBox> {
    boxes.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    let mut kept: Vec<BoundingBox> = Vec::with_capacity(boxes.len());
    for candidate in boxes {
        let overlaps = kept
            .iter()
            .any(|k| k.label == candidate.label && iou(k, &candidate) > iou_threshold);
        if !overlaps {
            kept.push(candidate);
        }
    }
    kept
}

pub fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let ix1 = a.x1.max(b.x1);
    let iy1 = a.y1.max(b.y1);
    let ix2 = a.x2.min(b.x2);
    let iy2 = a.y2.min(b.y2);
    let inter = (ix2 - ix1).max(0.0) * (iy2 - iy1).max(0.0);
    let union = a.area() + b.area() - inter;
    if union <= 0.0 {
        0.0
    } else {
        inter / union
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels() -> Vec<String> {
        vec!["person".to_string(), "car".to_string()]
    }

    #[test]
    fn decodes_best_class_per_anchor() -> Result<()> {
        // Two anchors; rows: cx, cy, w, h, person, car.
        let data = vec![
            320.0, 100.0, // cx
            320.0, 100.0, // cy
            64.0, 20.0, // w
            64.0, 20.0, // h
            0.1, 0.9, // person
            0.8, 0.05, // car
        ];
        let boxes = decode_channel_major(&data, 2, &labels(), &YoloDecodeParams::default())?;
        assert_eq!(boxes.len(), 2);
        assert_eq!(boxes[0].label, "person");
        assert!((boxes[0].confidence - 0.9).abs() < 1e-6);
        assert_eq!(boxes[1].label, "car");
        assert!((boxes[1].x1 - 0.45).abs() < 1e-6);
        assert!((boxes[1].x2 - 0.55).abs() < 1e-6);
        Ok(())
    }

    #[test]
    fn drops_low_confidence_anchors() -> Result<()> {
        let data = vec![10.0, 10.0, 5.0, 5.0, 0.1, 0.2];
        let boxes = decode_channel_major(&data, 1, &labels(), &YoloDecodeParams::default())?;
        assert!(boxes.is_empty());
        Ok(())
    }

    #[test]
    fn rejects_mismatched_output_length() {
        let data = vec![0.0; 5];
        assert!(decode_channel_major(&data, 1, &labels(), &YoloDecodeParams::default()).is_err());
    }

    #[test]
    fn nms_suppresses_same_label_overlaps_only() {
        let boxes = vec![
            BoundingBox::new("car", 0.6, 0.1, 0.1, 0.5, 0.5),
            BoundingBox::new("car", 0.9, 0.12, 0.12, 0.52, 0.52),
            BoundingBox::new("person", 0.7, 0.1, 0.1, 0.5, 0.5),
        ];
        let kept = non_max_suppression(boxes, 0.5);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].confidence, 0.9);
        assert_eq!(kept[1].label, "person");
    }
}
