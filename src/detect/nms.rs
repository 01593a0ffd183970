//! Box overlap helpers shared by model backends.

pub const DEFAULT_IOU_THRESHOLD: f32 = 0.3;

/// Candidate box as `[x1, y1, x2, y2]` with a confidence score.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ScoredBox {
    pub corners: [f32; 4],
    pub score: f32,
}

/// IoU between two boxes represented as `[x1, y1, x2, y2]`.
pub fn bbox_iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let x1 = a[0].max(b[0]);
    let y1 = a[1].max(b[1]);
    let x2 = a[2].min(b[2]);
    let y2 = a[3].min(b[3]);

    let inter = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    if inter == 0.0 {
        return 0.0;
    }

    let area_a = (a[2] - a[0]) * (a[3] - a[1]);
    let area_b = (b[2] - b[0]) * (b[3] - b[1]);
    inter / (area_a + area_b - inter)
}

/// Greedy non-maximum suppression: highest score first, drop any box whose
/// IoU with an already kept box exceeds `iou_threshold`.
pub fn suppress(mut candidates: Vec<ScoredBox>, iou_threshold: f32) -> Vec<ScoredBox> {
    candidates.sort_by(|a, b| b.score.total_cmp(&a.score));
    let mut kept: Vec<ScoredBox> = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        let dominated = kept
            .iter()
            .any(|k| bbox_iou(&k.corners, &candidate.corners) > iou_threshold);
        if !dominated {
            kept.push(candidate);
        }
    }
    kept
}
