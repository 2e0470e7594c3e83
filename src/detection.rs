use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;

/// One located, classified gemstone. Coordinates are in source image pixels,
/// the box is given by its center point and extent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    #[serde(rename = "class")]
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(rename = "x")]
    pub center_x: f64,
    #[serde(rename = "y")]
    pub center_y: f64,
    pub width: f64,
    pub height: f64,
}

impl Detection {
    pub fn summary_line(&self) -> String {
        match self.confidence {
            Some(confidence) => format!(
                "{} (Confidence: {:.2})",
                capitalize(&self.label),
                confidence
            ),
            None => capitalize(&self.label),
        }
    }
}

/// Uniform view over the response shapes the detection backend has used
/// across its revisions.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum DetectionResult {
    BoxedDetections(Vec<Detection>),
    SingleLabel(String),
    LabelCounts(BTreeMap<String, u32>),
    Empty,
}

impl DetectionResult {
    /// Labels in first-seen order, without duplicates.
    pub fn labels(&self) -> Vec<String> {
        match self {
            DetectionResult::BoxedDetections(detections) => {
                let mut labels: Vec<String> = Vec::with_capacity(detections.len());
                for detection in detections {
                    if !labels.contains(&detection.label) {
                        labels.push(detection.label.clone());
                    }
                }
                labels
            }
            DetectionResult::SingleLabel(label) => vec![label.clone()],
            DetectionResult::LabelCounts(counts) => counts.keys().cloned().collect(),
            DetectionResult::Empty => Vec::new(),
        }
    }

    pub fn summary_lines(&self) -> Vec<String> {
        match self {
            DetectionResult::BoxedDetections(detections) => {
                detections.iter().map(Detection::summary_line).collect()
            }
            DetectionResult::SingleLabel(label) => vec![capitalize(label)],
            DetectionResult::LabelCounts(counts) => counts
                .iter()
                .map(|(label, count)| format!("{} x{}", capitalize(label), count))
                .collect(),
            DetectionResult::Empty => Vec::new(),
        }
    }

    /// Detections carrying box geometry, if this response shape has any.
    pub fn boxes(&self) -> Option<&[Detection]> {
        match self {
            DetectionResult::BoxedDetections(detections) => Some(detections),
            _ => None,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NormalizeError {
    #[error("No gemstone detected in the image.")]
    NoDetection,
    #[error("Unexpected response from the detection service.")]
    UnrecognizedResponse,
}

const PREDICTIONS_KEY: &str = "predictions";

/// Maps a raw detection-service response onto a [`DetectionResult`].
///
/// Shapes are tried in order: a `predictions` array of boxed records, a bare
/// label string, then a label-to-count object. The first match wins.
pub fn normalize(response: &Value) -> Result<DetectionResult, NormalizeError> {
    if let Some(predictions) = response.get(PREDICTIONS_KEY).and_then(Value::as_array) {
        return normalize_predictions(predictions);
    }

    match response {
        Value::String(label) if label.is_empty() => Err(NormalizeError::NoDetection),
        Value::String(label) => Ok(DetectionResult::SingleLabel(label.clone())),
        Value::Object(map) => normalize_counts(map),
        _ => Err(NormalizeError::UnrecognizedResponse),
    }
}

fn normalize_predictions(predictions: &[Value]) -> Result<DetectionResult, NormalizeError> {
    if predictions.is_empty() {
        return Err(NormalizeError::NoDetection);
    }

    let detections = predictions
        .iter()
        .map(|record| {
            Detection::deserialize(record).map_err(|e| {
                tracing::debug!("Prediction record rejected: {}", e);
                NormalizeError::UnrecognizedResponse
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(DetectionResult::BoxedDetections(detections))
}

fn normalize_counts(
    map: &serde_json::Map<String, Value>,
) -> Result<DetectionResult, NormalizeError> {
    let mut counts = BTreeMap::new();
    for (label, value) in map {
        let count = value.as_i64().ok_or(NormalizeError::UnrecognizedResponse)?;
        if count > 0 {
            let count = u32::try_from(count).unwrap_or(u32::MAX);
            counts.insert(label.clone(), count);
        }
    }

    if counts.is_empty() {
        return Err(NormalizeError::NoDetection);
    }
    Ok(DetectionResult::LabelCounts(counts))
}

fn capitalize(label: &str) -> String {
    let mut chars = label.chars();
    match chars.next() {
        Some(first) => first
            .to_uppercase()
            .chain(chars.flat_map(char::to_lowercase))
            .collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_predictions_are_kept_verbatim_and_in_order() {
        let response = json!({
            "time": 0.041,
            "image": {"width": 640, "height": 480},
            "predictions": [
                {"x": 320.5, "y": 240.0, "width": 100.0, "height": 80.25, "confidence": 0.912, "class": "ruby", "class_id": 4},
                {"x": 12.0, "y": 18.0, "width": 4.0, "height": 6.0, "confidence": 0.5, "class": "emerald"},
                {"x": 12.0, "y": 18.0, "width": 4.0, "height": 6.0, "confidence": 0.33, "class": "ruby"}
            ]
        });

        let result = normalize(&response).unwrap();
        let detections = result.boxes().unwrap();

        assert_eq!(detections.len(), 3);
        assert_eq!(
            detections[0],
            Detection {
                label: "ruby".into(),
                confidence: Some(0.912),
                center_x: 320.5,
                center_y: 240.0,
                width: 100.0,
                height: 80.25,
            }
        );
        assert_eq!(detections[1].label, "emerald");
        assert_eq!(detections[2].confidence, Some(0.33));
    }

    #[test]
    fn test_prediction_without_confidence_is_accepted() {
        let response = json!({
            "predictions": [{"x": 1.0, "y": 2.0, "width": 3.0, "height": 4.0, "class": "opal"}]
        });

        let result = normalize(&response).unwrap();
        assert_eq!(result.boxes().unwrap()[0].confidence, None);
    }

    #[test]
    fn test_empty_predictions_is_no_detection() {
        let response = json!({"predictions": []});
        assert_eq!(normalize(&response), Err(NormalizeError::NoDetection));
    }

    #[test]
    fn test_malformed_prediction_is_unrecognized() {
        let response = json!({"predictions": [{"class": "ruby", "x": "left"}]});
        assert_eq!(
            normalize(&response),
            Err(NormalizeError::UnrecognizedResponse)
        );
    }

    #[test]
    fn test_single_label() {
        assert_eq!(
            normalize(&json!("amethyst")),
            Ok(DetectionResult::SingleLabel("amethyst".into()))
        );
        assert_eq!(normalize(&json!("")), Err(NormalizeError::NoDetection));
    }

    #[test]
    fn test_label_counts_drop_non_positive() {
        let result = normalize(&json!({"ruby": 2, "sapphire": 0})).unwrap();

        let expected = BTreeMap::from([("ruby".to_string(), 2)]);
        assert_eq!(result, DetectionResult::LabelCounts(expected));
    }

    #[test]
    fn test_label_counts_all_zero_or_empty_is_no_detection() {
        assert_eq!(
            normalize(&json!({"ruby": 0, "topaz": -1})),
            Err(NormalizeError::NoDetection)
        );
        assert_eq!(normalize(&json!({})), Err(NormalizeError::NoDetection));
    }

    #[test]
    fn test_unrecognized_shapes() {
        for response in [
            json!(42),
            json!(null),
            json!(["ruby"]),
            json!({"ruby": "two"}),
            json!({"predictions": "none"}),
        ] {
            assert_eq!(
                normalize(&response),
                Err(NormalizeError::UnrecognizedResponse),
                "response: {}",
                response
            );
        }
    }

    #[test]
    fn test_labels_deduplicate_in_first_seen_order() {
        let detection = |label: &str| Detection {
            label: label.into(),
            confidence: None,
            center_x: 1.0,
            center_y: 1.0,
            width: 1.0,
            height: 1.0,
        };
        let result = DetectionResult::BoxedDetections(vec![
            detection("topaz"),
            detection("ruby"),
            detection("topaz"),
        ]);

        assert_eq!(result.labels(), vec!["topaz", "ruby"]);
        assert!(DetectionResult::Empty.labels().is_empty());
    }

    #[test]
    fn test_summary_lines() {
        let boxed = DetectionResult::BoxedDetections(vec![Detection {
            label: "ruby".into(),
            confidence: Some(0.9234),
            center_x: 1.0,
            center_y: 1.0,
            width: 1.0,
            height: 1.0,
        }]);
        assert_eq!(boxed.summary_lines(), vec!["Ruby (Confidence: 0.92)"]);

        let counts = DetectionResult::LabelCounts(BTreeMap::from([("blue sapphire".into(), 3)]));
        assert_eq!(counts.summary_lines(), vec!["Blue sapphire x3"]);
    }

    #[test]
    fn test_result_serializes_with_kind_tag() {
        let value = serde_json::to_value(DetectionResult::SingleLabel("jade".into())).unwrap();
        assert_eq!(value, json!({"kind": "single_label", "value": "jade"}));

        let value = serde_json::to_value(DetectionResult::Empty).unwrap();
        assert_eq!(value, json!({"kind": "empty"}));
    }
}
