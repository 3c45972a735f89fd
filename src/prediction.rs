//! Classification results and their persisted form.

use crate::defaults::CONFIDENCE_DECIMALS;
use serde::{Deserialize, Serialize};

/// Outcome of classifying one recording.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Label {
    Truthful,
    Deceptive,
}

impl Label {
    /// Map a model class index to a label (`0 → truthful`, `1 → deceptive`).
    pub fn from_class_index(index: usize) -> Option<Self> {
        match index {
            0 => Some(Label::Truthful),
            1 => Some(Label::Deceptive),
            _ => None,
        }
    }

    /// Wire name used in responses and stored records.
    pub fn wire_name(self) -> &'static str {
        match self {
            Label::Truthful => "truth",
            Label::Deceptive => "lie",
        }
    }
}

/// Label plus confidence, created once by the model runtime.
///
/// Fields are private; the only constructor rounds and clamps the confidence,
/// so every value in circulation satisfies `0.0 <= confidence <= 1.0`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PredictionResult {
    label: Label,
    confidence: f64,
}

impl PredictionResult {
    pub fn new(label: Label, probability: f32) -> Self {
        Self {
            label,
            confidence: round_confidence(f64::from(probability)),
        }
    }

    pub fn label(&self) -> Label {
        self.label
    }

    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    /// The `{prediction, confidence}` pair returned to callers and stored.
    pub fn data(&self) -> PredictionData {
        PredictionData {
            prediction: self.label.wire_name().to_string(),
            confidence: self.confidence,
        }
    }
}

/// Round to [`CONFIDENCE_DECIMALS`] places and clamp into `[0, 1]`.
pub fn round_confidence(probability: f64) -> f64 {
    let scale = 10f64.powi(CONFIDENCE_DECIMALS);
    ((probability * scale).round() / scale).clamp(0.0, 1.0)
}

/// Serialized prediction payload: `{"prediction": "truth"|"lie", "confidence": 0.87}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionData {
    pub prediction: String,
    pub confidence: f64,
}

/// Fields written to the document store for one prediction.
///
/// The timestamp is not part of the record: the document store assigns it
/// from its own clock on every write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionRecord {
    pub user_id: String,
    #[serde(rename = "predictionData")]
    pub prediction_data: PredictionData,
    pub source_path: String,
}

impl PredictionRecord {
    pub fn new(source_path: &str, user_id: &str, result: &PredictionResult) -> Self {
        Self {
            user_id: user_id.to_string(),
            prediction_data: result.data(),
            source_path: source_path.to_string(),
        }
    }

    /// Record as a JSON object, ready for a merge write.
    pub fn to_fields(&self) -> serde_json::Map<String, serde_json::Value> {
        let mut fields = serde_json::Map::new();
        fields.insert(
            "user_id".to_string(),
            serde_json::Value::String(self.user_id.clone()),
        );
        fields.insert(
            "predictionData".to_string(),
            serde_json::json!({
                "prediction": self.prediction_data.prediction,
                "confidence": self.prediction_data.confidence,
            }),
        );
        fields.insert(
            "source_path".to_string(),
            serde_json::Value::String(self.source_path.clone()),
        );
        fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn class_index_maps_to_labels() {
        assert_eq!(Label::from_class_index(0), Some(Label::Truthful));
        assert_eq!(Label::from_class_index(1), Some(Label::Deceptive));
        assert_eq!(Label::from_class_index(2), None);
    }

    #[test]
    fn wire_names_match_response_format() {
        assert_eq!(Label::Truthful.wire_name(), "truth");
        assert_eq!(Label::Deceptive.wire_name(), "lie");
    }

    #[test]
    fn confidence_is_rounded_to_two_decimals() {
        let result = PredictionResult::new(Label::Deceptive, 0.8765);
        assert!((result.confidence() - 0.88).abs() < 1e-6);

        let result = PredictionResult::new(Label::Truthful, 0.5049);
        assert!((result.confidence() - 0.5).abs() < 1e-6);
    }

    #[test]
    fn confidence_is_clamped_into_unit_interval() {
        assert_eq!(round_confidence(1.2), 1.0);
        assert_eq!(round_confidence(-0.3), 0.0);
        assert_eq!(round_confidence(0.999), 1.0);
    }

    #[test]
    fn data_serializes_to_response_shape() {
        let result = PredictionResult::new(Label::Truthful, 0.75);
        let json = serde_json::to_value(result.data()).unwrap();
        assert_eq!(json["prediction"], "truth");
        assert_eq!(json["confidence"].as_f64(), Some(0.75));
    }

    #[test]
    fn record_fields_use_stored_names() {
        let result = PredictionResult::new(Label::Deceptive, 0.61);
        let record = PredictionRecord::new("users/42/clip1.aac", "42", &result);
        let fields = record.to_fields();

        assert_eq!(fields["user_id"], "42");
        assert_eq!(fields["source_path"], "users/42/clip1.aac");
        assert_eq!(fields["predictionData"]["prediction"], "lie");
        assert!(!fields.contains_key("timestamp"));
    }
}
