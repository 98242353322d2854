//! Structured patient data handed to the prompt
//!
//! Parsing an external medical record is done by a [`RecordParser`]; the core
//! only sees the resulting attribute list. Numbers are always rendered with
//! exactly two decimals.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use crate::config::RecordFormat;
use crate::errors::{RagError, Result};

/// Rendered when a record yields no attributes
pub const EMPTY_RECORD_TEXT: &str = "(No available patient data)";

/// Attribute value kinds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Number(f64),
    Flag(bool),
    Text(String),
}

impl AttributeValue {
    pub fn render(&self) -> String {
        match self {
            AttributeValue::Number(n) => format_value(*n),
            AttributeValue::Flag(b) => b.to_string(),
            AttributeValue::Text(s) => s.clone(),
        }
    }
}

/// One labelled measurement or fact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatientAttribute {
    pub label: String,
    pub value: AttributeValue,
    #[serde(default)]
    pub unit: Option<String>,
}

impl PatientAttribute {
    pub fn render(&self) -> String {
        match self.unit.as_deref().filter(|u| !u.is_empty()) {
            Some(unit) => format!("{}: {} {}", self.label, self.value.render(), unit),
            None => format!("{}: {}", self.label, self.value.render()),
        }
    }
}

/// Measurements taken together, e.g. one FHIR Observation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservationGroup {
    /// `(Patient: <id>, <time>)`
    pub header: String,
    pub attributes: Vec<PatientAttribute>,
}

impl ObservationGroup {
    pub fn render(&self) -> String {
        let mut lines = vec![self.header.clone()];
        lines.extend(self.attributes.iter().map(|a| format!("- {}", a.render())));
        lines.join("\n")
    }
}

/// Attributes for one patient, loose ones first, then grouped observations
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PatientRecord {
    pub attributes: Vec<PatientAttribute>,
    #[serde(default)]
    pub observations: Vec<ObservationGroup>,
}

impl PatientRecord {
    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty() && self.observations.is_empty()
    }

    /// One attribute per line; observations separated by a blank line
    pub fn render(&self) -> String {
        if self.is_empty() {
            return EMPTY_RECORD_TEXT.to_string();
        }
        let mut blocks = Vec::new();
        if !self.attributes.is_empty() {
            blocks.push(
                self.attributes
                    .iter()
                    .map(PatientAttribute::render)
                    .collect::<Vec<_>>()
                    .join("\n"),
            );
        }
        blocks.extend(self.observations.iter().map(ObservationGroup::render));
        blocks.join("\n\n")
    }
}

/// Format a numeric value to two decimal places
pub fn format_value(value: f64) -> String {
    format!("{:.2}", value)
}

/// Turns an external structured record into a flat attribute list
pub trait RecordParser: Send + Sync {
    fn parse(&self, record: &Value) -> Result<PatientRecord>;
}

/// Flattens arbitrary JSON into dotted-path attributes
///
/// An object of the form `{"value": <number>, "unit": "<text>"}` is treated
/// as a single quantity.
#[derive(Debug, Clone, Default)]
pub struct FlatJsonParser;

impl FlatJsonParser {
    pub fn new() -> Self {
        Self
    }

    fn flatten(&self, prefix: &str, value: &Value, out: &mut Vec<PatientAttribute>) {
        match value {
            Value::Object(map) => {
                if let Some(quantity) = as_quantity(prefix, map) {
                    out.push(quantity);
                    return;
                }
                for (key, child) in map {
                    let label = if prefix.is_empty() {
                        key.clone()
                    } else {
                        format!("{}.{}", prefix, key)
                    };
                    self.flatten(&label, child, out);
                }
            }
            Value::Array(items) => {
                for (i, child) in items.iter().enumerate() {
                    self.flatten(&format!("{}[{}]", prefix, i), child, out);
                }
            }
            Value::Number(n) => {
                if let Some(n) = n.as_f64() {
                    out.push(attribute(prefix, AttributeValue::Number(n), None));
                }
            }
            Value::Bool(b) => out.push(attribute(prefix, AttributeValue::Flag(*b), None)),
            Value::String(s) => {
                if !s.trim().is_empty() {
                    out.push(attribute(prefix, AttributeValue::Text(s.trim().to_string()), None));
                }
            }
            Value::Null => {}
        }
    }
}

impl RecordParser for FlatJsonParser {
    fn parse(&self, record: &Value) -> Result<PatientRecord> {
        if !matches!(record, Value::Object(_) | Value::Array(_) | Value::Null) {
            return Err(RagError::Validation(
                "structured_patient_data must be a JSON object or array".to_string(),
            ));
        }
        let mut attributes = Vec::new();
        self.flatten("", record, &mut attributes);
        Ok(PatientRecord {
            attributes,
            observations: Vec::new(),
        })
    }
}

/// Reads a FHIR `Bundle`: the Patient identity plus one group per Observation
///
/// Each Observation component becomes `<display>: <value> <unit>`. An
/// Observation without components contributes its own code and
/// `valueQuantity`.
#[derive(Debug, Clone, Default)]
pub struct FhirBundleParser;

impl FhirBundleParser {
    pub fn new() -> Self {
        Self
    }

    pub fn is_bundle(record: &Value) -> bool {
        record.get("resourceType").and_then(Value::as_str) == Some("Bundle")
    }

    fn resources<'a>(bundle: &'a Value, kind: &'a str) -> impl Iterator<Item = &'a Value> + 'a {
        bundle
            .get("entry")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(|entry| entry.get("resource"))
            .filter(move |res| res.get("resourceType").and_then(Value::as_str) == Some(kind))
    }

    /// `identifier[0].value`, falling back to the resource id
    fn patient_id(bundle: &Value) -> String {
        Self::resources(bundle, "Patient")
            .next()
            .and_then(|patient| {
                patient
                    .pointer("/identifier/0/value")
                    .and_then(scalar_text)
                    .or_else(|| patient.get("id").and_then(scalar_text))
            })
            .unwrap_or_else(|| "Unknown".to_string())
    }

    fn measurement(coded: &Value) -> PatientAttribute {
        let coding = coded.pointer("/code/coding/0");
        let label = coding
            .and_then(|c| c.get("display").or_else(|| c.get("code")))
            .and_then(scalar_text)
            .unwrap_or_else(|| "Unknown".to_string());

        let quantity = coded.get("valueQuantity");
        let value = match quantity.and_then(|q| q.get("value")) {
            Some(Value::Number(n)) => n
                .as_f64()
                .map(AttributeValue::Number)
                .unwrap_or_else(|| AttributeValue::Text(n.to_string())),
            Some(other) => scalar_text(other)
                .map(AttributeValue::Text)
                .unwrap_or_else(|| AttributeValue::Text("N/A".to_string())),
            None => AttributeValue::Text("N/A".to_string()),
        };
        let unit = quantity
            .and_then(|q| q.get("unit"))
            .and_then(Value::as_str)
            .map(str::to_string);

        PatientAttribute { label, value, unit }
    }
}

impl RecordParser for FhirBundleParser {
    fn parse(&self, record: &Value) -> Result<PatientRecord> {
        if !Self::is_bundle(record) {
            return Err(RagError::Validation(
                "structured_patient_data must be a FHIR Bundle".to_string(),
            ));
        }

        let patient_id = Self::patient_id(record);
        let observations = Self::resources(record, "Observation")
            .map(|observation| {
                let time = observation
                    .get("effectiveDateTime")
                    .and_then(Value::as_str)
                    .unwrap_or("N/A");
                let attributes = match observation.get("component").and_then(Value::as_array) {
                    Some(components) if !components.is_empty() => {
                        components.iter().map(Self::measurement).collect()
                    }
                    _ if observation.get("valueQuantity").is_some() => {
                        vec![Self::measurement(observation)]
                    }
                    _ => Vec::new(),
                };
                ObservationGroup {
                    header: format!("(Patient: {}, {})", patient_id, time),
                    attributes,
                }
            })
            .collect();

        Ok(PatientRecord {
            attributes: Vec::new(),
            observations,
        })
    }
}

/// FHIR bundles go to [`FhirBundleParser`], anything else is flattened
#[derive(Debug, Clone, Default)]
pub struct AutoRecordParser {
    fhir: FhirBundleParser,
    flat: FlatJsonParser,
}

impl AutoRecordParser {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RecordParser for AutoRecordParser {
    fn parse(&self, record: &Value) -> Result<PatientRecord> {
        if FhirBundleParser::is_bundle(record) {
            self.fhir.parse(record)
        } else {
            self.flat.parse(record)
        }
    }
}

pub fn parser_for(format: RecordFormat) -> Arc<dyn RecordParser> {
    match format {
        RecordFormat::Auto => Arc::new(AutoRecordParser::new()),
        RecordFormat::Flat => Arc::new(FlatJsonParser::new()),
        RecordFormat::Fhir => Arc::new(FhirBundleParser::new()),
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn attribute(label: &str, value: AttributeValue, unit: Option<String>) -> PatientAttribute {
    let label = if label.is_empty() { "value" } else { label };
    PatientAttribute {
        label: label.to_string(),
        value,
        unit,
    }
}

fn as_quantity(prefix: &str, map: &serde_json::Map<String, Value>) -> Option<PatientAttribute> {
    let value = map.get("value")?.as_f64()?;
    let unit = map.get("unit").and_then(Value::as_str).map(str::to_string);
    let only_quantity_keys = map.keys().all(|k| k == "value" || k == "unit");
    if !only_quantity_keys {
        return None;
    }
    Some(attribute(prefix, AttributeValue::Number(value), unit))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_format_value_two_decimals() {
        assert_eq!(format_value(72.0), "72.00");
        assert_eq!(format_value(36.666), "36.67");
        assert_eq!(format_value(-1.5), "-1.50");
    }

    #[test]
    fn test_flatten_nested_record() {
        let record = json!({
            "patient_id": "p-001",
            "vitals": {
                "heart_rate": {"value": 72, "unit": "beats/min"},
                "systolic": 128.456
            }
        });
        let parsed = FlatJsonParser::new().parse(&record).unwrap();
        let text = parsed.render();
        assert!(text.contains("patient_id: p-001"));
        assert!(text.contains("vitals.heart_rate: 72.00 beats/min"));
        assert!(text.contains("vitals.systolic: 128.46"));
    }

    #[test]
    fn test_flatten_arrays_and_flags() {
        let record = json!({"readings": [1, 2.5], "fasting": true, "note": null});
        let parsed = FlatJsonParser::new().parse(&record).unwrap();
        assert_eq!(parsed.attributes.len(), 3);
        // object keys iterate in sorted order
        assert_eq!(parsed.attributes[0].render(), "fasting: true");
        assert_eq!(parsed.attributes[1].render(), "readings[0]: 1.00");
        assert_eq!(parsed.attributes[2].render(), "readings[1]: 2.50");
    }

    #[test]
    fn test_empty_record_placeholder() {
        let parsed = FlatJsonParser::new().parse(&json!({})).unwrap();
        assert_eq!(parsed.render(), EMPTY_RECORD_TEXT);
    }

    #[test]
    fn test_scalar_record_rejected() {
        assert!(FlatJsonParser::new().parse(&json!(42)).is_err());
    }

    fn vitals_bundle() -> Value {
        json!({
            "resourceType": "Bundle",
            "entry": [
                {"resource": {
                    "resourceType": "Patient",
                    "id": "internal-7",
                    "identifier": [{"value": "P-1001"}]
                }},
                {"resource": {
                    "resourceType": "Observation",
                    "effectiveDateTime": "2024-05-01T08:30:00Z",
                    "component": [
                        {"code": {"coding": [{"code": "8480-6", "display": "Systolic blood pressure"}]},
                         "valueQuantity": {"value": 120, "unit": "mmHg"}},
                        {"code": {"coding": [{"code": "8462-4", "display": "Diastolic blood pressure"}]},
                         "valueQuantity": {"value": 79.5, "unit": "mmHg"}}
                    ]
                }},
                {"resource": {
                    "resourceType": "Observation",
                    "effectiveDateTime": "2024-05-02T09:00:00Z",
                    "component": [
                        {"code": {"coding": [{"code": "8867-4"}]},
                         "valueQuantity": {"value": 72, "unit": "beats/min"}}
                    ]
                }}
            ]
        })
    }

    #[test]
    fn test_fhir_bundle_groups_observations() {
        let record = FhirBundleParser::new().parse(&vitals_bundle()).unwrap();
        assert!(record.attributes.is_empty());
        assert_eq!(record.observations.len(), 2);
        assert_eq!(
            record.render(),
            "(Patient: P-1001, 2024-05-01T08:30:00Z)\n\
             - Systolic blood pressure: 120.00 mmHg\n\
             - Diastolic blood pressure: 79.50 mmHg\n\
             \n\
             (Patient: P-1001, 2024-05-02T09:00:00Z)\n\
             - 8867-4: 72.00 beats/min"
        );
    }

    #[test]
    fn test_fhir_patient_id_falls_back_to_resource_id() {
        let bundle = json!({
            "resourceType": "Bundle",
            "entry": [
                {"resource": {"resourceType": "Patient", "id": "internal-7"}},
                {"resource": {
                    "resourceType": "Observation",
                    "code": {"coding": [{"display": "Body weight"}]},
                    "valueQuantity": {"value": 70.5, "unit": "kg"}
                }}
            ]
        });
        let record = FhirBundleParser::new().parse(&bundle).unwrap();
        assert_eq!(record.observations[0].header, "(Patient: internal-7, N/A)");
        assert_eq!(record.observations[0].attributes[0].render(), "Body weight: 70.50 kg");
    }

    #[test]
    fn test_fhir_parser_rejects_non_bundle() {
        let err = FhirBundleParser::new().parse(&json!({"systolic": 120})).unwrap_err();
        assert!(matches!(err, RagError::Validation(_)));
    }

    #[test]
    fn test_auto_parser_dispatches_on_resource_type() {
        let auto = AutoRecordParser::new();
        let fhir = auto.parse(&vitals_bundle()).unwrap();
        assert_eq!(fhir.observations.len(), 2);

        let flat = auto.parse(&json!({"systolic": {"value": 141, "unit": "mmHg"}})).unwrap();
        assert!(flat.observations.is_empty());
        assert_eq!(flat.render(), "systolic: 141.00 mmHg");
    }

    #[test]
    fn test_parser_for_format() {
        let bundle = vitals_bundle();
        assert_eq!(parser_for(RecordFormat::Fhir).parse(&bundle).unwrap().observations.len(), 2);
        // flattening a bundle yields no observation groups
        assert!(parser_for(RecordFormat::Flat).parse(&bundle).unwrap().observations.is_empty());
        assert!(parser_for(RecordFormat::Fhir).parse(&json!({"a": 1})).is_err());
    }
}
