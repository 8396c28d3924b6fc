//! Annotation taxonomy data model.
//!
//! Variant → Part → Capture → Module → Ground-Truth Entry, plus the global
//! Class registry and the two mapping relations (Module↔Class, Model↔Class).
//!
//! Every record here is decoded from backend JSON, so deserialization is
//! deliberately forgiving: identifiers may arrive as strings or numbers,
//! missing text fields become empty strings, and flags accept booleans or
//! `0`/`1`. Serialization keeps the backend's snake_case field names so a
//! record round-trips into the same wire shape it came from.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lenient field decoders shared by all records.
pub mod wire {
    use serde::{de, Deserialize, Deserializer};
    use serde_json::Value;

    /// A required identifier: string or number.
    pub fn id<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
        match Value::deserialize(d)? {
            Value::String(s) => Ok(s),
            Value::Number(n) => Ok(n.to_string()),
            other => Err(de::Error::custom(format!(
                "expected string or number id, found {}",
                other
            ))),
        }
    }

    /// An optional identifier. `null` and `""` both mean absent.
    pub fn opt_id<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
        match Option::<Value>::deserialize(d)? {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
            Some(Value::String(s)) => Ok(Some(s)),
            Some(Value::Number(n)) => Ok(Some(n.to_string())),
            Some(other) => Err(de::Error::custom(format!(
                "expected string or number id, found {}",
                other
            ))),
        }
    }

    /// Free text. `null` becomes `""`, numbers are stringified.
    pub fn text<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
        match Option::<Value>::deserialize(d)? {
            None | Some(Value::Null) => Ok(String::new()),
            Some(Value::String(s)) => Ok(s),
            Some(Value::Number(n)) => Ok(n.to_string()),
            Some(Value::Bool(b)) => Ok(b.to_string()),
            Some(other) => Err(de::Error::custom(format!("expected text, found {}", other))),
        }
    }

    /// An integer that may be sent as a number or a numeric string.
    pub fn int<'de, D: Deserializer<'de>>(d: D) -> Result<i64, D::Error> {
        match Option::<Value>::deserialize(d)? {
            None | Some(Value::Null) => Ok(0),
            Some(Value::Number(n)) => n
                .as_i64()
                .or_else(|| n.as_f64().map(|f| f as i64))
                .ok_or_else(|| de::Error::custom(format!("integer out of range: {}", n))),
            Some(Value::String(s)) => s
                .trim()
                .parse::<i64>()
                .map_err(|_| de::Error::custom(format!("expected integer, found \"{}\"", s))),
            Some(other) => Err(de::Error::custom(format!(
                "expected integer, found {}",
                other
            ))),
        }
    }

    /// Like [`int`] but `null`/absent stays `None`.
    pub fn opt_int<'de, D: Deserializer<'de>>(d: D) -> Result<Option<i64>, D::Error> {
        match Option::<Value>::deserialize(d)? {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Number(n)) => Ok(n.as_i64()),
            Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
            Some(Value::String(s)) => s
                .trim()
                .parse::<i64>()
                .map(Some)
                .map_err(|_| de::Error::custom(format!("expected integer, found \"{}\"", s))),
            Some(other) => Err(de::Error::custom(format!(
                "expected integer, found {}",
                other
            ))),
        }
    }

    /// A boolean flag: `true`/`false`, `1`/`0`, or the strings thereof.
    pub fn flag<'de, D: Deserializer<'de>>(d: D) -> Result<bool, D::Error> {
        match Option::<Value>::deserialize(d)? {
            None | Some(Value::Null) => Ok(false),
            Some(Value::Bool(b)) => Ok(b),
            Some(Value::Number(n)) => Ok(n.as_i64().unwrap_or(0) != 0),
            Some(Value::String(s)) => Ok(matches!(
                s.trim().to_ascii_lowercase().as_str(),
                "true" | "1" | "yes"
            )),
            Some(other) => Err(de::Error::custom(format!("expected flag, found {}", other))),
        }
    }

    /// A list of keys: a JSON array of strings, or one comma-separated string.
    pub fn key_list<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<String>, D::Error> {
        match Option::<Value>::deserialize(d)? {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(Value::Array(items)) => Ok(items
                .into_iter()
                .filter_map(|v| match v {
                    Value::String(s) => Some(s),
                    Value::Number(n) => Some(n.to_string()),
                    _ => None,
                })
                .collect()),
            Some(Value::String(s)) => Ok(s
                .split(',')
                .map(str::trim)
                .filter(|k| !k.is_empty())
                .map(str::to_string)
                .collect()),
            Some(other) => Err(de::Error::custom(format!(
                "expected key list, found {}",
                other
            ))),
        }
    }
}

fn selectable_default() -> bool {
    true
}

// ═══════════════════════════════════════════════════════════════════════
// Hierarchy
// ═══════════════════════════════════════════════════════════════════════

/// Root of the hierarchy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variant {
    #[serde(deserialize_with = "wire::id")]
    pub id: String,
    #[serde(rename = "variant_name", default, deserialize_with = "wire::text")]
    pub name: String,
}

/// A named sub-component under a [`Variant`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Part {
    #[serde(deserialize_with = "wire::id")]
    pub id: String,
    #[serde(default, deserialize_with = "wire::text")]
    pub variant_id: String,
    #[serde(rename = "part_name", default, deserialize_with = "wire::text")]
    pub name: String,
}

/// An ordered unit of evidence collection under a [`Part`].
///
/// `order` is 1-based among siblings. It is assigned by the client from the
/// sibling count and is not guaranteed unique when creators race.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Capture {
    #[serde(deserialize_with = "wire::id")]
    pub id: String,
    #[serde(default, deserialize_with = "wire::text")]
    pub variant_id: String,
    #[serde(default, deserialize_with = "wire::text")]
    pub part_id: String,
    #[serde(default, deserialize_with = "wire::int")]
    pub order: i64,
    #[serde(rename = "capture_name", default, deserialize_with = "wire::text")]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, deserialize_with = "wire::int")]
    pub image_flag: i64,
}

/// One row of the report table: a regulation/drawing requirement under a
/// Part, optionally backed by a Module's ground truth.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureItem {
    #[serde(default, deserialize_with = "wire::opt_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "wire::opt_id", skip_serializing_if = "Option::is_none")]
    pub capture_id: Option<String>,
    #[serde(default, deserialize_with = "wire::opt_id", skip_serializing_if = "Option::is_none")]
    pub variant_id: Option<String>,
    #[serde(default, deserialize_with = "wire::opt_id", skip_serializing_if = "Option::is_none")]
    pub part_id: Option<String>,
    #[serde(default, deserialize_with = "wire::opt_id", skip_serializing_if = "Option::is_none")]
    pub module_id: Option<String>,
    #[serde(default, deserialize_with = "wire::opt_int", skip_serializing_if = "Option::is_none")]
    pub index: Option<i64>,
    #[serde(default, deserialize_with = "wire::opt_int", skip_serializing_if = "Option::is_none")]
    pub item_index: Option<i64>,
    #[serde(default, deserialize_with = "wire::opt_int", skip_serializing_if = "Option::is_none")]
    pub order: Option<i64>,
    #[serde(default, deserialize_with = "wire::text")]
    pub regulation_requirement: String,
    #[serde(default, deserialize_with = "wire::text")]
    pub drawing_requirement: String,
    #[serde(default, deserialize_with = "wire::int")]
    pub entry_type: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extraction_type: Option<String>,
}

impl CaptureItem {
    /// Row position, whichever of `index`/`item_index` the backend sent.
    pub fn position(&self) -> Option<i64> {
        self.index.or(self.item_index)
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Modules & ground truth
// ═══════════════════════════════════════════════════════════════════════

/// The closed set of module kinds. Fixed at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModuleType {
    #[serde(rename = "OCR", alias = "ocr", alias = "Ocr")]
    Ocr,
    #[serde(rename = "Detection", alias = "detection", alias = "DETECTION")]
    Detection,
}

impl ModuleType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModuleType::Ocr => "OCR",
            ModuleType::Detection => "Detection",
        }
    }
}

impl fmt::Display for ModuleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModuleType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ocr" => Ok(ModuleType::Ocr),
            "detection" => Ok(ModuleType::Detection),
            other => Err(format!(
                "unknown module type '{}': expected ocr or detection",
                other
            )),
        }
    }
}

/// A typed annotation configuration under a [`Capture`].
///
/// Ground truth is not attached to the module id itself but to a
/// type-specific sub-resource: `ocr_config_id` for OCR modules,
/// `detection_config_id` for Detection modules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Module {
    #[serde(deserialize_with = "wire::id")]
    pub id: String,
    #[serde(default, deserialize_with = "wire::text")]
    pub capture_id: String,
    #[serde(default, deserialize_with = "wire::int")]
    pub order: i64,
    #[serde(rename = "type")]
    pub module_type: ModuleType,
    #[serde(default, deserialize_with = "wire::opt_id", skip_serializing_if = "Option::is_none")]
    pub detection_model_id: Option<String>,
    #[serde(default, deserialize_with = "wire::opt_id", skip_serializing_if = "Option::is_none")]
    pub recognition_model_id: Option<String>,
    #[serde(default, deserialize_with = "wire::opt_id", skip_serializing_if = "Option::is_none")]
    pub ocr_config_id: Option<String>,
    #[serde(default, deserialize_with = "wire::opt_id", skip_serializing_if = "Option::is_none")]
    pub detection_config_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detection_model_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recognition_model_name: Option<String>,
}

impl Module {
    /// The sub-resource id ground truth hangs off, chosen by module type.
    pub fn gt_config_id(&self) -> Option<&str> {
        match self.module_type {
            ModuleType::Ocr => self.ocr_config_id.as_deref(),
            ModuleType::Detection => self.detection_config_id.as_deref(),
        }
    }
}

/// Expected-value record for an OCR module.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrEntry {
    #[serde(default, deserialize_with = "wire::text")]
    pub value: String,
    #[serde(default, deserialize_with = "wire::text")]
    pub option_key: String,
    #[serde(default, deserialize_with = "wire::text")]
    pub option_label: String,
    #[serde(default, deserialize_with = "wire::text")]
    pub match_type: String,
    #[serde(default, deserialize_with = "wire::text")]
    pub prefix: String,
    #[serde(default, deserialize_with = "wire::text")]
    pub suffix: String,
    #[serde(default, deserialize_with = "wire::text")]
    pub master_key: String,
    #[serde(default = "selectable_default", deserialize_with = "wire::flag")]
    pub is_user_selectable: bool,
}

impl Default for OcrEntry {
    fn default() -> Self {
        Self {
            value: String::new(),
            option_key: String::new(),
            option_label: String::new(),
            match_type: "exact".to_string(),
            prefix: String::new(),
            suffix: String::new(),
            master_key: String::new(),
            is_user_selectable: true,
        }
    }
}

/// Expected-value record for a Detection module.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionEntry {
    #[serde(rename = "class", default, deserialize_with = "wire::text")]
    pub class_value: String,
    /// Some backends echo the resolved class name alongside `class`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class_name: Option<String>,
    #[serde(default, deserialize_with = "wire::text")]
    pub option_key: String,
    #[serde(default, deserialize_with = "wire::text")]
    pub option_label: String,
    #[serde(default, deserialize_with = "wire::key_list")]
    pub master_option_keys: Vec<String>,
    #[serde(default = "selectable_default", deserialize_with = "wire::flag")]
    pub is_user_selectable: bool,
}

impl Default for DetectionEntry {
    fn default() -> Self {
        Self {
            class_value: String::new(),
            class_name: None,
            option_key: String::new(),
            option_label: String::new(),
            master_option_keys: Vec::new(),
            is_user_selectable: true,
        }
    }
}

impl DetectionEntry {
    pub fn class_label(&self) -> &str {
        if self.class_value.is_empty() {
            self.class_name.as_deref().unwrap_or("")
        } else {
            &self.class_value
        }
    }
}

/// A ground-truth entry, shaped by its module's type.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum GroundTruth {
    Ocr(OcrEntry),
    Detection(DetectionEntry),
}

impl GroundTruth {
    pub fn module_type(&self) -> ModuleType {
        match self {
            GroundTruth::Ocr(_) => ModuleType::Ocr,
            GroundTruth::Detection(_) => ModuleType::Detection,
        }
    }

    /// Short label shown next to a module in reports: the OCR value, or the
    /// Detection option label. `None` when blank.
    pub fn chip(&self) -> Option<&str> {
        let label = match self {
            GroundTruth::Ocr(e) => e.value.as_str(),
            GroundTruth::Detection(e) => e.option_label.as_str(),
        };
        (!label.trim().is_empty()).then_some(label)
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Classes & models
// ═══════════════════════════════════════════════════════════════════════

/// Category of a registry [`ClassRecord`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", try_from = "String")]
pub enum ClassType {
    Text,
    Detection,
    Ocr,
}

impl ClassType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClassType::Text => "text",
            ClassType::Detection => "detection",
            ClassType::Ocr => "ocr",
        }
    }
}

impl fmt::Display for ClassType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ClassType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(ClassType::Text),
            "detection" => Ok(ClassType::Detection),
            "ocr" => Ok(ClassType::Ocr),
            other => Err(format!(
                "unknown class type '{}': expected text, detection, or ocr",
                other
            )),
        }
    }
}

impl TryFrom<String> for ClassType {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// An entry of the global class registry (`GET /classes`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassRecord {
    #[serde(deserialize_with = "wire::id")]
    pub id: String,
    #[serde(default, deserialize_with = "wire::text")]
    pub name: String,
    #[serde(rename = "type")]
    pub class_type: ClassType,
}

/// A class as listed under a module (`GET /modules/{id}/classes`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappedClass {
    #[serde(deserialize_with = "wire::id")]
    pub class_id: String,
    #[serde(default, deserialize_with = "wire::text")]
    pub class_name: String,
    pub class_type: ClassType,
}

/// Result of binding a class to a module.
///
/// `already_existed` is reported verbatim from the backend: `true` means the
/// Module↔Class row was already present and nothing changed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleClassMapping {
    #[serde(default, deserialize_with = "wire::text")]
    pub module_id: String,
    #[serde(deserialize_with = "wire::id")]
    pub class_id: String,
    #[serde(default, deserialize_with = "wire::text")]
    pub class_name: String,
    pub class_type: ClassType,
    #[serde(default, deserialize_with = "wire::flag")]
    pub already_existed: bool,
}

/// Records that a model is known to produce a class.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModelClassLink {
    #[serde(deserialize_with = "wire::id")]
    pub model_id: String,
    #[serde(deserialize_with = "wire::id")]
    pub class_id: String,
}

/// An external detection/recognition model from one of the catalogs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Model {
    #[serde(deserialize_with = "wire::id")]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_name: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

impl Model {
    pub fn display_name(&self) -> &str {
        self.name
            .as_deref()
            .or(self.model_name.as_deref())
            .unwrap_or("(unnamed)")
    }
}

/// The four model catalog endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelCatalog {
    All,
    OcrDetection,
    OcrRecognition,
    Detection,
}

impl ModelCatalog {
    pub fn path(&self) -> &'static str {
        match self {
            ModelCatalog::All => "/models",
            ModelCatalog::OcrDetection => "/models/ocr-detection",
            ModelCatalog::OcrRecognition => "/models/ocr-recognition",
            ModelCatalog::Detection => "/models/detection",
        }
    }
}

impl FromStr for ModelCatalog {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "all" => Ok(ModelCatalog::All),
            "ocr-detection" => Ok(ModelCatalog::OcrDetection),
            "ocr-recognition" => Ok(ModelCatalog::OcrRecognition),
            "detection" => Ok(ModelCatalog::Detection),
            other => Err(format!(
                "unknown model catalog '{}': expected all, ocr-detection, ocr-recognition, or detection",
                other
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_numeric_ids_decode_as_strings() {
        let part: Part =
            serde_json::from_value(json!({"id": 42, "variant_id": 7, "part_name": "Door"}))
                .unwrap();
        assert_eq!(part.id, "42");
        assert_eq!(part.variant_id, "7");
        assert_eq!(part.name, "Door");
    }

    #[test]
    fn test_module_type_accepts_wire_spellings() {
        let m: Module = serde_json::from_value(json!({
            "id": "m1", "capture_id": "c1", "order": "2", "type": "OCR",
            "ocr_config_id": "oc1", "detection_model_id": ""
        }))
        .unwrap();
        assert_eq!(m.module_type, ModuleType::Ocr);
        assert_eq!(m.order, 2);
        assert_eq!(m.gt_config_id(), Some("oc1"));
        assert_eq!(m.detection_model_id, None);

        let d: Module =
            serde_json::from_value(json!({"id": "m2", "type": "detection"})).unwrap();
        assert_eq!(d.module_type, ModuleType::Detection);
        assert_eq!(d.gt_config_id(), None);
    }

    #[test]
    fn test_class_type_is_case_insensitive() {
        let c: ClassRecord =
            serde_json::from_value(json!({"id": "c1", "name": "ocr", "type": "OCR"})).unwrap();
        assert_eq!(c.class_type, ClassType::Ocr);
        assert_eq!(serde_json::to_value(c.class_type).unwrap(), json!("ocr"));
        assert!("widget".parse::<ClassType>().is_err());
    }

    #[test]
    fn test_flags_accept_numbers_and_strings() {
        let m: ModuleClassMapping = serde_json::from_value(json!({
            "class_id": 9, "class_name": "Dustbin", "class_type": "detection", "already_existed": 1
        }))
        .unwrap();
        assert!(m.already_existed);
        assert_eq!(m.class_id, "9");

        let e: DetectionEntry = serde_json::from_value(json!({
            "class": "Dustbin", "is_user_selectable": "false", "master_option_keys": "a, b"
        }))
        .unwrap();
        assert!(!e.is_user_selectable);
        assert_eq!(e.master_option_keys, vec!["a", "b"]);
    }

    #[test]
    fn test_chip_labels_follow_module_type() {
        let ocr = GroundTruth::Ocr(OcrEntry {
            value: "ABC123".into(),
            option_label: "ignored".into(),
            ..Default::default()
        });
        assert_eq!(ocr.chip(), Some("ABC123"));

        let det = GroundTruth::Detection(DetectionEntry {
            class_value: "Dustbin".into(),
            option_label: "".into(),
            ..Default::default()
        });
        assert_eq!(det.chip(), None);
    }

    #[test]
    fn test_detection_class_label_falls_back_to_class_name() {
        let e: DetectionEntry =
            serde_json::from_value(json!({"class_name": "Logo"})).unwrap();
        assert_eq!(e.class_label(), "Logo");
    }
}
