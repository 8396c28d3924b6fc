//! Typed endpoint calls.
//!
//! One method per backend operation, layered on [`Gateway`]. Browse reads
//! (`list_*`) degrade to empty lists; strict reads (`fetch_*`) and all
//! writes return [`GatewayError`].
//!
//! Request payloads are dedicated types so the wire shape of each call is
//! fixed at compile time. In particular the two ground-truth payloads share
//! no type-specific fields: an OCR payload cannot carry `class`, and a
//! Detection payload cannot carry `value`, `prefix`, `suffix`, or
//! `match_type`.

use gt_console_core::models::{
    Capture, CaptureItem, ClassRecord, ClassType, DetectionEntry, MappedClass, Model,
    ModelCatalog, Module, ModuleClassMapping, ModuleType, OcrEntry, Part, Variant,
};
use serde::Serialize;
use serde_json::{json, Value};

use crate::gateway::{Gateway, GatewayError};

// ═══════════════════════════════════════════════════════════════════════
// Payloads
// ═══════════════════════════════════════════════════════════════════════

/// Body of `POST /captures/create-by-variant-part-id`.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct NewCapture {
    pub variant_id: String,
    pub part_id: String,
    pub order: i64,
    pub capture_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_flag: Option<i64>,
}

/// Body of `POST /captures/add-entry-to-report-table`.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct NewCaptureItem {
    pub variant_id: String,
    pub part_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub module_id: Option<String>,
    pub regulation_requirement: String,
    pub drawing_requirement: String,
    pub item_index: i64,
    pub index: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order: Option<i64>,
    pub entry_type: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extraction_type: Option<String>,
}

/// Type-specific half of a module creation body.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(untagged)]
pub enum ModuleTypeFields {
    Ocr {
        match_type: String,
        value: String,
        prefix: String,
        suffix: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        detection_model_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        recognition_model_id: Option<String>,
    },
    Detection {
        class: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        detection_model_id: Option<String>,
    },
}

/// Body of `POST /modules`.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct NewModule {
    pub capture_id: String,
    pub order: i64,
    #[serde(rename = "type")]
    pub module_type: ModuleType,
    pub option_key: String,
    pub option_label: String,
    pub is_user_selectable: bool,
    pub master_key: String,
    #[serde(flatten)]
    pub fields: ModuleTypeFields,
}

/// Body of `POST /ocr-configs/ocr-gt`.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct OcrGtPayload {
    pub ocr_config_id: String,
    pub value: String,
    pub option_key: String,
    pub option_label: String,
    pub is_user_selectable: bool,
    pub match_type: String,
    pub prefix: String,
    pub suffix: String,
    pub master_key: String,
}

impl OcrGtPayload {
    pub fn new(ocr_config_id: &str, entry: &OcrEntry) -> Self {
        Self {
            ocr_config_id: ocr_config_id.to_string(),
            value: entry.value.clone(),
            option_key: entry.option_key.clone(),
            option_label: entry.option_label.clone(),
            is_user_selectable: entry.is_user_selectable,
            match_type: entry.match_type.clone(),
            prefix: entry.prefix.clone(),
            suffix: entry.suffix.clone(),
            master_key: entry.master_key.clone(),
        }
    }
}

/// Body of `POST /detection-configs/detection-class`.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DetectionGtPayload {
    pub detection_config_id: String,
    pub class: String,
    pub option_key: String,
    pub option_label: String,
    pub is_user_selectable: bool,
    pub master_option_keys: Vec<String>,
}

impl DetectionGtPayload {
    pub fn new(detection_config_id: &str, entry: &DetectionEntry) -> Self {
        Self {
            detection_config_id: detection_config_id.to_string(),
            class: entry.class_value.trim().to_string(),
            option_key: entry.option_key.clone(),
            option_label: entry.option_label.clone(),
            is_user_selectable: entry.is_user_selectable,
            master_option_keys: entry.master_option_keys.clone(),
        }
    }
}

/// How `POST /modules/{id}/classes` identifies the class.
#[derive(Debug, Clone, PartialEq)]
pub enum ClassSelector {
    /// Bind an existing registry class.
    Existing { class_id: String },
    /// Find-or-create by name server-side, with this type.
    New { name: String, class_type: ClassType },
}

impl ClassSelector {
    pub fn is_new(&self) -> bool {
        matches!(self, ClassSelector::New { .. })
    }

    fn to_body(&self, model_id: Option<&str>) -> Value {
        let mut body = match self {
            ClassSelector::Existing { class_id } => json!({ "class_id": class_id }),
            ClassSelector::New { name, class_type } => {
                json!({ "name": name, "type": class_type.as_str() })
            }
        };
        if let Some(model_id) = model_id {
            body["model_id"] = json!(model_id);
        }
        body
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Endpoints
// ═══════════════════════════════════════════════════════════════════════

impl Gateway {
    // ── Variants ──────────────────────────────────────────────────────

    pub async fn list_variants(&self) -> Vec<Variant> {
        self.list_or_empty("list variants", "/variants").await
    }

    pub async fn create_variant(&self, name: &str) -> Result<Variant, GatewayError> {
        self.post_record("create variant", "/variants", json!({ "variant_name": name }))
            .await
    }

    pub async fn delete_variant(&self, variant_id: &str) -> Result<(), GatewayError> {
        self.delete("delete variant", &format!("/variants/{}", variant_id))
            .await
    }

    // ── Parts ─────────────────────────────────────────────────────────

    pub async fn list_parts(&self, variant_id: &str) -> Vec<Part> {
        self.list_or_empty("list parts", &format!("/parts/variant/{}", variant_id))
            .await
    }

    pub async fn create_part(&self, variant_id: &str, name: &str) -> Result<Part, GatewayError> {
        self.post_record(
            "create part",
            "/parts",
            json!({ "variant_id": variant_id, "part_name": name }),
        )
        .await
    }

    pub async fn delete_part(&self, part_id: &str) -> Result<(), GatewayError> {
        self.delete("delete part", &format!("/parts/{}", part_id)).await
    }

    // ── Captures ──────────────────────────────────────────────────────

    fn captures_path(variant_id: &str, part_id: &str) -> String {
        format!("/captures/variant/{}/part/{}", variant_id, part_id)
    }

    pub async fn list_captures(&self, variant_id: &str, part_id: &str) -> Vec<Capture> {
        self.list_or_empty("list captures", &Self::captures_path(variant_id, part_id))
            .await
    }

    pub async fn fetch_captures(
        &self,
        variant_id: &str,
        part_id: &str,
    ) -> Result<Vec<Capture>, GatewayError> {
        self.fetch_list("list captures", &Self::captures_path(variant_id, part_id))
            .await
    }

    pub async fn create_capture(&self, capture: &NewCapture) -> Result<Capture, GatewayError> {
        self.post_record(
            "create capture",
            "/captures/create-by-variant-part-id",
            to_body(capture),
        )
        .await
    }

    pub async fn delete_capture(&self, capture_id: &str) -> Result<(), GatewayError> {
        self.delete("delete capture", &format!("/captures/{}", capture_id))
            .await
    }

    pub async fn list_capture_items(&self, capture_id: &str) -> Vec<CaptureItem> {
        self.list_or_empty("list capture items", &format!("/captures/{}/items", capture_id))
            .await
    }

    pub async fn create_capture_item(
        &self,
        item: &NewCaptureItem,
    ) -> Result<CaptureItem, GatewayError> {
        self.post_record(
            "create capture item",
            "/captures/add-entry-to-report-table",
            to_body(item),
        )
        .await
    }

    // ── Modules ───────────────────────────────────────────────────────

    pub async fn list_modules(&self, capture_id: &str) -> Vec<Module> {
        self.list_or_empty(
            "list modules",
            &format!("/modules/capture-id/{}", capture_id),
        )
        .await
    }

    pub async fn fetch_modules(&self, capture_id: &str) -> Result<Vec<Module>, GatewayError> {
        self.fetch_list(
            "list modules",
            &format!("/modules/capture-id/{}", capture_id),
        )
        .await
    }

    pub async fn create_module(&self, module: &NewModule) -> Result<Module, GatewayError> {
        self.post_record("create module", "/modules", to_body(module))
            .await
    }

    // ── Ground truth ──────────────────────────────────────────────────

    pub async fn add_ocr_entry(&self, payload: &OcrGtPayload) -> Result<Value, GatewayError> {
        self.post("add OCR ground truth", "/ocr-configs/ocr-gt", to_body(payload))
            .await
    }

    pub async fn add_detection_entry(
        &self,
        payload: &DetectionGtPayload,
    ) -> Result<Value, GatewayError> {
        self.post(
            "add detection ground truth",
            "/detection-configs/detection-class",
            to_body(payload),
        )
        .await
    }

    pub async fn fetch_ocr_ground_truth(
        &self,
        ocr_config_id: &str,
    ) -> Result<Vec<OcrEntry>, GatewayError> {
        self.fetch_list_nested(
            "fetch OCR ground truth",
            &format!("/ocr-configs/{}/ground-truth", ocr_config_id),
            Some("ground_truths"),
        )
        .await
    }

    pub async fn fetch_detection_ground_truth(
        &self,
        detection_config_id: &str,
    ) -> Result<Vec<DetectionEntry>, GatewayError> {
        self.fetch_list_nested(
            "fetch detection ground truth",
            &format!("/detection-configs/{}/ground-truth", detection_config_id),
            Some("ground_truths"),
        )
        .await
    }

    // ── Classes & models ──────────────────────────────────────────────

    /// The global class registry. Strict: class resolution cannot proceed
    /// without it.
    pub async fn fetch_classes(&self) -> Result<Vec<ClassRecord>, GatewayError> {
        self.fetch_list("list classes", "/classes").await
    }

    pub async fn list_module_classes(&self, module_id: &str) -> Vec<MappedClass> {
        self.list_or_empty(
            "list module classes",
            &format!("/modules/{}/classes", module_id),
        )
        .await
    }

    pub async fn map_class_to_module(
        &self,
        module_id: &str,
        selector: &ClassSelector,
        model_id: Option<&str>,
    ) -> Result<ModuleClassMapping, GatewayError> {
        let mut mapping: ModuleClassMapping = self
            .post_record(
                "map class to module",
                &format!("/modules/{}/classes", module_id),
                selector.to_body(model_id),
            )
            .await?;
        if mapping.module_id.is_empty() {
            mapping.module_id = module_id.to_string();
        }
        Ok(mapping)
    }

    pub async fn map_model_to_class(
        &self,
        model_id: &str,
        class_id: &str,
    ) -> Result<Value, GatewayError> {
        self.post(
            "map model to class",
            "/model-class-mapper",
            json!({ "model_id": model_id, "class_id": class_id }),
        )
        .await
    }

    pub async fn list_models(&self, catalog: ModelCatalog) -> Vec<Model> {
        self.list_or_empty("list models", catalog.path()).await
    }
}

/// Serialize a payload struct. These types contain only strings, numbers,
/// booleans and string lists, so serialization cannot fail.
fn to_body<T: Serialize>(payload: &T) -> Value {
    serde_json::to_value(payload).unwrap_or(Value::Null)
}
