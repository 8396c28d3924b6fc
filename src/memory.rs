//! In-process [`Transport`] implementing the backend's REST contract.
//!
//! Used by tests and examples to exercise the console without a network.
//! Holds all entities in memory behind `std::sync::Mutex`, answers with the
//! same (deliberately mixed) envelopes the real backend uses, and enforces
//! the server-side guarantees the console relies on: find-or-create classes
//! by case-insensitive name, idempotent Module↔Class and Model↔Class rows.
//!
//! Fault injection:
//! - [`InMemoryBackend::add_latency`] holds responses for a path prefix.
//!   The response is computed *before* the delay, so concurrent readers
//!   observe the same snapshot.
//! - [`InMemoryBackend::fail_path`] answers a path prefix with an error status.
//! - [`InMemoryBackend::fail_transport`] makes a path prefix unreachable.
//!
//! Every request is recorded and available from [`InMemoryBackend::requests`].

use async_trait::async_trait;
use gt_console_core::models::{
    Capture, CaptureItem, ClassRecord, ClassType, DetectionEntry, MappedClass, Model,
    ModelCatalog, ModelClassLink, Module, ModuleType, OcrEntry, Part, Variant,
};
use gt_console_core::transport::{ApiRequest, ApiResponse, Method, Transport, TransportError};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use uuid::Uuid;

#[derive(Default)]
struct State {
    variants: Vec<Variant>,
    parts: Vec<Part>,
    captures: Vec<Capture>,
    items: Vec<CaptureItem>,
    modules: Vec<Module>,
    ocr_gt: HashMap<String, Vec<OcrEntry>>,
    detection_gt: HashMap<String, Vec<DetectionEntry>>,
    classes: Vec<ClassRecord>,
    module_classes: Vec<(String, String)>,
    model_classes: Vec<ModelClassLink>,
    models: HashMap<&'static str, Vec<Model>>,
    required_token: Option<String>,
}

enum Fault {
    Status(u16, String),
    Unreachable,
}

#[derive(Default)]
struct Faults {
    latency: Vec<(String, Duration)>,
    failures: Vec<(String, Fault)>,
}

/// In-memory backend for tests.
pub struct InMemoryBackend {
    state: Mutex<State>,
    faults: Mutex<Faults>,
    log: Mutex<Vec<ApiRequest>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

fn new_id() -> String {
    Uuid::new_v4().to_string()
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            faults: Mutex::new(Faults::default()),
            log: Mutex::new(Vec::new()),
        }
    }

    // ── Configuration ─────────────────────────────────────────────────

    /// Reject requests whose bearer token differs from `token` with 401.
    pub fn require_token(&self, token: &str) {
        lock(&self.state).required_token = Some(token.to_string());
    }

    pub fn add_latency(&self, path_prefix: &str, delay: Duration) {
        lock(&self.faults)
            .latency
            .push((path_prefix.to_string(), delay));
    }

    pub fn fail_path(&self, path_prefix: &str, status: u16) {
        lock(&self.faults).failures.push((
            path_prefix.to_string(),
            Fault::Status(status, format!("injected failure for {}", path_prefix)),
        ));
    }

    pub fn fail_transport(&self, path_prefix: &str) {
        lock(&self.faults)
            .failures
            .push((path_prefix.to_string(), Fault::Unreachable));
    }

    // ── Seeding ───────────────────────────────────────────────────────

    pub fn seed_variant(&self, name: &str) -> Variant {
        let variant = Variant {
            id: new_id(),
            name: name.to_string(),
        };
        lock(&self.state).variants.push(variant.clone());
        variant
    }

    pub fn seed_part(&self, variant_id: &str, name: &str) -> Part {
        let part = Part {
            id: new_id(),
            variant_id: variant_id.to_string(),
            name: name.to_string(),
        };
        lock(&self.state).parts.push(part.clone());
        part
    }

    pub fn seed_capture(&self, variant_id: &str, part_id: &str, order: i64, name: &str) -> Capture {
        let capture = Capture {
            id: new_id(),
            variant_id: variant_id.to_string(),
            part_id: part_id.to_string(),
            order,
            name: name.to_string(),
            image: None,
            image_flag: 0,
        };
        lock(&self.state).captures.push(capture.clone());
        capture
    }

    /// Seed a module with its ground-truth sub-resource id assigned.
    pub fn seed_module(&self, capture_id: &str, order: i64, module_type: ModuleType) -> Module {
        let module = new_module(capture_id, order, module_type, None, None);
        lock(&self.state).modules.push(module.clone());
        module
    }

    /// Seed a module whose ground-truth sub-resource id is missing.
    pub fn seed_bare_module(&self, capture_id: &str, order: i64, module_type: ModuleType) -> Module {
        let mut module = new_module(capture_id, order, module_type, None, None);
        module.ocr_config_id = None;
        module.detection_config_id = None;
        lock(&self.state).modules.push(module.clone());
        module
    }

    pub fn seed_ocr_entry(&self, ocr_config_id: &str, entry: OcrEntry) {
        lock(&self.state)
            .ocr_gt
            .entry(ocr_config_id.to_string())
            .or_default()
            .push(entry);
    }

    pub fn seed_detection_entry(&self, detection_config_id: &str, entry: DetectionEntry) {
        lock(&self.state)
            .detection_gt
            .entry(detection_config_id.to_string())
            .or_default()
            .push(entry);
    }

    pub fn seed_class(&self, name: &str, class_type: ClassType) -> ClassRecord {
        let class = ClassRecord {
            id: new_id(),
            name: name.to_string(),
            class_type,
        };
        lock(&self.state).classes.push(class.clone());
        class
    }

    pub fn seed_models(&self, catalog: ModelCatalog, models: Vec<Model>) {
        lock(&self.state).models.insert(catalog.path(), models);
    }

    // ── Inspection ────────────────────────────────────────────────────

    pub fn requests(&self) -> Vec<ApiRequest> {
        lock(&self.log).clone()
    }

    pub fn classes(&self) -> Vec<ClassRecord> {
        lock(&self.state).classes.clone()
    }

    /// `(module_id, class_id)` rows.
    pub fn module_class_links(&self) -> Vec<(String, String)> {
        lock(&self.state).module_classes.clone()
    }

    pub fn model_class_links(&self) -> Vec<ModelClassLink> {
        lock(&self.state).model_classes.clone()
    }

    pub fn captures(&self) -> Vec<Capture> {
        lock(&self.state).captures.clone()
    }

    pub fn ocr_entries(&self, ocr_config_id: &str) -> Vec<OcrEntry> {
        lock(&self.state)
            .ocr_gt
            .get(ocr_config_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn detection_entries(&self, detection_config_id: &str) -> Vec<DetectionEntry> {
        lock(&self.state)
            .detection_gt
            .get(detection_config_id)
            .cloned()
            .unwrap_or_default()
    }

    // ── Dispatch ──────────────────────────────────────────────────────

    fn latency_for(&self, path: &str) -> Option<Duration> {
        lock(&self.faults)
            .latency
            .iter()
            .filter(|(prefix, _)| path.starts_with(prefix.as_str()))
            .map(|(_, d)| *d)
            .max()
    }

    fn fault_for(&self, path: &str) -> Option<Result<ApiResponse, TransportError>> {
        let faults = lock(&self.faults);
        faults
            .failures
            .iter()
            .find(|(prefix, _)| path.starts_with(prefix.as_str()))
            .map(|(_, fault)| match fault {
                Fault::Status(status, message) => {
                    Ok(ApiResponse::new(*status, json!({ "message": message })))
                }
                Fault::Unreachable => Err(TransportError::Connect(format!(
                    "connection refused: {}",
                    path
                ))),
            })
    }

    fn route(&self, req: &ApiRequest) -> ApiResponse {
        let mut state = lock(&self.state);

        if let Some(required) = &state.required_token {
            if req.bearer.as_deref() != Some(required.as_str()) {
                return ApiResponse::new(401, json!({ "message": "invalid or expired token" }));
            }
        }

        let body = req.body.clone().unwrap_or(Value::Null);
        let segs: Vec<&str> = req.path.trim_start_matches('/').split('/').collect();

        match (req.method, segs.as_slice()) {
            (Method::Get, ["variants"]) => ok(json!(state.variants)),
            (Method::Post, ["variants"]) => state.create_variant(&body),
            (Method::Delete, ["variants", id]) => state.delete_variant(id),

            (Method::Get, ["parts", "variant", v]) => {
                let parts: Vec<&Part> = state.parts.iter().filter(|p| p.variant_id == *v).collect();
                ok(json!({ "data": parts }))
            }
            (Method::Post, ["parts"]) => state.create_part(&body),
            (Method::Delete, ["parts", id]) => state.delete_part(id),

            (Method::Get, ["captures", "variant", v, "part", p]) => {
                let mut captures: Vec<&Capture> = state
                    .captures
                    .iter()
                    .filter(|c| c.variant_id == *v && c.part_id == *p)
                    .collect();
                captures.sort_by_key(|c| c.order);
                ok(json!({ "data": captures }))
            }
            (Method::Post, ["captures", "create-by-variant-part-id"]) => state.create_capture(&body),
            (Method::Post, ["captures", "add-entry-to-report-table"]) => state.create_item(&body),
            (Method::Get, ["captures", id, "items"]) => ok(json!({ "data": state.items_of(id) })),
            (Method::Delete, ["captures", id]) => state.delete_capture(id),

            (Method::Post, ["modules"]) => state.create_module(&body),
            (Method::Get, ["modules", "capture-id", c]) => {
                let mut modules: Vec<&Module> =
                    state.modules.iter().filter(|m| m.capture_id == *c).collect();
                modules.sort_by_key(|m| m.order);
                ok(json!(modules))
            }
            (Method::Get, ["modules", id, "classes"]) => ok(json!(state.classes_of(id))),
            (Method::Post, ["modules", id, "classes"]) => state.map_class(id, &body),

            (Method::Post, ["ocr-configs", "ocr-gt"]) => state.add_ocr_gt(&body),
            (Method::Post, ["detection-configs", "detection-class"]) => state.add_detection_gt(&body),
            (Method::Get, ["ocr-configs", id, "ground-truth"]) => {
                let entries = state.ocr_gt.get(*id).cloned().unwrap_or_default();
                ok(json!({ "data": { "ground_truths": entries } }))
            }
            (Method::Get, ["detection-configs", id, "ground-truth"]) => {
                let entries = state.detection_gt.get(*id).cloned().unwrap_or_default();
                ok(json!({ "data": { "ground_truths": entries } }))
            }

            (Method::Get, ["classes"]) => ok(json!(state.classes)),
            (Method::Post, ["model-class-mapper"]) => state.map_model(&body),

            (Method::Get, ["models", ..]) => {
                let models = state
                    .models
                    .get(req.path.as_str())
                    .cloned()
                    .unwrap_or_default();
                ok(json!(models))
            }

            _ => not_found(&format!("no route for {} {}", req.method, req.path)),
        }
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for InMemoryBackend {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, TransportError> {
        lock(&self.log).push(request.clone());

        let outcome = match self.fault_for(&request.path) {
            Some(fault) => fault,
            None => Ok(self.route(&request)),
        };

        if let Some(delay) = self.latency_for(&request.path) {
            tokio::time::sleep(delay).await;
        }
        outcome
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Handlers
// ═══════════════════════════════════════════════════════════════════════

fn ok(body: Value) -> ApiResponse {
    ApiResponse::new(200, body)
}

fn created(body: Value) -> ApiResponse {
    ApiResponse::new(201, json!({ "data": body }))
}

fn no_content() -> ApiResponse {
    ApiResponse::new(204, Value::Null)
}

fn not_found(message: &str) -> ApiResponse {
    ApiResponse::new(404, json!({ "message": message }))
}

fn bad_request(message: &str) -> ApiResponse {
    ApiResponse::new(400, json!({ "message": message }))
}

fn field(body: &Value, key: &str) -> Option<String> {
    match body.get(key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn text(body: &Value, key: &str) -> String {
    field(body, key).unwrap_or_default()
}

fn int(body: &Value, key: &str) -> Option<i64> {
    match body.get(key)? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn flag(body: &Value, key: &str) -> bool {
    match body.get(key) {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_i64().unwrap_or(0) != 0,
        _ => false,
    }
}

fn new_module(
    capture_id: &str,
    order: i64,
    module_type: ModuleType,
    detection_model_id: Option<String>,
    recognition_model_id: Option<String>,
) -> Module {
    let (ocr_config_id, detection_config_id) = match module_type {
        ModuleType::Ocr => (Some(new_id()), None),
        ModuleType::Detection => (None, Some(new_id())),
    };
    Module {
        id: new_id(),
        capture_id: capture_id.to_string(),
        order,
        module_type,
        detection_model_id,
        recognition_model_id,
        ocr_config_id,
        detection_config_id,
        detection_model_name: None,
        recognition_model_name: None,
    }
}

impl State {
    fn create_variant(&mut self, body: &Value) -> ApiResponse {
        let Some(name) = field(body, "variant_name") else {
            return bad_request("variant_name is required");
        };
        let variant = Variant { id: new_id(), name };
        self.variants.push(variant.clone());
        created(json!(variant))
    }

    fn delete_variant(&mut self, id: &str) -> ApiResponse {
        let before = self.variants.len();
        self.variants.retain(|v| v.id != id);
        if self.variants.len() == before {
            return not_found("variant not found");
        }
        self.parts.retain(|p| p.variant_id != id);
        no_content()
    }

    fn create_part(&mut self, body: &Value) -> ApiResponse {
        let (Some(variant_id), Some(name)) = (field(body, "variant_id"), field(body, "part_name"))
        else {
            return bad_request("variant_id and part_name are required");
        };
        if !self.variants.iter().any(|v| v.id == variant_id) {
            return not_found("variant not found");
        }
        let part = Part {
            id: new_id(),
            variant_id,
            name,
        };
        self.parts.push(part.clone());
        created(json!(part))
    }

    fn delete_part(&mut self, id: &str) -> ApiResponse {
        let before = self.parts.len();
        self.parts.retain(|p| p.id != id);
        if self.parts.len() == before {
            return not_found("part not found");
        }
        self.captures.retain(|c| c.part_id != id);
        no_content()
    }

    fn create_capture(&mut self, body: &Value) -> ApiResponse {
        let (Some(variant_id), Some(part_id)) = (field(body, "variant_id"), field(body, "part_id"))
        else {
            return bad_request("variant_id and part_id are required");
        };
        if !self.parts.iter().any(|p| p.id == part_id) {
            return not_found("part not found");
        }
        let capture = Capture {
            id: new_id(),
            variant_id,
            part_id,
            order: int(body, "order").unwrap_or(1),
            name: text(body, "capture_name"),
            image: field(body, "image"),
            image_flag: int(body, "image_flag").unwrap_or(0),
        };
        self.captures.push(capture.clone());
        created(json!(capture))
    }

    fn delete_capture(&mut self, id: &str) -> ApiResponse {
        let before = self.captures.len();
        self.captures.retain(|c| c.id != id);
        if self.captures.len() == before {
            return not_found("capture not found");
        }
        self.modules.retain(|m| m.capture_id != id);
        no_content()
    }

    fn create_item(&mut self, body: &Value) -> ApiResponse {
        let module_id = field(body, "module_id");
        if let Some(module_id) = &module_id {
            if !self.modules.iter().any(|m| &m.id == module_id) {
                return ApiResponse::new(
                    422,
                    json!({ "data": { "message": format!("module {} does not exist", module_id) } }),
                );
            }
        }
        let item = CaptureItem {
            id: Some(new_id()),
            capture_id: field(body, "capture_id"),
            variant_id: field(body, "variant_id"),
            part_id: field(body, "part_id"),
            module_id,
            index: int(body, "index"),
            item_index: int(body, "item_index"),
            order: int(body, "order"),
            regulation_requirement: text(body, "regulation_requirement"),
            drawing_requirement: text(body, "drawing_requirement"),
            entry_type: int(body, "entry_type").unwrap_or(0),
            extraction_type: field(body, "extraction_type"),
        };
        self.items.push(item.clone());
        created(json!(item))
    }

    /// Rows belong to a capture directly, through their module, or (for
    /// free-text rows) through the capture's variant and part.
    fn items_of(&self, capture_id: &str) -> Vec<CaptureItem> {
        let Some(capture) = self.captures.iter().find(|c| c.id == capture_id) else {
            return Vec::new();
        };
        self.items
            .iter()
            .filter(|item| {
                if item.capture_id.as_deref() == Some(capture_id) {
                    return true;
                }
                match &item.module_id {
                    Some(module_id) => self
                        .modules
                        .iter()
                        .any(|m| &m.id == module_id && m.capture_id == capture_id),
                    None => {
                        item.variant_id.as_deref() == Some(capture.variant_id.as_str())
                            && item.part_id.as_deref() == Some(capture.part_id.as_str())
                    }
                }
            })
            .cloned()
            .collect()
    }

    fn create_module(&mut self, body: &Value) -> ApiResponse {
        let Some(capture_id) = field(body, "capture_id") else {
            return bad_request("capture_id is required");
        };
        let module_type = match field(body, "type").map(|t| t.parse::<ModuleType>()) {
            Some(Ok(t)) => t,
            Some(Err(e)) => return bad_request(&e),
            None => return bad_request("type is required"),
        };
        if !self.captures.iter().any(|c| c.id == capture_id) {
            return not_found("capture not found");
        }
        let recognition = match module_type {
            ModuleType::Ocr => field(body, "recognition_model_id"),
            ModuleType::Detection => None,
        };
        let module = new_module(
            &capture_id,
            int(body, "order").unwrap_or(1),
            module_type,
            field(body, "detection_model_id"),
            recognition,
        );
        self.modules.push(module.clone());
        created(json!(module))
    }

    fn add_ocr_gt(&mut self, body: &Value) -> ApiResponse {
        let Some(config_id) = field(body, "ocr_config_id") else {
            return bad_request("ocr_config_id is required");
        };
        if !self
            .modules
            .iter()
            .any(|m| m.ocr_config_id.as_deref() == Some(config_id.as_str()))
        {
            return not_found("ocr config not found");
        }
        let entry = OcrEntry {
            value: text(body, "value"),
            option_key: text(body, "option_key"),
            option_label: text(body, "option_label"),
            match_type: text(body, "match_type"),
            prefix: text(body, "prefix"),
            suffix: text(body, "suffix"),
            master_key: text(body, "master_key"),
            is_user_selectable: flag(body, "is_user_selectable"),
        };
        self.ocr_gt.entry(config_id).or_default().push(entry.clone());
        created(json!(entry))
    }

    fn add_detection_gt(&mut self, body: &Value) -> ApiResponse {
        let Some(config_id) = field(body, "detection_config_id") else {
            return bad_request("detection_config_id is required");
        };
        if !self
            .modules
            .iter()
            .any(|m| m.detection_config_id.as_deref() == Some(config_id.as_str()))
        {
            return not_found("detection config not found");
        }
        let Some(class_value) = field(body, "class") else {
            return bad_request("class is required");
        };
        let master_option_keys = body
            .get("master_option_keys")
            .and_then(Value::as_array)
            .map(|keys| {
                keys.iter()
                    .filter_map(|k| k.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();
        let entry = DetectionEntry {
            class_value,
            class_name: None,
            option_key: text(body, "option_key"),
            option_label: text(body, "option_label"),
            master_option_keys,
            is_user_selectable: flag(body, "is_user_selectable"),
        };
        self.detection_gt
            .entry(config_id)
            .or_default()
            .push(entry.clone());
        created(json!(entry))
    }

    fn classes_of(&self, module_id: &str) -> Vec<MappedClass> {
        self.module_classes
            .iter()
            .filter(|(m, _)| m == module_id)
            .filter_map(|(_, class_id)| self.classes.iter().find(|c| &c.id == class_id))
            .map(|c| MappedClass {
                class_id: c.id.clone(),
                class_name: c.name.clone(),
                class_type: c.class_type,
            })
            .collect()
    }

    fn map_class(&mut self, module_id: &str, body: &Value) -> ApiResponse {
        if !self.modules.iter().any(|m| m.id == module_id) {
            return not_found("module not found");
        }

        let class = match field(body, "class_id") {
            Some(class_id) => match self.classes.iter().find(|c| c.id == class_id) {
                Some(c) => c.clone(),
                None => return not_found("class not found"),
            },
            None => {
                let Some(name) = field(body, "name") else {
                    return bad_request("class_id or name is required");
                };
                let class_type = match field(body, "type").map(|t| t.parse::<ClassType>()) {
                    Some(Ok(t)) => t,
                    Some(Err(e)) => return bad_request(&e),
                    None => return bad_request("type is required with name"),
                };
                let name = name.trim().to_string();
                let wanted = name.to_lowercase();
                match self
                    .classes
                    .iter()
                    .find(|c| c.name.to_lowercase() == wanted)
                {
                    Some(existing) => existing.clone(),
                    None => {
                        let class = ClassRecord {
                            id: new_id(),
                            name,
                            class_type,
                        };
                        self.classes.push(class.clone());
                        class
                    }
                }
            }
        };

        let row = (module_id.to_string(), class.id.clone());
        let already_existed = self.module_classes.contains(&row);
        if !already_existed {
            self.module_classes.push(row);
        }

        ok(json!({
            "class_id": class.id,
            "class_name": class.name,
            "class_type": class.class_type,
            "already_existed": already_existed,
        }))
    }

    fn map_model(&mut self, body: &Value) -> ApiResponse {
        let (Some(model_id), Some(class_id)) = (field(body, "model_id"), field(body, "class_id"))
        else {
            return bad_request("model_id and class_id are required");
        };
        if !self.classes.iter().any(|c| c.id == class_id) {
            return not_found("class not found");
        }
        let link = ModelClassLink { model_id, class_id };
        if !self.model_classes.contains(&link) {
            self.model_classes.push(link.clone());
        }
        created(json!(link))
    }
}
