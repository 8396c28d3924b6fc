//! Entity Mutation Orchestrator.
//!
//! Creation flows whose steps depend on each other:
//!
//! - [`Orchestrator::create_capture_with_computed_order`]: read siblings,
//!   then create with `order = count + 1`.
//! - [`Orchestrator::create_module_structure`]: phase 1, a module row with
//!   model references and no ground truth.
//! - [`Orchestrator::add_entry_to_module`]: phase 2, one ground-truth entry
//!   plus automatic class resolution for the module.
//! - [`Orchestrator::add_report_table_row`]: a report row, with or without a
//!   module back-reference.
//!
//! The computed orders are read-then-write and not transactional. Two
//! creators that read the same sibling count both get the same order; the
//! duplicate is left for the operator to see.

use anyhow::{Context, Result};
use gt_console_core::models::{
    Capture, CaptureItem, DetectionEntry, Module, ModuleType, OcrEntry,
};
use serde_json::Value;
use tracing::info;

use crate::api::{
    DetectionGtPayload, ModuleTypeFields, NewCapture, NewCaptureItem, NewModule, OcrGtPayload,
};
use crate::gateway::Gateway;
use crate::resolver::{ClassResolver, Resolution};

#[derive(Debug, thiserror::Error)]
pub enum OrchestrateError {
    #[error("cannot add a {entry} entry to {module_type} module {module_id}")]
    EntryShapeMismatch {
        module_id: String,
        module_type: ModuleType,
        entry: ModuleType,
    },

    #[error("{0} must not be empty")]
    EmptyField(&'static str),

    #[error("module {module_id} has no {module_type} ground-truth config id")]
    MissingConfigId {
        module_id: String,
        module_type: ModuleType,
    },
}

/// Fields of a new capture. `order: None` means "append".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CaptureFields {
    pub name: String,
    pub order: Option<i64>,
    pub image: Option<String>,
    /// Numeric image flag. Wins over `legacy_image_flag`.
    pub flag: Option<i64>,
    /// Boolean flag sent by older clients, forwarded as `1`/`0`.
    pub legacy_image_flag: Option<bool>,
}

impl CaptureFields {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    fn image_flag(&self) -> Option<i64> {
        self.flag
            .or_else(|| self.legacy_image_flag.map(|b| if b { 1 } else { 0 }))
    }
}

/// Structure of a new module. `order: None` means "append".
#[derive(Debug, Clone, PartialEq)]
pub struct ModuleConfig {
    pub module_type: ModuleType,
    pub order: Option<i64>,
    pub detection_model_id: Option<String>,
    /// OCR only; ignored for Detection modules.
    pub recognition_model_id: Option<String>,
}

impl ModuleConfig {
    pub fn new(module_type: ModuleType) -> Self {
        Self {
            module_type,
            order: None,
            detection_model_id: None,
            recognition_model_id: None,
        }
    }
}

/// Ground-truth fields for phase 2, shaped by module type.
#[derive(Debug, Clone, PartialEq)]
pub enum EntryFields {
    Ocr(OcrEntry),
    Detection(DetectionEntry),
}

impl EntryFields {
    pub fn module_type(&self) -> ModuleType {
        match self {
            EntryFields::Ocr(_) => ModuleType::Ocr,
            EntryFields::Detection(_) => ModuleType::Detection,
        }
    }
}

/// What [`Orchestrator::add_entry_to_module`] did.
#[derive(Debug, Clone, PartialEq)]
pub struct EntryOutcome {
    /// The created entry as returned by the backend.
    pub entry: Value,
    /// `None` only for a Detection entry whose class resolved to nothing.
    pub resolution: Option<Resolution>,
}

/// A report-table row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReportRow {
    pub regulation_requirement: String,
    pub drawing_requirement: String,
    pub index: i64,
    pub order: Option<i64>,
    pub entry_type: i64,
    pub extraction_type: Option<String>,
}

pub struct Orchestrator {
    gateway: Gateway,
    resolver: ClassResolver,
}

impl Orchestrator {
    pub fn new(gateway: Gateway) -> Self {
        let resolver = ClassResolver::new(gateway.clone());
        Self { gateway, resolver }
    }

    pub fn resolver(&self) -> &ClassResolver {
        &self.resolver
    }

    pub async fn create_capture_with_computed_order(
        &self,
        variant_id: &str,
        part_id: &str,
        fields: &CaptureFields,
    ) -> Result<Capture> {
        let order = match fields.order {
            Some(order) => order,
            None => self.gateway.list_captures(variant_id, part_id).await.len() as i64 + 1,
        };

        let capture = self
            .gateway
            .create_capture(&NewCapture {
                variant_id: variant_id.to_string(),
                part_id: part_id.to_string(),
                order,
                capture_name: fields.name.clone(),
                image: fields.image.clone(),
                image_flag: fields.image_flag(),
            })
            .await
            .with_context(|| format!("creating capture '{}' under part {}", fields.name, part_id))?;

        info!(capture_id = %capture.id, part_id, order, "capture created");
        Ok(capture)
    }

    /// Phase 1: create the module row with empty entry-level fields.
    pub async fn create_module_structure(
        &self,
        capture_id: &str,
        config: &ModuleConfig,
    ) -> Result<Module> {
        let order = match config.order {
            Some(order) => order,
            None => self.gateway.list_modules(capture_id).await.len() as i64 + 1,
        };

        let fields = match config.module_type {
            ModuleType::Ocr => ModuleTypeFields::Ocr {
                match_type: String::new(),
                value: String::new(),
                prefix: String::new(),
                suffix: String::new(),
                detection_model_id: config.detection_model_id.clone(),
                recognition_model_id: config.recognition_model_id.clone(),
            },
            ModuleType::Detection => ModuleTypeFields::Detection {
                class: String::new(),
                detection_model_id: config.detection_model_id.clone(),
            },
        };

        let module = self
            .gateway
            .create_module(&NewModule {
                capture_id: capture_id.to_string(),
                order,
                module_type: config.module_type,
                option_key: String::new(),
                option_label: String::new(),
                is_user_selectable: false,
                master_key: String::new(),
                fields,
            })
            .await
            .with_context(|| {
                format!(
                    "creating {} module under capture {}",
                    config.module_type, capture_id
                )
            })?;

        info!(module_id = %module.id, capture_id, module_type = %module.module_type, order, "module created");
        Ok(module)
    }

    /// Phase 2: submit one entry to the module's ground-truth sub-resource,
    /// then map the module's class.
    ///
    /// OCR entries map the module to the `ocr` class; Detection entries map
    /// it to the class named by the entry's `class` value.
    pub async fn add_entry_to_module(
        &self,
        module: &Module,
        fields: &EntryFields,
    ) -> Result<EntryOutcome> {
        if module.module_type != fields.module_type() {
            return Err(OrchestrateError::EntryShapeMismatch {
                module_id: module.id.clone(),
                module_type: module.module_type,
                entry: fields.module_type(),
            }
            .into());
        }
        let config_id = module
            .gt_config_id()
            .ok_or_else(|| OrchestrateError::MissingConfigId {
                module_id: module.id.clone(),
                module_type: module.module_type,
            })?;

        match fields {
            EntryFields::Ocr(entry) => {
                let created = self
                    .gateway
                    .add_ocr_entry(&OcrGtPayload::new(config_id, entry))
                    .await
                    .with_context(|| format!("adding OCR entry to module {}", module.id))?;
                info!(module_id = %module.id, value = %entry.value, "OCR entry added");

                let resolution = self
                    .resolver
                    .resolve_ocr_class(module)
                    .await
                    .with_context(|| {
                        format!("entry saved, but mapping the ocr class of module {} failed", module.id)
                    })?;
                Ok(EntryOutcome {
                    entry: created,
                    resolution: Some(resolution),
                })
            }
            EntryFields::Detection(entry) => {
                let class_name = entry.class_value.trim();
                if class_name.is_empty() {
                    return Err(OrchestrateError::EmptyField("class").into());
                }
                let created = self
                    .gateway
                    .add_detection_entry(&DetectionGtPayload::new(config_id, entry))
                    .await
                    .with_context(|| format!("adding detection entry to module {}", module.id))?;
                info!(module_id = %module.id, class = class_name, "detection entry added");

                let resolution = self
                    .resolver
                    .resolve_detection_class(module, class_name)
                    .await
                    .with_context(|| {
                        format!(
                            "entry saved, but mapping class '{}' to module {} failed",
                            class_name, module.id
                        )
                    })?;
                Ok(EntryOutcome {
                    entry: created,
                    resolution,
                })
            }
        }
    }

    /// Create a report row. `module_id` makes it a structured row; without
    /// it the row is free text under the part.
    pub async fn add_report_table_row(
        &self,
        variant_id: &str,
        part_id: &str,
        module_id: Option<&str>,
        row: &ReportRow,
    ) -> Result<CaptureItem> {
        let item = self
            .gateway
            .create_capture_item(&NewCaptureItem {
                variant_id: variant_id.to_string(),
                part_id: part_id.to_string(),
                module_id: module_id.map(str::to_string),
                regulation_requirement: row.regulation_requirement.clone(),
                drawing_requirement: row.drawing_requirement.clone(),
                item_index: row.index,
                index: row.index,
                order: row.order,
                entry_type: row.entry_type,
                extraction_type: row.extraction_type.clone(),
            })
            .await
            .context("adding report table row")?;

        info!(part_id, index = row.index, module_id = module_id.unwrap_or("-"), "report row added");
        Ok(item)
    }
}
