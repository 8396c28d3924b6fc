//! Hierarchy Aggregator.
//!
//! Builds a snapshot of one Variant for audit: every Part → its Captures →
//! their Modules → each Module's ground-truth entries.
//!
//! # Concurrency
//!
//! Three fan-out levels, each a `join_all` over independent requests on the
//! shared gateway: Parts concurrently fetch their Captures, Captures
//! concurrently fetch their Modules, Modules concurrently fetch their ground
//! truth. `join_all` yields results in input order, so the assembled tree is
//! deterministic regardless of completion order.
//!
//! # Failure
//!
//! A failed fetch never aborts siblings. Every child list is a [`Branch`]
//! that tells *loaded*, *empty* and *failed* apart; a failed branch carries
//! no items and the error text, and is logged at `warn`.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use gt_console_core::models::{Capture, GroundTruth, Module, ModuleType, Part};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::gateway::{Gateway, GatewayError};
use crate::progress::{AggregateProgressEvent, AggregateProgressReporter, NoProgress};

/// Children of one node in the report.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "data", rename_all = "snake_case")]
pub enum Branch<T> {
    Loaded(Vec<T>),
    /// The fetch succeeded and returned nothing, or there was nothing to
    /// fetch (a module without its ground-truth sub-resource id).
    Empty,
    /// The fetch failed. The message is the gateway error.
    Failed(String),
}

impl<T> Branch<T> {
    fn from_items(items: Vec<T>) -> Self {
        if items.is_empty() {
            Branch::Empty
        } else {
            Branch::Loaded(items)
        }
    }

    /// Loaded items; empty for both `Empty` and `Failed`.
    pub fn items(&self) -> &[T] {
        match self {
            Branch::Loaded(items) => items,
            Branch::Empty | Branch::Failed(_) => &[],
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Branch::Failed(_))
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            Branch::Failed(message) => Some(message),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModuleReport {
    pub module: Module,
    pub gt_entries: Branch<GroundTruth>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CaptureReport {
    pub capture: Capture,
    pub modules: Branch<ModuleReport>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PartReport {
    pub part_id: String,
    pub part_name: String,
    pub captures: Branch<CaptureReport>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VariantReport {
    pub variant_id: String,
    pub generated_at: DateTime<Utc>,
    pub parts: Vec<PartReport>,
}

/// Roll-up counts, summed over an assembled tree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReportSummary {
    pub parts: u64,
    pub captures: u64,
    pub modules: u64,
    pub gt_entries: u64,
    /// Branches whose fetch failed, at any level.
    pub failed_branches: u64,
}

impl ReportSummary {
    fn add(&mut self, other: ReportSummary) {
        self.parts += other.parts;
        self.captures += other.captures;
        self.modules += other.modules;
        self.gt_entries += other.gt_entries;
        self.failed_branches += other.failed_branches;
    }
}

impl PartReport {
    pub fn summary(&self) -> ReportSummary {
        let mut s = ReportSummary {
            parts: 1,
            failed_branches: self.captures.is_failed() as u64,
            ..Default::default()
        };
        for capture in self.captures.items() {
            s.captures += 1;
            s.failed_branches += capture.modules.is_failed() as u64;
            for module in capture.modules.items() {
                s.modules += 1;
                s.gt_entries += module.gt_entries.items().len() as u64;
                s.failed_branches += module.gt_entries.is_failed() as u64;
            }
        }
        s
    }
}

impl VariantReport {
    pub fn summary(&self) -> ReportSummary {
        let mut total = ReportSummary::default();
        for part in &self.parts {
            total.add(part.summary());
        }
        total
    }
}

/// Walks a variant's hierarchy through the gateway.
pub struct HierarchyAggregator {
    gateway: Gateway,
    progress: Arc<dyn AggregateProgressReporter>,
}

impl HierarchyAggregator {
    pub fn new(gateway: Gateway) -> Self {
        Self {
            gateway,
            progress: Arc::new(NoProgress),
        }
    }

    pub fn with_progress(mut self, reporter: Box<dyn AggregateProgressReporter>) -> Self {
        self.progress = Arc::from(reporter);
        self
    }

    /// Aggregate `parts` (already known to the caller, not re-fetched) of
    /// `variant_id`. Never fails; see [`Branch`].
    pub async fn aggregate_variant(&self, variant_id: &str, parts: &[Part]) -> VariantReport {
        let parts_total = parts.len() as u64;
        self.progress.report(AggregateProgressEvent::Started {
            variant_id: variant_id.to_string(),
            parts_total,
        });

        let done = AtomicU64::new(0);
        let branches = parts.iter().map(|part| {
            let done = &done;
            async move {
                let report = self.aggregate_part(variant_id, part).await;
                let parts_done = done.fetch_add(1, Ordering::SeqCst) + 1;
                let s = report.summary();
                self.progress.report(AggregateProgressEvent::PartDone {
                    part_name: part.name.clone(),
                    parts_done,
                    parts_total,
                    captures: s.captures,
                    modules: s.modules,
                });
                report
            }
        });
        let parts = join_all(branches).await;

        let report = VariantReport {
            variant_id: variant_id.to_string(),
            generated_at: Utc::now(),
            parts,
        };
        let s = report.summary();
        info!(
            variant_id,
            parts = s.parts,
            captures = s.captures,
            modules = s.modules,
            gt_entries = s.gt_entries,
            failed_branches = s.failed_branches,
            "aggregation complete"
        );
        report
    }

    async fn aggregate_part(&self, variant_id: &str, part: &Part) -> PartReport {
        let captures = match self.gateway.fetch_captures(variant_id, &part.id).await {
            Ok(captures) => {
                let branches = captures.into_iter().map(|c| self.aggregate_capture(c));
                Branch::from_items(join_all(branches).await)
            }
            Err(e) => failed("captures", &part.id, e),
        };
        PartReport {
            part_id: part.id.clone(),
            part_name: part.name.clone(),
            captures,
        }
    }

    async fn aggregate_capture(&self, capture: Capture) -> CaptureReport {
        let modules = match self.gateway.fetch_modules(&capture.id).await {
            Ok(modules) => {
                let branches = modules.into_iter().map(|m| self.aggregate_module(m));
                Branch::from_items(join_all(branches).await)
            }
            Err(e) => failed("modules", &capture.id, e),
        };
        CaptureReport { capture, modules }
    }

    async fn aggregate_module(&self, module: Module) -> ModuleReport {
        let gt_entries = self.fetch_ground_truth(&module).await;
        ModuleReport { module, gt_entries }
    }

    async fn fetch_ground_truth(&self, module: &Module) -> Branch<GroundTruth> {
        let Some(config_id) = module.gt_config_id() else {
            debug!(module_id = %module.id, module_type = %module.module_type, "module has no ground-truth config id");
            return Branch::Empty;
        };

        let result = match module.module_type {
            ModuleType::Ocr => self
                .gateway
                .fetch_ocr_ground_truth(config_id)
                .await
                .map(|entries| entries.into_iter().map(GroundTruth::Ocr).collect()),
            ModuleType::Detection => self
                .gateway
                .fetch_detection_ground_truth(config_id)
                .await
                .map(|entries| entries.into_iter().map(GroundTruth::Detection).collect()),
        };

        match result {
            Ok(entries) => Branch::from_items(entries),
            Err(e) => failed("ground truth", &module.id, e),
        }
    }
}

fn failed<T>(what: &str, parent_id: &str, error: GatewayError) -> Branch<T> {
    warn!(what, parent_id, error = %error, "aggregation branch failed");
    Branch::Failed(error.to_string())
}
