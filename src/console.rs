//! CLI-facing entry points.
//!
//! Each `run_*` function backs one `gtc` subcommand: it calls the gateway,
//! orchestrator, resolver or aggregator and prints a plain-text result to
//! stdout. Logs and progress go to stderr.

use anyhow::{bail, Context, Result};
use gt_console_core::models::{ClassType, GroundTruth, ModelCatalog, Module};
use std::fmt::Write as _;

use crate::aggregate::{Branch, HierarchyAggregator, VariantReport};
use crate::gateway::Gateway;
use crate::orchestrate::{CaptureFields, EntryFields, ModuleConfig, Orchestrator, ReportRow};
use crate::progress::ProgressMode;
use crate::resolver::{ClassChoice, ClassResolver, ModelLink, Resolution};

// ── Session ───────────────────────────────────────────────────────────

pub fn run_session_status(gateway: &Gateway) {
    let session = gateway.session();
    let state = if session.is_authenticated() {
        "signed in"
    } else {
        "signed out"
    };
    println!("Session:     {}", state);
    match session.token_file() {
        Some(path) => println!("Token file:  {}", path.display()),
        None => println!("Token file:  (not configured)"),
    }
}

pub fn run_set_token(gateway: &Gateway, token: &str) -> Result<()> {
    if token.trim().is_empty() {
        bail!("token must not be empty");
    }
    gateway.session().set_token(token.trim())?;
    println!("Token stored.");
    Ok(())
}

pub fn run_sign_out(gateway: &Gateway) -> Result<()> {
    gateway.session().sign_out()?;
    println!("Signed out.");
    Ok(())
}

// ── Variants & parts ──────────────────────────────────────────────────

pub async fn run_list_variants(gateway: &Gateway) {
    let variants = gateway.list_variants().await;
    if variants.is_empty() {
        println!("No variants.");
        return;
    }
    println!("{:<38} NAME", "ID");
    for v in variants {
        println!("{:<38} {}", v.id, v.name);
    }
}

pub async fn run_create_variant(gateway: &Gateway, name: &str) -> Result<()> {
    let name = non_empty("variant name", name)?;
    let variant = gateway.create_variant(name).await?;
    println!("Created variant {} ({})", variant.name, variant.id);
    Ok(())
}

pub async fn run_delete_variant(gateway: &Gateway, id: &str) -> Result<()> {
    gateway.delete_variant(id).await?;
    println!("Deleted variant {}", id);
    Ok(())
}

pub async fn run_list_parts(gateway: &Gateway, variant_id: &str) {
    let parts = gateway.list_parts(variant_id).await;
    if parts.is_empty() {
        println!("No parts for variant {}.", variant_id);
        return;
    }
    println!("{:<38} NAME", "ID");
    for p in parts {
        println!("{:<38} {}", p.id, p.name);
    }
}

pub async fn run_create_part(gateway: &Gateway, variant_id: &str, name: &str) -> Result<()> {
    let name = non_empty("part name", name)?;
    let part = gateway.create_part(variant_id, name).await?;
    println!("Created part {} ({})", part.name, part.id);
    Ok(())
}

pub async fn run_delete_part(gateway: &Gateway, id: &str) -> Result<()> {
    gateway.delete_part(id).await?;
    println!("Deleted part {}", id);
    Ok(())
}

// ── Captures & report rows ────────────────────────────────────────────

pub async fn run_list_captures(gateway: &Gateway, variant_id: &str, part_id: &str) {
    let captures = gateway.list_captures(variant_id, part_id).await;
    if captures.is_empty() {
        println!("No captures.");
        return;
    }
    println!("{:<6} {:<38} {:<6} NAME", "ORDER", "ID", "IMAGE");
    for c in captures {
        println!("{:<6} {:<38} {:<6} {}", c.order, c.id, c.image_flag, c.name);
    }
}

pub async fn run_create_capture(
    gateway: &Gateway,
    variant_id: &str,
    part_id: &str,
    fields: &CaptureFields,
) -> Result<()> {
    non_empty("capture name", &fields.name)?;
    let capture = Orchestrator::new(gateway.clone())
        .create_capture_with_computed_order(variant_id, part_id, fields)
        .await?;
    println!(
        "Created capture {} ({}) at order {}",
        capture.name, capture.id, capture.order
    );
    Ok(())
}

pub async fn run_delete_capture(gateway: &Gateway, id: &str) -> Result<()> {
    gateway.delete_capture(id).await?;
    println!("Deleted capture {}", id);
    Ok(())
}

pub async fn run_list_items(gateway: &Gateway, capture_id: &str) {
    let items = gateway.list_capture_items(capture_id).await;
    if items.is_empty() {
        println!("No report rows.");
        return;
    }
    println!(
        "{:<6} {:<6} {:<38} {:<24} DRAWING",
        "INDEX", "TYPE", "MODULE", "REGULATION"
    );
    for item in items {
        println!(
            "{:<6} {:<6} {:<38} {:<24} {}",
            item.position().map(|i| i.to_string()).unwrap_or_default(),
            item.entry_type,
            item.module_id.as_deref().unwrap_or("-"),
            item.regulation_requirement,
            item.drawing_requirement
        );
    }
}

pub async fn run_add_item(
    gateway: &Gateway,
    variant_id: &str,
    part_id: &str,
    module_id: Option<&str>,
    row: &ReportRow,
) -> Result<()> {
    let item = Orchestrator::new(gateway.clone())
        .add_report_table_row(variant_id, part_id, module_id, row)
        .await?;
    println!(
        "Added report row {} ({})",
        item.position().unwrap_or(row.index),
        item.id.as_deref().unwrap_or("no id returned")
    );
    Ok(())
}

// ── Modules & entries ─────────────────────────────────────────────────

pub async fn run_list_modules(gateway: &Gateway, capture_id: &str) {
    let modules = gateway.list_modules(capture_id).await;
    if modules.is_empty() {
        println!("No modules.");
        return;
    }
    println!("{:<6} {:<10} {:<38} MODEL", "ORDER", "TYPE", "ID");
    for m in modules {
        println!(
            "{:<6} {:<10} {:<38} {}",
            m.order,
            m.module_type,
            m.id,
            m.detection_model_name
                .as_deref()
                .or(m.detection_model_id.as_deref())
                .unwrap_or("-")
        );
    }
}

pub async fn run_create_module(gateway: &Gateway, capture_id: &str, config: &ModuleConfig) -> Result<()> {
    let module = Orchestrator::new(gateway.clone())
        .create_module_structure(capture_id, config)
        .await?;
    println!(
        "Created {} module {} at order {}",
        module.module_type, module.id, module.order
    );
    Ok(())
}

/// Find a module by id among its capture's modules. There is no
/// single-module endpoint.
async fn find_module(gateway: &Gateway, capture_id: &str, module_id: &str) -> Result<Module> {
    let modules = gateway
        .fetch_modules(capture_id)
        .await
        .with_context(|| format!("loading modules of capture {}", capture_id))?;
    match modules.into_iter().find(|m| m.id == module_id) {
        Some(module) => Ok(module),
        None => bail!("module {} not found under capture {}", module_id, capture_id),
    }
}

pub async fn run_add_entry(
    gateway: &Gateway,
    capture_id: &str,
    module_id: &str,
    fields: &EntryFields,
) -> Result<()> {
    let module = find_module(gateway, capture_id, module_id).await?;
    let outcome = Orchestrator::new(gateway.clone())
        .add_entry_to_module(&module, fields)
        .await?;
    println!("Entry added to {} module {}", module.module_type, module.id);
    match &outcome.resolution {
        Some(resolution) => print_resolution(resolution),
        None => println!("No class to map."),
    }
    Ok(())
}

// ── Classes & models ──────────────────────────────────────────────────

pub async fn run_list_classes(gateway: &Gateway) -> Result<()> {
    let classes = gateway.fetch_classes().await?;
    if classes.is_empty() {
        println!("Class registry is empty.");
        return Ok(());
    }
    println!("{:<38} {:<10} NAME", "ID", "TYPE");
    for c in classes {
        println!("{:<38} {:<10} {}", c.id, c.class_type, c.name);
    }
    Ok(())
}

pub async fn run_module_classes(gateway: &Gateway, module_id: &str) {
    let classes = gateway.list_module_classes(module_id).await;
    if classes.is_empty() {
        println!("No classes mapped to module {}.", module_id);
        return;
    }
    println!("{:<38} {:<10} NAME", "CLASS ID", "TYPE");
    for c in classes {
        println!("{:<38} {:<10} {}", c.class_id, c.class_type, c.class_name);
    }
}

pub async fn run_map_class(
    gateway: &Gateway,
    capture_id: &str,
    module_id: &str,
    choice: &ClassChoice,
) -> Result<()> {
    let module = find_module(gateway, capture_id, module_id).await?;
    let resolution = ClassResolver::new(gateway.clone())
        .resolve_generic_class(&module, choice)
        .await?;
    print_resolution(&resolution);
    Ok(())
}

pub async fn run_create_class(
    gateway: &Gateway,
    name: &str,
    class_type: ClassType,
    module_id: &str,
    model_id: Option<&str>,
) -> Result<()> {
    let resolution = ClassResolver::new(gateway.clone())
        .create_class_interactive(name, class_type, module_id, model_id)
        .await?;
    print_resolution(&resolution);
    Ok(())
}

pub async fn run_list_models(gateway: &Gateway, catalog: ModelCatalog) {
    let models = gateway.list_models(catalog).await;
    if models.is_empty() {
        println!("No models in {}.", catalog.path());
        return;
    }
    println!("{:<38} {:<16} NAME", "ID", "KIND");
    for m in &models {
        println!(
            "{:<38} {:<16} {}",
            m.id,
            m.kind.as_deref().unwrap_or("-"),
            m.display_name()
        );
    }
}

fn print_resolution(resolution: &Resolution) {
    let m = &resolution.mapping;
    let state = if m.already_existed {
        "already mapped, nothing changed"
    } else {
        "mapped"
    };
    println!(
        "Class '{}' ({}, {}) {}",
        m.class_name, m.class_type, m.class_id, state
    );
    match &resolution.model_link {
        ModelLink::Linked => println!("Model linked to class."),
        ModelLink::Skipped => {}
        ModelLink::Failed(reason) => println!("Model link failed (ignored): {}", reason),
    }
}

// ── Fetch-all ─────────────────────────────────────────────────────────

pub async fn run_fetch_all(
    gateway: &Gateway,
    variant_id: &str,
    json: bool,
    progress: ProgressMode,
) -> Result<()> {
    let parts = gateway.list_parts(variant_id).await;
    if parts.is_empty() {
        bail!("No parts available for this variant.");
    }

    let report = HierarchyAggregator::new(gateway.clone())
        .with_progress(progress.reporter())
        .aggregate_variant(variant_id, &parts)
        .await;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", render_report(&report));
    }
    Ok(())
}

/// Plain-text tree of a report, with per-part counts and a grand summary.
pub fn render_report(report: &VariantReport) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Variant {}  (generated {})",
        report.variant_id,
        report.generated_at.format("%Y-%m-%d %H:%M:%S UTC")
    );

    for part in &report.parts {
        let s = part.summary();
        let _ = writeln!(out);
        let _ = writeln!(
            out,
            "Part {}  [{} captures, {} modules, {} entries]",
            part.part_name, s.captures, s.modules, s.gt_entries
        );
        if let Some(line) = branch_note(&part.captures, "no captures") {
            let _ = writeln!(out, "  {}", line);
        }
        for capture in part.captures.items() {
            let _ = writeln!(out, "  Capture {}: {}", capture.capture.order, capture.capture.name);
            if let Some(line) = branch_note(&capture.modules, "no modules") {
                let _ = writeln!(out, "    {}", line);
            }
            for module in capture.modules.items() {
                let label = module.module.module_type;
                let head = format!("    {} module {}", label, module.module.order);
                match branch_note(&module.gt_entries, "no entries") {
                    Some(note) => {
                        let _ = writeln!(out, "{}: {}", head, note);
                    }
                    None => {
                        let entries = module.gt_entries.items();
                        let chips: Vec<String> = entries
                            .iter()
                            .filter_map(GroundTruth::chip)
                            .map(|chip| format!("[{}]", chip))
                            .collect();
                        if chips.is_empty() {
                            let _ = writeln!(out, "{}", head);
                        } else {
                            let _ = writeln!(out, "{}: {}", head, chips.join(" "));
                        }
                        for gt in entries {
                            let _ = writeln!(out, "      {}", gt_details(gt));
                        }
                    }
                }
            }
        }
    }

    let s = report.summary();
    let _ = writeln!(out);
    let _ = write!(
        out,
        "Summary: {} parts, {} captures, {} modules, {} ground-truth entries",
        s.parts, s.captures, s.modules, s.gt_entries
    );
    if s.failed_branches > 0 {
        let _ = write!(out, " ({} branches failed to load)", s.failed_branches);
    }
    let _ = writeln!(out);
    out
}

/// One line of non-blank fields for a ground-truth entry.
fn gt_details(gt: &GroundTruth) -> String {
    let fields: Vec<(&str, &str)> = match gt {
        GroundTruth::Ocr(e) => vec![
            ("key", e.option_key.as_str()),
            ("label", e.option_label.as_str()),
            ("value", e.value.as_str()),
            ("prefix", e.prefix.as_str()),
            ("suffix", e.suffix.as_str()),
            ("match", e.match_type.as_str()),
        ],
        GroundTruth::Detection(e) => vec![
            ("class", e.class_label()),
            ("key", e.option_key.as_str()),
            ("label", e.option_label.as_str()),
        ],
    };
    let parts: Vec<String> = fields
        .into_iter()
        .filter(|(_, v)| !v.trim().is_empty())
        .map(|(k, v)| format!("{}: {}", k, v))
        .collect();
    if parts.is_empty() {
        "(blank entry)".to_string()
    } else {
        parts.join("  ")
    }
}

fn branch_note<T>(branch: &Branch<T>, empty: &str) -> Option<String> {
    match branch {
        Branch::Loaded(items) if items.is_empty() => Some(format!("({})", empty)),
        Branch::Loaded(_) => None,
        Branch::Empty => Some(format!("({})", empty)),
        Branch::Failed(message) => Some(format!("FAILED: {}", message)),
    }
}

fn non_empty<'a>(what: &str, value: &'a str) -> Result<&'a str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        bail!("{} must not be empty", what);
    }
    Ok(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::{CaptureReport, ModuleReport, PartReport};
    use chrono::{TimeZone, Utc};
    use gt_console_core::models::{Capture, DetectionEntry, ModuleType, OcrEntry};

    fn module(order: i64, module_type: ModuleType) -> Module {
        serde_json::from_value(serde_json::json!({
            "id": format!("m{}", order), "capture_id": "c1", "order": order,
            "type": module_type.as_str()
        }))
        .unwrap()
    }

    #[test]
    fn test_render_report_shows_chips_counts_and_failures() {
        let capture = Capture {
            id: "c1".into(),
            variant_id: "v1".into(),
            part_id: "p1".into(),
            order: 1,
            name: "front".into(),
            image: None,
            image_flag: 0,
        };
        let report = VariantReport {
            variant_id: "v1".into(),
            generated_at: Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap(),
            parts: vec![
                PartReport {
                    part_id: "p1".into(),
                    part_name: "Door".into(),
                    captures: Branch::Loaded(vec![CaptureReport {
                        capture,
                        modules: Branch::Loaded(vec![
                            ModuleReport {
                                module: module(1, ModuleType::Ocr),
                                gt_entries: Branch::Loaded(vec![GroundTruth::Ocr(OcrEntry {
                                    value: "ABC123".into(),
                                    ..Default::default()
                                })]),
                            },
                            ModuleReport {
                                module: module(2, ModuleType::Detection),
                                gt_entries: Branch::Failed("fetch detection ground truth failed".into()),
                            },
                            ModuleReport {
                                module: module(3, ModuleType::Detection),
                                gt_entries: Branch::Loaded(vec![
                                    GroundTruth::Detection(DetectionEntry {
                                        class_value: "Dustbin".into(),
                                        option_key: "bin".into(),
                                        option_label: "Bin".into(),
                                        ..Default::default()
                                    }),
                                    GroundTruth::Detection(DetectionEntry {
                                        class_name: Some("Cone".into()),
                                        ..Default::default()
                                    }),
                                ]),
                            },
                        ]),
                    }]),
                },
                PartReport {
                    part_id: "p2".into(),
                    part_name: "Hood".into(),
                    captures: Branch::Empty,
                },
            ],
        };

        let text = render_report(&report);
        assert!(text.contains("generated 2026-01-02 03:04:05 UTC"));
        assert!(text.contains("Part Door  [1 captures, 3 modules, 3 entries]"));
        assert!(text.contains("OCR module 1: [ABC123]\n      value: ABC123"));
        assert!(text.contains("Detection module 2: FAILED: fetch detection ground truth failed"));
        // The blank label of the second entry yields no chip.
        assert!(text.contains("Detection module 3: [Bin]\n"));
        assert!(!text.contains("[-]"));
        assert!(text.contains("      class: Dustbin  key: bin  label: Bin\n"));
        assert!(text.contains("      class: Cone\n"));
        assert!(text.contains("Part Hood  [0 captures, 0 modules, 0 entries]\n  (no captures)"));
        assert!(text.contains("Summary: 2 parts, 1 captures, 3 modules, 3 ground-truth entries (1 branches failed to load)"));
    }

    #[test]
    fn test_non_empty_trims() {
        assert_eq!(non_empty("name", "  V1 ").unwrap(), "V1");
        assert!(non_empty("name", "   ").is_err());
    }
}
