//! Class Resolver.
//!
//! Ensures a Module is bound to the right registry Class, creating the
//! Class when it does not exist yet, and links the Module's detection model
//! to that Class on a best-effort basis.
//!
//! Resolution is always lookup-then-map, never blind-create: the registry is
//! searched first (OCR modules by class *type*, Detection modules by
//! case-insensitive *name*), and only a miss sends a `{name, type}` selector
//! that asks the backend to create the class. The backend enforces
//! idempotency; the `already_existed` flag it returns is passed through
//! untouched.
//!
//! # Registry cache
//!
//! The registry is fetched once and shared by all clones of a resolver. It
//! is never patched locally: any mapping that may have created a class
//! drops the cache, and the next lookup re-fetches it wholesale.
//!
//! # Failure policy
//!
//! | Step | On failure |
//! |------|------------|
//! | Registry fetch | [`ResolveError::Registry`] |
//! | Module↔Class mapping | [`ResolveError::Mapping`] |
//! | Model↔Class link | logged, reported as [`ModelLink::Failed`] |

use gt_console_core::models::{ClassRecord, ClassType, Module, ModuleClassMapping, ModuleType};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::api::ClassSelector;
use crate::gateway::{Gateway, GatewayError};

/// Name of the single class every OCR module maps to when none exists.
pub const OCR_CLASS_NAME: &str = "ocr";

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("class registry unavailable: {0}")]
    Registry(#[source] GatewayError),

    #[error("mapping class to module {module_id} failed: {source}")]
    Mapping {
        module_id: String,
        #[source]
        source: GatewayError,
    },

    #[error("a class name is required")]
    MissingClassName,

    #[error("class type '{0}' is not selectable for a detection module")]
    InvalidClassType(ClassType),

    #[error("module {module_id} is {actual}, expected {expected}")]
    WrongModuleType {
        module_id: String,
        expected: ModuleType,
        actual: ModuleType,
    },
}

impl ResolveError {
    /// The underlying gateway error, if the failure came from the backend.
    pub fn gateway_error(&self) -> Option<&GatewayError> {
        match self {
            ResolveError::Registry(e) | ResolveError::Mapping { source: e, .. } => Some(e),
            _ => None,
        }
    }
}

/// Outcome of the best-effort Model↔Class link.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelLink {
    Linked,
    /// No model id on the module, or no class id in the mapping.
    Skipped,
    Failed(String),
}

/// The Module↔Class mapping as reported by the backend, plus what happened
/// to the Model↔Class side effect.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub mapping: ModuleClassMapping,
    pub model_link: ModelLink,
}

/// Manual class choice used by the review flow.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClassChoice {
    /// Bind this registry class directly.
    pub class_id: Option<String>,
    pub name: Option<String>,
    pub class_type: Option<ClassType>,
}

/// Resolves and records Module↔Class mappings. Cheap to clone; clones share
/// the gateway and the registry cache.
#[derive(Clone)]
pub struct ClassResolver {
    gateway: Gateway,
    registry: Arc<RwLock<Option<Arc<Vec<ClassRecord>>>>>,
}

impl ClassResolver {
    pub fn new(gateway: Gateway) -> Self {
        Self {
            gateway,
            registry: Arc::new(RwLock::new(None)),
        }
    }

    /// The cached class registry, fetched on first use.
    pub async fn registry(&self) -> Result<Arc<Vec<ClassRecord>>, ResolveError> {
        if let Some(cached) = self.registry.read().await.as_ref() {
            return Ok(cached.clone());
        }

        let mut slot = self.registry.write().await;
        if let Some(cached) = slot.as_ref() {
            return Ok(cached.clone());
        }
        let classes = Arc::new(
            self.gateway
                .fetch_classes()
                .await
                .map_err(ResolveError::Registry)?,
        );
        debug!(count = classes.len(), "class registry loaded");
        *slot = Some(classes.clone());
        Ok(classes)
    }

    /// Drop the cached registry.
    pub async fn invalidate(&self) {
        *self.registry.write().await = None;
    }

    async fn find_by_type(&self, class_type: ClassType) -> Result<Option<ClassRecord>, ResolveError> {
        let registry = self.registry().await?;
        Ok(registry.iter().find(|c| c.class_type == class_type).cloned())
    }

    async fn find_by_name(&self, name: &str) -> Result<Option<ClassRecord>, ResolveError> {
        let registry = self.registry().await?;
        let wanted = name.to_lowercase();
        Ok(registry
            .iter()
            .find(|c| c.name.trim().to_lowercase() == wanted)
            .cloned())
    }

    /// Map an OCR module to the registry's `ocr`-typed class, creating
    /// `{name: "ocr", type: "ocr"}` when there is none.
    pub async fn resolve_ocr_class(&self, module: &Module) -> Result<Resolution, ResolveError> {
        expect_type(module, ModuleType::Ocr)?;

        let selector = match self.find_by_type(ClassType::Ocr).await? {
            Some(existing) => ClassSelector::Existing {
                class_id: existing.id,
            },
            None => ClassSelector::New {
                name: OCR_CLASS_NAME.to_string(),
                class_type: ClassType::Ocr,
            },
        };
        self.bind(&module.id, module.detection_model_id.as_deref(), selector)
            .await
    }

    /// Map a Detection module to the class named `class_name`, creating a
    /// `detection`-typed class when the name is unknown.
    ///
    /// A blank name is a no-op and yields `Ok(None)`.
    pub async fn resolve_detection_class(
        &self,
        module: &Module,
        class_name: &str,
    ) -> Result<Option<Resolution>, ResolveError> {
        expect_type(module, ModuleType::Detection)?;

        let name = class_name.trim();
        if name.is_empty() {
            debug!(module_id = %module.id, "blank class name, nothing to resolve");
            return Ok(None);
        }

        let selector = match self.find_by_name(name).await? {
            Some(existing) => ClassSelector::Existing {
                class_id: existing.id,
            },
            None => ClassSelector::New {
                name: name.to_string(),
                class_type: ClassType::Detection,
            },
        };
        self.bind(&module.id, module.detection_model_id.as_deref(), selector)
            .await
            .map(Some)
    }

    /// Manual review mapping.
    ///
    /// - An explicit `class_id` binds that class for either module type.
    /// - OCR modules otherwise use `name` (default `"ocr"`), creating it as a
    ///   `text` class when absent.
    /// - Detection modules otherwise require `name`; a new class gets the
    ///   chosen type, `text` or `detection` (default `detection`).
    pub async fn resolve_generic_class(
        &self,
        module: &Module,
        choice: &ClassChoice,
    ) -> Result<Resolution, ResolveError> {
        let model_id = module.detection_model_id.as_deref();

        if let Some(class_id) = choice.class_id.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            let selector = ClassSelector::Existing {
                class_id: class_id.to_string(),
            };
            return self.bind(&module.id, model_id, selector).await;
        }

        let name = choice
            .name
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty());

        let (name, class_type) = match module.module_type {
            ModuleType::Ocr => (name.unwrap_or(OCR_CLASS_NAME), ClassType::Text),
            ModuleType::Detection => {
                let name = name.ok_or(ResolveError::MissingClassName)?;
                let class_type = choice.class_type.unwrap_or(ClassType::Detection);
                if class_type == ClassType::Ocr {
                    return Err(ResolveError::InvalidClassType(class_type));
                }
                (name, class_type)
            }
        };

        let selector = match self.find_by_name(name).await? {
            Some(existing) => ClassSelector::Existing {
                class_id: existing.id,
            },
            None => ClassSelector::New {
                name: name.to_string(),
                class_type,
            },
        };
        self.bind(&module.id, model_id, selector).await
    }

    /// Create-and-map with an explicit type, without a registry lookup.
    ///
    /// For flows where an operator has to decide the type of a new class.
    /// The backend still find-or-creates by name.
    pub async fn create_class_interactive(
        &self,
        name: &str,
        class_type: ClassType,
        module_id: &str,
        model_id: Option<&str>,
    ) -> Result<Resolution, ResolveError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ResolveError::MissingClassName);
        }
        let selector = ClassSelector::New {
            name: name.to_string(),
            class_type,
        };
        self.bind(module_id, model_id, selector).await
    }

    async fn bind(
        &self,
        module_id: &str,
        model_id: Option<&str>,
        selector: ClassSelector,
    ) -> Result<Resolution, ResolveError> {
        let result = self
            .gateway
            .map_class_to_module(module_id, &selector, model_id)
            .await;
        if selector.is_new() {
            // A failed create may still have landed server-side.
            self.invalidate().await;
        }
        let mapping = result.map_err(|source| ResolveError::Mapping {
            module_id: module_id.to_string(),
            source,
        })?;

        info!(
            module_id,
            class_id = %mapping.class_id,
            class_name = %mapping.class_name,
            already_existed = mapping.already_existed,
            "class mapped to module"
        );

        let model_link = self.link_model(model_id, &mapping.class_id).await;
        Ok(Resolution {
            mapping,
            model_link,
        })
    }

    async fn link_model(&self, model_id: Option<&str>, class_id: &str) -> ModelLink {
        let Some(model_id) = model_id.filter(|m| !m.trim().is_empty()) else {
            return ModelLink::Skipped;
        };
        if class_id.is_empty() {
            return ModelLink::Skipped;
        }
        match self.gateway.map_model_to_class(model_id, class_id).await {
            Ok(_) => ModelLink::Linked,
            Err(e) => {
                warn!(model_id, class_id, error = %e, "model-class link failed, continuing");
                ModelLink::Failed(e.to_string())
            }
        }
    }
}

fn expect_type(module: &Module, expected: ModuleType) -> Result<(), ResolveError> {
    if module.module_type == expected {
        Ok(())
    } else {
        Err(ResolveError::WrongModuleType {
            module_id: module.id.clone(),
            expected,
            actual: module.module_type,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryBackend;
    use crate::session::Session;
    use gt_console_core::transport::Method;

    struct Fixture {
        backend: Arc<InMemoryBackend>,
        resolver: ClassResolver,
        capture_id: String,
    }

    fn fixture() -> Fixture {
        let backend = Arc::new(InMemoryBackend::new());
        let v = backend.seed_variant("V1");
        let p = backend.seed_part(&v.id, "P1");
        let c = backend.seed_capture(&v.id, &p.id, 1, "front");
        let gateway = Gateway::new(backend.clone(), Arc::new(Session::new()));
        Fixture {
            backend,
            resolver: ClassResolver::new(gateway),
            capture_id: c.id,
        }
    }

    fn with_model(mut module: Module, model_id: &str) -> Module {
        module.detection_model_id = Some(model_id.to_string());
        module
    }

    fn registry_fetches(backend: &InMemoryBackend) -> usize {
        backend
            .requests()
            .iter()
            .filter(|r| r.method == Method::Get && r.path == "/classes")
            .count()
    }

    #[tokio::test]
    async fn test_ocr_class_is_created_once_then_reused() {
        let f = fixture();
        let module = with_model(f.backend.seed_module(&f.capture_id, 1, ModuleType::Ocr), "dm1");

        let first = f.resolver.resolve_ocr_class(&module).await.unwrap();
        let second = f.resolver.resolve_ocr_class(&module).await.unwrap();

        assert!(!first.mapping.already_existed);
        assert!(second.mapping.already_existed);
        assert_eq!(first.mapping.class_id, second.mapping.class_id);
        assert_eq!(first.model_link, ModelLink::Linked);

        let classes = f.backend.classes();
        assert_eq!(classes.len(), 1);
        assert_eq!(classes[0].class_type, ClassType::Ocr);
        assert_eq!(f.backend.model_class_links().len(), 1);
    }

    #[tokio::test]
    async fn test_ocr_matches_by_type_not_name() {
        let f = fixture();
        let existing = f.backend.seed_class("Generic OCR", ClassType::Ocr);
        let module = f.backend.seed_module(&f.capture_id, 1, ModuleType::Ocr);

        let r = f.resolver.resolve_ocr_class(&module).await.unwrap();
        assert_eq!(r.mapping.class_id, existing.id);
        assert_eq!(r.model_link, ModelLink::Skipped);
        assert_eq!(f.backend.classes().len(), 1);
    }

    #[tokio::test]
    async fn test_detection_lookup_is_case_insensitive() {
        let f = fixture();
        let existing = f.backend.seed_class("Dustbin", ClassType::Detection);
        let module = f.backend.seed_module(&f.capture_id, 1, ModuleType::Detection);

        let r = f
            .resolver
            .resolve_detection_class(&module, "  dustBIN ")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(r.mapping.class_id, existing.id);
        assert!(!r.mapping.already_existed);
        assert_eq!(f.backend.classes().len(), 1);
    }

    #[tokio::test]
    async fn test_detection_lookup_folds_non_ascii_case() {
        let f = fixture();
        let existing = f.backend.seed_class("Éclairage", ClassType::Detection);
        let module = f.backend.seed_module(&f.capture_id, 1, ModuleType::Detection);

        let r = f
            .resolver
            .resolve_detection_class(&module, "éCLAIRAGE")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(r.mapping.class_id, existing.id);
        assert_eq!(f.backend.classes().len(), 1);
    }

    #[tokio::test]
    async fn test_detection_blank_name_is_noop() {
        let f = fixture();
        let module = f.backend.seed_module(&f.capture_id, 1, ModuleType::Detection);
        let r = f.resolver.resolve_detection_class(&module, "   ").await.unwrap();
        assert!(r.is_none());
        assert!(f.backend.requests().is_empty());
    }

    #[tokio::test]
    async fn test_wrong_module_type_is_rejected() {
        let f = fixture();
        let module = f.backend.seed_module(&f.capture_id, 1, ModuleType::Detection);
        let err = f.resolver.resolve_ocr_class(&module).await.unwrap_err();
        assert!(matches!(err, ResolveError::WrongModuleType { .. }));
    }

    #[tokio::test]
    async fn test_model_link_failure_is_swallowed() {
        let f = fixture();
        f.backend.fail_path("/model-class-mapper", 500);
        let module = with_model(
            f.backend.seed_module(&f.capture_id, 1, ModuleType::Detection),
            "dm7",
        );

        let r = f
            .resolver
            .resolve_detection_class(&module, "Logo")
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(r.model_link, ModelLink::Failed(_)));
        assert_eq!(f.backend.module_class_links().len(), 1);
        assert!(f.backend.model_class_links().is_empty());
    }

    #[tokio::test]
    async fn test_registry_failure_is_hard_error() {
        let f = fixture();
        f.backend.fail_path("/classes", 503);
        let module = f.backend.seed_module(&f.capture_id, 1, ModuleType::Ocr);

        let err = f.resolver.resolve_ocr_class(&module).await.unwrap_err();
        assert!(matches!(err, ResolveError::Registry(_)));
        assert_eq!(err.gateway_error().and_then(|e| e.status()), Some(503));
        assert!(f.backend.module_class_links().is_empty());
    }

    #[tokio::test]
    async fn test_cache_is_refetched_only_after_create() {
        let f = fixture();
        f.backend.seed_class("Dustbin", ClassType::Detection);
        let module = f.backend.seed_module(&f.capture_id, 1, ModuleType::Detection);

        f.resolver.resolve_detection_class(&module, "Dustbin").await.unwrap();
        f.resolver.resolve_detection_class(&module, "Dustbin").await.unwrap();
        assert_eq!(registry_fetches(&f.backend), 1);

        f.resolver.resolve_detection_class(&module, "Logo").await.unwrap();
        f.resolver.resolve_detection_class(&module, "Logo").await.unwrap();
        assert_eq!(registry_fetches(&f.backend), 2);
        assert_eq!(f.backend.classes().len(), 2);
    }

    #[tokio::test]
    async fn test_generic_choice_branches() {
        let f = fixture();
        let ocr = f.backend.seed_module(&f.capture_id, 1, ModuleType::Ocr);
        let det = f.backend.seed_module(&f.capture_id, 2, ModuleType::Detection);

        let r = f
            .resolver
            .resolve_generic_class(&ocr, &ClassChoice::default())
            .await
            .unwrap();
        assert_eq!(r.mapping.class_name, "ocr");
        assert_eq!(r.mapping.class_type, ClassType::Text);

        let err = f
            .resolver
            .resolve_generic_class(&det, &ClassChoice::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::MissingClassName));

        let choice = ClassChoice {
            name: Some("Warning label".into()),
            class_type: Some(ClassType::Text),
            ..Default::default()
        };
        let r = f.resolver.resolve_generic_class(&det, &choice).await.unwrap();
        assert_eq!(r.mapping.class_type, ClassType::Text);

        let by_id = ClassChoice {
            class_id: Some(r.mapping.class_id.clone()),
            ..Default::default()
        };
        let again = f.resolver.resolve_generic_class(&det, &by_id).await.unwrap();
        assert!(again.mapping.already_existed);

        let bad = ClassChoice {
            name: Some("x".into()),
            class_type: Some(ClassType::Ocr),
            ..Default::default()
        };
        assert!(matches!(
            f.resolver.resolve_generic_class(&det, &bad).await,
            Err(ResolveError::InvalidClassType(ClassType::Ocr))
        ));
    }

    #[tokio::test]
    async fn test_interactive_create_skips_lookup() {
        let f = fixture();
        let det = f.backend.seed_module(&f.capture_id, 1, ModuleType::Detection);
        let r = f
            .resolver
            .create_class_interactive("Handle", ClassType::Detection, &det.id, Some("dm2"))
            .await
            .unwrap();
        assert_eq!(r.mapping.class_name, "Handle");
        assert_eq!(r.model_link, ModelLink::Linked);
        assert_eq!(registry_fetches(&f.backend), 0);
        assert!(matches!(
            f.resolver
                .create_class_interactive(" ", ClassType::Text, &det.id, None)
                .await,
            Err(ResolveError::MissingClassName)
        ));
    }
}
