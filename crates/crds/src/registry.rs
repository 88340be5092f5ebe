//! Resource registry
//!
//! The set of custom resources this operator serves. The composition root
//! builds it explicitly at startup; nothing registers itself on import.

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::{CustomResourceExt, Resource};
use thiserror::Error;

/// Errors raised while building or rendering the registry
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The same kind was registered twice
    #[error("resource kind already registered: {0}")]
    Duplicate(String),

    /// CRD manifest could not be rendered
    #[error("failed to render CRD manifest: {0}")]
    Render(#[from] serde_yaml::Error),
}

/// A custom resource known to the operator
#[derive(Debug, Clone)]
pub struct RegisteredResource {
    /// API group
    pub group: String,
    /// API version
    pub version: String,
    /// Resource kind
    pub kind: String,
    /// `<plural>.<group>`
    pub crd_name: String,
    crd: fn() -> CustomResourceDefinition,
}

impl RegisteredResource {
    /// Generates the CRD manifest for this resource
    pub fn crd(&self) -> CustomResourceDefinition {
        (self.crd)()
    }
}

/// Explicit registry of served resource kinds
#[derive(Debug, Clone, Default)]
pub struct ResourceRegistry {
    resources: Vec<RegisteredResource>,
}

impl ResourceRegistry {
    /// Registry with nothing registered
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a resource kind; registering a kind twice is an error
    pub fn register<K>(mut self) -> Result<Self, RegistryError>
    where
        K: CustomResourceExt + Resource<DynamicType = ()>,
    {
        let kind = K::kind(&()).to_string();
        if self.contains(&kind) {
            return Err(RegistryError::Duplicate(kind));
        }

        self.resources.push(RegisteredResource {
            group: K::group(&()).to_string(),
            version: K::version(&()).to_string(),
            kind,
            crd_name: K::crd_name().to_string(),
            crd: K::crd,
        });
        Ok(self)
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.resources.iter().any(|r| r.kind == kind)
    }

    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.resources.iter().map(|r| r.kind.as_str())
    }

    pub fn resources(&self) -> &[RegisteredResource] {
        &self.resources
    }

    /// Renders every registered CRD as a multi-document YAML stream
    pub fn render_yaml(&self) -> Result<String, RegistryError> {
        let mut out = String::new();
        for resource in &self.resources {
            out.push_str("---\n");
            out.push_str(&serde_yaml::to_string(&resource.crd())?);
        }
        Ok(out)
    }
}
