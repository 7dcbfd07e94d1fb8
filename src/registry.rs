//! Lookup from a configuration type name to the constructor of a stage.
//!
//! Each stage kind has its own [`TypeRegistry`]. The built-in registries are populated from a
//! fixed startup list the first time they are touched and are read-only afterwards. Embedders
//! that need additional types start from [`Registries::with_builtins`] and register their own
//! before building a pipeline.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::LazyLock;

use serde::Serialize;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::input::{self, InputConfig};
use crate::output::{self, OutputConfig};
use crate::processor::{self, ProcessorConfig};
use crate::stage::{Input, Output, Processor, StageKind};
use crate::stats::Stats;

/// Builds a stage from its kind's configuration record. The [`Stats`] handle is already
/// scoped to `<kind>.<type>`.
pub type Constructor<C, T> = fn(&C, Stats) -> Result<Box<T>>;

/// Documentation of a single configuration field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldSpec {
    pub name: &'static str,
    pub description: &'static str,
    /// Rarely needed fields, hidden from the short form of the docs.
    pub advanced: bool,
    /// Whether the field supports `${! ... }` interpolation.
    pub interpolated: bool,
    /// Closed set of accepted values, empty when the field is free-form.
    pub options: Vec<&'static str>,
}

impl FieldSpec {
    pub fn new(name: &'static str, description: &'static str) -> Self {
        Self {
            name,
            description,
            advanced: false,
            interpolated: false,
            options: Vec::new(),
        }
    }

    pub fn advanced(mut self) -> Self {
        self.advanced = true;
        self
    }

    pub fn interpolated(mut self) -> Self {
        self.interpolated = true;
        self
    }

    pub fn options(mut self, options: &[&'static str]) -> Self {
        self.options = options.to_vec();
        self
    }
}

/// Everything a registry knows about one stage type.
pub struct TypeSpec<C, T: ?Sized> {
    pub name: &'static str,
    pub summary: &'static str,
    pub fields: Vec<FieldSpec>,
    /// The type's default configuration record.
    pub defaults: Value,
    pub constructor: Constructor<C, T>,
}

impl<C, T: ?Sized> TypeSpec<C, T> {
    pub fn new(name: &'static str, summary: &'static str, constructor: Constructor<C, T>) -> Self {
        Self {
            name,
            summary,
            fields: Vec::new(),
            defaults: Value::Null,
            constructor,
        }
    }

    pub fn field(mut self, field: FieldSpec) -> Self {
        self.fields.push(field);
        self
    }

    /// Records `defaults` as the documented default configuration.
    pub fn defaults<D: Serialize>(mut self, defaults: &D) -> Self {
        self.defaults = serde_json::to_value(defaults).unwrap_or(Value::Null);
        self
    }
}

impl<C, T: ?Sized> fmt::Debug for TypeSpec<C, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeSpec")
            .field("name", &self.name)
            .field("summary", &self.summary)
            .field("fields", &self.fields)
            .field("defaults", &self.defaults)
            .finish_non_exhaustive()
    }
}

/// Registered types of one stage kind.
pub struct TypeRegistry<C, T: ?Sized> {
    kind: StageKind,
    types: BTreeMap<&'static str, TypeSpec<C, T>>,
}

impl<C, T: ?Sized> fmt::Debug for TypeRegistry<C, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeRegistry")
            .field("kind", &self.kind)
            .field("types", &self.types.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl<C, T: ?Sized> TypeRegistry<C, T> {
    pub fn new(kind: StageKind) -> Self {
        Self {
            kind,
            types: BTreeMap::new(),
        }
    }

    pub fn kind(&self) -> StageKind {
        self.kind
    }

    /// Adds a type. A name can only be registered once.
    pub fn register(&mut self, spec: TypeSpec<C, T>) -> Result<()> {
        if self.types.contains_key(spec.name) {
            return Err(Error::DuplicateType {
                kind: self.kind,
                name: spec.name.to_string(),
            });
        }
        self.types.insert(spec.name, spec);
        Ok(())
    }

    /// Builds the stage registered as `name`, propagating the constructor's error verbatim.
    pub fn construct(&self, name: &str, config: &C, stats: &Stats) -> Result<Box<T>> {
        let spec = self.spec(name).ok_or_else(|| Error::UnknownType {
            kind: self.kind,
            name: name.to_string(),
        })?;
        let stats = stats.scoped(&self.kind.to_string()).scoped(spec.name);
        (spec.constructor)(config, stats)
    }

    pub fn spec(&self, name: &str) -> Option<&TypeSpec<C, T>> {
        self.types.get(name)
    }

    /// Registered names in lexical order.
    pub fn type_names(&self) -> Vec<&'static str> {
        self.types.keys().copied().collect()
    }

    fn with_specs(kind: StageKind, specs: Vec<TypeSpec<C, T>>) -> Result<Self> {
        let mut registry = Self::new(kind);
        for spec in specs {
            registry.register(spec)?;
        }
        Ok(registry)
    }
}

pub type InputRegistry = TypeRegistry<InputConfig, dyn Input>;
pub type ProcessorRegistry = TypeRegistry<ProcessorConfig, dyn Processor>;
pub type OutputRegistry = TypeRegistry<OutputConfig, dyn Output>;

/// One registry per stage kind.
#[derive(Debug)]
pub struct Registries {
    pub inputs: InputRegistry,
    pub processors: ProcessorRegistry,
    pub outputs: OutputRegistry,
}

static BUILTIN: LazyLock<Registries> = LazyLock::new(|| {
    // the startup lists are fixed, a clash between them is a programming error
    Registries::with_builtins().expect("built-in stage type names are unique")
});

impl Registries {
    /// Registries without any types.
    pub fn empty() -> Self {
        Self {
            inputs: TypeRegistry::new(StageKind::Input),
            processors: TypeRegistry::new(StageKind::Processor),
            outputs: TypeRegistry::new(StageKind::Output),
        }
    }

    /// Fresh registries holding every built-in type, open for further registrations.
    pub fn with_builtins() -> Result<Self> {
        Ok(Self {
            inputs: TypeRegistry::with_specs(StageKind::Input, input::builtin_specs())?,
            processors: TypeRegistry::with_specs(
                StageKind::Processor,
                processor::builtin_specs(),
            )?,
            outputs: TypeRegistry::with_specs(StageKind::Output, output::builtin_specs())?,
        })
    }

    /// The process-wide built-in registries.
    pub fn builtin() -> &'static Registries {
        &BUILTIN
    }

    /// Names and summaries of every type of `kind`.
    pub fn summaries(&self, kind: StageKind) -> Vec<(&'static str, &'static str)> {
        fn collect<C, T: ?Sized>(r: &TypeRegistry<C, T>) -> Vec<(&'static str, &'static str)> {
            r.types.values().map(|s| (s.name, s.summary)).collect()
        }
        match kind {
            StageKind::Input => collect(&self.inputs),
            StageKind::Processor => collect(&self.processors),
            StageKind::Output => collect(&self.outputs),
        }
    }

    /// Field docs and defaults of the `name` type of `kind`.
    pub fn docs(&self, kind: StageKind, name: &str) -> Option<(Vec<FieldSpec>, Value)> {
        fn lookup<C, T: ?Sized>(
            r: &TypeRegistry<C, T>,
            name: &str,
        ) -> Option<(Vec<FieldSpec>, Value)> {
            r.spec(name).map(|s| (s.fields.clone(), s.defaults.clone()))
        }
        match kind {
            StageKind::Input => lookup(&self.inputs, name),
            StageKind::Processor => lookup(&self.processors, name),
            StageKind::Output => lookup(&self.outputs, name),
        }
    }
}
