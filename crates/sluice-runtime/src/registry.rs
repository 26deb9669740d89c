//! Component registry
//!
//! Maps the string identifiers used in job properties to factories. An
//! identifier is either `name` or `name:arg`; the argument is handed to the
//! factory. Lookups happen while job settings are resolved, so an unknown
//! identifier fails the job before anything is dispatched.

use std::collections::HashMap;
use std::sync::Arc;

use crate::converter::{self, Converter};
use crate::error::{ComponentKind, PlanningError};
use crate::policy::builtin;
use crate::policy::{RowLevelPolicy, TaskLevelPolicy};
use crate::source::{CsvSource, JsonLinesSource, Source};
use crate::writer::{CsvWriterFactory, JsonLinesWriterFactory, WriterFactory};

/// Builds a component from its optional argument
pub type Factory<T> = Arc<dyn Fn(Option<&str>) -> Result<Arc<T>, String> + Send + Sync>;

pub struct Registry {
    sources: HashMap<String, Factory<dyn Source>>,
    converters: HashMap<String, Factory<dyn Converter>>,
    row_policies: HashMap<String, Factory<dyn RowLevelPolicy>>,
    task_policies: HashMap<String, Factory<dyn TaskLevelPolicy>>,
    writers: HashMap<String, Factory<dyn WriterFactory>>,
}

/// Wrap a constructor for a component that takes no argument
pub fn simple<T: ?Sized + 'static>(
    build: impl Fn() -> Arc<T> + Send + Sync + 'static,
) -> Factory<T> {
    Arc::new(move |arg: Option<&str>| match arg {
        None => Ok(build()),
        Some(arg) => Err(format!("unexpected argument '{}'", arg)),
    })
}

impl Registry {
    /// Empty registry
    pub fn empty() -> Self {
        Self {
            sources: HashMap::new(),
            converters: HashMap::new(),
            row_policies: HashMap::new(),
            task_policies: HashMap::new(),
            writers: HashMap::new(),
        }
    }

    /// Registry with every built-in component
    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();

        registry.register_source(
            "jsonl",
            simple(|| Arc::new(JsonLinesSource) as Arc<dyn Source>),
        );
        registry.register_source("csv", simple(|| Arc::new(CsvSource) as Arc<dyn Source>));

        registry.register_converter(
            "identity",
            simple(|| Arc::new(converter::Identity) as Arc<dyn Converter>),
        );
        registry.register_converter(
            "flatten",
            simple(|| Arc::new(converter::Flatten) as Arc<dyn Converter>),
        );
        registry.register_converter(
            "drop-nulls",
            simple(|| Arc::new(converter::DropNulls) as Arc<dyn Converter>),
        );
        registry.register_converter(
            "explode",
            simple(|| Arc::new(converter::Explode) as Arc<dyn Converter>),
        );

        registry.register_row_policy(
            "schema-row-check",
            simple(|| Arc::new(builtin::SchemaRowCheck) as Arc<dyn RowLevelPolicy>),
        );
        registry.register_row_policy(
            "not-empty",
            simple(|| Arc::new(builtin::NotEmpty) as Arc<dyn RowLevelPolicy>),
        );
        registry.register_row_policy(
            "required-field",
            Arc::new(|arg: Option<&str>| match arg {
                Some(field) if !field.is_empty() => {
                    Ok(Arc::new(builtin::RequiredField::new(field)) as Arc<dyn RowLevelPolicy>)
                }
                _ => Err("a field name is required".to_string()),
            }),
        );

        registry.register_task_policy(
            "row-count",
            simple(|| Arc::new(builtin::RowCount) as Arc<dyn TaskLevelPolicy>),
        );
        registry.register_task_policy(
            "schema-compatibility",
            simple(|| Arc::new(builtin::SchemaCompatibility) as Arc<dyn TaskLevelPolicy>),
        );
        registry.register_task_policy(
            "min-row-count",
            Arc::new(|arg: Option<&str>| -> Result<Arc<dyn TaskLevelPolicy>, String> {
                let min = arg
                    .ok_or_else(|| "a minimum row count is required".to_string())?
                    .parse::<u64>()
                    .map_err(|e| e.to_string())?;
                Ok(Arc::new(builtin::MinRowCount::new(min)))
            }),
        );

        registry.register_writer(
            "jsonl",
            simple(|| Arc::new(JsonLinesWriterFactory) as Arc<dyn WriterFactory>),
        );
        registry.register_writer(
            "csv",
            simple(|| Arc::new(CsvWriterFactory) as Arc<dyn WriterFactory>),
        );

        registry
    }

    pub fn register_source(&mut self, name: &str, factory: Factory<dyn Source>) {
        self.sources.insert(name.to_string(), factory);
    }

    pub fn register_converter(&mut self, name: &str, factory: Factory<dyn Converter>) {
        self.converters.insert(name.to_string(), factory);
    }

    pub fn register_row_policy(&mut self, name: &str, factory: Factory<dyn RowLevelPolicy>) {
        self.row_policies.insert(name.to_string(), factory);
    }

    pub fn register_task_policy(&mut self, name: &str, factory: Factory<dyn TaskLevelPolicy>) {
        self.task_policies.insert(name.to_string(), factory);
    }

    pub fn register_writer(&mut self, name: &str, factory: Factory<dyn WriterFactory>) {
        self.writers.insert(name.to_string(), factory);
    }

    pub fn source(&self, id: &str) -> Result<Arc<dyn Source>, PlanningError> {
        resolve(&self.sources, ComponentKind::Source, id)
    }

    pub fn converter(&self, id: &str) -> Result<Arc<dyn Converter>, PlanningError> {
        resolve(&self.converters, ComponentKind::Converter, id)
    }

    pub fn row_policy(&self, id: &str) -> Result<Arc<dyn RowLevelPolicy>, PlanningError> {
        resolve(&self.row_policies, ComponentKind::RowLevelPolicy, id)
    }

    pub fn task_policy(&self, id: &str) -> Result<Arc<dyn TaskLevelPolicy>, PlanningError> {
        resolve(&self.task_policies, ComponentKind::TaskLevelPolicy, id)
    }

    pub fn writer(&self, id: &str) -> Result<Arc<dyn WriterFactory>, PlanningError> {
        resolve(&self.writers, ComponentKind::Writer, id)
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

fn resolve<T: ?Sized>(
    factories: &HashMap<String, Factory<T>>,
    kind: ComponentKind,
    id: &str,
) -> Result<Arc<T>, PlanningError> {
    let (name, arg) = match id.split_once(':') {
        Some((name, arg)) => (name.trim(), Some(arg.trim())),
        None => (id.trim(), None),
    };

    let factory = factories
        .get(name)
        .ok_or_else(|| PlanningError::UnknownComponent {
            kind,
            name: name.to_string(),
        })?;

    factory(arg).map_err(|reason| PlanningError::InvalidComponentArgument {
        kind,
        name: id.to_string(),
        reason,
    })
}
