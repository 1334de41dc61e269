//! Tasks — declared infrastructure intents consumed by the engine.
//!
//! A task names one cloud object and the properties it should have. Its
//! dependencies are every task it links to, computed once when the task is
//! built, so the resolver never has to inspect properties itself.

use serde::{Deserialize, Serialize};

use crate::resource::{Properties, Resource, ResourceKind, Tags, Value};

/// How the engine treats a task's object.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lifecycle {
    /// Fail if the object is absent. Never mutate it.
    MustExist,
    /// Fail if the object is absent or differs from the declaration.
    ExistsAndValidates,
    /// Create or update the object to match the declaration.
    #[default]
    Sync,
    /// Log absence or drift. Never mutate.
    WarnIfChanges,
}

impl Lifecycle {
    pub fn label(&self) -> &'static str {
        match self {
            Lifecycle::MustExist => "must_exist",
            Lifecycle::ExistsAndValidates => "exists_and_validates",
            Lifecycle::Sync => "sync",
            Lifecycle::WarnIfChanges => "warn_if_changes",
        }
    }
}

/// A declared infrastructure intent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    kind: ResourceKind,
    name: String,
    lifecycle: Lifecycle,
    tags: Tags,
    properties: Properties,
    dependencies: Vec<String>,
}

impl Task {
    pub fn builder(kind: &str, name: &str) -> TaskBuilder {
        TaskBuilder {
            kind: kind.to_string(),
            name: name.to_string(),
            lifecycle: Lifecycle::default(),
            tags: Tags::new(),
            properties: Properties::new(),
            no_dependencies: false,
        }
    }

    /// Task name, unique within a run.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    pub fn tags(&self) -> &Tags {
        &self.tags
    }

    pub fn properties(&self) -> &Properties {
        &self.properties
    }

    /// Names of the tasks that must be applied before this one, sorted.
    pub fn dependencies(&self) -> &[String] {
        &self.dependencies
    }

    /// The resource this task renders to the cloud, with links resolved to names.
    pub fn render(&self) -> Resource {
        Resource {
            kind: self.kind.clone(),
            name: self.name.clone(),
            id: None,
            tags: self.tags.clone(),
            properties: self
                .properties
                .iter()
                .map(|(k, v)| (k.clone(), v.rendered()))
                .collect(),
        }
    }
}

/// Builder for [`Task`]. Dependencies are derived in [`TaskBuilder::build`].
#[derive(Debug, Clone)]
pub struct TaskBuilder {
    kind: ResourceKind,
    name: String,
    lifecycle: Lifecycle,
    tags: Tags,
    properties: Properties,
    no_dependencies: bool,
}

impl TaskBuilder {
    pub fn lifecycle(mut self, lifecycle: Lifecycle) -> Self {
        self.lifecycle = lifecycle;
        self
    }

    pub fn tag(mut self, key: &str, value: &str) -> Self {
        self.tags.insert(key.to_string(), value.to_string());
        self
    }

    pub fn tags(mut self, tags: &Tags) -> Self {
        self.tags.extend(tags.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }

    pub fn property(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.properties.insert(field.to_string(), value.into());
        self
    }

    /// Reference another task through `field`.
    pub fn link(mut self, field: &str, target: &str) -> Self {
        self.properties
            .insert(field.to_string(), Value::Link(target.to_string()));
        self
    }

    /// Declare that this task's links impose no ordering.
    pub fn no_dependencies(mut self) -> Self {
        self.no_dependencies = true;
        self
    }

    pub fn build(self) -> Task {
        let dependencies = if self.no_dependencies {
            Vec::new()
        } else {
            let mut links = Vec::new();
            for value in self.properties.values() {
                value.collect_links(&mut links);
            }
            let mut deps: Vec<String> = links.into_iter().map(str::to_string).collect();
            deps.sort();
            deps.dedup();
            deps
        };

        Task {
            kind: self.kind,
            name: self.name,
            lifecycle: self.lifecycle,
            tags: self.tags,
            properties: self.properties,
            dependencies,
        }
    }
}
