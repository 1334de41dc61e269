//! Cloud resources, property values, and field-level deltas.
//!
//! The engine treats provider fields as opaque `Value`s. The only value it
//! interprets is `Value::Link`, a reference to another task by name, which
//! drives dependency ordering and is compared by target name when diffing.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Kind of a cloud object (`"network"`, `"autoscaling-group"`, ...).
pub type ResourceKind = String;

/// Declared or observed properties of a resource, keyed by field name.
pub type Properties = BTreeMap<String, Value>;

/// Cloud tags attached to a resource.
pub type Tags = BTreeMap<String, String>;

/// Well-known resource kinds interpreted outside the engine.
pub mod kinds {
    pub const NETWORK: &str = "network";
    pub const SUBNET: &str = "subnet";
    pub const FIREWALL_RULE: &str = "firewall-rule";
    pub const LOAD_BALANCER: &str = "load-balancer";
    pub const IAM_ROLE: &str = "iam-role";
    pub const LAUNCH_CONFIGURATION: &str = "launch-configuration";
    pub const AUTOSCALING_GROUP: &str = "autoscaling-group";
    pub const INSTANCE: &str = "instance";
}

/// An opaque property value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Value {
    Str(String),
    Int(i64),
    Bool(bool),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
    /// Reference to another task, by task name.
    Link(String),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    /// A string or a link, as the name the cloud stores.
    pub fn as_name(&self) -> Option<&str> {
        match self {
            Value::Str(s) | Value::Link(s) => Some(s),
            _ => None,
        }
    }

    /// Collect every task name linked from this value, recursively.
    pub fn collect_links<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Value::Link(target) => out.push(target),
            Value::List(items) => items.iter().for_each(|v| v.collect_links(out)),
            Value::Map(m) => m.values().for_each(|v| v.collect_links(out)),
            Value::Str(_) | Value::Int(_) | Value::Bool(_) => {}
        }
    }

    /// The value as sent to the cloud: links become the target's name.
    pub fn rendered(&self) -> Value {
        match self {
            Value::Link(target) => Value::Str(target.clone()),
            Value::List(items) => Value::List(items.iter().map(Value::rendered).collect()),
            Value::Map(m) => Value::Map(
                m.iter()
                    .map(|(k, v)| (k.clone(), v.rendered()))
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    /// Structural equality where a link equals the string naming its target.
    pub fn matches(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Link(a), Value::Str(b)) | (Value::Str(a), Value::Link(b)) => a == b,
            (Value::List(a), Value::List(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.matches(y))
            }
            (Value::Map(a), Value::Map(b)) => {
                a.len() == b.len()
                    && a.iter()
                        .all(|(k, v)| b.get(k).is_some_and(|other| v.matches(other)))
            }
            _ => self == other,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Str(s) => write!(f, "{s:?}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Link(target) => write!(f, "<{target}>"),
            Value::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Value::Map(m) => {
                write!(f, "{{")?;
                for (i, (k, v)) in m.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{k}: {v}")?;
                }
                write!(f, "}}")
            }
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

/// A cloud object as observed (or about to be rendered).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub kind: ResourceKind,
    pub name: String,
    /// Provider-assigned identifier, absent until created.
    pub id: Option<String>,
    pub tags: Tags,
    pub properties: Properties,
}

impl Resource {
    pub fn new(kind: &str, name: &str) -> Self {
        Self {
            kind: kind.to_string(),
            name: name.to_string(),
            id: None,
            tags: Tags::new(),
            properties: Properties::new(),
        }
    }

    /// `{kind}/{name}`, unique per cloud.
    pub fn key(&self) -> String {
        format!("{}/{}", self.kind, self.name)
    }

    pub fn property(&self, field: &str) -> Option<&Value> {
        self.properties.get(field)
    }

    /// True if every tag in `query` is present with the same value.
    pub fn has_tags(&self, query: &Tags) -> bool {
        query.iter().all(|(k, v)| self.tags.get(k) == Some(v))
    }
}

/// One changed field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldChange {
    /// Observed value, `None` if the cloud does not report the field.
    pub from: Option<Value>,
    pub to: Value,
}

/// One changed tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagChange {
    pub from: Option<String>,
    pub to: String,
}

/// Field-level difference between declared and observed state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Delta {
    pub fields: BTreeMap<String, FieldChange>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, TagChange>,
}

impl Delta {
    /// Compare declared fields against observed ones.
    ///
    /// Fields the cloud reports but the declaration omits are ignored.
    pub fn between(declared: &Properties, observed: &Properties) -> Self {
        let fields = declared
            .iter()
            .filter_map(|(field, want)| match observed.get(field) {
                Some(have) if want.matches(have) => None,
                have => Some((
                    field.clone(),
                    FieldChange {
                        from: have.cloned(),
                        to: want.clone(),
                    },
                )),
            })
            .collect();
        Self {
            fields,
            tags: BTreeMap::new(),
        }
    }

    /// Compare declared tags and properties against an observed resource.
    ///
    /// Tags follow the same rule as fields: undeclared tags are left alone.
    pub fn for_resource(declared_tags: &Tags, declared: &Properties, observed: &Resource) -> Self {
        let mut delta = Self::between(declared, &observed.properties);
        delta.tags = declared_tags
            .iter()
            .filter(|(key, want)| observed.tags.get(*key) != Some(*want))
            .map(|(key, want)| {
                let change = TagChange {
                    from: observed.tags.get(key).cloned(),
                    to: want.clone(),
                };
                (key.clone(), change)
            })
            .collect();
        delta
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty() && self.tags.is_empty()
    }

    /// Apply this delta on top of `properties`.
    pub fn apply_to(&self, properties: &mut Properties) {
        for (field, change) in &self.fields {
            properties.insert(field.clone(), change.to.rendered());
        }
    }

    pub fn apply_tags(&self, tags: &mut Tags) {
        for (key, change) in &self.tags {
            tags.insert(key.clone(), change.to.clone());
        }
    }
}

impl fmt::Display for Delta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fields = self.fields.iter().map(|(field, change)| match &change.from {
            Some(from) => format!("{field}: {from} -> {}", change.to),
            None => format!("{field}: <unset> -> {}", change.to),
        });
        let tags = self.tags.iter().map(|(key, change)| match &change.from {
            Some(from) => format!("tags.{key}: {from:?} -> {:?}", change.to),
            None => format!("tags.{key}: <unset> -> {:?}", change.to),
        });
        f.write_str(&fields.chain(tags).collect::<Vec<_>>().join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props(pairs: &[(&str, Value)]) -> Properties {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn delta_ignores_undeclared_fields() {
        let declared = props(&[("cidr", "10.0.0.0/16".into())]);
        let observed = props(&[
            ("cidr", "10.0.0.0/16".into()),
            ("self_link", "projects/p/networks/main".into()),
        ]);
        assert!(Delta::between(&declared, &observed).is_empty());
    }

    #[test]
    fn delta_reports_changed_and_missing_fields() {
        let declared = props(&[("min_size", Value::Int(2)), ("max_size", Value::Int(4))]);
        let observed = props(&[("min_size", Value::Int(1))]);
        let delta = Delta::between(&declared, &observed);

        assert_eq!(delta.fields.len(), 2);
        assert_eq!(delta.fields["min_size"].from, Some(Value::Int(1)));
        assert_eq!(delta.fields["max_size"].from, None);
        assert_eq!(delta.to_string(), "max_size: <unset> -> 4, min_size: 1 -> 2");
    }

    #[test]
    fn tag_drift_is_part_of_the_delta() {
        let mut live = Resource::new(kinds::AUTOSCALING_GROUP, "nodes.example.com");
        live.tags.insert("KubernetesCluster".into(), "example.com".into());
        live.tags.insert("aws:managed".into(), "true".into());
        let declared = Tags::from([
            ("KubernetesCluster".to_string(), "example.com".to_string()),
            ("Owner".to_string(), "platform".to_string()),
        ]);

        let delta = Delta::for_resource(&declared, &Properties::new(), &live);
        assert!(delta.fields.is_empty());
        assert_eq!(delta.tags.keys().collect::<Vec<_>>(), vec!["Owner"]);
        assert_eq!(delta.to_string(), "tags.Owner: <unset> -> \"platform\"");

        delta.apply_tags(&mut live.tags);
        assert!(Delta::for_resource(&declared, &Properties::new(), &live).is_empty());
        assert_eq!(live.tags["aws:managed"], "true");
    }

    #[test]
    fn link_matches_string_of_same_name() {
        let declared = props(&[("network", Value::Link("main".into()))]);
        let observed = props(&[("network", "main".into())]);
        assert!(Delta::between(&declared, &observed).is_empty());

        let moved = props(&[("network", "other".into())]);
        assert!(!Delta::between(&declared, &moved).is_empty());
    }

    #[test]
    fn links_collected_through_lists_and_maps() {
        let value = Value::List(vec![
            Value::Link("a".into()),
            Value::Map(BTreeMap::from([("inner".to_string(), Value::Link("b".into()))])),
            Value::Str("c".into()),
        ]);
        let mut links = Vec::new();
        value.collect_links(&mut links);
        assert_eq!(links, vec!["a", "b"]);
    }

    #[test]
    fn apply_delta_converges_properties() {
        let declared = props(&[("port", Value::Int(443)), ("protocol", "TCP".into())]);
        let mut observed = props(&[("port", Value::Int(80))]);
        Delta::between(&declared, &observed).apply_to(&mut observed);
        assert!(Delta::between(&declared, &observed).is_empty());
    }

    #[test]
    fn has_tags_is_superset_match() {
        let mut r = Resource::new(kinds::AUTOSCALING_GROUP, "nodes.example.com");
        r.tags.insert("KubernetesCluster".into(), "example.com".into());
        r.tags.insert("Role".into(), "node".into());

        let query = Tags::from([("KubernetesCluster".to_string(), "example.com".to_string())]);
        assert!(r.has_tags(&query));

        let other = Tags::from([("KubernetesCluster".to_string(), "other.com".to_string())]);
        assert!(!r.has_tags(&other));
    }
}
