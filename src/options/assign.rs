//! Option Assigner
//!
//! Parses a flat `key=value,key=value` override string and applies each
//! assignment, strictly left to right, to a live configuration model.
//!
//! Grammar:
//! - assignments are separated by `,`, key and value by the first `=`
//! - map values are `k:v;k:v`, sequence values are `v1;v2`
//! - there is no escaping, so values cannot contain `,` `=` `:` or `;`

use super::index::{LeafKind, OptionIndex, PathSegment};
use crate::error::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Number, Value};

/// Single `(key, value)` pair taken from an override string
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Assignment<'a> {
    pub key: &'a str,
    /// `None` when the assignment has no `=`
    pub value: Option<&'a str>,
}

/// Split an override string into assignments
pub fn parse_assignments(overrides: &str) -> impl Iterator<Item = Assignment<'_>> {
    overrides
        .split(',')
        .filter(|segment| !segment.trim().is_empty())
        .map(|segment| match segment.split_once('=') {
            Some((key, value)) => Assignment {
                key,
                value: Some(value),
            },
            None => Assignment {
                key: segment,
                value: None,
            },
        })
}

/// Apply an override string to a model.
///
/// Every assignment is committed to `model` as soon as it succeeds. On error
/// the model keeps the assignments that preceded the failing one, so callers
/// that need all-or-nothing semantics must discard it.
pub fn apply<M>(model: &mut M, index: &OptionIndex, overrides: &str) -> Result<()>
where
    M: Serialize + DeserializeOwned,
{
    if overrides.trim().is_empty() {
        return Ok(());
    }

    let mut image = serde_json::to_value(&*model)?;

    for assignment in parse_assignments(overrides) {
        let entry = index.lookup(assignment.key).ok_or_else(|| Error::UnknownOption {
            key: assignment.key.trim().to_string(),
        })?;

        let Some(raw) = assignment.value else {
            continue;
        };

        let target = Target {
            key: assignment.key.trim(),
            raw,
        };
        assign_path(&mut image, &entry.path, &entry.kind, &target)?;

        *model = serde_json::from_value(image.clone()).map_err(|e| target.error(e.to_string()))?;
    }

    Ok(())
}

// =============================================================================
// Path Walking
// =============================================================================

struct Target<'a> {
    key: &'a str,
    raw: &'a str,
}

impl Target<'_> {
    fn error(&self, reason: impl Into<String>) -> Error {
        Error::TypeCoercion {
            key: self.key.to_string(),
            value: self.raw.to_string(),
            reason: reason.into(),
        }
    }
}

fn assign_path(
    node: &mut Value,
    segments: &[PathSegment],
    kind: &LeafKind,
    target: &Target<'_>,
) -> Result<()> {
    match segments.split_first() {
        None => write_leaf(node, kind, target),
        Some((PathSegment::Field(name), rest)) => {
            // lazily allocate absent parents
            if node.is_null() {
                *node = Value::Object(Map::new());
            }
            let object = node
                .as_object_mut()
                .ok_or_else(|| target.error(format!("{} is not an object", name)))?;
            let child = object.entry(name.clone()).or_insert(Value::Null);
            assign_path(child, rest, kind, target)
        }
        Some((PathSegment::Each, rest)) => match node {
            Value::Array(items) => {
                for item in items.iter_mut() {
                    assign_path(item, rest, kind, target)?;
                }
                Ok(())
            }
            Value::Null => Ok(()),
            _ => Err(target.error("expected a sequence")),
        },
    }
}

fn write_leaf(slot: &mut Value, kind: &LeafKind, target: &Target<'_>) -> Result<()> {
    match kind {
        LeafKind::Sequence(elem) => {
            if slot.is_null() {
                *slot = Value::Array(Vec::new());
            }
            let items = slot
                .as_array_mut()
                .ok_or_else(|| target.error("expected a sequence"))?;
            for part in target.raw.split(';') {
                items.push(coerce(elem, part).map_err(|reason| target.error(reason))?);
            }
            Ok(())
        }
        LeafKind::Map(value_kind) => {
            if slot.is_null() {
                *slot = Value::Object(Map::new());
            }
            let entries = slot
                .as_object_mut()
                .ok_or_else(|| target.error("expected a map"))?;
            for entry in target.raw.split(';') {
                let (k, v) = entry
                    .split_once(':')
                    .ok_or_else(|| target.error(format!("map entry {:?} has no ':'", entry)))?;
                let value = coerce(value_kind, v).map_err(|reason| target.error(reason))?;
                entries.insert(k.to_string(), value);
            }
            Ok(())
        }
        _ => {
            *slot = coerce(kind, target.raw).map_err(|reason| target.error(reason))?;
            Ok(())
        }
    }
}

// =============================================================================
// Scalar Coercion
// =============================================================================

fn coerce(kind: &LeafKind, raw: &str) -> std::result::Result<Value, String> {
    match kind {
        LeafKind::Bool => match raw {
            "true" => Ok(Value::Bool(true)),
            "false" => Ok(Value::Bool(false)),
            _ => Err("expected true or false".to_string()),
        },
        LeafKind::Int { signed: true, bits } => {
            let parsed: i64 = raw
                .parse()
                .map_err(|e| format!("not a base-10 integer: {}", e))?;
            let bound = 1i128 << (u32::from(*bits) - 1);
            if i128::from(parsed) < -bound || i128::from(parsed) >= bound {
                return Err(format!("overflows int{}", bits));
            }
            Ok(Value::Number(parsed.into()))
        }
        LeafKind::Int { signed: false, bits } => {
            let parsed: u64 = raw
                .parse()
                .map_err(|e| format!("not a base-10 unsigned integer: {}", e))?;
            if *bits < 64 && parsed >= (1u64 << bits) {
                return Err(format!("overflows uint{}", bits));
            }
            Ok(Value::Number(parsed.into()))
        }
        LeafKind::Float { bits } => {
            let parsed: f64 = raw.parse().map_err(|e| format!("not a number: {}", e))?;
            if !parsed.is_finite() || (*bits == 32 && parsed.abs() > f64::from(f32::MAX)) {
                return Err(format!("overflows float{}", bits));
            }
            Number::from_f64(parsed)
                .map(Value::Number)
                .ok_or_else(|| format!("overflows float{}", bits))
        }
        LeafKind::String | LeafKind::Any => Ok(Value::String(raw.to_string())),
        LeafKind::Sequence(_) | LeafKind::Map(_) | LeafKind::Composite => {
            Err("nested collections and objects cannot be set from an override string".to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use schemars::JsonSchema;
    use serde::Deserialize;
    use std::collections::BTreeMap;

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
    #[serde(rename_all = "camelCase", default)]
    struct Limits {
        cpu: String,
        memory: String,
    }

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
    #[serde(rename_all = "camelCase", default)]
    struct Pod {
        size: i32,
        weight: u8,
        ratio: f32,
        enabled: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        limits: Option<Limits>,
        labels: BTreeMap<String, String>,
        ports: Vec<u16>,
        mode: Mode,
    }

    #[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
    #[serde(rename_all = "lowercase")]
    enum Mode {
        #[default]
        Sync,
        Async,
    }

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
    #[serde(rename_all = "camelCase", default)]
    struct Member {
        name: String,
        size: i32,
    }

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
    #[serde(rename_all = "camelCase", default)]
    struct Cluster {
        pod: Pod,
        members: Vec<Member>,
        #[serde(skip_serializing_if = "Option::is_none")]
        replicas: Option<i64>,
    }

    fn index() -> OptionIndex {
        OptionIndex::build::<Cluster>().unwrap()
    }

    #[test]
    fn test_parse_assignments() {
        let parsed: Vec<_> = parse_assignments("a=1,b,c=x=y").collect();
        assert_eq!(
            parsed,
            vec![
                Assignment { key: "a", value: Some("1") },
                Assignment { key: "b", value: None },
                Assignment { key: "c", value: Some("x=y") },
            ]
        );
        assert_eq!(parse_assignments("").count(), 0);
    }

    #[test]
    fn test_empty_overrides_is_noop() {
        let mut cluster = Cluster::default();
        apply(&mut cluster, &index(), "").unwrap();
        assert_eq!(cluster, Cluster::default());
    }

    #[test]
    fn test_scalar_assignment() {
        let mut cluster = Cluster::default();
        apply(
            &mut cluster,
            &index(),
            "pod.size=5,Pod.Weight=7,pod.ratio=0.25,pod.enabled=true,pod.mode=async",
        )
        .unwrap();

        assert_eq!(cluster.pod.size, 5);
        assert_eq!(cluster.pod.weight, 7);
        assert_eq!(cluster.pod.ratio, 0.25);
        assert!(cluster.pod.enabled);
        assert_eq!(cluster.pod.mode, Mode::Async);
    }

    #[test]
    fn test_optional_parents_are_allocated() {
        let mut cluster = Cluster::default();
        apply(&mut cluster, &index(), "pod.limits.cpu=300m,replicas=2").unwrap();

        let limits = cluster.pod.limits.unwrap();
        assert_eq!(limits.cpu, "300m");
        assert_eq!(limits.memory, "");
        assert_eq!(cluster.replicas, Some(2));
    }

    #[test]
    fn test_string_values_keep_case() {
        let mut cluster = Cluster::default();
        apply(&mut cluster, &index(), "POD.LIMITS.MEMORY=0.5G").unwrap();
        assert_eq!(cluster.pod.limits.unwrap().memory, "0.5G");
    }

    #[test]
    fn test_map_assignment_last_write_wins() {
        let mut cluster = Cluster::default();
        apply(&mut cluster, &index(), "pod.labels=app:db;tier:hot;app:mysql").unwrap();

        assert_eq!(cluster.pod.labels.len(), 2);
        assert_eq!(cluster.pod.labels["app"], "mysql");
        assert_eq!(cluster.pod.labels["tier"], "hot");
    }

    #[test]
    fn test_map_entry_without_colon_fails() {
        let mut cluster = Cluster::default();
        let err = apply(&mut cluster, &index(), "pod.labels=app").unwrap_err();
        assert_matches!(err, Error::TypeCoercion { key, .. } if key == "pod.labels");
    }

    #[test]
    fn test_sequence_assignment_appends() {
        let idx = index();
        let mut cluster = Cluster::default();
        apply(&mut cluster, &idx, "pod.ports=3306;33060").unwrap();
        assert_eq!(cluster.pod.ports, vec![3306, 33060]);

        apply(&mut cluster, &idx, "pod.ports=3306;33060").unwrap();
        assert_eq!(cluster.pod.ports, vec![3306, 33060, 3306, 33060]);
    }

    #[test]
    fn test_scalar_assignment_is_idempotent() {
        let idx = index();
        let mut once = Cluster::default();
        apply(&mut once, &idx, "pod.size=4").unwrap();

        let mut twice = Cluster::default();
        apply(&mut twice, &idx, "pod.size=4").unwrap();
        apply(&mut twice, &idx, "pod.size=4").unwrap();

        assert_eq!(once, twice);
    }

    #[test]
    fn test_sequence_of_structs_is_broadcast() {
        let mut cluster = Cluster {
            members: vec![
                Member { name: "rs0".into(), size: 3 },
                Member { name: "rs1".into(), size: 3 },
            ],
            ..Default::default()
        };
        apply(&mut cluster, &index(), "members.size=5").unwrap();

        assert!(cluster.members.iter().all(|m| m.size == 5));
        assert_eq!(cluster.members[1].name, "rs1");
    }

    #[test]
    fn test_unknown_option_keeps_earlier_assignments() {
        let mut cluster = Cluster::default();
        let err = apply(&mut cluster, &index(), "pod.size=2,pod.nosuch=1,pod.weight=9").unwrap_err();

        assert_matches!(err, Error::UnknownOption { key } if key == "pod.nosuch");
        assert_eq!(cluster.pod.size, 2);
        assert_eq!(cluster.pod.weight, 0);
    }

    #[test]
    fn test_key_without_value_is_looked_up_but_not_set() {
        let idx = index();
        let mut cluster = Cluster::default();
        apply(&mut cluster, &idx, "pod.size").unwrap();
        assert_eq!(cluster, Cluster::default());

        let err = apply(&mut cluster, &idx, "pod.nosuch").unwrap_err();
        assert_matches!(err, Error::UnknownOption { .. });
    }

    #[test]
    fn test_integer_overflow() {
        let idx = index();
        let mut cluster = Cluster::default();

        assert_matches!(
            apply(&mut cluster, &idx, "pod.weight=256"),
            Err(Error::TypeCoercion { .. })
        );
        assert_matches!(
            apply(&mut cluster, &idx, "pod.size=2147483648"),
            Err(Error::TypeCoercion { .. })
        );
        apply(&mut cluster, &idx, "pod.size=-2147483648").unwrap();
        assert_eq!(cluster.pod.size, i32::MIN);
        assert_matches!(
            apply(&mut cluster, &idx, "pod.weight=-1"),
            Err(Error::TypeCoercion { .. })
        );
    }

    #[test]
    fn test_float_and_bool_failures() {
        let idx = index();
        let mut cluster = Cluster::default();

        assert_matches!(
            apply(&mut cluster, &idx, "pod.ratio=1e39"),
            Err(Error::TypeCoercion { .. })
        );
        assert_matches!(
            apply(&mut cluster, &idx, "pod.ratio=abc"),
            Err(Error::TypeCoercion { .. })
        );
        assert_matches!(
            apply(&mut cluster, &idx, "pod.enabled=yes"),
            Err(Error::TypeCoercion { .. })
        );
    }

    #[test]
    fn test_invalid_enum_value_is_not_committed() {
        let mut cluster = Cluster::default();
        let err = apply(&mut cluster, &index(), "pod.size=3,pod.mode=lazy").unwrap_err();

        assert_matches!(err, Error::TypeCoercion { key, .. } if key == "pod.mode");
        assert_eq!(cluster.pod.size, 3);
        assert_eq!(cluster.pod.mode, Mode::Sync);
    }
}
