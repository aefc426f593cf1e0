//! Get/Set/Switch rules that propagate values between components.
//!
//! Rules are declared per component as a JSON array:
//!
//! ```text
//! [{"kind": "get", "path": "/settings/flags", "bits": "0:3"},
//!  {"kind": "switch", "path": "/settings/mode", "cases": {"1": "0x10"}, "default": "0"}]
//! ```
//!
//! `get` and `switch` pull a value into the owning component, `set` pushes
//! the owning component's value elsewhere. Every application reports the
//! components it actually changed; writing a value that is already in place
//! is not a change, so re-running a rule is a no-op.

use std::collections::{HashSet, VecDeque};

use serde::Deserialize;

use crate::component::{BitRange, Kind, NodeId, parse_bit_range, parse_literal};
use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::value::{Value, parse_int_literal};

/// One declarative propagation rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rule {
    /// Copy the value at `path` (or its `bits`) into the owner.
    Get {
        /// Source component.
        path: String,
        /// Source bit range; the whole value when absent.
        bits: Option<BitRange>,
    },
    /// Copy the owner's value into `path` (or into its `bits`).
    Set {
        /// Destination component.
        path: String,
        /// Destination bit range; the whole value when absent.
        bits: Option<BitRange>,
    },
    /// Replace the owner's value by looking up the value at `path`.
    Switch {
        /// Source component.
        path: String,
        /// Source value (as text) to owner literal.
        cases: Vec<(String, String)>,
        /// Literal used when no case matches.
        default: Option<String>,
    },
}

impl Rule {
    /// Path the rule reads from or writes to.
    pub fn path(&self) -> &str {
        match self {
            Self::Get { path, .. } | Self::Set { path, .. } | Self::Switch { path, .. } => path,
        }
    }

    pub(crate) fn is_pull(&self) -> bool {
        !matches!(self, Self::Set { .. })
    }

    pub(crate) fn is_push(&self) -> bool {
        matches!(self, Self::Set { .. })
    }
}

/// What caused rules to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Trigger {
    /// Explicit pass: the component pulls through its own `get`/`switch` rules.
    Pass,
    /// The component's value changed: its `set` rules fire and every rule
    /// reading from it re-runs.
    Value,
}

#[derive(Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
enum RawRule {
    Get {
        path: String,
        bits: Option<String>,
    },
    Set {
        path: String,
        bits: Option<String>,
    },
    Switch {
        path: String,
        cases: serde_json::Map<String, serde_json::Value>,
        default: Option<serde_json::Value>,
    },
}

/// Parses a `dependency` attribute.
pub fn parse_rules(text: &str) -> Result<Vec<Rule>> {
    let raw: Vec<RawRule> = serde_json::from_str(text)
        .map_err(|e| Error::dependency(format!("invalid rule list: {e}")))?;
    raw.into_iter()
        .map(|rule| {
            Ok(match rule {
                RawRule::Get { path, bits } => Rule::Get {
                    path,
                    bits: bits.as_deref().map(bit_range).transpose()?,
                },
                RawRule::Set { path, bits } => Rule::Set {
                    path,
                    bits: bits.as_deref().map(bit_range).transpose()?,
                },
                RawRule::Switch {
                    path,
                    cases,
                    default,
                } => Rule::Switch {
                    path,
                    cases: cases
                        .into_iter()
                        .map(|(key, value)| Ok((key, literal_text(&value)?)))
                        .collect::<Result<_>>()?,
                    default: default.as_ref().map(literal_text).transpose()?,
                },
            })
        })
        .collect()
}

/// Parses a `duplicates` attribute: a JSON array of paths, each a `set`.
pub fn parse_duplicates(text: &str) -> Result<Vec<Rule>> {
    let paths: Vec<String> = serde_json::from_str(text)
        .map_err(|e| Error::dependency(format!("invalid duplicates list: {e}")))?;
    Ok(paths
        .into_iter()
        .map(|path| Rule::Set { path, bits: None })
        .collect())
}

fn bit_range(text: &str) -> Result<BitRange> {
    parse_bit_range(text).map_err(Error::dependency)
}

fn literal_text(value: &serde_json::Value) -> Result<String> {
    match value {
        serde_json::Value::String(s) => Ok(s.clone()),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        serde_json::Value::Bool(b) => Ok(b.to_string()),
        other => Err(Error::dependency(format!("switch value {other} is not a literal"))),
    }
}

/// Runs the rules triggered on `id` and cascades through every component
/// they change.
///
/// Returns the changed components in the order they changed, each once.
pub(crate) fn apply(engine: &mut Engine, id: NodeId, trigger: Trigger) -> Result<Vec<NodeId>> {
    propagate(engine, id, trigger, true)
}

/// Like [`apply`], but rules whose path does not resolve yet are left for a
/// later pass.
pub(crate) fn apply_lenient(
    engine: &mut Engine,
    id: NodeId,
    trigger: Trigger,
) -> Result<Vec<NodeId>> {
    propagate(engine, id, trigger, false)
}

fn propagate(
    engine: &mut Engine,
    id: NodeId,
    trigger: Trigger,
    strict: bool,
) -> Result<Vec<NodeId>> {
    let mut mutated: Vec<NodeId> = Vec::new();
    let mut visited = HashSet::new();
    let mut queue = VecDeque::from([(id, trigger)]);

    while let Some((node, trigger)) = queue.pop_front() {
        if !visited.insert((node, trigger)) {
            continue;
        }
        let changed = match trigger {
            Trigger::Pass => pull(engine, node, None, strict)?,
            Trigger::Value => push(engine, node, strict)?,
        };
        for target in changed {
            if !mutated.contains(&target) {
                mutated.push(target);
            }
            queue.push_back((target, Trigger::Value));
        }
    }
    Ok(mutated)
}

/// Runs the `get`/`switch` rules of `owner`, optionally only those reading
/// from `source`. Returns `[owner]` if its value changed.
fn pull(
    engine: &mut Engine,
    owner: NodeId,
    source: Option<NodeId>,
    strict: bool,
) -> Result<Vec<NodeId>> {
    let rules: Vec<Rule> = engine.tree.get(owner).rules.clone();
    let mut changed = false;
    for rule in rules.iter().filter(|r| r.is_pull()) {
        let from = match engine.lookup(owner, rule.path()) {
            Ok(from) => from,
            Err(e) if !strict => {
                log::trace!("{}: deferring rule on {}: {e}", engine.tree.path_of(owner), rule.path());
                continue;
            }
            Err(e) => return Err(engine.locate(owner, e)),
        };
        if source.is_some_and(|s| s != from) {
            continue;
        }
        let next = engine
            .current_value(from)
            .and_then(|source| pulled_value(engine, owner, rule, source))
            .map_err(|e| engine.locate(owner, e))?;
        changed |= engine.store_value(owner, next).map_err(|e| engine.locate(owner, e))?;
    }
    Ok(if changed { vec![owner] } else { Vec::new() })
}

/// Re-runs the `get`/`switch` rules of `owner` while it is being built.
///
/// Sources are built first, so computed values (formulas, digests, CRCs)
/// are copied instead of whatever they held before the build.
pub(crate) fn pull_built(engine: &mut Engine, owner: NodeId) -> Result<()> {
    let rules: Vec<Rule> = engine.tree.get(owner).rules.clone();
    for rule in rules.iter().filter(|r| r.is_pull()) {
        let from = engine.lookup(owner, rule.path())?;
        let source = engine.value_of(from)?;
        let next = pulled_value(engine, owner, rule, source)?;
        engine.store_value(owner, next)?;
    }
    Ok(())
}

fn pulled_value(engine: &mut Engine, owner: NodeId, rule: &Rule, source: Value) -> Result<Value> {
    match rule {
        Rule::Get { bits: None, .. } => engine.coerce(owner, source),
        Rule::Get {
            bits: Some(range), ..
        } => {
            let v = source.as_int().map_err(|e| {
                Error::dependency(format!("bit range on non-numeric value of {}: {e}", rule.path()))
            })?;
            Ok(Value::Int(range.extract(v)))
        }
        Rule::Switch { cases, default, .. } => {
            let key = source.to_string();
            let chosen = cases
                .iter()
                .find(|(case, _)| case_matches(case, &key))
                .map(|(_, value)| value)
                .or(default.as_ref())
                .ok_or_else(|| {
                    Error::dependency(format!(
                        "no switch case for '{key}' from {} and no default",
                        rule.path()
                    ))
                })?;
            let node = engine.tree.get(owner);
            parse_literal(&node.kind, &node.tag, chosen)
        }
        Rule::Set { .. } => Ok(Value::None),
    }
}

fn case_matches(case: &str, key: &str) -> bool {
    if case.trim() == key.trim() {
        return true;
    }
    match (parse_int_literal(case), parse_int_literal(key)) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

/// Runs the consequences of `node`'s value changing.
fn push(engine: &mut Engine, node: NodeId, strict: bool) -> Result<Vec<NodeId>> {
    let mut changed = Vec::new();

    let rules: Vec<Rule> = engine.tree.get(node).rules.clone();
    for rule in &rules {
        let Rule::Set { path, bits } = rule else { continue };
        let target = match engine.lookup(node, path) {
            Ok(target) => target,
            Err(e) if !strict => {
                log::trace!("{}: deferring rule on {path}: {e}", engine.tree.path_of(node));
                continue;
            }
            Err(e) => return Err(engine.locate(node, e)),
        };
        let next = set_value_for(engine, node, target, *bits).map_err(|e| engine.locate(node, e))?;
        if engine.store_value(target, next).map_err(|e| engine.locate(target, e))? {
            changed.push(target);
        }
    }

    let readers: Vec<NodeId> = engine
        .tree
        .ids()
        .filter(|id| *id != node && engine.tree.get(*id).pulls())
        .collect();
    for reader in readers {
        changed.extend(pull(engine, reader, Some(node), false)?);
    }
    Ok(changed)
}

fn set_value_for(
    engine: &mut Engine,
    node: NodeId,
    target: NodeId,
    bits: Option<BitRange>,
) -> Result<Value> {
    let own = engine.current_value(node)?;
    match bits {
        None => engine.coerce(target, own),
        Some(range) => {
            let field = own.as_int().map_err(|e| {
                Error::dependency(format!("bit range on non-numeric value: {e}"))
            })?;
            let current = match engine.current_value(target)? {
                Value::None => 0,
                other => other.as_int().map_err(|e| {
                    Error::dependency(format!("bit range on non-numeric target: {e}"))
                })?,
            };
            Ok(Value::Int(range.insert(current, field)))
        }
    }
}

/// Whether `kind` can receive a value through a rule.
pub(crate) fn accepts_values(kind: &Kind) -> bool {
    !matches!(
        kind,
        Kind::Root | Kind::Settings | Kind::Table(_) | Kind::TableEntry(_) | Kind::Key(_)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::BuildOptions;
    use crate::schema::SchemaNode;
    use crate::component::Tree;

    fn engine(xml: &str) -> Engine {
        let tree = Tree::from_schema(&SchemaNode::parse(xml).unwrap()).unwrap();
        Engine::new(tree, BuildOptions::default()).unwrap()
    }

    fn id(engine: &mut Engine, path: &str) -> NodeId {
        let root = engine.tree.root();
        engine.lookup(root, path).unwrap()
    }

    #[test]
    fn parses_every_rule_kind() {
        let rules = parse_rules(
            r#"[{"kind":"get","path":"/a","bits":"0:3"},
                {"kind":"set","path":"b"},
                {"kind":"switch","path":"c","cases":{"1":"0x10","2":32},"default":"0"}]"#,
        )
        .unwrap();
        assert_eq!(
            rules[0],
            Rule::Get {
                path: "/a".into(),
                bits: Some(BitRange { lo: 0, hi: 3 })
            }
        );
        assert_eq!(rules[1], Rule::Set { path: "b".into(), bits: None });
        let Rule::Switch { cases, default, .. } = &rules[2] else {
            panic!("expected switch");
        };
        assert!(cases.contains(&("2".to_string(), "32".to_string())));
        assert_eq!(default.as_deref(), Some("0"));

        assert_eq!(parse_duplicates(r#"["x", "/y"]"#).unwrap().len(), 2);
    }

    #[test]
    fn rejects_unknown_kinds_and_bad_json() {
        let err = parse_rules(r#"[{"kind":"copy","path":"a"}]"#).unwrap_err();
        assert!(matches!(err.kind(), crate::error::ErrorKind::Dependency(_)));
        assert!(parse_rules("not json").is_err());
        assert!(parse_rules(r#"[{"kind":"get","path":"a","bits":"7:3"}]"#).is_err());
    }

    const SCHEMA: &str = r#"
        <binary size="16">
          <settings>
            <number name="flags" size="1" value="0xA5"/>
            <number name="low" size="1" dependency='[{"kind":"get","path":"/settings/flags","bits":"0:3"}]'/>
            <number name="mirror" size="1" value="7" duplicates='["/layout/copy"]'/>
            <number name="mode" size="1" value="2"/>
            <number name="rate" size="2"
                    dependency='[{"kind":"switch","path":"/settings/mode","cases":{"1":"100","0x2":"200"},"default":"50"}]'/>
          </settings>
          <layout><number name="copy" size="1"/></layout>
        </binary>"#;

    #[test]
    fn get_is_idempotent() {
        let mut engine = engine(SCHEMA);
        let low = id(&mut engine, "/settings/low");
        assert_eq!(apply(&mut engine, low, Trigger::Pass).unwrap(), vec![low]);
        assert_eq!(engine.tree.get(low).value(), &Value::Int(5));
        assert!(apply(&mut engine, low, Trigger::Pass).unwrap().is_empty());
        assert_eq!(engine.tree.get(low).value(), &Value::Int(5));
    }

    #[test]
    fn set_fires_only_on_value_trigger() {
        let mut engine = engine(SCHEMA);
        let mirror = id(&mut engine, "/settings/mirror");
        let copy = id(&mut engine, "/layout/copy");
        assert!(apply(&mut engine, mirror, Trigger::Pass).unwrap().is_empty());
        assert_eq!(apply(&mut engine, mirror, Trigger::Value).unwrap(), vec![copy]);
        assert_eq!(engine.tree.get(copy).value(), &Value::Int(7));
        assert!(apply(&mut engine, mirror, Trigger::Value).unwrap().is_empty());
    }

    #[test]
    fn switch_matches_numerically_and_falls_back() {
        let mut engine = engine(SCHEMA);
        let rate = id(&mut engine, "/settings/rate");
        let mode = id(&mut engine, "/settings/mode");
        apply(&mut engine, rate, Trigger::Pass).unwrap();
        assert_eq!(engine.tree.get(rate).value(), &Value::Int(200));

        engine.store_value(mode, Value::Int(9)).unwrap();
        assert_eq!(apply(&mut engine, mode, Trigger::Value).unwrap(), vec![rate]);
        assert_eq!(engine.tree.get(rate).value(), &Value::Int(50));
    }

    #[test]
    fn changes_cascade_through_readers() {
        let mut engine = engine(SCHEMA);
        let flags = id(&mut engine, "/settings/flags");
        let low = id(&mut engine, "/settings/low");
        engine.store_value(flags, Value::Int(0x3C)).unwrap();
        assert_eq!(apply(&mut engine, flags, Trigger::Value).unwrap(), vec![low]);
        assert_eq!(engine.tree.get(low).value(), &Value::Int(0xC));
    }

    #[test]
    fn missing_switch_default_is_reported() {
        let mut engine = engine(
            r#"<binary size="4"><settings>
                 <number name="m" size="1" value="3"/>
                 <number name="r" size="1" dependency='[{"kind":"switch","path":"/settings/m","cases":{"1":"1"}}]'/>
               </settings><layout/></binary>"#,
        );
        let r = id(&mut engine, "/settings/r");
        let err = apply(&mut engine, r, Trigger::Pass).unwrap_err();
        assert!(err.to_string().contains("no default"), "{err}");
        assert_eq!(err.component_path(), "/settings/r");
    }
}
