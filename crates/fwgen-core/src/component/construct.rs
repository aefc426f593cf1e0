//! Building components from schema elements.

use std::time::Duration;

use super::{
    AesKeySpec, ChecksumSpec, Component, CrcSpec, Encryption, EntrySpec, FileSpec, Formulas,
    HashSpec, Kind, KeySpec, NodeId, SignSpec, TableSpec, Tree, VerifySpec,
};
use super::bits::{MAX_BIT_CONTAINER_SIZE, parse_bit_list, parse_bit_range};
use crate::crypto::{
    AesMode, ChecksumMethod, CrcAlgorithm, HashAlgorithm, RsaPadding, SignStrategy,
};
use crate::dependency;
use crate::error::{Error, Result};
use crate::expr;
use crate::schema::SchemaNode;
use crate::value::{ByteOrder, MAX_INT_SIZE, Value, encode_int, parse_hex_bytes, parse_int_literal};

impl Tree {
    /// Constructs the component tree for a schema document.
    ///
    /// The root element's `size` attribute is the buffer capacity.
    pub fn from_schema(doc: &SchemaNode) -> Result<Self> {
        let mut tree = Tree {
            nodes: Vec::new(),
            capacity: None,
        };
        if let Some(size) = doc.attr("size") {
            let capacity = parse_int_literal(size)
                .and_then(|v| usize::try_from(v).ok())
                .ok_or_else(|| Error::value(format!("root size '{size}' is not a byte count")))?;
            tree.capacity = Some(capacity);
        }
        tree.construct(doc, None, None, None)?;
        log::debug!("constructed {} components", tree.len());
        Ok(tree)
    }

    /// Constructs `node` (and its subtree) under `parent`.
    ///
    /// `name` overrides the element's own name; table rows use it.
    pub(crate) fn construct(
        &mut self,
        node: &SchemaNode,
        parent: Option<NodeId>,
        name: Option<String>,
        row: Option<usize>,
    ) -> Result<NodeId> {
        let name = match name {
            Some(name) => name,
            None => match (node.name(), parent) {
                (Some(name), _) => name.to_string(),
                (None, None) => node.tag.clone(),
                (None, Some(_)) if matches!(node.tag.as_str(), "settings" | "layout") => {
                    node.tag.clone()
                }
                (None, Some(_)) => {
                    return Err(Error::schema(format!("<{}> requires attribute 'name'", node.tag)));
                }
            },
        };
        let result = self.construct_named(node, parent, name.clone(), row);
        match parent {
            Some(_) => result.map_err(|e| e.in_component(&name)),
            None => result,
        }
    }

    fn construct_named(
        &mut self,
        node: &SchemaNode,
        parent: Option<NodeId>,
        name: String,
        row: Option<usize>,
    ) -> Result<NodeId> {
        let kind = match parent {
            None => Kind::Root,
            Some(_) => kind_for(node)?,
        };
        let order = match node.attr("order") {
            Some(text) => ByteOrder::parse(text)
                .ok_or_else(|| Error::value(format!("unknown byte order '{text}'")))?,
            None => parent.map_or(ByteOrder::Little, |p| self.get(p).order),
        };

        let mut component = Component::new(name, node.tag.clone(), kind, order);
        component.placed = match parent {
            None => true,
            Some(p) => self.get(p).placed && node.tag != "settings",
        };
        component.row = row;
        component.formulas = Formulas {
            value: formula_attr(node, "calculate")?,
            enabled: formula_attr(node, "enabled")?,
            align: formula_attr(node, "align")?,
            offset: formula_attr(node, "offset")?,
            padding: formula_attr(node, "padding")?,
            size: match parent {
                // The root's size is the buffer capacity.
                None => None,
                Some(_) => formula_attr(node, "size")?,
            },
            validate: formula_attr(node, "validate")?,
        };

        if let Some(key) = node.attr("encrypt").filter(|k| !k.trim().is_empty()) {
            let mode = match node.attr("encryption_mode") {
                Some(text) => AesMode::parse(text)
                    .ok_or_else(|| Error::value(format!("unknown encryption mode '{text}'")))?,
                None => AesMode::default(),
            };
            component.encryption = Some(Encryption {
                key: key.trim().to_string(),
                mode,
                iv: node.attr("iv").map(str::to_string),
            });
        }
        component.save_file_path = node.attr("save_file_path").map(str::to_string);

        if let Some(text) = node.attr("dependency") {
            component.rules.extend(dependency::parse_rules(text)?);
        }
        if let Some(text) = node.attr("duplicates") {
            component.rules.extend(dependency::parse_duplicates(text)?);
        }

        let literal_size = component
            .formulas
            .size
            .as_deref()
            .and_then(parse_int_literal)
            .map(|s| {
                usize::try_from(s).map_err(|_| Error::value(format!("negative size {s}")))
            })
            .transpose()?;
        check_size_requirements(node, &component, literal_size)?;

        let literal = node
            .attr("value")
            .map(|text| parse_literal(&component.kind, &node.tag, text))
            .transpose()?;
        if let Some(value) = &literal {
            check_literal_fits(&component, value, literal_size)?;
            if !component.kind.is_bit_container() {
                component.value = value.clone();
            }
        }

        let id = self.push(component, parent)?;

        match &self.get(id).kind {
            Kind::Table(spec) => {
                if let Some(count) = parse_int_literal(&spec.count) {
                    let count = usize::try_from(count)
                        .map_err(|_| Error::value(format!("negative row count {count}")))?;
                    self.instantiate_rows(id, count)?;
                }
            }
            Kind::BitField { .. } | Kind::Register { .. } => {
                for child in &node.children {
                    self.construct(child, Some(id), None, None)?;
                }
                // `check_size_requirements` guarantees a literal size here.
                let width = literal_size.unwrap_or_default() * 8;
                let width = u32::try_from(width)
                    .map_err(|_| Error::value(format!("bit field of {width} bits is too wide")))?;
                self.check_bit_layout(id, width)?;
                if let Some(Value::Int(v)) = literal {
                    self.distribute_bits(id, v)?;
                }
            }
            Kind::Root | Kind::Settings | Kind::Bytes | Kind::Unknown(_) => {
                for child in &node.children {
                    self.construct(child, Some(id), None, None)?;
                }
            }
            _ => {
                if let Some(child) = node.children.first() {
                    return Err(Error::schema(format!(
                        "<{}> cannot contain <{}>",
                        node.tag, child.tag
                    )));
                }
            }
        }
        Ok(id)
    }
}

/// Selects the variant for a non-root element.
fn kind_for(node: &SchemaNode) -> Result<Kind> {
    let input = || required(node, "input").map(str::to_string);
    Ok(match node.tag.as_str() {
        "settings" => Kind::Settings,
        "bytes" | "group" | "section" | "layout" => Kind::Bytes,
        "number" => Kind::Number {
            signed: flag(node, "signed")?,
            choices: match node.attr("choices") {
                Some(list) => split_list(list).map(int_literal).collect::<Result<_>>()?,
                None => Vec::new(),
            },
        },
        "string" => Kind::Text {
            choices: node
                .attr("choices")
                .map(|list| split_list(list).map(str::to_string).collect())
                .unwrap_or_default(),
        },
        "bitfield" => Kind::BitField {
            used_bits: node
                .attr("used_bits")
                .map(parse_bit_list)
                .transpose()
                .map_err(Error::schema)?,
        },
        "register" => Kind::Register {
            reserved_value: node.attr("reserved_value").map(int_literal).transpose()?.unwrap_or(0),
        },
        "bit" => Kind::Bit(parse_bit_range(required(node, "bits")?).map_err(Error::schema)?),
        "file" => Kind::File(FileSpec {
            path: required(node, "path")?.to_string(),
            file_offset: formula_attr(node, "file_offset")?,
            length: formula_attr(node, "length")?,
            cache: None,
        }),
        "table" => {
            if node.children.is_empty() {
                return Err(Error::schema("<table> needs at least one template element"));
            }
            Kind::Table(TableSpec {
                count: required_formula(node, "count")?,
                sort: formula_attr(node, "sort")?,
                template: node.children.clone(),
                instantiated: false,
            })
        }
        "table_entry" => Kind::TableEntry(EntrySpec {
            table: required(node, "table")?.to_string(),
            key: required_formula(node, "key")?,
            required: flag(node, "required")?,
        }),
        "hash" => Kind::Hash(HashSpec {
            algorithm: hash_attr(node, "algorithm")?.unwrap_or_default(),
            input: input()?,
            reverse: flag(node, "reverse")?,
        }),
        "sign" => Kind::Sign(sign_spec(node)?),
        "verify" => {
            let key = node.attr("key").map(str::to_string);
            let modulus = formula_attr(node, "modulus")?;
            let exponent = formula_attr(node, "exponent")?;
            if key.is_none() && (modulus.is_none() || exponent.is_none()) {
                return Err(Error::schema(
                    "<verify> requires 'key' or both 'modulus' and 'exponent'",
                ));
            }
            Kind::Verify(VerifySpec {
                key,
                modulus,
                exponent,
                key_size: formula_attr(node, "key_size")?,
                signature: required_formula(node, "signature")?,
                algorithm: hash_attr(node, "algorithm")?.unwrap_or_default(),
                input: input()?,
            })
        }
        "crc" => Kind::Crc(CrcSpec {
            algorithm: match node.attr("algorithm") {
                Some(name) => CrcAlgorithm::parse(name)
                    .ok_or_else(|| Error::value(format!("unknown CRC algorithm '{name}'")))?,
                None => CrcAlgorithm::Crc32,
            },
            input: input()?,
        }),
        "checksum" => Kind::Checksum(ChecksumSpec {
            method: match node.attr("method") {
                Some(name) => ChecksumMethod::parse(name)
                    .ok_or_else(|| Error::value(format!("unknown checksum method '{name}'")))?,
                None => ChecksumMethod::default(),
            },
            input: input()?,
        }),
        "aes_key" => {
            let path = node.attr("path").map(str::to_string);
            if path.is_none() && node.attr("value").is_none() {
                return Err(Error::schema("<aes_key> requires 'path' or 'value'"));
            }
            Kind::AesKey(AesKeySpec { path })
        }
        "key" | "rsa_key" | "ec_key" => Kind::Key(KeySpec {
            path: required(node, "path")?.to_string(),
            hash: hash_attr(node, "hash")?.unwrap_or_default(),
            cache: None,
        }),
        other => Kind::Unknown(other.to_string()),
    })
}

fn sign_spec(node: &SchemaNode) -> Result<SignSpec> {
    let salt_len = node
        .attr("salt_length")
        .map(|s| {
            parse_int_literal(s)
                .and_then(|v| usize::try_from(v).ok())
                .ok_or_else(|| Error::value(format!("invalid salt length '{s}'")))
        })
        .transpose()?;
    let padding_name = node.attr("padding").unwrap_or("pkcs1");
    let padding = RsaPadding::parse(padding_name, salt_len)
        .ok_or_else(|| Error::value(format!("unknown signature padding '{padding_name}'")))?;
    let strategy = match node.attr("strategy") {
        Some(name) => SignStrategy::parse(name)
            .ok_or_else(|| Error::value(format!("unknown signing strategy '{name}'")))?,
        None => SignStrategy::default(),
    };
    let tool = node.attr("tool").map(str::to_string);
    let signature_path = node.attr("signature_path").map(str::to_string);
    match strategy {
        SignStrategy::External if tool.is_none() => {
            return Err(Error::schema("external signing requires attribute 'tool'"));
        }
        SignStrategy::Offline if signature_path.is_none() => {
            return Err(Error::schema("offline signing requires attribute 'signature_path'"));
        }
        _ => {}
    }
    let timeout = node
        .attr("timeout")
        .map(|s| {
            parse_int_literal(s)
                .and_then(|v| u64::try_from(v).ok())
                .map(Duration::from_secs)
                .ok_or_else(|| Error::value(format!("invalid timeout '{s}'")))
        })
        .transpose()?;
    Ok(SignSpec {
        key: required(node, "key")?.to_string(),
        algorithm: hash_attr(node, "algorithm")?,
        padding,
        input: required(node, "input")?.to_string(),
        strategy,
        tool,
        signature_path,
        timeout,
    })
}

fn check_size_requirements(
    node: &SchemaNode,
    component: &Component,
    literal_size: Option<usize>,
) -> Result<()> {
    let needs_size = matches!(
        component.kind,
        Kind::Number { .. } | Kind::BitField { .. } | Kind::Register { .. }
    );
    if needs_size && component.formulas.size.is_none() {
        return Err(Error::schema(format!("<{}> requires attribute 'size'", node.tag)));
    }
    if component.kind.is_bit_container() {
        match literal_size {
            None => {
                return Err(Error::schema(format!("<{}> size must be a literal", node.tag)));
            }
            Some(size) if size == 0 || size > MAX_BIT_CONTAINER_SIZE => {
                return Err(Error::schema(format!(
                    "<{}> size {size} is outside 1..={MAX_BIT_CONTAINER_SIZE}",
                    node.tag
                )));
            }
            Some(_) => {}
        }
    }
    if matches!(component.kind, Kind::Number { .. }) {
        if let Some(size) = literal_size.filter(|s| *s == 0 || *s > MAX_INT_SIZE) {
            return Err(Error::value(format!(
                "number size {size} is outside 1..={MAX_INT_SIZE}"
            )));
        }
    }
    Ok(())
}

/// Rejects literals that cannot fit the declared size.
pub(crate) fn check_literal_fits(component: &Component, value: &Value, size: Option<usize>) -> Result<()> {
    let Some(size) = size else { return Ok(()) };
    match (&component.kind, value) {
        (Kind::Number { signed, .. }, Value::Int(v)) => {
            encode_int(*v, size, *signed, component.order).map_err(Error::value)?;
        }
        (Kind::BitField { .. } | Kind::Register { .. }, Value::Int(v)) => {
            encode_int(*v, size, false, component.order).map_err(Error::value)?;
        }
        (_, Value::Text(s)) if s.len() > size => {
            return Err(Error::value(format!(
                "text of {} bytes exceeds size {size}",
                s.len()
            )));
        }
        (_, Value::Bytes(b)) if b.len() > size => {
            return Err(Error::value(format!("{} bytes exceed size {size}", b.len())));
        }
        _ => {}
    }
    Ok(())
}

/// Parses a literal `value` for a component variant.
pub(crate) fn parse_literal(kind: &Kind, tag: &str, text: &str) -> Result<Value> {
    match kind {
        Kind::Number { signed, choices } => {
            let v = int_literal(text)?;
            if !signed && v < 0 {
                return Err(Error::value(format!("negative value {v} where unsigned required")));
            }
            if !choices.is_empty() && !choices.contains(&v) {
                return Err(Error::value(format!("{v} is not one of {choices:?}")));
            }
            Ok(Value::Int(v))
        }
        Kind::Bit(_) | Kind::BitField { .. } | Kind::Register { .. } | Kind::Crc(_) | Kind::Checksum(_) => {
            Ok(Value::Int(int_literal(text)?))
        }
        Kind::Text { choices } => {
            if !text.is_ascii() {
                return Err(Error::value(format!("'{text}' is not ASCII")));
            }
            if !choices.is_empty() && !choices.iter().any(|c| c == text) {
                return Err(Error::value(format!("'{text}' is not one of {choices:?}")));
            }
            Ok(Value::Text(text.to_string()))
        }
        Kind::Bytes | Kind::Unknown(_) | Kind::AesKey(_) | Kind::Hash(_) | Kind::Sign(_) => {
            parse_hex_bytes(text).map(Value::Bytes).map_err(Error::value)
        }
        Kind::Root
        | Kind::Settings
        | Kind::File(_)
        | Kind::Table(_)
        | Kind::TableEntry(_)
        | Kind::Verify(_)
        | Kind::Key(_) => Err(Error::schema(format!("<{tag}> does not take a literal value"))),
    }
}

fn required<'a>(node: &'a SchemaNode, attr: &str) -> Result<&'a str> {
    node.attr(attr)
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| Error::schema(format!("<{}> requires attribute '{attr}'", node.tag)))
}

fn required_formula(node: &SchemaNode, attr: &str) -> Result<String> {
    let text = required(node, attr)?;
    expr::check(text)?;
    Ok(text.to_string())
}

fn formula_attr(node: &SchemaNode, attr: &str) -> Result<Option<String>> {
    match node.attr(attr) {
        Some(text) => {
            expr::check(text)?;
            Ok(Some(text.to_string()))
        }
        None => Ok(None),
    }
}

fn flag(node: &SchemaNode, attr: &str) -> Result<bool> {
    match node.attr(attr).map(|v| v.trim().to_ascii_lowercase()) {
        None => Ok(false),
        Some(v) => match v.as_str() {
            "true" | "1" | "yes" => Ok(true),
            "false" | "0" | "no" => Ok(false),
            _ => Err(Error::value(format!("'{attr}' must be true or false, got '{v}'"))),
        },
    }
}

fn hash_attr(node: &SchemaNode, attr: &str) -> Result<Option<HashAlgorithm>> {
    node.attr(attr)
        .map(|name| {
            HashAlgorithm::parse(name)
                .ok_or_else(|| Error::value(format!("unknown hash algorithm '{name}'")))
        })
        .transpose()
}

fn int_literal(text: &str) -> Result<i128> {
    parse_int_literal(text).ok_or_else(|| Error::value(format!("'{text}' is not an integer")))
}

fn split_list(list: &str) -> impl Iterator<Item = &str> {
    list.split(',').map(str::trim).filter(|s| !s.is_empty())
}
