use alloy::dyn_abi::{DynSolType, Specifier};
use alloy::json_abi::{Constructor, Event, Function, JsonAbi, StateMutability};
use alloy::primitives::{Bytes, Selector, B256};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use tokio::fs;
use tracing::debug;

use super::error::{BindError, BindResult};

/// A callable function of the contract interface
#[derive(Debug, Clone)]
pub struct MethodSpec {
    /// Name the method is addressed by. Overloads get a numeric suffix.
    pub name: String,
    /// Canonical signature, e.g. `incBy(uint256)`
    pub signature: String,
    pub selector: Selector,
    pub input_types: Vec<DynSolType>,
    pub output_types: Vec<DynSolType>,
    pub output_names: Vec<String>,
    pub mutability: StateMutability,
    function: Function,
}

impl MethodSpec {
    /// Whether the method is declared read-only (`view` or `pure`)
    pub fn is_constant(&self) -> bool {
        matches!(
            self.mutability,
            StateMutability::View | StateMutability::Pure
        )
    }

    pub fn function(&self) -> &Function {
        &self.function
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventField {
    pub name: String,
    pub ty: DynSolType,
    pub indexed: bool,
}

/// An event of the contract interface
#[derive(Debug, Clone)]
pub struct EventSpec {
    pub name: String,
    pub signature: String,
    /// keccak256 of the canonical signature, emitted as topic 0
    pub topic: B256,
    pub fields: Vec<EventField>,
    pub anonymous: bool,
    event: Event,
}

impl EventSpec {
    pub fn event(&self) -> &Event {
        &self.event
    }

    pub fn indexed_fields(&self) -> impl Iterator<Item = &EventField> {
        self.fields.iter().filter(|f| f.indexed)
    }
}

/// Immutable table of a contract's functions and events.
///
/// Built once from the raw interface definition; read concurrently without
/// synchronization.
#[derive(Debug, Clone)]
pub struct InterfaceDescriptor {
    abi: JsonAbi,
    methods: BTreeMap<String, MethodSpec>,
    method_signatures: HashMap<String, String>,
    events: BTreeMap<String, EventSpec>,
    event_signatures: HashMap<String, String>,
    constructor_types: Vec<DynSolType>,
}

impl InterfaceDescriptor {
    /// Parse a JSON interface definition
    pub fn parse(raw: &str) -> BindResult<Self> {
        let abi: JsonAbi = serde_json::from_str(raw)
            .map_err(|e| BindError::Parse(format!("Malformed interface JSON: {}", e)))?;
        Self::from_abi(abi)
    }

    pub fn from_abi(abi: JsonAbi) -> BindResult<Self> {
        let mut methods = BTreeMap::new();
        let mut method_signatures = HashMap::new();
        let mut seen = HashSet::new();

        for function in abi.functions() {
            let signature = function.signature();
            if !seen.insert(signature.clone()) {
                return Err(BindError::Parse(format!(
                    "Duplicate function signature '{}'",
                    signature
                )));
            }

            let input_types = function
                .inputs
                .iter()
                .map(|p| resolve_type(p.resolve(), &p.ty, &signature))
                .collect::<BindResult<Vec<_>>>()?;
            let output_types = function
                .outputs
                .iter()
                .map(|p| resolve_type(p.resolve(), &p.ty, &signature))
                .collect::<BindResult<Vec<_>>>()?;

            let name = resolve_name_conflict(&function.name, |n| methods.contains_key(n));
            debug!(
                "Registered method {} as '{}' (selector {})",
                signature, name, function.selector()
            );

            method_signatures.insert(signature.clone(), name.clone());
            methods.insert(
                name.clone(),
                MethodSpec {
                    name,
                    signature,
                    selector: function.selector(),
                    input_types,
                    output_types,
                    output_names: function.outputs.iter().map(|p| p.name.clone()).collect(),
                    mutability: function.state_mutability,
                    function: function.clone(),
                },
            );
        }

        let mut events = BTreeMap::new();
        let mut event_signatures = HashMap::new();
        seen.clear();

        for event in abi.events() {
            let signature = event.signature();
            if !seen.insert(signature.clone()) {
                return Err(BindError::Parse(format!(
                    "Duplicate event signature '{}'",
                    signature
                )));
            }

            let fields = event
                .inputs
                .iter()
                .map(|p| {
                    Ok(EventField {
                        name: p.name.clone(),
                        ty: resolve_type(p.resolve(), &p.ty, &signature)?,
                        indexed: p.indexed,
                    })
                })
                .collect::<BindResult<Vec<_>>>()?;

            let name = resolve_name_conflict(&event.name, |n| events.contains_key(n));
            debug!("Registered event {} as '{}'", signature, name);

            event_signatures.insert(signature.clone(), name.clone());
            events.insert(
                name.clone(),
                EventSpec {
                    name,
                    signature,
                    topic: event.selector(),
                    fields,
                    anonymous: event.anonymous,
                    event: event.clone(),
                },
            );
        }

        let constructor_types = match &abi.constructor {
            Some(constructor) => constructor
                .inputs
                .iter()
                .map(|p| resolve_type(p.resolve(), &p.ty, "constructor"))
                .collect::<BindResult<Vec<_>>>()?,
            None => Vec::new(),
        };

        Ok(Self {
            abi,
            methods,
            method_signatures,
            events,
            event_signatures,
            constructor_types,
        })
    }

    /// Look up a method by name (including overload suffix) or canonical signature
    pub fn method(&self, name: &str) -> BindResult<&MethodSpec> {
        self.methods
            .get(name)
            .or_else(|| {
                self.method_signatures
                    .get(name)
                    .and_then(|resolved| self.methods.get(resolved))
            })
            .ok_or_else(|| BindError::UnknownMethod(name.to_string()))
    }

    /// Look up an event by name (including overload suffix) or canonical signature
    pub fn event(&self, name: &str) -> BindResult<&EventSpec> {
        self.events
            .get(name)
            .or_else(|| {
                self.event_signatures
                    .get(name)
                    .and_then(|resolved| self.events.get(resolved))
            })
            .ok_or_else(|| BindError::UnknownEvent(name.to_string()))
    }

    pub fn methods(&self) -> impl Iterator<Item = &MethodSpec> {
        self.methods.values()
    }

    pub fn events(&self) -> impl Iterator<Item = &EventSpec> {
        self.events.values()
    }

    pub fn constructor(&self) -> Option<&Constructor> {
        self.abi.constructor.as_ref()
    }

    pub fn constructor_types(&self) -> &[DynSolType] {
        &self.constructor_types
    }

    pub fn abi(&self) -> &JsonAbi {
        &self.abi
    }
}

fn resolve_type(
    resolved: alloy::dyn_abi::Result<DynSolType>,
    ty: &str,
    context: &str,
) -> BindResult<DynSolType> {
    resolved.map_err(|e| {
        BindError::Parse(format!("Unknown type '{}' in {}: {}", ty, context, e))
    })
}

/// Pick a free name for an overloaded entry: `name`, then `name0`, `name1`, ...
fn resolve_name_conflict(raw: &str, is_used: impl Fn(&str) -> bool) -> String {
    let mut candidate = raw.to_string();
    let mut idx = 0;
    while is_used(&candidate) {
        candidate = format!("{}{}", raw, idx);
        idx += 1;
    }
    candidate
}

/// Interface definition plus optional creation bytecode
#[derive(Debug, Clone)]
pub struct ContractArtifact {
    pub descriptor: InterfaceDescriptor,
    pub bytecode: Option<Bytes>,
}

impl ContractArtifact {
    /// Parse either a bare ABI array or a compiler artifact object
    /// (`{"abi": [...], "bytecode": "0x.." | {"object": "0x.."}}`)
    pub fn parse(raw: &str) -> BindResult<Self> {
        let value: Value = serde_json::from_str(raw)
            .map_err(|e| BindError::Parse(format!("Malformed artifact JSON: {}", e)))?;

        let (abi_value, bytecode) = match value {
            Value::Array(_) => (value, None),
            Value::Object(mut obj) => {
                let abi = obj
                    .remove("abi")
                    .ok_or_else(|| BindError::Parse("Artifact has no 'abi' field".to_string()))?;
                let bytecode = match obj.get("bytecode") {
                    Some(Value::String(s)) => parse_bytecode(s)?,
                    Some(Value::Object(code)) => match code.get("object").and_then(Value::as_str) {
                        Some(s) => parse_bytecode(s)?,
                        None => None,
                    },
                    _ => None,
                };
                (abi, bytecode)
            }
            _ => {
                return Err(BindError::Parse(
                    "Artifact must be an ABI array or an object with an 'abi' field".to_string(),
                ))
            }
        };

        let abi: JsonAbi = serde_json::from_value(abi_value)
            .map_err(|e| BindError::Parse(format!("Malformed interface JSON: {}", e)))?;

        Ok(Self {
            descriptor: InterfaceDescriptor::from_abi(abi)?,
            bytecode,
        })
    }

    /// Load an artifact or ABI file from disk
    pub async fn load<P: AsRef<Path>>(path: P) -> BindResult<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| BindError::Parse(format!("Failed to read {:?}: {}", path, e)))?;

        let artifact = Self::parse(&content)?;
        debug!(
            "Loaded artifact {:?}: {} methods, {} events",
            path,
            artifact.descriptor.methods.len(),
            artifact.descriptor.events.len()
        );
        Ok(artifact)
    }
}

fn parse_bytecode(code: &str) -> BindResult<Option<Bytes>> {
    let code = code.trim().trim_start_matches("0x");
    if code.is_empty() {
        return Ok(None);
    }
    let bytes = hex::decode(code)
        .map_err(|e| BindError::Parse(format!("Invalid bytecode hex: {}", e)))?;
    Ok(Some(bytes.into()))
}
