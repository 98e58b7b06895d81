use alloy::dyn_abi::{DynSolValue, FunctionExt, JsonAbiExt};
use alloy::primitives::{Address, Bytes, U256};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};

use super::abi::{InterfaceDescriptor, MethodSpec};
use super::backend::{
    CallMsg, ContractBackend, ContractReader, ContractWriter, EventSource, SignedTransaction,
    UnsignedTransaction,
};
use super::error::{BindError, BindResult};
use super::{utils, with_cancel, CallOptions, TransactOptions};

/// Decoded result of a read-only call
#[derive(Debug, Clone, PartialEq)]
pub enum CallOutput {
    /// The method declares no outputs
    Unit,
    Single(DynSolValue),
    /// Multiple outputs, in declaration order, with their (possibly empty) names
    Tuple(Vec<(String, DynSolValue)>),
}

impl CallOutput {
    pub fn into_single(self) -> BindResult<DynSolValue> {
        match self {
            CallOutput::Single(value) => Ok(value),
            other => Err(BindError::Decode(format!(
                "Expected a single return value, got {:?}",
                other
            ))),
        }
    }

    /// The single output as an unsigned integer
    pub fn into_uint(self) -> BindResult<U256> {
        match self.into_single()? {
            DynSolValue::Uint(value, _) => Ok(value),
            other => Err(BindError::Decode(format!(
                "Expected an unsigned integer, got {:?}",
                other
            ))),
        }
    }

    /// Look up a named output
    pub fn get(&self, name: &str) -> Option<&DynSolValue> {
        match self {
            CallOutput::Tuple(values) => values.iter().find(|(n, _)| n == name).map(|(_, v)| v),
            _ => None,
        }
    }

    /// Look up an output by position
    pub fn index(&self, idx: usize) -> Option<&DynSolValue> {
        match self {
            CallOutput::Single(value) if idx == 0 => Some(value),
            CallOutput::Tuple(values) => values.get(idx).map(|(_, v)| v),
            _ => None,
        }
    }

    pub fn to_json(&self) -> BindResult<Value> {
        match self {
            CallOutput::Unit => Ok(Value::Null),
            CallOutput::Single(value) => utils::dyn_sol_value_to_json(value),
            CallOutput::Tuple(values) => Ok(Value::Array(
                values
                    .iter()
                    .map(|(_, v)| utils::dyn_sol_value_to_json(v))
                    .collect::<BindResult<_>>()?,
            )),
        }
    }
}

/// A deployed contract: one interface, one address, and the backend
/// capabilities it was bound with
#[derive(Clone)]
pub struct BoundContract {
    address: Address,
    descriptor: Arc<InterfaceDescriptor>,
    reader: Option<Arc<dyn ContractReader>>,
    writer: Option<Arc<dyn ContractWriter>>,
    events: Option<Arc<dyn EventSource>>,
}

impl BoundContract {
    /// Bind with every capability of a full backend. Performs no network access.
    pub fn bind<B: ContractBackend + 'static>(
        address: Address,
        descriptor: Arc<InterfaceDescriptor>,
        backend: Arc<B>,
    ) -> BindResult<Self> {
        let reader: Arc<dyn ContractReader> = backend.clone();
        let writer: Arc<dyn ContractWriter> = backend.clone();
        let events: Arc<dyn EventSource> = backend;
        Self::with_capabilities(address, descriptor, Some(reader), Some(writer), Some(events))
    }

    /// Bind with an arbitrary subset of capabilities, e.g. a read-only view
    pub fn with_capabilities(
        address: Address,
        descriptor: Arc<InterfaceDescriptor>,
        reader: Option<Arc<dyn ContractReader>>,
        writer: Option<Arc<dyn ContractWriter>>,
        events: Option<Arc<dyn EventSource>>,
    ) -> BindResult<Self> {
        if address.is_zero() {
            return Err(BindError::InvalidAddress(
                "Cannot bind a contract to the zero address".to_string(),
            ));
        }

        Ok(Self {
            address,
            descriptor,
            reader,
            writer,
            events,
        })
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn descriptor(&self) -> &Arc<InterfaceDescriptor> {
        &self.descriptor
    }

    fn reader(&self) -> BindResult<&dyn ContractReader> {
        self.reader
            .as_deref()
            .ok_or(BindError::MissingCapability("reader"))
    }

    fn writer(&self) -> BindResult<&dyn ContractWriter> {
        self.writer
            .as_deref()
            .ok_or(BindError::MissingCapability("writer"))
    }

    pub(crate) fn event_source(&self) -> BindResult<&Arc<dyn EventSource>> {
        self.events
            .as_ref()
            .ok_or(BindError::MissingCapability("event source"))
    }

    /// Encode `args` for `method`, selector included
    pub fn pack(&self, method: &str, args: &[DynSolValue]) -> BindResult<Bytes> {
        pack_method(self.descriptor.method(method)?, args)
    }

    /// Invoke a read-only method and decode its outputs
    pub async fn call(
        &self,
        method: &str,
        args: &[DynSolValue],
        opts: &CallOptions,
    ) -> BindResult<CallOutput> {
        let spec = self.descriptor.method(method)?;
        let data = pack_method(spec, args)?;
        let output = self.call_raw(data, opts).await?;

        if output.is_empty() && !spec.output_types.is_empty() {
            let reader = self.reader()?;
            let code = with_cancel(opts.cancel.as_ref(), reader.code_at(self.address, opts.block))
                .await?;
            if code.is_empty() {
                return Err(BindError::NoCode(self.address));
            }
        }

        unpack_outputs(spec, &output)
    }

    /// Evaluate pre-encoded calldata against the contract
    pub async fn call_raw(&self, data: Bytes, opts: &CallOptions) -> BindResult<Bytes> {
        let reader = self.reader()?;
        let msg = CallMsg {
            from: opts.from,
            to: Some(self.address),
            data,
            ..Default::default()
        };

        debug!("eth_call to {} at {:?}", self.address, opts.block);
        with_cancel(opts.cancel.as_ref(), reader.call_contract(msg, opts.block)).await
    }

    /// Like [`call`](Self::call), with JSON parameters (array or named object)
    pub async fn call_json(
        &self,
        method: &str,
        params: &Value,
        opts: &CallOptions,
    ) -> BindResult<CallOutput> {
        let args = encode_json_args(self.descriptor.method(method)?, params)?;
        self.call(method, &args, opts).await
    }

    /// Sign and submit a state-changing invocation
    pub async fn transact(
        &self,
        method: &str,
        args: &[DynSolValue],
        opts: &TransactOptions,
    ) -> BindResult<SignedTransaction> {
        let spec = self.descriptor.method(method)?;
        let data = pack_method(spec, args)?;
        debug!("Transacting {} on {}", spec.signature, self.address);
        submit(self.writer()?, Some(self.address), data, opts).await
    }

    /// Like [`transact`](Self::transact), with JSON parameters (array or named object)
    pub async fn transact_json(
        &self,
        method: &str,
        params: &Value,
        opts: &TransactOptions,
    ) -> BindResult<SignedTransaction> {
        let args = encode_json_args(self.descriptor.method(method)?, params)?;
        self.transact(method, &args, opts).await
    }

    /// Plain value transfer to the contract, invoking its fallback/receive logic
    pub async fn transfer(&self, opts: &TransactOptions) -> BindResult<SignedTransaction> {
        submit(self.writer()?, Some(self.address), Bytes::new(), opts).await
    }
}

impl std::fmt::Debug for BoundContract {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundContract")
            .field("address", &self.address)
            .field("reader", &self.reader.is_some())
            .field("writer", &self.writer.is_some())
            .field("events", &self.events.is_some())
            .finish()
    }
}

/// Deploy `bytecode` with ABI-encoded constructor `args` and bind the result
pub async fn deploy<B: ContractBackend + 'static>(
    descriptor: Arc<InterfaceDescriptor>,
    bytecode: &[u8],
    args: &[DynSolValue],
    opts: &TransactOptions,
    backend: Arc<B>,
) -> BindResult<(Address, SignedTransaction, BoundContract)> {
    if bytecode.is_empty() {
        return Err(BindError::Encode("Cannot deploy empty bytecode".to_string()));
    }
    let types = descriptor.constructor_types();
    if args.len() != types.len() {
        return Err(BindError::Encode(format!(
            "Constructor expects {} arguments, got {}",
            types.len(),
            args.len()
        )));
    }
    for (i, (ty, arg)) in types.iter().zip(args).enumerate() {
        if !ty.matches(arg) {
            return Err(BindError::Encode(format!(
                "Constructor argument #{} does not match type {:?}",
                i + 1,
                ty
            )));
        }
        utils::check_value_range(arg)?;
    }

    let mut input = bytecode.to_vec();
    if let Some(constructor) = descriptor.constructor() {
        input.extend(
            constructor
                .abi_encode_input(args)
                .map_err(|e| BindError::Encode(format!("constructor: {}", e)))?,
        );
    }

    let tx = submit(backend.as_ref(), None, input.into(), opts).await?;
    let address = tx.from.create(tx.tx.nonce);
    info!("Deploying contract at {} (tx {})", address, tx.hash);

    let contract = BoundContract::bind(address, descriptor, backend)?;
    Ok((address, tx, contract))
}

fn pack_method(spec: &MethodSpec, args: &[DynSolValue]) -> BindResult<Bytes> {
    args.iter().try_for_each(utils::check_value_range)?;
    let data = spec
        .function()
        .abi_encode_input(args)
        .map_err(|e| BindError::Encode(format!("{}: {}", spec.signature, e)))?;
    debug!("Encoded {} ({} bytes)", spec.signature, data.len());
    Ok(data.into())
}

fn unpack_outputs(spec: &MethodSpec, output: &[u8]) -> BindResult<CallOutput> {
    if spec.output_types.is_empty() {
        return Ok(CallOutput::Unit);
    }

    let mut values = spec
        .function()
        .abi_decode_output(output, false)
        .map_err(|e| BindError::Decode(format!("{} output: {}", spec.signature, e)))?;

    if values.len() == 1 {
        return Ok(CallOutput::Single(values.remove(0)));
    }
    Ok(CallOutput::Tuple(
        spec.output_names.iter().cloned().zip(values).collect(),
    ))
}

/// Resolve unset transaction fields through the backend, sign, and submit
async fn submit(
    writer: &dyn ContractWriter,
    to: Option<Address>,
    input: Bytes,
    opts: &TransactOptions,
) -> BindResult<SignedTransaction> {
    let cancel = opts.cancel.as_ref();
    let from = opts.signer.address();

    let nonce = match opts.nonce {
        Some(nonce) => nonce,
        None => with_cancel(cancel, writer.pending_nonce_at(from)).await?,
    };
    let gas_price = match opts.gas_price {
        Some(price) => price,
        None => with_cancel(cancel, writer.suggest_gas_price()).await?,
    };
    let gas_limit = match opts.gas_limit {
        Some(limit) => limit,
        None => {
            let msg = CallMsg {
                from: Some(from),
                to,
                value: Some(opts.value),
                gas_price: Some(gas_price),
                data: input.clone(),
            };
            with_cancel(cancel, writer.estimate_gas(msg)).await?
        }
    };
    let chain_id = match opts.chain_id {
        Some(id) => id,
        None => with_cancel(cancel, writer.chain_id()).await?,
    };

    let tx = UnsignedTransaction {
        nonce,
        gas_price,
        gas_limit,
        to,
        value: opts.value,
        input,
    };
    let signed = with_cancel(cancel, opts.signer.sign(tx, chain_id)).await?;

    if opts.no_send {
        debug!("Signed transaction {} not submitted (no_send)", signed.hash);
        return Ok(signed);
    }

    with_cancel(cancel, writer.send_transaction(&signed))
        .await
        .map_err(|e| match e {
            BindError::ContractRevert { .. } | BindError::Transport(_) | BindError::Cancelled => e,
            other => BindError::Transport(other.to_string()),
        })?;

    info!(
        "Transaction sent with hash: {} (nonce {}, gas limit {})",
        signed.hash, nonce, gas_limit
    );
    Ok(signed)
}

/// Convert JSON parameters into ABI values for `function`
pub fn encode_json_args(function: &MethodSpec, parameters: &Value) -> BindResult<Vec<DynSolValue>> {
    let inputs = &function.function().inputs;
    match parameters {
        Value::Array(params) => {
            if params.len() != inputs.len() {
                return Err(BindError::Encode(format!(
                    "Parameter count mismatch for '{}': expected {}, got {}",
                    function.signature,
                    inputs.len(),
                    params.len()
                )));
            }
            params
                .iter()
                .zip(&function.input_types)
                .enumerate()
                .map(|(i, (value, ty))| {
                    utils::json_to_dyn_sol_value(value, ty).map_err(|e| {
                        BindError::Encode(format!(
                            "Invalid parameter #{} ('{}' of type '{}'): {}",
                            i + 1,
                            inputs[i].name,
                            inputs[i].ty,
                            e
                        ))
                    })
                })
                .collect()
        }
        Value::Object(obj) => inputs
            .iter()
            .zip(&function.input_types)
            .map(|(input, ty)| {
                let value = obj.get(&input.name).ok_or_else(|| {
                    BindError::Encode(format!(
                        "Missing required parameter '{}' of type '{}' for '{}'",
                        input.name, input.ty, function.signature
                    ))
                })?;
                utils::json_to_dyn_sol_value(value, ty).map_err(|e| {
                    BindError::Encode(format!(
                        "Invalid parameter '{}' of type '{}': {}",
                        input.name, input.ty, e
                    ))
                })
            })
            .collect(),
        Value::Null if inputs.is_empty() => Ok(Vec::new()),
        _ => Err(BindError::Encode(format!(
            "Parameters for '{}' must be an array or an object",
            function.signature
        ))),
    }
}
