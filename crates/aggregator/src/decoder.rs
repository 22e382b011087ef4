//! Selector-keyed decoders that pull a (recipient, amount) pair out of raw
//! transaction input.
//!
//! Each [`CallDecoder`] knows one function signature and where its
//! recipient and amount live. Wrapper calls (meta-transactions) decode to
//! [`Decoded::Redecode`] and the registry decodes the wrapped payload once
//! more; a wrapper inside a wrapper is rejected.

use std::collections::HashMap;

use tracing::{debug, warn};

use dropcraft_core::{Address, Amount};

use crate::abi::{self, AbiType, AbiValue, Selector};
use crate::{AggregatorError, Result};

/// Where a decoder finds the recipient.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecipientSource {
    /// Address argument at this position
    Arg(usize),
    /// The transaction sender
    Sender,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallAction {
    /// Recipient and, when known, amount come from this call.
    Resolve {
        recipient: RecipientSource,
        amount: Option<usize>,
    },
    /// `payload` is a `bytes` argument holding the real call, made on behalf
    /// of the address argument `on_behalf_of` (or the sender if `None`).
    Redecode {
        payload: usize,
        on_behalf_of: Option<usize>,
    },
}

/// Result of decoding one call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    Resolved {
        recipient: Address,
        amount: Option<Amount>,
    },
    Redecode {
        payload: Vec<u8>,
        sender: Address,
    },
}

/// A fully resolved call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedCall {
    pub recipient: Address,
    pub amount: Option<Amount>,
    /// Selector of the call that produced the recipient (the inner call for
    /// wrappers)
    pub selector: Selector,
}

#[derive(Debug, Clone)]
pub struct CallDecoder {
    signature: String,
    selector: Selector,
    params: Vec<AbiType>,
    action: CallAction,
}

impl CallDecoder {
    /// Parse `signature` and check that `action` points at arguments of the
    /// right type.
    pub fn new(signature: &str, action: CallAction) -> Result<Self> {
        let (_, params) = abi::parse_signature(signature)?;

        let expect = |index: usize, ok: fn(&AbiType) -> bool, what: &str| -> Result<()> {
            match params.get(index) {
                Some(ty) if ok(ty) => Ok(()),
                Some(ty) => Err(AggregatorError::InvalidDecoder(format!(
                    "{signature}: argument {index} is {ty}, expected {what}"
                ))),
                None => Err(AggregatorError::InvalidDecoder(format!(
                    "{signature}: no argument {index}"
                ))),
            }
        };
        let is_address = |ty: &AbiType| *ty == AbiType::Address;
        let is_uint = |ty: &AbiType| matches!(ty, AbiType::Uint(_));
        let is_bytes = |ty: &AbiType| *ty == AbiType::Bytes;

        match action {
            CallAction::Resolve { recipient, amount } => {
                if let RecipientSource::Arg(i) = recipient {
                    expect(i, is_address, "address")?;
                }
                if let Some(i) = amount {
                    expect(i, is_uint, "uint")?;
                }
            }
            CallAction::Redecode { payload, on_behalf_of } => {
                expect(payload, is_bytes, "bytes")?;
                if let Some(i) = on_behalf_of {
                    expect(i, is_address, "address")?;
                }
            }
        }

        Ok(Self {
            signature: signature.to_string(),
            selector: abi::selector(signature),
            params,
            action,
        })
    }

    pub fn signature(&self) -> &str {
        &self.signature
    }

    pub fn selector(&self) -> Selector {
        self.selector
    }

    pub fn params(&self) -> &[AbiType] {
        &self.params
    }

    pub fn action(&self) -> CallAction {
        self.action
    }

    /// Decode call arguments (input with the selector already stripped).
    pub fn decode(&self, args: &[u8], sender: &Address) -> Result<Decoded> {
        let values = abi::decode(&self.params, args)?;
        // Indices and types were checked in `new`.
        let address_at = |i: usize| values.get(i).and_then(AbiValue::as_address);

        match self.action {
            CallAction::Resolve { recipient, amount } => {
                let recipient = match recipient {
                    RecipientSource::Arg(i) => address_at(i).ok_or_else(|| self.mismatch(i))?,
                    RecipientSource::Sender => *sender,
                };
                let amount = match amount {
                    Some(i) => Some(values.get(i).and_then(AbiValue::as_uint).ok_or_else(|| self.mismatch(i))?),
                    None => None,
                };
                Ok(Decoded::Resolved { recipient, amount })
            }
            CallAction::Redecode { payload, on_behalf_of } => {
                let payload_bytes = values
                    .get(payload)
                    .and_then(AbiValue::as_bytes)
                    .ok_or_else(|| self.mismatch(payload))?;
                let sender = match on_behalf_of {
                    Some(i) => address_at(i).ok_or_else(|| self.mismatch(i))?,
                    None => *sender,
                };
                Ok(Decoded::Redecode {
                    payload: payload_bytes.to_vec(),
                    sender,
                })
            }
        }
    }

    fn mismatch(&self, index: usize) -> AggregatorError {
        AggregatorError::InvalidDecoder(format!("{}: argument {} has the wrong type", self.signature, index))
    }
}

/// Decoders keyed by selector.
#[derive(Debug, Clone, Default)]
pub struct DecoderRegistry {
    decoders: HashMap<Selector, CallDecoder>,
}

impl DecoderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a decoder, returning the one it replaced.
    pub fn register(&mut self, decoder: CallDecoder) -> Option<CallDecoder> {
        self.decoders.insert(decoder.selector, decoder)
    }

    pub fn get(&self, selector: &Selector) -> Option<&CallDecoder> {
        self.decoders.get(selector)
    }

    pub fn len(&self) -> usize {
        self.decoders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.decoders.is_empty()
    }

    /// Decode one call without following wrappers.
    pub fn decode(&self, input: &[u8], sender: &Address) -> Result<(Selector, Decoded)> {
        let selector: Selector = input
            .get(..4)
            .and_then(|s| s.try_into().ok())
            .ok_or(AggregatorError::Abi(abi::AbiError::Truncated {
                offset: 0,
                needed: 4,
                len: input.len(),
            }))?;
        let decoder = self
            .decoders
            .get(&selector)
            .ok_or_else(|| AggregatorError::UnknownSelector(format!("0x{}", hex::encode(selector))))?;
        Ok((selector, decoder.decode(&input[4..], sender)?))
    }

    /// Decode a call, following at most one wrapper.
    pub fn resolve(&self, input: &[u8], sender: &Address) -> Result<ResolvedCall> {
        match self.decode(input, sender)? {
            (selector, Decoded::Resolved { recipient, amount }) => Ok(ResolvedCall {
                recipient,
                amount,
                selector,
            }),
            (outer, Decoded::Redecode { payload, sender }) => {
                debug!("Re-decoding payload of 0x{} for {}", hex::encode(outer), sender);
                match self.decode(&payload, &sender)? {
                    (selector, Decoded::Resolved { recipient, amount }) => Ok(ResolvedCall {
                        recipient,
                        amount,
                        selector,
                    }),
                    (_, Decoded::Redecode { .. }) => Err(AggregatorError::RedecodeDepth),
                }
            }
        }
    }

    /// Mint and wrapper calls seen around the renBTC bridge.
    pub fn renbtc_defaults() -> Self {
        use CallAction::{Redecode, Resolve};
        use RecipientSource::{Arg, Sender};

        let table: [(&str, CallAction); 19] = [
            ("mint(string,address,uint256,bytes32,bytes)", Resolve { recipient: Arg(1), amount: Some(2) }),
            (
                "executeMetaTransaction(address,bytes,string,string,bytes32,bytes32,uint8)",
                Redecode { payload: 1, on_behalf_of: Some(0) },
            ),
            (
                "mintThenSwap(uint256,uint256,uint256,int128,address,uint256,bytes32,bytes)",
                Resolve { recipient: Arg(4), amount: Some(5) },
            ),
            (
                "mintThenDeposit(address,uint256,uint256[3],uint256,uint256,bytes32,bytes)",
                Resolve { recipient: Arg(0), amount: Some(1) },
            ),
            (
                "mintThenSwap(uint256,uint256,uint256,address,uint256,bytes32,bytes)",
                Resolve { recipient: Arg(3), amount: Some(4) },
            ),
            (
                "mintThenDeposit(address,uint256,uint256[2],uint256,uint256,bytes32,bytes)",
                Resolve { recipient: Arg(0), amount: Some(1) },
            ),
            ("recoverStuck(bytes,uint256,bytes32,bytes)", Resolve { recipient: Sender, amount: Some(1) }),
            ("mintThenSwap(uint256,address,uint256,bytes32,bytes)", Resolve { recipient: Arg(1), amount: Some(2) }),
            (
                "mintRenBTC(address,uint256,uint256,uint256,bytes32,bytes)",
                Resolve { recipient: Arg(0), amount: Some(3) },
            ),
            ("mintDai(uint256,bytes,uint256,uint256,bytes32,bytes)", Resolve { recipient: Sender, amount: Some(3) }),
            ("deposit(bytes,uint256,bytes32,bytes)", Resolve { recipient: Sender, amount: Some(1) }),
            ("depositbtc(address,bytes,uint256,bytes32,bytes)", Resolve { recipient: Arg(0), amount: Some(2) }),
            // Smart-wallet executes: the wallet is the recipient, the amount comes from the event.
            ("execute(address,bytes,uint256,bytes,uint256,uint256)", Resolve { recipient: Arg(0), amount: None }),
            (
                "execute(address,address,bytes,uint256,bytes,uint256,uint256,address,address)",
                Resolve { recipient: Arg(0), amount: None },
            ),
            ("cast(address[],bytes[],address)", Resolve { recipient: Arg(2), amount: None }),
            ("ZapIn(address,address,address,uint256,uint256)", Resolve { recipient: Arg(0), amount: Some(4) }),
            ("ZapIn(address,address,uint16,address,uint256,uint256)", Resolve { recipient: Arg(0), amount: Some(4) }),
            (
                "ZapIn(address,address,address,address,uint256,uint256)",
                Resolve { recipient: Arg(0), amount: Some(4) },
            ),
            ("V1_to_V2_Pipe(address,uint256,address,address)", Resolve { recipient: Arg(3), amount: Some(1) }),
        ];

        let mut registry = Self::new();
        for (signature, action) in table {
            match CallDecoder::new(signature, action) {
                Ok(decoder) => {
                    registry.register(decoder);
                }
                Err(e) => warn!("Skipping built-in decoder {}: {}", signature, e),
            }
        }
        registry
    }
}
