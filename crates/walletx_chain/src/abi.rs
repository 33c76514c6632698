//! WalletX escrow contract interface and call builder.
//!
//! Produces `(contract, calldata, value)` for the three escrow functions and
//! extracts the escrow id from a creation receipt. Nothing here touches the
//! network.

use std::fmt;
use std::str::FromStr;

use alloy_primitives::{Address, B256, Bytes, U256};
use alloy_sol_types::{SolCall, SolEvent, sol};

use crate::error::ChainError;
use crate::types::Log;
use crate::units::parse_units;

sol! {
    contract WalletX {
        event EscrowCreated(
            uint256 indexed escrowId,
            address indexed sender,
            address indexed receiver,
            uint256 amount
        );

        function createEscrow(address receiver) external payable returns (uint256 escrowId);
        function claimEscrow(uint256 escrowId) external;
        function refundEscrow(uint256 escrowId) external;
    }
}

/// First topic of every `EscrowCreated` log.
pub const ESCROW_CREATED_TOPIC: B256 = WalletX::EscrowCreated::SIGNATURE_HASH;

/// The contract functions this crate knows how to encode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EscrowFunction {
    CreateEscrow,
    ClaimEscrow,
    RefundEscrow,
}

impl EscrowFunction {
    pub fn name(&self) -> &'static str {
        match self {
            EscrowFunction::CreateEscrow => "createEscrow",
            EscrowFunction::ClaimEscrow => "claimEscrow",
            EscrowFunction::RefundEscrow => "refundEscrow",
        }
    }

    pub fn is_payable(&self) -> bool {
        matches!(self, EscrowFunction::CreateEscrow)
    }
}

impl fmt::Display for EscrowFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for EscrowFunction {
    type Err = ChainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "createEscrow" => Ok(EscrowFunction::CreateEscrow),
            "claimEscrow" => Ok(EscrowFunction::ClaimEscrow),
            "refundEscrow" => Ok(EscrowFunction::RefundEscrow),
            other => Err(ChainError::Encoding(format!(
                "function {other:?} is not part of the escrow ABI"
            ))),
        }
    }
}

/// A loosely typed argument, checked against the ABI at encode time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallArg {
    Address(Address),
    Uint(U256),
}

impl CallArg {
    fn kind(&self) -> &'static str {
        match self {
            CallArg::Address(_) => "address",
            CallArg::Uint(_) => "uint256",
        }
    }
}

/// A fully built contract call, ready for a transaction envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractCall {
    pub to: Address,
    pub calldata: Bytes,
    pub value: U256,
}

/// Encode `function(args)` against the escrow ABI.
///
/// `value` must be zero for the non-payable functions.
pub fn encode_call(
    contract: Address,
    function: EscrowFunction,
    args: &[CallArg],
    value: U256,
) -> Result<ContractCall, ChainError> {
    if !function.is_payable() && !value.is_zero() {
        return Err(ChainError::Encoding(format!(
            "{function} is not payable but value {value} was attached"
        )));
    }

    let calldata = match (function, args) {
        (EscrowFunction::CreateEscrow, [CallArg::Address(receiver)]) => {
            WalletX::createEscrowCall {
                receiver: *receiver,
            }
            .abi_encode()
        }
        (EscrowFunction::ClaimEscrow, [CallArg::Uint(id)]) => {
            WalletX::claimEscrowCall { escrowId: *id }.abi_encode()
        }
        (EscrowFunction::RefundEscrow, [CallArg::Uint(id)]) => {
            WalletX::refundEscrowCall { escrowId: *id }.abi_encode()
        }
        (function, args) => {
            let expected = match function {
                EscrowFunction::CreateEscrow => "(address)",
                EscrowFunction::ClaimEscrow | EscrowFunction::RefundEscrow => "(uint256)",
            };
            let got: Vec<&str> = args.iter().map(CallArg::kind).collect();
            return Err(ChainError::Encoding(format!(
                "{function} expects {expected}, got ({})",
                got.join(",")
            )));
        }
    };

    Ok(ContractCall {
        to: contract,
        calldata: calldata.into(),
        value,
    })
}

/// Encode a call by function name, as the ABI spells it.
pub fn encode_named(
    contract: Address,
    name: &str,
    args: &[CallArg],
    value: U256,
) -> Result<ContractCall, ChainError> {
    encode_call(contract, name.parse()?, args, value)
}

/// Typed escrow operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EscrowCall {
    /// Lock `amount` (decimal, native currency) for `receiver`.
    Create { receiver: Address, amount: String },
    Claim { escrow_id: U256 },
    Refund { escrow_id: U256 },
}

impl EscrowCall {
    pub fn function(&self) -> EscrowFunction {
        match self {
            EscrowCall::Create { .. } => EscrowFunction::CreateEscrow,
            EscrowCall::Claim { .. } => EscrowFunction::ClaimEscrow,
            EscrowCall::Refund { .. } => EscrowFunction::RefundEscrow,
        }
    }

    /// Build the call; `decimals` is the native currency precision used to
    /// convert a create amount into base units.
    pub fn build(&self, contract: Address, decimals: u8) -> Result<ContractCall, ChainError> {
        match self {
            EscrowCall::Create { receiver, amount } => {
                let value = parse_units(amount, decimals)?;
                encode_call(
                    contract,
                    EscrowFunction::CreateEscrow,
                    &[CallArg::Address(*receiver)],
                    value,
                )
            }
            EscrowCall::Claim { escrow_id } | EscrowCall::Refund { escrow_id } => encode_call(
                contract,
                self.function(),
                &[CallArg::Uint(*escrow_id)],
                U256::ZERO,
            ),
        }
    }
}

/// Parse a decimal escrow id as stored in local records.
pub fn parse_escrow_id(id: &str) -> Result<U256, ChainError> {
    let id = id.trim();
    if id.is_empty() || !id.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ChainError::Encoding(format!(
            "escrow id {id:?} is not a uint256"
        )));
    }
    U256::from_str_radix(id, 10)
        .map_err(|_| ChainError::Encoding(format!("escrow id {id:?} overflows uint256")))
}

/// Find the id of the escrow created by a transaction.
///
/// Linear scan over the receipt logs: the first log whose first topic is the
/// `EscrowCreated` signature (and, when `contract` is given, that was emitted
/// by it) wins. `None` means the receipt carries no creation event we can
/// read; callers must treat the escrow id as unknown.
pub fn find_escrow_created(logs: &[Log], contract: Option<Address>) -> Option<U256> {
    logs.iter()
        .filter(|log| contract.is_none_or(|c| log.address == c))
        .find_map(|log| match log.topics.as_slice() {
            [signature, id, ..] if *signature == ESCROW_CREATED_TOPIC => {
                Some(U256::from_be_bytes(id.0))
            }
            _ => None,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::address;

    const CONTRACT: Address = address!("5fbdb2315678afecb367f032d93f642f64180aa3");
    const RECEIVER: Address = address!("70997970c51812dc3a010c7d01b50e0d17dc79c8");

    fn creation_log(emitter: Address, id: u64) -> Log {
        Log {
            address: emitter,
            topics: vec![
                WalletX::EscrowCreated::SIGNATURE_HASH,
                B256::from(U256::from(id).to_be_bytes::<32>()),
                B256::ZERO,
                RECEIVER.into_word(),
            ],
            data: Bytes::new(),
            log_index: None,
        }
    }

    #[test]
    fn create_call_carries_value_and_selector() {
        let call = EscrowCall::Create {
            receiver: RECEIVER,
            amount: "1.5".into(),
        }
        .build(CONTRACT, 18)
        .unwrap();

        assert_eq!(call.to, CONTRACT);
        assert_eq!(call.value, U256::from(1_500_000_000_000_000_000u128));
        assert_eq!(&call.calldata[..4], WalletX::createEscrowCall::SELECTOR.as_slice());
        assert_eq!(call.calldata.len(), 4 + 32);
        assert_eq!(&call.calldata[16..36], RECEIVER.as_slice());
    }

    #[test]
    fn claim_and_refund_have_zero_value() {
        let claim = EscrowCall::Claim {
            escrow_id: U256::from(42),
        }
        .build(CONTRACT, 18)
        .unwrap();
        assert!(claim.value.is_zero());
        assert_eq!(&claim.calldata[..4], WalletX::claimEscrowCall::SELECTOR.as_slice());
        assert_eq!(claim.calldata[35], 42);

        let refund = EscrowCall::Refund {
            escrow_id: U256::from(42),
        }
        .build(CONTRACT, 18)
        .unwrap();
        assert_eq!(&refund.calldata[..4], WalletX::refundEscrowCall::SELECTOR.as_slice());
        assert_ne!(claim.calldata, refund.calldata);
    }

    #[test]
    fn selectors_match_solidity_signatures() {
        assert_eq!(WalletX::claimEscrowCall::SIGNATURE, "claimEscrow(uint256)");
        assert_eq!(WalletX::createEscrowCall::SIGNATURE, "createEscrow(address)");
        assert_eq!(
            WalletX::EscrowCreated::SIGNATURE,
            "EscrowCreated(uint256,address,address,uint256)"
        );
    }

    #[test]
    fn create_rejects_over_precise_amount() {
        let err = EscrowCall::Create {
            receiver: RECEIVER,
            amount: "0.0000000000000000001".into(),
        }
        .build(CONTRACT, 18)
        .unwrap_err();
        assert!(matches!(err, ChainError::Amount(_)));
    }

    #[test]
    fn named_encoding_matches_typed() {
        let typed = EscrowCall::Claim {
            escrow_id: U256::from(7),
        }
        .build(CONTRACT, 18)
        .unwrap();
        let named = encode_named(CONTRACT, "claimEscrow", &[CallArg::Uint(U256::from(7))], U256::ZERO)
            .unwrap();
        assert_eq!(typed, named);
    }

    #[test]
    fn unknown_function_is_encoding_error() {
        let err = encode_named(CONTRACT, "drainEscrow", &[], U256::ZERO).unwrap_err();
        assert!(matches!(err, ChainError::Encoding(_)));
    }

    #[test]
    fn mismatched_arguments_are_encoding_errors() {
        let err = encode_call(
            CONTRACT,
            EscrowFunction::ClaimEscrow,
            &[CallArg::Address(RECEIVER)],
            U256::ZERO,
        )
        .unwrap_err();
        assert!(err.to_string().contains("expects (uint256), got (address)"));

        assert!(encode_call(CONTRACT, EscrowFunction::CreateEscrow, &[], U256::ZERO).is_err());
    }

    #[test]
    fn value_on_non_payable_is_rejected() {
        let err = encode_call(
            CONTRACT,
            EscrowFunction::RefundEscrow,
            &[CallArg::Uint(U256::from(1))],
            U256::from(1),
        )
        .unwrap_err();
        assert!(matches!(err, ChainError::Encoding(_)));
    }

    #[test]
    fn escrow_id_parsing() {
        assert_eq!(parse_escrow_id("42").unwrap(), U256::from(42));
        assert!(parse_escrow_id("").is_err());
        assert!(parse_escrow_id("0x2a").is_err());
        assert!(parse_escrow_id(&"9".repeat(90)).is_err());
    }

    #[test]
    fn finds_escrow_id_among_unrelated_logs() {
        let unrelated = Log {
            address: CONTRACT,
            topics: vec![B256::repeat_byte(0x11)],
            data: Bytes::from_static(&[0xde, 0xad, 0xbe, 0xef]),
            log_index: None,
        };
        let logs = vec![unrelated, creation_log(CONTRACT, 42)];
        assert_eq!(find_escrow_created(&logs, Some(CONTRACT)), Some(U256::from(42)));
    }

    #[test]
    fn ignores_events_from_other_contracts() {
        let logs = vec![creation_log(RECEIVER, 9)];
        assert_eq!(find_escrow_created(&logs, Some(CONTRACT)), None);
        assert_eq!(find_escrow_created(&logs, None), Some(U256::from(9)));
    }

    #[test]
    fn no_logs_means_no_id() {
        assert_eq!(find_escrow_created(&[], Some(CONTRACT)), None);
    }
}
