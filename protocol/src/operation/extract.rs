//! Turning a mined transaction into an [`Operation`].
//!
//! A transaction carries a registry operation when it has exactly one
//! data-carrier output and that output holds masked metadata. The rest of the
//! operation comes from the transaction itself:
//!
//! - owner: first address of the output spent by the first input
//! - weight: value burned in the data-carrier output
//! - new owner: first address of the first spendable output

use tracing::{debug, warn};

use super::{Operation, OperationContext};
use crate::codec::error::CodecError;
use crate::codec::metadata::{decode_metadata, extract_metadata};
use crate::daemon::{ChainDaemon, DaemonError, Transaction, TxOut};

/// Extracts the registry operation carried by `tx`, if any.
///
/// Malformed metadata drops the transaction and is only logged. Daemon
/// failures while resolving the owner are returned, since skipping the
/// transaction would silently lose an operation.
pub async fn extract_operation<D>(
    tx: &Transaction,
    block: u64,
    daemon: &D,
) -> Result<Option<Operation>, DaemonError>
where
    D: ChainDaemon + ?Sized,
{
    let mut carriers = tx.data_carrier_outputs();
    let carrier = match (carriers.next(), carriers.next()) {
        (Some(carrier), None) => carrier,
        _ => return Ok(None),
    };

    let metadata = match extract_metadata(&carrier.script_hex).and_then(|p| decode_metadata(&p)) {
        Ok(metadata) => metadata,
        Err(CodecError::NotMetadata(reason)) => {
            debug!(txid = %tx.txid, reason, "data carrier is not registry metadata");
            return Ok(None);
        }
        Err(error) => {
            warn!(txid = %tx.txid, block, %error, "dropping malformed registry metadata");
            return Ok(None);
        }
    };

    let Some(input) = tx.inputs.first() else {
        warn!(txid = %tx.txid, block, "registry metadata in a transaction without inputs");
        return Ok(None);
    };
    let funding = daemon.resolve_input(input).await?;
    let Some(owner) = funding.first_address() else {
        warn!(txid = %tx.txid, block, "funding output has no address");
        return Ok(None);
    };

    let context = OperationContext {
        owner: owner.to_string(),
        new_owner: tx
            .first_spendable_output()
            .and_then(TxOut::first_address)
            .map(str::to_string),
        block,
        weight: carrier.value,
    };

    match Operation::from_decoded(metadata, context) {
        Ok(op) => {
            debug!(txid = %tx.txid, %op, "extracted operation");
            Ok(Some(op))
        }
        Err(error) => {
            warn!(txid = %tx.txid, block, %error, "dropping malformed registry metadata");
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::entry::{Entry, EntryValue};
    use crate::codec::metadata::{encode_metadata, metadata_script};
    use crate::daemon::MemoryDaemon;
    use crate::operation::{OperationKind, CREATE_FLAG, TRANSFER_OWNERSHIP_FLAG};

    fn create_payload() -> Vec<u8> {
        encode_metadata(CREATE_FLAG, &Entry::new(vec![0xAB], EntryValue::Ipv4([1, 2, 3, 4]))).unwrap()
    }

    #[tokio::test]
    async fn test_extracts_owner_weight_and_block() {
        let daemon = MemoryDaemon::new();
        let tx = daemon
            .metadata_transaction("alice", &create_payload(), 2_000, None)
            .unwrap();

        let op = extract_operation(&tx, 3, &daemon).await.unwrap().unwrap();
        assert_eq!(op.owner(), "alice");
        assert_eq!(op.weight(), 2_000);
        assert_eq!(op.block(), 3);
        assert_eq!(
            op.kind(),
            &OperationKind::Create {
                value: EntryValue::Ipv4([1, 2, 3, 4])
            }
        );
    }

    #[tokio::test]
    async fn test_transfer_receiver_is_first_spendable_output() {
        let daemon = MemoryDaemon::new();
        let payload =
            encode_metadata(TRANSFER_OWNERSHIP_FLAG, &Entry::new(vec![0xAB], EntryValue::None)).unwrap();
        let tx = daemon
            .metadata_transaction("alice", &payload, 10, Some("bob"))
            .unwrap();

        let op = extract_operation(&tx, 4, &daemon).await.unwrap().unwrap();
        assert_eq!(op.new_owner(), Some("bob"));
    }

    #[tokio::test]
    async fn test_transfer_without_receiver_is_dropped() {
        let daemon = MemoryDaemon::new();
        let payload =
            encode_metadata(TRANSFER_OWNERSHIP_FLAG, &Entry::new(vec![0xAB], EntryValue::None)).unwrap();
        let tx = daemon.metadata_transaction("alice", &payload, 10, None).unwrap();

        assert_eq!(extract_operation(&tx, 4, &daemon).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_two_data_carriers_carry_nothing() {
        let daemon = MemoryDaemon::new();
        let mut tx = daemon
            .metadata_transaction("alice", &create_payload(), 10, None)
            .unwrap();
        let extra = tx.outputs[0].clone();
        tx.outputs.push(extra);

        assert_eq!(extract_operation(&tx, 4, &daemon).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_foreign_and_malformed_payloads_are_dropped() {
        let daemon = MemoryDaemon::new();

        let foreign = daemon
            .metadata_transaction("alice", b"hello world, not ours", 10, None)
            .unwrap();
        assert_eq!(extract_operation(&foreign, 4, &daemon).await.unwrap(), None);

        // Masked header followed by an unknown value flag.
        let broken = daemon
            .metadata_transaction("alice", &[0xC6, 0xDC, 0x01, 0x01, 0x70, 0x00], 10, None)
            .unwrap();
        assert_eq!(extract_operation(&broken, 4, &daemon).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_unresolvable_owner_is_an_error() {
        let daemon = MemoryDaemon::new();
        let tx = Transaction {
            txid: "orphan".into(),
            inputs: vec![crate::daemon::TxIn {
                txid: "missing".into(),
                vout: 0,
            }],
            outputs: vec![TxOut {
                value: 1,
                script_hex: metadata_script(&create_payload()).unwrap(),
                addresses: Vec::new(),
            }],
        };

        assert!(matches!(
            extract_operation(&tx, 4, &daemon).await,
            Err(DaemonError::NotFound(_))
        ));
    }
}
