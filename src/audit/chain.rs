use itertools::Itertools;

use crate::{
    audit::record::{AuditDraft, AuditRecord, canonical_bytes},
    error::AuditError,
};

/// `prev_hash` of the first record in every partition.
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// Digest of one record given its predecessor's hash and its canonical
/// serialization: `blake3(prev_hash || canonical)`.
pub fn chain_hash(prev_hash: &str, canonical: &[u8]) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(prev_hash.as_bytes());
    hasher.update(canonical);
    hasher.finalize().to_hex().to_string()
}

/// Threads a draft onto its partition chain, producing the sealed record.
pub fn seal(draft: AuditDraft, prev_hash: &str) -> AuditRecord {
    let mut record = AuditRecord {
        id: draft.id,
        client_id: draft.client_id,
        ticker: draft.ticker,
        inputs: draft.inputs,
        outcome: draft.outcome,
        signals: draft.signals,
        prev_hash: prev_hash.to_string(),
        hash: String::new(),
        emitted_at: draft.emitted_at,
    };
    record.hash = chain_hash(prev_hash, &canonical_bytes(&record));
    record
}

/// Verifies one partition's chain from genesis in a single O(N) pass.
///
/// Reports the index of the first record whose linkage or digest does not
/// hold, which localizes any single-record mutation.
pub fn verify_chain(records: &[AuditRecord]) -> Result<(), AuditError> {
    if let Some(first) = records.first()
        && first.prev_hash != GENESIS_HASH
    {
        return Err(AuditError::ChainBroken { index: 0 });
    }
    for (index, record) in records.iter().enumerate() {
        if record.hash != chain_hash(&record.prev_hash, &canonical_bytes(record)) {
            return Err(AuditError::ChainBroken { index });
        }
    }
    for (index, (prev, next)) in records.iter().tuple_windows().enumerate() {
        if next.prev_hash != prev.hash {
            return Err(AuditError::ChainBroken { index: index + 1 });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::*;
    use crate::{
        audit::record::AuditOutcome,
        data::{
            breakdown::FeeRequest,
            domain::{ClientId, Ticker},
        },
    };

    fn draft(position: i64) -> AuditDraft {
        let request = FeeRequest {
            ticker: Ticker::new("AAPL").unwrap(),
            position_value: Decimal::new(position, 0),
            loan_days: 30,
            client_id: ClientId::from("C"),
        };
        AuditDraft::new(
            &request,
            AuditOutcome::Failed {
                reason: "test".to_string(),
            },
            None,
        )
    }

    fn chain(n: i64) -> Vec<AuditRecord> {
        let mut records: Vec<AuditRecord> = Vec::new();
        for i in 0..n {
            let prev = records
                .last()
                .map(|r| r.hash.clone())
                .unwrap_or_else(|| GENESIS_HASH.to_string());
            records.push(seal(draft(1000 + i), &prev));
        }
        records
    }

    #[test]
    fn intact_chains_verify() {
        verify_chain(&chain(10)).unwrap();
        verify_chain(&[]).unwrap();
    }

    #[test]
    fn mutation_is_localized_to_its_index() {
        let mut records = chain(10);
        records[5].inputs.position_value = Decimal::new(999_999, 0);
        assert!(matches!(
            verify_chain(&records),
            Err(AuditError::ChainBroken { index: 5 })
        ));
    }

    #[test]
    fn relinked_tampering_still_breaks_downstream() {
        let mut records = chain(4);
        // Re-seal record 1 with altered inputs; record 2 now points at a
        // hash that no longer exists.
        let mut tampered = draft(7777);
        tampered.emitted_at = records[1].emitted_at;
        records[1] = seal(tampered, GENESIS_HASH);
        assert!(verify_chain(&records).is_err());
    }

    #[test]
    fn first_record_must_anchor_at_genesis() {
        let records = vec![seal(draft(1), "ffffffff")];
        assert!(matches!(
            verify_chain(&records),
            Err(AuditError::ChainBroken { index: 0 })
        ));
    }
}
