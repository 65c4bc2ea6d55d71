pub mod chain;
pub mod emitter;
pub mod record;

pub use chain::{GENESIS_HASH, chain_hash, seal, verify_chain};
pub use emitter::AuditEmitter;
pub use record::{AuditDraft, AuditInputs, AuditOutcome, AuditRecord};
