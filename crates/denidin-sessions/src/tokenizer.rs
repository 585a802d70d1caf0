use std::sync::OnceLock;

use tiktoken_rs::CoreBPE;

/// A deterministic tokenizer for a nominal model.
/// `cl100k_base` is shared across every session regardless of which model a
/// given reply actually used — the budget is an approximation, not a billing
/// reconciliation.
fn bpe() -> &'static CoreBPE {
    static BPE: OnceLock<CoreBPE> = OnceLock::new();
    BPE.get_or_init(|| tiktoken_rs::cl100k_base().expect("cl100k_base tokenizer data is bundled"))
}

pub fn count_tokens(text: &str) -> u64 {
    bpe().encode_with_special_tokens(text).len() as u64
}
