// ── Short ID derivation ────────────────────────────────────────────────────

const FNV32_OFFSET_BASIS: u32 = 0x811c_9dc5;
const FNV32_PRIME: u32 = 0x0100_0193;

/// Derive the short ID for a stored value.
///
/// FNV-1 (32-bit) over the UTF-8 bytes, rendered as 8 uppercase hex digits.
/// The output is stable across restarts, which is what lets a re-submitted
/// URL land on the same short ID. It is not injective; collisions are
/// resolved by the store, not here.
pub fn derive_short_id(value: &str) -> String {
    let hash = value.bytes().fold(FNV32_OFFSET_BASIS, |hash, byte| {
        hash.wrapping_mul(FNV32_PRIME) ^ u32::from(byte)
    });
    format!("{hash:08X}")
}
