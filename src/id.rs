use uuid::Uuid;

/// Namespace for identifiers synthesized from legacy entries that had none.
const LEGACY_NAMESPACE: Uuid = Uuid::from_u128(0x6c1d_4f7e_9a0b_4c53_8e21_5b7a_0f3d_c2e9);

pub fn new_uuid_v7() -> String {
    Uuid::now_v7().to_string()
}

/// Stable id for a legacy entry: the same bytes always map to the same id.
pub fn legacy_uuid_v5(source: &[u8]) -> String {
    Uuid::new_v5(&LEGACY_NAMESPACE, source).to_string()
}
