//! Identifiers carrying a fixed leading byte pattern so that ids of different
//! record kinds are told apart at a glance in logs and storage.

use uuid::Uuid;

/// Random v4 uuid whose leading bytes are overwritten with `prefix`.
pub fn pretty_uuid(prefix: &[u8]) -> Uuid {
    let mut bytes = *Uuid::new_v4().as_bytes();
    let len = prefix.len().min(bytes.len());
    bytes[..len].copy_from_slice(&prefix[..len]);
    Uuid::from_bytes(bytes)
}

/// Whether `id` starts with `prefix`.
pub fn has_prefix(id: &Uuid, prefix: &[u8]) -> bool {
    id.as_bytes().starts_with(prefix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_is_stamped() {
        let id = pretty_uuid(&[0xEE, 0x00]);
        assert!(id.to_string().starts_with("ee00"));
        assert!(has_prefix(&id, &[0xEE, 0x00]));
        assert!(!has_prefix(&id, &[0xCA, 0xBA]));
    }

    #[test]
    fn test_ids_stay_unique() {
        let a = pretty_uuid(&[0xCA, 0xBA, 0x01]);
        let b = pretty_uuid(&[0xCA, 0xBA, 0x01]);
        assert_ne!(a, b);
    }
}
