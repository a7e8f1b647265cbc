use sha2::{Digest, Sha256};

use crate::field::FieldElement;

/// Verification identifier: a hash over the sorted echo multiset seen
/// at finalization, binding a finalized sharing's identity independent
/// of arrival order or timing.
pub fn compute_vid(session_id: &str, echoes: &[(u32, FieldElement)]) -> String {
    let mut sorted = echoes.to_vec();
    sorted.sort_by_key(|(point, _)| *point);

    let mut hasher = Sha256::new();
    hasher.update(session_id.as_bytes());
    hasher.update(b":");
    for (point, value) in &sorted {
        hasher.update(point.to_le_bytes());
        hasher.update(value.to_u128().to_le_bytes());
    }
    let digest = hasher.finalize();
    hex_prefix(&digest, 8)
}

fn hex_prefix(bytes: &[u8], n_bytes: usize) -> String {
    bytes[..n_bytes].iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vid_is_stable_regardless_of_echo_arrival_order() {
        let a = FieldElement::from_u64(1);
        let b = FieldElement::from_u64(2);
        let in_order = compute_vid("sid", &[(1, a), (2, b)]);
        let reordered = compute_vid("sid", &[(2, b), (1, a)]);
        assert_eq!(in_order, reordered);
    }

    #[test]
    fn vid_differs_for_different_session_ids() {
        let a = FieldElement::from_u64(1);
        assert_ne!(compute_vid("sid-a", &[(1, a)]), compute_vid("sid-b", &[(1, a)]));
    }

    #[test]
    fn vid_is_sixteen_hex_characters() {
        let a = FieldElement::from_u64(1);
        assert_eq!(compute_vid("sid", &[(1, a)]).len(), 16);
    }
}
