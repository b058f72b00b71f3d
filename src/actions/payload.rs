use sha3::{Digest, Keccak256};

use crate::chain::ActionPayload;

/// `keccak256("<lower(target)>:<decimal(value)>:<lower(data)>")`, lowercase
/// 0x-prefixed hex. Taken over the last payload when the action produced a
/// batch (§3, §8 property 7).
pub fn action_hash(payloads: &[ActionPayload]) -> String {
    let Some(last) = payloads.last() else {
        return format!("0x{}", hex::encode(Keccak256::digest(b"")));
    };

    let preimage = format!(
        "{}:{}:{}",
        last.target.to_lowercase(),
        last.value,
        last.data.to_lowercase()
    );

    let digest = Keccak256::digest(preimage.as_bytes());
    format!("0x{}", hex::encode(digest))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic_across_calls() {
        let p = vec![ActionPayload {
            target: "0xABC".to_string(),
            value: "0".to_string(),
            data: "0xDEAD".to_string(),
        }];
        assert_eq!(action_hash(&p), action_hash(&p));
    }

    #[test]
    fn taken_from_last_payload_in_a_batch() {
        let single = vec![ActionPayload {
            target: "0xb".to_string(),
            value: "5".to_string(),
            data: "0x02".to_string(),
        }];
        let batch = vec![
            ActionPayload {
                target: "0xa".to_string(),
                value: "1".to_string(),
                data: "0x01".to_string(),
            },
            single[0].clone(),
        ];
        assert_eq!(action_hash(&single), action_hash(&batch));
    }

    #[test]
    fn case_insensitive_on_target_and_data() {
        let lower = vec![ActionPayload {
            target: "0xabc".to_string(),
            value: "1".to_string(),
            data: "0xdead".to_string(),
        }];
        let mixed = vec![ActionPayload {
            target: "0xABC".to_string(),
            value: "1".to_string(),
            data: "0xDEAD".to_string(),
        }];
        assert_eq!(action_hash(&lower), action_hash(&mixed));
    }
}
