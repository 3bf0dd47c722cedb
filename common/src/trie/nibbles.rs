use crate::error::ProofError;

pub fn to_nibbles(key: &[u8]) -> Vec<u8> {
    key.iter().flat_map(|b| [b >> 4, b & 0x0f]).collect()
}

pub fn common_prefix_len(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b).take_while(|(x, y)| x == y).count()
}

/// Hex-prefix (compact) encoding of a nibble path. The high nibble of the
/// first byte carries the leaf flag (2) and the odd-length flag (1).
pub fn hp_encode(nibbles: &[u8], leaf: bool) -> Vec<u8> {
    let flag: u8 = if leaf { 2 } else { 0 };
    let mut out = Vec::with_capacity(nibbles.len() / 2 + 1);
    let rest = match nibbles.split_first() {
        Some((first, rest)) if nibbles.len() % 2 == 1 => {
            out.push(((flag | 1) << 4) | first);
            rest
        }
        _ => {
            out.push(flag << 4);
            nibbles
        }
    };
    out.extend(rest.chunks_exact(2).map(|pair| (pair[0] << 4) | pair[1]));
    out
}

/// Returns the nibble path and whether it terminates in a leaf.
pub fn hp_decode(encoded: &[u8]) -> Result<(Vec<u8>, bool), ProofError> {
    let (first, rest) = encoded
        .split_first()
        .ok_or_else(|| ProofError::InvalidProof("empty hex-prefix path".to_string()))?;
    let flag = first >> 4;
    if flag > 3 {
        return Err(ProofError::InvalidProof(format!(
            "invalid hex-prefix flag {flag}"
        )));
    }
    let leaf = flag & 2 != 0;
    let odd = flag & 1 != 0;

    let mut nibbles = Vec::with_capacity(rest.len() * 2 + 1);
    if odd {
        nibbles.push(first & 0x0f);
    } else if first & 0x0f != 0 {
        return Err(ProofError::InvalidProof(
            "non-zero padding nibble in even hex-prefix path".to_string(),
        ));
    }
    nibbles.extend(to_nibbles(rest));
    Ok((nibbles, leaf))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hp_encoding_examples() {
        assert_eq!(hp_encode(&[1, 2, 3, 4, 5], false), vec![0x11, 0x23, 0x45]);
        assert_eq!(hp_encode(&[0, 1, 2, 3, 4, 5], false), vec![0x00, 0x01, 0x23, 0x45]);
        assert_eq!(hp_encode(&[0, 15, 1, 12, 11, 8], true), vec![0x20, 0x0f, 0x1c, 0xb8]);
        assert_eq!(hp_encode(&[15, 1, 12, 11, 8], true), vec![0x3f, 0x1c, 0xb8]);
        assert_eq!(hp_encode(&[], true), vec![0x20]);
    }

    #[test]
    fn test_hp_decode_inverts_encode() {
        for (path, leaf) in [
            (vec![], true),
            (vec![8, 0], true),
            (vec![1], false),
            (vec![0, 15, 1, 12, 11, 8], true),
        ] {
            assert_eq!(hp_decode(&hp_encode(&path, leaf)).unwrap(), (path, leaf));
        }
        assert!(hp_decode(&[]).is_err());
        assert!(hp_decode(&[0x41]).is_err());
        assert!(hp_decode(&[0x05]).is_err());
    }

    #[test]
    fn test_nibbles() {
        assert_eq!(to_nibbles(&[0x80]), vec![8, 0]);
        assert_eq!(to_nibbles(&[0x81, 0x80]), vec![8, 1, 8, 0]);
        assert_eq!(common_prefix_len(&[8, 1, 8], &[8, 1, 2]), 2);
        assert_eq!(common_prefix_len(&[], &[1]), 0);
    }
}
