use crate::error::ProofError;
use alloy::primitives::B256;

const SEQUENCE_TAG: u8 = 0x30;
const INTEGER_TAG: u8 = 0x02;

/// Splits a DER `SEQUENCE { INTEGER r, INTEGER s }` into 32 byte `r` and `s`.
///
/// Only the short length form is accepted; a secp256k1 signature is at most
/// 72 bytes so the long form never occurs for valid input.
pub fn parse_der(der: &[u8]) -> Result<(B256, B256), ProofError> {
    let (tag, body) = der
        .split_first()
        .ok_or_else(|| malformed("empty signature"))?;
    if *tag != SEQUENCE_TAG {
        return Err(malformed(format!("expected SEQUENCE tag, got 0x{tag:02x}")));
    }
    let (length, body) = body
        .split_first()
        .ok_or_else(|| malformed("missing SEQUENCE length"))?;
    if usize::from(*length) != body.len() {
        return Err(malformed(format!(
            "SEQUENCE length {length} does not match {} remaining bytes",
            body.len()
        )));
    }

    let (r, rest) = read_integer(body)?;
    let (s, rest) = read_integer(rest)?;
    if !rest.is_empty() {
        return Err(malformed(format!("{} trailing bytes", rest.len())));
    }
    Ok((r, s))
}

fn read_integer(input: &[u8]) -> Result<(B256, &[u8]), ProofError> {
    match input {
        [INTEGER_TAG, length, rest @ ..] => {
            let length = usize::from(*length);
            if length == 0 || length > 33 {
                return Err(malformed(format!("INTEGER of {length} bytes")));
            }
            let value = rest
                .get(..length)
                .ok_or_else(|| malformed("INTEGER runs past the end"))?;
            // DER integers are minimal two's complement, r and s are positive
            let value = match value {
                [0x00] => value,
                [0x00, next, ..] if *next < 0x80 => {
                    return Err(malformed("INTEGER with a redundant zero pad"));
                }
                [0x00, tail @ ..] => tail,
                [first, ..] if *first >= 0x80 => {
                    return Err(malformed("negative INTEGER"));
                }
                _ => value,
            };
            if value.len() > 32 {
                return Err(malformed(format!("INTEGER of {} significant bytes", value.len())));
            }
            let mut out = B256::ZERO;
            out[32 - value.len()..].copy_from_slice(value);
            Ok((out, &rest[length..]))
        }
        [tag, ..] => Err(malformed(format!("expected INTEGER tag, got 0x{tag:02x}"))),
        [] => Err(malformed("missing INTEGER")),
    }
}

fn malformed(message: impl Into<String>) -> ProofError {
    ProofError::MalformedSignature(message.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn der(r: &[u8], s: &[u8]) -> Vec<u8> {
        let mut body = vec![INTEGER_TAG, u8::try_from(r.len()).unwrap()];
        body.extend_from_slice(r);
        body.extend([INTEGER_TAG, u8::try_from(s.len()).unwrap()]);
        body.extend_from_slice(s);
        let mut out = vec![SEQUENCE_TAG, u8::try_from(body.len()).unwrap()];
        out.extend(body);
        out
    }

    #[test]
    fn test_parse_pads_and_strips() {
        let mut r = vec![0x00];
        r.extend([0x80; 32]);
        let (parsed_r, parsed_s) = parse_der(&der(&r, &[0x01, 0x02])).unwrap();
        assert_eq!(parsed_r, B256::repeat_byte(0x80));
        let mut expected_s = B256::ZERO;
        expected_s[30] = 0x01;
        expected_s[31] = 0x02;
        assert_eq!(parsed_s, expected_s);
    }

    #[test]
    fn test_matches_k256_der_output() {
        let key = k256::ecdsa::SigningKey::from_slice(&[0x5a; 32]).unwrap();
        let digest = [0x3c; 32];
        let signature: k256::ecdsa::Signature =
            k256::ecdsa::signature::hazmat::PrehashSigner::sign_prehash(&key, &digest).unwrap();
        let (r, s) = parse_der(signature.to_der().as_bytes()).unwrap();
        let raw = signature.to_bytes();
        assert_eq!(r.as_slice(), &raw[..32]);
        assert_eq!(s.as_slice(), &raw[32..]);
    }

    #[test]
    fn test_rejects_malformed_der() {
        let valid = der(&[0x01], &[0x02]);
        assert!(parse_der(&valid).is_ok());

        assert!(parse_der(&[]).is_err());

        let mut wrong_tag = valid.clone();
        wrong_tag[0] = 0x31;
        assert!(parse_der(&wrong_tag).is_err());

        let mut wrong_length = valid.clone();
        wrong_length[1] += 1;
        assert!(parse_der(&wrong_length).is_err());

        let mut trailing = valid.clone();
        trailing.push(0x00);
        trailing[1] += 1;
        assert!(parse_der(&trailing).is_err());

        assert!(parse_der(&der(&[], &[0x02])).is_err());
        assert!(parse_der(&der(&[0x01; 34], &[0x02])).is_err());
        assert!(parse_der(&der(&[0x01; 33], &[0x02])).is_err());

        let mut wrong_int_tag = valid;
        wrong_int_tag[2] = 0x04;
        assert!(parse_der(&wrong_int_tag).is_err());
    }

    #[test]
    fn test_rejects_non_minimal_integers() {
        assert_eq!(parse_der(&der(&[0x00], &[0x7f])).unwrap().0, B256::ZERO);
        assert!(parse_der(&der(&[0x00, 0x80], &[0x7f])).is_ok());

        let padded = parse_der(&der(&[0x00, 0x01], &[0x02])).unwrap_err();
        assert!(padded.to_string().contains("redundant zero pad"));
        assert!(parse_der(&der(&[0x01], &[0x00, 0x00, 0x02])).is_err());

        let mut padded_r = vec![0x00];
        padded_r.extend([0x7f; 32]);
        assert!(parse_der(&der(&padded_r, &[0x02])).is_err());

        let negative = parse_der(&der(&[0x80], &[0x02])).unwrap_err();
        assert!(negative.to_string().contains("negative INTEGER"));
        assert!(parse_der(&der(&[0x01], &[0xff; 32])).is_err());
    }
}
