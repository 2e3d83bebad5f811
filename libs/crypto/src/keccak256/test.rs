use super::{Keccak256, Keccak256Hasher};
use crate::{Text, TextFmt};

#[test]
fn test_keccak256() -> Result<(), Box<dyn std::error::Error>> {
    // Test vectors obtained from a trusted source
    let test_vectors: Vec<(&[u8], &str)> = vec![
        (
            b"testing",
            "5f16f4c7f149ac4f9510d9cf8cf384038ad348b3bcdc01915f95de12df9d1b02",
        ),
        (
            b"",
            "c5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470",
        ),
        (
            &[0x12, 0x34, 0x56],
            "6adf031833174bbe4c85eafe59ddb54e6584648c2c962c6f94791ab49caa0ad4",
        ),
    ];

    for (input, expected_hash) in &test_vectors {
        let hash = Keccak256::new(input);
        assert_eq!(hash.as_bytes().as_slice(), hex::decode(expected_hash)?);
    }

    Ok(())
}

#[test]
fn hasher_is_length_prefixed() {
    let a = Keccak256Hasher::new("x").bytes(b"ab").bytes(b"c").finish();
    let b = Keccak256Hasher::new("x").bytes(b"a").bytes(b"bc").finish();
    assert_ne!(a, b);
    let c = Keccak256Hasher::new("y").bytes(b"ab").bytes(b"c").finish();
    assert_ne!(a, c);
}

#[test]
fn text_encoding() {
    let hash = Keccak256::new(b"vertex");
    let text = TextFmt::encode(&hash);
    assert!(text.starts_with("keccak256:"));
    assert_eq!(hash, Text::new(&text).decode::<Keccak256>().unwrap());
    assert!(Text::new("sha256:00").decode::<Keccak256>().is_err());
}
