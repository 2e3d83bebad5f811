use super::*;
use braid_consensus_crypto::{keccak256::Keccak256, Text, TextFmt};
use rand::Rng as _;

#[test]
fn test_signature_verify() {
    let rng = &mut rand::thread_rng();

    let msg1: Keccak256 = rng.gen();
    let msg2: Keccak256 = rng.gen();

    let key1: SecretKey = rng.gen();
    let key2: SecretKey = rng.gen();

    let sig1 = key1.sign_hash(&msg1);

    // Matching key and message.
    sig1.verify_hash(&msg1, &key1.public()).unwrap();

    // Mismatching message.
    assert!(sig1.verify_hash(&msg2, &key1.public()).is_err());

    // Mismatching key.
    assert!(sig1.verify_hash(&msg1, &key2.public()).is_err());
}

#[test]
fn test_text_encoding() {
    let rng = &mut rand::thread_rng();
    let key: SecretKey = rng.gen();
    let t = TextFmt::encode(&key);
    assert_eq!(key, Text::new(&t).decode::<SecretKey>().unwrap());
    assert!(Text::new(&t).decode::<PublicKey>().is_err());

    let public = key.public();
    let t = TextFmt::encode(&public);
    assert_eq!(public, Text::new(&t).decode::<PublicKey>().unwrap());
    assert!(t.contains(&public.short_id()));
}

#[test]
fn test_secret_not_in_debug() {
    let rng = &mut rand::thread_rng();
    let key: SecretKey = rng.gen();
    let secret_hex = hex::encode(braid_consensus_crypto::ByteFmt::encode(&key));
    assert!(!format!("{key:?}").contains(&secret_hex));
}
