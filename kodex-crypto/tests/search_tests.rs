use kodex_crypto::{Hasher, KeyedHashScheme, SearchScheme, SearchSecret, SharingKey};
use pretty_assertions::assert_ne;

fn scheme() -> KeyedHashScheme {
    KeyedHashScheme::new(Hasher::generate(), Hasher::generate(), SearchSecret::generate())
}

#[test]
fn index_derivation_is_deterministic() {
    let scheme = scheme();
    let secret = SharingKey::generate().index_secret();
    assert_eq!(
        scheme.derive_index("invoice", &secret),
        scheme.derive_index("invoice", &secret)
    );
}

#[test]
fn index_address_depends_on_object_secret() {
    let scheme = scheme();
    let a = SharingKey::generate().index_secret();
    let b = SharingKey::generate().index_secret();
    assert_ne!(scheme.derive_index("invoice", &a), scheme.derive_index("invoice", &b));
}

#[test]
fn index_address_depends_on_term() {
    let scheme = scheme();
    let secret = SharingKey::generate().index_secret();
    assert_ne!(
        scheme.derive_index("invoice", &secret),
        scheme.derive_index("receipt", &secret)
    );
}

#[test]
fn term_hash_depends_on_both_hashers() {
    let left = Hasher::generate();
    let esk = SearchSecret::generate();
    let a = KeyedHashScheme::new(left.clone(), Hasher::generate(), esk.clone());
    let b = KeyedHashScheme::new(left, Hasher::generate(), esk);
    assert_ne!(a.hash_term("invoice"), b.hash_term("invoice"));
}

#[test]
fn bridge_key_is_deterministic_per_user_and_document() {
    let alice = scheme();
    let bob = scheme();
    let key = SharingKey::generate();

    assert_eq!(alice.derive_bridge_key(&key), alice.derive_bridge_key(&key));
    assert_ne!(alice.derive_bridge_key(&key), bob.derive_bridge_key(&key));
    assert_ne!(
        alice.derive_bridge_key(&key),
        alice.derive_bridge_key(&SharingKey::generate())
    );
}

#[test]
fn index_secret_is_stable_for_a_sharing_key() {
    let key = SharingKey::generate();
    let restored = SharingKey::from_slice(key.as_bytes()).unwrap();
    assert_eq!(key.index_secret(), restored.index_secret());
}

#[test]
fn search_public_key_is_derived_from_private() {
    let private = SearchSecret::generate();
    assert_eq!(private.public_key(), private.public_key());
    assert_ne!(private.public_key(), SearchSecret::generate().public_key());
}

#[test]
fn address_hex_is_64_chars() {
    let scheme = scheme();
    let address = scheme.derive_index("x", &SharingKey::generate().index_secret());
    assert_eq!(address.to_hex().len(), 64);
    assert_eq!(address.to_string(), address.to_hex());
}
