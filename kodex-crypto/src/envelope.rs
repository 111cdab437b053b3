//! Identity keys and envelope encryption.
//!
//! Every user holds one Ed25519 identity key pair. It signs the user's key
//! container, and, converted to X25519, it receives sealed envelopes: each
//! envelope is encrypted from a fresh ephemeral X25519 key with
//! XSalsa20-Poly1305, so only the holder of the identity secret can open it
//! and the sender stays anonymous.
//!
//! The identity secret itself is stored at rest behind a password
//! (Argon2id -> ChaCha20-Poly1305).

use crate::cipher::{self, EncryptedData};
use crate::error::{CryptoError, CryptoResult};
use crate::key::{KdfParams, Salt, derive_key};
use crate::search::SharingKey;
use crate::service::CryptoService;
use crypto_box::aead::Aead;
use crypto_box::{PublicKey as BoxPublicKey, SalsaBox, SecretKey as BoxSecretKey};
use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use rand::RngCore;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use std::fmt;
use zeroize::{Zeroize, Zeroizing};

/// Size of an identity public key in bytes.
pub const PUBLIC_KEY_SIZE: usize = 32;

/// Size of an identity secret key in bytes.
pub const SECRET_KEY_SIZE: usize = 32;

/// Size of an identity signature in bytes.
pub const SIGNATURE_SIZE: usize = 64;

/// Size of the XSalsa20 nonce in bytes.
pub const ENVELOPE_NONCE_SIZE: usize = 24;

/// Smallest valid envelope: ephemeral key, nonce and a bare Poly1305 tag.
pub const MIN_ENVELOPE_SIZE: usize = PUBLIC_KEY_SIZE + ENVELOPE_NONCE_SIZE + 16;

/// The user's identity key pair.
///
/// The secret half is zeroized on drop (by `ed25519-dalek`).
pub struct IdentityKeyPair {
    signing: SigningKey,
}

impl IdentityKeyPair {
    /// Generates a new identity from the OS RNG.
    pub fn generate() -> Self {
        let mut seed = [0u8; SECRET_KEY_SIZE];
        OsRng.fill_bytes(&mut seed);
        let pair = Self::from_secret_bytes(seed);
        seed.zeroize();
        pair
    }

    pub fn from_secret_bytes(bytes: [u8; SECRET_KEY_SIZE]) -> Self {
        Self {
            signing: SigningKey::from_bytes(&bytes),
        }
    }

    /// Raw secret bytes, zeroized when the returned buffer drops.
    pub fn secret_bytes(&self) -> Zeroizing<[u8; SECRET_KEY_SIZE]> {
        Zeroizing::new(self.signing.to_bytes())
    }

    pub fn public(&self) -> IdentityPublicKey {
        IdentityPublicKey(self.signing.verifying_key())
    }

    pub fn sign(&self, message: &[u8]) -> [u8; SIGNATURE_SIZE] {
        self.signing.sign(message).to_bytes()
    }

    /// X25519 secret used to open envelopes addressed to this identity.
    fn box_secret(&self) -> BoxSecretKey {
        BoxSecretKey::from(self.signing.to_scalar_bytes())
    }
}

impl fmt::Debug for IdentityKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityKeyPair")
            .field("public", &self.public())
            .finish_non_exhaustive()
    }
}

/// Public half of an identity key pair.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct IdentityPublicKey(VerifyingKey);

impl IdentityPublicKey {
    pub fn from_bytes(bytes: &[u8]) -> CryptoResult<Self> {
        if bytes.len() != PUBLIC_KEY_SIZE {
            return Err(CryptoError::InvalidKeyLength {
                expected: PUBLIC_KEY_SIZE,
                actual: bytes.len(),
            });
        }
        let mut buff = [0u8; PUBLIC_KEY_SIZE];
        buff.copy_from_slice(bytes);
        VerifyingKey::from_bytes(&buff)
            .map(Self)
            .map_err(|_| CryptoError::InvalidKey("not a valid identity public key".to_string()))
    }

    pub fn to_bytes(&self) -> [u8; PUBLIC_KEY_SIZE] {
        self.0.to_bytes()
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }

    /// Verifies a signature produced by [`IdentityKeyPair::sign`].
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> CryptoResult<()> {
        let signature =
            Signature::from_slice(signature).map_err(|_| CryptoError::Signature)?;
        self.0
            .verify_strict(message, &signature)
            .map_err(|_| CryptoError::Signature)
    }

    /// X25519 public key envelopes are sealed to.
    fn box_public(&self) -> BoxPublicKey {
        BoxPublicKey::from(self.0.to_montgomery().to_bytes())
    }
}

impl fmt::Debug for IdentityPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IdentityPublicKey({})", self.to_hex())
    }
}

/// Payload sealed to an identity public key.
///
/// # Wire Format
///
/// ```text
/// [ ephemeral_pubkey: 32 ][ nonce: 24 ][ ciphertext + tag ]
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedEnvelope {
    /// Ephemeral X25519 public key (sender side of DH).
    pub ephemeral_public_key: [u8; PUBLIC_KEY_SIZE],
    /// XSalsa20 nonce.
    pub nonce: [u8; ENVELOPE_NONCE_SIZE],
    /// XSalsa20-Poly1305 ciphertext + Poly1305 tag.
    pub ciphertext: Vec<u8>,
}

impl SealedEnvelope {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out =
            Vec::with_capacity(PUBLIC_KEY_SIZE + ENVELOPE_NONCE_SIZE + self.ciphertext.len());
        out.extend_from_slice(&self.ephemeral_public_key);
        out.extend_from_slice(&self.nonce);
        out.extend_from_slice(&self.ciphertext);
        out
    }

    /// Parses the wire format, rejecting anything too short to hold an
    /// ephemeral key, a nonce and a tag.
    pub fn from_bytes(bytes: &[u8]) -> CryptoResult<Self> {
        if bytes.len() < MIN_ENVELOPE_SIZE {
            return Err(CryptoError::MalformedEnvelope(format!(
                "expected at least {MIN_ENVELOPE_SIZE} bytes, got {}",
                bytes.len()
            )));
        }
        let mut ephemeral_public_key = [0u8; PUBLIC_KEY_SIZE];
        ephemeral_public_key.copy_from_slice(&bytes[..PUBLIC_KEY_SIZE]);
        let mut nonce = [0u8; ENVELOPE_NONCE_SIZE];
        nonce.copy_from_slice(&bytes[PUBLIC_KEY_SIZE..PUBLIC_KEY_SIZE + ENVELOPE_NONCE_SIZE]);
        Ok(Self {
            ephemeral_public_key,
            nonce,
            ciphertext: bytes[PUBLIC_KEY_SIZE + ENVELOPE_NONCE_SIZE..].to_vec(),
        })
    }
}

/// Seals arbitrary bytes to a recipient identity.
pub fn seal(payload: &[u8], recipient: &IdentityPublicKey) -> CryptoResult<SealedEnvelope> {
    let ephemeral = BoxSecretKey::generate(&mut OsRng);
    let ephemeral_pk = ephemeral.public_key();

    let salsa_box = SalsaBox::new(&recipient.box_public(), &ephemeral);

    let mut nonce = [0u8; ENVELOPE_NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce);

    let ciphertext = salsa_box
        .encrypt(crypto_box::Nonce::from_slice(&nonce), payload)
        .map_err(|e| CryptoError::Encryption(format!("envelope seal failed: {e}")))?;

    Ok(SealedEnvelope {
        ephemeral_public_key: *ephemeral_pk.as_bytes(),
        nonce,
        ciphertext,
    })
}

/// Opens an envelope with the recipient's identity.
pub fn open(envelope: &SealedEnvelope, recipient: &IdentityKeyPair) -> CryptoResult<Vec<u8>> {
    let ephemeral_pk = BoxPublicKey::from(envelope.ephemeral_public_key);
    let salsa_box = SalsaBox::new(&ephemeral_pk, &recipient.box_secret());

    salsa_box
        .decrypt(
            crypto_box::Nonce::from_slice(&envelope.nonce),
            envelope.ciphertext.as_ref(),
        )
        .map_err(|_| {
            CryptoError::Decryption("envelope open failed (wrong key or tampered data)".to_string())
        })
}

/// Wraps a crypto service for a recipient.
pub fn wrap_service(
    service: &CryptoService,
    recipient: &IdentityPublicKey,
) -> CryptoResult<SealedEnvelope> {
    let material = service.to_material()?;
    seal(&material, recipient)
}

/// Unwraps a crypto service sealed by [`wrap_service`].
pub fn unwrap_service(
    envelope: &SealedEnvelope,
    recipient: &IdentityKeyPair,
) -> CryptoResult<CryptoService> {
    let material = Zeroizing::new(open(envelope, recipient)?);
    CryptoService::from_material(&material)
}

/// Wraps a document sharing key for a recipient.
pub fn wrap_sharing_key(
    key: &SharingKey,
    recipient: &IdentityPublicKey,
) -> CryptoResult<SealedEnvelope> {
    seal(key.as_bytes(), recipient)
}

/// Unwraps a sharing key sealed by [`wrap_sharing_key`].
pub fn unwrap_sharing_key(
    envelope: &SealedEnvelope,
    recipient: &IdentityKeyPair,
) -> CryptoResult<SharingKey> {
    let bytes = Zeroizing::new(open(envelope, recipient)?);
    SharingKey::from_slice(&bytes)
}

/// Identity secret encrypted with a password (Argon2id -> ChaCha20-Poly1305).
///
/// Bundles the salt and KDF parameters with the ciphertext so the password
/// is the only input needed for decryption.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PassphraseProtectedKey {
    pub salt: Salt,
    pub params: KdfParams,
    pub encrypted: EncryptedData,
}

/// Encrypts an identity secret with a password.
pub fn encrypt_private_key(
    identity: &IdentityKeyPair,
    passphrase: &str,
    params: &KdfParams,
) -> CryptoResult<PassphraseProtectedKey> {
    let salt = Salt::random();
    let derived = derive_key(passphrase, &salt, params)?;
    let encrypted = cipher::encrypt(&derived, identity.secret_bytes().as_ref())?;

    Ok(PassphraseProtectedKey {
        salt,
        params: params.clone(),
        encrypted,
    })
}

/// Decrypts a password-protected identity secret.
pub fn decrypt_private_key(
    protected: &PassphraseProtectedKey,
    passphrase: &str,
) -> CryptoResult<IdentityKeyPair> {
    let derived = derive_key(passphrase, &protected.salt, &protected.params)?;
    let plaintext = Zeroizing::new(cipher::decrypt(&derived, &protected.encrypted)?);

    if plaintext.len() != SECRET_KEY_SIZE {
        return Err(CryptoError::InvalidKeyLength {
            expected: SECRET_KEY_SIZE,
            actual: plaintext.len(),
        });
    }

    let mut bytes = [0u8; SECRET_KEY_SIZE];
    bytes.copy_from_slice(&plaintext);
    let identity = IdentityKeyPair::from_secret_bytes(bytes);
    bytes.zeroize();
    Ok(identity)
}
