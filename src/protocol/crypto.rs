// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Diffie-Hellman handshake and the AES-128-CBC record cipher.
//!
//! The gateway supplies its own (tiny, attacker-chosen) DH parameters each
//! session. This is a documented fidelity requirement, not a
//! design recommendation: we reproduce the exact bit-exact derivation so the
//! bridge interoperates with gateways that predate it, including their weak
//! moduli.

use aes::Aes128;
use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::{BlockModeDecrypt, BlockModeEncrypt, KeyIvInit};
use md5::{Digest, Md5};
use num_bigint::BigUint;
use rand::Rng;

use crate::error::TransportError;

type Encryptor = cbc::Encryptor<Aes128>;
type Decryptor = cbc::Decryptor<Aes128>;

/// The three big-endian u32 values the gateway sends as its handshake.
#[derive(Debug, Clone, Copy)]
pub struct HandshakeRequest {
    pub prime: u32,
    pub generator: u32,
    pub client_public: u32,
}

impl HandshakeRequest {
    /// Parse the wire-exact 12-byte handshake: `prime | generator | clientPublic`.
    pub fn parse(bytes: &[u8]) -> Result<Self, TransportError> {
        if bytes.len() != 12 {
            return Err(TransportError::HandshakeMalformed);
        }
        let read_u32 = |s: &[u8]| u32::from_be_bytes([s[0], s[1], s[2], s[3]]);
        Ok(Self {
            prime: read_u32(&bytes[0..4]),
            generator: read_u32(&bytes[4..8]),
            client_public: read_u32(&bytes[8..12]),
        })
    }
}

/// Result of running the server side of the handshake: the 4-byte reply to
/// send back, plus the derived session cipher.
pub struct HandshakeOutcome {
    pub server_public_reply: [u8; 4],
    pub cipher: SessionCipher,
}

/// Run the server side of the DH handshake against a client's request.
///
/// Chooses a private exponent uniformly in `[2, prime-2]`, derives the
/// shared secret, and from it the AES key (`MD5(shared)`) and IV
/// (`MD5(key)`).
pub fn server_handshake(req: &HandshakeRequest) -> HandshakeOutcome {
    let prime = BigUint::from(req.prime);
    let generator = BigUint::from(req.generator);
    let client_public = BigUint::from(req.client_public);

    let private = random_exponent(&prime);
    let server_public = generator.modpow(&private, &prime);
    let shared = client_public.modpow(&private, &prime);

    let cipher = SessionCipher::derive(&shared);

    let server_public_u32 = biguint_to_u32(&server_public);
    HandshakeOutcome { server_public_reply: server_public_u32.to_be_bytes(), cipher }
}

/// Choose a private exponent uniformly in `[2, prime-2]`.
///
/// Degenerates gracefully for the pathologically small primes the protocol
/// allows (e.g. `prime=11`): any prime `<= 4` collapses the range to a
/// single usable value, which we return directly rather than panicking on
/// an empty range.
fn random_exponent(prime: &BigUint) -> BigUint {
    let two = BigUint::from(2u32);
    if *prime <= BigUint::from(4u32) {
        return two;
    }
    let upper = prime - BigUint::from(2u32); // exclusive bound for gen_range below
    let mut rng = rand::rng();
    let span = &upper - &two;
    let span_u64 = biguint_to_u64(&span).max(1);
    let offset = rng.random_range(0..=span_u64);
    &two + BigUint::from(offset)
}

fn biguint_to_u32(v: &BigUint) -> u32 {
    let bytes = v.to_bytes_be();
    let mut buf = [0u8; 4];
    let start = buf.len().saturating_sub(bytes.len());
    let take = bytes.len().min(4);
    buf[start..].copy_from_slice(&bytes[bytes.len() - take..]);
    u32::from_be_bytes(buf)
}

fn biguint_to_u64(v: &BigUint) -> u64 {
    let bytes = v.to_bytes_be();
    let mut buf = [0u8; 8];
    let start = buf.len().saturating_sub(bytes.len());
    let take = bytes.len().min(8);
    buf[start..].copy_from_slice(&bytes[bytes.len() - take..]);
    u64::from_be_bytes(buf)
}

/// AES-128-CBC session cipher with a fixed-per-session IV.
///
/// The IV is derived once at handshake time (`MD5(key)`) and reused for
/// every record in the session — not per-record. This means identical
/// plaintexts under the same session produce identical ciphertexts; this is
/// the documented fidelity requirement, reproduced exactly
/// rather than "fixed" to per-record random IVs.
pub struct SessionCipher {
    key: [u8; 16],
    iv: [u8; 16],
}

impl SessionCipher {
    /// Derive `key = MD5(be_bytes(shared))`, `iv = MD5(key)`.
    pub fn derive(shared: &BigUint) -> Self {
        let shared_bytes = shared.to_bytes_be();
        let key: [u8; 16] = Md5::digest(&shared_bytes).into();
        let iv: [u8; 16] = Md5::digest(key).into();
        Self { key, iv }
    }

    /// Encrypt a plaintext payload with PKCS7 padding to a 16-byte multiple.
    pub fn encrypt(&self, plaintext: &[u8]) -> Vec<u8> {
        Encryptor::new(&self.key.into(), &self.iv.into()).encrypt_padded_vec::<Pkcs7>(plaintext)
    }

    /// Decrypt and unpad a ciphertext. Fails if the ciphertext is not a
    /// 16-byte multiple or its padding is invalid.
    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, TransportError> {
        Decryptor::new(&self.key.into(), &self.iv.into())
            .decrypt_padded_vec::<Pkcs7>(ciphertext)
            .map_err(|_| TransportError::DecryptFailure)
    }
}
