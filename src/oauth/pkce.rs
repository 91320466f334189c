//! Usage: Per-login secrets for the authorization code flow (PKCE pair + anti-forgery state).

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};

#[derive(Debug, Clone)]
pub(crate) struct PkcePair {
    pub(crate) code_verifier: String,
    pub(crate) code_challenge: String,
}

pub(crate) fn generate_pkce_pair() -> PkcePair {
    let mut random = [0u8; 64];
    OsRng.fill_bytes(&mut random);

    let code_verifier = URL_SAFE_NO_PAD.encode(random);
    let code_challenge = code_challenge_s256(&code_verifier);

    PkcePair {
        code_verifier,
        code_challenge,
    }
}

pub(crate) fn code_challenge_s256(verifier: &str) -> String {
    let digest = Sha256::digest(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(digest)
}

/// 32 random bytes, hex encoded.
pub(crate) fn generate_state() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
