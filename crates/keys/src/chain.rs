//! Chain keypairs and everything signed with them: transactions, block
//! seals (trust and work schemes) and notification payloads.

use dragonnet_common::config::ProofScheme;
use dragonnet_primitives::{encode, hash};
use dragonnet_state::{block::BlockProof, StrippedTransaction, Transaction};
use secp256k1::{ecdsa::Signature, Message, PublicKey, SecretKey, SECP256K1};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum KeyError {
    #[error("malformed key material: {0}")]
    MalformedKey(String),

    #[error("proof-of-work search exhausted the nonce space")]
    NonceSpaceExhausted,
}

/// This chain's signing identity plus the active proof scheme.
pub struct ChainKeys {
    dc_id: String,
    secret: SecretKey,
    public: PublicKey,
    scheme: ProofScheme,
    pow_difficulty: u32,
}

impl ChainKeys {
    pub fn generate(dc_id: String, scheme: ProofScheme, pow_difficulty: u32) -> Self {
        let secret = SecretKey::new(&mut rand::thread_rng());
        let public = PublicKey::from_secret_key(SECP256K1, &secret);
        Self {
            dc_id,
            secret,
            public,
            scheme,
            pow_difficulty,
        }
    }

    pub fn from_b64_secret(
        dc_id: String,
        b64_secret: &str,
        scheme: ProofScheme,
        pow_difficulty: u32,
    ) -> Result<Self, KeyError> {
        let bytes = encode::b64_decode(b64_secret)
            .map_err(|e| KeyError::MalformedKey(e.to_string()))?;
        let secret = SecretKey::from_slice(&bytes)
            .map_err(|e| KeyError::MalformedKey(e.to_string()))?;
        let public = PublicKey::from_secret_key(SECP256K1, &secret);
        Ok(Self {
            dc_id,
            secret,
            public,
            scheme,
            pow_difficulty,
        })
    }

    pub fn dc_id(&self) -> &str {
        &self.dc_id
    }

    pub fn scheme(&self) -> ProofScheme {
        self.scheme
    }

    pub fn public_b64(&self) -> String {
        encode::b64(&self.public.serialize())
    }

    pub fn secret_b64(&self) -> String {
        encode::b64(&self.secret.secret_bytes())
    }

    /// Compact ECDSA signature over the SHA-256 of `bytes`, base64-encoded.
    pub fn sign_bytes(&self, bytes: &[u8]) -> String {
        let msg = Message::from_digest(hash::raw(bytes));
        let sig = SECP256K1.sign_ecdsa(&msg, &self.secret);
        encode::b64(&sig.serialize_compact())
    }

    /// Verify a signature produced by [`ChainKeys::sign_bytes`] under the
    /// given base64 public key.
    pub fn verify_bytes(public_b64: &str, bytes: &[u8], signature_b64: &str) -> bool {
        let Ok(pk_bytes) = encode::b64_decode(public_b64) else {
            return false;
        };
        let Ok(public) = PublicKey::from_slice(&pk_bytes) else {
            return false;
        };
        let Ok(sig_bytes) = encode::b64_decode(signature_b64) else {
            return false;
        };
        let Ok(sig) = Signature::from_compact(&sig_bytes) else {
            return false;
        };
        let msg = Message::from_digest(hash::raw(bytes));
        SECP256K1.verify_ecdsa(&msg, &sig, &public).is_ok()
    }

    /// Hash and sign a transaction in place, in both its forms.
    pub fn sign_transaction(&self, txn: &mut Transaction) {
        let full_hash = txn.compute_full_hash();
        let signature = self.sign_bytes(full_hash.as_bytes());
        txn.full_hash = Some(full_hash);
        txn.signature = Some(signature);
    }

    /// Re-validate a stripped transaction against its producing chain's
    /// public key: the carried hash must match the content and the signature
    /// must verify over it.
    pub fn verify_stripped_transaction(public_b64: &str, txn: &StrippedTransaction) -> bool {
        if txn.compute_full_hash() != txn.full_hash {
            return false;
        }
        Self::verify_bytes(public_b64, txn.full_hash.as_bytes(), &txn.signature)
    }

    /// Hash a block's canonical bytes for anchoring on a public network.
    pub fn hash_block_for_public_broadcast(&self, signing_bytes: &[u8]) -> String {
        encode::b64(&hash::raw(signing_bytes))
    }

    /// Seal a block's canonical bytes under the active proof scheme.
    pub fn seal_block(&self, signing_bytes: &[u8]) -> Result<BlockProof, KeyError> {
        let proof = self.sign_bytes(signing_bytes);
        let nonce = match self.scheme {
            ProofScheme::Trust => None,
            ProofScheme::Work => Some(search_nonce(signing_bytes, self.pow_difficulty)?),
        };
        Ok(BlockProof {
            scheme: self.scheme,
            proof,
            nonce,
        })
    }

    /// Verify a block seal: the signature always, and for `work` proofs the
    /// nonce condition at the given difficulty.
    pub fn verify_block_proof(
        public_b64: &str,
        signing_bytes: &[u8],
        proof: &BlockProof,
        pow_difficulty: u32,
    ) -> bool {
        if !Self::verify_bytes(public_b64, signing_bytes, &proof.proof) {
            return false;
        }
        match proof.scheme {
            ProofScheme::Trust => true,
            ProofScheme::Work => proof
                .nonce
                .map(|n| meets_difficulty(signing_bytes, n, pow_difficulty))
                .unwrap_or(false),
        }
    }
}

fn work_digest(signing_bytes: &[u8], nonce: u64) -> [u8; 32] {
    hash::chained(&hash::raw(signing_bytes), &nonce.to_be_bytes())
}

fn meets_difficulty(signing_bytes: &[u8], nonce: u64, difficulty_bits: u32) -> bool {
    leading_zero_bits(&work_digest(signing_bytes, nonce)) >= difficulty_bits
}

fn search_nonce(signing_bytes: &[u8], difficulty_bits: u32) -> Result<u64, KeyError> {
    (0..u64::MAX)
        .find(|n| meets_difficulty(signing_bytes, *n, difficulty_bits))
        .ok_or(KeyError::NonceSpaceExhausted)
}

fn leading_zero_bits(digest: &[u8; 32]) -> u32 {
    let mut bits = 0;
    for byte in digest {
        if *byte == 0 {
            bits += 8;
        } else {
            bits += byte.leading_zeros();
            break;
        }
    }
    bits
}
