//! Linear hash chains over ordered inputs.
//!
//! A chain links every input hash to the previous chain state:
//!
//! ```text
//! state_0 = H(0x01 || seed || leaf_0)      (seeded chain)
//! state_0 = leaf_0                         (unseeded chain)
//! state_i = H(0x01 || state_{i-1} || leaf_i)
//! result  = state_{n-1}
//! ```
//!
//! A [`HashChainProof`] for input `i` carries the state before it (or the seed),
//! the input itself and every later input. Replaying the proof reproduces the
//! chain result without access to the content behind the other inputs.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::Digest;

use crate::error::{LogError, Result};

/// Domain separation byte prepended to every chain link.
const LINK_TAG: u8 = 0x01;

/// Digest algorithm used for message hashes and hash chains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum HashAlgorithm {
    #[default]
    #[serde(rename = "SHA-256")]
    Sha256,
    #[serde(rename = "SHA-384")]
    Sha384,
    #[serde(rename = "SHA-512")]
    Sha512,
    #[serde(rename = "SHA3-256")]
    Sha3_256,
}

// DER-encoded object identifier contents (NIST hash algorithm arc 2.16.840.1.101.3.4.2).
const OID_SHA256: &[u8] = &[0x60, 0x86, 0x48, 0x01, 0x65, 0x03, 0x04, 0x02, 0x01];
const OID_SHA384: &[u8] = &[0x60, 0x86, 0x48, 0x01, 0x65, 0x03, 0x04, 0x02, 0x02];
const OID_SHA512: &[u8] = &[0x60, 0x86, 0x48, 0x01, 0x65, 0x03, 0x04, 0x02, 0x03];
const OID_SHA3_256: &[u8] = &[0x60, 0x86, 0x48, 0x01, 0x65, 0x03, 0x04, 0x02, 0x08];

impl HashAlgorithm {
    pub const ALL: [HashAlgorithm; 4] = [
        HashAlgorithm::Sha256,
        HashAlgorithm::Sha384,
        HashAlgorithm::Sha512,
        HashAlgorithm::Sha3_256,
    ];

    /// Hash a single buffer.
    pub fn digest(&self, data: &[u8]) -> Vec<u8> {
        self.digest_parts(&[data])
    }

    /// Hash the concatenation of `parts` without allocating the concatenation.
    pub fn digest_parts(&self, parts: &[&[u8]]) -> Vec<u8> {
        fn run<D: Digest>(parts: &[&[u8]]) -> Vec<u8> {
            let mut hasher = D::new();
            for part in parts {
                hasher.update(part);
            }
            hasher.finalize().to_vec()
        }

        match self {
            HashAlgorithm::Sha256 => run::<sha2::Sha256>(parts),
            HashAlgorithm::Sha384 => run::<sha2::Sha384>(parts),
            HashAlgorithm::Sha512 => run::<sha2::Sha512>(parts),
            HashAlgorithm::Sha3_256 => run::<sha3::Sha3_256>(parts),
        }
    }

    /// Digest length in bytes.
    pub fn output_len(&self) -> usize {
        match self {
            HashAlgorithm::Sha256 | HashAlgorithm::Sha3_256 => 32,
            HashAlgorithm::Sha384 => 48,
            HashAlgorithm::Sha512 => 64,
        }
    }

    /// Contents of the DER object identifier for this algorithm.
    pub fn oid(&self) -> &'static [u8] {
        match self {
            HashAlgorithm::Sha256 => OID_SHA256,
            HashAlgorithm::Sha384 => OID_SHA384,
            HashAlgorithm::Sha512 => OID_SHA512,
            HashAlgorithm::Sha3_256 => OID_SHA3_256,
        }
    }

    pub fn from_oid(oid: &[u8]) -> Option<Self> {
        Self::ALL.into_iter().find(|alg| alg.oid() == oid)
    }

    pub fn name(&self) -> &'static str {
        match self {
            HashAlgorithm::Sha256 => "SHA-256",
            HashAlgorithm::Sha384 => "SHA-384",
            HashAlgorithm::Sha512 => "SHA-512",
            HashAlgorithm::Sha3_256 => "SHA3-256",
        }
    }

    /// All-zero digest, the seed of the very first archive chain.
    pub fn zero_digest(&self) -> Vec<u8> {
        vec![0u8; self.output_len()]
    }

    fn link(&self, previous: &[u8], leaf: &[u8]) -> Vec<u8> {
        self.digest_parts(&[&[LINK_TAG], previous, leaf])
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for HashAlgorithm {
    type Err = LogError;

    fn from_str(s: &str) -> Result<Self> {
        let normalized: String = s
            .chars()
            .filter(|c| *c != '-' && *c != '_')
            .collect::<String>()
            .to_ascii_lowercase();
        match normalized.as_str() {
            "sha256" => Ok(HashAlgorithm::Sha256),
            "sha384" => Ok(HashAlgorithm::Sha384),
            "sha512" => Ok(HashAlgorithm::Sha512),
            "sha3256" => Ok(HashAlgorithm::Sha3_256),
            _ => Err(LogError::Serialization(format!(
                "unsupported hash algorithm: {s}"
            ))),
        }
    }
}

/// Membership proof of one input in a hash chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashChainProof {
    pub algorithm: HashAlgorithm,
    /// Position of the input in the chain.
    pub index: usize,
    /// Chain state before this input, or the seed for the first input of a seeded chain.
    pub prefix: Option<Vec<u8>>,
    pub leaf: Vec<u8>,
    /// Inputs following this one, in chain order.
    pub suffix: Vec<Vec<u8>>,
}

impl HashChainProof {
    /// Recompute the chain result this proof leads to.
    pub fn compute_result(&self) -> Result<Vec<u8>> {
        let len = self.algorithm.output_len();
        let all_hashes = self
            .prefix
            .iter()
            .chain(std::iter::once(&self.leaf))
            .chain(self.suffix.iter());
        for hash in all_hashes {
            if hash.len() != len {
                return Err(LogError::HashChainInvalid(format!(
                    "proof contains a {}-byte hash, expected {len} for {}",
                    hash.len(),
                    self.algorithm
                )));
            }
        }

        let mut state = match &self.prefix {
            Some(prefix) => self.algorithm.link(prefix, &self.leaf),
            None => self.leaf.clone(),
        };
        for leaf in &self.suffix {
            state = self.algorithm.link(&state, leaf);
        }
        Ok(state)
    }
}

/// A finished chain: the result plus one proof per input.
#[derive(Debug, Clone)]
pub struct HashChain {
    pub algorithm: HashAlgorithm,
    pub result: Vec<u8>,
    pub proofs: Vec<HashChainProof>,
}

/// Accumulates input hashes in call order.
#[derive(Debug, Clone)]
pub struct HashChainBuilder {
    algorithm: HashAlgorithm,
    seed: Option<Vec<u8>>,
    leaves: Vec<Vec<u8>>,
}

impl HashChainBuilder {
    pub fn new(algorithm: HashAlgorithm) -> Self {
        Self {
            algorithm,
            seed: None,
            leaves: Vec::new(),
        }
    }

    /// Start a chain that continues from `seed`, typically the tip of a previous chain.
    pub fn with_seed(algorithm: HashAlgorithm, seed: Vec<u8>) -> Result<Self> {
        check_len(algorithm, &seed, "seed")?;
        Ok(Self {
            algorithm,
            seed: Some(seed),
            leaves: Vec::new(),
        })
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    /// Append an input hash, returning its index in the chain.
    pub fn add_input_hash(&mut self, hash: impl Into<Vec<u8>>) -> Result<usize> {
        let hash = hash.into();
        check_len(self.algorithm, &hash, "input hash")?;
        self.leaves.push(hash);
        Ok(self.leaves.len() - 1)
    }

    /// Hash `data` with the chain algorithm and append it.
    pub fn add_input(&mut self, data: &[u8]) -> usize {
        self.leaves.push(self.algorithm.digest(data));
        self.leaves.len() - 1
    }

    pub fn len(&self) -> usize {
        self.leaves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.leaves.is_empty()
    }

    /// Compute the chain result and a proof for every input.
    pub fn finish_building(self) -> Result<HashChain> {
        if self.leaves.is_empty() {
            return Err(LogError::HashChainInvalid(
                "cannot build a hash chain without inputs".to_string(),
            ));
        }

        let mut states: Vec<Vec<u8>> = Vec::with_capacity(self.leaves.len());
        for (i, leaf) in self.leaves.iter().enumerate() {
            let state = match (i, &self.seed) {
                (0, Some(seed)) => self.algorithm.link(seed, leaf),
                (0, None) => leaf.clone(),
                _ => self.algorithm.link(&states[i - 1], leaf),
            };
            states.push(state);
        }

        let proofs = (0..self.leaves.len())
            .map(|i| HashChainProof {
                algorithm: self.algorithm,
                index: i,
                prefix: if i == 0 {
                    self.seed.clone()
                } else {
                    Some(states[i - 1].clone())
                },
                leaf: self.leaves[i].clone(),
                suffix: self.leaves[i + 1..].to_vec(),
            })
            .collect();

        let result = states.pop().unwrap_or_default();
        Ok(HashChain {
            algorithm: self.algorithm,
            result,
            proofs,
        })
    }
}

fn check_len(algorithm: HashAlgorithm, hash: &[u8], what: &str) -> Result<()> {
    if hash.len() != algorithm.output_len() {
        return Err(LogError::HashChainInvalid(format!(
            "{what} is {} bytes, {algorithm} needs {}",
            hash.len(),
            algorithm.output_len()
        )));
    }
    Ok(())
}

/// Stateless verification of chain proofs.
pub struct HashChainVerifier;

impl HashChainVerifier {
    /// Check that `proof` reproduces `expected_result`.
    pub fn verify(proof: &HashChainProof, expected_result: &[u8]) -> Result<()> {
        let computed = proof.compute_result()?;
        if computed != expected_result {
            return Err(LogError::HashChainInvalid(format!(
                "proof for input {} yields {}, expected {}",
                proof.index,
                hex::encode(&computed),
                hex::encode(expected_result)
            )));
        }
        Ok(())
    }

    /// Check that `proof` covers `input_hash` and reproduces `expected_result`.
    pub fn verify_input(
        proof: &HashChainProof,
        input_hash: &[u8],
        expected_result: &[u8],
    ) -> Result<()> {
        if proof.leaf != input_hash {
            return Err(LogError::HashChainInvalid(format!(
                "input {} hash {} does not match proof leaf {}",
                proof.index,
                hex::encode(input_hash),
                hex::encode(&proof.leaf)
            )));
        }
        Self::verify(proof, expected_result)
    }

    /// Recompute the result of a whole chain from its seed and inputs.
    pub fn replay(
        algorithm: HashAlgorithm,
        seed: Option<&[u8]>,
        leaves: &[Vec<u8>],
    ) -> Result<Vec<u8>> {
        let (first, rest) = leaves.split_first().ok_or_else(|| {
            LogError::HashChainInvalid("cannot replay an empty chain".to_string())
        })?;
        for hash in seed.into_iter().chain(leaves.iter().map(Vec::as_slice)) {
            check_len(algorithm, hash, "chain hash")?;
        }

        let mut state = match seed {
            Some(seed) => algorithm.link(seed, first),
            None => first.clone(),
        };
        for leaf in rest {
            state = algorithm.link(&state, leaf);
        }
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaves(alg: HashAlgorithm, n: usize) -> Vec<Vec<u8>> {
        (0..n).map(|i| alg.digest(format!("record-{i}").as_bytes())).collect()
    }

    #[test]
    fn test_single_input_chain_is_the_input() {
        let alg = HashAlgorithm::Sha256;
        let leaf = alg.digest(b"only");
        let mut builder = HashChainBuilder::new(alg);
        builder.add_input_hash(leaf.clone()).unwrap();

        let chain = builder.finish_building().unwrap();
        assert_eq!(chain.result, leaf);
        assert_eq!(chain.proofs.len(), 1);
        assert!(chain.proofs[0].prefix.is_none());
        assert!(chain.proofs[0].suffix.is_empty());
        HashChainVerifier::verify(&chain.proofs[0], &chain.result).unwrap();
    }

    #[test]
    fn test_every_proof_reproduces_result() {
        for alg in HashAlgorithm::ALL {
            let mut builder = HashChainBuilder::new(alg);
            for leaf in leaves(alg, 7) {
                builder.add_input_hash(leaf).unwrap();
            }
            let chain = builder.finish_building().unwrap();
            assert_eq!(chain.result.len(), alg.output_len());
            for proof in &chain.proofs {
                HashChainVerifier::verify(proof, &chain.result).unwrap();
            }
        }
    }

    #[test]
    fn test_seeded_chain_matches_replay() {
        let alg = HashAlgorithm::Sha256;
        let seed = alg.digest(b"previous tip");
        let inputs = leaves(alg, 4);

        let mut builder = HashChainBuilder::with_seed(alg, seed.clone()).unwrap();
        for leaf in &inputs {
            builder.add_input_hash(leaf.clone()).unwrap();
        }
        let chain = builder.finish_building().unwrap();

        let replayed = HashChainVerifier::replay(alg, Some(&seed), &inputs).unwrap();
        assert_eq!(replayed, chain.result);
        assert_eq!(chain.proofs[0].prefix.as_deref(), Some(seed.as_slice()));

        let unseeded = HashChainVerifier::replay(alg, None, &inputs).unwrap();
        assert_ne!(unseeded, chain.result);
    }

    #[test]
    fn test_tampered_leaf_fails() {
        let alg = HashAlgorithm::Sha256;
        let mut builder = HashChainBuilder::new(alg);
        for leaf in leaves(alg, 3) {
            builder.add_input_hash(leaf).unwrap();
        }
        let chain = builder.finish_building().unwrap();

        let mut proof = chain.proofs[1].clone();
        proof.leaf[0] ^= 0xFF;
        let err = HashChainVerifier::verify(&proof, &chain.result).unwrap_err();
        assert!(matches!(err, LogError::HashChainInvalid(_)));

        let other = alg.digest(b"something else");
        assert!(HashChainVerifier::verify_input(&chain.proofs[2], &other, &chain.result).is_err());
    }

    #[test]
    fn test_wrong_length_and_empty_rejected() {
        let mut builder = HashChainBuilder::new(HashAlgorithm::Sha512);
        assert!(matches!(
            builder.add_input_hash(vec![0u8; 32]),
            Err(LogError::HashChainInvalid(_))
        ));
        assert!(matches!(
            builder.finish_building(),
            Err(LogError::HashChainInvalid(_))
        ));
        assert!(HashChainBuilder::with_seed(HashAlgorithm::Sha256, vec![1, 2, 3]).is_err());
    }

    #[test]
    fn test_algorithm_parsing_and_oids() {
        assert_eq!("sha-256".parse::<HashAlgorithm>().unwrap(), HashAlgorithm::Sha256);
        assert_eq!("SHA512".parse::<HashAlgorithm>().unwrap(), HashAlgorithm::Sha512);
        assert_eq!("sha3_256".parse::<HashAlgorithm>().unwrap(), HashAlgorithm::Sha3_256);
        assert!("md5".parse::<HashAlgorithm>().is_err());

        for alg in HashAlgorithm::ALL {
            assert_eq!(HashAlgorithm::from_oid(alg.oid()), Some(alg));
        }
    }

    #[test]
    fn test_proof_cbor_and_json_encoding() {
        let alg = HashAlgorithm::Sha256;
        let mut builder = HashChainBuilder::with_seed(alg, alg.zero_digest()).unwrap();
        for leaf in leaves(alg, 2) {
            builder.add_input_hash(leaf).unwrap();
        }
        let proof = builder.finish_building().unwrap().proofs.remove(0);

        let mut cbor = Vec::new();
        ciborium::into_writer(&proof, &mut cbor).unwrap();
        let decoded: HashChainProof = ciborium::from_reader(cbor.as_slice()).unwrap();
        assert_eq!(decoded, proof);

        let json = serde_json::to_value(&proof).unwrap();
        assert_eq!(json["algorithm"], "SHA-256");
        assert_eq!(json["index"], 0);
    }
}
