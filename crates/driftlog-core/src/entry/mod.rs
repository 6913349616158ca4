//! Log entries: immutable, content-addressed DAG nodes.
//!
//! An [`Entry`] is a payload plus [`Meta`] (clock, graph id, parent hashes,
//! type, optional opaque data) and one or more signatures. Its canonical
//! bytes are the postcard encoding of a fixed wire struct; the content
//! address is computed over exactly those bytes, so an entry read back from
//! any block store can be checked against the hash it was requested by.
//!
//! # Graph ids
//!
//! Every entry belongs to a logical branch identified by its `gid`. A seed
//! entry (no parents) gets a fresh random gid, or one derived from an
//! explicit seed. An entry with parents adopts the lexicographically smallest
//! gid among them, so the gid of a merge does not depend on who merged.

mod identity;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use rand::Rng;

use crate::blocks::Blocks;
use crate::clock::{Clock, Timestamp};
use crate::error::{Error, Result};
use crate::hash::{content_address, verify_content_address};

pub use identity::{Identity, Signature, generate_identity};

/// Payload types a log can carry.
pub trait Value: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

impl<T> Value for T where T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

/// Entry kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntryType {
    /// Ordinary entry.
    #[default]
    Append,
    /// Tombstone: its `next` hashes, and whatever is only reachable through
    /// them, are deleted.
    Cut,
}

impl EntryType {
    /// Stable integer form used by the shallow index.
    #[must_use]
    pub const fn as_i64(self) -> i64 {
        match self {
            Self::Append => 0,
            Self::Cut => 1,
        }
    }

    #[must_use]
    pub const fn from_i64(value: i64) -> Option<Self> {
        match value {
            0 => Some(Self::Append),
            1 => Some(Self::Cut),
            _ => None,
        }
    }
}

/// Entry metadata. Everything here is hashed and signed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Meta {
    pub clock: Clock,
    pub gid: String,
    /// Parent hashes, in creation order, without duplicates.
    pub next: Vec<String>,
    #[serde(rename = "type")]
    pub entry_type: EntryType,
    /// Opaque application bytes; never interpreted by the log.
    pub data: Option<Vec<u8>>,
}

impl Meta {
    #[must_use]
    pub fn is_cut(&self) -> bool {
        self.entry_type == EntryType::Cut
    }
}

/// Decoded payload value with its encoded bytes.
#[derive(Debug, Clone)]
pub struct Payload<T> {
    value: T,
    bytes: Vec<u8>,
}

impl<T: Serialize> Payload<T> {
    /// Encode `value` with postcard.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Serialization`] if `value` cannot be encoded.
    pub fn encode(value: T) -> Result<Self> {
        let bytes = postcard::to_stdvec(&value)?;
        Ok(Self { value, bytes })
    }
}

impl<T: DeserializeOwned> Payload<T> {
    /// Decode a payload from its encoded bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Serialization`] if the bytes are not a valid `T`.
    pub fn decode(bytes: Vec<u8>) -> Result<Self> {
        let value = postcard::from_bytes(&bytes)?;
        Ok(Self { value, bytes })
    }
}

impl<T> Payload<T> {
    #[must_use]
    pub const fn value(&self) -> &T {
        &self.value
    }

    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Encoded size in bytes, used for byte-budget accounting.
    #[must_use]
    pub fn byte_length(&self) -> u64 {
        self.bytes.len() as u64
    }

    #[must_use]
    pub fn into_value(self) -> T {
        self.value
    }
}

/// A parent reference: the hash to point at plus that parent's gid.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NextRef {
    pub hash: String,
    pub gid: String,
}

impl<T> From<&Entry<T>> for NextRef {
    fn from(entry: &Entry<T>) -> Self {
        Self {
            hash: entry.hash.clone(),
            gid: entry.meta.gid.clone(),
        }
    }
}

impl From<&ShallowEntry> for NextRef {
    fn from(entry: &ShallowEntry) -> Self {
        Self {
            hash: entry.hash.clone(),
            gid: entry.meta.gid.clone(),
        }
    }
}

/// Metadata-only projection of an entry, as kept in the shallow index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ShallowEntry {
    pub hash: String,
    pub meta: Meta,
    /// No indexed non-CUT entry lists this hash in its `next`.
    pub head: bool,
    pub payload_size: u64,
}

/// Everything needed to create a new entry.
pub struct NewEntry<'a, T> {
    pub data: T,
    /// At least one signer. The first signer's public key becomes the clock id.
    pub signers: &'a [std::sync::Arc<dyn Identity>],
    pub timestamp: Timestamp,
    pub next: Vec<NextRef>,
    /// Derive the gid from this seed instead of from `next`.
    pub gid_seed: Option<Vec<u8>>,
    pub entry_type: EntryType,
    pub meta_data: Option<Vec<u8>>,
}

/// An immutable, signed, content-addressed log entry.
#[derive(Debug, Clone)]
pub struct Entry<T> {
    hash: String,
    meta: Meta,
    payload: Payload<T>,
    signatures: Vec<Signature>,
}

#[derive(Serialize)]
struct WireRef<'a> {
    meta: &'a Meta,
    payload: &'a [u8],
    signatures: &'a [Signature],
}

#[derive(Deserialize)]
struct Wire {
    meta: Meta,
    payload: Vec<u8>,
    signatures: Vec<Signature>,
}

#[derive(Serialize)]
struct Signable<'a> {
    meta: &'a Meta,
    payload: &'a [u8],
}

impl<T: Serialize> Entry<T> {
    /// Build, sign, and address a new entry without persisting it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Precondition`] when no signer is supplied, or
    /// [`Error::Serialization`] if the payload cannot be encoded.
    pub fn build(new: NewEntry<'_, T>) -> Result<Self> {
        let Some(first) = new.signers.first() else {
            return Err(Error::Precondition(
                "an entry needs at least one signer".to_owned(),
            ));
        };

        let payload = Payload::encode(new.data)?;
        let gid = resolve_gid(&new.next, new.gid_seed.as_deref());

        let mut next: Vec<String> = Vec::with_capacity(new.next.len());
        for parent in new.next {
            if !next.contains(&parent.hash) {
                next.push(parent.hash);
            }
        }

        let meta = Meta {
            clock: Clock::new(first.public_key(), new.timestamp),
            gid,
            next,
            entry_type: new.entry_type,
            data: new.meta_data,
        };

        let signable = signable_bytes(&meta, payload.bytes())?;
        let signatures = new.signers.iter().map(|s| s.sign(&signable)).collect();

        let mut entry = Self {
            hash: String::new(),
            meta,
            payload,
            signatures,
        };
        entry.hash = content_address(&entry.to_bytes()?);
        Ok(entry)
    }

    /// Write the canonical bytes to `blocks`.
    ///
    /// # Errors
    ///
    /// Block store errors, or [`Error::HashMismatch`] if the store addresses
    /// the bytes differently.
    pub async fn persist(&self, blocks: &dyn Blocks) -> Result<()>
    where
        T: Sync,
    {
        let stored = blocks.put(self.to_bytes()?).await?;
        if stored != self.hash {
            return Err(Error::HashMismatch {
                stored,
                computed: self.hash.clone(),
            });
        }
        Ok(())
    }

    /// Canonical serialized form.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Serialization`] on encoding failure.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(postcard::to_stdvec(&WireRef {
            meta: &self.meta,
            payload: self.payload.bytes(),
            signatures: &self.signatures,
        })?)
    }

    /// Recompute the content address and compare it with the embedded hash.
    ///
    /// # Errors
    ///
    /// Returns [`Error::HashMismatch`] if they differ.
    pub fn verify_hash(&self) -> Result<()> {
        verify_content_address(&self.hash, &self.to_bytes()?)
    }
}

impl<T: DeserializeOwned> Entry<T> {
    /// Decode an entry fetched under `hash`, checking the content address.
    ///
    /// # Errors
    ///
    /// Returns [`Error::HashMismatch`] if `bytes` do not hash to `hash`, or
    /// [`Error::Serialization`] if they do not decode.
    pub fn from_bytes(hash: &str, bytes: &[u8]) -> Result<Self> {
        verify_content_address(hash, bytes)?;
        Self::decode(bytes)
    }

    /// Decode an entry and address it by its bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Serialization`] if the bytes do not decode.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let wire: Wire = postcard::from_bytes(bytes)?;
        Ok(Self {
            hash: content_address(bytes),
            meta: wire.meta,
            payload: Payload::decode(wire.payload)?,
            signatures: wire.signatures,
        })
    }
}

impl<T> Entry<T> {
    #[must_use]
    pub fn hash(&self) -> &str {
        &self.hash
    }

    #[must_use]
    pub const fn meta(&self) -> &Meta {
        &self.meta
    }

    #[must_use]
    pub const fn clock(&self) -> &Clock {
        &self.meta.clock
    }

    #[must_use]
    pub fn gid(&self) -> &str {
        &self.meta.gid
    }

    #[must_use]
    pub fn next(&self) -> &[String] {
        &self.meta.next
    }

    #[must_use]
    pub fn is_cut(&self) -> bool {
        self.meta.is_cut()
    }

    #[must_use]
    pub const fn payload(&self) -> &Payload<T> {
        &self.payload
    }

    #[must_use]
    pub const fn value(&self) -> &T {
        self.payload.value()
    }

    #[must_use]
    pub fn signatures(&self) -> &[Signature] {
        &self.signatures
    }

    /// Public keys of every signer, in signing order.
    #[must_use]
    pub fn public_keys(&self) -> Vec<&[u8]> {
        self.signatures.iter().map(|s| s.public_key.as_slice()).collect()
    }

    /// Verify every embedded signature over the signable form.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidSignature`] if there are no signatures or any
    /// one of them fails to verify.
    pub fn verify_signatures(&self) -> Result<()> {
        let signable = signable_bytes(&self.meta, self.payload.bytes())?;
        let valid = !self.signatures.is_empty()
            && self.signatures.iter().all(|s| s.verify(&signable));
        if valid {
            Ok(())
        } else {
            Err(Error::InvalidSignature {
                hash: self.hash.clone(),
            })
        }
    }

    /// Metadata-only projection of this entry.
    #[must_use]
    pub fn to_shallow(&self, head: bool) -> ShallowEntry {
        ShallowEntry {
            hash: self.hash.clone(),
            meta: self.meta.clone(),
            head,
            payload_size: self.payload.byte_length(),
        }
    }
}

impl<T> PartialEq for Entry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash
    }
}

impl<T> Eq for Entry<T> {}

fn signable_bytes(meta: &Meta, payload: &[u8]) -> Result<Vec<u8>> {
    Ok(postcard::to_stdvec(&Signable { meta, payload })?)
}

/// Pick the gid for a new entry.
///
/// An explicit seed wins; otherwise the smallest parent gid; otherwise a
/// fresh random gid.
#[must_use]
pub fn resolve_gid(next: &[NextRef], seed: Option<&[u8]>) -> String {
    if let Some(seed) = seed {
        return blake3::hash(seed).to_hex().to_string();
    }
    next.iter()
        .map(|n| n.gid.as_str())
        .min()
        .map_or_else(new_gid, str::to_owned)
}

/// A fresh random gid.
#[must_use]
pub fn new_gid() -> String {
    let bytes: [u8; 32] = rand::thread_rng().r#gen();
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn signer() -> Vec<Arc<dyn Identity>> {
        vec![Arc::new(generate_identity())]
    }

    fn draft<'a>(
        signers: &'a [Arc<dyn Identity>],
        data: &str,
        next: Vec<NextRef>,
    ) -> NewEntry<'a, String> {
        NewEntry {
            data: data.to_owned(),
            signers,
            timestamp: Timestamp::new(1_000, 0),
            next,
            gid_seed: None,
            entry_type: EntryType::Append,
            meta_data: None,
        }
    }

    fn parent(hash: &str, gid: &str) -> NextRef {
        NextRef {
            hash: hash.to_owned(),
            gid: gid.to_owned(),
        }
    }

    #[tokio::test]
    async fn persist_stores_bytes_under_the_entry_hash() {
        let signers = signer();
        let entry = Entry::build(draft(&signers, "kept", vec![])).expect("build");
        let blocks = crate::blocks::MemoryBlocks::new();
        entry.persist(&blocks).await.expect("persist");

        let bytes = blocks
            .get(entry.hash(), crate::blocks::GetOptions::local())
            .await
            .expect("get")
            .expect("stored");
        assert_eq!(Entry::<String>::from_bytes(entry.hash(), &bytes).expect("decode"), entry);
    }

    #[test]
    fn build_assigns_verifiable_hash_and_signature() {
        let signers = signer();
        let entry = Entry::build(draft(&signers, "hello", vec![])).expect("build");
        assert!(entry.hash().starts_with("blake3:"));
        entry.verify_hash().expect("hash");
        entry.verify_signatures().expect("signature");
        assert_eq!(entry.clock().id, signers[0].public_key());
        assert_eq!(entry.value(), "hello");
    }

    #[test]
    fn decode_roundtrip_preserves_identity() {
        let signers = signer();
        let entry = Entry::build(draft(&signers, "x", vec![])).expect("build");
        let bytes = entry.to_bytes().expect("encode");
        let back: Entry<String> = Entry::from_bytes(entry.hash(), &bytes).expect("decode");
        assert_eq!(back, entry);
        assert_eq!(back.meta(), entry.meta());
        assert_eq!(back.payload().byte_length(), entry.payload().byte_length());
    }

    #[test]
    fn from_bytes_rejects_foreign_hash() {
        let signers = signer();
        let a = Entry::build(draft(&signers, "a", vec![])).expect("build");
        let b = Entry::build(draft(&signers, "b", vec![])).expect("build");
        let err = Entry::<String>::from_bytes(a.hash(), &b.to_bytes().expect("encode"))
            .expect_err("mismatch");
        assert!(matches!(err, Error::HashMismatch { .. }));
    }

    #[test]
    fn tampered_payload_fails_signature_check() {
        let signers = signer();
        let mut entry = Entry::build(draft(&signers, "a", vec![])).expect("build");
        entry.payload = Payload::encode("b".to_owned()).expect("encode");
        assert!(matches!(
            entry.verify_signatures(),
            Err(Error::InvalidSignature { .. })
        ));
    }

    #[test]
    fn merge_adopts_smallest_parent_gid() {
        let signers = signer();
        let entry = Entry::build(draft(
            &signers,
            "m",
            vec![parent("blake3:01", "b"), parent("blake3:02", "a")],
        ))
        .expect("build");
        assert_eq!(entry.gid(), "a");
        assert_eq!(entry.next(), ["blake3:01", "blake3:02"]);
    }

    #[test]
    fn duplicate_parents_collapse() {
        let signers = signer();
        let entry = Entry::build(draft(
            &signers,
            "m",
            vec![parent("blake3:01", "a"), parent("blake3:01", "a")],
        ))
        .expect("build");
        assert_eq!(entry.next().len(), 1);
    }

    #[test]
    fn seed_gid_is_deterministic() {
        assert_eq!(resolve_gid(&[], Some(b"seed")), resolve_gid(&[], Some(b"seed")));
        assert_ne!(resolve_gid(&[], None), resolve_gid(&[], None));
        assert_eq!(new_gid().len(), 64);
    }

    #[test]
    fn build_without_signer_is_a_precondition_error() {
        let err = Entry::build(draft(&[], "x", vec![])).expect_err("no signer");
        assert!(matches!(err, Error::Precondition(_)));
    }

    #[test]
    fn entry_type_integer_form_roundtrips() {
        for kind in [EntryType::Append, EntryType::Cut] {
            assert_eq!(EntryType::from_i64(kind.as_i64()), Some(kind));
        }
        assert_eq!(EntryType::from_i64(7), None);
    }
}
