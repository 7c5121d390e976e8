//! Signed checkpoint notes
//!
//! The sequencer treats checkpoints as opaque bytes; the only structure it
//! relies on is behind [`CheckpointCodec`]. The concrete codec here signs a
//! note-style text body with Ed25519:
//!
//! ```text
//! <origin>
//! <size>
//! <base64(root)>
//!
//! — <origin> <base64(key_id || signature)>
//! ```
//!
//! The root is carried as arbitrary bytes: the very first checkpoint of a
//! log commits to the literal placeholder `"Empty"` rather than a 32-byte
//! hash.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};
use sha2::{Digest, Sha256};

use crate::error::{LogError, LogResult};

/// Length of the key id prefixed to the signature
const KEY_ID_LEN: usize = 4;

/// Signature-line marker, as in the note text format
const SIG_PREFIX: &str = "\u{2014} ";

/// Parses and produces signed checkpoints.
///
/// The two methods are the only seam between the write path and the
/// checkpoint format; everything else treats notes as opaque bytes.
pub trait CheckpointCodec: Send + Sync {
    /// Verify `raw` and return the tree size it commits to
    fn parse(&self, raw: &[u8]) -> LogResult<u64>;

    /// Produce signed checkpoint bytes for the given size and root
    fn create(&self, size: u64, root: &[u8]) -> LogResult<Vec<u8>>;
}

/// Ed25519-backed [`CheckpointCodec`]
pub struct NoteSigner {
    origin: String,
    signing_key: SigningKey,
    verifying_key: VerifyingKey,
    key_id: [u8; KEY_ID_LEN],
}

impl NoteSigner {
    /// Build a signer from a 32-byte Ed25519 seed
    pub fn new(origin: impl Into<String>, seed: &[u8; 32]) -> Self {
        let signing_key = SigningKey::from_bytes(seed);
        let verifying_key = signing_key.verifying_key();
        let digest = Sha256::digest(verifying_key.as_bytes());
        let mut key_id = [0u8; KEY_ID_LEN];
        key_id.copy_from_slice(&digest[..KEY_ID_LEN]);
        Self {
            origin: origin.into(),
            signing_key,
            verifying_key,
            key_id,
        }
    }

    /// Read a 32-byte seed from a file
    pub fn from_file(origin: impl Into<String>, path: &str) -> LogResult<Self> {
        let bytes = std::fs::read(path)
            .map_err(|e| LogError::Checkpoint(format!("read signing key {}: {}", path, e)))?;
        let seed: [u8; 32] = bytes.as_slice().try_into().map_err(|_| {
            LogError::Checkpoint(format!("signing key must be 32 bytes, got {}", bytes.len()))
        })?;
        Ok(Self::new(origin, &seed))
    }

    /// Log origin name carried in the note body
    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// Verify a note and return both size and the raw root bytes.
    ///
    /// The trait exposes only the size; readers that need the committed
    /// root (tests, monitors) go through this.
    pub fn parse_full(&self, raw: &[u8]) -> LogResult<(u64, Vec<u8>)> {
        let text = std::str::from_utf8(raw)
            .map_err(|_| LogError::Checkpoint("note is not UTF-8".into()))?;

        let (body, trailer) = text
            .split_once("\n\n")
            .ok_or_else(|| LogError::Checkpoint("note has no signature section".into()))?;

        let mut lines = body.lines();
        let origin = lines
            .next()
            .ok_or_else(|| LogError::Checkpoint("note body is empty".into()))?;
        if origin != self.origin {
            return Err(LogError::Checkpoint(format!(
                "origin mismatch: got {:?}, want {:?}",
                origin, self.origin
            )));
        }
        let size: u64 = lines
            .next()
            .ok_or_else(|| LogError::Checkpoint("note has no size line".into()))?
            .parse()
            .map_err(|e| LogError::Checkpoint(format!("bad size line: {}", e)))?;
        let root = BASE64
            .decode(
                lines
                    .next()
                    .ok_or_else(|| LogError::Checkpoint("note has no root line".into()))?,
            )
            .map_err(|e| LogError::Checkpoint(format!("bad root line: {}", e)))?;
        if lines.next().is_some() {
            return Err(LogError::Checkpoint("trailing data in note body".into()));
        }

        self.verify_trailer(body, trailer)?;
        Ok((size, root))
    }

    fn verify_trailer(&self, body: &str, trailer: &str) -> LogResult<()> {
        let line = trailer
            .lines()
            .next()
            .ok_or_else(|| LogError::Checkpoint("note has no signature line".into()))?;
        let rest = line
            .strip_prefix(SIG_PREFIX)
            .ok_or_else(|| LogError::Checkpoint("malformed signature line".into()))?;
        let (name, sig_b64) = rest
            .split_once(' ')
            .ok_or_else(|| LogError::Checkpoint("malformed signature line".into()))?;
        if name != self.origin {
            return Err(LogError::Checkpoint("signature is for another origin".into()));
        }
        let sig_bytes = BASE64
            .decode(sig_b64)
            .map_err(|e| LogError::Checkpoint(format!("bad signature encoding: {}", e)))?;
        if sig_bytes.len() != KEY_ID_LEN + ed25519_dalek::SIGNATURE_LENGTH {
            return Err(LogError::Checkpoint(format!(
                "signature blob has {} bytes",
                sig_bytes.len()
            )));
        }
        if sig_bytes[..KEY_ID_LEN] != self.key_id {
            return Err(LogError::Checkpoint("unknown signing key".into()));
        }
        let sig = ed25519_dalek::Signature::from_slice(&sig_bytes[KEY_ID_LEN..])
            .map_err(|e| LogError::Checkpoint(format!("bad signature: {}", e)))?;
        let mut signed = body.as_bytes().to_vec();
        signed.push(b'\n');
        self.verifying_key
            .verify(&signed, &sig)
            .map_err(|_| LogError::Checkpoint("signature verification failed".into()))
    }
}

impl CheckpointCodec for NoteSigner {
    fn parse(&self, raw: &[u8]) -> LogResult<u64> {
        self.parse_full(raw).map(|(size, _)| size)
    }

    fn create(&self, size: u64, root: &[u8]) -> LogResult<Vec<u8>> {
        let body = format!("{}\n{}\n{}", self.origin, size, BASE64.encode(root));
        let mut signed = body.clone().into_bytes();
        signed.push(b'\n');
        let sig = self.signing_key.sign(&signed);
        let mut blob = self.key_id.to_vec();
        blob.extend_from_slice(&sig.to_bytes());
        let note = format!(
            "{}\n\n{}{} {}\n",
            body,
            SIG_PREFIX,
            self.origin,
            BASE64.encode(blob)
        );
        Ok(note.into_bytes())
    }
}
