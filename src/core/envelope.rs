//! Payload envelope: stored work units and the codec that (de)serializes them.
//!
//! Work units are explicit job descriptors (a registered job name plus JSON
//! arguments) rather than captured closures. The codec wraps the JSON body in
//! an envelope that is optionally signed with HMAC-SHA256 so a process only
//! executes payloads written by a holder of the same key.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::Sha256;

use crate::core::PayloadError;

type HmacSha256 = Hmac<Sha256>;

/// A named job plus its serialized arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDescriptor {
    /// Name the job was registered under.
    pub job: String,
    /// Job arguments, decoded by the job itself.
    #[serde(default)]
    pub args: Value,
}

impl JobDescriptor {
    /// Build a descriptor from any serializable argument value.
    ///
    /// # Errors
    ///
    /// Returns `PayloadError::Serialize` if `args` cannot be turned into JSON.
    pub fn new(job: impl Into<String>, args: impl Serialize) -> Result<Self, PayloadError> {
        let args = serde_json::to_value(args).map_err(|e| PayloadError::Serialize(e.to_string()))?;
        Ok(Self {
            job: job.into(),
            args,
        })
    }

    /// Descriptor for a job that takes no arguments.
    pub fn named(job: impl Into<String>) -> Self {
        Self {
            job: job.into(),
            args: Value::Null,
        }
    }
}

/// One contiguous chunk of a batch stage, processed sequentially.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkWork {
    /// Worker invoked once per item.
    pub worker: JobDescriptor,
    /// Items of this chunk, in submission order.
    pub items: Vec<Value>,
    /// Position of the first item within the whole stage.
    pub base_index: usize,
}

/// The unit of deferred execution stored behind a task key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "body", rename_all = "snake_case")]
pub enum WorkUnit {
    /// Plain fire-and-forget job.
    Task(JobDescriptor),
    /// Scheduled job, run with its lifecycle hooks.
    Scheduled(JobDescriptor),
    /// Worker pool chunk.
    Chunk(ChunkWork),
}

impl WorkUnit {
    /// Name of the job this unit ultimately invokes.
    #[must_use]
    pub fn job_name(&self) -> &str {
        match self {
            Self::Task(job) | Self::Scheduled(job) => &job.job,
            Self::Chunk(chunk) => &chunk.worker.job,
        }
    }
}

/// Claim state of a stored task descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Written by the dispatcher, not yet picked up.
    Pending,
    /// An executing side owns it.
    Claimed,
}

/// One dispatched unit of work awaiting or undergoing execution.
///
/// The key doubles as the store key and the completion token observed by
/// [`crate::core::TaskDispatcher::wait`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDescriptor {
    /// Globally unique key.
    pub key: String,
    /// The work to run.
    pub unit: WorkUnit,
    /// Run budget and store TTL, in seconds.
    pub timeout_secs: u64,
    /// Claim state.
    pub state: TaskState,
    /// When the dispatcher created the descriptor.
    pub created_at: DateTime<Utc>,
}

impl TaskDescriptor {
    /// Copy of this descriptor in the claimed state.
    #[must_use]
    pub fn claimed(&self) -> Self {
        Self {
            state: TaskState::Claimed,
            ..self.clone()
        }
    }
}

/// One fan-out/fan-in round queued for the worker pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchStage {
    /// Items, possibly empty.
    pub items: Vec<Value>,
    /// Worker invoked once per item.
    pub worker: JobDescriptor,
    /// Invoked once after every chunk has joined.
    #[serde(default)]
    pub finish: Option<JobDescriptor>,
}

/// HMAC-SHA256 signer for payload envelopes.
#[derive(Clone)]
pub struct HmacSigner {
    key: Arc<Vec<u8>>,
}

impl std::fmt::Debug for HmacSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HmacSigner").finish_non_exhaustive()
    }
}

impl HmacSigner {
    /// Create a signer from a secret key.
    ///
    /// # Errors
    ///
    /// Returns `PayloadError::MissingSecretKey` for an empty key.
    pub fn new(key: impl AsRef<[u8]>) -> Result<Self, PayloadError> {
        let key = key.as_ref();
        if key.is_empty() {
            return Err(PayloadError::MissingSecretKey);
        }
        Ok(Self {
            key: Arc::new(key.to_vec()),
        })
    }

    fn mac(&self) -> Result<HmacSha256, PayloadError> {
        HmacSha256::new_from_slice(&self.key).map_err(|_| PayloadError::MissingSecretKey)
    }

    /// Base64 signature of `payload`.
    ///
    /// # Errors
    ///
    /// Fails only if the key is rejected by the MAC.
    pub fn sign(&self, payload: &str) -> Result<String, PayloadError> {
        let mut mac = self.mac()?;
        mac.update(payload.as_bytes());
        Ok(STANDARD.encode(mac.finalize().into_bytes()))
    }

    /// Constant-time check of a base64 signature.
    #[must_use]
    pub fn verify(&self, payload: &str, signature: &str) -> bool {
        let Ok(expected) = STANDARD.decode(signature) else {
            return false;
        };
        let Ok(mut mac) = self.mac() else {
            return false;
        };
        mac.update(payload.as_bytes());
        mac.verify_slice(&expected).is_ok()
    }
}

#[derive(Serialize, Deserialize)]
struct Envelope {
    payload: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    hash: Option<String>,
}

/// Encodes values into store strings and back, signing when a key is set.
#[derive(Debug, Clone, Default)]
pub struct PayloadCodec {
    signer: Option<HmacSigner>,
}

impl PayloadCodec {
    /// Codec that writes unsigned envelopes and accepts unsigned input.
    #[must_use]
    pub const fn unsigned() -> Self {
        Self { signer: None }
    }

    /// Codec that signs on encode and rejects unsigned or forged input.
    ///
    /// # Errors
    ///
    /// Returns `PayloadError::MissingSecretKey` for an empty key.
    pub fn signed(key: impl AsRef<[u8]>) -> Result<Self, PayloadError> {
        Ok(Self {
            signer: Some(HmacSigner::new(key)?),
        })
    }

    /// Whether envelopes are signed.
    #[must_use]
    pub const fn is_signed(&self) -> bool {
        self.signer.is_some()
    }

    /// Serialize `value` into an envelope string.
    ///
    /// # Errors
    ///
    /// Returns `PayloadError::Serialize` when JSON encoding fails.
    pub fn encode<T: Serialize>(&self, value: &T) -> Result<String, PayloadError> {
        let payload =
            serde_json::to_string(value).map_err(|e| PayloadError::Serialize(e.to_string()))?;
        let hash = match &self.signer {
            Some(signer) => Some(signer.sign(&payload)?),
            None => None,
        };
        serde_json::to_string(&Envelope { payload, hash })
            .map_err(|e| PayloadError::Serialize(e.to_string()))
    }

    /// Verify and deserialize an envelope string.
    ///
    /// # Errors
    ///
    /// `InvalidSignature` when signing is configured and the hash is missing or
    /// wrong; `Deserialize` when the envelope or body is malformed.
    pub fn decode<T: DeserializeOwned>(&self, raw: &str) -> Result<T, PayloadError> {
        let envelope: Envelope =
            serde_json::from_str(raw).map_err(|e| PayloadError::Deserialize(e.to_string()))?;
        if let Some(signer) = &self.signer {
            let valid = envelope
                .hash
                .as_deref()
                .is_some_and(|hash| signer.verify(&envelope.payload, hash));
            if !valid {
                return Err(PayloadError::InvalidSignature);
            }
        }
        serde_json::from_str(&envelope.payload).map_err(|e| PayloadError::Deserialize(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_unit() -> WorkUnit {
        WorkUnit::Chunk(ChunkWork {
            worker: JobDescriptor::new("resize", json!({"width": 64})).unwrap(),
            items: vec![json!("a.png"), json!("b.png")],
            base_index: 4,
        })
    }

    #[test]
    fn test_unsigned_decode_restores_unit() {
        let codec = PayloadCodec::unsigned();
        let raw = codec.encode(&sample_unit()).unwrap();
        let unit: WorkUnit = codec.decode(&raw).unwrap();
        assert_eq!(unit, sample_unit());
        assert_eq!(unit.job_name(), "resize");
    }

    #[test]
    fn test_signed_rejects_tampering() {
        let codec = PayloadCodec::signed("secret").unwrap();
        let raw = codec.encode(&sample_unit()).unwrap();
        let tampered = raw.replace("a.png", "z.png");
        let result: Result<WorkUnit, _> = codec.decode(&tampered);
        assert!(matches!(result, Err(PayloadError::InvalidSignature)));
    }

    #[test]
    fn test_signed_rejects_unsigned_input() {
        let raw = PayloadCodec::unsigned().encode(&sample_unit()).unwrap();
        let signed = PayloadCodec::signed("secret").unwrap();
        let result: Result<WorkUnit, _> = signed.decode(&raw);
        assert!(matches!(result, Err(PayloadError::InvalidSignature)));
    }

    #[test]
    fn test_wrong_key_rejected() {
        let raw = PayloadCodec::signed("one").unwrap().encode(&sample_unit()).unwrap();
        let other = PayloadCodec::signed("two").unwrap();
        assert!(other.decode::<WorkUnit>(&raw).is_err());
    }

    #[test]
    fn test_empty_key_is_missing_secret() {
        assert!(matches!(
            PayloadCodec::signed(""),
            Err(PayloadError::MissingSecretKey)
        ));
    }

    #[test]
    fn test_garbage_is_deserialize_error() {
        let result: Result<WorkUnit, _> = PayloadCodec::unsigned().decode("not json");
        assert!(matches!(result, Err(PayloadError::Deserialize(_))));
    }
}
