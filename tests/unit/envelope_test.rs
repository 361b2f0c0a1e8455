//! Tests for the payload envelope

use prometheus_background::core::{
    BatchStage, HmacSigner, JobDescriptor, PayloadCodec, PayloadError, TaskDescriptor, TaskState,
    WorkUnit,
};
use serde_json::json;

#[test]
fn test_descriptor_carries_typed_args() {
    #[derive(serde::Serialize)]
    struct Resize {
        width: u32,
    }
    let job = JobDescriptor::new("resize", Resize { width: 640 }).unwrap();
    assert_eq!(job.args, json!({"width": 640}));
    assert_eq!(JobDescriptor::named("ping").args, serde_json::Value::Null);
}

#[test]
fn test_work_unit_wire_shape() {
    let unit = WorkUnit::Scheduled(JobDescriptor::named("digest"));
    let value = serde_json::to_value(&unit).unwrap();
    assert_eq!(value["kind"], "scheduled");
    assert_eq!(value["body"]["job"], "digest");
}

#[test]
fn test_signed_task_descriptor_survives_codec() {
    let codec = PayloadCodec::signed("k").unwrap();
    let descriptor = TaskDescriptor {
        key: "task_1".into(),
        unit: WorkUnit::Task(JobDescriptor::named("ping")),
        timeout_secs: 30,
        state: TaskState::Pending,
        created_at: chrono::Utc::now(),
    };
    let raw = codec.encode(&descriptor).unwrap();
    let back: TaskDescriptor = codec.decode(&raw).unwrap();
    assert_eq!(back, descriptor);
    assert_eq!(back.claimed().state, TaskState::Claimed);
}

#[test]
fn test_stage_without_finish_decodes() {
    let raw = PayloadCodec::unsigned()
        .encode(&json!({"items": [1, 2], "worker": {"job": "w"}}))
        .unwrap();
    let stage: BatchStage = PayloadCodec::unsigned().decode(&raw).unwrap();
    assert_eq!(stage.items.len(), 2);
    assert!(stage.finish.is_none());
}

#[test]
fn test_signer_verifies_its_own_signatures() {
    let signer = HmacSigner::new("key").unwrap();
    let sig = signer.sign("payload").unwrap();
    assert!(signer.verify("payload", &sig));
    assert!(!signer.verify("payload!", &sig));
    assert!(!signer.verify("payload", "not base64 !!"));
    assert!(matches!(HmacSigner::new(""), Err(PayloadError::MissingSecretKey)));
}
