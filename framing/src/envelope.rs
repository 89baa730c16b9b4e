//! The structured JSON envelopes riding inside frames.
//!
//! Every kind is a closed, explicitly tagged set: a command names its
//! method, an event names its discriminant, and anything outside the
//! enumerated variants fails decoding instead of being shape-guessed.

use serde::{Deserialize, Serialize};

use crate::error::ErrBody;

/// One named, host-owned input stream (or artifact key) as seen from the
/// child. Carries no payload, elements are fetched lazily by id.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetParam {
    pub name: String,
    pub dataset_id: String,
    pub element_count: u64,
    pub total_byte_size: u64,
}

/// The command envelope: a method-tagged call plus an optional
/// correlation id. A missing id means fire-and-forget, no reply is owed.
#[derive(Debug, Serialize, Deserialize)]
pub struct CommandEnvelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    #[serde(flatten)]
    pub call: Call,
}

/// The dispatchable operation set.
#[derive(Debug, Serialize, Deserialize)]
#[serde(
    tag = "method",
    content = "params",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum Call {
    Initialize {
        path: String,
    },
    CreateState {
        id: String,
        #[serde(default)]
        params: Vec<DatasetParam>,
        #[serde(default)]
        other_artifacts: Vec<DatasetParam>,
    },
    Instantiate {
        id: String,
        instantiated_id: String,
        #[serde(default)]
        artifact: Vec<DatasetParam>,
        #[serde(default)]
        other_artifacts: Vec<DatasetParam>,
    },
    Dispose {
        instantiated_id: String,
    },
    Train {
        training_session_id: String,
        instantiated_id: String,
        #[serde(default)]
        params: Vec<DatasetParam>,
    },
    CancelTrain {
        training_session_id: String,
    },
    Evaluate {
        instantiated_id: String,
        #[serde(default)]
        params: Vec<DatasetParam>,
    },
    GetState {
        id: String,
        instantiated_id: String,
    },
}

/// Per-output metadata of an `evaluate` reply. The segment byte sizes let
/// the host re-split the concatenated trailing payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvalOutputMeta {
    pub name: String,
    pub byte_sizes: Vec<u64>,
}

/// The reply envelope, correlated to its command by id.
#[derive(Debug, Serialize, Deserialize)]
pub struct Reply {
    pub id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrBody>,
}

/// The outbound event set. Binary payloads (metric values, artifact
/// values, evaluation outputs) never ride in the JSON body, they follow
/// as raw segments of the enclosing message frame.
#[derive(Debug, Serialize, Deserialize)]
#[serde(
    tag = "event",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum Event {
    ModuleInitialized {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    TrainingProgress {
        session_id: String,
        value: f64,
    },
    TrainingMetrics {
        session_id: String,
        names: Vec<String>,
    },
    ProvideStateData {
        command_id: u64,
        keys: Vec<String>,
    },
    RequestData {
        request_id: u32,
        dataset_id: String,
        start_index: u64,
        amount: u64,
    },
    Shuffle {
        dataset_ids: Vec<String>,
    },
}

/// The first segment of any child message frame, as the host sees it.
#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Message {
    Event(Event),
    Reply(Reply),
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn commands_decode_by_method_tag() {
        let envelope: CommandEnvelope = serde_json::from_str(
            r#"{
                "method": "train",
                "id": 3,
                "params": {
                    "trainingSessionId": "s1",
                    "instantiatedId": "m1",
                    "params": [{
                        "name": "features",
                        "datasetId": "d1",
                        "elementCount": 10,
                        "totalByteSize": 400
                    }]
                }
            }"#,
        )
        .unwrap();

        assert_eq!(envelope.id, Some(3));
        match envelope.call {
            Call::Train {
                training_session_id,
                instantiated_id,
                params,
            } => {
                assert_eq!(training_session_id, "s1");
                assert_eq!(instantiated_id, "m1");
                assert_eq!(params.len(), 1);
                assert_eq!(params[0].dataset_id, "d1");
                assert_eq!(params[0].element_count, 10);
            }
            other => panic!("expected train, got {other:?}"),
        }
    }

    #[test]
    fn missing_id_means_fire_and_forget() {
        let envelope: CommandEnvelope = serde_json::from_str(
            r#"{"method":"cancel-train","params":{"trainingSessionId":"s1"}}"#,
        )
        .unwrap();
        assert!(envelope.id.is_none());
    }

    #[test]
    fn unknown_methods_are_a_protocol_error() {
        let err = serde_json::from_str::<CommandEnvelope>(
            r#"{"method":"discover-methods","id":1,"params":{}}"#,
        );
        assert!(err.is_err());
    }

    #[test]
    fn events_carry_their_discriminant() {
        let event = Event::RequestData {
            request_id: 12,
            dataset_id: "d1".to_string(),
            start_index: 5,
            amount: 2,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert_eq!(
            json,
            r#"{"event":"request-data","requestId":12,"datasetId":"d1","startIndex":5,"amount":2}"#
        );
    }

    #[test]
    fn replies_and_events_split_on_shape() {
        let reply: Message =
            serde_json::from_str(r#"{"id":4,"error":{"code":"exception","details":"boom"}}"#)
                .unwrap();
        assert!(matches!(reply, Message::Reply(_)));

        let event: Message =
            serde_json::from_str(r#"{"event":"shuffle","datasetIds":["a","b"]}"#).unwrap();
        assert!(matches!(event, Message::Event(Event::Shuffle { dataset_ids }) if dataset_ids == ["a", "b"]));
    }
}
