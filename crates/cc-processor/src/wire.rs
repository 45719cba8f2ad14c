// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// VALIDATOR WIRE — protobuf envelope
//
// The host validator speaks length-delimited protobuf over a ZMQ DEALER
// socket: every frame is one Envelope carrying a message type, a
// correlation id, and the serialized payload. Requests initiated by the
// processor (state reads/writes, registration) are answered with the same
// correlation id; transaction process requests arrive with the validator's
// own ids and are answered by the run loop.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use prost::Message;

/// Envelope message types.
pub mod message_type {
    pub const REGISTER_REQUEST: i32 = 1;
    pub const REGISTER_RESPONSE: i32 = 2;
    pub const PROCESS_REQUEST: i32 = 3;
    pub const PROCESS_RESPONSE: i32 = 4;
    pub const STATE_GET_REQUEST: i32 = 5;
    pub const STATE_GET_RESPONSE: i32 = 6;
    pub const STATE_SET_REQUEST: i32 = 7;
    pub const STATE_SET_RESPONSE: i32 = 8;
    pub const STATE_DELETE_REQUEST: i32 = 9;
    pub const STATE_DELETE_RESPONSE: i32 = 10;
    pub const PREFIX_SCAN_REQUEST: i32 = 11;
    pub const PREFIX_SCAN_RESPONSE: i32 = 12;
    pub const TIP_REQUEST: i32 = 13;
    pub const TIP_RESPONSE: i32 = 14;
    pub const SIG_BY_NUM_REQUEST: i32 = 15;
    pub const SIG_BY_NUM_RESPONSE: i32 = 16;
    pub const REWARD_SIGNATURES_REQUEST: i32 = 17;
    pub const REWARD_SIGNATURES_RESPONSE: i32 = 18;
}

/// Process-response statuses.
pub mod status {
    pub const OK: i32 = 1;
    pub const INVALID_TRANSACTION: i32 = 2;
    pub const INTERNAL_ERROR: i32 = 3;
}

#[derive(Clone, PartialEq, Message)]
pub struct Envelope {
    #[prost(int32, tag = "1")]
    pub message_type: i32,
    #[prost(string, tag = "2")]
    pub correlation_id: String,
    #[prost(bytes = "vec", tag = "3")]
    pub content: Vec<u8>,
}

#[derive(Clone, PartialEq, Message)]
pub struct RegisterRequest {
    #[prost(string, tag = "1")]
    pub family: String,
    #[prost(string, repeated, tag = "2")]
    pub versions: Vec<String>,
    #[prost(string, repeated, tag = "3")]
    pub namespaces: Vec<String>,
}

#[derive(Clone, PartialEq, Message)]
pub struct RegisterResponse {
    #[prost(bool, tag = "1")]
    pub ok: bool,
}

#[derive(Clone, PartialEq, Message)]
pub struct ProcessRequest {
    /// Opaque handle scoping state calls to this transaction's context.
    #[prost(string, tag = "1")]
    pub context_id: String,
    #[prost(bytes = "vec", tag = "2")]
    pub payload: Vec<u8>,
    #[prost(string, tag = "3")]
    pub nonce: String,
    #[prost(string, tag = "4")]
    pub signer_public_key: String,
    #[prost(string, tag = "5")]
    pub family_version: String,
    #[prost(string, tag = "6")]
    pub block_signature: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct ProcessResponse {
    #[prost(int32, tag = "1")]
    pub status: i32,
    #[prost(string, tag = "2")]
    pub message: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct StateGetRequest {
    #[prost(string, tag = "1")]
    pub context_id: String,
    #[prost(string, tag = "2")]
    pub address: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct StateGetResponse {
    /// Empty means absent; the processor treats the two identically.
    #[prost(bytes = "vec", tag = "1")]
    pub value: Vec<u8>,
}

#[derive(Clone, PartialEq, Message)]
pub struct StateEntry {
    #[prost(string, tag = "1")]
    pub address: String,
    #[prost(bytes = "vec", tag = "2")]
    pub value: Vec<u8>,
}

#[derive(Clone, PartialEq, Message)]
pub struct StateSetRequest {
    #[prost(string, tag = "1")]
    pub context_id: String,
    #[prost(message, repeated, tag = "2")]
    pub entries: Vec<StateEntry>,
}

#[derive(Clone, PartialEq, Message)]
pub struct StateSetResponse {}

#[derive(Clone, PartialEq, Message)]
pub struct StateDeleteRequest {
    #[prost(string, tag = "1")]
    pub context_id: String,
    #[prost(string, tag = "2")]
    pub address: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct StateDeleteResponse {}

#[derive(Clone, PartialEq, Message)]
pub struct PrefixScanRequest {
    #[prost(string, tag = "1")]
    pub context_id: String,
    #[prost(string, tag = "2")]
    pub prefix: String,
    #[prost(string, tag = "3")]
    pub start: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct PrefixScanResponse {
    #[prost(message, repeated, tag = "1")]
    pub entries: Vec<StateEntry>,
    /// Continuation cursor; empty on the final page.
    #[prost(string, tag = "2")]
    pub next: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct TipRequest {}

#[derive(Clone, PartialEq, Message)]
pub struct TipResponse {
    #[prost(uint64, tag = "1")]
    pub tip: u64,
}

#[derive(Clone, PartialEq, Message)]
pub struct SigByNumRequest {
    #[prost(uint64, tag = "1")]
    pub height: u64,
}

#[derive(Clone, PartialEq, Message)]
pub struct SigByNumResponse {
    #[prost(string, tag = "1")]
    pub signer: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct RewardSignaturesRequest {
    #[prost(string, tag = "1")]
    pub block_signature: String,
    #[prost(uint64, tag = "2")]
    pub first: u64,
    #[prost(uint64, tag = "3")]
    pub last: u64,
}

#[derive(Clone, PartialEq, Message)]
pub struct RewardSignaturesResponse {
    #[prost(string, repeated, tag = "1")]
    pub signatures: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_round_trip() {
        let inner = ProcessRequest {
            context_id: "ctx1".to_string(),
            payload: vec![1, 2, 3],
            nonce: "guid".to_string(),
            signer_public_key: "02ab".to_string(),
            family_version: "1.7".to_string(),
            block_signature: String::new(),
        };
        let envelope = Envelope {
            message_type: message_type::PROCESS_REQUEST,
            correlation_id: "c1".to_string(),
            content: inner.encode_to_vec(),
        };
        let decoded = Envelope::decode(envelope.encode_to_vec().as_slice()).unwrap();
        assert_eq!(decoded.message_type, message_type::PROCESS_REQUEST);
        assert_eq!(
            ProcessRequest::decode(decoded.content.as_slice()).unwrap(),
            inner
        );
    }
}
