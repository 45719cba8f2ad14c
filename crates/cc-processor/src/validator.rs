// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// VALIDATOR CONNECTION
//
// Client side of the host validator's transaction-processor endpoint: one
// DEALER socket carrying Envelope frames both ways. The processor's own
// requests (registration, state access) are matched to replies by
// correlation id; transaction process requests pushed by the validator
// while a reply is pending are queued and drained by the run loop. The host
// invokes apply sequentially, so one socket and one lock are enough.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use crate::handler::{CreditcoinHandler, TxRequest};
use crate::state::StateStore;
use crate::wire::{self, message_type, status, Envelope};
use crate::{safe_lock, CcError};
use prost::Message;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

struct ConnInner {
    socket: zmq::Socket,
    next_correlation: u64,
    pending: VecDeque<Envelope>,
}

pub struct ValidatorConnection {
    inner: Mutex<ConnInner>,
}

fn transport_err(e: zmq::Error) -> CcError {
    CcError::internal(format!("validator socket failure: {}", e))
}

fn decode_err() -> CcError {
    CcError::internal("malformed envelope from validator")
}

impl ValidatorConnection {
    pub fn connect(url: &str) -> Result<Self, CcError> {
        let context = zmq::Context::new();
        let socket = context.socket(zmq::DEALER).map_err(transport_err)?;
        socket.connect(url).map_err(transport_err)?;
        Ok(ValidatorConnection {
            inner: Mutex::new(ConnInner {
                socket,
                next_correlation: 0,
                pending: VecDeque::new(),
            }),
        })
    }

    fn send(inner: &ConnInner, envelope: &Envelope) -> Result<(), CcError> {
        inner
            .socket
            .send(envelope.encode_to_vec(), 0)
            .map_err(transport_err)
    }

    fn recv(inner: &ConnInner) -> Result<Envelope, CcError> {
        let frame = inner.socket.recv_bytes(0).map_err(transport_err)?;
        Envelope::decode(frame.as_slice()).map_err(|_| decode_err())
    }

    /// Issue one request and await its reply. Process requests that arrive
    /// in between are parked for the run loop.
    pub fn call(&self, message_type_id: i32, content: Vec<u8>) -> Result<Vec<u8>, CcError> {
        let mut inner = safe_lock(&self.inner);
        inner.next_correlation += 1;
        let correlation_id = format!("cc{}", inner.next_correlation);

        Self::send(
            &inner,
            &Envelope {
                message_type: message_type_id,
                correlation_id: correlation_id.clone(),
                content,
            },
        )?;

        loop {
            let envelope = Self::recv(&inner)?;
            if envelope.correlation_id == correlation_id {
                return Ok(envelope.content);
            }
            if envelope.message_type == message_type::PROCESS_REQUEST {
                inner.pending.push_back(envelope);
            }
            // Anything else out of band is dropped; the validator retries.
        }
    }

    /// The next transaction to process: a parked one if any, otherwise the
    /// next frame off the socket.
    pub fn next_process_request(&self) -> Result<(String, wire::ProcessRequest), CcError> {
        let mut inner = safe_lock(&self.inner);
        loop {
            let envelope = match inner.pending.pop_front() {
                Some(parked) => parked,
                None => Self::recv(&inner)?,
            };
            if envelope.message_type == message_type::PROCESS_REQUEST {
                let request = wire::ProcessRequest::decode(envelope.content.as_slice())
                    .map_err(|_| decode_err())?;
                return Ok((envelope.correlation_id, request));
            }
        }
    }

    pub fn respond(
        &self,
        correlation_id: &str,
        response_status: i32,
        message: &str,
    ) -> Result<(), CcError> {
        let inner = safe_lock(&self.inner);
        Self::send(
            &inner,
            &Envelope {
                message_type: message_type::PROCESS_RESPONSE,
                correlation_id: correlation_id.to_string(),
                content: wire::ProcessResponse {
                    status: response_status,
                    message: message.to_string(),
                }
                .encode_to_vec(),
            },
        )
    }

    pub fn register(
        &self,
        family: &str,
        versions: &[String],
        namespaces: &[String],
    ) -> Result<(), CcError> {
        let content = self.call(
            message_type::REGISTER_REQUEST,
            wire::RegisterRequest {
                family: family.to_string(),
                versions: versions.to_vec(),
                namespaces: namespaces.to_vec(),
            }
            .encode_to_vec(),
        )?;
        let response =
            wire::RegisterResponse::decode(content.as_slice()).map_err(|_| decode_err())?;
        if response.ok {
            Ok(())
        } else {
            Err(CcError::internal("validator rejected registration"))
        }
    }
}

/// StateStore over the validator connection. `context_id` scopes writes to
/// one in-flight transaction; the empty id is the context-free view used
/// for settings scans and reward signer lookups.
pub struct ZmqStateStore {
    conn: Arc<ValidatorConnection>,
    context_id: String,
}

impl ZmqStateStore {
    pub fn new(conn: Arc<ValidatorConnection>, context_id: String) -> Self {
        ZmqStateStore { conn, context_id }
    }

    pub fn contextless(conn: Arc<ValidatorConnection>) -> Self {
        Self::new(conn, String::new())
    }
}

impl StateStore for ZmqStateStore {
    fn get(&self, address: &str) -> Result<Option<Vec<u8>>, CcError> {
        let content = self.conn.call(
            message_type::STATE_GET_REQUEST,
            wire::StateGetRequest {
                context_id: self.context_id.clone(),
                address: address.to_string(),
            }
            .encode_to_vec(),
        )?;
        let response =
            wire::StateGetResponse::decode(content.as_slice()).map_err(|_| decode_err())?;
        if response.value.is_empty() {
            Ok(None)
        } else {
            Ok(Some(response.value))
        }
    }

    fn set(&self, entries: &[(String, Vec<u8>)]) -> Result<(), CcError> {
        let content = self.conn.call(
            message_type::STATE_SET_REQUEST,
            wire::StateSetRequest {
                context_id: self.context_id.clone(),
                entries: entries
                    .iter()
                    .map(|(address, value)| wire::StateEntry {
                        address: address.clone(),
                        value: value.clone(),
                    })
                    .collect(),
            }
            .encode_to_vec(),
        )?;
        wire::StateSetResponse::decode(content.as_slice()).map_err(|_| decode_err())?;
        Ok(())
    }

    fn delete(&self, address: &str) -> Result<(), CcError> {
        let content = self.conn.call(
            message_type::STATE_DELETE_REQUEST,
            wire::StateDeleteRequest {
                context_id: self.context_id.clone(),
                address: address.to_string(),
            }
            .encode_to_vec(),
        )?;
        wire::StateDeleteResponse::decode(content.as_slice()).map_err(|_| decode_err())?;
        Ok(())
    }

    fn scan_prefix(
        &self,
        prefix: &str,
        start: &mut String,
    ) -> Result<Vec<(String, Vec<u8>)>, CcError> {
        let content = self.conn.call(
            message_type::PREFIX_SCAN_REQUEST,
            wire::PrefixScanRequest {
                context_id: self.context_id.clone(),
                prefix: prefix.to_string(),
                start: start.clone(),
            }
            .encode_to_vec(),
        )?;
        let response =
            wire::PrefixScanResponse::decode(content.as_slice()).map_err(|_| decode_err())?;
        *start = response.next;
        Ok(response
            .entries
            .into_iter()
            .map(|entry| (entry.address, entry.value))
            .collect())
    }

    fn tip(&self) -> Result<u64, CcError> {
        let content = self.conn.call(
            message_type::TIP_REQUEST,
            wire::TipRequest {}.encode_to_vec(),
        )?;
        let response = wire::TipResponse::decode(content.as_slice()).map_err(|_| decode_err())?;
        Ok(response.tip)
    }

    fn sig_by_num(&self, height: u64) -> Result<String, CcError> {
        let content = self.conn.call(
            message_type::SIG_BY_NUM_REQUEST,
            wire::SigByNumRequest { height }.encode_to_vec(),
        )?;
        let response =
            wire::SigByNumResponse::decode(content.as_slice()).map_err(|_| decode_err())?;
        Ok(response.signer)
    }

    fn reward_block_signatures(
        &self,
        block_signature: &str,
        first: u64,
        last: u64,
    ) -> Result<Vec<String>, CcError> {
        let content = self.conn.call(
            message_type::REWARD_SIGNATURES_REQUEST,
            wire::RewardSignaturesRequest {
                block_signature: block_signature.to_string(),
                first,
                last,
            }
            .encode_to_vec(),
        )?;
        let response = wire::RewardSignaturesResponse::decode(content.as_slice())
            .map_err(|_| decode_err())?;
        Ok(response.signatures)
    }
}

/// Register-then-serve loop. Runs until the connection fails; a migration
/// that completes exits the process from inside the replay engine instead.
pub struct TransactionProcessor {
    conn: Arc<ValidatorConnection>,
    handler: CreditcoinHandler,
}

impl TransactionProcessor {
    pub fn new(conn: Arc<ValidatorConnection>, handler: CreditcoinHandler) -> Self {
        TransactionProcessor { conn, handler }
    }

    pub fn run(&self) -> Result<(), CcError> {
        self.conn.register(
            self.handler.family_name(),
            &self.handler.family_versions(),
            &self.handler.namespaces(),
        )?;

        loop {
            let (correlation_id, request) = self.conn.next_process_request()?;
            let store = ZmqStateStore::new(Arc::clone(&self.conn), request.context_id.clone());
            let tx_request = TxRequest {
                payload: request.payload,
                nonce: request.nonce,
                signer_public_key: request.signer_public_key,
                family_version: request.family_version,
                block_signature: request.block_signature,
            };
            match self.handler.apply(&tx_request, &store) {
                Ok(()) => self.conn.respond(&correlation_id, status::OK, "")?,
                Err(CcError::InvalidTransaction(message)) => {
                    self.conn
                        .respond(&correlation_id, status::INVALID_TRANSACTION, &message)?
                }
                Err(CcError::InternalError(message)) => {
                    eprintln!("⚠️ internal error while applying transaction: {}", message);
                    self.conn
                        .respond(&correlation_id, status::INTERNAL_ERROR, &message)?
                }
            }
        }
    }
}
