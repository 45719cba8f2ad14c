// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// CREDITCOIN - GATEWAY CLIENT
//
// Request/reply client for the off-chain transfer attestor. Commands are
// plain ASCII ("<chain> verify <src> <dst> <order> <amount> <txid> <net>"),
// replies are "good", "miss", or anything else (= failure). A local gateway
// is tried first; on a miss or a dead socket the local REQ socket is torn
// down and rebuilt (REQ sockets wedge after an unanswered send) and the
// externally-configured attestor gets one attempt under the same lock.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use std::sync::{Mutex, MutexGuard, RwLock};

/// Receive timeout for the external attestor socket.
const SOCKET_TIMEOUT_MILLISECONDS: i32 = 5_000_000;
/// Receive timeout for the local gateway. Short in release; effectively
/// unbounded in debug so a breakpointed gateway doesn't time out.
#[cfg(debug_assertions)]
const LOCAL_SOCKET_TIMEOUT_MILLISECONDS: i32 = 5_000_000;
#[cfg(not(debug_assertions))]
const LOCAL_SOCKET_TIMEOUT_MILLISECONDS: i32 = 5_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// The attestor replied with something other than "good" (including a
    /// miss on both sockets or no reply at all).
    Rejected,
    /// Socket construction failed; nothing to retry against.
    Transport(String),
}

impl std::fmt::Display for GatewayError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GatewayError::Rejected => write!(f, "Couldn't validate the transaction"),
            GatewayError::Transport(m) => write!(f, "Gateway transport failure: {}", m),
        }
    }
}

impl std::error::Error for GatewayError {}

struct Sockets {
    local: zmq::Socket,
    external: zmq::Socket,
}

/// Attestation client holding one local and one external REQ socket.
pub struct GatewayClient {
    context: zmq::Context,
    local_url: String,
    sockets: Mutex<Sockets>,
    /// External attestor URL from the `sawtooth.validator.gateway` setting;
    /// empty until the settings cache first observes it.
    external_address: RwLock<String>,
}

fn safe_lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            eprintln!("⚠️ WARNING: gateway mutex was poisoned, recovering...");
            poisoned.into_inner()
        }
    }
}

fn new_local_socket(context: &zmq::Context, url: &str) -> Result<zmq::Socket, GatewayError> {
    let socket = context
        .socket(zmq::REQ)
        .map_err(|e| GatewayError::Transport(e.to_string()))?;
    socket
        .set_rcvtimeo(LOCAL_SOCKET_TIMEOUT_MILLISECONDS)
        .map_err(|e| GatewayError::Transport(e.to_string()))?;
    socket
        .connect(url)
        .map_err(|e| GatewayError::Transport(e.to_string()))?;
    Ok(socket)
}

impl GatewayClient {
    pub fn new(local_url: &str) -> Result<Self, GatewayError> {
        let context = zmq::Context::new();
        let local = new_local_socket(&context, local_url)?;
        let external = context
            .socket(zmq::REQ)
            .map_err(|e| GatewayError::Transport(e.to_string()))?;
        external
            .set_rcvtimeo(SOCKET_TIMEOUT_MILLISECONDS)
            .map_err(|e| GatewayError::Transport(e.to_string()))?;
        Ok(GatewayClient {
            context,
            local_url: local_url.to_string(),
            sockets: Mutex::new(Sockets { local, external }),
            external_address: RwLock::new(String::new()),
        })
    }

    /// Record the external attestor address observed in chain settings.
    pub fn set_external_address(&self, address: String) {
        if let Ok(mut slot) = self.external_address.write() {
            *slot = address;
        }
    }

    pub fn external_address(&self) -> String {
        self.external_address
            .read()
            .map(|a| a.clone())
            .unwrap_or_default()
    }

    /// Send one request, await one reply. Errors and timeouts collapse into
    /// an empty reply so they take the same retry path as a miss.
    fn round_trip(socket: &zmq::Socket, command: &str) -> String {
        if socket.send(command, 0).is_err() {
            return String::new();
        }
        match socket.recv_string(0) {
            Ok(Ok(reply)) => reply,
            _ => String::new(),
        }
    }

    /// Verify a command against the local gateway, falling back to the
    /// external attestor. Only the literal reply "good" passes.
    pub fn verify(&self, command: &str) -> Result<(), GatewayError> {
        let mut sockets = safe_lock(&self.sockets);

        let mut response = Self::round_trip(&sockets.local, command);
        if response.is_empty() || response == "miss" {
            // The local socket is now wedged (REQ alternates send/recv), so
            // rebuild it before anyone else takes the lock.
            sockets.local = new_local_socket(&self.context, &self.local_url)?;

            let address = self.external_address();
            if !address.is_empty() {
                if sockets.external.connect(&address).is_ok() {
                    response = Self::round_trip(&sockets.external, command);
                    let _ = sockets.external.disconnect(&address);
                }
            }
        }

        if response == "good" {
            Ok(())
        } else {
            Err(GatewayError::Rejected)
        }
    }
}
