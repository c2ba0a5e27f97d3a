//! In-memory transports for testing.
//!
//! - [`MockTransport`] queues response lines and logs every write. A responder
//!   closure can compute replies from requests.
//! - [`MockDevice`] is a small firmware simulator that answers the handshake
//!   and dispatches calls to registered handlers, in either protocol
//!   generation.
//! - [`MockPorts`] is a `TransportOpener` over a fixed set of named mock
//!   ports, used to exercise discovery without hardware.

use super::error::PortError;
use super::traits::{trim_line_ending, ConnectionParams, Transport, TransportOpener};
use crate::codec::{decode_request, Generation, RequestId};
use crate::config::ReservedLayout;
use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

type Responder = Box<dyn FnMut(&str) -> Vec<String> + Send>;

#[derive(Default)]
struct MockPortState {
    /// Lines returned by subsequent `read_line` calls.
    read_queue: VecDeque<Vec<u8>>,
    /// Every write, in order.
    write_log: Vec<Vec<u8>>,
    responder: Option<Responder>,
    /// Whether the next read should fail with an I/O error.
    fail_next_read: bool,
    closed: bool,
    /// Number of I/O attempts made after close.
    io_after_close: usize,
}

/// Mock transport with shared state: clones observe the same port.
///
/// # Example
/// ```
/// use remote_device::port::{MockTransport, Transport};
/// use std::time::Duration;
///
/// let mut port = MockTransport::new("MOCK0");
/// port.enqueue_line(r#"{"id":0,"result":{}}"#);
/// port.write_bytes(b"[0]\n").unwrap();
///
/// let line = port.read_line(Duration::from_millis(10)).unwrap();
/// assert_eq!(line.as_deref(), Some(&br#"{"id":0,"result":{}}"#[..]));
/// assert_eq!(port.get_write_log(), vec![b"[0]\n".to_vec()]);
/// ```
#[derive(Clone)]
pub struct MockTransport {
    name: String,
    state: Arc<Mutex<MockPortState>>,
}

impl MockTransport {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Arc::new(Mutex::new(MockPortState::default())),
        }
    }

    /// Reply to each written line with whatever `responder` returns.
    pub fn with_responder<F>(self, responder: F) -> Self
    where
        F: FnMut(&str) -> Vec<String> + Send + 'static,
    {
        self.state.lock().responder = Some(Box::new(responder));
        self
    }

    /// Queue one line (without terminator) for a later read.
    pub fn enqueue_line(&self, line: impl AsRef<[u8]>) {
        self.state
            .lock()
            .read_queue
            .push_back(line.as_ref().to_vec());
    }

    /// Make the next read fail with an I/O error.
    pub fn fail_next_read(&self) {
        self.state.lock().fail_next_read = true;
    }

    pub fn get_write_log(&self) -> Vec<Vec<u8>> {
        self.state.lock().write_log.clone()
    }

    /// Writes decoded as UTF-8 text.
    pub fn written_lines(&self) -> Vec<String> {
        self.state
            .lock()
            .write_log
            .iter()
            .map(|w| String::from_utf8_lossy(w).into_owned())
            .collect()
    }

    pub fn clear_write_log(&self) {
        self.state.lock().write_log.clear();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// I/O attempted after `close`; a correct session never does this.
    pub fn io_after_close(&self) -> usize {
        self.state.lock().io_after_close
    }

    pub fn pending_lines(&self) -> usize {
        self.state.lock().read_queue.len()
    }
}

impl Transport for MockTransport {
    fn name(&self) -> &str {
        &self.name
    }

    fn write_bytes(&mut self, data: &[u8]) -> Result<usize, PortError> {
        let mut state = self.state.lock();
        if state.closed {
            state.io_after_close += 1;
            return Err(PortError::Closed);
        }
        state.write_log.push(data.to_vec());

        let request = String::from_utf8_lossy(&trim_line_ending(data.to_vec())).into_owned();
        if let Some(responder) = state.responder.as_mut() {
            let replies = responder(&request);
            state
                .read_queue
                .extend(replies.into_iter().map(String::into_bytes));
        }
        Ok(data.len())
    }

    fn read_line(&mut self, _timeout: Duration) -> Result<Option<Vec<u8>>, PortError> {
        let mut state = self.state.lock();
        if state.closed {
            state.io_after_close += 1;
            return Err(PortError::Closed);
        }
        if state.fail_next_read {
            state.fail_next_read = false;
            return Err(PortError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "device disconnected",
            )));
        }
        Ok(state.read_queue.pop_front())
    }

    fn clear_input(&mut self) -> Result<(), PortError> {
        let mut state = self.state.lock();
        if state.closed {
            state.io_after_close += 1;
            return Err(PortError::Closed);
        }
        state.read_queue.clear();
        Ok(())
    }

    fn close(&mut self) -> Result<(), PortError> {
        self.state.lock().closed = true;
        Ok(())
    }
}

impl std::fmt::Debug for MockTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockTransport")
            .field("name", &self.name)
            .field("pending_lines", &self.pending_lines())
            .field("closed", &self.is_closed())
            .finish()
    }
}

type Handler = Arc<dyn Fn(&[Value]) -> Result<Value, String> + Send + Sync>;

#[derive(Clone)]
struct MockMethod {
    id: u64,
    parameters: Option<Vec<String>>,
    handler: Handler,
}

/// Simulated firmware speaking either protocol generation.
///
/// Reserved requests follow a [`ReservedLayout`]. With `MethodsFirst` id 0
/// lists methods and a `getDeviceId` method (id 1) returns the identity.
/// With `DeviceInfoFirst` id 0 returns the identity and id 1 lists methods.
/// Under the status-code generation id 2 returns the response codes.
#[derive(Clone)]
pub struct MockDevice {
    generation: Generation,
    layout: ReservedLayout,
    identity: Value,
    methods: BTreeMap<String, MockMethod>,
    /// Echo this id instead of the request's (to provoke mismatches).
    echo_override: Option<Value>,
    silent: bool,
}

pub const MOCK_SUCCESS_STATUS: i64 = 1;
pub const MOCK_ERROR_STATUS: i64 = 0;
pub const MOCK_RESPONSE_CODES_ID: u64 = 2;

impl MockDevice {
    /// A device in the usual layout for `generation`: device info first for
    /// status-code firmware, methods first for JSON-RPC firmware.
    pub fn new(generation: Generation, identity: Value) -> Self {
        let layout = match generation {
            Generation::StatusCode => ReservedLayout::DeviceInfoFirst,
            Generation::JsonRpc => ReservedLayout::MethodsFirst,
        };
        Self {
            generation,
            layout,
            identity,
            methods: BTreeMap::new(),
            echo_override: None,
            silent: false,
        }
    }

    pub fn with_layout(mut self, layout: ReservedLayout) -> Self {
        self.layout = layout;
        self
    }

    /// Register a method with a handler.
    pub fn method<F>(mut self, wire_name: &str, id: u64, handler: F) -> Self
    where
        F: Fn(&[Value]) -> Result<Value, String> + Send + Sync + 'static,
    {
        self.methods.insert(
            wire_name.to_string(),
            MockMethod {
                id,
                parameters: None,
                handler: Arc::new(handler),
            },
        );
        self
    }

    /// Register a method that reports its parameter positions in the listing.
    pub fn method_with_parameters<F>(
        mut self,
        wire_name: &str,
        id: u64,
        parameters: &[&str],
        handler: F,
    ) -> Self
    where
        F: Fn(&[Value]) -> Result<Value, String> + Send + Sync + 'static,
    {
        self = self.method(wire_name, id, handler);
        if let Some(m) = self.methods.get_mut(wire_name) {
            m.parameters = Some(parameters.iter().map(|p| p.to_string()).collect());
        }
        self
    }

    /// Echo a fixed id in every response.
    pub fn echo_id(mut self, id: Value) -> Self {
        self.echo_override = Some(id);
        self
    }

    /// Never answer anything.
    pub fn silent(mut self) -> Self {
        self.silent = true;
        self
    }

    fn listing(&self) -> Value {
        let mut listing = Map::new();
        match self.layout {
            ReservedLayout::MethodsFirst => {
                listing.insert("getMethodIds".into(), json!(ReservedLayout::FIRST_ID));
                listing.insert("getDeviceId".into(), json!(1));
            }
            ReservedLayout::DeviceInfoFirst => {
                listing.insert("getDeviceInfo".into(), json!(ReservedLayout::FIRST_ID));
                listing.insert(
                    "getMethodIds".into(),
                    json!(ReservedLayout::DEVICE_INFO_LIST_ID),
                );
            }
        }
        for (name, m) in &self.methods {
            let entry = match &m.parameters {
                Some(params) => {
                    let positions: Map<String, Value> = params
                        .iter()
                        .enumerate()
                        .map(|(i, p)| (p.clone(), json!(i)))
                        .collect();
                    json!({"id": m.id, "parameters": positions})
                }
                None => json!(m.id),
            };
            listing.insert(name.clone(), entry);
        }
        Value::Object(listing)
    }

    /// Answer a reserved request, if `id` is one.
    fn reserved(&self, id: &RequestId) -> Option<Value> {
        let listing_id = self.layout.list_methods_id();
        match (self.layout, id) {
            (_, RequestId::Id(n)) if *n == listing_id => Some(self.listing()),
            (ReservedLayout::DeviceInfoFirst, RequestId::Id(ReservedLayout::FIRST_ID)) => {
                Some(self.identity.clone())
            }
            (ReservedLayout::MethodsFirst, RequestId::Id(1)) => Some(self.identity.clone()),
            (ReservedLayout::MethodsFirst, RequestId::Name(name)) if name == "getDeviceId" => {
                Some(self.identity.clone())
            }
            (_, RequestId::Id(MOCK_RESPONSE_CODES_ID))
                if self.generation == Generation::StatusCode =>
            {
                Some(json!({
                    "rsp_success": MOCK_SUCCESS_STATUS,
                    "rsp_error": MOCK_ERROR_STATUS
                }))
            }
            _ => None,
        }
    }

    /// Compute the reply to one request line.
    pub fn respond(&self, request: &str) -> Vec<String> {
        if self.silent {
            return Vec::new();
        }
        let (id, args) = match decode_request(request) {
            Ok(parsed) => parsed,
            Err(_) => return vec!["{\"error\":\"parse\"}".to_string()],
        };
        let echoed = self.echo_override.clone().unwrap_or_else(|| id.to_json());

        let outcome = match (self.reserved(&id), &id) {
            (Some(record), _) => Ok(record),
            (None, RequestId::Id(n)) => match self.methods.values().find(|m| m.id == *n) {
                Some(m) => (m.handler)(&args),
                None => Err(format!("unknown method id {n}")),
            },
            (None, RequestId::Name(name)) => match self.methods.get(name) {
                Some(m) => (m.handler)(&args),
                None => Err(format!("unknown method {name}")),
            },
        };

        let response = match self.generation {
            Generation::JsonRpc => match outcome {
                Ok(result) => json!({"id": echoed, "result": result}),
                Err(message) => json!({
                    "id": echoed,
                    "error": {"message": message, "data": Value::Null, "code": -32601}
                }),
            },
            Generation::StatusCode => {
                let mut fields = Map::new();
                match outcome {
                    Ok(Value::Object(payload)) => {
                        fields.insert("status".into(), json!(MOCK_SUCCESS_STATUS));
                        fields.extend(payload);
                    }
                    Ok(Value::Null) => {
                        fields.insert("status".into(), json!(MOCK_SUCCESS_STATUS));
                    }
                    Ok(other) => {
                        fields.insert("status".into(), json!(MOCK_SUCCESS_STATUS));
                        fields.insert("value".into(), other);
                    }
                    Err(message) => {
                        fields.insert("status".into(), json!(MOCK_ERROR_STATUS));
                        fields.insert("err_msg".into(), json!(message));
                    }
                }
                fields.insert("cmd_id".into(), echoed);
                Value::Object(fields)
            }
        };
        vec![response.to_string()]
    }

    /// A transport wired to this device.
    pub fn transport(&self, port: &str) -> MockTransport {
        let device = self.clone();
        MockTransport::new(port).with_responder(move |request| device.respond(request))
    }
}

enum MockPortSpec {
    Device(MockDevice),
    Unavailable(String),
}

/// `TransportOpener` over named mock ports.
#[derive(Default)]
pub struct MockPorts {
    ports: BTreeMap<String, MockPortSpec>,
    opened: Mutex<Vec<MockTransport>>,
}

impl MockPorts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_device(mut self, port: &str, device: MockDevice) -> Self {
        self.ports
            .insert(port.to_string(), MockPortSpec::Device(device));
        self
    }

    /// A port that is listed but refuses to open.
    pub fn with_unavailable(mut self, port: &str, reason: &str) -> Self {
        self.ports
            .insert(port.to_string(), MockPortSpec::Unavailable(reason.to_string()));
        self
    }

    /// Every transport opened so far, in open order.
    pub fn opened(&self) -> Vec<MockTransport> {
        self.opened.lock().clone()
    }

    pub fn opened_on(&self, port: &str) -> Vec<MockTransport> {
        self.opened
            .lock()
            .iter()
            .filter(|t| t.name() == port)
            .cloned()
            .collect()
    }
}

impl TransportOpener for MockPorts {
    fn open(&self, port: &str, _params: &ConnectionParams) -> Result<Box<dyn Transport>, PortError> {
        match self.ports.get(port) {
            Some(MockPortSpec::Device(device)) => {
                let transport = device.transport(port);
                self.opened.lock().push(transport.clone());
                Ok(Box::new(transport))
            }
            Some(MockPortSpec::Unavailable(reason)) => Err(PortError::unavailable(port, reason)),
            None => Err(PortError::not_found(port)),
        }
    }

    fn list_available_ports(&self) -> Result<Vec<String>, PortError> {
        Ok(self.ports.keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enqueue_and_read() {
        let mut port = MockTransport::new("MOCK0");
        port.enqueue_line("hello");
        let line = port.read_line(Duration::ZERO).unwrap();
        assert_eq!(line, Some(b"hello".to_vec()));
        assert_eq!(port.read_line(Duration::ZERO).unwrap(), None);
    }

    #[test]
    fn test_write_logging() {
        let mut port = MockTransport::new("MOCK0");
        port.write_bytes(b"[1]\n").unwrap();
        port.write_bytes(b"[2]\n").unwrap();
        assert_eq!(port.written_lines(), vec!["[1]\n", "[2]\n"]);
    }

    #[test]
    fn test_closed_port_counts_io() {
        let mut port = MockTransport::new("MOCK0");
        port.close().unwrap();
        assert!(matches!(port.write_bytes(b"[1]\n"), Err(PortError::Closed)));
        assert!(matches!(port.read_line(Duration::ZERO), Err(PortError::Closed)));
        assert_eq!(port.io_after_close(), 2);
    }

    #[test]
    fn test_fail_next_read() {
        let mut port = MockTransport::new("MOCK0");
        port.fail_next_read();
        assert!(matches!(port.read_line(Duration::ZERO), Err(PortError::Io(_))));
        assert!(port.read_line(Duration::ZERO).unwrap().is_none());
    }

    #[test]
    fn test_device_answers_listing() {
        let device = MockDevice::new(Generation::JsonRpc, json!({"name": "x"}))
            .method("blink", 5, |_| Ok(Value::Null));
        let reply = device.respond("[0]");
        let parsed: Value = serde_json::from_str(&reply[0]).unwrap();
        assert_eq!(parsed["id"], json!(0));
        assert_eq!(parsed["result"]["blink"], json!(5));
        assert_eq!(parsed["result"]["getDeviceId"], json!(1));
    }

    #[test]
    fn test_device_info_first_layout() {
        let device = MockDevice::new(
            Generation::StatusCode,
            json!({"model_number": 1130, "serial_number": 2}),
        )
        .method("getCount", 7, |_| Ok(json!(12)));
        let info: Value = serde_json::from_str(&device.respond("[0]")[0]).unwrap();
        assert_eq!(info["model_number"], json!(1130));
        let listing: Value = serde_json::from_str(&device.respond("[1]")[0]).unwrap();
        assert_eq!(listing["cmd_id"], json!(1));
        assert_eq!(listing["getCount"], json!(7));
        let codes: Value = serde_json::from_str(&device.respond("[2]")[0]).unwrap();
        assert_eq!(codes["rsp_error"], json!(MOCK_ERROR_STATUS));
    }

    #[test]
    fn test_status_code_device_wraps_scalars() {
        let device = MockDevice::new(Generation::StatusCode, json!({"model_number": 1}))
            .method("getCount", 7, |_| Ok(json!(12)));
        let reply: Value = serde_json::from_str(&device.respond("[7]")[0]).unwrap();
        assert_eq!(reply, json!({"status": 1, "cmd_id": 7, "value": 12}));
    }

    #[test]
    fn test_mock_ports_open_and_list() {
        let ports = MockPorts::new()
            .with_device("MOCK1", MockDevice::new(Generation::JsonRpc, json!({})))
            .with_unavailable("MOCK2", "busy");
        assert_eq!(ports.list_available_ports().unwrap(), vec!["MOCK1", "MOCK2"]);

        let params = ConnectionParams::immediate();
        assert!(ports.open("MOCK1", &params).is_ok());
        assert!(matches!(
            ports.open("MOCK2", &params),
            Err(PortError::Unavailable { .. })
        ));
        assert!(matches!(ports.open("MOCK3", &params), Err(PortError::NotFound(_))));
        assert_eq!(ports.opened_on("MOCK1").len(), 1);
    }
}
