//! One open, handshaken connection to a device.
//!
//! A [`Session`] owns its transport exclusively. Opening runs the handshake:
//!
//! ```text
//! Unopened -> Opening -> AwaitingBoot -> NegotiatingMethods -> Ready -> Closed
//! ```
//!
//! Any state moves to `Closed` on a fatal transport error, on `close()` or
//! when the session is dropped.

use crate::codec::{parse_response, Codec, Generation, RequestId};
use crate::config::{Config, GenerationSetting, IdentityQuery, ProtocolConfig, ReservedLayout};
use crate::error::{DeviceError, DeviceResult, ProtocolError};
use crate::identity::Identity;
use crate::method_table::{MethodRef, MethodTable};
use crate::naming::{Naming, SnakeCaseNaming};
use crate::port::{ConnectionParams, PortError, Transport, TransportOpener};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Unopened,
    Opening,
    /// Port open, waiting out the board's reset.
    AwaitingBoot,
    NegotiatingMethods,
    Ready,
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unopened => "unopened",
            Self::Opening => "opening",
            Self::AwaitingBoot => "awaiting_boot",
            Self::NegotiatingMethods => "negotiating_methods",
            Self::Ready => "ready",
            Self::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Call arguments, positional or by parameter name.
#[derive(Debug, Clone, PartialEq)]
pub enum Args {
    Positional(Vec<Value>),
    Named(Map<String, Value>),
}

impl Args {
    pub fn none() -> Self {
        Self::Positional(Vec::new())
    }
}

impl Default for Args {
    fn default() -> Self {
        Self::none()
    }
}

impl From<Vec<Value>> for Args {
    fn from(args: Vec<Value>) -> Self {
        Self::Positional(args)
    }
}

impl From<Map<String, Value>> for Args {
    fn from(args: Map<String, Value>) -> Self {
        Self::Named(args)
    }
}

impl From<()> for Args {
    fn from(_: ()) -> Self {
        Self::none()
    }
}

/// Arrays are positional, objects named, null empty, anything else a
/// single positional argument.
impl From<Value> for Args {
    fn from(value: Value) -> Self {
        match value {
            Value::Array(items) => Self::Positional(items),
            Value::Object(map) => Self::Named(map),
            Value::Null => Self::none(),
            other => Self::Positional(vec![other]),
        }
    }
}

/// Everything needed to open a session, besides the port name.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub params: ConnectionParams,
    pub protocol: ProtocolConfig,
    pub naming: Arc<dyn Naming>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            params: ConnectionParams::default(),
            protocol: ProtocolConfig::default(),
            naming: Arc::new(SnakeCaseNaming),
        }
    }
}

impl SessionOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            params: config.connection.params(),
            protocol: config.protocol.clone(),
            ..Self::default()
        }
    }

    pub fn with_params(mut self, params: ConnectionParams) -> Self {
        self.params = params;
        self
    }

    pub fn with_generation(mut self, generation: GenerationSetting) -> Self {
        self.protocol.generation = generation;
        self
    }

    pub fn with_identity_query(mut self, query: IdentityQuery) -> Self {
        self.protocol.identity = Some(query);
        self
    }

    pub fn with_layout(mut self, layout: ReservedLayout) -> Self {
        self.protocol.layout = Some(layout);
        self
    }

    /// Fetch the method listing from `id` instead of the layout's id.
    pub fn with_list_methods_id(mut self, id: u64) -> Self {
        self.protocol.list_methods_id = Some(id);
        self
    }

    /// Declare a parameter order for firmware that does not report one.
    pub fn with_parameter_order<I, S>(mut self, method: &str, order: I) -> Self
    where
        I: IntoIterator<Item = (S, usize)>,
        S: Into<String>,
    {
        self.protocol.parameter_orders.insert(
            method.to_string(),
            order.into_iter().map(|(n, p)| (n.into(), p)).collect(),
        );
        self
    }

    pub fn with_naming(mut self, naming: Arc<dyn Naming>) -> Self {
        self.naming = naming;
        self
    }
}

/// An open connection to one device.
///
/// # Example
/// ```
/// use remote_device::codec::Generation;
/// use remote_device::port::{ConnectionParams, MockDevice, MockPorts};
/// use remote_device::session::{Session, SessionOptions};
/// use serde_json::json;
///
/// let ports = MockPorts::new().with_device(
///     "MOCK0",
///     MockDevice::new(Generation::JsonRpc, json!({"name": "led_controller", "serial_number": 3}))
///         .method("getLedCount", 4, |_| Ok(json!(8))),
/// );
/// let options = SessionOptions::default().with_params(ConnectionParams::immediate());
///
/// let mut session = Session::open(&ports, "MOCK0", &options).unwrap();
/// assert_eq!(session.invoke("get_led_count", ()).unwrap(), json!(8));
/// session.close();
/// ```
pub struct Session {
    port: String,
    transport: Option<Box<dyn Transport>>,
    state: SessionState,
    codec: Codec,
    methods: MethodTable,
    identity: Identity,
    naming: Arc<dyn Naming>,
    read_timeout: Duration,
}

impl Session {
    /// Open `port` and run the handshake.
    ///
    /// Fails with `TransportOpen` if the port cannot be opened and with
    /// `Handshake` if the device does not complete the negotiation; the
    /// port is released in both cases.
    pub fn open(
        opener: &dyn TransportOpener,
        port: &str,
        options: &SessionOptions,
    ) -> DeviceResult<Self> {
        debug!(port, baud = options.params.baud_rate, "Opening session");
        let transport =
            opener
                .open(port, &options.params)
                .map_err(|source| DeviceError::TransportOpen {
                    port: port.to_string(),
                    source,
                })?;

        let mut session = Self {
            port: port.to_string(),
            transport: Some(transport),
            state: SessionState::Opening,
            codec: Codec::new(Generation::JsonRpc),
            methods: MethodTable::default(),
            identity: Identity::default(),
            naming: Arc::clone(&options.naming),
            read_timeout: options.params.handshake_timeout,
        };

        if let Err(e) = session.handshake(options) {
            warn!(port, error = %e, "Handshake failed");
            session.close();
            return Err(DeviceError::Handshake {
                port: port.to_string(),
                source: Box::new(e),
            });
        }

        session.read_timeout = options.params.read_timeout;
        session.state = SessionState::Ready;
        info!(
            port,
            generation = %session.codec.generation(),
            methods = session.methods.len(),
            identity = %session.identity,
            "Session ready"
        );
        Ok(session)
    }

    fn handshake(&mut self, options: &SessionOptions) -> DeviceResult<()> {
        let protocol = &options.protocol;

        self.state = SessionState::AwaitingBoot;
        if !options.params.reset_delay.is_zero() {
            debug!(port = %self.port, delay = ?options.params.reset_delay, "Waiting for device boot");
            std::thread::sleep(options.params.reset_delay);
        }

        self.state = SessionState::NegotiatingMethods;
        let first_id = RequestId::Id(
            protocol
                .list_methods_id
                .unwrap_or(ReservedLayout::FIRST_ID),
        );
        let line = self.exchange(&first_id, &[])?;
        let generation = match protocol.generation.fixed() {
            Some(generation) => generation,
            None => Generation::detect(&parse_response(line.as_deref())?),
        };
        self.codec = Codec::new(generation);
        let first_record = self.codec.decode_record(line.as_deref(), &first_id)?;

        // An explicit listing id means the first record is the listing
        let layout = match protocol.list_methods_id {
            Some(_) => None,
            None => Some(
                protocol
                    .layout
                    .unwrap_or_else(|| ReservedLayout::detect(generation, &first_record)),
            ),
        };
        debug!(port = %self.port, %generation, ?layout, "Negotiating methods");

        let (listing, device_info) = match layout {
            Some(ReservedLayout::DeviceInfoFirst) => {
                let list_id = RequestId::Id(ReservedLayout::DEVICE_INFO_LIST_ID);
                let line = self.exchange(&list_id, &[])?;
                let listing = self.codec.decode_record(line.as_deref(), &list_id)?;
                (listing, Some(first_record))
            }
            Some(ReservedLayout::MethodsFirst) | None => (first_record, None),
        };

        if generation == Generation::StatusCode {
            let codes_id = RequestId::Id(protocol.response_codes_id);
            let line = self.exchange(&codes_id, &[])?;
            let codes = self.codec.decode_record(line.as_deref(), &codes_id)?;
            if codes.get("rsp_success").is_none() {
                return Err(ProtocolError::MissingResponseCode("rsp_success").into());
            }
            let error_status = codes
                .get("rsp_error")
                .cloned()
                .ok_or(ProtocolError::MissingResponseCode("rsp_error"))?;
            self.codec = Codec::new(generation).with_error_status(error_status);
        }

        let mut table = MethodTable::from_listing(&listing, self.naming.as_ref())?;
        for (method, order) in &protocol.parameter_orders {
            table = table.with_parameter_order(method, order.clone())?;
        }
        self.methods = table;

        self.identity = match (&protocol.identity, device_info) {
            (Some(query), _) => self.query_identity(query)?,
            (None, Some(info)) => Identity::from_response(&info)?,
            (None, None) => self.query_identity(&IdentityQuery::default())?,
        };
        Ok(())
    }

    fn query_identity(&mut self, query: &IdentityQuery) -> DeviceResult<Identity> {
        let identity_id = match query {
            IdentityQuery::Id(id) => RequestId::Id(*id),
            IdentityQuery::Method(name) => self
                .methods
                .resolve(&MethodRef::from(name.as_str()))
                .map(|m| RequestId::Id(m.id))
                .ok_or_else(|| DeviceError::UnknownMethod(name.clone()))?,
        };
        let line = self.exchange(&identity_id, &[])?;
        let response = self.codec.decode_record(line.as_deref(), &identity_id)?;
        Ok(Identity::from_response(&response)?)
    }

    /// Write one request and read one line back.
    fn exchange(&mut self, id: &RequestId, args: &[Value]) -> DeviceResult<Option<Vec<u8>>> {
        let transport = match (self.state, self.transport.as_mut()) {
            (SessionState::Closed, _) | (_, None) => {
                return Err(DeviceError::ClosedSession(self.port.clone()))
            }
            (_, Some(transport)) => transport,
        };

        let request = self.codec.encode(id, args);
        debug!(port = %self.port, request = request.trim_end(), "Sending request");

        let result = transport
            .clear_input()
            .and_then(|_| transport.write_bytes(request.as_bytes()))
            .and_then(|_| transport.read_line(self.read_timeout));

        match result {
            Ok(line) => {
                if let Some(bytes) = &line {
                    debug!(port = %self.port, response = %String::from_utf8_lossy(bytes), "Received response");
                }
                Ok(line)
            }
            Err(e) => {
                warn!(port = %self.port, error = %e, "Transport failure, closing session");
                self.close();
                Err(e.into())
            }
        }
    }

    fn call(&mut self, id: &RequestId, args: &[Value]) -> DeviceResult<Value> {
        let line = self.exchange(id, args)?;
        self.codec.decode(line.as_deref(), id)
    }

    fn ensure_open(&self) -> DeviceResult<()> {
        if self.state == SessionState::Closed {
            return Err(DeviceError::ClosedSession(self.port.clone()));
        }
        Ok(())
    }

    /// Invoke a method by call name, wire name or id.
    ///
    /// Named arguments are placed by the method's declared parameter
    /// positions, so out-of-order keys encode exactly like the positional
    /// call.
    pub fn invoke(&mut self, method: impl Into<MethodRef>, args: impl Into<Args>) -> DeviceResult<Value> {
        self.ensure_open()?;
        let method = method.into();
        let info = self
            .methods
            .resolve(&method)
            .ok_or_else(|| DeviceError::UnknownMethod(method.to_string()))?;
        let args = match args.into() {
            Args::Positional(args) => args,
            Args::Named(named) => info.positional(&named)?,
        };
        let id = RequestId::Id(info.id);
        self.call(&id, &args)
    }

    /// Call names of every method the device offers.
    pub fn methods(&self) -> BTreeSet<String> {
        self.methods.call_names()
    }

    /// Send the method's wire name itself as the request id.
    ///
    /// For firmware that dispatches on names. `name` may be a call name or
    /// a wire name; it need not appear in the method table.
    pub fn call_by_wire_name(&mut self, name: &str, args: impl Into<Args>) -> DeviceResult<Value> {
        self.ensure_open()?;
        let known = self.methods.resolve(&MethodRef::from(name));
        let wire_name = match known {
            Some(info) => info.wire_name.clone(),
            None => self.naming.to_wire_name(name),
        };
        let args = match args.into() {
            Args::Positional(args) => args,
            Args::Named(named) => match known {
                Some(info) => info.positional(&named)?,
                None => return Err(DeviceError::UnknownMethod(name.to_string())),
            },
        };
        self.call(&RequestId::Name(wire_name), &args)
    }

    /// Send a caller-built request array, `[method, args...]`.
    ///
    /// A string method is converted to its wire name; a numeric one is sent
    /// as-is. The response is validated against that first element.
    pub fn send_json_request(&mut self, request: &str) -> DeviceResult<Value> {
        self.ensure_open()?;
        let mut items = match serde_json::from_str::<Value>(request.trim()) {
            Ok(Value::Array(items)) if !items.is_empty() => items,
            Ok(_) => {
                return Err(DeviceError::invalid_arguments(
                    "send_json_request",
                    "request must be a non-empty JSON array",
                ))
            }
            Err(e) => return Err(DeviceError::invalid_arguments("send_json_request", e.to_string())),
        };
        let id = match items.remove(0) {
            Value::String(name) => match self.methods.resolve(&MethodRef::from(name.as_str())) {
                Some(info) => RequestId::Name(info.wire_name.clone()),
                None => RequestId::Name(self.naming.to_wire_name(&name)),
            },
            Value::Number(n) => n.as_u64().map(RequestId::Id).ok_or_else(|| {
                DeviceError::invalid_arguments("send_json_request", format!("invalid method id {n}"))
            })?,
            other => {
                return Err(DeviceError::invalid_arguments(
                    "send_json_request",
                    format!("invalid method {other}"),
                ))
            }
        };
        self.call(&id, &items)
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn port(&self) -> &str {
        &self.port
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn generation(&self) -> Generation {
        self.codec.generation()
    }

    pub fn method_table(&self) -> &MethodTable {
        &self.methods
    }

    pub fn is_open(&self) -> bool {
        self.state != SessionState::Closed
    }

    /// Release the transport. Closing twice is a no-op.
    pub fn close(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            if let Err(e) = transport.close() {
                // The port is gone either way
                if !matches!(e, PortError::Closed) {
                    warn!(port = %self.port, error = %e, "Error while closing port");
                }
            }
            debug!(port = %self.port, "Session closed");
        }
        self.state = SessionState::Closed;
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("port", &self.port)
            .field("state", &self.state)
            .field("generation", &self.codec.generation())
            .field("identity", &self.identity)
            .field("methods", &self.methods.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::{MockDevice, MockPorts, MockTransport};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    /// Opens the same scripted transport whatever the port name.
    struct SingleTransport(MockTransport);

    impl TransportOpener for SingleTransport {
        fn open(
            &self,
            _port: &str,
            _params: &ConnectionParams,
        ) -> Result<Box<dyn Transport>, PortError> {
            Ok(Box::new(self.0.clone()))
        }

        fn list_available_ports(&self) -> Result<Vec<String>, PortError> {
            Ok(vec![self.0.name().to_string()])
        }
    }

    fn options() -> SessionOptions {
        SessionOptions::default().with_params(ConnectionParams::immediate())
    }

    fn json_rpc_device() -> MockDevice {
        MockDevice::new(
            Generation::JsonRpc,
            json!({"name": "led_controller", "form_factor": "5x3", "serial_number": 7}),
        )
        .method_with_parameters("setLed", 3, &["led", "state"], |args| {
            Ok(json!(args.to_vec()))
        })
        .method("getLedCount", 4, |_| Ok(json!(8)))
    }

    #[test]
    fn test_handshake_json_rpc() {
        let ports = MockPorts::new().with_device("MOCK0", json_rpc_device());
        let session = Session::open(&ports, "MOCK0", &options()).unwrap();

        assert_eq!(session.state(), SessionState::Ready);
        assert_eq!(session.generation(), Generation::JsonRpc);
        assert_eq!(session.identity().serial_number, Some(7.into()));
        assert!(session.methods().contains("set_led"));
        assert!(session.methods().contains("get_method_ids"));

        // list methods, then identity
        let writes = ports.opened_on("MOCK0")[0].written_lines();
        assert_eq!(writes, vec!["[0]\n", "[1]\n"]);
    }

    #[test]
    fn test_handshake_status_code_fetches_response_codes() {
        let device = MockDevice::new(Generation::StatusCode, json!({"model_number": 1130, "serial_number": 2}))
            .method("getCount", 7, |_| Ok(json!(12)));
        let ports = MockPorts::new().with_device("MOCK0", device);
        let mut session = Session::open(&ports, "MOCK0", &options()).unwrap();

        assert_eq!(session.generation(), Generation::StatusCode);
        assert_eq!(session.identity().name, Some(1130.into()));
        assert_eq!(session.identity().serial_number, Some(2.into()));
        // device info, commands, response codes
        assert_eq!(
            ports.opened_on("MOCK0")[0].written_lines(),
            vec!["[0]\n", "[1]\n", "[2]\n"]
        );
        assert!(!session.methods().contains("model_number"));
        assert_eq!(session.invoke("get_count", ()).unwrap(), json!(12));
    }

    #[test]
    fn test_status_code_firmware_answering_raw_lines() {
        let transport = MockTransport::new("ARD").with_responder(|request| {
            let reply = match request {
                "[0]" => r#"{"status":1,"cmd_id":0,"model_number":1130,"serial_number":2,"firmware_number":3}"#,
                "[1]" => r#"{"status":1,"cmd_id":1,"getDevInfo":0,"getCmds":1,"getRspCodes":2,"setLed":5}"#,
                "[2]" => r#"{"status":1,"cmd_id":2,"rsp_success":1,"rsp_error":0}"#,
                "[5]" => r#"{"status":1,"cmd_id":5}"#,
                _ => r#"{"status":0,"cmd_id":-1,"err_msg":"unknown"}"#,
            };
            vec![reply.to_string()]
        });
        let opener = SingleTransport(transport);

        let mut session = Session::open(&opener, "ARD", &options()).unwrap();
        assert_eq!(session.identity().name, Some(1130.into()));
        assert_eq!(session.identity().serial_number, Some(2.into()));
        assert_eq!(session.identity().firmware, Some(3.into()));
        assert!(session.methods().contains("set_led"));
        assert_eq!(session.invoke("set_led", ()).unwrap(), Value::Null);
    }

    #[test]
    fn test_handshake_device_info_first_json_rpc() {
        let device = MockDevice::new(
            Generation::JsonRpc,
            json!({"name": "power_switch", "form_factor": "3x2", "serial_number": 5}),
        )
        .with_layout(ReservedLayout::DeviceInfoFirst)
        .method("toggle", 4, |_| Ok(json!(true)));
        let ports = MockPorts::new().with_device("MOCK0", device);
        let mut session = Session::open(&ports, "MOCK0", &options()).unwrap();

        assert_eq!(session.identity().name, Some("power_switch".into()));
        assert_eq!(
            ports.opened_on("MOCK0")[0].written_lines(),
            vec!["[0]\n", "[1]\n"]
        );
        assert_eq!(session.invoke("toggle", ()).unwrap(), json!(true));
    }

    #[test]
    fn test_explicit_listing_id_and_identity() {
        let device = MockDevice::new(
            Generation::StatusCode,
            json!({"model_number": 1130, "serial_number": 2}),
        )
        .method("getCount", 7, |_| Ok(json!(12)));
        let ports = MockPorts::new().with_device("MOCK0", device);
        let options = options()
            .with_generation(GenerationSetting::StatusCode)
            .with_list_methods_id(1)
            .with_identity_query(IdentityQuery::Id(0));
        let session = Session::open(&ports, "MOCK0", &options).unwrap();

        assert_eq!(session.identity().name, Some(1130.into()));
        // listing, response codes, identity
        assert_eq!(
            ports.opened_on("MOCK0")[0].written_lines(),
            vec!["[1]\n", "[2]\n", "[0]\n"]
        );
    }

    #[test]
    fn test_forced_layout_mismatch_fails_handshake() {
        let ports = MockPorts::new().with_device("MOCK0", json_rpc_device());
        let options = options().with_layout(ReservedLayout::DeviceInfoFirst);
        // The listing at id 0 carries no identity keys
        assert!(matches!(
            Session::open(&ports, "MOCK0", &options),
            Err(DeviceError::Handshake { .. })
        ));
    }

    #[test]
    fn test_status_code_device_error() {
        let device = MockDevice::new(Generation::StatusCode, json!({"name": "x", "serial_number": 1}))
            .method("fail", 9, |_| Err("bad channel".to_string()));
        let ports = MockPorts::new().with_device("MOCK0", device);
        let mut session = Session::open(&ports, "MOCK0", &options()).unwrap();

        match session.invoke("fail", ()).unwrap_err() {
            DeviceError::DeviceReported(report) => {
                assert_eq!(report.message.as_deref(), Some("bad channel"))
            }
            other => panic!("unexpected error: {other:?}"),
        }
        // Device errors leave the session usable
        assert!(session.is_open());
    }

    #[test]
    fn test_named_arguments_follow_declared_positions() {
        let ports = MockPorts::new().with_device("MOCK0", json_rpc_device());
        let mut session = Session::open(&ports, "MOCK0", &options()).unwrap();
        let port = ports.opened_on("MOCK0")[0].clone();
        port.clear_write_log();

        let mut named = Map::new();
        named.insert("state".into(), json!(true));
        named.insert("led".into(), json!(2));
        let result = session.invoke("set_led", named).unwrap();
        session.invoke("setLed", vec![json!(2), json!(true)]).unwrap();

        assert_eq!(result, json!([2, true]));
        let writes = port.get_write_log();
        assert_eq!(writes[0], writes[1]);
        assert_eq!(port.written_lines()[0], "[3,2,true]\n");
    }

    #[test]
    fn test_named_arguments_without_order_are_rejected() {
        let ports = MockPorts::new().with_device("MOCK0", json_rpc_device());
        let mut session = Session::open(&ports, "MOCK0", &options()).unwrap();
        let port = ports.opened_on("MOCK0")[0].clone();
        port.clear_write_log();

        let err = session
            .invoke("get_led_count", json!({"x": 1}))
            .unwrap_err();
        assert!(matches!(err, DeviceError::InvalidArguments { .. }));
        assert!(port.get_write_log().is_empty());
    }

    #[test]
    fn test_host_declared_parameter_order() {
        let ports = MockPorts::new().with_device("MOCK0", json_rpc_device());
        let options = options().with_parameter_order("getLedCount", [("bank", 0usize)]);
        let mut session = Session::open(&ports, "MOCK0", &options).unwrap();
        assert_eq!(
            session.invoke("get_led_count", json!({"bank": 1})).unwrap(),
            json!(8)
        );
    }

    #[test]
    fn test_unknown_method() {
        let ports = MockPorts::new().with_device("MOCK0", json_rpc_device());
        let mut session = Session::open(&ports, "MOCK0", &options()).unwrap();
        assert!(matches!(
            session.invoke("launch", ()),
            Err(DeviceError::UnknownMethod(_))
        ));
        assert!(matches!(
            session.invoke(99u64, ()),
            Err(DeviceError::UnknownMethod(_))
        ));
    }

    #[test]
    fn test_call_by_wire_name() {
        let ports = MockPorts::new().with_device("MOCK0", json_rpc_device());
        let mut session = Session::open(&ports, "MOCK0", &options()).unwrap();
        let port = ports.opened_on("MOCK0")[0].clone();
        port.clear_write_log();

        assert_eq!(
            session.call_by_wire_name("get_led_count", ()).unwrap(),
            json!(8)
        );
        assert_eq!(port.written_lines(), vec!["[\"getLedCount\"]\n"]);
    }

    #[test]
    fn test_send_json_request() {
        let ports = MockPorts::new().with_device("MOCK0", json_rpc_device());
        let mut session = Session::open(&ports, "MOCK0", &options()).unwrap();
        let port = ports.opened_on("MOCK0")[0].clone();
        port.clear_write_log();

        let result = session.send_json_request(r#"["set_led", 1, false]"#).unwrap();
        assert_eq!(result, json!([1, false]));
        assert_eq!(port.written_lines(), vec!["[\"setLed\",1,false]\n"]);

        assert_eq!(session.send_json_request("[4]").unwrap(), json!(8));
        assert!(matches!(
            session.send_json_request("{}"),
            Err(DeviceError::InvalidArguments { .. })
        ));
    }

    #[test]
    fn test_id_mismatch_is_a_protocol_error() {
        let ports = MockPorts::new().with_device("MOCK0", json_rpc_device());
        let mut session = Session::open(&ports, "MOCK0", &options()).unwrap();
        let port = ports.opened_on("MOCK0")[0].clone();
        // Replace the device: answer everything with a foreign id
        let port = port.with_responder(|_| vec![r#"{"id":42,"result":1}"#.to_string()]);

        let err = session.invoke("get_led_count", ()).unwrap_err();
        assert!(matches!(
            err,
            DeviceError::Protocol(ProtocolError::IdMismatch { .. })
        ));
        assert!(!port.is_closed());
    }

    #[test]
    fn test_close_prevents_io() {
        let ports = MockPorts::new().with_device("MOCK0", json_rpc_device());
        let mut session = Session::open(&ports, "MOCK0", &options()).unwrap();
        let port = ports.opened_on("MOCK0")[0].clone();
        let writes_before = port.get_write_log().len();

        session.close();
        session.close();
        assert_eq!(session.state(), SessionState::Closed);
        assert!(matches!(
            session.invoke("get_led_count", ()),
            Err(DeviceError::ClosedSession(_))
        ));
        assert!(matches!(
            session.send_json_request("[4]"),
            Err(DeviceError::ClosedSession(_))
        ));
        assert!(port.is_closed());
        assert_eq!(port.io_after_close(), 0);
        assert_eq!(port.get_write_log().len(), writes_before);
    }

    #[test]
    fn test_transport_failure_closes_session() {
        let ports = MockPorts::new().with_device("MOCK0", json_rpc_device());
        let mut session = Session::open(&ports, "MOCK0", &options()).unwrap();
        ports.opened_on("MOCK0")[0].fail_next_read();

        assert!(matches!(
            session.invoke("get_led_count", ()),
            Err(DeviceError::Transport(_))
        ));
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[test]
    fn test_drop_releases_port() {
        let ports = MockPorts::new().with_device("MOCK0", json_rpc_device());
        {
            let _session = Session::open(&ports, "MOCK0", &options()).unwrap();
        }
        assert!(ports.opened_on("MOCK0")[0].is_closed());
    }

    #[test]
    fn test_silent_device_fails_handshake_and_releases_port() {
        let ports = MockPorts::new().with_device("MOCK0", json_rpc_device().silent());
        let err = Session::open(&ports, "MOCK0", &options()).unwrap_err();
        match err {
            DeviceError::Handshake { source, .. } => assert!(matches!(
                *source,
                DeviceError::Protocol(ProtocolError::EmptyResponse)
            )),
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(ports.opened_on("MOCK0")[0].is_closed());
    }

    #[test]
    fn test_open_failure() {
        let ports = MockPorts::new().with_unavailable("MOCK0", "busy");
        assert!(matches!(
            Session::open(&ports, "MOCK0", &options()),
            Err(DeviceError::TransportOpen { .. })
        ));
    }

    #[test]
    fn test_args_from_value() {
        assert_eq!(Args::from(json!([1, 2])), Args::Positional(vec![json!(1), json!(2)]));
        assert_eq!(Args::from(json!(null)), Args::none());
        assert_eq!(Args::from(json!(5)), Args::Positional(vec![json!(5)]));
        assert!(matches!(Args::from(json!({"a": 1})), Args::Named(_)));
    }
}
