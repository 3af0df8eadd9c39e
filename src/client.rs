use crate::connection::{Connector, TcpConnector};
use crate::error::{QscError, Result};
use crate::pool::ConnectionPool;
use crate::protocol::{self, ControlGetResponse, ControlSetResponse, Request, StatusGetResponse};
use crate::types::{self, ControlValue, DeviceInfo, StatusRecord, ZERO_VOLUME_DB};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{timeout_at, Instant};

/// TCP port of the Q-SYS remote control (QRC) interface
pub const QRC_PORT: u16 = 1710;

const DEFAULT_TTL: Duration = Duration::from_secs(30);
const DEFAULT_REUSE_DELAY: Duration = Duration::from_millis(500);
const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(3);

const STATUS_OPERATION: &str = "StatusGet";

fn get_operation(name: &str) -> String {
    format!("Control.Get {}", name)
}

fn set_operation(name: &str) -> String {
    format!("Control.Set {}", name)
}

/// Options for the connections a [`QscClient`] opens
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// TCP port to dial
    pub port: u16,
    /// Connections older than this are closed instead of reused
    pub ttl: Duration,
    /// Minimum time a connection rests between two requests
    pub reuse_delay: Duration,
    /// Bound on dialing and the greeting when the caller set no deadline
    pub dial_timeout: Duration,
    /// Bound on one request/response exchange when the caller set no deadline
    pub io_timeout: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            port: QRC_PORT,
            ttl: DEFAULT_TTL,
            reuse_delay: DEFAULT_REUSE_DELAY,
            dial_timeout: DEFAULT_DIAL_TIMEOUT,
            io_timeout: DEFAULT_IO_TIMEOUT,
        }
    }
}

impl ClientOptions {
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_reuse_delay(mut self, reuse_delay: Duration) -> Self {
        self.reuse_delay = reuse_delay;
        self
    }

    pub fn with_dial_timeout(mut self, dial_timeout: Duration) -> Self {
        self.dial_timeout = dial_timeout;
        self
    }

    pub fn with_io_timeout(mut self, io_timeout: Duration) -> Self {
        self.io_timeout = io_timeout;
        self
    }
}

struct ClientInner {
    address: String,
    options: ClientOptions,
    pool: ConnectionPool,
}

/// Client for one Q-SYS core
///
/// Every operation is one request/response exchange on a pooled connection.
/// Cloning is cheap and clones share the same pool.
///
/// # Example
///
/// ```no_run
/// use qsc_control::QscClient;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let client = QscClient::new("10.5.34.20");
///     client.set_volume("MainGain", 40).await?;
///     client.set_mute("MainMute", false).await?;
///
///     let volumes = client.volumes(&["MainGain", "LobbyGain"]).await?;
///     println!("{:?}", volumes);
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct QscClient {
    inner: Arc<ClientInner>,
    deadline: Option<Instant>,
}

impl QscClient {
    /// Client for the core at `address` with default options
    ///
    /// No connection is opened until the first operation.
    pub fn new(address: impl Into<String>) -> Self {
        Self::with_options(address, ClientOptions::default())
    }

    pub fn with_options(address: impl Into<String>, options: ClientOptions) -> Self {
        let address = address.into();
        let connector = TcpConnector::new(address.clone(), options.port);
        Self::with_connector(address, options, Arc::new(connector))
    }

    /// Client whose connections come from a custom [`Connector`]
    pub fn with_connector(
        address: impl Into<String>,
        options: ClientOptions,
        connector: Arc<dyn Connector>,
    ) -> Self {
        let pool = ConnectionPool::new(connector, &options);
        Self {
            inner: Arc::new(ClientInner {
                address: address.into(),
                options,
                pool,
            }),
            deadline: None,
        }
    }

    /// Address of the core
    pub fn address(&self) -> &str {
        &self.inner.address
    }

    pub fn options(&self) -> &ClientOptions {
        &self.inner.options
    }

    /// The pool behind this client
    pub fn pool(&self) -> &ConnectionPool {
        &self.inner.pool
    }

    /// A handle on the same core whose operations give up at `deadline`
    ///
    /// ```no_run
    /// # use qsc_control::QscClient;
    /// # use std::time::Duration;
    /// # #[tokio::main]
    /// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
    /// let client = QscClient::new("10.5.34.20");
    /// let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    /// let level = client.with_deadline(deadline).volume("MainGain").await?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        Self {
            inner: self.inner.clone(),
            deadline: Some(deadline),
        }
    }

    // ========== Generic Controls ==========

    /// Read the numeric value of a named control
    pub async fn control(&self, name: &str) -> Result<f64> {
        tracing::info!(address = %self.address(), name, "Getting control");

        let operation = get_operation(name);
        let response: ControlGetResponse = self
            .round_trip(&Request::control_get(name), &operation)
            .await?;
        response
            .into_result()
            .and_then(|results| {
                results
                    .into_iter()
                    .find(|result| result.name == name)
                    .map(|result| result.value)
                    .ok_or_else(|| QscError::ControlNotFound(name.to_string()))
            })
            .map_err(self.context(operation))
    }

    /// Write the numeric value of a named control
    pub async fn set_control(&self, name: &str, value: f64) -> Result<()> {
        tracing::info!(address = %self.address(), name, value, "Setting control");
        self.write_control(name, value).await?;
        Ok(())
    }

    // ========== Volume ==========

    /// Read gain controls as volume percentages
    ///
    /// Controls are read one at a time, in order. The first failure fails the
    /// whole call.
    pub async fn volumes<S: AsRef<str>>(&self, names: &[S]) -> Result<BTreeMap<String, u32>> {
        let mut volumes = BTreeMap::new();
        for name in names {
            let name = name.as_ref();
            let db = self.control(name).await?;
            volumes.insert(name.to_string(), types::db_to_percent(db));
        }

        tracing::debug!(address = %self.address(), ?volumes, "Got volumes");
        Ok(volumes)
    }

    /// Read one gain control as a volume percentage
    pub async fn volume(&self, name: &str) -> Result<u32> {
        Ok(types::db_to_percent(self.control(name).await?))
    }

    /// Set a gain control from a volume percentage
    pub async fn set_volume(&self, name: &str, percent: u32) -> Result<()> {
        let db = if percent == 0 {
            ZERO_VOLUME_DB
        } else {
            types::percent_to_db(percent)
        };

        tracing::info!(address = %self.address(), name, percent, db, "Setting volume");
        self.write_control(name, db).await?;
        Ok(())
    }

    // ========== Mute ==========

    /// Read mute controls
    ///
    /// Same ordering and failure rules as [`volumes`](Self::volumes).
    pub async fn mutes<S: AsRef<str>>(&self, names: &[S]) -> Result<BTreeMap<String, bool>> {
        let mut mutes = BTreeMap::new();
        for name in names {
            let name = name.as_ref();
            mutes.insert(name.to_string(), self.mute(name).await?);
        }

        tracing::debug!(address = %self.address(), ?mutes, "Got mutes");
        Ok(mutes)
    }

    /// Read one mute control
    pub async fn mute(&self, name: &str) -> Result<bool> {
        let value = self.control(name).await?;
        types::mute_from_value(name, value).map_err(self.context(get_operation(name)))
    }

    /// Set a mute control
    pub async fn set_mute(&self, name: &str, mute: bool) -> Result<()> {
        tracing::info!(address = %self.address(), name, mute, "Setting mute");

        let echoed = self.write_control(name, types::mute_to_value(mute)).await?;
        types::mute_from_value(name, echoed.value).map_err(self.context(set_operation(name)))?;
        Ok(())
    }

    // ========== Status ==========

    /// Fetch the engine status of the core
    pub async fn status(&self) -> Result<StatusRecord> {
        let (response, _) = self.status_response().await?;
        response.into_result().map_err(self.context(STATUS_OPERATION))
    }

    /// Identity and state of the core
    ///
    /// The IP address is that of the connection the status request went out
    /// on. The hostname falls back to the IP address when reverse lookup fails.
    pub async fn info(&self) -> Result<DeviceInfo> {
        let (response, ip) = self.status_response().await?;
        let raw_state = serde_json::to_string(&response)
            .map_err(|e| QscError::from(e).context(self.address(), STATUS_OPERATION))?;
        let status = response.into_result().map_err(self.context(STATUS_OPERATION))?;

        let hostname = self.reverse_lookup(ip).await;

        Ok(DeviceInfo {
            hostname,
            model_name: status.platform,
            ip_address: ip.to_string(),
            state: status.state,
            status_code: status.status.code,
            status: status.status.string,
            raw_state,
        })
    }

    /// Succeeds when the core answers a status request
    pub async fn healthy(&self) -> Result<()> {
        self.status().await.map(|_| ()).inspect_err(|e| {
            tracing::warn!(address = %self.address(), "Failed health check: {}", e);
        })
    }

    async fn status_response(&self) -> Result<(StatusGetResponse, IpAddr)> {
        tracing::info!(address = %self.address(), "Getting status");
        self.exchange(&Request::status_get(), STATUS_OPERATION).await
    }

    /// `Control.Set` round trip, returning the echoed record once its name is checked
    async fn write_control(&self, name: &str, value: f64) -> Result<ControlValue> {
        let operation = set_operation(name);
        let response: ControlSetResponse = self
            .round_trip(&Request::control_set(name, value), &operation)
            .await?;
        let echoed = response.into_result().map_err(self.context(operation.as_str()))?;

        if echoed.name != name {
            tracing::error!(address = %self.address(), sent = name, received = %echoed.name, "Name mismatch");
            let err = QscError::NameMismatch {
                sent: name.to_string(),
                received: echoed.name,
            };
            return Err(err.context(self.address(), operation));
        }
        Ok(echoed)
    }

    async fn round_trip<P, R>(
        &self,
        request: &Request<P>,
        operation: &str,
    ) -> Result<protocol::Response<R>>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        Ok(self.exchange(request, operation).await?.0)
    }

    /// Write `request` and decode the answer on one pooled connection,
    /// returning it with the IP address the connection reached.
    ///
    /// Transport errors close the connection. Decoding happens after the
    /// connection is back in the pool, so a bad answer does not cost it.
    async fn exchange<P, R>(
        &self,
        request: &Request<P>,
        operation: &str,
    ) -> Result<(protocol::Response<R>, IpAddr)>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        let frame = request.encode().map_err(self.context(operation))?;
        let deadline = self.deadline;
        let io_timeout = self.inner.options.io_timeout;

        let (payload, ip) = self
            .inner
            .pool
            .with_connection(deadline, move |conn| {
                Box::pin(async move {
                    let deadline = deadline.unwrap_or_else(|| Instant::now() + io_timeout);
                    conn.round_trip(&frame, deadline)
                        .await
                        .map(|payload| (payload, conn.remote_ip()))
                })
            })
            .await
            .map_err(self.context(operation))
            .inspect_err(|e| {
                tracing::error!(address = %self.address(), "Request failed: {}", e);
            })?;

        let response = protocol::decode_response(&payload).map_err(self.context(operation))?;
        Ok((response, ip))
    }

    /// Wraps an error with this core's address and `operation`
    fn context<'a>(
        &'a self,
        operation: impl Into<String> + 'a,
    ) -> impl FnOnce(QscError) -> QscError + 'a {
        move |e| e.context(self.address(), operation)
    }

    async fn reverse_lookup(&self, ip: IpAddr) -> String {
        let deadline = self
            .deadline
            .unwrap_or_else(|| Instant::now() + self.inner.options.io_timeout);
        let lookup = tokio::task::spawn_blocking(move || dns_lookup::lookup_addr(&ip));

        match timeout_at(deadline, lookup).await {
            Ok(Ok(Ok(hostname))) => hostname.trim_matches('.').to_string(),
            Ok(Ok(Err(e))) => {
                tracing::debug!("Reverse lookup of {} failed: {}", ip, e);
                ip.to_string()
            }
            Ok(Err(e)) => {
                tracing::debug!("Reverse lookup of {} failed: {}", ip, e);
                ip.to_string()
            }
            Err(_) => {
                tracing::debug!("Reverse lookup of {} timed out", ip);
                ip.to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Connection;
    use futures_util::future::BoxFuture;
    use serde_json::{json, Value};
    use std::net::Ipv4Addr;
    use std::sync::Mutex;
    use tokio::io::{duplex, AsyncBufReadExt, AsyncWriteExt, BufReader};

    type Handler = Arc<dyn Fn(&Value) -> Value + Send + Sync>;

    /// In-memory core: records every request and answers with `handler`
    struct MockUnit {
        handler: Handler,
        requests: Arc<Mutex<Vec<Value>>>,
    }

    impl MockUnit {
        fn new(handler: impl Fn(&Value) -> Value + Send + Sync + 'static) -> Arc<Self> {
            Arc::new(Self {
                handler: Arc::new(handler),
                requests: Arc::new(Mutex::new(Vec::new())),
            })
        }

        fn requests(&self) -> Vec<Value> {
            self.requests.lock().unwrap().clone()
        }
    }

    impl Connector for MockUnit {
        fn connect(&self, deadline: Instant) -> BoxFuture<'_, Result<Connection>> {
            Box::pin(async move {
                let (client, unit) = duplex(64 * 1024);
                let handler = self.handler.clone();
                let requests = self.requests.clone();

                tokio::spawn(async move {
                    let mut unit = BufReader::new(unit);
                    unit.write_all(b"{\"jsonrpc\":\"2.0\",\"method\":\"EngineStatus\"}\0")
                        .await
                        .unwrap();

                    loop {
                        let mut frame = Vec::new();
                        match unit.read_until(0, &mut frame).await {
                            Ok(0) | Err(_) => return,
                            Ok(_) => {}
                        }
                        let request: Value =
                            serde_json::from_slice(protocol::trim_frame(&frame)).unwrap();
                        let response = handler(&request);
                        requests.lock().unwrap().push(request);

                        let mut bytes = serde_json::to_vec(&response).unwrap();
                        bytes.push(0);
                        if unit.write_all(&bytes).await.is_err() {
                            return;
                        }
                    }
                });

                Connection::establish(client, IpAddr::V4(Ipv4Addr::LOCALHOST), "mock", deadline)
                    .await
            })
        }
    }

    fn client(unit: &Arc<MockUnit>) -> QscClient {
        let options = ClientOptions::default().with_reuse_delay(Duration::ZERO);
        QscClient::with_connector("mock", options, unit.clone())
    }

    fn echo_set(request: &Value) -> Value {
        json!({
            "jsonrpc": "2.0",
            "id": 1,
            "result": { "Name": request["params"]["Name"], "Value": request["params"]["Value"] }
        })
    }

    fn get_result(name: &str, value: f64) -> Value {
        json!({
            "jsonrpc": "2.0",
            "id": 1,
            "result": [{ "Name": name, "Value": value, "String": "", "Position": 0.0 }]
        })
    }

    #[tokio::test]
    async fn test_set_volume_half() {
        let unit = MockUnit::new(echo_set);
        client(&unit).set_volume("MainGain", 50).await.unwrap();

        let requests = unit.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0]["method"], "Control.Set");
        assert_eq!(requests[0]["params"]["Name"], "MainGain");
        let sent = requests[0]["params"]["Value"].as_f64().unwrap();
        assert!((sent - (-6.0206)).abs() < 1e-4, "sent {}", sent);
    }

    #[tokio::test]
    async fn test_zero_volume_sends_minus_100() {
        let unit = MockUnit::new(echo_set);
        client(&unit).set_volume("MainGain", 0).await.unwrap();

        let requests = unit.requests();
        assert_eq!(requests[0]["params"]["Value"].as_f64(), Some(-100.0));
    }

    #[tokio::test]
    async fn test_get_control_without_results_is_not_found() {
        let unit = MockUnit::new(|_| json!({ "jsonrpc": "2.0", "id": 1, "result": [] }));
        let err = client(&unit).control("MainGain").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_get_control_ignores_other_names() {
        let unit = MockUnit::new(|_| get_result("AuxGain", -3.0));
        let err = client(&unit).control("MainGain").await.unwrap_err();
        assert!(matches!(err.root(), QscError::ControlNotFound(name) if name == "MainGain"));
    }

    #[tokio::test]
    async fn test_set_control_name_mismatch() {
        let unit = MockUnit::new(|request| {
            json!({
                "jsonrpc": "2.0",
                "id": 1,
                "result": { "Name": "SomethingElse", "Value": request["params"]["Value"] }
            })
        });
        let client = client(&unit);

        let err = client.set_control("MainGain", -10.0).await.unwrap_err();
        assert!(matches!(err.root(), QscError::NameMismatch { .. }));

        // The answer was well framed, so the connection is kept
        assert_eq!(client.pool().idle_count(), 1);
    }

    #[tokio::test]
    async fn test_mute_read_values() {
        let unit = MockUnit::new(|request| {
            let name = request["params"][0].as_str().unwrap_or_default().to_string();
            let value = match name.as_str() {
                "OnMute" => 1.0,
                "OffMute" => 0.0,
                _ => 0.5,
            };
            get_result(&name, value)
        });
        let client = client(&unit);

        assert!(client.mute("OnMute").await.unwrap());
        assert!(!client.mute("OffMute").await.unwrap());

        let err = client.mute("HalfMute").await.unwrap_err();
        assert!(err.is_protocol());
    }

    #[tokio::test]
    async fn test_set_mute_rejects_bad_echo() {
        let unit = MockUnit::new(|request| {
            json!({
                "jsonrpc": "2.0",
                "id": 1,
                "result": { "Name": request["params"]["Name"], "Value": 0.5 }
            })
        });
        let err = client(&unit).set_mute("MainMute", true).await.unwrap_err();
        assert!(matches!(err.root(), QscError::InvalidMute { .. }));
    }

    #[tokio::test]
    async fn test_unparseable_response() {
        let unit = MockUnit::new(|_| json!("not an envelope"));
        let err = client(&unit).status().await.unwrap_err();
        assert!(matches!(err.root(), QscError::Json(_)));
    }

    #[tokio::test]
    async fn test_set_echo_without_value_is_rejected() {
        let unit = MockUnit::new(|request| {
            json!({ "jsonrpc": "2.0", "id": 1, "result": { "Name": request["params"]["Name"] } })
        });
        let err = client(&unit).set_mute("MainMute", true).await.unwrap_err();
        assert!(matches!(err.root(), QscError::Json(_)), "got {}", err);
    }

    #[tokio::test]
    async fn test_errors_name_address_and_control() {
        let unit = MockUnit::new(|_| json!({ "jsonrpc": "2.0", "id": 1, "result": [] }));
        let err = client(&unit).control("MainGain").await.unwrap_err();

        assert_eq!(err.address(), Some("mock"));
        let message = err.to_string();
        assert!(message.contains("Control.Get MainGain"), "got {}", message);
        assert!(message.contains("mock"), "got {}", message);
    }

    #[tokio::test]
    async fn test_info_within_short_deadline() {
        let unit = MockUnit::new(|_| {
            json!({
                "jsonrpc": "2.0",
                "id": 1,
                "result": { "Platform": "Core 8 Flex", "State": "Active", "Status": { "Code": 0, "String": "OK" } }
            })
        });
        let client = QscClient::with_connector("mock", ClientOptions::default(), unit.clone());

        let deadline = Instant::now() + Duration::from_millis(400);
        let info = client.with_deadline(deadline).info().await.unwrap();
        assert_eq!(info.ip_address, "127.0.0.1");
        assert_eq!(info.model_name, "Core 8 Flex");
        assert_eq!(unit.requests().len(), 1);

        // The connection just used is inside its reuse delay, so a new one is dialed
        let deadline = Instant::now() + Duration::from_millis(400);
        client.with_deadline(deadline).info().await.unwrap();
        assert_eq!(client.pool().idle_count(), 2);
    }

    #[tokio::test]
    async fn test_deadline_applies_to_operations() {
        let unit = MockUnit::new(echo_set);
        let client = client(&unit);

        let past = Instant::now() - Duration::from_millis(1);
        let err = client.with_deadline(past).set_control("MainGain", 0.0).await.unwrap_err();
        assert!(err.is_transport());

        // The handle it was derived from has no deadline
        client.set_control("MainGain", 0.0).await.unwrap();
    }
}
