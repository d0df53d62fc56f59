use crate::config::ClientConfig;
use crate::connection::Connection;
use crate::error::{Result, WebOsError};
use crate::handshake;
use crate::input::InputChannel;
use crate::keepalive::{self, PowerGate};
use crate::protocol::ExchangeKind;
use crate::state::{Observer, ObserverId, Observers, StateAggregator};
use crate::storage::{CredentialStore, FileStore};
use crate::subscription::{Subscription, SubscriptionHandler, SubscriptionId};
use crate::transport;
use crate::types::{AppId, DeviceState, PowerState};
use crate::volume::VolumeGate;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::{watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

/// Where the connection lifecycle currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionPhase {
    Idle,
    Connecting,
    Handshaking,
    Active,
    Closing,
}

/// Everything that exists only while connected
///
/// Built fresh by every connect and dropped by teardown.
pub(crate) struct Session {
    pub(crate) connection: Arc<Connection>,
    pub(crate) state: Arc<StateAggregator>,
    pub(crate) input: InputChannel,
}

type Outcome = watch::Sender<Option<Result<()>>>;

/// Settle the connect outcome unless it already is
fn resolve(outcome: &Outcome, result: Result<()>) {
    outcome.send_if_modified(|slot| {
        if slot.is_some() {
            return false;
        }
        *slot = Some(result);
        true
    });
}

/// How the lifecycle task ended
enum Exit {
    Stopped,
    Finished(Result<()>),
}

/// State shared between the client and its lifecycle task
struct Inner {
    host: String,
    config: ClientConfig,
    storage: Arc<dyn CredentialStore>,
    observers: Arc<Observers>,
    volume: VolumeGate,
    phase: Mutex<ConnectionPhase>,
    last_error: Mutex<Option<WebOsError>>,
    client_key: Mutex<Option<String>>,
    session: RwLock<Option<Arc<Session>>>,
}

impl Inner {
    fn phase(&self) -> ConnectionPhase {
        *self.phase.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_phase(&self, phase: ConnectionPhase) {
        tracing::debug!("[{}] Connection phase {:?}", self.host, phase);
        *self.phase.lock().unwrap_or_else(|e| e.into_inner()) = phase;
    }

    fn session(&self) -> Option<Arc<Session>> {
        self.session.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Open, pair, bootstrap, then run until the connection ends
    ///
    /// Returns `Ok` only when a power-off report ended an established
    /// connection.
    async fn establish(&self, outcome: &Arc<Outcome>) -> Result<()> {
        let url = self.config.url(&self.host);
        let mut ws = transport::open(&url, self.config.connect_timeout).await?;

        self.set_phase(ConnectionPhase::Handshaking);
        let stored = match self.config.client_key.clone() {
            Some(key) => Some(key),
            None => self.storage.get(&self.host).await?,
        };
        let registration =
            handshake::register(&mut ws, stored.as_deref(), self.config.hello_probe).await?;

        if registration.newly_paired {
            tracing::info!("[{}] Paired, storing client key", self.host);
            if let Err(e) = self.storage.set(&self.host, &registration.client_key).await {
                tracing::warn!("[{}] Could not store client key: {}", self.host, e);
            }
        }
        *self.client_key.lock().unwrap_or_else(|e| e.into_inner()) =
            Some(registration.client_key.clone());

        let connection = Arc::new(Connection::start(ws, self.config.request_timeout));
        let state = Arc::new(StateAggregator::new(connection.clone(), self.observers.clone()));
        state.set_hello_info(registration.hello_info);

        let failed_outcome = outcome.clone();
        let input = InputChannel::new(
            self.config.connect_timeout,
            self.config.keepalive(),
            state.clone() as Arc<dyn PowerGate>,
            Box::new(move |e| resolve(&failed_outcome, Err(e.clone()))),
        );

        *self.session.write().unwrap_or_else(|e| e.into_inner()) = Some(Arc::new(Session {
            connection: connection.clone(),
            state: state.clone(),
            input,
        }));

        let keepalive_settings = self.config.keepalive();
        let keepalive = async {
            match keepalive_settings {
                Some((interval, ping_timeout)) => {
                    keepalive::supervise(connection.link(), state.as_ref(), interval, ping_timeout)
                        .await
                }
                None => std::future::pending::<WebOsError>().await,
            }
        };
        tokio::pin!(keepalive);

        tokio::select! {
            biased;
            _ = connection.link().closed() => return Err(WebOsError::ConnectionClosed),
            err = &mut keepalive => return Err(err),
            _ = state.power_off().cancelled() => return Err(WebOsError::Cancelled),
            result = state.bootstrap(&self.config.states) => result?,
        }

        state.go_live().await;
        self.set_phase(ConnectionPhase::Active);
        *self.last_error.lock().unwrap_or_else(|e| e.into_inner()) = None;
        resolve(outcome, Ok(()));
        tracing::info!("[{}] Connected", self.host);

        tokio::select! {
            _ = connection.link().closed() => Err(WebOsError::ConnectionClosed),
            err = &mut keepalive => Err(err),
            _ = state.power_off().cancelled() => Ok(()),
        }
    }

    /// Release the session and tell observers the state is gone
    ///
    /// Every step is bounded by the teardown grace period.
    async fn teardown(&self) {
        let grace = self.config.teardown_grace;
        let session = self.session.write().unwrap_or_else(|e| e.into_inner()).take();

        if let Some(session) = session {
            // Fails an in-flight socket path lookup, which frees the input slot
            session.connection.shutdown(grace).await;
            if timeout(grace, session.input.close()).await.is_err() {
                tracing::warn!("[{}] Input socket did not close within {:?}", self.host, grace);
            }
            session.state.shutdown(grace).await;
        }

        if timeout(grace, self.observers.notify(DeviceState::default()))
            .await
            .is_err()
        {
            tracing::warn!("[{}] Observers did not finish within {:?}", self.host, grace);
        }
        self.observers.clear();
    }
}

/// Drive one connection from open to teardown
async fn run(inner: Arc<Inner>, outcome: Arc<Outcome>, stop: CancellationToken) {
    let exit = tokio::select! {
        biased;
        _ = stop.cancelled() => Exit::Stopped,
        result = inner.establish(&outcome) => Exit::Finished(result),
    };

    inner.set_phase(ConnectionPhase::Closing);
    match &exit {
        Exit::Stopped => tracing::info!("[{}] Disconnecting", inner.host),
        Exit::Finished(Ok(())) => tracing::info!("[{}] TV powered off", inner.host),
        Exit::Finished(Err(e)) => {
            tracing::error!("[{}] Connection ended: {}", inner.host, e);
            *inner.last_error.lock().unwrap_or_else(|e| e.into_inner()) = Some(e.clone());
        }
    }

    inner.teardown().await;

    let result = match exit {
        Exit::Finished(Err(e)) => Err(e),
        _ => Err(WebOsError::Cancelled),
    };
    inner.set_phase(ConnectionPhase::Idle);
    resolve(&outcome, result);
    tracing::debug!("[{}] Teardown complete", inner.host);
}

#[derive(Default)]
struct Lifecycle {
    task: Option<JoinHandle<()>>,
    outcome: Option<watch::Receiver<Option<Result<()>>>>,
    stop: CancellationToken,
}

/// Client for an LG webOS TV
///
/// The client keeps one control connection open between [`connect`] and
/// [`disconnect`], pairs on first use, and keeps a [`DeviceState`] snapshot
/// current in the background.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use webos_tv::{ClientConfig, FileStore, WebOsClient};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let client = WebOsClient::with_config(
///         "192.168.1.50",
///         ClientConfig::default(),
///         Arc::new(FileStore::default_location()),
///     );
///     client.connect().await?;
///     println!("Volume: {:?}", client.volume());
///     client.set_mute(true).await?;
///     client.disconnect().await;
///     Ok(())
/// }
/// ```
///
/// [`connect`]: WebOsClient::connect
/// [`disconnect`]: WebOsClient::disconnect
pub struct WebOsClient {
    inner: Arc<Inner>,
    lifecycle: AsyncMutex<Lifecycle>,
}

impl WebOsClient {
    /// Client with default settings, storing keys in the default key file
    pub fn new(host: impl Into<String>) -> Self {
        Self::with_config(
            host,
            ClientConfig::default(),
            Arc::new(FileStore::default_location()),
        )
    }

    /// Client with explicit settings and credential store
    pub fn with_config(
        host: impl Into<String>,
        config: ClientConfig,
        storage: Arc<dyn CredentialStore>,
    ) -> Self {
        let volume = VolumeGate::new(
            config.volume_step_delay,
            config.delayed_sound_outputs.clone(),
        );
        Self {
            inner: Arc::new(Inner {
                host: host.into(),
                config,
                storage,
                observers: Arc::new(Observers::default()),
                volume,
                phase: Mutex::new(ConnectionPhase::Idle),
                last_error: Mutex::new(None),
                client_key: Mutex::new(None),
                session: RwLock::new(None),
            }),
            lifecycle: AsyncMutex::new(Lifecycle::default()),
        }
    }

    /// TV address this client connects to
    pub fn host(&self) -> &str {
        &self.inner.host
    }

    /// Settings this client was built with
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Credential store used for client keys
    pub fn storage(&self) -> &Arc<dyn CredentialStore> {
        &self.inner.storage
    }

    /// Connect, pair if needed, and bootstrap the state snapshot
    ///
    /// Calling this while a connection is being established or is active
    /// returns the outcome of that connection instead of opening another.
    pub async fn connect(&self) -> Result<()> {
        let mut outcome = {
            let mut lifecycle = self.lifecycle.lock().await;

            let reusable = lifecycle.task.as_ref().is_some_and(|t| !t.is_finished())
                && matches!(
                    self.inner.phase(),
                    ConnectionPhase::Connecting
                        | ConnectionPhase::Handshaking
                        | ConnectionPhase::Active
                );

            match (reusable, lifecycle.outcome.clone()) {
                (true, Some(outcome)) => outcome,
                _ => {
                    // A previous connection may still be closing
                    if let Some(previous) = lifecycle.task.take() {
                        let _ = previous.await;
                    }

                    let (tx, rx) = watch::channel(None);
                    let stop = CancellationToken::new();
                    self.inner.set_phase(ConnectionPhase::Connecting);
                    lifecycle.task = Some(tokio::spawn(run(
                        self.inner.clone(),
                        Arc::new(tx),
                        stop.clone(),
                    )));
                    lifecycle.outcome = Some(rx.clone());
                    lifecycle.stop = stop;
                    rx
                }
            }
        };

        let result = match outcome.wait_for(Option::is_some).await {
            Ok(slot) => slot.clone().unwrap_or(Err(WebOsError::Cancelled)),
            Err(_) => Err(WebOsError::Cancelled),
        };
        result
    }

    /// Tear the connection down and wait until teardown has finished
    ///
    /// Does nothing when not connected. Must not be awaited from a
    /// subscription handler or observer of this client.
    pub async fn disconnect(&self) {
        let task = {
            let mut lifecycle = self.lifecycle.lock().await;
            lifecycle.stop.cancel();
            lifecycle.task.take()
        };
        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::warn!("[{}] Connection task failed: {}", self.inner.host, e);
            }
        }
    }

    /// Whether a connection is being established or is active
    pub fn is_connected(&self) -> bool {
        matches!(
            self.inner.phase(),
            ConnectionPhase::Connecting | ConnectionPhase::Handshaking | ConnectionPhase::Active
        )
    }

    /// Whether the TV accepted a client key on the current connection
    pub fn is_paired(&self) -> bool {
        self.inner.session().is_some() && self.client_key().is_some()
    }

    /// Client key from the last successful registration
    pub fn client_key(&self) -> Option<String> {
        self.inner
            .client_key
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Current lifecycle phase
    pub fn connection_phase(&self) -> ConnectionPhase {
        self.inner.phase()
    }

    /// Error that ended the last connection, cleared on the next success
    pub fn last_error(&self) -> Option<WebOsError> {
        self.inner
            .last_error
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub(crate) fn session(&self) -> Result<Arc<Session>> {
        self.inner.session().ok_or(WebOsError::NotConnected)
    }

    /// Send an exchange of the given kind
    ///
    /// Commands return `Null` as soon as the frame is queued; requests return
    /// the response payload.
    pub async fn send(
        &self,
        kind: ExchangeKind,
        uri: &str,
        payload: Option<Value>,
    ) -> Result<Value> {
        self.session()?.connection.send(kind, uri, payload).await
    }

    /// Send a request and wait for its payload
    pub async fn request(&self, uri: &str, payload: Option<Value>) -> Result<Value> {
        self.session()?.connection.request(uri, payload).await
    }

    /// Send a fire-and-forget command
    pub async fn command(&self, uri: &str, payload: Option<Value>) -> Result<()> {
        self.send(ExchangeKind::Command, uri, payload).await.map(|_| ())
    }

    /// Subscribe to a target
    ///
    /// Resolves once the first payload has been handed to `handler`.
    pub async fn subscribe(
        &self,
        uri: &str,
        payload: Option<Value>,
        handler: SubscriptionHandler,
    ) -> Result<Subscription> {
        self.session()?
            .connection
            .subscribe(uri, payload, handler)
            .await
    }

    /// Stop a subscription and wait for its running handler
    pub async fn unsubscribe(&self, id: SubscriptionId) -> Result<()> {
        self.session()?.connection.unsubscribe(id).await
    }

    /// Outstanding requests and active subscriptions on the current
    /// connection
    pub fn outstanding(&self) -> (usize, usize) {
        self.inner
            .session()
            .map(|s| s.connection.outstanding())
            .unwrap_or_default()
    }

    /// Register an observer for snapshot changes
    ///
    /// When the snapshot is already live the observer is called once before
    /// this returns. Observers are dropped at teardown.
    pub async fn register_observer(&self, observer: Observer) -> ObserverId {
        let id = self.inner.observers.add(observer.clone());
        if let Some(session) = self.inner.session().filter(|s| s.state.is_live()) {
            observer(session.state.snapshot()).await;
        }
        id
    }

    /// Remove an observer; false when it was not registered
    pub fn unregister_observer(&self, id: ObserverId) -> bool {
        self.inner.observers.remove(id)
    }

    /// Remove every observer
    pub fn clear_observers(&self) {
        self.inner.observers.clear();
    }

    fn read<T: Default>(&self, f: impl FnOnce(&DeviceState) -> T) -> T {
        match self.inner.session() {
            Some(session) => session.state.read(f),
            None => T::default(),
        }
    }

    /// Copy of the whole snapshot
    pub fn state(&self) -> DeviceState {
        self.read(DeviceState::clone)
    }

    /// Last reported power state
    pub fn power_state(&self) -> Option<PowerState> {
        self.read(|s| s.power.clone())
    }

    /// Whether the TV is powered on
    pub fn is_on(&self) -> bool {
        self.read(DeviceState::is_on)
    }

    /// Whether the TV is on with the screen lit
    pub fn is_screen_on(&self) -> bool {
        self.read(DeviceState::is_screen_on)
    }

    /// Foreground app id
    pub fn current_app_id(&self) -> Option<AppId> {
        self.read(|s| s.current_app_id.clone())
    }

    /// Mute state
    pub fn muted(&self) -> Option<bool> {
        self.read(|s| s.muted)
    }

    /// Volume level
    pub fn volume(&self) -> Option<i64> {
        self.read(|s| s.volume)
    }

    /// Current live TV channel
    pub fn current_channel(&self) -> Option<Value> {
        self.read(|s| s.current_channel.clone())
    }

    /// Program info for the current channel
    pub fn channel_info(&self) -> Option<Value> {
        self.read(|s| s.channel_info.clone())
    }

    /// Live TV channel list
    pub fn channels(&self) -> Option<Value> {
        self.read(|s| s.channels.clone())
    }

    /// Launch points keyed by app id
    pub fn apps(&self) -> BTreeMap<AppId, Value> {
        self.read(|s| s.apps.clone())
    }

    /// External inputs keyed by app id
    pub fn inputs(&self) -> BTreeMap<AppId, Value> {
        self.read(|s| s.inputs.clone())
    }

    /// Active sound output, e.g. `tv_speaker`
    pub fn sound_output(&self) -> Option<String> {
        self.read(|s| s.sound_output.clone())
    }

    /// Picture settings as last reported
    pub fn picture_settings(&self) -> Option<Value> {
        self.read(|s| s.picture_settings.clone())
    }

    /// System info fetched at connect
    pub fn system_info(&self) -> Option<Value> {
        self.read(|s| s.system_info.clone())
    }

    /// Software info fetched at connect
    pub fn software_info(&self) -> Option<Value> {
        self.read(|s| s.software_info.clone())
    }

    /// Hello payload, when the hello probe is enabled
    pub fn hello_info(&self) -> Option<Value> {
        self.read(|s| s.hello_info.clone())
    }

    /// Send a message over the pointer input socket
    pub(crate) async fn send_input(&self, message: String) -> Result<()> {
        let session = self.session()?;
        session.input.send(&session.connection, message).await
    }

    /// Send a volume step through the gate
    pub(crate) async fn volume_step(&self, uri: &str) -> Result<Value> {
        let session = self.session()?;
        self.inner
            .volume
            .step(session.connection.request(uri, None), || {
                session.state.read(|s| s.sound_output.clone())
            })
            .await
    }
}

impl Drop for WebOsClient {
    fn drop(&mut self) {
        self.lifecycle.get_mut().stop.cancel();
    }
}
