use crate::connection::Connection;
use crate::endpoints as ep;
use crate::error::{Result, WebOsError};
use crate::keepalive::PowerGate;
use crate::subscription::SubscriptionHandler;
use crate::types::{
    settings_query, DeviceState, PowerState, DEFAULT_PICTURE_KEYS, LIVE_TV_APP_ID, POWER_UNKNOWN,
};
use futures_util::future::{join_all, BoxFuture};
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

/// State channels that can be kept in the snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateChannel {
    SystemInfo,
    SoftwareInfo,
    Power,
    CurrentApp,
    Muted,
    Volume,
    Apps,
    Inputs,
    SoundOutput,
    PictureSettings,
}

/// How a channel is brought into the snapshot
enum Binding {
    /// Fetched once with a plain request
    Static(&'static str),
    /// Subscribed for the whole connection
    Dynamic(&'static str, Option<Value>),
}

impl StateChannel {
    /// Every channel, in bootstrap order
    pub const DEFAULTS: [StateChannel; 10] = [
        StateChannel::SystemInfo,
        StateChannel::SoftwareInfo,
        StateChannel::Power,
        StateChannel::CurrentApp,
        StateChannel::Muted,
        StateChannel::Volume,
        StateChannel::Apps,
        StateChannel::Inputs,
        StateChannel::SoundOutput,
        StateChannel::PictureSettings,
    ];

    /// Configuration name of the channel
    pub fn name(self) -> &'static str {
        match self {
            StateChannel::SystemInfo => "system_info",
            StateChannel::SoftwareInfo => "software_info",
            StateChannel::Power => "power",
            StateChannel::CurrentApp => "current_app",
            StateChannel::Muted => "muted",
            StateChannel::Volume => "volume",
            StateChannel::Apps => "apps",
            StateChannel::Inputs => "inputs",
            StateChannel::SoundOutput => "sound_output",
            StateChannel::PictureSettings => "picture_settings",
        }
    }

    fn binding(self) -> Binding {
        match self {
            StateChannel::SystemInfo => Binding::Static(ep::GET_SYSTEM_INFO),
            StateChannel::SoftwareInfo => Binding::Static(ep::GET_SOFTWARE_INFO),
            StateChannel::Power => Binding::Dynamic(ep::GET_POWER_STATE, None),
            StateChannel::CurrentApp => Binding::Dynamic(ep::GET_CURRENT_APP_INFO, None),
            StateChannel::Muted => Binding::Dynamic(ep::GET_AUDIO_STATUS, None),
            StateChannel::Volume => Binding::Dynamic(ep::GET_VOLUME, None),
            StateChannel::Apps => Binding::Dynamic(ep::GET_APPS, None),
            StateChannel::Inputs => Binding::Dynamic(ep::GET_INPUTS, None),
            StateChannel::SoundOutput => Binding::Dynamic(ep::GET_SOUND_OUTPUT, None),
            StateChannel::PictureSettings => Binding::Dynamic(
                ep::GET_SYSTEM_SETTINGS,
                Some(settings_query("picture", &DEFAULT_PICTURE_KEYS)),
            ),
        }
    }
}

impl fmt::Display for StateChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for StateChannel {
    type Err = WebOsError;

    fn from_str(s: &str) -> Result<Self> {
        StateChannel::DEFAULTS
            .into_iter()
            .find(|channel| channel.name() == s)
            .ok_or_else(|| WebOsError::UnknownChannel(s.to_string()))
    }
}

/// Every stream that writes into the snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Feed {
    Configured(StateChannel),
    ChannelList,
    CurrentChannel,
    ChannelInfo,
}

/// Subscriptions that only make sense once another value has been seen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Dependent {
    ChannelList,
    CurrentChannel,
    ChannelInfo,
}

/// Evaluated in this order after every update
const DEPENDENTS: [Dependent; 3] = [
    Dependent::ChannelList,
    Dependent::CurrentChannel,
    Dependent::ChannelInfo,
];

impl Dependent {
    fn uri(self) -> &'static str {
        match self {
            Dependent::ChannelList => ep::GET_TV_CHANNELS,
            Dependent::CurrentChannel => ep::GET_CURRENT_CHANNEL,
            Dependent::ChannelInfo => ep::GET_CHANNEL_INFO,
        }
    }

    fn feed(self) -> Feed {
        match self {
            Dependent::ChannelList => Feed::ChannelList,
            Dependent::CurrentChannel => Feed::CurrentChannel,
            Dependent::ChannelInfo => Feed::ChannelInfo,
        }
    }

    fn is_due(self, state: &DeviceState) -> bool {
        let live_tv = state.current_app_id.as_deref() == Some(LIVE_TV_APP_ID);
        match self {
            Dependent::ChannelList => live_tv && state.channels.is_none(),
            Dependent::CurrentChannel => live_tv && state.current_channel.is_none(),
            Dependent::ChannelInfo => {
                state.current_channel.is_some() && state.channel_info.is_none()
            }
        }
    }
}

/// Identifier returned when registering an observer
pub type ObserverId = u64;

/// Callback receiving the whole snapshot on every change
pub type Observer = Arc<dyn Fn(DeviceState) -> BoxFuture<'static, ()> + Send + Sync>;

/// Wrap an async closure as an [`Observer`]
pub fn observer<F, Fut>(f: F) -> Observer
where
    F: Fn(DeviceState) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move |state| -> BoxFuture<'static, ()> { Box::pin(f(state)) })
}

/// Registered state observers
#[derive(Default)]
pub(crate) struct Observers {
    next_id: AtomicU64,
    list: Mutex<Vec<(ObserverId, Observer)>>,
}

impl Observers {
    fn lock(&self) -> MutexGuard<'_, Vec<(ObserverId, Observer)>> {
        self.list.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn add(&self, observer: Observer) -> ObserverId {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.lock().push((id, observer));
        id
    }

    pub(crate) fn remove(&self, id: ObserverId) -> bool {
        let mut list = self.lock();
        let before = list.len();
        list.retain(|(existing, _)| *existing != id);
        list.len() != before
    }

    pub(crate) fn clear(&self) {
        self.lock().clear();
    }

    /// Call every observer concurrently and wait for all of them
    ///
    /// Works on a copy of the list, so observers may unregister themselves.
    pub(crate) async fn notify(&self, state: DeviceState) {
        let observers: Vec<Observer> = self.lock().iter().map(|(_, o)| o.clone()).collect();
        if observers.is_empty() {
            return;
        }
        join_all(observers.iter().map(|observer| observer(state.clone()))).await;
    }
}

/// Owner of the snapshot for one connection
pub(crate) struct StateAggregator {
    connection: Arc<Connection>,
    snapshot: Mutex<DeviceState>,
    live: AtomicBool,
    observers: Arc<Observers>,
    issued: Mutex<[bool; DEPENDENTS.len()]>,
    followups: Mutex<JoinSet<()>>,
    power_off: CancellationToken,
}

impl StateAggregator {
    pub(crate) fn new(connection: Arc<Connection>, observers: Arc<Observers>) -> Self {
        Self {
            connection,
            snapshot: Mutex::new(DeviceState::default()),
            live: AtomicBool::new(false),
            observers,
            issued: Mutex::new([false; DEPENDENTS.len()]),
            followups: Mutex::new(JoinSet::new()),
            power_off: CancellationToken::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, DeviceState> {
        self.snapshot.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Copy of the current snapshot
    pub(crate) fn snapshot(&self) -> DeviceState {
        self.lock().clone()
    }

    /// Read one value without copying the whole snapshot
    pub(crate) fn read<T>(&self, f: impl FnOnce(&DeviceState) -> T) -> T {
        f(&self.lock())
    }

    pub(crate) fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    /// Cancelled once the TV reports an off power state
    pub(crate) fn power_off(&self) -> &CancellationToken {
        &self.power_off
    }

    pub(crate) fn set_hello_info(&self, hello: Option<Value>) {
        self.lock().hello_info = hello;
    }

    /// Fetch static channels, subscribe dynamic ones and wait for their
    /// first deliveries
    ///
    /// Channels the TV does not support are skipped; any other failure
    /// aborts.
    pub(crate) async fn bootstrap(self: &Arc<Self>, channels: &[StateChannel]) -> Result<()> {
        let mut selected: Vec<StateChannel> = Vec::new();
        for channel in channels {
            if !selected.contains(channel) {
                selected.push(*channel);
            }
        }

        let mut dynamic = Vec::new();
        for channel in selected {
            match channel.binding() {
                Binding::Static(uri) => match self.connection.request(uri, None).await {
                    Ok(payload) => {
                        let mut state = self.lock();
                        match channel {
                            StateChannel::SystemInfo => state.system_info = Some(payload),
                            _ => state.software_info = Some(payload),
                        }
                    }
                    Err(e) => tolerate(channel, e)?,
                },
                Binding::Dynamic(uri, payload) => dynamic.push((channel, uri, payload)),
            }
        }

        // All subscribe frames go out before any first delivery is awaited
        let mut pending = Vec::with_capacity(dynamic.len());
        for (channel, uri, payload) in dynamic {
            let handler = self.handler(Feed::Configured(channel));
            pending.push((channel, self.connection.start_subscribe(uri, payload, handler)?));
        }

        let outcomes = join_all(
            pending
                .into_iter()
                .map(|(channel, pending)| async move { (channel, pending.wait().await) }),
        )
        .await;

        for (channel, outcome) in outcomes {
            if let Err(e) = outcome {
                tolerate(channel, e)?;
            }
        }

        Ok(())
    }

    /// Mark the snapshot live and notify observers registered so far
    pub(crate) async fn go_live(self: &Arc<Self>) {
        {
            let mut state = self.lock();
            if state.power.is_none() {
                state.power = Some(PowerState {
                    state: POWER_UNKNOWN.to_string(),
                });
            }
        }
        self.live.store(true, Ordering::SeqCst);
        self.issue_dependents();
        self.observers.notify(self.snapshot()).await;
    }

    fn handler(self: &Arc<Self>, feed: Feed) -> SubscriptionHandler {
        let aggregator: Weak<Self> = Arc::downgrade(self);
        Arc::new(move |payload| -> BoxFuture<'static, ()> {
            let aggregator = aggregator.clone();
            Box::pin(async move {
                if let Some(aggregator) = aggregator.upgrade() {
                    aggregator.apply(feed, payload).await;
                }
            })
        })
    }

    /// Write one delivery into the snapshot and fan out
    async fn apply(self: &Arc<Self>, feed: Feed, payload: Value) {
        {
            let mut state = self.lock();
            match feed {
                Feed::Configured(StateChannel::Power) => state.apply_power(&payload),
                Feed::Configured(StateChannel::CurrentApp) => state.apply_current_app(&payload),
                Feed::Configured(StateChannel::Muted) => state.apply_muted(&payload),
                Feed::Configured(StateChannel::Volume) => state.apply_volume(&payload),
                Feed::Configured(StateChannel::Apps) => state.apply_apps(&payload),
                Feed::Configured(StateChannel::Inputs) => state.apply_inputs(&payload),
                Feed::Configured(StateChannel::SoundOutput) => state.apply_sound_output(&payload),
                Feed::Configured(StateChannel::PictureSettings) => {
                    state.apply_picture_settings(&payload)
                }
                Feed::Configured(StateChannel::SystemInfo) => state.system_info = Some(payload),
                Feed::Configured(StateChannel::SoftwareInfo) => {
                    state.software_info = Some(payload)
                }
                Feed::ChannelList => state.apply_channels(&payload),
                Feed::CurrentChannel => state.current_channel = Some(payload),
                Feed::ChannelInfo => state.channel_info = Some(payload),
            }
        }

        if feed == Feed::Configured(StateChannel::Power) && !self.is_on() {
            tracing::info!("TV reported power off, disconnecting");
            self.power_off.cancel();
            return;
        }

        if !self.is_live() {
            return;
        }

        self.issue_dependents();
        self.observers.notify(self.snapshot()).await;
    }

    /// Issue every dependent subscription whose precondition now holds
    ///
    /// Each is issued at most once per connection. Frames are sent here, in
    /// list order; only the wait for the first delivery runs in the
    /// background.
    fn issue_dependents(self: &Arc<Self>) {
        let mut due = Vec::new();
        {
            let state = self.lock();
            let mut issued = self.issued.lock().unwrap_or_else(|e| e.into_inner());
            for (i, dependent) in DEPENDENTS.iter().enumerate() {
                if !issued[i] && dependent.is_due(&state) {
                    issued[i] = true;
                    due.push(*dependent);
                }
            }
        }

        for dependent in due {
            tracing::debug!("Subscribing to dependent {:?}", dependent);
            let handler = self.handler(dependent.feed());
            let pending = match self.connection.start_subscribe(dependent.uri(), None, handler) {
                Ok(pending) => pending,
                Err(e) => {
                    tracing::warn!("Could not subscribe to {:?}: {}", dependent, e);
                    continue;
                }
            };

            let mut followups = self.followups.lock().unwrap_or_else(|e| e.into_inner());
            while followups.try_join_next().is_some() {}
            followups.spawn(async move {
                match pending.wait().await {
                    Ok(_) => tracing::debug!("Dependent {:?} delivered", dependent),
                    Err(WebOsError::Cancelled) => {}
                    Err(e) if e.is_unsupported() => {
                        tracing::debug!("Dependent {:?} not supported: {}", dependent, e)
                    }
                    Err(e) => tracing::warn!("Dependent {:?} failed: {}", dependent, e),
                }
            });
        }
    }

    /// Wait for outstanding dependent subscription tasks
    pub(crate) async fn shutdown(&self, grace: Duration) {
        let mut followups =
            std::mem::take(&mut *self.followups.lock().unwrap_or_else(|e| e.into_inner()));
        let drained = timeout(grace, async {
            while followups.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            tracing::warn!("Dependent subscriptions did not finish within {:?}", grace);
            followups.abort_all();
        }
    }
}

impl PowerGate for StateAggregator {
    fn is_on(&self) -> bool {
        self.read(DeviceState::is_on)
    }
}

/// Swallow errors that mean "not supported on this TV"
fn tolerate(channel: StateChannel, error: WebOsError) -> Result<()> {
    if error.is_unsupported() {
        tracing::warn!("State channel {} unavailable: {}", channel, error);
        Ok(())
    } else {
        Err(error)
    }
}
