use crate::error::Result;
use crate::state::StateChannel;
use std::collections::HashSet;
use std::time::Duration;

/// Default API port
pub const DEFAULT_PORT: u16 = 3000;

/// Sound outputs that cannot take back-to-back volume steps
pub const DEFAULT_DELAYED_SOUND_OUTPUTS: [&str; 1] = ["external_arc"];

/// Client settings
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub port: u16,
    /// Bound on opening the WebSocket
    pub connect_timeout: Duration,
    /// Keepalive cadence; `None` disables keepalive
    pub ping_interval: Option<Duration>,
    /// How long a keepalive probe may go unanswered
    pub ping_timeout: Option<Duration>,
    /// Bound on individual requests; `None` waits indefinitely
    pub request_timeout: Option<Duration>,
    /// How long teardown waits for handlers and observers
    pub teardown_grace: Duration,
    /// Pause after a volume step on delayed outputs
    pub volume_step_delay: Option<Duration>,
    pub delayed_sound_outputs: HashSet<String>,
    /// Send a hello frame before registering
    pub hello_probe: bool,
    /// State channels kept fresh in the snapshot
    pub states: Vec<StateChannel>,
    /// Key to use instead of the credential store
    pub client_key: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            connect_timeout: Duration::from_secs(2),
            ping_interval: Some(Duration::from_secs(1)),
            ping_timeout: Some(Duration::from_secs(20)),
            request_timeout: None,
            teardown_grace: Duration::from_secs(5),
            volume_step_delay: None,
            delayed_sound_outputs: DEFAULT_DELAYED_SOUND_OUTPUTS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            hello_probe: false,
            states: StateChannel::DEFAULTS.to_vec(),
            client_key: None,
        }
    }
}

impl ClientConfig {
    /// Set the API port
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the bound on opening a socket
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set keepalive cadence and timeout; `None` for either disables it
    pub fn with_keepalive(mut self, interval: Option<Duration>, timeout: Option<Duration>) -> Self {
        self.ping_interval = interval;
        self.ping_timeout = timeout;
        self
    }

    /// Bound individual requests; `None` waits indefinitely
    pub fn with_request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set how long teardown waits for handlers and observers
    pub fn with_teardown_grace(mut self, grace: Duration) -> Self {
        self.teardown_grace = grace;
        self
    }

    /// Pause after volume steps on delayed sound outputs
    pub fn with_volume_step_delay(mut self, delay: Option<Duration>) -> Self {
        self.volume_step_delay = delay;
        self
    }

    /// Send a hello frame before registering
    pub fn with_hello_probe(mut self, enabled: bool) -> Self {
        self.hello_probe = enabled;
        self
    }

    /// Use this client key instead of the credential store
    pub fn with_client_key(mut self, key: impl Into<String>) -> Self {
        self.client_key = Some(key.into());
        self
    }

    /// Select the state channels kept in the snapshot
    pub fn with_states(mut self, states: impl IntoIterator<Item = StateChannel>) -> Self {
        self.states = states.into_iter().collect();
        self
    }

    /// Select state channels by name, rejecting unknown names
    ///
    /// ```
    /// use webos_tv::ClientConfig;
    ///
    /// let config = ClientConfig::default().with_state_names(&["power", "volume"]).unwrap();
    /// assert_eq!(config.states.len(), 2);
    /// assert!(ClientConfig::default().with_state_names(&["volumes"]).is_err());
    /// ```
    pub fn with_state_names(self, names: &[&str]) -> Result<Self> {
        let states = names
            .iter()
            .map(|name| name.parse::<StateChannel>())
            .collect::<Result<Vec<_>>>()?;
        Ok(self.with_states(states))
    }

    /// Keepalive settings, when both halves are configured
    pub(crate) fn keepalive(&self) -> Option<(Duration, Duration)> {
        self.ping_interval.zip(self.ping_timeout)
    }

    pub(crate) fn url(&self, host: &str) -> String {
        format!("ws://{}:{}", host, self.port)
    }
}
