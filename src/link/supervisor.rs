//! # Connection Supervisor
//!
//! Owns the lifecycle of the vehicle session:
//!
//! ```text
//! Disconnected -> Connecting -> AwaitingHeartbeat -> Live
//!       ^             |                |               |
//!       +-------------+----------------+---------------+
//! ```
//!
//! - A failed open sleeps `timeout_s` before the next attempt
//! - No heartbeat within `timeout_s` returns to Connecting
//! - No frame at all for `timeout_s` while live closes the session
//!
//! A timeout of zero disables the inactivity and heartbeat deadlines.
//!
//! Every session ends the same way: the send path is detached, the writer
//! task stops and the transport is closed before the next attempt.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::classifier;
use crate::config::{Config, SyncConfig};
use crate::error::Result;
use crate::link::{spawn_writer, Connector, Link, LinkHandle};
use crate::protocol::dialect::MavMessage;
use crate::protocol::frame::{Frame, FrameKind};
use crate::protocol::names::{HOME_POSITION, HOME_POSITION_ID, HOME_POSITION_RATE_HZ, STAT_RESET};
use crate::protocol::{encoder, Target};
use crate::store::statistics::Timestamp;
use crate::store::{SharedStore, State};

/// Pause between attempts when the timeout is disabled
const RETRY_PAUSE: Duration = Duration::from_millis(100);

/// How a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionEnd {
    /// No heartbeat arrived in time
    NoHeartbeat,
    /// The transport failed before the session went live
    Failed,
    /// A live session was lost
    Lost,
}

/// Keeps one vehicle session alive and feeds it through the classifier
pub struct Supervisor {
    address: String,
    timeout: Option<Duration>,
    sync: SyncConfig,
    store: SharedStore,
    link: LinkHandle,
    connector: Arc<dyn Connector>,
}

impl Supervisor {
    /// Create a supervisor
    ///
    /// # Arguments
    ///
    /// * `config` - Bridge configuration (link and sync sections are used)
    /// * `store` - Shared state
    /// * `link` - Send path, attached while a session is live
    /// * `connector` - Opens transports
    pub fn new(config: &Config, store: SharedStore, link: LinkHandle, connector: Arc<dyn Connector>) -> Self {
        let timeout = (config.link.timeout_s > 0.0).then(|| Duration::from_secs_f64(config.link.timeout_s));

        Self {
            address: config.link.address.clone(),
            timeout,
            sync: config.sync.clone(),
            store,
            link,
            connector,
        }
    }

    /// Run forever, reconnecting as needed
    pub async fn run(self) {
        info!("Supervising link to {}", self.address);

        loop {
            let link = match self.connect().await {
                Ok(link) => link,
                Err(e) => {
                    warn!("Connection to {} failed: {}", self.address, e);
                    tokio::time::sleep(self.retry_delay()).await;
                    continue;
                }
            };

            match self.run_session(link).await {
                SessionEnd::NoHeartbeat => warn!("No heartbeat from {}, reconnecting", self.address),
                SessionEnd::Failed => {
                    warn!("Link to {} failed before going live", self.address);
                    tokio::time::sleep(self.retry_delay()).await;
                }
                SessionEnd::Lost => warn!("Lost vehicle on {}, reconnecting", self.address),
            }
        }
    }

    fn retry_delay(&self) -> Duration {
        self.timeout.unwrap_or(RETRY_PAUSE)
    }

    async fn connect(&self) -> Result<Arc<dyn Link>> {
        debug!("Connecting to {}", self.address);
        self.connector.connect(&self.address).await
    }

    async fn run_session(&self, link: Arc<dyn Link>) -> SessionEnd {
        let end = match self.await_heartbeat(link.as_ref()).await {
            Ok(heartbeat) => {
                let (outbox, writer) = spawn_writer(Arc::clone(&link));
                self.link.attach(outbox);
                self.go_live(&heartbeat);
                self.serve(link.as_ref()).await;
                self.go_down();

                writer.abort();
                if let Err(e) = writer.await {
                    if !e.is_cancelled() {
                        warn!("Writer task failed: {}", e);
                    }
                }
                SessionEnd::Lost
            }
            Err(end) => end,
        };

        link.close().await;
        end
    }

    async fn await_heartbeat(&self, link: &dyn Link) -> std::result::Result<Frame, SessionEnd> {
        let wait = async {
            loop {
                match link.recv().await {
                    Ok(frame) if frame.kind == FrameKind::Heartbeat => return Ok(frame),
                    Ok(_) => {}
                    Err(e) => {
                        warn!("Link read error: {}", e);
                        return Err(SessionEnd::Failed);
                    }
                }
            }
        };

        match self.timeout {
            Some(limit) => tokio::time::timeout(limit, wait)
                .await
                .unwrap_or(Err(SessionEnd::NoHeartbeat)),
            None => wait.await,
        }
    }

    fn go_live(&self, heartbeat: &Frame) {
        let target = Target {
            system: heartbeat.system_id,
            component: heartbeat.component_id,
        };

        let outbound = {
            let mut state = self.store.write();
            state.connection.connected = true;
            state.connection.sessions += 1;
            state.connection.set_target(target);
            state.connection.last_received = Some(Timestamp::now().monotonic);

            let mut outbound = vec![encoder::heartbeat()];
            outbound.extend(startup_messages(&self.sync, &mut state));
            outbound
        };

        info!(
            "Vehicle {}:{} is live on {}",
            target.system, target.component, self.address
        );

        self.link.send_all(&outbound);
    }

    async fn serve(&self, link: &dyn Link) {
        loop {
            let next = match self.timeout {
                Some(limit) => match tokio::time::timeout(limit, link.recv()).await {
                    Ok(next) => next,
                    Err(_) => {
                        warn!("No data for {:?}", limit);
                        return;
                    }
                },
                None => link.recv().await,
            };

            let frame = match next {
                Ok(frame) => frame,
                Err(e) => {
                    warn!("Link read error: {}", e);
                    return;
                }
            };

            let mut outbound = Vec::new();
            if frame.kind == FrameKind::Heartbeat {
                outbound.push(encoder::heartbeat());
            }

            {
                let mut state = self.store.write();
                outbound.extend(classifier::classify(&mut state, &frame, Timestamp::now()));
            }

            self.link.send_all(&outbound);
        }
    }

    fn go_down(&self) {
        self.link.detach();
        self.store.write().connection.connected = false;
        info!("Disconnected from {}", self.address);
    }
}

/// Requests sent once a session goes live
///
/// Statistics reset, stream rate, message intervals (including the home
/// position when enabled) and then the list requests of every enabled
/// collection.
pub fn startup_messages(sync: &SyncConfig, state: &mut State) -> Vec<MavMessage> {
    let target = state.connection.target();
    let mut messages = Vec::new();
    let mut intervals = sync.intervals();

    if sync.fetch_home {
        state.filters.message.mark(HOME_POSITION);
        intervals.retain(|(id, _)| *id != HOME_POSITION_ID);
        intervals.push((HOME_POSITION_ID, HOME_POSITION_RATE_HZ));
    }

    if sync.reset_statistics {
        messages.push(encoder::param_set_real(target, STAT_RESET, 0.0));
    }

    if sync.stream_rate > 0 {
        messages.push(encoder::request_data_stream(target, sync.stream_rate));
    }

    for (id, hz) in intervals {
        messages.push(encoder::set_message_interval(target, id, Some(hz)));
    }

    messages.extend(classifier::reset_engines(state));
    messages
}
