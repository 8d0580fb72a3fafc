//! Authenticated Companion session
//!
//! Wraps a verified, encrypted connection and exposes the remote-control
//! surface: HID buttons, media commands and text input. The device
//! rejects commands issued before the post-connect sequence completes, so
//! [`CompanionSession::begin`] runs it in strict order.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::connection::{Connection, Router};
use crate::error::CompanionError;
use crate::opack_dict;
use crate::protocol::opack::Value;
use crate::protocol::rti;
use crate::types::ClientConfig;

const BUTTON_DOWN: u64 = 1;
const BUTTON_UP: u64 = 2;
const LONG_PRESS_HOLD: Duration = Duration::from_millis(1000);
const SESSION_SERVICE: &str = "com.apple.tvremoteservices";

/// Remote-control buttons understood by `_hidC`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
#[repr(u8)]
pub enum RemoteKey {
    Up = 1,
    Down = 2,
    Left = 3,
    Right = 4,
    Menu = 5,
    Select = 6,
    Home = 7,
    VolumeUp = 8,
    VolumeDown = 9,
    Siri = 10,
    Screensaver = 11,
    Sleep = 12,
    Wake = 13,
    PlayPause = 14,
    ChannelIncrement = 15,
    ChannelDecrement = 16,
    Guide = 17,
    PageUp = 18,
    PageDown = 19,
}

/// Media-control operations carried by `_mcc`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
#[repr(u8)]
pub enum MediaCommand {
    Play = 1,
    Pause = 2,
    NextTrack = 3,
    PreviousTrack = 4,
    GetVolume = 5,
    SetVolume = 6,
    SkipBy = 7,
}

/// Keyboard focus on the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FocusState {
    /// No poll has completed yet.
    Unknown,
    /// A text field is focused.
    Focused,
    /// No text field is focused.
    Unfocused,
}

/// An authenticated, encrypted Companion session.
pub struct CompanionSession {
    router: Arc<Router>,
    connection: Connection,
    config: ClientConfig,
    focus_tx: watch::Sender<FocusState>,
    focus_poller: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl CompanionSession {
    pub(crate) fn new(router: Arc<Router>, connection: Connection, config: ClientConfig) -> Self {
        let (focus_tx, _) = watch::channel(FocusState::Unknown);
        Self {
            router,
            connection,
            config,
            focus_tx,
            focus_poller: tokio::sync::Mutex::new(None),
        }
    }

    /// Run the post-verify command sequence.
    ///
    /// Order is mandatory; the device rejects commands issued out of
    /// sequence.
    ///
    /// # Errors
    ///
    /// Returns error if any step fails or times out.
    pub(crate) async fn begin(&self, client_id: &[u8]) -> Result<(), CompanionError> {
        self.router
            .send_command(
                "_systemInfo",
                opack_dict! {
                    "_bf" => 0u64,
                    "_cf" => 512u64,
                    "_clFl" => 128u64,
                    "_idsID" => client_id.to_vec(),
                    "_sf" => 256u64,
                    "model" => self.config.device_model.as_str(),
                    "name" => self.config.device_name.as_str(),
                },
            )
            .await?;

        self.router
            .send_command(
                "_touchStart",
                opack_dict! {
                    "_width" => Value::Float64(1000.0),
                    "_height" => Value::Float64(1000.0),
                    "_tFl" => 0u64,
                },
            )
            .await?;

        let sid = u64::from(rand::thread_rng().r#gen::<u32>());
        self.router
            .send_command(
                "_sessionStart",
                opack_dict! {
                    "_srvT" => SESSION_SERVICE,
                    "_sid" => sid,
                },
            )
            .await?;

        self.router.send_command("_tiStart", opack_dict! {}).await?;
        self.router.subscribe_event("_iMC").await?;

        Ok(())
    }

    /// Press and release a remote button.
    ///
    /// # Errors
    ///
    /// Returns error if either half of the press fails.
    pub async fn press_key(&self, key: RemoteKey) -> Result<(), CompanionError> {
        self.press(key, false).await
    }

    /// Press a button, hold it for a second, then release.
    ///
    /// # Errors
    ///
    /// Returns error if either half of the press fails.
    pub async fn long_press_key(&self, key: RemoteKey) -> Result<(), CompanionError> {
        self.press(key, true).await
    }

    async fn press(&self, key: RemoteKey, long: bool) -> Result<(), CompanionError> {
        self.send_button(key, BUTTON_DOWN).await?;
        if long {
            tokio::time::sleep(LONG_PRESS_HOLD).await;
        }
        self.send_button(key, BUTTON_UP).await
    }

    async fn send_button(&self, key: RemoteKey, state: u64) -> Result<(), CompanionError> {
        self.router
            .send_command(
                "_hidC",
                opack_dict! {
                    "_hBtS" => state,
                    "_hidC" => u64::from(key as u8),
                },
            )
            .await?;
        Ok(())
    }

    /// Issue a media-control command; returns the response content.
    ///
    /// # Errors
    ///
    /// Returns error if the command fails or times out.
    pub async fn media_command(
        &self,
        command: MediaCommand,
        mut args: Vec<(String, Value)>,
    ) -> Result<Value, CompanionError> {
        let mut content = vec![(
            "_mcc".to_string(),
            Value::Int(u64::from(command as u8)),
        )];
        content.append(&mut args);

        let response = self
            .router
            .send_command("_mcc", Value::Dict(content))
            .await?;
        Ok(response.get("_c").cloned().unwrap_or(Value::Dict(vec![])))
    }

    /// Fetch the current text-field content, if a field is focused.
    ///
    /// # Errors
    ///
    /// Returns error on transport failure or a malformed archive.
    pub async fn get_text(&self) -> Result<Option<String>, CompanionError> {
        Ok(self
            .fetch_text_session()
            .await?
            .map(|state| state.context))
    }

    /// Type into the focused text field.
    ///
    /// Optionally clears existing content first, then asserts `text`.
    /// Returns the client-predicted field content, or `None` when no
    /// field is focused.
    ///
    /// # Errors
    ///
    /// Returns error on transport failure or a malformed archive.
    pub async fn text_input_command(
        &self,
        text: &str,
        clear_existing: bool,
    ) -> Result<Option<String>, CompanionError> {
        let Some(session) = self.fetch_text_session().await? else {
            return Ok(None);
        };

        let mut predicted = session.context.clone();

        if clear_existing {
            let archive = rti::build_clear_archive(&session.session_uuid)?;
            self.send_text_event(archive).await?;
            predicted.clear();
        }

        if !text.is_empty() {
            let archive = rti::build_text_archive(&session.session_uuid, text)?;
            self.send_text_event(archive).await?;
            predicted.push_str(text);
        }

        Ok(Some(predicted))
    }

    /// Watch keyboard-focus transitions.
    ///
    /// The first call starts a poller that refreshes the text session on
    /// the configured interval; the device does not reliably push focus
    /// changes.
    pub async fn watch_focus(&self) -> watch::Receiver<FocusState> {
        let mut poller = self.focus_poller.lock().await;
        if poller.is_none() {
            *poller = Some(self.spawn_focus_poller());
        }
        self.focus_tx.subscribe()
    }

    fn spawn_focus_poller(&self) -> JoinHandle<()> {
        let router = Arc::clone(&self.router);
        let focus_tx = self.focus_tx.clone();
        let interval = self.config.focus_poll_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Ok(response) = router.send_command("_tiStart", opack_dict! {}).await else {
                    // Connection troubles end the poll; a reconnect makes
                    // a new session with a new poller.
                    break;
                };
                let focused = ti_session_data(&response).is_some();
                let state = if focused {
                    FocusState::Focused
                } else {
                    FocusState::Unfocused
                };
                focus_tx.send_if_modified(|current| {
                    let changed = *current != state;
                    *current = state;
                    changed
                });
            }
        })
    }

    async fn fetch_text_session(
        &self,
    ) -> Result<Option<rti::TextSessionState>, CompanionError> {
        // Restart the text session so the device reports fresh state.
        self.router.send_command("_tiStop", opack_dict! {}).await?;
        let response = self.router.send_command("_tiStart", opack_dict! {}).await?;

        let Some(archive) = ti_session_data(&response) else {
            return Ok(None);
        };
        Ok(Some(rti::parse_session_archive(archive)?))
    }

    async fn send_text_event(&self, archive: Vec<u8>) -> Result<(), CompanionError> {
        self.router
            .send_event(
                "_tiC",
                opack_dict! {
                    "_tiV" => 1u64,
                    "_tiD" => archive,
                },
            )
            .await
    }

    /// Close the session and its connection.
    pub async fn disconnect(self) {
        if let Some(poller) = self.focus_poller.lock().await.take() {
            poller.abort();
        }
        self.connection.close().await;
    }

    /// Whether the underlying connection is still up.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }
}

/// A present, non-empty `_c._tiD` means a text field is focused.
fn ti_session_data(response: &Value) -> Option<&[u8]> {
    let data = response.get("_c")?.get("_tiD")?.as_bytes()?;
    (!data.is_empty()).then_some(data)
}
