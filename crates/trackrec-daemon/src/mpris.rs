//! Thin wrapper around the MPRIS surface of the session bus: player
//! selection, property reads, and the PropertiesChanged pump that feeds the
//! recorder's event channel.

use anyhow::Result;
use async_trait::async_trait;
use futures_util::StreamExt;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use zbus::names::InterfaceName;
use zbus::zvariant::Value;
use zbus::Connection;

use trackrec_core::metadata::{normalize, PlaybackStatus, PropertyBag, TrackMetadata};

use crate::recorder::{PlayerEvent, PlayerProbe};

pub const MPRIS_PREFIX: &str = "org.mpris.MediaPlayer2.";
const MPRIS_PATH: &str = "/org/mpris/MediaPlayer2";
const PLAYER_INTERFACE: &str = "org.mpris.MediaPlayer2.Player";

#[derive(Debug, Error)]
pub enum PlayerError {
    #[error("no MPRIS player found on the session bus")]
    NoPlayer,
    #[error(transparent)]
    Bus(#[from] zbus::Error),
    #[error(transparent)]
    Fdo(#[from] zbus::fdo::Error),
}

fn player_interface() -> InterfaceName<'static> {
    InterfaceName::from_static_str_unchecked(PLAYER_INTERFACE)
}

/// Handle to one MPRIS player.  Cheap to clone; all calls go through the
/// properties interface at the well-known MPRIS object path.
#[derive(Clone)]
pub struct MprisPlayer {
    bus_name: String,
    props: zbus::fdo::PropertiesProxy<'static>,
}

impl MprisPlayer {
    /// Connect to the session bus and bind to a player.  The preferred name
    /// (with or without the MPRIS prefix) wins when present; otherwise the
    /// first candidate in sorted order.  No player at all is fatal.
    pub async fn connect(preferred: Option<&str>) -> Result<Self, PlayerError> {
        let conn = Connection::session().await?;
        let bus_name = pick_player(&conn, preferred).await?;

        let props = zbus::fdo::PropertiesProxy::builder(&conn)
            .destination(bus_name.clone())?
            .path(MPRIS_PATH)?
            .build()
            .await?;

        info!("Using MPRIS player: {}", bus_name);
        Ok(Self { bus_name, props })
    }

    pub fn bus_name(&self) -> &str {
        &self.bus_name
    }

    pub async fn playback_status(&self) -> Result<PlaybackStatus, PlayerError> {
        let value = self.props.get(player_interface(), "PlaybackStatus").await?;
        let status = String::try_from(value).unwrap_or_default();
        Ok(PlaybackStatus::parse(&status))
    }

    pub async fn metadata(&self) -> Result<TrackMetadata, PlayerError> {
        let value = self.props.get(player_interface(), "Metadata").await?;
        let bag = PropertyBag::try_from(value).unwrap_or_default();
        Ok(normalize(&bag))
    }
}

#[async_trait]
impl PlayerProbe for MprisPlayer {
    async fn playback_status(&self) -> Result<PlaybackStatus> {
        Ok(self.playback_status().await?)
    }

    async fn metadata(&self) -> Result<TrackMetadata> {
        Ok(self.metadata().await?)
    }
}

async fn pick_player(conn: &Connection, preferred: Option<&str>) -> Result<String, PlayerError> {
    let dbus = zbus::fdo::DBusProxy::new(conn).await?;
    let mut names: Vec<String> = dbus
        .list_names()
        .await?
        .into_iter()
        .map(|name| name.to_string())
        .filter(|name| name.starts_with(MPRIS_PREFIX))
        .collect();
    names.sort();

    if let Some(preferred) = preferred {
        let wanted = if preferred.starts_with(MPRIS_PREFIX) {
            preferred.to_string()
        } else {
            format!("{}{}", MPRIS_PREFIX, preferred)
        };
        if names.iter().any(|name| name == &wanted) {
            return Ok(wanted);
        }
        if !names.is_empty() {
            warn!("Preferred player {} not present, falling back", wanted);
        }
    }

    names.into_iter().next().ok_or(PlayerError::NoPlayer)
}

/// Forward PropertiesChanged signals into the recorder's channel, one event
/// per signal so status and metadata halves stay coalesced exactly as the
/// bus delivered them.  Returns when the stream or the channel closes.
pub async fn pump_events(player: MprisPlayer, tx: mpsc::Sender<PlayerEvent>) {
    let mut stream = match player.props.receive_properties_changed().await {
        Ok(stream) => stream,
        Err(e) => {
            warn!("Could not subscribe to PropertiesChanged: {}", e);
            return;
        }
    };

    while let Some(signal) = stream.next().await {
        let args = match signal.args() {
            Ok(args) => args,
            Err(e) => {
                debug!("Undecodable PropertiesChanged signal: {}", e);
                continue;
            }
        };
        if args.interface_name().as_str() != PLAYER_INTERFACE {
            continue;
        }

        let changed = args.changed_properties();

        let status = changed.get("PlaybackStatus").and_then(|v| match v {
            Value::Str(s) => Some(PlaybackStatus::parse(s.as_str())),
            _ => None,
        });

        // The signal's metadata dict can be partial; refetch the full
        // property, like the status reads do.
        let metadata = if changed.contains_key("Metadata") {
            match player.metadata().await {
                Ok(md) => Some(md),
                Err(e) => {
                    warn!("Could not fetch metadata: {}", e);
                    None
                }
            }
        } else {
            None
        };

        if status.is_none() && metadata.is_none() {
            continue;
        }
        if tx.send(PlayerEvent { status, metadata }).await.is_err() {
            break;
        }
    }

    info!("PropertiesChanged stream ended for {}", player.bus_name);
}
