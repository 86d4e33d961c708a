use std::collections::HashMap;

use zvariant::{OwnedValue, Value};

/// Raw MPRIS `Metadata` dict (`a{sv}`) as received from the session bus.
pub type PropertyBag = HashMap<String, OwnedValue>;

/// Playback state of the observed player.  Anything the player reports
/// outside the three MPRIS strings maps to `Unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaybackStatus {
    Playing,
    Paused,
    Stopped,
    #[default]
    Unknown,
}

impl PlaybackStatus {
    pub fn parse(s: &str) -> Self {
        match s {
            "Playing" => PlaybackStatus::Playing,
            "Paused" => PlaybackStatus::Paused,
            "Stopped" => PlaybackStatus::Stopped,
            _ => PlaybackStatus::Unknown,
        }
    }
}

/// Canonical track metadata extracted from a property bag.  Immutable once
/// built; a new notification produces a new value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackMetadata {
    pub track_id: String,
    pub artist: String,
    pub title: String,
    pub album: String,
    pub external_url: String,
    pub track_number: Option<u32>,
    pub disc_number: Option<u32>,
}

impl TrackMetadata {
    pub fn has_title(&self) -> bool {
        !self.title.is_empty()
    }

    /// Base filename for this track, e.g. `Artist - Title`.
    pub fn display_name(&self) -> String {
        format!("{} - {}", self.artist, self.title)
            .trim_matches(|c| c == ' ' || c == '-')
            .to_string()
    }
}

/// Extract canonical metadata from an MPRIS property bag.  Total function:
/// malformed or missing entries degrade to empty strings / absent numbers so
/// the recorder stays live on incomplete metadata.
pub fn normalize(bag: &PropertyBag) -> TrackMetadata {
    TrackMetadata {
        track_id: string_field(bag, "mpris:trackid"),
        artist: first_string_field(bag, "xesam:artist"),
        title: string_field(bag, "xesam:title"),
        album: string_field(bag, "xesam:album"),
        external_url: string_field(bag, "xesam:url"),
        track_number: positive_field(bag, "xesam:trackNumber"),
        disc_number: positive_field(bag, "xesam:discNumber"),
    }
}

/// Some players wrap values in an extra variant layer.
fn unwrap_variant<'a>(v: &'a Value<'a>) -> &'a Value<'a> {
    match v {
        Value::Value(inner) => &**inner,
        other => other,
    }
}

fn as_string(v: &Value<'_>) -> Option<String> {
    match unwrap_variant(v) {
        Value::Str(s) => Some(s.as_str().to_string()),
        Value::ObjectPath(p) => Some(p.as_str().to_string()),
        _ => None,
    }
}

fn string_field(bag: &PropertyBag, key: &str) -> String {
    bag.get(key).and_then(|v| as_string(v)).unwrap_or_default()
}

/// First element of a string array (e.g. `xesam:artist`); a bare string is
/// accepted too.
fn first_string_field(bag: &PropertyBag, key: &str) -> String {
    let Some(v) = bag.get(key) else {
        return String::new();
    };
    match unwrap_variant(v) {
        Value::Array(arr) => arr.iter().next().and_then(as_string).unwrap_or_default(),
        other => as_string(other).unwrap_or_default(),
    }
}

/// Coerce a numeric-ish value to a positive integer.  Non-positive,
/// unparsable, or wrongly-typed values are absent, never zero.
fn positive_field(bag: &PropertyBag, key: &str) -> Option<u32> {
    let n = match unwrap_variant(bag.get(key)?) {
        Value::U8(n) => i64::from(*n),
        Value::I16(n) => i64::from(*n),
        Value::U16(n) => i64::from(*n),
        Value::I32(n) => i64::from(*n),
        Value::U32(n) => i64::from(*n),
        Value::I64(n) => *n,
        Value::U64(n) => i64::try_from(*n).ok()?,
        Value::Str(s) => s.as_str().parse().ok()?,
        _ => return None,
    };
    if n > 0 {
        u32::try_from(n).ok()
    } else {
        None
    }
}

/// Make a string safe as a filename component: reserved characters become
/// `_`, whitespace runs collapse, length capped at 180.
pub fn sanitize(s: &str) -> String {
    let replaced: String = s
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c => c,
        })
        .collect();
    let collapsed = replaced.split_whitespace().collect::<Vec<_>>().join(" ");
    let capped: String = collapsed.chars().take(180).collect();
    if capped.is_empty() {
        "unknown".to_string()
    } else {
        capped
    }
}
