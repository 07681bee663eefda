//! Room names derived from the owner's presence.

use crate::db::RoomKind;
use crate::platform::{Activity, ActivityKind};

/// Prefix that nests first-kind rooms visually under their lobby.
const NESTED_PREFIX: &str = "┗ ";

/// The label a room is named after: the first game being played, else the
/// first stream, else nothing. Other activity kinds never name a room.
pub fn activity_label(activities: &[Activity]) -> Option<String> {
    if let Some(playing) = activities.iter().find(|a| a.kind == ActivityKind::Playing) {
        return Some(playing.name.clone());
    }
    activities
        .iter()
        .find(|a| a.kind == ActivityKind::Streaming)
        .map(|a| format!("Streaming {}", a.name))
}

pub fn room_name(kind: RoomKind, label: Option<&str>, display_name: &str) -> String {
    match (kind, label) {
        (RoomKind::First, Some(label)) => format!("{NESTED_PREFIX}{label}"),
        (RoomKind::First, None) => format!("{NESTED_PREFIX}{display_name}"),
        (RoomKind::Second, Some(label)) => label.to_string(),
        (RoomKind::Second, None) => format!("{display_name} voice"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn playing_beats_streaming_regardless_of_order() {
        let activities = vec![
            Activity::new(ActivityKind::Streaming, "Twitch"),
            Activity::new(ActivityKind::Custom, "brb"),
            Activity::new(ActivityKind::Playing, "Chess"),
        ];
        assert_eq!(activity_label(&activities).as_deref(), Some("Chess"));
    }

    #[test]
    fn streaming_gets_prefix_and_others_are_ignored() {
        let activities = vec![
            Activity::new(ActivityKind::Listening, "Spotify"),
            Activity::new(ActivityKind::Streaming, "Twitch"),
        ];
        assert_eq!(activity_label(&activities).as_deref(), Some("Streaming Twitch"));
        assert_eq!(activity_label(&[Activity::new(ActivityKind::Watching, "TV")]), None);
        assert_eq!(activity_label(&[]), None);
    }

    #[test]
    fn names_per_kind() {
        assert_eq!(room_name(RoomKind::First, Some("Chess"), "Ana"), "┗ Chess");
        assert_eq!(room_name(RoomKind::First, None, "Ana"), "┗ Ana");
        assert_eq!(room_name(RoomKind::Second, Some("Chess"), "Ana"), "Chess");
        assert_eq!(room_name(RoomKind::Second, None, "Ana"), "Ana voice");
    }
}
