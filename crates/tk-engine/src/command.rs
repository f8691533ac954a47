//! Message commands
//!
//! Extension pages talk to the engine with JSON messages tagged by `action`.
//! Each action maps to one [`Command`] variant; the reply is wrapped in a
//! [`Response`] envelope. TypeScript bindings for the pages are generated
//! from these types.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use ts_rs::TS;

use crate::error::EngineError;
use crate::focus::FocusStatus;
use crate::grant::AccessGrant;
use crate::host::TabId;
use crate::prayer::{Location, NextPrayer, Prayer};

// =============================================================================
// Commands
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(tag = "action", rename_all = "camelCase")]
#[ts(export)]
pub enum Command {
    #[serde(rename = "startFocusMode")]
    StartFocus {
        #[ts(type = "number")]
        duration: i64,
    },
    #[serde(rename = "stopFocusMode")]
    StopFocus,
    GrantAccess {
        url: String,
        #[ts(type = "number")]
        duration: i64,
    },
    CheckStatus,
    GetIntent {
        #[serde(rename = "sessionId")]
        session_id: TabId,
    },
    #[serde(rename = "updatePrayerTimes")]
    RefreshPrayerTimes,
    #[serde(rename = "closeTab")]
    CloseSession {
        #[serde(rename = "sessionId")]
        session_id: TabId,
    },
    AddSite { site: String },
    RemoveSite { site: String },
    ListSites,
    SetPrayerBlocking { enabled: bool },
    SetPrayerDuration {
        #[ts(type = "number")]
        minutes: i64,
    },
    SetLocation { location: Location },
    NextPrayer,
    BypassTarget { url: String },
}

/// Command discriminant, for routing and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    StartFocus,
    StopFocus,
    GrantAccess,
    CheckStatus,
    GetIntent,
    RefreshPrayerTimes,
    CloseSession,
    AddSite,
    RemoveSite,
    ListSites,
    SetPrayerBlocking,
    SetPrayerDuration,
    SetLocation,
    NextPrayer,
    BypassTarget,
}

impl CommandKind {
    pub const ALL: [CommandKind; 15] = [
        CommandKind::StartFocus,
        CommandKind::StopFocus,
        CommandKind::GrantAccess,
        CommandKind::CheckStatus,
        CommandKind::GetIntent,
        CommandKind::RefreshPrayerTimes,
        CommandKind::CloseSession,
        CommandKind::AddSite,
        CommandKind::RemoveSite,
        CommandKind::ListSites,
        CommandKind::SetPrayerBlocking,
        CommandKind::SetPrayerDuration,
        CommandKind::SetLocation,
        CommandKind::NextPrayer,
        CommandKind::BypassTarget,
    ];

    /// Wire name of the `action` tag.
    pub fn action(self) -> &'static str {
        match self {
            CommandKind::StartFocus => "startFocusMode",
            CommandKind::StopFocus => "stopFocusMode",
            CommandKind::GrantAccess => "grantAccess",
            CommandKind::CheckStatus => "checkStatus",
            CommandKind::GetIntent => "getIntent",
            CommandKind::RefreshPrayerTimes => "updatePrayerTimes",
            CommandKind::CloseSession => "closeTab",
            CommandKind::AddSite => "addSite",
            CommandKind::RemoveSite => "removeSite",
            CommandKind::ListSites => "listSites",
            CommandKind::SetPrayerBlocking => "setPrayerBlocking",
            CommandKind::SetPrayerDuration => "setPrayerDuration",
            CommandKind::SetLocation => "setLocation",
            CommandKind::NextPrayer => "nextPrayer",
            CommandKind::BypassTarget => "bypassTarget",
        }
    }

    pub fn from_action(action: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.action() == action)
    }
}

impl Command {
    pub fn kind(&self) -> CommandKind {
        match self {
            Command::StartFocus { .. } => CommandKind::StartFocus,
            Command::StopFocus => CommandKind::StopFocus,
            Command::GrantAccess { .. } => CommandKind::GrantAccess,
            Command::CheckStatus => CommandKind::CheckStatus,
            Command::GetIntent { .. } => CommandKind::GetIntent,
            Command::RefreshPrayerTimes => CommandKind::RefreshPrayerTimes,
            Command::CloseSession { .. } => CommandKind::CloseSession,
            Command::AddSite { .. } => CommandKind::AddSite,
            Command::RemoveSite { .. } => CommandKind::RemoveSite,
            Command::ListSites => CommandKind::ListSites,
            Command::SetPrayerBlocking { .. } => CommandKind::SetPrayerBlocking,
            Command::SetPrayerDuration { .. } => CommandKind::SetPrayerDuration,
            Command::SetLocation { .. } => CommandKind::SetLocation,
            Command::NextPrayer => CommandKind::NextPrayer,
            Command::BypassTarget { .. } => CommandKind::BypassTarget,
        }
    }

    /// Decode a message. An unrecognized `action` is
    /// [`EngineError::UnknownCommand`]; a recognized one with bad fields is
    /// [`EngineError::MalformedCommand`].
    pub fn from_value(message: Value) -> Result<Self, EngineError> {
        let action = message
            .get("action")
            .and_then(Value::as_str)
            .ok_or_else(|| EngineError::MalformedCommand("missing 'action'".to_string()))?;
        if CommandKind::from_action(action).is_none() {
            return Err(EngineError::UnknownCommand(action.to_string()));
        }
        serde_json::from_value(message).map_err(|e| EngineError::MalformedCommand(e.to_string()))
    }

    pub fn parse(json: &str) -> Result<Self, EngineError> {
        let message: Value =
            serde_json::from_str(json).map_err(|e| EngineError::MalformedCommand(e.to_string()))?;
        Self::from_value(message)
    }
}

// =============================================================================
// Replies
// =============================================================================

/// Popup status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct StatusReport {
    pub focus_active: bool,
    #[ts(type = "number")]
    pub seconds_remaining: i64,
    pub prayer_blocking: bool,
    pub prayer_window_active: bool,
    pub prayer_name: Option<Prayer>,
}

#[derive(Debug, Clone, PartialEq, Serialize, TS)]
#[serde(untagged)]
#[ts(export)]
pub enum Reply {
    Ack,
    Status(StatusReport),
    Focus(FocusStatus),
    Grant {
        grant: AccessGrant,
        #[serde(rename = "redirectDelayMs")]
        redirect_delay_ms: u32,
    },
    Intent {
        url: Option<String>,
    },
    Sites {
        sites: Vec<String>,
    },
    PrayerTimes {
        date: String,
        times: BTreeMap<String, String>,
    },
    NextPrayer {
        next: Option<NextPrayer>,
    },
    Bypass {
        questionnaire: bool,
        grant: Option<AccessGrant>,
    },
}

/// `{ ok: true, data }` or `{ ok: false, error }`.
#[derive(Debug, Clone, PartialEq, Serialize, TS)]
#[ts(export)]
pub struct Response {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub data: Option<Reply>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub error: Option<String>,
}

impl Response {
    pub fn success(reply: Reply) -> Self {
        Self {
            ok: true,
            data: Some(reply),
            error: None,
        }
    }

    pub fn failure(error: &EngineError) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(error.to_string()),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            format!(r#"{{"ok":false,"error":"unserializable response: {e}"}}"#)
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn page_bindings_use_plain_numbers() {
        let decl = Command::decl();
        assert!(!decl.contains("bigint"), "{decl}");
        assert!(decl.contains("duration: number"), "{decl}");
        assert!(decl.contains("minutes: number"), "{decl}");
        assert!(!StatusReport::decl().contains("bigint"));
    }

    #[test]
    fn decodes_page_messages() {
        assert_eq!(
            Command::parse(r#"{"action":"startFocusMode","duration":25}"#).unwrap(),
            Command::StartFocus { duration: 25 }
        );
        assert_eq!(
            Command::parse(r#"{"action":"grantAccess","url":"https://youtube.com/","duration":10}"#)
                .unwrap(),
            Command::GrantAccess {
                url: "https://youtube.com/".to_string(),
                duration: 10
            }
        );
        assert_eq!(
            Command::parse(r#"{"action":"getIntent","sessionId":7}"#).unwrap(),
            Command::GetIntent { session_id: 7 }
        );
        assert_eq!(
            Command::parse(r#"{"action":"setLocation","location":{"kind":"coordinates","latitude":21.4,"longitude":39.8}}"#)
                .unwrap(),
            Command::SetLocation {
                location: Location::Coordinates {
                    latitude: 21.4,
                    longitude: 39.8
                }
            }
        );
    }

    #[test]
    fn distinguishes_unknown_from_malformed() {
        assert!(matches!(
            Command::parse(r#"{"action":"selfDestruct"}"#),
            Err(EngineError::UnknownCommand(a)) if a == "selfDestruct"
        ));
        assert!(matches!(
            Command::parse(r#"{"action":"startFocusMode","duration":"soon"}"#),
            Err(EngineError::MalformedCommand(_))
        ));
        assert!(matches!(
            Command::parse(r#"{"duration":25}"#),
            Err(EngineError::MalformedCommand(_))
        ));
        assert!(matches!(
            Command::parse("not json"),
            Err(EngineError::MalformedCommand(_))
        ));
    }

    #[test]
    fn action_names_agree_with_serde() {
        let samples = vec![
            Command::StartFocus { duration: 1 },
            Command::StopFocus,
            Command::GrantAccess {
                url: String::new(),
                duration: 1,
            },
            Command::CheckStatus,
            Command::GetIntent { session_id: 1 },
            Command::RefreshPrayerTimes,
            Command::CloseSession { session_id: 1 },
            Command::AddSite {
                site: String::new(),
            },
            Command::RemoveSite {
                site: String::new(),
            },
            Command::ListSites,
            Command::SetPrayerBlocking { enabled: true },
            Command::SetPrayerDuration { minutes: 20 },
            Command::SetLocation {
                location: Location::City {
                    city: String::new(),
                    country: String::new(),
                },
            },
            Command::NextPrayer,
            Command::BypassTarget { url: String::new() },
        ];
        assert_eq!(samples.len(), CommandKind::ALL.len());

        for command in samples {
            let json = serde_json::to_value(&command).unwrap();
            assert_eq!(json["action"], json!(command.kind().action()));
            assert_eq!(Command::from_value(json).unwrap(), command);
        }
    }

    #[test]
    fn response_envelope_shape() {
        let ok = Response::success(Reply::Intent {
            url: Some("https://youtube.com/".to_string()),
        });
        assert_eq!(
            serde_json::to_value(&ok).unwrap(),
            json!({ "ok": true, "data": { "url": "https://youtube.com/" } })
        );

        let status = Response::success(Reply::Status(StatusReport {
            focus_active: true,
            seconds_remaining: 1500,
            prayer_blocking: true,
            prayer_window_active: false,
            prayer_name: None,
        }));
        assert_eq!(
            serde_json::to_value(&status).unwrap()["data"],
            json!({
                "focusActive": true,
                "secondsRemaining": 1500,
                "prayerBlocking": true,
                "prayerWindowActive": false,
                "prayerName": null
            })
        );

        let err = Response::failure(&EngineError::UnknownCommand("nope".to_string()));
        assert_eq!(
            serde_json::to_value(&err).unwrap(),
            json!({ "ok": false, "error": "Unknown command: nope" })
        );
    }
}
