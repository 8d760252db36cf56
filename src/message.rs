//! NIP-01 frames exchanged with relays.
//!
//! Outbound frames are built from [`ClientMessage`]. Inbound text is decoded
//! exactly once into [`RelayMessage`] at the connection boundary so callers
//! match on variants instead of probing array positions.

use serde_json::Value;

use crate::{error::Result, event::Event, filter::Filter};

/// Frames sent from this node to a relay.
#[derive(Debug)]
pub enum ClientMessage<'a> {
    /// `["EVENT", <event>]`
    Event(&'a Event),
    /// `["REQ", <sub_id>, <filter>...]`
    Req {
        subscription_id: &'a str,
        filters: &'a [Filter],
    },
    /// `["CLOSE", <sub_id>]`
    Close(&'a str),
}

impl ClientMessage<'_> {
    /// Serialize the frame to its JSON text form.
    pub fn to_json(&self) -> Result<String> {
        let val = match self {
            ClientMessage::Event(ev) => {
                Value::Array(vec![Value::String("EVENT".into()), serde_json::to_value(ev)?])
            }
            ClientMessage::Req {
                subscription_id,
                filters,
            } => {
                let mut arr = vec![
                    Value::String("REQ".into()),
                    Value::String(subscription_id.to_string()),
                ];
                arr.extend(filters.iter().map(|f| Value::Object(f.to_json())));
                Value::Array(arr)
            }
            ClientMessage::Close(sub) => Value::Array(vec![
                Value::String("CLOSE".into()),
                Value::String(sub.to_string()),
            ]),
        };
        Ok(val.to_string())
    }
}

/// Frames received from a relay.
#[derive(Debug, Clone, PartialEq)]
pub enum RelayMessage {
    /// `["OK", <event_id>, <accepted>, <message>]`
    Ok {
        event_id: String,
        accepted: bool,
        message: String,
    },
    /// `["EVENT", <sub_id>, <event>]`
    Event {
        subscription_id: String,
        event: Box<Event>,
    },
    /// `["EOSE", <sub_id>]`
    Eose { subscription_id: String },
    /// `["CLOSED", <sub_id>, <reason>]`
    Closed {
        subscription_id: String,
        message: String,
    },
    /// `["NOTICE", <message>]`
    Notice { message: String },
    /// Well-formed frame with a label this node does not handle (`AUTH`, `COUNT`, ...).
    Unknown(String),
}

impl RelayMessage {
    /// Decode one text frame. The error string describes why the frame is
    /// malformed; callers wrap it in a protocol error for the relay.
    pub fn parse(text: &str) -> std::result::Result<Self, String> {
        let val: Value = serde_json::from_str(text).map_err(|e| format!("invalid json: {e}"))?;
        let arr = val.as_array().ok_or("frame is not an array")?;
        let label = arr
            .first()
            .and_then(|v| v.as_str())
            .ok_or("frame has no label")?;
        match label {
            "OK" => {
                let event_id = str_at(arr, 1).ok_or("OK without event id")?;
                let accepted = arr
                    .get(2)
                    .and_then(Value::as_bool)
                    .ok_or("OK without boolean status")?;
                let message = str_at(arr, 3).unwrap_or_default();
                Ok(RelayMessage::Ok {
                    event_id,
                    accepted,
                    message,
                })
            }
            "EVENT" => {
                let subscription_id = str_at(arr, 1).ok_or("EVENT without subscription id")?;
                let ev_val = arr.get(2).ok_or("EVENT without event")?;
                let event = serde_json::from_value::<Event>(ev_val.clone())
                    .map_err(|e| format!("malformed event: {e}"))?;
                Ok(RelayMessage::Event {
                    subscription_id,
                    event: Box::new(event),
                })
            }
            "EOSE" => Ok(RelayMessage::Eose {
                subscription_id: str_at(arr, 1).ok_or("EOSE without subscription id")?,
            }),
            "CLOSED" => Ok(RelayMessage::Closed {
                subscription_id: str_at(arr, 1).ok_or("CLOSED without subscription id")?,
                message: str_at(arr, 2).unwrap_or_default(),
            }),
            "NOTICE" => Ok(RelayMessage::Notice {
                message: str_at(arr, 1).unwrap_or_default(),
            }),
            other => Ok(RelayMessage::Unknown(other.to_string())),
        }
    }
}

fn str_at(arr: &[Value], idx: usize) -> Option<String> {
    arr.get(idx).and_then(|v| v.as_str()).map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Tag;

    fn sample_event() -> Event {
        Event {
            id: "aa11".into(),
            pubkey: "p1".into(),
            kind: 1311,
            created_at: 1,
            tags: vec![Tag::new("a", ["30311:p1:d"])],
            content: "hi".into(),
            sig: "ss".into(),
        }
    }

    #[test]
    fn event_frame() {
        let ev = sample_event();
        let txt = ClientMessage::Event(&ev).to_json().unwrap();
        let val: Value = serde_json::from_str(&txt).unwrap();
        assert_eq!(val[0], "EVENT");
        assert_eq!(val[1]["id"], "aa11");
        assert_eq!(val[1]["tags"], serde_json::json!([["a", "30311:p1:d"]]));
    }

    #[test]
    fn req_frame_with_filters() {
        let filters = vec![Filter::new().kind(1311), Filter::new().id("aa11")];
        let txt = ClientMessage::Req {
            subscription_id: "sub1",
            filters: &filters,
        }
        .to_json()
        .unwrap();
        assert_eq!(
            txt,
            r#"["REQ","sub1",{"kinds":[1311]},{"ids":["aa11"]}]"#
        );
    }

    #[test]
    fn close_frame() {
        assert_eq!(
            ClientMessage::Close("s").to_json().unwrap(),
            r#"["CLOSE","s"]"#
        );
    }

    #[test]
    fn parses_ok() {
        let msg = RelayMessage::parse(r#"["OK","aa11",false,"blocked: test"]"#).unwrap();
        assert_eq!(
            msg,
            RelayMessage::Ok {
                event_id: "aa11".into(),
                accepted: false,
                message: "blocked: test".into()
            }
        );
        let short = RelayMessage::parse(r#"["OK","aa11",true]"#).unwrap();
        assert!(matches!(short, RelayMessage::Ok { accepted: true, .. }));
    }

    #[test]
    fn ok_with_non_bool_status_is_malformed() {
        assert!(RelayMessage::parse(r#"["OK","aa11","true",""]"#).is_err());
    }

    #[test]
    fn parses_event_eose_closed_notice() {
        let txt = serde_json::json!(["EVENT", "s", sample_event()]).to_string();
        match RelayMessage::parse(&txt).unwrap() {
            RelayMessage::Event {
                subscription_id,
                event,
            } => {
                assert_eq!(subscription_id, "s");
                assert_eq!(*event, sample_event());
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(
            RelayMessage::parse(r#"["EOSE","s"]"#).unwrap(),
            RelayMessage::Eose {
                subscription_id: "s".into()
            }
        );
        assert_eq!(
            RelayMessage::parse(r#"["CLOSED","s","error: shutting down"]"#).unwrap(),
            RelayMessage::Closed {
                subscription_id: "s".into(),
                message: "error: shutting down".into()
            }
        );
        assert_eq!(
            RelayMessage::parse(r#"["NOTICE","slow down"]"#).unwrap(),
            RelayMessage::Notice {
                message: "slow down".into()
            }
        );
    }

    #[test]
    fn unknown_label_is_not_an_error() {
        assert_eq!(
            RelayMessage::parse(r#"["AUTH","challenge"]"#).unwrap(),
            RelayMessage::Unknown("AUTH".into())
        );
    }

    #[test]
    fn malformed_frames_are_rejected() {
        for txt in ["not json", "{}", "[]", "[1,2]", r#"["EVENT","s",{"id":1}]"#, r#"["EOSE"]"#] {
            assert!(RelayMessage::parse(txt).is_err(), "{txt}");
        }
    }
}
