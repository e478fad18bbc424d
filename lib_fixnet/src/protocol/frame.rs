//! # Frames and Requests
//!
//! Every line received from the gateway is one of three frames:
//!
//! - `#q<payload>`: an unsolicited report push.
//! - `@<tag><payload>`: the answer to the single outstanding request whose tag
//!   letter is `tag`.
//! - anything else: a data sentence `id;value[;bits]`.
//!
//! Outbound commands are built with [`Request`], which also knows the tag the
//! matching response will carry.

use crate::error::{FixNetError, ProtocolError};
use crate::protocol::flags::{QualityFlag, QualityFlags};

/// Prefix of a pushed report frame.
pub const REPORT_PUSH_PREFIX: &str = "#q";

/// A decoded line.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    PushReport(String),
    Response { tag: char, payload: String },
    Data(DataUpdate),
}

/// A value sentence: pushed by the server, or returned by `read`/`write_value`.
#[derive(Debug, Clone, PartialEq)]
pub struct DataUpdate {
    pub id: String,
    pub value: String,
    /// `None` when the sentence carried only `id;value`.
    pub flags: Option<QualityFlags>,
}

/// Result of a `read` request.
pub type ReadResult = DataUpdate;

/// Result of an echoed `write_value` request.
pub type WriteEcho = DataUpdate;

impl DataUpdate {
    /// Splits `base.aux` ids. Returns `None` for plain keys.
    pub fn aux_target(&self) -> Option<(&str, &str)> {
        self.id.split_once('.')
    }
}

/// Decodes one line (without its terminating newline).
pub fn decode_frame(line: &str) -> Result<Frame, ProtocolError> {
    if line.is_empty() {
        return Err(ProtocolError::EmptyFrame);
    }
    if let Some(payload) = line.strip_prefix(REPORT_PUSH_PREFIX) {
        return Ok(Frame::PushReport(payload.to_string()));
    }
    if let Some(rest) = line.strip_prefix('@') {
        let mut chars = rest.chars();
        let tag = chars.next().ok_or(ProtocolError::MissingTag)?;
        return Ok(Frame::Response {
            tag,
            payload: chars.as_str().to_string(),
        });
    }
    parse_sentence(line).map(Frame::Data)
}

/// Parses `id;value` or `id;value;bits`.
pub fn parse_sentence(text: &str) -> Result<DataUpdate, ProtocolError> {
    let fields: Vec<&str> = text.split(';').collect();
    match fields.as_slice() {
        [id, value] if !id.is_empty() => Ok(DataUpdate {
            id: id.to_string(),
            value: value.to_string(),
            flags: None,
        }),
        [id, value, bits] if !id.is_empty() => Ok(DataUpdate {
            id: id.to_string(),
            value: value.to_string(),
            flags: Some(QualityFlags::from_bits(bits)?),
        }),
        _ => Err(ProtocolError::BadSentence(text.to_string())),
    }
}

/// Splits an error payload `subject!code` into its parts.
pub fn server_error(payload: &str) -> Option<(&str, &str)> {
    payload
        .split_once('!')
        .map(|(subject, code)| (subject, code.trim()))
}

/// Decodes a `read`/`write_value` response payload.
pub fn decode_data_response(payload: &str) -> Result<DataUpdate, FixNetError> {
    if let Some((subject, code)) = server_error(payload) {
        return Err(FixNetError::from_server_code(subject, code));
    }
    Ok(parse_sentence(payload)?)
}

/// An outbound command.
#[derive(Debug, Clone, PartialEq)]
pub enum Request<'a> {
    Read(&'a str),
    WriteValue { id: &'a str, value: &'a str },
    Write {
        id: &'a str,
        value: &'a str,
        flags: QualityFlags,
    },
    Flag {
        id: &'a str,
        flag: QualityFlag,
        setting: bool,
    },
    Subscribe(&'a str),
    Unsubscribe(&'a str),
    SubscribeReport { id: &'a str, interval_ms: u64 },
    UnsubscribeReport(&'a str),
    Report(&'a str),
    List,
    Status,
    Kill,
}

impl Request<'_> {
    /// Tag letter of the response, `None` for fire-and-forget writes.
    pub fn tag(&self) -> Option<char> {
        match self {
            Request::Read(_) => Some('r'),
            Request::WriteValue { .. } => Some('w'),
            Request::Write { .. } => None,
            Request::Flag { .. } => Some('f'),
            Request::Subscribe(_) => Some('s'),
            Request::Unsubscribe(_) => Some('u'),
            Request::SubscribeReport { .. } => Some('Q'),
            Request::UnsubscribeReport(_) => Some('U'),
            Request::Report(_) => Some('q'),
            Request::List => Some('l'),
            Request::Status | Request::Kill => Some('x'),
        }
    }

    /// The newline terminated command line.
    pub fn encode(&self) -> String {
        match self {
            Request::Read(id) => format!("@r{}\n", id),
            Request::WriteValue { id, value } => format!("@w{};{}\n", id, value),
            Request::Write { id, value, flags } => {
                format!("{};{};{}\n", id, value, flags.to_bits())
            }
            Request::Flag { id, flag, setting } => format!(
                "@f{};{};{}\n",
                id,
                flag.letter(),
                if *setting { '1' } else { '0' }
            ),
            Request::Subscribe(id) => format!("@s{}\n", id),
            Request::Unsubscribe(id) => format!("@u{}\n", id),
            Request::SubscribeReport { id, interval_ms } => format!("@Q{};{}\n", id, interval_ms),
            Request::UnsubscribeReport(id) => format!("@UQ{}\n", id),
            Request::Report(id) => format!("@q{}\n", id),
            Request::List => "@l\n".to_string(),
            Request::Status => "@xstatus\n".to_string(),
            Request::Kill => "@xkill\n".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_sentence_with_flags() {
        let frame = decode_frame("AOA;12.3;10100").unwrap();
        let Frame::Data(update) = frame else {
            panic!("expected a data frame");
        };
        assert_eq!(update.id, "AOA");
        assert_eq!(update.value, "12.3");
        let flags = update.flags.unwrap();
        assert!(flags.annunciate && flags.bad);
        assert!(!flags.old && !flags.fail && !flags.sec_fail);
    }

    #[test]
    fn value_only_sentence() {
        let update = parse_sentence("IAS.Min;30").unwrap();
        assert_eq!(update.flags, None);
        assert_eq!(update.aux_target(), Some(("IAS", "Min")));
    }

    #[test]
    fn response_and_push_frames() {
        assert_eq!(
            decode_frame("@rAOA;12.3;10100").unwrap(),
            Frame::Response {
                tag: 'r',
                payload: "AOA;12.3;10100".into()
            }
        );
        assert_eq!(
            decode_frame("#qAOA;Angle;float").unwrap(),
            Frame::PushReport("AOA;Angle;float".into())
        );
        assert_eq!(decode_frame("@"), Err(ProtocolError::MissingTag));
        assert_eq!(decode_frame(""), Err(ProtocolError::EmptyFrame));
    }

    #[test]
    fn malformed_sentences_are_protocol_errors() {
        assert!(matches!(
            decode_frame("AOA"),
            Err(ProtocolError::BadSentence(_))
        ));
        assert!(matches!(
            decode_frame("AOA;1;2;3"),
            Err(ProtocolError::BadSentence(_))
        ));
        assert!(matches!(
            decode_frame("AOA;1;1x"),
            Err(ProtocolError::BadFlags(_))
        ));
    }

    #[test]
    fn read_response_decodes_letters() {
        let res = decode_data_response("AOA;12.3;10100").unwrap();
        assert_eq!(res.id, "AOA");
        assert_eq!(res.value, "12.3");
        assert_eq!(res.flags.unwrap().letters(), "ab");

        let err = decode_data_response("XYZ!001").unwrap_err();
        assert!(matches!(err, FixNetError::KeyNotFound(k) if k == "XYZ"));
    }

    #[test]
    fn requests_encode_with_tags() {
        let flags = QualityFlags::from_letters("ab");
        let write = Request::Write {
            id: "AOA",
            value: "1.5",
            flags,
        };
        assert_eq!(write.encode(), "AOA;1.5;10100\n");
        assert_eq!(write.tag(), None);

        let flag = Request::Flag {
            id: "AOA",
            flag: QualityFlag::Bad,
            setting: true,
        };
        assert_eq!(flag.encode(), "@fAOA;b;1\n");
        assert_eq!(
            Request::SubscribeReport {
                id: "AOA",
                interval_ms: 1000
            }
            .encode(),
            "@QAOA;1000\n"
        );
        assert_eq!(Request::UnsubscribeReport("AOA").tag(), Some('U'));
        assert_eq!(Request::Status.encode(), "@xstatus\n");
    }
}
