//! Line format spoken with credential helpers.
//!
//! Request: `<user> <password>\n`, each field percent-escaped.
//! Reply: `OK [message]` or `<anything else> [message]`.

use crate::credentials::Credentials;

/// Helper verdict for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Credentials accepted.
    Accepted,
    /// Credentials rejected, with the helper's explanation when it gave one.
    Rejected(Option<String>),
}

/// Build the request line for `credentials`.
///
/// With `utf8` set, each field is treated as Latin-1 and transcoded to UTF-8
/// before escaping.
#[must_use]
pub fn encode_request(credentials: &Credentials, utf8: bool) -> String {
    let user = escape_field(credentials.username(), utf8);
    let pass = escape_field(credentials.password(), utf8);
    format!("{user} {pass}\n")
}

fn escape_field(field: &[u8], utf8: bool) -> String {
    if utf8 {
        let transcoded: String = field.iter().copied().map(char::from).collect();
        urlencoding::encode_binary(transcoded.as_bytes()).into_owned()
    } else {
        urlencoding::encode_binary(field).into_owned()
    }
}

/// Interpret one reply line from a helper.
#[must_use]
pub fn parse_reply(line: &str) -> Verdict {
    let line = line.trim_end_matches(['\r', '\n']);
    let (status, message) = match line.split_once(' ') {
        Some((status, message)) => (status, Some(message)),
        None => (line, None),
    };
    if status.eq_ignore_ascii_case("OK") {
        return Verdict::Accepted;
    }
    Verdict::Rejected(message.filter(|text| !text.is_empty()).map(str::to_string))
}
