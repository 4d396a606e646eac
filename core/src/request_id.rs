//! Namespacing of client request IDs inside the shared upstream connection.
//!
//! Every client session gets a fixed width [`SessionId`] (32 lowercase hex characters),
//! so an [`UpstreamId`] is decoded by splitting at that width. The remainder is a single
//! type tag (`n` for numeric, `s` for string IDs) followed by the client's original ID.

use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};
use std::{
	fmt::{self, Display},
	str::FromStr,
};

use crate::error::Error;

pub const SESSION_ID_LEN: usize = 32;
const NUMBER_TAG: char = 'n';
const STRING_TAG: char = 's';

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
#[serde(try_from = "String", into = "String")]
pub struct SessionId(String);

impl SessionId {
	pub fn generate() -> Self {
		SessionId(uuid::Uuid::new_v4().simple().to_string())
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl FromStr for SessionId {
	type Err = Error;

	fn from_str(value: &str) -> Result<Self, Self::Err> {
		let is_valid = value.len() == SESSION_ID_LEN
			&& value
				.chars()
				.all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c));
		if !is_valid {
			return Err(Error::MalformedId(format!("Invalid session id {value:?}")));
		}
		Ok(SessionId(value.to_string()))
	}
}

impl TryFrom<String> for SessionId {
	type Error = Error;

	fn try_from(value: String) -> Result<Self, Self::Error> {
		value.parse()
	}
}

impl From<SessionId> for String {
	fn from(value: SessionId) -> Self {
		value.0
	}
}

impl Display for SessionId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

/// Request ID chosen by the client, either a JSON number or a JSON string.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
#[serde(untagged)]
pub enum ClientId {
	Number(Number),
	String(String),
}

impl From<u64> for ClientId {
	fn from(value: u64) -> Self {
		ClientId::Number(value.into())
	}
}

impl From<&str> for ClientId {
	fn from(value: &str) -> Self {
		ClientId::String(value.to_string())
	}
}

impl From<&ClientId> for Value {
	fn from(value: &ClientId) -> Self {
		match value {
			ClientId::Number(number) => Value::Number(number.clone()),
			ClientId::String(string) => Value::String(string.clone()),
		}
	}
}

impl Display for ClientId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			ClientId::Number(number) => write!(f, "{number}"),
			ClientId::String(string) => write!(f, "{string:?}"),
		}
	}
}

/// Globally unique ID of one forwarded client request.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct UpstreamId(String);

impl UpstreamId {
	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl FromStr for UpstreamId {
	type Err = Error;

	fn from_str(value: &str) -> Result<Self, Self::Err> {
		decode(value)?;
		Ok(UpstreamId(value.to_string()))
	}
}

impl Display for UpstreamId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

pub fn encode(session_id: &SessionId, client_id: &ClientId) -> UpstreamId {
	UpstreamId(match client_id {
		ClientId::Number(number) => format!("{session_id}{NUMBER_TAG}{number}"),
		ClientId::String(string) => format!("{session_id}{STRING_TAG}{string}"),
	})
}

pub fn decode(upstream_id: &str) -> Result<(SessionId, ClientId), Error> {
	let malformed = || Error::MalformedId(upstream_id.to_string());

	let (session_id, rest) = match (
		upstream_id.get(..SESSION_ID_LEN),
		upstream_id.get(SESSION_ID_LEN..),
	) {
		(Some(session_id), Some(rest)) => (session_id, rest),
		_ => return Err(malformed()),
	};
	let session_id = session_id.parse::<SessionId>().map_err(|_| malformed())?;

	let mut chars = rest.chars();
	let client_id = match chars.next() {
		Some(NUMBER_TAG) => chars
			.as_str()
			.parse::<Number>()
			.map(ClientId::Number)
			.map_err(|_| malformed())?,
		Some(STRING_TAG) => ClientId::String(chars.as_str().to_string()),
		_ => return Err(malformed()),
	};

	Ok((session_id, client_id))
}

#[cfg(test)]
mod tests {
	use super::*;
	use proptest::prelude::*;
	use test_case::test_case;

	#[test]
	fn generated_session_ids_are_fixed_width() {
		let session_id = SessionId::generate();
		assert_eq!(session_id.as_str().len(), SESSION_ID_LEN);
		assert!(session_id.as_str().parse::<SessionId>().is_ok());
		assert_ne!(session_id, SessionId::generate());
	}

	#[test]
	fn encoded_shape() {
		let session_id: SessionId = "0123456789abcdef0123456789abcdef".parse().unwrap();
		assert_eq!(
			encode(&session_id, &ClientId::from(1)).as_str(),
			"0123456789abcdef0123456789abcdefn1"
		);
		assert_eq!(
			encode(&session_id, &ClientId::from("1")).as_str(),
			"0123456789abcdef0123456789abcdefs1"
		);
	}

	#[test]
	fn numeric_and_string_ids_do_not_collide() {
		let session_id = SessionId::generate();
		assert_ne!(
			encode(&session_id, &ClientId::from(12)),
			encode(&session_id, &ClientId::from("12"))
		);
	}

	#[test_case("" ; "Empty")]
	#[test_case("0123456789abcdef0123456789abcdef" ; "Missing tag")]
	#[test_case("0123456789abcdef0123456789abcdefx1" ; "Unknown tag")]
	#[test_case("0123456789abcdef0123456789abcdefnone" ; "Invalid number")]
	#[test_case("0123456789ABCDEF0123456789abcdefn1" ; "Uppercase session")]
	#[test_case("sub-finalized-head-stream-0123456789abcdef0123456789abcdef" ; "Reserved subscription id")]
	#[test_case("ééééééééééééééééééééééééééééééééén1" ; "Multibyte prefix")]
	fn decode_malformed(upstream_id: &str) {
		assert!(matches!(decode(upstream_id), Err(Error::MalformedId(_))));
	}

	#[test]
	fn string_ids_may_contain_anything() {
		let session_id = SessionId::generate();
		let client_id = ClientId::from("n42 \"quoted\" é");
		let decoded = decode(encode(&session_id, &client_id).as_str()).unwrap();
		assert_eq!(decoded, (session_id, client_id));
	}

	proptest! {
		#[test]
		fn round_trip(session in "[0-9a-f]{32}", number in any::<u64>(), string in ".*", negative in any::<i64>()) {
			let session_id: SessionId = session.parse().unwrap();
			for client_id in [
				ClientId::from(number),
				ClientId::Number(negative.into()),
				ClientId::String(string.clone()),
			] {
				let upstream_id = encode(&session_id, &client_id);
				prop_assert_eq!(decode(upstream_id.as_str()).unwrap(), (session_id.clone(), client_id));
			}
		}
	}
}
