use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::{
	fmt::{self, Display},
	time::{Duration, Instant},
};

use crate::{error::Error, request_id::ClientId};

pub const JSONRPC_VERSION: &str = "2.0";

/// Upstream methods and notifications of the two standing subscriptions
pub const SUBSCRIBE_FINALIZED_HEADS: &str = "chain_subscribeFinalizedHeads";
pub const UNSUBSCRIBE_FINALIZED_HEADS: &str = "chain_unsubscribeFinalizedHeads";
pub const FINALIZED_HEAD_NOTIFICATION: &str = "chain_finalizedHead";
pub const SUBSCRIBE_JUSTIFICATIONS: &str = "grandpa_subscribeJustifications";
pub const UNSUBSCRIBE_JUSTIFICATIONS: &str = "grandpa_unsubscribeJustifications";
pub const JUSTIFICATION_NOTIFICATION: &str = "grandpa_justifications";

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum Topic {
	FinalizedHeadStream,
	JustificationStream,
}

impl Topic {
	pub const ALL: [Topic; 2] = [Topic::FinalizedHeadStream, Topic::JustificationStream];

	pub fn name(&self) -> &'static str {
		match self {
			Topic::FinalizedHeadStream => "finalized-head-stream",
			Topic::JustificationStream => "justification-stream",
		}
	}

	pub fn subscribe_method(&self) -> &'static str {
		match self {
			Topic::FinalizedHeadStream => SUBSCRIBE_FINALIZED_HEADS,
			Topic::JustificationStream => SUBSCRIBE_JUSTIFICATIONS,
		}
	}

	pub fn from_subscribe_method(method: &str) -> Option<Self> {
		Self::ALL
			.into_iter()
			.find(|topic| topic.subscribe_method() == method)
	}

	pub fn from_unsubscribe_method(method: &str) -> Option<Self> {
		match method {
			UNSUBSCRIBE_FINALIZED_HEADS => Some(Topic::FinalizedHeadStream),
			UNSUBSCRIBE_JUSTIFICATIONS => Some(Topic::JustificationStream),
			_ => None,
		}
	}

	pub fn from_notification_method(method: &str) -> Option<Self> {
		match method {
			FINALIZED_HEAD_NOTIFICATION => Some(Topic::FinalizedHeadStream),
			JUSTIFICATION_NOTIFICATION => Some(Topic::JustificationStream),
			_ => None,
		}
	}
}

impl Display for Topic {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.name())
	}
}

/// JSON-RPC 2.0 request as received from a client
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Request {
	pub jsonrpc: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub id: Option<ClientId>,
	pub method: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub params: Option<Value>,
}

impl TryFrom<&str> for Request {
	type Error = Error;

	fn try_from(text: &str) -> Result<Self, Self::Error> {
		let request: Request =
			serde_json::from_str(text).map_err(|error| Error::MalformedRequest(error.to_string()))?;
		if request.jsonrpc != JSONRPC_VERSION {
			return Err(Error::MalformedRequest(format!(
				"Unsupported jsonrpc version {:?}",
				request.jsonrpc
			)));
		}
		Ok(request)
	}
}

impl Request {
	pub fn new(id: Option<ClientId>, method: &str, params: Option<Value>) -> Self {
		Request {
			jsonrpc: JSONRPC_VERSION.to_string(),
			id,
			method: method.to_string(),
			params,
		}
	}

	/// Serializes the request with its `id` replaced by the given upstream value
	pub fn to_upstream(&self, id: &str) -> Result<String, Error> {
		let mut frame = json!({
			"jsonrpc": JSONRPC_VERSION,
			"id": id,
			"method": self.method,
		});
		if let Some(params) = &self.params {
			frame["params"] = params.clone();
		}
		serde_json::to_string(&frame).map_err(|error| Error::MalformedRequest(error.to_string()))
	}

	pub fn fingerprint(&self) -> Result<Fingerprint, Error> {
		Fingerprint::new(&self.method, self.params.as_ref())
	}
}

/// Normalized identity of a call, independent of the envelope `id` and `jsonrpc` fields.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
	pub fn new(method: &str, params: Option<&Value>) -> Result<Self, Error> {
		#[derive(Serialize)]
		struct Call<'a> {
			method: &'a str,
			#[serde(skip_serializing_if = "Option::is_none")]
			params: Option<&'a Value>,
		}

		// object keys are sorted by `serde_json::Map`, nested params included
		serde_json::to_string(&Call { method, params })
			.map(Fingerprint)
			.map_err(|error| Error::MalformedRequest(error.to_string()))
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl Display for Fingerprint {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

/// Opaque JSON-RPC envelope received from the upstream node
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(transparent)]
pub struct Frame(pub Map<String, Value>);

impl Frame {
	pub fn id(&self) -> Option<&Value> {
		self.0.get("id").filter(|id| !id.is_null())
	}

	pub fn method(&self) -> Option<&str> {
		self.0.get("method").and_then(Value::as_str)
	}

	pub fn result(&self) -> Value {
		self.0.get("result").cloned().unwrap_or(Value::Null)
	}

	/// Notification params are considered present when not null and not empty
	pub fn has_params(&self) -> bool {
		match self.0.get("params") {
			None | Some(Value::Null) => false,
			Some(Value::Array(params)) => !params.is_empty(),
			Some(Value::Object(params)) => !params.is_empty(),
			Some(_) => true,
		}
	}

	pub fn with_id(mut self, id: &ClientId) -> Self {
		self.0.insert("id".to_string(), id.into());
		self
	}

	pub fn response(id: &ClientId, result: Value) -> Self {
		let mut frame = Map::new();
		frame.insert("jsonrpc".to_string(), JSONRPC_VERSION.into());
		frame.insert("id".to_string(), id.into());
		frame.insert("result".to_string(), result);
		Frame(frame)
	}

	pub fn error(id: &ClientId, error: &Error) -> Self {
		let mut frame = Map::new();
		frame.insert("jsonrpc".to_string(), JSONRPC_VERSION.into());
		frame.insert("id".to_string(), id.into());
		frame.insert(
			"error".to_string(),
			json!({ "code": error.code(), "message": error.to_string() }),
		);
		Frame(frame)
	}

	pub fn to_text(&self) -> Result<String, Error> {
		serde_json::to_string(&self.0).map_err(|error| Error::MalformedRequest(error.to_string()))
	}
}

impl TryFrom<&str> for Frame {
	type Error = serde_json::Error;

	fn try_from(text: &str) -> Result<Self, Self::Error> {
		serde_json::from_str(text)
	}
}

/// Subscription notification pushed by the upstream node
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
	pub topic: Topic,
	pub frame: Frame,
}

pub struct TimeToLive(pub Duration);

impl TimeToLive {
	/// Expiry at instant from now
	pub fn expires(&self) -> Option<Instant> {
		Instant::now().checked_add(self.0)
	}
}

pub mod tracing_level_format {
	use serde::{self, Deserialize, Deserializer, Serializer};
	use std::str::FromStr;
	use tracing::Level;

	pub fn serialize<S>(level: &Level, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		serializer.serialize_str(&level.to_string())
	}

	pub fn deserialize<'de, D>(deserializer: D) -> Result<Level, D::Error>
	where
		D: Deserializer<'de>,
	{
		let value = String::deserialize(deserializer)?;
		Level::from_str(&value).map_err(serde::de::Error::custom)
	}
}

pub mod duration_seconds_format {
	use serde::{self, Deserialize, Deserializer, Serializer};
	use std::time::Duration;

	pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		serializer.serialize_u64(duration.as_secs())
	}

	pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
	where
		D: Deserializer<'de>,
	{
		let value = u64::deserialize(deserializer)?;
		Ok(Duration::from_secs(value))
	}
}

pub mod duration_millis_format {
	use serde::{self, Deserialize, Deserializer, Serializer};
	use std::time::Duration;

	pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		serializer.serialize_u64(duration.as_millis() as u64)
	}

	pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
	where
		D: Deserializer<'de>,
	{
		let value = u64::deserialize(deserializer)?;
		Ok(Duration::from_millis(value))
	}
}
