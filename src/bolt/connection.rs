// Client side of a Bolt session: version handshake, authentication, goodbye
// Queries are never run; only connectivity checks use this

use crate::bolt::chunk;
use crate::bolt::packstream::{self, Value};
use crate::compose::ports::ServiceEndpoint;
use crate::errors::{HarnessError, Result};
use crate::probe;
use std::collections::BTreeMap;
use std::fmt;
use std::io::{Read, Write};
use std::net::{Shutdown, TcpStream};
use std::time::Duration;
use tracing::debug;

/// Preamble every Bolt client sends before its version proposals
pub const MAGIC: [u8; 4] = [0x60, 0x60, 0xB0, 0x17];

/// Version proposals as `[0, range, minor, major]`, most preferred first
pub const PROPOSALS: [[u8; 4]; 4] = [
    [0x00, 0x04, 0x04, 0x05], // 5.4 down to 5.0
    [0x00, 0x02, 0x04, 0x04], // 4.4 down to 4.2
    [0x00, 0x00, 0x01, 0x04], // 4.1
    [0x00, 0x00, 0x00, 0x03], // 3.0
];

pub mod tag {
    pub const HELLO: u8 = 0x01;
    pub const GOODBYE: u8 = 0x02;
    pub const LOGON: u8 = 0x6A;
    pub const SUCCESS: u8 = 0x70;
    pub const RECORD: u8 = 0x71;
    pub const IGNORED: u8 = 0x7E;
    pub const FAILURE: u8 = 0x7F;
}

const USER_AGENT: &str = concat!("composeprobe/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct BoltVersion {
    pub major: u8,
    pub minor: u8,
}

impl BoltVersion {
    pub const fn new(major: u8, minor: u8) -> Self {
        Self { major, minor }
    }

    /// Parse the server's 4-byte handshake answer
    pub fn from_handshake(bytes: [u8; 4]) -> Result<Self> {
        if &bytes == b"HTTP" {
            return Err(HarnessError::Protocol(
                "server answered the handshake with HTTP; this is not a Bolt port".to_string(),
            ));
        }
        if bytes == [0, 0, 0, 0] {
            return Err(HarnessError::Protocol(
                "server does not support any proposed Bolt version".to_string(),
            ));
        }
        Ok(Self::new(bytes[3], bytes[2]))
    }

    /// Authentication moved from HELLO to a separate LOGON message in 5.1
    pub fn uses_logon(&self) -> bool {
        *self >= BoltVersion::new(5, 1)
    }

    pub fn requires_bolt_agent(&self) -> bool {
        *self >= BoltVersion::new(5, 3)
    }
}

impl fmt::Display for BoltVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Server summary messages
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    Success(BTreeMap<String, Value>),
    Failure { code: String, message: String },
    Ignored,
    Record(Vec<Value>),
}

impl Response {
    pub fn from_value(value: Value) -> Result<Self> {
        let (tag, mut fields) = match value {
            Value::Structure { tag, fields } => (tag, fields),
            other => {
                return Err(HarnessError::Protocol(format!(
                    "expected a message structure, got {:?}",
                    other
                )))
            }
        };

        let metadata = |fields: &mut Vec<Value>| match fields.pop() {
            Some(Value::Map(m)) => m,
            _ => BTreeMap::new(),
        };

        match tag {
            tag::SUCCESS => Ok(Response::Success(metadata(&mut fields))),
            tag::FAILURE => {
                let meta = metadata(&mut fields);
                let text = |key: &str| {
                    meta.get(key)
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string()
                };
                Ok(Response::Failure {
                    code: text("code"),
                    message: text("message"),
                })
            }
            tag::IGNORED => Ok(Response::Ignored),
            tag::RECORD => match fields.pop() {
                Some(Value::List(values)) => Ok(Response::Record(values)),
                _ => Ok(Response::Record(Vec::new())),
            },
            other => Err(HarnessError::Protocol(format!(
                "unexpected message 0x{:02X} from server",
                other
            ))),
        }
    }
}

#[derive(Debug)]
pub struct BoltConnection {
    stream: TcpStream,
    endpoint: String,
    version: BoltVersion,
}

impl BoltConnection {
    /// Connect and negotiate a protocol version. No authentication happens yet.
    pub fn connect(endpoint: &ServiceEndpoint, timeout: Duration) -> Result<Self> {
        let mut stream = probe::connect_tcp(endpoint, timeout)?;
        let endpoint = endpoint.to_string();
        let io_error = |e: std::io::Error| HarnessError::Connectivity {
            endpoint: endpoint.clone(),
            message: e.to_string(),
        };

        stream.set_read_timeout(Some(timeout)).map_err(io_error)?;
        stream.set_write_timeout(Some(timeout)).map_err(io_error)?;
        stream.set_nodelay(true).map_err(io_error)?;

        let mut handshake = Vec::with_capacity(20);
        handshake.extend_from_slice(&MAGIC);
        for proposal in PROPOSALS {
            handshake.extend_from_slice(&proposal);
        }
        stream.write_all(&handshake).map_err(io_error)?;

        let mut answer = [0u8; 4];
        stream.read_exact(&mut answer).map_err(io_error)?;
        let version = BoltVersion::from_handshake(answer)?;

        debug!(%endpoint, %version, "negotiated Bolt version");
        Ok(Self {
            stream,
            endpoint,
            version,
        })
    }

    pub fn version(&self) -> BoltVersion {
        self.version
    }

    /// Authenticate with the basic scheme. Returns the server's metadata on success.
    pub fn authenticate(&mut self, user: &str, password: &str) -> Result<BTreeMap<String, Value>> {
        let mut extra = BTreeMap::new();
        extra.insert("user_agent".to_string(), Value::from(USER_AGENT));
        if self.version.requires_bolt_agent() {
            extra.insert(
                "bolt_agent".to_string(),
                packstream::map([("product", Value::from(USER_AGENT))]),
            );
        }

        let auth = [
            ("scheme", Value::from("basic")),
            ("principal", Value::from(user)),
            ("credentials", Value::from(password)),
        ];

        if self.version.uses_logon() {
            self.send(tag::HELLO, vec![Value::Map(extra)])?;
            let hello = self.expect_success()?;
            self.send(tag::LOGON, vec![packstream::map(auth)])?;
            let mut logon = self.expect_success()?;
            logon.extend(hello);
            Ok(logon)
        } else {
            extra.extend(auth.into_iter().map(|(k, v)| (k.to_string(), v)));
            self.send(tag::HELLO, vec![Value::Map(extra)])?;
            self.expect_success()
        }
    }

    /// End the session politely
    pub fn goodbye(mut self) -> Result<()> {
        self.send(tag::GOODBYE, Vec::new())?;
        let _ = self.stream.shutdown(Shutdown::Both);
        Ok(())
    }

    /// Best-effort goodbye, ignoring failures
    pub fn close(self) {
        let _ = self.goodbye();
    }

    fn send(&mut self, message: u8, fields: Vec<Value>) -> Result<()> {
        let mut payload = Vec::new();
        packstream::encode(&Value::Structure { tag: message, fields }, &mut payload)?;
        chunk::write_message(&mut self.stream, &payload).map_err(|e| self.io_error(e))
    }

    pub fn receive(&mut self) -> Result<Response> {
        let payload = chunk::read_message(&mut self.stream).map_err(|e| self.io_error(e))?;
        Response::from_value(packstream::decode(&payload)?)
    }

    fn expect_success(&mut self) -> Result<BTreeMap<String, Value>> {
        match self.receive()? {
            Response::Success(metadata) => Ok(metadata),
            Response::Failure { code, message } if code.starts_with("Neo.ClientError.Security.") => {
                Err(HarnessError::AuthenticationFailed { code, message })
            }
            Response::Failure { code, message } => {
                Err(HarnessError::Protocol(format!("{}: {}", code, message)))
            }
            Response::Ignored => Err(HarnessError::Protocol(
                "server ignored the request".to_string(),
            )),
            Response::Record(_) => Err(HarnessError::Protocol(
                "unexpected RECORD before summary".to_string(),
            )),
        }
    }

    fn io_error(&self, e: std::io::Error) -> HarnessError {
        HarnessError::Connectivity {
            endpoint: self.endpoint.clone(),
            message: e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_from_handshake() {
        assert_eq!(
            BoltVersion::from_handshake([0, 0, 4, 5]).unwrap(),
            BoltVersion::new(5, 4)
        );
        assert_eq!(
            BoltVersion::from_handshake([0, 0, 4, 4]).unwrap().to_string(),
            "4.4"
        );
    }

    #[test]
    fn test_handshake_rejections() {
        let none = BoltVersion::from_handshake([0, 0, 0, 0]).unwrap_err();
        assert!(none.to_string().contains("any proposed Bolt version"));

        let http = BoltVersion::from_handshake(*b"HTTP").unwrap_err();
        assert!(http.to_string().contains("not a Bolt port"));
    }

    #[test]
    fn test_logon_threshold() {
        assert!(!BoltVersion::new(4, 4).uses_logon());
        assert!(!BoltVersion::new(5, 0).uses_logon());
        assert!(BoltVersion::new(5, 1).uses_logon());
        assert!(!BoltVersion::new(5, 2).requires_bolt_agent());
        assert!(BoltVersion::new(5, 4).requires_bolt_agent());
    }

    #[test]
    fn test_failure_response() {
        let value = Value::Structure {
            tag: tag::FAILURE,
            fields: vec![packstream::map([
                ("code", Value::from("Neo.ClientError.Security.Unauthorized")),
                ("message", Value::from("The client is unauthorized")),
            ])],
        };
        assert_eq!(
            Response::from_value(value).unwrap(),
            Response::Failure {
                code: "Neo.ClientError.Security.Unauthorized".to_string(),
                message: "The client is unauthorized".to_string(),
            }
        );
    }

    #[test]
    fn test_unknown_message_rejected() {
        let value = Value::Structure {
            tag: 0x10,
            fields: Vec::new(),
        };
        assert!(Response::from_value(value).is_err());
        assert!(Response::from_value(Value::Null).is_err());
    }
}
