use async_trait::async_trait;
use redis::{RedisError, Value};
use tracing::trace;

use pipefetch::{Command, PipelineConnection, Reply, StoreError};

/// A pooled Redis connection that sends each batch as one pipeline.
pub struct RedisConnection {
    pub(crate) inner: deadpool_redis::Connection,
}

impl std::fmt::Debug for RedisConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisConnection").finish_non_exhaustive()
    }
}

#[async_trait]
impl PipelineConnection for RedisConnection {
    async fn exchange(&mut self, commands: &[Command]) -> Result<Vec<Reply>, StoreError> {
        if commands.is_empty() {
            return Ok(Vec::new());
        }

        let pipe = build_pipeline(commands);
        trace!(commands = commands.len(), "sending redis pipeline");
        let values: Vec<Value> = pipe
            .query_async(&mut self.inner)
            .await
            .map_err(|e| classify(&e))?;

        values.into_iter().map(to_reply).collect()
    }
}

fn build_pipeline(commands: &[Command]) -> redis::Pipeline {
    let mut pipe = redis::pipe();
    for command in commands {
        let mut cmd = redis::cmd(command.name());
        for arg in command.args() {
            cmd.arg(arg);
        }
        pipe.add_command(cmd);
    }
    pipe
}

/// Map a driver error onto the store error taxonomy.
pub(crate) fn classify(error: &RedisError) -> StoreError {
    if error.is_timeout() {
        StoreError::timeout(error.to_string())
    } else if error.is_connection_dropped()
        || error.is_io_error()
        || error.is_connection_refusal()
    {
        StoreError::connection(error.to_string())
    } else {
        StoreError::protocol(error.to_string())
    }
}

/// Normalise a RESP2 or RESP3 value.
///
/// Maps become flat field/value arrays and sets become arrays, so hash and
/// member replies look the same under either protocol version.
fn to_reply(value: Value) -> Result<Reply, StoreError> {
    Ok(match value {
        Value::Nil => Reply::Nil,
        Value::Int(n) => Reply::Integer(n),
        Value::Boolean(b) => Reply::Integer(i64::from(b)),
        Value::BulkString(bytes) => Reply::Bulk(utf8(bytes)?),
        Value::SimpleString(s) => Reply::Bulk(s),
        Value::Okay => Reply::Bulk(String::from("OK")),
        Value::Double(d) => Reply::Bulk(d.to_string()),
        Value::VerbatimString { text, .. } => Reply::Bulk(text),
        Value::Array(items) | Value::Set(items) => Reply::Array(
            items
                .into_iter()
                .map(to_reply)
                .collect::<Result<_, _>>()?,
        ),
        Value::Map(pairs) => {
            let mut flat = Vec::with_capacity(pairs.len() * 2);
            for (field, value) in pairs {
                flat.push(to_reply(field)?);
                flat.push(to_reply(value)?);
            }
            Reply::Array(flat)
        }
        Value::Attribute { data, .. } => to_reply(*data)?,
        Value::ServerError(err) => Reply::Error(RedisError::from(err).to_string()),
        other => {
            return Err(StoreError::protocol(format!(
                "unsupported reply from redis: {other:?}"
            )));
        }
    })
}

fn utf8(bytes: Vec<u8>) -> Result<String, StoreError> {
    String::from_utf8(bytes)
        .map_err(|e| StoreError::protocol(format!("reply is not valid UTF-8: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipefetch::StoreErrorKind;

    #[test]
    fn pipeline_carries_every_command_in_order() {
        let pipe = build_pipeline(&[
            Command::Exists { key: "a".into() },
            Command::HMGet {
                key: "h".into(),
                fields: vec!["f1".into(), "f2".into()],
            },
            Command::LRange {
                key: "l".into(),
                start: 0,
                end: -1,
            },
        ]);
        let packed = String::from_utf8(pipe.get_packed_pipeline()).unwrap();

        let exists = packed.find("EXISTS").unwrap();
        let hmget = packed.find("HMGET").unwrap();
        let lrange = packed.find("LRANGE").unwrap();
        assert!(exists < hmget && hmget < lrange);
        assert!(packed.contains("$2\r\n-1\r\n"));
    }

    #[test]
    fn resp2_values() {
        assert_eq!(to_reply(Value::Nil).unwrap(), Reply::Nil);
        assert_eq!(to_reply(Value::Int(1)).unwrap(), Reply::Integer(1));
        assert_eq!(
            to_reply(Value::BulkString(b"v".to_vec())).unwrap(),
            Reply::Bulk("v".into())
        );
        assert_eq!(
            to_reply(Value::Array(vec![Value::Nil, Value::BulkString(b"x".to_vec())])).unwrap(),
            Reply::Array(vec![Reply::Nil, Reply::Bulk("x".into())])
        );
    }

    #[test]
    fn resp3_values_are_normalised() {
        let map = Value::Map(vec![
            (
                Value::BulkString(b"f1".to_vec()),
                Value::BulkString(b"v1".to_vec()),
            ),
            (
                Value::SimpleString("f2".into()),
                Value::BulkString(b"v2".to_vec()),
            ),
        ]);
        assert_eq!(
            to_reply(map).unwrap(),
            Reply::Array(vec![
                Reply::Bulk("f1".into()),
                Reply::Bulk("v1".into()),
                Reply::Bulk("f2".into()),
                Reply::Bulk("v2".into()),
            ])
        );
        assert_eq!(
            to_reply(Value::Set(vec![Value::BulkString(b"m".to_vec())])).unwrap(),
            Reply::Array(vec![Reply::Bulk("m".into())])
        );
        assert_eq!(to_reply(Value::Boolean(true)).unwrap(), Reply::Integer(1));
    }

    #[test]
    fn invalid_utf8_is_a_protocol_error() {
        let err = to_reply(Value::BulkString(vec![0xff, 0xfe])).unwrap_err();
        assert_eq!(err.kind, StoreErrorKind::Protocol);
    }

    #[test]
    fn server_errors_are_protocol_errors() {
        let err = RedisError::from((
            redis::ErrorKind::ResponseError,
            "WRONGTYPE",
            "Operation against a key holding the wrong kind of value".to_owned(),
        ));
        assert_eq!(classify(&err).kind, StoreErrorKind::Protocol);
    }

    #[test]
    fn io_errors_are_connection_errors() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        assert_eq!(
            classify(&RedisError::from(io)).kind,
            StoreErrorKind::Connection
        );
    }
}
