//! `ZADD`/`ZRANGE`/`ZSCORE`.

use valkey_protocol::{Command, KeySpec, Value};

use crate::client::Client;
use crate::commands::{cmd_err, FromValue};
use crate::errors::{ClientError, Result};
use crate::router::RoutingHint;

impl Client {
    /// `ZADD key score member [score member ...]`, returning how many
    /// elements were newly added.
    pub async fn zadd(&self, key: impl Into<Vec<u8>>, members: Vec<(f64, Vec<u8>)>) -> Result<i64> {
        let mut builder = Command::new("ZADD").arg(key.into());
        for (score, member) in members {
            builder = builder.arg(format_score(score)).arg(member);
        }
        let cmd = builder.key_spec(KeySpec::single(1)).build().map_err(cmd_err)?;
        i64::from_value(self.execute(cmd, RoutingHint::Default, None).await?)
    }

    /// `ZRANGE key start stop`.
    pub async fn zrange(&self, key: impl Into<Vec<u8>>, start: i64, stop: i64) -> Result<Vec<Vec<u8>>> {
        let cmd = Command::new("ZRANGE")
            .arg(key.into())
            .arg(start.to_string())
            .arg(stop.to_string())
            .key_spec(KeySpec::single(1))
            .build()
            .map_err(cmd_err)?;
        Vec::<Vec<u8>>::from_value(self.execute(cmd, RoutingHint::Default, None).await?)
    }

    /// `ZSCORE key member`.
    pub async fn zscore(&self, key: impl Into<Vec<u8>>, member: impl Into<Vec<u8>>) -> Result<Option<f64>> {
        let cmd = Command::new("ZSCORE")
            .arg(key.into())
            .arg(member.into())
            .key_spec(KeySpec::single(1))
            .build()
            .map_err(cmd_err)?;
        match self.execute(cmd, RoutingHint::Default, None).await? {
            Value::Nil => Ok(None),
            Value::Double(d) => Ok(Some(d)),
            other => {
                let text = String::from_value(other)?;
                text.parse().map(Some).map_err(|_| {
                    ClientError::InvalidConfig(format!("ZSCORE returned a non-numeric reply: {text}"))
                })
            }
        }
    }
}

fn format_score(score: f64) -> String {
    if score.is_infinite() {
        if score > 0.0 { "+inf".to_string() } else { "-inf".to_string() }
    } else {
        score.to_string()
    }
}
