//! `LPUSH`/`RPUSH`/`LRANGE`/`LPOP`/`BLPOP`.

use std::time::Duration;

use valkey_protocol::{Command, KeySpec};

use crate::client::Client;
use crate::commands::{cmd_err, FromValue};
use crate::errors::Result;
use crate::router::RoutingHint;

impl Client {
    /// `LPUSH key value [value ...]`, returning the new list length.
    pub async fn lpush(&self, key: impl Into<Vec<u8>>, values: Vec<Vec<u8>>) -> Result<i64> {
        let cmd = Command::new("LPUSH")
            .arg(key.into())
            .args(values)
            .key_spec(KeySpec::single(1))
            .build()
            .map_err(cmd_err)?;
        i64::from_value(self.execute(cmd, RoutingHint::Default, None).await?)
    }

    /// `RPUSH key value [value ...]`, returning the new list length.
    pub async fn rpush(&self, key: impl Into<Vec<u8>>, values: Vec<Vec<u8>>) -> Result<i64> {
        let cmd = Command::new("RPUSH")
            .arg(key.into())
            .args(values)
            .key_spec(KeySpec::single(1))
            .build()
            .map_err(cmd_err)?;
        i64::from_value(self.execute(cmd, RoutingHint::Default, None).await?)
    }

    /// `LRANGE key start stop`.
    pub async fn lrange(&self, key: impl Into<Vec<u8>>, start: i64, stop: i64) -> Result<Vec<Vec<u8>>> {
        let cmd = Command::new("LRANGE")
            .arg(key.into())
            .arg(start.to_string())
            .arg(stop.to_string())
            .key_spec(KeySpec::single(1))
            .build()
            .map_err(cmd_err)?;
        Vec::<Vec<u8>>::from_value(self.execute(cmd, RoutingHint::Default, None).await?)
    }

    /// `LPOP key`.
    pub async fn lpop(&self, key: impl Into<Vec<u8>>) -> Result<Option<Vec<u8>>> {
        let cmd = Command::new("LPOP").arg(key.into()).key_spec(KeySpec::single(1)).build().map_err(cmd_err)?;
        Option::<Vec<u8>>::from_value(self.execute(cmd, RoutingHint::Default, None).await?)
    }

    /// `BLPOP key [key ...] timeout`. All keys must hash to the same slot in
    /// cluster mode. The server-side block is expected to run up to
    /// `timeout`; the request deadline is set to `timeout` plus a grace
    /// margin so the block itself is never cut short by the client.
    pub async fn blpop(&self, keys: Vec<Vec<u8>>, timeout: Duration) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        let cmd = Command::new("BLPOP")
            .args(keys)
            .arg(timeout.as_secs().to_string())
            .key_spec(KeySpec::range_to_end(1, 1))
            .build()
            .map_err(cmd_err)?;
        let deadline = tokio::time::Instant::now() + timeout + Duration::from_secs(1);
        let value = self.execute(cmd, RoutingHint::Default, Some(deadline)).await?;
        if value.is_nil() {
            return Ok(None);
        }
        let items = Vec::<Vec<u8>>::from_value(value)?;
        let mut it = items.into_iter();
        match (it.next(), it.next()) {
            (Some(key), Some(val)) => Ok(Some((key, val))),
            _ => Ok(None),
        }
    }
}
