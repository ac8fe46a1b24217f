//! `GET`/`SET`/`INCR`/`APPEND`/`MGET`/`MSET` and friends.

use valkey_protocol::{Command, KeySpec};

use crate::client::Client;
use crate::commands::{cmd_err, FromValue};
use crate::errors::{ClientError, Result};
use crate::router::RoutingHint;

impl Client {
    /// `GET key`.
    pub async fn get(&self, key: impl Into<Vec<u8>>) -> Result<Option<Vec<u8>>> {
        let cmd = Command::new("GET").arg(key.into()).key_spec(KeySpec::single(1)).build().map_err(cmd_err)?;
        Option::<Vec<u8>>::from_value(self.execute(cmd, RoutingHint::Default, None).await?)
    }

    /// `SET key value`.
    pub async fn set(&self, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Result<()> {
        let cmd = Command::new("SET")
            .arg(key.into())
            .arg(value.into())
            .key_spec(KeySpec::single(1))
            .build()
            .map_err(cmd_err)?;
        self.execute(cmd, RoutingHint::Default, None).await?;
        Ok(())
    }

    /// `SETEX key seconds value`.
    pub async fn setex(&self, key: impl Into<Vec<u8>>, seconds: u64, value: impl Into<Vec<u8>>) -> Result<()> {
        let cmd = Command::new("SETEX")
            .arg(key.into())
            .arg(seconds.to_string())
            .arg(value.into())
            .key_spec(KeySpec::single(1))
            .build()
            .map_err(cmd_err)?;
        self.execute(cmd, RoutingHint::Default, None).await?;
        Ok(())
    }

    /// `INCR key`.
    pub async fn incr(&self, key: impl Into<Vec<u8>>) -> Result<i64> {
        let cmd = Command::new("INCR").arg(key.into()).key_spec(KeySpec::single(1)).build().map_err(cmd_err)?;
        i64::from_value(self.execute(cmd, RoutingHint::Default, None).await?)
    }

    /// `APPEND key value`, returning the new length of the string.
    pub async fn append(&self, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Result<i64> {
        let cmd = Command::new("APPEND")
            .arg(key.into())
            .arg(value.into())
            .key_spec(KeySpec::single(1))
            .build()
            .map_err(cmd_err)?;
        i64::from_value(self.execute(cmd, RoutingHint::Default, None).await?)
    }

    /// `MGET key [key ...]`. All keys must hash to the same slot in cluster
    /// mode.
    pub async fn mget(&self, keys: Vec<Vec<u8>>) -> Result<Vec<Option<Vec<u8>>>> {
        let cmd = Command::new("MGET")
            .args(keys)
            .key_spec(KeySpec::range_to_end(1, 1))
            .build()
            .map_err(cmd_err)?;
        let value = self.execute(cmd, RoutingHint::Default, None).await?;
        let items = value
            .as_sequence()
            .ok_or_else(|| ClientError::InvalidConfig("MGET did not return an array".into()))?;
        items.iter().map(|v| Option::<Vec<u8>>::from_value(v.clone())).collect()
    }

    /// `MSET key value [key value ...]`. All keys must hash to the same slot
    /// in cluster mode.
    pub async fn mset(&self, pairs: Vec<(Vec<u8>, Vec<u8>)>) -> Result<()> {
        let mut builder = Command::new("MSET");
        for (k, v) in pairs {
            builder = builder.arg(k).arg(v);
        }
        let cmd = builder.key_spec(KeySpec::range_to_end(1, 2)).build().map_err(cmd_err)?;
        self.execute(cmd, RoutingHint::Default, None).await?;
        Ok(())
    }
}
