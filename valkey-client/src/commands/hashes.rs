//! `HSET`/`HGET`/`HGETALL`/`HDEL`.

use valkey_protocol::{Command, KeySpec};

use crate::client::Client;
use crate::commands::{cmd_err, FromValue};
use crate::errors::Result;
use crate::router::RoutingHint;

impl Client {
    /// `HSET key field value`.
    pub async fn hset(&self, key: impl Into<Vec<u8>>, field: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Result<i64> {
        let cmd = Command::new("HSET")
            .arg(key.into())
            .arg(field.into())
            .arg(value.into())
            .key_spec(KeySpec::single(1))
            .build()
            .map_err(cmd_err)?;
        i64::from_value(self.execute(cmd, RoutingHint::Default, None).await?)
    }

    /// `HGET key field`.
    pub async fn hget(&self, key: impl Into<Vec<u8>>, field: impl Into<Vec<u8>>) -> Result<Option<Vec<u8>>> {
        let cmd = Command::new("HGET")
            .arg(key.into())
            .arg(field.into())
            .key_spec(KeySpec::single(1))
            .build()
            .map_err(cmd_err)?;
        Option::<Vec<u8>>::from_value(self.execute(cmd, RoutingHint::Default, None).await?)
    }

    /// `HGETALL key`.
    pub async fn hgetall(&self, key: impl Into<Vec<u8>>) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let cmd = Command::new("HGETALL").arg(key.into()).key_spec(KeySpec::single(1)).build().map_err(cmd_err)?;
        Vec::<(Vec<u8>, Vec<u8>)>::from_value(self.execute(cmd, RoutingHint::Default, None).await?)
    }

    /// `HDEL key field [field ...]`.
    pub async fn hdel(&self, key: impl Into<Vec<u8>>, fields: Vec<Vec<u8>>) -> Result<i64> {
        let cmd = Command::new("HDEL")
            .arg(key.into())
            .args(fields)
            .key_spec(KeySpec::single(1))
            .build()
            .map_err(cmd_err)?;
        i64::from_value(self.execute(cmd, RoutingHint::Default, None).await?)
    }
}
