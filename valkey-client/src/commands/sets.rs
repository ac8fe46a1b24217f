//! `SADD`/`SMEMBERS`/`SREM`.

use valkey_protocol::{Command, KeySpec};

use crate::client::Client;
use crate::commands::{cmd_err, FromValue};
use crate::errors::Result;
use crate::router::RoutingHint;

impl Client {
    /// `SADD key member [member ...]`, returning how many were newly added.
    pub async fn sadd(&self, key: impl Into<Vec<u8>>, members: Vec<Vec<u8>>) -> Result<i64> {
        let cmd = Command::new("SADD")
            .arg(key.into())
            .args(members)
            .key_spec(KeySpec::single(1))
            .build()
            .map_err(cmd_err)?;
        i64::from_value(self.execute(cmd, RoutingHint::Default, None).await?)
    }

    /// `SMEMBERS key`.
    pub async fn smembers(&self, key: impl Into<Vec<u8>>) -> Result<Vec<Vec<u8>>> {
        let cmd = Command::new("SMEMBERS").arg(key.into()).key_spec(KeySpec::single(1)).build().map_err(cmd_err)?;
        Vec::<Vec<u8>>::from_value(self.execute(cmd, RoutingHint::Default, None).await?)
    }

    /// `SREM key member [member ...]`, returning how many were removed.
    pub async fn srem(&self, key: impl Into<Vec<u8>>, members: Vec<Vec<u8>>) -> Result<i64> {
        let cmd = Command::new("SREM")
            .arg(key.into())
            .args(members)
            .key_spec(KeySpec::single(1))
            .build()
            .map_err(cmd_err)?;
        i64::from_value(self.execute(cmd, RoutingHint::Default, None).await?)
    }
}
