//! `DEL`/`EXISTS`/`EXPIRE`/`TTL`/`TYPE`.

use valkey_protocol::{Command, KeySpec};

use crate::client::Client;
use crate::commands::{cmd_err, FromValue};
use crate::errors::Result;
use crate::router::RoutingHint;

impl Client {
    /// `DEL key [key ...]`, returning how many keys were removed. All keys
    /// must hash to the same slot in cluster mode.
    pub async fn del(&self, keys: Vec<Vec<u8>>) -> Result<i64> {
        let cmd = Command::new("DEL").args(keys).key_spec(KeySpec::range_to_end(1, 1)).build().map_err(cmd_err)?;
        i64::from_value(self.execute(cmd, RoutingHint::Default, None).await?)
    }

    /// `EXISTS key [key ...]`, returning how many of the given keys exist.
    pub async fn exists(&self, keys: Vec<Vec<u8>>) -> Result<i64> {
        let cmd = Command::new("EXISTS")
            .args(keys)
            .key_spec(KeySpec::range_to_end(1, 1))
            .build()
            .map_err(cmd_err)?;
        i64::from_value(self.execute(cmd, RoutingHint::Default, None).await?)
    }

    /// `EXPIRE key seconds`, returning `true` if the timeout was set.
    pub async fn expire(&self, key: impl Into<Vec<u8>>, seconds: u64) -> Result<bool> {
        let cmd = Command::new("EXPIRE")
            .arg(key.into())
            .arg(seconds.to_string())
            .key_spec(KeySpec::single(1))
            .build()
            .map_err(cmd_err)?;
        bool::from_value(self.execute(cmd, RoutingHint::Default, None).await?)
    }

    /// `TTL key`, in seconds (`-1` if no expiry, `-2` if the key is absent).
    pub async fn ttl(&self, key: impl Into<Vec<u8>>) -> Result<i64> {
        let cmd = Command::new("TTL").arg(key.into()).key_spec(KeySpec::single(1)).build().map_err(cmd_err)?;
        i64::from_value(self.execute(cmd, RoutingHint::Default, None).await?)
    }

    /// `TYPE key`.
    pub async fn key_type(&self, key: impl Into<Vec<u8>>) -> Result<String> {
        let cmd = Command::new("TYPE").arg(key.into()).key_spec(KeySpec::single(1)).build().map_err(cmd_err)?;
        String::from_value(self.execute(cmd, RoutingHint::Default, None).await?)
    }
}
