//! `PUBLISH`. Subscription management (`SUBSCRIBE`/`PSUBSCRIBE`/
//! `SSUBSCRIBE`) lives on [`Client`] directly, alongside the
//! [`crate::subscription::SubscriptionManager`] it drives.

use valkey_protocol::{Command, KeySpec};

use crate::client::Client;
use crate::commands::{cmd_err, FromValue};
use crate::errors::Result;
use crate::router::RoutingHint;

impl Client {
    /// `PUBLISH channel message`, returning the number of clients that
    /// received it.
    pub async fn publish(&self, channel: impl Into<Vec<u8>>, message: impl Into<Vec<u8>>) -> Result<i64> {
        let cmd = Command::new("PUBLISH")
            .arg(channel.into())
            .arg(message.into())
            .key_spec(KeySpec::single(1))
            .build()
            .map_err(cmd_err)?;
        i64::from_value(self.execute(cmd, RoutingHint::Default, None).await?)
    }
}
