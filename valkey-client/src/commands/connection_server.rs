//! `PING`/`ECHO`/`DBSIZE`/`FLUSHDB`/`INFO`/`RANDOMKEY`/`CONFIG GET`.
//!
//! These are keyless verbs: their routing and reply aggregation come from
//! the verb metadata table, not from any per-call argument here.

use valkey_protocol::Command;

use crate::client::Client;
use crate::commands::{cmd_err, FromValue};
use crate::errors::Result;
use crate::router::RoutingHint;

impl Client {
    /// `PING`, against one random primary.
    pub async fn ping(&self) -> Result<()> {
        let cmd = Command::new("PING").build().map_err(cmd_err)?;
        self.execute(cmd, RoutingHint::Default, None).await?;
        Ok(())
    }

    /// `ECHO message`, against one random primary.
    pub async fn echo(&self, message: impl Into<Vec<u8>>) -> Result<Vec<u8>> {
        let cmd = Command::new("ECHO").arg(message.into()).build().map_err(cmd_err)?;
        Vec::<u8>::from_value(self.execute(cmd, RoutingHint::Default, None).await?)
    }

    /// `DBSIZE`, summed across every primary.
    pub async fn dbsize(&self) -> Result<i64> {
        let cmd = Command::new("DBSIZE").build().map_err(cmd_err)?;
        i64::from_value(self.execute(cmd, RoutingHint::Default, None).await?)
    }

    /// `FLUSHDB`, issued to every primary; fails unless all succeed.
    pub async fn flushdb(&self) -> Result<()> {
        let cmd = Command::new("FLUSHDB").build().map_err(cmd_err)?;
        self.execute(cmd, RoutingHint::Default, None).await?;
        Ok(())
    }

    /// `RANDOMKEY`, against one random primary.
    pub async fn randomkey(&self) -> Result<Option<Vec<u8>>> {
        let cmd = Command::new("RANDOMKEY").build().map_err(cmd_err)?;
        Option::<Vec<u8>>::from_value(self.execute(cmd, RoutingHint::Default, None).await?)
    }

    /// `CONFIG GET parameter`, merged across every primary (last writer
    /// wins on a value disagreement).
    pub async fn config_get(&self, parameter: impl Into<Vec<u8>>) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let cmd = Command::new("CONFIG").arg("GET").arg(parameter.into()).build().map_err(cmd_err)?;
        Vec::<(Vec<u8>, Vec<u8>)>::from_value(self.execute(cmd, RoutingHint::Default, None).await?)
    }
}
