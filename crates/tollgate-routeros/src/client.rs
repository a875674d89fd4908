//! Per-operation RouterOS API sessions and the [`AccessController`] impl.

use std::{future::Future, net::IpAddr, time::Duration};

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::{net::TcpStream, time::timeout};
use tracing::debug;

use tollgate_core::{
  access::{AccessController, AccessEntry, AccessError},
  device::DeviceKey,
};

use crate::{
  Error, Result,
  proto::{self, Reply, ReplyKind},
};

/// Hotspot binding table the client manages.
const BINDING_PATH: &str = "/ip/hotspot/ip-binding";

// ─── Configuration ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct RouterOsConfig {
  /// `host:port` of the RouterOS API service (usually port 8728).
  pub addr:     String,
  pub username: String,
  pub password: String,

  /// Seconds allowed for TCP connect plus login.
  #[serde(default = "default_connect_timeout_secs")]
  pub connect_timeout_secs: u64,
  /// Seconds allowed for one whole grant/revoke/list operation.
  #[serde(default = "default_command_timeout_secs")]
  pub command_timeout_secs: u64,
}

fn default_connect_timeout_secs() -> u64 { 5 }
fn default_command_timeout_secs() -> u64 { 15 }

impl RouterOsConfig {
  fn connect_timeout(&self) -> Duration {
    Duration::from_secs(self.connect_timeout_secs)
  }

  fn command_timeout(&self) -> Duration {
    Duration::from_secs(self.command_timeout_secs)
  }
}

// ─── Session ─────────────────────────────────────────────────────────────────

/// One logged-in API connection.
///
/// Sessions are scoped to a single operation; dropping the session closes
/// the TCP stream on every exit path, success or failure.
struct Session {
  stream: TcpStream,
}

impl Session {
  async fn open(config: &RouterOsConfig) -> Result<Self> {
    let stream = timeout(
      config.connect_timeout(),
      TcpStream::connect(&config.addr),
    )
    .await
    .map_err(|_| Error::Timeout)??;

    let mut session = Self { stream };
    session.login(&config.username, &config.password).await?;
    Ok(session)
  }

  /// Plain login (RouterOS 6.43+).
  async fn login(&mut self, username: &str, password: &str) -> Result<()> {
    let result = self
      .command(vec![
        "/login".to_string(),
        format!("=name={username}"),
        format!("=password={password}"),
      ])
      .await;

    match result {
      Ok(_) => Ok(()),
      Err(Error::Trap(message)) => Err(Error::LoginFailed(message)),
      Err(e) => Err(e),
    }
  }

  /// Send one command sentence and collect its `!re` replies up to `!done`.
  ///
  /// A `!trap` aborts the read loop without draining the trailing `!done`;
  /// the session is dropped after the operation, so the stream never gets
  /// reused out of sync.
  async fn command(&mut self, words: Vec<String>) -> Result<Vec<Reply>> {
    proto::write_sentence(&mut self.stream, &words).await?;

    let mut records = Vec::new();
    loop {
      let sentence = proto::read_sentence(&mut self.stream).await?;
      if sentence.is_empty() {
        continue;
      }
      let reply = Reply::parse(sentence)?;
      match reply.kind {
        ReplyKind::Re => records.push(reply),
        ReplyKind::Done => return Ok(records),
        ReplyKind::Trap => {
          let message = reply
            .attr("message")
            .unwrap_or("unspecified trap")
            .to_string();
          return Err(Error::Trap(message));
        }
        ReplyKind::Fatal => {
          let message = reply
            .attr("message")
            .unwrap_or("unspecified fatal error")
            .to_string();
          return Err(Error::Fatal(message));
        }
      }
    }
  }

  /// `.id`s of existing bindings for a device.
  async fn binding_ids(&mut self, device: &DeviceKey) -> Result<Vec<String>> {
    let replies = self
      .command(vec![
        format!("{BINDING_PATH}/print"),
        format!("?mac-address={device}"),
      ])
      .await?;

    Ok(
      replies
        .iter()
        .filter_map(|r| r.attr(".id").map(str::to_string))
        .collect(),
    )
  }

  async fn remove_binding(&mut self, id: &str) -> Result<()> {
    self
      .command(vec![format!("{BINDING_PATH}/remove"), format!("=.id={id}")])
      .await?;
    Ok(())
  }

  async fn add_binding(
    &mut self,
    device: &DeviceKey,
    address: Option<IpAddr>,
    until: DateTime<Utc>,
  ) -> Result<()> {
    let mut words = vec![
      format!("{BINDING_PATH}/add"),
      format!("=mac-address={device}"),
      "=type=bypassed".to_string(),
      format!("=comment=until {}", until.to_rfc3339()),
    ];
    if let Some(addr) = address {
      words.push(format!("=address={addr}"));
    }
    self.command(words).await?;
    Ok(())
  }
}

// ─── Client ──────────────────────────────────────────────────────────────────

/// RouterOS-backed access controller.
///
/// The router keeps no expiry on bindings; the `until` timestamp is written
/// into the entry comment for operators, and enforcement stays with the
/// expiry sweeper.
#[derive(Debug, Clone)]
pub struct RouterOsClient {
  config: RouterOsConfig,
}

impl RouterOsClient {
  pub fn new(config: RouterOsConfig) -> Self { Self { config } }

  async fn grant_op(
    &self,
    device: &DeviceKey,
    address: Option<IpAddr>,
    until: DateTime<Utc>,
  ) -> Result<()> {
    let mut session = Session::open(&self.config).await?;

    // Replace, never duplicate: drop stale bindings before adding.
    let stale = session.binding_ids(device).await?;
    for id in &stale {
      session.remove_binding(id).await?;
    }
    session.add_binding(device, address, until).await?;

    debug!(%device, replaced = stale.len(), %until, "binding added");
    Ok(())
  }

  async fn revoke_op(&self, device: &DeviceKey) -> Result<()> {
    let mut session = Session::open(&self.config).await?;

    // An absent binding means there is nothing to revoke — success.
    let ids = session.binding_ids(device).await?;
    for id in &ids {
      session.remove_binding(id).await?;
    }

    debug!(%device, removed = ids.len(), "binding removed");
    Ok(())
  }

  async fn entries_op(&self) -> Result<Vec<AccessEntry>> {
    let mut session = Session::open(&self.config).await?;
    let replies = session
      .command(vec![format!("{BINDING_PATH}/print")])
      .await?;

    let mut entries = Vec::new();
    for reply in replies {
      let Some(mac) = reply.attr("mac-address") else { continue };
      let Ok(device_key) = DeviceKey::parse(mac) else { continue };
      entries.push(AccessEntry {
        device_key,
        address: reply.attr("address").and_then(|a| a.parse().ok()),
        until: reply.attr("comment").and_then(parse_until_comment),
      });
    }
    Ok(entries)
  }

  /// Bound a whole operation, connect included, with the command timeout.
  async fn bounded<T>(&self, op: impl Future<Output = Result<T>>) -> Result<T> {
    timeout(self.config.command_timeout(), op)
      .await
      .map_err(|_| Error::Timeout)?
  }
}

fn parse_until_comment(comment: &str) -> Option<DateTime<Utc>> {
  let stamp = comment.strip_prefix("until ")?;
  DateTime::parse_from_rfc3339(stamp)
    .ok()
    .map(|dt| dt.with_timezone(&Utc))
}

impl AccessController for RouterOsClient {
  async fn grant(
    &self,
    device: &DeviceKey,
    address: Option<IpAddr>,
    until: DateTime<Utc>,
  ) -> std::result::Result<(), AccessError> {
    self
      .bounded(self.grant_op(device, address, until))
      .await
      .map_err(AccessError::from)
  }

  async fn revoke(
    &self,
    device: &DeviceKey,
  ) -> std::result::Result<(), AccessError> {
    self
      .bounded(self.revoke_op(device))
      .await
      .map_err(AccessError::from)
  }

  async fn entries(
    &self,
  ) -> std::result::Result<Vec<AccessEntry>, AccessError> {
    self.bounded(self.entries_op()).await.map_err(AccessError::from)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn until_comment_roundtrip() {
    let until = DateTime::parse_from_rfc3339("2026-08-05T10:00:00+00:00")
      .unwrap()
      .with_timezone(&Utc);
    let comment = format!("until {}", until.to_rfc3339());
    assert_eq!(parse_until_comment(&comment), Some(until));
  }

  #[test]
  fn foreign_comments_are_ignored() {
    assert_eq!(parse_until_comment("static binding for printer"), None);
    assert_eq!(parse_until_comment("until tomorrow"), None);
  }
}
