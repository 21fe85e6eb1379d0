//! IMAP fetching over TLS (`native-tls`) or plain TCP.
//!
//! The folder is opened with `EXAMINE`, so polling never changes flags on
//! the server.

use std::fmt::Display;
use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use native_tls::TlsConnector;
use tracing::{debug, info, warn};

use crate::config::ImapConfig;
use crate::error::{MailError, Result};
use crate::model::message::DecodedMessage;
use crate::parser::mime::decode_message;

use super::{newest_ids, MailSource};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const IO_TIMEOUT: Duration = Duration::from_secs(120);

/// Polls one IMAP folder with a fixed configuration.
#[derive(Debug, Clone)]
pub struct ImapSource {
    config: ImapConfig,
}

impl ImapSource {
    /// Fails on incomplete settings, before any network I/O.
    pub fn new(config: ImapConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &ImapConfig {
        &self.config
    }
}

impl MailSource for ImapSource {
    fn fetch(&mut self) -> Result<Vec<DecodedMessage>> {
        fetch(&self.config)
    }

    fn describe(&self) -> String {
        format!(
            "imap{}://{}@{}:{}/{}",
            if self.config.ssl { "s" } else { "" },
            self.config.username,
            self.config.host,
            self.config.port,
            self.config.folder
        )
    }
}

/// Connect, log in, and fetch the newest `fetch_limit` matching messages.
///
/// Messages come back newest first. A message that cannot be fetched or
/// decoded is logged and left out.
pub fn fetch(config: &ImapConfig) -> Result<Vec<DecodedMessage>> {
    config.validate()?;
    let tcp = connect_tcp(config)?;

    if config.ssl {
        let tls = TlsConnector::builder()
            .build()
            .map_err(|e| connect_error(config, e))?;
        let stream = tls
            .connect(&config.host, tcp)
            .map_err(|e| connect_error(config, e))?;
        fetch_with(::imap::Client::new(stream), config)
    } else {
        fetch_with(::imap::Client::new(tcp), config)
    }
}

fn connect_error(config: &ImapConfig, reason: impl Display) -> MailError {
    MailError::Connect {
        host: config.host.clone(),
        port: config.port,
        reason: reason.to_string(),
    }
}

fn mailbox_error(config: &ImapConfig, reason: impl Display) -> MailError {
    MailError::Mailbox {
        folder: config.folder.clone(),
        reason: reason.to_string(),
    }
}

fn connect_tcp(config: &ImapConfig) -> Result<TcpStream> {
    let addrs = (config.host.as_str(), config.port)
        .to_socket_addrs()
        .map_err(|e| connect_error(config, e))?;

    let mut last_error = None;
    for addr in addrs {
        match TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT) {
            Ok(stream) => {
                stream
                    .set_read_timeout(Some(IO_TIMEOUT))
                    .and_then(|()| stream.set_write_timeout(Some(IO_TIMEOUT)))
                    .map_err(|e| connect_error(config, e))?;
                debug!(%addr, "Connected");
                return Ok(stream);
            }
            Err(e) => {
                debug!(%addr, error = %e, "Connect attempt failed");
                last_error = Some(e);
            }
        }
    }

    Err(match last_error {
        Some(e) => connect_error(config, e),
        None => connect_error(config, "host did not resolve"),
    })
}

fn fetch_with<T: Read + Write>(
    mut client: ::imap::Client<T>,
    config: &ImapConfig,
) -> Result<Vec<DecodedMessage>> {
    client
        .read_greeting()
        .map_err(|e| connect_error(config, e))?;

    let mut session = client
        .login(&config.username, &config.password)
        .map_err(|(e, _client)| MailError::Auth {
            user: config.username.clone(),
            reason: e.to_string(),
        })?;

    let result = fetch_messages(&mut session, config);

    if let Err(e) = session.logout() {
        debug!(error = %e, "Logout failed");
    }
    result
}

fn fetch_messages<T: Read + Write>(
    session: &mut ::imap::Session<T>,
    config: &ImapConfig,
) -> Result<Vec<DecodedMessage>> {
    let mailbox = session
        .examine(&config.folder)
        .map_err(|e| mailbox_error(config, e))?;
    debug!(folder = %config.folder, exists = mailbox.exists, "Folder opened read-only");

    let ids = session
        .search(&config.search)
        .map_err(|e| mailbox_error(config, e))?;
    let matched = ids.len();
    let wanted = newest_ids(ids, config.fetch_limit);

    let mut messages = Vec::with_capacity(wanted.len());
    for id in wanted {
        match fetch_one(session, id) {
            Ok(message) => messages.push(message),
            Err(e) => warn!(id, error = %e, "Skipping message"),
        }
    }

    info!(
        folder = %config.folder,
        search = %config.search,
        matched,
        fetched = messages.len(),
        "Fetched messages"
    );
    Ok(messages)
}

fn fetch_one<T: Read + Write>(session: &mut ::imap::Session<T>, id: u32) -> Result<DecodedMessage> {
    let fetches = session
        .fetch(id.to_string(), "RFC822")
        .map_err(|e| MailError::Fetch {
            id,
            reason: e.to_string(),
        })?;
    let raw = fetches
        .iter()
        .find_map(|f| f.body())
        .ok_or_else(|| MailError::Fetch {
            id,
            reason: "server returned no body".into(),
        })?;
    decode_message(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_rejects_incomplete_config() {
        let err = ImapSource::new(ImapConfig::default()).unwrap_err();
        assert!(err.is_connection_level());
        assert!(matches!(err, MailError::Config(_)));
    }

    #[test]
    fn test_describe_hides_password() {
        let source = ImapSource::new(ImapConfig {
            host: "imap.example.com".into(),
            username: "me".into(),
            password: "hunter2".into(),
            ..ImapConfig::default()
        })
        .unwrap();
        let shown = source.describe();
        assert_eq!(shown, "imaps://me@imap.example.com:993/INBOX");
    }

    #[test]
    fn test_unresolvable_host_is_connect_error() {
        let config = ImapConfig {
            host: "host.invalid".into(),
            username: "me".into(),
            password: "secret".into(),
            ..ImapConfig::default()
        };
        assert!(matches!(fetch(&config), Err(MailError::Connect { .. })));
    }
}
