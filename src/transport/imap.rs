//! Minimal blocking IMAP client over rustls.
//!
//! Only what reply checking needs: login, folder lookup/creation, UID
//! search, fetch, copy, delete-flag and expunge. Run it inside
//! `spawn_blocking`.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

/// Error type for IMAP operations.
pub type ImapError = Box<dyn std::error::Error + Send + Sync>;

type TlsStream = rustls::StreamOwned<rustls::ClientConnection, TcpStream>;

/// Response to one tagged command.
#[derive(Debug, Default)]
pub struct Response {
    /// Untagged and continuation lines, without CRLF.
    pub lines: Vec<String>,
    /// Literal payloads (`{n}` blocks) in the order received.
    pub literals: Vec<Vec<u8>>,
    /// The tagged completion line.
    pub status: String,
}

impl Response {
    pub fn is_ok(&self) -> bool {
        self.status.split_whitespace().nth(1) == Some("OK")
    }
}

/// An authenticated-or-not IMAP connection.
pub struct ImapSession {
    stream: BufReader<TlsStream>,
    next_tag: u32,
}

impl ImapSession {
    /// Open a TLS connection and consume the server greeting.
    pub fn connect(host: &str, port: u16) -> Result<Self, ImapError> {
        let tcp = TcpStream::connect((host, port))?;
        tcp.set_read_timeout(Some(Duration::from_secs(30)))?;

        let mut root_store = rustls::RootCertStore::empty();
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let tls_config = Arc::new(
            rustls::ClientConfig::builder()
                .with_root_certificates(root_store)
                .with_no_client_auth(),
        );
        let server_name = rustls_pki_types::ServerName::try_from(host.to_string())?;
        let conn = rustls::ClientConnection::new(tls_config, server_name)?;

        let mut session = Self {
            stream: BufReader::new(rustls::StreamOwned::new(conn, tcp)),
            next_tag: 1,
        };
        let greeting = session.read_line()?;
        if !greeting.starts_with("* OK") && !greeting.starts_with("* PREAUTH") {
            return Err(format!("unexpected IMAP greeting: {greeting}").into());
        }
        Ok(session)
    }

    fn read_line(&mut self) -> Result<String, ImapError> {
        let mut buf = Vec::new();
        let n = self.stream.read_until(b'\n', &mut buf)?;
        if n == 0 {
            return Err("IMAP connection closed".into());
        }
        while buf.last().is_some_and(|b| *b == b'\n' || *b == b'\r') {
            buf.pop();
        }
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    /// Send `cmd` under a fresh tag and collect the response.
    pub fn command(&mut self, cmd: &str) -> Result<Response, ImapError> {
        let tag = format!("A{} ", self.next_tag);
        self.next_tag += 1;

        let stream = self.stream.get_mut();
        stream.write_all(format!("{tag}{cmd}\r\n").as_bytes())?;
        stream.flush()?;

        let mut response = Response::default();
        loop {
            let line = self.read_line()?;
            if line.starts_with(&tag) {
                response.status = line;
                return Ok(response);
            }
            if let Some(len) = literal_len(&line) {
                let mut literal = vec![0u8; len];
                self.stream.read_exact(&mut literal)?;
                response.literals.push(literal);
            }
            response.lines.push(line);
        }
    }

    fn expect_ok(&mut self, cmd: &str, what: &str) -> Result<Response, ImapError> {
        let response = self.command(cmd)?;
        if !response.is_ok() {
            return Err(format!("IMAP {what} failed: {}", response.status).into());
        }
        Ok(response)
    }

    pub fn login(&mut self, user: &str, password: &str) -> Result<(), ImapError> {
        let cmd = format!("LOGIN {} {}", quote(user), quote(password));
        self.expect_ok(&cmd, "login").map(|_| ())
    }

    pub fn folder_exists(&mut self, folder: &str) -> Result<bool, ImapError> {
        let response = self.expect_ok(&format!("LIST \"\" {}", quote(folder)), "list")?;
        Ok(response.lines.iter().any(|l| l.starts_with("* LIST")))
    }

    pub fn create_folder(&mut self, folder: &str) -> Result<(), ImapError> {
        self.expect_ok(&format!("CREATE {}", quote(folder)), "create")
            .map(|_| ())
    }

    pub fn select(&mut self, folder: &str) -> Result<(), ImapError> {
        self.expect_ok(&format!("SELECT {}", quote(folder)), "select")
            .map(|_| ())
    }

    /// UIDs of messages from `from` whose subject contains `subject`.
    pub fn search_from_subject(
        &mut self,
        from: &str,
        subject: &str,
    ) -> Result<Vec<String>, ImapError> {
        let cmd = format!("UID SEARCH FROM {} SUBJECT {}", quote(from), quote(subject));
        let response = self.expect_ok(&cmd, "search")?;
        Ok(parse_search(&response.lines))
    }

    /// Raw RFC 822 bytes of message `uid`, if the server returned them.
    pub fn fetch_rfc822(&mut self, uid: &str) -> Result<Option<Vec<u8>>, ImapError> {
        let mut response = self.expect_ok(&format!("UID FETCH {uid} RFC822"), "fetch")?;
        Ok(if response.literals.is_empty() {
            None
        } else {
            Some(response.literals.swap_remove(0))
        })
    }

    pub fn copy(&mut self, uid: &str, folder: &str) -> Result<(), ImapError> {
        self.expect_ok(&format!("UID COPY {uid} {}", quote(folder)), "copy")
            .map(|_| ())
    }

    pub fn mark_deleted(&mut self, uid: &str) -> Result<(), ImapError> {
        self.expect_ok(&format!("UID STORE {uid} +FLAGS (\\Deleted)"), "store")
            .map(|_| ())
    }

    pub fn expunge(&mut self) -> Result<(), ImapError> {
        self.expect_ok("EXPUNGE", "expunge").map(|_| ())
    }

    pub fn logout(mut self) {
        let _ = self.command("LOGOUT");
    }
}

/// Quote a string for use as an IMAP quoted argument.
pub fn quote(s: &str) -> String {
    let escaped = s.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{escaped}\"")
}

/// Length of the literal announced at the end of `line`, e.g. `{1234}`.
fn literal_len(line: &str) -> Option<usize> {
    let open = line.rfind('{')?;
    let inner = line[open + 1..].strip_suffix('}')?;
    inner.parse().ok()
}

/// UIDs listed in `* SEARCH` response lines.
fn parse_search(lines: &[String]) -> Vec<String> {
    lines
        .iter()
        .filter_map(|l| l.strip_prefix("* SEARCH"))
        .flat_map(|rest| rest.split_whitespace().map(str::to_string))
        .collect()
}
