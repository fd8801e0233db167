//! Minimal synchronous FTP client: one control connection plus passive-mode
//! data connections. Only the command set the connector needs is implemented.

use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use log::debug;
use thiserror::Error;

/// Errors surfaced by the FTP client
#[derive(Debug, Error)]
pub enum FtpError {
    #[error("FTP connection error: {0}")]
    Io(#[from] io::Error),

    #[error("FTP command {command} failed with {code}: {text}")]
    UnexpectedReply {
        command: String,
        code: u16,
        text: String,
    },
}

/// A parsed control-channel reply
#[derive(Debug, Clone)]
pub struct Reply {
    pub code: u16,
    pub text: String,
}

impl Reply {
    /// Positive completion / intermediate codes
    pub fn is_positive(&self) -> bool {
        self.code < 400
    }
}

/// Synchronous FTP control connection
#[derive(Debug)]
pub struct FtpClient {
    control: BufReader<TcpStream>,
    timeout: Duration,
}

impl FtpClient {
    /// Connect and consume the server greeting
    pub fn connect(host: &str, port: u16, timeout: Duration) -> Result<Self, FtpError> {
        let addr = (host, port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "host did not resolve"))?;
        let stream = TcpStream::connect_timeout(&addr, timeout)?;
        stream.set_read_timeout(Some(timeout))?;
        stream.set_write_timeout(Some(timeout))?;

        let mut client = Self {
            control: BufReader::new(stream),
            timeout,
        };
        let greeting = client.read_reply("<greeting>")?;
        expect(&greeting, "<greeting>", &[220])?;
        Ok(client)
    }

    /// Authenticate and switch to binary transfers
    pub fn login(&mut self, user: &str, password: &str) -> Result<(), FtpError> {
        let reply = self.command(&format!("USER {}", user))?;
        let reply = if reply.code == 331 {
            self.command(&format!("PASS {}", password))?
        } else {
            reply
        };
        expect(&reply, "USER/PASS", &[230])?;

        let reply = self.command("TYPE I")?;
        expect(&reply, "TYPE I", &[200])?;
        Ok(())
    }

    /// Send a command and read its reply
    pub fn command(&mut self, line: &str) -> Result<Reply, FtpError> {
        debug!("ftp >>> {}", line);
        let stream = self.control.get_mut();
        stream.write_all(line.as_bytes())?;
        stream.write_all(b"\r\n")?;
        self.read_reply(line)
    }

    /// Send a command and fail unless the reply code is one of `codes`
    pub fn expect(&mut self, line: &str, codes: &[u16]) -> Result<Reply, FtpError> {
        let reply = self.command(line)?;
        expect(&reply, line, codes)?;
        Ok(reply)
    }

    /// Read one (possibly multi-line) reply
    fn read_reply(&mut self, command: &str) -> Result<Reply, FtpError> {
        let first = self.read_line()?;
        let (code, rest) = split_reply_line(command, &first)?;

        let mut text = rest.to_string();
        if first.as_bytes().get(3) == Some(&b'-') {
            // Multi-line reply: read until "NNN " terminator
            let terminator = format!("{:03} ", code);
            loop {
                let line = self.read_line()?;
                if line.starts_with(&terminator) {
                    text.push('\n');
                    text.push_str(line[4..].trim_end());
                    break;
                }
                text.push('\n');
                text.push_str(line.trim_end());
            }
        }

        debug!("ftp <<< {} {}", code, text.lines().next().unwrap_or(""));
        Ok(Reply { code, text })
    }

    fn read_line(&mut self) -> Result<String, FtpError> {
        let mut line = String::new();
        let read = self.control.read_line(&mut line)?;
        if read == 0 {
            return Err(FtpError::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "control connection closed",
            )));
        }
        Ok(line.trim_end_matches(['\r', '\n']).to_string())
    }

    /// Enter passive mode and open the advertised data connection
    pub fn open_data_connection(&mut self) -> Result<TcpStream, FtpError> {
        let reply = self.expect("PASV", &[227])?;
        let (host, port) = parse_pasv(&reply.text).ok_or_else(|| FtpError::UnexpectedReply {
            command: "PASV".to_string(),
            code: reply.code,
            text: reply.text.clone(),
        })?;

        // Servers behind NAT may advertise a placeholder address; fall back
        // to the control connection's peer.
        let host = if host == "0.0.0.0" {
            self.control.get_ref().peer_addr()?.ip().to_string()
        } else {
            host
        };

        let addr = (host.as_str(), port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "data host did not resolve"))?;
        let stream = TcpStream::connect_timeout(&addr, self.timeout)?;
        stream.set_read_timeout(Some(self.timeout))?;
        stream.set_write_timeout(Some(self.timeout))?;
        Ok(stream)
    }

    /// Download the file at `path`
    pub fn retr(&mut self, path: &str) -> Result<Vec<u8>, FtpError> {
        let mut data = self.open_data_connection()?;
        let command = format!("RETR {}", path);
        let reply = self.command(&command)?;
        expect(&reply, &command, &[125, 150])?;

        let mut bytes = Vec::new();
        data.read_to_end(&mut bytes)?;
        drop(data);

        let done = self.read_reply(&command)?;
        expect(&done, &command, &[226, 250])?;
        Ok(bytes)
    }

    /// Upload `reader` to the file at `path`
    pub fn stor(&mut self, path: &str, reader: &mut dyn Read) -> Result<u64, FtpError> {
        let mut data = self.open_data_connection()?;
        let command = format!("STOR {}", path);
        let reply = self.command(&command)?;
        expect(&reply, &command, &[125, 150])?;

        let written = io::copy(reader, &mut data)?;
        data.shutdown(std::net::Shutdown::Both)?;
        drop(data);

        let done = self.read_reply(&command)?;
        expect(&done, &command, &[226, 250])?;
        Ok(written)
    }

    /// Machine-readable listing of `path`; one raw MLSD line per entry
    pub fn mlsd(&mut self, path: &str) -> Result<Vec<String>, FtpError> {
        let data = self.open_data_connection()?;
        let command = if path.is_empty() {
            "MLSD".to_string()
        } else {
            format!("MLSD {}", path)
        };
        let reply = self.command(&command)?;
        expect(&reply, &command, &[125, 150])?;

        let mut lines = Vec::new();
        for line in BufReader::new(data).lines() {
            let line = line?;
            if !line.is_empty() {
                lines.push(line);
            }
        }

        let done = self.read_reply(&command)?;
        expect(&done, &command, &[226, 250])?;
        Ok(lines)
    }

    /// Machine-readable facts for a single path, when the server offers MLST
    pub fn mlst(&mut self, path: &str) -> Result<String, FtpError> {
        let command = format!("MLST {}", path);
        let reply = self.expect(&command, &[250])?;
        // The facts line is the indented middle line of the reply
        reply
            .text
            .lines()
            .map(str::trim)
            .find(|l| l.contains("type="))
            .map(str::to_string)
            .ok_or(FtpError::UnexpectedReply {
                command,
                code: reply.code,
                text: reply.text,
            })
    }

    /// Politely close the session
    pub fn quit(&mut self) -> Result<(), FtpError> {
        self.command("QUIT").map(|_| ())
    }
}

fn expect(reply: &Reply, command: &str, codes: &[u16]) -> Result<(), FtpError> {
    if codes.contains(&reply.code) {
        Ok(())
    } else {
        Err(FtpError::UnexpectedReply {
            command: command.to_string(),
            code: reply.code,
            text: reply.text.clone(),
        })
    }
}

fn split_reply_line<'a>(command: &str, line: &'a str) -> Result<(u16, &'a str), FtpError> {
    let code = line
        .get(..3)
        .and_then(|c| c.parse::<u16>().ok())
        .ok_or_else(|| FtpError::UnexpectedReply {
            command: command.to_string(),
            code: 0,
            text: line.to_string(),
        })?;
    Ok((code, line.get(4..).unwrap_or("").trim_end()))
}

/// Parse "227 Entering Passive Mode (h1,h2,h3,h4,p1,p2)."
fn parse_pasv(text: &str) -> Option<(String, u16)> {
    let start = text.find('(')?;
    let end = text[start..].find(')')? + start;
    let numbers: Vec<u16> = text[start + 1..end]
        .split(',')
        .map(|n| n.trim().parse::<u16>())
        .collect::<Result<_, _>>()
        .ok()?;
    if numbers.len() != 6 {
        return None;
    }
    let host = format!("{}.{}.{}.{}", numbers[0], numbers[1], numbers[2], numbers[3]);
    let port = numbers[4].checked_mul(256)?.checked_add(numbers[5])?;
    Some((host, port))
}
