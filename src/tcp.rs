// Copyright 2019 Petar Dambovaliev. All rights reserved.
// This software may be modified and distributed under the terms
// of the BSD license. See the LICENSE file for details.

//! TCP transport implementation

use super::constant::HEADER_SIZE;
use super::error::Error;
use super::transport::Transport as FrameTrait;
use byteorder::{ByteOrder, LittleEndian};
use log::debug;
use std::io::{Read, Write};
use std::net::{IpAddr, TcpStream};
use std::time::Duration;

/// registered EtherNet/IP port
pub const EIP_PORT: u16 = 0xAF12; // 44818
/// Default receive timeout
pub const TIMEOUT: Duration = Duration::from_secs(5);

const RECV_CHUNK: usize = 2048;
/// enough of a reply to expose the length field before the real size is known
const MIN_REPLY: usize = HEADER_SIZE + 4;

/// a set of options for the TCP connection
#[derive(Debug, Clone)]
pub struct Options {
    pub connection_timeout: Option<Duration>,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    address: String,
}

impl Options {
    pub fn new(address: IpAddr, port: u16) -> Options {
        Options {
            connection_timeout: None,
            read_timeout: TIMEOUT,
            write_timeout: TIMEOUT,
            address: format!("{}:{}", address, port),
        }
    }
}

pub struct Transport {
    options: Options,
    stream: TcpStream,
}

impl Transport {
    pub fn connect(options: Options) -> Result<Transport, Error> {
        let stream = match options.connection_timeout {
            Some(timeout) => match options.address.parse::<std::net::SocketAddr>() {
                Ok(socket_address) => TcpStream::connect_timeout(&socket_address, timeout)?,
                Err(e) => return Err(Error::Connect(e.to_string())),
            },
            None => TcpStream::connect(&options.address)?,
        };

        stream.set_read_timeout(Some(options.read_timeout))?;
        stream.set_write_timeout(Some(options.write_timeout))?;
        stream.set_nodelay(true)?;
        Ok(Transport { options, stream })
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    fn drain(&mut self, request: &[u8]) -> Result<(), Error> {
        debug!("send {}", hex(request));
        let mut total_sent = 0;
        while total_sent < request.len() {
            let sent = self.stream.write(&request[total_sent..])?;
            if sent == 0 {
                return Err(Error::Send);
            }
            total_sent += sent;
        }
        Ok(())
    }

    fn receive(&mut self) -> Result<Vec<u8>, Error> {
        let mut reply = Vec::with_capacity(MIN_REPLY);
        let mut chunk = [0u8; RECV_CHUNK];
        // until the length field has arrived only a minimal frame is assumed
        let mut msg_len = MIN_REPLY;
        let mut have_length = false;

        while reply.len() < msg_len {
            let want = (msg_len - reply.len()).min(RECV_CHUNK);
            let received = self.stream.read(&mut chunk[..want])?;
            if received == 0 {
                return Err(Error::Send);
            }
            reply.extend_from_slice(&chunk[..received]);

            if !have_length && reply.len() >= 4 {
                msg_len = HEADER_SIZE + LittleEndian::read_u16(&reply[2..4]) as usize;
                have_length = true;
            }
        }
        debug!("recv {}", hex(&reply));
        Ok(reply)
    }
}

impl FrameTrait for Transport {
    fn exchange(&mut self, request: &[u8]) -> Result<Vec<u8>, Error> {
        self.drain(request)?;
        self.receive()
    }

    fn send(&mut self, request: &[u8]) -> Result<(), Error> {
        self.drain(request)
    }
}

fn hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 3);
    for b in bytes {
        out.push_str(&format!("{:02x} ", b));
    }
    out
}
