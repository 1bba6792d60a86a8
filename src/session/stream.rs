//! Session stream module.
//!
//! The `imap` crate is generic over its transport, so the plain TCP
//! and TLS flavors are unified behind a single stream type.

use std::{
    io::{self, Read, Write},
    net::TcpStream,
};

use native_tls::TlsStream;

/// Wrapper around the TLS and plain TCP streams a session can run on.
#[derive(Debug)]
pub enum SessionStream {
    Tls(TlsStream<TcpStream>),
    Tcp(TcpStream),
}

impl Read for SessionStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Tls(stream) => stream.read(buf),
            Self::Tcp(stream) => stream.read(buf),
        }
    }
}

impl Write for SessionStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Tls(stream) => stream.write(buf),
            Self::Tcp(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Tls(stream) => stream.flush(),
            Self::Tcp(stream) => stream.flush(),
        }
    }
}
