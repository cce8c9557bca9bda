//! Serial-over-TCP transport for `socket://host:port` URLs.

use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::time::{Duration, Instant};

use tracing::debug;

use super::Transport;

/// Smallest read timeout; a zero timeout is rejected by the socket API.
const MIN_WAIT: Duration = Duration::from_millis(1);

/// A TCP connection to a serial bridge such as `ser2net`.
#[derive(Debug)]
pub struct TcpPort {
    stream: TcpStream,
}

impl TcpPort {
    /// Connects to `addr` (`host:port`).
    pub fn connect(addr: &str) -> io::Result<Self> {
        let stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true)?;
        debug!(addr, "connected to serial bridge");
        Ok(Self { stream })
    }
}

impl Transport for TcpPort {
    fn write(&mut self, data: &[u8]) -> io::Result<()> {
        self.stream.write_all(data)?;
        self.stream.flush()
    }

    fn read_deadline(&mut self, max_bytes: usize, deadline: Instant) -> io::Result<Vec<u8>> {
        let mut data = Vec::with_capacity(max_bytes);
        let mut buf = [0u8; 256];
        while data.len() < max_bytes {
            let wait = deadline.saturating_duration_since(Instant::now()).max(MIN_WAIT);
            self.stream.set_read_timeout(Some(wait))?;
            let want = (max_bytes - data.len()).min(buf.len());
            match self.stream.read(&mut buf[..want]) {
                Ok(0) => break,
                Ok(n) => data.extend_from_slice(&buf[..n]),
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
                    ) => {}
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
            if Instant::now() >= deadline {
                break;
            }
        }
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use std::net::TcpListener;

    use super::*;

    #[test]
    fn reads_are_bounded_by_max_and_deadline() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let server = std::thread::spawn(move || {
            let (mut sock, _) = listener.accept().unwrap();
            sock.write_all(b"hello world").unwrap();
            let mut buf = [0u8; 4];
            sock.read_exact(&mut buf).unwrap();
            buf
        });

        let mut port = TcpPort::connect(&addr).unwrap();
        let deadline = Instant::now() + Duration::from_secs(2);
        assert_eq!(port.read_deadline(5, deadline).unwrap(), b"hello");
        assert_eq!(port.read_deadline(6, deadline).unwrap(), b" world");

        let t0 = Instant::now();
        let idle = port
            .read_deadline(1, Instant::now() + Duration::from_millis(50))
            .unwrap();
        assert!(idle.is_empty());
        assert!(t0.elapsed() >= Duration::from_millis(45));

        port.write(b"ping").unwrap();
        assert_eq!(&server.join().unwrap(), b"ping");
    }
}
