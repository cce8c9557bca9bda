//! A simulated board: an interactive shell with raw and paste modes and a
//! soft reset, which runs the real companion loop once launched. `^C` breaks
//! out of a running companion back to the prompt.
//!
//! The host talks to it through [`ChannelPort`]; the device side runs on its
//! own thread and exits when the port is dropped.

use std::collections::VecDeque;
use std::fmt;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Instant;

use tether::Transport;
use tether_agent::{Agent, Registry, Session};

/// What the device saw, for assertions.
#[derive(Debug, Default)]
pub struct BoardLog {
    /// Lines received in paste mode.
    pub pasted: Vec<String>,
    /// Lines executed at the interactive prompt.
    pub executed: Vec<String>,
    /// Number of companion launches.
    pub launches: usize,
    /// Number of soft resets.
    pub resets: usize,
    /// Number of times a running companion was broken out of with `^C`.
    pub interrupts: usize,
}

/// Handle on a running simulated board.
pub struct Board {
    root: tempfile::TempDir,
    log: Arc<Mutex<BoardLog>>,
}

impl Board {
    /// Starts a board serving `registry` and returns the host end of its
    /// console.
    pub fn start(registry: Registry) -> (Self, ChannelPort) {
        let root = tempfile::tempdir().unwrap();
        let log = Arc::new(Mutex::new(BoardLog::default()));
        let (host_tx, device_rx) = mpsc::channel();
        let (device_tx, host_rx) = mpsc::channel();

        let device = Device {
            input: BufReader::new(Console {
                rx: device_rx,
                buf: VecDeque::new(),
                interruptible: false,
            }),
            output: ConsoleOut(device_tx),
            agent: Agent::new(registry, Session::new(root.path())),
            root: root.path().to_path_buf(),
            log: Arc::clone(&log),
            shell: Shell::Interactive,
            loaded: false,
        };
        thread::spawn(move || device.run());

        let port = ChannelPort {
            tx: host_tx,
            rx: host_rx,
            pending: VecDeque::new(),
        };
        (Self { root, log }, port)
    }

    /// Directory the device filesystem lives in.
    pub fn root(&self) -> &Path {
        self.root.path()
    }

    /// Installs the companion on the device filesystem.
    pub fn install_stub(&self, source: &str) {
        std::fs::write(self.root.path().join("rstub.py"), source).unwrap();
    }

    /// What the device has seen so far.
    pub fn log(&self) -> MutexGuard<'_, BoardLog> {
        self.log.lock().unwrap()
    }
}

/// Host end of the console.
pub struct ChannelPort {
    tx: Sender<Vec<u8>>,
    rx: Receiver<Vec<u8>>,
    pending: VecDeque<u8>,
}

impl Transport for ChannelPort {
    fn write(&mut self, data: &[u8]) -> io::Result<()> {
        self.tx
            .send(data.to_vec())
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "board stopped"))
    }

    fn read_deadline(&mut self, max_bytes: usize, deadline: Instant) -> io::Result<Vec<u8>> {
        let mut out = Vec::new();
        while out.len() < max_bytes {
            if let Some(b) = self.pending.pop_front() {
                out.push(b);
                continue;
            }
            let wait = deadline.saturating_duration_since(Instant::now());
            match self.rx.recv_timeout(wait) {
                Ok(data) => self.pending.extend(data),
                Err(RecvTimeoutError::Timeout) => break,
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(io::Error::new(io::ErrorKind::BrokenPipe, "board stopped"));
                }
            }
        }
        Ok(out)
    }
}

/// Raised into a running program when `^C` arrives on the console.
#[derive(Debug)]
struct KeyboardInterrupt;

impl fmt::Display for KeyboardInterrupt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("KeyboardInterrupt")
    }
}

impl std::error::Error for KeyboardInterrupt {}

fn is_interrupt(e: &io::Error) -> bool {
    e.get_ref().is_some_and(|inner| inner.is::<KeyboardInterrupt>())
}

/// Device end of the console, input side.
struct Console {
    rx: Receiver<Vec<u8>>,
    buf: VecDeque<u8>,
    /// Set while a program runs: `^C` then fails the pending read, dropping
    /// everything up to and including it.
    interruptible: bool,
}

impl Read for Console {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if self.buf.is_empty() {
            match self.rx.recv() {
                Ok(data) => self.buf.extend(data),
                Err(_) => return Ok(0),
            }
        }
        if self.interruptible {
            if let Some(at) = self.buf.iter().position(|&b| b == 0x03) {
                self.buf.drain(..=at);
                return Err(io::Error::other(KeyboardInterrupt));
            }
        }
        let n = out.len().min(self.buf.len());
        for (slot, b) in out.iter_mut().zip(self.buf.drain(..n)) {
            *slot = b;
        }
        Ok(n)
    }
}

/// Device end of the console, output side.
struct ConsoleOut(Sender<Vec<u8>>);

impl Write for ConsoleOut {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.0
            .send(data.to_vec())
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "host gone"))?;
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Shell {
    Interactive,
    Raw,
    Paste,
}

struct Device {
    input: BufReader<Console>,
    output: ConsoleOut,
    agent: Agent,
    root: PathBuf,
    log: Arc<Mutex<BoardLog>>,
    shell: Shell,
    loaded: bool,
}

impl Device {
    fn run(mut self) {
        let _ = self.repl();
    }

    fn repl(&mut self) -> io::Result<()> {
        let mut line = Vec::new();
        let mut paste = Vec::new();
        loop {
            let byte = match self.input.fill_buf()? {
                [] => return Ok(()),
                [b, ..] => *b,
            };
            self.input.consume(1);
            match (self.shell, byte) {
                (Shell::Raw, 0x02) => {
                    self.shell = Shell::Interactive;
                    self.say("\r\n>>> ")?;
                }
                (Shell::Raw, _) => {}
                (Shell::Paste, 0x03) => {
                    paste.clear();
                    self.shell = Shell::Interactive;
                    self.say("\r\n>>> ")?;
                }
                (Shell::Paste, 0x04) => {
                    self.shell = Shell::Interactive;
                    let source = String::from_utf8_lossy(&paste).into_owned();
                    paste.clear();
                    if source.contains("class RemoteStub") {
                        self.loaded = true;
                    }
                    self.say("\r\n>>> ")?;
                }
                (Shell::Paste, b'\n') => {
                    let text = String::from_utf8_lossy(&line).into_owned();
                    line.clear();
                    paste.extend_from_slice(text.as_bytes());
                    paste.push(b'\n');
                    self.log.lock().unwrap().pasted.push(text.clone());
                    self.say(&format!("{text}\r\n=== "))?;
                }
                (Shell::Paste, b'\r') => {}
                (Shell::Paste, b) => line.push(b),
                (Shell::Interactive, 0x01) => {
                    self.shell = Shell::Raw;
                    self.say("raw REPL; CTRL-B to exit\r\n>")?;
                }
                (Shell::Interactive, 0x02) => {}
                (Shell::Interactive, 0x03) => {
                    line.clear();
                    self.say("\r\nKeyboardInterrupt\r\n>>> ")?;
                }
                (Shell::Interactive, 0x04) => {
                    line.clear();
                    self.loaded = false;
                    self.log.lock().unwrap().resets += 1;
                    self.say("\r\nsoft reboot\r\nrunning main.py\r\n")?;
                }
                (Shell::Interactive, 0x05) => {
                    line.clear();
                    self.shell = Shell::Paste;
                    self.say("\r\npaste mode; Ctrl-C to cancel, Ctrl-D to finish\r\n=== ")?;
                }
                (Shell::Interactive, b'\r') => {}
                (Shell::Interactive, b'\n') => {
                    let text = String::from_utf8_lossy(&line).trim().to_owned();
                    line.clear();
                    self.execute(&text)?;
                }
                (Shell::Interactive, b) => line.push(b),
            }
        }
    }

    fn execute(&mut self, text: &str) -> io::Result<()> {
        self.log.lock().unwrap().executed.push(text.to_owned());
        self.say(&format!("{text}\r\n"))?;
        match text {
            "" => {}
            "RemoteStub" if self.loaded => self.say("<class 'RemoteStub'>\r\n")?,
            "RemoteStub" => self.traceback("NameError: name 'RemoteStub' isn't defined")?,
            "from rstub import RemoteStub" if self.root.join("rstub.py").exists() => {
                self.loaded = true;
            }
            "from rstub import RemoteStub" => {
                self.traceback("ImportError: no module named 'rstub'")?;
            }
            "RemoteStub().loop()" if self.loaded => {
                self.log.lock().unwrap().launches += 1;
                self.input.get_mut().interruptible = true;
                let served = self.agent.serve(&mut self.input, &mut self.output);
                self.input.get_mut().interruptible = false;
                match served {
                    Err(e) if is_interrupt(&e) => {
                        self.log.lock().unwrap().interrupts += 1;
                        self.say("\r\nKeyboardInterrupt\r\n")?;
                    }
                    other => other?,
                }
            }
            "RemoteStub().loop()" => {
                self.traceback("NameError: name 'RemoteStub' isn't defined")?;
            }
            _ => self.traceback("SyntaxError: invalid syntax")?,
        }
        self.say(">>> ")
    }

    fn traceback(&mut self, last: &str) -> io::Result<()> {
        self.say(&format!(
            "Traceback (most recent call last):\r\n  File \"<stdin>\", line 1, in <module>\r\n{last}\r\n"
        ))
    }

    fn say(&mut self, text: &str) -> io::Result<()> {
        self.output.write_all(text.as_bytes())
    }
}
