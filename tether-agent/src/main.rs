//! tether-agent: answers tether calls on the device console.
//!
//! Reads framed requests on stdin and writes framed replies on stdout.
//! The optional first argument is the directory device paths resolve under
//! (default `/`).
#![allow(clippy::print_stderr)]

use std::io::{self, BufReader, BufWriter};

use tether_agent::{Agent, Registry, Session};

fn main() -> io::Result<()> {
    let root = std::env::args().nth(1).unwrap_or_else(|| "/".to_owned());
    let mut agent = Agent::new(Registry::builtin(), Session::new(&root));
    eprintln!("[tether-agent] serving {root}");

    let mut r = BufReader::new(io::stdin().lock());
    let mut w = BufWriter::new(io::stdout().lock());
    match agent.serve(&mut r, &mut w) {
        Ok(()) => {
            eprintln!("[tether-agent] exit requested");
            Ok(())
        }
        // Console closed.
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(()),
        Err(e) => {
            eprintln!("[tether-agent] {e}");
            Err(e)
        }
    }
}
