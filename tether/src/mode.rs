//! Shell mode negotiation: interactive, raw, and soft-reset.
//!
//! Every operation takes an absolute deadline computed once by the
//! outermost caller. Retry loops and their sub-deadlines never extend it.

use std::thread;
use std::time::Instant;

use tether_proto::wire;
use tracing::debug;

use crate::connection::{Connection, Mode};
use crate::error::{Error, Result};
use crate::transport::Transport;

impl<T: Transport> Connection<T> {
    /// Brings the device to the interactive prompt.
    ///
    /// A no-op without I/O if already interactive and `force` is false.
    pub fn enter_interactive(&mut self, force: bool, deadline: Instant) -> Result<()> {
        debug!(force, mode = %self.mode, "enter_interactive");
        if self.mode == Mode::Interactive && !force {
            return Ok(());
        }
        self.negotiate(wire::INTERRUPT, wire::PROMPT, deadline, "enter_interactive")?;
        self.mode = Mode::Interactive;
        Ok(())
    }

    /// Brings the device to raw mode, passing through the interactive prompt.
    pub fn enter_raw(&mut self, force: bool, deadline: Instant) -> Result<()> {
        debug!(force, mode = %self.mode, "enter_raw");
        if self.mode == Mode::Raw && !force {
            return Ok(());
        }
        self.enter_interactive(force, deadline)?;
        self.negotiate(wire::RAW_ENTER, wire::RAW_BANNER, deadline, "enter_raw")?;
        self.mode = Mode::Raw;
        Ok(())
    }

    /// Soft-resets the device from the interactive prompt. Nothing is read
    /// back; the device is left running its main program.
    pub fn enter_run(&mut self, force: bool, deadline: Instant) -> Result<()> {
        debug!(force, mode = %self.mode, "enter_run");
        if self.mode == Mode::Running && !force {
            return Ok(());
        }
        self.enter_interactive(force, deadline)?;
        self.write(wire::SOFT_RESET)?;
        self.mode = Mode::Running;
        Ok(())
    }

    /// Sends `trigger` until the reply ends with `marker`.
    ///
    /// Each attempt drains stale input and waits at most
    /// [`probe_window`](crate::LinkConfig::probe_window). A failure leaves the
    /// mode [`Mode::Unknown`].
    fn negotiate(
        &mut self,
        trigger: &[u8],
        marker: &[u8],
        deadline: Instant,
        op: &'static str,
    ) -> Result<()> {
        let result = self.negotiate_inner(trigger, marker, deadline, op);
        if result.is_err() {
            self.mode = Mode::Unknown;
        }
        result
    }

    fn negotiate_inner(
        &mut self,
        trigger: &[u8],
        marker: &[u8],
        deadline: Instant,
        op: &'static str,
    ) -> Result<()> {
        while Instant::now() < deadline {
            self.cancel.check()?;
            self.drain(deadline)?;
            self.write(trigger)?;
            let window = deadline.min(Instant::now() + self.config.probe_window);
            let reply = self.read_until(marker, window)?;
            if reply.ends_with(marker) {
                return Ok(());
            }
            thread::sleep(self.config.retry_interval);
        }
        Err(Error::Timeout { op })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::config::LinkConfig;
    use crate::transport::testing::ScriptedPort;

    /// Answers the interrupt with a prompt and raw entry with the banner.
    fn shell() -> ScriptedPort {
        ScriptedPort::new(|data| match data {
            b"\x02\x03" => b"\r\nKeyboardInterrupt\r\n>>> ".to_vec(),
            b"\x03\x01" => b"raw REPL; CTRL-B to exit\r\n>".to_vec(),
            _ => Vec::new(),
        })
    }

    fn conn(port: ScriptedPort) -> Connection<ScriptedPort> {
        Connection::with_config(port, LinkConfig::default().unpaced())
    }

    fn soon() -> Instant {
        Instant::now() + Duration::from_secs(2)
    }

    #[test]
    fn interactive_from_unknown() {
        let mut c = conn(shell());
        c.enter_interactive(false, soon()).unwrap();
        assert_eq!(c.mode(), Mode::Interactive);
        assert_eq!(c.transport().written, b"\x02\x03");
    }

    #[test]
    fn interactive_is_idempotent() {
        let mut c = conn(shell());
        c.enter_interactive(false, soon()).unwrap();
        let (writes, reads) = (c.transport().writes, c.transport().reads);
        c.enter_interactive(false, soon()).unwrap();
        assert_eq!(c.transport().writes, writes);
        assert_eq!(c.transport().reads, reads);
    }

    #[test]
    fn forced_interactive_renegotiates() {
        let mut c = conn(shell());
        c.enter_interactive(false, soon()).unwrap();
        c.enter_interactive(true, soon()).unwrap();
        assert_eq!(c.transport().written, b"\x02\x03\x02\x03");
    }

    #[test]
    fn raw_passes_through_interactive() {
        let mut c = conn(shell());
        c.enter_raw(false, soon()).unwrap();
        assert_eq!(c.mode(), Mode::Raw);
        assert_eq!(c.transport().written, b"\x02\x03\x03\x01");

        let writes = c.transport().writes;
        c.enter_raw(false, soon()).unwrap();
        assert_eq!(c.transport().writes, writes);
    }

    #[test]
    fn run_sends_soft_reset() {
        let mut c = conn(shell());
        c.enter_run(false, soon()).unwrap();
        assert_eq!(c.mode(), Mode::Running);
        assert!(c.transport().written.ends_with(b"\n\x04"));
    }

    #[test]
    fn silent_device_times_out_within_budget() {
        let mut c = Connection::with_config(ScriptedPort::silent(), LinkConfig::default());
        let budget = Duration::from_millis(300);
        let t0 = Instant::now();
        let err = c.enter_interactive(false, t0 + budget).unwrap_err();
        let elapsed = t0.elapsed();
        assert!(matches!(err, Error::Timeout { op: "enter_interactive" }));
        assert!(elapsed >= budget);
        assert!(elapsed < budget + Duration::from_millis(100), "{elapsed:?}");
        assert_eq!(c.mode(), Mode::Unknown);
    }

    #[test]
    fn missing_raw_banner_times_out_within_budget() {
        let port = ScriptedPort::new(|data| match data {
            b"\x02\x03" => b"\r\n>>> ".to_vec(),
            _ => Vec::new(),
        });
        let mut c = conn(port);
        let budget = Duration::from_millis(300);
        let t0 = Instant::now();
        let err = c.enter_raw(false, t0 + budget).unwrap_err();
        let elapsed = t0.elapsed();
        assert!(matches!(err, Error::Timeout { op: "enter_raw" }));
        assert!(elapsed >= budget);
        assert!(elapsed < budget + Duration::from_millis(100), "{elapsed:?}");
        assert_eq!(c.mode(), Mode::Unknown);
    }

    #[test]
    fn retries_until_prompt_appears() {
        let mut attempts = 0;
        let port = ScriptedPort::new(move |data| {
            if data == b"\x02\x03" {
                attempts += 1;
                if attempts >= 3 {
                    return b"\r\n>>> ".to_vec();
                }
                return b"garbage".to_vec();
            }
            Vec::new()
        });
        let mut c = Connection::with_config(
            port,
            LinkConfig {
                probe_window: Duration::from_millis(20),
                ..LinkConfig::default().unpaced()
            },
        );
        c.enter_interactive(false, soon()).unwrap();
        assert_eq!(c.transport().written, b"\x02\x03".repeat(3));
    }

    #[test]
    fn cancellation_stops_the_retry_loop() {
        let mut c = conn(ScriptedPort::silent());
        c.cancel_token().cancel();
        let err = c.enter_raw(true, soon()).unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        assert!(c.transport().written.is_empty());
    }
}
