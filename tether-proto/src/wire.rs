//! Bit-exact literals exchanged with the device shell and companion.

/// Suffix of the interactive prompt.
pub const PROMPT: &[u8] = b"\n>>> ";

/// Interrupt sequence: leave raw mode (`^B`), then break (`^C`).
pub const INTERRUPT: &[u8] = b"\x02\x03";

/// Break, then enter raw mode (`^A`).
pub const RAW_ENTER: &[u8] = b"\x03\x01";

/// Suffix of the raw-mode banner.
pub const RAW_BANNER: &[u8] = b"CTRL-B to exit\r\n>";

/// Soft reset: finish the current line, then `^D`.
pub const SOFT_RESET: &[u8] = b"\n\x04";

/// Expression that evaluates cleanly only when the companion is loaded.
pub const PROBE: &[u8] = b"RemoteStub\r\n";

/// Loads a companion installed on the device filesystem.
pub const IMPORT_FALLBACK: &[u8] = b"from rstub import RemoteStub\r\n";

/// Substring that marks a failed probe or import.
pub const ERROR_MARK: &[u8] = b"Error";

/// Enters paste mode (`^E`).
pub const PASTE_ENTER: &[u8] = b"\x05";

/// Echo printed by paste mode before every line.
pub const PASTE_ECHO: &[u8] = b"===";

/// Leaves paste mode (`^D`) and compiles the pasted text.
pub const PASTE_END: &[u8] = b"\x04";

/// Prompt printed once paste mode has finished.
pub const PASTE_DONE: &[u8] = b">>>";

/// Starts the companion's request loop.
pub const LAUNCH: &[u8] = b"RemoteStub().loop()\r\n";

/// First line of a frame.
pub const FRAME_START: &str = "__STUB__";

/// Last line of a frame.
pub const FRAME_END: &str = "~~STUB~~";

/// Acknowledgement for the start marker and for each chunk line.
pub const ACK: u8 = b'.';

/// Acknowledgement for the end marker.
pub const ACK_END: u8 = b'\n';

/// Device path the companion source is uploaded to.
pub const STUB_PATH: &str = "/rstub.py";
