//! Persistent state snapshot.
//!
//! On every FSM iteration the supervisor writes a short human-readable
//! snapshot to `<state_dir>/cm.state`. The write is atomic: the body goes
//! to `cm.state.tmp` first and is renamed into place, so a reader always
//! sees either the previous complete snapshot or the new one.

use std::fs;
use std::io::{self, Write};
use std::path::Path;

pub const STATE_FILE: &str = "cm.state";
pub const STATE_TMP: &str = "cm.state.tmp";

/// Write `body` atomically into `<dir>/cm.state`.
pub fn dump(dir: &Path, body: &str) -> io::Result<()> {
    fs::create_dir_all(dir)?;
    let tmp = dir.join(STATE_TMP);
    let fin = dir.join(STATE_FILE);
    {
        let mut f = fs::File::create(&tmp)?;
        f.write_all(body.as_bytes())?;
    }
    fs::rename(&tmp, &fin)
}

/// Read the current snapshot, if one exists.
pub fn read(dir: &Path) -> io::Result<String> {
    fs::read_to_string(dir.join(STATE_FILE))
}
