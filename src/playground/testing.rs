//! Helpers shared by the unit tests: shell-script programs and a fake toolchain

use std::fs::OpenOptions;
use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Stand-in for `go build -o <exe> <src>`
///
/// Sources containing `BROKEN` fail with diagnostics that name the source path,
/// shortened to `./name` when it lies under the working directory the way
/// cmd/go prints it. Anything else "compiles" into a shell script made of every
/// line after the package clause.
const FAKE_GO: &str = r#"PATH=/usr/local/bin:/usr/bin:/bin
src=$4
cwd=$(pwd)
case $src in "$cwd"/*) src=./${src#"$cwd"/} ;; esac
if grep -q BROKEN "$4"; then
  echo '# command-line-arguments'
  echo "$src:2:1: syntax error: unexpected BROKEN"
  echo "$src:3:1: too many errors"
  exit 2
fi
{ echo '#!/bin/sh'; tail -n +2 "$4"; } > "$3"
chmod 755 "$3"
"#;

/// Writes an executable `/bin/sh` script
pub(crate) fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o755)
        .open(&path)
        .unwrap();
    writeln!(file, "#!/bin/sh").unwrap();
    file.write_all(body.as_bytes()).unwrap();
    file.sync_all().unwrap();
    path
}

pub(crate) fn fake_go(dir: &Path) -> PathBuf {
    write_script(dir, "go", FAKE_GO)
}

/// Whether `pid` names a live process; zombies count as gone
pub(crate) fn is_alive(pid: i32) -> bool {
    let Ok(stat) = std::fs::read_to_string(format!("/proc/{pid}/stat")) else {
        return false;
    };
    // "pid (comm) state ...", where comm may itself contain parentheses
    let state = stat
        .rfind(')')
        .and_then(|i| stat[i + 1..].trim_start().chars().next());
    !matches!(state, None | Some('Z') | Some('X'))
}

/// Polls until `pid` is gone, giving up after `limit`
pub(crate) async fn exits_within(pid: i32, limit: Duration) -> bool {
    let started = Instant::now();
    while is_alive(pid) {
        if started.elapsed() > limit {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    true
}
